//! BSON 值类型定义模块
//!
//! 定义线上格式支持的所有数据类型,包括基础类型和领域类型。
//! 使用 `CompactString` 优化短字符串的内存占用。

use crate::document::Document;
use crate::spec::Kind;
use compact_str::CompactString;
use rindb_common::ObjectId;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

pub(crate) const DATE_TIME_NEWTYPE: &str = "$rindbDateTime";
pub(crate) const TIMESTAMP_NEWTYPE: &str = "$rindbTimestamp";
pub(crate) const SYMBOL_NEWTYPE: &str = "$rindbSymbol";
pub(crate) const CODE_NEWTYPE: &str = "$rindbCode";
pub(crate) const CODE_WITH_SCOPE_NEWTYPE: &str = "$rindbCodeWithScope";
pub(crate) const REGEX_NEWTYPE: &str = "$rindbRegex";
pub(crate) const BINARY_NEWTYPE: &str = "$rindbBinary";
pub(crate) const MIN_MAX_NEWTYPE: &str = "$rindbMinMax";

/// BSON 值的枚举类型
///
/// 每个变体对应线上格式的一个类型标记。解码到泛型目标时产生的
/// 就是这个类型 (双精度数 → Double, 文档 → Document, 以此类推)。
///
/// # 示例
///
/// ```rust,ignore
/// use rindb_bson::Bson;
///
/// let value = Bson::from("hello");
/// assert_eq!(value.type_name(), "string");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum Bson {
    /// IEEE-754 双精度浮点数
    Double(f64),
    /// UTF-8 字符串
    String(CompactString),
    /// 嵌套文档 (有序键值对)
    Document(Document),
    /// 值数组
    Array(Vec<Bson>),
    /// 二进制数据
    Binary(Vec<u8>),
    /// 12 字节的唯一对象标识符
    ObjectId(ObjectId),
    /// 布尔值
    Boolean(bool),
    /// 日期时间 (Unix 毫秒)
    DateTime(DateTime),
    /// 空值
    Null,
    /// 正则表达式
    Regex(Regex),
    /// JavaScript 代码
    Code(Code),
    /// 符号
    Symbol(Symbol),
    /// 带作用域的 JavaScript 代码
    CodeWithScope(CodeWithScope),
    /// 32 位有符号整数
    Int32(i32),
    /// 内部时间戳 (不透明 int64)
    Timestamp(Timestamp),
    /// 64 位有符号整数
    Int64(i64),
    /// 最小值哨兵
    MinKey,
    /// 最大值哨兵
    MaxKey,
}

/// BSON 日期时间
///
/// 值为 Unix 纪元以来的毫秒数。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct DateTime(pub i64);

impl DateTime {
    pub fn now() -> Self {
        Self::from_chrono(chrono::Utc::now())
    }

    pub fn from_chrono(dt: chrono::DateTime<chrono::Utc>) -> Self {
        Self(dt.timestamp_millis())
    }

    pub fn to_chrono(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        chrono::DateTime::from_timestamp_millis(self.0)
    }

    pub fn millis(&self) -> i64 {
        self.0
    }
}

/// BSON 内部时间戳
///
/// 对驱动而言是不透明的 int64。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp(pub i64);

/// BSON 符号
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol(pub CompactString);

/// JavaScript 代码
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Code(pub CompactString);

/// 带作用域的 JavaScript 代码
#[derive(Debug, Clone, PartialEq)]
pub struct CodeWithScope {
    pub code: CompactString,
    pub scope: Document,
}

/// 正则表达式
///
/// 选项字符必须按字母序排列,构造函数负责排序。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Regex {
    pub pattern: CompactString,
    pub options: CompactString,
}

impl Regex {
    pub fn new(pattern: impl Into<CompactString>, options: &str) -> Self {
        let mut chars: Vec<char> = options.chars().collect();
        chars.sort_unstable();
        Self {
            pattern: pattern.into(),
            options: chars.into_iter().collect::<String>().into(),
        }
    }
}

/// 最小/最大值哨兵
///
/// 解码目标类型,对应 MinKey (-1) 与 MaxKey (+1)。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MinMax {
    Min,
    Max,
}

/// 二进制字段包装
///
/// 结构体字段想要编码为二进制元素时使用该包装,
/// 裸 `Vec<u8>` 经过 serde 会按序列处理。
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Binary(pub Vec<u8>);

impl Bson {
    /// 取值的类型标记
    pub fn kind(&self) -> Kind {
        match self {
            Bson::Double(_) => Kind::Double,
            Bson::String(_) => Kind::String,
            Bson::Document(_) => Kind::Document,
            Bson::Array(_) => Kind::Array,
            Bson::Binary(_) => Kind::Binary,
            Bson::ObjectId(_) => Kind::ObjectId,
            Bson::Boolean(_) => Kind::Boolean,
            Bson::DateTime(_) => Kind::DateTime,
            Bson::Null => Kind::Null,
            Bson::Regex(_) => Kind::Regex,
            Bson::Code(_) => Kind::Code,
            Bson::Symbol(_) => Kind::Symbol,
            Bson::CodeWithScope(_) => Kind::CodeWithScope,
            Bson::Int32(_) => Kind::Int32,
            Bson::Timestamp(_) => Kind::Timestamp,
            Bson::Int64(_) => Kind::Int64,
            Bson::MinKey => Kind::MinKey,
            Bson::MaxKey => Kind::MaxKey,
        }
    }

    /// 取值的类型名称
    pub fn type_name(&self) -> &'static str {
        self.kind().name()
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Bson::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Bson::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Bson::Int32(n) => Some(*n),
            _ => None,
        }
    }

    /// 尝试取 i64 值
    ///
    /// Int32 和 Int64 都接受,其他类型返回 None。
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Bson::Int32(n) => Some(*n as i64),
            Bson::Int64(n) => Some(*n),
            _ => None,
        }
    }

    /// 尝试取 f64 值
    ///
    /// 数值类型自动拓宽,其他类型返回 None。
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Bson::Double(n) => Some(*n),
            Bson::Int32(n) => Some(*n as f64),
            Bson::Int64(n) => Some(*n as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Bson::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Vec<Bson>> {
        match self {
            Bson::Array(arr) => Some(arr),
            _ => None,
        }
    }

    pub fn as_document(&self) -> Option<&Document> {
        match self {
            Bson::Document(doc) => Some(doc),
            _ => None,
        }
    }

    pub fn as_object_id(&self) -> Option<&ObjectId> {
        match self {
            Bson::ObjectId(id) => Some(id),
            _ => None,
        }
    }

    /// 获取指定键的值
    ///
    /// 文档按键取值,数组按索引字符串取值。
    pub fn get(&self, key: &str) -> Option<&Bson> {
        match self {
            Bson::Document(doc) => doc.get(key),
            Bson::Array(arr) => key.parse::<usize>().ok().and_then(|i| arr.get(i)),
            _ => None,
        }
    }

    /// 按点分隔路径获取嵌套值
    pub fn get_path(&self, path: &str) -> Option<&Bson> {
        let mut current = self;
        for part in path.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }
}

impl Default for Bson {
    fn default() -> Self {
        Bson::Null
    }
}

impl fmt::Display for Bson {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bson::Double(n) => write!(f, "{}", n),
            Bson::String(s) => write!(f, "\"{}\"", s),
            Bson::Document(doc) => write!(f, "{}", doc),
            Bson::Array(arr) => {
                write!(f, "[")?;
                for (i, v) in arr.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, "]")
            }
            Bson::Binary(b) => write!(f, "<binary:{} bytes>", b.len()),
            Bson::ObjectId(id) => write!(f, "ObjectId(\"{}\")", id),
            Bson::Boolean(b) => write!(f, "{}", b),
            Bson::DateTime(dt) => write!(f, "DateTime({})", dt.0),
            Bson::Null => write!(f, "null"),
            Bson::Regex(r) => write!(f, "/{}/{}", r.pattern, r.options),
            Bson::Code(c) => write!(f, "Code({})", c.0),
            Bson::Symbol(s) => write!(f, "Symbol(\"{}\")", s.0),
            Bson::CodeWithScope(c) => write!(f, "Code({}, scope: {})", c.code, c.scope),
            Bson::Int32(n) => write!(f, "{}", n),
            Bson::Timestamp(t) => write!(f, "Timestamp({})", t.0),
            Bson::Int64(n) => write!(f, "{}", n),
            Bson::MinKey => write!(f, "MinKey"),
            Bson::MaxKey => write!(f, "MaxKey"),
        }
    }
}

// ============================================================================
// From 特征实现 - 支持从各种 Rust 类型转换为 Bson
// ============================================================================

impl From<f64> for Bson {
    fn from(v: f64) -> Self {
        Bson::Double(v)
    }
}

impl From<i32> for Bson {
    fn from(v: i32) -> Self {
        Bson::Int32(v)
    }
}

impl From<i64> for Bson {
    fn from(v: i64) -> Self {
        Bson::Int64(v)
    }
}

impl From<bool> for Bson {
    fn from(v: bool) -> Self {
        Bson::Boolean(v)
    }
}

impl From<&str> for Bson {
    fn from(v: &str) -> Self {
        Bson::String(CompactString::from(v))
    }
}

impl From<String> for Bson {
    fn from(v: String) -> Self {
        Bson::String(CompactString::from(v))
    }
}

impl From<CompactString> for Bson {
    fn from(v: CompactString) -> Self {
        Bson::String(v)
    }
}

impl From<Vec<u8>> for Bson {
    fn from(v: Vec<u8>) -> Self {
        Bson::Binary(v)
    }
}

impl From<ObjectId> for Bson {
    fn from(v: ObjectId) -> Self {
        Bson::ObjectId(v)
    }
}

impl From<DateTime> for Bson {
    fn from(v: DateTime) -> Self {
        Bson::DateTime(v)
    }
}

impl From<Timestamp> for Bson {
    fn from(v: Timestamp) -> Self {
        Bson::Timestamp(v)
    }
}

impl From<Symbol> for Bson {
    fn from(v: Symbol) -> Self {
        Bson::Symbol(v)
    }
}

impl From<Code> for Bson {
    fn from(v: Code) -> Self {
        Bson::Code(v)
    }
}

impl From<Regex> for Bson {
    fn from(v: Regex) -> Self {
        Bson::Regex(v)
    }
}

impl From<MinMax> for Bson {
    fn from(v: MinMax) -> Self {
        match v {
            MinMax::Min => Bson::MinKey,
            MinMax::Max => Bson::MaxKey,
        }
    }
}

impl From<Document> for Bson {
    fn from(v: Document) -> Self {
        Bson::Document(v)
    }
}

impl<T: Into<Bson>> From<Vec<T>> for Bson {
    fn from(v: Vec<T>) -> Self {
        Bson::Array(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Bson>> From<Option<T>> for Bson {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Bson::Null,
        }
    }
}

// ============================================================================
// 领域类型的 serde 实现
//
// 每个领域类型通过保留的 newtype 名称在编解码层被识别,
// 保证结构体字段经过序列化后落在正确的类型标记上。
// ============================================================================

impl Serialize for DateTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_newtype_struct(DATE_TIME_NEWTYPE, &self.0)
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_newtype_struct(TIMESTAMP_NEWTYPE, &self.0)
    }
}

impl Serialize for Symbol {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_newtype_struct(SYMBOL_NEWTYPE, self.0.as_str())
    }
}

impl Serialize for Code {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_newtype_struct(CODE_NEWTYPE, self.0.as_str())
    }
}

impl Serialize for CodeWithScope {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer
            .serialize_newtype_struct(CODE_WITH_SCOPE_NEWTYPE, &(self.code.as_str(), &self.scope))
    }
}

impl Serialize for Regex {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer
            .serialize_newtype_struct(REGEX_NEWTYPE, &(self.pattern.as_str(), self.options.as_str()))
    }
}

impl Serialize for Binary {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        struct RawBytes<'a>(&'a [u8]);
        impl Serialize for RawBytes<'_> {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_bytes(self.0)
            }
        }
        serializer.serialize_newtype_struct(BINARY_NEWTYPE, &RawBytes(&self.0))
    }
}

impl Serialize for MinMax {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let n: i32 = match self {
            MinMax::Min => -1,
            MinMax::Max => 1,
        };
        serializer.serialize_newtype_struct(MIN_MAX_NEWTYPE, &n)
    }
}

struct I64Visitor(&'static str);

impl<'de> Visitor<'de> for I64Visitor {
    type Value = i64;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<i64, E> {
        Ok(v)
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<i64, E> {
        Ok(v as i64)
    }

    fn visit_newtype_struct<D: Deserializer<'de>>(self, d: D) -> Result<i64, D::Error> {
        d.deserialize_i64(self)
    }
}

impl<'de> Deserialize<'de> for DateTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer
            .deserialize_newtype_struct(DATE_TIME_NEWTYPE, I64Visitor("a millisecond datetime"))
            .map(DateTime)
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer
            .deserialize_newtype_struct(TIMESTAMP_NEWTYPE, I64Visitor("an int64 timestamp"))
            .map(Timestamp)
    }
}

struct StringVisitor(&'static str);

impl<'de> Visitor<'de> for StringVisitor {
    type Value = CompactString;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        Ok(CompactString::from(v))
    }

    fn visit_newtype_struct<D: Deserializer<'de>>(self, d: D) -> Result<Self::Value, D::Error> {
        d.deserialize_str(self)
    }
}

impl<'de> Deserialize<'de> for Symbol {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer
            .deserialize_newtype_struct(SYMBOL_NEWTYPE, StringVisitor("a symbol"))
            .map(Symbol)
    }
}

impl<'de> Deserialize<'de> for Code {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer
            .deserialize_newtype_struct(CODE_NEWTYPE, StringVisitor("javascript code"))
            .map(Code)
    }
}

impl<'de> Deserialize<'de> for CodeWithScope {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct CwsVisitor;
        impl<'de> Visitor<'de> for CwsVisitor {
            type Value = CodeWithScope;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("code with scope")
            }

            fn visit_seq<A: de::SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
                let code: String = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(0, &self))?;
                let scope: Document = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(1, &self))?;
                Ok(CodeWithScope {
                    code: code.into(),
                    scope,
                })
            }

            fn visit_newtype_struct<D: Deserializer<'de>>(
                self,
                d: D,
            ) -> Result<Self::Value, D::Error> {
                d.deserialize_seq(self)
            }
        }
        deserializer.deserialize_newtype_struct(CODE_WITH_SCOPE_NEWTYPE, CwsVisitor)
    }
}

impl<'de> Deserialize<'de> for Regex {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct RegexVisitor;
        impl<'de> Visitor<'de> for RegexVisitor {
            type Value = Regex;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a regular expression")
            }

            fn visit_seq<A: de::SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
                let pattern: String = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(0, &self))?;
                let options: String = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(1, &self))?;
                Ok(Regex {
                    pattern: pattern.into(),
                    options: options.into(),
                })
            }

            fn visit_newtype_struct<D: Deserializer<'de>>(
                self,
                d: D,
            ) -> Result<Self::Value, D::Error> {
                d.deserialize_seq(self)
            }
        }
        deserializer.deserialize_newtype_struct(REGEX_NEWTYPE, RegexVisitor)
    }
}

impl<'de> Deserialize<'de> for Binary {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct BinVisitor;
        impl<'de> Visitor<'de> for BinVisitor {
            type Value = Binary;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("binary data")
            }

            fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Self::Value, E> {
                Ok(Binary(v.to_vec()))
            }

            fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> Result<Self::Value, E> {
                Ok(Binary(v))
            }

            fn visit_seq<A: de::SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
                let mut out = Vec::new();
                while let Some(b) = seq.next_element::<u8>()? {
                    out.push(b);
                }
                Ok(Binary(out))
            }

            fn visit_newtype_struct<D: Deserializer<'de>>(
                self,
                d: D,
            ) -> Result<Self::Value, D::Error> {
                d.deserialize_byte_buf(self)
            }
        }
        deserializer.deserialize_newtype_struct(BINARY_NEWTYPE, BinVisitor)
    }
}

impl<'de> Deserialize<'de> for MinMax {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct MinMaxVisitor;
        impl<'de> Visitor<'de> for MinMaxVisitor {
            type Value = MinMax;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a min/max sentinel (-1 or 1)")
            }

            fn visit_i32<E: de::Error>(self, v: i32) -> Result<Self::Value, E> {
                match v {
                    -1 => Ok(MinMax::Min),
                    1 => Ok(MinMax::Max),
                    other => Err(E::invalid_value(de::Unexpected::Signed(other as i64), &self)),
                }
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
                self.visit_i32(v as i32)
            }

            fn visit_newtype_struct<D: Deserializer<'de>>(
                self,
                d: D,
            ) -> Result<Self::Value, D::Error> {
                d.deserialize_i32(self)
            }
        }
        deserializer.deserialize_newtype_struct(MIN_MAX_NEWTYPE, MinMaxVisitor)
    }
}

// ============================================================================
// Bson 自身的 serde 实现
// ============================================================================

impl Serialize for Bson {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Bson::Double(v) => serializer.serialize_f64(*v),
            Bson::String(v) => serializer.serialize_str(v),
            Bson::Document(doc) => doc.serialize(serializer),
            Bson::Array(arr) => arr.serialize(serializer),
            Bson::Binary(b) => Binary(b.clone()).serialize(serializer),
            Bson::ObjectId(id) => id.serialize(serializer),
            Bson::Boolean(b) => serializer.serialize_bool(*b),
            Bson::DateTime(dt) => dt.serialize(serializer),
            Bson::Null => serializer.serialize_unit(),
            Bson::Regex(r) => r.serialize(serializer),
            Bson::Code(c) => c.serialize(serializer),
            Bson::Symbol(s) => s.serialize(serializer),
            Bson::CodeWithScope(c) => c.serialize(serializer),
            Bson::Int32(n) => serializer.serialize_i32(*n),
            Bson::Timestamp(t) => t.serialize(serializer),
            Bson::Int64(n) => serializer.serialize_i64(*n),
            Bson::MinKey => MinMax::Min.serialize(serializer),
            Bson::MaxKey => MinMax::Max.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Bson {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct BsonVisitor;
        impl<'de> Visitor<'de> for BsonVisitor {
            type Value = Bson;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("any BSON value")
            }

            fn visit_bool<E>(self, v: bool) -> Result<Bson, E> {
                Ok(Bson::Boolean(v))
            }

            fn visit_i32<E>(self, v: i32) -> Result<Bson, E> {
                Ok(Bson::Int32(v))
            }

            fn visit_i64<E>(self, v: i64) -> Result<Bson, E> {
                Ok(Bson::Int64(v))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Bson, E> {
                if v <= i64::MAX as u64 {
                    Ok(Bson::Int64(v as i64))
                } else {
                    Err(E::custom("u64 value does not fit in int64"))
                }
            }

            fn visit_f64<E>(self, v: f64) -> Result<Bson, E> {
                Ok(Bson::Double(v))
            }

            fn visit_str<E>(self, v: &str) -> Result<Bson, E> {
                Ok(Bson::String(CompactString::from(v)))
            }

            fn visit_bytes<E>(self, v: &[u8]) -> Result<Bson, E> {
                Ok(Bson::Binary(v.to_vec()))
            }

            fn visit_byte_buf<E>(self, v: Vec<u8>) -> Result<Bson, E> {
                Ok(Bson::Binary(v))
            }

            fn visit_none<E>(self) -> Result<Bson, E> {
                Ok(Bson::Null)
            }

            fn visit_unit<E>(self) -> Result<Bson, E> {
                Ok(Bson::Null)
            }

            fn visit_some<D: Deserializer<'de>>(self, d: D) -> Result<Bson, D::Error> {
                d.deserialize_any(self)
            }

            fn visit_seq<A: de::SeqAccess<'de>>(self, mut seq: A) -> Result<Bson, A::Error> {
                let mut arr = Vec::new();
                while let Some(v) = seq.next_element::<Bson>()? {
                    arr.push(v);
                }
                Ok(Bson::Array(arr))
            }

            fn visit_map<A: de::MapAccess<'de>>(self, mut map: A) -> Result<Bson, A::Error> {
                let mut doc = Document::new();
                while let Some((k, v)) = map.next_entry::<CompactString, Bson>()? {
                    doc.insert(k, v);
                }
                Ok(reinterpret_extended(doc))
            }
        }
        deserializer.deserialize_any(BsonVisitor)
    }
}

/// 识别扩展标记文档
///
/// 泛型解码与 JSON 互转共用一套 `$` 前缀键约定,
/// 形如 `{"$oid": "..."}` 的文档在这里还原成对应的领域值。
pub(crate) fn reinterpret_extended(doc: Document) -> Bson {
    if let Some((key, value)) = doc.iter().next().filter(|_| doc.len() == 1) {
        match (key, value) {
            ("$oid", Bson::String(s)) => {
                if let Ok(id) = ObjectId::from_hex(s) {
                    return Bson::ObjectId(id);
                }
            }
            ("$date", v) => {
                if let Some(ms) = v.as_i64() {
                    return Bson::DateTime(DateTime(ms));
                }
            }
            ("$timestamp", v) => {
                if let Some(n) = v.as_i64() {
                    return Bson::Timestamp(Timestamp(n));
                }
            }
            ("$symbol", Bson::String(s)) => return Bson::Symbol(Symbol(s.clone())),
            ("$code", Bson::String(s)) => return Bson::Code(Code(s.clone())),
            ("$binary", Bson::String(s)) => {
                if let Ok(bytes) = hex::decode(s.as_str()) {
                    return Bson::Binary(bytes);
                }
            }
            ("$minKey", _) => return Bson::MinKey,
            ("$maxKey", _) => return Bson::MaxKey,
            _ => {}
        }
    }
    if doc.len() == 2 {
        if let (Some(Bson::String(p)), Some(Bson::String(o))) =
            (doc.get("$regex"), doc.get("$options"))
        {
            return Bson::Regex(Regex {
                pattern: p.clone(),
                options: o.clone(),
            });
        }
        if let (Some(Bson::String(c)), Some(Bson::Document(s))) =
            (doc.get("$code"), doc.get("$scope"))
        {
            return Bson::CodeWithScope(CodeWithScope {
                code: c.clone(),
                scope: s.clone(),
            });
        }
    }
    Bson::Document(doc)
}

// ============================================================================
// JSON 互转支持
// ============================================================================

impl From<serde_json::Value> for Bson {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Bson::Null,
            serde_json::Value::Bool(b) => Bson::Boolean(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    if i >= i32::MIN as i64 && i <= i32::MAX as i64 {
                        Bson::Int32(i as i32)
                    } else {
                        Bson::Int64(i)
                    }
                } else if let Some(f) = n.as_f64() {
                    Bson::Double(f)
                } else {
                    Bson::Null
                }
            }
            serde_json::Value::String(s) => Bson::String(CompactString::from(s)),
            serde_json::Value::Array(arr) => {
                Bson::Array(arr.into_iter().map(Into::into).collect())
            }
            serde_json::Value::Object(obj) => {
                let mut doc = Document::new();
                for (k, v) in obj {
                    doc.insert(CompactString::from(k), Bson::from(v));
                }
                reinterpret_extended(doc)
            }
        }
    }
}

impl From<Bson> for serde_json::Value {
    fn from(v: Bson) -> Self {
        use serde_json::{json, Value};
        match v {
            Bson::Double(n) => serde_json::Number::from_f64(n)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Bson::String(s) => Value::String(s.to_string()),
            Bson::Document(doc) => doc.into(),
            Bson::Array(arr) => Value::Array(arr.into_iter().map(Into::into).collect()),
            Bson::Binary(b) => json!({ "$binary": hex::encode(b) }),
            Bson::ObjectId(id) => json!({ "$oid": id.to_hex() }),
            Bson::Boolean(b) => Value::Bool(b),
            Bson::DateTime(dt) => json!({ "$date": dt.0 }),
            Bson::Null => Value::Null,
            Bson::Regex(r) => json!({
                "$regex": r.pattern.to_string(),
                "$options": r.options.to_string(),
            }),
            Bson::Code(c) => json!({ "$code": c.0.to_string() }),
            Bson::Symbol(s) => json!({ "$symbol": s.0.to_string() }),
            Bson::CodeWithScope(c) => {
                let scope: Value = c.scope.into();
                json!({ "$code": c.code.to_string(), "$scope": scope })
            }
            Bson::Int32(n) => Value::Number(n.into()),
            Bson::Timestamp(t) => json!({ "$timestamp": t.0 }),
            Bson::Int64(n) => Value::Number(n.into()),
            Bson::MinKey => json!({ "$minKey": 1 }),
            Bson::MaxKey => json!({ "$maxKey": 1 }),
        }
    }
}

/// 构造 Bson 的便捷宏
///
/// # 示例
///
/// ```rust,ignore
/// use rindb_bson::bson;
///
/// let null = bson!(null);
/// let number = bson!(42);
/// let array = bson!([1, 2, 3]);
/// let doc = bson!({ "name": "test", "value": 123 });
/// ```
#[macro_export]
macro_rules! bson {
    (null) => {
        $crate::Bson::Null
    };
    (true) => {
        $crate::Bson::Boolean(true)
    };
    (false) => {
        $crate::Bson::Boolean(false)
    };
    ([ $($elem:tt),* $(,)? ]) => {
        $crate::Bson::Array(vec![ $($crate::bson!($elem)),* ])
    };
    ({ $($key:tt : $value:tt),* $(,)? }) => {
        $crate::Bson::Document($crate::doc! { $($key : $value),* })
    };
    ($e:expr) => {
        $crate::Bson::from($e)
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;

    #[test]
    fn test_type_names() {
        assert_eq!(Bson::Null.type_name(), "null");
        assert_eq!(Bson::Int32(1).type_name(), "int32");
        assert_eq!(Bson::MinKey.type_name(), "minValue");
        assert_eq!(Bson::MaxKey.type_name(), "maxValue");
    }

    #[test]
    fn test_numeric_accessors() {
        assert_eq!(Bson::Int32(7).as_i64(), Some(7));
        assert_eq!(Bson::Int64(7).as_f64(), Some(7.0));
        assert_eq!(Bson::Double(1.5).as_i64(), None);
    }

    #[test]
    fn test_regex_options_sorted() {
        let r = Regex::new("^a", "xmi");
        assert_eq!(r.options.as_str(), "imx");
    }

    #[test]
    fn test_get_path() {
        let v = bson!({ "a": { "b": [10, 20] } });
        assert_eq!(v.get_path("a.b.1"), Some(&Bson::Int32(20)));
        assert_eq!(v.get_path("a.c"), None);
    }

    #[test]
    fn test_bson_macro() {
        let v = bson!({ "x": 1, "tags": ["a", "b"], "ok": true, "none": null });
        let doc = v.as_document().unwrap();
        assert_eq!(doc.get("x"), Some(&Bson::Int32(1)));
        assert_eq!(doc.get("none"), Some(&Bson::Null));
        assert_eq!(
            doc.get("tags"),
            Some(&Bson::Array(vec![Bson::from("a"), Bson::from("b")]))
        );
    }

    #[test]
    fn test_json_roundtrip_extended() {
        let id = ObjectId::new();
        let doc = doc! { "_id": (id), "when": (DateTime(12345)), "data": (Bson::Binary(vec![1, 2, 3])) };
        let json: serde_json::Value = Bson::Document(doc.clone()).into();
        let back = Bson::from(json);
        assert_eq!(back, Bson::Document(doc));
    }
}
