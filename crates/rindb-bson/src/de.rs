//! Serde 反序列化模块
//!
//! 实现 Serde Deserializer trait,将 Bson 值还原为 Rust 数据结构。
//!
//! 跨类型转换规则:
//! - Int32/Int64/Double 可落到任意数值宽度,非零值可落到 bool
//! - DateTime/Timestamp 可落到 i64 及对应领域类型
//! - String/Symbol/Code 互相通用
//! - Null 使目标保持零值 (None/0/空串)
//!
//! 数值溢出或标量类型不匹配不会中断解码: 第一个转换错误被暂存,
//! 目标位置填零值,整棵值树走完后才把暂存的错误返回给调用方。

use crate::document::Document;
use crate::value::{self, Bson};
use crate::{BsonError, BsonResult};
use rindb_common::OBJECT_ID_NEWTYPE;
use serde::de::{
    self, DeserializeOwned, DeserializeSeed, IntoDeserializer, MapAccess, SeqAccess, Visitor,
};
use serde::Deserialize;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// 暂存第一个转换错误的槽位
#[derive(Clone, Default)]
struct ErrorSink(Rc<RefCell<Option<BsonError>>>);

impl ErrorSink {
    fn record(&self, err: BsonError) {
        let mut slot = self.0.borrow_mut();
        if slot.is_none() {
            *slot = Some(err);
        }
    }

    fn take(&self) -> Option<BsonError> {
        self.0.borrow_mut().take()
    }
}

#[derive(Clone, Copy)]
enum Input<'de> {
    Value(&'de Bson),
    Doc(&'de Document),
}

pub struct Deserializer<'de> {
    input: Input<'de>,
    sink: ErrorSink,
}

/// 从 Bson 值反序列化
///
/// # Brief
/// 将 Bson 值还原为目标类型,结构走完后返回暂存的转换错误
///
/// # Arguments
/// * `value` - 源 Bson 值
///
/// # Returns
/// 成功返回目标值, 失败返回第一个转换或结构错误
pub fn from_bson<'a, T: Deserialize<'a>>(value: &'a Bson) -> BsonResult<T> {
    let sink = ErrorSink::default();
    let de = Deserializer {
        input: Input::Value(value),
        sink: sink.clone(),
    };
    finish(T::deserialize(de), &sink)
}

/// 从文档反序列化
///
/// # Arguments
/// * `doc` - 源文档
///
/// # Returns
/// 成功返回目标值
pub fn from_document<'a, T: Deserialize<'a>>(doc: &'a Document) -> BsonResult<T> {
    let sink = ErrorSink::default();
    let de = Deserializer {
        input: Input::Doc(doc),
        sink: sink.clone(),
    };
    finish(T::deserialize(de), &sink)
}

/// 从二进制数据反序列化
///
/// # Brief
/// 先完成结构解析 (结构错误立即中止),再做宿主类型转换
///
/// # Arguments
/// * `data` - 文档的二进制字节
///
/// # Returns
/// 成功返回目标值
pub fn from_slice<T: DeserializeOwned>(data: &[u8]) -> BsonResult<T> {
    let doc = crate::codec::decode_document(data)?;
    from_document(&doc)
}

fn finish<T>(result: Result<T, BsonError>, sink: &ErrorSink) -> BsonResult<T> {
    match result {
        Ok(v) => match sink.take() {
            Some(err) => Err(err),
            None => Ok(v),
        },
        Err(err) => Err(sink.take().unwrap_or(err)),
    }
}

impl de::Error for BsonError {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        BsonError::Deserialization(msg.to_string())
    }
}

impl<'de> Deserializer<'de> {
    fn kind_name(&self) -> &'static str {
        match self.input {
            Input::Value(v) => v.type_name(),
            Input::Doc(_) => "document",
        }
    }

    fn mismatch(&self, target: &'static str) {
        self.sink.record(BsonError::Conversion {
            kind: self.kind_name(),
            target: target.to_string(),
        });
    }

    fn is_null(&self) -> bool {
        matches!(self.input, Input::Value(Bson::Null))
    }

    /// 整数目标可接受的源值
    fn int_value(&self) -> Option<i64> {
        match self.input {
            Input::Value(Bson::Int32(n)) => Some(*n as i64),
            Input::Value(Bson::Int64(n)) => Some(*n),
            Input::Value(Bson::Double(f)) => Some(*f as i64),
            Input::Value(Bson::DateTime(dt)) => Some(dt.0),
            Input::Value(Bson::Timestamp(t)) => Some(t.0),
            _ => None,
        }
    }

    /// 浮点目标可接受的源值
    fn float_value(&self) -> Option<f64> {
        match self.input {
            Input::Value(Bson::Double(f)) => Some(*f),
            Input::Value(Bson::Int32(n)) => Some(*n as f64),
            Input::Value(Bson::Int64(n)) => Some(*n as f64),
            _ => None,
        }
    }

    fn str_value(&self) -> Option<&'de str> {
        match self.input {
            Input::Value(Bson::String(s)) => Some(s.as_str()),
            Input::Value(Bson::Symbol(s)) => Some(s.0.as_str()),
            Input::Value(Bson::Code(c)) => Some(c.0.as_str()),
            _ => None,
        }
    }

    fn as_doc(&self) -> Option<&'de Document> {
        match self.input {
            Input::Doc(d) => Some(d),
            Input::Value(Bson::Document(d)) => Some(d),
            _ => None,
        }
    }
}

macro_rules! deserialize_signed {
    ($method:ident, $visit:ident, $ty:ty, $name:literal) => {
        fn $method<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
            if self.is_null() {
                return visitor.$visit(0);
            }
            match self.int_value() {
                Some(n) if n >= <$ty>::MIN as i64 && n <= <$ty>::MAX as i64 => {
                    visitor.$visit(n as $ty)
                }
                _ => {
                    self.mismatch($name);
                    visitor.$visit(0)
                }
            }
        }
    };
}

macro_rules! deserialize_unsigned {
    ($method:ident, $visit:ident, $ty:ty, $name:literal) => {
        fn $method<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
            if self.is_null() {
                return visitor.$visit(0);
            }
            match self.int_value() {
                Some(n) if n >= 0 && (n as u64) <= <$ty>::MAX as u64 => visitor.$visit(n as $ty),
                _ => {
                    self.mismatch($name);
                    visitor.$visit(0)
                }
            }
        }
    };
}

impl<'de> de::Deserializer<'de> for Deserializer<'de> {
    type Error = BsonError;

    /// 泛型目标
    ///
    /// 每个类型映射到它的规范宿主形态: 文档 → 映射, 数组 → 序列,
    /// 领域类型以 `$` 前缀键的单字段映射呈现,Bson 自身的 Visitor
    /// 会把它们还原回对应的变体。
    fn deserialize_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        let value = match self.input {
            Input::Doc(d) => {
                return visitor.visit_map(DocAccess {
                    iter: d.iter(),
                    value: None,
                    sink: self.sink,
                })
            }
            Input::Value(v) => v,
        };
        match value {
            Bson::Double(n) => visitor.visit_f64(*n),
            Bson::String(s) => visitor.visit_str(s),
            Bson::Document(d) => visitor.visit_map(DocAccess {
                iter: d.iter(),
                value: None,
                sink: self.sink,
            }),
            Bson::Array(items) => visitor.visit_seq(ValueSeqAccess {
                iter: items.iter(),
                sink: self.sink,
            }),
            Bson::Binary(b) => visitor.visit_byte_buf(b.clone()),
            Bson::ObjectId(id) => visitor.visit_map(de::value::MapDeserializer::new(
                std::iter::once(("$oid", id.to_hex())),
            )),
            Bson::Boolean(b) => visitor.visit_bool(*b),
            Bson::DateTime(dt) => visitor.visit_map(de::value::MapDeserializer::new(
                std::iter::once(("$date", dt.0)),
            )),
            Bson::Null => visitor.visit_unit(),
            Bson::Regex(r) => visitor.visit_map(de::value::MapDeserializer::new(
                [("$regex", r.pattern.as_str()), ("$options", r.options.as_str())].into_iter(),
            )),
            Bson::Code(c) => visitor.visit_map(de::value::MapDeserializer::new(
                std::iter::once(("$code", c.0.as_str())),
            )),
            Bson::Symbol(s) => visitor.visit_map(de::value::MapDeserializer::new(
                std::iter::once(("$symbol", s.0.as_str())),
            )),
            Bson::CodeWithScope(c) => visitor.visit_map(CwsExtAccess {
                code: Some(c.code.as_str()),
                scope: Some(&c.scope),
                served_keys: 0,
                sink: self.sink,
            }),
            Bson::Int32(n) => visitor.visit_i32(*n),
            Bson::Timestamp(t) => visitor.visit_map(de::value::MapDeserializer::new(
                std::iter::once(("$timestamp", t.0)),
            )),
            Bson::Int64(n) => visitor.visit_i64(*n),
            Bson::MinKey => visitor.visit_map(de::value::MapDeserializer::new(
                std::iter::once(("$minKey", 1i32)),
            )),
            Bson::MaxKey => visitor.visit_map(de::value::MapDeserializer::new(
                std::iter::once(("$maxKey", 1i32)),
            )),
        }
    }

    fn deserialize_bool<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        match self.input {
            Input::Value(Bson::Boolean(b)) => visitor.visit_bool(*b),
            Input::Value(Bson::Int32(n)) => visitor.visit_bool(*n != 0),
            Input::Value(Bson::Int64(n)) => visitor.visit_bool(*n != 0),
            Input::Value(Bson::Double(f)) => visitor.visit_bool(*f != 0.0),
            Input::Value(Bson::Null) => visitor.visit_bool(false),
            _ => {
                self.mismatch("bool");
                visitor.visit_bool(false)
            }
        }
    }

    deserialize_signed!(deserialize_i8, visit_i8, i8, "i8");
    deserialize_signed!(deserialize_i16, visit_i16, i16, "i16");
    deserialize_signed!(deserialize_i32, visit_i32, i32, "i32");
    deserialize_signed!(deserialize_i64, visit_i64, i64, "i64");
    deserialize_unsigned!(deserialize_u8, visit_u8, u8, "u8");
    deserialize_unsigned!(deserialize_u16, visit_u16, u16, "u16");
    deserialize_unsigned!(deserialize_u32, visit_u32, u32, "u32");
    deserialize_unsigned!(deserialize_u64, visit_u64, u64, "u64");

    fn deserialize_i128<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        if self.is_null() {
            return visitor.visit_i128(0);
        }
        match self.int_value() {
            Some(n) => visitor.visit_i128(n as i128),
            None => {
                self.mismatch("i128");
                visitor.visit_i128(0)
            }
        }
    }

    fn deserialize_u128<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        if self.is_null() {
            return visitor.visit_u128(0);
        }
        match self.int_value() {
            Some(n) if n >= 0 => visitor.visit_u128(n as u128),
            _ => {
                self.mismatch("u128");
                visitor.visit_u128(0)
            }
        }
    }

    fn deserialize_f32<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        if self.is_null() {
            return visitor.visit_f32(0.0);
        }
        match self.float_value() {
            Some(f) if !f.is_finite() || f.abs() <= f32::MAX as f64 => visitor.visit_f32(f as f32),
            _ => {
                self.mismatch("f32");
                visitor.visit_f32(0.0)
            }
        }
    }

    fn deserialize_f64<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        if self.is_null() {
            return visitor.visit_f64(0.0);
        }
        match self.float_value() {
            Some(f) => visitor.visit_f64(f),
            None => {
                self.mismatch("f64");
                visitor.visit_f64(0.0)
            }
        }
    }

    fn deserialize_char<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        match self.str_value() {
            Some(s) if s.chars().count() == 1 => {
                visitor.visit_char(s.chars().next().unwrap_or('\0'))
            }
            _ => {
                self.mismatch("char");
                visitor.visit_char('\0')
            }
        }
    }

    fn deserialize_str<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        if self.is_null() {
            return visitor.visit_str("");
        }
        match self.str_value() {
            Some(s) => visitor.visit_str(s),
            None => {
                self.mismatch("string");
                visitor.visit_str("")
            }
        }
    }

    fn deserialize_string<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        self.deserialize_str(visitor)
    }

    fn deserialize_bytes<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        match self.input {
            Input::Value(Bson::Binary(b)) => visitor.visit_bytes(b),
            Input::Value(Bson::Null) => visitor.visit_bytes(&[]),
            _ => {
                self.mismatch("bytes");
                visitor.visit_bytes(&[])
            }
        }
    }

    fn deserialize_byte_buf<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        self.deserialize_bytes(visitor)
    }

    fn deserialize_option<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        if self.is_null() {
            visitor.visit_none()
        } else {
            visitor.visit_some(self)
        }
    }

    fn deserialize_unit<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        visitor.visit_unit()
    }

    fn deserialize_unit_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value, Self::Error> {
        self.deserialize_unit(visitor)
    }

    /// newtype 结构分发
    ///
    /// 保留名称对应的领域类型做按类型的转换,不匹配时记录转换
    /// 错误并填零值;普通 newtype 透明传递。
    fn deserialize_newtype_struct<V: Visitor<'de>>(
        self,
        name: &'static str,
        visitor: V,
    ) -> Result<V::Value, Self::Error> {
        match name {
            OBJECT_ID_NEWTYPE => match self.input {
                Input::Value(Bson::ObjectId(id)) => visitor.visit_bytes(id.as_bytes()),
                _ => {
                    self.mismatch("ObjectId");
                    visitor.visit_bytes(&[0u8; 12])
                }
            },
            value::DATE_TIME_NEWTYPE => match self.input {
                Input::Value(Bson::DateTime(dt)) => visitor.visit_i64(dt.0),
                Input::Value(Bson::Int64(n)) => visitor.visit_i64(*n),
                _ => {
                    self.mismatch("DateTime");
                    visitor.visit_i64(0)
                }
            },
            value::TIMESTAMP_NEWTYPE => match self.input {
                Input::Value(Bson::Timestamp(t)) => visitor.visit_i64(t.0),
                Input::Value(Bson::Int64(n)) => visitor.visit_i64(*n),
                _ => {
                    self.mismatch("Timestamp");
                    visitor.visit_i64(0)
                }
            },
            value::SYMBOL_NEWTYPE => match self.str_value() {
                Some(s) => visitor.visit_str(s),
                None => {
                    self.mismatch("Symbol");
                    visitor.visit_str("")
                }
            },
            value::CODE_NEWTYPE => match self.str_value() {
                Some(s) => visitor.visit_str(s),
                None => {
                    self.mismatch("Code");
                    visitor.visit_str("")
                }
            },
            value::CODE_WITH_SCOPE_NEWTYPE => match self.input {
                Input::Value(Bson::CodeWithScope(c)) => visitor.visit_seq(CwsSeqAccess {
                    code: Some(c.code.as_str()),
                    scope: Some(&c.scope),
                    sink: self.sink,
                }),
                _ => {
                    self.mismatch("CodeWithScope");
                    visitor.visit_seq(CwsSeqAccess {
                        code: Some(""),
                        scope: None,
                        sink: self.sink.clone(),
                    })
                }
            },
            value::REGEX_NEWTYPE => match self.input {
                Input::Value(Bson::Regex(r)) => {
                    visitor.visit_seq(de::value::SeqDeserializer::<_, BsonError>::new(
                        [r.pattern.as_str(), r.options.as_str()].into_iter(),
                    ))
                }
                _ => {
                    self.mismatch("Regex");
                    visitor.visit_seq(de::value::SeqDeserializer::<_, BsonError>::new(
                        ["", ""].into_iter(),
                    ))
                }
            },
            value::BINARY_NEWTYPE => match self.input {
                Input::Value(Bson::Binary(b)) => visitor.visit_byte_buf(b.clone()),
                _ => {
                    self.mismatch("Binary");
                    visitor.visit_byte_buf(Vec::new())
                }
            },
            value::MIN_MAX_NEWTYPE => match self.input {
                Input::Value(Bson::MinKey) => visitor.visit_i32(-1),
                Input::Value(Bson::MaxKey) => visitor.visit_i32(1),
                _ => {
                    self.mismatch("MinMax");
                    visitor.visit_i32(0)
                }
            },
            _ => visitor.visit_newtype_struct(self),
        }
    }

    fn deserialize_seq<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        match self.input {
            Input::Value(Bson::Array(items)) => visitor.visit_seq(ValueSeqAccess {
                iter: items.iter(),
                sink: self.sink,
            }),
            Input::Value(Bson::Binary(b)) => visitor.visit_seq(
                de::value::SeqDeserializer::<_, BsonError>::new(b.iter().copied()),
            ),
            Input::Value(Bson::Null) => visitor.visit_seq(ValueSeqAccess {
                iter: std::iter::empty(),
                sink: self.sink,
            }),
            _ => {
                self.mismatch("sequence");
                visitor.visit_seq(ValueSeqAccess {
                    iter: std::iter::empty(),
                    sink: self.sink.clone(),
                })
            }
        }
    }

    fn deserialize_tuple<V: Visitor<'de>>(
        self,
        _len: usize,
        visitor: V,
    ) -> Result<V::Value, Self::Error> {
        self.deserialize_seq(visitor)
    }

    fn deserialize_tuple_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _len: usize,
        visitor: V,
    ) -> Result<V::Value, Self::Error> {
        self.deserialize_seq(visitor)
    }

    fn deserialize_map<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        match self.as_doc() {
            Some(doc) => visitor.visit_map(DocAccess {
                iter: doc.iter(),
                value: None,
                sink: self.sink,
            }),
            None => {
                self.mismatch("document");
                Err(BsonError::Deserialization(format!(
                    "expected a document, got {}",
                    self.kind_name()
                )))
            }
        }
    }

    fn deserialize_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, Self::Error> {
        self.deserialize_map(visitor)
    }

    fn deserialize_enum<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _variants: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, Self::Error> {
        match self.input {
            Input::Value(Bson::String(s)) => visitor.visit_enum(s.as_str().into_deserializer()),
            Input::Value(Bson::Document(doc)) if doc.len() == 1 => {
                match doc.iter().next() {
                    Some((variant, inner)) => visitor.visit_enum(EnumAccess {
                        variant,
                        value: inner,
                        sink: self.sink.clone(),
                    }),
                    None => Err(BsonError::Deserialization("empty enum document".to_string())),
                }
            }
            _ => Err(BsonError::Deserialization(format!(
                "expected a string or single-entry document for enum, got {}",
                self.kind_name()
            ))),
        }
    }

    fn deserialize_identifier<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        self.deserialize_str(visitor)
    }

    fn deserialize_ignored_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        visitor.visit_unit()
    }
}

struct ValueSeqAccess<'de, I: Iterator<Item = &'de Bson>> {
    iter: I,
    sink: ErrorSink,
}

impl<'de, I: Iterator<Item = &'de Bson>> SeqAccess<'de> for ValueSeqAccess<'de, I> {
    type Error = BsonError;

    fn next_element_seed<T: DeserializeSeed<'de>>(
        &mut self,
        seed: T,
    ) -> Result<Option<T::Value>, Self::Error> {
        match self.iter.next() {
            Some(value) => seed
                .deserialize(Deserializer {
                    input: Input::Value(value),
                    sink: self.sink.clone(),
                })
                .map(Some),
            None => Ok(None),
        }
    }
}

struct DocAccess<'de, I: Iterator<Item = (&'de str, &'de Bson)>> {
    iter: I,
    value: Option<&'de Bson>,
    sink: ErrorSink,
}

impl<'de, I: Iterator<Item = (&'de str, &'de Bson)>> MapAccess<'de> for DocAccess<'de, I> {
    type Error = BsonError;

    fn next_key_seed<K: DeserializeSeed<'de>>(
        &mut self,
        seed: K,
    ) -> Result<Option<K::Value>, Self::Error> {
        match self.iter.next() {
            Some((key, value)) => {
                self.value = Some(value);
                seed.deserialize(key.into_deserializer()).map(Some)
            }
            None => Ok(None),
        }
    }

    fn next_value_seed<V: DeserializeSeed<'de>>(
        &mut self,
        seed: V,
    ) -> Result<V::Value, Self::Error> {
        let value = self
            .value
            .take()
            .ok_or_else(|| BsonError::Deserialization("no value for key".to_string()))?;
        seed.deserialize(Deserializer {
            input: Input::Value(value),
            sink: self.sink.clone(),
        })
    }
}

/// 带作用域代码在泛型目标下的扩展映射形态
struct CwsExtAccess<'de> {
    code: Option<&'de str>,
    scope: Option<&'de Document>,
    served_keys: u8,
    sink: ErrorSink,
}

impl<'de> MapAccess<'de> for CwsExtAccess<'de> {
    type Error = BsonError;

    fn next_key_seed<K: DeserializeSeed<'de>>(
        &mut self,
        seed: K,
    ) -> Result<Option<K::Value>, Self::Error> {
        match self.served_keys {
            0 => {
                self.served_keys = 1;
                seed.deserialize("$code".into_deserializer()).map(Some)
            }
            1 => {
                self.served_keys = 2;
                seed.deserialize("$scope".into_deserializer()).map(Some)
            }
            _ => Ok(None),
        }
    }

    fn next_value_seed<V: DeserializeSeed<'de>>(
        &mut self,
        seed: V,
    ) -> Result<V::Value, Self::Error> {
        if let Some(code) = self.code.take() {
            seed.deserialize(code.into_deserializer())
        } else if let Some(scope) = self.scope.take() {
            seed.deserialize(Deserializer {
                input: Input::Doc(scope),
                sink: self.sink.clone(),
            })
        } else {
            Err(BsonError::Deserialization("no value for key".to_string()))
        }
    }
}

/// 带作用域代码落到领域类型时的序列形态 (code, scope)
struct CwsSeqAccess<'de> {
    code: Option<&'de str>,
    scope: Option<&'de Document>,
    sink: ErrorSink,
}

impl<'de> SeqAccess<'de> for CwsSeqAccess<'de> {
    type Error = BsonError;

    fn next_element_seed<T: DeserializeSeed<'de>>(
        &mut self,
        seed: T,
    ) -> Result<Option<T::Value>, Self::Error> {
        if let Some(code) = self.code.take() {
            return seed.deserialize(code.into_deserializer()).map(Some);
        }
        if let Some(scope) = self.scope.take() {
            return seed
                .deserialize(Deserializer {
                    input: Input::Doc(scope),
                    sink: self.sink.clone(),
                })
                .map(Some);
        }
        Ok(None)
    }
}

struct EnumAccess<'de> {
    variant: &'de str,
    value: &'de Bson,
    sink: ErrorSink,
}

impl<'de> de::EnumAccess<'de> for EnumAccess<'de> {
    type Error = BsonError;
    type Variant = VariantAccess<'de>;

    fn variant_seed<V: DeserializeSeed<'de>>(
        self,
        seed: V,
    ) -> Result<(V::Value, Self::Variant), Self::Error> {
        let variant = seed.deserialize(de::value::StrDeserializer::<BsonError>::new(self.variant))?;
        Ok((
            variant,
            VariantAccess {
                value: self.value,
                sink: self.sink,
            },
        ))
    }
}

struct VariantAccess<'de> {
    value: &'de Bson,
    sink: ErrorSink,
}

impl<'de> de::VariantAccess<'de> for VariantAccess<'de> {
    type Error = BsonError;

    fn unit_variant(self) -> Result<(), Self::Error> {
        Ok(())
    }

    fn newtype_variant_seed<T: DeserializeSeed<'de>>(
        self,
        seed: T,
    ) -> Result<T::Value, Self::Error> {
        seed.deserialize(Deserializer {
            input: Input::Value(self.value),
            sink: self.sink,
        })
    }

    fn tuple_variant<V: Visitor<'de>>(
        self,
        _len: usize,
        visitor: V,
    ) -> Result<V::Value, Self::Error> {
        de::Deserializer::deserialize_seq(
            Deserializer {
                input: Input::Value(self.value),
                sink: self.sink,
            },
            visitor,
        )
    }

    fn struct_variant<V: Visitor<'de>>(
        self,
        _fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, Self::Error> {
        de::Deserializer::deserialize_map(
            Deserializer {
                input: Input::Value(self.value),
                sink: self.sink,
            },
            visitor,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ser::to_bson;
    use crate::value::{DateTime, MinMax, Symbol, Timestamp};
    use crate::{bson, doc};
    use rindb_common::ObjectId;
    use serde::{Deserialize, Serialize};
    use std::collections::HashMap;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Item {
        name: String,
        value: i32,
        active: bool,
    }

    #[test]
    fn test_roundtrip_struct() {
        let original = Item {
            name: "test".to_string(),
            value: 42,
            active: true,
        };
        let value = to_bson(&original).unwrap();
        let restored: Item = from_bson(&value).unwrap();
        assert_eq!(original, restored);
    }

    #[test]
    fn test_cross_kind_numeric_conversions() {
        let n: i64 = from_bson(&Bson::Int32(7)).unwrap();
        assert_eq!(n, 7);
        let n: u8 = from_bson(&Bson::Int64(200)).unwrap();
        assert_eq!(n, 200);
        let f: f64 = from_bson(&Bson::Int64(3)).unwrap();
        assert_eq!(f, 3.0);
        let n: i32 = from_bson(&Bson::Double(9.9)).unwrap();
        assert_eq!(n, 9);
        let b: bool = from_bson(&Bson::Int32(5)).unwrap();
        assert!(b);
        let b: bool = from_bson(&Bson::Double(0.0)).unwrap();
        assert!(!b);
    }

    #[test]
    fn test_datetime_and_timestamp_targets() {
        let ms: i64 = from_bson(&Bson::DateTime(DateTime(777))).unwrap();
        assert_eq!(ms, 777);
        let dt: DateTime = from_bson(&Bson::Int64(888)).unwrap();
        assert_eq!(dt, DateTime(888));
        let ts: Timestamp = from_bson(&Bson::Timestamp(Timestamp(5))).unwrap();
        assert_eq!(ts, Timestamp(5));
    }

    #[test]
    fn test_overflow_records_first_error() {
        #[derive(Debug, Deserialize)]
        struct Narrow {
            small: u8,
            wide: i64,
        }
        let doc = doc! { "small": 300, "wide": 1 };
        let err = from_document::<Narrow>(&doc).unwrap_err();
        assert!(matches!(err, BsonError::Conversion { .. }));
    }

    #[test]
    fn test_scalar_mismatch_records_and_continues() {
        #[derive(Debug, Deserialize)]
        struct Mixed {
            s: String,
            n: i32,
        }
        // s 的类型不匹配被记录,n 仍然被解码
        let doc = doc! { "s": 5, "n": 9 };
        let err = from_document::<Mixed>(&doc).unwrap_err();
        assert!(matches!(err, BsonError::Conversion { .. }));
    }

    #[test]
    fn test_null_leaves_zero_values() {
        #[derive(Debug, Deserialize)]
        struct Zeroed {
            n: i32,
            s: String,
            opt: Option<i32>,
        }
        let doc = doc! { "n": null, "s": null, "opt": null };
        let z: Zeroed = from_document(&doc).unwrap();
        assert_eq!(z.n, 0);
        assert_eq!(z.s, "");
        assert_eq!(z.opt, None);
    }

    #[test]
    fn test_unknown_fields_skipped() {
        #[derive(Debug, Deserialize)]
        struct OnlyX {
            x: i32,
        }
        let doc = doc! { "ignored": { "deep": [1, 2] }, "x": 3, "also": "skip" };
        let v: OnlyX = from_document(&doc).unwrap();
        assert_eq!(v.x, 3);
    }

    #[test]
    fn test_generic_decode_is_canonical() {
        let doc = doc! { "f": 1.5, "s": "str", "arr": [1], "sub": { "b": true } };
        let value: Bson = from_document(&doc).unwrap();
        assert_eq!(value, Bson::Document(doc));
    }

    #[test]
    fn test_generic_decode_preserves_domain_types() {
        let id = ObjectId::new();
        let mut doc = Document::new();
        doc.insert("id", id);
        doc.insert("dt", DateTime(42));
        doc.insert("sym", Symbol("abc".into()));
        doc.insert("lo", Bson::MinKey);
        let value: Bson = from_document(&doc).unwrap();
        assert_eq!(value, Bson::Document(doc));
    }

    #[test]
    fn test_domain_type_targets() {
        let id = ObjectId::new();
        let got: ObjectId = from_bson(&Bson::ObjectId(id)).unwrap();
        assert_eq!(got, id);
        let mm: MinMax = from_bson(&Bson::MinKey).unwrap();
        assert_eq!(mm, MinMax::Min);
        let mm: MinMax = from_bson(&Bson::MaxKey).unwrap();
        assert_eq!(mm, MinMax::Max);
        let sym: Symbol = from_bson(&Bson::from("s")).unwrap();
        assert_eq!(sym, Symbol("s".into()));
    }

    #[test]
    fn test_binary_to_byte_sequence() {
        let v: Vec<u8> = from_bson(&Bson::Binary(vec![1, 2, 3])).unwrap();
        assert_eq!(v, vec![1, 2, 3]);
    }

    #[test]
    fn test_map_target() {
        let doc = doc! { "a": 1, "b": 2 };
        let m: HashMap<String, i32> = from_document(&doc).unwrap();
        assert_eq!(m.len(), 2);
        assert_eq!(m["a"], 1);
        assert_eq!(m["b"], 2);
    }

    #[test]
    fn test_composite_mismatch_fails() {
        #[derive(Debug, Deserialize)]
        struct HasList {
            #[allow(dead_code)]
            items: HashMap<String, i32>,
        }
        let doc = doc! { "items": 5 };
        assert!(from_document::<HasList>(&doc).is_err());
    }

    #[test]
    fn test_shallow_field_wins_over_embedded() {
        #[derive(Debug, Deserialize)]
        struct Inner {
            a: Option<i32>,
            b: i32,
        }
        #[derive(Debug, Deserialize)]
        struct Outer {
            a: i32,
            #[serde(flatten)]
            inner: Inner,
        }
        let doc = doc! { "a": 5, "b": 2 };
        let v: Outer = from_document(&doc).unwrap();
        assert_eq!(v.a, 5);
        assert_eq!(v.inner.a, None);
        assert_eq!(v.inner.b, 2);
    }

    #[test]
    fn test_same_depth_duplicates_both_dropped() {
        #[derive(Debug, Serialize, Deserialize)]
        struct Left {
            x: Option<i32>,
            l: i32,
        }
        #[derive(Debug, Serialize, Deserialize)]
        struct Right {
            x: Option<i32>,
            r: i32,
        }
        #[derive(Debug, Serialize, Deserialize)]
        struct Host {
            #[serde(flatten)]
            left: Left,
            #[serde(flatten)]
            right: Right,
        }
        let host = Host {
            left: Left { x: Some(1), l: 10 },
            right: Right { x: Some(2), r: 20 },
        };
        let doc = crate::ser::to_document(&host).unwrap();
        // 同层重名的 x 在编码时被一并丢弃,解码后两侧都保持零值
        assert!(!doc.contains_key("x"));
        let back: Host = from_document(&doc).unwrap();
        assert_eq!(back.left.x, None);
        assert_eq!(back.right.x, None);
        assert_eq!(back.left.l, 10);
        assert_eq!(back.right.r, 20);
    }

    #[test]
    fn test_enum_from_string() {
        #[derive(Debug, PartialEq, Deserialize)]
        enum Mode {
            Fast,
            Slow,
        }
        let m: Mode = from_bson(&bson!("Fast")).unwrap();
        assert_eq!(m, Mode::Fast);
    }

    #[test]
    fn test_struct_with_float_and_object_id() {
        #[derive(Debug, Deserialize)]
        struct Row {
            x: f64,
            id: ObjectId,
        }
        let id = ObjectId::from_hex("4f10000000000000000000ab").unwrap();
        let mut doc = Document::new();
        doc.insert("x", 200.5);
        doc.insert("id", id);
        let bytes = crate::codec::encode_to_vec(&doc).unwrap();
        let row: Row = from_slice(&bytes).unwrap();
        assert_eq!(row.x, 200.5);
        assert_eq!(row.id, id);
    }

    #[test]
    fn test_from_slice_structural_error_wins() {
        let bytes = vec![9, 0, 0, 0, 0x10, b'x', 0, 1, 0];
        // 声明长度与内容不符
        assert!(from_slice::<Document>(&bytes).is_err());
    }
}
