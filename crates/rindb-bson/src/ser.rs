//! Serde 序列化模块
//!
//! 实现 Serde Serializer trait,将任意 Rust 数据结构转换为 Bson 值。
//! 结构体字段按声明顺序输出,`#[serde(rename)]` 与
//! `#[serde(skip_serializing_if)]` 分别承担字段改名和条件省略。
//! `#[serde(flatten)]` 的嵌入字段汇入外层命名空间;同一文档内
//! 重复出现的键只可能来自嵌入重名,双方一并丢弃。
//!
//! 数值宽度规则:
//! - i8/i16/i32/u8/u16 编码为 Int32
//! - i64 编码为 Int64
//! - u32 在 i32 范围内编码为 Int32,否则 Int64
//! - u64 超出 i64 范围直接报错,不做静默截断

use crate::document::Document;
use crate::value::{self, Bson, CodeWithScope, DateTime, Regex, Timestamp};
use crate::BsonError;
use compact_str::CompactString;
use rindb_common::{ObjectId, OBJECT_ID_NEWTYPE};
use serde::ser::{self, Serialize};

pub struct Serializer {
    output: Bson,
}

impl Serializer {
    pub fn new() -> Self {
        Self { output: Bson::Null }
    }

    pub fn into_value(self) -> Bson {
        self.output
    }
}

impl Default for Serializer {
    fn default() -> Self {
        Self::new()
    }
}

/// 将任意可序列化值转换为 Bson
///
/// # Brief
/// 驱动 serde 序列化,产出 Bson 值树
///
/// # Arguments
/// * `value` - 任意实现 Serialize 的值
///
/// # Returns
/// 成功返回 Bson, 失败返回错误
pub fn to_bson<T: Serialize>(value: &T) -> Result<Bson, BsonError> {
    let mut serializer = Serializer::new();
    value.serialize(&mut serializer)?;
    Ok(serializer.into_value())
}

/// 将任意可序列化值转换为文档
///
/// # Brief
/// 同 to_bson,但顶层必须是文档
///
/// # Arguments
/// * `value` - 任意实现 Serialize 的值
///
/// # Returns
/// 成功返回 Document, 顶层不是文档时返回错误
pub fn to_document<T: Serialize>(value: &T) -> Result<Document, BsonError> {
    match to_bson(value)? {
        Bson::Document(doc) => Ok(doc),
        other => Err(BsonError::Serialization(format!(
            "expected a document at the top level, got {}",
            other.type_name()
        ))),
    }
}

impl ser::Error for BsonError {
    fn custom<T: std::fmt::Display>(msg: T) -> Self {
        BsonError::Serialization(msg.to_string())
    }
}

impl<'a> ser::Serializer for &'a mut Serializer {
    type Ok = ();
    type Error = BsonError;
    type SerializeSeq = SeqSerializer<'a>;
    type SerializeTuple = SeqSerializer<'a>;
    type SerializeTupleStruct = SeqSerializer<'a>;
    type SerializeTupleVariant = SeqSerializer<'a>;
    type SerializeMap = MapSerializer<'a>;
    type SerializeStruct = MapSerializer<'a>;
    type SerializeStructVariant = MapSerializer<'a>;

    fn serialize_bool(self, v: bool) -> Result<Self::Ok, Self::Error> {
        self.output = Bson::Boolean(v);
        Ok(())
    }

    fn serialize_i8(self, v: i8) -> Result<Self::Ok, Self::Error> {
        self.serialize_i32(v as i32)
    }

    fn serialize_i16(self, v: i16) -> Result<Self::Ok, Self::Error> {
        self.serialize_i32(v as i32)
    }

    fn serialize_i32(self, v: i32) -> Result<Self::Ok, Self::Error> {
        self.output = Bson::Int32(v);
        Ok(())
    }

    fn serialize_i64(self, v: i64) -> Result<Self::Ok, Self::Error> {
        self.output = Bson::Int64(v);
        Ok(())
    }

    fn serialize_i128(self, v: i128) -> Result<Self::Ok, Self::Error> {
        if v >= i64::MIN as i128 && v <= i64::MAX as i128 {
            self.serialize_i64(v as i64)
        } else {
            Err(BsonError::Serialization(
                "i128 value does not fit in int64".to_string(),
            ))
        }
    }

    fn serialize_u8(self, v: u8) -> Result<Self::Ok, Self::Error> {
        self.serialize_i32(v as i32)
    }

    fn serialize_u16(self, v: u16) -> Result<Self::Ok, Self::Error> {
        self.serialize_i32(v as i32)
    }

    fn serialize_u32(self, v: u32) -> Result<Self::Ok, Self::Error> {
        if v <= i32::MAX as u32 {
            self.serialize_i32(v as i32)
        } else {
            self.serialize_i64(v as i64)
        }
    }

    fn serialize_u64(self, v: u64) -> Result<Self::Ok, Self::Error> {
        if v <= i64::MAX as u64 {
            self.serialize_i64(v as i64)
        } else {
            Err(BsonError::Serialization(
                "u64 value does not fit in int64".to_string(),
            ))
        }
    }

    fn serialize_u128(self, v: u128) -> Result<Self::Ok, Self::Error> {
        if v <= i64::MAX as u128 {
            self.serialize_i64(v as i64)
        } else {
            Err(BsonError::Serialization(
                "u128 value does not fit in int64".to_string(),
            ))
        }
    }

    fn serialize_f32(self, v: f32) -> Result<Self::Ok, Self::Error> {
        self.serialize_f64(v as f64)
    }

    fn serialize_f64(self, v: f64) -> Result<Self::Ok, Self::Error> {
        self.output = Bson::Double(v);
        Ok(())
    }

    fn serialize_char(self, v: char) -> Result<Self::Ok, Self::Error> {
        self.serialize_str(&v.to_string())
    }

    fn serialize_str(self, v: &str) -> Result<Self::Ok, Self::Error> {
        self.output = Bson::String(CompactString::from(v));
        Ok(())
    }

    fn serialize_bytes(self, v: &[u8]) -> Result<Self::Ok, Self::Error> {
        self.output = Bson::Binary(v.to_vec());
        Ok(())
    }

    fn serialize_none(self) -> Result<Self::Ok, Self::Error> {
        self.serialize_unit()
    }

    fn serialize_some<T: ?Sized + Serialize>(self, value: &T) -> Result<Self::Ok, Self::Error> {
        value.serialize(self)
    }

    fn serialize_unit(self) -> Result<Self::Ok, Self::Error> {
        self.output = Bson::Null;
        Ok(())
    }

    fn serialize_unit_struct(self, _name: &'static str) -> Result<Self::Ok, Self::Error> {
        self.serialize_unit()
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
    ) -> Result<Self::Ok, Self::Error> {
        self.serialize_str(variant)
    }

    /// newtype 结构分发
    ///
    /// 保留名称的 newtype 被改写为对应的领域类型,
    /// 其余 newtype 透明传递内部值。
    fn serialize_newtype_struct<T: ?Sized + Serialize>(
        self,
        name: &'static str,
        value: &T,
    ) -> Result<Self::Ok, Self::Error> {
        let mut inner = Serializer::new();
        value.serialize(&mut inner)?;
        let inner = inner.into_value();
        self.output = match name {
            OBJECT_ID_NEWTYPE => match inner {
                Bson::Binary(bytes) if bytes.len() == 12 => {
                    let mut arr = [0u8; 12];
                    arr.copy_from_slice(&bytes);
                    Bson::ObjectId(ObjectId::from_bytes(arr))
                }
                other => {
                    return Err(BsonError::Serialization(format!(
                        "ObjectId payload must be 12 bytes, got {}",
                        other.type_name()
                    )))
                }
            },
            value::DATE_TIME_NEWTYPE => match inner.as_i64() {
                Some(ms) => Bson::DateTime(DateTime(ms)),
                None => {
                    return Err(BsonError::Serialization(
                        "datetime payload must be an integer".to_string(),
                    ))
                }
            },
            value::TIMESTAMP_NEWTYPE => match inner.as_i64() {
                Some(n) => Bson::Timestamp(Timestamp(n)),
                None => {
                    return Err(BsonError::Serialization(
                        "timestamp payload must be an integer".to_string(),
                    ))
                }
            },
            value::SYMBOL_NEWTYPE => match inner {
                Bson::String(s) => Bson::Symbol(value::Symbol(s)),
                other => {
                    return Err(BsonError::Serialization(format!(
                        "symbol payload must be a string, got {}",
                        other.type_name()
                    )))
                }
            },
            value::CODE_NEWTYPE => match inner {
                Bson::String(s) => Bson::Code(value::Code(s)),
                other => {
                    return Err(BsonError::Serialization(format!(
                        "code payload must be a string, got {}",
                        other.type_name()
                    )))
                }
            },
            value::CODE_WITH_SCOPE_NEWTYPE => match inner {
                Bson::Array(mut items) if items.len() == 2 => {
                    let scope = items.pop().and_then(|v| match v {
                        Bson::Document(d) => Some(d),
                        _ => None,
                    });
                    let code = items.pop().and_then(|v| match v {
                        Bson::String(s) => Some(s),
                        _ => None,
                    });
                    match (code, scope) {
                        (Some(code), Some(scope)) => {
                            Bson::CodeWithScope(CodeWithScope { code, scope })
                        }
                        _ => {
                            return Err(BsonError::Serialization(
                                "invalid code-with-scope payload".to_string(),
                            ))
                        }
                    }
                }
                _ => {
                    return Err(BsonError::Serialization(
                        "invalid code-with-scope payload".to_string(),
                    ))
                }
            },
            value::REGEX_NEWTYPE => match inner {
                Bson::Array(mut items) if items.len() == 2 => {
                    let options = items.pop().and_then(|v| match v {
                        Bson::String(s) => Some(s),
                        _ => None,
                    });
                    let pattern = items.pop().and_then(|v| match v {
                        Bson::String(s) => Some(s),
                        _ => None,
                    });
                    match (pattern, options) {
                        (Some(pattern), Some(options)) => Bson::Regex(Regex { pattern, options }),
                        _ => {
                            return Err(BsonError::Serialization(
                                "invalid regex payload".to_string(),
                            ))
                        }
                    }
                }
                _ => {
                    return Err(BsonError::Serialization(
                        "invalid regex payload".to_string(),
                    ))
                }
            },
            value::BINARY_NEWTYPE => match inner {
                Bson::Binary(bytes) => Bson::Binary(bytes),
                other => {
                    return Err(BsonError::Serialization(format!(
                        "binary payload must be bytes, got {}",
                        other.type_name()
                    )))
                }
            },
            value::MIN_MAX_NEWTYPE => match inner.as_i64() {
                Some(-1) => Bson::MinKey,
                Some(1) => Bson::MaxKey,
                _ => {
                    return Err(BsonError::Serialization(
                        "min/max payload must be -1 or 1".to_string(),
                    ))
                }
            },
            _ => inner,
        };
        Ok(())
    }

    fn serialize_newtype_variant<T: ?Sized + Serialize>(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
        value: &T,
    ) -> Result<Self::Ok, Self::Error> {
        let mut inner = Serializer::new();
        value.serialize(&mut inner)?;
        let mut doc = Document::new();
        doc.insert(variant, inner.into_value());
        self.output = Bson::Document(doc);
        Ok(())
    }

    fn serialize_seq(self, len: Option<usize>) -> Result<Self::SerializeSeq, Self::Error> {
        Ok(SeqSerializer {
            serializer: self,
            elements: Vec::with_capacity(len.unwrap_or(0)),
        })
    }

    fn serialize_tuple(self, len: usize) -> Result<Self::SerializeTuple, Self::Error> {
        self.serialize_seq(Some(len))
    }

    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        len: usize,
    ) -> Result<Self::SerializeTupleStruct, Self::Error> {
        self.serialize_seq(Some(len))
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        len: usize,
    ) -> Result<Self::SerializeTupleVariant, Self::Error> {
        self.serialize_seq(Some(len))
    }

    fn serialize_map(self, len: Option<usize>) -> Result<Self::SerializeMap, Self::Error> {
        Ok(MapSerializer {
            serializer: self,
            doc: Document::new(),
            current_key: None,
            dropped: Vec::new(),
            _len: len,
        })
    }

    fn serialize_struct(
        self,
        _name: &'static str,
        len: usize,
    ) -> Result<Self::SerializeStruct, Self::Error> {
        self.serialize_map(Some(len))
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        len: usize,
    ) -> Result<Self::SerializeStructVariant, Self::Error> {
        self.serialize_map(Some(len))
    }
}

pub struct SeqSerializer<'a> {
    serializer: &'a mut Serializer,
    elements: Vec<Bson>,
}

impl<'a> ser::SerializeSeq for SeqSerializer<'a> {
    type Ok = ();
    type Error = BsonError;

    fn serialize_element<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), Self::Error> {
        let mut inner = Serializer::new();
        value.serialize(&mut inner)?;
        self.elements.push(inner.into_value());
        Ok(())
    }

    fn end(self) -> Result<Self::Ok, Self::Error> {
        self.serializer.output = Bson::Array(self.elements);
        Ok(())
    }
}

impl<'a> ser::SerializeTuple for SeqSerializer<'a> {
    type Ok = ();
    type Error = BsonError;

    fn serialize_element<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), Self::Error> {
        ser::SerializeSeq::serialize_element(self, value)
    }

    fn end(self) -> Result<Self::Ok, Self::Error> {
        ser::SerializeSeq::end(self)
    }
}

impl<'a> ser::SerializeTupleStruct for SeqSerializer<'a> {
    type Ok = ();
    type Error = BsonError;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), Self::Error> {
        ser::SerializeSeq::serialize_element(self, value)
    }

    fn end(self) -> Result<Self::Ok, Self::Error> {
        ser::SerializeSeq::end(self)
    }
}

impl<'a> ser::SerializeTupleVariant for SeqSerializer<'a> {
    type Ok = ();
    type Error = BsonError;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), Self::Error> {
        ser::SerializeSeq::serialize_element(self, value)
    }

    fn end(self) -> Result<Self::Ok, Self::Error> {
        ser::SerializeSeq::end(self)
    }
}

pub struct MapSerializer<'a> {
    serializer: &'a mut Serializer,
    doc: Document,
    current_key: Option<CompactString>,
    dropped: Vec<CompactString>,
    _len: Option<usize>,
}

impl<'a> MapSerializer<'a> {
    /// 写入一个字段
    ///
    /// 派生代码里一个结构体的字段名互不相同,重复键只会由展平
    /// 嵌入的同层重名产生:此时双方一并丢弃,该键在本文档内不再
    /// 接受任何取值。
    fn insert_field(&mut self, key: CompactString, value: Bson) {
        if self.dropped.iter().any(|dropped| *dropped == key) {
            return;
        }
        if self.doc.contains_key(key.as_str()) {
            self.doc.remove(key.as_str());
            self.dropped.push(key);
            return;
        }
        self.doc.insert(key, value);
    }
}

impl<'a> ser::SerializeMap for MapSerializer<'a> {
    type Ok = ();
    type Error = BsonError;

    fn serialize_key<T: ?Sized + Serialize>(&mut self, key: &T) -> Result<(), Self::Error> {
        let mut inner = Serializer::new();
        key.serialize(&mut inner)?;
        self.current_key = match inner.into_value() {
            Bson::String(s) => Some(s),
            other => {
                return Err(BsonError::Serialization(format!(
                    "map key must be a string, got {}",
                    other.type_name()
                )))
            }
        };
        Ok(())
    }

    fn serialize_value<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), Self::Error> {
        let key = self
            .current_key
            .take()
            .ok_or_else(|| BsonError::Serialization("no key for map value".to_string()))?;
        let mut inner = Serializer::new();
        value.serialize(&mut inner)?;
        self.insert_field(key, inner.into_value());
        Ok(())
    }

    fn end(self) -> Result<Self::Ok, Self::Error> {
        self.serializer.output = Bson::Document(self.doc);
        Ok(())
    }
}

impl<'a> ser::SerializeStruct for MapSerializer<'a> {
    type Ok = ();
    type Error = BsonError;

    fn serialize_field<T: ?Sized + Serialize>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> Result<(), Self::Error> {
        let mut inner = Serializer::new();
        value.serialize(&mut inner)?;
        self.insert_field(CompactString::from(key), inner.into_value());
        Ok(())
    }

    fn end(self) -> Result<Self::Ok, Self::Error> {
        self.serializer.output = Bson::Document(self.doc);
        Ok(())
    }
}

impl<'a> ser::SerializeStructVariant for MapSerializer<'a> {
    type Ok = ();
    type Error = BsonError;

    fn serialize_field<T: ?Sized + Serialize>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> Result<(), Self::Error> {
        ser::SerializeStruct::serialize_field(self, key, value)
    }

    fn end(self) -> Result<Self::Ok, Self::Error> {
        ser::SerializeStruct::end(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;
    use serde::Serialize;
    use std::collections::HashMap;

    #[test]
    fn test_numeric_widths() {
        assert_eq!(to_bson(&5i8).unwrap(), Bson::Int32(5));
        assert_eq!(to_bson(&5i32).unwrap(), Bson::Int32(5));
        assert_eq!(to_bson(&5i64).unwrap(), Bson::Int64(5));
        assert_eq!(to_bson(&5u16).unwrap(), Bson::Int32(5));
        assert_eq!(to_bson(&(u32::MAX)).unwrap(), Bson::Int64(u32::MAX as i64));
        assert_eq!(to_bson(&2.5f64).unwrap(), Bson::Double(2.5));
        assert!(to_bson(&u64::MAX).is_err());
    }

    #[test]
    fn test_struct_fields_in_declaration_order() {
        #[derive(Serialize)]
        struct Point {
            z: i32,
            a: i32,
        }
        let doc = to_document(&Point { z: 1, a: 2 }).unwrap();
        let keys: Vec<&str> = doc.keys().collect();
        assert_eq!(keys, vec!["z", "a"]);
    }

    #[test]
    fn test_rename_and_conditional_omit() {
        #[derive(Serialize)]
        struct Opts {
            #[serde(rename = "unique", skip_serializing_if = "std::ops::Not::not")]
            is_unique: bool,
            name: String,
        }
        let omitted = to_document(&Opts {
            is_unique: false,
            name: "n".into(),
        })
        .unwrap();
        assert!(!omitted.contains_key("unique"));
        let kept = to_document(&Opts {
            is_unique: true,
            name: "n".into(),
        })
        .unwrap();
        assert_eq!(kept.get_bool("unique"), Some(true));
    }

    #[test]
    fn test_map_requires_string_keys() {
        let mut good: HashMap<String, i32> = HashMap::new();
        good.insert("a".into(), 1);
        assert!(to_bson(&good).is_ok());

        let mut bad: HashMap<i32, i32> = HashMap::new();
        bad.insert(1, 1);
        assert!(to_bson(&bad).is_err());
    }

    #[test]
    fn test_domain_types_map_to_kinds() {
        assert_eq!(
            to_bson(&DateTime(99)).unwrap(),
            Bson::DateTime(DateTime(99))
        );
        assert_eq!(
            to_bson(&Timestamp(7)).unwrap(),
            Bson::Timestamp(Timestamp(7))
        );
        assert_eq!(
            to_bson(&value::Symbol("s".into())).unwrap(),
            Bson::Symbol(value::Symbol("s".into()))
        );
        assert_eq!(
            to_bson(&Regex::new("p", "i")).unwrap(),
            Bson::Regex(Regex::new("p", "i"))
        );
        assert_eq!(
            to_bson(&value::Binary(vec![1, 2])).unwrap(),
            Bson::Binary(vec![1, 2])
        );
        assert_eq!(to_bson(&value::MinMax::Min).unwrap(), Bson::MinKey);
        assert_eq!(to_bson(&value::MinMax::Max).unwrap(), Bson::MaxKey);
        let id = ObjectId::new();
        assert_eq!(to_bson(&id).unwrap(), Bson::ObjectId(id));
    }

    #[test]
    fn test_flatten_surfaces_embedded_fields() {
        #[derive(Serialize)]
        struct Inner {
            b: i32,
            c: i32,
        }
        #[derive(Serialize)]
        struct Outer {
            a: i32,
            #[serde(flatten)]
            inner: Inner,
        }
        let doc = to_document(&Outer {
            a: 1,
            inner: Inner { b: 2, c: 3 },
        })
        .unwrap();
        assert_eq!(doc, doc! { "a": 1, "b": 2, "c": 3 });
    }

    #[test]
    fn test_flattened_same_depth_duplicates_dropped() {
        #[derive(Serialize)]
        struct Left {
            x: i32,
            l: i32,
        }
        #[derive(Serialize)]
        struct Mid {
            x: i32,
        }
        #[derive(Serialize)]
        struct Right {
            x: i32,
            r: i32,
        }
        #[derive(Serialize)]
        struct Host {
            #[serde(flatten)]
            left: Left,
            #[serde(flatten)]
            mid: Mid,
            #[serde(flatten)]
            right: Right,
        }
        let doc = to_document(&Host {
            left: Left { x: 1, l: 10 },
            mid: Mid { x: 2 },
            right: Right { x: 3, r: 30 },
        })
        .unwrap();
        // 三方争用的 x 一并丢弃,第三个出现者也不能复活它
        assert!(!doc.contains_key("x"));
        assert_eq!(doc, doc! { "l": 10, "r": 30 });
    }

    #[test]
    fn test_option_and_unit() {
        assert_eq!(to_bson(&Option::<i32>::None).unwrap(), Bson::Null);
        assert_eq!(to_bson(&Some(3i32)).unwrap(), Bson::Int32(3));
    }
}
