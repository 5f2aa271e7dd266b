//! 结构体字段投影模块
//!
//! 从目标结构体派生查询的字段投影文档。字段表取自 serde 派生代码
//! 传给 `deserialize_struct` 的字段名切片,改名已经生效。结果按
//! 类型缓存,读多写少,读侧并发不互斥,条目一经写入不再变化。

use crate::document::Document;
use crate::value::Bson;
use crate::{BsonError, BsonResult};
use parking_lot::RwLock;
use serde::de::{self, DeserializeOwned, Visitor};
use std::any::TypeId;
use std::collections::BTreeMap;
use std::fmt;

static FIELD_CACHE: RwLock<BTreeMap<TypeId, Document>> = RwLock::new(BTreeMap::new());

/// 派生结构体的字段投影
///
/// # Brief
/// 按声明顺序把结构体的每个字段置 1;结构体没有 `_id` 字段时
/// 追加 `_id: 0`,让服务端省略主键字段。
///
/// # Returns
/// 成功返回投影文档,目标类型不是结构体时返回错误
///
/// # Example
/// ```rust,ignore
/// #[derive(Deserialize)]
/// struct User { name: String, age: i32 }
///
/// let fields = struct_fields::<User>()?;
/// // { "name": 1, "age": 1, "_id": 0 }
/// ```
pub fn struct_fields<T: DeserializeOwned + 'static>() -> BsonResult<Document> {
    let type_id = TypeId::of::<T>();
    if let Some(doc) = FIELD_CACHE.read().get(&type_id) {
        return Ok(doc.clone());
    }

    let names = field_names::<T>()?;
    let mut doc = Document::new();
    let mut has_id = false;
    for name in names {
        if *name == "_id" {
            has_id = true;
        } else {
            doc.insert(*name, Bson::Int32(1));
        }
    }
    if !has_id {
        doc.insert("_id", Bson::Int32(0));
    }

    let mut cache = FIELD_CACHE.write();
    let entry = cache.entry(type_id).or_insert(doc);
    Ok(entry.clone())
}

/// 探测目标类型的字段名切片
fn field_names<T: DeserializeOwned>() -> BsonResult<&'static [&'static str]> {
    match T::deserialize(FieldProbe) {
        Err(ProbeOutcome::Fields(fields)) => Ok(fields),
        Err(ProbeOutcome::NotStruct) | Ok(_) => Err(BsonError::Deserialization(
            "field projection requires a struct target".to_string(),
        )),
    }
}

/// 探测结果
///
/// 以错误的形式把字段表从 deserialize_struct 带出来。
#[derive(Debug)]
enum ProbeOutcome {
    Fields(&'static [&'static str]),
    NotStruct,
}

impl fmt::Display for ProbeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeOutcome::Fields(_) => f.write_str("captured field list"),
            ProbeOutcome::NotStruct => f.write_str("not a struct"),
        }
    }
}

impl std::error::Error for ProbeOutcome {}

impl de::Error for ProbeOutcome {
    fn custom<T: fmt::Display>(_msg: T) -> Self {
        ProbeOutcome::NotStruct
    }
}

struct FieldProbe;

impl<'de> de::Deserializer<'de> for FieldProbe {
    type Error = ProbeOutcome;

    fn deserialize_any<V: Visitor<'de>>(self, _visitor: V) -> Result<V::Value, Self::Error> {
        Err(ProbeOutcome::NotStruct)
    }

    fn deserialize_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        fields: &'static [&'static str],
        _visitor: V,
    ) -> Result<V::Value, Self::Error> {
        Err(ProbeOutcome::Fields(fields))
    }

    serde::forward_to_deserialize_any! {
        bool i8 i16 i32 i64 i128 u8 u16 u32 u64 u128 f32 f64 char str string
        bytes byte_buf option unit unit_struct newtype_struct seq tuple
        tuple_struct map enum identifier ignored_any
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;
    use serde::Deserialize;

    #[test]
    fn test_fields_in_declaration_order_with_id_excluded() {
        #[derive(Deserialize)]
        #[allow(dead_code)]
        struct User {
            name: String,
            age: i32,
        }
        let fields = struct_fields::<User>().unwrap();
        assert_eq!(fields, doc! { "name": 1, "age": 1, "_id": 0 });
    }

    #[test]
    fn test_present_id_not_projected_away() {
        #[derive(Deserialize)]
        #[allow(dead_code)]
        struct WithId {
            #[serde(rename = "_id")]
            id: i32,
            x: i32,
        }
        let fields = struct_fields::<WithId>().unwrap();
        assert_eq!(fields, doc! { "x": 1 });
    }

    #[test]
    fn test_rename_applies() {
        #[derive(Deserialize)]
        #[allow(dead_code)]
        struct Renamed {
            #[serde(rename = "n")]
            name: String,
        }
        let fields = struct_fields::<Renamed>().unwrap();
        assert_eq!(fields, doc! { "n": 1, "_id": 0 });
    }

    #[test]
    fn test_non_struct_rejected() {
        assert!(struct_fields::<i32>().is_err());
        assert!(struct_fields::<Vec<String>>().is_err());
    }

    #[test]
    fn test_cache_returns_same_projection() {
        #[derive(Deserialize)]
        #[allow(dead_code)]
        struct Cached {
            a: i32,
        }
        let first = struct_fields::<Cached>().unwrap();
        let second = struct_fields::<Cached>().unwrap();
        assert_eq!(first, second);
    }
}
