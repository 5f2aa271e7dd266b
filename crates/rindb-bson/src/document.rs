//! BSON 文档结构模块
//!
//! 提供有序的 Document API。字段的插入顺序被完整保留,
//! 命令、索引键和排序规格都依赖这一点。

use crate::value::Bson;
use crate::BsonResult;
use compact_str::CompactString;
use indexmap::IndexMap;
use rindb_common::ObjectId;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// 有序 BSON 文档
///
/// 使用 `IndexMap` 保持字段插入顺序。命令文档要求命令名是第一个
/// 元素,索引键和排序规格要求方向按声明顺序编码,因此文档顺序
/// 在语义上是有意义的。无序的宿主映射 (HashMap 等) 通过 serde
/// 编码时顺序任意,两种形态共用同一套编码。
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Document {
    entries: IndexMap<CompactString, Bson>,
}

impl Document {
    /// 创建空文档
    pub fn new() -> Self {
        Self {
            entries: IndexMap::new(),
        }
    }

    /// 插入字段
    ///
    /// # Brief
    /// 向文档末尾插入或原位更新一个字段
    ///
    /// # Arguments
    /// * `key` - 字段名
    /// * `value` - 字段值
    pub fn insert(&mut self, key: impl Into<CompactString>, value: impl Into<Bson>) {
        self.entries.insert(key.into(), value.into());
    }

    /// 获取字段值
    pub fn get(&self, key: &str) -> Option<&Bson> {
        self.entries.get(key)
    }

    /// 获取字段的可变引用
    pub fn get_mut(&mut self, key: &str) -> Option<&mut Bson> {
        self.entries.get_mut(key)
    }

    /// 移除字段并返回其值
    pub fn remove(&mut self, key: &str) -> Option<Bson> {
        self.entries.shift_remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(|k| k.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &Bson> {
        self.entries.values()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Bson)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.entries.get(key).and_then(|v| v.as_str())
    }

    pub fn get_i32(&self, key: &str) -> Option<i32> {
        self.entries.get(key).and_then(|v| v.as_i32())
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.entries.get(key).and_then(|v| v.as_i64())
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.entries.get(key).and_then(|v| v.as_f64())
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.entries.get(key).and_then(|v| v.as_bool())
    }

    pub fn get_array(&self, key: &str) -> Option<&Vec<Bson>> {
        self.entries.get(key).and_then(|v| v.as_array())
    }

    pub fn get_document(&self, key: &str) -> Option<&Document> {
        self.entries.get(key).and_then(|v| v.as_document())
    }

    pub fn get_object_id(&self, key: &str) -> Option<&ObjectId> {
        self.entries.get(key).and_then(|v| v.as_object_id())
    }

    /// 按点分隔路径获取嵌套值
    ///
    /// # Arguments
    /// * `path` - 点分隔的路径,如 "user.address.city"
    pub fn get_path(&self, path: &str) -> Option<&Bson> {
        let mut parts = path.split('.');
        let mut current = self.entries.get(parts.next()?)?;
        for part in parts {
            current = current.get(part)?;
        }
        Some(current)
    }

    /// 合并另一个文档的所有字段
    pub fn merge(&mut self, other: Document) {
        for (k, v) in other.entries {
            self.entries.insert(k, v);
        }
    }

    /// 从 JSON 字符串解析文档
    ///
    /// # Brief
    /// 解析 JSON 并按 `$` 前缀键约定还原领域类型
    ///
    /// # Arguments
    /// * `json` - JSON 格式的字符串
    ///
    /// # Returns
    /// 成功返回 Document,失败返回解析错误
    pub fn from_json(json: &str) -> BsonResult<Self> {
        let value: serde_json::Value = serde_json::from_str(json)
            .map_err(|e| crate::BsonError::Deserialization(e.to_string()))?;
        match Bson::from(value) {
            Bson::Document(doc) => Ok(doc),
            other => Err(crate::BsonError::InvalidDocument(format!(
                "expected a JSON object, got {}",
                other.type_name()
            ))),
        }
    }

    /// 转换为紧凑 JSON 字符串
    pub fn to_json(&self) -> String {
        let json: serde_json::Value = self.clone().into();
        serde_json::to_string(&json).unwrap_or_default()
    }

    /// 转换为带缩进的 JSON 字符串
    pub fn to_json_pretty(&self) -> String {
        let json: serde_json::Value = self.clone().into();
        serde_json::to_string_pretty(&json).unwrap_or_default()
    }
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (k, v)) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "\"{}\": {}", k, v)?;
        }
        write!(f, "}}")
    }
}

impl From<IndexMap<CompactString, Bson>> for Document {
    fn from(entries: IndexMap<CompactString, Bson>) -> Self {
        Self { entries }
    }
}

impl FromIterator<(CompactString, Bson)> for Document {
    fn from_iter<I: IntoIterator<Item = (CompactString, Bson)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for Document {
    type Item = (CompactString, Bson);
    type IntoIter = indexmap::map::IntoIter<CompactString, Bson>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl From<Document> for serde_json::Value {
    fn from(doc: Document) -> Self {
        let mut map = serde_json::Map::new();
        for (k, v) in doc.entries {
            map.insert(k.to_string(), v.into());
        }
        serde_json::Value::Object(map)
    }
}

impl Serialize for Document {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k.as_str(), v)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Document {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct DocVisitor;
        impl<'de> Visitor<'de> for DocVisitor {
            type Value = Document;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a document")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut doc = Document::new();
                while let Some((k, v)) = map.next_entry::<CompactString, Bson>()? {
                    doc.insert(k, v);
                }
                Ok(doc)
            }
        }
        deserializer.deserialize_map(DocVisitor)
    }
}

/// 构造 Document 的便捷宏
///
/// # 示例
///
/// ```rust,ignore
/// use rindb_bson::doc;
///
/// let empty = doc!();
/// let doc = doc! {
///     "name": "test",
///     "value": 123
/// };
/// ```
#[macro_export]
macro_rules! doc {
    () => {
        $crate::Document::new()
    };
    ($($key:tt : $value:tt),* $(,)?) => {
        {
            let mut doc = $crate::Document::new();
            $(
                doc.insert($key, $crate::bson!($value));
            )*
            doc
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;

    #[test]
    fn test_insert_preserves_order() {
        let mut doc = Document::new();
        doc.insert("z", 1);
        doc.insert("a", 2);
        doc.insert("m", 3);
        let keys: Vec<&str> = doc.keys().collect();
        assert_eq!(keys, vec!["z", "a", "m"]);
    }

    #[test]
    fn test_typed_getters() {
        let doc = doc! { "name": "rin", "age": 14, "score": 99.5, "ok": true };
        assert_eq!(doc.get_str("name"), Some("rin"));
        assert_eq!(doc.get_i32("age"), Some(14));
        assert_eq!(doc.get_f64("score"), Some(99.5));
        assert_eq!(doc.get_bool("ok"), Some(true));
        assert_eq!(doc.get_str("missing"), None);
    }

    #[test]
    fn test_get_path() {
        let doc = doc! { "user": { "address": { "city": "tokyo" } } };
        assert_eq!(
            doc.get_path("user.address.city"),
            Some(&Bson::from("tokyo"))
        );
        assert_eq!(doc.get_path("user.phone"), None);
    }

    #[test]
    fn test_remove_keeps_relative_order() {
        let mut doc = doc! { "a": 1, "b": 2, "c": 3 };
        doc.remove("b");
        let keys: Vec<&str> = doc.keys().collect();
        assert_eq!(keys, vec!["a", "c"]);
    }

    #[test]
    fn test_json_roundtrip() {
        let doc = doc! { "name": "test", "nested": { "x": 1 }, "list": [1, 2] };
        let restored = Document::from_json(&doc.to_json()).unwrap();
        assert_eq!(doc, restored);
    }

    #[test]
    fn test_from_json_rejects_non_object() {
        assert!(Document::from_json("[1, 2]").is_err());
        assert!(Document::from_json("not json").is_err());
    }
}
