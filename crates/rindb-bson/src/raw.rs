//! 原始载体模块
//!
//! `RawBson` 持有未解释的 (类型, 负载字节) 对,可以独立地延迟解码。
//! 回复批次以原始文档保存,逐条交付时才真正解码。

use crate::codec;
use crate::document::Document;
use crate::spec::Kind;
use crate::value::Bson;
use crate::BsonResult;
use bytes::BytesMut;
use serde::de::DeserializeOwned;

/// 未解释的 BSON 数据块
#[derive(Debug, Clone, PartialEq)]
pub struct RawBson {
    kind: Kind,
    bytes: Vec<u8>,
}

impl RawBson {
    pub fn new(kind: Kind, bytes: Vec<u8>) -> Self {
        Self { kind, bytes }
    }

    /// 包装一个完整文档的字节
    pub fn document(bytes: Vec<u8>) -> Self {
        Self {
            kind: Kind::Document,
            bytes,
        }
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// 解码为 Bson 值
    pub fn decode(&self) -> BsonResult<Bson> {
        codec::decode_value(self.kind, &self.bytes)
    }

    /// 解码为文档
    pub fn to_document(&self) -> BsonResult<Document> {
        codec::decode_document(&self.bytes)
    }

    /// 反序列化为目标类型
    ///
    /// # Brief
    /// 先完成结构解析,再按目标类型转换
    ///
    /// # Returns
    /// 成功返回目标值
    pub fn deserialize<T: DeserializeOwned>(&self) -> BsonResult<T> {
        let value = self.decode()?;
        crate::de::from_bson(&value)
    }

    /// 从 Bson 值重新编码出原始载体
    pub fn from_bson(value: &Bson) -> BsonResult<Self> {
        let mut buf = BytesMut::with_capacity(64);
        codec::encode_value(value, &mut buf)?;
        Ok(Self {
            kind: value.kind(),
            bytes: buf.to_vec(),
        })
    }

    /// 从文档编码出原始载体
    pub fn from_document(doc: &Document) -> BsonResult<Self> {
        Ok(Self::document(codec::encode_to_vec(doc)?))
    }

    /// 定位文档中的一个元素
    ///
    /// # Brief
    /// 逐元素按类型布局跳过,不解码其余内容
    ///
    /// # Arguments
    /// * `name` - 目标字段名
    ///
    /// # Returns
    /// 命中返回该元素的原始载体,不存在返回 None
    pub fn element(&self, name: &str) -> BsonResult<Option<RawBson>> {
        if self.kind != Kind::Document {
            return Ok(None);
        }
        Ok(codec::extract_element(&self.bytes, name)?
            .map(|(kind, bytes)| RawBson { kind, bytes }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;
    use serde::Deserialize;

    #[test]
    fn test_document_roundtrip_through_raw() {
        let doc = doc! { "a": 1, "b": "two" };
        let raw = RawBson::from_document(&doc).unwrap();
        assert_eq!(raw.kind(), Kind::Document);
        assert_eq!(raw.to_document().unwrap(), doc);
    }

    #[test]
    fn test_element_extraction_and_deferred_decode() {
        #[derive(Debug, PartialEq, Deserialize)]
        struct Inner {
            x: i32,
        }
        let doc = doc! { "skip": [1, 2, 3], "value": { "x": 9 } };
        let raw = RawBson::from_document(&doc).unwrap();
        let element = raw.element("value").unwrap().unwrap();
        assert_eq!(element.kind(), Kind::Document);
        let inner: Inner = element.deserialize().unwrap();
        assert_eq!(inner, Inner { x: 9 });
        assert!(raw.element("absent").unwrap().is_none());
    }

    #[test]
    fn test_from_bson_reencodes_subtree() {
        let value = crate::bson!({ "n": 5 });
        let raw = RawBson::from_bson(&value).unwrap();
        assert_eq!(raw.decode().unwrap(), value);
    }
}
