//! BSON 编解码模块
//!
//! 提供文档与线上字节布局之间的序列化和反序列化。
//! 文档布局: 4 字节小端总长度(含自身与结尾 0 字节),
//! 随后是元素序列(类型字节 + C 字符串字段名 + 负载),以 0 结尾。

use crate::document::Document;
use crate::spec::{Kind, BINARY_SUBTYPE_GENERIC, MAX_NESTING_DEPTH};
use crate::value::{Bson, CodeWithScope, DateTime, Regex, Timestamp};
use crate::{BsonError, BsonResult};
use bytes::{BufMut, BytesMut};
use compact_str::CompactString;
use rindb_common::ObjectId;

/// 编码文档到缓冲区
///
/// # Brief
/// 将文档序列化为二进制布局写入缓冲区末尾
///
/// # Arguments
/// * `doc` - 要编码的文档
/// * `buf` - 目标缓冲区
///
/// # Returns
/// 成功返回 Ok(()), 失败返回错误
pub fn encode_document(doc: &Document, buf: &mut BytesMut) -> BsonResult<()> {
    Encoder::new(buf).write_document(doc)
}

/// 编码文档到 Vec<u8>
///
/// # Brief
/// 将文档序列化为二进制字节向量
///
/// # Arguments
/// * `doc` - 要编码的文档
///
/// # Returns
/// 成功返回字节向量, 失败返回错误
pub fn encode_to_vec(doc: &Document) -> BsonResult<Vec<u8>> {
    let mut buf = BytesMut::with_capacity(128);
    encode_document(doc, &mut buf)?;
    Ok(buf.to_vec())
}

/// 解码二进制数据为文档
///
/// # Brief
/// 按声明长度解析一个完整文档,长度与实际消费字节数不符是致命错误
///
/// # Arguments
/// * `data` - 要解码的字节切片
///
/// # Returns
/// 成功返回 Document, 失败返回错误
pub fn decode_document(data: &[u8]) -> BsonResult<Document> {
    Decoder::new(data).read_document()
}

/// 按类型解码单个值
///
/// # Arguments
/// * `kind` - 值的类型标记
/// * `data` - 值的负载字节
///
/// # Returns
/// 成功返回 Bson 值
pub fn decode_value(kind: Kind, data: &[u8]) -> BsonResult<Bson> {
    Decoder::new(data).read_value(kind)
}

/// 编码单个值的负载
///
/// 供原始载体重新编码子树使用,不含类型字节和字段名。
pub(crate) fn encode_value(value: &Bson, buf: &mut BytesMut) -> BsonResult<()> {
    Encoder::new(buf).write_value(value)
}

/// 在未解析的文档字节中定位一个元素
///
/// 逐个元素跳过,直到命中目标字段名,返回其 (类型, 负载字节)。
/// 不构造中间值,负载按类型的字节布局原样切出。
pub(crate) fn extract_element(data: &[u8], name: &str) -> BsonResult<Option<(Kind, Vec<u8>)>> {
    let mut d = Decoder::new(data);
    let end = d.begin_doc()?;
    loop {
        let kind_byte = d.read_u8()?;
        if kind_byte == 0 {
            break;
        }
        let kind = Kind::from_u8(kind_byte).ok_or(BsonError::UnknownKind(kind_byte))?;
        let element_name = d.read_cstring()?;
        let start = d.pos;
        d.skip_value(kind)?;
        if element_name == name {
            return Ok(Some((kind, data[start..d.pos].to_vec())));
        }
    }
    d.end_doc(end)?;
    Ok(None)
}

/// BSON 编码器
///
/// 内部结构,文档长度采用先占位后回填的方式写入。
struct Encoder<'a> {
    buf: &'a mut BytesMut,
    depth: usize,
}

impl<'a> Encoder<'a> {
    fn new(buf: &'a mut BytesMut) -> Self {
        Self { buf, depth: 0 }
    }

    fn write_document(&mut self, doc: &Document) -> BsonResult<()> {
        if self.depth > MAX_NESTING_DEPTH {
            return Err(BsonError::NestingTooDeep(MAX_NESTING_DEPTH));
        }
        let start = self.buf.len();
        self.buf.put_i32_le(0);
        self.depth += 1;
        for (name, value) in doc.iter() {
            self.write_element(name, value)?;
        }
        self.depth -= 1;
        self.buf.put_u8(0);
        self.patch_length(start);
        Ok(())
    }

    fn write_array(&mut self, items: &[Bson]) -> BsonResult<()> {
        if self.depth > MAX_NESTING_DEPTH {
            return Err(BsonError::NestingTooDeep(MAX_NESTING_DEPTH));
        }
        let start = self.buf.len();
        self.buf.put_i32_le(0);
        self.depth += 1;
        for (i, value) in items.iter().enumerate() {
            self.write_element(&i.to_string(), value)?;
        }
        self.depth -= 1;
        self.buf.put_u8(0);
        self.patch_length(start);
        Ok(())
    }

    /// 回填长度前缀
    ///
    /// 总长度包含长度字段自身和结尾的 0 字节。
    fn patch_length(&mut self, start: usize) {
        let total = (self.buf.len() - start) as i32;
        self.buf[start..start + 4].copy_from_slice(&total.to_le_bytes());
    }

    fn write_element(&mut self, name: &str, value: &Bson) -> BsonResult<()> {
        self.buf.put_u8(value.kind() as u8);
        self.write_cstring(name)?;
        self.write_value(value)
    }

    /// 写入 C 字符串
    ///
    /// 字段名和正则负载不允许包含 NUL 字节。
    fn write_cstring(&mut self, s: &str) -> BsonResult<()> {
        if s.as_bytes().contains(&0) {
            return Err(BsonError::InvalidKey(s.to_string()));
        }
        self.buf.put_slice(s.as_bytes());
        self.buf.put_u8(0);
        Ok(())
    }

    /// 写入长度前缀字符串
    ///
    /// 长度计入结尾的 NUL 字节。
    fn write_string(&mut self, s: &str) {
        self.buf.put_i32_le(s.len() as i32 + 1);
        self.buf.put_slice(s.as_bytes());
        self.buf.put_u8(0);
    }

    fn write_value(&mut self, value: &Bson) -> BsonResult<()> {
        match value {
            Bson::Double(n) => self.buf.put_f64_le(*n),
            Bson::String(s) => self.write_string(s),
            Bson::Document(doc) => self.write_document(doc)?,
            Bson::Array(arr) => self.write_array(arr)?,
            Bson::Binary(b) => {
                self.buf.put_i32_le(b.len() as i32);
                self.buf.put_u8(BINARY_SUBTYPE_GENERIC);
                self.buf.put_slice(b);
            }
            Bson::ObjectId(id) => self.buf.put_slice(id.as_bytes()),
            Bson::Boolean(b) => self.buf.put_u8(*b as u8),
            Bson::DateTime(dt) => self.buf.put_i64_le(dt.0),
            Bson::Null | Bson::MinKey | Bson::MaxKey => {}
            Bson::Regex(r) => {
                self.write_cstring(&r.pattern)?;
                self.write_cstring(&r.options)?;
            }
            Bson::Code(c) => self.write_string(&c.0),
            Bson::Symbol(s) => self.write_string(&s.0),
            Bson::CodeWithScope(c) => {
                let start = self.buf.len();
                self.buf.put_i32_le(0);
                self.write_string(&c.code);
                self.write_document(&c.scope)?;
                self.patch_length(start);
            }
            Bson::Int32(n) => self.buf.put_i32_le(*n),
            Bson::Timestamp(t) => self.buf.put_i64_le(t.0),
            Bson::Int64(n) => self.buf.put_i64_le(*n),
        }
        Ok(())
    }
}

/// BSON 解码器
///
/// 单次前向扫描,结构性错误立即中止。
struct Decoder<'a> {
    data: &'a [u8],
    pos: usize,
    depth: usize,
}

impl<'a> Decoder<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            depth: 0,
        }
    }

    /// 读取文档长度前缀,返回文档应当结束的偏移
    fn begin_doc(&mut self) -> BsonResult<usize> {
        let start = self.pos;
        let declared = self.read_i32()?;
        if declared < 5 {
            return Err(BsonError::InvalidDocument(format!(
                "declared length {} too small",
                declared
            )));
        }
        let end = start + declared as usize;
        if end > self.data.len() {
            return Err(BsonError::UnexpectedEof);
        }
        Ok(end)
    }

    /// 校验文档消费的字节数与声明长度一致
    fn end_doc(&mut self, end: usize) -> BsonResult<()> {
        if self.pos != end {
            return Err(BsonError::LengthMismatch {
                declared: end,
                consumed: self.pos,
            });
        }
        Ok(())
    }

    fn read_document(&mut self) -> BsonResult<Document> {
        if self.depth > MAX_NESTING_DEPTH {
            return Err(BsonError::NestingTooDeep(MAX_NESTING_DEPTH));
        }
        let end = self.begin_doc()?;
        let mut doc = Document::new();
        self.depth += 1;
        loop {
            let kind_byte = self.read_u8()?;
            if kind_byte == 0 {
                break;
            }
            let kind = Kind::from_u8(kind_byte).ok_or(BsonError::UnknownKind(kind_byte))?;
            let name = self.read_cstring()?;
            let value = self.read_value(kind)?;
            doc.insert(CompactString::from(name), value);
        }
        self.depth -= 1;
        self.end_doc(end)?;
        Ok(doc)
    }

    fn read_array(&mut self) -> BsonResult<Vec<Bson>> {
        if self.depth > MAX_NESTING_DEPTH {
            return Err(BsonError::NestingTooDeep(MAX_NESTING_DEPTH));
        }
        let end = self.begin_doc()?;
        let mut items = Vec::new();
        self.depth += 1;
        loop {
            let kind_byte = self.read_u8()?;
            if kind_byte == 0 {
                break;
            }
            let kind = Kind::from_u8(kind_byte).ok_or(BsonError::UnknownKind(kind_byte))?;
            self.read_cstring()?;
            items.push(self.read_value(kind)?);
        }
        self.depth -= 1;
        self.end_doc(end)?;
        Ok(items)
    }

    fn read_value(&mut self, kind: Kind) -> BsonResult<Bson> {
        Ok(match kind {
            Kind::Double => Bson::Double(f64::from_le_bytes(self.read_array_8()?)),
            Kind::String => Bson::String(CompactString::from(self.read_string()?)),
            Kind::Document => Bson::Document(self.read_document()?),
            Kind::Array => Bson::Array(self.read_array()?),
            Kind::Binary => {
                let len = self.read_i32()?;
                if len < 0 {
                    return Err(BsonError::InvalidDocument(
                        "negative binary length".to_string(),
                    ));
                }
                let _subtype = self.read_u8()?;
                Bson::Binary(self.read_slice(len as usize)?.to_vec())
            }
            Kind::ObjectId => {
                let mut bytes = [0u8; 12];
                bytes.copy_from_slice(self.read_slice(12)?);
                Bson::ObjectId(ObjectId::from_bytes(bytes))
            }
            Kind::Boolean => Bson::Boolean(self.read_u8()? != 0),
            Kind::DateTime => Bson::DateTime(DateTime(i64::from_le_bytes(self.read_array_8()?))),
            Kind::Null => Bson::Null,
            Kind::Regex => {
                let pattern = CompactString::from(self.read_cstring()?);
                let options = CompactString::from(self.read_cstring()?);
                Bson::Regex(Regex { pattern, options })
            }
            Kind::Code => Bson::Code(crate::value::Code(CompactString::from(self.read_string()?))),
            Kind::Symbol => {
                Bson::Symbol(crate::value::Symbol(CompactString::from(self.read_string()?)))
            }
            Kind::CodeWithScope => {
                let start = self.pos;
                let total = self.read_i32()?;
                let code = CompactString::from(self.read_string()?);
                let scope = self.read_document()?;
                if self.pos != start + total as usize {
                    return Err(BsonError::LengthMismatch {
                        declared: start + total as usize,
                        consumed: self.pos,
                    });
                }
                Bson::CodeWithScope(CodeWithScope { code, scope })
            }
            Kind::Int32 => Bson::Int32(i32::from_le_bytes(self.read_array_4()?)),
            Kind::Timestamp => Bson::Timestamp(Timestamp(i64::from_le_bytes(self.read_array_8()?))),
            Kind::Int64 => Bson::Int64(i64::from_le_bytes(self.read_array_8()?)),
            Kind::MinKey => Bson::MinKey,
            Kind::MaxKey => Bson::MaxKey,
        })
    }

    /// 跳过一个值
    ///
    /// 按类型的字节布局推进,不构造任何中间值。
    fn skip_value(&mut self, kind: Kind) -> BsonResult<()> {
        match kind {
            Kind::Double | Kind::DateTime | Kind::Timestamp | Kind::Int64 => {
                self.advance(8)?;
            }
            Kind::Int32 => {
                self.advance(4)?;
            }
            Kind::String | Kind::Symbol | Kind::Code => {
                let n = self.read_i32()?;
                if n < 1 {
                    return Err(BsonError::InvalidDocument(
                        "invalid string length".to_string(),
                    ));
                }
                self.advance(n as usize)?;
            }
            Kind::Document | Kind::Array | Kind::CodeWithScope => {
                // 最小合法文档是 5 字节 (长度前缀 + 结尾 0),下限与 begin_doc 一致
                let n = self.read_i32()?;
                if n < 5 {
                    return Err(BsonError::InvalidDocument(
                        "invalid nested length".to_string(),
                    ));
                }
                self.advance(n as usize - 4)?;
            }
            Kind::Binary => {
                let n = self.read_i32()?;
                if n < 0 {
                    return Err(BsonError::InvalidDocument(
                        "negative binary length".to_string(),
                    ));
                }
                self.advance(n as usize + 1)?;
            }
            Kind::ObjectId => {
                self.advance(12)?;
            }
            Kind::Boolean => {
                self.advance(1)?;
            }
            Kind::Regex => {
                self.read_cstring()?;
                self.read_cstring()?;
            }
            Kind::Null | Kind::MinKey | Kind::MaxKey => {}
        }
        Ok(())
    }

    fn advance(&mut self, n: usize) -> BsonResult<()> {
        if self.pos + n > self.data.len() {
            return Err(BsonError::UnexpectedEof);
        }
        self.pos += n;
        Ok(())
    }

    fn read_u8(&mut self) -> BsonResult<u8> {
        if self.pos >= self.data.len() {
            return Err(BsonError::UnexpectedEof);
        }
        let b = self.data[self.pos];
        self.pos += 1;
        Ok(b)
    }

    fn read_slice(&mut self, n: usize) -> BsonResult<&'a [u8]> {
        if self.pos + n > self.data.len() {
            return Err(BsonError::UnexpectedEof);
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_array_4(&mut self) -> BsonResult<[u8; 4]> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(self.read_slice(4)?);
        Ok(buf)
    }

    fn read_array_8(&mut self) -> BsonResult<[u8; 8]> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.read_slice(8)?);
        Ok(buf)
    }

    fn read_i32(&mut self) -> BsonResult<i32> {
        Ok(i32::from_le_bytes(self.read_array_4()?))
    }

    /// 读取长度前缀字符串
    ///
    /// 长度计入结尾字节,结尾字节必须是 NUL。
    fn read_string(&mut self) -> BsonResult<&'a str> {
        let n = self.read_i32()?;
        if n < 1 {
            return Err(BsonError::InvalidDocument(
                "invalid string length".to_string(),
            ));
        }
        let bytes = self.read_slice(n as usize)?;
        if bytes[bytes.len() - 1] != 0 {
            return Err(BsonError::InvalidDocument(
                "string not NUL terminated".to_string(),
            ));
        }
        Ok(std::str::from_utf8(&bytes[..bytes.len() - 1])?)
    }

    /// 读取 NUL 结尾的 C 字符串
    fn read_cstring(&mut self) -> BsonResult<&'a str> {
        let rest = &self.data[self.pos..];
        let nul = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or(BsonError::UnexpectedEof)?;
        let s = std::str::from_utf8(&rest[..nul])?;
        self.pos += nul + 1;
        Ok(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{bson, doc};

    fn roundtrip(doc: &Document) -> Document {
        let bytes = encode_to_vec(doc).unwrap();
        decode_document(&bytes).unwrap()
    }

    #[test]
    fn test_empty_document() {
        let doc = doc! {};
        let bytes = encode_to_vec(&doc).unwrap();
        assert_eq!(bytes, vec![5, 0, 0, 0, 0]);
        assert_eq!(roundtrip(&doc), doc);
    }

    #[test]
    fn test_scalar_roundtrip() {
        let doc = doc! {
            "double": 3.25,
            "string": "hello",
            "bool": true,
            "int32": 42,
            "int64": (1i64 << 40),
            "null": null,
        };
        assert_eq!(roundtrip(&doc), doc);
    }

    #[test]
    fn test_nested_roundtrip() {
        let doc = doc! {
            "nested": { "a": 1, "b": { "c": [1, 2, 3] } },
            "list": ["x", "y"],
        };
        assert_eq!(roundtrip(&doc), doc);
    }

    #[test]
    fn test_domain_types_roundtrip() {
        let mut doc = Document::new();
        doc.insert("id", ObjectId::from_parts(5, 77));
        doc.insert("when", DateTime(1234567890123));
        doc.insert("ts", Timestamp(42));
        doc.insert("re", Regex::new("^ab", "im"));
        doc.insert("sym", crate::value::Symbol("s".into()));
        doc.insert("code", crate::value::Code("f()".into()));
        doc.insert(
            "cws",
            Bson::CodeWithScope(CodeWithScope {
                code: "g()".into(),
                scope: doc! { "x": 1 },
            }),
        );
        doc.insert("bin", Bson::Binary(vec![0, 1, 2, 255]));
        doc.insert("lo", Bson::MinKey);
        doc.insert("hi", Bson::MaxKey);
        assert_eq!(roundtrip(&doc), doc);
    }

    #[test]
    fn test_declared_length_matches_bytes_written() {
        let doc = doc! { "a": [1, { "b": "c" }], "d": 2.5 };
        let bytes = encode_to_vec(&doc).unwrap();
        let declared = i32::from_le_bytes(bytes[0..4].try_into().unwrap());
        assert_eq!(declared as usize, bytes.len());
    }

    #[test]
    fn test_array_element_names() {
        let doc = doc! { "a": [10, 20] };
        let bytes = encode_to_vec(&doc).unwrap();
        // 数组是以 "0","1" 为键的文档
        let inner = extract_element(&bytes, "a").unwrap().unwrap();
        assert_eq!(inner.0, Kind::Array);
        let as_doc = decode_document(&inner.1).unwrap();
        assert_eq!(as_doc.get_i32("0"), Some(10));
        assert_eq!(as_doc.get_i32("1"), Some(20));
    }

    #[test]
    fn test_truncated_input_fails() {
        let doc = doc! { "x": "value" };
        let bytes = encode_to_vec(&doc).unwrap();
        for cut in 1..bytes.len() {
            assert!(decode_document(&bytes[..cut]).is_err());
        }
    }

    #[test]
    fn test_length_mismatch_fails() {
        let doc = doc! { "x": 1 };
        let mut bytes = encode_to_vec(&doc).unwrap();
        let bad = (bytes.len() as i32) - 1;
        bytes[0..4].copy_from_slice(&bad.to_le_bytes());
        assert!(matches!(
            decode_document(&bytes),
            Err(BsonError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn test_unknown_kind_fails() {
        let doc = doc! { "x": 1 };
        let mut bytes = encode_to_vec(&doc).unwrap();
        bytes[4] = 0x06;
        assert!(matches!(
            decode_document(&bytes),
            Err(BsonError::UnknownKind(0x06))
        ));
    }

    #[test]
    fn test_key_with_nul_rejected() {
        let mut doc = Document::new();
        doc.insert("bad\0key", 1);
        assert!(matches!(
            encode_to_vec(&doc),
            Err(BsonError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_extract_element_skips_preceding_values() {
        let doc = doc! {
            "a": 1.5,
            "b": "text",
            "c": { "inner": true },
            "target": 99,
        };
        let bytes = encode_to_vec(&doc).unwrap();
        let (kind, payload) = extract_element(&bytes, "target").unwrap().unwrap();
        assert_eq!(kind, Kind::Int32);
        assert_eq!(decode_value(kind, &payload).unwrap(), bson!(99));
        assert!(extract_element(&bytes, "missing").unwrap().is_none());
    }

    #[test]
    fn test_skip_rejects_undersized_nested_length() {
        let doc = doc! { "a": {}, "target": 1 };
        let mut bytes = encode_to_vec(&doc).unwrap();
        // 嵌套空文档的长度前缀紧跟在 "a" 的名字之后
        assert_eq!(bytes[7], 5);
        bytes[7] = 4;
        assert!(matches!(
            extract_element(&bytes, "target"),
            Err(BsonError::InvalidDocument(_))
        ));
    }

    #[test]
    fn test_deep_nesting_rejected() {
        let mut value = Bson::Int32(1);
        for _ in 0..(MAX_NESTING_DEPTH + 2) {
            let mut doc = Document::new();
            doc.insert("n", value);
            value = Bson::Document(doc);
        }
        let top = match value {
            Bson::Document(d) => d,
            _ => unreachable!(),
        };
        assert!(matches!(
            encode_to_vec(&top),
            Err(BsonError::NestingTooDeep(_))
        ));
    }
}
