//! # rindb-bson - BSON 编解码
//!
//! RinDB 驱动的文档格式层,实现 BSON 二进制文档格式与任意 Rust
//! 数据结构之间的双向转换:
//!
//! - **字节布局**: 长度前缀 + 元素序列的文档编码,长度回填写入
//! - **有序文档**: `Document` 保持字段插入顺序,命令和索引键依赖它
//! - **Serde 集成**: 结构体经由 serde 派生直接编解码,
//!   `rename`/`skip_serializing_if`/`flatten` 承担字段标签的职责
//! - **领域类型**: ObjectId, DateTime, Timestamp, Symbol, Code,
//!   CodeWithScope, Regex, MinMax, Binary 无损往返
//!
//! ## 快速开始
//!
//! ```rust,ignore
//! use rindb_bson::{doc, encode_to_vec, decode_document};
//!
//! let d = doc! { "name": "rin", "version": 1 };
//! let bytes = encode_to_vec(&d).unwrap();
//! let back = decode_document(&bytes).unwrap();
//! assert_eq!(d, back);
//! ```

pub mod codec;
pub mod de;
pub mod document;
pub mod fields;
pub mod raw;
pub mod ser;
pub mod spec;
pub mod value;

pub use codec::{decode_document, decode_value, encode_document, encode_to_vec};
pub use de::{from_bson, from_document, from_slice};
pub use document::Document;
pub use fields::struct_fields;
pub use raw::RawBson;
pub use ser::{to_bson, to_document};
pub use spec::Kind;
pub use value::{Binary, Bson, Code, CodeWithScope, DateTime, MinMax, Regex, Symbol, Timestamp};

use rindb_common::RinError;
use thiserror::Error;

/// BSON 操作的错误类型
///
/// 结构性错误在解析中立即中止,转换错误在结构走完后返回第一个。
#[derive(Error, Debug)]
pub enum BsonError {
    /// 意外的输入结束
    #[error("unexpected end of input")]
    UnexpectedEof,

    /// 文档声明长度与实际消费字节数不符
    #[error("document length mismatch: expected end at {declared}, consumed {consumed}")]
    LengthMismatch { declared: usize, consumed: usize },

    /// 未知的类型标记字节
    #[error("unknown kind byte: 0x{0:02x}")]
    UnknownKind(u8),

    /// 已知类型无法转换到目标宿主类型
    #[error("cannot convert {kind} to {target}")]
    Conversion { kind: &'static str, target: String },

    /// 元素名非法 (含 NUL 字节)
    #[error("invalid element name: {0:?}")]
    InvalidKey(String),

    /// 字符串不是有效的 UTF-8 编码
    #[error("invalid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    /// 嵌套层级过深
    #[error("nesting too deep: max {0}")]
    NestingTooDeep(usize),

    /// 文档格式无效
    #[error("invalid document: {0}")]
    InvalidDocument(String),

    /// 序列化过程错误
    #[error("serialization error: {0}")]
    Serialization(String),

    /// 反序列化过程错误
    #[error("deserialization error: {0}")]
    Deserialization(String),
}

/// BSON 操作的 Result 类型别名
pub type BsonResult<T> = Result<T, BsonError>;

impl From<BsonError> for RinError {
    fn from(err: BsonError) -> Self {
        RinError::Bson(err.to_string())
    }
}
