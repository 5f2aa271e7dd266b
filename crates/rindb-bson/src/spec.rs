//! BSON 规范定义模块
//!
//! 定义线上格式的类型标记字节和解析限制常量。
//! 标记值是格式固定的,不可调整。

/// 最大嵌套深度 (防止栈溢出)
pub const MAX_NESTING_DEPTH: usize = 100;

/// 二进制元素的通用子类型
pub const BINARY_SUBTYPE_GENERIC: u8 = 0x00;

/// BSON 类型标记
///
/// 每个元素以一个类型字节开头,值的字节布局由类型决定。
/// 0x06 (undefined) 与 0x0C (DBPointer) 是历史遗留类型,
/// 本实现不支持,解码时按未知类型报错。
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// IEEE-754 双精度浮点数
    Double = 0x01,
    /// UTF-8 字符串 (带长度前缀,NUL 结尾)
    String = 0x02,
    /// 嵌套文档
    Document = 0x03,
    /// 数组 (键为 "0","1",... 的文档)
    Array = 0x04,
    /// 二进制数据 (长度 + 子类型 + 字节)
    Binary = 0x05,
    /// ObjectId (12 字节)
    ObjectId = 0x07,
    /// 布尔值 (1 字节)
    Boolean = 0x08,
    /// 日期时间 (毫秒,int64)
    DateTime = 0x09,
    /// 空值 (无负载)
    Null = 0x0A,
    /// 正则表达式 (两个 C 字符串)
    Regex = 0x0B,
    /// JavaScript 代码
    Code = 0x0D,
    /// 符号
    Symbol = 0x0E,
    /// 带作用域的 JavaScript 代码
    CodeWithScope = 0x0F,
    /// 32 位有符号整数
    Int32 = 0x10,
    /// 内部时间戳 (int64,不透明)
    Timestamp = 0x11,
    /// 64 位有符号整数
    Int64 = 0x12,
    /// 最大值哨兵
    MaxKey = 0x7F,
    /// 最小值哨兵
    MinKey = 0xFF,
}

impl Kind {
    /// # Brief
    /// 从字节值转换为 Kind
    ///
    /// # Arguments
    /// * `byte` - 类型标记字节
    ///
    /// # Returns
    /// Some(Kind) 如果是有效标记, 否则 None
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Self::Double),
            0x02 => Some(Self::String),
            0x03 => Some(Self::Document),
            0x04 => Some(Self::Array),
            0x05 => Some(Self::Binary),
            0x07 => Some(Self::ObjectId),
            0x08 => Some(Self::Boolean),
            0x09 => Some(Self::DateTime),
            0x0A => Some(Self::Null),
            0x0B => Some(Self::Regex),
            0x0D => Some(Self::Code),
            0x0E => Some(Self::Symbol),
            0x0F => Some(Self::CodeWithScope),
            0x10 => Some(Self::Int32),
            0x11 => Some(Self::Timestamp),
            0x12 => Some(Self::Int64),
            0x7F => Some(Self::MaxKey),
            0xFF => Some(Self::MinKey),
            _ => None,
        }
    }

    /// # Brief
    /// 返回类型的名称,用于错误信息
    ///
    /// # Returns
    /// 类型名称的静态字符串
    pub fn name(&self) -> &'static str {
        match self {
            Self::Double => "double",
            Self::String => "string",
            Self::Document => "document",
            Self::Array => "array",
            Self::Binary => "binary",
            Self::ObjectId => "objectId",
            Self::Boolean => "bool",
            Self::DateTime => "dateTime",
            Self::Null => "null",
            Self::Regex => "regex",
            Self::Code => "code",
            Self::Symbol => "symbol",
            Self::CodeWithScope => "codeWithScope",
            Self::Int32 => "int32",
            Self::Timestamp => "timestamp",
            Self::Int64 => "int64",
            Self::MaxKey => "maxValue",
            Self::MinKey => "minValue",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_roundtrip() {
        for byte in 0..=0xFFu8 {
            if let Some(kind) = Kind::from_u8(byte) {
                assert_eq!(kind as u8, byte);
            }
        }
    }

    #[test]
    fn test_legacy_kinds_rejected() {
        assert!(Kind::from_u8(0x06).is_none());
        assert!(Kind::from_u8(0x0C).is_none());
        assert!(Kind::from_u8(0x00).is_none());
    }
}
