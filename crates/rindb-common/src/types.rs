//! 公共类型定义模块
//!
//! 定义 RinDB 驱动的核心类型:
//! - ObjectId: 12 字节唯一标识符,时间前缀 + 进程级单调计数器

use parking_lot::Mutex;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::time::{SystemTime, UNIX_EPOCH};

/// ObjectId 的 serde newtype 标记名
///
/// 编解码层通过该保留名识别 ObjectId,保证二进制格式下无损往返。
pub const OBJECT_ID_NEWTYPE: &str = "$rindbObjectId";

/// ObjectId - 12 字节唯一标识符
///
/// 格式:
/// - 前 4 字节: 创建时刻的时间戳(秒,大端)
/// - 后 8 字节: 进程级单调递增计数器(大端),首次使用时从加密随机源取种
///
/// 同一进程内生成的 id 严格单调,同一秒内生成的 id 计数器部分必不相同。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId([u8; 12]);

static OID_COUNTER: Mutex<u64> = Mutex::new(0);

/// 取下一个计数器值
///
/// 取种与自增在同一个临界区内完成。计数器为 0 视为未初始化,
/// 从 OsRng 取 8 字节随机数作为起点,回绕是可接受的。
fn next_oid_counter() -> u64 {
    let mut counter = OID_COUNTER.lock();
    if *counter == 0 {
        *counter = OsRng.next_u64();
    }
    *counter = counter.wrapping_add(1);
    *counter
}

fn unix_seconds() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}

impl ObjectId {
    /// 生成新的 ObjectId
    ///
    /// # Brief
    /// 以当前时间和进程级计数器组合出一个全局唯一的 id
    ///
    /// # Returns
    /// 新的 ObjectId
    pub fn new() -> Self {
        Self::from_parts(unix_seconds(), next_oid_counter())
    }

    /// 由时间和计数器组合 ObjectId
    ///
    /// # Arguments
    /// * `seconds` - Unix 时间戳(秒)
    /// * `counter` - 计数器值
    ///
    /// # Returns
    /// 组合出的 ObjectId
    pub fn from_parts(seconds: u32, counter: u64) -> Self {
        let mut bytes = [0u8; 12];
        bytes[0..4].copy_from_slice(&seconds.to_be_bytes());
        bytes[4..12].copy_from_slice(&counter.to_be_bytes());
        Self(bytes)
    }

    /// 指定时刻的最小 ObjectId
    ///
    /// 计数器部分固定为全 0,用于按时间范围扫描的下界。
    pub fn min_for_time(seconds: u32) -> Self {
        Self::from_parts(seconds, 0)
    }

    /// 指定时刻的最大 ObjectId
    ///
    /// 计数器部分固定为全 1,用于按时间范围扫描的上界。
    pub fn max_for_time(seconds: u32) -> Self {
        Self::from_parts(seconds, u64::MAX)
    }

    pub fn from_bytes(bytes: [u8; 12]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 12] {
        &self.0
    }

    /// 提取创建时刻
    ///
    /// # Returns
    /// 前 4 字节按大端解释出的 Unix 秒
    pub fn creation_time(&self) -> u32 {
        u32::from_be_bytes([self.0[0], self.0[1], self.0[2], self.0[3]])
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// 从十六进制字符串解析 ObjectId
    ///
    /// # Arguments
    /// * `s` - 必须是 24 个十六进制字符
    ///
    /// # Returns
    /// 解析成功返回 ObjectId,长度或字符非法返回错误
    pub fn from_hex(s: &str) -> Result<Self, crate::error::RinError> {
        if s.len() != 24 {
            return Err(crate::error::RinError::InvalidObjectId(format!(
                "expected 24 hex chars, got {}",
                s.len()
            )));
        }
        let bytes = hex::decode(s).map_err(|e| {
            crate::error::RinError::InvalidObjectId(format!("invalid hex: {}", e))
        })?;
        let mut arr = [0u8; 12];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Serialize for ObjectId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        struct RawBytes<'a>(&'a [u8; 12]);
        impl Serialize for RawBytes<'_> {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_bytes(self.0)
            }
        }
        serializer.serialize_newtype_struct(OBJECT_ID_NEWTYPE, &RawBytes(&self.0))
    }
}

struct ObjectIdVisitor;

impl<'de> Visitor<'de> for ObjectIdVisitor {
    type Value = ObjectId;

    fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("a 12-byte object id")
    }

    fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Self::Value, E> {
        if v.len() != 12 {
            return Err(E::invalid_length(v.len(), &self));
        }
        let mut bytes = [0u8; 12];
        bytes.copy_from_slice(v);
        Ok(ObjectId(bytes))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        ObjectId::from_hex(v).map_err(E::custom)
    }

    fn visit_newtype_struct<D: Deserializer<'de>>(self, d: D) -> Result<Self::Value, D::Error> {
        d.deserialize_bytes(ObjectIdVisitor)
    }
}

impl<'de> Deserialize<'de> for ObjectId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_newtype_struct(OBJECT_ID_NEWTYPE, ObjectIdVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_ids_are_unique_and_increasing() {
        let ids: Vec<ObjectId> = (0..64).map(|_| ObjectId::new()).collect();
        for pair in ids.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn test_creation_time_prefix() {
        let id = ObjectId::from_parts(0x1122_3344, 7);
        assert_eq!(id.creation_time(), 0x1122_3344);
        assert_eq!(&id.as_bytes()[0..4], &[0x11, 0x22, 0x33, 0x44]);
    }

    #[test]
    fn test_counter_suffix_big_endian() {
        let id = ObjectId::from_parts(0, 1);
        assert_eq!(&id.as_bytes()[4..12], &[0, 0, 0, 0, 0, 0, 0, 1]);
    }

    #[test]
    fn test_min_max_for_time() {
        let lo = ObjectId::min_for_time(100);
        let hi = ObjectId::max_for_time(100);
        assert_eq!(&lo.as_bytes()[4..12], &[0u8; 8]);
        assert_eq!(&hi.as_bytes()[4..12], &[0xffu8; 8]);
        assert!(lo < hi);
    }

    #[test]
    fn test_hex_roundtrip() {
        let id = ObjectId::new();
        let restored = ObjectId::from_hex(&id.to_hex()).unwrap();
        assert_eq!(id, restored);
    }

    #[test]
    fn test_from_hex_rejects_bad_input() {
        assert!(ObjectId::from_hex("zzzzzzzzzzzzzzzzzzzzzzzz").is_err());
        assert!(ObjectId::from_hex("00112233445566778899aa").is_err());
        assert!(ObjectId::from_hex("").is_err());
        assert!(ObjectId::from_hex("00112233445566778899aabb").is_ok());
    }
}
