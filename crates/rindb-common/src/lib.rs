//! RinDB 公共基础模块
//!
//! 提供错误类型和 ObjectId 等被编解码层与驱动层共享的定义。

pub mod error;
pub mod types;

pub use error::{RinError, RinResult};
pub use types::{ObjectId, OBJECT_ID_NEWTYPE};
