//! # rindb-driver - RinDB 客户端驱动核心
//!
//! 文档数据库客户端的查询与游标引擎,架在 `Conn` 传输抽象之上:
//!
//! - **查询构建器**: 过滤、投影、排序、限制、批次与标志位
//! - **游标引擎**: 批次缓冲、get-more、exhaust 流式接收、尾随保持
//! - **门面层**: 集合与数据库句柄,写确认、findAndModify、索引创建
//! - **内存传输**: `mock::MockConn`,不依赖网络即可驱动完整流程
//!
//! 拨号和字节级封帧在 `Conn` trait 背后,本 crate 不包含网络代码。
//!
//! ## 快速开始
//!
//! ```rust,ignore
//! use rindb_driver::{mock::MockConn, Database, default_last_error_cmd};
//! use rindb_bson::doc;
//! use std::sync::Arc;
//!
//! let conn = Arc::new(MockConn::new());
//! let db = Database::new(conn, "app".to_string(), Some(default_last_error_cmd()));
//! let users = db.collection("users");
//! users.insert(&doc! { "name": "rin" })?;
//!
//! let mut cursor = users.find_all().sort(doc! { "name": 1 }).cursor()?;
//! while cursor.has_next()? {
//!     let user: rindb_bson::Document = cursor.next()?;
//!     println!("{}", user);
//! }
//! ```

pub mod collection;
pub mod conn;
pub mod cursor;
pub mod database;
pub mod mock;
pub mod query;

pub use rindb_bson as bson;
pub use rindb_common as common;

pub use collection::{index_name, Collection, FindAndModifyOptions, IndexOptions};
pub use conn::{Conn, InsertOptions, RemoveOptions, Reply, ReplyFlags, UpdateOptions};
pub use cursor::Cursor;
pub use database::{
    default_last_error_cmd, split_namespace, CommandResponse, Database, DbRef, LastError,
};
pub use query::{Query, QuerySpec};

pub use rindb_bson::{Bson, Document};
pub use rindb_common::{ObjectId, RinError, RinResult};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// 初始化日志
///
/// 过滤级别取自环境变量,未设置时默认 info。
pub fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .init();
}
