//! 数据库门面模块
//!
//! 提供命令执行、写确认查询和集合句柄。命令通过 `<db>.$cmd`
//! 伪集合上的单发游标执行,第一条回复即命令结果。

use crate::collection::Collection;
use crate::conn::Conn;
use crate::cursor::Cursor;
use crate::query::QuerySpec;
use rindb_bson::{doc, from_document, to_document, Bson, Document, RawBson};
use rindb_common::{RinError, RinResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// 默认的写确认命令
pub fn default_last_error_cmd() -> Document {
    doc! { "getLastError": 1 }
}

/// 拆分命名空间
///
/// 在第一个 `.` 处拆成 (库名, 集合名);没有集合部分的 `"<db>"`
/// 也是合法的,用于管理类句柄。
pub fn split_namespace(namespace: &str) -> (&str, &str) {
    match namespace.find('.') {
        Some(i) if i > 0 => (&namespace[..i], &namespace[i + 1..]),
        _ => (namespace, ""),
    }
}

/// 命令回复的公共字段
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CommandResponse {
    pub ok: bool,
    pub errmsg: String,
}

impl CommandResponse {
    /// 检查命令是否成功
    pub fn check(&self) -> RinResult<()> {
        if self.ok {
            return Ok(());
        }
        let message = if self.errmsg.is_empty() {
            "unspecified error".to_string()
        } else {
            self.errmsg.clone()
        };
        Err(RinError::Command(message))
    }
}

/// 写确认的解析结果
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LastError {
    pub err: Option<String>,
    pub code: i32,
    pub n: i64,
    #[serde(rename = "updatedExisting")]
    pub updated_existing: bool,
    pub upserted: Option<Bson>,
}

impl LastError {
    /// err 字段非空时转为写错误
    pub fn check(&self) -> RinResult<()> {
        match &self.err {
            Some(message) if !message.is_empty() => Err(RinError::Write {
                message: message.clone(),
                code: self.code,
            }),
            _ => Ok(()),
        }
    }
}

/// 文档引用
///
/// 目标文档以集合名和 id 标识,可选地指向其他数据库。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbRef {
    #[serde(rename = "$ref")]
    pub collection: String,
    #[serde(rename = "$id")]
    pub id: Bson,
    #[serde(rename = "$db", skip_serializing_if = "Option::is_none", default)]
    pub database: Option<String>,
}

/// 数据库句柄
#[derive(Clone)]
pub struct Database {
    conn: Arc<dyn Conn>,
    name: String,
    last_error_cmd: Option<Document>,
}

impl Database {
    /// 构造数据库句柄
    ///
    /// # Arguments
    /// * `conn` - 传输层连接
    /// * `name` - 数据库名
    /// * `last_error_cmd` - 写确认命令,None 表示写操作不确认
    pub fn new(conn: Arc<dyn Conn>, name: String, last_error_cmd: Option<Document>) -> Self {
        Self {
            conn,
            name,
            last_error_cmd,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 取集合句柄
    ///
    /// 轻量操作,不检查集合是否存在。
    pub fn collection(&self, name: &str) -> Collection {
        Collection::new(
            self.conn.clone(),
            format!("{}.{}", self.name, name),
            self.last_error_cmd.clone(),
        )
    }

    /// 执行命令
    ///
    /// # Brief
    /// 解码第一条回复并检查 ok 标志,失败时携带服务端的 errmsg
    ///
    /// # Arguments
    /// * `cmd` - 命令文档,命令名必须是第一个字段
    ///
    /// # Returns
    /// 成功返回完整的回复文档
    pub fn run<C: Serialize>(&self, cmd: &C) -> RinResult<Document> {
        let cmd = to_document(cmd)?;
        debug!("running command on {}: {}", self.name, cmd);
        let raw = run_command(&self.conn, &self.name, &cmd)?;
        let reply = raw.to_document().map_err(RinError::from)?;
        let response: CommandResponse = from_document(&reply).map_err(RinError::from)?;
        response.check()?;
        Ok(reply)
    }

    /// 查询最近一次写操作的结果
    ///
    /// # Brief
    /// 运行 get-last-error (或调用方给定的命令),解析错误文档;
    /// err 字段非空时同时以写错误返回
    ///
    /// # Arguments
    /// * `cmd` - 替代命令,None 时使用默认的 getLastError
    ///
    /// # Returns
    /// 成功返回解析出的 LastError
    pub fn last_error(&self, cmd: Option<&Document>) -> RinResult<LastError> {
        let default;
        let cmd = match cmd {
            Some(cmd) => cmd,
            None => {
                default = default_last_error_cmd();
                &default
            }
        };
        let raw = run_command(&self.conn, &self.name, cmd)?;
        let reply = raw.to_document().map_err(RinError::from)?;
        let response: CommandResponse = from_document(&reply).map_err(RinError::from)?;
        response.check()?;
        let last_error: LastError = from_document(&reply).map_err(RinError::from)?;
        last_error.check()?;
        Ok(last_error)
    }

    /// 取回引用指向的文档
    pub fn dereference<T: DeserializeOwned>(
        &self,
        dbref: &DbRef,
        slave_ok: bool,
    ) -> RinResult<T> {
        let mut db = self.clone();
        if let Some(database) = &dbref.database {
            db.name = database.clone();
        }
        let mut filter = Document::new();
        filter.insert("_id", dbref.id.clone());
        db.collection(&dbref.collection)
            .find(&filter)?
            .slave_ok(slave_ok)
            .one()
    }
}

/// 通过单发游标执行命令,返回第一条回复的原始载体
pub(crate) fn run_command(
    conn: &Arc<dyn Conn>,
    db_name: &str,
    cmd: &Document,
) -> RinResult<RawBson> {
    let spec = QuerySpec {
        filter: cmd.clone(),
        limit: -1,
        ..QuerySpec::default()
    };
    let mut cursor = Cursor::issue(conn.clone(), format!("{}.$cmd", db_name), spec)?;
    let raw = cursor.next_raw()?;
    cursor.close();
    Ok(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockConn;
    use rindb_common::ObjectId;

    fn database() -> Database {
        Database::new(
            Arc::new(MockConn::new()),
            "testdb".to_string(),
            Some(default_last_error_cmd()),
        )
    }

    #[test]
    fn test_split_namespace() {
        assert_eq!(split_namespace("db.col"), ("db", "col"));
        assert_eq!(split_namespace("db.col.sub"), ("db", "col.sub"));
        assert_eq!(split_namespace("admin"), ("admin", ""));
        assert_eq!(split_namespace(".odd"), (".odd", ""));
    }

    #[test]
    fn test_run_unknown_command_fails() {
        let db = database();
        let result = db.run(&doc! { "nosuchcmd": 1 });
        assert!(matches!(result, Err(RinError::Command(_))));
    }

    #[test]
    fn test_run_count_command() {
        let db = database();
        let c = db.collection("things");
        c.insert(&doc! { "x": 1 }).unwrap();
        let reply = db
            .run(&doc! { "count": "things", "query": {} })
            .unwrap();
        assert_eq!(reply.get_f64("n"), Some(1.0));
    }

    #[test]
    fn test_last_error_after_write() {
        let db = database();
        let c = db.collection("things");
        c.insert(&doc! { "x": 1 }).unwrap();
        c.update(&doc! { "x": 1 }, &doc! { "x": 2 }).unwrap();
        let le = db.last_error(None).unwrap();
        assert!(le.updated_existing);
        assert!(le.err.is_none());
    }

    #[test]
    fn test_last_error_reports_upsert() {
        let db = database();
        let c = db.collection("things");
        c.upsert(&doc! { "x": 1 }, &doc! { "x": 1, "v": 1 }).unwrap();
        let le = db.last_error(None).unwrap();
        assert_eq!(le.n, 1);
        assert!(le.upserted.is_some());
        assert!(!le.updated_existing);
    }

    #[test]
    fn test_command_response_check() {
        let ok = CommandResponse {
            ok: true,
            errmsg: String::new(),
        };
        assert!(ok.check().is_ok());
        let failed = CommandResponse {
            ok: false,
            errmsg: String::new(),
        };
        match failed.check() {
            Err(RinError::Command(message)) => assert_eq!(message, "unspecified error"),
            other => panic!("unexpected: {:?}", other.err()),
        }
    }

    #[test]
    fn test_last_error_check() {
        let clean = LastError::default();
        assert!(clean.check().is_ok());
        let failed = LastError {
            err: Some("duplicate key".to_string()),
            code: 11000,
            ..LastError::default()
        };
        assert!(matches!(
            failed.check(),
            Err(RinError::Write { code: 11000, .. })
        ));
    }

    #[test]
    fn test_dereference() {
        let db = database();
        let c = db.collection("users");
        let id = ObjectId::new();
        c.insert(&doc! { "_id": (id), "name": "rin" }).unwrap();
        let dbref = DbRef {
            collection: "users".to_string(),
            id: Bson::ObjectId(id),
            database: None,
        };
        let doc: Document = db.dereference(&dbref, false).unwrap();
        assert_eq!(doc.get_str("name"), Some("rin"));
    }

    #[test]
    fn test_dbref_serde_roundtrip() {
        let dbref = DbRef {
            collection: "users".to_string(),
            id: Bson::Int32(5),
            database: Some("other".to_string()),
        };
        let doc = to_document(&dbref).unwrap();
        assert_eq!(doc.get_str("$ref"), Some("users"));
        assert_eq!(doc.get_i32("$id"), Some(5));
        let back: DbRef = from_document(&doc).unwrap();
        assert_eq!(back.collection, "users");
        assert_eq!(back.database.as_deref(), Some("other"));
    }
}
