//! 集合门面模块
//!
//! 在命名空间上组合写操作与写确认: 变更先走连接原语,配置了
//! 确认命令时再跑一次 get-last-error 并暴露其结果。查询通过
//! `find` 返回构建器,findAndModify 和建索引以命令形式组合。

use crate::conn::{Conn, InsertOptions, RemoveOptions, UpdateOptions};
use crate::database::{default_last_error_cmd, split_namespace, Database, LastError};
use crate::query::Query;
use rindb_bson::{to_document, Bson, Document};
use rindb_common::{RinError, RinResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

/// 集合句柄
///
/// `last_error_cmd` 为 None 时写操作不做确认。
#[derive(Clone)]
pub struct Collection {
    conn: Arc<dyn Conn>,
    namespace: String,
    last_error_cmd: Option<Document>,
}

impl Collection {
    pub(crate) fn new(
        conn: Arc<dyn Conn>,
        namespace: String,
        last_error_cmd: Option<Document>,
    ) -> Self {
        Self {
            conn,
            namespace,
            last_error_cmd,
        }
    }

    /// 集合名 (命名空间去掉库名前缀)
    pub fn name(&self) -> &str {
        split_namespace(&self.namespace).1
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// 所属数据库的句柄
    pub fn db(&self) -> Database {
        let (db_name, _) = split_namespace(&self.namespace);
        Database::new(
            self.conn.clone(),
            db_name.to_string(),
            self.last_error_cmd.clone(),
        )
    }

    /// 写操作后的确认
    ///
    /// 未配置确认命令时直接返回;写确认里的 err 字段非空会以
    /// 写错误的形式传播。
    fn acknowledge(&self, result: RinResult<()>) -> RinResult<Option<LastError>> {
        result?;
        match &self.last_error_cmd {
            None => Ok(None),
            Some(cmd) => self.db().last_error(Some(cmd)).map(Some),
        }
    }

    /// 插入单个文档
    pub fn insert<T: Serialize>(&self, document: &T) -> RinResult<()> {
        self.insert_many(std::slice::from_ref(document))
    }

    /// 插入多个文档
    pub fn insert_many<T: Serialize>(&self, documents: &[T]) -> RinResult<()> {
        let docs: Vec<Document> = documents
            .iter()
            .map(to_document)
            .collect::<Result<_, _>>()?;
        debug!("inserting {} documents into {}", docs.len(), self.namespace);
        self.acknowledge(
            self.conn
                .insert(&self.namespace, &InsertOptions::default(), &docs),
        )?;
        Ok(())
    }

    fn update_with_options<S: Serialize, U: Serialize>(
        &self,
        selector: &S,
        update: &U,
        options: UpdateOptions,
    ) -> RinResult<Option<LastError>> {
        let selector = to_document(selector)?;
        let update = to_document(update)?;
        debug!("updating {}", self.namespace);
        self.acknowledge(
            self.conn
                .update(&self.namespace, &selector, &update, &options),
        )
    }

    /// 更新第一个匹配的文档
    ///
    /// 写确认开启且没有文档被更新时返回 NotFound。
    pub fn update<S: Serialize, U: Serialize>(&self, selector: &S, update: &U) -> RinResult<()> {
        match self.update_with_options(selector, update, UpdateOptions::default())? {
            Some(le) if !le.updated_existing => Err(RinError::NotFound),
            _ => Ok(()),
        }
    }

    /// 更新所有匹配的文档
    pub fn update_all<S: Serialize, U: Serialize>(
        &self,
        selector: &S,
        update: &U,
    ) -> RinResult<()> {
        let options = UpdateOptions {
            multi: true,
            ..UpdateOptions::default()
        };
        match self.update_with_options(selector, update, options)? {
            Some(le) if !le.updated_existing => Err(RinError::NotFound),
            _ => Ok(()),
        }
    }

    /// 更新第一个匹配的文档,没有匹配时插入
    pub fn upsert<S: Serialize, U: Serialize>(&self, selector: &S, update: &U) -> RinResult<()> {
        let options = UpdateOptions {
            upsert: true,
            ..UpdateOptions::default()
        };
        self.update_with_options(selector, update, options)?;
        Ok(())
    }

    /// 删除第一个匹配的文档
    pub fn remove_first<S: Serialize>(&self, selector: &S) -> RinResult<()> {
        let options = RemoveOptions { single: true };
        self.acknowledge(
            self.conn
                .remove(&self.namespace, &to_document(selector)?, &options),
        )?;
        Ok(())
    }

    /// 删除所有匹配的文档
    pub fn remove<S: Serialize>(&self, selector: &S) -> RinResult<()> {
        self.acknowledge(self.conn.remove(
            &self.namespace,
            &to_document(selector)?,
            &RemoveOptions::default(),
        ))?;
        Ok(())
    }

    /// 以给定过滤器构建查询
    pub fn find<S: Serialize>(&self, filter: &S) -> RinResult<Query> {
        Ok(Query::new(
            self.conn.clone(),
            self.namespace.clone(),
            to_document(filter)?,
        ))
    }

    /// 无过滤器的查询
    pub fn find_all(&self) -> Query {
        Query::new(self.conn.clone(), self.namespace.clone(), Document::new())
    }

    /// 在给定键上建索引
    ///
    /// 未指定名称时按 `k1_v1_k2_v2_...` 生成。索引描述符写入
    /// `<db>.system.indexes`,写确认强制开启。
    pub fn create_index(&self, keys: &Document, options: Option<&IndexOptions>) -> RinResult<()> {
        let mut index = Document::new();
        index.insert("key", keys.clone());
        index.insert("ns", self.namespace.as_str());
        let mut opts = match options {
            Some(o) => to_document(o)?,
            None => Document::new(),
        };
        if !opts.contains_key("name") {
            opts.insert("name", index_name(keys)?);
        }
        index.merge(opts);

        let (db_name, _) = split_namespace(&self.namespace);
        let system = Collection::new(
            self.conn.clone(),
            format!("{}.system.indexes", db_name),
            Some(
                self.last_error_cmd
                    .clone()
                    .unwrap_or_else(default_last_error_cmd),
            ),
        );
        system.insert(&index)
    }

    /// 原子地更新并返回一个文档
    pub fn find_and_update<S: Serialize, U: Serialize, T: DeserializeOwned>(
        &self,
        selector: &S,
        update: &U,
        options: Option<&FindAndModifyOptions>,
    ) -> RinResult<T> {
        let mut cmd = Document::new();
        cmd.insert("findAndModify", self.name());
        cmd.insert("query", to_document(selector)?);
        cmd.insert("update", to_document(update)?);
        if let Some(options) = options {
            cmd.merge(to_document(options)?);
        }
        self.find_and_modify(&cmd)
    }

    /// 原子地删除并返回一个文档
    pub fn find_and_remove<S: Serialize, T: DeserializeOwned>(
        &self,
        selector: &S,
        options: Option<&FindAndModifyOptions>,
    ) -> RinResult<T> {
        let mut cmd = Document::new();
        cmd.insert("findAndModify", self.name());
        cmd.insert("query", to_document(selector)?);
        cmd.insert("remove", true);
        if let Some(options) = options {
            cmd.merge(to_document(options)?);
        }
        self.find_and_modify(&cmd)
    }

    /// 通过单发游标执行 findAndModify
    ///
    /// 回复的 `value` 字段以原始载体取出后再解码到调用方类型。
    fn find_and_modify<T: DeserializeOwned>(&self, cmd: &Document) -> RinResult<T> {
        let (db_name, _) = split_namespace(&self.namespace);
        let raw = crate::database::run_command(&self.conn, db_name, cmd)?;
        let response: crate::database::CommandResponse = raw.deserialize().map_err(RinError::from)?;
        response.check()?;
        match raw.element("value").map_err(RinError::from)? {
            Some(value) if value.kind() != rindb_bson::Kind::Null => {
                value.deserialize().map_err(RinError::from)
            }
            _ => Err(RinError::NotFound),
        }
    }
}

/// 按索引键生成标准索引名
///
/// 方向必须是整数或字符串,其余类型是校验错误。
pub fn index_name(keys: &Document) -> RinResult<String> {
    let mut name = String::new();
    for (i, (key, value)) in keys.iter().enumerate() {
        if i != 0 {
            name.push('_');
        }
        name.push_str(key);
        name.push('_');
        match value {
            Bson::Int32(n) => name.push_str(&n.to_string()),
            Bson::Int64(n) => name.push_str(&n.to_string()),
            Bson::String(s) => name.push_str(s),
            other => {
                return Err(RinError::Validation(format!(
                    "index direction must be an integer or string, got {}",
                    other.type_name()
                )))
            }
        }
    }
    Ok(name)
}

/// 建索引选项
///
/// 布尔选项为 false、可选项为 None 时不进入索引描述符。
#[derive(Debug, Clone, Default, Serialize)]
pub struct IndexOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// 是否要求唯一
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub unique: bool,

    /// 建唯一索引时丢弃重复文档
    #[serde(rename = "dropDups", skip_serializing_if = "std::ops::Not::not")]
    pub drop_dups: bool,

    /// 后台构建
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub background: bool,

    /// 缺少键字段的文档不入索引
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub sparse: bool,

    // 地理索引选项
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<Bson>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<Bson>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bits: Option<i32>,
}

/// findAndModify 选项
#[derive(Debug, Clone, Default, Serialize)]
pub struct FindAndModifyOptions {
    /// 返回修改后的文档而不是原文档,删除时忽略
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub new: bool,

    /// 要返回的字段子集
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<Document>,

    /// 不存在时创建,删除时忽略
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub upsert: bool,

    /// 多个文档匹配时按此排序取第一个
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort: Option<Document>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockConn;
    use rindb_bson::doc;
    use serde::Deserialize;

    fn acked() -> (Arc<MockConn>, Collection) {
        let conn = Arc::new(MockConn::new());
        let db = Database::new(
            conn.clone(),
            "testdb".to_string(),
            Some(default_last_error_cmd()),
        );
        (conn.clone(), db.collection("items"))
    }

    fn unacked() -> Collection {
        let conn = Arc::new(MockConn::new());
        Database::new(conn, "testdb".to_string(), None).collection("items")
    }

    #[test]
    fn test_namespace_and_name() {
        let (_conn, c) = acked();
        assert_eq!(c.namespace(), "testdb.items");
        assert_eq!(c.name(), "items");
        assert_eq!(c.db().name(), "testdb");
    }

    #[test]
    fn test_insert_then_find() {
        let (_conn, c) = acked();
        c.insert(&doc! { "x": 1 }).unwrap();
        c.insert_many(&[doc! { "x": 2 }, doc! { "x": 3 }]).unwrap();
        assert_eq!(c.find_all().count().unwrap(), 3);
    }

    #[test]
    fn test_update_not_found_sentinel_with_ack() {
        let (_conn, c) = acked();
        let result = c.update(&doc! { "x": 1 }, &doc! { "x": 2 });
        assert!(matches!(result, Err(RinError::NotFound)));
    }

    #[test]
    fn test_update_not_found_silent_without_ack() {
        let c = unacked();
        assert!(c.update(&doc! { "x": 1 }, &doc! { "x": 2 }).is_ok());
    }

    #[test]
    fn test_update_existing() {
        let (_conn, c) = acked();
        c.insert(&doc! { "x": 1, "v": 1 }).unwrap();
        c.update(&doc! { "x": 1 }, &doc! { "x": 1, "v": 2 }).unwrap();
        let doc: Document = c.find(&doc! { "x": 1 }).unwrap().one().unwrap();
        assert_eq!(doc.get_i32("v"), Some(2));
    }

    #[test]
    fn test_update_all_touches_every_match() {
        let (_conn, c) = acked();
        for i in 0..3 {
            c.insert(&doc! { "kind": "a", "i": i }).unwrap();
        }
        c.update_all(&doc! { "kind": "a" }, &doc! { "$set": { "kind": "b" } })
            .unwrap();
        assert_eq!(c.find(&doc! { "kind": "b" }).unwrap().count().unwrap(), 3);
    }

    #[test]
    fn test_upsert_inserts_when_missing() {
        let (_conn, c) = acked();
        c.upsert(&doc! { "x": 9 }, &doc! { "x": 9, "v": 1 }).unwrap();
        assert_eq!(c.find(&doc! { "x": 9 }).unwrap().count().unwrap(), 1);
    }

    #[test]
    fn test_remove_first_and_remove_all() {
        let (_conn, c) = acked();
        for _ in 0..3 {
            c.insert(&doc! { "t": 1 }).unwrap();
        }
        c.remove_first(&doc! { "t": 1 }).unwrap();
        assert_eq!(c.find_all().count().unwrap(), 2);
        c.remove(&doc! { "t": 1 }).unwrap();
        assert_eq!(c.find_all().count().unwrap(), 0);
    }

    #[test]
    fn test_index_name_generation() {
        assert_eq!(index_name(&doc! { "x": 1 }).unwrap(), "x_1");
        assert_eq!(
            index_name(&doc! { "x": 1, "y": (-1) }).unwrap(),
            "x_1_y_-1"
        );
        assert_eq!(
            index_name(&doc! { "loc": "2d" }).unwrap(),
            "loc_2d"
        );
        assert!(matches!(
            index_name(&doc! { "x": 1.5 }),
            Err(RinError::Validation(_))
        ));
    }

    #[test]
    fn test_create_index_writes_descriptor() {
        let (conn, c) = acked();
        c.create_index(&doc! { "x": 1 }, None).unwrap();
        let indexes = conn.stored_documents("testdb.system.indexes");
        assert_eq!(indexes.len(), 1);
        assert_eq!(indexes[0].get_str("name"), Some("x_1"));
        assert_eq!(indexes[0].get_str("ns"), Some("testdb.items"));
        assert_eq!(indexes[0].get_document("key"), Some(&doc! { "x": 1 }));
    }

    #[test]
    fn test_create_index_forces_acknowledge() {
        // 写确认关闭的集合上建索引仍然走确认
        let conn = Arc::new(MockConn::new());
        let db = Database::new(conn.clone(), "testdb".to_string(), None);
        let c = db.collection("items");
        c.create_index(&doc! { "y": (-1) }, None).unwrap();
        let indexes = conn.stored_documents("testdb.system.indexes");
        assert_eq!(indexes[0].get_str("name"), Some("y_-1"));
    }

    #[test]
    fn test_create_index_with_options() {
        let (conn, c) = acked();
        let options = IndexOptions {
            unique: true,
            ..IndexOptions::default()
        };
        c.create_index(&doc! { "x": 1 }, Some(&options)).unwrap();
        let indexes = conn.stored_documents("testdb.system.indexes");
        assert_eq!(indexes[0].get_bool("unique"), Some(true));
        assert!(!indexes[0].contains_key("sparse"));
    }

    #[test]
    fn test_find_and_update_returns_new_document() {
        #[derive(Debug, Deserialize)]
        struct Counter {
            x: i32,
            v: i32,
        }
        let (_conn, c) = acked();
        c.insert(&doc! { "x": 1, "v": 10 }).unwrap();
        let options = FindAndModifyOptions {
            new: true,
            ..FindAndModifyOptions::default()
        };
        let after: Counter = c
            .find_and_update(&doc! { "x": 1 }, &doc! { "$set": { "v": 11 } }, Some(&options))
            .unwrap();
        assert_eq!(after.x, 1);
        assert_eq!(after.v, 11);
    }

    #[test]
    fn test_find_and_update_returns_original_by_default() {
        let (_conn, c) = acked();
        c.insert(&doc! { "x": 1, "v": 10 }).unwrap();
        let before: Document = c
            .find_and_update(&doc! { "x": 1 }, &doc! { "$set": { "v": 11 } }, None)
            .unwrap();
        assert_eq!(before.get_i32("v"), Some(10));
        let now: Document = c.find(&doc! { "x": 1 }).unwrap().one().unwrap();
        assert_eq!(now.get_i32("v"), Some(11));
    }

    #[test]
    fn test_find_and_remove() {
        let (_conn, c) = acked();
        c.insert(&doc! { "x": 7 }).unwrap();
        let removed: Document = c.find_and_remove(&doc! { "x": 7 }, None).unwrap();
        assert_eq!(removed.get_i32("x"), Some(7));
        assert_eq!(c.find_all().count().unwrap(), 0);
    }

    #[test]
    fn test_find_and_modify_not_found() {
        let (_conn, c) = acked();
        let result: RinResult<Document> = c.find_and_remove(&doc! { "x": 1 }, None);
        assert!(matches!(result, Err(RinError::NotFound)));
    }
}
