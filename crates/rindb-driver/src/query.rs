//! 查询构建模块
//!
//! 流式地描述一次查询: 过滤器、投影、排序、索引提示、范围、
//! 跳过与限制、批次大小和标志位。构建器可以克隆复用,
//! `cursor()` 消费当前规格发起查询。

use crate::conn::Conn;
use crate::cursor::Cursor;
use crate::database::{split_namespace, Database};
use rindb_bson::Document;
use rindb_common::{RinError, RinResult};
use serde::de::DeserializeOwned;
use std::sync::Arc;

/// 一次查询的完整规格
///
/// `limit` 与 `batch_size` 的符号按线协议约定原样传给连接,
/// 负的批次大小表示只取单个批次并随即释放服务端游标。
#[derive(Debug, Clone, Default)]
pub struct QuerySpec {
    pub filter: Document,
    pub fields: Option<Document>,
    pub sort: Option<Document>,
    pub hint: Option<Document>,
    pub min: Option<Document>,
    pub max: Option<Document>,
    pub skip: i32,
    pub limit: i32,
    pub batch_size: i32,
    pub slave_ok: bool,
    pub tailable: bool,
    pub exhaust: bool,
    pub partial: bool,
}

impl QuerySpec {
    /// 首个批次向服务端请求的文档数
    ///
    /// limit 为正且批次未设置或大于 limit 时,直接请求 limit 条。
    pub fn initial_batch(&self) -> i32 {
        if self.limit > 0 && (self.batch_size == 0 || self.batch_size > self.limit) {
            self.limit
        } else {
            self.batch_size
        }
    }
}

/// 查询构建器
#[derive(Clone)]
pub struct Query {
    conn: Arc<dyn Conn>,
    namespace: String,
    spec: QuerySpec,
}

impl Query {
    pub(crate) fn new(conn: Arc<dyn Conn>, namespace: String, filter: Document) -> Self {
        Self {
            conn,
            namespace,
            spec: QuerySpec {
                filter,
                ..QuerySpec::default()
            },
        }
    }

    /// 要返回的字段子集
    pub fn fields(mut self, fields: Document) -> Self {
        self.spec.fields = Some(fields);
        self
    }

    /// 排序规格,方向按文档顺序编码
    pub fn sort(mut self, sort: Document) -> Self {
        self.spec.sort = Some(sort);
        self
    }

    /// 索引提示
    pub fn hint(mut self, hint: Document) -> Self {
        self.spec.hint = Some(hint);
        self
    }

    /// 索引扫描下界
    pub fn min(mut self, min: Document) -> Self {
        self.spec.min = Some(min);
        self
    }

    /// 索引扫描上界
    pub fn max(mut self, max: Document) -> Self {
        self.spec.max = Some(max);
        self
    }

    /// 返回前丢弃的文档数
    pub fn skip(mut self, skip: i32) -> Self {
        self.spec.skip = skip;
        self
    }

    /// 最多返回的文档数,符号按线协议传递
    pub fn limit(mut self, limit: i32) -> Self {
        self.spec.limit = limit;
        self
    }

    /// 服务端批次大小提示,负值表示单批次后关闭游标
    pub fn batch_size(mut self, batch_size: i32) -> Self {
        self.spec.batch_size = batch_size;
        self
    }

    /// 允许从副本读取
    pub fn slave_ok(mut self, slave_ok: bool) -> Self {
        self.spec.slave_ok = slave_ok;
        self
    }

    /// 尾随一个定容集合
    pub fn tailable(mut self, tailable: bool) -> Self {
        self.spec.tailable = tailable;
        self
    }

    /// 服务端主动流式推送所有批次
    pub fn exhaust(mut self, exhaust: bool) -> Self {
        self.spec.exhaust = exhaust;
        self
    }

    /// 容忍分片缺失
    pub fn partial(mut self, partial: bool) -> Self {
        self.spec.partial = partial;
        self
    }

    pub fn spec(&self) -> &QuerySpec {
        &self.spec
    }

    /// 发起查询,返回流式游标
    pub fn cursor(&self) -> RinResult<Cursor> {
        Cursor::issue(self.conn.clone(), self.namespace.clone(), self.spec.clone())
    }

    /// 取第一条匹配的文档
    ///
    /// 以单批次硬限制发起,没有匹配时返回 NotFound。
    pub fn one<T: DeserializeOwned>(&self) -> RinResult<T> {
        let mut spec = self.spec.clone();
        spec.limit = -1;
        spec.batch_size = 0;
        spec.exhaust = false;
        spec.tailable = false;
        let mut cursor = Cursor::issue(self.conn.clone(), self.namespace.clone(), spec)?;
        let result = if cursor.has_next()? {
            cursor.next()
        } else {
            Err(RinError::NotFound)
        };
        cursor.close();
        result
    }

    /// 对过滤器执行 count 命令
    pub fn count(&self) -> RinResult<i64> {
        let (db_name, collection) = split_namespace(&self.namespace);
        let mut cmd = Document::new();
        cmd.insert("count", collection);
        cmd.insert("query", self.spec.filter.clone());
        if self.spec.limit != 0 {
            cmd.insert("limit", self.spec.limit);
        }
        if self.spec.skip != 0 {
            cmd.insert("skip", self.spec.skip);
        }
        let db = Database::new(self.conn.clone(), db_name.to_string(), None);
        let reply = db.run(&cmd)?;
        reply
            .get("n")
            .and_then(|v| v.as_f64())
            .map(|n| n as i64)
            .ok_or_else(|| RinError::Command("count reply missing n".to_string()))
    }
}
