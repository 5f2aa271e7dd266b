//! 游标模块
//!
//! 驱动单个服务端游标: 批次缓冲、get-more 拉取、exhaust 流式
//! 接收、尾随保持和关闭。文档按服务端批次内顺序交付,批次按
//! 发起顺序交付,核心不做任何重排。

use crate::conn::{Conn, Reply};
use crate::query::QuerySpec;
use rindb_bson::RawBson;
use rindb_common::{RinError, RinResult};
use serde::de::DeserializeOwned;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::debug;

pub struct Cursor {
    conn: Arc<dyn Conn>,
    namespace: String,
    cursor_id: i64,
    batch: VecDeque<RawBson>,
    /// 剩余限制,0 表示不限
    limit: i32,
    batch_size: i32,
    tailable: bool,
    exhaust: bool,
    closed: bool,
}

impl Cursor {
    /// 发起查询并构造游标
    pub(crate) fn issue(
        conn: Arc<dyn Conn>,
        namespace: String,
        spec: QuerySpec,
    ) -> RinResult<Cursor> {
        let reply = conn.find(&namespace, &spec)?;
        let mut cursor = Cursor {
            conn,
            namespace,
            cursor_id: 0,
            batch: VecDeque::new(),
            limit: spec.limit,
            batch_size: spec.batch_size,
            tailable: spec.tailable,
            exhaust: spec.exhaust,
            closed: false,
        };
        cursor.absorb(reply)?;
        Ok(cursor)
    }

    /// 吸收一条回复
    ///
    /// 查询失败标志置位时首个文档携带 `$err`/`code`,
    /// 游标随之失效。
    fn absorb(&mut self, reply: Reply) -> RinResult<()> {
        if reply.flags.cursor_not_found {
            self.cursor_id = 0;
            self.closed = true;
            return Err(RinError::Command("cursor not found".to_string()));
        }
        if reply.flags.query_failure {
            self.cursor_id = 0;
            self.closed = true;
            let message = reply
                .documents
                .first()
                .and_then(|raw| raw.to_document().ok())
                .and_then(|doc| doc.get_str("$err").map(|s| s.to_string()))
                .unwrap_or_else(|| "query failure".to_string());
            return Err(RinError::Command(message));
        }
        self.cursor_id = reply.cursor_id;
        self.batch.extend(reply.documents);
        if self.limit < 0 {
            // 单批次硬限制,服务端游标已随批次释放
            self.cursor_id = 0;
        }
        Ok(())
    }

    /// 下一次 get-more 请求的文档数
    fn next_batch_size(&self) -> i32 {
        if self.limit > 0 && (self.batch_size == 0 || self.batch_size > self.limit) {
            self.limit
        } else {
            self.batch_size
        }
    }

    /// 从连接取下一批
    ///
    /// 传输错误使游标锁死: 第一个观察者拿到传输错误,
    /// 之后的调用得到 CursorClosed。
    fn fetch(&mut self) -> RinResult<()> {
        let reply = if self.exhaust {
            self.conn.receive()
        } else {
            self.conn
                .get_more(&self.namespace, self.cursor_id, self.next_batch_size())
        };
        match reply {
            Ok(reply) => self.absorb(reply),
            Err(err) => {
                self.closed = true;
                self.cursor_id = 0;
                self.batch.clear();
                Err(err)
            }
        }
    }

    /// 是否还有文档可取
    ///
    /// 缓冲为空且服务端游标存活时先拉取一批。尾随游标拉到空批次
    /// 返回 false 但保持打开,之后再调用会重新拉取;只有服务端
    /// 宣告游标死亡后 false 才是终态。
    pub fn has_next(&mut self) -> RinResult<bool> {
        loop {
            if self.closed {
                return Ok(false);
            }
            if !self.batch.is_empty() {
                return Ok(true);
            }
            if self.cursor_id == 0 {
                self.closed = true;
                return Ok(false);
            }
            self.fetch()?;
            if self.batch.is_empty() {
                if self.cursor_id == 0 {
                    self.closed = true;
                    return Ok(false);
                }
                if self.tailable {
                    return Ok(false);
                }
            }
        }
    }

    /// 取出下一条原始文档
    pub fn next_raw(&mut self) -> RinResult<RawBson> {
        if self.closed && self.batch.is_empty() {
            return Err(RinError::CursorClosed);
        }
        if self.batch.is_empty() && !self.has_next()? {
            return Err(RinError::CursorClosed);
        }
        let raw = self.batch.pop_front().ok_or(RinError::CursorClosed)?;
        if self.limit > 0 {
            self.limit -= 1;
            if self.limit == 0 {
                self.close();
            }
        }
        Ok(raw)
    }

    /// 取出并解码下一条文档
    ///
    /// 解码错误只消费这一条文档,游标仍可继续推进。
    pub fn next<T: DeserializeOwned>(&mut self) -> RinResult<T> {
        let raw = self.next_raw()?;
        raw.deserialize().map_err(RinError::from)
    }

    /// 有则取出下一条,无则 None
    pub fn try_next<T: DeserializeOwned>(&mut self) -> RinResult<Option<T>> {
        if self.has_next()? {
            Ok(Some(self.next()?))
        } else {
            Ok(None)
        }
    }

    /// 关闭游标
    ///
    /// 幂等。服务端游标存活时尽力释放,传输错误忽略;
    /// exhaust 模式下改为排空剩余回复,避免连接失步。
    pub fn close(&mut self) {
        if self.closed && self.cursor_id == 0 {
            self.batch.clear();
            return;
        }
        self.closed = true;
        self.batch.clear();
        if self.exhaust {
            while self.cursor_id != 0 {
                match self.conn.receive() {
                    Ok(reply) => self.cursor_id = reply.cursor_id,
                    Err(err) => {
                        debug!("draining exhaust stream failed: {}", err);
                        self.cursor_id = 0;
                    }
                }
            }
        } else if self.cursor_id != 0 {
            if let Err(err) = self.conn.kill_cursors(&[self.cursor_id]) {
                debug!("kill cursors failed: {}", err);
            }
            self.cursor_id = 0;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn cursor_id(&self) -> i64 {
        self.cursor_id
    }

    pub fn buffered_count(&self) -> usize {
        self.batch.len()
    }
}

impl Drop for Cursor {
    fn drop(&mut self) {
        self.close();
    }
}
