//! 连接边界模块
//!
//! 驱动核心消费的传输抽象。拨号和字节级封帧在边界之外,
//! 游标引擎自己驱动 get-more / kill-cursors / exhaust 流,
//! 因此这些原语也在 trait 上。
//!
//! 连接负责串行化请求。非 exhaust 模式下同一连接上的多个游标
//! 可以交错推进;exhaust 模式下一个游标独占回复流直到排空。

use crate::query::QuerySpec;
use rindb_bson::{Document, RawBson};
use rindb_common::RinResult;

/// 一次查询或 get-more 的服务端回复
#[derive(Debug, Clone, Default)]
pub struct Reply {
    pub flags: ReplyFlags,
    /// 服务端游标 id,0 表示结果集已经取完
    pub cursor_id: i64,
    pub starting_from: i32,
    pub documents: Vec<RawBson>,
}

/// 回复的标志位
#[derive(Debug, Clone, Copy, Default)]
pub struct ReplyFlags {
    /// 请求的游标在服务端已不存在
    pub cursor_not_found: bool,
    /// 查询失败,首个文档携带错误信息
    pub query_failure: bool,
    /// 服务端支持尾随等待
    pub await_capable: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct InsertOptions {
    pub continue_on_error: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct UpdateOptions {
    pub upsert: bool,
    pub multi: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RemoveOptions {
    pub single: bool,
}

/// 传输层连接
///
/// 所有方法从调用方视角都是阻塞的。实现负责请求的串行化;
/// 连接被带外关闭后,阻塞中的调用必须以传输错误返回。
pub trait Conn: Send + Sync {
    /// 插入文档
    fn insert(
        &self,
        namespace: &str,
        options: &InsertOptions,
        documents: &[Document],
    ) -> RinResult<()>;

    /// 按选择器更新
    fn update(
        &self,
        namespace: &str,
        selector: &Document,
        update: &Document,
        options: &UpdateOptions,
    ) -> RinResult<()>;

    /// 按选择器删除
    fn remove(
        &self,
        namespace: &str,
        selector: &Document,
        options: &RemoveOptions,
    ) -> RinResult<()>;

    /// 发起查询,返回首个批次
    fn find(&self, namespace: &str, spec: &QuerySpec) -> RinResult<Reply>;

    /// 在已有游标上取下一批
    fn get_more(&self, namespace: &str, cursor_id: i64, number_to_return: i32)
        -> RinResult<Reply>;

    /// 释放服务端游标
    fn kill_cursors(&self, cursor_ids: &[i64]) -> RinResult<()>;

    /// 读取下一条流式回复 (仅 exhaust 模式)
    fn receive(&self) -> RinResult<Reply>;

    /// 关闭连接
    fn close(&self) -> RinResult<()>;
}
