//! 内存传输模块
//!
//! 实现 `Conn` 的内存版本,模拟驱动可观察的服务端行为:
//! 顶层相等过滤、排序、skip/limit/投影、服务端游标与 get-more
//! 批次、负批次的单批语义、exhaust 流、定容集合与尾随游标,
//! 以及门面层用到的命令子集。高层测试都跑在它上面。

use crate::conn::{Conn, InsertOptions, RemoveOptions, Reply, ReplyFlags, UpdateOptions};
use crate::database::split_namespace;
use crate::query::QuerySpec;
use parking_lot::Mutex;
use rindb_bson::{doc, encode_to_vec, Bson, Document, RawBson};
use rindb_common::{ObjectId, RinError, RinResult};
use std::cmp::Ordering;
use std::collections::{HashMap, VecDeque};

pub struct MockConn {
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    collections: HashMap<String, StoredCollection>,
    cursors: HashMap<i64, ServerCursor>,
    next_cursor_id: i64,
    last_write: LastWrite,
    exhaust: VecDeque<Reply>,
    exhaust_active: bool,
    closed: bool,
}

#[derive(Default)]
struct StoredCollection {
    documents: Vec<Document>,
    capped_size: Option<i64>,
}

struct ServerCursor {
    pending: VecDeque<Document>,
    tail: Option<TailState>,
}

/// 尾随游标在集合里的续读位置
struct TailState {
    namespace: String,
    filter: Document,
    position: usize,
}

#[derive(Default, Clone)]
struct LastWrite {
    err: Option<String>,
    n: i64,
    updated_existing: bool,
    upserted: Option<Bson>,
}

impl MockConn {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
        }
    }

    /// 直接检视一个命名空间里存储的文档
    pub fn stored_documents(&self, namespace: &str) -> Vec<Document> {
        self.state
            .lock()
            .collections
            .get(namespace)
            .map(|c| c.documents.clone())
            .unwrap_or_default()
    }
}

impl Default for MockConn {
    fn default() -> Self {
        Self::new()
    }
}

fn guard(state: &State) -> RinResult<()> {
    if state.closed {
        return Err(RinError::Transport("connection closed".to_string()));
    }
    Ok(())
}

fn matches(filter: &Document, doc: &Document) -> bool {
    filter.iter().all(|(key, value)| doc.get(key) == Some(value))
}

fn type_rank(value: &Bson) -> u8 {
    match value {
        Bson::MinKey => 0,
        Bson::Null => 1,
        Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) => 2,
        Bson::String(_) | Bson::Symbol(_) => 3,
        Bson::Document(_) => 4,
        Bson::Array(_) => 5,
        Bson::Binary(_) => 6,
        Bson::ObjectId(_) => 7,
        Bson::Boolean(_) => 8,
        Bson::DateTime(_) => 9,
        Bson::Timestamp(_) => 10,
        Bson::Regex(_) => 11,
        Bson::Code(_) | Bson::CodeWithScope(_) => 12,
        Bson::MaxKey => 13,
    }
}

fn compare_values(a: &Bson, b: &Bson) -> Ordering {
    let ra = type_rank(a);
    let rb = type_rank(b);
    if ra != rb {
        return ra.cmp(&rb);
    }
    match (a, b) {
        (Bson::String(x), Bson::String(y)) => x.cmp(y),
        (Bson::Boolean(x), Bson::Boolean(y)) => x.cmp(y),
        (Bson::ObjectId(x), Bson::ObjectId(y)) => x.as_bytes().cmp(y.as_bytes()),
        (Bson::DateTime(x), Bson::DateTime(y)) => x.cmp(y),
        (Bson::Timestamp(x), Bson::Timestamp(y)) => x.cmp(y),
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
            _ => Ordering::Equal,
        },
    }
}

fn compare_docs(a: &Document, b: &Document, sort: &Document) -> Ordering {
    for (key, direction) in sort.iter() {
        let av = a.get(key).unwrap_or(&Bson::Null);
        let bv = b.get(key).unwrap_or(&Bson::Null);
        let mut ord = compare_values(av, bv);
        if direction.as_i64().unwrap_or(1) < 0 {
            ord = ord.reverse();
        }
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

fn project(doc: &Document, fields: Option<&Document>) -> Document {
    let fields = match fields {
        Some(fields) if !fields.is_empty() => fields,
        _ => return doc.clone(),
    };
    let inclusive = fields
        .iter()
        .any(|(key, value)| key != "_id" && value.as_i64().unwrap_or(0) != 0);
    let mut out = Document::new();
    if inclusive {
        if fields.get("_id").and_then(|v| v.as_i64()) != Some(0) {
            if let Some(id) = doc.get("_id") {
                out.insert("_id", id.clone());
            }
        }
        for (key, value) in fields.iter() {
            if key == "_id" || value.as_i64().unwrap_or(0) == 0 {
                continue;
            }
            if let Some(found) = doc.get(key) {
                out.insert(key, found.clone());
            }
        }
    } else {
        for (key, value) in doc.iter() {
            if fields.contains_key(key) {
                continue;
            }
            out.insert(key, value.clone());
        }
    }
    out
}

fn raw_documents(docs: Vec<Document>) -> RinResult<Vec<RawBson>> {
    docs.iter()
        .map(|d| RawBson::from_document(d).map_err(RinError::from))
        .collect()
}

fn reply_with(documents: Vec<Document>, cursor_id: i64) -> RinResult<Reply> {
    Ok(Reply {
        flags: ReplyFlags::default(),
        cursor_id,
        starting_from: 0,
        documents: raw_documents(documents)?,
    })
}

fn take_batch(queue: &mut VecDeque<Document>, n: i32) -> Vec<Document> {
    let count = if n == 0 {
        queue.len()
    } else {
        (n.unsigned_abs() as usize).min(queue.len())
    };
    queue.drain(..count).collect()
}

fn has_operators(update: &Document) -> bool {
    update.keys().any(|k| k.starts_with('$'))
}

fn apply_update(doc: &mut Document, update: &Document) {
    if has_operators(update) {
        if let Some(set) = update.get_document("$set") {
            for (key, value) in set.iter() {
                doc.insert(key, value.clone());
            }
        }
        if let Some(inc) = update.get_document("$inc") {
            for (key, value) in inc.iter() {
                let current = doc.get_i64(key).unwrap_or(0);
                let delta = value.as_i64().unwrap_or(0);
                doc.insert(key, current + delta);
            }
        }
        if let Some(unset) = update.get_document("$unset") {
            for (key, _) in unset.iter() {
                doc.remove(key);
            }
        }
    } else {
        let id = doc.get("_id").cloned();
        let mut replacement = update.clone();
        if let Some(id) = id {
            if !replacement.contains_key("_id") {
                replacement.insert("_id", id);
            }
        }
        *doc = replacement;
    }
}

fn enforce_capped(collection: &mut StoredCollection) {
    let Some(size) = collection.capped_size else {
        return;
    };
    let byte_size = |docs: &[Document]| -> i64 {
        docs.iter()
            .map(|d| encode_to_vec(d).map(|b| b.len() as i64).unwrap_or(0))
            .sum()
    };
    while collection.documents.len() > 1 && byte_size(&collection.documents) > size {
        collection.documents.remove(0);
    }
}

fn next_cursor_id(state: &mut State) -> i64 {
    state.next_cursor_id += 1;
    state.next_cursor_id
}

impl Conn for MockConn {
    fn insert(
        &self,
        namespace: &str,
        _options: &InsertOptions,
        documents: &[Document],
    ) -> RinResult<()> {
        let mut state = self.state.lock();
        guard(&state)?;
        let collection = state.collections.entry(namespace.to_string()).or_default();
        for doc in documents {
            collection.documents.push(doc.clone());
        }
        enforce_capped(collection);
        state.last_write = LastWrite::default();
        Ok(())
    }

    fn update(
        &self,
        namespace: &str,
        selector: &Document,
        update: &Document,
        options: &UpdateOptions,
    ) -> RinResult<()> {
        let mut state = self.state.lock();
        guard(&state)?;
        let mut matched = 0i64;
        if let Some(collection) = state.collections.get_mut(namespace) {
            for doc in collection.documents.iter_mut() {
                if matches(selector, doc) {
                    apply_update(doc, update);
                    matched += 1;
                    if !options.multi {
                        break;
                    }
                }
            }
        }
        let mut upserted = None;
        if matched == 0 && options.upsert {
            let mut doc = if has_operators(update) {
                let mut base = selector.clone();
                apply_update(&mut base, update);
                base
            } else {
                update.clone()
            };
            if !doc.contains_key("_id") {
                doc.insert("_id", ObjectId::new());
            }
            upserted = doc.get("_id").cloned();
            state
                .collections
                .entry(namespace.to_string())
                .or_default()
                .documents
                .push(doc);
        }
        state.last_write = LastWrite {
            err: None,
            // upsert 落盘也算一次写入
            n: if upserted.is_some() { 1 } else { matched },
            updated_existing: matched > 0,
            upserted,
        };
        Ok(())
    }

    fn remove(
        &self,
        namespace: &str,
        selector: &Document,
        options: &RemoveOptions,
    ) -> RinResult<()> {
        let mut state = self.state.lock();
        guard(&state)?;
        let mut removed = 0i64;
        if let Some(collection) = state.collections.get_mut(namespace) {
            let mut kept = Vec::with_capacity(collection.documents.len());
            for doc in collection.documents.drain(..) {
                let hit = matches(selector, &doc) && (!options.single || removed == 0);
                if hit {
                    removed += 1;
                } else {
                    kept.push(doc);
                }
            }
            collection.documents = kept;
        }
        state.last_write = LastWrite {
            err: None,
            n: removed,
            updated_existing: false,
            upserted: None,
        };
        Ok(())
    }

    fn find(&self, namespace: &str, spec: &QuerySpec) -> RinResult<Reply> {
        let mut state = self.state.lock();
        guard(&state)?;
        let (db_name, collection_name) = split_namespace(namespace);
        if collection_name == "$cmd" {
            let reply = run_cmd(&mut state, db_name, &spec.filter);
            return reply_with(vec![reply], 0);
        }

        let mut matched: Vec<Document> = state
            .collections
            .get(namespace)
            .map(|c| {
                c.documents
                    .iter()
                    .filter(|d| matches(&spec.filter, d))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        let matched_total = matched.len();
        if let Some(sort) = &spec.sort {
            matched.sort_by(|a, b| compare_docs(a, b, sort));
        }
        if spec.skip > 0 {
            matched.drain(..(spec.skip as usize).min(matched.len()));
        }
        if spec.limit > 0 {
            matched.truncate(spec.limit as usize);
        } else if spec.limit < 0 {
            matched.truncate(spec.limit.unsigned_abs() as usize);
        }
        let matched: Vec<Document> = matched
            .iter()
            .map(|d| project(d, spec.fields.as_ref()))
            .collect();

        let n = spec.initial_batch();

        if spec.exhaust {
            if state.exhaust_active {
                return Err(RinError::Transport(
                    "exhaust cursor already active on this connection".to_string(),
                ));
            }
            let batch_len = if n > 0 { n as usize } else { matched.len().max(1) };
            let id = next_cursor_id(&mut state);
            let chunks: Vec<Vec<Document>> = if matched.is_empty() {
                vec![Vec::new()]
            } else {
                matched.chunks(batch_len).map(<[Document]>::to_vec).collect()
            };
            let total = chunks.len();
            let mut replies = VecDeque::with_capacity(total);
            for (i, chunk) in chunks.into_iter().enumerate() {
                let last = i + 1 == total;
                replies.push_back(reply_with(chunk, if last { 0 } else { id })?);
            }
            let first = replies.pop_front().unwrap_or_default();
            if !replies.is_empty() {
                state.exhaust_active = true;
                state.exhaust = replies;
            }
            return Ok(first);
        }

        if spec.tailable {
            let id = next_cursor_id(&mut state);
            state.cursors.insert(
                id,
                ServerCursor {
                    pending: VecDeque::new(),
                    tail: Some(TailState {
                        namespace: namespace.to_string(),
                        filter: spec.filter.clone(),
                        position: matched_total,
                    }),
                },
            );
            return reply_with(matched, id);
        }

        let mut queue: VecDeque<Document> = matched.into();
        let first = take_batch(&mut queue, n);
        if n < 0 {
            queue.clear();
        }
        let cursor_id = if queue.is_empty() {
            0
        } else {
            let id = next_cursor_id(&mut state);
            state.cursors.insert(
                id,
                ServerCursor {
                    pending: queue,
                    tail: None,
                },
            );
            id
        };
        reply_with(first, cursor_id)
    }

    fn get_more(
        &self,
        _namespace: &str,
        cursor_id: i64,
        number_to_return: i32,
    ) -> RinResult<Reply> {
        let mut state = self.state.lock();
        guard(&state)?;

        let tail = match state.cursors.get(&cursor_id) {
            None => {
                return Ok(Reply {
                    flags: ReplyFlags {
                        cursor_not_found: true,
                        ..ReplyFlags::default()
                    },
                    cursor_id: 0,
                    starting_from: 0,
                    documents: Vec::new(),
                })
            }
            Some(cursor) => cursor
                .tail
                .as_ref()
                .map(|t| (t.namespace.clone(), t.filter.clone(), t.position)),
        };

        if let Some((namespace, filter, position)) = tail {
            let matching: Vec<Document> = state
                .collections
                .get(&namespace)
                .map(|c| {
                    c.documents
                        .iter()
                        .filter(|d| matches(&filter, d))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default();
            let mut fresh: Vec<Document> = matching.into_iter().skip(position).collect();
            if number_to_return > 0 {
                fresh.truncate(number_to_return as usize);
            }
            let served = fresh.len();
            if let Some(cursor) = state.cursors.get_mut(&cursor_id) {
                if let Some(tail) = cursor.tail.as_mut() {
                    tail.position += served;
                }
            }
            return reply_with(fresh, cursor_id);
        }

        let (batch, done) = match state.cursors.get_mut(&cursor_id) {
            Some(cursor) => {
                let batch = take_batch(&mut cursor.pending, number_to_return);
                (batch, cursor.pending.is_empty())
            }
            None => (Vec::new(), true),
        };
        if done {
            state.cursors.remove(&cursor_id);
        }
        reply_with(batch, if done { 0 } else { cursor_id })
    }

    fn kill_cursors(&self, cursor_ids: &[i64]) -> RinResult<()> {
        let mut state = self.state.lock();
        guard(&state)?;
        for id in cursor_ids {
            state.cursors.remove(id);
        }
        Ok(())
    }

    fn receive(&self) -> RinResult<Reply> {
        let mut state = self.state.lock();
        guard(&state)?;
        match state.exhaust.pop_front() {
            Some(reply) => {
                if reply.cursor_id == 0 {
                    state.exhaust_active = false;
                }
                Ok(reply)
            }
            None => {
                state.exhaust_active = false;
                Err(RinError::Transport(
                    "no streamed reply pending".to_string(),
                ))
            }
        }
    }

    fn close(&self) -> RinResult<()> {
        self.state.lock().closed = true;
        Ok(())
    }
}

/// 执行 `$cmd` 伪集合上的命令
fn run_cmd(state: &mut State, db_name: &str, cmd: &Document) -> Document {
    let Some((name, value)) = cmd.iter().next() else {
        return doc! { "ok": 0.0, "errmsg": "empty command" };
    };
    match name {
        "getLastError" => {
            let w = state.last_write.clone();
            let mut reply = doc! {
                "ok": 1.0,
                "err": null,
                "code": 0,
                "n": (w.n),
                "updatedExisting": (w.updated_existing),
            };
            if let Some(err) = w.err {
                reply.insert("err", err);
            }
            if let Some(upserted) = w.upserted {
                reply.insert("upserted", upserted);
            }
            reply
        }
        "count" => {
            let namespace = format!("{}.{}", db_name, value.as_str().unwrap_or_default());
            let filter = cmd.get_document("query").cloned().unwrap_or_default();
            let mut count = state
                .collections
                .get(&namespace)
                .map(|c| c.documents.iter().filter(|d| matches(&filter, d)).count())
                .unwrap_or(0) as i64;
            if let Some(skip) = cmd.get_i64("skip") {
                count = (count - skip.max(0)).max(0);
            }
            if let Some(limit) = cmd.get_i64("limit") {
                if limit > 0 {
                    count = count.min(limit);
                }
            }
            doc! { "ok": 1.0, "n": (count as f64) }
        }
        "findAndModify" => find_and_modify_cmd(state, db_name, cmd),
        "create" => {
            let namespace = format!("{}.{}", db_name, value.as_str().unwrap_or_default());
            let capped = cmd.get_bool("capped").unwrap_or(false);
            let size = cmd.get("size").and_then(|v| v.as_f64()).map(|f| f as i64);
            let entry = state.collections.entry(namespace).or_default();
            if capped {
                entry.capped_size = size;
            }
            doc! { "ok": 1.0 }
        }
        "drop" => {
            let namespace = format!("{}.{}", db_name, value.as_str().unwrap_or_default());
            if state.collections.remove(&namespace).is_some() {
                doc! { "ok": 1.0 }
            } else {
                doc! { "ok": 0.0, "errmsg": "ns not found" }
            }
        }
        other => doc! { "ok": 0.0, "errmsg": (format!("no such cmd: {}", other)) },
    }
}

fn find_and_modify_cmd(state: &mut State, db_name: &str, cmd: &Document) -> Document {
    let collection_name = cmd
        .iter()
        .next()
        .and_then(|(_, v)| v.as_str())
        .unwrap_or_default();
    let namespace = format!("{}.{}", db_name, collection_name);
    let filter = cmd.get_document("query").cloned().unwrap_or_default();
    let sort = cmd.get_document("sort").cloned();
    let remove = cmd.get_bool("remove").unwrap_or(false);
    let return_new = cmd.get_bool("new").unwrap_or(false);

    let Some(collection) = state.collections.get_mut(&namespace) else {
        return doc! { "ok": 1.0, "value": null };
    };
    let mut candidates: Vec<usize> = collection
        .documents
        .iter()
        .enumerate()
        .filter(|(_, d)| matches(&filter, d))
        .map(|(i, _)| i)
        .collect();
    if let Some(sort) = &sort {
        candidates
            .sort_by(|&a, &b| compare_docs(&collection.documents[a], &collection.documents[b], sort));
    }
    let Some(&target) = candidates.first() else {
        return doc! { "ok": 1.0, "value": null };
    };

    if remove {
        let old = collection.documents.remove(target);
        state.last_write = LastWrite {
            err: None,
            n: 1,
            updated_existing: false,
            upserted: None,
        };
        doc! { "ok": 1.0, "value": (Bson::Document(old)) }
    } else {
        let update = cmd.get_document("update").cloned().unwrap_or_default();
        let old = collection.documents[target].clone();
        apply_update(&mut collection.documents[target], &update);
        let value = if return_new {
            collection.documents[target].clone()
        } else {
            old
        };
        state.last_write = LastWrite {
            err: None,
            n: 1,
            updated_existing: true,
            upserted: None,
        };
        doc! { "ok": 1.0, "value": (Bson::Document(value)) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec_with(filter: Document) -> QuerySpec {
        QuerySpec {
            filter,
            ..QuerySpec::default()
        }
    }

    #[test]
    fn test_find_filters_by_equality() {
        let conn = MockConn::new();
        conn.insert(
            "db.c",
            &InsertOptions::default(),
            &[doc! { "x": 1 }, doc! { "x": 2 }, doc! { "x": 1 }],
        )
        .unwrap();
        let reply = conn.find("db.c", &spec_with(doc! { "x": 1 })).unwrap();
        assert_eq!(reply.documents.len(), 2);
        assert_eq!(reply.cursor_id, 0);
    }

    #[test]
    fn test_find_sorts_and_batches() {
        let conn = MockConn::new();
        for i in [3, 1, 2, 0] {
            conn.insert("db.c", &InsertOptions::default(), &[doc! { "x": i }])
                .unwrap();
        }
        let mut spec = spec_with(doc! {});
        spec.sort = Some(doc! { "x": 1 });
        spec.batch_size = 3;
        let reply = conn.find("db.c", &spec).unwrap();
        assert_eq!(reply.documents.len(), 3);
        assert_ne!(reply.cursor_id, 0);
        let first = reply.documents[0].to_document().unwrap();
        assert_eq!(first.get_i32("x"), Some(0));
        let more = conn.get_more("db.c", reply.cursor_id, 3).unwrap();
        assert_eq!(more.documents.len(), 1);
        assert_eq!(more.cursor_id, 0);
    }

    #[test]
    fn test_projection() {
        let conn = MockConn::new();
        conn.insert(
            "db.c",
            &InsertOptions::default(),
            &[doc! { "_id": 1, "a": 2, "b": 3 }],
        )
        .unwrap();
        let mut spec = spec_with(doc! {});
        spec.fields = Some(doc! { "a": 1, "_id": 0 });
        let reply = conn.find("db.c", &spec).unwrap();
        let doc = reply.documents[0].to_document().unwrap();
        assert_eq!(doc, doc! { "a": 2 });
    }

    #[test]
    fn test_get_more_on_dead_cursor_sets_flag() {
        let conn = MockConn::new();
        let reply = conn.get_more("db.c", 999, 0).unwrap();
        assert!(reply.flags.cursor_not_found);
    }

    #[test]
    fn test_exhaust_exclusive_per_connection() {
        let conn = MockConn::new();
        for i in 0..10 {
            conn.insert("db.c", &InsertOptions::default(), &[doc! { "x": i }])
                .unwrap();
        }
        let mut spec = spec_with(doc! {});
        spec.exhaust = true;
        spec.batch_size = 2;
        let _first = conn.find("db.c", &spec).unwrap();
        assert!(matches!(
            conn.find("db.c", &spec),
            Err(RinError::Transport(_))
        ));
    }

    #[test]
    fn test_capped_collection_evicts_oldest() {
        let conn = MockConn::new();
        let create = spec_with(doc! { "create": "capped", "capped": true, "size": 64.0 });
        let reply = conn.find("db.$cmd", &create).unwrap();
        let reply_doc = reply.documents[0].to_document().unwrap();
        assert_eq!(reply_doc.get_f64("ok"), Some(1.0));
        for i in 0..50 {
            conn.insert("db.capped", &InsertOptions::default(), &[doc! { "x": i }])
                .unwrap();
        }
        let docs = conn.stored_documents("db.capped");
        assert!(docs.len() < 50);
        let last = docs.last().unwrap();
        assert_eq!(last.get_i32("x"), Some(49));
    }

    #[test]
    fn test_closed_connection_rejects_everything() {
        let conn = MockConn::new();
        conn.close().unwrap();
        assert!(matches!(
            conn.find("db.c", &spec_with(doc! {})),
            Err(RinError::Transport(_))
        ));
        assert!(matches!(
            conn.insert("db.c", &InsertOptions::default(), &[doc! {}]),
            Err(RinError::Transport(_))
        ));
        assert!(matches!(conn.receive(), Err(RinError::Transport(_))));
        assert!(matches!(
            conn.kill_cursors(&[1]),
            Err(RinError::Transport(_))
        ));
    }
}
