use crate::error::{DedupError, Result};
use crate::models::{InvoiceRecord, NormalizedRecord, RecordId};
use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use indexmap::IndexSet;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// 已入库的记录 (含规范化结果与入库顺序)
#[derive(Debug, Clone)]
pub struct StoredRecord {
    pub record: InvoiceRecord,
    pub normalized: NormalizedRecord,
    pub seq: u64,
    pub ingested_at: DateTime<Utc>,
}

impl StoredRecord {
    pub fn id(&self) -> RecordId {
        self.record.id
    }
}

/// 分桶键：(币种, 供应商首词) 或 (币种, 发票号数字序列)；币种不同的记录永远不会成为候选
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BucketKey {
    Vendor(String, String),
    Digits(String, String),
}

pub fn bucket_keys(n: &NormalizedRecord) -> Vec<BucketKey> {
    let mut keys = Vec::with_capacity(2);
    if let Some(v) = n.vendor_bucket() {
        keys.push(BucketKey::Vendor(n.currency.clone(), v.to_string()));
    }
    if let Some(d) = n.digits_bucket() {
        keys.push(BucketKey::Digits(n.currency.clone(), d.to_string()));
    }
    keys
}

#[derive(Debug)]
pub enum InsertOutcome {
    Inserted(Arc<StoredRecord>),
    AlreadyPresent(Arc<StoredRecord>), // 相同内容重复提交
}

/// 记录库 + 倒排分桶索引；评分线程无需持有聚类锁即可并发读取
#[derive(Debug, Default)]
pub struct RecordStore {
    records: DashMap<RecordId, Arc<StoredRecord>>,
    buckets: DashMap<BucketKey, BTreeSet<RecordId>>,
    retracted: DashSet<RecordId>,
    next_seq: AtomicU64,
}

impl RecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 入库；先写入分桶再做候选查询，保证并发提交的两条记录至少一方能看到另一方
    pub fn insert(
        &self,
        record: InvoiceRecord,
        normalized: NormalizedRecord,
        ingested_at: DateTime<Utc>,
    ) -> Result<InsertOutcome> {
        let entry = self.records.entry(record.id);
        // 在持有该 id 分片锁时检查，与并发撤回互斥
        if self.retracted.contains(&record.id) {
            return Err(DedupError::Validation(format!(
                "record {} was retracted and cannot be resubmitted",
                record.id
            )));
        }
        let stored = match entry {
            Entry::Occupied(existing) => {
                if existing.get().record == record {
                    return Ok(InsertOutcome::AlreadyPresent(existing.get().clone()));
                }
                return Err(DedupError::Validation(format!(
                    "record {} already exists with different content; re-extraction must use a new id",
                    record.id
                )));
            }
            Entry::Vacant(slot) => {
                let stored = Arc::new(StoredRecord {
                    record,
                    normalized,
                    seq: self.next_seq.fetch_add(1, Ordering::SeqCst),
                    ingested_at,
                });
                slot.insert(stored.clone());
                stored
            }
        };

        if stored.normalized.is_matchable() {
            for key in bucket_keys(&stored.normalized) {
                self.buckets.entry(key).or_default().insert(stored.id());
            }
        }
        Ok(InsertOutcome::Inserted(stored))
    }

    pub fn get(&self, id: RecordId) -> Option<Arc<StoredRecord>> {
        self.records.get(&id).map(|r| r.value().clone())
    }

    /// 撤回记录，同时清理分桶；撤回后的 id 不可再次入库
    pub fn remove(&self, id: RecordId) -> Option<Arc<StoredRecord>> {
        let (_, stored) = self.records.remove_if(&id, |id, _| {
            self.retracted.insert(*id);
            true
        })?;
        for key in bucket_keys(&stored.normalized) {
            if let Some(mut ids) = self.buckets.get_mut(&key) {
                ids.remove(&id);
            }
            self.buckets.remove_if(&key, |_, ids| ids.is_empty());
        }
        Some(stored)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// 按入库顺序的快照
    pub fn snapshot_ordered(&self) -> Vec<Arc<StoredRecord>> {
        let mut all: Vec<Arc<StoredRecord>> =
            self.records.iter().map(|r| r.value().clone()).collect();
        all.sort_by_key(|r| r.seq);
        all
    }

    fn bucket_members(&self, key: &BucketKey) -> Vec<RecordId> {
        self.buckets
            .get(key)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }
}

/// 候选窗口：同一分桶 且 入库时间相差不超过 recency 窗口
///
/// 两处拼写错误同时改变供应商首词和发票号数字的记录不会被选中，属于接受的漏报边界。
pub fn select_candidates<F>(
    store: &RecordStore,
    target: &StoredRecord,
    recency_window_days: i64,
    mut accept: F,
) -> Vec<Arc<StoredRecord>>
where
    F: FnMut(&StoredRecord) -> bool,
{
    if !target.normalized.is_matchable() {
        return Vec::new();
    }

    let window = Duration::days(recency_window_days);
    let mut ids: IndexSet<RecordId> = IndexSet::new(); // 保序去重
    for key in bucket_keys(&target.normalized) {
        ids.extend(self_excluded(store.bucket_members(&key), target.id()));
    }

    let mut candidates: Vec<Arc<StoredRecord>> = ids
        .into_iter()
        .filter_map(|id| store.get(id))
        .filter(|c| {
            let delta = c.ingested_at.signed_duration_since(target.ingested_at);
            delta <= window && delta >= -window
        })
        .filter(|c| accept(c))
        .collect();
    candidates.sort_by_key(|c| c.seq);
    candidates
}

fn self_excluded(ids: Vec<RecordId>, me: RecordId) -> impl Iterator<Item = RecordId> {
    ids.into_iter().filter(move |id| *id != me)
}
