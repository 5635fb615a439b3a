use crate::config::DetectionConfig;
use crate::error::{DedupError, Result};
use crate::models::{
    AuditEntry, Disposition, DuplicateGroup, GroupEvent, GroupFilter, GroupId, GroupPage,
    GroupSummary, InvoiceRecord, JobHandle, JobId, JobStatus, PairScore, RecordId,
};
use crate::service::candidates::{select_candidates, InsertOutcome, RecordStore, StoredRecord};
use crate::service::cluster::ClusterEngine;
use crate::service::events::GroupEventSink;
use crate::service::normalizer::normalize;
use crate::service::reprocess::ReprocessJob;
use crate::service::resolution::ResolutionOutcome;
use crate::service::scorer::score_pair;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

/// 提交结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SubmitOutcome {
    Accepted {
        record_id: RecordId,
        group_id: Option<GroupId>,
        matchable: bool,
    },
    Rejected {
        record_id: RecordId,
        reason: String,
    },
}

impl SubmitOutcome {
    pub fn record_id(&self) -> RecordId {
        match self {
            SubmitOutcome::Accepted { record_id, .. } | SubmitOutcome::Rejected { record_id, .. } => {
                *record_id
            }
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, SubmitOutcome::Accepted { .. })
    }

    pub fn group_id(&self) -> Option<GroupId> {
        match self {
            SubmitOutcome::Accepted { group_id, .. } => *group_id,
            SubmitOutcome::Rejected { .. } => None,
        }
    }
}

/// 查重协调器：规范化 -> 候选选择 -> 并行评分 -> 聚类 -> 事件分发
pub struct DetectionCoordinator {
    config: RwLock<Arc<DetectionConfig>>,
    store: RecordStore,
    engine: ClusterEngine,
    sinks: Vec<Arc<dyn GroupEventSink>>,
    jobs: DashMap<JobId, Arc<ReprocessJob>>,
    last_job_id: AtomicI64,
}

impl DetectionCoordinator {
    /// 配置非法时拒绝创建
    pub fn new(config: DetectionConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config: RwLock::new(Arc::new(config)),
            store: RecordStore::new(),
            engine: ClusterEngine::new(),
            sinks: Vec::new(),
            jobs: DashMap::new(),
            last_job_id: AtomicI64::new(0),
        })
    }

    pub fn with_sink(mut self, sink: Arc<dyn GroupEventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn config(&self) -> Arc<DetectionConfig> {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// 运行时重新加载配置；校验失败时保留旧配置
    pub fn reload_config(&self, config: DetectionConfig) -> Result<()> {
        if let Err(e) = config.validate() {
            tracing::warn!("[Config] 新配置被拒绝，继续使用旧配置: {}", e);
            return Err(e);
        }
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(config);
        tracing::info!("[Config] 配置已更新，可发起重处理以应用到历史记录");
        Ok(())
    }

    /// 事件在聚类锁释放后发布
    fn emit(&self, events: &[GroupEvent]) {
        for event in events {
            for sink in &self.sinks {
                sink.publish(event);
            }
        }
    }

    fn score_candidates<F>(
        &self,
        target: &StoredRecord,
        config: &DetectionConfig,
        accept: F,
    ) -> Vec<(RecordId, PairScore)>
    where
        F: FnMut(&StoredRecord) -> bool,
    {
        let candidates = select_candidates(&self.store, target, config.recency_window_days, accept);
        let mut scored: Vec<(RecordId, PairScore)> = candidates
            .par_iter()
            .map(|c| (c.id(), score_pair(&target.normalized, &c.normalized, config)))
            .filter(|(_, s)| s.score >= config.group_threshold)
            .collect();
        scored.sort_by_key(|(id, _)| *id);

        tracing::debug!(
            "[Detect] 记录 {}: 候选 {} 条, 合格 {:?}",
            target.id(),
            candidates.len(),
            scored.iter().map(|(id, s)| (*id, s.score)).collect::<Vec<_>>()
        );
        scored
    }

    pub fn submit_record(&self, record: InvoiceRecord) -> SubmitOutcome {
        self.submit_record_at(record, Utc::now())
    }

    /// 以指定入库时间提交 (历史数据导入时使用原始入库时间)
    pub fn submit_record_at(&self, record: InvoiceRecord, ingested_at: DateTime<Utc>) -> SubmitOutcome {
        let record_id = record.id;
        let rejected = |e: DedupError| {
            tracing::warn!("[Detect] 记录 {} 被拒绝: {}", record_id, e);
            SubmitOutcome::Rejected {
                record_id,
                reason: e.to_string(),
            }
        };

        let normalized = match normalize(&record) {
            Ok(n) => n,
            Err(e) => return rejected(e),
        };
        let stored = match self.store.insert(record, normalized, ingested_at) {
            Ok(InsertOutcome::Inserted(stored)) => stored,
            Ok(InsertOutcome::AlreadyPresent(stored)) => {
                return SubmitOutcome::Accepted {
                    record_id,
                    group_id: self.engine.pending_group_of(record_id),
                    matchable: stored.normalized.is_matchable(),
                }
            }
            Err(e) => return rejected(e),
        };

        if !stored.normalized.is_matchable() {
            tracing::info!("[Detect] 记录 {} 缺少供应商与发票号，仅存储不参与匹配", record_id);
            return SubmitOutcome::Accepted {
                record_id,
                group_id: None,
                matchable: false,
            };
        }

        let config = self.config();
        let scored = self.score_candidates(&stored, &config, |_| true);
        if !scored.is_empty() {
            let events = self.engine.link_record(record_id, &scored, &config);
            self.emit(&events);
        }

        SubmitOutcome::Accepted {
            record_id,
            group_id: self.engine.pending_group_of(record_id),
            matchable: true,
        }
    }

    /// 批量提交，限制并发数；结果按输入顺序返回
    pub async fn submit_batch(
        self: &Arc<Self>,
        records: Vec<InvoiceRecord>,
        concurrency: usize,
    ) -> Vec<SubmitOutcome> {
        let total = records.len();
        let tasks = records.into_iter().enumerate().map(|(idx, record)| {
            let this = Arc::clone(self);
            async move {
                let record_id = record.id;
                let outcome = tokio::task::spawn_blocking(move || this.submit_record(record))
                    .await
                    .unwrap_or_else(|e| SubmitOutcome::Rejected {
                        record_id,
                        reason: format!("worker failed: {}", e),
                    });
                (idx, outcome)
            }
        });

        let mut outcomes: Vec<(usize, SubmitOutcome)> = stream::iter(tasks)
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await;
        outcomes.sort_by_key(|(idx, _)| *idx);

        let accepted = outcomes.iter().filter(|(_, o)| o.is_accepted()).count();
        tracing::info!("[Detect] 批量提交完成: 共 {} 条, 接受 {} 条", total, accepted);
        outcomes.into_iter().map(|(_, o)| o).collect()
    }

    /// 撤回记录 (采集方删除/重新识别)，受影响分量从剩余边重建
    pub fn retract_record(&self, record_id: RecordId) -> Result<()> {
        self.store
            .remove(record_id)
            .ok_or(DedupError::RecordNotFound(record_id))?;
        let config = self.config();
        let (events, orphaned) = self.engine.retract(record_id, &config);
        tracing::info!("[Detect] 记录 {} 已撤回, 分组变更 {} 个", record_id, events.len());
        self.emit(&events);

        // 被取代记录失去了保留记录，按自身重新匹配
        for orphan in orphaned {
            let Some(stored) = self.store.get(orphan) else {
                continue;
            };
            if !stored.normalized.is_matchable() {
                continue;
            }
            let scored = self.score_candidates(&stored, &config, |_| true);
            if !scored.is_empty() {
                let events = self.engine.link_record(orphan, &scored, &config);
                self.emit(&events);
            }
        }
        tracing::debug!("[Detect] 记录 {} 撤回后重新匹配完成", record_id);
        Ok(())
    }

    pub fn get_group(&self, group_id: GroupId) -> Result<DuplicateGroup> {
        self.engine
            .group(group_id)
            .ok_or(DedupError::GroupNotFound(group_id))
    }

    pub fn list_groups(&self, filter: &GroupFilter, cursor: Option<GroupId>, limit: usize) -> GroupPage {
        self.engine.list(filter, cursor, limit)
    }

    /// 惰性分页遍历；可从任意 cursor 重新开始
    pub fn groups_iter(&self, filter: GroupFilter, cursor: Option<GroupId>, page_size: usize) -> GroupPager<'_> {
        GroupPager {
            coordinator: self,
            filter,
            cursor,
            page_size,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    pub fn all_groups(&self) -> Vec<DuplicateGroup> {
        self.engine.all_groups()
    }

    pub fn merge(&self, group_id: GroupId, survivor: RecordId, resolver_id: &str) -> Result<ResolutionOutcome> {
        self.resolve(group_id, Disposition::Merge { survivor }, resolver_id)
    }

    pub fn ignore(&self, group_id: GroupId, resolver_id: &str) -> Result<ResolutionOutcome> {
        self.resolve(group_id, Disposition::Ignore, resolver_id)
    }

    pub fn resolve(
        &self,
        group_id: GroupId,
        disposition: Disposition,
        resolver_id: &str,
    ) -> Result<ResolutionOutcome> {
        if resolver_id.trim().is_empty() {
            return Err(DedupError::Validation("resolver_id must not be empty".to_string()));
        }
        let (outcome, events) = self.engine.resolve(group_id, disposition, resolver_id)?;
        self.emit(&events);
        Ok(outcome)
    }

    pub fn audit_log(&self, group_id: GroupId) -> Result<Vec<AuditEntry>> {
        self.get_group(group_id)?;
        Ok(self.engine.audit_log(group_id))
    }

    pub fn superseded_by(&self, record_id: RecordId) -> Option<RecordId> {
        self.engine.superseded_by(record_id)
    }

    // ---------------- 重处理 ----------------

    /// 登记一个重处理任务 (尚未运行)
    pub fn start_reprocess(&self, since: Option<DateTime<Utc>>) -> Arc<ReprocessJob> {
        let id = self.last_job_id.fetch_add(1, Ordering::SeqCst) + 1;
        let job = Arc::new(ReprocessJob::new(id, since));
        self.jobs.insert(id, job.clone());
        tracing::info!("[Reprocess] 任务 {} 已创建 (since: {:?})", id, since);
        job
    }

    /// 后台运行重处理，立即返回任务句柄
    pub fn reprocess(self: &Arc<Self>, since: Option<DateTime<Utc>>) -> JobHandle {
        let job = self.start_reprocess(since);
        let handle = job.handle();
        self.spawn_job(job);
        handle
    }

    /// 同步运行重处理直到完成或被取消
    pub fn reprocess_blocking(&self, since: Option<DateTime<Utc>>) -> JobHandle {
        let job = self.start_reprocess(since);
        self.run_job(&job)
    }

    fn spawn_job(self: &Arc<Self>, job: Arc<ReprocessJob>) {
        let this = Arc::clone(self);
        tokio::task::spawn_blocking(move || {
            this.run_job(&job);
        });
    }

    pub fn cancel_job(&self, job_id: JobId) -> Result<JobHandle> {
        let job = self.job(job_id)?;
        if job.status() == JobStatus::Running {
            job.request_cancel();
            tracing::warn!("[Reprocess] 任务 {} 请求取消", job_id);
        }
        Ok(job.handle())
    }

    /// 从检查点恢复已取消的任务 (后台运行)
    pub fn resume_job(self: &Arc<Self>, job_id: JobId) -> Result<JobHandle> {
        let job = self.resumable(job_id)?;
        let handle = job.handle();
        self.spawn_job(job);
        Ok(handle)
    }

    pub fn resume_job_blocking(&self, job_id: JobId) -> Result<JobHandle> {
        let job = self.resumable(job_id)?;
        Ok(self.run_job(&job))
    }

    fn resumable(&self, job_id: JobId) -> Result<Arc<ReprocessJob>> {
        let job = self.job(job_id)?;
        if !job.try_resume() {
            return Err(DedupError::Validation(format!(
                "job {} is {:?} and cannot be resumed",
                job_id,
                job.status()
            )));
        }
        tracing::info!("[Reprocess] 任务 {} 从检查点 {:?} 恢复", job_id, job.handle().checkpoint);
        Ok(job)
    }

    pub fn job_status(&self, job_id: JobId) -> Result<JobHandle> {
        Ok(self.job(job_id)?.handle())
    }

    fn job(&self, job_id: JobId) -> Result<Arc<ReprocessJob>> {
        self.jobs
            .get(&job_id)
            .map(|j| j.value().clone())
            .ok_or(DedupError::JobNotFound(job_id))
    }

    /// 逐条重新评分 (按入库顺序)，每条只与更早的受影响记录或范围外记录比较，
    /// 因此每对记录恰好评分一次；结束 (或取消) 时统一重建分组
    fn run_job(&self, job: &ReprocessJob) -> JobHandle {
        let config = self.config();
        let records: Vec<Arc<StoredRecord>> = self
            .store
            .snapshot_ordered()
            .into_iter()
            .filter(|r| job.since().map_or(true, |since| r.ingested_at >= since))
            .collect();
        let affected: HashSet<RecordId> = records.iter().map(|r| r.id()).collect();
        let start = job
            .checkpoint_seq()
            .map_or(0, |seq| records.partition_point(|r| r.seq <= seq));
        job.set_total(records.len());

        tracing::info!(
            "[Reprocess] 任务 {} 开始: 共 {} 条记录, 从第 {} 条继续",
            job.id(),
            records.len(),
            start + 1
        );

        for (idx, target) in records.iter().enumerate().skip(start) {
            if job.is_cancel_requested() {
                let events = self.engine.rebuild_all(&config);
                self.emit(&events);
                job.finish(JobStatus::Cancelled);
                tracing::warn!(
                    "[Reprocess] 任务 {} 已取消, 检查点: {:?}",
                    job.id(),
                    job.handle().checkpoint
                );
                return job.handle();
            }

            if target.normalized.is_matchable() {
                let is_rescored = |c: &StoredRecord| c.seq < target.seq || !affected.contains(&c.id());
                let scored = self.score_candidates(target, &config, is_rescored);
                let stale = |n: RecordId| self.store.get(n).map_or(true, |c| is_rescored(c.as_ref()));
                self.engine.rescore_record(target.id(), &scored, stale, &config);
            }
            job.record_progress(target.id(), target.seq);

            // 进度日志 (第一条及每 N 条)
            let current = idx + 1;
            if current % config.reprocess_progress_every == 0 || current == 1 {
                tracing::info!("[Reprocess] 任务 {} 进度: {}/{}", job.id(), current, records.len());
            }
        }

        let events = self.engine.rebuild_all(&config);
        tracing::info!(
            "[Reprocess] 任务 {} 完成: 处理 {} 条, 分组变更事件 {} 个",
            job.id(),
            records.len(),
            events.len()
        );
        self.emit(&events);
        job.finish(JobStatus::Completed);
        job.handle()
    }
}

/// 分组分页迭代器
pub struct GroupPager<'a> {
    coordinator: &'a DetectionCoordinator,
    filter: GroupFilter,
    cursor: Option<GroupId>,
    page_size: usize,
    buffer: VecDeque<GroupSummary>,
    exhausted: bool,
}

impl GroupPager<'_> {
    /// 当前位置，可用于之后重新开始遍历
    pub fn cursor(&self) -> Option<GroupId> {
        self.cursor
    }
}

impl Iterator for GroupPager<'_> {
    type Item = GroupSummary;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            let page = self
                .coordinator
                .list_groups(&self.filter, self.cursor, self.page_size);
            self.exhausted = page.next_cursor.is_none();
            self.buffer.extend(page.groups);
        }
        let next = self.buffer.pop_front()?;
        self.cursor = Some(next.id);
        Some(next)
    }
}
