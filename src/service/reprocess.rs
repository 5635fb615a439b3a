use crate::models::{JobHandle, JobId, JobStatus, RecordId};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug)]
struct JobState {
    status: JobStatus,
    total: usize,
    processed: usize,
    checkpoint: Option<RecordId>,
    checkpoint_seq: Option<u64>,
    finished_at: Option<DateTime<Utc>>,
}

/// 重处理任务：按入库顺序逐条重新评分，每条记录之间检查取消标志
#[derive(Debug)]
pub struct ReprocessJob {
    id: JobId,
    since: Option<DateTime<Utc>>,
    started_at: DateTime<Utc>,
    cancel_requested: AtomicBool,
    state: Mutex<JobState>,
}

impl ReprocessJob {
    pub fn new(id: JobId, since: Option<DateTime<Utc>>) -> Self {
        Self {
            id,
            since,
            started_at: Utc::now(),
            cancel_requested: AtomicBool::new(false),
            state: Mutex::new(JobState {
                status: JobStatus::Running,
                total: 0,
                processed: 0,
                checkpoint: None,
                checkpoint_seq: None,
                finished_at: None,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, JobState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn since(&self) -> Option<DateTime<Utc>> {
        self.since
    }

    pub fn status(&self) -> JobStatus {
        self.state().status
    }

    pub fn request_cancel(&self) {
        self.cancel_requested.store(true, Ordering::SeqCst);
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst)
    }

    /// 已取消的任务重新进入运行状态；返回 false 表示当前不可恢复
    pub fn try_resume(&self) -> bool {
        let mut state = self.state();
        match state.status {
            JobStatus::Cancelled => {
                state.status = JobStatus::Running;
                state.finished_at = None;
                self.cancel_requested.store(false, Ordering::SeqCst);
                true
            }
            JobStatus::Running | JobStatus::Completed => false,
        }
    }

    /// 恢复时从该入库序号之后继续
    pub fn checkpoint_seq(&self) -> Option<u64> {
        self.state().checkpoint_seq
    }

    pub fn set_total(&self, total: usize) {
        self.state().total = total;
    }

    pub fn record_progress(&self, record: RecordId, seq: u64) {
        let mut state = self.state();
        state.processed += 1;
        state.checkpoint = Some(record);
        state.checkpoint_seq = Some(seq);
    }

    pub fn finish(&self, status: JobStatus) {
        let mut state = self.state();
        state.status = status;
        state.finished_at = Some(Utc::now());
    }

    pub fn handle(&self) -> JobHandle {
        let state = self.state();
        JobHandle {
            id: self.id,
            status: state.status,
            since: self.since,
            total: state.total,
            processed: state.processed,
            checkpoint: state.checkpoint,
            started_at: self.started_at,
            finished_at: state.finished_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_stopped_jobs_can_resume() {
        let job = ReprocessJob::new(1, None);
        assert!(!job.try_resume());

        job.request_cancel();
        job.finish(JobStatus::Cancelled);
        assert!(job.try_resume());
        assert!(!job.is_cancel_requested());
        assert_eq!(job.status(), JobStatus::Running);

        job.finish(JobStatus::Completed);
        assert!(!job.try_resume());
    }

    #[test]
    fn progress_moves_checkpoint() {
        let job = ReprocessJob::new(7, None);
        job.set_total(3);
        job.record_progress(10, 0);
        job.record_progress(11, 1);

        let handle = job.handle();
        assert_eq!(handle.processed, 2);
        assert_eq!(handle.checkpoint, Some(11));
        assert_eq!(job.checkpoint_seq(), Some(1));
    }
}
