use crate::error::DedupError;
use crate::ingest::write_groups_csv;
use crate::models::{
    AuditEntry, DuplicateGroup, GroupFilter, GroupId, GroupPage, GroupStatus, InvoiceRecord,
    JobHandle, JobId, RecordId, RiskTier,
};
use crate::service::{DetectionCoordinator, ResolutionOutcome, SubmitOutcome};
use axum::{
    extract::{Json, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// 批量提交默认并发数
const DEFAULT_BATCH_CONCURRENCY: usize = 8;
const DEFAULT_PAGE_SIZE: usize = 50;

/// 错误响应体
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub code: String,
    pub message: String,
}

/// 业务错误 -> HTTP 状态码 + 稳定错误码
pub struct ApiError(DedupError);

impl From<DedupError> for ApiError {
    fn from(e: DedupError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            DedupError::GroupNotFound(_) | DedupError::RecordNotFound(_) | DedupError::JobNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            DedupError::InvalidTransition { .. } | DedupError::ConflictingResolution { .. } => {
                StatusCode::CONFLICT
            }
            DedupError::Validation(_) | DedupError::UnknownMember { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            DedupError::Configuration(_) => StatusCode::BAD_REQUEST,
            DedupError::Consistency(_) | DedupError::Io(_) | DedupError::Csv(_) => {
                tracing::error!("请求处理失败: {}", self.0);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let body = ErrorResponse {
            success: false,
            code: self.0.code().to_string(),
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

/// 阻塞型计算放到 blocking 线程池
async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError(DedupError::Consistency(format!("worker task failed: {}", e))))
}

/// 健康检查
pub async fn health_check() -> &'static str {
    "OK"
}

// ---------------- 记录 ----------------

/// 提交单条记录
pub async fn submit_record(
    State(coordinator): State<Arc<DetectionCoordinator>>,
    Json(record): Json<InvoiceRecord>,
) -> Result<Response, ApiError> {
    let outcome = blocking(move || coordinator.submit_record(record)).await?;
    let status = if outcome.is_accepted() {
        StatusCode::OK
    } else {
        StatusCode::UNPROCESSABLE_ENTITY
    };
    Ok((status, Json(outcome)).into_response())
}

/// 请求体: 记录列表
#[derive(Debug, Deserialize)]
pub struct BatchSubmitRequest {
    pub records: Vec<InvoiceRecord>,
    pub concurrency: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct BatchSubmitResponse {
    pub success: bool,
    pub message: String,
    pub outcomes: Vec<SubmitOutcome>,
}

/// 批量提交
pub async fn submit_batch(
    State(coordinator): State<Arc<DetectionCoordinator>>,
    Json(req): Json<BatchSubmitRequest>,
) -> Json<BatchSubmitResponse> {
    let total = req.records.len();
    let concurrency = req.concurrency.unwrap_or(DEFAULT_BATCH_CONCURRENCY);
    let outcomes = coordinator.submit_batch(req.records, concurrency).await;
    let accepted = outcomes.iter().filter(|o| o.is_accepted()).count();

    Json(BatchSubmitResponse {
        success: true,
        message: format!("Accepted {} of {} records", accepted, total),
        outcomes,
    })
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub success: bool,
    pub message: String,
}

/// 撤回记录
pub async fn retract_record(
    State(coordinator): State<Arc<DetectionCoordinator>>,
    Path(record_id): Path<RecordId>,
) -> ApiResult<MessageResponse> {
    blocking(move || coordinator.retract_record(record_id)).await??;
    Ok(Json(MessageResponse {
        success: true,
        message: format!("Record {} retracted", record_id),
    }))
}

// ---------------- 重处理 ----------------

#[derive(Debug, Default, Deserialize)]
pub struct ReprocessRequest {
    pub since: Option<DateTime<Utc>>,
}

/// 发起重处理 (后台运行)
pub async fn start_reprocess(
    State(coordinator): State<Arc<DetectionCoordinator>>,
    body: Option<Json<ReprocessRequest>>,
) -> (StatusCode, Json<JobHandle>) {
    let since = body.and_then(|Json(req)| req.since);
    (StatusCode::ACCEPTED, Json(coordinator.reprocess(since)))
}

pub async fn job_status(
    State(coordinator): State<Arc<DetectionCoordinator>>,
    Path(job_id): Path<JobId>,
) -> ApiResult<JobHandle> {
    Ok(Json(coordinator.job_status(job_id)?))
}

pub async fn cancel_job(
    State(coordinator): State<Arc<DetectionCoordinator>>,
    Path(job_id): Path<JobId>,
) -> ApiResult<JobHandle> {
    Ok(Json(coordinator.cancel_job(job_id)?))
}

pub async fn resume_job(
    State(coordinator): State<Arc<DetectionCoordinator>>,
    Path(job_id): Path<JobId>,
) -> ApiResult<JobHandle> {
    Ok(Json(coordinator.resume_job(job_id)?))
}

// ---------------- 分组查询 ----------------

#[derive(Debug, Default, Deserialize)]
pub struct ListGroupsQuery {
    pub status: Option<GroupStatus>,
    pub risk_tier: Option<RiskTier>,
    pub cursor: Option<GroupId>,
    pub limit: Option<usize>,
}

/// 分页查询分组
pub async fn list_groups(
    State(coordinator): State<Arc<DetectionCoordinator>>,
    Query(query): Query<ListGroupsQuery>,
) -> Json<GroupPage> {
    let filter = GroupFilter {
        status: query.status,
        risk_tier: query.risk_tier,
    };
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE);
    Json(coordinator.list_groups(&filter, query.cursor, limit))
}

/// 导出全部分组 (CSV)
pub async fn export_groups(State(coordinator): State<Arc<DetectionCoordinator>>) -> Result<Response, ApiError> {
    let mut buffer = Vec::new();
    write_groups_csv(&coordinator.all_groups(), &mut buffer)?;
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/csv; charset=utf-8")],
        buffer,
    )
        .into_response())
}

pub async fn get_group(
    State(coordinator): State<Arc<DetectionCoordinator>>,
    Path(group_id): Path<GroupId>,
) -> ApiResult<DuplicateGroup> {
    Ok(Json(coordinator.get_group(group_id)?))
}

pub async fn group_audit(
    State(coordinator): State<Arc<DetectionCoordinator>>,
    Path(group_id): Path<GroupId>,
) -> ApiResult<Vec<AuditEntry>> {
    Ok(Json(coordinator.audit_log(group_id)?))
}

// ---------------- 处置 ----------------

#[derive(Debug, Deserialize)]
pub struct MergeRequest {
    pub survivor_record_id: RecordId,
    pub resolver_id: String,
}

#[derive(Debug, Deserialize)]
pub struct IgnoreRequest {
    pub resolver_id: String,
}

/// 处置响应体；replayed 表示重复提交的相同处置
#[derive(Debug, Serialize)]
pub struct ResolutionResponse {
    pub success: bool,
    pub replayed: bool,
    pub group: DuplicateGroup,
}

impl From<ResolutionOutcome> for ResolutionResponse {
    fn from(outcome: ResolutionOutcome) -> Self {
        let replayed = outcome.is_replay();
        let group = match outcome {
            ResolutionOutcome::Applied(g) | ResolutionOutcome::Replayed(g) => g,
        };
        ResolutionResponse {
            success: true,
            replayed,
            group,
        }
    }
}

pub async fn merge_group(
    State(coordinator): State<Arc<DetectionCoordinator>>,
    Path(group_id): Path<GroupId>,
    Json(req): Json<MergeRequest>,
) -> ApiResult<ResolutionResponse> {
    let outcome = coordinator.merge(group_id, req.survivor_record_id, &req.resolver_id)?;
    Ok(Json(outcome.into()))
}

pub async fn ignore_group(
    State(coordinator): State<Arc<DetectionCoordinator>>,
    Path(group_id): Path<GroupId>,
    Json(req): Json<IgnoreRequest>,
) -> ApiResult<ResolutionResponse> {
    let outcome = coordinator.ignore(group_id, &req.resolver_id)?;
    Ok(Json(outcome.into()))
}
