use invoice_dedup_rust::ingest::load_records_csv;
use invoice_dedup_rust::service::TracingSink;
use invoice_dedup_rust::{api, AppConfig, DetectionCoordinator};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::EnvFilter;

const SEED_CONCURRENCY: usize = 8;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 初始化日志 - 使用本地时间格式，级别由 RUST_LOG 控制
    tracing_subscriber::fmt()
        .with_timer(ChronoLocal::new("%Y-%m-%d %H:%M:%S".to_string()))
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .with_level(true)
        .init();

    // 加载配置 (非法配置直接退出)
    let config = AppConfig::from_env()?;
    info!("Starting server with config: {:?}", config);

    // 分组事件写入日志
    let coordinator = Arc::new(
        DetectionCoordinator::new(config.detection.clone())?.with_sink(Arc::new(TracingSink)),
    );

    // 预加载历史记录
    if let Some(path) = &config.server.seed_csv {
        let records = load_records_csv(path)?;
        let outcomes = coordinator.submit_batch(records, SEED_CONCURRENCY).await;
        let accepted = outcomes.iter().filter(|o| o.is_accepted()).count();
        info!("预加载完成: 接受 {} / {} 条, 分组 {} 个", accepted, outcomes.len(), coordinator.all_groups().len());
    }

    // 构建路由
    let app = api::router(coordinator);

    // 启动服务器
    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!("Server listening on {}", addr);
    info!("API Endpoints:");
    info!("  POST /api/records                 - 提交发票记录");
    info!("  POST /api/records/batch           - 批量提交");
    info!("  POST /api/reprocess               - 按当前配置重处理历史记录");
    info!("  GET  /api/groups                  - 分页查询重复分组");
    info!("  POST /api/groups/:id/merge|ignore - 人工处置");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
