//! 健康检查 API 处理器

use crate::models::HealthCheckResponse;
use crate::services::SeriesStore;
use actix_web::{web, HttpResponse};
use std::sync::Arc;
use std::time::Instant;

/// 应用启动时间
static START_TIME: once_cell::sync::Lazy<Instant> = once_cell::sync::Lazy::new(Instant::now);

/// 健康检查
pub async fn health(store: web::Data<Arc<SeriesStore>>) -> HttpResponse {
    let response = HealthCheckResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        devices: store.device_count(),
        records: store.record_count(),
        uptime_seconds: START_TIME.elapsed().as_secs(),
    };

    HttpResponse::Ok().json(response)
}

/// 存活检查
pub async fn live() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "alive": true
    }))
}
