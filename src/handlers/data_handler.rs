//! 数据查询 API 处理器

use actix_web::{http::header, web, HttpRequest, HttpResponse};
use std::sync::Arc;

use crate::errors::AppError;
use crate::models::{DataResponse, DecimationPolicy, SeriesFilter, TimeRange};
use crate::services::SeriesStore;
use crate::utils::now_ts;

/// 根路径跳转到 `/data`
pub async fn index() -> HttpResponse {
    HttpResponse::Found()
        .insert_header((header::LOCATION, "/data"))
        .finish()
}

/// 所有设备的最新读数
pub async fn get_data(store: web::Data<Arc<SeriesStore>>) -> HttpResponse {
    let response = DataResponse::from_snapshots(now_ts(), store.snapshot());
    HttpResponse::Ok().json(response)
}

/// 历史数据 CSV
///
/// 查询串为 `;` 分隔的 `设备:传感器` 通配模式，或 `re=<正则>`；为空时返回全部。
pub async fn get_csv(
    req: HttpRequest,
    store: web::Data<Arc<SeriesStore>>,
    policy: web::Data<DecimationPolicy>,
) -> Result<HttpResponse, AppError> {
    let filter = parse_series_filter(req.query_string())?;
    let body = store.export_csv(&filter, TimeRange::until(now_ts()), &policy)?;

    Ok(HttpResponse::Ok()
        .content_type("text/csv; charset=utf-8")
        .body(body))
}

/// 解析 `/csv` 查询串
pub fn parse_series_filter(query: &str) -> Result<SeriesFilter, AppError> {
    if query.trim().is_empty() {
        return Ok(SeriesFilter::all());
    }

    if query.starts_with("re=") {
        let pairs = decode_pairs(query)?;
        let pattern = pairs
            .into_iter()
            .find(|(k, _)| k == "re")
            .map(|(_, v)| v)
            .unwrap_or_default();
        return SeriesFilter::from_regex(&pattern);
    }

    // 查询串按表单编码解码，`;` 视为分隔符
    let globs: Vec<String> = decode_pairs(&query.replace(';', "&"))?
        .into_iter()
        .map(|(k, v)| if v.is_empty() { k } else { format!("{}={}", k, v) })
        .filter(|g| !g.is_empty())
        .collect();

    if globs.is_empty() {
        Ok(SeriesFilter::all())
    } else {
        SeriesFilter::from_globs(&globs)
    }
}

fn decode_pairs(query: &str) -> Result<Vec<(String, String)>, AppError> {
    web::Query::<Vec<(String, String)>>::from_query(query)
        .map(|q| q.into_inner())
        .map_err(|e| AppError::ValidationError(format!("查询参数无效: {}", e)))
}
