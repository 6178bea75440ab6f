//! 请求日志中间件

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error,
};
use futures::future::{ok, LocalBoxFuture, Ready};
use std::rc::Rc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// 请求日志中间件
///
/// 健康检查请求只记录到 debug 级别。
pub struct RequestLogger;

impl RequestLogger {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RequestLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl<S, B> Transform<S, ServiceRequest> for RequestLogger
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = RequestLoggerMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(RequestLoggerMiddleware {
            service: Rc::new(service),
        })
    }
}

pub struct RequestLoggerMiddleware<S> {
    service: Rc<S>,
}

impl<S, B> Service<ServiceRequest> for RequestLoggerMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        let start = Instant::now();

        let request_id = Uuid::new_v4();
        let method = req.method().to_string();
        let path = req.path().to_string();
        let query = truncate(req.query_string(), 200);
        let client_ip = req
            .connection_info()
            .realip_remote_addr()
            .unwrap_or("unknown")
            .to_string();
        let quiet = path.starts_with("/health");

        Box::pin(async move {
            let result = service.call(req).await;
            let duration_ms = start.elapsed().as_millis() as u64;

            match &result {
                Ok(res) if res.status().as_u16() >= 400 => {
                    warn!(
                        request_id = %request_id,
                        method = %method,
                        path = %path,
                        query = %query,
                        client_ip = %client_ip,
                        status = res.status().as_u16(),
                        duration_ms = duration_ms,
                        "请求完成（错误）"
                    );
                }
                Ok(res) if quiet => {
                    debug!(
                        request_id = %request_id,
                        path = %path,
                        status = res.status().as_u16(),
                        duration_ms = duration_ms,
                        "健康检查"
                    );
                }
                Ok(res) => {
                    info!(
                        request_id = %request_id,
                        method = %method,
                        path = %path,
                        query = %query,
                        client_ip = %client_ip,
                        status = res.status().as_u16(),
                        duration_ms = duration_ms,
                        "请求完成"
                    );
                }
                Err(e) => {
                    warn!(
                        request_id = %request_id,
                        method = %method,
                        path = %path,
                        error = %e,
                        duration_ms = duration_ms,
                        "请求失败"
                    );
                }
            }

            result
        })
    }
}

/// 截断过长的查询串
fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}
