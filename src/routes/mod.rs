//! 路由配置模块

use crate::handlers;
use actix_web::web;

/// 配置所有路由
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/", web::get().to(handlers::index))
        .route("/data", web::get().to(handlers::get_data))
        .route("/csv", web::get().to(handlers::get_csv))
        // 健康检查
        .service(
            web::scope("/health")
                .route("", web::get().to(handlers::health))
                .route("/live", web::get().to(handlers::live)),
        );
}
