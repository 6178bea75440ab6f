//! HTTP API 集成测试

use actix_cors::Cors;
use actix_web::{http::StatusCode, test, web, App};
use std::sync::Arc;

use waveplus_bridge::middleware::RequestLogger;
use waveplus_bridge::models::{DataResponse, DecimationPolicy};
use waveplus_bridge::routes;
use waveplus_bridge::services::SeriesStore;

use crate::helpers::{device, sample, CELLAR, OFFICE};

fn seeded_store() -> Arc<SeriesStore> {
    let store = Arc::new(SeriesStore::new(
        &[device(OFFICE, Some("office")), device(CELLAR, None)],
        3600,
        None,
    ));
    store
        .append(sample(OFFICE, 1000, &[("co2", 650.0), ("voc", 80.0)]))
        .unwrap();
    store
        .append(sample(OFFICE, 1060, &[("co2", 700.0), ("voc", 90.0)]))
        .unwrap();
    store
}

macro_rules! init_app {
    ($store:expr) => {
        test::init_service(
            App::new()
                .wrap(Cors::permissive())
                .wrap(RequestLogger::new())
                .app_data(web::Data::new($store.clone()))
                .app_data(web::Data::new(DecimationPolicy::none()))
                .configure(routes::configure),
        )
        .await
    };
}

#[actix_web::test]
async fn test_data_returns_latest_readings() {
    let store = seeded_store();
    let app = init_app!(store);

    let req = test::TestRequest::get().uri("/data").to_request();
    let body: DataResponse = test::call_and_read_body_json(&app, req).await;

    let office = &body.devices["office"];
    assert_eq!(office.readings["co2"], 700.0);
    assert_eq!(office.update_time, Some(1060));

    // 从未读取成功的设备没有更新时间
    let cellar = &body.devices[CELLAR];
    assert!(cellar.readings.is_empty());
    assert!(cellar.update_time.is_none());
}

#[actix_web::test]
async fn test_root_redirects_to_data() {
    let store = seeded_store();
    let app = init_app!(store);

    let req = test::TestRequest::get().uri("/").to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), StatusCode::FOUND);
    assert_eq!(resp.headers().get("location").unwrap(), "/data");
}

#[actix_web::test]
async fn test_csv_with_glob_filter() {
    let store = seeded_store();
    let app = init_app!(store);

    let req = test::TestRequest::get().uri("/csv?office:co2").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers().get("content-type").unwrap(),
        "text/csv; charset=utf-8"
    );

    let body = test::read_body(resp).await;
    let text = String::from_utf8(body.to_vec()).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], "Time,office:co2");
    assert_eq!(lines.len(), 3);
    assert!(lines[2].ends_with(",700"));
}

#[actix_web::test]
async fn test_csv_with_regex_filter() {
    let store = seeded_store();
    let app = init_app!(store);

    let req = test::TestRequest::get().uri("/csv?re=.*:voc").to_request();
    let body = test::call_and_read_body(&app, req).await;
    let text = String::from_utf8(body.to_vec()).unwrap();

    assert_eq!(text.lines().next(), Some("Time,office:voc"));
}

#[actix_web::test]
async fn test_csv_invalid_regex_is_bad_request() {
    let store = seeded_store();
    let app = init_app!(store);

    let req = test::TestRequest::get().uri("/csv?re=(").to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn test_health() {
    let store = seeded_store();
    let app = init_app!(store);

    let req = test::TestRequest::get().uri("/health").to_request();
    let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["devices"], 2);
    assert_eq!(body["records"], 2);

    let req = test::TestRequest::get().uri("/health/live").to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());
}
