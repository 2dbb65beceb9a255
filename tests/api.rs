use std::sync::Arc;

use actix_web::body::MessageBody;
use actix_web::{App, http::StatusCode, test, web};
use serde_json::{Value, json};

use redeem_backend::config::SyncConfig;
use redeem_backend::handlers;
use redeem_backend::models::CreateRedemptionRequest;
use redeem_backend::services::RedemptionService;
use redeem_backend::store::MemoryRecordStore;
use redeem_backend::utils::BarcodePolicy;

fn service(policy: BarcodePolicy) -> RedemptionService {
    RedemptionService::new(Arc::new(MemoryRecordStore::new()), policy)
}

macro_rules! app {
    ($service:expr) => {
        test::init_service(
            App::new()
                .app_data(web::Data::new($service))
                .app_data(web::Data::new(SyncConfig::default()))
                .service(
                    web::scope("/api/v1")
                        .configure(handlers::health_config)
                        .configure(handlers::redemption_config),
                ),
        )
        .await
    };
}

#[actix_web::test]
async fn create_list_and_reject_duplicate() {
    let app = app!(service(BarcodePolicy::strict_u12()));

    let req = test::TestRequest::post()
        .uri("/api/v1/redemptions")
        .set_json(json!({ "barcode": "U159001922437" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["success"], true);
    let created_at = body["data"]["created_at"].clone();

    let req = test::TestRequest::get()
        .uri("/api/v1/redemptions")
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["data"]["total"], 1);
    assert_eq!(body["data"]["data"][0]["barcode"], "U159001922437");

    let req = test::TestRequest::post()
        .uri("/api/v1/redemptions")
        .set_json(json!({ "barcode": "U159001922437" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "DUPLICATE_RECORD");
    assert_eq!(body["error"]["details"]["first_recorded_at"], created_at);

    let req = test::TestRequest::get()
        .uri("/api/v1/redemptions")
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["data"]["total"], 1);
}

#[actix_web::test]
async fn invalid_barcodes_are_rejected() {
    let app = app!(service(BarcodePolicy::strict_u12()));

    for barcode in ["", "   ", "U123"] {
        let req = test::TestRequest::post()
            .uri("/api/v1/redemptions")
            .set_json(json!({ "barcode": barcode }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    }
}

#[actix_web::test]
async fn delete_and_lookup() {
    let app = app!(service(BarcodePolicy::NonEmpty));

    let req = test::TestRequest::post()
        .uri("/api/v1/redemptions")
        .set_json(json!({ "barcode": "9780201633610" }))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    let id = body["data"]["id"].as_i64().unwrap();

    let req = test::TestRequest::get()
        .uri("/api/v1/redemptions/lookup/9780201633610")
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["data"]["id"], id);

    let req = test::TestRequest::delete()
        .uri(&format!("/api/v1/redemptions/{id}"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let req = test::TestRequest::delete()
        .uri(&format!("/api/v1/redemptions/{id}"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let req = test::TestRequest::get()
        .uri("/api/v1/redemptions/lookup/9780201633610")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn search_and_paginate() {
    let app = app!(service(BarcodePolicy::NonEmpty));

    for barcode in ["AB-1", "ab-2", "CD-3", "AB-4"] {
        let req = test::TestRequest::post()
            .uri("/api/v1/redemptions")
            .set_json(json!({ "barcode": barcode }))
            .to_request();
        test::call_service(&app, req).await;
    }

    let req = test::TestRequest::get()
        .uri("/api/v1/redemptions?search=ab&page=1&per_page=2")
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["data"]["total"], 3);
    assert_eq!(body["data"]["total_pages"], 2);
    assert_eq!(body["data"]["data"].as_array().unwrap().len(), 2);
    assert_eq!(body["data"]["data"][0]["barcode"], "AB-4");
}

#[actix_web::test]
async fn health_reports_ok() {
    let app = app!(service(BarcodePolicy::NonEmpty));
    let req = test::TestRequest::get().uri("/api/v1/health").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["status"], "ok");
}

#[actix_web::test]
async fn events_stream_pushes_inserts() {
    let svc = service(BarcodePolicy::NonEmpty);
    let app = app!(svc.clone());

    let req = test::TestRequest::get()
        .uri("/api/v1/redemptions/events")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers().get("content-type").unwrap(),
        "text/event-stream"
    );

    svc.create(CreateRedemptionRequest {
        barcode: "LIVE-1".to_string(),
    })
    .await
    .unwrap();

    let mut body = std::pin::pin!(resp.into_body());
    let chunk = futures_util::future::poll_fn(|cx| body.as_mut().poll_next(cx))
        .await
        .unwrap()
        .unwrap();
    let text = String::from_utf8(chunk.to_vec()).unwrap();
    assert!(text.starts_with("data: "));
    assert!(text.contains("\"type\":\"inserted\""));
    assert!(text.contains("LIVE-1"));
}

#[actix_web::test]
async fn events_stream_asks_slow_client_to_resync() {
    let svc = RedemptionService::new(
        Arc::new(MemoryRecordStore::with_change_capacity(2)),
        BarcodePolicy::NonEmpty,
    );
    let app = app!(svc.clone());

    let req = test::TestRequest::get()
        .uri("/api/v1/redemptions/events")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);

    for i in 0..5 {
        svc.create(CreateRedemptionRequest {
            barcode: format!("LAG-{i}"),
        })
        .await
        .unwrap();
    }

    let mut body = std::pin::pin!(resp.into_body());
    let chunk = futures_util::future::poll_fn(|cx| body.as_mut().poll_next(cx))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&chunk[..], b"event: resync\ndata: 3\n\n");

    // 之后继续推送缓冲中剩余的变更
    let chunk = futures_util::future::poll_fn(|cx| body.as_mut().poll_next(cx))
        .await
        .unwrap()
        .unwrap();
    let text = String::from_utf8(chunk.to_vec()).unwrap();
    assert!(text.contains("LAG-3"));
}
