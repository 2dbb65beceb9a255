use std::time::Duration;

use actix_web::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use actix_web::web::Bytes;
use actix_web::{HttpResponse, ResponseError, Result, web};
use futures_util::stream;
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{Instant, interval_at};

use crate::config::SyncConfig;
use crate::models::*;
use crate::services::RedemptionService;

#[utoipa::path(
    get,
    path = "/redemptions",
    tag = "redemption",
    params(RedemptionQuery),
    responses(
        (status = 200, description = "获取兑换记录成功", body = PaginatedResponse<Redemption>)
    )
)]
/// 分页获取兑换记录（倒序），支持条码关键字搜索
pub async fn list_redemptions(
    service: web::Data<RedemptionService>,
    query: web::Query<RedemptionQuery>,
) -> Result<HttpResponse> {
    match service.list(&query.into_inner()).await {
        Ok(page) => Ok(HttpResponse::Ok().json(json!({ "success": true, "data": page }))),
        Err(e) => Ok(e.error_response()),
    }
}

#[utoipa::path(
    post,
    path = "/redemptions",
    tag = "redemption",
    request_body = CreateRedemptionRequest,
    responses(
        (status = 201, description = "兑换成功", body = Redemption),
        (status = 400, description = "条码为空或格式不符"),
        (status = 409, description = "条码已兑换过")
    )
)]
pub async fn create_redemption(
    service: web::Data<RedemptionService>,
    request: web::Json<CreateRedemptionRequest>,
) -> Result<HttpResponse> {
    match service.create(request.into_inner()).await {
        Ok(record) => Ok(HttpResponse::Created().json(json!({
            "success": true,
            "data": record,
            "message": "Redemption recorded"
        }))),
        Err(e) => Ok(e.error_response()),
    }
}

#[utoipa::path(
    get,
    path = "/redemptions/lookup/{barcode}",
    tag = "redemption",
    params(
        ("barcode" = String, Path, description = "条码")
    ),
    responses(
        (status = 200, description = "查询成功", body = Redemption),
        (status = 404, description = "该条码尚未兑换")
    )
)]
pub async fn lookup_redemption(
    service: web::Data<RedemptionService>,
    path: web::Path<String>,
) -> Result<HttpResponse> {
    match service.find_by_barcode(&path.into_inner()).await {
        Ok(record) => Ok(HttpResponse::Ok().json(json!({ "success": true, "data": record }))),
        Err(e) => Ok(e.error_response()),
    }
}

#[utoipa::path(
    delete,
    path = "/redemptions/{id}",
    tag = "redemption",
    params(
        ("id" = i64, Path, description = "记录ID")
    ),
    responses(
        (status = 200, description = "删除成功"),
        (status = 404, description = "记录不存在")
    )
)]
pub async fn delete_redemption(
    service: web::Data<RedemptionService>,
    path: web::Path<i64>,
) -> Result<HttpResponse> {
    match service.delete(path.into_inner()).await {
        Ok(()) => Ok(HttpResponse::Ok().json(json!({
            "success": true,
            "message": "Redemption deleted"
        }))),
        Err(e) => Ok(e.error_response()),
    }
}

#[utoipa::path(
    get,
    path = "/redemptions/events",
    tag = "redemption",
    responses(
        (status = 200, description = "SSE 变更流 (text/event-stream)，每条 data 为一个 RecordChange")
    )
)]
/// 兑换记录变更推送 (Server-Sent Events)
/// - 每次新增/删除推送一条 `data: {RecordChange}`
/// - 订阅方落后过多时推送 `event: resync`，客户端应重新拉取列表
/// - 定期发送注释行保持连接
pub async fn stream_events(
    service: web::Data<RedemptionService>,
    sync: web::Data<SyncConfig>,
) -> HttpResponse {
    let rx = service.subscribe();
    let period = Duration::from_secs(sync.keep_alive_secs.max(1));
    let ticker = interval_at(Instant::now() + period, period);

    let events = stream::unfold((rx, ticker), |(mut rx, mut ticker)| async move {
        loop {
            let frame = tokio::select! {
                msg = rx.recv() => match msg {
                    Ok(change) => match serde_json::to_string(&change) {
                        Ok(payload) => format!("data: {payload}\n\n"),
                        Err(e) => {
                            log::error!("Failed to encode record change: {e}");
                            continue;
                        }
                    },
                    Err(RecvError::Lagged(skipped)) => {
                        log::warn!("SSE subscriber lagged, skipped {skipped} change(s)");
                        format!("event: resync\ndata: {skipped}\n\n")
                    }
                    Err(RecvError::Closed) => return None,
                },
                _ = ticker.tick() => ": keep-alive\n\n".to_string(),
            };
            return Some((Ok::<_, actix_web::Error>(Bytes::from(frame)), (rx, ticker)));
        }
    });

    HttpResponse::Ok()
        .insert_header((CONTENT_TYPE, "text/event-stream"))
        .insert_header((CACHE_CONTROL, "no-cache"))
        .streaming(events)
}

/// 路由配置
pub fn redemption_config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/redemptions")
            .route("", web::get().to(list_redemptions))
            .route("", web::post().to(create_redemption))
            .route("/events", web::get().to(stream_events))
            .route("/lookup/{barcode}", web::get().to(lookup_redemption))
            .route("/{id}", web::delete().to(delete_redemption)),
    );
}
