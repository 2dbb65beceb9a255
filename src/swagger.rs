use actix_web::web;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::handlers;
use crate::models::*;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health::health,
        handlers::redemption::list_redemptions,
        handlers::redemption::create_redemption,
        handlers::redemption::lookup_redemption,
        handlers::redemption::delete_redemption,
        handlers::redemption::stream_events,
    ),
    components(
        schemas(
            Redemption,
            CreateRedemptionRequest,
            RedemptionQuery,
            RecordChange,
            ApiError,
        )
    ),
    tags(
        (name = "redemption", description = "Barcode redemption API"),
        (name = "health", description = "Service health"),
    ),
    info(
        title = "Redeem Backend API",
        version = "1.0.0",
        description = "Barcode redemption REST API documentation"
    ),
    servers(
        (url = "/api/v1", description = "Local server")
    )
)]
pub struct ApiDoc;

pub fn swagger_config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        SwaggerUi::new("/swagger-ui/{_:.*}").url("/api-docs/openapi.json", ApiDoc::openapi()),
    )
    .route(
        "/swagger-ui",
        web::get().to(|| async {
            actix_web::HttpResponse::Found()
                .append_header(("Location", "/swagger-ui/"))
                .finish()
        }),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_lists_redemption_paths() {
        let doc = ApiDoc::openapi();
        let paths: Vec<&String> = doc.paths.paths.keys().collect();
        assert!(paths.iter().any(|p| p.as_str() == "/redemptions"));
        assert!(paths.iter().any(|p| p.as_str() == "/redemptions/{id}"));
        assert!(paths.iter().any(|p| p.as_str() == "/redemptions/events"));
    }
}
