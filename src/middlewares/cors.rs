use actix_cors::Cors;

/// 扫码页面与 API 不同源部署，放开跨域
pub fn create_cors() -> Cors {
    Cors::default()
        .allow_any_origin()
        .allowed_methods(vec!["GET", "POST", "DELETE", "OPTIONS"])
        .allow_any_header()
        .max_age(3600)
}
