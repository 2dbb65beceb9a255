use actix_web::{App, HttpServer, middleware::Logger, web};
use chrono::Local; // timestamp in log lines
use env_logger::{Env, Target};
use std::io::Write; // for env_logger custom formatter
use std::sync::Arc;

use redeem_backend::{
    config::Config,
    database::{create_pool, run_migrations},
    handlers,
    middlewares::create_cors,
    services::RedemptionService,
    store::{MemoryRecordStore, PgRecordStore, RecordStore},
    swagger::swagger_config,
    utils::BarcodePolicy,
};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .format(|buf, record| {
            let ts = Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z");
            let level = record.level().as_str().to_ascii_lowercase();
            let msg_json = serde_json::to_string(&format!("{}", record.args()))
                .unwrap_or_else(|_| "\"<invalid utf8>\"".to_string());
            writeln!(
                buf,
                "{{\"timestamp\":\"{}\",\"level\":\"{}\",\"message\":{},\"target\":\"{}\"}}",
                ts,
                level,
                msg_json,
                record.target(),
            )
        })
        .target(Target::Stdout)
        .init();

    // 加载配置
    let config = Config::from_toml()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {e}"))?;

    let policy = BarcodePolicy::from_config(&config.barcode)?;

    // 选择存储后端
    let store: Arc<dyn RecordStore> = if config.database.is_memory() {
        log::warn!("Using in-memory redemption store, records are lost on restart");
        Arc::new(MemoryRecordStore::new())
    } else {
        let pool = create_pool(&config.database).await?;
        run_migrations(&pool).await?;
        Arc::new(PgRecordStore::new(pool))
    };

    let redemption_service = RedemptionService::new(store, policy);
    let sync_config = config.sync.clone();

    log::info!(
        "Starting HTTP server at {}:{}",
        config.server.host,
        config.server.port
    );

    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .wrap(create_cors())
            .app_data(web::Data::new(redemption_service.clone()))
            .app_data(web::Data::new(sync_config.clone()))
            .configure(swagger_config)
            .service(
                web::scope("/api/v1")
                    .configure(handlers::health_config)
                    .configure(handlers::redemption_config),
            )
    })
    .bind((config.server.host.as_str(), config.server.port))?
    .run()
    .await?;

    Ok(())
}
