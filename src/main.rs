use actix_web::{web, App, HttpServer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod app;
mod model;
mod retriever;
mod service;

use app::AppState;
use model::Config;

fn init_tracing(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.logging.level.clone().into());

    if config.logging.format == "json_line" {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .flatten_event(true)
                    .with_current_span(false),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    // Load .env file if present (ignore if missing)
    let _ = dotenvy::dotenv();

    let config = Config::from_env();
    init_tracing(&config);

    let bind_addr = config.bind_addr();

    let state = AppState::new(config).unwrap_or_else(|e| {
        tracing::error!(error = %e, "Service initialization failed");
        std::process::exit(1);
    });

    let pipeline = web::Data::new(state.pipeline);
    let rate_limiter = web::Data::new(state.rate_limiter);
    let health = web::Data::new(state.health);

    tracing::info!("Starting patent-intel server on {}", bind_addr);

    HttpServer::new(move || {
        App::new()
            .app_data(pipeline.clone())
            .app_data(rate_limiter.clone())
            .app_data(health.clone())
            .service(web::scope("/api").configure(api::analyze::configure))
            .configure(api::health::configure)
            .configure(api::openapi::configure)
    })
    .bind(&bind_addr)?
    .run()
    .await
}
