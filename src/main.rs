use hyper::Server;
use hyper::service::{make_service_fn, service_fn};
use std::convert::Infallible;
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
mod codec;
mod config;
mod error;
mod handlers;
mod models;
mod profile;
mod services;
mod utils;
use config::AppConfig;
use handlers::ImageHandler;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config = AppConfig::from_env();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let addr = config.server_address().parse()?;
    let handler = Arc::new(ImageHandler::new(&config));

    let make_svc = make_service_fn(move |_conn| {
        let handler = Arc::clone(&handler);
        async move {
            Ok::<_, Infallible>(service_fn(move |req| {
                let handler = Arc::clone(&handler);
                async move { handler.handle_http_request(req).await }
            }))
        }
    });

    let server = Server::bind(&addr).serve(make_svc);

    tracing::info!(
        address = %addr,
        max_upload_mb = config.compression.max_upload_size / (1024 * 1024),
        default_quality = profile::DEFAULT_QUALITY,
        "image compressor listening, POST /compress with multipart/form-data"
    );

    if let Err(e) = server.await {
        tracing::error!(error = %e, "server error");
    }

    Ok(())
}
