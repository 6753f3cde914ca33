use std::io;

use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use opensplit_events::{config::Config, routes, store::Store};
use tracing_subscriber::EnvFilter;

fn cors(config: &Config) -> Cors {
    if config.allows_any_origin() {
        return Cors::permissive();
    }
    config
        .cors_origins
        .iter()
        .fold(Cors::default(), |cors, origin| cors.allowed_origin(origin))
        .allow_any_method()
        .allow_any_header()
}

#[actix_web::main]
async fn main() -> io::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config =
        Config::from_env().map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))?;
    tracing::info!(database = %config.database, "using the OpenSplit database");

    let store = Store::connect(&config).await.map_err(io::Error::other)?;
    store.ensure_indexes().await.map_err(io::Error::other)?;
    tracing::info!(bind = %config.bind, "listening");

    let bind = config.bind;
    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .wrap(cors(&config))
            .app_data(web::Data::new(store.clone()))
            .configure(routes::configure)
    })
    .bind(bind)?
    .run()
    .await
}
