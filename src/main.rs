use std::error::Error;
use std::sync::Arc;

use url::Url;
use warp::Filter;

use cms_backend::config::{get_variable, DatabaseConfig, StorageConfig};
use cms_backend::db;
use cms_backend::environment::{Config, Environment};
use cms_backend::routes;
use cms_backend::store;
use cms_backend::taxonomy::TaxonomyCache;
use log::{info, initialize_logger};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenv::dotenv().ok();

    let logger = initialize_logger();

    let port: u16 = get_variable("CMS_PORT")
        .parse()
        .expect("parse CMS_PORT as u16");

    info!(logger, "Starting..."; "port" => port);
    let logger = Arc::new(logger);

    let database_config = DatabaseConfig::from_env();
    let storage_config = StorageConfig::from_env();

    info!(logger, "Connecting backends...");
    let db = db::from_config(&database_config).expect("initialize database backend");
    let store = store::from_config(&storage_config).expect("initialize storage backend");

    let taxonomy_url =
        Url::parse(&get_variable("CMS_TAXONOMY_BASE_URL")).expect("parse CMS_TAXONOMY_BASE_URL");
    let taxonomy = Arc::new(TaxonomyCache::new(taxonomy_url));

    let config = Config::from_env();
    let environment = Environment::new(logger.clone(), db, store, taxonomy, config);

    let upload_route = routes::make_upload_route(environment.clone());
    let audio_route = routes::make_audio_route(environment.clone());
    let raw_audio_route = routes::make_raw_audio_route(environment.clone());
    let taxonomy_route = routes::make_taxonomy_route(environment.clone());
    let create_task_route = routes::make_create_task_route(environment.clone());
    let request_task_route = routes::make_request_task_route(environment.clone());
    let submit_route = routes::make_submit_route(environment);

    let logger2 = logger.clone();
    let routes = upload_route
        .or(audio_route)
        .or(raw_audio_route)
        .or(taxonomy_route)
        .or(create_task_route)
        .or(request_task_route)
        .or(submit_route)
        .recover(move |r| routes::format_rejection(logger2.clone(), r));

    let (_, server) = warp::serve(routes).bind_with_graceful_shutdown(([0, 0, 0, 0], port), async {
        tokio::signal::ctrl_c().await.ok();
    });

    server.await;

    info!(logger, "Exiting gracefully...");

    Ok(())
}
