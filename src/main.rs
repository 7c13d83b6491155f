use axum::{routing::get, Router};
use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use menucard_rs::{
    create_app,
    handlers::{metrics_handler, AuthState},
    init_observability,
    observability::DatabaseTracingMiddleware,
    repositories::{
        DishRepository, DynamoDbDishRepository, DynamoDbMenuRepository, InMemoryStore,
        MenuRepository, MeteredDishRepository, MeteredMenuRepository, TableManager, TableNames,
    },
    services::{DigestService, ImageStorage, LocalImageStorage, LogMailer},
    shutdown_observability, AppComponents, Config, Metrics, StorageBackend,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_environment().await?;
    init_observability(&config.observability)?;

    info!(
        "Starting {} v{}",
        config.observability.service_name, config.observability.service_version
    );

    let metrics = Arc::new(Metrics::new()?);

    let table_names = TableNames {
        dishes: config.database.dishes_table_name.clone(),
        menus: config.database.menus_table_name.clone(),
        unique_keys: config.database.unique_keys_table_name.clone(),
    };

    let (menus, dishes, table_manager): (
        Arc<dyn MenuRepository>,
        Arc<dyn DishRepository>,
        Option<Arc<TableManager>>,
    ) = match config.database.backend {
        StorageBackend::Memory => {
            info!("Using in-memory storage");
            let store = Arc::new(InMemoryStore::new());
            (store.clone(), store, None)
        }
        StorageBackend::Dynamodb => {
            info!(
                "DynamoDB tables: dishes={}, menus={}, unique_keys={}",
                table_names.dishes, table_names.menus, table_names.unique_keys
            );
            let client = Arc::new(config.aws.dynamodb_client.clone());
            let tracer = DatabaseTracingMiddleware::new(metrics.clone());

            let dishes = DynamoDbDishRepository::new(
                client.clone(),
                table_names.dishes.clone(),
                table_names.menus.clone(),
                table_names.unique_keys.clone(),
                config.database.region.clone(),
            );
            let menus = DynamoDbMenuRepository::new(
                client.clone(),
                table_names.menus.clone(),
                table_names.dishes.clone(),
                table_names.unique_keys.clone(),
                config.database.region.clone(),
            );

            (
                Arc::new(MeteredMenuRepository::new(
                    Arc::new(menus),
                    tracer.clone(),
                    table_names.menus.clone(),
                )),
                Arc::new(MeteredDishRepository::new(
                    Arc::new(dishes),
                    tracer,
                    table_names.dishes.clone(),
                )),
                Some(Arc::new(TableManager::new(client))),
            )
        }
    };

    let images: Arc<dyn ImageStorage> =
        Arc::new(LocalImageStorage::new(config.storage.upload_dir.clone()));

    let tokens = config
        .auth
        .resolve_tokens(&config.aws.parameter_store)
        .await;
    if tokens.is_empty() {
        warn!("No API tokens configured, write endpoints will reject every request");
    }

    let scheduler = config.mail.digest_enabled.then(|| {
        let digest = Arc::new(
            DigestService::new(dishes.clone(), Arc::new(LogMailer), &config.mail)
                .with_metrics(metrics.clone()),
        );
        info!(hour = config.mail.digest_hour, "Daily digest scheduled");
        digest.spawn_scheduler(config.mail.digest_hour)
    });

    let components = AppComponents::new(
        menus,
        dishes,
        images,
        &config.storage.media_url,
        metrics.clone(),
    )
    .with_tables(table_manager, table_names)
    .with_auth(AuthState::new(tokens));

    let app = create_app(components, &config.server, &config.storage);

    if config.observability.metrics_port != config.server.port {
        let metrics_addr = SocketAddr::new(
            config.server.host.parse()?,
            config.observability.metrics_port,
        );
        let metrics_app = Router::new()
            .route("/metrics", get(metrics_handler))
            .with_state(metrics);
        let metrics_listener = TcpListener::bind(metrics_addr).await?;
        info!("Metrics listening on {}", metrics_addr);
        tokio::spawn(async move {
            if let Err(e) = axum::serve(metrics_listener, metrics_app).await {
                error!("Metrics server failed: {}", e);
            }
        });
    }

    let addr = SocketAddr::new(config.server.host.parse()?, config.server.port);
    let listener = TcpListener::bind(addr).await?;
    info!("Server listening on {}", addr);

    let shutdown_signal = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
        }
        info!("Shutdown signal received");
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    if let Some(scheduler) = scheduler {
        scheduler.abort();
        info!("Daily digest stopped");
    }

    shutdown_observability().await;
    info!("Server shutdown complete");
    Ok(())
}
