use axum::{
    extract::DefaultBodyLimit,
    http::{header, Method},
    middleware,
    routing::get,
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::{
    default_dishes_table, default_menus_table, default_unique_keys_table, ServerConfig,
    StorageConfig,
};
use crate::handlers::{
    create_admin_router, create_api_router, health_check, metrics_handler,
    request_validation_middleware, require_api_token, security_headers_middleware, AdminState,
    ApiState, AuthState, RequestLimits,
};
use crate::observability::{observability_middleware, Metrics};
use crate::repositories::{DishRepository, MenuRepository, TableManager, TableNames};
use crate::services::{DishService, ImageStorage, MenuService};

/// Everything the HTTP surface needs, wired over one pair of repositories
#[derive(Clone)]
pub struct AppComponents {
    pub metrics: Arc<Metrics>,
    pub api: ApiState,
    pub admin: AdminState,
    pub auth: AuthState,
}

impl AppComponents {
    pub fn new(
        menus: Arc<dyn MenuRepository>,
        dishes: Arc<dyn DishRepository>,
        images: Arc<dyn ImageStorage>,
        media_url: &str,
        metrics: Arc<Metrics>,
    ) -> Self {
        let menu_service = Arc::new(
            MenuService::new(menus.clone(), dishes.clone(), media_url)
                .with_metrics(metrics.clone()),
        );
        let dish_service = Arc::new(
            DishService::new(dishes.clone(), images, media_url).with_metrics(metrics.clone()),
        );

        Self {
            metrics,
            api: ApiState {
                menu_service: menu_service.clone(),
                dish_service: dish_service.clone(),
            },
            admin: AdminState {
                menu_service,
                dish_service,
                menus,
                dishes,
                table_manager: None,
                table_names: TableNames {
                    dishes: default_dishes_table(),
                    menus: default_menus_table(),
                    unique_keys: default_unique_keys_table(),
                },
            },
            auth: AuthState::default(),
        }
    }

    pub fn with_tables(mut self, manager: Option<Arc<TableManager>>, names: TableNames) -> Self {
        self.admin.table_manager = manager;
        self.admin.table_names = names;
        self
    }

    pub fn with_auth(mut self, auth: AuthState) -> Self {
        self.auth = auth;
        self
    }
}

/// Build the application router
pub fn create_app(components: AppComponents, server: &ServerConfig, storage: &StorageConfig) -> Router {
    let AppComponents {
        metrics,
        api,
        admin,
        auth,
    } = components;
    let metrics_for_middleware = metrics.clone();

    let protected = create_api_router(api, server.max_upload_size)
        .merge(create_admin_router(admin))
        .route_layer(middleware::from_fn_with_state(auth, require_api_token));

    let mut app = Router::new()
        .route("/health/status", get(health_check))
        .route("/metrics", get(metrics_handler))
        .with_state(metrics)
        .merge(protected);

    // Only a path-style media URL is served locally; anything else points at a CDN
    let media_path = storage.media_url.trim_end_matches('/');
    if media_path.starts_with('/') && !media_path.is_empty() {
        app = app.nest_service(media_path, ServeDir::new(&storage.upload_dir));
    }

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .max_age(Duration::from_secs(86400));

    // Outer to inner: trace, observability, timeout, validation, cors, security headers
    app.layer(DefaultBodyLimit::max(server.max_request_size))
        .layer(middleware::from_fn(security_headers_middleware))
        .layer(cors)
        .layer(middleware::from_fn_with_state(
            RequestLimits::new(server.max_request_size),
            request_validation_middleware,
        ))
        .layer(TimeoutLayer::new(server.request_timeout()))
        .layer(middleware::from_fn(move |req, next| {
            observability_middleware(metrics_for_middleware.clone(), req, next)
        }))
        .layer(TraceLayer::new_for_http())
}
