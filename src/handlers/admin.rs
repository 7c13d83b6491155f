use axum::{extract::State, http::StatusCode, response::Json, routing::post, Router};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

use super::api::{error_response, ApiError};
use crate::models::{CreateMenuRequest, DishPayload, MenuFilters};
use crate::repositories::{DishRepository, MenuRepository, TableManager, TableNames};
use crate::services::{DishService, MenuService};

/// Admin state containing services and the storage handles they sit on
#[derive(Clone)]
pub struct AdminState {
    pub menu_service: Arc<MenuService>,
    pub dish_service: Arc<DishService>,
    pub menus: Arc<dyn MenuRepository>,
    pub dishes: Arc<dyn DishRepository>,
    /// Absent when running on the in-memory backend
    pub table_manager: Option<Arc<TableManager>>,
    pub table_names: TableNames,
}

/// Response for seeding operations
#[derive(Debug, Serialize)]
pub struct SeedResponse {
    pub message: String,
    pub menus_created: usize,
    pub menus_skipped: usize,
    pub timestamp: String,
}

/// Response for cleanup operations
#[derive(Debug, Serialize)]
pub struct CleanupResponse {
    pub message: String,
    pub menus_deleted: usize,
    pub dishes_deleted: usize,
    pub timestamp: String,
}

/// Response for table setup operations
#[derive(Debug, Serialize)]
pub struct SetupTablesResponse {
    pub message: String,
    pub tables_created: Vec<String>,
    pub timestamp: String,
}

/// Create admin router with database management endpoints
pub fn create_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/api/admin/setup-tables", post(setup_tables))
        .route("/api/admin/seed", post(seed_database))
        .route("/api/admin/cleanup", post(cleanup_database))
        .with_state(state)
}

/// Create the DynamoDB tables; a no-op on the in-memory backend
#[instrument(name = "setup_tables", skip(state), fields(
    dishes_table = %state.table_names.dishes,
    menus_table = %state.table_names.menus,
))]
pub async fn setup_tables(
    State(state): State<AdminState>,
) -> Result<Json<SetupTablesResponse>, ApiError> {
    let timestamp = chrono::Utc::now().to_rfc3339();

    let Some(table_manager) = &state.table_manager else {
        info!("In-memory backend, no tables to create");
        return Ok(Json(SetupTablesResponse {
            message: "In-memory backend requires no tables".to_string(),
            tables_created: Vec::new(),
            timestamp,
        }));
    };

    match table_manager.create_all_tables(&state.table_names).await {
        Ok(tables_created) => {
            info!("Created tables: {:?}", tables_created);
            Ok(Json(SetupTablesResponse {
                message: format!("Successfully created {} tables", tables_created.len()),
                tables_created,
                timestamp,
            }))
        }
        Err(err) => {
            error!("Failed to create tables: {}", err);
            Err(error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to create tables: {}", err),
                &[],
            ))
        }
    }
}

/// Seed the sample menus; menus whose title is already taken are skipped
#[instrument(name = "seed_database", skip(state))]
pub async fn seed_database(State(state): State<AdminState>) -> Result<Json<SeedResponse>, ApiError> {
    let timestamp = chrono::Utc::now().to_rfc3339();
    let mut created = 0;
    let mut skipped = 0;
    let mut errors = Vec::new();

    for request in sample_menus() {
        match state.menus.find_by_title(&request.title).await {
            Ok(Some(_)) => {
                skipped += 1;
                continue;
            }
            Ok(None) => {}
            Err(err) => {
                errors.push(format!("{}: {}", request.title, err));
                continue;
            }
        }

        let title = request.title.clone();
        match state.menu_service.create_menu(request).await {
            Ok(menu) => {
                created += 1;
                info!(menu_id = %menu.id, "Seeded menu {}", title);
            }
            Err(err) => {
                warn!("Failed to seed menu {}: {}", title, err);
                errors.push(format!("{}: {}", title, err));
            }
        }
    }

    if !errors.is_empty() && created == 0 {
        error!("Seeding failed: {:?}", errors);
        return Err(error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to seed database: {}", errors.join("; ")),
            &[],
        ));
    }

    let message = if errors.is_empty() {
        format!("Seeded {} menus, {} already present", created, skipped)
    } else {
        format!(
            "Seeded {} menus, {} already present, {} errors occurred",
            created,
            skipped,
            errors.len()
        )
    };

    Ok(Json(SeedResponse {
        message,
        menus_created: created,
        menus_skipped: skipped,
        timestamp,
    }))
}

/// Delete every menu and dish
#[instrument(name = "cleanup_database", skip(state))]
pub async fn cleanup_database(
    State(state): State<AdminState>,
) -> Result<Json<CleanupResponse>, ApiError> {
    let timestamp = chrono::Utc::now().to_rfc3339();

    let menus = state
        .menus
        .find_all(MenuFilters::default())
        .await
        .map_err(|err| cleanup_failed("menus", err))?;
    let dishes = state
        .dishes
        .find_all()
        .await
        .map_err(|err| cleanup_failed("dishes", err))?;

    let mut menus_deleted = 0;
    let mut dishes_deleted = 0;
    let mut failures = 0;

    for menu in menus {
        match state.menu_service.delete_menu(&menu.id).await {
            Ok(()) => menus_deleted += 1,
            Err(err) => {
                warn!("Failed to delete menu {}: {}", menu.id, err);
                failures += 1;
            }
        }
    }

    // Through the service so stored images go too
    for dish in dishes {
        match state.dish_service.delete_dish(&dish.id).await {
            Ok(()) => dishes_deleted += 1,
            Err(err) => {
                warn!("Failed to delete dish {}: {}", dish.id, err);
                failures += 1;
            }
        }
    }

    info!(menus_deleted, dishes_deleted, failures, "Database cleanup finished");

    let mut message = format!(
        "Deleted {} menus and {} dishes",
        menus_deleted, dishes_deleted
    );
    if failures > 0 {
        message.push_str(&format!(", {} deletions failed", failures));
    }

    Ok(Json(CleanupResponse {
        message,
        menus_deleted,
        dishes_deleted,
        timestamp,
    }))
}

fn cleanup_failed(what: &str, err: impl std::fmt::Display) -> ApiError {
    error!("Failed to list {} for cleanup: {}", what, err);
    error_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        format!("Failed to cleanup database: {}", err),
        &[],
    )
}

fn dish(title: &str, description: &str, price: Decimal, time_minutes: i32, vegetarian: bool) -> DishPayload {
    DishPayload {
        title: title.to_string(),
        description: description.to_string(),
        price,
        time_minutes,
        vegetarian,
    }
}

fn menu(title: &str, description: &str, dishes: Vec<DishPayload>) -> CreateMenuRequest {
    CreateMenuRequest {
        title: title.to_string(),
        description: description.to_string(),
        dishes,
    }
}

fn sample_menus() -> Vec<CreateMenuRequest> {
    vec![
        menu(
            "Quick breakfast",
            "Really quick breakfast.",
            vec![
                dish("Sandwich", "Sandwich with ham", Decimal::new(400, 2), 2, false),
                dish("Coffee", "", Decimal::new(300, 2), 1, true),
            ],
        ),
        menu(
            "Sweet menu",
            "",
            vec![dish("Pancaked", "", Decimal::new(800, 2), 20, true)],
        ),
        menu(
            "French cuisine",
            "French dishes.",
            vec![
                dish("Baguette with garlic", "", Decimal::new(450, 2), 5, true),
                dish("Fresh coffee", "", Decimal::new(300, 2), 2, true),
            ],
        ),
        menu(
            "Exclusive menu card",
            "Luxury dishes.",
            vec![
                dish("Ham", "", Decimal::new(1400, 2), 35, false),
                dish("Onion soup", "", Decimal::new(1300, 2), 40, true),
            ],
        ),
    ]
}
