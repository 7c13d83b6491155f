// Repositories module - data access layer

pub mod dish_repository;
mod dynamodb;
pub mod memory;
pub mod menu_repository;
pub mod metered;
pub mod table_manager;

#[cfg(test)]
mod tests;

pub use dish_repository::{DishRepository, DynamoDbDishRepository};
pub use memory::InMemoryStore;
pub use menu_repository::{DynamoDbMenuRepository, MenuRepository};
pub use metered::{MeteredDishRepository, MeteredMenuRepository};
pub use table_manager::{TableManager, TableNames};
