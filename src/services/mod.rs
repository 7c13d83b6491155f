// Services module - business logic layer

pub mod digest_service;
pub mod dish_service;
pub mod image_storage;
pub mod menu_service;

pub use digest_service::{DigestService, EmailMessage, LogMailer, Mailer};
pub use dish_service::DishService;
pub use image_storage::{ImageStorage, LocalImageStorage};
pub use menu_service::MenuService;
