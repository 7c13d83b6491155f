// Re-export all model types
pub use self::dish::*;
pub use self::errors::*;
pub use self::menu::*;
pub use self::validation::*;

mod dish;
mod errors;
mod menu;
mod validation;
