pub mod config;
pub mod connectivity;
pub mod extractor;
pub mod loader;
pub mod locator;
pub mod models;
pub mod normalizer;
pub mod notifier;
pub mod product_manager;
pub mod scheduler;
pub mod state_machine;
pub mod store;
pub mod utils;

// Re-export commonly used types
pub use config::AppConfig;
pub use scheduler::ProductScheduler;
pub use utils::error::AppError;

pub type Result<T> = std::result::Result<T, AppError>;
