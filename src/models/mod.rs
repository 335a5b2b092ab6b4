pub mod notification;
pub mod price;
pub mod product;
pub mod snapshot;

// Re-exports for convenience
pub use notification::*;
pub use price::*;
pub use product::*;
pub use snapshot::*;
