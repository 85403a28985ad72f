pub mod base;
pub mod clock;
pub mod diff;
pub mod error;
pub mod ids;
pub mod overlay;
pub mod status;

pub use error::CoreError;
pub use ids::*;
pub use status::{CustomizationStatus, MigrationStatus};
