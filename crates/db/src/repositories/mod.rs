//! Repository layer.
//!
//! Each repository holds a pool handle and implements one capability trait
//! from `castle-core`.

pub mod entity_summary_repo;
pub mod field_repo;
pub mod permission_repo;
pub mod preference_repo;
pub mod revision_repo;
pub mod search_repo;

pub use entity_summary_repo::EntitySummaryRepo;
pub use field_repo::{ColumnFieldSource, SlugUniquenessValidator};
pub use permission_repo::PermissionPolicy;
pub use preference_repo::PreferenceRepo;
pub use revision_repo::RevisionRepo;
pub use search_repo::WeightedColumnIndex;
