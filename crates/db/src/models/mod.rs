//! Row types returned by the repositories.

pub mod entity_summary;
pub mod revision;
