// Common types and utilities shared across domains

pub mod entity_ids;
pub mod id;
pub mod in_flight;

pub use entity_ids::*;
pub use id::Id;
pub use in_flight::InFlight;
