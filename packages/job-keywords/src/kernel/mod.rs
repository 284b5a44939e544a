//! Kernel module - infrastructure traits, adapters, and test doubles.

pub mod deps;
pub mod notifications;
pub mod test_dependencies;
pub mod traits;

pub use deps::{AppDeps, SupabaseAdapter};
pub use notifications::{Level, Notification, NotificationHub};
pub use test_dependencies::TestDependencies;
pub use traits::*;
