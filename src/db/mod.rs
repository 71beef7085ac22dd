//! Database module

pub mod connection;
pub mod filesystem;
pub mod migrations;
pub mod repositories;
pub mod schema;

pub use connection::{store_path, DbConn, JournalMode, Store};
pub use filesystem::{FilesystemClassifier, FsKind};
pub use repositories::feature::FeatureRepository;
pub use repositories::overrides::OverrideRepository;
pub use repositories::schedule::ScheduleRepository;
