pub mod sqlite;

pub use sqlite::{ReviewStore, StorageError};
