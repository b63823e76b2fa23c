//! Alert persistence: the [`traits::AlertStore`] seam and its SQLite and
//! in-memory implementations.

pub mod error;
pub mod memory;
pub mod sqlite;
pub mod traits;

pub use memory::InMemoryAlertStore;
pub use sqlite::SqliteAlertStore;
pub use error::PersistenceError;
#[cfg(test)]
pub use traits::MockAlertStore;
pub use traits::AlertStore;
