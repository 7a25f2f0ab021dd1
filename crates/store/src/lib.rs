pub mod error;
pub mod schema;
pub mod sqlite;
pub mod store;

pub use error::StoreError;
pub use schema::{Direction, Transaction};
pub use sqlite::SqliteStore;
pub use store::TransactionStore;
