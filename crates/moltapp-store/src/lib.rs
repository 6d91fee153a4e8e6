pub mod error;
pub mod schema;
pub mod sqlite;
pub mod store;

pub use error::StoreError;
pub use sqlite::SqliteRoundStore;
pub use store::RoundStore;
