pub mod database;
pub mod error;
pub mod messages;
pub mod ratings;
mod row_helpers;
pub mod schema;
pub mod sessions;

pub use database::Database;
pub use error::StoreError;
