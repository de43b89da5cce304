//! Database connection, table definitions and schema verification

pub mod init;
pub mod schema;

pub use init::*;
pub use schema::*;
