//! Record store backends for the server.

mod postgres;

pub use postgres::PostgresRecordStore;
