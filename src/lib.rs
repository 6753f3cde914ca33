pub mod balance;
pub mod config;
pub mod error;
pub mod exchange;
pub mod routes;
pub mod schemas;
pub mod store;
pub mod summary;
