pub mod alerts;
pub mod clock;
pub mod config;
pub mod db;
pub mod directory;
pub mod error;
pub mod geo_index;
pub mod kafka;
pub mod models;
pub mod processor;
pub mod store;
