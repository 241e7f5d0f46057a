pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod models;
pub mod sanitize;
pub mod services;
pub mod storage;
