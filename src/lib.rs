pub mod cities;
pub mod config;
pub mod dispatch;
pub mod extract;
pub mod matcher;
pub mod models;
pub mod monitor;
pub mod scrapers;
pub mod store;
pub mod telegram;
