pub mod bootstrap;
pub mod bot;
pub mod chain;
pub mod config;
pub mod curve;
pub mod database;
pub mod error;
pub mod events;
pub mod ingest;
pub mod models;
pub mod position;
pub mod relay;
pub mod rpc;
pub mod strategy;

pub use bot::SniperBot;
pub use config::BotConfig;
pub use events::BotEvent;
pub use models::*;
