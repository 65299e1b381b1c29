pub mod config;
pub mod events;
pub mod health;
pub mod metrics;
pub mod stats;
