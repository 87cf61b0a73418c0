pub mod engine;
pub mod error;
pub mod events;
pub mod models;
pub mod progress;
pub mod registry;
pub mod scheduler;
pub mod store;
