pub mod engine;
mod fetchers;
pub mod progress;
pub mod tasks;
