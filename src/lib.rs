pub mod agent;
pub mod config;
pub mod kernel;
pub mod paths;
pub mod services;
pub mod settings;
pub mod store;

// Re-export specific items for convenient access
pub use agent::TelemetryAgent;
pub use config::AgentConfig;
