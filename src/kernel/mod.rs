pub mod aggregator;
pub mod event;
pub mod metrics;
pub mod permission;
pub mod policy;
pub mod record;
pub mod scheduler;
pub mod time;
