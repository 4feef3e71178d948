pub mod cli;
pub mod config;
pub mod error;
pub mod executor;
pub mod job;
pub mod pipeline;
pub mod policy;
pub mod probe;
pub mod progress;
pub mod report;
pub mod scheduler;
pub mod util;
