pub mod agent;
pub mod build_info;
pub mod clock;
pub mod commands;
pub mod config;
pub mod engine;
pub mod error;
pub mod git;
pub mod guard;
pub mod logging;
pub mod model;
pub mod notify;
pub mod output;
pub mod pattern;
pub mod reaper;
pub mod rpc;
pub mod server;
pub mod service;
pub mod store;

pub use error::{LeaseError, Result};
pub use service::{LeaseService, ReserveRequest};
