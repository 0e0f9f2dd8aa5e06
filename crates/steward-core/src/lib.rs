pub mod adapter;
pub mod audit;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod executor;
pub mod http_adapter;
pub mod io;
pub mod lock;
pub mod paths;
pub mod plan;
pub mod remediation;
pub mod resource;
pub mod retry;
pub mod schema;
pub mod watch;

pub use error::{Result, StewardError};
