// Application layer - use cases and orchestration over the repository.

pub mod config;
pub mod error;
pub mod service;
pub mod settlement;

pub use config::*;
pub use error::*;
pub use service::*;
pub use settlement::*;
