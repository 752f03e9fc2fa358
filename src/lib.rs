//! Zone fill tracking, report lifecycle, collection scheduling and
//! achievements for a municipal waste collection service.

pub mod config;
pub mod db {
    pub mod models;
}
pub mod domain;
pub mod engine;
pub mod error;
pub mod notify;
pub mod schema;
pub mod services {
    pub mod seed;
}
pub mod store;

pub use engine::{Engine, EngineSettings};
pub use error::{EngineError, StoreError};
