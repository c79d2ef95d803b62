pub mod types;
pub mod mapping;
pub mod exchange;
pub mod scheduler;
pub mod utils;
pub mod error;
pub mod config;
pub mod observability;
pub mod interfaces;
pub mod storage;
pub mod controls;

pub use error::{Error, Result};
