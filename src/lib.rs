pub mod config;
pub mod error;
pub mod event;
pub mod network;
pub mod service;

pub use error::{ChatError, DecodeError, Result};
