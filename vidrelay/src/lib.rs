//! vidrelay: fetch remote videos, transcode them through a codec fallback
//! chain and publish the result, as pollable background jobs.

pub mod acquisition;
pub mod api;
pub mod config;
pub mod domain;
pub mod error;
pub mod jobs;
pub mod logging;
pub mod media;
pub mod pipeline;
pub mod publish;
pub mod services;
pub mod transcode;
pub mod utils;

pub use error::{Error, Result};
