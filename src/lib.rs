#![forbid(unsafe_code)]

//! Shared building blocks for the fetchtube binaries: the yt-dlp engine
//! wrapper, format catalog and fetch planning, artifact resolution, and the
//! deferred cleanup of finished downloads.

pub mod artifact;
pub mod catalog;
pub mod cleanup;
pub mod config;
pub mod cookies;
pub mod engine;
pub mod error;
pub mod logging;
pub mod plan;
pub mod service;
