// src/config/mod.rs

//! Configuration loading and validation for pipedag.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a config file from disk (`loader.rs`).
//! - Validate invariants like graph correctness and per-kind task fields
//!   (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{default_config_path, load_and_validate, load_from_path, load_with_fs};
pub use model::{
    ConfigFile, ConnectorsSection, DefaultSection, FlowStage, PipelineSection, RawConfigFile,
    TaskConfig, parse_duration,
};
