// src/config/mod.rs
pub mod ingest;

pub use ingest::{
    load_config_default, load_config_from, FareConfig, IngestConfig, RecoveryConfig,
    SearchConfig, SinkConfig, SinkKind,
};
