// src/config/ingest.rs
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fs};

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::ingest::fusion::FusionOptions;
use crate::ingest::recovery::CooldownPolicy;
use crate::ingest::sink::DEFAULT_DELIMITER;
use crate::ingest::types::GeoPoint;

const ENV_PATH: &str = "INGEST_CONFIG_PATH";
pub const ENV_TWITTER_TOKEN: &str = "TWITTER_BEARER_TOKEN";
pub const ENV_UBER_TOKEN: &str = "UBER_SERVER_TOKEN";

// San Francisco, ~50 miles around it.
const DEFAULT_LAT: f64 = 37.773972;
const DEFAULT_LON: f64 = -122.431297;
const DEFAULT_RADIUS_KM: u32 = 85;
const MAX_PAGE_SIZE: u32 = 100;

fn env_marker() -> String {
    "ENV".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub base_url: String,
    /// "ENV" means: read from TWITTER_BEARER_TOKEN
    pub bearer_token: String,
    pub latitude: f64,
    pub longitude: f64,
    pub radius_km: u32,
    pub page_size: u32,
    pub timeout_secs: u64,
    /// Replay a saved search response instead of calling the API.
    pub fixture_path: Option<PathBuf>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            base_url: crate::ingest::providers::twitter::DEFAULT_BASE_URL.to_string(),
            bearer_token: env_marker(),
            latitude: DEFAULT_LAT,
            longitude: DEFAULT_LON,
            radius_km: DEFAULT_RADIUS_KM,
            page_size: MAX_PAGE_SIZE,
            timeout_secs: 15,
            fixture_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FareConfig {
    pub base_url: String,
    /// "ENV" means: read from UBER_SERVER_TOKEN
    pub server_token: String,
    pub timeout_secs: u64,
    pub concurrency: usize,
    pub fixture_path: Option<PathBuf>,
}

impl Default for FareConfig {
    fn default() -> Self {
        Self {
            base_url: crate::ingest::providers::uber::DEFAULT_BASE_URL.to_string(),
            server_token: env_marker(),
            timeout_secs: 10,
            concurrency: 1,
            fixture_path: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    File,
    Http,
    Firehose,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    pub kind: SinkKind,
    pub path: Option<PathBuf>,
    pub url: Option<String>,
    pub stream_name: Option<String>,
    pub region: Option<String>,
    pub delimiter: String,
    pub timeout_secs: u64,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            kind: SinkKind::File,
            path: Some(PathBuf::from("data/ubertweets.jsonl")),
            url: None,
            stream_name: None,
            region: None,
            delimiter: DEFAULT_DELIMITER.to_string(),
            timeout_secs: 10,
        }
    }
}

impl SinkConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    pub rate_limit_cooldown_secs: u64,
    pub transient_cooldown_secs: u64,
    pub poll_interval_secs: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            rate_limit_cooldown_secs: 61 * 15,
            transient_cooldown_secs: 61 * 15,
            poll_interval_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct IngestConfig {
    pub search: SearchConfig,
    pub fares: FareConfig,
    pub sink: SinkConfig,
    pub recovery: RecoveryConfig,
    /// Replace non-ASCII characters in tweet text with `?`.
    pub ascii_text: bool,
    pub cursor_state_path: Option<PathBuf>,
    /// e.g. "0.0.0.0:9100"; no metrics endpoint when unset.
    pub metrics_addr: Option<String>,
}

impl IngestConfig {
    /// Clamp values into usable ranges, falling back to defaults.
    pub fn sanitize(&mut self) {
        let s = &mut self.search;
        if !GeoPoint::new(s.latitude, s.longitude).is_valid() {
            s.latitude = DEFAULT_LAT;
            s.longitude = DEFAULT_LON;
        }
        if s.radius_km == 0 {
            s.radius_km = DEFAULT_RADIUS_KM;
        }
        if s.page_size == 0 || s.page_size > MAX_PAGE_SIZE {
            s.page_size = MAX_PAGE_SIZE;
        }
        if s.timeout_secs == 0 {
            s.timeout_secs = SearchConfig::default().timeout_secs;
        }
        if self.fares.concurrency == 0 {
            self.fares.concurrency = 1;
        }
        if self.fares.timeout_secs == 0 {
            self.fares.timeout_secs = FareConfig::default().timeout_secs;
        }
        if self.sink.delimiter.is_empty() {
            self.sink.delimiter = DEFAULT_DELIMITER.to_string();
        }
        if self.sink.timeout_secs == 0 {
            self.sink.timeout_secs = SinkConfig::default().timeout_secs;
        }
        if self.recovery.poll_interval_secs == 0 {
            self.recovery.poll_interval_secs = 1;
        }
    }

    /// Resolve "ENV" credentials for the upstreams that are actually called.
    pub fn resolve_credentials(&mut self) -> Result<()> {
        if self.search.fixture_path.is_none() {
            self.search.bearer_token = resolve_secret(&self.search.bearer_token, ENV_TWITTER_TOKEN)?;
        }
        if self.fares.fixture_path.is_none() {
            self.fares.server_token = resolve_secret(&self.fares.server_token, ENV_UBER_TOKEN)?;
        }
        Ok(())
    }

    pub fn center(&self) -> GeoPoint {
        GeoPoint::new(self.search.latitude, self.search.longitude)
    }

    pub fn fusion_options(&self) -> FusionOptions {
        FusionOptions {
            enrich_timeout: Duration::from_secs(self.fares.timeout_secs),
            sink_timeout: self.sink.timeout(),
            enrich_concurrency: self.fares.concurrency,
            ascii_text: self.ascii_text,
            delimiter: self.sink.delimiter.clone(),
        }
    }

    pub fn cooldown_policy(&self) -> CooldownPolicy {
        CooldownPolicy {
            rate_limited: Duration::from_secs(self.recovery.rate_limit_cooldown_secs),
            transient: Duration::from_secs(self.recovery.transient_cooldown_secs),
            poll_interval: Duration::from_secs(self.recovery.poll_interval_secs),
        }
    }
}

fn resolve_secret(value: &str, var: &str) -> Result<String> {
    let v = value.trim();
    if v.is_empty() || v.eq_ignore_ascii_case("env") {
        let from_env = env::var(var).map_err(|_| anyhow!("Missing {var} env var"))?;
        if from_env.trim().is_empty() {
            bail!("{var} is set but empty");
        }
        return Ok(from_env.trim().to_string());
    }
    Ok(v.to_string())
}

/// Load config from an explicit path. Supports TOML or JSON formats.
pub fn load_config_from(path: &Path) -> Result<IngestConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading ingest config from {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    let mut cfg = parse_config(&content, ext.as_str())
        .with_context(|| format!("parsing ingest config {}", path.display()))?;
    cfg.sanitize();
    Ok(cfg)
}

/// Load config using env var + fallbacks:
/// 1) $INGEST_CONFIG_PATH
/// 2) config/ingest.toml
/// 3) config/ingest.json
/// 4) built-in defaults
pub fn load_config_default() -> Result<IngestConfig> {
    if let Ok(p) = env::var(ENV_PATH) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return load_config_from(&pb);
        } else {
            return Err(anyhow!("INGEST_CONFIG_PATH points to non-existent path"));
        }
    }
    let toml_p = PathBuf::from("config/ingest.toml");
    if toml_p.exists() {
        return load_config_from(&toml_p);
    }
    let json_p = PathBuf::from("config/ingest.json");
    if json_p.exists() {
        return load_config_from(&json_p);
    }
    Ok(IngestConfig::default())
}

fn parse_config(s: &str, hint_ext: &str) -> Result<IngestConfig> {
    if hint_ext == "json" || s.trim_start().starts_with('{') {
        return Ok(serde_json::from_str(s)?);
    }
    Ok(toml::from_str(s)?)
}
