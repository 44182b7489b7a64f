//! Configuration for the wyrld simulation core.
//!
//! Loadable from `wyrld.toml`; every field has a serde default so partial
//! files work.

use serde::{Deserialize, Serialize};

/// Top-level configuration, loadable from TOML.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WyrldConfig {
    /// Tick simulator tuning.
    #[serde(default)]
    pub simulation: SimulationConfig,
    /// Content cache and admission control.
    #[serde(default)]
    pub cache: CacheConfig,
    /// Oracle backend selection (consumed by `wyrld-llm`).
    #[serde(default)]
    pub oracle: OracleConfig,
    /// Storage adapter settings.
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

impl WyrldConfig {
    /// Load configuration from a TOML string.
    ///
    /// # Errors
    /// Returns [`WorldError::Config`](crate::WorldError::Config) if the TOML
    /// is invalid.
    pub fn from_toml(toml_str: &str) -> crate::error::Result<Self> {
        toml::from_str(toml_str).map_err(|e| crate::WorldError::Config(e.to_string()))
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// World tick simulator tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Granularity of one sub-step in world minutes. A tick longer than
    /// this is split so probability rolls scale with elapsed time.
    #[serde(default = "default_step_minutes")]
    pub step_minutes: u64,
    /// Hard cap on minutes a single tick may advance.
    #[serde(default = "default_max_tick_minutes")]
    pub max_tick_minutes: u64,
    /// Chance per full sub-step that an NPC does anything at all.
    #[serde(default = "default_npc_activity_chance")]
    pub npc_activity_chance: f64,
    /// Fraction of the activity roll that resolves to a move.
    #[serde(default = "default_npc_move_chance")]
    pub npc_move_chance: f64,
    /// Fraction of the activity roll that resolves to socialising.
    #[serde(default = "default_npc_social_chance")]
    pub npc_social_chance: f64,
    /// Base chance per full sub-step of an ambient event.
    #[serde(default = "default_ambient_base_chance")]
    pub ambient_base_chance: f64,
    /// Ambient chance bonus per crisis level.
    #[serde(default = "default_crisis_event_bonus")]
    pub crisis_event_bonus: f64,
    /// Base factor of the crisis escalation probability.
    #[serde(default = "default_crisis_escalation_base")]
    pub crisis_escalation_base: f64,
    /// Chance per full sub-step that a region's weather shifts.
    #[serde(default = "default_weather_shift_chance")]
    pub weather_shift_chance: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            step_minutes: 30,
            max_tick_minutes: 480,
            npc_activity_chance: 0.3,
            npc_move_chance: 0.5,
            npc_social_chance: 0.2,
            ambient_base_chance: 0.1,
            crisis_event_bonus: 0.05,
            crisis_escalation_base: 0.02,
            weather_shift_chance: 0.1,
        }
    }
}

/// Content cache and oracle admission control.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of cache entries; least-recently-used entries are
    /// evicted past this.
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// Jaccard similarity threshold for reusing near-matching content.
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
    /// Whether the similarity fallback path is enabled at all.
    #[serde(default = "default_true")]
    pub reuse_similar: bool,
    /// TTL for location descriptions, seconds.
    #[serde(default = "default_ttl_location")]
    pub ttl_location_secs: u64,
    /// TTL for route descriptions, seconds.
    #[serde(default = "default_ttl_location")]
    pub ttl_route_secs: u64,
    /// TTL for NPC biographies, seconds.
    #[serde(default = "default_ttl_npc")]
    pub ttl_npc_secs: u64,
    /// TTL for narration, seconds. Short: narration is context-bound.
    #[serde(default = "default_ttl_narrative")]
    pub ttl_narrative_secs: u64,
    /// TTL for everything else, seconds.
    #[serde(default = "default_ttl_default")]
    pub ttl_default_secs: u64,
    /// Maximum oracle calls per minute across the process.
    #[serde(default = "default_max_calls_per_minute")]
    pub max_calls_per_minute: usize,
    /// Minimum spacing between consecutive oracle calls, milliseconds.
    #[serde(default = "default_min_call_interval_ms")]
    pub min_call_interval_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 1000,
            similarity_threshold: 0.8,
            reuse_similar: true,
            ttl_location_secs: 7200,
            ttl_route_secs: 7200,
            ttl_npc_secs: 1800,
            ttl_narrative_secs: 300,
            ttl_default_secs: 3600,
            max_calls_per_minute: 20,
            min_call_interval_ms: 100,
        }
    }
}

/// Oracle backend selection. The core only carries these values;
/// `wyrld-llm` interprets them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleConfig {
    /// Provider: "ollama", "openai", "none".
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Base URL of the backend API.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// API key for OpenAI-compatible backends.
    #[serde(default)]
    pub api_key: String,
    /// Model name.
    #[serde(default = "default_model")]
    pub model: String,
    /// Per-request timeout, milliseconds. A timeout surfaces as a failed
    /// generation, never a partial write.
    #[serde(default = "default_oracle_timeout_ms")]
    pub timeout_ms: u64,
    /// Retries inside the collaborator (0 = single attempt). The core
    /// itself never retries.
    #[serde(default)]
    pub max_retries: u32,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            provider: "ollama".to_string(),
            base_url: "http://localhost:11434".to_string(),
            api_key: String::new(),
            model: "llama3.2:3b".to_string(),
            timeout_ms: 8000,
            max_retries: 0,
        }
    }
}

/// Storage adapter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Enable WAL journaling on the SQLite adapter.
    #[serde(default = "default_true")]
    pub wal_mode: bool,
    /// SQLite busy timeout, milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// Directory for blob-store session snapshots.
    #[serde(default = "default_save_dir")]
    pub save_dir: String,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            wal_mode: true,
            busy_timeout_ms: 5000,
            save_dir: "saves".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// serde defaults
// ---------------------------------------------------------------------------

fn default_true() -> bool {
    true
}
fn default_step_minutes() -> u64 {
    30
}
fn default_max_tick_minutes() -> u64 {
    480
}
fn default_npc_activity_chance() -> f64 {
    0.3
}
fn default_npc_move_chance() -> f64 {
    0.5
}
fn default_npc_social_chance() -> f64 {
    0.2
}
fn default_ambient_base_chance() -> f64 {
    0.1
}
fn default_crisis_event_bonus() -> f64 {
    0.05
}
fn default_crisis_escalation_base() -> f64 {
    0.02
}
fn default_weather_shift_chance() -> f64 {
    0.1
}
fn default_capacity() -> usize {
    1000
}
fn default_similarity_threshold() -> f32 {
    0.8
}
fn default_ttl_location() -> u64 {
    7200
}
fn default_ttl_npc() -> u64 {
    1800
}
fn default_ttl_narrative() -> u64 {
    300
}
fn default_ttl_default() -> u64 {
    3600
}
fn default_max_calls_per_minute() -> usize {
    20
}
fn default_min_call_interval_ms() -> u64 {
    100
}
fn default_provider() -> String {
    "ollama".to_string()
}
fn default_base_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_model() -> String {
    "llama3.2:3b".to_string()
}
fn default_oracle_timeout_ms() -> u64 {
    8000
}
fn default_busy_timeout_ms() -> u64 {
    5000
}
fn default_save_dir() -> String {
    "saves".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_gives_defaults() {
        let config = WyrldConfig::from_toml("").expect("empty config");
        assert_eq!(config.simulation.step_minutes, 30);
        assert_eq!(config.cache.capacity, 1000);
        assert!((config.cache.similarity_threshold - 0.8).abs() < f32::EPSILON);
    }

    #[test]
    fn partial_toml_overrides() {
        let config = WyrldConfig::from_toml(
            "[simulation]\nstep_minutes = 15\n\n[cache]\ncapacity = 64\n",
        )
        .expect("partial config");
        assert_eq!(config.simulation.step_minutes, 15);
        assert_eq!(config.cache.capacity, 64);
        assert_eq!(config.simulation.max_tick_minutes, 480);
    }

    #[test]
    fn invalid_toml_is_config_error() {
        assert!(WyrldConfig::from_toml("not = [valid").is_err());
    }
}
