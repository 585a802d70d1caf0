use std::collections::HashMap;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

/// Top-level configuration (`denidin.toml` + `DENIDIN_*` env overrides).
///
/// Everything under `transport` and
/// `llm` describes *credentials* for the external collaborators — the core
/// never interprets their values beyond passing them to the concrete
/// adapter a deployment chooses to wire in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeniDinConfig {
    #[serde(default)]
    pub transport: TransportConfig,
    pub llm: LlmConfig,
    #[serde(default)]
    pub log_level: LogLevel,
    pub data_root: String,
    pub memory: MemoryConfig,
    #[serde(default)]
    pub feature_flags: FeatureFlags,
    #[serde(default)]
    pub user_roles: UserRolesConfig,
    pub constitution: ConstitutionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TransportConfig {
    /// Green-API-style instance id, or any provider-specific account handle.
    pub instance_id: Option<String>,
    pub api_token: Option<String>,
    /// Name the pipeline matches against in group-chat mentions.
    #[serde(default = "default_assistant_name")]
    pub assistant_name: String,
}

fn default_assistant_name() -> String {
    "DeniDin".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub ai_model: String,
    #[serde(default = "default_reply_max_tokens")]
    pub ai_reply_max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_reply_max_tokens() -> u32 {
    1024
}

fn default_temperature() -> f32 {
    0.7
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    #[default]
    Info,
    Debug,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    pub session: SessionConfig,
    pub longterm: LongtermConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_session_storage_dir")]
    pub storage_dir: String,
    #[serde(default = "default_timeout_hours")]
    pub session_timeout_hours: u32,
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_seconds: u64,
    /// Role name (lowercase, e.g. "client") → token budget override.
    /// Unlisted roles fall back to `denidin_users::Role`'s built-in default.
    #[serde(default)]
    pub max_tokens_by_role: HashMap<String, u64>,
}

fn default_session_storage_dir() -> String {
    "sessions".to_string()
}

fn default_timeout_hours() -> u32 {
    24
}

fn default_cleanup_interval() -> u64 {
    3600
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LongtermConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default = "default_memory_storage_dir")]
    pub storage_dir: String,
    pub embedding_model: String,
    #[serde(default = "default_collection_name")]
    pub collection_name: String,
    #[serde(default = "default_top_k")]
    pub top_k_results: usize,
    #[serde(default = "default_min_similarity")]
    pub min_similarity: f64,
}

fn bool_true() -> bool {
    true
}

fn default_memory_storage_dir() -> String {
    "memory".to_string()
}

fn default_collection_name() -> String {
    "system_context".to_string()
}

fn default_top_k() -> usize {
    5
}

fn default_min_similarity() -> f64 {
    0.2
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureFlags {
    #[serde(default = "bool_true")]
    pub enable_memory_system: bool,
    #[serde(default = "bool_true")]
    pub enable_rbac: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            enable_memory_system: true,
            enable_rbac: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UserRolesConfig {
    #[serde(default)]
    pub admin_phones: Vec<String>,
    #[serde(default)]
    pub blocked_phones: Vec<String>,
    pub godfather_phone: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConstitutionConfig {
    pub file: String,
}

impl DeniDinConfig {
    /// Load config from a TOML file with `DENIDIN_*` env var overrides,
    /// then validate it. Missing required credentials or out-of-range
    /// numerics return `ConfigError::Invalid`.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: DeniDinConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("DENIDIN_").split("__"))
            .extract()
            .map_err(|e| ConfigError::Load(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let mut missing = Vec::new();
        if is_blank(&self.transport.instance_id) {
            missing.push("transport.instance_id");
        }
        if is_blank(&self.transport.api_token) {
            missing.push("transport.api_token");
        }
        if is_blank(&self.llm.api_key) {
            missing.push("llm.api_key");
        }
        if !missing.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "missing required credentials: {}",
                missing.join(", ")
            )));
        }

        if self.data_root.trim().is_empty() {
            return Err(ConfigError::Invalid("data_root must not be empty".into()));
        }
        if self.llm.ai_reply_max_tokens < 1 {
            return Err(ConfigError::Invalid(
                "llm.ai_reply_max_tokens must be >= 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.llm.temperature) {
            return Err(ConfigError::Invalid(
                "llm.temperature must be within [0.0, 1.0]".into(),
            ));
        }
        if self.memory.session.session_timeout_hours == 0 {
            return Err(ConfigError::Invalid(
                "memory.session.session_timeout_hours must be > 0".into(),
            ));
        }
        if self.memory.session.cleanup_interval_seconds == 0 {
            return Err(ConfigError::Invalid(
                "memory.session.cleanup_interval_seconds must be > 0".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.memory.longterm.min_similarity) {
            return Err(ConfigError::Invalid(
                "memory.longterm.min_similarity must be within [0.0, 1.0]".into(),
            ));
        }
        Ok(())
    }
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map(str::trim).unwrap_or("").is_empty()
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.denidin/denidin.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_minimal_toml(dir: &tempfile::TempDir) -> String {
        let path = dir.path().join("denidin.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        write!(
            f,
            r#"
data_root = "/tmp/denidin-data"

[transport]
instance_id = "1234567890"
api_token = "abcdef123456"

[llm]
api_key = "sk-test123"
ai_model = "gpt-4o-mini"

[memory.session]

[memory.longterm]
embedding_model = "text-embedding-3-small"

[constitution]
file = "/tmp/constitution.md"
"#
        )
        .unwrap();
        path.to_string_lossy().to_string()
    }

    #[test]
    fn loads_minimal_config_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_minimal_toml(&dir);
        let config = DeniDinConfig::load(Some(&path)).expect("should load");
        assert_eq!(config.memory.session.session_timeout_hours, 24);
        assert_eq!(config.memory.longterm.top_k_results, 5);
        assert_eq!(config.transport.assistant_name, "DeniDin");
    }

    #[test]
    fn rejects_out_of_range_temperature() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("denidin.toml");
        std::fs::write(
            &path,
            r#"
data_root = "/tmp/denidin-data"

[transport]
instance_id = "1234567890"
api_token = "abcdef123456"

[llm]
api_key = "sk-test123"
ai_model = "gpt-4o-mini"
temperature = 1.5

[memory.session]

[memory.longterm]
embedding_model = "text-embedding-3-small"

[constitution]
file = "/tmp/constitution.md"
"#,
        )
        .unwrap();
        let err = DeniDinConfig::load(Some(path.to_str().unwrap())).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_missing_credentials_and_names_each_one() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("denidin.toml");
        std::fs::write(
            &path,
            r#"
data_root = "/tmp/denidin-data"

[llm]
ai_model = "gpt-4o-mini"

[memory.session]

[memory.longterm]
embedding_model = "text-embedding-3-small"

[constitution]
file = "/tmp/constitution.md"
"#,
        )
        .unwrap();
        let err = DeniDinConfig::load(Some(path.to_str().unwrap())).unwrap_err();
        match err {
            ConfigError::Invalid(message) => {
                assert!(message.contains("transport.instance_id"));
                assert!(message.contains("transport.api_token"));
                assert!(message.contains("llm.api_key"));
            }
            other => panic!("expected ConfigError::Invalid, got {other:?}"),
        }
    }
}
