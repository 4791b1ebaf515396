use serde::{Deserialize, Serialize};
use time::format_description::FormatItem;
use time::macros::format_description;
use time::OffsetDateTime;
use tracing::warn;

use crate::provider::Provider;
use crate::util::expand_home;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemPromptMode {
    Overwrite,
    Append,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptLogMode {
    None,
    Console,
    File,
}

impl std::str::FromStr for SystemPromptMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "overwrite" => Ok(SystemPromptMode::Overwrite),
            "append" => Ok(SystemPromptMode::Append),
            other => Err(format!("unknown system prompt mode: {other}")),
        }
    }
}

impl std::str::FromStr for PromptLogMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "none" => Ok(PromptLogMode::None),
            "console" => Ok(PromptLogMode::Console),
            "file" => Ok(PromptLogMode::File),
            other => Err(format!("unknown prompt log mode: {other}")),
        }
    }
}

/// Final, merged gateway configuration.
///
/// Built from a [`ConfigPatch`] after the CLI > config.json > defaults merge;
/// immutable afterwards. Per-request provider overrides clone this record.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub required_api_key: String,
    /// Primary backend; first entry of `default_providers`.
    pub model_provider: Provider,
    pub default_providers: Vec<Provider>,
    pub openai_api_key: Option<String>,
    pub openai_base_url: Option<String>,
    pub claude_api_key: Option<String>,
    pub claude_base_url: Option<String>,
    pub gemini_oauth_creds_base64: Option<String>,
    pub gemini_oauth_creds_file: Option<String>,
    pub kiro_oauth_creds_base64: Option<String>,
    pub kiro_oauth_creds_file: Option<String>,
    pub qwen_oauth_creds_file: Option<String>,
    pub project_id: Option<String>,
    pub system_prompt_file: String,
    pub system_prompt_mode: SystemPromptMode,
    /// Loaded from `system_prompt_file` at bootstrap; empty when absent.
    pub system_prompt_content: String,
    pub prompt_log_mode: PromptLogMode,
    pub prompt_log_base_name: String,
    /// Stamped once per process when file logging is enabled.
    pub prompt_log_file: Option<String>,
    pub request_max_retries: u32,
    pub request_base_delay_ms: u64,
    pub cron_near_minutes: u64,
    pub cron_refresh_token: bool,
    pub provider_pools_file: Option<String>,
    /// Set when this config was overlaid from a pool entry.
    pub pool_uuid: Option<String>,
}

/// One merge layer of configuration.
///
/// Deserializes from the `config.json` key scheme; the CLI produces another
/// patch which is overlaid on top (CLI wins).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigPatch {
    #[serde(rename = "HOST")]
    pub host: Option<String>,
    #[serde(rename = "SERVER_PORT")]
    pub port: Option<u16>,
    #[serde(rename = "REQUIRED_API_KEY")]
    pub required_api_key: Option<String>,
    /// Comma-separated provider list; first entry is the primary.
    #[serde(rename = "MODEL_PROVIDER")]
    pub model_provider: Option<String>,
    #[serde(rename = "OPENAI_API_KEY")]
    pub openai_api_key: Option<String>,
    #[serde(rename = "OPENAI_BASE_URL")]
    pub openai_base_url: Option<String>,
    #[serde(rename = "CLAUDE_API_KEY")]
    pub claude_api_key: Option<String>,
    #[serde(rename = "CLAUDE_BASE_URL")]
    pub claude_base_url: Option<String>,
    #[serde(rename = "GEMINI_OAUTH_CREDS_BASE64")]
    pub gemini_oauth_creds_base64: Option<String>,
    #[serde(rename = "GEMINI_OAUTH_CREDS_FILE_PATH")]
    pub gemini_oauth_creds_file: Option<String>,
    #[serde(rename = "KIRO_OAUTH_CREDS_BASE64")]
    pub kiro_oauth_creds_base64: Option<String>,
    #[serde(rename = "KIRO_OAUTH_CREDS_FILE_PATH")]
    pub kiro_oauth_creds_file: Option<String>,
    #[serde(rename = "QWEN_OAUTH_CREDS_FILE_PATH")]
    pub qwen_oauth_creds_file: Option<String>,
    #[serde(rename = "PROJECT_ID")]
    pub project_id: Option<String>,
    #[serde(rename = "SYSTEM_PROMPT_FILE_PATH")]
    pub system_prompt_file: Option<String>,
    #[serde(rename = "SYSTEM_PROMPT_MODE")]
    pub system_prompt_mode: Option<SystemPromptMode>,
    #[serde(rename = "PROMPT_LOG_MODE")]
    pub prompt_log_mode: Option<PromptLogMode>,
    #[serde(rename = "PROMPT_LOG_BASE_NAME")]
    pub prompt_log_base_name: Option<String>,
    #[serde(rename = "REQUEST_MAX_RETRIES")]
    pub request_max_retries: Option<u32>,
    #[serde(rename = "REQUEST_BASE_DELAY")]
    pub request_base_delay_ms: Option<u64>,
    #[serde(rename = "CRON_NEAR_MINUTES")]
    pub cron_near_minutes: Option<u64>,
    #[serde(rename = "CRON_REFRESH_TOKEN")]
    pub cron_refresh_token: Option<bool>,
    #[serde(rename = "PROVIDER_POOLS_FILE_PATH")]
    pub provider_pools_file: Option<String>,
}

const LOG_STAMP: &[FormatItem<'static>] =
    format_description!("[year][month][day]-[hour][minute][second]");

impl ConfigPatch {
    /// Load the optional `config.json` next to the working directory.
    pub fn from_config_json(path: &str) -> Result<Option<ConfigPatch>, ConfigError> {
        let data = match std::fs::read(path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(ConfigError::Read {
                    path: path.to_string(),
                    source: err,
                })
            }
        };
        let patch = serde_json::from_slice(&data).map_err(|err| ConfigError::Parse {
            path: path.to_string(),
            source: err,
        })?;
        Ok(Some(patch))
    }

    /// Take `other`'s values wherever they are set.
    pub fn overlay(&mut self, other: ConfigPatch) {
        macro_rules! take {
            ($($field:ident),* $(,)?) => {
                $(if other.$field.is_some() {
                    self.$field = other.$field;
                })*
            };
        }
        take!(
            host,
            port,
            required_api_key,
            model_provider,
            openai_api_key,
            openai_base_url,
            claude_api_key,
            claude_base_url,
            gemini_oauth_creds_base64,
            gemini_oauth_creds_file,
            kiro_oauth_creds_base64,
            kiro_oauth_creds_file,
            qwen_oauth_creds_file,
            project_id,
            system_prompt_file,
            system_prompt_mode,
            prompt_log_mode,
            prompt_log_base_name,
            request_max_retries,
            request_base_delay_ms,
            cron_near_minutes,
            cron_refresh_token,
            provider_pools_file,
        );
    }

    /// Apply defaults, normalise the provider list, load the system prompt
    /// and stamp the prompt-log filename.
    pub fn into_config(self) -> Config {
        let default_providers = normalize_providers(self.model_provider.as_deref());
        let model_provider = default_providers[0];

        let system_prompt_file = self
            .system_prompt_file
            .unwrap_or_else(|| "input_system_prompt.txt".to_string());
        let system_prompt_content = load_system_prompt(&system_prompt_file);

        let prompt_log_mode = self.prompt_log_mode.unwrap_or(PromptLogMode::None);
        let prompt_log_base_name = self
            .prompt_log_base_name
            .unwrap_or_else(|| "prompt_log".to_string());
        let prompt_log_file = match prompt_log_mode {
            PromptLogMode::File => {
                let stamp = OffsetDateTime::now_utc()
                    .format(LOG_STAMP)
                    .unwrap_or_default();
                Some(format!("{prompt_log_base_name}-{stamp}.log"))
            }
            _ => None,
        };

        Config {
            host: self.host.unwrap_or_else(|| "localhost".to_string()),
            port: self.port.unwrap_or(3000),
            required_api_key: self.required_api_key.unwrap_or_else(|| "123456".to_string()),
            model_provider,
            default_providers,
            openai_api_key: self.openai_api_key,
            openai_base_url: self.openai_base_url,
            claude_api_key: self.claude_api_key,
            claude_base_url: self.claude_base_url,
            gemini_oauth_creds_base64: self.gemini_oauth_creds_base64,
            gemini_oauth_creds_file: self.gemini_oauth_creds_file,
            kiro_oauth_creds_base64: self.kiro_oauth_creds_base64,
            kiro_oauth_creds_file: self.kiro_oauth_creds_file,
            qwen_oauth_creds_file: self.qwen_oauth_creds_file,
            project_id: self.project_id,
            system_prompt_file,
            system_prompt_mode: self.system_prompt_mode.unwrap_or(SystemPromptMode::Overwrite),
            system_prompt_content,
            prompt_log_mode,
            prompt_log_base_name,
            prompt_log_file,
            request_max_retries: self.request_max_retries.unwrap_or(3),
            request_base_delay_ms: self.request_base_delay_ms.unwrap_or(1000),
            cron_near_minutes: self.cron_near_minutes.unwrap_or(15).max(1),
            cron_refresh_token: self.cron_refresh_token.unwrap_or(true),
            provider_pools_file: self.provider_pools_file,
            pool_uuid: None,
        }
    }
}

/// Split, trim, validate and deduplicate the configured provider list.
///
/// Unknown entries are dropped with a warning; an empty result falls back to
/// `gemini-cli-oauth`.
fn normalize_providers(raw: Option<&str>) -> Vec<Provider> {
    let mut providers = Vec::new();
    for entry in raw.unwrap_or_default().split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        match Provider::parse(entry) {
            Some(provider) if !providers.contains(&provider) => providers.push(provider),
            Some(_) => {}
            None => warn!(provider = entry, "unknown model provider, entry ignored"),
        }
    }
    if providers.is_empty() {
        providers.push(Provider::GeminiCliOauth);
    }
    providers
}

fn load_system_prompt(path: &str) -> String {
    let expanded = expand_home(path);
    match std::fs::read_to_string(&expanded) {
        Ok(content) if !content.trim().is_empty() => content,
        Ok(_) => String::new(),
        Err(err) => {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!(path, error = %err, "failed to read system prompt file");
            }
            String::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_values() {
        let config = ConfigPatch::default().into_config();
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 3000);
        assert_eq!(config.required_api_key, "123456");
        assert_eq!(config.model_provider, Provider::GeminiCliOauth);
        assert_eq!(config.request_max_retries, 3);
        assert_eq!(config.request_base_delay_ms, 1000);
        assert_eq!(config.cron_near_minutes, 15);
        assert!(config.cron_refresh_token);
        assert_eq!(config.system_prompt_mode, SystemPromptMode::Overwrite);
        assert_eq!(config.prompt_log_mode, PromptLogMode::None);
        assert!(config.prompt_log_file.is_none());
    }

    #[test]
    fn overlay_prefers_the_upper_layer() {
        let mut base = ConfigPatch {
            port: Some(3000),
            openai_api_key: Some("file-key".to_string()),
            ..ConfigPatch::default()
        };
        base.overlay(ConfigPatch {
            port: Some(8080),
            ..ConfigPatch::default()
        });
        assert_eq!(base.port, Some(8080));
        assert_eq!(base.openai_api_key.as_deref(), Some("file-key"));
    }

    #[test]
    fn provider_list_is_normalized_and_deduplicated() {
        let providers =
            normalize_providers(Some("Claude-Custom, bogus, openai-custom ,claude-custom"));
        assert_eq!(
            providers,
            vec![Provider::ClaudeCustom, Provider::OpenAICustom]
        );
    }

    #[test]
    fn empty_provider_list_falls_back_to_gemini() {
        assert_eq!(normalize_providers(None), vec![Provider::GeminiCliOauth]);
        assert_eq!(normalize_providers(Some(" , ")), vec![Provider::GeminiCliOauth]);
    }

    #[test]
    fn file_log_mode_stamps_a_filename() {
        let config = ConfigPatch {
            prompt_log_mode: Some(PromptLogMode::File),
            prompt_log_base_name: Some("gw".to_string()),
            ..ConfigPatch::default()
        }
        .into_config();
        let name = config.prompt_log_file.unwrap();
        assert!(name.starts_with("gw-"));
        assert!(name.ends_with(".log"));
    }

    #[test]
    fn config_json_keys_deserialize() {
        let patch: ConfigPatch = serde_json::from_str(
            r#"{
                "SERVER_PORT": 4100,
                "MODEL_PROVIDER": "claude-custom",
                "CLAUDE_API_KEY": "sk-test",
                "CRON_REFRESH_TOKEN": false
            }"#,
        )
        .unwrap();
        assert_eq!(patch.port, Some(4100));
        assert_eq!(patch.model_provider.as_deref(), Some("claude-custom"));
        assert_eq!(patch.cron_refresh_token, Some(false));
        let config = patch.into_config();
        assert_eq!(config.model_provider, Provider::ClaudeCustom);
        assert!(!config.cron_refresh_token);
    }
}
