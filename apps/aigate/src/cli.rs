use aigate_common::{ConfigPatch, PromptLogMode, SystemPromptMode};
use clap::Parser;

/// Command-line flags. Every flag is optional; set flags override
/// `config.json`, which overrides the built-in defaults.
#[derive(Parser)]
#[command(name = "aigate", about = "Multi-protocol AI gateway")]
pub(crate) struct Cli {
    /// Server listening address.
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Server listening port.
    #[arg(long)]
    pub(crate) port: Option<u16>,
    /// API key clients must present.
    #[arg(long = "api-key")]
    pub(crate) api_key: Option<String>,
    /// Comma-separated provider list; the first entry is the primary.
    #[arg(long = "model-provider")]
    pub(crate) model_provider: Option<String>,

    #[arg(long = "openai-api-key")]
    pub(crate) openai_api_key: Option<String>,
    #[arg(long = "openai-base-url")]
    pub(crate) openai_base_url: Option<String>,
    #[arg(long = "claude-api-key")]
    pub(crate) claude_api_key: Option<String>,
    #[arg(long = "claude-base-url")]
    pub(crate) claude_base_url: Option<String>,

    /// Gemini OAuth credentials as a base64 string.
    #[arg(long = "gemini-oauth-creds-base64")]
    pub(crate) gemini_oauth_creds_base64: Option<String>,
    /// Gemini OAuth credentials file path.
    #[arg(long = "gemini-oauth-creds-file")]
    pub(crate) gemini_oauth_creds_file: Option<String>,
    /// Google Cloud project id.
    #[arg(long = "project-id")]
    pub(crate) project_id: Option<String>,

    #[arg(long = "kiro-oauth-creds-base64")]
    pub(crate) kiro_oauth_creds_base64: Option<String>,
    #[arg(long = "kiro-oauth-creds-file")]
    pub(crate) kiro_oauth_creds_file: Option<String>,
    #[arg(long = "qwen-oauth-creds-file")]
    pub(crate) qwen_oauth_creds_file: Option<String>,

    /// System prompt file path.
    #[arg(long = "system-prompt-file")]
    pub(crate) system_prompt_file: Option<String>,
    /// System prompt mode: overwrite or append.
    #[arg(long = "system-prompt-mode")]
    pub(crate) system_prompt_mode: Option<SystemPromptMode>,

    /// Prompt logging mode: none, console or file.
    #[arg(long = "log-prompts")]
    pub(crate) log_prompts: Option<PromptLogMode>,
    /// Base name for prompt log files.
    #[arg(long = "prompt-log-base-name")]
    pub(crate) prompt_log_base_name: Option<String>,

    /// Max retries for backend requests.
    #[arg(long = "request-max-retries")]
    pub(crate) request_max_retries: Option<u32>,
    /// Base retry delay in milliseconds.
    #[arg(long = "request-base-delay")]
    pub(crate) request_base_delay: Option<u64>,

    /// Interval of the token-refresh task in minutes.
    #[arg(long = "cron-near-minutes")]
    pub(crate) cron_near_minutes: Option<u64>,
    /// Enable the automatic token-refresh task.
    #[arg(long = "cron-refresh-token")]
    pub(crate) cron_refresh_token: Option<bool>,

    /// Provider pools configuration file path.
    #[arg(long = "provider-pools-file")]
    pub(crate) provider_pools_file: Option<String>,
}

impl Cli {
    pub(crate) fn into_patch(self) -> ConfigPatch {
        ConfigPatch {
            host: self.host,
            port: self.port,
            required_api_key: self.api_key,
            model_provider: self.model_provider,
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
            system_prompt_file: self.system_prompt_file,
            system_prompt_mode: self.system_prompt_mode,
            prompt_log_mode: self.log_prompts,
            prompt_log_base_name: self.prompt_log_base_name,
            request_max_retries: self.request_max_retries,
            request_base_delay_ms: self.request_base_delay,
            cron_near_minutes: self.cron_near_minutes,
            cron_refresh_token: self.cron_refresh_token,
            provider_pools_file: self.provider_pools_file,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_nothing_when_absent() {
        let cli = Cli::parse_from(["aigate"]);
        let patch = cli.into_patch();
        assert!(patch.host.is_none());
        assert!(patch.model_provider.is_none());
        assert!(patch.cron_refresh_token.is_none());
    }

    #[test]
    fn flags_land_in_the_patch() {
        let cli = Cli::parse_from([
            "aigate",
            "--port",
            "4000",
            "--model-provider",
            "claude-custom,openai-custom",
            "--claude-api-key",
            "sk-x",
            "--system-prompt-mode",
            "append",
            "--log-prompts",
            "console",
            "--cron-refresh-token",
            "false",
        ]);
        let patch = cli.into_patch();
        assert_eq!(patch.port, Some(4000));
        assert_eq!(
            patch.model_provider.as_deref(),
            Some("claude-custom,openai-custom")
        );
        assert_eq!(patch.claude_api_key.as_deref(), Some("sk-x"));
        assert_eq!(patch.system_prompt_mode, Some(SystemPromptMode::Append));
        assert_eq!(patch.prompt_log_mode, Some(PromptLogMode::Console));
        assert_eq!(patch.cron_refresh_token, Some(false));
    }
}
