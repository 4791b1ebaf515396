use serde::{Deserialize, Serialize};

/// Backend provider identifier.
///
/// The wire form is the canonical id string (`openai-custom`, ...); the
/// prefix up to the first hyphen names the protocol the backend speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Provider {
    #[serde(rename = "openai-custom")]
    OpenAICustom,
    #[serde(rename = "claude-custom")]
    ClaudeCustom,
    #[serde(rename = "gemini-cli-oauth")]
    GeminiCliOauth,
    #[serde(rename = "claude-kiro-oauth")]
    ClaudeKiroOauth,
    #[serde(rename = "openai-qwen-oauth")]
    OpenAIQwenOauth,
}

/// Wire schema spoken on one side of a translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    OpenAI,
    Claude,
    Gemini,
}

impl Provider {
    pub const ALL: [Provider; 5] = [
        Provider::OpenAICustom,
        Provider::ClaudeCustom,
        Provider::GeminiCliOauth,
        Provider::ClaudeKiroOauth,
        Provider::OpenAIQwenOauth,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::OpenAICustom => "openai-custom",
            Provider::ClaudeCustom => "claude-custom",
            Provider::GeminiCliOauth => "gemini-cli-oauth",
            Provider::ClaudeKiroOauth => "claude-kiro-oauth",
            Provider::OpenAIQwenOauth => "openai-qwen-oauth",
        }
    }

    /// Case-insensitive parse of a provider id, yielding the canonical form.
    pub fn parse(value: &str) -> Option<Provider> {
        let value = value.trim();
        Provider::ALL
            .into_iter()
            .find(|provider| provider.as_str().eq_ignore_ascii_case(value))
    }

    /// The schema this backend speaks, derived from the id prefix.
    pub fn protocol(&self) -> Protocol {
        match protocol_prefix(self.as_str()) {
            "claude" => Protocol::Claude,
            "gemini" => Protocol::Gemini,
            _ => Protocol::OpenAI,
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::OpenAI => "openai",
            Protocol::Claude => "claude",
            Protocol::Gemini => "gemini",
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The prefix of a provider id up to the first hyphen.
///
/// This is the sole rule by which the gateway decides which schema a
/// backend speaks.
pub fn protocol_prefix(provider_id: &str) -> &str {
    match provider_id.find('-') {
        Some(idx) => &provider_id[..idx],
        None => provider_id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_rule_names_the_protocol() {
        assert_eq!(protocol_prefix("openai-custom"), "openai");
        assert_eq!(protocol_prefix("claude-kiro-oauth"), "claude");
        assert_eq!(protocol_prefix("gemini-cli-oauth"), "gemini");
        assert_eq!(protocol_prefix("bare"), "bare");
    }

    #[test]
    fn every_provider_maps_to_its_prefix_protocol() {
        assert_eq!(Provider::OpenAICustom.protocol(), Protocol::OpenAI);
        assert_eq!(Provider::OpenAIQwenOauth.protocol(), Protocol::OpenAI);
        assert_eq!(Provider::ClaudeCustom.protocol(), Protocol::Claude);
        assert_eq!(Provider::ClaudeKiroOauth.protocol(), Protocol::Claude);
        assert_eq!(Provider::GeminiCliOauth.protocol(), Protocol::Gemini);
    }

    #[test]
    fn parse_is_case_insensitive_and_canonical() {
        assert_eq!(
            Provider::parse(" Claude-Custom "),
            Some(Provider::ClaudeCustom)
        );
        assert_eq!(Provider::parse("unknown-thing"), None);
    }
}
