//! OAuth credential records and the shared loading ladder:
//! inline base64, then an explicit file path, then a provider default path.

use std::path::PathBuf;

use aigate_common::{decode_base64, expand_home, util::home_dir};
use serde::Deserialize;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::adapter::{AdapterError, AdapterResult};

/// Token record shared by the Gemini and Qwen CLIs (`oauth_creds.json`).
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthTokens {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Expiry as unix milliseconds.
    #[serde(default)]
    pub expiry_date: Option<i64>,
}

impl OAuthTokens {
    /// Within `window_secs` of expiry (or past it). Tokens without an
    /// expiry never count as stale.
    pub fn expires_within(&self, window_secs: i64) -> bool {
        match self.expiry_date {
            Some(expiry_ms) => {
                let now_ms = OffsetDateTime::now_utc().unix_timestamp() * 1000;
                expiry_ms <= now_ms + window_secs * 1000
            }
            None => false,
        }
    }
}

/// Kiro desktop credential file (`kiro-auth-token.json`).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KiroTokens {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub profile_arn: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub auth_method: Option<String>,
    /// RFC3339 timestamp.
    #[serde(default)]
    pub expires_at: Option<String>,
}

impl KiroTokens {
    pub fn expires_at_time(&self) -> Option<OffsetDateTime> {
        self.expires_at
            .as_deref()
            .and_then(|raw| OffsetDateTime::parse(raw, &Rfc3339).ok())
    }
}

/// Resolve raw credential bytes: base64 wins, then the explicit file, then
/// the default path. `Ok(None)` means no source produced anything.
pub fn load_credential_bytes(
    inline_base64: Option<&str>,
    file_path: Option<&str>,
    default_path: Option<PathBuf>,
) -> AdapterResult<Option<Vec<u8>>> {
    if let Some(encoded) = inline_base64.filter(|value| !value.trim().is_empty()) {
        let decoded = decode_base64(encoded)
            .map_err(|err| AdapterError::Config(format!("invalid base64 credentials: {err}")))?;
        return Ok(Some(decoded));
    }
    let path = match file_path.filter(|value| !value.trim().is_empty()) {
        Some(path) => Some(expand_home(path)),
        None => default_path,
    };
    let Some(path) = path else {
        return Ok(None);
    };
    match std::fs::read(&path) {
        Ok(data) => Ok(Some(data)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(AdapterError::Config(format!(
            "failed to read credentials file {}: {err}",
            path.display()
        ))),
    }
}

pub fn parse_credentials<T: serde::de::DeserializeOwned>(data: &[u8]) -> AdapterResult<T> {
    serde_json::from_slice(data)
        .map_err(|err| AdapterError::Config(format!("failed to parse credentials: {err}")))
}

pub fn gemini_default_creds_path() -> Option<PathBuf> {
    home_dir().map(|home| home.join(".gemini").join("oauth_creds.json"))
}

pub fn qwen_default_creds_path() -> Option<PathBuf> {
    home_dir().map(|home| home.join(".qwen").join("oauth_creds.json"))
}

pub fn kiro_default_creds_path() -> Option<PathBuf> {
    home_dir().map(|home| {
        home.join(".aws")
            .join("sso")
            .join("cache")
            .join("kiro-auth-token.json")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base64_source_wins_over_files() {
        let bytes = load_credential_bytes(
            Some("eyJhY2Nlc3NfdG9rZW4iOiJ0In0="),
            Some("/definitely/not/a/file.json"),
            None,
        )
        .unwrap()
        .unwrap();
        let tokens: OAuthTokens = parse_credentials(&bytes).unwrap();
        assert_eq!(tokens.access_token, "t");
    }

    #[test]
    fn missing_sources_yield_none() {
        let result = load_credential_bytes(None, None, None).unwrap();
        assert!(result.is_none());
        let result =
            load_credential_bytes(None, Some("/no/such/creds.json"), None).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn invalid_base64_is_a_config_error() {
        let err = load_credential_bytes(Some("%%%"), None, None).unwrap_err();
        assert!(matches!(err, AdapterError::Config(_)));
    }

    #[test]
    fn expiry_window_checks_milliseconds() {
        let now_ms = OffsetDateTime::now_utc().unix_timestamp() * 1000;
        let fresh = OAuthTokens {
            access_token: "t".to_string(),
            refresh_token: None,
            expiry_date: Some(now_ms + 3_600_000),
        };
        assert!(!fresh.expires_within(300));
        let stale = OAuthTokens {
            access_token: "t".to_string(),
            refresh_token: None,
            expiry_date: Some(now_ms + 60_000),
        };
        assert!(stale.expires_within(300));
    }

    #[test]
    fn kiro_tokens_parse_the_desktop_file_shape() {
        let tokens: KiroTokens = parse_credentials(
            br#"{"accessToken":"a","refreshToken":"r","clientId":"c","region":"eu-west-1",
                "authMethod":"social","profileArn":"arn:aws:x","expiresAt":"2030-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(tokens.access_token.as_deref(), Some("a"));
        assert_eq!(tokens.region.as_deref(), Some("eu-west-1"));
        assert!(tokens.expires_at_time().is_some());
    }
}
