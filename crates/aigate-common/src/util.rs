use std::path::PathBuf;

use base64::Engine;

/// Expand a leading `~/` to the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

pub fn home_dir() -> Option<PathBuf> {
    #[cfg(windows)]
    let var = std::env::var_os("USERPROFILE");
    #[cfg(not(windows))]
    let var = std::env::var_os("HOME");
    var.map(PathBuf::from)
}

pub fn decode_base64(encoded: &str) -> Result<Vec<u8>, base64::DecodeError> {
    base64::engine::general_purpose::STANDARD.decode(encoded.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expand_home_leaves_plain_paths_alone() {
        assert_eq!(expand_home("/etc/creds.json"), PathBuf::from("/etc/creds.json"));
        assert_eq!(expand_home("relative.json"), PathBuf::from("relative.json"));
    }

    #[test]
    fn decode_base64_round_trips() {
        let decoded = decode_base64("eyJhIjoxfQ==").unwrap();
        assert_eq!(decoded, b"{\"a\":1}");
    }
}
