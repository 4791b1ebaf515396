//! Conversation logging: timestamped INPUT/OUTPUT records to the console
//! or an append-mode file stamped once per process.

use std::path::PathBuf;
use std::sync::Arc;

use aigate_common::{Config, PromptLogMode};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::io::AsyncWriteExt;
use tracing::warn;

#[derive(Clone)]
pub struct PromptLogger {
    mode: PromptLogMode,
    file: Option<Arc<PathBuf>>,
}

impl PromptLogger {
    pub fn from_config(config: &Config) -> Self {
        Self {
            mode: config.prompt_log_mode,
            file: config
                .prompt_log_file
                .as_ref()
                .map(|name| Arc::new(PathBuf::from(name))),
        }
    }

    pub fn disabled() -> Self {
        Self {
            mode: PromptLogMode::None,
            file: None,
        }
    }

    pub async fn log_input(&self, text: &str) {
        self.write("INPUT", text).await;
    }

    pub async fn log_output(&self, text: &str) {
        self.write("OUTPUT", text).await;
    }

    async fn write(&self, kind: &str, text: &str) {
        if self.mode == PromptLogMode::None || text.is_empty() {
            return;
        }
        let entry = format_entry(kind, text, OffsetDateTime::now_utc());
        match self.mode {
            PromptLogMode::Console => print!("{entry}"),
            PromptLogMode::File => {
                let Some(path) = &self.file else {
                    return;
                };
                if let Err(err) = append(path, &entry).await {
                    warn!(path = %path.display(), error = %err, "failed to write prompt log");
                }
            }
            PromptLogMode::None => {}
        }
    }
}

async fn append(path: &PathBuf, entry: &str) -> std::io::Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)
        .await?;
    file.write_all(entry.as_bytes()).await
}

fn format_entry(kind: &str, text: &str, at: OffsetDateTime) -> String {
    let timestamp = at.format(&Rfc3339).unwrap_or_default();
    format!("{timestamp} [{kind}]:\n{text}\n--------------------------------------\n")
}
