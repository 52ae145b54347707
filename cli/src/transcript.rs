//! On-disk state the CLI keeps as an external collaborator to the core
//! crate: a per-session transcript log, a JSONL debug-event file (both
//! under `~/.codinglm/logs/`), and a flat prompt-history file at
//! `~/.codinglm-history`. The core crate never touches any of these paths;
//! it only hands back the data (turn text, tool history, metrics) that the
//! CLI chooses to persist here.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use serde_json::{json, Value};

use crate::logging::logs_dir;

pub struct Transcript {
    transcript_path: PathBuf,
    debug_events_path: PathBuf,
    history_path: PathBuf,
}

impl Transcript {
    pub fn open(session_id: &str) -> std::io::Result<Self> {
        let dir = logs_dir();
        std::fs::create_dir_all(&dir)?;

        let history_path = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".codinglm-history");

        Ok(Self {
            transcript_path: dir.join(format!("transcript-{}.log", session_id)),
            debug_events_path: dir.join(format!("events-{}.jsonl", session_id)),
            history_path,
        })
    }

    fn append(path: &PathBuf, line: &str) {
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut f| writeln!(f, "{}", line));
        if let Err(e) = result {
            tracing::warn!(path = %path.display(), error = %e, "failed to append to on-disk log");
        }
    }

    pub fn record_user_turn(&self, text: &str) {
        Self::append(&self.transcript_path, &format!("USER: {}", text));
        Self::append(&self.history_path, text);
    }

    pub fn record_assistant_turn(&self, text: &str) {
        Self::append(&self.transcript_path, &format!("ASSISTANT: {}", text));
    }

    pub fn record_event(&self, kind: &str, detail: Value) {
        let event = json!({
            "kind": kind,
            "detail": detail,
        });
        Self::append(&self.debug_events_path, &event.to_string());
    }
}
