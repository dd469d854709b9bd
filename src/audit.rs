use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

/// Append-only JSONL log of session events. Never records credentials.
pub struct AuditLog {
    run_id: String,
    file: File,
}

#[derive(Serialize)]
struct Event<'a> {
    ts: DateTime<Utc>,
    run_id: &'a str,
    #[serde(rename = "type")]
    event_type: &'a str,
    #[serde(flatten)]
    data: serde_json::Value,
}

/// One line of the log as read back for display
#[derive(Debug, Clone, Deserialize)]
pub struct AuditEntry {
    pub ts: DateTime<Utc>,
    pub run_id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(flatten)]
    pub data: serde_json::Map<String, serde_json::Value>,
}

impl AuditLog {
    pub fn new(path: &Path, run_id: &str) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            run_id: run_id.to_string(),
            file,
        })
    }

    pub fn log(&mut self, event_type: &str, data: serde_json::Value) -> Result<()> {
        let event = Event {
            ts: Utc::now(),
            run_id: &self.run_id,
            event_type,
            data,
        };
        let line = serde_json::to_string(&event)?;
        writeln!(self.file, "{}", line)?;
        self.file.flush()?;
        Ok(())
    }

    pub fn login(&mut self, email: &str, role: &str) -> Result<()> {
        self.log("login", serde_json::json!({ "email": email, "role": role }))
    }

    pub fn register(&mut self, email: &str) -> Result<()> {
        self.log("register", serde_json::json!({ "email": email }))
    }

    pub fn refresh_ok(&mut self, email: &str) -> Result<()> {
        self.log("refresh_ok", serde_json::json!({ "email": email }))
    }

    pub fn refresh_failed(&mut self, error: &str) -> Result<()> {
        self.log("refresh_failed", serde_json::json!({ "error": error }))
    }

    pub fn logout(&mut self, notified: bool) -> Result<()> {
        self.log("logout", serde_json::json!({ "notified": notified }))
    }

    pub fn session_expired(&mut self, url: &str) -> Result<()> {
        self.log("session_expired", serde_json::json!({ "url": url }))
    }
}

/// Read the last `limit` entries. Lines that fail to parse are skipped.
pub fn read_tail(path: &Path, limit: usize) -> Result<Vec<AuditEntry>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let reader = BufReader::new(File::open(path)?);
    let mut entries: Vec<AuditEntry> = reader
        .lines()
        .map_while(|l| l.ok())
        .filter(|l| !l.trim().is_empty())
        .filter_map(|l| serde_json::from_str(&l).ok())
        .collect();
    if entries.len() > limit {
        entries.drain(..entries.len() - limit);
    }
    Ok(entries)
}
