use crate::guard::Decision;
use crate::session::{CartSync, User};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Append-only JSONL log of session activity, one file per process
pub struct Transcript {
    pub path: PathBuf,
    session_id: String,
    file: File,
}

#[derive(Serialize)]
struct Event<'a> {
    ts: DateTime<Utc>,
    session_id: &'a str,
    #[serde(rename = "type")]
    event_type: &'a str,
    #[serde(flatten)]
    data: serde_json::Value,
}

impl Transcript {
    pub fn new(path: &Path, session_id: &str) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            path: path.to_path_buf(),
            session_id: session_id.to_string(),
            file,
        })
    }

    pub fn log(&mut self, event_type: &str, data: serde_json::Value) -> Result<()> {
        let event = Event {
            ts: Utc::now(),
            session_id: &self.session_id,
            event_type,
            data,
        };
        let line = serde_json::to_string(&event)?;
        writeln!(self.file, "{}", line)?;
        self.file.flush()?;
        Ok(())
    }

    /// Log startup with whatever the session rehydrated
    pub fn session_start(&mut self, user: Option<&User>, language: &str, currency: &str) -> Result<()> {
        self.log(
            "session_start",
            serde_json::json!({
                "user": user.map(|u| &u.username),
                "role": user.map(|u| u.role.as_str()),
                "language": language,
                "currency": currency,
            }),
        )
    }

    pub fn login(&mut self, user: &User) -> Result<()> {
        self.log(
            "login",
            serde_json::json!({
                "user_id": user.id,
                "username": user.username,
                "role": user.role.as_str(),
                "branch_id": user.branch_id,
            }),
        )
    }

    pub fn login_failed(&mut self, username: &str, error: &str) -> Result<()> {
        self.log(
            "login_failed",
            serde_json::json!({ "username": username, "error": error }),
        )
    }

    pub fn cart_sync(&mut self, outcome: &CartSync) -> Result<()> {
        let data = match outcome {
            CartSync::Skipped => serde_json::json!({ "status": "skipped" }),
            CartSync::Replaced { items, push_failed } => serde_json::json!({
                "status": "replaced",
                "items": items,
                "push_failed": push_failed,
            }),
            CartSync::Abandoned(reason) => serde_json::json!({
                "status": "abandoned",
                "reason": reason,
            }),
        };
        self.log("cart_sync", data)
    }

    pub fn logout(&mut self, username: Option<&str>) -> Result<()> {
        self.log("logout", serde_json::json!({ "username": username }))
    }

    /// Log a language or currency change
    pub fn preference(&mut self, name: &str, value: &str) -> Result<()> {
        self.log(
            "preference",
            serde_json::json!({ "name": name, "value": value }),
        )
    }

    /// Log a route guard decision
    pub fn guard_decision(
        &mut self,
        path: &str,
        decision: Decision,
        route_matched: Option<&str>,
    ) -> Result<()> {
        self.log(
            "guard_decision",
            serde_json::json!({
                "path": path,
                "decision": decision.as_str(),
                "route_matched": route_matched,
            }),
        )
    }
}
