//! Credential exchange against `POST /api/auth/login`.

use crate::session::User;
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

#[derive(Debug, Serialize)]
pub struct LoginRequest<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: User,
}

/// Trait for the backend's credential check, so the CLI can be tested offline
pub trait Authenticator {
    fn authenticate(&self, username: &str, password: &str) -> Result<LoginResponse>;
}

pub struct HttpAuthenticator {
    base_url: String,
    agent: ureq::Agent,
}

impl HttpAuthenticator {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
        }
    }
}

/// Pull a human-readable reason out of an error body
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            ["message", "error"]
                .iter()
                .find_map(|k| v.get(*k).and_then(|m| m.as_str()).map(String::from))
        })
        .unwrap_or_else(|| body.trim().to_string())
}

impl Authenticator for HttpAuthenticator {
    fn authenticate(&self, username: &str, password: &str) -> Result<LoginResponse> {
        let url = format!("{}/api/auth/login", self.base_url);

        let resp = self
            .agent
            .post(&url)
            .set("Content-Type", "application/json")
            .send_json(serde_json::to_value(LoginRequest { username, password })?);

        match resp {
            Ok(r) => {
                let body: LoginResponse = r
                    .into_json()
                    .map_err(|e| anyhow!("Malformed login response: {}", e))?;
                Ok(body)
            }
            Err(ureq::Error::Status(code, resp)) => {
                let body = resp.into_string().unwrap_or_default();
                Err(anyhow!("Login failed {}: {}", code, error_message(&body)))
            }
            Err(e) => Err(anyhow!("Request failed: {}", e)),
        }
    }
}
