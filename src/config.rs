use crate::guard::{RoutePattern, BRANCH_PLACEHOLDER};
use crate::session::Role;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;

/// A validation error in the configuration
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]: {}", self.field, self.message)
    }
}

/// Backend REST API settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ApiConfig {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl ApiConfig {
    pub fn base_url(&self) -> &str {
        self.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS))
    }
}

/// Where durable session state lives
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct StorageConfig {
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

/// A protected view: its path pattern and the roles allowed to open it.
/// No roles means any logged-in user.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RouteConfig {
    pub path: String,
    #[serde(default)]
    pub roles: Vec<Role>,
}

impl RouteConfig {
    pub fn new(path: &str, roles: &[Role]) -> Self {
        Self {
            path: path.to_string(),
            roles: roles.to_vec(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
}

/// Expand a leading `~/` to the home directory
fn expand_home(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}

impl Config {
    /// Create config with the built-in route table for every role's views
    pub fn with_builtin_routes() -> Self {
        use Role::*;

        let routes = vec![
            RouteConfig::new("/admin", &[Admin]),
            RouteConfig::new("/admin/users", &[Admin]),
            RouteConfig::new("/admin/branches", &[Admin]),
            RouteConfig::new("/general-manager", &[GeneralManager, Admin]),
            RouteConfig::new("/reports", &[Admin, GeneralManager]),
            RouteConfig::new("/branch-manager", &[BranchManager]),
            RouteConfig::new(
                "/branch/:branchId/staff",
                &[BranchManager, Admin, GeneralManager],
            ),
            RouteConfig::new(
                "/branch/:branchId/inventory",
                &[BranchManager, Chef, Admin, GeneralManager],
            ),
            RouteConfig::new(
                "/branch/:branchId/orders",
                &[BranchManager, Chef, Cashier, Admin, GeneralManager],
            ),
            RouteConfig::new("/chef", &[Chef]),
            RouteConfig::new("/cashier", &[Cashier]),
            RouteConfig::new("/customer", &[Customer]),
            RouteConfig::new("/customer/orders", &[Customer]),
            RouteConfig::new("/cart", &[Customer]),
            RouteConfig::new("/profile", &[]),
        ];

        Config {
            api: ApiConfig::default(),
            storage: StorageConfig::default(),
            routes,
        }
    }

    /// Load configuration from default paths
    /// Priority: local (.bistro/config.local.toml) > project (.bistro/config.toml) > user (~/.bistro/config.toml)
    /// Starts with the built-in routes, then merges user/project/local configs
    pub fn load() -> Result<Self> {
        let mut config = Self::with_builtin_routes();

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".bistro").join("config.toml");
            if user_config.exists() {
                let user = Self::load_from(&user_config)?;
                config.merge(user);
            }
        }

        let project_config = Path::new(".bistro").join("config.toml");
        if project_config.exists() {
            let project = Self::load_from(&project_config)?;
            config.merge(project);
        }

        // Should be gitignored
        let local_config = Path::new(".bistro").join("config.local.toml");
        if local_config.exists() {
            let local = Self::load_from(&local_config)?;
            config.merge(local);
        }

        Ok(config)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        Ok(config)
    }

    /// Merge another config into this one (other takes priority)
    /// Scalars are overridden if set; a route replaces one with the same path,
    /// otherwise it is appended
    pub fn merge(&mut self, other: Config) {
        if other.api.base_url.is_some() {
            self.api.base_url = other.api.base_url;
        }
        if other.api.timeout_ms.is_some() {
            self.api.timeout_ms = other.api.timeout_ms;
        }

        if other.storage.dir.is_some() {
            self.storage.dir = other.storage.dir;
        }

        for route in other.routes {
            match self.routes.iter_mut().find(|r| r.path == route.path) {
                Some(existing) => *existing = route,
                None => self.routes.push(route),
            }
        }
    }

    /// Directory holding durable storage and transcripts
    /// Falls back to ~/.bistro, then ./.bistro when there is no home directory
    pub fn state_dir(&self) -> PathBuf {
        if let Some(dir) = &self.storage.dir {
            return expand_home(dir);
        }
        dirs::home_dir()
            .map(|home| home.join(".bistro"))
            .unwrap_or_else(|| PathBuf::from(".bistro"))
    }

    /// Validate configuration and return any errors found
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        let base_url = self.api.base_url();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            errors.push(ValidationError {
                field: "api.base_url".to_string(),
                message: format!("Expected an http(s) URL, got '{}'", base_url),
            });
        }

        if self.api.timeout_ms == Some(0) {
            errors.push(ValidationError {
                field: "api.timeout_ms".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        let mut seen = HashSet::new();
        for (i, route) in self.routes.iter().enumerate() {
            let field = format!("routes[{}].path", i);

            if !route.path.starts_with('/') {
                errors.push(ValidationError {
                    field: field.clone(),
                    message: format!("Path '{}' must start with '/'", route.path),
                });
            }

            let inner = route.path.trim_end_matches('/');
            let inner = inner.strip_prefix('/').unwrap_or(inner);
            if !inner.is_empty() && inner.split('/').any(|s| s.is_empty()) {
                errors.push(ValidationError {
                    field: field.clone(),
                    message: format!("Path '{}' has an empty segment", route.path),
                });
            }

            let pattern = RoutePattern::parse(&route.path);
            let names: Vec<&str> = pattern.param_names().collect();
            if names.iter().any(|n| n.is_empty()) {
                errors.push(ValidationError {
                    field: field.clone(),
                    message: format!("Path '{}' has an unnamed placeholder", route.path),
                });
            }
            if names.iter().filter(|n| **n == BRANCH_PLACEHOLDER).count() > 1 {
                errors.push(ValidationError {
                    field: field.clone(),
                    message: format!(
                        "Path '{}' has more than one :{} placeholder",
                        route.path, BRANCH_PLACEHOLDER
                    ),
                });
            }

            if !seen.insert(route.path.as_str()) {
                errors.push(ValidationError {
                    field,
                    message: format!("Duplicate route '{}'", route.path),
                });
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
