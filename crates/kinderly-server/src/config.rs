//! Server configuration: TOML file plus defaults.

use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;

use kinderly_authz::{AuthzConfig, RouteBinding};
use serde::Deserialize;
use thiserror::Error;

/// Configuration loading failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {message}")]
    Invalid { message: String },
}

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub authz: AuthzConfig,

    /// Route bindings loaded into the in-memory store at startup.
    pub seed_routes: Vec<SeedRoute>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub host: IpAddr,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// Tracing filter directive, e.g. "info" or "kinderly_authz=debug".
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// One route binding in the `[[seed_routes]]` config tables.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SeedRoute {
    pub role: String,
    pub method: String,
    pub path: String,
    #[serde(default)]
    pub permission: Option<String>,
}

impl AppConfig {
    /// Load from a TOML file. A missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Fails when the file exists but cannot be read, parsed or validated.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }

        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (i, route) in self.seed_routes.iter().enumerate() {
            if route.role.trim().is_empty() || route.method.trim().is_empty() {
                return Err(ConfigError::Invalid {
                    message: format!("seed_routes[{i}]: role and method must be non-empty"),
                });
            }
            if !route.path.starts_with('/') {
                return Err(ConfigError::Invalid {
                    message: format!("seed_routes[{i}]: path must start with '/'"),
                });
            }
        }
        Ok(())
    }

    /// The seed routes as store bindings, with stable ids.
    #[must_use]
    pub fn seed_bindings(&self) -> Vec<RouteBinding> {
        self.seed_routes
            .iter()
            .enumerate()
            .map(|(i, route)| RouteBinding {
                id: format!("seed-{i}"),
                role_code: route.role.clone(),
                method: route.method.clone(),
                path_pattern: route.path.clone(),
                permission_code: route.permission.clone(),
                active: true,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.logging.level, "info");
        assert!(config.seed_routes.is_empty());
    }

    #[test]
    fn test_parse_full_config() {
        let config: AppConfig = toml::from_str(
            r#"
            [server]
            host = "127.0.0.1"
            port = 3000

            [logging]
            level = "debug"

            [authz]
            debounce_window = "5s"
            change_log_capacity = 200

            [[seed_routes]]
            role = "teacher"
            method = "GET"
            path = "/api/students"

            [[seed_routes]]
            role = "principal"
            method = "DELETE"
            path = "/api/students/:id"
            permission = "students:delete"
            "#,
        )
        .unwrap();

        assert_eq!(config.server.port, 3000);
        assert_eq!(config.authz.debounce_window.as_secs(), 5);
        assert_eq!(config.authz.change_log_capacity, 200);

        let bindings = config.seed_bindings();
        assert_eq!(bindings.len(), 2);
        assert_eq!(bindings[0].id, "seed-0");
        assert_eq!(
            bindings[1].permission_code.as_deref(),
            Some("students:delete")
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_seed_route() {
        let config: AppConfig = toml::from_str(
            r#"
            [[seed_routes]]
            role = "teacher"
            method = "GET"
            path = "api/students"
            "#,
        )
        .unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn test_rejects_unknown_fields() {
        let result: Result<AppConfig, _> = toml::from_str("[server]\nprot = 8080\n");
        assert!(result.is_err());
    }
}
