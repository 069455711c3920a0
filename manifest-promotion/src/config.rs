//! Server configuration, layered the usual way: built-in defaults, then
//! environment variables.

use serde::Deserialize;

/// Server-side knobs. `LOG_LEVEL` and `PORT` are read unprefixed since
/// they're conventional across the fleet; everything else is read under a
/// `GITOPS_` prefix.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Port the `GitOps` gRPC service listens on. Defaults to `50051`.
    pub port: u16,
    /// Port the `/health` liveness endpoint listens on. Defaults to `8080`.
    pub health_port: u16,
    /// `slog`-style text level read from `LOG_LEVEL` (`trace`, `debug`,
    /// `info`, `warn`, `error`).
    pub log_level: String,
    /// Shallow clone depth used by the git service. Defaults to `1`.
    pub clone_depth: i32,
    /// Branch ref prefix used by the default `branch` targeter. Defaults to
    /// `environment/`.
    pub branch_prefix: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 50051,
            health_port: 8080,
            log_level: "info".to_string(),
            clone_depth: 1,
            branch_prefix: "environment/".to_string(),
        }
    }
}

impl ServerConfig {
    /// Loads configuration from environment variables, falling back to
    /// defaults. `LOG_LEVEL` and `PORT` are read unprefixed; all other
    /// fields are read as `GITOPS_<FIELD>`.
    pub fn load() -> anyhow::Result<Self> {
        let defaults = Self::default();

        let builder = config::Config::builder()
            .set_default("port", i64::from(defaults.port))?
            .set_default("health_port", i64::from(defaults.health_port))?
            .set_default("log_level", defaults.log_level.clone())?
            .set_default("clone_depth", i64::from(defaults.clone_depth))?
            .set_default("branch_prefix", defaults.branch_prefix.clone())?
            .add_source(
                config::Environment::with_prefix("GITOPS")
                    .try_parsing(true)
                    .separator("_"),
            );

        let mut config = builder.build()?;

        if let Ok(port) = std::env::var("PORT") {
            config = config::Config::builder()
                .add_source(config.clone())
                .set_override("port", port)?
                .build()?;
        }
        if let Ok(log_level) = std::env::var("LOG_LEVEL") {
            config = config::Config::builder()
                .add_source(config.clone())
                .set_override("log_level", log_level)?
                .build()?;
        }

        Ok(config.try_deserialize()?)
    }

    pub fn listen_addr(&self) -> std::net::SocketAddr {
        std::net::SocketAddr::from(([0, 0, 0, 0], self.port))
    }

    pub fn health_addr(&self) -> std::net::SocketAddr {
        std::net::SocketAddr::from(([0, 0, 0, 0], self.health_port))
    }
}
