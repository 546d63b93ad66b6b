//! Engine-wide configuration: the options recognised at the public
//! API boundary, and their environment-variable overrides.
//!
//! This sits a layer above [`loomflow_persistence::PersistenceConfig`],
//! which only knows about the suspend/resume pipeline; `EngineConfig`
//! additionally covers execution defaults, logging, and which environment
//! the engine believes it is running in.

use loomflow_persistence::PersistenceConfig;

/// Upper bound on in-flight work, applied when a node's own `config`
/// does not set a tighter one.
const DEFAULT_CONCURRENCY: usize = 16;

/// Execution defaults applied to every flow run unless a node's own
/// `NodeConfig` overrides them.
#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    /// Default per-node timeout, if a node does not set its own.
    pub timeout_ms: Option<u64>,
    /// Default retry count, if a node does not set its own.
    pub max_retries: u32,
    /// Global ceiling on concurrently running nodes.
    pub concurrency: usize,
    /// Recognised but not yet enforced by the reference scheduler; see
    /// the grounding ledger for why this is config-only today.
    pub circuit_breaker: Option<CircuitBreakerConfig>,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self { timeout_ms: None, max_retries: 0, concurrency: DEFAULT_CONCURRENCY, circuit_breaker: None }
    }
}

/// Trip a tool off after too many consecutive failures, for too long.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the breaker opens.
    pub failure_threshold: u32,
    /// How long the breaker stays open before allowing a trial call.
    pub reset_timeout_ms: u64,
}

/// Structured-log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable, for local development.
    Pretty,
    /// Single-line structured text.
    Compact,
    /// Structured JSON, for log aggregators.
    Json,
}

/// Where log lines go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogDestination {
    Stdout,
    Stderr,
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// A `tracing-subscriber` `EnvFilter` directive, e.g. `"info"` or
    /// `"loomflow_scheduler=debug,info"`.
    pub level: String,
    pub format: LogFormat,
    pub destination: LogDestination,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_owned(), format: LogFormat::Pretty, destination: LogDestination::Stderr }
    }
}

/// Which environment the engine believes it is running in. Affects only
/// defaults a host program chooses to branch on (e.g. whether to use
/// `KeySource::InsecureDevDerived`); the engine itself does not behave
/// differently per environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
    Test,
}

impl Environment {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "production" | "prod" => Some(Self::Production),
            "test" => Some(Self::Test),
            "development" | "dev" => Some(Self::Development),
            _ => None,
        }
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::Development
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub persistence: PersistenceConfig,
    pub execution: ExecutionConfig,
    pub logging: LoggingConfig,
    pub environment: Environment,
}

impl EngineConfig {
    /// Apply the illustrative environment overrides:
    /// `PERSISTENCE_BACKEND`, `ENCRYPTION_ENABLED` (both delegated to
    /// [`PersistenceConfig::with_env_overrides`]), `LOG_LEVEL`, `NODE_ENV`.
    /// `ENCRYPTION_KEY` is read separately by [`crate::engine::keyring_from_env`]
    /// since it produces key material, not a config field.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        self.persistence = self.persistence.with_env_overrides();
        if let Ok(level) = std::env::var("LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(env) = std::env::var("NODE_ENV") {
            if let Some(parsed) = Environment::parse(&env) {
                self.environment = parsed;
            }
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_level_override_is_applied() {
        // SAFETY: tests run single-threaded within this module for env vars
        // that only this test touches.
        std::env::set_var("LOG_LEVEL", "debug");
        let config = EngineConfig::default().with_env_overrides();
        assert_eq!(config.logging.level, "debug");
        std::env::remove_var("LOG_LEVEL");
    }

    #[test]
    fn unrecognised_node_env_is_ignored() {
        std::env::set_var("NODE_ENV", "staging");
        let config = EngineConfig::default().with_env_overrides();
        assert_eq!(config.environment, Environment::Development);
        std::env::remove_var("NODE_ENV");
    }

    #[test]
    fn node_env_production_is_recognised() {
        std::env::set_var("NODE_ENV", "production");
        let config = EngineConfig::default().with_env_overrides();
        assert_eq!(config.environment, Environment::Production);
        std::env::remove_var("NODE_ENV");
    }
}
