//! Engine configuration.
//!
//! One TOML document describes an environment: where releases live,
//! how to probe them, how to reach the metrics source, and the
//! commands for the external collaborators. Configuration is explicit
//! input to the orchestrator and controller — nothing is read from
//! ambient process state.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use cutover_core::{CheckName, DeployError, DeployResult, Target, parse_duration};
use cutover_health::{Check, CommandCheck, HealthEvaluator, HttpCheck, RedisPingCheck, TlsExpiryCheck};
use cutover_metrics::{HttpMetricsSource, MetricsGate};
use cutover_traffic::UpstreamFileSplitter;

use crate::collaborators::{CommandBackup, CommandMigrator};

/// Top-level engine configuration for one environment.
#[derive(Debug, Deserialize)]
pub struct EngineConfig {
    /// Environment name (e.g. "prod").
    pub environment: String,
    /// Environment directory holding releases/, current, audit.log.
    pub env_dir: PathBuf,
    /// How many releases to keep when pruning.
    #[serde(default = "default_retain")]
    pub retain: usize,
    pub targets: TargetsConfig,
    pub backup: StepConfig,
    pub migrate: StepConfig,
    #[serde(default)]
    pub checks: ChecksConfig,
    pub traffic: TrafficConfig,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Deserialize)]
pub struct TargetsConfig {
    /// host:port where the candidate listens while under evaluation.
    pub candidate_address: String,
    /// host:port serving live traffic.
    pub live_address: String,
}

/// A collaborator command with a timeout.
#[derive(Debug, Deserialize)]
pub struct StepConfig {
    pub command: String,
    #[serde(default = "default_step_timeout")]
    pub timeout: String,
}

#[derive(Debug, Deserialize)]
pub struct ChecksConfig {
    /// Checks that gate deployments. Every name listed here must have
    /// a configuration section below.
    #[serde(default)]
    pub required: Vec<CheckName>,
    /// Default per-check timeout.
    #[serde(default = "default_check_timeout")]
    pub timeout: String,
    pub http: Option<HttpCheckConfig>,
    pub service: Option<CommandCheckConfig>,
    pub database: Option<CommandCheckConfig>,
    pub cache: Option<CacheCheckConfig>,
    pub queue: Option<CeilingCheckConfig>,
    pub disk: Option<CeilingCheckConfig>,
    pub tls: Option<TlsCheckConfig>,
}

impl Default for ChecksConfig {
    fn default() -> Self {
        Self {
            required: Vec::new(),
            timeout: default_check_timeout(),
            http: None,
            service: None,
            database: None,
            cache: None,
            queue: None,
            disk: None,
            tls: None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct HttpCheckConfig {
    pub path: String,
    pub marker: Option<String>,
    pub timeout: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CommandCheckConfig {
    pub command: String,
    pub timeout: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CacheCheckConfig {
    pub address: String,
    pub timeout: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CeilingCheckConfig {
    pub command: String,
    pub ceiling: f64,
    pub timeout: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TlsCheckConfig {
    pub command: String,
    pub warn_days: f64,
    pub fail_days: f64,
    pub timeout: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TrafficConfig {
    pub upstream: String,
    pub stable_address: String,
    pub candidate_address: String,
    pub artifact: PathBuf,
    pub reload_command: String,
    #[serde(default = "default_reload_timeout")]
    pub reload_timeout: String,
}

#[derive(Debug, Deserialize)]
pub struct MetricsConfig {
    /// host:port of the metrics summary endpoint.
    pub address: String,
    /// Series selector; `{release}` is substituted per candidate.
    pub selector: String,
    #[serde(default = "default_query_timeout")]
    pub query_timeout: String,
}

fn default_retain() -> usize {
    5
}

fn default_step_timeout() -> String {
    "10m".to_string()
}

fn default_check_timeout() -> String {
    "5s".to_string()
}

fn default_reload_timeout() -> String {
    "10s".to_string()
}

fn default_query_timeout() -> String {
    "5s".to_string()
}

impl EngineConfig {
    /// Load and validate a config file.
    pub fn load(path: &Path) -> DeployResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| DeployError::Config(format!("read {}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate config from TOML text.
    pub fn from_toml_str(content: &str) -> DeployResult<Self> {
        let config: EngineConfig =
            toml::from_str(content).map_err(|e| DeployError::Config(format!("parse: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> DeployResult<()> {
        duration(&self.backup.timeout, "backup.timeout")?;
        duration(&self.migrate.timeout, "migrate.timeout")?;
        duration(&self.checks.timeout, "checks.timeout")?;
        duration(&self.traffic.reload_timeout, "traffic.reload_timeout")?;
        duration(&self.metrics.query_timeout, "metrics.query_timeout")?;

        for name in &self.checks.required {
            let configured = match name {
                CheckName::Http => self.checks.http.is_some(),
                CheckName::Service => self.checks.service.is_some(),
                CheckName::Database => self.checks.database.is_some(),
                CheckName::Cache => self.checks.cache.is_some(),
                CheckName::Queue => self.checks.queue.is_some(),
                CheckName::Disk => self.checks.disk.is_some(),
                CheckName::TlsExpiry => self.checks.tls.is_some(),
            };
            if !configured {
                return Err(DeployError::Config(format!(
                    "required check \"{name}\" has no configuration section"
                )));
            }
        }
        Ok(())
    }

    /// Build the health evaluator from the configured checks.
    pub fn build_evaluator(&self) -> DeployResult<HealthEvaluator> {
        let default = duration(&self.checks.timeout, "checks.timeout")?;
        let mut checks: Vec<Arc<dyn Check>> = Vec::new();

        if let Some(cfg) = &self.checks.http {
            let mut check = HttpCheck::new(&cfg.path, opt_duration(&cfg.timeout, default)?);
            if let Some(marker) = &cfg.marker {
                check = check.with_marker(marker);
            }
            checks.push(Arc::new(check));
        }
        if let Some(cfg) = &self.checks.service {
            checks.push(Arc::new(CommandCheck::new(
                CheckName::Service,
                &cfg.command,
                opt_duration(&cfg.timeout, default)?,
            )));
        }
        if let Some(cfg) = &self.checks.database {
            checks.push(Arc::new(CommandCheck::new(
                CheckName::Database,
                &cfg.command,
                opt_duration(&cfg.timeout, default)?,
            )));
        }
        if let Some(cfg) = &self.checks.cache {
            checks.push(Arc::new(RedisPingCheck::new(
                &cfg.address,
                opt_duration(&cfg.timeout, default)?,
            )));
        }
        if let Some(cfg) = &self.checks.queue {
            checks.push(Arc::new(
                CommandCheck::new(
                    CheckName::Queue,
                    &cfg.command,
                    opt_duration(&cfg.timeout, default)?,
                )
                .with_ceiling(cfg.ceiling),
            ));
        }
        if let Some(cfg) = &self.checks.disk {
            checks.push(Arc::new(
                CommandCheck::new(
                    CheckName::Disk,
                    &cfg.command,
                    opt_duration(&cfg.timeout, default)?,
                )
                .with_ceiling(cfg.ceiling),
            ));
        }
        if let Some(cfg) = &self.checks.tls {
            checks.push(Arc::new(TlsExpiryCheck::new(
                &cfg.command,
                cfg.warn_days,
                cfg.fail_days,
                opt_duration(&cfg.timeout, default)?,
            )));
        }

        Ok(HealthEvaluator::new(checks))
    }

    /// Build the file-backed traffic splitter.
    pub fn build_splitter(&self) -> DeployResult<UpstreamFileSplitter> {
        Ok(UpstreamFileSplitter::new(
            &self.traffic.upstream,
            &self.traffic.stable_address,
            &self.traffic.candidate_address,
            &self.traffic.artifact,
            &self.traffic.reload_command,
            duration(&self.traffic.reload_timeout, "traffic.reload_timeout")?,
        ))
    }

    /// Build the metrics gate over the HTTP source.
    pub fn build_gate(&self) -> DeployResult<MetricsGate> {
        let source = HttpMetricsSource::new(
            &self.metrics.address,
            duration(&self.metrics.query_timeout, "metrics.query_timeout")?,
        );
        Ok(MetricsGate::new(Arc::new(source), &self.metrics.selector))
    }

    pub fn build_backup(&self) -> DeployResult<CommandBackup> {
        Ok(CommandBackup::new(
            &self.backup.command,
            duration(&self.backup.timeout, "backup.timeout")?,
        ))
    }

    pub fn build_migrator(&self) -> DeployResult<CommandMigrator> {
        Ok(CommandMigrator::new(
            &self.migrate.command,
            duration(&self.migrate.timeout, "migrate.timeout")?,
        ))
    }

    pub fn candidate_target(&self) -> Target {
        Target::new(&self.environment, &self.targets.candidate_address)
    }

    pub fn live_target(&self) -> Target {
        Target::new(&self.environment, &self.targets.live_address)
    }
}

fn duration(s: &str, field: &str) -> DeployResult<Duration> {
    parse_duration(s).ok_or_else(|| DeployError::Config(format!("bad duration in {field}: \"{s}\"")))
}

fn opt_duration(s: &Option<String>, default: Duration) -> DeployResult<Duration> {
    match s {
        Some(s) => {
            parse_duration(s).ok_or_else(|| DeployError::Config(format!("bad duration \"{s}\"")))
        }
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXAMPLE: &str = r#"
environment = "prod"
env_dir = "/srv/cutover/prod"
retain = 3

[targets]
candidate_address = "127.0.0.1:9002"
live_address = "127.0.0.1:9001"

[backup]
command = "backupctl create {env}"
timeout = "10m"

[migrate]
command = "./bin/migrate"
timeout = "5m"

[checks]
required = ["http", "database", "service"]
timeout = "5s"

[checks.http]
path = "/healthz"
marker = "ok"

[checks.service]
command = "systemctl is-active app"

[checks.database]
command = "psql -qtA -c 'select 1'"
timeout = "3s"

[checks.queue]
command = "queuectl depth jobs"
ceiling = 1000.0

[checks.disk]
command = "df --output=pcent /srv | tail -1"
ceiling = 90.0

[checks.tls]
command = "certdays example.com"
warn_days = 30.0
fail_days = 14.0

[traffic]
upstream = "app_backend"
stable_address = "127.0.0.1:9001"
candidate_address = "127.0.0.1:9002"
artifact = "/etc/nginx/conf.d/app-weights.conf"
reload_command = "nginx -s reload"

[metrics]
address = "127.0.0.1:9090"
selector = 'app="web",release="{release}"'
"#;

    #[test]
    fn example_config_parses_and_builds() {
        let config = EngineConfig::from_toml_str(EXAMPLE).unwrap();
        assert_eq!(config.environment, "prod");
        assert_eq!(config.retain, 3);
        assert_eq!(config.checks.required.len(), 3);

        // Six checks configured (no cache section).
        let _ = config.build_evaluator().unwrap();
        let _ = config.build_splitter().unwrap();
        let _ = config.build_gate().unwrap();
        let _ = config.build_backup().unwrap();
        let _ = config.build_migrator().unwrap();

        assert_eq!(config.candidate_target().address, "127.0.0.1:9002");
        assert_eq!(config.live_target().environment, "prod");
    }

    #[test]
    fn required_check_without_section_is_rejected() {
        let doc = EXAMPLE.replace(
            "required = [\"http\", \"database\", \"service\"]",
            "required = [\"cache\"]",
        );
        let err = EngineConfig::from_toml_str(&doc).unwrap_err();
        assert!(matches!(err, DeployError::Config(_)));
        assert!(err.to_string().contains("cache"));
    }

    #[test]
    fn bad_duration_is_rejected() {
        let doc = EXAMPLE.replace("timeout = \"10m\"", "timeout = \"whenever\"");
        let err = EngineConfig::from_toml_str(&doc).unwrap_err();
        assert!(err.to_string().contains("bad duration"));
    }

    #[test]
    fn unknown_required_check_name_is_rejected() {
        let doc = EXAMPLE.replace(
            "required = [\"http\", \"database\", \"service\"]",
            "required = [\"vibes\"]",
        );
        let err = EngineConfig::from_toml_str(&doc).unwrap_err();
        assert!(matches!(err, DeployError::Config(_)));
    }

    #[test]
    fn defaults_apply() {
        let doc = EXAMPLE.replace("retain = 3\n", "");
        let config = EngineConfig::from_toml_str(&doc).unwrap();
        assert_eq!(config.retain, 5);
        assert_eq!(config.metrics.query_timeout, "5s");
        assert_eq!(config.traffic.reload_timeout, "10s");
    }
}
