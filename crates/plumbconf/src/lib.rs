//! Configuration loading for jack-plumber.
//!
//! One TOML format carries both the process settings and the ordered rule
//! tables. Rules are kept as raw definitions here; compiling them into
//! matchers is the plumber core's job.
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins for settings, rules accumulate):
//! 1. `/etc/jack-plumber/config.toml` (system)
//! 2. `~/.config/jack-plumber/config.toml` (user)
//! 3. `./jack-plumber.toml` (local override, replaced by `--config`)
//! 4. Environment variables (`PLUMBER_*`, `RUST_LOG`)
//!
//! # Example Config
//!
//! ```toml
//! [session]
//! client_name = "jack-plumber"
//!
//! [dispatch]
//! queue_capacity = 1024
//!
//! [telemetry]
//! log_level = "info"
//!
//! [[rename]]
//! pattern = '^app1:out_(\d+)$'
//! replacement = 'app1:output_\1'
//!
//! [[connect]]
//! source = '^synth:.*_out$'
//! destination = '^recorder:.*_in$'
//! ```

pub mod infra;
pub mod loader;
pub mod rules;

pub use infra::{DispatchConfig, SessionConfig, TelemetryConfig};
pub use loader::{
    discover_config_files_with_override, expand_path, load_rules_file, ConfigSources,
};
pub use rules::{ConnectRuleDef, RenameRuleDef, RuleSource};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// Complete plumber configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlumbConfig {
    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub dispatch: DispatchConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,

    /// Rules from every loaded file, in load order.
    #[serde(flatten)]
    pub rules: RuleSource,
}

impl PlumbConfig {
    /// Load configuration from all standard sources, with `config_path`
    /// standing in for the local override, and report where values came from.
    pub fn load_with_sources_from(
        config_path: Option<&std::path::Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut config = PlumbConfig::default();

        for path in loader::discover_config_files_with_override(config_path) {
            config = loader::merge_file(config, &path)?;
            sources.files.push(path);
        }

        loader::apply_env_overrides(&mut config, &mut sources);

        Ok((config, sources))
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> String {
        // Built by hand so sections stay in a readable order
        let mut output = String::new();

        output.push_str("# jack-plumber configuration\n\n");

        output.push_str("[session]\n");
        output.push_str(&format!("client_name = {}\n", quote(&self.session.client_name)));
        output.push_str(&format!("start_server = {}\n", self.session.start_server));

        output.push_str("\n[dispatch]\n");
        output.push_str(&format!("queue_capacity = {}\n", self.dispatch.queue_capacity));
        output.push_str(&format!("max_batch = {}\n", self.dispatch.max_batch));
        output.push_str(&format!("poll_interval_ms = {}\n", self.dispatch.poll_interval_ms));
        output.push_str(&format!(
            "resync_interval_secs = {}\n",
            self.dispatch.resync_interval_secs
        ));
        output.push_str(&format!("slow_call_ms = {}\n", self.dispatch.slow_call_ms));

        output.push_str("\n[telemetry]\n");
        output.push_str(&format!("log_level = {}\n", quote(&self.telemetry.log_level)));

        for rule in &self.rules.rename {
            output.push_str("\n[[rename]]\n");
            push_opt(&mut output, "name", &rule.name);
            push_opt(&mut output, "pattern", &rule.pattern);
            push_opt(&mut output, "replacement", &rule.replacement);
            push_opt(&mut output, "port_type", &rule.port_type);
            if rule.exclusive {
                output.push_str("exclusive = true\n");
            }
        }

        for rule in &self.rules.connect {
            output.push_str("\n[[connect]]\n");
            push_opt(&mut output, "name", &rule.name);
            push_opt(&mut output, "source", &rule.source);
            push_opt(&mut output, "destination", &rule.destination);
            push_opt(&mut output, "port_type", &rule.port_type);
            if rule.exclusive {
                output.push_str("exclusive = true\n");
            }
        }

        output
    }
}

fn quote(value: &str) -> String {
    toml::Value::String(value.to_string()).to_string()
}

fn push_opt(output: &mut String, key: &str, value: &Option<String>) {
    if let Some(v) = value {
        output.push_str(&format!("{} = {}\n", key, quote(v)));
    }
}
