//! Config file discovery, loading, and environment variable overlay.

use crate::{ConfigError, PlumbConfig, RuleSource};
use std::env;
use std::path::{Path, PathBuf};

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
}

/// Discover config files in load order (system, user, local).
///
/// Standard locations are only returned when they exist. A `cli_path`
/// replaces the local override and is always returned, so a missing
/// file surfaces as a read error instead of being skipped.
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/jack-plumber/config.toml");
    if system.exists() {
        files.push(system);
    }

    // XDG_CONFIG_HOME or ~/.config
    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("jack-plumber/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    if let Some(path) = cli_path {
        files.push(path.to_path_buf());
        return files;
    }

    let local = PathBuf::from("jack-plumber.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Overlay the keys present in `path` onto `base`.
///
/// Scalars replace, rule tables append.
pub fn merge_file(base: PlumbConfig, path: &Path) -> Result<PlumbConfig, ConfigError> {
    let contents = read(path)?;
    parse_toml(&contents, path, base)
}

/// Load a rule-only file (`[[rename]]` and `[[connect]]` tables).
///
/// Any other sections are ignored so a full config file can double as a
/// rule file.
pub fn load_rules_file(path: &Path) -> Result<RuleSource, ConfigError> {
    let contents = read(path)?;
    let table = parse_table(&contents, path)?;
    parse_rules(&table, path)
}

fn read(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })
}

fn parse_table(contents: &str, path: &Path) -> Result<toml::Table, ConfigError> {
    contents.parse().map_err(|e: toml::de::Error| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

fn parse_toml(contents: &str, path: &Path, base: PlumbConfig) -> Result<PlumbConfig, ConfigError> {
    let table = parse_table(contents, path)?;
    let mut config = base;

    if let Some(session) = section(&table, "session", path)? {
        if let Some(v) = get_str(session, "client_name", path)? {
            config.session.client_name = v;
        }
        if let Some(v) = get_bool(session, "start_server", path)? {
            config.session.start_server = v;
        }
    }

    if let Some(dispatch) = section(&table, "dispatch", path)? {
        if let Some(v) = get_uint(dispatch, "queue_capacity", path)? {
            config.dispatch.queue_capacity = v as usize;
        }
        if let Some(v) = get_uint(dispatch, "max_batch", path)? {
            config.dispatch.max_batch = v as usize;
        }
        if let Some(v) = get_uint(dispatch, "poll_interval_ms", path)? {
            config.dispatch.poll_interval_ms = v;
        }
        if let Some(v) = get_uint(dispatch, "resync_interval_secs", path)? {
            config.dispatch.resync_interval_secs = v;
        }
        if let Some(v) = get_uint(dispatch, "slow_call_ms", path)? {
            config.dispatch.slow_call_ms = v;
        }
    }

    if let Some(telemetry) = section(&table, "telemetry", path)? {
        if let Some(v) = get_str(telemetry, "log_level", path)? {
            config.telemetry.log_level = v;
        }
    }

    config.rules.extend(parse_rules(&table, path)?);

    Ok(config)
}

fn parse_rules(table: &toml::Table, path: &Path) -> Result<RuleSource, ConfigError> {
    let mut rules = RuleSource::default();

    if let Some(value) = table.get("rename") {
        rules.rename = value.clone().try_into().map_err(|e: toml::de::Error| ConfigError::Parse {
            path: path.to_path_buf(),
            message: format!("[[rename]]: {}", e),
        })?;
    }
    if let Some(value) = table.get("connect") {
        rules.connect = value.clone().try_into().map_err(|e: toml::de::Error| ConfigError::Parse {
            path: path.to_path_buf(),
            message: format!("[[connect]]: {}", e),
        })?;
    }

    Ok(rules)
}

fn section<'a>(
    table: &'a toml::Table,
    name: &str,
    path: &Path,
) -> Result<Option<&'a toml::Table>, ConfigError> {
    match table.get(name) {
        None => Ok(None),
        Some(v) => v.as_table().map(Some).ok_or_else(|| type_error(path, name, "a table")),
    }
}

fn get_str(table: &toml::Table, key: &str, path: &Path) -> Result<Option<String>, ConfigError> {
    match table.get(key) {
        None => Ok(None),
        Some(v) => v
            .as_str()
            .map(|s| Some(s.to_string()))
            .ok_or_else(|| type_error(path, key, "a string")),
    }
}

fn get_bool(table: &toml::Table, key: &str, path: &Path) -> Result<Option<bool>, ConfigError> {
    match table.get(key) {
        None => Ok(None),
        Some(v) => v.as_bool().map(Some).ok_or_else(|| type_error(path, key, "a boolean")),
    }
}

fn get_uint(table: &toml::Table, key: &str, path: &Path) -> Result<Option<u64>, ConfigError> {
    match table.get(key) {
        None => Ok(None),
        Some(v) => v
            .as_integer()
            .and_then(|i| u64::try_from(i).ok())
            .map(Some)
            .ok_or_else(|| type_error(path, key, "a non-negative integer")),
    }
}

fn type_error(path: &Path, key: &str, expected: &str) -> ConfigError {
    ConfigError::Parse {
        path: path.to_path_buf(),
        message: format!("`{}` must be {}", key, expected),
    }
}

/// Apply environment variable overrides to config.
pub fn apply_env_overrides(config: &mut PlumbConfig, sources: &mut ConfigSources) {
    if let Ok(v) = env::var("PLUMBER_CLIENT_NAME") {
        config.session.client_name = v;
        sources.env_overrides.push("PLUMBER_CLIENT_NAME".to_string());
    }
    if let Ok(v) = env::var("PLUMBER_START_SERVER") {
        if let Some(flag) = parse_flag(&v) {
            config.session.start_server = flag;
            sources.env_overrides.push("PLUMBER_START_SERVER".to_string());
        }
    }
    if let Ok(v) = env::var("PLUMBER_QUEUE_CAPACITY") {
        if let Ok(capacity) = v.parse() {
            config.dispatch.queue_capacity = capacity;
            sources.env_overrides.push("PLUMBER_QUEUE_CAPACITY".to_string());
        }
    }
    if let Ok(v) = env::var("PLUMBER_LOG_LEVEL") {
        config.telemetry.log_level = v;
        sources.env_overrides.push("PLUMBER_LOG_LEVEL".to_string());
    }
    // RUST_LOG wins over everything
    if let Ok(v) = env::var("RUST_LOG") {
        config.telemetry.log_level = v;
        sources.env_overrides.push("RUST_LOG".to_string());
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Expand ~ and environment variables in a path.
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf()) {
            home.join(stripped)
        } else {
            PathBuf::from(path)
        }
    } else if let Some(stripped) = path.strip_prefix('$') {
        // $VAR/rest/of/path
        if let Some(slash_pos) = stripped.find('/') {
            let var_name = &stripped[..slash_pos];
            if let Ok(var_value) = env::var(var_name) {
                PathBuf::from(var_value).join(&stripped[slash_pos + 1..])
            } else {
                PathBuf::from(path)
            }
        } else {
            env::var(stripped)
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(path))
        }
    } else {
        PathBuf::from(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn parse(toml: &str) -> Result<PlumbConfig, ConfigError> {
        parse_toml(toml, Path::new("test.toml"), PlumbConfig::default())
    }

    #[test]
    fn test_expand_path_tilde() {
        let expanded = expand_path("~/test/path");
        assert!(!expanded.to_string_lossy().starts_with('~'));
        assert!(expanded.to_string_lossy().contains("test/path"));
    }

    #[test]
    fn test_expand_path_absolute() {
        let expanded = expand_path("/absolute/path");
        assert_eq!(expanded, PathBuf::from("/absolute/path"));
    }

    #[test]
    fn test_discover_config_files() {
        for path in discover_config_files_with_override(None) {
            assert!(path.exists(), "{} should exist", path.display());
        }
    }

    #[test]
    fn test_override_path_is_kept_even_when_missing() {
        let missing = Path::new("/nonexistent/typo.toml");
        let files = discover_config_files_with_override(Some(missing));
        assert_eq!(files.last().map(PathBuf::as_path), Some(missing));
        assert!(!files.iter().any(|path| path == Path::new("jack-plumber.toml")));
    }

    #[test]
    fn test_parse_minimal_toml() {
        let config = parse(
            r#"
[session]
client_name = "plumbing"
"#,
        )
        .unwrap();
        assert_eq!(config.session.client_name, "plumbing");
        assert_eq!(config.dispatch.queue_capacity, 1024);
        assert!(config.rules.is_empty());
    }

    #[test]
    fn test_parse_full_toml() {
        let config = parse(
            r#"
[session]
client_name = "studio-plumber"
start_server = true

[dispatch]
queue_capacity = 64
max_batch = 16
poll_interval_ms = 100
resync_interval_secs = 30
slow_call_ms = 10

[telemetry]
log_level = "debug"

[[rename]]
name = "number outputs"
pattern = '^app1:out_(\d+)$'
replacement = 'app1:output_\1'

[[connect]]
source = '^synth:.*_out$'
destination = '^recorder:.*_in$'
port_type = "audio"
exclusive = true
"#,
        )
        .unwrap();

        assert_eq!(config.session.client_name, "studio-plumber");
        assert!(config.session.start_server);
        assert_eq!(config.dispatch.queue_capacity, 64);
        assert_eq!(config.dispatch.max_batch, 16);
        assert_eq!(config.dispatch.poll_interval_ms, 100);
        assert_eq!(config.dispatch.resync_interval_secs, 30);
        assert_eq!(config.dispatch.slow_call_ms, 10);
        assert_eq!(config.telemetry.log_level, "debug");

        assert_eq!(config.rules.rename.len(), 1);
        assert_eq!(config.rules.rename[0].replacement.as_deref(), Some(r"app1:output_\1"));
        assert_eq!(config.rules.connect.len(), 1);
        assert_eq!(config.rules.connect[0].port_type.as_deref(), Some("audio"));
        assert!(config.rules.connect[0].exclusive);
    }

    #[test]
    fn test_wrong_type_is_a_parse_error() {
        let err = parse(
            r#"
[dispatch]
queue_capacity = "lots"
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("queue_capacity"));
    }

    #[test]
    fn test_malformed_rule_table_is_a_parse_error() {
        let err = parse("rename = 3").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_merge_file_appends_rules_and_overlays_scalars() {
        let mut first = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            first,
            r#"
[session]
client_name = "first"

[[connect]]
source = "^a:"
destination = "^b:"
"#
        )
        .unwrap();

        let mut second = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            second,
            r#"
[telemetry]
log_level = "warn"

[[connect]]
source = "^c:"
destination = "^d:"
"#
        )
        .unwrap();

        let config = merge_file(PlumbConfig::default(), first.path()).unwrap();
        let config = merge_file(config, second.path()).unwrap();

        assert_eq!(config.session.client_name, "first");
        assert_eq!(config.telemetry.log_level, "warn");
        assert_eq!(config.rules.connect.len(), 2);
        assert_eq!(config.rules.connect[0].source.as_deref(), Some("^a:"));
        assert_eq!(config.rules.connect[1].source.as_deref(), Some("^c:"));
    }

    #[test]
    fn test_load_rules_file_ignores_other_sections() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[session]
client_name = "ignored"

[[rename]]
pattern = "^x:(.*)$"
replacement = "x:renamed_$1"
"#
        )
        .unwrap();

        let rules = load_rules_file(file.path()).unwrap();
        assert_eq!(rules.rename.len(), 1);
        assert!(rules.connect.is_empty());
    }

    #[test]
    fn test_missing_file_is_a_read_error() {
        let err = load_rules_file(Path::new("/nonexistent/rules.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::FileRead { .. }));
    }

    #[test]
    fn test_missing_config_override_is_a_read_error() {
        let err = PlumbConfig::load_with_sources_from(Some(Path::new("/nonexistent/typo.toml")))
            .unwrap_err();
        match err {
            ConfigError::FileRead { path, .. } => {
                assert_eq!(path, PathBuf::from("/nonexistent/typo.toml"))
            }
            other => panic!("expected FileRead, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_flag() {
        assert_eq!(parse_flag("YES"), Some(true));
        assert_eq!(parse_flag("0"), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }
}
