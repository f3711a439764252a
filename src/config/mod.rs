use crate::error::{CorePoolError, Result};
use crate::process::spawner::command_name;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Timing and placement settings shared by every guard of a supervisor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Private working directory for spawned cores (inherited when unset)
    #[serde(default)]
    pub working_dir: Option<PathBuf>,

    /// A generation that exits sooner than this is fatal (in milliseconds)
    #[serde(default = "default_fast_fail")]
    pub fast_fail_ms: u64,

    /// Time allowed after SIGTERM before force kill (in milliseconds)
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_ms: u64,

    /// Time allowed after force kill before warning (in milliseconds)
    #[serde(default = "default_kill_timeout")]
    pub kill_timeout_ms: u64,

    /// Time given to the drains to flush after exit (in milliseconds)
    #[serde(default = "default_drain_grace")]
    pub drain_grace_ms: u64,
}

// Default value functions for serde
fn default_fast_fail() -> u64 {
    1000
}

fn default_stop_timeout() -> u64 {
    1000
}

fn default_kill_timeout() -> u64 {
    5000
}

fn default_drain_grace() -> u64 {
    200
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            working_dir: None,
            fast_fail_ms: default_fast_fail(),
            stop_timeout_ms: default_stop_timeout(),
            kill_timeout_ms: default_kill_timeout(),
            drain_grace_ms: default_drain_grace(),
        }
    }
}

impl SupervisorConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let timings = [
            ("fast_fail_ms", self.fast_fail_ms),
            ("stop_timeout_ms", self.stop_timeout_ms),
            ("kill_timeout_ms", self.kill_timeout_ms),
            ("drain_grace_ms", self.drain_grace_ms),
        ];
        for (field, value) in timings {
            if value == 0 {
                return Err(CorePoolError::ConfigValidationError(format!(
                    "{} must be greater than 0",
                    field
                )));
            }
        }

        if self.kill_timeout_ms < self.stop_timeout_ms {
            return Err(CorePoolError::ConfigValidationError(
                "kill_timeout_ms must not be shorter than stop_timeout_ms".to_string(),
            ));
        }

        // Validate working directory exists if specified
        if let Some(ref dir) = self.working_dir {
            if !dir.exists() {
                return Err(CorePoolError::ConfigValidationError(format!(
                    "Working directory does not exist: {}",
                    dir.display()
                )));
            }
            if !dir.is_dir() {
                return Err(CorePoolError::ConfigValidationError(format!(
                    "Working directory is not a directory: {}",
                    dir.display()
                )));
            }
        }

        Ok(())
    }

    pub fn fast_fail(&self) -> Duration {
        Duration::from_millis(self.fast_fail_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn kill_timeout(&self) -> Duration {
        Duration::from_millis(self.kill_timeout_ms)
    }

    pub fn drain_grace(&self) -> Duration {
        Duration::from_millis(self.drain_grace_ms)
    }
}

/// One core to run under the supervisor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Display name (defaults to the executable's base name)
    #[serde(default)]
    pub name: Option<String>,

    /// Executable path followed by its arguments
    pub command: Vec<String>,

    /// Environment variables laid over the inherited environment
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl CoreConfig {
    pub fn new(command: Vec<String>) -> Self {
        Self {
            name: None,
            command,
            env: HashMap::new(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self.command.first() {
            None => Err(CorePoolError::MissingConfigField("command".to_string())),
            Some(program) if program.is_empty() => Err(CorePoolError::ConfigValidationError(
                "command executable must not be empty".to_string(),
            )),
            Some(_) => Ok(()),
        }
    }

    pub fn display_name(&self) -> String {
        match self.name {
            Some(ref name) if !name.is_empty() => name.clone(),
            _ => command_name(&self.command),
        }
    }

    fn expand_env_vars(&mut self) {
        self.command = self
            .command
            .iter()
            .map(|arg| expand_env_in_string(arg))
            .collect();

        // Values only
        self.env = self
            .env
            .iter()
            .map(|(k, v)| (k.clone(), expand_env_in_string(v)))
            .collect();
    }
}

/// Contents of a pool file: supervisor settings plus the cores to run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoolConfig {
    #[serde(default)]
    pub supervisor: SupervisorConfig,

    #[serde(default)]
    pub cores: Vec<CoreConfig>,
}

impl PoolConfig {
    /// Load a pool file (supports TOML and JSON)
    pub fn from_file(path: &Path) -> Result<PoolConfig> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| CorePoolError::ConfigError(format!("Failed to read config file: {}", e)))?;

        // Determine format based on file extension
        let extension = path.extension().and_then(|s| s.to_str()).unwrap_or("");

        let mut config = match extension {
            "toml" => Self::parse_toml(&contents)?,
            "json" => Self::parse_json(&contents)?,
            _ => {
                return Err(CorePoolError::InvalidConfig(format!(
                    "Unsupported file format: {}. Use .toml or .json",
                    extension
                )))
            }
        };

        config.expand_env_vars();
        config.validate()?;

        Ok(config)
    }

    fn parse_toml(contents: &str) -> Result<PoolConfig> {
        toml::from_str(contents)
            .map_err(|e| CorePoolError::InvalidConfig(format!("Failed to parse TOML: {}", e)))
    }

    fn parse_json(contents: &str) -> Result<PoolConfig> {
        serde_json::from_str(contents)
            .map_err(|e| CorePoolError::InvalidConfig(format!("Failed to parse JSON: {}", e)))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.supervisor.validate()?;

        if self.cores.is_empty() {
            return Err(CorePoolError::InvalidConfig(
                "No core configuration found in file".to_string(),
            ));
        }

        for core in &self.cores {
            core.validate()?;
        }

        Ok(())
    }

    fn expand_env_vars(&mut self) {
        if let Some(ref dir) = self.supervisor.working_dir {
            self.supervisor.working_dir = Some(expand_env_in_path(dir));
        }

        for core in &mut self.cores {
            core.expand_env_vars();
        }
    }
}

/// Expand `$VAR` and `${VAR}` references to variables that are set
fn expand_env_in_string(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut rest = s;

    while let Some(pos) = rest.find('$') {
        result.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        let (name, consumed) = if let Some(braced) = after.strip_prefix('{') {
            match braced.find('}') {
                Some(end) => (&braced[..end], end + 2),
                None => ("", 0),
            }
        } else {
            let end = after
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(after.len());
            (&after[..end], end)
        };

        match std::env::var(name) {
            Ok(value) if !name.is_empty() => {
                result.push_str(&value);
                rest = &after[consumed..];
            }
            _ => {
                // Leave unknown references untouched
                result.push('$');
                rest = after;
            }
        }
    }

    result.push_str(rest);
    result
}

fn expand_env_in_path(path: &Path) -> PathBuf {
    let path_str = path.to_string_lossy();
    PathBuf::from(expand_env_in_string(&path_str))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_supervisor_config_defaults() {
        let config = SupervisorConfig::default();

        assert_eq!(config.working_dir, None);
        assert_eq!(config.fast_fail(), Duration::from_secs(1));
        assert_eq!(config.stop_timeout(), Duration::from_secs(1));
        assert_eq!(config.kill_timeout(), Duration::from_secs(5));
        assert_eq!(config.drain_grace(), Duration::from_millis(200));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_zero_timing() {
        let config = SupervisorConfig {
            fast_fail_ms: 0,
            ..Default::default()
        };

        assert!(matches!(
            config.validate(),
            Err(CorePoolError::ConfigValidationError(_))
        ));
    }

    #[test]
    fn test_validate_kill_shorter_than_stop() {
        let config = SupervisorConfig {
            stop_timeout_ms: 3000,
            kill_timeout_ms: 1000,
            ..Default::default()
        };

        assert!(matches!(
            config.validate(),
            Err(CorePoolError::ConfigValidationError(_))
        ));
    }

    #[test]
    fn test_validate_missing_working_dir() {
        let config = SupervisorConfig {
            working_dir: Some(PathBuf::from("/nonexistent/directory")),
            ..Default::default()
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_core_config_validate() {
        assert!(CoreConfig::new(vec!["/bin/echo".to_string()])
            .validate()
            .is_ok());
        assert!(matches!(
            CoreConfig::new(vec![]).validate(),
            Err(CorePoolError::MissingConfigField(_))
        ));
        assert!(matches!(
            CoreConfig::new(vec![String::new()]).validate(),
            Err(CorePoolError::ConfigValidationError(_))
        ));
    }

    #[test]
    fn test_core_display_name() {
        let mut core = CoreConfig::new(vec!["/opt/cores/sing-box".to_string(), "run".to_string()]);
        assert_eq!(core.display_name(), "sing-box");

        core.name = Some("proxy".to_string());
        assert_eq!(core.display_name(), "proxy");
    }

    #[test]
    fn test_expand_env_vars() {
        std::env::set_var("COREPOOL_TEST_VAR", "test_value");
        std::env::set_var("COREPOOL_TEST_PATH", "/tmp");

        let mut config = PoolConfig {
            supervisor: SupervisorConfig {
                working_dir: Some(PathBuf::from("${COREPOOL_TEST_PATH}")),
                ..Default::default()
            },
            cores: vec![CoreConfig {
                name: None,
                command: vec![
                    "$COREPOOL_TEST_PATH/core".to_string(),
                    "--arg=${COREPOOL_TEST_VAR}".to_string(),
                ],
                env: {
                    let mut map = HashMap::new();
                    map.insert("KEY".to_string(), "$COREPOOL_TEST_VAR".to_string());
                    map
                },
            }],
        };

        config.expand_env_vars();

        assert_eq!(config.supervisor.working_dir, Some(PathBuf::from("/tmp")));
        assert_eq!(config.cores[0].command[0], "/tmp/core");
        assert_eq!(config.cores[0].command[1], "--arg=test_value");
        assert_eq!(config.cores[0].env.get("KEY"), Some(&"test_value".to_string()));
    }

    #[test]
    fn test_expand_leaves_unknown_references() {
        std::env::remove_var("COREPOOL_UNSET_VAR");
        assert_eq!(
            expand_env_in_string("$COREPOOL_UNSET_VAR and ${COREPOOL_UNSET_VAR}"),
            "$COREPOOL_UNSET_VAR and ${COREPOOL_UNSET_VAR}"
        );
        assert_eq!(expand_env_in_string("cost: $5"), "cost: $5");
        assert_eq!(expand_env_in_string("trailing $"), "trailing $");
    }

    #[test]
    fn test_parse_toml() {
        let toml_content = r#"
            [supervisor]
            fast_fail_ms = 500

            [[cores]]
            name = "proxy"
            command = ["/usr/bin/sing-box", "run", "-c", "config.json"]

            [[cores]]
            command = ["/usr/bin/hysteria", "client"]
            env = { HYSTERIA_LOG_LEVEL = "info" }
        "#;

        let config = PoolConfig::parse_toml(toml_content).unwrap();
        assert_eq!(config.supervisor.fast_fail_ms, 500);
        assert_eq!(config.supervisor.stop_timeout_ms, 1000);
        assert_eq!(config.cores.len(), 2);
        assert_eq!(config.cores[0].display_name(), "proxy");
        assert_eq!(config.cores[1].display_name(), "hysteria");
        assert_eq!(
            config.cores[1].env.get("HYSTERIA_LOG_LEVEL"),
            Some(&"info".to_string())
        );
    }

    #[test]
    fn test_parse_json() {
        let json_content = r#"
            {
                "cores": [
                    { "command": ["/usr/bin/naive", "config.json"] }
                ]
            }
        "#;

        let config = PoolConfig::parse_json(json_content).unwrap();
        assert_eq!(config.supervisor, SupervisorConfig::default());
        assert_eq!(config.cores.len(), 1);
        assert_eq!(config.cores[0].command[0], "/usr/bin/naive");
    }

    #[test]
    fn test_from_file_toml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("pool.toml");

        fs::write(
            &config_path,
            r#"
            [[cores]]
            command = ["/bin/echo", "hello"]
            "#,
        )
        .unwrap();

        let config = PoolConfig::from_file(&config_path).unwrap();
        assert_eq!(config.cores.len(), 1);
        assert_eq!(config.cores[0].display_name(), "echo");
    }

    #[test]
    fn test_from_file_without_cores() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("pool.json");

        fs::write(&config_path, r#"{ "supervisor": {} }"#).unwrap();

        let result = PoolConfig::from_file(&config_path);
        assert!(matches!(result, Err(CorePoolError::InvalidConfig(_))));
    }

    #[test]
    fn test_from_file_unsupported_format() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("pool.yaml");

        fs::write(&config_path, "cores: []").unwrap();

        let result = PoolConfig::from_file(&config_path);
        assert!(matches!(result, Err(CorePoolError::InvalidConfig(_))));
    }
}
