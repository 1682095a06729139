//! Configuration for pseudo console sessions
//!
//! Settings are layered with the precedence CLI > environment > file >
//! defaults. The file is TOML, by default at
//! `<config_dir>/conpty/config.toml`. The environment variables are
//! `CONPTY_SHELL`, `CONPTY_COLS` and `CONPTY_ROWS`. CLI overrides are applied
//! by the caller before a final [`Config::validate`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::command::CommandBuilder;
use crate::size::ConsoleSize;

/// Session configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Program to run (default shell when unset)
    pub shell: Option<String>,
    /// Arguments passed to the program
    pub args: Vec<String>,
    /// Initial console columns
    pub cols: u16,
    /// Initial console rows
    pub rows: u16,
    /// Working directory for the program
    pub cwd: Option<PathBuf>,
    /// Extra environment variables
    pub env: BTreeMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        let size = ConsoleSize::default();
        Self {
            shell: None,
            args: Vec::new(),
            cols: size.cols,
            rows: size.rows,
            cwd: None,
            env: BTreeMap::new(),
        }
    }
}

/// Configuration error
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    pub message: String,
    pub field: Option<String>,
}

impl ConfigError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            field: None,
        }
    }

    fn field(field: &str, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            field: Some(field.to_string()),
        }
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(field) = &self.field {
            write!(f, "Config error in '{}': {}", field, self.message)
        } else {
            write!(f, "Config error: {}", self.message)
        }
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    /// Load configuration from `path` (or the default location) and the
    /// environment. Validation is left to the caller, after any CLI
    /// overrides have been applied.
    ///
    /// An explicit path must exist and parse. A missing default file is
    /// ignored; an invalid one is logged and ignored.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let default_path = Self::default_config_path();
        Self::load_with(path, default_path.as_deref(), |key| env::var(key).ok())
    }

    /// [`Config::load`] with the default file location and the environment
    /// lookup supplied by the caller
    pub fn load_with<F>(
        path: Option<&Path>,
        default_path: Option<&Path>,
        lookup: F,
    ) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match path {
            Some(path) => Self::load_from_file(path)?,
            None => default_path.map_or_else(Self::default, Self::load_default_file),
        };

        config.apply_env(lookup);
        Ok(config)
    }

    fn load_default_file(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match Self::load_from_file(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to load config from {:?}: {}", path, e);
                Self::default()
            }
        }
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)
            .map_err(|e| ConfigError::new(format!("Failed to read config file: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| ConfigError::new(format!("Failed to parse config file: {}", e)))
    }

    /// Apply `CONPTY_*` environment variables
    pub fn apply_env_vars(&mut self) {
        self.apply_env(|key| env::var(key).ok());
    }

    /// Apply environment overrides read through `lookup`.
    /// Values that do not parse are ignored.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(val) = lookup("CONPTY_SHELL") {
            self.shell = Some(val);
        }
        if let Some(val) = lookup("CONPTY_COLS") {
            if let Ok(cols) = val.parse() {
                self.cols = cols;
            }
        }
        if let Some(val) = lookup("CONPTY_ROWS") {
            if let Ok(rows) = val.parse() {
                self.rows = rows;
            }
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.size().validate().is_err() {
            let field = if (1..=crate::size::MAX_DIMENSION).contains(&self.cols) {
                "rows"
            } else {
                "cols"
            };
            return Err(ConfigError::field(
                field,
                format!(
                    "Console size {}x{} is out of range: both dimensions must be between 1 and {}",
                    self.cols,
                    self.rows,
                    crate::size::MAX_DIMENSION
                ),
            ));
        }

        if let Some(shell) = &self.shell {
            if shell.trim().is_empty() {
                return Err(ConfigError::field("shell", "Shell must not be empty"));
            }
        }

        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("conpty").join("config.toml"))
    }

    /// Initial console size
    pub fn size(&self) -> ConsoleSize {
        ConsoleSize::new(self.cols, self.rows)
    }

    /// Build the command this configuration describes
    pub fn command(&self) -> CommandBuilder {
        let mut cmd = match &self.shell {
            Some(shell) => CommandBuilder::new(shell),
            None => CommandBuilder::default_shell(),
        };
        cmd = cmd.args(&self.args);
        for (key, value) in &self.env {
            cmd = cmd.env(key, value);
        }
        if let Some(cwd) = &self.cwd {
            cmd = cmd.current_dir(cwd);
        }
        cmd
    }

    /// Serialize to TOML
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self)
            .map_err(|e| ConfigError::new(format!("Failed to serialize config: {}", e)))
    }

    /// Save configuration to a file, creating parent directories
    pub fn save_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                ConfigError::new(format!("Failed to create config directory: {}", e))
            })?;
        }

        fs::write(path, self.to_toml()?)
            .map_err(|e| ConfigError::new(format!("Failed to write config file: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.shell, None);
        assert_eq!(config.size(), ConsoleSize::new(80, 24));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_toml_parsing() {
        let toml_str = r#"
            shell = "pwsh.exe"
            args = ["-NoLogo", "-NoProfile"]
            cols = 132
            cwd = 'C:\work'

            [env]
            TERM = "xterm-256color"
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.shell.as_deref(), Some("pwsh.exe"));
        assert_eq!(config.args, ["-NoLogo", "-NoProfile"]);
        assert_eq!(config.cols, 132);
        // Missing fields fall back to defaults
        assert_eq!(config.rows, 24);
        assert_eq!(config.cwd, Some(PathBuf::from(r"C:\work")));
        assert_eq!(config.env["TERM"], "xterm-256color");
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_env(lookup(&[
            ("CONPTY_SHELL", "cmd.exe"),
            ("CONPTY_COLS", "100"),
            ("CONPTY_ROWS", "not-a-number"),
        ]));
        assert_eq!(config.shell.as_deref(), Some("cmd.exe"));
        assert_eq!(config.cols, 100);
        assert_eq!(config.rows, 24);
    }

    #[test]
    fn test_validate_size() {
        let config = Config {
            cols: 0,
            ..Config::default()
        };
        let err = config.validate().unwrap_err();
        assert_eq!(err.field.as_deref(), Some("cols"));

        let config = Config {
            rows: 40_000,
            ..Config::default()
        };
        let err = config.validate().unwrap_err();
        assert_eq!(err.field.as_deref(), Some("rows"));
        assert!(err.to_string().starts_with("Config error in 'rows'"));
    }

    #[test]
    fn test_validate_empty_shell() {
        let config = Config {
            shell: Some("  ".to_string()),
            ..Config::default()
        };
        let err = config.validate().unwrap_err();
        assert_eq!(err.field.as_deref(), Some("shell"));
    }

    #[test]
    fn test_command_from_config() {
        let mut config = Config {
            shell: Some("cmd.exe".to_string()),
            args: vec!["/k".to_string(), "echo hi".to_string()],
            cwd: Some(PathBuf::from(r"C:\work")),
            ..Config::default()
        };
        config.env.insert("FOO".to_string(), "bar".to_string());

        let cmd = config.command();
        let wide = cmd.command_line().unwrap();
        let line = String::from_utf16(&wide[..wide.len() - 1]).unwrap();
        assert_eq!(line, r#"cmd.exe /k "echo hi""#);
        assert_eq!(cmd.get_current_dir(), Some(Path::new(r"C:\work")));
        assert!(cmd.environment_block().unwrap().is_some());
    }

    #[test]
    fn test_save_and_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config {
            shell: Some("pwsh.exe".to_string()),
            cols: 120,
            rows: 40,
            ..Config::default()
        };
        config.env.insert("LANG".to_string(), "C.UTF-8".to_string());
        config.save_to_file(&path).unwrap();

        let loaded = Config::load_from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_explicit_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let err = Config::load(Some(path.as_path())).unwrap_err();
        assert!(err.message.starts_with("Failed to read config file"));
    }

    #[test]
    fn test_load_env_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "shell = \"cmd.exe\"\ncols = 100\nrows = 30\n").unwrap();

        let config = Config::load_with(
            Some(path.as_path()),
            None,
            lookup(&[("CONPTY_SHELL", "pwsh.exe"), ("CONPTY_ROWS", "50")]),
        )
        .unwrap();
        assert_eq!(config.shell.as_deref(), Some("pwsh.exe"));
        // Untouched by the environment, so the file value stays
        assert_eq!(config.cols, 100);
        assert_eq!(config.rows, 50);
    }

    #[test]
    fn test_load_default_file_is_used() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "cols = 132\n").unwrap();

        let config = Config::load_with(None, Some(path.as_path()), lookup(&[])).unwrap();
        assert_eq!(config.cols, 132);
        assert_eq!(config.rows, 24);
    }

    #[test]
    fn test_load_missing_default_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");

        let config = Config::load_with(None, Some(path.as_path()), lookup(&[])).unwrap();
        assert_eq!(config, Config::default());

        let config = Config::load_with(None, None, lookup(&[("CONPTY_COLS", "90")])).unwrap();
        assert_eq!(config.cols, 90);
    }

    #[test]
    fn test_load_invalid_default_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "cols = \"wide\"").unwrap();

        let config =
            Config::load_with(None, Some(path.as_path()), lookup(&[("CONPTY_SHELL", "cmd.exe")]))
                .unwrap();
        assert_eq!(config.shell.as_deref(), Some("cmd.exe"));
        assert_eq!(config.size(), ConsoleSize::default());
    }

    #[test]
    fn test_load_invalid_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "cols = \"wide\"").unwrap();
        let err = Config::load_from_file(&path).unwrap_err();
        assert!(err.message.starts_with("Failed to parse config file"));
    }
}
