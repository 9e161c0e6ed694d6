//! Matrix cell definitions and the matrix file loader.

use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Default per-cell timeout when the matrix file gives none.
pub const DEFAULT_TIMEOUT_SECS: u64 = 3_600;

/// Why a matrix file could not be loaded.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read matrix file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid matrix file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("matrix cell '{0}' has an empty command")]
    EmptyCommand(String),

    #[error("matrix cell name must not be empty")]
    EmptyName,

    #[error("matrix cell '{0}' appears more than once")]
    DuplicateCell(String),
}

/// One cell of the test matrix.
///
/// `name` doubles as the job identifier: it is the check-run name the
/// outcome is reported under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixCell {
    /// Job identifier (`py3.9`, `integration-linux`).
    pub name: String,

    /// Command to execute (first element is the executable).
    pub command: Vec<String>,

    /// Timeout in seconds (0 = none).
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Whether this cell runs.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Extra, non-secret environment for the command.
    #[serde(default)]
    pub env: Vec<(String, String)>,
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_enabled() -> bool {
    true
}

impl MatrixCell {
    /// Create a cell.
    pub fn custom(name: impl Into<String>, command: Vec<String>, timeout_secs: u64) -> Self {
        Self {
            name: name.into(),
            command,
            timeout_secs,
            enabled: true,
            env: Vec::new(),
        }
    }

    /// Disable this cell.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Add a plain environment variable.
    pub fn with_env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((name.into(), value.into()));
        self
    }
}

#[derive(Deserialize)]
struct MatrixFile {
    cells: Vec<MatrixCell>,
}

/// Load and validate a JSON matrix file of the form `{"cells": [...]}`.
pub fn load_matrix(path: &Path) -> Result<Vec<MatrixCell>, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let file: MatrixFile = serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })?;
    validate(&file.cells)?;
    Ok(file.cells)
}

/// Names must be unique: two cells reporting under one name would race for
/// the same check run.
pub fn validate(cells: &[MatrixCell]) -> Result<(), ConfigError> {
    let mut seen = BTreeSet::new();
    for cell in cells {
        if cell.name.trim().is_empty() {
            return Err(ConfigError::EmptyName);
        }
        if cell.command.is_empty() {
            return Err(ConfigError::EmptyCommand(cell.name.clone()));
        }
        if !seen.insert(cell.name.as_str()) {
            return Err(ConfigError::DuplicateCell(cell.name.clone()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_matrix(json: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        file.write_all(json.as_bytes()).expect("write");
        file
    }

    #[test]
    fn test_custom_cell() {
        let cell = MatrixCell::custom("py3.9", vec!["echo".to_string(), "hi".to_string()], 60);
        assert_eq!(cell.name, "py3.9");
        assert_eq!(cell.timeout_secs, 60);
        assert!(cell.enabled);
        assert!(cell.env.is_empty());
    }

    #[test]
    fn test_cell_disabled() {
        let cell = MatrixCell::custom("py3.9", vec!["true".to_string()], 60).disabled();
        assert!(!cell.enabled);
    }

    #[test]
    fn test_load_matrix_applies_defaults() {
        let file = write_matrix(
            r#"{"cells": [
                {"name": "py3.9", "command": ["pytest", "-x"]},
                {"name": "py3.10", "command": ["pytest"], "timeout_secs": 90,
                 "enabled": false, "env": [["PYTHON", "3.10"]]}
            ]}"#,
        );
        let cells = load_matrix(file.path()).expect("load");
        assert_eq!(cells.len(), 2);
        assert_eq!(cells[0].timeout_secs, DEFAULT_TIMEOUT_SECS);
        assert!(cells[0].enabled);
        assert!(!cells[1].enabled);
        assert_eq!(cells[1].env, vec![("PYTHON".to_string(), "3.10".to_string())]);
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let file = write_matrix(
            r#"{"cells": [
                {"name": "py3.9", "command": ["a"]},
                {"name": "py3.9", "command": ["b"]}
            ]}"#,
        );
        let err = load_matrix(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateCell(name) if name == "py3.9"));
    }

    #[test]
    fn test_empty_command_rejected() {
        let file = write_matrix(r#"{"cells": [{"name": "lint", "command": []}]}"#);
        assert!(matches!(
            load_matrix(file.path()).unwrap_err(),
            ConfigError::EmptyCommand(_)
        ));
    }

    #[test]
    fn test_invalid_json() {
        let file = write_matrix("{ not json");
        assert!(matches!(
            load_matrix(file.path()).unwrap_err(),
            ConfigError::Parse { .. }
        ));
    }
}
