//! TB-016: Configuration parsing and validation.
//!
//! Parses tabula.yaml and validates structural constraints:
//! - Artifact name and meta version are well formed
//! - The default environment exists
//! - Parent references exist and form no cycle
//! - Import environment mappings name imported artifacts

use super::types::{ProjectConfig, CONFIG_FILE};
use crate::error::{Error, Result};
use crate::persist;
use crate::schema::version::validate_meta_version;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::debug;

static NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9_\-]*$").expect("valid regex"));

/// Validation error.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Path of the configuration file inside a project root.
pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

/// Parse a tabula.yaml from a string.
pub fn parse_config(yaml: &str) -> Result<ProjectConfig> {
    serde_yaml_ng::from_str(yaml).map_err(|e| Error::yaml(CONFIG_FILE, e))
}

/// Validate a parsed config. Returns a list of errors (empty = valid).
pub fn validate_config(config: &ProjectConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if !NAME_RE.is_match(&config.name) {
        errors.push(ValidationError {
            message: format!(
                "artifact name '{}' must be lowercase letters, digits, '_' or '-'",
                config.name
            ),
        });
    }

    if let Err(e) = validate_meta_version(&config.version) {
        errors.push(ValidationError {
            message: e.to_string(),
        });
    }

    if !config.envs.contains_key(&config.default_env) {
        errors.push(ValidationError {
            message: format!("default_env '{}' is not a declared env", config.default_env),
        });
    }

    for (name, env) in &config.envs {
        if let Some(ref parent) = env.parent {
            if !config.envs.contains_key(parent) {
                errors.push(ValidationError {
                    message: format!("env '{}' has unknown parent '{}'", name, parent),
                });
            }
        }
        for artifact in env.import_envs.keys() {
            if !config.imported_artifacts.contains_key(artifact) {
                errors.push(ValidationError {
                    message: format!(
                        "env '{}' maps an env for '{}' which is not imported",
                        name, artifact
                    ),
                });
            }
        }
    }

    // Parent cycles
    for start in config.envs.keys() {
        let mut seen = vec![start.as_str()];
        let mut current = start.as_str();
        while let Some(parent) = config.envs.get(current).and_then(|e| e.parent.as_deref()) {
            if parent == start {
                errors.push(ValidationError {
                    message: format!("env '{}' inherits from itself via {}", start, seen.join(" -> ")),
                });
                break;
            }
            if seen.contains(&parent) {
                break;
            }
            seen.push(parent);
            current = parent;
        }
    }

    for (artifact, import) in &config.imported_artifacts {
        if artifact == &config.name {
            errors.push(ValidationError {
                message: format!("artifact '{}' imports itself", artifact),
            });
        }
        if let Some(ref version) = import.version {
            if let Err(e) = validate_meta_version(version) {
                errors.push(ValidationError {
                    message: format!("imported artifact '{}': {}", artifact, e),
                });
            }
        }
    }

    errors
}

/// Parse and validate; every validation problem is reported in one setup error.
pub fn parse_and_validate(yaml: &str) -> Result<ProjectConfig> {
    let config = parse_config(yaml)?;
    let errors = validate_config(&config);
    if !errors.is_empty() {
        let messages: Vec<String> = errors.iter().map(ToString::to_string).collect();
        return Err(Error::setup(format!(
            "invalid {}: {}",
            CONFIG_FILE,
            messages.join("; ")
        )));
    }
    Ok(config)
}

/// Load the configuration of the project rooted at `root`.
pub fn load_config(root: &Path) -> Result<ProjectConfig> {
    let path = config_path(root);
    if !path.exists() {
        return Err(Error::setup(format!(
            "no {} found in {}",
            CONFIG_FILE,
            root.display()
        )));
    }
    let content = std::fs::read_to_string(&path).map_err(|e| Error::io(&path, e))?;
    let config = parse_and_validate(&content)?;
    debug!(artifact = %config.name, envs = config.envs.len(), "loaded project config");
    Ok(config)
}

/// Save the configuration atomically.
pub fn save_config(root: &Path, config: &ProjectConfig) -> Result<()> {
    persist::write_yaml(&config_path(root), config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn messages(yaml: &str) -> Vec<String> {
        let config = parse_config(yaml).unwrap();
        validate_config(&config).into_iter().map(|e| e.message).collect()
    }

    #[test]
    fn test_tb016_parse_valid() {
        let yaml = r#"
name: zoo
version: v0.1
envs:
  complete: {}
  sample:
    parent: complete
"#;
        let errors = messages(yaml);
        assert!(errors.is_empty(), "unexpected errors: {:?}", errors);
    }

    #[test]
    fn test_tb016_bad_name_and_version() {
        let errors = messages("name: Zoo Project\nversion: latest\n");
        assert!(errors.iter().any(|e| e.contains("artifact name 'Zoo Project'")));
        assert!(errors.iter().any(|e| e.contains("malformed version string 'latest'")));
    }

    #[test]
    fn test_tb016_missing_default_env() {
        let errors = messages("name: zoo\ndefault_env: prod\n");
        assert!(errors.iter().any(|e| e.contains("default_env 'prod'")));
    }

    #[test]
    fn test_tb016_unknown_parent_and_cycle() {
        let yaml = r#"
name: zoo
envs:
  complete:
    parent: ghost
  a:
    parent: b
  b:
    parent: a
"#;
        let errors = messages(yaml);
        assert!(errors.iter().any(|e| e.contains("unknown parent 'ghost'")));
        assert!(errors.iter().any(|e| e.contains("env 'a' inherits from itself")));
    }

    #[test]
    fn test_tb016_import_env_for_unknown_artifact() {
        let yaml = r#"
name: zoo
envs:
  complete:
    import_envs:
      census: complete
"#;
        let errors = messages(yaml);
        assert!(errors.iter().any(|e| e.contains("'census' which is not imported")));
    }

    #[test]
    fn test_tb016_load_reports_all_problems_at_once() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            config_path(dir.path()),
            "name: Zoo\ndefault_env: prod\n",
        )
        .unwrap();
        let err = load_config(dir.path()).unwrap_err();
        assert!(err.is_setup());
        let msg = err.to_string();
        assert!(msg.contains("artifact name"));
        assert!(msg.contains("default_env 'prod'"));
    }

    #[test]
    fn test_tb016_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_config(dir.path()).unwrap_err();
        assert!(err.to_string().contains("no tabula.yaml"));
    }

    #[test]
    fn test_tb016_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ProjectConfig::new("zoo");
        config.cron_bumps.insert("dogs".into(), 2);
        save_config(dir.path(), &config).unwrap();
        assert_eq!(load_config(dir.path()).unwrap(), config);
    }
}
