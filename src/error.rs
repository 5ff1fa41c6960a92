//! TB-000: Error taxonomy.
//!
//! Setup errors are misconfiguration found before any data is touched.
//! Resolution errors mean a schema or dependency graph could not be
//! completed; they carry the full search path. External errors come from
//! subprocess tools and step bodies and are passed through unchanged.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("setup error: {0}")]
    Setup(String),

    #[error("resolution error: {0}")]
    Resolution(String),

    #[error("{tool} exited with code {code}: {stderr}")]
    External {
        tool: String,
        code: i32,
        stderr: String,
    },

    #[error("step '{step}' failed: {source}")]
    Step {
        step: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("yaml error in {origin}: {source}")]
    Yaml {
        origin: String,
        #[source]
        source: serde_yaml_ng::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn setup(msg: impl Into<String>) -> Self {
        Self::Setup(msg.into())
    }

    pub fn resolution(msg: impl Into<String>) -> Self {
        Self::Resolution(msg.into())
    }

    pub fn io(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }

    pub fn yaml(origin: impl Into<String>, source: serde_yaml_ng::Error) -> Self {
        Self::Yaml {
            origin: origin.into(),
            source,
        }
    }

    pub fn is_setup(&self) -> bool {
        matches!(self, Self::Setup(_))
    }

    pub fn is_resolution(&self) -> bool {
        matches!(self, Self::Resolution(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tb000_messages_carry_context() {
        let e = Error::setup("unknown environment 'prod'");
        assert_eq!(e.to_string(), "setup error: unknown environment 'prod'");
        assert!(e.is_setup());

        let e = Error::External {
            tool: "dvc".into(),
            code: 2,
            stderr: "no remote".into(),
        };
        assert_eq!(e.to_string(), "dvc exited with code 2: no remote");
    }

    #[test]
    fn test_tb000_io_error_names_path() {
        let e = Error::io(
            "/tmp/missing.yaml",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert!(e.to_string().contains("/tmp/missing.yaml"));
        assert!(!e.is_resolution());
    }
}
