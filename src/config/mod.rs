//! Project configuration: types, parsing and environment resolution.

pub mod parser;
pub mod resolver;
pub mod types;

pub use parser::{load_config, save_config, validate_config, ValidationError};
pub use types::{ArtifactEnv, ImportedArtifact, ProjectConfig, ResolvedParam, CONFIG_FILE};
