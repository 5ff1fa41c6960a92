//! TB-024: Runtime assembly.
//!
//! Loads a project from disk: the base config, every datascript module
//! under `schema/`, and the metadata of imported artifacts (recursively,
//! following each artifact's own imports). The local modules are then
//! converted into the artifact's namespace metadata.

use crate::config::{load_config, ProjectConfig};
use crate::convert::{codegen, to_bedrock};
use crate::datascript::{parse_file, ScriptModule};
use crate::error::{Error, Result};
use crate::persist;
use crate::pipeline::{PipelineRegistry, Runner, StageResolver, StageSet};
use crate::schema::identifier::IdBase;
use crate::schema::lookup::SchemaLookup;
use crate::schema::metadata::{ArtifactInfo, ArtifactMetadata, INFO_FILE};
use crate::schema::version::{DataVersion, VersionTag};
use indexmap::IndexMap;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Directory holding the datascript modules of a project.
pub const SCHEMA_DIR: &str = "schema";
/// Default parent directory of imported artifacts.
pub const IMPORTS_DIR: &str = "imports";
/// Directory the artifact's own metadata is published to.
pub const METADATA_DIR: &str = "metadata";

/// A loaded project.
#[derive(Debug)]
pub struct Runtime {
    pub root: PathBuf,
    pub config: ProjectConfig,
    pub modules: Vec<ScriptModule>,
    pub imported: IndexMap<String, ArtifactMetadata>,
    pub metadata: ArtifactMetadata,
}

/// Parse every `*.ds` file below `<root>/schema`, in path order.
pub fn discover_modules(root: &Path) -> Result<Vec<ScriptModule>> {
    let pattern = root.join(SCHEMA_DIR).join("**").join("*.ds");
    let pattern = pattern.to_string_lossy();
    let mut paths = Vec::new();
    for entry in glob::glob(&pattern)
        .map_err(|e| Error::setup(format!("bad schema glob '{}': {}", pattern, e)))?
    {
        let path = entry.map_err(|e| Error::setup(format!("cannot read schema dir: {}", e)))?;
        paths.push(path);
    }
    paths.sort();
    let modules = paths
        .iter()
        .map(|p| parse_file(p))
        .collect::<Result<Vec<_>>>()?;
    debug!(count = modules.len(), "discovered datascript modules");
    Ok(modules)
}

fn import_dir(root: &Path, config: &ProjectConfig, name: &str) -> PathBuf {
    match config.imported_artifacts.get(name).and_then(|i| i.path.as_ref()) {
        Some(p) if p.is_absolute() => p.clone(),
        Some(p) => root.join(p),
        None => root.join(IMPORTS_DIR).join(name),
    }
}

/// Load every imported artifact, then the artifacts they import.
///
/// Directly imported artifacts honour the configured namespace subset and
/// version pin. Transitive imports are read in full from a directory next
/// to the artifact that named them.
pub fn load_imports(root: &Path, config: &ProjectConfig) -> Result<IndexMap<String, ArtifactMetadata>> {
    let mut loaded: IndexMap<String, ArtifactMetadata> = IndexMap::new();
    let mut visited: HashSet<String> = HashSet::new();
    visited.insert(config.name.clone());
    let mut queue: Vec<(String, PathBuf)> = Vec::new();

    for (name, import) in &config.imported_artifacts {
        let dir = import_dir(root, config, name);
        let artifact = ArtifactMetadata::load(&dir, name, import.namespaces.as_deref())?;
        if let Some(ref pin) = import.version {
            let pinned = artifact
                .tags
                .iter()
                .filter_map(|t| t.parse::<VersionTag>().ok())
                .any(|t| &t.meta_version == pin);
            if !pinned {
                return Err(Error::setup(format!(
                    "imported artifact '{}' has no release of version {} (tags: {})",
                    name,
                    pin,
                    artifact.tags.join(", ")
                )));
            }
        }
        visited.insert(name.clone());
        for transitive in &artifact.imports {
            queue.push((transitive.clone(), dir.clone()));
        }
        info!(artifact = %name, namespaces = artifact.namespaces.len(), "loaded import");
        loaded.insert(name.clone(), artifact);
    }

    while let Some((name, referrer)) = queue.pop() {
        if !visited.insert(name.clone()) {
            continue;
        }
        let dir = referrer
            .parent()
            .map(|p| p.join(&name))
            .unwrap_or_else(|| PathBuf::from(&name));
        let artifact = ArtifactMetadata::load(&dir, &name, None)?;
        for transitive in &artifact.imports {
            queue.push((transitive.clone(), dir.clone()));
        }
        debug!(artifact = %name, dir = %dir.display(), "loaded transitive import");
        loaded.insert(name, artifact);
    }
    Ok(loaded)
}

impl Runtime {
    pub fn load(root: &Path) -> Result<Self> {
        let config = load_config(root)?;
        let modules = discover_modules(root)?;
        let imported = load_imports(root, &config)?;

        let info_path = root.join(METADATA_DIR).join(INFO_FILE);
        let previous: ArtifactInfo = persist::read_yaml_or_default(&info_path)?;

        let mut metadata = ArtifactMetadata::new(config.name.clone());
        metadata.uri = config
            .envs
            .get(&config.default_env)
            .and_then(|e| e.remote.clone())
            .unwrap_or(previous.uri);
        metadata.tags = previous.tags;
        metadata.imports = config.imported_artifacts.keys().cloned().collect();
        for ns in to_bedrock(&modules, &config.name, &imported)?.into_values() {
            metadata.add_namespace(ns);
        }
        info!(
            artifact = %config.name,
            modules = modules.len(),
            namespaces = metadata.namespaces.len(),
            imports = imported.len(),
            "runtime loaded"
        );

        Ok(Self {
            root: root.to_path_buf(),
            config,
            modules,
            imported,
            metadata,
        })
    }

    pub fn lookup(&self) -> SchemaLookup<'_> {
        SchemaLookup::new(&self.metadata, &self.imported)
    }

    /// Write the artifact's metadata to `dir`, or to `<root>/metadata`.
    pub fn publish(&self, dir: Option<&Path>) -> Result<PathBuf> {
        let dir = dir
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.join(METADATA_DIR));
        self.metadata.dump(&dir)?;
        info!(artifact = %self.metadata.name, dir = %dir.display(), "published metadata");
        Ok(dir)
    }

    /// Regenerate datascript text for every imported namespace as
    /// `<out_dir>/<artifact>/<namespace>.ds`.
    pub fn codegen_imported(&self, out_dir: &Path) -> Result<Vec<PathBuf>> {
        let mut written = Vec::new();
        for (artifact, meta) in &self.imported {
            for (ns_name, ns) in &meta.namespaces {
                let text = codegen(ns, &IdBase::artifact(artifact.clone(), ns_name.clone()))?;
                let path = out_dir.join(artifact).join(format!("{}.ds", ns_name));
                persist::write_atomic(&path, &text)?;
                written.push(path);
            }
        }
        debug!(files = written.len(), "regenerated imported schemas");
        Ok(written)
    }

    pub fn stages(&self, registry: &PipelineRegistry) -> Result<StageSet> {
        StageResolver::new(&self.config, self.lookup()).resolve_all(registry)
    }

    pub fn runner<'a>(&'a self, registry: &'a PipelineRegistry, stages: &'a StageSet) -> Runner<'a> {
        Runner::new(&self.config, registry, stages, &self.root)
    }

    /// Release a new data version for `env`: today's first version, or the
    /// next sequence number if `env` was already released today.
    pub fn tag(&mut self, env: &str) -> Result<VersionTag> {
        self.config.get_env(env)?;
        let version = match self.metadata.latest_tag(env, Some(&self.config.version)) {
            Some(previous) => {
                let mut v = previous.data_version;
                v.bump();
                v
            }
            None => DataVersion::first_of(chrono::Local::now().date_naive()),
        };
        let tag = VersionTag::new(&self.config.version, version, env);
        self.metadata.add_tag(&tag);
        info!(tag = %tag, "tagged release");
        Ok(tag)
    }
}
