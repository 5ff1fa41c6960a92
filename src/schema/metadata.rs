//! TB-005: Namespace and artifact metadata containers.
//!
//! On disk an artifact is a directory holding `info.yaml` and one
//! subdirectory per namespace. Each namespace directory holds
//! `tables.yaml`, `entity_classes.yaml`, `composite_types.yaml` (ordered
//! maps keyed by object name) and `namespace.yaml`. References inside the
//! documents are stored relative to the namespace and made absolute again
//! on load.

use super::atoms::{CompositeType, EntityClass, Table};
use super::identifier::{IdBase, Identifier};
use super::version::{latest_tag, VersionTag};
use crate::error::{Error, Result};
use crate::hasher;
use crate::persist;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

pub const TABLES_FILE: &str = "tables.yaml";
pub const ENTITY_CLASSES_FILE: &str = "entity_classes.yaml";
pub const COMPOSITE_TYPES_FILE: &str = "composite_types.yaml";
pub const NAMESPACE_FILE: &str = "namespace.yaml";
pub const INFO_FILE: &str = "info.yaml";

/// All schema atoms of one namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamespaceMetadata {
    pub name: String,
    pub composite_types: Vec<CompositeType>,
    pub entity_classes: Vec<EntityClass>,
    pub tables: Vec<Table>,
    /// External collection projects this namespace is fed by.
    pub collectors: Vec<String>,
    pub source_urls: Vec<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct NamespaceDoc {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    source_urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    collectors: Vec<String>,
}

impl NamespaceMetadata {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn entity_class(&self, name: &str) -> Option<&EntityClass> {
        self.entity_classes.iter().find(|e| e.name == name)
    }

    pub fn composite_type(&self, name: &str) -> Option<&CompositeType> {
        self.composite_types.iter().find(|c| c.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty() && self.entity_classes.is_empty() && self.composite_types.is_empty()
    }

    /// Check per-atom invariants.
    pub fn validate(&self) -> Result<()> {
        for c in &self.composite_types {
            c.validate()?;
        }
        for e in &self.entity_classes {
            e.validate()?;
        }
        for t in &self.tables {
            t.validate()?;
        }
        Ok(())
    }

    /// Apply `f` to every identifier inside every atom.
    pub fn map_ids(&self, f: impl Fn(&Identifier) -> Identifier) -> Self {
        Self {
            composite_types: self.composite_types.iter().map(|c| c.map_ids(&f)).collect(),
            entity_classes: self.entity_classes.iter().map(|e| e.map_ids(&f)).collect(),
            tables: self.tables.iter().map(|t| t.map_ids(&f)).collect(),
            ..self.clone()
        }
    }

    /// Render the three schema documents, references relative to `base`.
    fn schema_docs(&self, base: &IdBase) -> Result<[(&'static str, String); 3]> {
        let rel = self.map_ids(|id| id.relative_to(base));
        let tables: IndexMap<&str, &Table> =
            rel.tables.iter().map(|t| (t.name.as_str(), t)).collect();
        let entities: IndexMap<&str, &EntityClass> = rel
            .entity_classes
            .iter()
            .map(|e| (e.name.as_str(), e))
            .collect();
        let composites: IndexMap<&str, &CompositeType> = rel
            .composite_types
            .iter()
            .map(|c| (c.name.as_str(), c))
            .collect();
        Ok([
            (TABLES_FILE, persist::to_yaml(&tables, TABLES_FILE)?),
            (ENTITY_CLASSES_FILE, persist::to_yaml(&entities, ENTITY_CLASSES_FILE)?),
            (COMPOSITE_TYPES_FILE, persist::to_yaml(&composites, COMPOSITE_TYPES_FILE)?),
        ])
    }

    /// BLAKE3 fingerprint of the serialized schema documents.
    pub fn fingerprint(&self, base: &IdBase) -> Result<String> {
        let docs = self.schema_docs(base)?;
        let parts: Vec<&str> = docs.iter().map(|(_, d)| d.as_str()).collect();
        Ok(hasher::composite_hash(&parts))
    }

    /// Write the namespace documents into `dir`.
    pub fn dump(&self, dir: &Path, base: &IdBase) -> Result<()> {
        for (file, content) in self.schema_docs(base)? {
            persist::write_atomic(&dir.join(file), &content)?;
        }
        let doc = NamespaceDoc {
            source_urls: self.source_urls.clone(),
            collectors: self.collectors.clone(),
        };
        persist::write_yaml(&dir.join(NAMESPACE_FILE), &doc)?;
        debug!(namespace = %self.name, dir = %dir.display(), "dumped namespace metadata");
        Ok(())
    }

    /// Read a namespace back from `dir`, resolving references against `base`.
    pub fn load(dir: &Path, name: &str, base: &IdBase) -> Result<Self> {
        if !dir.is_dir() {
            return Err(Error::setup(format!(
                "namespace '{}' has no metadata directory at {}",
                name,
                dir.display()
            )));
        }
        let tables: IndexMap<String, Table> =
            persist::read_yaml_or_default(&dir.join(TABLES_FILE))?;
        let entities: IndexMap<String, EntityClass> =
            persist::read_yaml_or_default(&dir.join(ENTITY_CLASSES_FILE))?;
        let composites: IndexMap<String, CompositeType> =
            persist::read_yaml_or_default(&dir.join(COMPOSITE_TYPES_FILE))?;
        let doc: NamespaceDoc = persist::read_yaml_or_default(&dir.join(NAMESPACE_FILE))?;

        let raw = Self {
            name: name.to_string(),
            tables: tables
                .into_iter()
                .map(|(n, t)| Table { name: n, ..t })
                .collect(),
            entity_classes: entities
                .into_iter()
                .map(|(n, e)| EntityClass { name: n, ..e })
                .collect(),
            composite_types: composites
                .into_iter()
                .map(|(n, c)| CompositeType { name: n, ..c })
                .collect(),
            collectors: doc.collectors,
            source_urls: doc.source_urls,
        };
        let loaded = raw.map_ids(|id| id.absolute_from(base));
        loaded.validate()?;
        Ok(loaded)
    }
}

/// Per-artifact info document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArtifactInfo {
    #[serde(default)]
    pub uri: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Artifacts whose namespaces this artifact references.
    #[serde(default)]
    pub imports: Vec<String>,
    /// Namespace name -> schema fingerprint, in namespace order.
    #[serde(default)]
    pub schema_hashes: IndexMap<String, String>,
}

/// A named artifact and its namespaces.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtifactMetadata {
    pub name: String,
    pub uri: String,
    pub tags: Vec<String>,
    pub imports: Vec<String>,
    pub namespaces: IndexMap<String, NamespaceMetadata>,
}

impl ArtifactMetadata {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn namespace(&self, name: &str) -> Option<&NamespaceMetadata> {
        self.namespaces.get(name)
    }

    /// Merge a namespace in; atoms of an existing namespace of the same name are appended.
    pub fn add_namespace(&mut self, ns: NamespaceMetadata) {
        match self.namespaces.get_mut(&ns.name) {
            Some(existing) => {
                existing.composite_types.extend(ns.composite_types);
                existing.entity_classes.extend(ns.entity_classes);
                existing.tables.extend(ns.tables);
                existing.collectors.extend(ns.collectors);
                existing.source_urls.extend(ns.source_urls);
            }
            None => {
                self.namespaces.insert(ns.name.clone(), ns);
            }
        }
    }

    pub fn base_for(&self, namespace: &str) -> IdBase {
        IdBase::artifact(self.name.clone(), namespace)
    }

    pub fn namespace_dir(artifact_dir: &Path, namespace: &str) -> PathBuf {
        artifact_dir.join(namespace)
    }

    pub fn latest_tag(&self, env: &str, meta_version: Option<&str>) -> Option<VersionTag> {
        latest_tag(&self.tags, env, meta_version)
    }

    pub fn add_tag(&mut self, tag: &VersionTag) {
        let tag = tag.to_string();
        if !self.tags.contains(&tag) {
            self.tags.push(tag);
        }
    }

    /// Write `info.yaml` and every namespace directory.
    pub fn dump(&self, dir: &Path) -> Result<()> {
        let mut schema_hashes = IndexMap::new();
        for (name, ns) in &self.namespaces {
            let base = self.base_for(name);
            ns.dump(&Self::namespace_dir(dir, name), &base)?;
            schema_hashes.insert(name.clone(), ns.fingerprint(&base)?);
        }
        let info = ArtifactInfo {
            uri: self.uri.clone(),
            tags: self.tags.clone(),
            imports: self.imports.clone(),
            schema_hashes,
        };
        persist::write_yaml(&dir.join(INFO_FILE), &info)
    }

    /// Load an artifact directory written by [`ArtifactMetadata::dump`].
    /// When `only` is given, just those namespaces are read.
    pub fn load(dir: &Path, name: &str, only: Option<&[String]>) -> Result<Self> {
        let info_path = dir.join(INFO_FILE);
        if !info_path.exists() {
            return Err(Error::setup(format!(
                "artifact '{}' has no {} at {}",
                name,
                INFO_FILE,
                dir.display()
            )));
        }
        let info: ArtifactInfo = persist::read_yaml(&info_path)?;
        let mut artifact = Self {
            name: name.to_string(),
            uri: info.uri,
            tags: info.tags,
            imports: info.imports,
            namespaces: IndexMap::new(),
        };

        if let Some(wanted) = only {
            for ns in wanted {
                if !info.schema_hashes.contains_key(ns) {
                    return Err(Error::setup(format!(
                        "artifact '{}' has no namespace '{}' (available: {})",
                        name,
                        ns,
                        info.schema_hashes.keys().cloned().collect::<Vec<_>>().join(", ")
                    )));
                }
            }
        }

        for (ns_name, expected) in &info.schema_hashes {
            if only.is_some_and(|w| !w.contains(ns_name)) {
                continue;
            }
            let base = artifact.base_for(ns_name);
            let ns = NamespaceMetadata::load(&Self::namespace_dir(dir, ns_name), ns_name, &base)?;
            let actual = ns.fingerprint(&base)?;
            if &actual != expected {
                return Err(Error::setup(format!(
                    "schema fingerprint mismatch for {}/{}: info has {}, documents hash to {}",
                    name, ns_name, expected, actual
                )));
            }
            artifact.namespaces.insert(ns_name.clone(), ns);
        }
        debug!(artifact = name, namespaces = artifact.namespaces.len(), "loaded artifact metadata");
        Ok(artifact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::feature::{Feature, PrimitiveKind};
    use crate::schema::version::DataVersion;

    fn sample_namespace() -> NamespaceMetadata {
        let mut ns = NamespaceMetadata::new("core");
        ns.composite_types.push(CompositeType {
            name: "Address".into(),
            features: vec![
                Feature::primitive("street", PrimitiveKind::String),
                Feature::primitive("zip", PrimitiveKind::Int).nullable(),
            ],
            description: Some("postal address".into()),
        });
        ns.entity_classes.push(EntityClass {
            name: "Person".into(),
            identifiers: vec![Feature::primitive("pid", PrimitiveKind::String)],
            properties: vec![Feature::composite(
                "home",
                Identifier::in_artifact("people", "core", "Address"),
            )],
            parents: vec![],
            description: None,
        });
        let mut table = Table::new("person", Identifier::in_artifact("people", "core", "Person"));
        table.index = Some(vec![Feature::primitive("pid", PrimitiveKind::String)]);
        table.features = vec![
            Feature::primitive("name", PrimitiveKind::String),
            Feature::table_key("employer", Identifier::in_artifact("firms", "core", "firm")),
        ];
        ns.tables.push(table);
        ns.source_urls.push("https://example.org/people".into());
        ns
    }

    #[test]
    fn test_tb005_dump_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let base = IdBase::artifact("people", "core");
        let ns = sample_namespace();
        ns.dump(dir.path(), &base).unwrap();

        let tables = std::fs::read_to_string(dir.path().join(TABLES_FILE)).unwrap();
        // same-namespace references are stored compactly, foreign ones in full
        assert!(tables.contains("subject_of_records: Person"));
        assert!(tables.contains("table: firms/core/firm"));

        let loaded = NamespaceMetadata::load(dir.path(), "core", &base).unwrap();
        assert_eq!(loaded, ns);
    }

    #[test]
    fn test_tb005_load_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let err =
            NamespaceMetadata::load(&dir.path().join("nope"), "nope", &IdBase::namespace("nope"))
                .unwrap_err();
        assert!(err.is_setup());
    }

    #[test]
    fn test_tb005_artifact_roundtrip_with_fingerprints() {
        let dir = tempfile::tempdir().unwrap();
        let mut artifact = ArtifactMetadata::new("people");
        artifact.uri = "git@example.org:people.git".into();
        artifact.imports = vec!["firms".into()];
        artifact.add_tag(&VersionTag::new("v0.1", DataVersion::new(2024, 2, 1, 1), "complete"));
        artifact.add_namespace(sample_namespace());
        artifact.dump(dir.path()).unwrap();

        let info: ArtifactInfo = persist::read_yaml(&dir.path().join(INFO_FILE)).unwrap();
        assert!(info.schema_hashes["core"].starts_with("blake3:"));

        let loaded = ArtifactMetadata::load(dir.path(), "people", None).unwrap();
        assert_eq!(loaded, artifact);
        assert_eq!(
            loaded.latest_tag("complete", None).unwrap().data_version,
            DataVersion::new(2024, 2, 1, 1)
        );
    }

    #[test]
    fn test_tb005_tampered_documents_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut artifact = ArtifactMetadata::new("people");
        artifact.add_namespace(sample_namespace());
        artifact.dump(dir.path()).unwrap();

        let path = dir.path().join("core").join(TABLES_FILE);
        let content = std::fs::read_to_string(&path).unwrap();
        std::fs::write(&path, content.replacen("dtype: string", "dtype: bytes", 1)).unwrap();

        let err = ArtifactMetadata::load(dir.path(), "people", None).unwrap_err();
        assert!(err.to_string().contains("fingerprint mismatch"));
    }

    #[test]
    fn test_tb005_namespace_subset() {
        let dir = tempfile::tempdir().unwrap();
        let mut artifact = ArtifactMetadata::new("people");
        artifact.add_namespace(sample_namespace());
        artifact.add_namespace(NamespaceMetadata::new("extra"));
        artifact.dump(dir.path()).unwrap();

        let only = vec!["core".to_string()];
        let loaded = ArtifactMetadata::load(dir.path(), "people", Some(&only)).unwrap();
        assert_eq!(loaded.namespaces.len(), 1);

        let missing = vec!["ghost".to_string()];
        let err = ArtifactMetadata::load(dir.path(), "people", Some(&missing)).unwrap_err();
        assert!(err.to_string().contains("no namespace 'ghost'"));
    }

    #[test]
    fn test_tb005_add_namespace_merges() {
        let mut artifact = ArtifactMetadata::new("people");
        artifact.add_namespace(sample_namespace());
        let mut more = NamespaceMetadata::new("core");
        more.collectors.push("census-scraper".into());
        artifact.add_namespace(more);
        let ns = artifact.namespace("core").unwrap();
        assert_eq!(ns.tables.len(), 1);
        assert_eq!(ns.collectors, vec!["census-scraper"]);
    }
}
