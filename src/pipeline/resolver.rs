//! TB-019: Stage resolution from pipeline elements to build-graph stages.
//!
//! For each element and each env it writes, computes the stage's
//! dependency paths, outputs and parameter ids. Stages are named
//! `<write_env>-<namespace>`; when two registrations produce the same name
//! the later one wins and the name is reported in [`StageSet::overridden`].
//! Execution order uses Kahn's algorithm with deterministic (alphabetical)
//! tie-breaking over output → dependency edges.

use super::element::{Dependency, OutputKind, OutputTarget, PipelineElement, PipelineRegistry, StepKind};
use crate::config::{ProjectConfig, CONFIG_FILE};
use crate::error::{Error, Result};
use crate::persist;
use crate::schema::identifier::Identifier;
use crate::schema::lookup::SchemaLookup;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Stage descriptor file, written in the project root.
pub const STAGES_FILE: &str = "dvc.yaml";

/// Relative on-disk layout of an artifact project.
#[derive(Debug, Clone, Copy, Default)]
pub struct DataLayout;

impl DataLayout {
    pub fn namespace_dir(artifact: &str, ns: &str, env: &str) -> PathBuf {
        PathBuf::from("data").join(artifact).join(ns).join(env)
    }

    pub fn table_dir(artifact: &str, ns: &str, env: &str, table: &str) -> PathBuf {
        Self::namespace_dir(artifact, ns, env).join(table)
    }

    pub fn collector_id(name: &str) -> PathBuf {
        PathBuf::from("collectors").join(name)
    }

    pub fn state_path(name: &str) -> PathBuf {
        PathBuf::from("state").join(name)
    }

    pub fn report_dir() -> PathBuf {
        PathBuf::from("reports")
    }
}

/// Whether one of two slash-separated paths contains the other.
fn path_contains(a: &str, b: &str) -> bool {
    a == b || a.starts_with(&format!("{}/", b)) || b.starts_with(&format!("{}/", a))
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// One build-graph stage.
#[derive(Debug, Clone, PartialEq)]
pub struct StageDescriptor {
    pub name: String,
    pub namespace: String,
    pub read_env: String,
    pub write_env: String,
    /// Position of the producing element in the registry.
    pub element: usize,
    pub cmd: String,
    pub deps: Vec<String>,
    pub outs: Vec<(String, OutputKind)>,
    /// Param file -> dotted param ids.
    pub params: IndexMap<String, Vec<String>>,
}

#[derive(Debug, Default, Serialize, Deserialize, PartialEq)]
struct OutFlags {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cache: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    persist: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
enum OutEntry {
    Plain(String),
    Flagged(IndexMap<String, OutFlags>),
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct StageDoc {
    cmd: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    deps: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    outs: Vec<OutEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    params: Vec<IndexMap<String, Vec<String>>>,
}

#[derive(Debug, Default, Serialize, Deserialize, PartialEq)]
struct StagesDoc {
    stages: IndexMap<String, StageDoc>,
}

impl StageDescriptor {
    fn doc(&self) -> StageDoc {
        let outs = self
            .outs
            .iter()
            .map(|(path, kind)| match kind {
                OutputKind::Cached => OutEntry::Plain(path.clone()),
                OutputKind::NoCache => OutEntry::Flagged(IndexMap::from([(
                    path.clone(),
                    OutFlags {
                        cache: Some(false),
                        persist: None,
                    },
                )])),
                OutputKind::Persist => OutEntry::Flagged(IndexMap::from([(
                    path.clone(),
                    OutFlags {
                        cache: None,
                        persist: Some(true),
                    },
                )])),
            })
            .collect();
        let params = if self.params.is_empty() {
            Vec::new()
        } else {
            vec![self.params.clone()]
        };
        StageDoc {
            cmd: self.cmd.clone(),
            deps: self.deps.clone(),
            outs,
            params,
        }
    }
}

/// All stages of a project, in first-registration order.
#[derive(Debug, Default)]
pub struct StageSet {
    pub stages: IndexMap<String, StageDescriptor>,
    /// Stage names whose earlier registration was replaced.
    pub overridden: Vec<String>,
}

impl StageSet {
    pub fn get(&self, name: &str) -> Option<&StageDescriptor> {
        self.stages.get(name)
    }

    /// Render the stage descriptor document.
    pub fn to_yaml(&self) -> Result<String> {
        let doc = StagesDoc {
            stages: self
                .stages
                .iter()
                .map(|(name, stage)| (name.clone(), stage.doc()))
                .collect(),
        };
        persist::to_yaml(&doc, STAGES_FILE)
    }

    /// Write the stage descriptor document into `root`.
    pub fn write(&self, root: &Path) -> Result<PathBuf> {
        let path = root.join(STAGES_FILE);
        persist::write_atomic(&path, &self.to_yaml()?)?;
        Ok(path)
    }

    /// Stage names ordered so producers run before consumers.
    pub fn execution_order(&self) -> Result<Vec<String>> {
        let mut in_degree: HashMap<&str, usize> = HashMap::new();
        let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
        for name in self.stages.keys() {
            in_degree.insert(name.as_str(), 0);
            adjacency.insert(name.as_str(), Vec::new());
        }

        for (consumer, stage) in &self.stages {
            for (producer, other) in &self.stages {
                if producer == consumer {
                    continue;
                }
                let feeds = other
                    .outs
                    .iter()
                    .any(|(out, _)| stage.deps.iter().any(|dep| path_contains(out, dep)));
                if feeds {
                    adjacency
                        .entry(producer.as_str())
                        .or_default()
                        .push(consumer.as_str());
                    *in_degree.entry(consumer.as_str()).or_default() += 1;
                }
            }
        }

        let mut zero_degree: Vec<&str> = in_degree
            .iter()
            .filter(|(_, &d)| d == 0)
            .map(|(name, _)| *name)
            .collect();
        zero_degree.sort();
        let mut queue: VecDeque<&str> = zero_degree.into_iter().collect();

        let mut order = Vec::new();
        while let Some(current) = queue.pop_front() {
            order.push(current.to_string());
            let mut next_ready: Vec<&str> = Vec::new();
            for neighbor in adjacency.get(current).into_iter().flatten() {
                if let Some(degree) = in_degree.get_mut(neighbor) {
                    *degree -= 1;
                    if *degree == 0 {
                        next_ready.push(*neighbor);
                    }
                }
            }
            next_ready.sort();
            queue.extend(next_ready);
        }

        if order.len() != self.stages.len() {
            let mut stuck: Vec<&str> = in_degree
                .iter()
                .filter(|(_, &d)| d > 0)
                .map(|(name, _)| *name)
                .collect();
            stuck.sort();
            return Err(Error::resolution(format!(
                "stage dependency cycle among: {}",
                stuck.join(", ")
            )));
        }
        Ok(order)
    }
}

/// Computes stages from registered elements.
pub struct StageResolver<'a> {
    config: &'a ProjectConfig,
    lookup: SchemaLookup<'a>,
}

impl<'a> StageResolver<'a> {
    pub fn new(config: &'a ProjectConfig, lookup: SchemaLookup<'a>) -> Self {
        Self { config, lookup }
    }

    /// Envs an element writes.
    pub fn write_envs(&self, element: &PipelineElement) -> Result<Vec<String>> {
        if let Some(ref envs) = element.write_envs {
            for env in envs {
                self.config.get_env(env)?;
            }
            return Ok(envs.clone());
        }
        Ok(match element.kind {
            StepKind::Regular => self.config.envs.keys().cloned().collect(),
            StepKind::DataLoader => vec![self.config.default_env.clone()],
            StepKind::EnvCreator => self
                .config
                .envs
                .keys()
                .filter(|name| **name != self.config.default_env)
                .cloned()
                .collect(),
        })
    }

    /// Env an element reads while writing `write_env`.
    pub fn read_env(&self, element: &PipelineElement, write_env: &str) -> Result<String> {
        if let Some(ref env) = element.read_env {
            self.config.get_env(env)?;
            return Ok(env.clone());
        }
        match element.kind {
            StepKind::EnvCreator => Ok(self.config.default_env.clone()),
            StepKind::Regular | StepKind::DataLoader => Ok(write_env.to_string()),
        }
    }

    fn dependency_path(&self, element: &PipelineElement, dep: &Dependency, read_env: &str) -> Result<String> {
        let local = &self.lookup.local().name;
        let path = match dep {
            Dependency::Table(id) => {
                let id = self.lookup.canonical(id);
                let ns = id.namespace().unwrap_or(&element.namespace);
                let full = Identifier::new(id.artifact().map(String::from), Some(ns.to_string()), id.obj_id())?;
                if self.lookup.table(&full).is_none() {
                    return Err(Error::resolution(format!(
                        "step '{}' depends on unknown table '{}'",
                        element.name, full
                    )));
                }
                match full.artifact() {
                    None => DataLayout::table_dir(local, ns, read_env, full.obj_id()),
                    Some(artifact) => {
                        let env = self.config.resolve_ns_env(artifact, read_env)?;
                        DataLayout::namespace_dir(artifact, ns, &env)
                    }
                }
            }
            Dependency::ArtifactNamespace { artifact, namespace } => {
                let env = self.config.resolve_ns_env(artifact, read_env)?;
                DataLayout::namespace_dir(artifact, namespace, &env)
            }
            Dependency::Module(path) => path.clone(),
            Dependency::Collector(name) => DataLayout::collector_id(name),
            Dependency::PersistentState(name) => DataLayout::state_path(name),
        };
        Ok(path_string(&path))
    }

    /// Resolve one element for one write env.
    pub fn resolve(&self, position: usize, element: &PipelineElement, write_env: &str) -> Result<StageDescriptor> {
        let read_env = self.read_env(element, write_env)?;
        let name = format!("{}-{}", write_env, element.namespace);

        let mut deps: Vec<String> = Vec::new();
        for dep in &element.dependencies {
            let path = self.dependency_path(element, dep, &read_env)?;
            if !deps.contains(&path) {
                deps.push(path);
            }
        }
        let own_source = path_string(&element.source);
        if !deps.contains(&own_source) {
            deps.push(own_source);
        }

        let mut ids = Vec::new();
        for param in &element.params {
            ids.push(self.config.resolve_param(&element.namespace, param, write_env)?.id);
        }
        if let Some(id) = self.config.cron_bump_id(&element.namespace) {
            ids.push(id);
        }
        let mut params = IndexMap::new();
        if !ids.is_empty() {
            params.insert(CONFIG_FILE.to_string(), ids);
        }

        let local = &self.lookup.local().name;
        let outs = element
            .outputs
            .iter()
            .map(|o| {
                let path = match &o.target {
                    OutputTarget::Table(table) => {
                        DataLayout::table_dir(local, &element.namespace, write_env, table)
                    }
                    OutputTarget::Path(path) => path.clone(),
                };
                let kind = match element.kind {
                    StepKind::DataLoader => OutputKind::Persist,
                    StepKind::Regular | StepKind::EnvCreator => o.kind,
                };
                (path_string(&path), kind)
            })
            .collect();

        Ok(StageDescriptor {
            cmd: format!("tabula run {}", name),
            name,
            namespace: element.namespace.clone(),
            read_env,
            write_env: write_env.to_string(),
            element: position,
            deps,
            outs,
            params,
        })
    }

    /// Resolve every registered element for every env it writes.
    pub fn resolve_all(&self, registry: &PipelineRegistry) -> Result<StageSet> {
        let mut set = StageSet::default();
        for (position, element) in registry.elements().iter().enumerate() {
            for env in self.write_envs(element)? {
                let stage = self.resolve(position, element, &env)?;
                if let Some(previous) = set.stages.get(&stage.name) {
                    let replaced = &registry.elements()[previous.element].name;
                    warn!(
                        stage = %stage.name,
                        replaced = %replaced,
                        by = %element.name,
                        "stage registered twice, later registration wins"
                    );
                    if !set.overridden.contains(&stage.name) {
                        set.overridden.push(stage.name.clone());
                    }
                }
                debug!(stage = %stage.name, deps = stage.deps.len(), outs = stage.outs.len(), "resolved stage");
                set.stages.insert(stage.name.clone(), stage);
            }
        }
        Ok(set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parser::parse_config;
    use crate::schema::atoms::Table;
    use crate::schema::feature::{Feature, PrimitiveKind};
    use crate::schema::metadata::{ArtifactMetadata, NamespaceMetadata};

    const CONFIG: &str = r#"
name: zoo
envs:
  complete:
    params:
      dogs:
        min_weight: 4
    import_envs:
      census: complete
  sample:
    parent: complete
    import_envs:
      census: sample
imported_artifacts:
  census: {}
cron_bumps:
  dogs: 1
"#;

    fn table(name: &str, entity: Identifier) -> Table {
        let mut t = Table::new(name, entity);
        t.index = Some(vec![Feature::primitive("id", PrimitiveKind::String)]);
        t
    }

    fn fixtures() -> (ProjectConfig, ArtifactMetadata, IndexMap<String, ArtifactMetadata>) {
        let config = parse_config(CONFIG).unwrap();
        let mut zoo = ArtifactMetadata::new("zoo");
        let mut dogs = NamespaceMetadata::new("dogs");
        dogs.tables.push(table("dog", Identifier::in_namespace("dogs", "Dog")));
        dogs.tables.push(table("walk", Identifier::in_namespace("dogs", "Dog")));
        zoo.add_namespace(dogs);
        let mut census = ArtifactMetadata::new("census");
        let mut people = NamespaceMetadata::new("people");
        people
            .tables
            .push(table("person", Identifier::in_artifact("census", "people", "Person")));
        census.add_namespace(people);
        (config, zoo, IndexMap::from([("census".to_string(), census)]))
    }

    fn walker() -> PipelineElement {
        PipelineElement::new("walks", "dogs", |_, _| Ok(()))
            .reads_table(Identifier::local("dog"))
            .reads_table(Identifier::in_artifact("census", "people", "person"))
            .depends_on(Dependency::PersistentState("walk_cursor".into()))
            .writes_table("walk")
            .output(OutputTarget::Path("reports/walks.html".into()), OutputKind::NoCache)
            .param("min_weight")
    }

    #[test]
    fn test_tb019_stage_paths_and_params() {
        let (config, zoo, imported) = fixtures();
        let resolver = StageResolver::new(&config, SchemaLookup::new(&zoo, &imported));
        let stage = resolver.resolve(0, &walker(), "sample").unwrap();
        assert_eq!(stage.name, "sample-dogs");
        assert_eq!(
            stage.deps,
            vec![
                "data/zoo/dogs/sample/dog",
                "data/census/people/sample",
                "state/walk_cursor",
                "src/dogs.rs",
            ]
        );
        assert_eq!(stage.outs[0], ("data/zoo/dogs/sample/walk".to_string(), OutputKind::Cached));
        assert_eq!(
            stage.params[CONFIG_FILE],
            vec!["envs.complete.params.dogs.min_weight", "cron_bumps.dogs"]
        );
    }

    #[test]
    fn test_tb019_env_creator_reads_default_env() {
        let (config, zoo, imported) = fixtures();
        let resolver = StageResolver::new(&config, SchemaLookup::new(&zoo, &imported));
        let creator = PipelineElement::new("subsample", "dogs", |_, _| Ok(()))
            .kind(StepKind::EnvCreator)
            .reads_table(Identifier::local("dog"))
            .writes_table("dog");
        assert_eq!(resolver.write_envs(&creator).unwrap(), vec!["sample"]);
        let stage = resolver.resolve(0, &creator, "sample").unwrap();
        assert_eq!(stage.read_env, "complete");
        assert_eq!(stage.deps[0], "data/zoo/dogs/complete/dog");
    }

    #[test]
    fn test_tb019_env_creator_writes_every_other_env() {
        let config = parse_config(
            "name: zoo\nenvs:\n  complete: {}\n  sample:\n    parent: complete\n  tiny:\n    parent: sample\n  other: {}\n",
        )
        .unwrap();
        let (_, zoo, imported) = fixtures();
        let resolver = StageResolver::new(&config, SchemaLookup::new(&zoo, &imported));
        let creator = PipelineElement::new("subsample", "dogs", |_, _| Ok(())).kind(StepKind::EnvCreator);
        let envs = resolver.write_envs(&creator).unwrap();
        assert_eq!(envs, vec!["sample", "tiny", "other"]);
        for env in &envs {
            assert_eq!(resolver.read_env(&creator, env).unwrap(), "complete");
        }
    }

    #[test]
    fn test_tb019_data_loader_outputs_persist() {
        let (config, zoo, imported) = fixtures();
        let resolver = StageResolver::new(&config, SchemaLookup::new(&zoo, &imported));
        let loader = PipelineElement::new("load_dogs", "dogs", |_, _| Ok(()))
            .kind(StepKind::DataLoader)
            .output(OutputTarget::Path("raw/dogs".into()), OutputKind::Cached)
            .writes_table("dog");
        assert_eq!(resolver.write_envs(&loader).unwrap(), vec!["complete"]);
        let stage = resolver.resolve(0, &loader, "complete").unwrap();
        assert_eq!(
            stage.outs,
            vec![
                ("raw/dogs".to_string(), OutputKind::Persist),
                ("data/zoo/dogs/complete/dog".to_string(), OutputKind::Persist),
            ]
        );
    }

    #[test]
    fn test_tb019_collision_later_wins() {
        let (config, zoo, imported) = fixtures();
        let resolver = StageResolver::new(&config, SchemaLookup::new(&zoo, &imported));
        let mut registry = PipelineRegistry::new();
        registry
            .register(
                PipelineElement::new("first", "dogs", |_, _| Ok(()))
                    .write_envs(&["complete"])
                    .writes_table("dog"),
            )
            .register(
                PipelineElement::new("second", "dogs", |_, _| Ok(()))
                    .write_envs(&["complete"])
                    .writes_table("walk"),
            );
        let set = resolver.resolve_all(&registry).unwrap();
        assert_eq!(set.stages.len(), 1);
        assert_eq!(set.overridden, vec!["complete-dogs"]);
        let stage = set.get("complete-dogs").unwrap();
        assert_eq!(stage.element, 1);
        assert_eq!(stage.outs[0].0, "data/zoo/dogs/complete/walk");
    }

    #[test]
    fn test_tb019_unknown_table_dependency() {
        let (config, zoo, imported) = fixtures();
        let resolver = StageResolver::new(&config, SchemaLookup::new(&zoo, &imported));
        let el = PipelineElement::new("bad", "dogs", |_, _| Ok(())).reads_table(Identifier::local("cat"));
        let err = resolver.resolve(0, &el, "complete").unwrap_err();
        assert!(err.to_string().contains("unknown table 'dogs/cat'"));
    }

    #[test]
    fn test_tb019_descriptor_document() {
        let (config, zoo, imported) = fixtures();
        let resolver = StageResolver::new(&config, SchemaLookup::new(&zoo, &imported));
        let mut registry = PipelineRegistry::new();
        registry.register(walker().write_envs(&["complete"]).output(
            OutputTarget::Path("state/walk_cursor".into()),
            OutputKind::Persist,
        ));
        let set = resolver.resolve_all(&registry).unwrap();
        let yaml = set.to_yaml().unwrap();
        assert!(yaml.contains("complete-dogs:"));
        assert!(yaml.contains("cmd: tabula run complete-dogs"));
        assert!(yaml.contains("- data/zoo/dogs/complete/walk"));
        assert!(yaml.contains("reports/walks.html:"));
        assert!(yaml.contains("cache: false"));
        assert!(yaml.contains("persist: true"));
        assert!(yaml.contains("tabula.yaml:"));

        let dir = tempfile::tempdir().unwrap();
        let path = set.write(dir.path()).unwrap();
        let doc: StagesDoc = persist::read_yaml(&path).unwrap();
        assert_eq!(doc.stages.len(), 1);
    }

    #[test]
    fn test_tb019_execution_order() {
        let (config, zoo, imported) = fixtures();
        let resolver = StageResolver::new(&config, SchemaLookup::new(&zoo, &imported));
        let mut registry = PipelineRegistry::new();
        registry
            .register(
                PipelineElement::new("walks", "dogs", |_, _| Ok(()))
                    .reads_table(Identifier::in_namespace("dogs", "dog"))
                    .write_envs(&["sample"])
                    .writes_table("walk"),
            )
            .register(
                PipelineElement::new("subsample", "kennel", |_, _| Ok(()))
                    .kind(StepKind::EnvCreator)
                    .output(OutputTarget::Path("data/zoo/dogs/sample/dog".into()), OutputKind::Cached),
            );
        let set = resolver.resolve_all(&registry).unwrap();
        assert_eq!(set.execution_order().unwrap(), vec!["sample-kennel", "sample-dogs"]);
    }
}
