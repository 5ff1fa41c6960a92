//! TB-018: Pipeline elements: registered steps and their declared I/O.
//!
//! Elements are runtime callables and never serialized. They are kept in a
//! [`PipelineRegistry`] in registration order; the order matters because a
//! later element producing the same stage replaces an earlier one.

use super::runner::RunContext;
use crate::schema::identifier::Identifier;
use indexmap::IndexMap;
use std::fmt;
use std::path::PathBuf;

/// Error type step bodies may return.
pub type StepError = Box<dyn std::error::Error + Send + Sync>;

/// Resolved parameter values handed to a step, keyed by parameter name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepArgs {
    pub params: IndexMap<String, serde_yaml_ng::Value>,
}

impl StepArgs {
    pub fn get(&self, name: &str) -> Option<&serde_yaml_ng::Value> {
        self.params.get(name)
    }
}

pub type StepFn = Box<dyn Fn(&RunContext, &StepArgs) -> Result<(), StepError>>;

/// What a step reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dependency {
    /// A table, local or imported. Local tables need a namespace.
    Table(Identifier),
    /// A source file the step imports.
    Module(PathBuf),
    /// All data of one namespace of an imported artifact.
    ArtifactNamespace { artifact: String, namespace: String },
    /// An external data collection project.
    Collector(String),
    /// State kept between runs.
    PersistentState(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    Cached,
    NoCache,
    Persist,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputTarget {
    /// A table of the element's namespace, written in the write env.
    Table(String),
    Path(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Output {
    pub target: OutputTarget,
    pub kind: OutputKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StepKind {
    #[default]
    Regular,
    /// Fetches raw data once, in the default env; its outputs persist.
    DataLoader,
    /// Reads the default env and writes every other env.
    EnvCreator,
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Regular => write!(f, "regular"),
            Self::DataLoader => write!(f, "data-loader"),
            Self::EnvCreator => write!(f, "env-creator"),
        }
    }
}

pub struct PipelineElement {
    pub name: String,
    pub namespace: String,
    pub callable: StepFn,
    pub dependencies: Vec<Dependency>,
    pub outputs: Vec<Output>,
    /// Envs the step writes; `None` picks envs by kind.
    pub write_envs: Option<Vec<String>>,
    pub read_env: Option<String>,
    pub kind: StepKind,
    /// Names of the parameters the callable takes.
    pub params: Vec<String>,
    /// Source file defining the step.
    pub source: PathBuf,
}

impl fmt::Debug for PipelineElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineElement")
            .field("name", &self.name)
            .field("namespace", &self.namespace)
            .field("kind", &self.kind)
            .field("dependencies", &self.dependencies)
            .field("outputs", &self.outputs)
            .field("write_envs", &self.write_envs)
            .field("read_env", &self.read_env)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

impl PipelineElement {
    pub fn new<F>(name: impl Into<String>, namespace: impl Into<String>, callable: F) -> Self
    where
        F: Fn(&RunContext, &StepArgs) -> Result<(), StepError> + 'static,
    {
        let namespace = namespace.into();
        Self {
            name: name.into(),
            source: PathBuf::from("src").join(format!("{}.rs", namespace)),
            namespace,
            callable: Box::new(callable),
            dependencies: Vec::new(),
            outputs: Vec::new(),
            write_envs: None,
            read_env: None,
            kind: StepKind::Regular,
            params: Vec::new(),
        }
    }

    pub fn kind(mut self, kind: StepKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn depends_on(mut self, dep: Dependency) -> Self {
        self.dependencies.push(dep);
        self
    }

    pub fn reads_table(self, table: Identifier) -> Self {
        self.depends_on(Dependency::Table(table))
    }

    pub fn output(mut self, target: OutputTarget, kind: OutputKind) -> Self {
        self.outputs.push(Output { target, kind });
        self
    }

    pub fn writes_table(self, table: impl Into<String>) -> Self {
        self.output(OutputTarget::Table(table.into()), OutputKind::Cached)
    }

    pub fn write_envs(mut self, envs: &[&str]) -> Self {
        self.write_envs = Some(envs.iter().map(|e| e.to_string()).collect());
        self
    }

    pub fn read_env(mut self, env: impl Into<String>) -> Self {
        self.read_env = Some(env.into());
        self
    }

    pub fn param(mut self, name: impl Into<String>) -> Self {
        self.params.push(name.into());
        self
    }

    pub fn source(mut self, path: impl Into<PathBuf>) -> Self {
        self.source = path.into();
        self
    }
}

/// Registered elements, in registration order.
#[derive(Debug, Default)]
pub struct PipelineRegistry {
    elements: Vec<PipelineElement>,
}

impl PipelineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, element: PipelineElement) -> &mut Self {
        self.elements.push(element);
        self
    }

    pub fn elements(&self) -> &[PipelineElement] {
        &self.elements
    }

    pub fn get(&self, position: usize) -> Option<&PipelineElement> {
        self.elements.get(position)
    }

    pub fn for_namespace<'a>(&'a self, ns: &'a str) -> impl Iterator<Item = &'a PipelineElement> {
        self.elements.iter().filter(move |e| e.namespace == ns)
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }
}
