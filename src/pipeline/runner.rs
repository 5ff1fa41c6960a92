//! TB-020: Stage execution with an explicit, scoped run context.
//!
//! A stage runs its element's callable with a [`RunContext`] naming the
//! envs it reads and writes. Only one stage runs at a time per thread; the
//! [`ActiveRun`] guard marks the slot and frees it on drop, including when
//! the step fails or panics.

use super::element::{PipelineElement, PipelineRegistry, StepArgs};
use super::profile::{append_profile, ProfileRecord};
use super::resolver::{DataLayout, StageDescriptor, StageSet};
use crate::config::ProjectConfig;
use crate::error::{Error, Result};
use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn};

thread_local! {
    static ACTIVE: RefCell<Option<String>> = const { RefCell::new(None) };
}

/// Everything a step body may know about the run it is part of.
#[derive(Debug, Clone, PartialEq)]
pub struct RunContext {
    pub artifact: String,
    pub namespace: String,
    pub stage: String,
    pub step: String,
    pub read_env: String,
    pub write_env: String,
    pub profile: bool,
    pub root: PathBuf,
}

impl RunContext {
    /// Directory of a table of this namespace in the env being read.
    pub fn read_table_dir(&self, table: &str) -> PathBuf {
        self.root.join(DataLayout::table_dir(
            &self.artifact,
            &self.namespace,
            &self.read_env,
            table,
        ))
    }

    /// Directory of a table of this namespace in the env being written.
    pub fn write_table_dir(&self, table: &str) -> PathBuf {
        self.root.join(DataLayout::table_dir(
            &self.artifact,
            &self.namespace,
            &self.write_env,
            table,
        ))
    }
}

/// Marks a stage as running on this thread until dropped.
#[derive(Debug)]
pub struct ActiveRun {
    stage: String,
}

impl ActiveRun {
    pub fn enter(stage: &str) -> Result<Self> {
        ACTIVE.with(|slot| {
            let mut slot = slot.borrow_mut();
            if let Some(ref running) = *slot {
                return Err(Error::setup(format!(
                    "cannot start stage '{}' while stage '{}' is running",
                    stage, running
                )));
            }
            *slot = Some(stage.to_string());
            Ok(Self {
                stage: stage.to_string(),
            })
        })
    }

    pub fn stage(&self) -> &str {
        &self.stage
    }
}

impl Drop for ActiveRun {
    fn drop(&mut self) {
        ACTIVE.with(|slot| slot.borrow_mut().take());
    }
}

/// Name of the stage running on this thread, if any.
pub fn active_stage() -> Option<String> {
    ACTIVE.with(|slot| slot.borrow().clone())
}

/// Runs resolved stages against their registered elements.
pub struct Runner<'a> {
    config: &'a ProjectConfig,
    registry: &'a PipelineRegistry,
    stages: &'a StageSet,
    root: &'a Path,
    profile: bool,
}

impl<'a> Runner<'a> {
    pub fn new(
        config: &'a ProjectConfig,
        registry: &'a PipelineRegistry,
        stages: &'a StageSet,
        root: &'a Path,
    ) -> Self {
        Self {
            config,
            registry,
            stages,
            root,
            profile: false,
        }
    }

    /// Append a profile record for every executed stage.
    pub fn with_profiling(mut self, profile: bool) -> Self {
        self.profile = profile;
        self
    }

    /// Parameter values for a stage, resolved in its write env.
    pub fn args_for(&self, stage: &StageDescriptor) -> Result<StepArgs> {
        let element = self.element(stage)?;
        let mut args = StepArgs::default();
        for name in &element.params {
            let resolved = self
                .config
                .resolve_param(&element.namespace, name, &stage.write_env)?;
            args.params.insert(name.clone(), resolved.value);
        }
        Ok(args)
    }

    fn element(&self, stage: &StageDescriptor) -> Result<&'a PipelineElement> {
        self.registry.get(stage.element).ok_or_else(|| {
            Error::resolution(format!(
                "stage '{}' refers to element #{} but only {} are registered",
                stage.name,
                stage.element,
                self.registry.len()
            ))
        })
    }

    /// Run one stage by name.
    pub fn run_stage(&self, name: &str) -> Result<()> {
        let stage = self.stages.get(name).ok_or_else(|| {
            Error::setup(format!(
                "unknown stage '{}' (known: {})",
                name,
                self.stages.stages.keys().cloned().collect::<Vec<_>>().join(", ")
            ))
        })?;
        let element = self.element(stage)?;
        let args = self.args_for(stage)?;
        let ctx = RunContext {
            artifact: self.config.name.clone(),
            namespace: element.namespace.clone(),
            stage: stage.name.clone(),
            step: element.name.clone(),
            read_env: stage.read_env.clone(),
            write_env: stage.write_env.clone(),
            profile: self.profile,
            root: self.root.to_path_buf(),
        };

        let guard = ActiveRun::enter(&stage.name)?;
        info!(stage = %stage.name, step = %element.name, read_env = %ctx.read_env, write_env = %ctx.write_env, "running stage");
        let ts = chrono::Utc::now().to_rfc3339();
        let start = Instant::now();
        let outcome = (element.callable)(&ctx, &args);
        let elapsed = start.elapsed();
        drop(guard);

        if self.profile {
            append_profile(
                self.root,
                &ProfileRecord {
                    ts,
                    stage: stage.name.clone(),
                    step: element.name.clone(),
                    namespace: element.namespace.clone(),
                    read_env: ctx.read_env.clone(),
                    write_env: ctx.write_env.clone(),
                    duration_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                    ok: outcome.is_ok(),
                },
            )?;
        }

        match outcome {
            Ok(()) => {
                info!(stage = %stage.name, elapsed_ms = elapsed.as_millis(), "stage complete");
                Ok(())
            }
            Err(source) => {
                warn!(stage = %stage.name, error = %source, "stage failed");
                Err(Error::Step {
                    step: stage.name.clone(),
                    source,
                })
            }
        }
    }

    /// Run every stage in dependency order, stopping at the first failure.
    pub fn run_all(&self) -> Result<Vec<String>> {
        let order = self.stages.execution_order()?;
        for name in &order {
            self.run_stage(name)?;
        }
        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::super::element::StepKind;
    use super::super::profile::read_profiles;
    use super::super::resolver::StageResolver;
    use super::*;
    use crate::config::parser::parse_config;
    use crate::schema::lookup::SchemaLookup;
    use crate::schema::metadata::ArtifactMetadata;
    use indexmap::IndexMap;
    use std::rc::Rc;

    const CONFIG: &str = r#"
name: zoo
envs:
  complete:
    params:
      dogs:
        min_weight: 4
  sample:
    parent: complete
    params:
      dogs:
        min_weight: 2
"#;

    fn resolve(config: &ProjectConfig, registry: &PipelineRegistry) -> StageSet {
        let zoo = ArtifactMetadata::new("zoo");
        let imported = IndexMap::new();
        StageResolver::new(config, SchemaLookup::new(&zoo, &imported))
            .resolve_all(registry)
            .unwrap()
    }

    #[test]
    fn test_tb020_context_and_params() {
        let config = parse_config(CONFIG).unwrap();
        let seen: Rc<RefCell<Vec<(RunContext, StepArgs)>>> = Rc::default();
        let sink = Rc::clone(&seen);
        let mut registry = PipelineRegistry::new();
        registry.register(
            PipelineElement::new("walks", "dogs", move |ctx, args| {
                assert_eq!(active_stage().as_deref(), Some(ctx.stage.as_str()));
                sink.borrow_mut().push((ctx.clone(), args.clone()));
                Ok(())
            })
            .param("min_weight"),
        );
        let stages = resolve(&config, &registry);
        let dir = tempfile::tempdir().unwrap();
        let runner = Runner::new(&config, &registry, &stages, dir.path());
        runner.run_stage("sample-dogs").unwrap();

        let seen = seen.borrow();
        let (ctx, args) = &seen[0];
        assert_eq!(ctx.write_env, "sample");
        assert_eq!(ctx.read_env, "sample");
        assert_eq!(args.get("min_weight"), Some(&serde_yaml_ng::Value::from(2)));
        assert_eq!(
            ctx.write_table_dir("walk"),
            dir.path().join("data/zoo/dogs/sample/walk")
        );
        assert_eq!(active_stage(), None);
    }

    #[test]
    fn test_tb020_failure_releases_guard() {
        let config = parse_config(CONFIG).unwrap();
        let mut registry = PipelineRegistry::new();
        registry.register(
            PipelineElement::new("broken", "dogs", |_, _| Err("no dogs today".into()))
                .write_envs(&["complete"]),
        );
        let stages = resolve(&config, &registry);
        let dir = tempfile::tempdir().unwrap();
        let runner = Runner::new(&config, &registry, &stages, dir.path());
        let err = runner.run_stage("complete-dogs").unwrap_err();
        assert!(matches!(err, Error::Step { ref step, .. } if step == "complete-dogs"));
        assert!(err.to_string().contains("no dogs today"));
        assert_eq!(active_stage(), None);
        assert!(ActiveRun::enter("next").is_ok());
    }

    #[test]
    fn test_tb020_nested_run_rejected() {
        let outer = ActiveRun::enter("complete-dogs").unwrap();
        let err = ActiveRun::enter("complete-cats").unwrap_err();
        assert!(err.to_string().contains("while stage 'complete-dogs' is running"));
        assert_eq!(outer.stage(), "complete-dogs");
        drop(outer);
        assert!(active_stage().is_none());
    }

    #[test]
    fn test_tb020_unknown_stage() {
        let config = parse_config(CONFIG).unwrap();
        let registry = PipelineRegistry::new();
        let stages = StageSet::default();
        let dir = tempfile::tempdir().unwrap();
        let err = Runner::new(&config, &registry, &stages, dir.path())
            .run_stage("prod-dogs")
            .unwrap_err();
        assert!(err.is_setup());
    }

    #[test]
    fn test_tb020_run_all_with_profiling() {
        let config = parse_config(CONFIG).unwrap();
        let mut registry = PipelineRegistry::new();
        registry
            .register(PipelineElement::new("walks", "dogs", |_, _| Ok(())))
            .register(
                PipelineElement::new("load", "cats", |_, _| Ok(())).kind(StepKind::DataLoader),
            );
        let stages = resolve(&config, &registry);
        let dir = tempfile::tempdir().unwrap();
        let order = Runner::new(&config, &registry, &stages, dir.path())
            .with_profiling(true)
            .run_all()
            .unwrap();
        assert_eq!(order, vec!["complete-cats", "complete-dogs", "sample-dogs"]);
        let records = read_profiles(dir.path()).unwrap();
        assert_eq!(records.len(), 3);
        assert!(records.iter().all(|r| r.ok));
        assert_eq!(records[0].step, "load");
    }
}
