//! TB-023: Versioned-storage tool seam and its subprocess adapter.
//!
//! The core never moves bytes itself. Data versioning is delegated to an
//! external tool behind [`StorageTool`]; [`DvcTool`] drives the `dvc` binary.

pub mod local;

use crate::error::{Error, Result};
use crate::pipeline::{OutputKind, StageDescriptor};
use std::path::PathBuf;
use tracing::info;

/// Output from executing a subprocess.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Operations the versioned-storage tool provides.
pub trait StorageTool {
    fn push(&self, remote: Option<&str>) -> Result<ExecOutput>;
    fn pull(&self, targets: &[&str]) -> Result<ExecOutput>;
    fn add(&self, paths: &[&str]) -> Result<ExecOutput>;
    fn stage_add(&self, stage: &StageDescriptor) -> Result<ExecOutput>;
    fn reproduce(&self, stage: Option<&str>) -> Result<ExecOutput>;
}

/// `dvc` run from the project root.
#[derive(Debug, Clone)]
pub struct DvcTool {
    program: String,
    root: PathBuf,
}

impl DvcTool {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_program("dvc", root)
    }

    /// Use a different executable, e.g. a wrapper script.
    pub fn with_program(program: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            root: root.into(),
        }
    }

    fn run(&self, args: &[&str]) -> Result<ExecOutput> {
        let out = local::exec_local(&self.program, args, &self.root)?;
        if !out.success() {
            return Err(Error::External {
                tool: format!("{} {}", self.program, args.first().copied().unwrap_or_default()),
                code: out.exit_code,
                stderr: out.stderr.trim().to_string(),
            });
        }
        info!(tool = %self.program, ?args, "storage tool finished");
        Ok(out)
    }
}

/// Arguments of `dvc stage add` for a resolved stage.
pub fn stage_add_args(stage: &StageDescriptor) -> Vec<String> {
    let mut args = vec![
        "stage".to_string(),
        "add".to_string(),
        "--force".to_string(),
        "-n".to_string(),
        stage.name.clone(),
    ];
    for dep in &stage.deps {
        args.push("-d".to_string());
        args.push(dep.clone());
    }
    for (path, kind) in &stage.outs {
        let flag = match kind {
            OutputKind::Cached => "-o",
            OutputKind::NoCache => "-O",
            OutputKind::Persist => "--outs-persist",
        };
        args.push(flag.to_string());
        args.push(path.clone());
    }
    for (file, ids) in &stage.params {
        args.push("-p".to_string());
        args.push(format!("{}:{}", file, ids.join(",")));
    }
    args.push(stage.cmd.clone());
    args
}

impl StorageTool for DvcTool {
    fn push(&self, remote: Option<&str>) -> Result<ExecOutput> {
        match remote {
            Some(r) => self.run(&["push", "-r", r]),
            None => self.run(&["push"]),
        }
    }

    fn pull(&self, targets: &[&str]) -> Result<ExecOutput> {
        let mut args = vec!["pull"];
        args.extend_from_slice(targets);
        self.run(&args)
    }

    fn add(&self, paths: &[&str]) -> Result<ExecOutput> {
        let mut args = vec!["add"];
        args.extend_from_slice(paths);
        self.run(&args)
    }

    fn stage_add(&self, stage: &StageDescriptor) -> Result<ExecOutput> {
        let owned = stage_add_args(stage);
        let args: Vec<&str> = owned.iter().map(String::as_str).collect();
        self.run(&args)
    }

    fn reproduce(&self, stage: Option<&str>) -> Result<ExecOutput> {
        match stage {
            Some(s) => self.run(&["repro", s]),
            None => self.run(&["repro"]),
        }
    }
}
