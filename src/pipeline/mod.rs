//! Pipeline elements, stage resolution and execution.

pub mod element;
pub mod profile;
pub mod resolver;
pub mod runner;

pub use element::{
    Dependency, Output, OutputKind, OutputTarget, PipelineElement, PipelineRegistry, StepArgs,
    StepError, StepKind,
};
pub use resolver::{DataLayout, StageDescriptor, StageResolver, StageSet, STAGES_FILE};
pub use runner::{active_stage, ActiveRun, RunContext, Runner};
