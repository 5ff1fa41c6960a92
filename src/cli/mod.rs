//! TB-025: CLI subcommands.
//!
//! Every command is a thin wrapper over a library operation. Steps are
//! compiled into the binary that calls [`dispatch`]; the stock `tabula`
//! binary passes an empty registry.

use crate::config::{load_config, parser, save_config, ProjectConfig, CONFIG_FILE};
use crate::error::{Error, Result};
use crate::pipeline::PipelineRegistry;
use crate::runtime::{Runtime, SCHEMA_DIR};
use clap::Subcommand;
use std::path::{Path, PathBuf};

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a new artifact project
    Init {
        /// Artifact name
        name: String,

        /// Directory to initialize (default: current)
        #[arg(long, default_value = ".")]
        path: PathBuf,
    },

    /// Validate tabula.yaml and every datascript module
    Validate {
        /// Project root
        #[arg(short, long, default_value = ".")]
        root: PathBuf,
    },

    /// Convert datascript modules and publish the artifact metadata
    Schema {
        #[arg(short, long, default_value = ".")]
        root: PathBuf,

        /// Output directory (default: <root>/metadata)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Regenerate datascript modules for imported namespaces
    Codegen {
        #[arg(short, long, default_value = ".")]
        root: PathBuf,

        /// Output directory, relative to the root
        #[arg(short, long, default_value = "imported")]
        out: PathBuf,
    },

    /// Resolve pipeline stages and write dvc.yaml
    Stages {
        #[arg(short, long, default_value = ".")]
        root: PathBuf,

        /// Print stages without writing the descriptor file
        #[arg(long)]
        dry_run: bool,
    },

    /// Run one stage, or every stage in dependency order
    Run {
        /// Stage name, e.g. complete-dogs
        stage: Option<String>,

        #[arg(short, long, default_value = ".")]
        root: PathBuf,

        /// Append step timings to reports/profiles.jsonl
        #[arg(long)]
        profile: bool,
    },

    /// Increment the cron bump counter of a namespace
    BumpCron {
        namespace: String,

        #[arg(short, long, default_value = ".")]
        root: PathBuf,
    },

    /// Release a new data version and publish the metadata
    Tag {
        /// Env to release (default: the default env)
        #[arg(short, long)]
        env: Option<String>,

        #[arg(short, long, default_value = ".")]
        root: PathBuf,
    },
}

/// Dispatch a CLI command.
pub fn dispatch(cmd: Commands, registry: &PipelineRegistry) -> Result<()> {
    match cmd {
        Commands::Init { name, path } => cmd_init(&name, &path),
        Commands::Validate { root } => cmd_validate(&root),
        Commands::Schema { root, out } => cmd_schema(&root, out.as_deref()),
        Commands::Codegen { root, out } => cmd_codegen(&root, &out),
        Commands::Stages { root, dry_run } => cmd_stages(&root, registry, dry_run),
        Commands::Run {
            stage,
            root,
            profile,
        } => cmd_run(&root, registry, stage.as_deref(), profile),
        Commands::BumpCron { namespace, root } => cmd_bump_cron(&root, &namespace),
        Commands::Tag { env, root } => cmd_tag(&root, env.as_deref()),
    }
}

fn cmd_init(name: &str, path: &Path) -> Result<()> {
    let config_path = parser::config_path(path);
    if config_path.exists() {
        return Err(Error::setup(format!("{} already exists", config_path.display())));
    }
    let config = ProjectConfig::new(name);
    let errors = parser::validate_config(&config);
    if let Some(e) = errors.first() {
        return Err(Error::setup(e.to_string()));
    }

    let schema_dir = path.join(SCHEMA_DIR);
    std::fs::create_dir_all(&schema_dir).map_err(|e| Error::io(&schema_dir, e))?;
    save_config(path, &config)?;

    println!("Initialized artifact '{}' at {}", name, path.display());
    println!("  Created: {}", config_path.display());
    println!("  Created: {}/", schema_dir.display());
    Ok(())
}

fn cmd_validate(root: &Path) -> Result<()> {
    let runtime = Runtime::load(root)?;
    let tables: usize = runtime
        .metadata
        .namespaces
        .values()
        .map(|ns| ns.tables.len())
        .sum();
    println!(
        "OK: {} ({} namespaces, {} tables, {} imports)",
        runtime.metadata.name,
        runtime.metadata.namespaces.len(),
        tables,
        runtime.imported.len()
    );
    Ok(())
}

fn cmd_schema(root: &Path, out: Option<&Path>) -> Result<()> {
    let runtime = Runtime::load(root)?;
    let dir = runtime.publish(out)?;
    println!("Published {} to {}", runtime.metadata.name, dir.display());
    Ok(())
}

fn cmd_codegen(root: &Path, out: &Path) -> Result<()> {
    let runtime = Runtime::load(root)?;
    let written = runtime.codegen_imported(&root.join(out))?;
    for path in &written {
        println!("  wrote {}", path.display());
    }
    Ok(())
}

fn cmd_stages(root: &Path, registry: &PipelineRegistry, dry_run: bool) -> Result<()> {
    let runtime = Runtime::load(root)?;
    let stages = runtime.stages(registry)?;
    for name in &stages.overridden {
        eprintln!("  WARNING: stage {} registered more than once; last one kept", name);
    }
    if dry_run {
        print!("{}", stages.to_yaml()?);
    } else {
        let path = stages.write(root)?;
        println!("{} stages written to {}", stages.stages.len(), path.display());
    }
    Ok(())
}

fn cmd_run(root: &Path, registry: &PipelineRegistry, stage: Option<&str>, profile: bool) -> Result<()> {
    let runtime = Runtime::load(root)?;
    let stages = runtime.stages(registry)?;
    let runner = runtime.runner(registry, &stages).with_profiling(profile);
    match stage {
        Some(name) => {
            runner.run_stage(name)?;
            println!("ran {}", name);
        }
        None => {
            let order = runner.run_all()?;
            println!("ran {} stages", order.len());
        }
    }
    Ok(())
}

fn cmd_bump_cron(root: &Path, namespace: &str) -> Result<()> {
    let mut config = load_config(root)?;
    let value = config.bump_cron(namespace, root)?;
    println!("cron_bumps.{} = {} ({})", namespace, value, CONFIG_FILE);
    Ok(())
}

fn cmd_tag(root: &Path, env: Option<&str>) -> Result<()> {
    let mut runtime = Runtime::load(root)?;
    let env = env.map(String::from).unwrap_or_else(|| runtime.config.default_env.clone());
    let tag = runtime.tag(&env)?;
    runtime.publish(None)?;
    println!("{}", tag);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOGS: &str = r#"
namespace dogs

entity Dog {
  id dog_id: string
}

index DogIndex {
  dog_id: string
}

features DogFeatures {
  weight: float
}

table dog {
  entity: Dog
  index: DogIndex
  features: DogFeatures
}
"#;

    fn project() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        cmd_init("zoo", dir.path()).unwrap();
        std::fs::write(dir.path().join(SCHEMA_DIR).join("dogs.ds"), DOGS).unwrap();
        dir
    }

    #[test]
    fn test_tb025_init() {
        let dir = project();
        assert!(dir.path().join(CONFIG_FILE).exists());
        assert_eq!(load_config(dir.path()).unwrap().name, "zoo");
        assert!(cmd_init("zoo", dir.path()).is_err());
    }

    #[test]
    fn test_tb025_init_rejects_bad_name() {
        let dir = tempfile::tempdir().unwrap();
        let err = cmd_init("Zoo Project", dir.path()).unwrap_err();
        assert!(err.is_setup());
    }

    #[test]
    fn test_tb025_validate_and_schema() {
        let dir = project();
        cmd_validate(dir.path()).unwrap();
        cmd_schema(dir.path(), None).unwrap();
        assert!(dir.path().join("metadata/dogs/tables.yaml").exists());
    }

    #[test]
    fn test_tb025_bump_cron_and_tag() {
        let dir = project();
        cmd_bump_cron(dir.path(), "dogs").unwrap();
        assert_eq!(load_config(dir.path()).unwrap().cron_bumps["dogs"], 1);
        cmd_tag(dir.path(), None).unwrap();
        cmd_tag(dir.path(), None).unwrap();
        let runtime = Runtime::load(dir.path()).unwrap();
        assert_eq!(runtime.metadata.tags.len(), 2);
        assert_eq!(runtime.metadata.latest_tag("complete", None).unwrap().data_version.seq, 2);
    }

    #[test]
    fn test_tb025_stages_with_empty_registry() {
        let dir = project();
        cmd_stages(dir.path(), &PipelineRegistry::new(), false).unwrap();
        let text = std::fs::read_to_string(dir.path().join("dvc.yaml")).unwrap();
        assert!(text.contains("stages"));
    }
}
