//! TB-017: Environment and parameter resolution.
//!
//! Parameters are looked up namespace-scoped first, then namespace-less,
//! then in the parent environment. The dotted id of the entry that answered
//! is reported alongside the value so build-graph tools can track it.

use super::parser::save_config;
use super::types::{ArtifactEnv, ProjectConfig, ResolvedParam};
use crate::error::{Error, Result};
use std::path::Path;
use tracing::{debug, info};

impl ProjectConfig {
    /// Look up an environment by name.
    pub fn get_env(&self, name: &str) -> Result<&ArtifactEnv> {
        self.envs.get(name).ok_or_else(|| {
            Error::setup(format!(
                "unknown env '{}' (declared: {})",
                name,
                self.envs.keys().cloned().collect::<Vec<_>>().join(", ")
            ))
        })
    }

    /// `env` followed by its ancestors, nearest first.
    pub fn env_chain(&self, env: &str) -> Result<Vec<&str>> {
        self.get_env(env)?;
        let mut chain: Vec<&str> = Vec::new();
        let mut current = self.envs.get_key_value(env).map(|(k, _)| k.as_str());
        while let Some(name) = current {
            if chain.contains(&name) {
                return Err(Error::setup(format!(
                    "env '{}' has a parent cycle: {}",
                    env,
                    chain.join(" -> ")
                )));
            }
            chain.push(name);
            current = self.get_env(name)?.parent.as_deref();
        }
        Ok(chain)
    }

    /// Resolve parameter `key` for namespace `ns` in `env`.
    pub fn resolve_param(&self, ns: &str, key: &str, env: &str) -> Result<ResolvedParam> {
        let chain = self.env_chain(env)?;
        for name in &chain {
            let params = &self.get_env(name)?.params;
            let scoped = params
                .get(ns)
                .and_then(|v| v.as_mapping())
                .and_then(|m| m.get(key));
            if let Some(value) = scoped {
                return Ok(ResolvedParam {
                    value: value.clone(),
                    id: format!("envs.{}.params.{}.{}", name, ns, key),
                });
            }
            if let Some(value) = params.get(key) {
                return Ok(ResolvedParam {
                    value: value.clone(),
                    id: format!("envs.{}.params.{}", name, key),
                });
            }
        }
        Err(Error::resolution(format!(
            "parameter '{}' of namespace '{}' not found; envs searched: {}",
            key,
            ns,
            chain.join(" -> ")
        )))
    }

    /// The environment of `artifact` that `env` reads.
    pub fn resolve_ns_env(&self, artifact: &str, env: &str) -> Result<String> {
        if artifact == self.name {
            return Ok(env.to_string());
        }
        let chain = self.env_chain(env)?;
        for name in &chain {
            if let Some(mapped) = self.get_env(name)?.import_envs.get(artifact) {
                debug!(artifact, env, via = name, mapped = %mapped, "resolved import env");
                return Ok(mapped.clone());
            }
        }
        Err(Error::resolution(format!(
            "no env of imported artifact '{}' is mapped for env '{}'; envs searched: {}",
            artifact,
            env,
            chain.join(" -> ")
        )))
    }

    /// Param id of the cron bump counter for `ns`, if one is set.
    pub fn cron_bump_id(&self, ns: &str) -> Option<String> {
        self.cron_bumps
            .contains_key(ns)
            .then(|| format!("cron_bumps.{}", ns))
    }

    /// Increment the cron bump counter of `ns` and save the config atomically.
    pub fn bump_cron(&mut self, ns: &str, root: &Path) -> Result<u64> {
        let counter = self.cron_bumps.entry(ns.to_string()).or_insert(0);
        *counter += 1;
        let value = *counter;
        save_config(root, self)?;
        info!(namespace = ns, value, "bumped cron counter");
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::super::parser::{load_config, parse_config};
    use super::*;

    const YAML: &str = r#"
name: zoo
envs:
  base:
    params:
      dogs:
        min_weight: 4
      sample_rate: 1.0
    import_envs:
      census: complete
  complete:
    parent: base
    params:
      dogs:
        max_age: 20
  sample:
    parent: complete
    params:
      sample_rate: 0.1
    import_envs:
      census: sample
imported_artifacts:
  census: {}
default_env: complete
"#;

    fn config() -> ProjectConfig {
        parse_config(YAML).unwrap()
    }

    #[test]
    fn test_tb017_scoped_param_in_own_env() {
        let p = config().resolve_param("dogs", "max_age", "complete").unwrap();
        assert_eq!(p.value, serde_yaml_ng::Value::from(20));
        assert_eq!(p.id, "envs.complete.params.dogs.max_age");
    }

    #[test]
    fn test_tb017_falls_back_to_parent() {
        let p = config().resolve_param("dogs", "min_weight", "complete").unwrap();
        assert_eq!(p.id, "envs.base.params.dogs.min_weight");
        let p = config().resolve_param("dogs", "min_weight", "sample").unwrap();
        assert_eq!(p.id, "envs.base.params.dogs.min_weight");
    }

    #[test]
    fn test_tb017_namespace_less_entry() {
        let p = config().resolve_param("dogs", "sample_rate", "sample").unwrap();
        assert_eq!(p.id, "envs.sample.params.sample_rate");
        let p = config().resolve_param("cats", "sample_rate", "complete").unwrap();
        assert_eq!(p.id, "envs.base.params.sample_rate");
        assert_eq!(p.value, serde_yaml_ng::Value::from(1.0));
    }

    #[test]
    fn test_tb017_missing_param_names_visited_envs() {
        let err = config().resolve_param("dogs", "color", "sample").unwrap_err();
        assert!(err.is_resolution());
        let msg = err.to_string();
        assert!(msg.contains("'color'"));
        assert!(msg.contains("'dogs'"));
        assert!(msg.contains("sample -> complete -> base"));
    }

    #[test]
    fn test_tb017_unknown_env() {
        let err = config().get_env("prod").unwrap_err();
        assert!(err.is_setup());
        assert!(err.to_string().contains("unknown env 'prod'"));
    }

    #[test]
    fn test_tb017_ns_env_resolution() {
        let c = config();
        assert_eq!(c.resolve_ns_env("zoo", "sample").unwrap(), "sample");
        assert_eq!(c.resolve_ns_env("census", "sample").unwrap(), "sample");
        assert_eq!(c.resolve_ns_env("census", "complete").unwrap(), "complete");
        let err = c.resolve_ns_env("weather", "complete").unwrap_err();
        assert!(err.to_string().contains("complete -> base"));
    }

    #[test]
    fn test_tb017_bump_cron_persists() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = config();
        assert_eq!(c.cron_bump_id("dogs"), None);
        assert_eq!(c.bump_cron("dogs", dir.path()).unwrap(), 1);
        assert_eq!(c.bump_cron("dogs", dir.path()).unwrap(), 2);
        assert_eq!(c.cron_bump_id("dogs").as_deref(), Some("cron_bumps.dogs"));
        let reloaded = load_config(dir.path()).unwrap();
        assert_eq!(reloaded.cron_bumps["dogs"], 2);
    }
}
