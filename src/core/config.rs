//! Workflow configuration from YAML

use crate::core::{
    error::CiError,
    matrix::MatrixAxis,
    step::StepSpec,
    trigger::{EventKind, TriggerRule},
    workflow::{CacheSpec, Workflow},
};
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::collections::{BTreeMap, HashSet};
use std::path::{Component, Path};
use std::time::Duration;

/// Top-level workflow configuration loaded from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Workflow name
    pub name: String,

    /// Events that start a run (omitted = push and pull_request on any branch)
    #[serde(default, alias = "on")]
    pub triggers: Option<TriggersConfig>,

    /// Matrix and scheduling policy
    #[serde(default)]
    pub strategy: StrategyConfig,

    /// Environment for every step
    #[serde(default)]
    pub env: BTreeMap<String, Value>,

    /// Shell used to run step commands
    #[serde(default)]
    pub shell: Option<String>,

    /// Dependency cache shared across jobs
    #[serde(default)]
    pub cache: Option<CacheConfig>,

    /// Ordered steps run by every job
    #[serde(default)]
    pub steps: Vec<StepConfig>,
}

/// Trigger section
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TriggersConfig {
    #[serde(default)]
    pub push: Option<BranchFilter>,

    #[serde(default)]
    pub pull_request: Option<BranchFilter>,
}

/// Branch patterns for one trigger kind
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BranchFilter {
    #[serde(default)]
    pub branches: Vec<String>,
}

/// Strategy section
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Cancel remaining jobs after the first failure
    #[serde(default, alias = "fail-fast")]
    pub fail_fast: bool,

    /// Upper bound on concurrently running jobs
    #[serde(default, alias = "max-parallel")]
    pub max_parallel: Option<usize>,

    /// Axis name -> ordered values, in declared order
    #[serde(default)]
    pub matrix: Mapping,
}

/// Cache section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Key prefix
    #[serde(default = "default_cache_key")]
    pub key: String,

    /// Paths (relative to the working tree) archived after a passing job
    pub paths: Vec<String>,

    /// Files whose contents feed the cache key, e.g. lockfiles
    #[serde(default)]
    pub fingerprint: Vec<String>,
}

fn default_cache_key() -> String {
    "cache".to_string()
}

/// Step configuration as defined in YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepConfig {
    /// Step name
    #[serde(default)]
    pub name: String,

    /// Command template
    #[serde(default)]
    pub run: String,

    /// Keep going when this step fails
    #[serde(default, alias = "continue-on-error")]
    pub continue_on_failure: bool,

    /// Timeout for this step
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Environment for this step only
    #[serde(default)]
    pub env: BTreeMap<String, Value>,
}

impl WorkflowConfig {
    /// Load workflow configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, CiError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse workflow configuration from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, CiError> {
        let config: WorkflowConfig = serde_yaml::from_str(yaml).map_err(|e| {
            let field = match e.location() {
                Some(loc) => format!("line {}, column {}", loc.line(), loc.column()),
                None => "workflow".to_string(),
            };
            CiError::config(field, e.to_string())
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the workflow configuration
    pub fn validate(&self) -> Result<(), CiError> {
        if self.name.trim().is_empty() {
            return Err(CiError::config("name", "workflow name is empty"));
        }

        if self.steps.is_empty() {
            return Err(CiError::config("steps", "workflow has no steps"));
        }

        let mut seen_names = HashSet::new();
        for (i, step) in self.steps.iter().enumerate() {
            if step.name.trim().is_empty() {
                return Err(CiError::config(format!("steps[{}].name", i), "step name is empty"));
            }
            if step.run.trim().is_empty() {
                return Err(CiError::config(
                    format!("steps[{}].run", i),
                    format!("step '{}' has no command", step.name),
                ));
            }
            if !seen_names.insert(step.name.as_str()) {
                return Err(CiError::config(
                    format!("steps[{}].name", i),
                    format!("duplicate step name '{}'", step.name),
                ));
            }
            if step.timeout_secs == Some(0) {
                return Err(CiError::config(
                    format!("steps[{}].timeout_secs", i),
                    "timeout must be positive",
                ));
            }
            env_map(&step.env, &format!("steps[{}].env", i))?;
        }

        if self.strategy.max_parallel == Some(0) {
            return Err(CiError::config(
                "strategy.max_parallel",
                "max_parallel must be at least 1",
            ));
        }

        // Axis values: non-empty, scalar, no duplicates
        self.matrix_axes()?;

        env_map(&self.env, "env")?;

        if let Some(cache) = &self.cache {
            if cache.key.trim().is_empty() {
                return Err(CiError::config("cache.key", "cache key prefix is empty"));
            }
            if cache.paths.is_empty() {
                return Err(CiError::config("cache.paths", "cache has no paths"));
            }
            for (i, path) in cache.paths.iter().enumerate() {
                if !is_workspace_relative(path) {
                    return Err(CiError::config(
                        format!("cache.paths[{}]", i),
                        format!("'{}' must be a relative path inside the workspace", path),
                    ));
                }
            }
        }

        self.trigger_rules()?;

        Ok(())
    }

    /// Matrix axes in declared order
    pub fn matrix_axes(&self) -> Result<Vec<MatrixAxis>, CiError> {
        let mut axes = Vec::new();

        for (key, value) in &self.strategy.matrix {
            let name = key
                .as_str()
                .ok_or_else(|| CiError::config("strategy.matrix", "axis names must be strings"))?;
            let field = format!("strategy.matrix.{}", name);
            if !is_axis_name(name) {
                return Err(CiError::config(
                    field,
                    "axis names may only contain letters, digits, '_', '-' and '.'",
                ));
            }

            let items = value
                .as_sequence()
                .ok_or_else(|| CiError::config(field.clone(), "axis must be a list of values"))?;
            if items.is_empty() {
                return Err(CiError::config(field, "matrix axis has no values"));
            }

            let mut values = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                let value = scalar_to_string(item).ok_or_else(|| {
                    CiError::config(format!("{}[{}]", field, i), "axis values must be scalars")
                })?;
                if values.contains(&value) {
                    return Err(CiError::config(
                        format!("{}[{}]", field, i),
                        format!("duplicate axis value '{}'", value),
                    ));
                }
                values.push(value);
            }

            axes.push(MatrixAxis::new(name, values));
        }

        Ok(axes)
    }

    /// Compiled trigger rules
    pub fn trigger_rules(&self) -> Result<Vec<TriggerRule>, CiError> {
        let Some(triggers) = &self.triggers else {
            return Ok(vec![
                TriggerRule::new(EventKind::Push, &[], "triggers.push")?,
                TriggerRule::new(EventKind::PullRequest, &[], "triggers.pull_request")?,
            ]);
        };

        let mut rules = Vec::new();
        if let Some(push) = &triggers.push {
            rules.push(TriggerRule::new(EventKind::Push, &push.branches, "triggers.push")?);
        }
        if let Some(pr) = &triggers.pull_request {
            rules.push(TriggerRule::new(
                EventKind::PullRequest,
                &pr.branches,
                "triggers.pull_request",
            )?);
        }
        Ok(rules)
    }

    /// Convert config to a Workflow domain model
    pub fn to_workflow(&self) -> Result<Workflow, CiError> {
        let steps = self
            .steps
            .iter()
            .enumerate()
            .map(|(i, step)| {
                Ok(StepSpec {
                    name: step.name.clone(),
                    command: step.run.clone(),
                    continue_on_failure: step.continue_on_failure,
                    timeout: step.timeout_secs.map(Duration::from_secs),
                    env: env_map(&step.env, &format!("steps[{}].env", i))?,
                })
            })
            .collect::<Result<Vec<_>, CiError>>()?;

        Ok(Workflow {
            name: self.name.clone(),
            triggers: self.trigger_rules()?,
            axes: self.matrix_axes()?,
            steps,
            fail_fast: self.strategy.fail_fast,
            max_parallel: self.strategy.max_parallel,
            env: env_map(&self.env, "env")?,
            shell: self.shell.clone().unwrap_or_else(|| "sh".to_string()),
            cache: self.cache.as_ref().map(|c| CacheSpec {
                key_prefix: c.key.clone(),
                paths: c.paths.clone(),
                fingerprint: c.fingerprint.clone(),
            }),
        })
    }
}

/// Render a YAML scalar as a string
fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Axis names must be usable inside `${{ matrix.<name> }}`
fn is_axis_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

/// Cache paths stay inside the job's working tree
fn is_workspace_relative(path: &str) -> bool {
    let path = Path::new(path);
    !path.as_os_str().is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

fn env_map(env: &BTreeMap<String, Value>, field: &str) -> Result<BTreeMap<String, String>, CiError> {
    env.iter()
        .map(|(key, value)| {
            scalar_to_string(value)
                .map(|v| (key.clone(), v))
                .ok_or_else(|| {
                    CiError::config(format!("{}.{}", field, key), "environment values must be scalars")
                })
        })
        .collect()
}
