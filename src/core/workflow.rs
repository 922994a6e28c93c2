//! Workflow domain model

use crate::core::{
    config::WorkflowConfig,
    error::CiError,
    matrix::{self, JobSpec, MatrixAxis},
    step::StepSpec,
    trigger::{self, Event, TriggerRule},
};
use std::collections::BTreeMap;
use std::path::Path;

/// Cache declaration shared by every job of a workflow
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSpec {
    /// Prefix of every derived key
    pub key_prefix: String,

    /// Paths archived after a passing job, relative to the working tree
    pub paths: Vec<String>,

    /// Files hashed into the key
    pub fingerprint: Vec<String>,
}

/// A loaded, validated workflow
#[derive(Debug, Clone)]
pub struct Workflow {
    pub name: String,
    pub triggers: Vec<TriggerRule>,
    pub axes: Vec<MatrixAxis>,
    pub steps: Vec<StepSpec>,
    pub fail_fast: bool,
    pub max_parallel: Option<usize>,

    /// Environment shared by every step
    pub env: BTreeMap<String, String>,

    pub shell: String,
    pub cache: Option<CacheSpec>,
}

impl Workflow {
    /// Load and validate a workflow file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, CiError> {
        WorkflowConfig::from_file(path)?.to_workflow()
    }

    /// Parse and validate a workflow from YAML
    pub fn from_yaml(yaml: &str) -> Result<Self, CiError> {
        WorkflowConfig::from_yaml(yaml)?.to_workflow()
    }

    /// Revision to build if `event` matches a trigger rule
    pub fn should_run(&self, event: &Event) -> Option<String> {
        trigger::evaluate(event, &self.triggers)
    }

    /// One job per matrix cell
    pub fn expand(&self) -> Result<Vec<JobSpec>, CiError> {
        matrix::expand(&self.axes, &self.steps)
    }
}
