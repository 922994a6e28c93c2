//! Matrix expansion into job specifications

use crate::core::{error::CiError, step::StepSpec};
use std::collections::{BTreeMap, HashSet};

/// Job id used when a workflow declares no matrix
pub const DEFAULT_JOB_ID: &str = "default";

/// Separator between axis values in a job id
const ID_SEPARATOR: &str = "-";

/// A named matrix dimension with ordered values
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatrixAxis {
    pub name: String,
    pub values: Vec<String>,
}

impl MatrixAxis {
    pub fn new<I, S>(name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }
}

/// One cell of the matrix, ready to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    /// Axis values joined in declared axis order
    pub id: String,

    /// Axis name -> value for this cell
    pub variables: BTreeMap<String, String>,

    pub steps: Vec<StepSpec>,
}

/// Expand `axes` into one job per combination of values
///
/// Combinations follow declared axis order, and declared value order within
/// each axis; the first axis varies slowest.
pub fn expand(axes: &[MatrixAxis], steps: &[StepSpec]) -> Result<Vec<JobSpec>, CiError> {
    for axis in axes {
        if axis.values.is_empty() {
            return Err(CiError::config(
                format!("strategy.matrix.{}", axis.name),
                "matrix axis has no values",
            ));
        }
    }

    let mut combinations: Vec<Vec<(&str, &str)>> = vec![Vec::new()];
    for axis in axes {
        let mut next = Vec::with_capacity(combinations.len() * axis.values.len());
        for prefix in &combinations {
            for value in &axis.values {
                let mut combo = prefix.clone();
                combo.push((axis.name.as_str(), value.as_str()));
                next.push(combo);
            }
        }
        combinations = next;
    }

    let mut seen = HashSet::new();
    let mut jobs = Vec::with_capacity(combinations.len());

    for combo in combinations {
        let id = if combo.is_empty() {
            DEFAULT_JOB_ID.to_string()
        } else {
            combo
                .iter()
                .map(|(_, value)| *value)
                .collect::<Vec<_>>()
                .join(ID_SEPARATOR)
        };

        if !seen.insert(id.clone()) {
            return Err(CiError::config(
                "strategy.matrix",
                format!("matrix produces duplicate job id '{}'", id),
            ));
        }

        jobs.push(JobSpec {
            id,
            variables: combo
                .into_iter()
                .map(|(name, value)| (name.to_string(), value.to_string()))
                .collect(),
            steps: steps.to_vec(),
        });
    }

    Ok(jobs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn steps() -> Vec<StepSpec> {
        vec![
            StepSpec::new("fmt", "cargo +${{ matrix.toolchain }} fmt"),
            StepSpec::new("test", "cargo +${{ matrix.toolchain }} test"),
        ]
    }

    #[test]
    fn test_single_axis_one_job_per_value() {
        let axes = vec![MatrixAxis::new("toolchain", ["stable", "beta", "nightly"])];
        let jobs = expand(&axes, &steps()).unwrap();

        let ids: Vec<&str> = jobs.iter().map(|j| j.id.as_str()).collect();
        assert_eq!(ids, vec!["stable", "beta", "nightly"]);
        assert_eq!(jobs[1].variables.get("toolchain"), Some(&"beta".to_string()));
        assert_eq!(jobs[2].steps.len(), 2);
    }

    #[test]
    fn test_cartesian_product_in_declared_order() {
        let axes = vec![
            MatrixAxis::new("os", ["linux", "macos"]),
            MatrixAxis::new("toolchain", ["stable", "nightly"]),
        ];
        let jobs = expand(&axes, &steps()).unwrap();

        let ids: Vec<&str> = jobs.iter().map(|j| j.id.as_str()).collect();
        assert_eq!(
            ids,
            vec!["linux-stable", "linux-nightly", "macos-stable", "macos-nightly"]
        );
        assert_eq!(jobs[2].variables.get("os"), Some(&"macos".to_string()));
        assert_eq!(jobs[2].variables.get("toolchain"), Some(&"stable".to_string()));
    }

    #[test]
    fn test_empty_axis_is_configuration_error() {
        let axes = vec![MatrixAxis::new("toolchain", Vec::<String>::new())];
        let err = expand(&axes, &steps()).unwrap_err();

        assert!(err.is_fatal());
        assert!(err.to_string().contains("strategy.matrix.toolchain"));
    }

    #[test]
    fn test_no_axes_yields_default_job() {
        let jobs = expand(&[], &steps()).unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].id, DEFAULT_JOB_ID);
        assert!(jobs[0].variables.is_empty());
    }

    #[test]
    fn test_expansion_is_deterministic() {
        let axes = vec![
            MatrixAxis::new("toolchain", ["stable", "beta", "nightly"]),
            MatrixAxis::new("features", ["default", "all"]),
        ];
        let first = expand(&axes, &steps()).unwrap();
        let second = expand(&axes, &steps()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_job_ids_are_unique() {
        let axes = vec![MatrixAxis::new("toolchain", ["stable", "beta", "nightly"])];
        let jobs = expand(&axes, &steps()).unwrap();
        let ids: HashSet<&str> = jobs.iter().map(|j| j.id.as_str()).collect();
        assert_eq!(ids.len(), jobs.len());
    }

    #[test]
    fn test_colliding_ids_are_rejected() {
        let axes = vec![
            MatrixAxis::new("a", ["x-y", "x"]),
            MatrixAxis::new("b", ["z", "y-z"]),
        ];
        let err = expand(&axes, &steps()).unwrap_err();
        assert!(err.to_string().contains("duplicate job id"));
    }
}
