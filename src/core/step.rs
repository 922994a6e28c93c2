//! Step domain model

use crate::core::error::CiError;
use regex::{Captures, Regex};
use std::collections::BTreeMap;
use std::sync::OnceLock;
use std::time::Duration;

/// A single step of a job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepSpec {
    /// Step name, unique within the workflow
    pub name: String,

    /// Command template, e.g. `cargo +${{ matrix.toolchain }} test`
    pub command: String,

    /// Keep running later steps when this one fails
    pub continue_on_failure: bool,

    /// Kill the step after this long
    pub timeout: Option<Duration>,

    /// Extra environment for this step only
    pub env: BTreeMap<String, String>,
}

impl StepSpec {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            continue_on_failure: false,
            timeout: None,
            env: BTreeMap::new(),
        }
    }

    pub fn continue_on_failure(mut self, value: bool) -> Self {
        self.continue_on_failure = value;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Substitute `${{ matrix.<name> }}` references with job variables
    ///
    /// Every `${{ ... }}` expression must resolve. Fails on the first one that
    /// is not a `matrix.` reference to a variable the job defines.
    pub fn render(&self, variables: &BTreeMap<String, String>) -> Result<String, CiError> {
        let mut missing = None;

        let rendered = template_regex().replace_all(&self.command, |caps: &Captures| {
            let expr = caps[1].trim();
            let resolved = expr
                .strip_prefix(MATRIX_PREFIX)
                .and_then(|name| variables.get(name));
            match resolved {
                Some(value) => value.clone(),
                None => {
                    missing.get_or_insert_with(|| {
                        expr.strip_prefix(MATRIX_PREFIX).unwrap_or(expr).to_string()
                    });
                    String::new()
                }
            }
        });

        match missing {
            Some(variable) => Err(CiError::Template {
                step: self.name.clone(),
                variable,
            }),
            None => Ok(rendered.into_owned()),
        }
    }
}

const MATRIX_PREFIX: &str = "matrix.";

fn template_regex() -> &'static Regex {
    static TEMPLATE: OnceLock<Regex> = OnceLock::new();
    TEMPLATE.get_or_init(|| Regex::new(r"\$\{\{(.*?)\}\}").expect("template regex is valid"))
}
