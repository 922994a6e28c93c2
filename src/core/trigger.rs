//! Repository events and trigger evaluation

use crate::core::error::CiError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of repository event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Push,
    PullRequest,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Push => write!(f, "push"),
            EventKind::PullRequest => write!(f, "pull_request"),
        }
    }
}

/// An incoming repository event
///
/// For a push, `source_branch` and `target_branch` are both the pushed branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventKind,
    pub source_branch: String,
    pub target_branch: String,
    pub revision: String,
}

impl Event {
    /// A push of `revision` to `branch`
    pub fn push(branch: impl Into<String>, revision: impl Into<String>) -> Self {
        let branch = branch.into();
        Self {
            kind: EventKind::Push,
            source_branch: branch.clone(),
            target_branch: branch,
            revision: revision.into(),
        }
    }

    /// A pull request from `source` into `target` at `revision`
    pub fn pull_request(
        source: impl Into<String>,
        target: impl Into<String>,
        revision: impl Into<String>,
    ) -> Self {
        Self {
            kind: EventKind::PullRequest,
            source_branch: source.into(),
            target_branch: target.into(),
            revision: revision.into(),
        }
    }
}

/// A compiled branch pattern
#[derive(Debug, Clone)]
pub struct BranchPattern {
    source: String,
    regex: Regex,
}

impl BranchPattern {
    /// Compile a branch glob
    ///
    /// `*` matches within one `/`-separated segment, `**` matches across
    /// segments and `?` matches a single non-`/` character.
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        let mut expr = String::from("^");
        let mut chars = pattern.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '*' if chars.peek() == Some(&'*') => {
                    chars.next();
                    expr.push_str(".*");
                }
                '*' => expr.push_str("[^/]*"),
                '?' => expr.push_str("[^/]"),
                other => expr.push_str(&regex::escape(&other.to_string())),
            }
        }
        expr.push('$');

        Ok(Self {
            source: pattern.to_string(),
            regex: Regex::new(&expr)?,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn matches(&self, branch: &str) -> bool {
        self.regex.is_match(branch)
    }
}

/// Which events start a run
#[derive(Debug, Clone)]
pub struct TriggerRule {
    pub kind: EventKind,
    /// Empty means every branch
    pub branch_patterns: Vec<BranchPattern>,
}

impl TriggerRule {
    /// Build a rule, reporting bad globs against `field`
    pub fn new(kind: EventKind, patterns: &[String], field: &str) -> Result<Self, CiError> {
        let branch_patterns = patterns
            .iter()
            .enumerate()
            .map(|(i, p)| {
                BranchPattern::new(p).map_err(|e| {
                    CiError::config(format!("{}.branches[{}]", field, i), e.to_string())
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            kind,
            branch_patterns,
        })
    }

    pub fn matches(&self, event: &Event) -> bool {
        if self.kind != event.kind {
            return false;
        }
        self.branch_patterns.is_empty()
            || self
                .branch_patterns
                .iter()
                .any(|p| p.matches(&event.target_branch))
    }
}

/// Decide whether `event` starts a run; returns the revision to check out
pub fn evaluate(event: &Event, rules: &[TriggerRule]) -> Option<String> {
    rules
        .iter()
        .any(|rule| rule.matches(event))
        .then(|| event.revision.clone())
}
