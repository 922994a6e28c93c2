//! Core domain models for workflows
//!
//! This module defines the data structures that describe a workflow, the
//! jobs it expands into, and the outcomes those jobs produce.

pub mod config;
pub mod error;
pub mod matrix;
pub mod state;
pub mod step;
pub mod trigger;
pub mod workflow;

pub use error::*;
pub use matrix::*;
pub use state::*;
pub use step::*;
pub use trigger::*;
pub use workflow::*;
