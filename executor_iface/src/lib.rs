// Copyright 2024 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

#![deny(warnings)]
// Enable all clippy lints except for many of the pedantic ones. It's a shame this needs to be copied and pasted across crates, but there doesn't appear to be a way to include inner attributes from a common source.
#![deny(
  clippy::all,
  clippy::default_trait_access,
  clippy::expl_impl_clone_on_copy,
  clippy::if_not_else,
  clippy::needless_continue,
  clippy::unseparated_literal_suffix,
  clippy::used_underscore_binding
)]
// It is often more clear to show that nothing is being moved.
#![allow(clippy::match_ref_pats)]
// Subjective style.
#![allow(
  clippy::len_without_is_empty,
  clippy::redundant_field_names,
  clippy::too_many_arguments
)]
// Default isn't as big a deal as people seem to think it is.
#![allow(clippy::new_without_default, clippy::new_ret_no_self)]
// Arc<Mutex> can be more clear than needing to grok Orderings:
#![allow(clippy::mutex_atomic)]

//! The trait boundary at which the sandboxed observed-I/O executor (out of scope per spec.md §1)
//! is invoked (spec.md §6, "Executor interface"): the core hands it a command string, a working
//! directory and an environment snapshot, and receives back `(exit_status, reads, writes,
//! stderr-bytes)`.

use std::collections::HashMap;
use std::path::PathBuf;

/// An observed path, classified per spec.md §6: "Paths are returned relative to the project root
/// when inside the tree; absolute otherwise, and those are treated as external read-only
/// references."
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ObservedPath {
  /// Relative to the project root; corresponds to (or should become) a graph node.
  Internal(String),
  /// Outside the project tree; never turned into a node or edge.
  External(PathBuf),
}

impl ObservedPath {
  pub fn internal(path: impl Into<String>) -> ObservedPath {
    ObservedPath::Internal(path.into())
  }

  pub fn as_internal(&self) -> Option<&str> {
    match self {
      ObservedPath::Internal(p) => Some(p),
      ObservedPath::External(_) => None,
    }
  }
}

/// What the core hands to a [`CommandExecutor`] to run one command. `declared_inputs` and
/// `declared_outputs` (project-relative, `/`-separated) are included alongside `command` so that
/// an executor with no real I/O tracing of its own (spec.md §1 marks the sandboxed tracing
/// executor as an external collaborator) has something to report back as `reads`/`writes`; a
/// real tracing executor is free to ignore them and report what it actually observed.
#[derive(Debug, Clone)]
pub struct ExecRequest {
  pub command: String,
  pub working_dir: PathBuf,
  pub env: HashMap<String, String>,
  pub declared_inputs: Vec<String>,
  pub declared_outputs: Vec<String>,
}

/// What a [`CommandExecutor`] reports back after a command finishes.
#[derive(Debug, Clone, Default)]
pub struct ExecResult {
  pub exit_status: i32,
  pub reads: Vec<ObservedPath>,
  pub writes: Vec<ObservedPath>,
  pub stderr: Vec<u8>,
}

impl ExecResult {
  pub fn success(&self) -> bool {
    self.exit_status == 0
  }
}

pub trait CommandExecutor: Send + Sync {
  fn execute(&self, request: &ExecRequest) -> Result<ExecResult, String>;
}
