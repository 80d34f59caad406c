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

//! The trait boundary at which the external Tupfile parser (out of scope per spec.md §1) is
//! invoked (spec.md §6, "Parser interface"): `(directory-node, Tupfile-contents, variant-vardb,
//! env-snapshot) -> declaration batch`. This crate defines only the boundary's data types and the
//! [`Parser`] trait; `parse_scheduler` ships the one concrete implementation this workspace needs
//! to run end to end.

use std::collections::HashMap;
use std::fmt;

use store::vars::VarDb;

/// A process environment snapshot, keyed by variable name, handed to the parser so that `Env`
/// reads can be resolved the same way `@VAR@` substitution resolves `Var` reads.
pub type EnvSnapshot = HashMap<String, String>;

/// One declared build rule: `: inputs |> command |> outputs`, plus the optional group
/// association and display/flags presentation strings spec.md §3.1 and §4.5 describe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandDecl {
  /// The shell command line to run, after `@VAR@` substitution.
  pub command: String,
  /// A short human-facing label for progress output (spec.md §3.1 `display`).
  pub display: Option<String>,
  /// Paths (relative to the declaring directory) this command declares as inputs.
  pub inputs: Vec<String>,
  /// Paths this command declares as outputs.
  pub outputs: Vec<String>,
  /// Outputs allowed to be absent after a successful run (spec.md §4.6 "marked optional via an
  /// exclusion").
  pub optional_outputs: Vec<String>,
  /// Names of groups this command reads as inputs (spec.md §3.2 Group-style links).
  pub group_inputs: Vec<String>,
  /// The name of a group this command's outputs are aggregated into, if any.
  pub group_output: Option<String>,
}

/// A `group(NAME)` declaration aggregating a set of outputs for collective reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupDecl {
  pub name: String,
}

/// The full set of graph edits one directory's Tupfile declares (spec.md §4.5 step 2).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Declarations {
  pub commands: Vec<CommandDecl>,
  pub groups: Vec<GroupDecl>,
  /// gitignore-style exclusion patterns declared for this directory (spec.md §3.1 `Exclusion`).
  pub exclusions: Vec<String>,
  /// Other directories (relative to the project root) that must be re-parsed because this
  /// Tupfile's declarations read a `@`-var or `tup.config` value that lives there (spec.md §4.5
  /// step 4).
  pub reparse_dirs: Vec<String>,
}

/// `(file, line, message)`, exactly the shape spec.md §6 specifies for parser errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
  pub file: String,
  pub line: usize,
  pub message: String,
}

impl fmt::Display for ParseError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}: {}", self.file, self.line, self.message)
  }
}

impl std::error::Error for ParseError {}

/// The boundary at which the external Tupfile parser is invoked. `dir_path` is the declaring
/// directory's path relative to the project root (for error messages); `vardb` backs `@VAR@`
/// substitution; `env` is the process environment snapshot for `Env`-node comparisons.
pub trait Parser {
  fn parse(
    &self,
    dir_path: &str,
    tupfile_contents: &str,
    vardb: &VarDb,
    env: &EnvSnapshot,
  ) -> Result<Declarations, ParseError>;
}
