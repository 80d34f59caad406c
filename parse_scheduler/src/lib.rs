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

//! The Parse Scheduler (spec.md §4.5): drains the create-flag queue, invoking the external
//! parser per directory and applying its declared graph edits atomically per Tupfile.

pub mod line_parser;

use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use parser_iface::{CommandDecl, Declarations, EnvSnapshot, ParseError, Parser};
use path_resolver::Mode;
use store::vars::VarDb;
use store::{FlagKind, LinkStyle, NodeType, Store, StoreError, Txn, OPTIONAL_OUTPUT_FLAG, ROOT_ID};

#[derive(Debug)]
pub enum ParseSchedError {
  Store(StoreError),
  Path(path_resolver::PathError),
  Parser(ParseError),
  Io { path: PathBuf, source: std::io::Error },
  RefactorViolation { dir: PathBuf },
  /// A `Parser` implementation returned a `Declarations` that violates the boundary's own
  /// contract (e.g. a rule with no declared outputs at all, which `CommandDecl` doesn't forbid
  /// at the type level). `LineParser` itself never produces this; it guards against a
  /// misbehaving third-party `Parser`.
  Contract(String),
}

impl fmt::Display for ParseSchedError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ParseSchedError::Store(e) => write!(f, "{e}"),
      ParseSchedError::Path(e) => write!(f, "{e}"),
      ParseSchedError::Parser(e) => write!(f, "{e}"),
      ParseSchedError::Io { path, source } => write!(f, "{}: {source}", path.display()),
      ParseSchedError::RefactorViolation { dir } => {
        write!(f, "{} would have changed the graph during a refactor parse", dir.display())
      }
      ParseSchedError::Contract(msg) => write!(f, "{msg}"),
    }
  }
}

impl std::error::Error for ParseSchedError {}

impl From<StoreError> for ParseSchedError {
  fn from(e: StoreError) -> ParseSchedError {
    ParseSchedError::Store(e)
  }
}

impl From<path_resolver::PathError> for ParseSchedError {
  fn from(e: path_resolver::PathError) -> ParseSchedError {
    ParseSchedError::Path(e)
  }
}

#[derive(Debug, Default)]
pub struct ParseReport {
  pub parsed: usize,
  pub errors: Vec<(PathBuf, ParseSchedError)>,
}

pub struct ParseScheduler<'p> {
  parser: &'p dyn Parser,
  project_root: PathBuf,
}

impl<'p> ParseScheduler<'p> {
  pub fn new(parser: &'p dyn Parser, project_root: PathBuf) -> ParseScheduler<'p> {
    ParseScheduler { parser, project_root }
  }

  /// Drains the create-flag queue until a full pass makes no further progress. Each flagged
  /// directory is parsed and applied in its own transaction (spec.md §4.5), so a parser error in
  /// one directory leaves its create-flag set and does not prevent others from proceeding
  /// (spec.md §7).
  pub fn run(&self, store: &Store, env: &EnvSnapshot) -> Result<ParseReport, StoreError> {
    let mut report = ParseReport::default();
    let mut failed = HashSet::new();
    loop {
      let flagged: Vec<_> =
        store.select_by_flag(FlagKind::Create)?.into_iter().filter(|n| !failed.contains(&n.id)).collect();
      if flagged.is_empty() {
        break;
      }
      let mut progressed = false;
      for node in flagged {
        match self.parse_one(store, env, node.id, false) {
          Ok(()) => {
            report.parsed += 1;
            progressed = true;
          }
          Err(e) => {
            failed.insert(node.id);
            let path = dir_fs_path(store, &self.project_root, node.id).unwrap_or_default();
            log::error!("{}: {e}", path.display());
            report.errors.push((path, e));
          }
        }
      }
      if !progressed {
        break;
      }
    }
    Ok(report)
  }

  /// Runs in refactor mode (spec.md §4.5 "Refactoring mode"): any non-empty diff rolls the
  /// transaction back and reports `RefactorViolation` instead of applying it.
  pub fn run_refactor(&self, store: &Store, env: &EnvSnapshot) -> Result<ParseReport, StoreError> {
    let mut report = ParseReport::default();
    for node in store.select_by_flag(FlagKind::Create)? {
      match self.parse_one(store, env, node.id, true) {
        Ok(()) => report.parsed += 1,
        Err(e) => {
          let path = dir_fs_path(store, &self.project_root, node.id).unwrap_or_default();
          report.errors.push((path, e));
        }
      }
    }
    Ok(report)
  }

  fn parse_one(&self, store: &Store, env: &EnvSnapshot, dir_id: i64, refactor: bool) -> Result<(), ParseSchedError> {
    let txn = store.begin()?;
    let dir_path = dir_fs_path(store, &self.project_root, dir_id)?;
    let rel_dir = dir_path.strip_prefix(&self.project_root).unwrap_or(&dir_path).to_string_lossy().into_owned();

    let tupfile_path = dir_path.join("Tupfile");
    let contents = match fs::read_to_string(&tupfile_path) {
      Ok(c) => c,
      Err(e) if e.kind() == ErrorKind::NotFound => String::new(),
      Err(source) => return Err(ParseSchedError::Io { path: tupfile_path, source }),
    };

    let vardb = VarDb::load(store, dir_id)?;
    let decls = self.parser.parse(&rel_dir, &contents, &vardb, env).map_err(ParseSchedError::Parser)?;
    for decl in &decls.commands {
      if decl.outputs.is_empty() {
        return Err(ParseSchedError::Contract(format!(
          "{rel_dir}: a rule declared with no outputs at all (command {:?})",
          decl.command
        )));
      }
    }

    let existing_keys: HashSet<String> = txn
      .select_by_dir(dir_id)?
      .into_iter()
      .filter(|n| n.node_type == NodeType::Command && !n.is_ghost())
      .map(|n| n.name)
      .collect();
    let existing_groups: HashSet<String> = txn
      .select_by_dir(dir_id)?
      .into_iter()
      .filter(|n| n.node_type == NodeType::Group && !n.is_ghost())
      .map(|n| n.name)
      .collect();
    let existing_exclusions: HashSet<String> = txn
      .select_by_dir(dir_id)?
      .into_iter()
      .filter(|n| n.node_type == NodeType::Exclusion && !n.is_ghost())
      .filter_map(|n| n.display)
      .collect();

    let mut new_keyed: Vec<(String, &CommandDecl)> = Vec::new();
    for decl in &decls.commands {
      let key = command_key(decl);
      new_keyed.push((key, decl));
    }
    let new_keys: HashSet<String> = new_keyed.iter().map(|(k, _)| k.clone()).collect();
    let new_group_names: HashSet<String> = decls.groups.iter().map(|g| g.name.clone()).collect();
    let new_exclusions: HashSet<String> = decls.exclusions.iter().cloned().collect();

    if refactor {
      let diff_is_empty = existing_keys == new_keys
        && existing_groups == new_group_names
        && existing_exclusions == new_exclusions
        && new_keyed.iter().all(|(key, decl)| !command_changed(&txn, dir_id, key, decl).unwrap_or(true));
      if !diff_is_empty {
        txn.rollback()?;
        return Err(ParseSchedError::RefactorViolation { dir: dir_path });
      }
      txn.unflag(dir_id, FlagKind::Create)?;
      txn.commit()?;
      return Ok(());
    }

    for removed in existing_keys.difference(&new_keys) {
      remove_command(&txn, dir_id, removed)?;
    }
    for group_name in existing_groups.difference(&new_group_names) {
      remove_group(&txn, dir_id, group_name)?;
    }
    for pattern in existing_exclusions.difference(&new_exclusions) {
      remove_exclusion(&txn, dir_id, pattern)?;
    }

    for group in &decls.groups {
      ensure_group(&txn, dir_id, &group.name)?;
    }
    for pattern in &new_exclusions {
      ensure_exclusion(&txn, dir_id, pattern)?;
    }
    for (key, decl) in &new_keyed {
      apply_command(&txn, dir_id, key, decl)?;
    }

    for reparse_dir in &decls.reparse_dirs {
      let id = path_resolver::resolve_dir(&txn, ROOT_ID, reparse_dir, Mode::Tolerant)?;
      txn.flag(id, FlagKind::Create)?;
    }

    txn.unflag(dir_id, FlagKind::Create)?;
    txn.commit()?;
    Ok(())
  }
}

/// The stable identity of a declared rule: its primary (first) declared output, which
/// `StoreError::DuplicateOutput` already guarantees is unique project-wide, prefixed so it can
/// never collide with a real filesystem entry name.
fn command_key(decl: &CommandDecl) -> String {
  format!("^{}", decl.outputs[0])
}

fn command_changed(txn: &Txn, dir_id: i64, key: &str, decl: &CommandDecl) -> Result<bool, ParseSchedError> {
  let Some(node) = txn.get_by_parent_name(dir_id, key)? else {
    return Ok(true);
  };
  if node.flags.as_deref() != Some(decl.command.as_str()) {
    return Ok(true);
  }
  let existing_inputs = node_keys(txn, &txn.incoming(node.id, LinkStyle::Sticky)?)?;
  let new_inputs = resolve_keys(txn, &decl.inputs)?;
  if existing_inputs != new_inputs {
    return Ok(true);
  }
  let existing_outputs = node_keys(txn, &txn.outgoing(node.id, LinkStyle::Sticky)?)?;
  let new_outputs = resolve_keys(txn, &decl.outputs)?;
  if existing_outputs != new_outputs {
    return Ok(true);
  }
  let existing_group_inputs: HashSet<String> =
    txn.incoming(node.id, LinkStyle::Group)?.into_iter().filter_map(|id| txn.get_node(id).ok().flatten().map(|n| n.name)).collect();
  let new_group_inputs: HashSet<String> = decl.group_inputs.iter().cloned().collect();
  if existing_group_inputs != new_group_inputs {
    return Ok(true);
  }
  Ok(false)
}

type PathKey = (i64, String);

fn node_keys(txn: &Txn, ids: &[i64]) -> Result<HashSet<PathKey>, ParseSchedError> {
  let mut out = HashSet::new();
  for id in ids {
    if let Some(node) = txn.get_node(*id)? {
      out.insert((node.parent_id, node.name));
    }
  }
  Ok(out)
}

fn resolve_keys(txn: &Txn, paths: &[String]) -> Result<HashSet<PathKey>, ParseSchedError> {
  let mut out = HashSet::new();
  for path in paths {
    let (parent, leaf) = path_resolver::resolve(txn, ROOT_ID, path, Mode::Tolerant)?;
    out.insert((parent, leaf));
  }
  Ok(out)
}

fn apply_command(txn: &Txn, dir_id: i64, key: &str, decl: &CommandDecl) -> Result<(), ParseSchedError> {
  let existing = txn.get_by_parent_name(dir_id, key)?;
  let changed = match &existing {
    Some(_) => command_changed(txn, dir_id, key, decl)?,
    None => true,
  };
  let cmd_id = match existing {
    Some(node) => node.id,
    None => txn.create_node(dir_id, key, NodeType::Command)?,
  };

  txn.set_flags(cmd_id, Some(decl.command.as_str()))?;
  if let Some(display) = &decl.display {
    txn.set_display(cmd_id, Some(display.as_str()))?;
  }
  txn.delete_links(cmd_id)?;

  for input in &decl.inputs {
    let (parent, leaf) = path_resolver::resolve(txn, ROOT_ID, input, Mode::Tolerant)?;
    let input_id = match txn.get_by_parent_name(parent, &leaf)? {
      Some(node) => node.id,
      None => txn.create_node(parent, &leaf, NodeType::File)?,
    };
    txn.create_link(input_id, cmd_id, LinkStyle::Sticky)?;
  }
  for group_name in &decl.group_inputs {
    let group_id = ensure_group(txn, dir_id, group_name)?;
    txn.create_link(group_id, cmd_id, LinkStyle::Group)?;
  }

  let mut output_ids = Vec::with_capacity(decl.outputs.len());
  for output in &decl.outputs {
    let output_id = ensure_output(txn, cmd_id, output)?;
    txn.create_link(cmd_id, output_id, LinkStyle::Sticky)?;
    let optional = decl.optional_outputs.iter().any(|o| o == output);
    txn.set_flags(output_id, optional.then_some(OPTIONAL_OUTPUT_FLAG))?;
    output_ids.push(output_id);
  }
  if let Some(group_name) = &decl.group_output {
    let group_id = ensure_group(txn, dir_id, group_name)?;
    for output_id in &output_ids {
      txn.create_link(*output_id, group_id, LinkStyle::Group)?;
    }
  }

  if changed {
    txn.flag(cmd_id, FlagKind::Modify)?;
  }
  Ok(())
}

/// Resolves `output`'s graph node, failing `DuplicateOutput` if it is already live and produced
/// by a different command (spec.md §4.5 step 3 "Added").
fn ensure_output(txn: &Txn, cmd_id: i64, output: &str) -> Result<i64, ParseSchedError> {
  let (parent, leaf) = path_resolver::resolve(txn, ROOT_ID, output, Mode::Tolerant)?;
  match txn.get_by_parent_name(parent, &leaf)? {
    Some(node) if node.is_ghost() => Ok(txn.create_node(parent, &leaf, NodeType::GeneratedFile)?),
    Some(node) if node.node_type == NodeType::GeneratedFile => {
      if let Some(producer) = txn.get_incoming(node.id)? {
        if producer.id != cmd_id {
          return Err(StoreError::DuplicateOutput { name: output.to_string() }.into());
        }
      }
      Ok(node.id)
    }
    Some(_) => Err(StoreError::DuplicateOutput { name: output.to_string() }.into()),
    None => Ok(txn.create_node(parent, &leaf, NodeType::GeneratedFile)?),
  }
}

fn ensure_group(txn: &Txn, dir_id: i64, name: &str) -> Result<i64, ParseSchedError> {
  match txn.get_by_parent_name(dir_id, name)? {
    Some(node) if node.node_type == NodeType::Group => Ok(node.id),
    Some(node) if node.is_ghost() => Ok(txn.create_node(dir_id, name, NodeType::Group)?),
    Some(_) => Ok(txn.create_node(dir_id, name, NodeType::Group)?),
    None => Ok(txn.create_node(dir_id, name, NodeType::Group)?),
  }
}

fn remove_group(txn: &Txn, dir_id: i64, name: &str) -> Result<(), ParseSchedError> {
  let Some(node) = txn.get_by_parent_name(dir_id, name)? else { return Ok(()) };
  for dependent in txn.outgoing(node.id, LinkStyle::Group)? {
    txn.flag(dependent, FlagKind::Modify)?;
  }
  txn.delete_links(node.id)?;
  txn.delete_node(node.id)?;
  Ok(())
}

fn exclusion_key(pattern: &str) -> String {
  format!("#exclude:{pattern}")
}

fn ensure_exclusion(txn: &Txn, dir_id: i64, pattern: &str) -> Result<(), ParseSchedError> {
  let key = exclusion_key(pattern);
  if txn.get_by_parent_name(dir_id, &key)?.is_none() {
    let id = txn.create_node(dir_id, &key, NodeType::Exclusion)?;
    txn.set_display(id, Some(pattern))?;
  }
  Ok(())
}

fn remove_exclusion(txn: &Txn, dir_id: i64, pattern: &str) -> Result<(), ParseSchedError> {
  let key = exclusion_key(pattern);
  if let Some(node) = txn.get_by_parent_name(dir_id, &key)? {
    txn.delete_node(node.id)?;
  }
  Ok(())
}

/// Removes a no-longer-declared command: its own edges are dropped, the command node itself is
/// deleted (ghosted if anything still points at it), and each of its former outputs is deleted
/// too, so one left with no other referrers is collected as a Ghost rather than lingering as
/// dead state (spec.md §4.5 step 3 "Removed").
fn remove_command(txn: &Txn, dir_id: i64, key: &str) -> Result<(), ParseSchedError> {
  let Some(node) = txn.get_by_parent_name(dir_id, key)? else { return Ok(()) };
  let outputs = txn.outgoing(node.id, LinkStyle::Sticky)?;
  txn.delete_links(node.id)?;
  txn.delete_node(node.id)?;
  for output_id in outputs {
    txn.flag(output_id, FlagKind::Transient)?;
    txn.delete_node(output_id)?;
  }
  Ok(())
}

fn dir_fs_path(store: &Store, project_root: &Path, dir_id: i64) -> Result<PathBuf, ParseSchedError> {
  Ok(path_resolver::dir_fs_path(store, project_root, dir_id)?)
}
