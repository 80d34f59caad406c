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

//! The Execute Scheduler (spec.md §4.6): drains the modify-flag queue, runs each ready Command
//! through the `executor_iface::CommandExecutor` boundary, validates what came back against the
//! declared graph, and propagates failure to downstream Commands as `UpstreamFailed`.

pub mod local;
pub mod testutil;

use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use executor_iface::{CommandExecutor, ExecRequest, ExecResult, ObservedPath};
use path_resolver::Mode;
use store::{FlagKind, LinkStyle, MTime, NodeType, Store, StoreError, Txn, OPTIONAL_OUTPUT_FLAG, ROOT_ID};
use task_executor::Executor as TaskExecutor;

pub type EnvSnapshot = std::collections::HashMap<String, String>;

#[derive(Debug)]
pub enum ExecSchedError {
  Store(StoreError),
  Path(path_resolver::PathError),
  /// A write landed somewhere the Command never declared as an output (spec.md §4.6 step 4).
  UndeclaredOutput { command: i64, path: String },
  /// A declared output was neither written nor marked optional (spec.md §4.6 step 4).
  MissingOutput { command: i64, path: String },
  /// The `CommandExecutor` itself failed to run the command (couldn't spawn, channel dropped).
  Spawn(String),
}

impl fmt::Display for ExecSchedError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ExecSchedError::Store(e) => write!(f, "{e}"),
      ExecSchedError::Path(e) => write!(f, "{e}"),
      ExecSchedError::UndeclaredOutput { command, path } => {
        write!(f, "command {command} wrote {path:?}, which it never declared as an output")
      }
      ExecSchedError::MissingOutput { command, path } => {
        write!(f, "command {command} did not write its declared output {path:?}")
      }
      ExecSchedError::Spawn(msg) => write!(f, "{msg}"),
    }
  }
}

impl std::error::Error for ExecSchedError {}

impl From<StoreError> for ExecSchedError {
  fn from(e: StoreError) -> ExecSchedError {
    ExecSchedError::Store(e)
  }
}

impl From<path_resolver::PathError> for ExecSchedError {
  fn from(e: path_resolver::PathError) -> ExecSchedError {
    ExecSchedError::Path(e)
  }
}

#[derive(Debug, Default)]
pub struct ExecReport {
  pub executed: usize,
  pub failed: usize,
  pub upstream_failed: usize,
  /// Commands still in the modify-flag set once the scheduler could make no further progress
  /// (spec.md §4.6 step 7, "remaining flagged commands indicate unfinished work").
  pub remaining: usize,
  pub errors: Vec<(i64, ExecSchedError)>,
}

/// Drains the modify-flag queue against a `CommandExecutor`, dispatching ready Commands
/// concurrently via `task_executor::Executor` up to its worker count (spec.md §5).
pub struct ExecuteScheduler {
  executor: Arc<dyn CommandExecutor>,
  task_executor: TaskExecutor,
  project_root: PathBuf,
}

impl ExecuteScheduler {
  pub fn new(executor: Arc<dyn CommandExecutor>, task_executor: TaskExecutor, project_root: PathBuf) -> ExecuteScheduler {
    ExecuteScheduler { executor, task_executor, project_root }
  }

  /// Runs until no further progress can be made: each pass reads the live modify-flag set (so
  /// Commands newly flagged by a prior pass's dependents are picked up in the same `run`),
  /// dispatches every currently-ready Command concurrently, and applies each result through its
  /// own transaction as it completes — the "workers stage in memory, the writer merges at
  /// commit" protocol of spec.md §5.
  pub fn run(&self, store: &Store, env: &EnvSnapshot) -> Result<ExecReport, ExecSchedError> {
    let mut report = ExecReport::default();
    let mut done: HashSet<i64> = HashSet::new();
    let mut failed: HashSet<i64> = HashSet::new();

    loop {
      let pending: Vec<i64> = store
        .select_by_flag(FlagKind::Modify)?
        .into_iter()
        .filter(|n| n.node_type == NodeType::Command)
        .map(|n| n.id)
        .filter(|id| !done.contains(id) && !failed.contains(id))
        .collect();
      if pending.is_empty() {
        break;
      }
      let pending_set: HashSet<i64> = pending.iter().copied().collect();

      let mut ready = Vec::new();
      let mut newly_failed = Vec::new();
      for &id in &pending {
        let preds = self.predecessors(store, id)?;
        if preds.iter().any(|p| failed.contains(p)) {
          newly_failed.push(id);
          continue;
        }
        if preds.iter().all(|p| done.contains(p) || !pending_set.contains(p)) {
          ready.push(id);
        }
      }

      for id in &newly_failed {
        failed.insert(*id);
        report.upstream_failed += 1;
        log::warn!("command {id}: skipped, a declared predecessor failed this run");
      }

      if ready.is_empty() {
        if newly_failed.is_empty() {
          log::error!(
            "execute scheduler made no progress with {} command(s) still pending; leaving them flagged",
            pending.len()
          );
          break;
        }
        continue;
      }

      let outcomes = self.dispatch_wave(store, env, &ready)?;
      for (id, outcome) in outcomes {
        match outcome {
          Ok(true) => {
            done.insert(id);
            report.executed += 1;
          }
          Ok(false) => {
            failed.insert(id);
            report.failed += 1;
          }
          Err(e) => {
            log::error!("command {id}: {e}");
            failed.insert(id);
            report.failed += 1;
            report.errors.push((id, e));
          }
        }
      }
    }

    report.remaining = store.select_by_flag(FlagKind::Modify)?.len();
    Ok(report)
  }

  /// Immediate declared predecessor Commands of `cmd_id`: the producers of its Sticky inputs,
  /// plus the producers of every output aggregated into a Group it reads (spec.md §4.6 step 2).
  fn predecessors(&self, store: &Store, cmd_id: i64) -> Result<HashSet<i64>, ExecSchedError> {
    let mut preds = HashSet::new();
    for input_id in store.incoming(cmd_id, LinkStyle::Sticky)? {
      if let Some(producer) = store.get_incoming(input_id)? {
        if producer.node_type == NodeType::Command {
          preds.insert(producer.id);
        }
      }
    }
    for group_id in store.incoming(cmd_id, LinkStyle::Group)? {
      for output_id in store.incoming(group_id, LinkStyle::Group)? {
        if let Some(producer) = store.get_incoming(output_id)? {
          if producer.node_type == NodeType::Command {
            preds.insert(producer.id);
          }
        }
      }
    }
    Ok(preds)
  }

  fn build_request(&self, store: &Store, cmd_id: i64, env: &EnvSnapshot) -> Result<ExecRequest, ExecSchedError> {
    let cmd_node = store.get_node(cmd_id)?.ok_or(StoreError::NoSuchNode { id: cmd_id })?;
    let command = cmd_node.flags.clone().unwrap_or_default();
    let working_dir = path_resolver::dir_fs_path(store, &self.project_root, cmd_node.parent_id)?;

    let mut declared_inputs = Vec::new();
    for input_id in store.incoming(cmd_id, LinkStyle::Sticky)? {
      declared_inputs.push(path_resolver::rel_path(store, input_id)?);
    }
    let mut declared_outputs = Vec::new();
    for output_id in store.outgoing(cmd_id, LinkStyle::Sticky)? {
      declared_outputs.push(path_resolver::rel_path(store, output_id)?);
    }

    Ok(ExecRequest { command, working_dir, env: env.clone(), declared_inputs, declared_outputs })
  }

  /// Builds a request for, and dispatches, every Command in `ready` concurrently on the task
  /// executor's threadpool, then applies each result to the Store as it comes back.
  fn dispatch_wave(
    &self,
    store: &Store,
    env: &EnvSnapshot,
    ready: &[i64],
  ) -> Result<Vec<(i64, Result<bool, ExecSchedError>)>, ExecSchedError> {
    let mut requests = Vec::with_capacity(ready.len());
    for &id in ready {
      requests.push((id, self.build_request(store, id, env)?));
    }

    let executor = Arc::clone(&self.executor);
    let joined = self.task_executor.block_on(async move {
      let mut join_set = tokio::task::JoinSet::new();
      for (id, request) in requests {
        let executor = Arc::clone(&executor);
        join_set.spawn_blocking(move || {
          let result = executor.execute(&request);
          (id, request, result)
        });
      }
      let mut out = Vec::new();
      while let Some(joined) = join_set.join_next().await {
        match joined {
          Ok(item) => out.push(item),
          Err(join_err) => log::error!("an execution task panicked: {join_err}"),
        }
      }
      out
    });

    let mut outcomes = Vec::with_capacity(joined.len());
    for (id, request, result) in joined {
      let outcome = match result {
        Ok(exec_result) => self.apply_result(store, id, &request, exec_result),
        Err(msg) => Err(ExecSchedError::Spawn(msg)),
      };
      outcomes.push((id, outcome));
    }
    Ok(outcomes)
  }

  /// Validates one finished Command's result against its declared inputs/outputs and, on
  /// success, applies the graph mutations of spec.md §4.6 step 5. Returns `Ok(false)` for a
  /// Command that ran but exited non-zero (left flagged, no mutation); `Err` for a validation
  /// violation (rolled back, left flagged); `Ok(true)` once the mutation has committed.
  fn apply_result(
    &self,
    store: &Store,
    cmd_id: i64,
    request: &ExecRequest,
    result: ExecResult,
  ) -> Result<bool, ExecSchedError> {
    if !result.success() {
      return Ok(false);
    }

    let txn = store.begin()?;
    let declared_outputs: HashSet<&str> = request.declared_outputs.iter().map(String::as_str).collect();
    let observed_outputs: HashSet<&str> = result.writes.iter().filter_map(ObservedPath::as_internal).collect();

    for written in observed_outputs.iter().copied() {
      if !declared_outputs.contains(written) {
        txn.rollback()?;
        return Err(ExecSchedError::UndeclaredOutput { command: cmd_id, path: written.to_string() });
      }
    }

    for declared in &request.declared_outputs {
      if observed_outputs.contains(declared.as_str()) {
        continue;
      }
      let (parent, leaf) = path_resolver::resolve(&txn, ROOT_ID, declared, Mode::Tolerant)?;
      let optional = match txn.get_by_parent_name(parent, &leaf)? {
        Some(node) => node.flags.as_deref() == Some(OPTIONAL_OUTPUT_FLAG),
        None => false,
      };
      if !optional {
        txn.rollback()?;
        return Err(ExecSchedError::MissingOutput { command: cmd_id, path: declared.clone() });
      }
    }

    // Sticky inputs not observed in `reads` are retained regardless (sticky wins); only new,
    // previously-undeclared reads need a Normal edge recorded.
    for read in &result.reads {
      if let ObservedPath::Internal(rel) = read {
        let (parent, leaf) = path_resolver::resolve(&txn, ROOT_ID, rel, Mode::Tolerant)?;
        let read_id = match txn.get_by_parent_name(parent, &leaf)? {
          Some(node) => node.id,
          None => txn.create_node(parent, &leaf, NodeType::Ghost)?,
        };
        txn.create_link(read_id, cmd_id, LinkStyle::Normal)?;
      }
    }

    for declared in &request.declared_outputs {
      let (parent, leaf) = path_resolver::resolve(&txn, ROOT_ID, declared, Mode::Tolerant)?;
      let Some(node) = txn.get_by_parent_name(parent, &leaf)? else { continue };
      let abs_path = path_resolver::dir_fs_path(&txn, &self.project_root, parent)?.join(&leaf);
      txn.set_mtime(node.id, read_mtime(&abs_path))?;
      flag_dependents(&txn, node.id)?;
    }

    txn.unflag(cmd_id, FlagKind::Modify)?;
    txn.commit()?;
    Ok(true)
  }
}

/// Commands that declared `output_id` as a Sticky input, directly or through a Group it belongs
/// to, need to run again now that it has changed (spec.md §4.6 step 5).
fn flag_dependents(txn: &Txn, output_id: i64) -> Result<(), ExecSchedError> {
  for dependent in txn.outgoing(output_id, LinkStyle::Sticky)? {
    txn.flag(dependent, FlagKind::Modify)?;
  }
  for group_id in txn.outgoing(output_id, LinkStyle::Group)? {
    for dependent in txn.outgoing(group_id, LinkStyle::Group)? {
      txn.flag(dependent, FlagKind::Modify)?;
    }
  }
  Ok(())
}

fn read_mtime(path: &std::path::Path) -> MTime {
  let Ok(metadata) = fs::metadata(path) else {
    return MTime::Invalid;
  };
  match mtime_ns(&metadata) {
    Ok(ns) => MTime::Valid(ns),
    Err(_) => MTime::Invalid,
  }
}

fn mtime_ns(metadata: &fs::Metadata) -> std::io::Result<i64> {
  let modified = metadata.modified()?;
  let duration = modified.duration_since(UNIX_EPOCH).unwrap_or_default();
  Ok(duration.as_nanos() as i64)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testutil::MockExecutor;

  fn setup(project_root: &std::path::Path, executor: Arc<MockExecutor>) -> (Store, ExecuteScheduler) {
    let store = Store::open_in_memory().unwrap();
    let scheduler = ExecuteScheduler::new(executor, TaskExecutor::new_owned(2, 4).unwrap(), project_root.to_path_buf());
    (store, scheduler)
  }

  fn make_rule(store: &Store, input: &str, command: &str, output: &str) -> (i64, i64, i64) {
    let txn = store.begin().unwrap();
    let input_id = txn.create_node(ROOT_ID, input, NodeType::File).unwrap();
    let cmd_id = txn.create_node(ROOT_ID, &format!("^{output}"), NodeType::Command).unwrap();
    txn.set_flags(cmd_id, Some(command)).unwrap();
    txn.create_link(input_id, cmd_id, LinkStyle::Sticky).unwrap();
    let output_id = txn.create_node(ROOT_ID, output, NodeType::GeneratedFile).unwrap();
    txn.create_link(cmd_id, output_id, LinkStyle::Sticky).unwrap();
    txn.flag(cmd_id, FlagKind::Modify).unwrap();
    txn.commit().unwrap();
    (input_id, cmd_id, output_id)
  }

  #[test]
  fn a_successful_command_is_unflagged_and_its_output_mtime_is_recorded() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("in.c"), b"").unwrap();
    std::fs::write(dir.path().join("out"), b"built").unwrap();
    let mock = Arc::new(MockExecutor::new());
    let (store, scheduler) = setup(dir.path(), mock);
    let (_input, cmd, output) = make_rule(&store, "in.c", "cc in.c -o out", "out");

    let report = scheduler.run(&store, &EnvSnapshot::new()).unwrap();
    assert_eq!(report.executed, 1);
    assert_eq!(report.failed, 0);
    assert!(!store.in_flag(cmd, FlagKind::Modify).unwrap());
    let node = store.get_node(output).unwrap().unwrap();
    assert!(matches!(node.mtime, MTime::Valid(_)));
  }

  #[test]
  fn a_nonzero_exit_leaves_the_command_flagged_and_failed() {
    let dir = tempfile::tempdir().unwrap();
    let mock = Arc::new(MockExecutor::new());
    mock.set_response(
      "cc in.c -o out",
      ExecResult { exit_status: 1, reads: vec![], writes: vec![], stderr: b"error".to_vec() },
    );
    let (store, scheduler) = setup(dir.path(), mock);
    let (_input, cmd, _output) = make_rule(&store, "in.c", "cc in.c -o out", "out");

    let report = scheduler.run(&store, &EnvSnapshot::new()).unwrap();
    assert_eq!(report.executed, 0);
    assert_eq!(report.failed, 1);
    assert!(store.in_flag(cmd, FlagKind::Modify).unwrap());
  }

  #[test]
  fn writing_an_undeclared_path_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mock = Arc::new(MockExecutor::new());
    mock.set_response(
      "cc in.c -o out",
      ExecResult {
        exit_status: 0,
        reads: vec![],
        writes: vec![ObservedPath::internal("out"), ObservedPath::internal("surprise.o")],
        stderr: vec![],
      },
    );
    let (store, scheduler) = setup(dir.path(), mock);
    let (_input, cmd, _output) = make_rule(&store, "in.c", "cc in.c -o out", "out");

    let report = scheduler.run(&store, &EnvSnapshot::new()).unwrap();
    assert_eq!(report.failed, 1);
    assert!(matches!(report.errors[0].1, ExecSchedError::UndeclaredOutput { .. }));
    assert!(store.in_flag(cmd, FlagKind::Modify).unwrap());
  }

  #[test]
  fn a_declared_output_never_written_is_a_missing_output_violation() {
    let dir = tempfile::tempdir().unwrap();
    let mock = Arc::new(MockExecutor::new());
    mock.set_response(
      "cc in.c -o out",
      ExecResult { exit_status: 0, reads: vec![], writes: vec![], stderr: vec![] },
    );
    let (store, scheduler) = setup(dir.path(), mock);
    make_rule(&store, "in.c", "cc in.c -o out", "out");

    let report = scheduler.run(&store, &EnvSnapshot::new()).unwrap();
    assert_eq!(report.failed, 1);
    assert!(matches!(report.errors[0].1, ExecSchedError::MissingOutput { .. }));
  }

  #[test]
  fn an_optional_output_never_written_is_not_an_error() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("out"), b"built").unwrap();
    let mock = Arc::new(MockExecutor::new());
    mock.set_response(
      "cc in.c -o out",
      ExecResult { exit_status: 0, reads: vec![], writes: vec![ObservedPath::internal("out")], stderr: vec![] },
    );
    let (store, scheduler) = setup(dir.path(), mock);
    let txn = store.begin().unwrap();
    let input_id = txn.create_node(ROOT_ID, "in.c", NodeType::File).unwrap();
    let cmd_id = txn.create_node(ROOT_ID, "^out", NodeType::Command).unwrap();
    txn.set_flags(cmd_id, Some("cc in.c -o out")).unwrap();
    txn.create_link(input_id, cmd_id, LinkStyle::Sticky).unwrap();
    let output_id = txn.create_node(ROOT_ID, "out", NodeType::GeneratedFile).unwrap();
    txn.create_link(cmd_id, output_id, LinkStyle::Sticky).unwrap();
    let coverage_id = txn.create_node(ROOT_ID, "coverage.gcda", NodeType::GeneratedFile).unwrap();
    txn.create_link(cmd_id, coverage_id, LinkStyle::Sticky).unwrap();
    txn.set_flags(coverage_id, Some(OPTIONAL_OUTPUT_FLAG)).unwrap();
    txn.flag(cmd_id, FlagKind::Modify).unwrap();
    txn.commit().unwrap();

    let report = scheduler.run(&store, &EnvSnapshot::new()).unwrap();
    assert_eq!(report.executed, 1);
    assert_eq!(report.failed, 0);
  }

  #[test]
  fn a_read_of_a_nonexistent_path_creates_a_ghost_with_a_normal_edge() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("out"), b"built").unwrap();
    let mock = Arc::new(MockExecutor::new());
    mock.set_response(
      "cc in.c -o out",
      ExecResult {
        exit_status: 0,
        reads: vec![ObservedPath::internal("in.c"), ObservedPath::internal("missing-header.h")],
        writes: vec![ObservedPath::internal("out")],
        stderr: vec![],
      },
    );
    let (store, scheduler) = setup(dir.path(), mock);
    let (_input, cmd, _output) = make_rule(&store, "in.c", "cc in.c -o out", "out");

    scheduler.run(&store, &EnvSnapshot::new()).unwrap();
    let ghost = store.get_by_parent_name(ROOT_ID, "missing-header.h").unwrap().unwrap();
    assert!(ghost.is_ghost());
    let incoming = store.incoming(cmd, LinkStyle::Normal).unwrap();
    assert!(incoming.contains(&ghost.id));
  }

  #[test]
  fn a_failed_upstream_command_propagates_upstream_failed_to_its_dependent() {
    let dir = tempfile::tempdir().unwrap();
    let mock = Arc::new(MockExecutor::new());
    mock.set_response(
      "cc a.c -o a.o",
      ExecResult { exit_status: 1, reads: vec![], writes: vec![], stderr: vec![] },
    );
    let (store, scheduler) = setup(dir.path(), mock);
    let (_a_src, _a_cmd, a_obj) = make_rule(&store, "a.c", "cc a.c -o a.o", "a.o");
    let txn = store.begin().unwrap();
    let link_cmd = txn.create_node(ROOT_ID, "^program", NodeType::Command).unwrap();
    txn.set_flags(link_cmd, Some("ld a.o -o program")).unwrap();
    txn.create_link(a_obj, link_cmd, LinkStyle::Sticky).unwrap();
    let program = txn.create_node(ROOT_ID, "program", NodeType::GeneratedFile).unwrap();
    txn.create_link(link_cmd, program, LinkStyle::Sticky).unwrap();
    txn.flag(link_cmd, FlagKind::Modify).unwrap();
    txn.commit().unwrap();

    let report = scheduler.run(&store, &EnvSnapshot::new()).unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(report.upstream_failed, 1);
    assert!(store.in_flag(link_cmd, FlagKind::Modify).unwrap());
  }

  #[test]
  fn independent_commands_both_run_and_both_succeed() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.o"), b"a").unwrap();
    std::fs::write(dir.path().join("b.o"), b"b").unwrap();
    let mock = Arc::new(MockExecutor::new());
    let (store, scheduler) = setup(dir.path(), mock);
    make_rule(&store, "a.c", "cc a.c -o a.o", "a.o");
    make_rule(&store, "b.c", "cc b.c -o b.o", "b.o");

    let report = scheduler.run(&store, &EnvSnapshot::new()).unwrap();
    assert_eq!(report.executed, 2);
    assert_eq!(report.remaining, 0);
  }
}
