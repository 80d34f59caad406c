// Copyright 2024 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

#![deny(warnings)]
#![deny(
  clippy::all,
  clippy::default_trait_access,
  clippy::expl_impl_clone_on_copy,
  clippy::if_not_else,
  clippy::needless_continue,
  clippy::unseparated_literal_suffix,
  clippy::used_underscore_binding
)]
#![allow(clippy::match_ref_pats)]
#![allow(
  clippy::len_without_is_empty,
  clippy::redundant_field_names,
  clippy::too_many_arguments
)]
#![allow(clippy::new_without_default, clippy::new_ret_no_self)]
#![allow(clippy::mutex_atomic)]

//! The orchestration layer (SPEC_FULL.md §2 "orchestration / CLI"): `Engine` owns one project's
//! Graph Store, advisory lock and worker pool, and exposes one method per `tup` subcommand. This
//! crate has no CLI parsing of its own; `tup`'s `main` is the only caller.

pub mod dot;
pub mod variant;

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use executor_iface::CommandExecutor;
use parse_scheduler::{ParseReport, ParseSchedError, ParseScheduler};
use parser_iface::Parser;
use scanner::{ScanError, ScanReport};
use store::{FlagKind, NodeType, ProjectLock, Store, StoreError};
use task_executor::Executor as TaskExecutor;

pub use execute_scheduler::{ExecReport, ExecSchedError};

/// `(name, value)` pairs snapshotted from the process environment, handed to both the Parse and
/// Execute Schedulers (spec.md §3.4, §6).
pub type EnvSnapshot = HashMap<String, String>;

#[derive(Debug)]
pub enum EngineError {
  Store(StoreError),
  Scan(ScanError),
  Parse(ParseSchedError),
  Exec(ExecSchedError),
  Path(path_resolver::PathError),
  Lock(String),
  Io(std::io::Error),
}

impl fmt::Display for EngineError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      EngineError::Store(e) => write!(f, "{e}"),
      EngineError::Scan(e) => write!(f, "{e}"),
      EngineError::Parse(e) => write!(f, "{e}"),
      EngineError::Exec(e) => write!(f, "{e}"),
      EngineError::Path(e) => write!(f, "{e}"),
      EngineError::Lock(msg) => write!(f, "{msg}"),
      EngineError::Io(e) => write!(f, "{e}"),
    }
  }
}

impl std::error::Error for EngineError {}

impl From<StoreError> for EngineError {
  fn from(e: StoreError) -> EngineError {
    EngineError::Store(e)
  }
}

impl From<ScanError> for EngineError {
  fn from(e: ScanError) -> EngineError {
    EngineError::Scan(e)
  }
}

impl From<ParseSchedError> for EngineError {
  fn from(e: ParseSchedError) -> EngineError {
    EngineError::Parse(e)
  }
}

impl From<ExecSchedError> for EngineError {
  fn from(e: ExecSchedError) -> EngineError {
    EngineError::Exec(e)
  }
}

impl From<path_resolver::PathError> for EngineError {
  fn from(e: path_resolver::PathError) -> EngineError {
    EngineError::Path(e)
  }
}

impl From<std::io::Error> for EngineError {
  fn from(e: std::io::Error) -> EngineError {
    EngineError::Io(e)
  }
}

impl EngineError {
  /// The exit code `tup`'s `main` returns for this error (spec.md §6: "0 success, 1 non-fatal
  /// error ... any negative internal status is coerced to 1"). Every `EngineError` the core
  /// itself raises is a non-fatal, diagnosable condition, so this is always 1; exit code 11 is
  /// reserved for the CLI's hard-link capability probe, which never produces an `EngineError`.
  pub fn exit_code(&self) -> i32 {
    1
  }
}

/// The report of one `upd` invocation: Scanner, then Parse Scheduler, then Execute Scheduler,
/// each run to completion before the next starts (spec.md §6 `upd`).
#[derive(Debug, Default)]
pub struct UpdReport {
  pub scan: ScanReport,
  pub parse: ParseReport,
  pub exec: ExecReport,
  pub collected: usize,
}

/// One project's open Graph Store, advisory lock and worker pool (spec.md §9 "Global state":
/// "expose them as an explicit Engine context passed to every operation rather than hidden
/// globals").
pub struct Engine {
  store: Store,
  project_root: PathBuf,
  dot_tup_dir: PathBuf,
  task_executor: TaskExecutor,
  _lock: ProjectLock,
}

impl Engine {
  /// `init [dir]` (spec.md §6): creates `.tup` and initializes the schema. Does not hold the
  /// project lock past the call; `open` acquires it for the lifetime of a later invocation.
  pub fn init(project_root: &Path) -> Result<(), EngineError> {
    let dot_tup_dir = project_root.join(".tup");
    std::fs::create_dir_all(project_root)?;
    let _store = Store::open(&dot_tup_dir)?;
    let lock = ProjectLock::acquire(&dot_tup_dir).map_err(|e| EngineError::Lock(e.to_string()))?;
    drop(lock);
    Ok(())
  }

  /// Opens an already-initialized project: acquires the advisory lock for the lifetime of this
  /// `Engine` (spec.md §4.8, §5) and opens the Graph Store.
  pub fn open(project_root: &Path) -> Result<Engine, EngineError> {
    let project_root = project_root.canonicalize().unwrap_or_else(|_| project_root.to_path_buf());
    let dot_tup_dir = project_root.join(".tup");
    let lock = ProjectLock::acquire(&dot_tup_dir).map_err(|e| EngineError::Lock(e.to_string()))?;
    let store = Store::open(&dot_tup_dir)?;
    let task_executor =
      TaskExecutor::new_owned(num_cpus::get(), num_cpus::get() * 2).map_err(EngineError::Lock)?;
    Ok(Engine { store, project_root, dot_tup_dir, task_executor, _lock: lock })
  }

  pub fn project_root(&self) -> &Path {
    &self.project_root
  }

  pub fn dot_tup_dir(&self) -> &Path {
    &self.dot_tup_dir
  }

  pub fn store(&self) -> &Store {
    &self.store
  }

  /// `scan` / `read` (spec.md §6): runs the Scanner alone, then the Ghost Collector.
  pub fn scan(&self) -> Result<ScanReport, EngineError> {
    let report = scanner::scan(&self.store, &self.project_root)?;
    self.gc()?;
    Ok(report)
  }

  /// `parse` (spec.md §6): drains the create-flag queue, then the Ghost Collector.
  pub fn parse(&self, parser: &dyn Parser, env: &EnvSnapshot) -> Result<ParseReport, EngineError> {
    let scheduler = ParseScheduler::new(parser, self.project_root.clone());
    let report = scheduler.run(&self.store, env)?;
    self.gc()?;
    Ok(report)
  }

  /// `refactor` / `ref` (spec.md §6): parse in refactor mode, where any non-empty graph diff is a
  /// `RefactorViolation` rather than being applied.
  pub fn parse_refactor(&self, parser: &dyn Parser, env: &EnvSnapshot) -> Result<ParseReport, EngineError> {
    let scheduler = ParseScheduler::new(parser, self.project_root.clone());
    Ok(scheduler.run_refactor(&self.store, env)?)
  }

  /// Drains the modify-flag queue, then the Ghost Collector.
  pub fn execute(
    &self,
    executor: Arc<dyn CommandExecutor>,
    env: &EnvSnapshot,
  ) -> Result<ExecReport, EngineError> {
    let scheduler =
      execute_scheduler::ExecuteScheduler::new(executor, self.task_executor.to_borrowed(), self.project_root.clone());
    let report = scheduler.run(&self.store, env)?;
    self.gc()?;
    Ok(report)
  }

  /// `upd [targets…]` (spec.md §6): Scanner (skipped if an external Monitor is current) → Parse
  /// Scheduler → Execute Scheduler, each run to completion before the next begins.
  pub fn upd(
    &self,
    parser: &dyn Parser,
    executor: Arc<dyn CommandExecutor>,
    env: &EnvSnapshot,
  ) -> Result<UpdReport, EngineError> {
    let scan = scanner::scan(&self.store, &self.project_root)?;
    let parse_scheduler = ParseScheduler::new(parser, self.project_root.clone());
    let parse = parse_scheduler.run(&self.store, env)?;
    let exec_scheduler =
      execute_scheduler::ExecuteScheduler::new(executor, self.task_executor.to_borrowed(), self.project_root.clone());
    let exec = exec_scheduler.run(&self.store, env)?;
    let collected = self.gc()?;
    Ok(UpdReport { scan, parse, exec, collected })
  }

  /// `todo [targets…]` (spec.md §6, §9): the Commands currently carrying the modify-flag, as a
  /// snapshot taken at transaction start (spec.md §9 Open Question: "treat `todo` as a snapshot
  /// taken at transaction start", resolved in DESIGN.md).
  pub fn todo(&self) -> Result<Vec<String>, EngineError> {
    let txn = self.store.begin()?;
    let flagged = txn.select_by_flag(FlagKind::Modify)?;
    let mut commands = Vec::new();
    for node in flagged {
      if node.node_type == NodeType::Command {
        commands.push(node.flags.clone().unwrap_or_default());
      }
    }
    txn.commit()?;
    Ok(commands)
  }

  /// `graph …` (spec.md §6): writes the current graph in `dot` format.
  pub fn graph(&self, out: &mut dyn std::io::Write) -> Result<(), EngineError> {
    dot::write_graph(&self.store, out)?;
    Ok(())
  }

  /// `variant config-file…` (spec.md §6): creates a variant directory linked to `config_file`.
  pub fn variant(&self, config_file: &Path) -> Result<i64, EngineError> {
    Ok(variant::create(&self.store, config_file)?)
  }

  /// Runs the Ghost Collector (spec.md §4.7), returning the number of Ghost nodes removed.
  pub fn gc(&self) -> Result<usize, EngineError> {
    let txn = self.store.begin()?;
    let collected = store::ghost::collect(&txn)?;
    txn.commit()?;
    Ok(collected)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use executor_iface::{ExecRequest, ExecResult, ObservedPath};
  use parse_scheduler::line_parser::LineParser;
  use std::sync::Mutex;

  struct ScriptedExecutor(Mutex<Vec<ExecRequest>>);

  impl CommandExecutor for ScriptedExecutor {
    fn execute(&self, request: &ExecRequest) -> Result<ExecResult, String> {
      self.0.lock().unwrap().push(request.clone());
      let reads = request.declared_inputs.iter().cloned().map(ObservedPath::Internal).collect();
      let writes = request.declared_outputs.iter().cloned().map(ObservedPath::Internal).collect();
      Ok(ExecResult { exit_status: 0, reads, writes, stderr: Vec::new() })
    }
  }

  fn write_tupfile(dir: &Path, contents: &str) {
    std::fs::write(dir.join("Tupfile"), contents).unwrap();
  }

  #[test]
  fn hello_world_runs_once_then_is_a_no_op() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path();
    std::fs::write(root.join("hello.c"), "int main(){return 0;}").unwrap();
    write_tupfile(root, ": hello.c |> gcc %f -o %o |> hello\n");

    Engine::init(root).unwrap();
    let engine = Engine::open(root).unwrap();
    let parser = LineParser;
    let executor = Arc::new(ScriptedExecutor(Mutex::new(Vec::new())));
    let env = EnvSnapshot::new();

    let first = engine.upd(&parser, executor.clone(), &env).unwrap();
    assert_eq!(first.exec.executed, 1);
    assert!(engine.todo().unwrap().is_empty());

    let second = engine.upd(&parser, executor, &env).unwrap();
    assert_eq!(second.exec.executed, 0);
  }

  #[test]
  fn refactor_is_a_no_op_after_a_stable_parse() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path();
    std::fs::write(root.join("hello.c"), "int main(){return 0;}").unwrap();
    write_tupfile(root, ": hello.c |> gcc %f -o %o |> hello\n");

    Engine::init(root).unwrap();
    let engine = Engine::open(root).unwrap();
    let parser = LineParser;
    let env = EnvSnapshot::new();

    engine.scan().unwrap();
    engine.parse(&parser, &env).unwrap();
    let refactor = engine.parse_refactor(&parser, &env).unwrap();
    assert!(refactor.errors.is_empty());
  }
}
