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

//! The Scanner (spec.md §4.4): reconciles the Store with the live filesystem rooted at the
//! project top. After [`scan`] returns, every live file, directory and symlink under the project
//! top is represented by a node whose `mtime` matches the filesystem, and every node whose file
//! has been deleted has been ghosted or removed.

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use store::{config, FlagKind, MTime, NodeType, Store, StoreError, Txn, ROOT_ID};
use watch::Excludes;

#[derive(Debug)]
pub enum ScanError {
  Store(StoreError),
  Io { path: PathBuf, source: std::io::Error },
  Pattern(String),
}

impl fmt::Display for ScanError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ScanError::Store(e) => write!(f, "{e}"),
      ScanError::Io { path, source } => write!(f, "{}: {source}", path.display()),
      ScanError::Pattern(msg) => write!(f, "{msg}"),
    }
  }
}

impl std::error::Error for ScanError {}

impl From<StoreError> for ScanError {
  fn from(e: StoreError) -> ScanError {
    ScanError::Store(e)
  }
}

/// Counts of what a [`scan`] actually did, surfaced to the CLI's `read` subcommand and to tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
  pub skipped: bool,
  pub created: usize,
  pub modified: usize,
  pub ghosted: usize,
  pub removed: usize,
  pub directories_visited: usize,
}

/// Runs the Scanner's reconciliation algorithm (spec.md §4.4 steps 2-6) inside a single
/// transaction, unless `store::config::monitor_is_current` reports that an external Monitor has
/// already applied those steps incrementally (step preceding the algorithm; see spec.md §4.4's
/// closing paragraph).
pub fn scan(store: &Store, project_root: &Path) -> Result<ScanReport, ScanError> {
  let txn = store.begin()?;
  if config::monitor_is_current(&txn)? {
    txn.commit()?;
    return Ok(ScanReport { skipped: true, ..ScanReport::default() });
  }

  let mut report = ScanReport::default();
  let mut queue = VecDeque::new();
  queue.push_back((ROOT_ID, project_root.to_path_buf()));

  while let Some((dir_id, dir_path)) = queue.pop_front() {
    report.directories_visited += 1;
    scan_one_dir(&txn, dir_id, &dir_path, &mut queue, &mut report)?;
  }

  txn.commit()?;
  Ok(report)
}

fn build_excludes(dir_path: &Path, siblings: &[store::Node]) -> Result<Excludes, ScanError> {
  let patterns: Vec<&str> = siblings
    .iter()
    .filter(|n| n.node_type == NodeType::Exclusion && !n.is_ghost())
    .filter_map(|n| n.display.as_deref())
    .collect();
  if patterns.is_empty() {
    return Ok(Excludes::empty());
  }
  Excludes::from_patterns(dir_path, patterns).map_err(ScanError::Pattern)
}

fn mtime_ns(metadata: &fs::Metadata) -> std::io::Result<i64> {
  let modified = metadata.modified()?;
  let duration = modified.duration_since(UNIX_EPOCH).unwrap_or_default();
  Ok(duration.as_nanos() as i64)
}

/// Flags the create-flag on `dir_id` and every directory containing it, up to the project root,
/// so that any Tupfile whose glob might have matched the now-ghosted path is reconsidered
/// (spec.md §4.4 step 5: "enqueue its ancestors' create-flag so dependents are reconsidered").
fn flag_ancestors_create(txn: &Txn, dir_id: i64) -> Result<(), ScanError> {
  let mut current = dir_id;
  loop {
    txn.flag(current, FlagKind::Create)?;
    if current == ROOT_ID {
      break;
    }
    let Some(node) = txn.get_node(current)? else { break };
    if node.parent_id == store::ROOT_PARENT {
      break;
    }
    current = node.parent_id;
  }
  Ok(())
}

fn scan_one_dir(
  txn: &Txn,
  dir_id: i64,
  dir_path: &Path,
  queue: &mut VecDeque<(i64, PathBuf)>,
  report: &mut ScanReport,
) -> Result<(), ScanError> {
  let existing = txn.select_by_dir(dir_id)?;
  let excludes = build_excludes(dir_path, &existing)?;

  let entries = match fs::read_dir(dir_path) {
    Ok(entries) => entries,
    Err(source) => return Err(ScanError::Io { path: dir_path.to_path_buf(), source }),
  };

  let mut seen = HashSet::new();
  for entry in entries {
    let entry = entry.map_err(|source| ScanError::Io { path: dir_path.to_path_buf(), source })?;
    let name = entry.file_name().to_string_lossy().into_owned();
    let entry_path = dir_path.join(&name);
    let metadata = entry
      .metadata()
      .map_err(|source| ScanError::Io { path: entry_path.clone(), source })?;
    let is_dir = metadata.is_dir();
    if excludes.is_ignored_or_child_of_ignored_path(Path::new(&name), is_dir) {
      continue;
    }
    seen.insert(name.clone());

    let ns = mtime_ns(&metadata).map_err(|source| ScanError::Io { path: entry_path.clone(), source })?;

    match txn.get_by_parent_name(dir_id, &name)? {
      Some(node) if !node.is_ghost() => {
        if node.mtime != MTime::Valid(ns) {
          txn.set_mtime(node.id, MTime::Valid(ns))?;
          txn.flag(node.id, FlagKind::Modify)?;
          report.modified += 1;
        }
        if is_dir {
          queue.push_back((node.id, entry_path));
        }
      }
      _ => {
        let node_type = if is_dir { NodeType::Dir } else { NodeType::File };
        let id = txn.create_node(dir_id, &name, node_type)?;
        txn.set_mtime(id, MTime::Valid(ns))?;
        report.created += 1;
        if is_dir {
          txn.flag(id, FlagKind::Create)?;
          queue.push_back((id, entry_path));
        } else {
          txn.flag(id, FlagKind::Modify)?;
        }
      }
    }
  }

  for child in existing {
    let disk_backed = matches!(child.node_type, NodeType::File | NodeType::Dir);
    if !disk_backed || child.is_ghost() || seen.contains(&child.name) {
      continue;
    }
    if child.node_type == NodeType::Dir {
      // The whole subtree is gone from disk; recurse all the way down rather than one level,
      // since `delete_node` refuses to remove a directory that still has children.
      txn.delete_dir(child.id, true)?;
    } else {
      txn.delete_node(child.id)?;
    }
    report.removed += 1;
    if let Some(after) = txn.get_node(child.id)? {
      if after.is_ghost() {
        report.ghosted += 1;
        flag_ancestors_create(txn, dir_id)?;
      }
    }
  }

  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use store::{LinkStyle, Store};

  #[test]
  fn discovers_files_and_directories_under_the_project_root() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir(dir.path().join("sub")).unwrap();
    std::fs::write(dir.path().join("sub/foo.c"), b"int main(){}").unwrap();

    let store = Store::open_in_memory().unwrap();
    let report = scan(&store, dir.path()).unwrap();
    assert_eq!(report.created, 2);

    let sub = store.get_by_parent_name(ROOT_ID, "sub").unwrap().unwrap();
    assert_eq!(sub.node_type, NodeType::Dir);
    let foo = store.get_by_parent_name(sub.id, "foo.c").unwrap().unwrap();
    assert_eq!(foo.node_type, NodeType::File);
    assert!(matches!(foo.mtime, MTime::Valid(_)));
  }

  #[test]
  fn a_second_scan_with_no_changes_flags_nothing() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("foo.c"), b"int main(){}").unwrap();
    let store = Store::open_in_memory().unwrap();
    scan(&store, dir.path()).unwrap();
    let report = scan(&store, dir.path()).unwrap();
    assert_eq!(report.created, 0);
    assert_eq!(report.modified, 0);
  }

  #[test]
  fn touching_a_file_flags_it_modified_on_rescan() {
    let dir = tempfile::tempdir().unwrap();
    let file_path = dir.path().join("foo.c");
    std::fs::write(&file_path, b"int main(){}").unwrap();
    let store = Store::open_in_memory().unwrap();
    scan(&store, dir.path()).unwrap();

    std::thread::sleep(std::time::Duration::from_millis(10));
    std::fs::write(&file_path, b"int main(){ return 1; }").unwrap();
    let report = scan(&store, dir.path()).unwrap();
    assert_eq!(report.modified, 1);

    let foo = store.get_by_parent_name(ROOT_ID, "foo.c").unwrap().unwrap();
    assert!(store.in_flag(foo.id, FlagKind::Modify).unwrap());
  }

  #[test]
  fn deleting_a_referenced_file_ghosts_it_and_flags_the_directory_create() {
    let dir = tempfile::tempdir().unwrap();
    let file_path = dir.path().join("foo.c");
    std::fs::write(&file_path, b"int main(){}").unwrap();
    let store = Store::open_in_memory().unwrap();
    scan(&store, dir.path()).unwrap();

    let foo = store.get_by_parent_name(ROOT_ID, "foo.c").unwrap().unwrap();
    {
      let txn = store.begin().unwrap();
      let cmd = txn.create_node(ROOT_ID, "cmd", NodeType::Command).unwrap();
      txn.create_link(foo.id, cmd, LinkStyle::Sticky).unwrap();
      txn.unflag(ROOT_ID, FlagKind::Create).unwrap();
      txn.commit().unwrap();
    }

    std::fs::remove_file(&file_path).unwrap();
    let report = scan(&store, dir.path()).unwrap();
    assert_eq!(report.ghosted, 1);

    let foo_after = store.get_node(foo.id).unwrap().unwrap();
    assert!(foo_after.is_ghost());
    assert!(store.in_flag(ROOT_ID, FlagKind::Create).unwrap());
  }

  #[test]
  fn exclusion_nodes_hide_matching_files_from_the_scan() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("ignored.o"), b"").unwrap();
    std::fs::write(dir.path().join("kept.c"), b"").unwrap();

    let store = Store::open_in_memory().unwrap();
    {
      let txn = store.begin().unwrap();
      let excl = txn.create_node(ROOT_ID, ".tup-exclusion-0", NodeType::Exclusion).unwrap();
      txn.set_display(excl, Some("*.o")).unwrap();
      txn.commit().unwrap();
    }

    let report = scan(&store, dir.path()).unwrap();
    assert_eq!(report.created, 1);
    assert!(store.get_by_parent_name(ROOT_ID, "ignored.o").unwrap().is_none());
    assert!(store.get_by_parent_name(ROOT_ID, "kept.c").unwrap().is_some());
  }

  #[test]
  fn monitor_current_config_skips_the_scan_entirely() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("foo.c"), b"").unwrap();
    let store = Store::open_in_memory().unwrap();
    {
      let txn = store.begin().unwrap();
      config::set_monitor_current(&txn, true).unwrap();
      txn.commit().unwrap();
    }
    let report = scan(&store, dir.path()).unwrap();
    assert!(report.skipped);
    assert!(store.get_by_parent_name(ROOT_ID, "foo.c").unwrap().is_none());
  }
}
