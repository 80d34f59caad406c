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

//! The Path Resolver (spec.md §4.3): resolves a path string relative to an anchor directory node
//! into a (parent-node, leaf-name) pair, optionally materializing intermediate `Dir` nodes along
//! the way. Both `/` and the platform's native separator are accepted on input; canonical storage
//! is always `/`, so [`to_canonical`] is the only place a separator is ever rewritten.

use std::fmt;
use std::path::{Path, PathBuf};

use store::{Node, NodeType, Store, StoreError, Txn, ROOT_ID, ROOT_PARENT};

/// Either a [`Store`] or an open [`Txn`] can answer "what node has this id" — the two read paths
/// differ only in whether a transaction is already held open around the call. Callers that walk
/// a node's `parent_id` chain (building a filesystem or display path) don't care which.
pub trait NodeReader {
  fn node(&self, id: i64) -> Result<Option<Node>, StoreError>;
}

impl NodeReader for Store {
  fn node(&self, id: i64) -> Result<Option<Node>, StoreError> {
    self.get_node(id)
  }
}

impl NodeReader for Txn<'_> {
  fn node(&self, id: i64) -> Result<Option<Node>, StoreError> {
    self.get_node(id)
  }
}

/// Builds the on-disk path of `dir_id` by walking its `parent_id` chain up to the project root
/// and joining the names back together under `project_root`.
pub fn dir_fs_path<R: NodeReader>(reader: &R, project_root: &Path, dir_id: i64) -> Result<PathBuf, StoreError> {
  let mut names = Vec::new();
  let mut current = dir_id;
  while current != ROOT_ID {
    let node = reader.node(current)?.ok_or(StoreError::NoSuchNode { id: current })?;
    names.push(node.name);
    if node.parent_id == ROOT_PARENT {
      break;
    }
    current = node.parent_id;
  }
  names.reverse();
  let mut path = project_root.to_path_buf();
  for name in names {
    path.push(name);
  }
  Ok(path)
}

/// The `/`-separated path of `id` relative to the project root, as it would appear in a
/// Tupfile's declared inputs/outputs (spec.md §6 "Paths are returned relative to the project
/// root when inside the tree").
pub fn rel_path<R: NodeReader>(reader: &R, id: i64) -> Result<String, StoreError> {
  let mut names = Vec::new();
  let mut current = id;
  while current != ROOT_ID {
    let node = reader.node(current)?.ok_or(StoreError::NoSuchNode { id: current })?;
    names.push(node.name);
    if node.parent_id == ROOT_PARENT {
      break;
    }
    current = node.parent_id;
  }
  names.reverse();
  Ok(names.join("/"))
}

/// Whether missing intermediate directories are an error (as when resolving a path the caller
/// asserts must already exist) or are created on the fly (as the Scanner does while walking a
/// tree it has not seen before).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
  Strict,
  Tolerant,
}

#[derive(Debug)]
pub enum PathError {
  Store(StoreError),
  /// An intermediate component names something that isn't a directory.
  NotADirectory { parent_id: i64, name: String },
  /// `Mode::Strict` and an intermediate directory doesn't exist.
  Missing { parent_id: i64, name: String },
  /// `..` walked past the anchor's own root.
  EscapesRoot,
  /// The path had no components at all (e.g. empty string, or all `.`).
  Empty,
}

impl fmt::Display for PathError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      PathError::Store(e) => write!(f, "{e}"),
      PathError::NotADirectory { parent_id, name } => {
        write!(f, "{name:?} under directory {parent_id} is not a directory")
      }
      PathError::Missing { parent_id, name } => {
        write!(f, "{name:?} does not exist under directory {parent_id}")
      }
      PathError::EscapesRoot => write!(f, "path escapes the project root"),
      PathError::Empty => write!(f, "path has no components"),
    }
  }
}

impl std::error::Error for PathError {}

impl From<StoreError> for PathError {
  fn from(e: StoreError) -> PathError {
    PathError::Store(e)
  }
}

/// Splits `path` on both `/` and the platform's native separator, dropping empty segments
/// (including one produced by a trailing slash) and `.` segments, but keeping `..` segments for
/// the caller to walk.
fn components(path: &str) -> Vec<&str> {
  let native = std::path::MAIN_SEPARATOR;
  path
    .split(|c: char| c == '/' || c == native)
    .filter(|segment| !segment.is_empty() && *segment != ".")
    .collect()
}

/// Rewrites a path string to use `/` as its separator, regardless of what was supplied on input.
pub fn to_canonical(path: &str) -> String {
  if std::path::MAIN_SEPARATOR == '/' {
    return path.to_string();
  }
  path.replace(std::path::MAIN_SEPARATOR, "/")
}

/// Resolves `path` relative to `anchor_id`, returning `(parent_id, leaf_name)`: the directory
/// node that should own the final component, and that component's name. Intermediate `..`
/// components walk up via each directory's `parent_id`; intermediate named components are
/// resolved to directory nodes, created on the fly in [`Mode::Tolerant`].
pub fn resolve(txn: &Txn, anchor_id: i64, path: &str, mode: Mode) -> Result<(i64, String), PathError> {
  let comps = components(path);
  let Some((leaf, dirs)) = comps.split_last() else {
    return Err(PathError::Empty);
  };

  let mut current = anchor_id;
  for comp in dirs {
    current = step(txn, current, comp, mode)?;
  }

  if *leaf == ".." {
    let parent = parent_of(txn, current)?;
    let node = txn.get_node(parent)?.ok_or(PathError::EscapesRoot)?;
    return Ok((parent, node.name));
  }

  Ok((current, (*leaf).to_string()))
}

/// Like [`resolve`], but treats every component of `path` (including the last) as naming a
/// directory, returning that final directory's id. Used to resolve a directory path handed back
/// whole, such as one of the Parse Scheduler's re-parse requests (spec.md §4.5 step 4).
pub fn resolve_dir(txn: &Txn, anchor_id: i64, path: &str, mode: Mode) -> Result<i64, PathError> {
  let comps = components(path);
  let mut current = anchor_id;
  for comp in &comps {
    current = step(txn, current, comp, mode)?;
  }
  Ok(current)
}

fn parent_of(txn: &Txn, current: i64) -> Result<i64, PathError> {
  if current == ROOT_ID {
    return Err(PathError::EscapesRoot);
  }
  let node = txn.get_node(current)?.ok_or(PathError::EscapesRoot)?;
  if node.parent_id == ROOT_PARENT {
    return Err(PathError::EscapesRoot);
  }
  Ok(node.parent_id)
}

fn step(txn: &Txn, current: i64, comp: &str, mode: Mode) -> Result<i64, PathError> {
  if comp == ".." {
    return parent_of(txn, current);
  }
  match txn.get_by_parent_name(current, comp)? {
    Some(node) if node.node_type.is_dir_like() => Ok(node.id),
    Some(node) if node.is_ghost() => match mode {
      Mode::Tolerant => Ok(txn.create_node(current, comp, NodeType::Dir)?),
      Mode::Strict => Err(PathError::Missing { parent_id: current, name: comp.to_string() }),
    },
    Some(node) => Err(PathError::NotADirectory { parent_id: current, name: node.name }),
    None => match mode {
      Mode::Tolerant => Ok(txn.create_node(current, comp, NodeType::Dir)?),
      Mode::Strict => Err(PathError::Missing { parent_id: current, name: comp.to_string() }),
    },
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use store::Store;

  #[test]
  fn resolves_an_existing_path_in_strict_mode() {
    let store = Store::open_in_memory().unwrap();
    let txn = store.begin().unwrap();
    let sub = txn.create_node(ROOT_ID, "sub", NodeType::Dir).unwrap();
    let (parent, name) = resolve(&txn, ROOT_ID, "sub/foo.c", Mode::Strict).unwrap();
    assert_eq!(parent, sub);
    assert_eq!(name, "foo.c");
    txn.commit().unwrap();
  }

  #[test]
  fn strict_mode_fails_on_missing_intermediate_directory() {
    let store = Store::open_in_memory().unwrap();
    let txn = store.begin().unwrap();
    let err = resolve(&txn, ROOT_ID, "sub/foo.c", Mode::Strict).unwrap_err();
    assert!(matches!(err, PathError::Missing { .. }));
  }

  #[test]
  fn tolerant_mode_materializes_missing_intermediate_directories() {
    let store = Store::open_in_memory().unwrap();
    let txn = store.begin().unwrap();
    let (parent, name) = resolve(&txn, ROOT_ID, "a/b/c/foo.c", Mode::Tolerant).unwrap();
    assert_eq!(name, "foo.c");
    let node = txn.get_node(parent).unwrap().unwrap();
    assert_eq!(node.name, "c");
    assert_eq!(node.node_type, NodeType::Dir);
    txn.commit().unwrap();
  }

  #[test]
  fn native_separator_and_forward_slash_both_resolve() {
    let store = Store::open_in_memory().unwrap();
    let txn = store.begin().unwrap();
    let native_path = format!("sub{}foo.c", std::path::MAIN_SEPARATOR);
    let (parent_a, name_a) = resolve(&txn, ROOT_ID, &native_path, Mode::Tolerant).unwrap();
    let (parent_b, name_b) = resolve(&txn, ROOT_ID, "sub/foo.c", Mode::Strict).unwrap();
    assert_eq!(parent_a, parent_b);
    assert_eq!(name_a, name_b);
    txn.commit().unwrap();
  }

  #[test]
  fn dot_dot_walks_up_to_the_parent_directory() {
    let store = Store::open_in_memory().unwrap();
    let txn = store.begin().unwrap();
    let sub = txn.create_node(ROOT_ID, "sub", NodeType::Dir).unwrap();
    let (parent, name) = resolve(&txn, sub, "../foo.c", Mode::Tolerant).unwrap();
    assert_eq!(parent, ROOT_ID);
    assert_eq!(name, "foo.c");
    txn.commit().unwrap();
  }

  #[test]
  fn dot_dot_past_the_project_root_is_rejected() {
    let store = Store::open_in_memory().unwrap();
    let txn = store.begin().unwrap();
    let err = resolve(&txn, ROOT_ID, "../foo.c", Mode::Tolerant).unwrap_err();
    assert!(matches!(err, PathError::EscapesRoot));
  }

  #[test]
  fn trailing_slash_and_empty_path_are_handled() {
    let store = Store::open_in_memory().unwrap();
    let txn = store.begin().unwrap();
    let (parent, name) = resolve(&txn, ROOT_ID, "sub/", Mode::Tolerant).unwrap();
    assert_eq!(parent, ROOT_ID);
    assert_eq!(name, "sub");
    let err = resolve(&txn, ROOT_ID, "", Mode::Strict).unwrap_err();
    assert!(matches!(err, PathError::Empty));
    txn.commit().unwrap();
  }

  #[test]
  fn an_intermediate_component_that_is_a_file_is_not_a_directory() {
    let store = Store::open_in_memory().unwrap();
    let txn = store.begin().unwrap();
    txn.create_node(ROOT_ID, "foo.c", NodeType::File).unwrap();
    let err = resolve(&txn, ROOT_ID, "foo.c/bar", Mode::Tolerant).unwrap_err();
    assert!(matches!(err, PathError::NotADirectory { .. }));
  }

  #[test]
  fn resolve_dir_treats_every_component_as_a_directory() {
    let store = Store::open_in_memory().unwrap();
    let txn = store.begin().unwrap();
    let leaf = resolve_dir(&txn, ROOT_ID, "a/b/c", Mode::Tolerant).unwrap();
    let node = txn.get_node(leaf).unwrap().unwrap();
    assert_eq!(node.name, "c");
    assert_eq!(node.node_type, NodeType::Dir);
    txn.commit().unwrap();
  }

  #[test]
  fn canonical_storage_always_uses_forward_slash() {
    assert_eq!(to_canonical("a/b/c"), "a/b/c");
  }

  #[test]
  fn rel_path_joins_names_from_the_project_root() {
    let store = Store::open_in_memory().unwrap();
    let txn = store.begin().unwrap();
    let (parent, name) = resolve(&txn, ROOT_ID, "a/b/foo.c", Mode::Tolerant).unwrap();
    let id = txn.create_node(parent, &name, NodeType::File).unwrap();
    assert_eq!(rel_path(&txn, id).unwrap(), "a/b/foo.c");
    txn.commit().unwrap();
  }

  #[test]
  fn dir_fs_path_builds_an_absolute_path_under_the_project_root() {
    let store = Store::open_in_memory().unwrap();
    let txn = store.begin().unwrap();
    let sub = resolve_dir(&txn, ROOT_ID, "a/b", Mode::Tolerant).unwrap();
    txn.commit().unwrap();
    let path = dir_fs_path(&store, Path::new("/proj"), sub).unwrap();
    assert_eq!(path, Path::new("/proj/a/b"));
  }
}
