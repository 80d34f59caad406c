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

//! The Graph Store: the persistent relational record of nodes, links, flag sets, variables and
//! configuration that backs a project's `.tup` directory (spec.md §4.1). Every mutating
//! operation runs inside an explicit [`Txn`], acquired via [`Store::begin`] and closed by
//! [`Txn::commit`] or dropped (which rolls back). Reads that don't need transactional isolation
//! go straight through [`Store`]'s own methods, which briefly lock the connection per call.

pub mod cache;
pub mod config;
pub mod error;
pub mod flags;
pub mod ghost;
pub mod link;
pub mod lock;
pub mod node;
mod queries;
pub mod vars;

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use rusqlite::Connection;

pub use cache::EntryCache;
pub use error::StoreError;
pub use flags::FlagKind;
pub use link::{Link, LinkStyle};
pub use lock::ProjectLock;
pub use node::{MTime, Node, NodeType, OPTIONAL_OUTPUT_FLAG, ROOT_ID, ROOT_PARENT};

mod schema;

/// The Graph Store. One instance owns the single SQLite connection used by the writer thread
/// (spec.md §5: "a single writer thread owning all Store transactions"), plus the Entry Cache
/// that mirrors its hottest rows.
pub struct Store {
  conn: Mutex<Connection>,
  cache: Mutex<EntryCache>,
  db_path: PathBuf,
}

impl Store {
  /// Opens (creating if necessary) the Graph Store file at `dot_tup_dir/db`, running schema
  /// initialization and seeding the root node and `db-version` config key on first use.
  pub fn open(dot_tup_dir: &Path) -> Result<Store, StoreError> {
    std::fs::create_dir_all(dot_tup_dir)?;
    let db_path = dot_tup_dir.join("db");
    let conn = Connection::open(&db_path)?;
    conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA foreign_keys = OFF;")?;
    schema::init(&conn)?;
    Ok(Store { conn: Mutex::new(conn), cache: Mutex::new(EntryCache::new()), db_path })
  }

  /// An in-memory Store, for tests that don't care about durability.
  pub fn open_in_memory() -> Result<Store, StoreError> {
    let conn = Connection::open_in_memory()?;
    schema::init(&conn)?;
    Ok(Store { conn: Mutex::new(conn), cache: Mutex::new(EntryCache::new()), db_path: PathBuf::new() })
  }

  pub fn db_path(&self) -> &Path {
    &self.db_path
  }

  /// Opens a new transaction. All mutating Store operations are methods on the returned [`Txn`].
  pub fn begin(&self) -> Result<Txn<'_>, StoreError> {
    let guard = self.conn.lock();
    guard.execute_batch("BEGIN IMMEDIATE")?;
    Ok(Txn { store: self, guard, done: false })
  }

  fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T, StoreError>) -> Result<T, StoreError> {
    let guard = self.conn.lock();
    f(&guard)
  }

  pub fn get_node(&self, id: i64) -> Result<Option<Node>, StoreError> {
    if let Some(snapshot) = self.cache.lock().get_by_id(id) {
      return Ok(Some(snapshot.node));
    }
    let node = self.with_conn(|conn| queries::get_by_id(conn, id))?;
    if let Some(node) = &node {
      self.cache.lock().put(node.clone());
    }
    Ok(node)
  }

  pub fn get_by_parent_name(&self, parent_id: i64, name: &str) -> Result<Option<Node>, StoreError> {
    if let Some(snapshot) = self.cache.lock().get_by_parent_name(parent_id, name) {
      return Ok(Some(snapshot.node));
    }
    let node = self.with_conn(|conn| queries::get_by_parent_name(conn, parent_id, name))?;
    if let Some(node) = &node {
      self.cache.lock().put(node.clone());
    }
    Ok(node)
  }

  pub fn select_by_dir(&self, parent_id: i64) -> Result<Vec<Node>, StoreError> {
    let nodes = self.with_conn(|conn| queries::select_by_dir(conn, parent_id))?;
    let mut cache = self.cache.lock();
    for node in &nodes {
      cache.put(node.clone());
    }
    Ok(nodes)
  }

  pub fn select_by_glob(
    &self,
    parent_id: i64,
    pattern: &str,
    include_dirs: bool,
  ) -> Result<Vec<Node>, StoreError> {
    self.with_conn(|conn| queries::select_by_glob(conn, parent_id, pattern, include_dirs))
  }

  pub fn get_incoming(&self, id: i64) -> Result<Option<Node>, StoreError> {
    self.with_conn(|conn| queries::get_incoming(conn, id))
  }

  pub fn select_by_type(&self, node_type: NodeType) -> Result<Vec<Node>, StoreError> {
    self.with_conn(|conn| queries::select_by_type(conn, node_type))
  }

  pub fn in_flag(&self, id: i64, which: FlagKind) -> Result<bool, StoreError> {
    self.with_conn(|conn| queries::in_flag(conn, id, which))
  }

  pub fn select_by_flag(&self, which: FlagKind) -> Result<Vec<Node>, StoreError> {
    self.with_conn(|conn| queries::select_by_flag(conn, which))
  }

  pub fn outgoing(&self, from_id: i64, style: LinkStyle) -> Result<Vec<i64>, StoreError> {
    self.with_conn(|conn| queries::edges_from(conn, from_id, style))
  }

  pub fn incoming(&self, to_id: i64, style: LinkStyle) -> Result<Vec<i64>, StoreError> {
    self.with_conn(|conn| queries::edges_to(conn, to_id, style))
  }
}

/// An open transaction against the Store. Every mutation goes through one of these; dropping a
/// `Txn` without calling [`Txn::commit`] rolls back and invalidates the Entry Cache, matching
/// spec.md §9's "Transactions" design note: "a rewrite must make the transaction an explicit
/// resource with guaranteed release on all exit paths".
pub struct Txn<'s> {
  store: &'s Store,
  guard: parking_lot::MutexGuard<'s, Connection>,
  done: bool,
}

impl<'s> Txn<'s> {
  pub(crate) fn conn(&self) -> &Connection {
    &self.guard
  }

  pub fn commit(mut self) -> Result<(), StoreError> {
    self.guard.execute_batch("COMMIT")?;
    self.done = true;
    Ok(())
  }

  pub fn rollback(mut self) -> Result<(), StoreError> {
    self.do_rollback()
  }

  fn do_rollback(&mut self) -> Result<(), StoreError> {
    self.guard.execute_batch("ROLLBACK")?;
    self.store.cache.lock().invalidate_all();
    self.done = true;
    Ok(())
  }

  // -- reads, mirroring Store's but against the in-progress transaction --

  pub fn get_node(&self, id: i64) -> Result<Option<Node>, StoreError> {
    queries::get_by_id(self.conn(), id)
  }

  pub fn get_by_parent_name(&self, parent_id: i64, name: &str) -> Result<Option<Node>, StoreError> {
    queries::get_by_parent_name(self.conn(), parent_id, name)
  }

  pub fn select_by_dir(&self, parent_id: i64) -> Result<Vec<Node>, StoreError> {
    queries::select_by_dir(self.conn(), parent_id)
  }

  pub fn select_by_glob(
    &self,
    parent_id: i64,
    pattern: &str,
    include_dirs: bool,
  ) -> Result<Vec<Node>, StoreError> {
    queries::select_by_glob(self.conn(), parent_id, pattern, include_dirs)
  }

  pub fn get_incoming(&self, id: i64) -> Result<Option<Node>, StoreError> {
    queries::get_incoming(self.conn(), id)
  }

  pub fn select_by_type(&self, node_type: NodeType) -> Result<Vec<Node>, StoreError> {
    queries::select_by_type(self.conn(), node_type)
  }

  pub fn in_flag(&self, id: i64, which: FlagKind) -> Result<bool, StoreError> {
    queries::in_flag(self.conn(), id, which)
  }

  pub fn select_by_flag(&self, which: FlagKind) -> Result<Vec<Node>, StoreError> {
    queries::select_by_flag(self.conn(), which)
  }

  /// Ids of nodes reached by a `style`-styled edge out of `from_id` (e.g. a Command's declared
  /// Sticky outputs, or an Output's Group-aggregation edges).
  pub fn outgoing(&self, from_id: i64, style: LinkStyle) -> Result<Vec<i64>, StoreError> {
    queries::edges_from(self.conn(), from_id, style)
  }

  /// Ids of nodes that reach `to_id` by a `style`-styled edge (e.g. a Command's declared Sticky
  /// inputs, or a Group's Group-styled incoming members).
  pub fn incoming(&self, to_id: i64, style: LinkStyle) -> Result<Vec<i64>, StoreError> {
    queries::edges_to(self.conn(), to_id, style)
  }

  // -- mutations --

  /// Creates `name` under `parent`. Fails `DuplicateName` if a live (non-Ghost) node already
  /// occupies that slot. If a Ghost occupies it, the Ghost is revived in place: same id, type
  /// reset to `node_type`, mtime reset to `Invalid` (spec.md §4.1's revival tie-break rule; see
  /// DESIGN.md for the Open Question this resolves).
  pub fn create_node(&self, parent_id: i64, name: &str, node_type: NodeType) -> Result<i64, StoreError> {
    if let Some(existing) = queries::get_by_parent_name(self.conn(), parent_id, name)? {
      if !existing.is_ghost() {
        return Err(StoreError::DuplicateName { parent_id, name: name.to_string() });
      }
      self.conn().execute(
        "UPDATE nodes SET type = ?1, mtime_ns = NULL, display = NULL, flags = NULL, srcid = NULL
         WHERE id = ?2",
        rusqlite::params![node_type, existing.id],
      )?;
      let revived = Node {
        id: existing.id,
        parent_id,
        name: name.to_string(),
        node_type,
        mtime: MTime::Invalid,
        display: None,
        flags: None,
        srcid: None,
      };
      self.store.cache.lock().put(revived);
      return Ok(existing.id);
    }

    self.conn().execute(
      "INSERT INTO nodes (parent_id, name, type, mtime_ns, display, flags, srcid)
       VALUES (?1, ?2, ?3, NULL, NULL, NULL, NULL)",
      rusqlite::params![parent_id, name, node_type],
    )?;
    let id = self.conn().last_insert_rowid();
    self.store.cache.lock().put(Node {
      id,
      parent_id,
      name: name.to_string(),
      node_type,
      mtime: MTime::Invalid,
      display: None,
      flags: None,
      srcid: None,
    });
    Ok(id)
  }

  /// Deletes `id`: turns it into a Ghost if any edge still touches it (in either direction),
  /// otherwise removes the row outright. Declared inputs and observed reads are stored as
  /// `file -> cmd` edges, so a referenced source file's only link is outbound; links are left
  /// untouched here so that reference survives on the Ghost (spec.md §4.6 step 4: a later create
  /// at the same path must still invalidate the command on the other end of that edge).
  pub fn delete_node(&self, id: i64) -> Result<(), StoreError> {
    let node = self.get_node(id)?.ok_or(StoreError::NoSuchNode { id })?;
    if node.node_type.is_dir_like() {
      let children = self.select_by_dir(id)?;
      if !children.is_empty() {
        return Err(StoreError::NotEmpty { id });
      }
    }
    let incident = queries::incident_count(self.conn(), id)?;
    if incident > 0 {
      self.conn().execute(
        "UPDATE nodes SET type = ?1, mtime_ns = NULL, display = NULL, flags = NULL, srcid = NULL
         WHERE id = ?2",
        rusqlite::params![NodeType::Ghost, id],
      )?;
      self.store.cache.lock().put(Node {
        id,
        parent_id: node.parent_id,
        name: node.name,
        node_type: NodeType::Ghost,
        mtime: MTime::Invalid,
        display: None,
        flags: None,
        srcid: None,
      });
    } else {
      self.remove_node_row(id)?;
    }
    Ok(())
  }

  pub(crate) fn remove_node_row(&self, id: i64) -> Result<(), StoreError> {
    self.conn().execute("DELETE FROM node_flags WHERE node_id = ?1", [id])?;
    self.conn().execute("DELETE FROM nodes WHERE id = ?1", [id])?;
    self.store.cache.lock().remove(id);
    Ok(())
  }

  /// Recursively ghosts/removes the contents of a directory; `force` allows a non-empty
  /// directory to be removed (spec.md §4.1 `delete_dir`).
  pub fn delete_dir(&self, id: i64, force: bool) -> Result<(), StoreError> {
    let children = self.select_by_dir(id)?;
    if !children.is_empty() && !force {
      return Err(StoreError::NotEmpty { id });
    }
    for child in children {
      if child.node_type.is_dir_like() {
        self.delete_dir(child.id, true)?;
      } else {
        self.delete_node(child.id)?;
      }
    }
    self.delete_node(id)
  }

  /// Idempotent. Fails `CycleDetected` if `style` is declared (Sticky/Group) and a declared
  /// path already runs from `to` back to `from`.
  pub fn create_link(&self, from_id: i64, to_id: i64, style: LinkStyle) -> Result<(), StoreError> {
    if style.is_declared() && queries::declared_path_exists(self.conn(), from_id, to_id)? {
      return Err(StoreError::CycleDetected { from_id, to_id });
    }
    self.conn().execute(
      "INSERT OR IGNORE INTO links (from_id, to_id, style) VALUES (?1, ?2, ?3)",
      rusqlite::params![from_id, to_id, style],
    )?;
    Ok(())
  }

  pub fn delete_links(&self, id: i64) -> Result<(), StoreError> {
    self.conn().execute("DELETE FROM links WHERE from_id = ?1 OR to_id = ?1", [id])?;
    Ok(())
  }

  pub fn flag(&self, id: i64, which: FlagKind) -> Result<(), StoreError> {
    self
      .conn()
      .execute("INSERT OR IGNORE INTO node_flags (node_id, which) VALUES (?1, ?2)", rusqlite::params![id, which])?;
    Ok(())
  }

  pub fn unflag(&self, id: i64, which: FlagKind) -> Result<(), StoreError> {
    self.conn().execute("DELETE FROM node_flags WHERE node_id = ?1 AND which = ?2", rusqlite::params![id, which])?;
    Ok(())
  }

  pub fn set_mtime(&self, id: i64, mtime: MTime) -> Result<(), StoreError> {
    self
      .conn()
      .execute("UPDATE nodes SET mtime_ns = ?1 WHERE id = ?2", rusqlite::params![mtime.to_column(), id])?;
    self.refresh_cache(id)
  }

  pub fn set_name(&self, id: i64, parent_id: i64, name: &str) -> Result<(), StoreError> {
    if let Some(existing) = queries::get_by_parent_name(self.conn(), parent_id, name)? {
      if existing.id != id && !existing.is_ghost() {
        return Err(StoreError::DuplicateName { parent_id, name: name.to_string() });
      }
    }
    self.conn().execute(
      "UPDATE nodes SET parent_id = ?1, name = ?2 WHERE id = ?3",
      rusqlite::params![parent_id, name, id],
    )?;
    self.refresh_cache(id)
  }

  pub fn set_type(&self, id: i64, node_type: NodeType) -> Result<(), StoreError> {
    self.conn().execute("UPDATE nodes SET type = ?1 WHERE id = ?2", rusqlite::params![node_type, id])?;
    self.refresh_cache(id)
  }

  pub fn set_srcid(&self, id: i64, srcid: Option<i64>) -> Result<(), StoreError> {
    self.conn().execute("UPDATE nodes SET srcid = ?1 WHERE id = ?2", rusqlite::params![srcid, id])?;
    self.refresh_cache(id)
  }

  pub fn set_display(&self, id: i64, display: Option<&str>) -> Result<(), StoreError> {
    self.conn().execute("UPDATE nodes SET display = ?1 WHERE id = ?2", rusqlite::params![display, id])?;
    self.refresh_cache(id)
  }

  pub fn set_flags(&self, id: i64, flags: Option<&str>) -> Result<(), StoreError> {
    self.conn().execute("UPDATE nodes SET flags = ?1 WHERE id = ?2", rusqlite::params![flags, id])?;
    self.refresh_cache(id)
  }

  fn refresh_cache(&self, id: i64) -> Result<(), StoreError> {
    if let Some(node) = queries::get_by_id(self.conn(), id)? {
      self.store.cache.lock().put(node);
    }
    Ok(())
  }
}

impl Drop for Txn<'_> {
  fn drop(&mut self) {
    if !self.done {
      if let Err(e) = self.do_rollback() {
        log::warn!("error rolling back an already-abandoned transaction: {e}");
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn sibling_uniqueness_is_enforced() {
    let store = Store::open_in_memory().unwrap();
    let txn = store.begin().unwrap();
    txn.create_node(ROOT_ID, "foo.c", NodeType::File).unwrap();
    let err = txn.create_node(ROOT_ID, "foo.c", NodeType::File).unwrap_err();
    assert!(matches!(err, StoreError::DuplicateName { .. }));
    txn.commit().unwrap();
  }

  #[test]
  fn delete_of_referenced_node_ghosts_it() {
    let store = Store::open_in_memory().unwrap();
    let txn = store.begin().unwrap();
    let file = txn.create_node(ROOT_ID, "foo.c", NodeType::File).unwrap();
    let cmd = txn.create_node(ROOT_ID, "cmd", NodeType::Command).unwrap();
    txn.create_link(file, cmd, LinkStyle::Sticky).unwrap();
    txn.delete_node(file).unwrap();
    let node = txn.get_node(file).unwrap().unwrap();
    assert_eq!(node.node_type, NodeType::Ghost);
    txn.commit().unwrap();
  }

  #[test]
  fn delete_of_unreferenced_node_removes_it() {
    let store = Store::open_in_memory().unwrap();
    let txn = store.begin().unwrap();
    let file = txn.create_node(ROOT_ID, "foo.c", NodeType::File).unwrap();
    txn.delete_node(file).unwrap();
    assert!(txn.get_node(file).unwrap().is_none());
    txn.commit().unwrap();
  }

  #[test]
  fn revival_reuses_the_same_id_and_resets_mtime() {
    let store = Store::open_in_memory().unwrap();
    let txn = store.begin().unwrap();
    let file = txn.create_node(ROOT_ID, "foo.c", NodeType::File).unwrap();
    let cmd = txn.create_node(ROOT_ID, "cmd", NodeType::Command).unwrap();
    txn.create_link(file, cmd, LinkStyle::Sticky).unwrap();
    txn.set_mtime(file, MTime::Valid(123)).unwrap();
    txn.delete_node(file).unwrap();
    let revived_id = txn.create_node(ROOT_ID, "foo.c", NodeType::File).unwrap();
    assert_eq!(revived_id, file);
    let node = txn.get_node(file).unwrap().unwrap();
    assert_eq!(node.node_type, NodeType::File);
    assert_eq!(node.mtime, MTime::Invalid);
    txn.commit().unwrap();
  }

  #[test]
  fn revival_without_a_ghost_is_just_a_fresh_duplicate_name_error() {
    let store = Store::open_in_memory().unwrap();
    let txn = store.begin().unwrap();
    txn.create_node(ROOT_ID, "foo.c", NodeType::File).unwrap();
    let err = txn.create_node(ROOT_ID, "foo.c", NodeType::File).unwrap_err();
    assert!(matches!(err, StoreError::DuplicateName { .. }));
  }

  #[test]
  fn declared_cycle_is_rejected() {
    let store = Store::open_in_memory().unwrap();
    let txn = store.begin().unwrap();
    let a = txn.create_node(ROOT_ID, "a", NodeType::Command).unwrap();
    let b = txn.create_node(ROOT_ID, "b", NodeType::Command).unwrap();
    txn.create_link(a, b, LinkStyle::Sticky).unwrap();
    let err = txn.create_link(b, a, LinkStyle::Sticky).unwrap_err();
    assert!(matches!(err, StoreError::CycleDetected { .. }));
    txn.commit().unwrap();
  }

  #[test]
  fn flag_insertion_and_removal_are_idempotent() {
    let store = Store::open_in_memory().unwrap();
    let txn = store.begin().unwrap();
    let id = txn.create_node(ROOT_ID, "foo.c", NodeType::File).unwrap();
    txn.flag(id, FlagKind::Modify).unwrap();
    txn.flag(id, FlagKind::Modify).unwrap();
    assert!(txn.in_flag(id, FlagKind::Modify).unwrap());
    txn.unflag(id, FlagKind::Modify).unwrap();
    txn.unflag(id, FlagKind::Modify).unwrap();
    assert!(!txn.in_flag(id, FlagKind::Modify).unwrap());
    txn.commit().unwrap();
  }

  #[test]
  fn rollback_discards_all_writes_and_invalidates_the_cache() {
    let store = Store::open_in_memory().unwrap();
    {
      let txn = store.begin().unwrap();
      txn.create_node(ROOT_ID, "foo.c", NodeType::File).unwrap();
      txn.rollback().unwrap();
    }
    assert!(store.get_by_parent_name(ROOT_ID, "foo.c").unwrap().is_none());
  }

  #[test]
  fn dropping_an_uncommitted_txn_rolls_back() {
    let store = Store::open_in_memory().unwrap();
    {
      let txn = store.begin().unwrap();
      txn.create_node(ROOT_ID, "foo.c", NodeType::File).unwrap();
      // no commit; Drop rolls back.
    }
    assert!(store.get_by_parent_name(ROOT_ID, "foo.c").unwrap().is_none());
  }

  #[test]
  fn ghost_collector_removes_zero_edge_ghosts_but_keeps_referenced_ones() {
    let store = Store::open_in_memory().unwrap();
    let txn = store.begin().unwrap();
    let cmd = txn.create_node(ROOT_ID, "cmd", NodeType::Command).unwrap();

    // `orphan` is ghosted while still linked, then the link is dropped independently (e.g. the
    // command stopped declaring it), leaving a Ghost with zero edges for the collector to reap.
    let orphan = txn.create_node(ROOT_ID, "orphan.c", NodeType::File).unwrap();
    txn.create_link(orphan, cmd, LinkStyle::Sticky).unwrap();
    txn.delete_node(orphan).unwrap();
    txn.delete_links(orphan).unwrap();

    // `referenced` is ghosted and keeps its edge, so it must survive collection.
    let referenced = txn.create_node(ROOT_ID, "ref.c", NodeType::File).unwrap();
    txn.create_link(referenced, cmd, LinkStyle::Sticky).unwrap();
    txn.delete_node(referenced).unwrap();

    let collected = ghost::collect(&txn).unwrap();
    assert_eq!(collected, 1);
    assert!(txn.get_node(orphan).unwrap().is_none());
    let referenced_node = txn.get_node(referenced).unwrap().unwrap();
    assert_eq!(referenced_node.node_type, NodeType::Ghost);
    txn.commit().unwrap();
  }

  #[test]
  fn directory_with_live_children_cannot_be_deleted_without_force() {
    let store = Store::open_in_memory().unwrap();
    let txn = store.begin().unwrap();
    let dir = txn.create_node(ROOT_ID, "sub", NodeType::Dir).unwrap();
    txn.create_node(dir, "a.c", NodeType::File).unwrap();
    let err = txn.delete_dir(dir, false).unwrap_err();
    assert!(matches!(err, StoreError::NotEmpty { .. }));
    txn.delete_dir(dir, true).unwrap();
    assert!(txn.get_node(dir).unwrap().is_none());
    txn.commit().unwrap();
  }

  #[test]
  fn round_trip_through_a_fresh_store_matches_what_was_committed() {
    let dir = tempfile::tempdir().unwrap();
    let dot_tup = dir.path().join(".tup");
    let id = {
      let store = Store::open(&dot_tup).unwrap();
      let txn = store.begin().unwrap();
      let id = txn.create_node(ROOT_ID, "foo.c", NodeType::File).unwrap();
      txn.set_mtime(id, MTime::Valid(42)).unwrap();
      txn.commit().unwrap();
      id
    };
    let reopened = Store::open(&dot_tup).unwrap();
    let node = reopened.get_node(id).unwrap().unwrap();
    assert_eq!(node.name, "foo.c");
    assert_eq!(node.mtime, MTime::Valid(42));
  }
}
