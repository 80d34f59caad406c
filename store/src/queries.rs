// Copyright 2024 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Read-only SQL shared between `Store` (locks the connection for the duration of one query) and
//! `Txn` (already holds the connection for the duration of a transaction). Keeping the SQL here
//! once, parameterized over `&Connection`, avoids maintaining two copies of each query.

use rusqlite::Connection;

use crate::error::StoreError;
use crate::flags::FlagKind;
use crate::node::{Node, NodeType};

pub(crate) fn get_by_id(conn: &Connection, id: i64) -> Result<Option<Node>, StoreError> {
  let mut stmt = conn.prepare_cached("SELECT * FROM nodes WHERE id = ?1")?;
  let mut rows = stmt.query([id])?;
  match rows.next()? {
    Some(row) => Ok(Some(Node::from_row(row)?)),
    None => Ok(None),
  }
}

pub(crate) fn get_by_parent_name(
  conn: &Connection,
  parent_id: i64,
  name: &str,
) -> Result<Option<Node>, StoreError> {
  let mut stmt = conn.prepare_cached("SELECT * FROM nodes WHERE parent_id = ?1 AND name = ?2")?;
  let mut rows = stmt.query(rusqlite::params![parent_id, name])?;
  match rows.next()? {
    Some(row) => Ok(Some(Node::from_row(row)?)),
    None => Ok(None),
  }
}

pub(crate) fn select_by_dir(conn: &Connection, parent_id: i64) -> Result<Vec<Node>, StoreError> {
  let mut stmt = conn.prepare_cached("SELECT * FROM nodes WHERE parent_id = ?1 ORDER BY name")?;
  let rows = stmt.query_map([parent_id], Node::from_row)?;
  let mut out = Vec::new();
  for row in rows {
    out.push(row?);
  }
  Ok(out)
}

pub(crate) fn select_by_glob(
  conn: &Connection,
  parent_id: i64,
  pattern: &str,
  include_dirs: bool,
) -> Result<Vec<Node>, StoreError> {
  let glob = globset::Glob::new(pattern)
    .map_err(|e| StoreError::Pattern(e.to_string()))?
    .compile_matcher();
  let children = select_by_dir(conn, parent_id)?;
  Ok(
    children
      .into_iter()
      .filter(|node| !node.is_ghost())
      .filter(|node| include_dirs || !node.node_type.is_dir_like())
      .filter(|node| glob.is_match(&node.name))
      .collect(),
  )
}

/// For nodes with at most one inbound edge (e.g. `GeneratedFile`), returns its producer.
pub(crate) fn get_incoming(conn: &Connection, id: i64) -> Result<Option<Node>, StoreError> {
  let mut stmt = conn.prepare_cached("SELECT from_id FROM links WHERE to_id = ?1 LIMIT 1")?;
  let mut rows = stmt.query([id])?;
  let from_id: i64 = match rows.next()? {
    Some(row) => row.get(0)?,
    None => return Ok(None),
  };
  get_by_id(conn, from_id)
}

pub(crate) fn select_by_type(conn: &Connection, node_type: NodeType) -> Result<Vec<Node>, StoreError> {
  let mut stmt = conn.prepare_cached("SELECT * FROM nodes WHERE type = ?1 ORDER BY id")?;
  let rows = stmt.query_map([node_type], Node::from_row)?;
  let mut out = Vec::new();
  for row in rows {
    out.push(row?);
  }
  Ok(out)
}

/// Total edges incident to `id`, counting both directions. A source file's only reference from
/// a command is the outbound `file -> cmd` edge (declared inputs and observed reads are stored
/// that way), so a node with no inbound edges can still be live; only zero on *both* sides means
/// nothing references it.
pub(crate) fn incident_count(conn: &Connection, id: i64) -> Result<i64, StoreError> {
  Ok(conn.query_row(
    "SELECT COUNT(*) FROM links WHERE from_id = ?1 OR to_id = ?1",
    [id],
    |row| row.get(0),
  )?)
}

pub(crate) fn in_flag(conn: &Connection, id: i64, which: FlagKind) -> Result<bool, StoreError> {
  Ok(conn.query_row(
    "SELECT EXISTS(SELECT 1 FROM node_flags WHERE node_id = ?1 AND which = ?2)",
    rusqlite::params![id, which],
    |row| row.get(0),
  )?)
}

pub(crate) fn select_by_flag(conn: &Connection, which: FlagKind) -> Result<Vec<Node>, StoreError> {
  let mut stmt = conn.prepare_cached(
    "SELECT n.* FROM nodes n JOIN node_flags f ON f.node_id = n.id WHERE f.which = ?1 ORDER BY n.id",
  )?;
  let rows = stmt.query_map([which], Node::from_row)?;
  let mut out = Vec::new();
  for row in rows {
    out.push(row?);
  }
  Ok(out)
}

pub(crate) fn edges_from(conn: &Connection, from_id: i64, style: crate::link::LinkStyle) -> Result<Vec<i64>, StoreError> {
  let mut stmt = conn.prepare_cached("SELECT to_id FROM links WHERE from_id = ?1 AND style = ?2 ORDER BY to_id")?;
  let rows = stmt.query_map(rusqlite::params![from_id, style], |row| row.get(0))?;
  let mut out = Vec::new();
  for row in rows {
    out.push(row?);
  }
  Ok(out)
}

pub(crate) fn edges_to(conn: &Connection, to_id: i64, style: crate::link::LinkStyle) -> Result<Vec<i64>, StoreError> {
  let mut stmt = conn.prepare_cached("SELECT from_id FROM links WHERE to_id = ?1 AND style = ?2 ORDER BY from_id")?;
  let rows = stmt.query_map(rusqlite::params![to_id, style], |row| row.get(0))?;
  let mut out = Vec::new();
  for row in rows {
    out.push(row?);
  }
  Ok(out)
}

/// True if a declared edge already runs from `to` back to `from`, meaning that adding the edge
/// `from -> to` would close a cycle (spec.md §3.2, §4.1 `CycleDetected`). Declared edges are
/// Sticky and Group links (`LinkStyle::is_declared`); Normal (observed) edges do not participate
/// in the acyclicity invariant.
pub(crate) fn declared_path_exists(conn: &Connection, from: i64, to: i64) -> Result<bool, StoreError> {
  let mut stmt = conn.prepare_cached(
    "SELECT to_id FROM links WHERE from_id = ?1 AND style IN (?2, ?3)",
  )?;
  let mut frontier = vec![to];
  let mut seen = std::collections::HashSet::new();
  seen.insert(to);
  while let Some(current) = frontier.pop() {
    if current == from {
      return Ok(true);
    }
    let next_ids: Vec<i64> = {
      let rows = stmt.query_map(
        rusqlite::params![current, crate::link::LinkStyle::Sticky, crate::link::LinkStyle::Group],
        |row| row.get(0),
      )?;
      let mut ids = Vec::new();
      for row in rows {
        ids.push(row?);
      }
      ids
    };
    for next in next_ids {
      if seen.insert(next) {
        frontier.push(next);
      }
    }
  }
  Ok(false)
}
