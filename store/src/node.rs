// Copyright 2024 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};

use crate::error::StoreError;

/// Id of the sentinel parent that owns the root directory node. No real node ever has this as
/// its own `id`.
pub const ROOT_PARENT: i64 = 0;
/// Id of the root directory node itself, created once by `Store::open` when the schema is first
/// initialized.
pub const ROOT_ID: i64 = 1;

/// The `flags` marker a `GeneratedFile` carries when its producing rule declared it optional
/// (spec.md §4.6 "or be marked optional via an exclusion"): the Parse Scheduler sets it from
/// `CommandDecl::optional_outputs`, and the Execute Scheduler reads it to decide whether a
/// missing write is a `MissingOutput` violation or an allowed no-op. `Command` already overloads
/// `flags` for the shell command line, so this only ever applies to `GeneratedFile` nodes.
pub const OPTIONAL_OUTPUT_FLAG: &str = "optional";

/// The tag of a graph node. See the `nodes` table in `schema.rs` for storage; `Exclusion` nodes
/// stash their gitignore-style pattern text in `display` rather than a dedicated column, and
/// `Var`/`Env` nodes stash their value there too, mirroring how `Command` already overloads
/// `display`/`flags` for presentation strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeType {
  File,
  GeneratedFile,
  Command,
  Dir,
  GeneratedDir,
  Var,
  Group,
  Ghost,
  Root,
  Env,
  Exclusion,
}

impl NodeType {
  fn code(self) -> i64 {
    match self {
      NodeType::File => 0,
      NodeType::GeneratedFile => 1,
      NodeType::Command => 2,
      NodeType::Dir => 3,
      NodeType::GeneratedDir => 4,
      NodeType::Var => 5,
      NodeType::Group => 6,
      NodeType::Ghost => 7,
      NodeType::Root => 8,
      NodeType::Env => 9,
      NodeType::Exclusion => 10,
    }
  }

  fn from_code(code: i64) -> Result<NodeType, StoreError> {
    Ok(match code {
      0 => NodeType::File,
      1 => NodeType::GeneratedFile,
      2 => NodeType::Command,
      3 => NodeType::Dir,
      4 => NodeType::GeneratedDir,
      5 => NodeType::Var,
      6 => NodeType::Group,
      7 => NodeType::Ghost,
      8 => NodeType::Root,
      9 => NodeType::Env,
      10 => NodeType::Exclusion,
      other => return Err(StoreError::SchemaMismatch(format!("unknown node type code {other}"))),
    })
  }

  pub fn is_dir_like(self) -> bool {
    matches!(self, NodeType::Dir | NodeType::GeneratedDir | NodeType::Root)
  }
}

impl ToSql for NodeType {
  fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
    Ok(ToSqlOutput::from(self.code()))
  }
}

impl FromSql for NodeType {
  fn column_result(value: ValueRef<'_>) -> FromSqlResult<NodeType> {
    let code = value.as_i64()?;
    NodeType::from_code(code).map_err(|e| FromSqlError::Other(Box::new(e)))
  }
}

/// `mtime` per spec.md §3.1: a nanosecond timestamp, or one of two named sentinels. Stored in the
/// `mtime_ns` column as `NULL` (Invalid), `-1` (ExternalDir), or a non-negative integer (Valid).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MTime {
  Valid(i64),
  Invalid,
  ExternalDir,
}

impl MTime {
  pub(crate) fn to_column(self) -> Option<i64> {
    match self {
      MTime::Valid(ns) => Some(ns),
      MTime::Invalid => None,
      MTime::ExternalDir => Some(-1),
    }
  }

  pub(crate) fn from_column(value: Option<i64>) -> MTime {
    match value {
      None => MTime::Invalid,
      Some(-1) => MTime::ExternalDir,
      Some(ns) => MTime::Valid(ns),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
  pub id: i64,
  pub parent_id: i64,
  pub name: String,
  pub node_type: NodeType,
  pub mtime: MTime,
  pub display: Option<String>,
  pub flags: Option<String>,
  pub srcid: Option<i64>,
}

impl Node {
  pub(crate) fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Node> {
    Ok(Node {
      id: row.get("id")?,
      parent_id: row.get("parent_id")?,
      name: row.get("name")?,
      node_type: row.get("type")?,
      mtime: MTime::from_column(row.get("mtime_ns")?),
      display: row.get("display")?,
      flags: row.get("flags")?,
      srcid: row.get("srcid")?,
    })
  }

  pub fn is_ghost(&self) -> bool {
    self.node_type == NodeType::Ghost
  }
}
