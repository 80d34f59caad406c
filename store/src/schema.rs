// Copyright 2024 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! The on-disk schema for a project's `.tup/db` file. `db-version` (see `config.rs`) gates
//! migrations: bumping `CURRENT_DB_VERSION` without adding a branch to `Store::open`'s migration
//! match is a bug, not a runtime error, so we keep the match exhaustive on purpose.

use rusqlite::Connection;

use crate::error::StoreError;
use crate::node::{NodeType, ROOT_ID, ROOT_PARENT};

pub const CURRENT_DB_VERSION: i64 = 1;

const CREATE_TABLES: &str = "
CREATE TABLE IF NOT EXISTS nodes (
  id         INTEGER PRIMARY KEY AUTOINCREMENT,
  parent_id  INTEGER NOT NULL,
  name       TEXT NOT NULL,
  type       INTEGER NOT NULL,
  mtime_ns   INTEGER,
  display    TEXT,
  flags      TEXT,
  srcid      INTEGER,
  UNIQUE(parent_id, name)
);

CREATE INDEX IF NOT EXISTS nodes_by_parent ON nodes(parent_id);
CREATE INDEX IF NOT EXISTS nodes_by_srcid ON nodes(srcid);

CREATE TABLE IF NOT EXISTS links (
  from_id INTEGER NOT NULL,
  to_id   INTEGER NOT NULL,
  style   INTEGER NOT NULL,
  PRIMARY KEY (from_id, to_id, style)
);

CREATE INDEX IF NOT EXISTS links_by_to ON links(to_id);
CREATE INDEX IF NOT EXISTS links_by_from ON links(from_id);

CREATE TABLE IF NOT EXISTS node_flags (
  node_id INTEGER NOT NULL,
  which   INTEGER NOT NULL,
  PRIMARY KEY (node_id, which)
);

CREATE TABLE IF NOT EXISTS config (
  key   TEXT PRIMARY KEY,
  value TEXT NOT NULL
);
";

pub(crate) fn init(conn: &Connection) -> Result<(), StoreError> {
  conn.execute_batch("PRAGMA foreign_keys = OFF;")?;
  conn.execute_batch(CREATE_TABLES)?;

  let root_exists: bool = conn.query_row(
    "SELECT EXISTS(SELECT 1 FROM nodes WHERE id = ?1)",
    [ROOT_ID],
    |row| row.get(0),
  )?;
  if !root_exists {
    conn.execute(
      "INSERT INTO nodes (id, parent_id, name, type, mtime_ns, display, flags, srcid)
       VALUES (?1, ?2, '', ?3, NULL, NULL, NULL, NULL)",
      rusqlite::params![ROOT_ID, ROOT_PARENT, NodeType::Root],
    )?;
    // The root directory's own Tupfile needs a first parse just like any directory the Scanner
    // discovers fresh; the Scanner only create-flags directories it creates, and the root node
    // is seeded here rather than created by a scan.
    conn.execute(
      "INSERT OR IGNORE INTO node_flags (node_id, which) VALUES (?1, ?2)",
      rusqlite::params![ROOT_ID, crate::flags::FlagKind::Create],
    )?;
  }

  let version: Option<String> = conn
    .query_row("SELECT value FROM config WHERE key = 'db-version'", [], |row| row.get(0))
    .ok();
  match version {
    None => {
      conn.execute(
        "INSERT INTO config (key, value) VALUES ('db-version', ?1)",
        [CURRENT_DB_VERSION.to_string()],
      )?;
    }
    Some(v) => {
      let found: i64 = v
        .parse()
        .map_err(|_| StoreError::SchemaMismatch(format!("non-numeric db-version {v:?}")))?;
      if found != CURRENT_DB_VERSION {
        return Err(StoreError::SchemaMismatch(format!(
          "db-version {found} on disk does not match the {CURRENT_DB_VERSION} this binary expects; no migration is registered for that transition"
        )));
      }
    }
  }

  Ok(())
}
