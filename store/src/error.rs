// Copyright 2024 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::fmt;

/// Errors surfaced by the Graph Store. Storage-kind variants (`Io`, `Sql`, `Lock`,
/// `SchemaMismatch`) are fatal: the caller should roll back and exit non-zero. The remaining
/// variants are Invariant violations (spec.md §7) that are reported to the user with the
/// offending path(s) while the responsible transaction rolls back.
#[derive(Debug)]
pub enum StoreError {
  Io(std::io::Error),
  Sql(rusqlite::Error),
  Lock(String),
  SchemaMismatch(String),
  DuplicateName { parent_id: i64, name: String },
  DuplicateOutput { name: String },
  CycleDetected { from_id: i64, to_id: i64 },
  NoSuchNode { id: i64 },
  NotEmpty { id: i64 },
  Pattern(String),
}

impl fmt::Display for StoreError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      StoreError::Io(e) => write!(f, "I/O error: {e}"),
      StoreError::Sql(e) => write!(f, "sqlite error: {e}"),
      StoreError::Lock(msg) => write!(f, "lock error: {msg}"),
      StoreError::SchemaMismatch(msg) => write!(f, "schema mismatch: {msg}"),
      StoreError::DuplicateName { parent_id, name } => {
        write!(f, "a live node named {name:?} already exists under directory {parent_id}")
      }
      StoreError::DuplicateOutput { name } => {
        write!(f, "more than one command declares {name:?} as an output")
      }
      StoreError::CycleDetected { from_id, to_id } => {
        write!(f, "declared edge {from_id} -> {to_id} would close a cycle among commands")
      }
      StoreError::NoSuchNode { id } => write!(f, "no node with id {id}"),
      StoreError::NotEmpty { id } => write!(f, "directory {id} is not empty"),
      StoreError::Pattern(msg) => write!(f, "invalid glob pattern: {msg}"),
    }
  }
}

impl std::error::Error for StoreError {
  fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
    match self {
      StoreError::Io(e) => Some(e),
      StoreError::Sql(e) => Some(e),
      _ => None,
    }
  }
}

impl From<std::io::Error> for StoreError {
  fn from(e: std::io::Error) -> StoreError {
    StoreError::Io(e)
  }
}

impl From<rusqlite::Error> for StoreError {
  fn from(e: rusqlite::Error) -> StoreError {
    StoreError::Sql(e)
  }
}
