// Copyright 2024 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};

use crate::error::StoreError;

/// One of the four disjoint boolean membership sets over node ids described in spec.md §3.3.
/// A node may sit in any subset simultaneously; membership is tracked as a row in the
/// `node_flags` table keyed by (`node_id`, `which`), so insertion and removal are naturally
/// idempotent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlagKind {
  Config,
  Create,
  Modify,
  Transient,
}

impl FlagKind {
  fn code(self) -> i64 {
    match self {
      FlagKind::Config => 0,
      FlagKind::Create => 1,
      FlagKind::Modify => 2,
      FlagKind::Transient => 3,
    }
  }

  fn from_code(code: i64) -> Result<FlagKind, StoreError> {
    Ok(match code {
      0 => FlagKind::Config,
      1 => FlagKind::Create,
      2 => FlagKind::Modify,
      3 => FlagKind::Transient,
      other => return Err(StoreError::SchemaMismatch(format!("unknown flag kind code {other}"))),
    })
  }
}

impl ToSql for FlagKind {
  fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
    Ok(ToSqlOutput::from(self.code()))
  }
}

impl FromSql for FlagKind {
  fn column_result(value: ValueRef<'_>) -> FromSqlResult<FlagKind> {
    let code = value.as_i64()?;
    FlagKind::from_code(code).map_err(|e| FromSqlError::Other(Box::new(e)))
  }
}
