// Copyright 2024 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};

use crate::error::StoreError;

/// An edge style, per spec.md §3.2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkStyle {
  /// Runtime-observed dependency: an input was actually read, or an output actually written.
  Normal,
  /// Declared dependency from a Tupfile; survives even when the command has not yet run.
  Sticky,
  /// Dependency on a Group node aggregating other outputs.
  Group,
}

impl LinkStyle {
  fn code(self) -> i64 {
    match self {
      LinkStyle::Normal => 0,
      LinkStyle::Sticky => 1,
      LinkStyle::Group => 2,
    }
  }

  fn from_code(code: i64) -> Result<LinkStyle, StoreError> {
    Ok(match code {
      0 => LinkStyle::Normal,
      1 => LinkStyle::Sticky,
      2 => LinkStyle::Group,
      other => return Err(StoreError::SchemaMismatch(format!("unknown link style code {other}"))),
    })
  }

  /// Sticky and Group edges are "declared": they come from a Tupfile rather than from an
  /// observed read/write, and participate in the acyclicity check of spec.md §3.2.
  pub fn is_declared(self) -> bool {
    matches!(self, LinkStyle::Sticky | LinkStyle::Group)
  }
}

impl ToSql for LinkStyle {
  fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
    Ok(ToSqlOutput::from(self.code()))
  }
}

impl FromSql for LinkStyle {
  fn column_result(value: ValueRef<'_>) -> FromSqlResult<LinkStyle> {
    let code = value.as_i64()?;
    LinkStyle::from_code(code).map_err(|e| FromSqlError::Other(Box::new(e)))
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Link {
  pub from_id: i64,
  pub to_id: i64,
  pub style: LinkStyle,
}
