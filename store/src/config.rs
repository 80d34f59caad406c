// Copyright 2024 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! The Lock & Config key/value table (spec.md §4.8). Keys are plain strings; values are stored
//! as text and parsed by callers that expect an integer. Seeded keys, per SPEC_FULL.md §2:
//! `db-version` (schema.rs owns this one directly), `parser-version`, `autoupdate-pid`,
//! `sync-mode`, and `monitor-current` (the "Monitor is current" skip condition consulted by the
//! Scanner, spec.md §4.4).

use crate::error::StoreError;
use crate::Txn;

pub const KEY_PARSER_VERSION: &str = "parser-version";
pub const KEY_AUTOUPDATE_PID: &str = "autoupdate-pid";
pub const KEY_SYNC_MODE: &str = "sync-mode";
pub const KEY_MONITOR_CURRENT: &str = "monitor-current";

pub fn get(txn: &Txn, key: &str) -> Result<Option<String>, StoreError> {
  let conn = txn.conn();
  let mut stmt = conn.prepare_cached("SELECT value FROM config WHERE key = ?1")?;
  let mut rows = stmt.query([key])?;
  Ok(match rows.next()? {
    Some(row) => Some(row.get(0)?),
    None => None,
  })
}

pub fn get_int(txn: &Txn, key: &str) -> Result<Option<i64>, StoreError> {
  match get(txn, key)? {
    Some(v) => v
      .parse()
      .map(Some)
      .map_err(|_| StoreError::SchemaMismatch(format!("config key {key:?} is not an integer: {v:?}"))),
    None => Ok(None),
  }
}

pub fn set(txn: &Txn, key: &str, value: &str) -> Result<(), StoreError> {
  txn.conn().execute(
    "INSERT INTO config (key, value) VALUES (?1, ?2)
     ON CONFLICT(key) DO UPDATE SET value = excluded.value",
    rusqlite::params![key, value],
  )?;
  Ok(())
}

pub fn set_int(txn: &Txn, key: &str, value: i64) -> Result<(), StoreError> {
  set(txn, key, &value.to_string())
}

pub fn unset(txn: &Txn, key: &str) -> Result<(), StoreError> {
  txn.conn().execute("DELETE FROM config WHERE key = ?1", [key])?;
  Ok(())
}

/// The condition spec.md §4.4 calls "the Scanner is skipped when an external Monitor has been
/// streaming events and reports that its state is current".
pub fn monitor_is_current(txn: &Txn) -> Result<bool, StoreError> {
  Ok(get_int(txn, KEY_MONITOR_CURRENT)?.unwrap_or(0) != 0)
}

pub fn set_monitor_current(txn: &Txn, current: bool) -> Result<(), StoreError> {
  set_int(txn, KEY_MONITOR_CURRENT, if current { 1 } else { 0 })
}
