// Copyright 2018 Pants project contributors (see CONTRIBUTORS.md).
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

//! A small process-wide logger. Every line goes to stderr, coloured by level when the terminal
//! supports it; when a `.tup/tup.log` file has been configured via `TupLogger::set_log_file`, an
//! uncoloured copy of every line is appended there too, so that a failed `upd` leaves a trail
//! behind even if the terminal output scrolled away.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::OnceLock;

use chrono::Local;
use colored::Colorize;
use log::{Level, Log, Metadata, Record};
use parking_lot::Mutex;

static LOGGER: OnceLock<TupLogger> = OnceLock::new();

/// Initializes the global logger. Idempotent: a second call only adjusts the level filter.
pub fn init(level: log::LevelFilter, use_color: bool) {
  let logger = LOGGER.get_or_init(|| TupLogger {
    file: Mutex::new(None),
    use_color,
  });
  if log::set_logger(logger).is_err() {
    log::debug!("logger already initialized");
  }
  log::set_max_level(level);
}

/// Points the auxiliary log file at `path`, truncating nothing (append-only), creating it and
/// its log directory if necessary. Typically called with `<project>/.tup/tup.log`.
pub fn set_log_file(path: &Path) -> std::io::Result<()> {
  if let Some(parent) = path.parent() {
    std::fs::create_dir_all(parent)?;
  }
  let file = OpenOptions::new().create(true).append(true).open(path)?;
  if let Some(logger) = LOGGER.get() {
    *logger.file.lock() = Some(file);
  }
  Ok(())
}

struct TupLogger {
  file: Mutex<Option<File>>,
  use_color: bool,
}

fn level_tag(level: Level, color: bool) -> String {
  let tag = match level {
    Level::Error => "ERROR",
    Level::Warn => "WARN ",
    Level::Info => "INFO ",
    Level::Debug => "DEBUG",
    Level::Trace => "TRACE",
  };
  if !color {
    return tag.to_string();
  }
  match level {
    Level::Error => tag.red().bold().to_string(),
    Level::Warn => tag.yellow().bold().to_string(),
    Level::Info => tag.green().to_string(),
    Level::Debug => tag.blue().to_string(),
    Level::Trace => tag.dimmed().to_string(),
  }
}

impl Log for TupLogger {
  fn enabled(&self, metadata: &Metadata) -> bool {
    metadata.level() <= log::max_level()
  }

  fn log(&self, record: &Record) {
    if !self.enabled(record.metadata()) {
      return;
    }
    let now = Local::now().format("%H:%M:%S%.3f");
    let plain = format!(
      "{now} {level} {target} {msg}",
      level = level_tag(record.level(), false),
      target = record.target(),
      msg = record.args(),
    );
    if self.use_color {
      eprintln!(
        "{now} {level} {target} {msg}",
        level = level_tag(record.level(), true),
        target = record.target().dimmed(),
        msg = record.args(),
      );
    } else {
      eprintln!("{plain}");
    }
    if let Some(file) = self.file.lock().as_mut() {
      let _ = writeln!(file, "{plain}");
    }
  }

  fn flush(&self) {
    if let Some(file) = self.file.lock().as_mut() {
      let _ = file.flush();
    }
  }
}
