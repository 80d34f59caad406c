// Copyright 2024 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! The advisory project lock (spec.md §4.8): a single POSIX-style lock file serializing all
//! writers, held for the lifetime of the invocation (spec.md §5).

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::error::StoreError;

pub struct ProjectLock {
  file: File,
  path: PathBuf,
}

impl ProjectLock {
  /// Blocks until the exclusive lock is acquired.
  pub fn acquire(dot_tup_dir: &Path) -> Result<ProjectLock, StoreError> {
    let path = dot_tup_dir.join("lock");
    let file = OpenOptions::new().create(true).write(true).open(&path)?;
    file.lock_exclusive().map_err(|e| StoreError::Lock(format!("{}: {e}", path.display())))?;
    Ok(ProjectLock { file, path })
  }

  /// Non-blocking variant used by read-only invocations that want to detect (without waiting)
  /// whether a writer currently holds the project.
  pub fn try_acquire(dot_tup_dir: &Path) -> Result<Option<ProjectLock>, StoreError> {
    let path = dot_tup_dir.join("lock");
    let file = OpenOptions::new().create(true).write(true).open(&path)?;
    match file.try_lock_exclusive() {
      Ok(()) => Ok(Some(ProjectLock { file, path })),
      Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
      Err(e) => Err(StoreError::Lock(format!("{}: {e}", path.display()))),
    }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }
}

impl Drop for ProjectLock {
  fn drop(&mut self) {
    if let Err(e) = FileExt::unlock(&self.file) {
      log::warn!("failed to release project lock {}: {e}", self.path.display());
    }
  }
}
