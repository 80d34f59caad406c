// Copyright 2023 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::path::Path;

use ignore::gitignore::{Gitignore, GitignoreBuilder};

/// A gitignore-style matcher over the `Exclusion` nodes declared in a project's graph (their
/// pattern text lives in each node's `display` field; see `store::node::NodeType::Exclusion`).
#[derive(Clone, Debug)]
pub struct Excludes(Gitignore);

impl Excludes {
  pub fn empty() -> Excludes {
    Excludes(Gitignore::empty())
  }

  /// `root` is the directory the patterns are anchored to; `patterns` are gitignore-syntax lines
  /// such as those stored on `Exclusion` nodes.
  pub fn from_patterns<I: IntoIterator<Item = S>, S: AsRef<str>>(
    root: &Path,
    patterns: I,
  ) -> Result<Excludes, String> {
    let mut builder = GitignoreBuilder::new(root);
    for pattern in patterns {
      builder
        .add_line(None, pattern.as_ref())
        .map_err(|e| format!("invalid exclusion pattern {:?}: {e}", pattern.as_ref()))?;
    }
    let gitignore = builder
      .build()
      .map_err(|e| format!("failed to build exclusion matcher: {e}"))?;
    Ok(Excludes(gitignore))
  }

  pub fn is_ignored_or_child_of_ignored_path(&self, path: &Path, is_dir: bool) -> bool {
    self.0.matched_path_or_any_parents(path, is_dir).is_ignore()
  }
}
