// Copyright 2024 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! `variant config-file…` (spec.md §6, §3.1 "srcid ... used for variant mirroring", §3.3 "Var
//! node ... owned by a `tup.config` node within a variant directory"). A variant is a
//! `GeneratedDir` rooted alongside the project that mirrors the real source tree for one build
//! configuration; this creates (or reuses) that directory and populates its `tup.config` node
//! from the given config file, one `Var` per `CONFIG_`-prefixed key.

use std::path::Path;

use store::{NodeType, Store, StoreError, ROOT_ID};

/// Parses `tup.config`-style lines: `CONFIG_KEY=value`, blank lines and `#`-comments ignored.
/// Only the `CONFIG_` namespace is a build variable (real tup's convention); other keys are
/// config-file bookkeeping and are skipped.
fn parse_config(contents: &str) -> Vec<(String, String)> {
  let mut pairs = Vec::new();
  for line in contents.lines() {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
      continue;
    }
    let Some((key, value)) = line.split_once('=') else {
      continue;
    };
    let Some(name) = key.strip_prefix("CONFIG_") else {
      continue;
    };
    pairs.push((name.to_string(), value.to_string()));
  }
  pairs
}

/// Creates (or reuses) the variant directory for `config_file`, returning its node id. The
/// variant's directory name is taken from `config_file`'s parent directory name, matching real
/// tup's layout of `build-<variant>/tup.config` files living alongside the source tree.
pub fn create(store: &Store, config_file: &Path) -> Result<i64, StoreError> {
  let variant_name = config_file
    .parent()
    .and_then(|p| p.file_name())
    .and_then(|n| n.to_str())
    .unwrap_or("variant")
    .to_string();

  let contents = std::fs::read_to_string(config_file)?;
  let pairs = parse_config(&contents);

  let txn = store.begin()?;
  let variant_id = match txn.get_by_parent_name(ROOT_ID, &variant_name)? {
    Some(node) if !node.is_ghost() => node.id,
    _ => txn.create_node(ROOT_ID, &variant_name, NodeType::GeneratedDir)?,
  };
  // A variant directory mirrors the root of the real source tree (spec.md §3.1).
  txn.set_srcid(variant_id, Some(ROOT_ID))?;

  let config_node_id = match txn.get_by_parent_name(variant_id, "tup.config")? {
    Some(node) if !node.is_ghost() => node.id,
    _ => txn.create_node(variant_id, "tup.config", NodeType::Dir)?,
  };

  for (name, value) in pairs {
    let var_id = match txn.get_by_parent_name(config_node_id, &name)? {
      Some(node) if !node.is_ghost() => node.id,
      _ => txn.create_node(config_node_id, &name, NodeType::Var)?,
    };
    txn.set_display(var_id, Some(value.as_str()))?;
  }

  txn.commit()?;
  Ok(variant_id)
}

#[cfg(test)]
mod tests {
  use super::*;
  use store::NodeType;

  #[test]
  fn creates_a_variant_directory_with_its_config_vars() {
    let tmp = tempfile::tempdir().unwrap();
    let variant_dir = tmp.path().join("build-debug");
    std::fs::create_dir_all(&variant_dir).unwrap();
    let config_path = variant_dir.join("tup.config");
    std::fs::write(&config_path, "CONFIG_DEBUG=1\n# comment\n\nCONFIG_CC=gcc\nNOISE=ignored\n").unwrap();

    let store = Store::open_in_memory().unwrap();
    let variant_id = create(&store, &config_path).unwrap();

    let variant_node = store.get_node(variant_id).unwrap().unwrap();
    assert_eq!(variant_node.name, "build-debug");
    assert_eq!(variant_node.node_type, NodeType::GeneratedDir);
    assert_eq!(variant_node.srcid, Some(ROOT_ID));

    let config_node = store.get_by_parent_name(variant_id, "tup.config").unwrap().unwrap();
    let debug_var = store.get_by_parent_name(config_node.id, "DEBUG").unwrap().unwrap();
    assert_eq!(debug_var.display.as_deref(), Some("1"));
    let cc_var = store.get_by_parent_name(config_node.id, "CC").unwrap().unwrap();
    assert_eq!(cc_var.display.as_deref(), Some("gcc"));
    assert!(store.get_by_parent_name(config_node.id, "NOISE").unwrap().is_none());
  }

  #[test]
  fn reusing_the_same_config_file_does_not_duplicate_nodes() {
    let tmp = tempfile::tempdir().unwrap();
    let variant_dir = tmp.path().join("build-release");
    std::fs::create_dir_all(&variant_dir).unwrap();
    let config_path = variant_dir.join("tup.config");
    std::fs::write(&config_path, "CONFIG_DEBUG=0\n").unwrap();

    let store = Store::open_in_memory().unwrap();
    let first = create(&store, &config_path).unwrap();
    let second = create(&store, &config_path).unwrap();
    assert_eq!(first, second);
  }
}
