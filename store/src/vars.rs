// Copyright 2024 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Variables and Environment (spec.md §3.4). `Var` nodes store their string value in the
//! node's `display` field (the same overload `Exclusion` uses for pattern text); a `vardb` is
//! just a name -> (node id, value) map built by reading the live `Var` children of a
//! variant's `tup.config` node. `Env` nodes snapshot a process environment variable's value the
//! same way, so that a changed environment can be detected and turned into modify-flag
//! propagation the same as a changed file.

use std::collections::HashMap;

use crate::error::StoreError;
use crate::node::NodeType;
use crate::Store;

#[derive(Debug, Clone, Default)]
pub struct VarDb {
  entries: HashMap<String, (i64, String)>,
}

impl VarDb {
  /// Loads every live `Var` node directly under `tup_config_id` (the `tup.config` node of a
  /// variant directory).
  pub fn load(store: &Store, tup_config_id: i64) -> Result<VarDb, StoreError> {
    let mut entries = HashMap::new();
    for node in store.select_by_dir(tup_config_id)? {
      if node.node_type == NodeType::Var {
        entries.insert(node.name.clone(), (node.id, node.display.clone().unwrap_or_default()));
      }
    }
    Ok(VarDb { entries })
  }

  pub fn get(&self, name: &str) -> Option<&str> {
    self.entries.get(name).map(|(_, value)| value.as_str())
  }

  pub fn node_id(&self, name: &str) -> Option<i64> {
    self.entries.get(name).map(|(id, _)| *id)
  }

  /// Replaces every `@NAME@` occurrence in `template` with the variable's value, leaving
  /// references to unknown names untouched so that a caller can report them as errors.
  pub fn substitute(&self, template: &str) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('@') {
      let Some(end_offset) = rest[start + 1..].find('@') else {
        out.push_str(rest);
        return out;
      };
      let name = &rest[start + 1..start + 1 + end_offset];
      out.push_str(&rest[..start]);
      match self.get(name) {
        Some(value) => out.push_str(value),
        None => {
          out.push('@');
          out.push_str(name);
          out.push('@');
        }
      }
      rest = &rest[start + 1 + end_offset + 1..];
    }
    out.push_str(rest);
    out
  }
}

/// Snapshots `name`'s current value from the process environment, for comparison against an
/// `Env` node's stored `display` value by the caller (typically the Scanner, on the same
/// "changed -> flag modify" path as a changed file mtime).
pub fn current_env_value(name: &str) -> Option<String> {
  std::env::var(name).ok()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn substitute_replaces_known_vars_and_leaves_unknown_ones() {
    let mut entries = HashMap::new();
    entries.insert("CC".to_string(), (1, "gcc".to_string()));
    let db = VarDb { entries };
    assert_eq!(db.substitute("@CC@ -o out in.c"), "gcc -o out in.c");
    assert_eq!(db.substitute("@MISSING@ thing"), "@MISSING@ thing");
    assert_eq!(db.substitute("no vars here"), "no vars here");
  }
}
