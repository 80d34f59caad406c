// Copyright 2024 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! The Entry Cache (spec.md §4.2): an in-memory mirror of recently-touched `nodes` rows, keyed
//! both by `id` and by (`parent_id`, `name`), write-through from the Store. Because `(parent_id,
//! name)` is a real uniqueness constraint on the table (a path slot is created once and only
//! toggles between Ghost and live types — see `node.rs`), the two indexes never disagree about
//! which row a given path currently names.

use std::collections::HashMap;

use crate::node::Node;

/// A cache entry tagged with the generation it was read under. A caller that holds one of these
/// across a transaction boundary can check `EntryCache::is_current` before trusting it, rather
/// than the cache silently evicting entries mid-transaction (spec.md §4.2 says it must not).
#[derive(Debug, Clone)]
pub struct Snapshot {
  pub node: Node,
  generation: u64,
}

impl Snapshot {
  pub fn node(&self) -> &Node {
    &self.node
  }
}

#[derive(Debug, Default)]
pub struct EntryCache {
  by_id: HashMap<i64, Node>,
  by_parent_name: HashMap<(i64, String), i64>,
  generation: u64,
}

impl EntryCache {
  pub fn new() -> EntryCache {
    EntryCache::default()
  }

  pub fn generation(&self) -> u64 {
    self.generation
  }

  pub fn is_current(&self, snapshot: &Snapshot) -> bool {
    snapshot.generation == self.generation
  }

  pub fn get_by_id(&self, id: i64) -> Option<Snapshot> {
    self.by_id.get(&id).map(|node| Snapshot { node: node.clone(), generation: self.generation })
  }

  pub fn get_by_parent_name(&self, parent_id: i64, name: &str) -> Option<Snapshot> {
    let id = *self.by_parent_name.get(&(parent_id, name.to_string()))?;
    self.get_by_id(id)
  }

  /// Inserts or overwrites the cached row for `node`. Called by every Store read that misses the
  /// cache, and by every Store write that mutates a tracked field, both inside the same
  /// transaction as the underlying SQL statement (spec.md §4.2).
  pub fn put(&mut self, node: Node) {
    if let Some(old) = self.by_id.get(&node.id) {
      if old.parent_id != node.parent_id || old.name != node.name {
        self.by_parent_name.remove(&(old.parent_id, old.name.clone()));
      }
    }
    self.by_parent_name.insert((node.parent_id, node.name.clone()), node.id);
    self.by_id.insert(node.id, node);
  }

  pub fn remove(&mut self, id: i64) {
    if let Some(node) = self.by_id.remove(&id) {
      self.by_parent_name.remove(&(node.parent_id, node.name));
    }
  }

  /// Invalidates every outstanding `Snapshot` by advancing the generation counter and dropping
  /// all entries. Called on transaction rollback (spec.md §4.2).
  pub fn invalidate_all(&mut self) {
    self.by_id.clear();
    self.by_parent_name.clear();
    self.generation = self.generation.wrapping_add(1);
  }
}
