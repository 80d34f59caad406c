// Copyright 2024 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! The Ghost Collector (spec.md §4.7): removes Ghost nodes whose incident edge count — inbound
//! and outbound combined — has reached zero. Run at the end of `scan`/`parse`, and on demand.

use crate::error::StoreError;
use crate::node::NodeType;
use crate::{queries, Txn};

/// Deletes every Ghost node with zero edges of any style, in either direction. Returns the number
/// collected. Ghost nodes that still have an edge — including a Normal `read -> cmd` edge left
/// over from an observed read of a since-deleted path — are left alone, so that later creation at
/// the same path can revive them and invalidate the reading command (spec.md §4.7).
pub fn collect(txn: &Txn) -> Result<usize, StoreError> {
  let ghosts = queries::select_by_type(txn.conn(), NodeType::Ghost)?;
  let mut collected = 0;
  for ghost in ghosts {
    if queries::incident_count(txn.conn(), ghost.id)? == 0 {
      txn.remove_node_row(ghost.id)?;
      collected += 1;
    }
  }
  Ok(collected)
}
