// Copyright 2024 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! `graph` (spec.md §6): a dump of the Graph Store in `dot` format, for visualizing with
//! graphviz. `Store` has no "select every node" or "select every link" query (spec.md §3's
//! surface is reach-from-an-id, by design), so this walks all eleven `NodeType`s and all three
//! `LinkStyle`s instead of adding one.

use std::io::Write;

use store::{LinkStyle, Node, NodeType, Store, StoreError};

const NODE_TYPES: [NodeType; 11] = [
  NodeType::File,
  NodeType::GeneratedFile,
  NodeType::Command,
  NodeType::Dir,
  NodeType::GeneratedDir,
  NodeType::Var,
  NodeType::Group,
  NodeType::Ghost,
  NodeType::Root,
  NodeType::Env,
  NodeType::Exclusion,
];

const EDGE_STYLES: [LinkStyle; 3] = [LinkStyle::Normal, LinkStyle::Sticky, LinkStyle::Group];

fn shape(node_type: NodeType) -> &'static str {
  match node_type {
    NodeType::File | NodeType::GeneratedFile => "ellipse",
    NodeType::Command => "box",
    NodeType::Dir | NodeType::GeneratedDir | NodeType::Root => "folder",
    NodeType::Var | NodeType::Env => "note",
    NodeType::Group => "hexagon",
    NodeType::Ghost => "plaintext",
    NodeType::Exclusion => "invtriangle",
  }
}

fn label(node: &Node) -> &str {
  match node.node_type {
    // A Command node's `flags` column holds its shell command line (spec.md §3.1), which is a
    // more useful label than its synthetic directory-scoped name.
    NodeType::Command => node.flags.as_deref().unwrap_or(&node.name),
    _ => &node.name,
  }
}

fn style_attr(style: LinkStyle) -> &'static str {
  match style {
    LinkStyle::Normal => "solid",
    LinkStyle::Sticky => "dashed",
    LinkStyle::Group => "dotted",
  }
}

fn quote(s: &str) -> String {
  s.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Writes every live node and edge currently in `store` to `out` as a `dot` digraph.
pub fn write_graph(store: &Store, out: &mut dyn Write) -> Result<(), StoreError> {
  writeln!(out, "digraph tup {{")?;
  writeln!(out, "  rankdir=LR;")?;

  let mut all_nodes = Vec::new();
  for node_type in NODE_TYPES {
    all_nodes.extend(store.select_by_type(node_type)?);
  }

  for node in &all_nodes {
    writeln!(
      out,
      "  n{} [label=\"{}\", shape={}];",
      node.id,
      quote(label(node)),
      shape(node.node_type)
    )?;
  }

  for node in &all_nodes {
    for style in EDGE_STYLES {
      for to_id in store.outgoing(node.id, style)? {
        writeln!(out, "  n{} -> n{} [style={}];", node.id, to_id, style_attr(style))?;
      }
    }
  }

  writeln!(out, "}}")?;
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use store::ROOT_ID;

  #[test]
  fn empty_project_graphs_to_just_the_root() {
    let store = Store::open_in_memory().unwrap();
    let mut out = Vec::new();
    write_graph(&store, &mut out).unwrap();
    let text = String::from_utf8(out).unwrap();
    assert!(text.starts_with("digraph tup {"));
    assert!(text.contains(&format!("n{ROOT_ID}")));
  }

  #[test]
  fn command_nodes_label_with_their_command_line() {
    let store = Store::open_in_memory().unwrap();
    let txn = store.begin().unwrap();
    let cmd_id = txn.create_node(ROOT_ID, ".tup/cmd/1", NodeType::Command).unwrap();
    txn.set_flags(cmd_id, Some("gcc -c foo.c")).unwrap();
    let out_id = txn.create_node(ROOT_ID, "foo.o", NodeType::GeneratedFile).unwrap();
    txn.create_link(cmd_id, out_id, LinkStyle::Sticky).unwrap();
    txn.commit().unwrap();

    let mut out = Vec::new();
    write_graph(&store, &mut out).unwrap();
    let text = String::from_utf8(out).unwrap();
    assert!(text.contains("gcc -c foo.c"));
    assert!(text.contains(&format!("n{cmd_id} -> n{out_id} [style=dashed];")));
  }

  #[test]
  fn quotes_are_escaped_in_labels() {
    let store = Store::open_in_memory().unwrap();
    let txn = store.begin().unwrap();
    let cmd_id = txn.create_node(ROOT_ID, ".tup/cmd/1", NodeType::Command).unwrap();
    txn.set_flags(cmd_id, Some("echo \"hi\"")).unwrap();
    txn.commit().unwrap();

    let mut out = Vec::new();
    write_graph(&store, &mut out).unwrap();
    let text = String::from_utf8(out).unwrap();
    assert!(text.contains("echo \\\"hi\\\""));
  }
}
