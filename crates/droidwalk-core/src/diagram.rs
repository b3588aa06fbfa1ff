//! Graphviz DOT rendering of an exploration graph
//!
//! The package node is labelled `ROOT` (yellow), activities are orange,
//! elements green, and anything left unvisited red. Labels drop the package
//! name so `com.example.MainActivity___button0` reads `.MainActivity___button0`.

use std::fmt::Write as _;

use crate::graph::{ExplorationGraph, GraphNode};

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

fn short_label(id: &str, package: &str) -> String {
    if package.is_empty() {
        return id.to_string();
    }
    id.rsplit(package).next().unwrap_or(id).to_string()
}

/// Render `graph` as a DOT digraph
pub fn to_dot(graph: &ExplorationGraph) -> String {
    let package = graph.package();
    let mut out = String::new();

    let _ = writeln!(out, "digraph \"{}\" {{", escape(package));
    for (id, node) in graph.nodes() {
        let (label, fill) = match node {
            GraphNode::Package(_) => ("ROOT".to_string(), "yellow"),
            GraphNode::Activity(a) if !a.visited => (short_label(id, package), "red"),
            GraphNode::Element(e) if !e.visited => (short_label(id, package), "red"),
            GraphNode::Activity(_) => (short_label(id, package), "orange"),
            GraphNode::Element(_) => (short_label(id, package), "green"),
        };
        let _ = writeln!(
            out,
            "    \"{}\" [label=\"{}\", style=filled, fillcolor={}];",
            escape(id),
            escape(&label),
            fill
        );
    }
    for (from, to) in graph.edges() {
        let _ = writeln!(out, "    \"{}\" -> \"{}\";", escape(from), escape(to));
    }
    out.push_str("}\n");
    out
}
