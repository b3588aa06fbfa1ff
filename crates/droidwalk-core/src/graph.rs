//! # Exploration Graph
//!
//! Per-device directed graph of package → activities → UI elements, built on
//! the fly while an application is explored.
//!
//! Node identity is positional: an element id is
//! `<activity><DELIMITER><short class, lowercased><ordinal>`, where the ordinal
//! is the element's index in the snapshot it was discovered in. The same UI
//! sequence therefore always yields the same ids, which lets a follower device
//! resolve a leader's node id against its own screen without exchanging
//! widget attributes.
//!
//! ## Key Types
//!
//! - [`ExplorationGraph`] - the graph, owned exclusively by one session
//! - [`GraphNode`] - tagged node variant (package, activity, element)
//! - [`NodeKind`] - node kind without payload, used for topology comparison

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use crate::snapshot::UiElement;

/// Separator between the owning activity and the element suffix in a node id
pub const DELIMITER: &str = "___";

/// Node identifier
pub type NodeId = String;

/// Build the id of an element discovered at `ordinal` within `activity`
pub fn element_id(activity: &str, element: &UiElement, ordinal: usize) -> NodeId {
    format!("{}{}{}{}", activity, DELIMITER, element.short_class(), ordinal)
}

/// The activity part of a node id (the id itself for activity nodes)
pub fn owning_activity(node_id: &str) -> &str {
    node_id.split(DELIMITER).next().unwrap_or(node_id)
}

/// The element part of a node id, if it is an element id
pub fn element_suffix(node_id: &str) -> Option<&str> {
    node_id.split_once(DELIMITER).map(|(_, suffix)| suffix)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NodeKind {
    Package,
    Activity,
    Element,
}

/// The application's entry node; always visited, never has a parent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageNode {
    pub name: String,
}

/// A screen
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityNode {
    pub name: String,
    pub visited: bool,
}

/// A concrete interactive widget
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementNode {
    pub activity: String,
    pub element: UiElement,
    pub visited: bool,
    /// Set once this element has triggered a round trip to another activity
    pub second_visit: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphNode {
    Package(PackageNode),
    Activity(ActivityNode),
    Element(ElementNode),
}

impl GraphNode {
    pub fn kind(&self) -> NodeKind {
        match self {
            GraphNode::Package(_) => NodeKind::Package,
            GraphNode::Activity(_) => NodeKind::Activity,
            GraphNode::Element(_) => NodeKind::Element,
        }
    }

    pub fn is_visited(&self) -> bool {
        match self {
            GraphNode::Package(_) => true,
            GraphNode::Activity(a) => a.visited,
            GraphNode::Element(e) => e.visited,
        }
    }

    fn set_visited(&mut self, value: bool) {
        match self {
            GraphNode::Package(_) => {}
            GraphNode::Activity(a) => a.visited = value,
            GraphNode::Element(e) => e.visited = value,
        }
    }
}

/// Directed exploration graph for one application attempt on one device
#[derive(Debug, Clone)]
pub struct ExplorationGraph {
    package: String,
    nodes: BTreeMap<NodeId, GraphNode>,
    edges: BTreeMap<NodeId, BTreeSet<NodeId>>,
    /// Ids removed during this attempt; discovery never re-adds them
    pruned: HashSet<NodeId>,
}

impl ExplorationGraph {
    /// Empty graph for `package`; nodes are inserted lazily on discovery
    pub fn new(package: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            nodes: BTreeMap::new(),
            edges: BTreeMap::new(),
            pruned: HashSet::new(),
        }
    }

    pub fn package(&self) -> &str {
        &self.package
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.values().map(BTreeSet::len).sum()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.get(id)
    }

    pub fn element(&self, id: &str) -> Option<&ElementNode> {
        match self.nodes.get(id) {
            Some(GraphNode::Element(e)) => Some(e),
            _ => None,
        }
    }

    /// All nodes in id order
    pub fn nodes(&self) -> impl Iterator<Item = (&NodeId, &GraphNode)> {
        self.nodes.iter()
    }

    /// All edges as (from, to) in id order
    pub fn edges(&self) -> impl Iterator<Item = (&NodeId, &NodeId)> {
        self.edges
            .iter()
            .flat_map(|(from, tos)| tos.iter().map(move |to| (from, to)))
    }

    pub fn has_edge(&self, from: &str, to: &str) -> bool {
        self.edges.get(from).is_some_and(|tos| tos.contains(to))
    }

    fn ensure_package(&mut self) {
        if !self.nodes.contains_key(&self.package) {
            self.nodes.insert(
                self.package.clone(),
                GraphNode::Package(PackageNode {
                    name: self.package.clone(),
                }),
            );
        }
    }

    fn add_edge(&mut self, from: &str, to: &str) {
        self.edges
            .entry(from.to_string())
            .or_default()
            .insert(to.to_string());
    }

    /// Insert an activity node if absent.
    ///
    /// A new activity hangs off `parent` when that activity is known,
    /// otherwise off the package node. Returns true if the node was new.
    pub fn add_activity(&mut self, activity: &str, parent: Option<&str>) -> bool {
        self.ensure_package();
        if self.nodes.contains_key(activity) {
            return false;
        }

        self.nodes.insert(
            activity.to_string(),
            GraphNode::Activity(ActivityNode {
                name: activity.to_string(),
                visited: false,
            }),
        );

        match parent.filter(|p| *p != activity && self.nodes.contains_key(*p)) {
            Some(parent) => self.add_edge(parent, activity),
            None => {
                let package = self.package.clone();
                self.add_edge(&package, activity);
            }
        }
        true
    }

    /// Ensure an element node exists for every item of `snapshot` under `activity`.
    ///
    /// Never duplicates an existing (activity, class, ordinal) triple and never
    /// re-adds a pruned id. Returns the number of newly inserted elements.
    pub fn discover(&mut self, activity: &str, snapshot: &[UiElement]) -> usize {
        self.add_activity(activity, None);

        let mut added = 0;
        for (ordinal, element) in snapshot.iter().enumerate() {
            let id = element_id(activity, element, ordinal);
            if self.nodes.contains_key(&id) || self.pruned.contains(&id) {
                continue;
            }
            self.nodes.insert(
                id.clone(),
                GraphNode::Element(ElementNode {
                    activity: activity.to_string(),
                    element: element.clone(),
                    visited: false,
                    second_visit: false,
                }),
            );
            self.add_edge(activity, &id);
            added += 1;
        }
        added
    }

    /// Unvisited nodes belonging to `activity`, in lexicographic id order.
    ///
    /// Includes the activity node itself while it is unvisited.
    pub fn unvisited(&self, activity: &str) -> Vec<NodeId> {
        let prefix = format!("{}{}", activity, DELIMITER);
        self.nodes
            .range(activity.to_string()..)
            .take_while(|(id, _)| id.starts_with(activity))
            .filter(|(id, _)| id.as_str() == activity || id.starts_with(&prefix))
            .filter(|(_, node)| !node.is_visited())
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Returns false if the node does not exist
    pub fn mark_visited(&mut self, id: &str) -> bool {
        match self.nodes.get_mut(id) {
            Some(node) => {
                node.set_visited(true);
                true
            }
            None => false,
        }
    }

    /// Re-queue an element for exactly one more visit.
    ///
    /// Sets `second_visit` and clears `visited`. Returns false for unknown ids,
    /// non-element nodes, or elements that already used their second visit.
    pub fn mark_second_visit(&mut self, id: &str) -> bool {
        match self.nodes.get_mut(id) {
            Some(GraphNode::Element(e)) if !e.second_visit => {
                e.second_visit = true;
                e.visited = false;
                true
            }
            _ => false,
        }
    }

    /// Remove a node and its incident edges
    pub fn remove(&mut self, id: &str) -> Option<GraphNode> {
        let node = self.nodes.remove(id)?;
        self.edges.remove(id);
        for tos in self.edges.values_mut() {
            tos.remove(id);
        }
        self.edges.retain(|_, tos| !tos.is_empty());
        self.pruned.insert(id.to_string());
        Some(node)
    }

    /// Ids of visited nodes in id order (the package node included)
    pub fn visited_ids(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|(_, node)| node.is_visited())
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Count of nodes per kind
    pub fn kind_counts(&self) -> HashMap<NodeKind, usize> {
        let mut counts = HashMap::new();
        for node in self.nodes.values() {
            *counts.entry(node.kind()).or_insert(0) += 1;
        }
        counts
    }

    /// Topological equality: same node kinds and adjacency up to renaming of ids.
    ///
    /// Element attributes and visited flags are ignored.
    pub fn is_isomorphic_to(&self, other: &ExplorationGraph) -> bool {
        if self.node_count() != other.node_count() || self.edge_count() != other.edge_count() {
            return false;
        }
        if self.kind_counts() != other.kind_counts() {
            return false;
        }

        let a = Indexed::from_graph(self);
        let b = Indexed::from_graph(other);
        let (colors_a, colors_b) = refine_colors(&a, &b);

        let mut hist_a: HashMap<u32, usize> = HashMap::new();
        let mut hist_b: HashMap<u32, usize> = HashMap::new();
        for c in &colors_a {
            *hist_a.entry(*c).or_insert(0) += 1;
        }
        for c in &colors_b {
            *hist_b.entry(*c).or_insert(0) += 1;
        }
        if hist_a != hist_b {
            return false;
        }

        Matcher::new(&a, &b, &colors_a, &colors_b).run()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Isomorphism internals
// ─────────────────────────────────────────────────────────────────────────────

/// Graph re-indexed by position for the isomorphism search
struct Indexed {
    kinds: Vec<NodeKind>,
    out: Vec<Vec<usize>>,
    inn: Vec<Vec<usize>>,
    edges: HashSet<(usize, usize)>,
}

impl Indexed {
    fn from_graph(graph: &ExplorationGraph) -> Self {
        let index: HashMap<&str, usize> = graph
            .nodes
            .keys()
            .enumerate()
            .map(|(i, id)| (id.as_str(), i))
            .collect();
        let n = index.len();

        let kinds = graph.nodes.values().map(GraphNode::kind).collect();
        let mut out = vec![Vec::new(); n];
        let mut inn = vec![Vec::new(); n];
        let mut edges = HashSet::new();
        for (from, to) in graph.edges() {
            if let (Some(&f), Some(&t)) = (index.get(from.as_str()), index.get(to.as_str())) {
                out[f].push(t);
                inn[t].push(f);
                edges.insert((f, t));
            }
        }

        Self {
            kinds,
            out,
            inn,
            edges,
        }
    }

    fn len(&self) -> usize {
        self.kinds.len()
    }
}

type Signature = (u32, Vec<u32>, Vec<u32>);

/// Joint colour refinement over both graphs so colour ids are comparable
fn refine_colors(a: &Indexed, b: &Indexed) -> (Vec<u32>, Vec<u32>) {
    let initial = |g: &Indexed, i: usize| -> Signature {
        let kind = match g.kinds[i] {
            NodeKind::Package => 0,
            NodeKind::Activity => 1,
            NodeKind::Element => 2,
        };
        (kind, vec![g.out[i].len() as u32], vec![g.inn[i].len() as u32])
    };

    let mut palette: BTreeMap<Signature, u32> = BTreeMap::new();
    let assign = |sig: Signature, palette: &mut BTreeMap<Signature, u32>| -> u32 {
        let next = palette.len() as u32;
        *palette.entry(sig).or_insert(next)
    };

    let mut ca: Vec<u32> = (0..a.len()).map(|i| assign(initial(a, i), &mut palette)).collect();
    let mut cb: Vec<u32> = (0..b.len()).map(|i| assign(initial(b, i), &mut palette)).collect();
    let mut classes = palette.len();

    for _ in 0..a.len().max(1) {
        let signature = |g: &Indexed, colors: &[u32], i: usize| -> Signature {
            let mut outs: Vec<u32> = g.out[i].iter().map(|&j| colors[j]).collect();
            let mut ins: Vec<u32> = g.inn[i].iter().map(|&j| colors[j]).collect();
            outs.sort_unstable();
            ins.sort_unstable();
            (colors[i], outs, ins)
        };

        let mut next_palette: BTreeMap<Signature, u32> = BTreeMap::new();
        let na: Vec<u32> = (0..a.len())
            .map(|i| assign(signature(a, &ca, i), &mut next_palette))
            .collect();
        let nb: Vec<u32> = (0..b.len())
            .map(|i| assign(signature(b, &cb, i), &mut next_palette))
            .collect();

        let stable = next_palette.len() == classes;
        classes = next_palette.len();
        ca = na;
        cb = nb;
        if stable {
            break;
        }
    }

    (ca, cb)
}

/// Backtracking matcher constrained by refined colours
struct Matcher<'a> {
    a: &'a Indexed,
    b: &'a Indexed,
    colors_a: &'a [u32],
    colors_b: &'a [u32],
    order: Vec<usize>,
    map_ab: Vec<Option<usize>>,
    used_b: Vec<bool>,
}

impl<'a> Matcher<'a> {
    fn new(a: &'a Indexed, b: &'a Indexed, colors_a: &'a [u32], colors_b: &'a [u32]) -> Self {
        // Rarest colours first prunes the search earliest
        let mut freq: HashMap<u32, usize> = HashMap::new();
        for c in colors_a {
            *freq.entry(*c).or_insert(0) += 1;
        }
        let mut order: Vec<usize> = (0..a.len()).collect();
        order.sort_by_key(|&i| (freq[&colors_a[i]], colors_a[i], i));

        Self {
            a,
            b,
            colors_a,
            colors_b,
            order,
            map_ab: vec![None; a.len()],
            used_b: vec![false; b.len()],
        }
    }

    fn run(mut self) -> bool {
        self.extend(0)
    }

    fn consistent(&self, u: usize, v: usize) -> bool {
        for &w in &self.a.out[u] {
            if let Some(mw) = self.map_ab[w] {
                if !self.b.edges.contains(&(v, mw)) {
                    return false;
                }
            }
        }
        for &w in &self.a.inn[u] {
            if let Some(mw) = self.map_ab[w] {
                if !self.b.edges.contains(&(mw, v)) {
                    return false;
                }
            }
        }
        // Edges in b between v and already-mapped nodes must exist in a too
        let mapped_edges_a = self.a.out[u]
            .iter()
            .chain(self.a.inn[u].iter())
            .filter(|w| self.map_ab[**w].is_some())
            .count();
        let mapped_edges_b = self.b.out[v]
            .iter()
            .chain(self.b.inn[v].iter())
            .filter(|w| self.used_b[**w])
            .count();
        mapped_edges_a == mapped_edges_b
    }

    fn extend(&mut self, depth: usize) -> bool {
        if depth == self.order.len() {
            return true;
        }
        let u = self.order[depth];
        for v in 0..self.b.len() {
            if self.used_b[v] || self.colors_b[v] != self.colors_a[u] {
                continue;
            }
            if !self.consistent(u, v) {
                continue;
            }
            self.map_ab[u] = Some(v);
            self.used_b[v] = true;
            if self.extend(depth + 1) {
                return true;
            }
            self.map_ab[u] = None;
            self.used_b[v] = false;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PKG: &str = "com.example.notes";
    const MAIN: &str = "com.example.notes.MainActivity";
    const EDIT: &str = "com.example.notes.EditActivity";

    fn widget(class: &str, rid: &str) -> UiElement {
        UiElement {
            resource_id: rid.to_string(),
            class_name: class.to_string(),
            clickable: true,
            ..Default::default()
        }
    }

    fn main_screen() -> Vec<UiElement> {
        vec![
            widget("android.widget.Button", "com.example.notes:id/add"),
            widget("android.widget.EditText", "com.example.notes:id/search"),
            widget("android.widget.Button", "com.example.notes:id/settings"),
        ]
    }

    #[test]
    fn test_element_id_format() {
        let el = widget("android.widget.ImageButton", "x");
        assert_eq!(
            element_id(MAIN, &el, 3),
            format!("{}___imagebutton3", MAIN)
        );
        assert_eq!(owning_activity(&element_id(MAIN, &el, 3)), MAIN);
        assert_eq!(element_suffix(&element_id(MAIN, &el, 3)), Some("imagebutton3"));
        assert_eq!(element_suffix(MAIN), None);
    }

    #[test]
    fn test_discover_is_idempotent() {
        let mut graph = ExplorationGraph::new(PKG);
        assert_eq!(graph.discover(MAIN, &main_screen()), 3);
        let count = graph.node_count();
        assert_eq!(graph.discover(MAIN, &main_screen()), 0);
        assert_eq!(graph.node_count(), count);
        // package + activity + 3 elements
        assert_eq!(count, 5);
    }

    #[test]
    fn test_discover_ids_are_stable() {
        let mut g1 = ExplorationGraph::new(PKG);
        let mut g2 = ExplorationGraph::new(PKG);
        g1.discover(MAIN, &main_screen());
        g2.discover(MAIN, &main_screen());
        let ids1: Vec<_> = g1.nodes().map(|(id, _)| id.clone()).collect();
        let ids2: Vec<_> = g2.nodes().map(|(id, _)| id.clone()).collect();
        assert_eq!(ids1, ids2);
        assert!(g1.contains(&format!("{}___button0", MAIN)));
        assert!(g1.contains(&format!("{}___edittext1", MAIN)));
        assert!(g1.contains(&format!("{}___button2", MAIN)));
    }

    #[test]
    fn test_empty_snapshot_on_root() {
        let mut graph = ExplorationGraph::new(PKG);
        graph.discover(MAIN, &[]);

        let counts = graph.kind_counts();
        assert_eq!(counts.get(&NodeKind::Package), Some(&1));
        assert_eq!(counts.get(&NodeKind::Activity), Some(&1));
        assert_eq!(counts.get(&NodeKind::Element), None);

        assert_eq!(graph.unvisited(MAIN), vec![MAIN.to_string()]);
        assert!(graph.mark_visited(MAIN));
        assert!(graph.unvisited(MAIN).is_empty());
    }

    #[test]
    fn test_unvisited_is_sorted_and_scoped() {
        let mut graph = ExplorationGraph::new(PKG);
        graph.discover(MAIN, &main_screen());
        graph.discover(EDIT, &[widget("android.widget.Button", "save")]);
        // Shares a name prefix with MAIN but is a different activity
        let sibling = format!("{}Settings", MAIN);
        graph.discover(&sibling, &[widget("android.widget.Switch", "wifi")]);

        let nodes = graph.unvisited(MAIN);
        let mut sorted = nodes.clone();
        sorted.sort();
        assert_eq!(nodes, sorted);
        assert_eq!(nodes.len(), 4);
        assert!(nodes.iter().all(|id| id.starts_with(MAIN)));
        assert!(nodes.iter().all(|id| !id.starts_with(&sibling)));
    }

    #[test]
    fn test_mark_visited_excludes_node() {
        let mut graph = ExplorationGraph::new(PKG);
        graph.discover(MAIN, &main_screen());
        let target = format!("{}___button0", MAIN);
        assert!(graph.mark_visited(&target));
        assert!(!graph.unvisited(MAIN).contains(&target));
        assert!(!graph.mark_visited("does-not-exist"));
    }

    #[test]
    fn test_mark_second_visit_requeues_once() {
        let mut graph = ExplorationGraph::new(PKG);
        graph.discover(MAIN, &main_screen());
        let target = format!("{}___button0", MAIN);
        graph.mark_visited(&target);

        assert!(graph.mark_second_visit(&target));
        assert!(graph.unvisited(MAIN).contains(&target));
        assert!(graph.element(&target).unwrap().second_visit);

        graph.mark_visited(&target);
        assert!(!graph.mark_second_visit(&target));
        assert!(!graph.unvisited(MAIN).contains(&target));
        assert!(!graph.mark_second_visit(MAIN));
    }

    #[test]
    fn test_remove_prunes_and_blocks_rediscovery() {
        let mut graph = ExplorationGraph::new(PKG);
        graph.discover(MAIN, &main_screen());
        let target = format!("{}___edittext1", MAIN);
        let edges_before = graph.edge_count();

        assert!(graph.remove(&target).is_some());
        assert!(!graph.contains(&target));
        assert!(!graph.has_edge(MAIN, &target));
        assert_eq!(graph.edge_count(), edges_before - 1);

        assert_eq!(graph.discover(MAIN, &main_screen()), 0);
        assert!(!graph.contains(&target));
        assert!(graph.remove(&target).is_none());
    }

    #[test]
    fn test_add_activity_edges() {
        let mut graph = ExplorationGraph::new(PKG);
        assert!(graph.add_activity(MAIN, None));
        assert!(graph.has_edge(PKG, MAIN));

        assert!(graph.add_activity(EDIT, Some(MAIN)));
        assert!(graph.has_edge(MAIN, EDIT));
        assert!(!graph.has_edge(PKG, EDIT));

        assert!(!graph.add_activity(EDIT, Some(MAIN)));
    }

    #[test]
    fn test_package_node_is_always_visited() {
        let mut graph = ExplorationGraph::new(PKG);
        graph.discover(MAIN, &[]);
        assert!(graph.get(PKG).unwrap().is_visited());
        assert!(graph.unvisited(PKG).iter().all(|id| id != PKG));
        assert_eq!(graph.visited_ids(), vec![PKG.to_string()]);
    }

    #[test]
    fn test_isomorphism_reflexive() {
        let mut graph = ExplorationGraph::new(PKG);
        graph.discover(MAIN, &main_screen());
        graph.add_activity(EDIT, Some(MAIN));
        graph.discover(EDIT, &[widget("android.widget.Button", "save")]);
        assert!(graph.is_isomorphic_to(&graph));
        assert!(graph.is_isomorphic_to(&graph.clone()));
    }

    #[test]
    fn test_isomorphism_differs_in_node_count() {
        let mut leader = ExplorationGraph::new(PKG);
        let mut follower = ExplorationGraph::new(PKG);
        leader.discover(MAIN, &main_screen());
        follower.discover(MAIN, &main_screen()[..2]);
        assert!(!leader.is_isomorphic_to(&follower));
        assert!(!follower.is_isomorphic_to(&leader));
    }

    #[test]
    fn test_isomorphism_ignores_ids_and_attributes() {
        let mut a = ExplorationGraph::new(PKG);
        a.discover(MAIN, &main_screen());

        let mut b = ExplorationGraph::new("org.other.app");
        b.discover(
            "org.other.app.Home",
            &[
                widget("android.widget.CheckBox", "x"),
                widget("android.widget.TextView", "y"),
                widget("android.widget.Switch", "z"),
            ],
        );
        b.mark_visited("org.other.app.Home");

        assert!(a.is_isomorphic_to(&b));
    }

    #[test]
    fn test_isomorphism_detects_different_shape() {
        // Same node and edge counts, different attachment of the second activity
        let mut a = ExplorationGraph::new(PKG);
        a.discover(MAIN, &main_screen()[..2]);
        a.add_activity(EDIT, Some(MAIN));

        let mut b = ExplorationGraph::new(PKG);
        b.discover(MAIN, &main_screen()[..2]);
        b.add_activity(EDIT, None);

        assert_eq!(a.node_count(), b.node_count());
        assert_eq!(a.edge_count(), b.edge_count());
        assert!(!a.is_isomorphic_to(&b));
    }

    #[test]
    fn test_isomorphism_of_empty_graphs() {
        let a = ExplorationGraph::new(PKG);
        let b = ExplorationGraph::new(PKG);
        assert!(a.is_isomorphic_to(&b));
    }
}
