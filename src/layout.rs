//! Automatic diagram layout: level-assigns the (possibly emitter-expanded)
//! process graph, distributes gateway branches symmetrically, and routes
//! orthogonal edges with waypoints.
//!
//! Grounded on `authoring::export_bpmn::topo_layout`'s dimension table and
//! rank-by-topological-order idea; the five-phase algorithm itself (gateway
//! branch redistribution, Z-shaped waypoint routing, back-edge detection)
//! goes beyond what that helper does.

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use std::collections::{HashMap, HashSet};

/// An element kind as seen by the layout engine — just enough to look up
/// its box dimensions. The emitter's expanded graph carries these for both
/// user-authored and synthetic nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShapeKind {
    Event,
    Gateway,
    Task,
}

impl ShapeKind {
    fn dimensions(self) -> (f64, f64) {
        match self {
            ShapeKind::Event => (36.0, 36.0),
            ShapeKind::Gateway => (50.0, 50.0),
            ShapeKind::Task => (100.0, 80.0),
        }
    }
}

/// One node to be laid out: a stable id plus its shape kind. Order in the
/// input slice is the author order the rest of the pipeline preserves.
#[derive(Debug, Clone)]
pub struct LayoutNode {
    pub id: String,
    pub kind: ShapeKind,
}

/// One directed edge to be laid out, identified by a caller-chosen flow id
/// (so the emitter can key waypoints back to its `sequenceFlow` ids).
#[derive(Debug, Clone)]
pub struct LayoutEdge {
    pub flow_id: String,
    pub source_id: String,
    pub target_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    fn right_mid(&self) -> (f64, f64) {
        (self.x + self.width, self.y + self.height / 2.0)
    }
    fn left_mid(&self) -> (f64, f64) {
        (self.x, self.y + self.height / 2.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Waypoint {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Default)]
pub struct Layout {
    pub positions: HashMap<String, Rect>,
    pub edges: HashMap<String, Vec<Waypoint>>,
}

/// Spacing configuration, passed by value into the layout engine — no
/// process-wide singleton.
#[derive(Debug, Clone, Copy)]
pub struct LayoutConfig {
    pub horizontal: f64,
    pub vertical: f64,
    pub level_spacing: f64,
    pub gateway_branch_spacing: f64,
    pub margin_top: f64,
    pub margin_left: f64,
    pub margin_right: f64,
    pub margin_bottom: f64,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        LayoutConfig {
            horizontal: 150.0,
            vertical: 100.0,
            level_spacing: 200.0,
            gateway_branch_spacing: 120.0,
            margin_top: 50.0,
            margin_left: 50.0,
            margin_right: 50.0,
            margin_bottom: 50.0,
        }
    }
}

/// Compute positions and waypoints for `nodes`/`edges` under `config`.
///
/// Deterministic: the same `nodes`/`edges` (same order, same ids) always
/// yield byte-identical coordinates, since every phase iterates in the
/// caller-supplied order rather than hash-map order.
pub fn layout(nodes: &[LayoutNode], edges: &[LayoutEdge], config: &LayoutConfig) -> Layout {
    // ── Phase 1: graph build ──
    let mut graph: DiGraph<String, ()> = DiGraph::new();
    let mut idx: HashMap<&str, NodeIndex> = HashMap::new();
    for n in nodes {
        idx.insert(&n.id, graph.add_node(n.id.clone()));
    }
    for e in edges {
        let (Some(&s), Some(&t)) = (idx.get(e.source_id.as_str()), idx.get(e.target_id.as_str()))
        else {
            continue;
        };
        graph.add_edge(s, t, ());
    }

    // ── Phase 2: level assignment (longest-path, back-edges ignored) ──
    let starts: Vec<NodeIndex> = nodes
        .iter()
        .enumerate()
        .filter(|(_, n)| matches!(n.kind, ShapeKind::Event) && is_source_event(n, edges))
        .map(|(i, _)| NodeIndex::new(i))
        .collect();
    // Fall back to graph roots (no incoming edges) if no explicit start
    // events were identified by the caller's node list — keeps the
    // algorithm well-defined for any acyclic or cyclic input.
    let starts = if starts.is_empty() {
        graph
            .node_indices()
            .filter(|&n| {
                graph
                    .edges_directed(n, petgraph::Direction::Incoming)
                    .next()
                    .is_none()
            })
            .collect()
    } else {
        starts
    };

    let mut level: HashMap<NodeIndex, usize> = HashMap::new();
    for &s in &starts {
        level.insert(s, 0);
    }

    let mut back_edges: HashSet<(NodeIndex, NodeIndex)> = HashSet::new();
    {
        // Detect back-edges via a DFS visited+stack set from each start,
        // so cycles don't prevent level relaxation from terminating.
        let mut visited: HashSet<NodeIndex> = HashSet::new();
        let mut on_stack: HashSet<NodeIndex> = HashSet::new();
        fn dfs_mark(
            graph: &DiGraph<String, ()>,
            u: NodeIndex,
            visited: &mut HashSet<NodeIndex>,
            on_stack: &mut HashSet<NodeIndex>,
            back_edges: &mut HashSet<(NodeIndex, NodeIndex)>,
        ) {
            visited.insert(u);
            on_stack.insert(u);
            for v in graph.neighbors(u) {
                if on_stack.contains(&v) {
                    back_edges.insert((u, v));
                } else if !visited.contains(&v) {
                    dfs_mark(graph, v, visited, on_stack, back_edges);
                }
            }
            on_stack.remove(&u);
        }
        for n in graph.node_indices() {
            if !visited.contains(&n) {
                dfs_mark(&graph, n, &mut visited, &mut on_stack, &mut back_edges);
            }
        }
    }

    // BFS relaxation over forward edges only, in node-insertion order so
    // results are deterministic regardless of petgraph's internal
    // adjacency-list order.
    let mut queue: std::collections::VecDeque<NodeIndex> = starts.iter().copied().collect();
    let mut in_queue: HashSet<NodeIndex> = starts.iter().copied().collect();
    while let Some(u) = queue.pop_front() {
        in_queue.remove(&u);
        let l = *level.get(&u).unwrap_or(&0);
        for v in graph.neighbors(u) {
            if back_edges.contains(&(u, v)) {
                continue;
            }
            let candidate = l + 1;
            let changed = match level.get(&v) {
                Some(&cur) if cur >= candidate => false,
                _ => true,
            };
            if changed {
                level.insert(v, candidate);
                if in_queue.insert(v) {
                    queue.push_back(v);
                }
            }
        }
    }
    // Any node never reached (disconnected from every start) still needs a
    // level so it can be placed; pin it to 0.
    for n in graph.node_indices() {
        level.entry(n).or_insert(0);
    }

    // Partition into levels, preserving first-encountered order — which is
    // node-index order here, since node indices are assigned in the
    // caller's `nodes` order.
    let max_level = level.values().copied().max().unwrap_or(0);
    let mut by_level: Vec<Vec<NodeIndex>> = vec![Vec::new(); max_level + 1];
    for n in graph.node_indices() {
        by_level[level[&n]].push(n);
    }

    // ── Phase 3: vertical placement ──
    let dims: HashMap<NodeIndex, (f64, f64)> = nodes
        .iter()
        .enumerate()
        .map(|(i, n)| (NodeIndex::new(i), n.kind.dimensions()))
        .collect();

    let max_level_height = by_level
        .iter()
        .map(|lvl| {
            let count = lvl.len() as f64;
            if count == 0.0 {
                0.0
            } else {
                (count - 1.0) * config.vertical
            }
        })
        .fold(0.0_f64, f64::max);
    let baseline = config.margin_top + max_level_height / 2.0;

    let mut y: HashMap<NodeIndex, f64> = HashMap::new();
    for lvl in &by_level {
        let n = lvl.len();
        if n == 0 {
            continue;
        }
        let mid = (n - 1) as f64 / 2.0;
        for (i, &node) in lvl.iter().enumerate() {
            let offset = (i as f64 - mid) * config.vertical;
            y.insert(node, baseline + offset);
        }
    }

    // ── Phase 4: gateway branch adjustment ──
    for (i, node) in nodes.iter().enumerate() {
        if node.kind != ShapeKind::Gateway {
            continue;
        }
        let gidx = NodeIndex::new(i);
        let gateway_level = level[&gidx];
        let succs: Vec<NodeIndex> = graph
            .edges(gidx)
            .filter(|e| !back_edges.contains(&(e.source(), e.target())))
            .map(|e| e.target())
            .collect();
        if succs.len() < 2 {
            continue;
        }
        // Only successors that sit exactly one level past the gateway are
        // eligible for redistribution — a successor pulled further right
        // by another predecessor keeps its phase-3 placement.
        let eligible: Vec<NodeIndex> = succs
            .iter()
            .copied()
            .filter(|&s| level[&s] == gateway_level + 1)
            .collect();
        if eligible.is_empty() {
            continue;
        }
        let gy = y[&gidx];
        let mid = (eligible.len() - 1) as f64 / 2.0;
        for (i, &s) in eligible.iter().enumerate() {
            let offset = (i as f64 - mid) * config.gateway_branch_spacing;
            y.insert(s, gy + offset);
        }
    }

    // ── Phase 5: x-coordinates + edge routing ──
    let mut positions: HashMap<String, Rect> = HashMap::new();
    for (i, node) in nodes.iter().enumerate() {
        let nx = NodeIndex::new(i);
        let (w, h) = dims[&nx];
        let x = config.margin_left + level[&nx] as f64 * config.level_spacing;
        positions.insert(
            node.id.clone(),
            Rect {
                x,
                y: y.get(&nx).copied().unwrap_or(baseline) - h / 2.0,
                width: w,
                height: h,
            },
        );
    }

    let mut edge_waypoints: HashMap<String, Vec<Waypoint>> = HashMap::new();
    for e in edges {
        let (Some(src_rect), Some(dst_rect)) =
            (positions.get(&e.source_id), positions.get(&e.target_id))
        else {
            continue;
        };
        edge_waypoints.insert(e.flow_id.clone(), route_edge(src_rect, dst_rect));
    }

    Layout {
        positions,
        edges: edge_waypoints,
    }
}

/// The Phase 5 per-edge routing rule, factored out so callers that need to
/// re-route a single edge after moving a rect (the emitter's synthetic
/// validation-subgraph placement) don't have to duplicate it: waypoints
/// anchored at `src`'s right-edge midpoint and `dst`'s left-edge midpoint,
/// straight if they're nearly level, an orthogonal Z otherwise.
pub fn route_edge(src: &Rect, dst: &Rect) -> Vec<Waypoint> {
    let (xu, yu) = src.right_mid();
    let (xv, yv) = dst.left_mid();
    if (yu - yv).abs() < 10.0 {
        vec![Waypoint { x: xu, y: yu }, Waypoint { x: xv, y: yv }]
    } else {
        let x_mid = (xu + xv) / 2.0;
        vec![
            Waypoint { x: xu, y: yu },
            Waypoint { x: x_mid, y: yu },
            Waypoint { x: x_mid, y: yv },
            Waypoint { x: xv, y: yv },
        ]
    }
}

/// A `ShapeKind::Event` node counts as a source (start) event for level
/// seeding only when it has no declared predecessor among `edges` — the
/// layout engine sees the emitter's expanded edge list, not the AST, so it
/// cannot call `Element::is_start` directly.
fn is_source_event(node: &LayoutNode, edges: &[LayoutEdge]) -> bool {
    !edges.iter().any(|e| e.target_id == node.id)
}
