//! The typed in-memory representation produced by the parser.
//!
//! Nodes are constructed exclusively by the parser and treated as immutable
//! by everything downstream. Lookups by id use a side table built once at
//! construction time rather than a per-node search.

use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::HashMap;

/// A single `{source, target}` variable mapping, as used by ScriptCall and
/// ServiceTask i/o.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mapping {
    pub source: String,
    pub target: String,
}

/// One process element. Every variant carries a unique `id` and a display
/// `name`.
#[derive(Debug, Clone, PartialEq)]
pub enum Element {
    Start {
        id: String,
        name: String,
    },
    End {
        id: String,
        name: String,
    },
    ScriptCall {
        id: String,
        name: String,
        script: String,
        input_mappings: Vec<Mapping>,
        output_mappings: Vec<Mapping>,
        result_variable: String,
        /// Legacy convenience attributes, kept separate from
        /// `input_mappings`/`output_mappings` rather than merged in, so the
        /// validator can reject the two forms being authored together.
        legacy_input_vars: Option<Vec<String>>,
        legacy_output_vars: Option<Vec<String>>,
    },
    ServiceTask {
        id: String,
        name: String,
        task_type: String,
        retries: u32,
        headers: Vec<(String, String)>,
        input_mappings: Vec<Mapping>,
        output_mappings: Vec<Mapping>,
        result_variable: String,
        legacy_input_vars: Option<Vec<String>>,
        legacy_output_vars: Option<Vec<String>>,
    },
    ProcessEntity {
        id: String,
        name: String,
        entity_name: String,
    },
    XorGateway {
        id: String,
        name: String,
        default_condition: Option<String>,
    },
}

impl Element {
    pub fn id(&self) -> &str {
        match self {
            Element::Start { id, .. }
            | Element::End { id, .. }
            | Element::ScriptCall { id, .. }
            | Element::ServiceTask { id, .. }
            | Element::ProcessEntity { id, .. }
            | Element::XorGateway { id, .. } => id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Element::Start { name, .. }
            | Element::End { name, .. }
            | Element::ScriptCall { name, .. }
            | Element::ServiceTask { name, .. }
            | Element::ProcessEntity { name, .. }
            | Element::XorGateway { name, .. } => name,
        }
    }

    pub fn is_start(&self) -> bool {
        matches!(self, Element::Start { .. })
    }

    pub fn is_end(&self) -> bool {
        matches!(self, Element::End { .. })
    }

    pub fn is_gateway(&self) -> bool {
        matches!(self, Element::XorGateway { .. })
    }

    /// True when legacy `input_vars`/`output_vars` were authored alongside
    /// non-empty `input_mappings`/`output_mappings` on the same element —
    /// the engine-compatibility lint the validator rejects (not merged).
    pub fn has_legacy_mapping_conflict(&self) -> bool {
        match self {
            Element::ScriptCall {
                input_mappings,
                output_mappings,
                legacy_input_vars,
                legacy_output_vars,
                ..
            }
            | Element::ServiceTask {
                input_mappings,
                output_mappings,
                legacy_input_vars,
                legacy_output_vars,
                ..
            } => {
                (legacy_input_vars.is_some() && !input_mappings.is_empty())
                    || (legacy_output_vars.is_some() && !output_mappings.is_empty())
            }
            _ => false,
        }
    }

    /// The mappings actually used at emission time: explicit mappings if
    /// any were authored, otherwise the legacy vars desugared into identity
    /// mappings (`name -> name`).
    pub fn effective_input_mappings(&self) -> Vec<Mapping> {
        match self {
            Element::ScriptCall {
                input_mappings,
                legacy_input_vars,
                ..
            }
            | Element::ServiceTask {
                input_mappings,
                legacy_input_vars,
                ..
            } => {
                if !input_mappings.is_empty() {
                    input_mappings.clone()
                } else if let Some(vars) = legacy_input_vars {
                    vars.iter()
                        .map(|v| Mapping {
                            source: v.clone(),
                            target: v.clone(),
                        })
                        .collect()
                } else {
                    Vec::new()
                }
            }
            _ => Vec::new(),
        }
    }

    pub fn effective_output_mappings(&self) -> Vec<Mapping> {
        match self {
            Element::ScriptCall {
                output_mappings,
                legacy_output_vars,
                ..
            }
            | Element::ServiceTask {
                output_mappings,
                legacy_output_vars,
                ..
            } => {
                if !output_mappings.is_empty() {
                    output_mappings.clone()
                } else if let Some(vars) = legacy_output_vars {
                    vars.iter()
                        .map(|v| Mapping {
                            source: v.clone(),
                            target: v.clone(),
                        })
                        .collect()
                } else {
                    Vec::new()
                }
            }
            _ => Vec::new(),
        }
    }
}

/// A directed edge from `source_id` to `target_id`.
#[derive(Debug, Clone, PartialEq)]
pub struct Flow {
    pub source_id: String,
    pub target_id: String,
    pub condition: Option<String>,
}

/// The root AST value. Owns an ordered element list and flow list in author
/// order; order is preserved end to end so every downstream pass is
/// deterministic.
#[derive(Debug, Clone)]
pub struct Process {
    pub name: String,
    pub id: String,
    pub version: Option<String>,
    elements: Vec<Element>,
    flows: Vec<Flow>,
    index: HashMap<String, usize>,
    graph: DiGraph<(), ()>,
    graph_index: HashMap<String, NodeIndex>,
}

impl Process {
    /// Build a `Process` from parsed parts. Flows whose endpoints do not
    /// resolve to a known element id are kept in `flows` (so the validator
    /// can report the dangling reference) but do not produce a graph edge.
    pub fn from_parts(
        name: String,
        id: String,
        version: Option<String>,
        elements: Vec<Element>,
        flows: Vec<Flow>,
    ) -> Self {
        let mut index = HashMap::with_capacity(elements.len());
        let mut graph = DiGraph::new();
        let mut graph_index = HashMap::with_capacity(elements.len());

        for (i, el) in elements.iter().enumerate() {
            index.insert(el.id().to_string(), i);
            let nx = graph.add_node(());
            graph_index.insert(el.id().to_string(), nx);
        }

        for flow in &flows {
            if let (Some(&src), Some(&dst)) = (
                graph_index.get(&flow.source_id),
                graph_index.get(&flow.target_id),
            ) {
                graph.add_edge(src, dst, ());
            }
        }

        Process {
            name,
            id,
            version,
            elements,
            flows,
            index,
            graph,
            graph_index,
        }
    }

    pub fn elements(&self) -> &[Element] {
        &self.elements
    }

    pub fn flows(&self) -> &[Flow] {
        &self.flows
    }

    pub fn element(&self, id: &str) -> Option<&Element> {
        self.index.get(id).map(|&i| &self.elements[i])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Ids of elements with an edge from `id`, in flow-declaration order.
    pub fn successors(&self, id: &str) -> Vec<&str> {
        let Some(&nx) = self.graph_index.get(id) else {
            return Vec::new();
        };
        self.graph
            .neighbors(nx)
            .map(|n| self.id_of(n))
            .collect::<Vec<_>>()
            .into_iter()
            .rev() // petgraph yields neighbors in reverse insertion order
            .collect()
    }

    /// Ids of elements with an edge into `id`, in flow-declaration order.
    pub fn predecessors(&self, id: &str) -> Vec<&str> {
        let Some(&nx) = self.graph_index.get(id) else {
            return Vec::new();
        };
        self.graph
            .neighbors_directed(nx, petgraph::Direction::Incoming)
            .map(|n| self.id_of(n))
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect()
    }

    pub fn in_degree(&self, id: &str) -> usize {
        self.predecessors(id).len()
    }

    pub fn out_degree(&self, id: &str) -> usize {
        self.successors(id).len()
    }

    /// Number of weakly-connected components over the elements reachable
    /// through resolved flow edges. Elements with no resolved edges at all
    /// count as their own component.
    pub fn connected_components(&self) -> usize {
        petgraph::algo::connected_components(&self.graph)
    }

    /// Node indices are assigned in the same order as `elements`, so the
    /// index doubles as the element-table offset.
    fn id_of(&self, nx: NodeIndex) -> &str {
        self.elements[nx.index()].id()
    }
}
