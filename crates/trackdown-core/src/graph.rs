//! Dependency graph over ticket ids
//!
//! Edges point from a dependent ticket to the ticket it depends on. The graph
//! is assembled from three per-ticket lists: `dependencies` and `blocked_by`
//! (outgoing) and `blocks` (incoming). Cycles are allowed and reported.

use std::collections::{BTreeSet, HashMap};

use petgraph::algo::{is_cyclic_directed, kosaraju_scc};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;

use crate::Ticket;

/// Ticket dependency graph
pub struct DependencyGraph {
    graph: DiGraph<String, ()>,
    node_map: HashMap<String, NodeIndex>,
    missing: HashMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    /// Build a graph from a list of tickets
    pub fn from_tickets<'a, I>(tickets: I) -> Self
    where
        I: IntoIterator<Item = &'a Ticket>,
    {
        let tickets: Vec<&Ticket> = tickets.into_iter().collect();
        let mut graph = DiGraph::new();
        let mut node_map = HashMap::new();
        let mut missing: HashMap<String, BTreeSet<String>> = HashMap::new();

        for ticket in &tickets {
            let idx = graph.add_node(ticket.id.clone());
            node_map.insert(ticket.id.clone(), idx);
        }

        for ticket in &tickets {
            let from = node_map[&ticket.id];
            let outgoing = ticket.dependencies.iter().chain(&ticket.blocked_by);
            for dep in outgoing {
                match node_map.get(dep) {
                    Some(&to) => {
                        graph.update_edge(from, to, ());
                    }
                    None => {
                        missing.entry(ticket.id.clone()).or_default().insert(dep.clone());
                    }
                }
            }
            for blocked in &ticket.blocks {
                match node_map.get(blocked) {
                    Some(&dependent) => {
                        graph.update_edge(dependent, from, ());
                    }
                    None => {
                        missing.entry(ticket.id.clone()).or_default().insert(blocked.clone());
                    }
                }
            }
        }

        Self {
            graph,
            node_map,
            missing,
        }
    }

    fn neighbors(&self, id: &str, direction: Direction) -> Vec<String> {
        let Some(&idx) = self.node_map.get(id) else {
            return Vec::new();
        };
        let mut ids: Vec<String> = self
            .graph
            .neighbors_directed(idx, direction)
            .map(|n| self.graph[n].clone())
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }

    /// Tickets `id` depends on
    pub fn dependencies_of(&self, id: &str) -> Vec<String> {
        self.neighbors(id, Direction::Outgoing)
    }

    /// Tickets depending on `id`
    pub fn dependents_of(&self, id: &str) -> Vec<String> {
        self.neighbors(id, Direction::Incoming)
    }

    /// Referenced ids that match no ticket, for `id`'s own lists
    pub fn missing_for(&self, id: &str) -> Vec<String> {
        self.missing
            .get(id)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Check if the graph has cycles
    pub fn has_cycles(&self) -> bool {
        is_cyclic_directed(&self.graph)
    }

    /// Get all cycles in the graph (ticket ids per strongly connected component)
    pub fn find_cycles(&self) -> Vec<Vec<String>> {
        let mut cycles: Vec<Vec<String>> = kosaraju_scc(&self.graph)
            .into_iter()
            .filter(|scc| scc.len() > 1 || self.has_self_loop(&scc[0]))
            .map(|scc| {
                let mut ids: Vec<String> =
                    scc.into_iter().map(|idx| self.graph[idx].clone()).collect();
                ids.sort();
                ids
            })
            .collect();
        cycles.sort();
        cycles
    }

    fn has_self_loop(&self, node: &NodeIndex) -> bool {
        self.graph.edges(*node).any(|e| e.target() == *node)
    }
}
