// SPDX-License-Identifier: MIT

//! Graph construction and validation

use super::executor::{CompiledGraph, Edge, ErasedRouter, Routed};
use super::types::{Node, RouteDecision, RouteLabel, Target};
use crate::adk::error::GraphError;
use crate::nowwhat::workflow::state::GraphState;
use std::collections::{HashMap, HashSet};
use std::marker::PhantomData;
use std::sync::Arc;

/// Default ceiling on total step executions per run
pub const DEFAULT_MAX_STEPS: usize = 100;

/// Builder for [`CompiledGraph`].
///
/// Mistakes are collected while building and reported by [`compile`],
/// so a graph that compiles has an entry node, exactly one outgoing
/// edge per node, only known successors, and a successor for every
/// routing label.
///
/// [`compile`]: GraphBuilder::compile
pub struct GraphBuilder<S: GraphState> {
    name: String,
    entry: Option<String>,
    nodes: Vec<(String, Arc<dyn Node<S>>)>,
    edges: Vec<(String, Edge<S>)>,
    max_steps: usize,
    errors: Vec<GraphError>,
}

impl<S: GraphState> GraphBuilder<S> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entry: None,
            nodes: Vec::new(),
            edges: Vec::new(),
            max_steps: DEFAULT_MAX_STEPS,
            errors: Vec::new(),
        }
    }

    pub fn add_node(mut self, name: impl Into<String>, node: impl Node<S> + 'static) -> Self {
        self.nodes.push((name.into(), Arc::new(node)));
        self
    }

    pub fn set_entry(mut self, name: impl Into<String>) -> Self {
        self.entry = Some(name.into());
        self
    }

    /// Unconditional edge
    pub fn add_edge(mut self, from: impl Into<String>, to: Target) -> Self {
        self.edges.push((from.into(), Edge::Direct(to)));
        self
    }

    /// Edge chosen by `predicate`, evaluated on the post-merge state
    pub fn add_conditional_edges<L, P>(
        mut self,
        from: impl Into<String>,
        predicate: P,
        successors: impl IntoIterator<Item = (L, Target)>,
    ) -> Self
    where
        L: RouteLabel,
        P: Fn(&S) -> RouteDecision<L> + Send + Sync + 'static,
    {
        let from = from.into();
        let successors: HashMap<L, Target> = successors.into_iter().collect();

        for label in L::ALL {
            if !successors.contains_key(label) {
                self.errors.push(GraphError::UnmappedRoute {
                    node: from.clone(),
                    label: label.as_str().to_string(),
                });
            }
        }

        let router = TypedRouter {
            node: from.clone(),
            predicate,
            successors,
            _state: PhantomData,
        };
        self.edges
            .push((from, Edge::Conditional(Box::new(router))));
        self
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Validate and freeze the graph
    pub fn compile(mut self) -> Result<CompiledGraph<S>, GraphError> {
        if let Some(err) = self.errors.drain(..).next() {
            return Err(err);
        }

        let mut nodes: HashMap<String, Arc<dyn Node<S>>> = HashMap::new();
        for (name, node) in self.nodes {
            if nodes.insert(name.clone(), node).is_some() {
                return Err(GraphError::DuplicateNode(name));
            }
        }

        let entry = match self.entry {
            Some(entry) if nodes.contains_key(&entry) => entry,
            _ => return Err(GraphError::MissingEntry { graph: self.name }),
        };

        let mut edges: HashMap<String, Edge<S>> = HashMap::new();
        for (from, edge) in self.edges {
            if !nodes.contains_key(&from) {
                return Err(GraphError::UnknownSource(from));
            }
            for target in edge.successors() {
                if let Target::Node(to) = &target {
                    if !nodes.contains_key(to) {
                        return Err(GraphError::UnknownNode {
                            from: from.clone(),
                            to: to.clone(),
                        });
                    }
                }
            }
            if edges.contains_key(&from) {
                return Err(GraphError::DuplicateEdge(from));
            }
            edges.insert(from, edge);
        }

        let mut missing: Vec<&String> = nodes.keys().filter(|n| !edges.contains_key(*n)).collect();
        missing.sort();
        if let Some(name) = missing.first() {
            return Err(GraphError::MissingEdge((*name).clone()));
        }

        let reachable = reachable_from(&entry, &edges);
        for name in nodes.keys().filter(|n| !reachable.contains(*n)) {
            log::warn!("Graph {}: node '{}' is unreachable", self.name, name);
        }

        Ok(CompiledGraph::new(
            self.name,
            entry,
            nodes,
            edges,
            self.max_steps,
        ))
    }
}

fn reachable_from<S>(entry: &str, edges: &HashMap<String, Edge<S>>) -> HashSet<String> {
    let mut seen = HashSet::new();
    let mut stack = vec![entry.to_string()];
    while let Some(name) = stack.pop() {
        if !seen.insert(name.clone()) {
            continue;
        }
        if let Some(edge) = edges.get(&name) {
            for target in edge.successors() {
                if let Target::Node(next) = target {
                    stack.push(next);
                }
            }
        }
    }
    seen
}

/// Routing predicate bound to its successor map
struct TypedRouter<S, L, P> {
    node: String,
    predicate: P,
    successors: HashMap<L, Target>,
    _state: PhantomData<fn(&S)>,
}

impl<S, L, P> ErasedRouter<S> for TypedRouter<S, L, P>
where
    S: GraphState,
    L: RouteLabel,
    P: Fn(&S) -> RouteDecision<L> + Send + Sync,
{
    fn route(&self, state: &S) -> Result<Routed, GraphError> {
        let decision = (self.predicate)(state);
        let target = self
            .successors
            .get(&decision.label)
            .cloned()
            .ok_or_else(|| GraphError::UnknownRoute {
                node: self.node.clone(),
                label: decision.label.as_str().to_string(),
            })?;

        Ok(Routed {
            label: decision.label.as_str(),
            target,
            forced: decision.forced,
        })
    }

    fn successors(&self) -> Vec<Target> {
        self.successors.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adk::error::NowWhatError;
    use crate::nowwhat::workflow::graph::types::{FnNode, NodeOutput};
    use crate::nowwhat::workflow::state::StepRecord;

    #[derive(Default)]
    struct Counter {
        value: u32,
        steps: Vec<StepRecord>,
    }

    impl GraphState for Counter {
        type Update = u32;

        fn merge(&mut self, update: u32) {
            self.value += update;
        }

        fn steps(&self) -> &[StepRecord] {
            &self.steps
        }

        fn steps_mut(&mut self) -> &mut Vec<StepRecord> {
            &mut self.steps
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum Branch {
        Left,
        Right,
    }

    impl RouteLabel for Branch {
        const ALL: &'static [Self] = &[Branch::Left, Branch::Right];

        fn as_str(&self) -> &'static str {
            match self {
                Branch::Left => "left",
                Branch::Right => "right",
            }
        }
    }

    fn add_one(_: &Counter) -> Result<NodeOutput<u32>, NowWhatError> {
        Ok(NodeOutput::new(1))
    }

    fn inc() -> FnNode<fn(&Counter) -> Result<NodeOutput<u32>, NowWhatError>> {
        FnNode(add_one)
    }

    #[test]
    fn test_compile_valid_graph() {
        let graph = GraphBuilder::<Counter>::new("ok")
            .add_node("a", inc())
            .add_node("b", inc())
            .set_entry("a")
            .add_edge("a", Target::node("b"))
            .add_edge("b", Target::End)
            .compile();
        assert!(graph.is_ok());
    }

    #[test]
    fn test_missing_entry() {
        let err = GraphBuilder::<Counter>::new("g")
            .add_node("a", inc())
            .add_edge("a", Target::End)
            .compile()
            .err()
            .unwrap();
        assert_eq!(
            err,
            GraphError::MissingEntry {
                graph: "g".to_string()
            }
        );

        let err = GraphBuilder::<Counter>::new("g")
            .add_node("a", inc())
            .set_entry("nope")
            .add_edge("a", Target::End)
            .compile()
            .err()
            .unwrap();
        assert!(matches!(err, GraphError::MissingEntry { .. }));
    }

    #[test]
    fn test_unknown_successor() {
        let err = GraphBuilder::<Counter>::new("g")
            .add_node("a", inc())
            .set_entry("a")
            .add_edge("a", Target::node("ghost"))
            .compile()
            .err()
            .unwrap();
        assert_eq!(
            err,
            GraphError::UnknownNode {
                from: "a".to_string(),
                to: "ghost".to_string()
            }
        );
    }

    #[test]
    fn test_unknown_edge_source() {
        let err = GraphBuilder::<Counter>::new("g")
            .add_node("a", inc())
            .set_entry("a")
            .add_edge("a", Target::End)
            .add_edge("ghost", Target::End)
            .compile()
            .err()
            .unwrap();
        assert_eq!(err, GraphError::UnknownSource("ghost".to_string()));
    }

    #[test]
    fn test_missing_and_duplicate_edges() {
        let err = GraphBuilder::<Counter>::new("g")
            .add_node("a", inc())
            .add_node("b", inc())
            .set_entry("a")
            .add_edge("a", Target::node("b"))
            .compile()
            .err()
            .unwrap();
        assert_eq!(err, GraphError::MissingEdge("b".to_string()));

        let err = GraphBuilder::<Counter>::new("g")
            .add_node("a", inc())
            .set_entry("a")
            .add_edge("a", Target::End)
            .add_edge("a", Target::End)
            .compile()
            .err()
            .unwrap();
        assert_eq!(err, GraphError::DuplicateEdge("a".to_string()));
    }

    #[test]
    fn test_duplicate_node() {
        let err = GraphBuilder::<Counter>::new("g")
            .add_node("a", inc())
            .add_node("a", inc())
            .set_entry("a")
            .add_edge("a", Target::End)
            .compile()
            .err()
            .unwrap();
        assert_eq!(err, GraphError::DuplicateNode("a".to_string()));
    }

    #[test]
    fn test_every_route_label_needs_a_successor() {
        let err = GraphBuilder::<Counter>::new("g")
            .add_node("a", inc())
            .set_entry("a")
            .add_conditional_edges(
                "a",
                |_: &Counter| RouteDecision::domain(Branch::Left),
                [(Branch::Left, Target::End)],
            )
            .compile()
            .err()
            .unwrap();
        assert_eq!(
            err,
            GraphError::UnmappedRoute {
                node: "a".to_string(),
                label: "right".to_string()
            }
        );
    }
}
