use crate::simulation::{Action, NodeState};
use crate::tree::node::NodeRef;
use colored::Colorize;
use petgraph::dot::Dot;
use petgraph::prelude::*;
use std::fmt::{Debug, Formatter, Write};

/// What a projection keeps of a node.
#[derive(Clone, Copy, PartialEq)]
pub struct NodeSummary {
    pub depth: u32,
    pub failed: bool,
    pub fully_explored: bool,
    pub locked: bool,
    pub untried: usize,
    pub visits: u64,
    pub value: f32,
}

impl NodeSummary {
    fn of<A: Action, S: NodeState>(node: &NodeRef<A, S>) -> Self {
        NodeSummary {
            depth: node.tree_depth(),
            failed: node.is_failed(),
            fully_explored: node.is_fully_explored(),
            locked: node.is_locked(),
            untried: node.untried_action_count(),
            visits: node.visit_count(),
            value: node.value(),
        }
    }

    fn flags(&self) -> String {
        let mut flags = String::new();
        if self.failed {
            flags.push('X');
        }
        if self.fully_explored {
            flags.push('E');
        }
        if self.locked {
            flags.push('L');
        }
        flags
    }
}

// Compact, as this is what ends up in dot labels.
impl Debug for NodeSummary {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "d{} n{} v{:.2} u{} {}",
            self.depth,
            self.visits,
            self.value,
            self.untried,
            self.flags()
        )
    }
}

/// A snapshot of part of the tree as a petgraph graph, edges labelled with actions.
pub struct TreeView<A> {
    pub graph: Graph<NodeSummary, A>,
    pub root: NodeIndex,
}

impl<A: Action> TreeView<A> {
    /// Captures `root` and its linked descendants down to `max_depth` levels below it.
    pub fn capture<S: NodeState>(root: &NodeRef<A, S>, max_depth: Option<u32>) -> Self {
        let mut graph = Graph::new();
        let root_index = graph.add_node(NodeSummary::of(root));
        let limit = max_depth.map(|d| root.tree_depth() + d);
        let mut stack = vec![(root.clone(), root_index)];
        while let Some((node, index)) = stack.pop() {
            if limit.map_or(false, |l| node.tree_depth() >= l) {
                continue;
            }
            for child in node.children() {
                let child_index = graph.add_node(NodeSummary::of(&child));
                if let Ok(a) = child.action() {
                    graph.add_edge(index, child_index, a.clone());
                }
                stack.push((child, child_index));
            }
        }
        TreeView {
            graph,
            root: root_index,
        }
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn leaf_count(&self) -> usize {
        self.graph
            .node_indices()
            .filter(|n| self.graph.edges(*n).next().is_none())
            .count()
    }

    pub fn to_dot(&self) -> String {
        format!("{:?}", Dot::new(&self.graph))
    }
}

/// Indented, coloured text rendering for terminals. Failed nodes are red, fully explored ones
/// green and locked ones yellow.
pub fn render_tree<A: Action, S: NodeState>(root: &NodeRef<A, S>, max_depth: u32) -> String {
    let mut out = String::new();
    let limit = root.tree_depth() + max_depth;
    let mut stack = vec![root.clone()];
    while let Some(node) = stack.pop() {
        let summary = NodeSummary::of(&node);
        let label = match node.action() {
            Ok(a) => format!("{:?} {:?}", a, summary),
            Err(_) => format!("root {:?}", summary),
        };
        let label = if summary.failed {
            label.red()
        } else if summary.fully_explored {
            label.green()
        } else if summary.locked {
            label.yellow()
        } else {
            label.normal()
        };
        let indent = (node.tree_depth() - root.tree_depth()) as usize;
        let _ = writeln!(out, "{}{}", "|-".repeat(indent), label);
        if node.tree_depth() < limit {
            stack.extend(node.children().into_iter().rev());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::fixtures::Flag;
    use crate::simulation::FixedActions;
    use crate::tree::Node;
    use std::sync::Arc;

    fn sample() -> NodeRef<u8, Flag> {
        let root = Node::new_root(Flag(false), Arc::new(FixedActions::new(vec![0u8, 1])));
        let a = root.add_child_with_state(0, Flag(false)).unwrap();
        root.add_child_with_state(1, Flag(true)).unwrap();
        a.add_child_with_state(1, Flag(false)).unwrap();
        root
    }

    #[test]
    fn capture_respects_depth_limit() {
        let root = sample();
        let full = TreeView::capture(&root, None);
        assert_eq!(full.node_count(), 4);
        assert_eq!(full.leaf_count(), 2);
        let shallow = TreeView::capture(&root, Some(1));
        assert_eq!(shallow.node_count(), 3);
        assert!(full.to_dot().contains("digraph"));
    }

    #[test]
    fn rendering_lists_every_node() {
        colored::control::set_override(false);
        let text = render_tree(&sample(), 5);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("root d0"));
        assert!(lines[1].starts_with("|-0 d1"));
        assert!(lines[2].starts_with("|-|-1 d2"));
        assert!(lines[3].contains('X'));
    }
}
