//! A run's task forest and the ordering rules the scheduler relies on.
//!
//! The ordered view is a pre-order traversal: each node is followed by its
//! children in ascending sibling order, recursively, starting from the roots
//! in sibling order. Flattening the tree this way turns "what runs next" into
//! a linear scan for the first `Waiting` node.

use super::{NodeId, PipelineRunTask, RunId, SiblingOrder, TaskStatus, TaskTreeDomainError};
use crate::registry::TaskDefinitionId;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Identifies the node that prevents scheduling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockingTask {
    /// Blocking node.
    pub node_id: NodeId,
    /// Run the node belongs to.
    pub run_id: RunId,
    /// Registered task the node executes.
    pub definition_id: TaskDefinitionId,
    /// Status that blocks scheduling.
    pub status: TaskStatus,
    /// One-based position in the ordered view.
    pub position: usize,
}

impl fmt::Display for BlockingTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "node {} (task {}, {}) at position {} of run {}",
            self.node_id, self.definition_id, self.status, self.position, self.run_id
        )
    }
}

/// A node with its place in the ordered view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderedTask {
    /// One-based position in the pre-order traversal.
    pub position: usize,
    /// Distance from the root (roots have depth 0).
    pub depth: usize,
    /// The node itself.
    #[serde(flatten)]
    pub node: PipelineRunTask,
}

/// All nodes of one run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunTaskTree {
    run_id: RunId,
    nodes: Vec<PipelineRunTask>,
}

impl RunTaskTree {
    /// Builds the tree for `run_id`, ignoring nodes of other runs.
    #[must_use]
    pub fn new(run_id: RunId, nodes: impl IntoIterator<Item = PipelineRunTask>) -> Self {
        Self {
            run_id,
            nodes: nodes
                .into_iter()
                .filter(|node| node.run_id() == run_id)
                .collect(),
        }
    }

    /// Returns the run identifier.
    #[must_use]
    pub const fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Returns whether the run has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns the number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns the nodes in storage order.
    #[must_use]
    pub fn nodes(&self) -> &[PipelineRunTask] {
        &self.nodes
    }

    /// Finds a node by identifier.
    #[must_use]
    pub fn find(&self, node_id: NodeId) -> Option<&PipelineRunTask> {
        self.nodes.iter().find(|node| node.id() == node_id)
    }

    /// Returns the pre-order traversal with one-based positions.
    ///
    /// Nodes whose parent is missing from the run are treated as roots so
    /// that they stay visible.
    #[must_use]
    pub fn ordered(&self) -> Vec<OrderedTask> {
        let index = self.children_index();
        let mut stack: Vec<(&PipelineRunTask, usize)> = index
            .roots
            .iter()
            .rev()
            .map(|node| (*node, 0))
            .collect();
        let mut ordered = Vec::with_capacity(self.nodes.len());

        while let Some((node, depth)) = stack.pop() {
            ordered.push(OrderedTask {
                position: ordered.len() + 1,
                depth,
                node: node.clone(),
            });
            if let Some(children) = index.children.get(&node.id()) {
                stack.extend(children.iter().rev().map(|child| (*child, depth + 1)));
            }
        }
        ordered
    }

    /// Returns the children of `parent` in sibling order.
    #[must_use]
    pub fn children_of(&self, parent: NodeId) -> Vec<&PipelineRunTask> {
        self.children_index()
            .children
            .remove(&parent)
            .unwrap_or_default()
    }

    /// Returns every descendant of `node_id`, deepest first.
    #[must_use]
    pub fn descendants_of(&self, node_id: NodeId) -> Vec<NodeId> {
        let index = self.children_index();
        let mut pending = vec![node_id];
        let mut visited = HashSet::from([node_id]);
        let mut found = Vec::new();
        while let Some(current) = pending.pop() {
            for child in index.children.get(&current).into_iter().flatten() {
                if visited.insert(child.id()) {
                    found.push(child.id());
                    pending.push(child.id());
                }
            }
        }
        found.reverse();
        found
    }

    /// Returns the sibling order for a new child of `parent`: one past the
    /// largest existing order, or 1 when the parent has no children.
    ///
    /// # Errors
    ///
    /// Returns [`TaskTreeDomainError::InvalidSiblingOrder`] on overflow.
    pub fn next_sibling_order(&self, parent: NodeId) -> Result<SiblingOrder, TaskTreeDomainError> {
        self.nodes
            .iter()
            .filter(|node| node.parent_id() == Some(parent))
            .map(PipelineRunTask::sibling_order)
            .max()
            .map_or(Ok(SiblingOrder::FIRST), SiblingOrder::next)
    }

    /// Returns the first scheduled or running node, if any.
    #[must_use]
    pub fn active_task(&self) -> Option<BlockingTask> {
        self.first_blocking(TaskStatus::is_active)
    }

    /// Returns the first failed node, if any.
    #[must_use]
    pub fn failed_task(&self) -> Option<BlockingTask> {
        self.first_blocking(|status| status == TaskStatus::Failed)
    }

    /// Fails when any node is scheduled or running.
    ///
    /// # Errors
    ///
    /// Returns [`TaskTreeDomainError::TaskActive`] naming the active node.
    pub fn ensure_idle(&self) -> Result<(), TaskTreeDomainError> {
        self.active_task()
            .map_or(Ok(()), |task| Err(TaskTreeDomainError::TaskActive(task)))
    }

    /// Returns the first `Waiting` node in the ordered view.
    ///
    /// # Errors
    ///
    /// Returns [`TaskTreeDomainError::TaskActive`] when a node is scheduled
    /// or running, and [`TaskTreeDomainError::TaskFailed`] when a node has
    /// failed.
    pub fn next_runnable(&self) -> Result<Option<PipelineRunTask>, TaskTreeDomainError> {
        self.ensure_idle()?;
        if let Some(task) = self.failed_task() {
            return Err(TaskTreeDomainError::TaskFailed(task));
        }
        Ok(self
            .ordered()
            .into_iter()
            .find(|entry| entry.node.status() == TaskStatus::Waiting)
            .map(|entry| entry.node))
    }

    fn first_blocking(&self, predicate: impl Fn(TaskStatus) -> bool) -> Option<BlockingTask> {
        if !self.nodes.iter().any(|node| predicate(node.status())) {
            return None;
        }
        self.ordered()
            .into_iter()
            .find(|entry| predicate(entry.node.status()))
            .map(|entry| BlockingTask {
                node_id: entry.node.id(),
                run_id: self.run_id,
                definition_id: entry.node.definition_id(),
                status: entry.node.status(),
                position: entry.position,
            })
    }

    fn children_index(&self) -> ChildrenIndex<'_> {
        let known: HashSet<NodeId> = self.nodes.iter().map(PipelineRunTask::id).collect();
        let mut roots = Vec::new();
        let mut children: HashMap<NodeId, Vec<&PipelineRunTask>> = HashMap::new();
        for node in &self.nodes {
            match node.parent_id() {
                Some(parent) if known.contains(&parent) => {
                    children.entry(parent).or_default().push(node);
                }
                _ => roots.push(node),
            }
        }
        roots.sort_by_key(|node| (node.sibling_order(), node.id()));
        for siblings in children.values_mut() {
            siblings.sort_by_key(|node| (node.sibling_order(), node.id()));
        }
        ChildrenIndex { roots, children }
    }
}

struct ChildrenIndex<'a> {
    roots: Vec<&'a PipelineRunTask>,
    children: HashMap<NodeId, Vec<&'a PipelineRunTask>>,
}
