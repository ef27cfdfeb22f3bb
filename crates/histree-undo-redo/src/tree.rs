//! Branching version history
//!
//! Nodes are states, edges are changesets. Every node except the root has
//! exactly one incoming edge, which owns the changeset leading into it; the
//! parent lists its children in the order they were created. Nodes live in
//! an arena keyed by [`NodeId`] so parent/child links are plain ids.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::changeset::{Changeset, ChangesetSummary};
use crate::error::{Result, UndoRedoError};
use crate::history::History;

/// Stable id of a state node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node-{}", self.0)
    }
}

struct Edge<V> {
    source: NodeId,
    changeset: Changeset<V>,
}

struct StateNode<V> {
    incoming: Option<Edge<V>>,
    branches: Vec<NodeId>,
}

impl<V> StateNode<V> {
    fn root() -> Self {
        Self {
            incoming: None,
            branches: Vec::new(),
        }
    }
}

/// One redo choice out of a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchInfo {
    /// Index to pass to [`VersionTree::redo`]
    pub index: usize,
    /// Node the branch leads to
    pub target: NodeId,
    /// The changeset on the branch
    pub changeset: ChangesetSummary,
}

/// A tree of states connected by changesets, with one current node
pub struct VersionTree<V> {
    nodes: HashMap<NodeId, StateNode<V>>,
    root: NodeId,
    current: NodeId,
    next_id: u64,
}

impl<V> VersionTree<V> {
    /// Create a tree holding only a root node
    pub fn new() -> Self {
        let root = NodeId(0);
        let mut nodes = HashMap::new();
        nodes.insert(root, StateNode::root());
        Self {
            nodes,
            root,
            current: root,
            next_id: 1,
        }
    }

    /// The root node
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// The current node
    pub fn current(&self) -> NodeId {
        self.current
    }

    /// Number of nodes in the tree
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Whether `node` is part of the tree
    pub fn contains(&self, node: NodeId) -> bool {
        self.nodes.contains_key(&node)
    }

    /// Parent of `node`, `None` for the root
    pub fn parent(&self, node: NodeId) -> Result<Option<NodeId>> {
        Ok(self.node(node)?.incoming.as_ref().map(|edge| edge.source))
    }

    /// The changeset leading into `node`
    pub fn incoming_changeset(&self, node: NodeId) -> Result<Option<&Changeset<V>>> {
        Ok(self.node(node)?.incoming.as_ref().map(|edge| &edge.changeset))
    }

    /// Child nodes of `node`, oldest branch first
    pub fn children(&self, node: NodeId) -> Result<&[NodeId]> {
        Ok(&self.node(node)?.branches)
    }

    /// Redo choices out of `node`, oldest branch first
    pub fn branches(&self, node: NodeId) -> Result<Vec<BranchInfo>> {
        let mut branches = Vec::new();
        for (index, target) in self.node(node)?.branches.iter().enumerate() {
            let edge = self.incoming_edge(*target)?;
            branches.push(BranchInfo {
                index,
                target: *target,
                changeset: edge.changeset.summary(),
            });
        }
        Ok(branches)
    }

    /// Nodes from the root down to `node`, both included
    pub fn path_from_root(&self, node: NodeId) -> Result<Vec<NodeId>> {
        let mut path = vec![node];
        let mut cursor = self.node(node)?;
        while let Some(edge) = &cursor.incoming {
            path.push(edge.source);
            cursor = self.node(edge.source)?;
        }
        path.reverse();
        Ok(path)
    }

    /// Add `changeset` as a new branch of the current node and make its
    /// target current. The changeset's changes must already be applied.
    pub fn commit(&mut self, changeset: Changeset<V>) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        let source = self.current;
        info!(node = %id, parent = %source, descriptor = changeset.descriptor(), "Committed changeset");

        self.nodes.insert(
            id,
            StateNode {
                incoming: Some(Edge { source, changeset }),
                branches: Vec::new(),
            },
        );
        if let Some(parent) = self.nodes.get_mut(&source) {
            parent.branches.push(id);
        }
        self.current = id;
        id
    }

    /// Step to the parent without replaying anything
    pub fn undo_virtual(&mut self) -> Result<NodeId> {
        let source = self
            .node(self.current)?
            .incoming
            .as_ref()
            .map(|edge| edge.source)
            .ok_or(UndoRedoError::NoMoreUndos)?;
        self.current = source;
        Ok(source)
    }

    /// Step along a branch without replaying anything
    pub fn redo_virtual(&mut self, branch: Option<usize>) -> Result<NodeId> {
        let target = self.branch_target(branch)?;
        self.current = target;
        Ok(target)
    }

    /// Drop everything after `node`.
    ///
    /// If the current node is below `node` the tree first moves to `node`.
    pub fn clear_branches(&mut self, node: NodeId) -> Result<()>
    where
        V: Clone + PartialEq + fmt::Debug,
    {
        if self.current != node && self.is_ancestor(node, self.current)? {
            self.move_to(node)?;
        }
        let dropped = std::mem::take(&mut self.node_mut(node)?.branches);
        debug!(node = %node, dropped = dropped.len(), "Cleared branches");
        self.collect_unreachable();
        Ok(())
    }

    /// Make `node` the root, discarding everything before it.
    ///
    /// If the current node is not in the subtree of `node` the tree first
    /// moves to `node`.
    pub fn make_root(&mut self, node: NodeId) -> Result<()>
    where
        V: Clone + PartialEq + fmt::Debug,
    {
        if !self.is_ancestor(node, self.current)? {
            self.move_to(node)?;
        }
        let detached = self.node_mut(node)?.incoming.take();
        if let Some(edge) = detached {
            if let Some(parent) = self.nodes.get_mut(&edge.source) {
                parent.branches.retain(|child| *child != node);
            }
        }
        self.root = node;
        info!(node = %node, "Made node the root");
        self.collect_unreachable();
        Ok(())
    }

    /// Keep only the path from the root to `node`: every ancestor loses its
    /// other branches and `node` loses all of its own.
    ///
    /// If the current node is off that path the tree first moves to `node`.
    pub fn prune_to_linear(&mut self, node: NodeId) -> Result<()>
    where
        V: Clone + PartialEq + fmt::Debug,
    {
        if !self.is_ancestor(self.current, node)? {
            self.move_to(node)?;
        }
        let path = self.path_from_root(node)?;
        for pair in path.windows(2) {
            let (ancestor, child) = (pair[0], pair[1]);
            self.node_mut(ancestor)?.branches.retain(|branch| *branch == child);
        }
        self.node_mut(node)?.branches.clear();
        let before = self.nodes.len();
        self.collect_unreachable();
        debug!(node = %node, removed = before - self.nodes.len(), "Pruned to linear history");
        Ok(())
    }

    fn node(&self, id: NodeId) -> Result<&StateNode<V>> {
        self.nodes.get(&id).ok_or(UndoRedoError::NodeNotFound(id))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut StateNode<V>> {
        self.nodes.get_mut(&id).ok_or(UndoRedoError::NodeNotFound(id))
    }

    fn incoming_edge(&self, id: NodeId) -> Result<&Edge<V>> {
        self.node(id)?
            .incoming
            .as_ref()
            .ok_or_else(|| UndoRedoError::validation_error(format!("{} has no parent", id)))
    }

    fn branch_target(&self, branch: Option<usize>) -> Result<NodeId> {
        let branches = &self.node(self.current)?.branches;
        if branches.is_empty() {
            return Err(UndoRedoError::NoMoreRedos);
        }
        let index = branch.unwrap_or(branches.len() - 1);
        branches
            .get(index)
            .copied()
            .ok_or(UndoRedoError::BranchNotFound {
                index,
                available: branches.len(),
            })
    }

    /// Whether `ancestor` lies on the root path of `node` (or is `node`)
    fn is_ancestor(&self, ancestor: NodeId, node: NodeId) -> Result<bool> {
        self.node(ancestor)?;
        Ok(self.path_from_root(node)?.contains(&ancestor))
    }

    fn collect_unreachable(&mut self) {
        let mut reachable = HashSet::new();
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            if reachable.insert(id) {
                if let Some(node) = self.nodes.get(&id) {
                    stack.extend(node.branches.iter().copied());
                }
            }
        }
        self.nodes.retain(|id, _| reachable.contains(id));
    }
}

impl<V> VersionTree<V>
where
    V: Clone + PartialEq + fmt::Debug,
{
    /// Revert the changeset leading into the current node and move to its
    /// parent
    pub fn undo(&mut self) -> Result<NodeId> {
        let edge = self
            .node(self.current)?
            .incoming
            .as_ref()
            .ok_or(UndoRedoError::NoMoreUndos)?;
        edge.changeset.undo()?;
        let source = edge.source;
        debug!(from = %self.current, to = %source, "Undo");
        self.current = source;
        Ok(source)
    }

    /// Re-apply a branch of the current node and move to its target.
    /// `None` picks the most recently created branch.
    pub fn redo(&mut self, branch: Option<usize>) -> Result<NodeId> {
        let target = self.branch_target(branch)?;
        self.incoming_edge(target)?.changeset.redo()?;
        debug!(from = %self.current, to = %target, "Redo");
        self.current = target;
        Ok(target)
    }

    /// Replay the tree from the current node to `target` through their
    /// lowest common ancestor
    pub fn move_to(&mut self, target: NodeId) -> Result<()> {
        if target == self.current {
            return Ok(());
        }
        let target_path = self.path_from_root(target)?;
        let current_path = self.path_from_root(self.current)?;
        let common = target_path
            .iter()
            .zip(&current_path)
            .take_while(|(a, b)| a == b)
            .count();
        if common == 0 {
            return Err(UndoRedoError::NodeNotFound(target));
        }
        let ancestor = target_path[common - 1];
        debug!(from = %self.current, to = %target, via = %ancestor, "Moving through version tree");

        while self.current != ancestor {
            self.undo()?;
        }
        for next in &target_path[common..] {
            let index = self
                .node(self.current)?
                .branches
                .iter()
                .position(|child| child == next)
                .ok_or(UndoRedoError::NodeNotFound(*next))?;
            self.redo(Some(index))?;
        }
        Ok(())
    }
}

impl<V> History<V> for VersionTree<V>
where
    V: Clone + PartialEq + fmt::Debug,
{
    fn record(&mut self, changeset: Changeset<V>) -> Result<()> {
        self.commit(changeset);
        Ok(())
    }

    fn undo(&mut self) -> Result<()> {
        VersionTree::undo(self).map(|_| ())
    }

    fn redo(&mut self) -> Result<()> {
        VersionTree::redo(self, None).map(|_| ())
    }

    fn can_undo(&self) -> bool {
        self.nodes
            .get(&self.current)
            .map_or(false, |node| node.incoming.is_some())
    }

    fn can_redo(&self) -> bool {
        self.nodes
            .get(&self.current)
            .map_or(false, |node| !node.branches.is_empty())
    }

    fn reinitialize(&mut self) {
        debug!(nodes = self.nodes.len(), "Reinitializing version tree");
        *self = Self::new();
    }
}

impl<V> Default for VersionTree<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> fmt::Debug for VersionTree<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VersionTree")
            .field("nodes", &self.nodes.len())
            .field("root", &self.root)
            .field("current", &self.current)
            .finish()
    }
}
