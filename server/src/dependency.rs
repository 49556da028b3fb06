//! The dependency forest behind faction unlocks.
//!
//! Built once from a flat parent-pointer list. Nodes whose parent chain never
//! reaches the root sentinel are dropped, so the forest is acyclic by
//! construction.

use log::warn;
use shared::{ConstructionType, UnlockKey, UnlockStatus, BUILD_TREE, ROOT_PARENT};
use std::collections::{HashMap, VecDeque};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DependencyNode {
    pub id: ConstructionType,
    pub parent: ConstructionType,
    pub key: UnlockKey,
    pub initial: UnlockStatus,
}

#[derive(Debug, Clone)]
pub struct DependencyGraph {
    nodes: HashMap<ConstructionType, DependencyNode>,
    children: HashMap<ConstructionType, Vec<ConstructionType>>,
    /// Breadth-first order from the roots.
    order: Vec<ConstructionType>,
}

impl DependencyGraph {
    pub fn from_nodes(list: &[DependencyNode]) -> Self {
        let mut grouped: HashMap<ConstructionType, Vec<ConstructionType>> = HashMap::new();
        for node in list {
            grouped.entry(node.parent).or_default().push(node.id);
        }

        let by_id: HashMap<ConstructionType, DependencyNode> =
            list.iter().map(|node| (node.id, *node)).collect();

        let mut nodes = HashMap::new();
        let mut children: HashMap<ConstructionType, Vec<ConstructionType>> = HashMap::new();
        let mut order = Vec::new();
        let mut queue = VecDeque::from([ROOT_PARENT]);

        while let Some(parent) = queue.pop_front() {
            let Some(kids) = grouped.get(&parent) else {
                continue;
            };
            for kid in kids {
                if nodes.contains_key(kid) {
                    continue;
                }
                if let Some(node) = by_id.get(kid) {
                    nodes.insert(*kid, *node);
                    order.push(*kid);
                    if parent != ROOT_PARENT {
                        children.entry(parent).or_default().push(*kid);
                    }
                    queue.push_back(*kid);
                }
            }
        }

        for node in list {
            if !nodes.contains_key(&node.id) {
                warn!(
                    "Dependency node {} is unreachable from a root and was dropped",
                    node.id
                );
            }
        }

        Self {
            nodes,
            children,
            order,
        }
    }

    /// The forest declared by the shared build tree table.
    pub fn standard() -> Self {
        let list: Vec<DependencyNode> = BUILD_TREE
            .iter()
            .map(|entry| DependencyNode {
                id: entry.kind,
                parent: entry.parent,
                key: entry.key,
                initial: entry.initial,
            })
            .collect();
        Self::from_nodes(&list)
    }

    pub fn node(&self, id: ConstructionType) -> Option<&DependencyNode> {
        self.nodes.get(&id)
    }

    pub fn contains(&self, id: ConstructionType) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn children(&self, id: ConstructionType) -> &[ConstructionType] {
        self.children.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn parent(&self, id: ConstructionType) -> Option<ConstructionType> {
        self.nodes
            .get(&id)
            .map(|node| node.parent)
            .filter(|parent| *parent != ROOT_PARENT)
    }

    pub fn roots(&self) -> impl Iterator<Item = &DependencyNode> {
        self.nodes.values().filter(|node| node.parent == ROOT_PARENT)
    }

    /// Every node, parents before children.
    pub fn iter(&self) -> impl Iterator<Item = &DependencyNode> {
        self.order.iter().filter_map(|id| self.nodes.get(id))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
