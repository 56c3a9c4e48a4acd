//! Hierarchical card groups.
//!
//! Groups form a forest: every group has at most one parent. Querying a group
//! includes the cards of all its descendants, so the forest answers
//! "which groups lie below this one" without recursion.

use std::collections::HashMap;

/// Index of a group inside a [`GroupForest`].
pub type GroupId = usize;

#[derive(Debug, Clone)]
struct GroupNode {
    name: String,
    parent: Option<GroupId>,
    children: Vec<GroupId>,
}

/// Arena of groups with a parent index.
#[derive(Debug, Clone, Default)]
pub struct GroupForest {
    nodes: Vec<GroupNode>,
    by_name: HashMap<String, GroupId>,
}

impl GroupForest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a forest from `(name, parent_name)` rows in any order.
    ///
    /// Parents that are never declared themselves are created as roots.
    pub fn from_rows<I, S>(rows: I) -> Self
    where
        I: IntoIterator<Item = (S, Option<S>)>,
        S: AsRef<str>,
    {
        let mut forest = Self::new();
        for (name, parent) in rows {
            forest.insert(name.as_ref(), parent.as_ref().map(|p| p.as_ref()));
        }
        forest
    }

    /// Insert a group, or return the existing one with that name.
    ///
    /// A known group keeps its parent unless it had none yet. A parent link
    /// that would close a cycle is ignored.
    pub fn insert(&mut self, name: &str, parent: Option<&str>) -> GroupId {
        let id = self.get_or_create(name);
        if let Some(parent_name) = parent {
            if self.nodes[id].parent.is_none() && parent_name != name {
                let parent_id = self.get_or_create(parent_name);
                if !self.is_ancestor(id, parent_id) {
                    self.nodes[id].parent = Some(parent_id);
                    self.nodes[parent_id].children.push(id);
                }
            }
        }
        id
    }

    fn get_or_create(&mut self, name: &str) -> GroupId {
        if let Some(&id) = self.by_name.get(name) {
            return id;
        }
        let id = self.nodes.len();
        self.nodes.push(GroupNode {
            name: name.to_string(),
            parent: None,
            children: Vec::new(),
        });
        self.by_name.insert(name.to_string(), id);
        id
    }

    /// Whether `ancestor` lies on the parent chain of `node` (or is `node`).
    fn is_ancestor(&self, ancestor: GroupId, node: GroupId) -> bool {
        let mut current = Some(node);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.nodes[id].parent;
        }
        false
    }

    pub fn id(&self, name: &str) -> Option<GroupId> {
        self.by_name.get(name).copied()
    }

    pub fn name(&self, id: GroupId) -> Option<&str> {
        self.nodes.get(id).map(|n| n.name.as_str())
    }

    pub fn parent(&self, id: GroupId) -> Option<GroupId> {
        self.nodes.get(id).and_then(|n| n.parent)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// The group and all groups below it, parents before children.
    pub fn descendants(&self, id: GroupId) -> Vec<GroupId> {
        if id >= self.nodes.len() {
            return Vec::new();
        }
        let mut result = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            result.push(current);
            stack.extend(self.nodes[current].children.iter().rev());
        }
        result
    }

    /// Names of the group and its descendants; `None` for unknown groups.
    pub fn descendant_names(&self, name: &str) -> Option<Vec<&str>> {
        let id = self.id(name)?;
        Some(
            self.descendants(id)
                .into_iter()
                .filter_map(|d| self.name(d))
                .collect(),
        )
    }

    /// Path from the root down to the group, e.g. `["latein", "lektion-1"]`.
    pub fn path(&self, id: GroupId) -> Vec<&str> {
        let mut path = Vec::new();
        let mut current = Some(id);
        while let Some(node) = current.and_then(|c| self.nodes.get(c)) {
            path.push(node.name.as_str());
            current = node.parent;
        }
        path.reverse();
        path
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
