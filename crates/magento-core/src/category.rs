//! # Category Tree
//!
//! Normalized form of the remote category hierarchy and its traversal order.
//!
//! ## Traversal and Priority
//! ```text
//! Root (1)                depth 0  priority 10
//! └── Default (2)         depth 1  priority 11
//!     ├── Women (20)      depth 2  priority 12
//!     │   └── Bottoms (22) depth 3 priority 13
//!     └── Men (30)        depth 2  priority 12
//! ```
//! Nodes are visited before their children (pre-order) and lower priorities
//! run first, so parents have a better chance of being imported before their
//! children. The queue does not guarantee it; importers still pull a missing
//! parent on demand.

use serde_json::Value;

use crate::error::{CoreError, CoreResult};
use crate::types::ExternalId;

/// One node of the remote category hierarchy.
#[derive(Debug, Clone, PartialEq)]
pub struct CategoryNode {
    pub id: ExternalId,
    pub children: Vec<CategoryNode>,
}

impl CategoryNode {
    pub fn leaf(id: impl Into<ExternalId>) -> Self {
        CategoryNode {
            id: id.into(),
            children: Vec::new(),
        }
    }

    pub fn with_children(id: impl Into<ExternalId>, children: Vec<CategoryNode>) -> Self {
        CategoryNode {
            id: id.into(),
            children,
        }
    }
}

/// A visited node, in traversal order.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeEntry {
    pub id: ExternalId,
    pub parent: Option<ExternalId>,
    pub depth: usize,
}

/// The remote category forest.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CategoryTree {
    pub roots: Vec<CategoryNode>,
}

impl CategoryTree {
    pub fn new(roots: Vec<CategoryNode>) -> Self {
        CategoryTree { roots }
    }

    /// Parses the 1.7 `catalog_category.tree` answer.
    ///
    /// Shape: `{"category_id": "1", "children": [{...}, ...]}`.
    pub fn from_v1_value(value: &Value) -> CoreResult<Self> {
        Ok(CategoryTree::new(vec![parse_node(value, "category_id", "children")?]))
    }

    /// Parses the 2.0 `GET categories` answer.
    ///
    /// Shape: `{"id": 1, "children_data": [{...}, ...]}` or a list of those.
    pub fn from_v2_value(value: &Value) -> CoreResult<Self> {
        match value {
            Value::Array(items) => items
                .iter()
                .map(|item| parse_node(item, "id", "children_data"))
                .collect::<CoreResult<Vec<_>>>()
                .map(CategoryTree::new),
            other => Ok(CategoryTree::new(vec![parse_node(other, "id", "children_data")?])),
        }
    }

    /// Visits every node, parents before children.
    pub fn walk(&self) -> Vec<TreeEntry> {
        let mut entries = Vec::new();
        // Explicit stack: remote trees can be deep enough to matter.
        let mut stack: Vec<(&CategoryNode, Option<&ExternalId>, usize)> =
            self.roots.iter().rev().map(|n| (n, None, 0)).collect();

        while let Some((node, parent, depth)) = stack.pop() {
            entries.push(TreeEntry {
                id: node.id.clone(),
                parent: parent.cloned(),
                depth,
            });
            for child in node.children.iter().rev() {
                stack.push((child, Some(&node.id), depth + 1));
            }
        }

        entries
    }

    /// Number of nodes in the forest.
    pub fn len(&self) -> usize {
        self.walk().len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }
}

/// Priority of a category import job at a given depth.
pub fn priority_for_depth(base: i64, depth: usize) -> i64 {
    base.saturating_add(depth as i64)
}

fn parse_node(value: &Value, id_key: &str, children_key: &str) -> CoreResult<CategoryNode> {
    let obj = value
        .as_object()
        .ok_or_else(|| CoreError::MalformedTree(format!("expected an object, got {}", value)))?;

    let id = obj
        .get(id_key)
        .and_then(ExternalId::from_value)
        .ok_or_else(|| CoreError::MalformedTree(format!("node without '{}'", id_key)))?;

    let children = match obj.get(children_key) {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|child| parse_node(child, id_key, children_key))
            .collect::<CoreResult<Vec<_>>>()?,
        Some(other) => {
            return Err(CoreError::MalformedTree(format!(
                "'{}' of node {} is not a list: {}",
                children_key, id, other
            )))
        }
    };

    Ok(CategoryNode { id, children })
}
