//! Path forest for a single blueprint.
//!
//! The tree is an immutable value: every mutation is a pure transformation
//! returning a new [`PathTree`], so the cascading `full_path` recomputation
//! is testable in isolation and a failed operation can never leave a
//! half-updated forest behind. Lookups are depth-first and O(n); blueprint
//! trees are shallow (tens to low hundreds of fields).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::blueprint::{is_valid_ident, BlueprintId, Cardinality, DataType, Path, PathId};
use crate::error::SchemaError;
use crate::rules::ValidationRules;

/// Partial update for one path node. `None` leaves a field untouched; the
/// nested options distinguish "no change" from "clear".
#[derive(Debug, Clone, Default)]
pub struct PathPatch {
    pub name: Option<String>,
    /// `Some(None)` moves the node to the root.
    pub parent_id: Option<Option<PathId>>,
    pub data_type: Option<DataType>,
    pub cardinality: Option<Cardinality>,
    pub is_indexed: Option<bool>,
    pub is_required: Option<bool>,
    /// `Some(None)` clears the rule bag.
    pub validation_rules: Option<Option<ValidationRules>>,
}

/// The field forest of one blueprint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PathTree {
    pub blueprint_id: BlueprintId,
    pub roots: Vec<Path>,
}

impl PathTree {
    pub fn new(blueprint_id: BlueprintId) -> Self {
        Self {
            blueprint_id,
            roots: Vec::new(),
        }
    }

    /// Rebuild the nested forest from the flat row list the persistence
    /// collaborator returns. Row order is preserved as sibling order; rows
    /// pointing at a missing parent are dropped.
    pub fn from_rows(blueprint_id: BlueprintId, rows: Vec<Path>) -> Self {
        let mut by_parent: HashMap<Option<PathId>, Vec<Path>> = HashMap::new();
        for mut row in rows {
            row.children.clear();
            by_parent.entry(row.parent_id).or_default().push(row);
        }

        fn attach(node: &mut Path, by_parent: &mut HashMap<Option<PathId>, Vec<Path>>) {
            if let Some(children) = by_parent.remove(&Some(node.id)) {
                node.children = children;
                for child in &mut node.children {
                    attach(child, by_parent);
                }
            }
        }

        let mut roots = by_parent.remove(&None).unwrap_or_default();
        for root in &mut roots {
            attach(root, &mut by_parent);
        }
        if !by_parent.is_empty() {
            let orphans: usize = by_parent.values().map(Vec::len).sum();
            tracing::warn!(blueprint = %blueprint_id, orphans, "dropping rows with missing parents");
        }

        let mut tree = Self {
            blueprint_id,
            roots,
        };
        tree.recompute_full_paths();
        tree
    }

    /// Depth-first lookup across the forest.
    pub fn find(&self, id: PathId) -> Option<&Path> {
        find_in(&self.roots, id)
    }

    pub fn find_by_full_path(&self, full_path: &str) -> Option<&Path> {
        self.flatten().into_iter().find(|p| p.full_path == full_path)
    }

    /// All nodes in preorder.
    pub fn flatten(&self) -> Vec<&Path> {
        let mut out = Vec::new();
        for root in &self.roots {
            root.walk(&mut |p| out.push(p));
        }
        out
    }

    /// Flat row representation (children cleared), preorder. The inverse of
    /// [`PathTree::from_rows`].
    pub fn to_rows(&self) -> Vec<Path> {
        self.flatten()
            .into_iter()
            .map(|p| {
                let mut row = p.clone();
                row.children.clear();
                row
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.flatten().len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Dot-joined path a node named `name` would get under `parent_id`.
    ///
    /// Falls back to the unqualified name when the parent id is not in the
    /// current tree; a degraded but non-fatal state.
    pub fn compute_full_path(&self, name: &str, parent_id: Option<PathId>) -> String {
        match parent_id.and_then(|id| self.find(id)) {
            Some(parent) => format!("{}.{}", parent.full_path, name),
            None => name.to_string(),
        }
    }

    /// Validate that `parent_id` can accept a new child.
    pub fn check_parent(&self, parent_id: Option<PathId>) -> Result<(), SchemaError> {
        let Some(id) = parent_id else {
            return Ok(());
        };
        let parent = self.find(id).ok_or(SchemaError::UnknownPath { path: id })?;
        if parent.is_readonly {
            return Err(SchemaError::ReadonlyViolation { path: Some(id) });
        }
        if !parent.can_have_children() {
            return Err(SchemaError::InvalidParent {
                parent: Some(id),
                data_type: parent.data_type,
            });
        }
        Ok(())
    }

    /// Validate a prospective sibling name under `parent_id`, optionally
    /// ignoring one node (the node being renamed).
    pub fn check_sibling_name(
        &self,
        parent_id: Option<PathId>,
        name: &str,
        exclude: Option<PathId>,
    ) -> Result<(), SchemaError> {
        if !is_valid_ident(name) {
            return Err(SchemaError::InvalidName {
                name: name.to_string(),
            });
        }
        let clash = self
            .siblings(parent_id)
            .iter()
            .any(|s| Some(s.id) != exclude && s.name == name);
        if clash {
            return Err(SchemaError::PathConflict {
                full_path: self.compute_full_path(name, parent_id),
            });
        }
        Ok(())
    }

    /// True if `id` lives inside the subtree rooted at `ancestor`.
    pub fn is_descendant(&self, ancestor: PathId, id: PathId) -> bool {
        let Some(root) = self.find(ancestor) else {
            return false;
        };
        let mut found = false;
        root.walk(&mut |p| {
            if p.id == id && p.id != ancestor {
                found = true;
            }
        });
        found
    }

    /// Append a new node as the last child of its parent (or last root).
    pub fn with_created(&self, mut node: Path) -> Result<Self, SchemaError> {
        self.check_parent(node.parent_id)?;
        self.check_sibling_name(node.parent_id, &node.name, None)?;
        if !node.children.is_empty() && !node.can_have_children() {
            return Err(SchemaError::InvalidParent {
                parent: Some(node.id),
                data_type: node.data_type,
            });
        }
        if let Some(rules) = &node.validation_rules {
            rules.validate_for(node.data_type, node.cardinality)?;
        }

        node.blueprint_id = self.blueprint_id;
        let mut tree = self.clone();
        match node.parent_id {
            None => tree.roots.push(node),
            Some(parent_id) => {
                update_in(&mut tree.roots, parent_id, &mut |parent| {
                    parent.children.push(node.clone())
                });
            }
        }
        tree.recompute_full_paths();
        Ok(tree)
    }

    /// Apply a patch to one node. Renaming or reparenting recomputes
    /// `full_path` for the node and every descendant in one top-down pass.
    pub fn with_updated(&self, id: PathId, patch: &PathPatch) -> Result<Self, SchemaError> {
        let node = self.find(id).ok_or(SchemaError::UnknownPath { path: id })?;
        if node.is_readonly {
            return Err(SchemaError::ReadonlyViolation { path: Some(id) });
        }

        let new_name = patch.name.as_deref().unwrap_or(&node.name).to_string();
        let new_parent = patch.parent_id.unwrap_or(node.parent_id);
        let new_type = patch.data_type.unwrap_or(node.data_type);
        let new_cardinality = patch.cardinality.unwrap_or(node.cardinality);

        let reparenting = new_parent != node.parent_id;
        if reparenting {
            if new_parent == Some(id) || new_parent.map_or(false, |p| self.is_descendant(id, p)) {
                return Err(SchemaError::InvalidParent {
                    parent: new_parent,
                    data_type: new_type,
                });
            }
            self.check_parent(new_parent)?;
        }
        self.check_sibling_name(new_parent, &new_name, Some(id))?;

        if new_type != DataType::Json && !node.children.is_empty() {
            return Err(SchemaError::InvalidParent {
                parent: Some(id),
                data_type: new_type,
            });
        }

        let effective_rules = match &patch.validation_rules {
            Some(replacement) => replacement.as_ref(),
            None => node.validation_rules.as_ref(),
        };
        if let Some(rules) = effective_rules {
            rules.validate_for(new_type, new_cardinality)?;
        }

        let mut tree = self.clone();
        let apply = |target: &mut Path| {
            target.name = new_name.clone();
            target.data_type = new_type;
            target.cardinality = new_cardinality;
            if let Some(indexed) = patch.is_indexed {
                target.is_indexed = indexed;
            }
            if let Some(required) = patch.is_required {
                target.is_required = required;
            }
            if let Some(rules) = &patch.validation_rules {
                target.validation_rules = rules.clone();
            }
        };

        if reparenting {
            let mut moved = detach(&mut tree.roots, id).ok_or(SchemaError::UnknownPath { path: id })?;
            apply(&mut moved);
            moved.parent_id = new_parent;
            match new_parent {
                None => tree.roots.push(moved),
                Some(parent_id) => {
                    update_in(&mut tree.roots, parent_id, &mut |parent| {
                        parent.children.push(moved.clone())
                    });
                }
            }
        } else {
            update_in(&mut tree.roots, id, &mut |target| apply(target));
        }
        tree.recompute_full_paths();
        Ok(tree)
    }

    /// Delete a node and its whole subtree. Rejected while the subtree
    /// contains any node owned by an embed.
    pub fn with_deleted(&self, id: PathId) -> Result<Self, SchemaError> {
        let node = self.find(id).ok_or(SchemaError::UnknownPath { path: id })?;
        if node.subtree_has_readonly() {
            return Err(SchemaError::ReadonlyViolation { path: Some(id) });
        }
        let mut tree = self.clone();
        detach(&mut tree.roots, id);
        tree.recompute_full_paths();
        Ok(tree)
    }

    /// Attach pre-built subtrees (embed materialization) under `host`, or as
    /// additional roots. The host must be a `json` node; name clashes with
    /// existing siblings are conflicts.
    pub fn with_attached(
        &self,
        host: Option<PathId>,
        nodes: Vec<Path>,
    ) -> Result<Self, SchemaError> {
        if let Some(id) = host {
            let parent = self.find(id).ok_or(SchemaError::UnknownPath { path: id })?;
            if !parent.can_have_children() {
                return Err(SchemaError::InvalidParent {
                    parent: Some(id),
                    data_type: parent.data_type,
                });
            }
        }
        let existing = self.siblings(host);
        for node in &nodes {
            if existing.iter().any(|s| s.name == node.name) {
                return Err(SchemaError::PathConflict {
                    full_path: self.compute_full_path(&node.name, host),
                });
            }
        }

        let mut tree = self.clone();
        match host {
            None => tree.roots.extend(nodes),
            Some(parent_id) => {
                update_in(&mut tree.roots, parent_id, &mut |parent| {
                    parent.children.extend(nodes.clone())
                });
            }
        }
        tree.recompute_full_paths();
        Ok(tree)
    }

    /// Remove every subtree materialized from `source` at the given
    /// attachment point. Used when an embed is deleted; the copies cascade
    /// with their own descendants.
    pub fn without_embedded(
        &self,
        host: Option<PathId>,
        source: BlueprintId,
    ) -> Self {
        let mut tree = self.clone();
        let keep = |p: &Path| !(p.is_embedded() && p.source_blueprint_id == Some(source));
        match host {
            None => tree.roots.retain(&keep),
            Some(parent_id) => {
                update_in(&mut tree.roots, parent_id, &mut |parent| {
                    parent.children.retain(&keep)
                });
            }
        }
        tree.recompute_full_paths();
        tree
    }

    /// Children of `parent_id`, or the roots.
    pub fn siblings(&self, parent_id: Option<PathId>) -> &[Path] {
        match parent_id {
            None => &self.roots,
            Some(id) => self.find(id).map(|p| p.children.as_slice()).unwrap_or(&[]),
        }
    }

    /// Re-derive every `full_path` and parent link, top-down. A child's path
    /// depends only on its parent's already-updated path, so a single pass
    /// is enough.
    fn recompute_full_paths(&mut self) {
        fn recompute(node: &mut Path, parent: Option<(&str, PathId)>) {
            match parent {
                Some((parent_path, parent_id)) => {
                    node.full_path = format!("{}.{}", parent_path, node.name);
                    node.parent_id = Some(parent_id);
                }
                None => {
                    node.full_path = node.name.clone();
                    node.parent_id = None;
                }
            }
            let own_path = node.full_path.clone();
            let own_id = node.id;
            for child in &mut node.children {
                recompute(child, Some((&own_path, own_id)));
            }
        }
        for root in &mut self.roots {
            recompute(root, None);
        }
    }
}

fn find_in(nodes: &[Path], id: PathId) -> Option<&Path> {
    for node in nodes {
        if node.id == id {
            return Some(node);
        }
        if let Some(found) = find_in(&node.children, id) {
            return Some(found);
        }
    }
    None
}

/// Apply `f` to the node with `id`, wherever it sits in the forest.
fn update_in(nodes: &mut [Path], id: PathId, f: &mut dyn FnMut(&mut Path)) -> bool {
    for node in nodes.iter_mut() {
        if node.id == id {
            f(node);
            return true;
        }
        if update_in(&mut node.children, id, f) {
            return true;
        }
    }
    false
}

/// Remove the node with `id` from the forest and return the subtree.
fn detach(nodes: &mut Vec<Path>, id: PathId) -> Option<Path> {
    if let Some(pos) = nodes.iter().position(|n| n.id == id) {
        return Some(nodes.remove(pos));
    }
    for node in nodes.iter_mut() {
        if let Some(found) = detach(&mut node.children, id) {
            return Some(found);
        }
    }
    None
}
