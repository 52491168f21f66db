//! Cross-blueprint composition: the embed relation and its materialization.
//!
//! An embed copies another blueprint's entire field forest, read-only, into a
//! host tree. The copy is a snapshot taken at embed time; later edits to the
//! source blueprint do not propagate until the embed is deleted and
//! recreated. Acyclicity is enforced over the global embed graph with an
//! explicit adjacency structure and a depth-first reachability check, rather
//! than trusting any pre-filtered candidate list.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::blueprint::{BlueprintId, EmbedId, Path, PathId};
use crate::error::SchemaError;
use crate::tree::PathTree;

/// Directed composition edge: the host blueprint embeds the source blueprint
/// at `host_path_id` (`None` = at the host's root).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Embed {
    pub id: EmbedId,
    pub blueprint_id: BlueprintId,
    pub embedded_blueprint_id: BlueprintId,
    #[serde(default)]
    pub host_path_id: Option<PathId>,
}

/// Adjacency view of the "embeds" relation across all known blueprints.
#[derive(Debug, Clone, Default)]
pub struct EmbedGraph {
    edges: HashMap<BlueprintId, HashSet<BlueprintId>>,
}

impl EmbedGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_embeds<'a>(embeds: impl IntoIterator<Item = &'a Embed>) -> Self {
        let mut graph = Self::new();
        for embed in embeds {
            graph.add_edge(embed.blueprint_id, embed.embedded_blueprint_id);
        }
        graph
    }

    pub fn add_edge(&mut self, host: BlueprintId, embedded: BlueprintId) {
        self.edges.entry(host).or_default().insert(embedded);
    }

    /// Blueprints directly embedded by `host`.
    pub fn embedded_by(&self, host: BlueprintId) -> impl Iterator<Item = BlueprintId> + '_ {
        self.edges.get(&host).into_iter().flatten().copied()
    }

    /// True if `target` is reachable from `from` by following embed edges.
    pub fn reaches(&self, from: BlueprintId, target: BlueprintId) -> bool {
        let mut stack = vec![from];
        let mut visited = HashSet::new();
        while let Some(current) = stack.pop() {
            if current == target {
                return true;
            }
            if !visited.insert(current) {
                continue;
            }
            if let Some(next) = self.edges.get(&current) {
                stack.extend(next.iter().copied());
            }
        }
        false
    }

    /// Whether `host` may embed `candidate` without forming a cycle. A
    /// self-embed is always rejected; otherwise the candidate must not be
    /// able to reach the host again, transitively.
    pub fn can_embed(&self, host: BlueprintId, candidate: BlueprintId) -> bool {
        if host == candidate {
            return false;
        }
        !self.reaches(candidate, host)
    }

    pub fn check_embed(
        &self,
        host: BlueprintId,
        candidate: BlueprintId,
    ) -> Result<(), SchemaError> {
        if self.can_embed(host, candidate) {
            Ok(())
        } else {
            Err(SchemaError::CyclicEmbed { host, candidate })
        }
    }
}

/// Validate the attachment point: the root, or a writable `json` path.
pub fn check_embed_target(tree: &PathTree, host_path_id: Option<PathId>) -> Result<(), SchemaError> {
    let Some(id) = host_path_id else {
        return Ok(());
    };
    let host = tree.find(id).ok_or(SchemaError::InvalidEmbedTarget {
        host_path: Some(id),
    })?;
    if host.is_readonly || !host.can_have_children() {
        return Err(SchemaError::InvalidEmbedTarget {
            host_path: Some(id),
        });
    }
    Ok(())
}

/// Deep-clone the source forest into readonly host-tree nodes.
///
/// Every cloned node gets a fresh id from `next_id` (identity is owned by the
/// persistence collaborator), `is_readonly = true`, and the source
/// blueprint/path ids it was cloned from. The clones are returned with
/// `parent_id` pointing at the embed's host path; attaching and `full_path`
/// derivation are the tree's job.
pub fn resolve_embed(
    source_roots: &[Path],
    embed: &Embed,
    next_id: &mut dyn FnMut() -> PathId,
) -> Vec<Path> {
    fn clone_node(
        node: &Path,
        embed: &Embed,
        parent_id: Option<PathId>,
        next_id: &mut dyn FnMut() -> PathId,
    ) -> Path {
        let id = next_id();
        Path {
            id,
            blueprint_id: embed.blueprint_id,
            parent_id,
            name: node.name.clone(),
            full_path: String::new(),
            data_type: node.data_type,
            cardinality: node.cardinality,
            is_indexed: node.is_indexed,
            is_required: node.is_required,
            validation_rules: node.validation_rules.clone(),
            is_readonly: true,
            source_blueprint_id: Some(embed.embedded_blueprint_id),
            source_path_id: Some(node.id),
            children: node
                .children
                .iter()
                .map(|child| clone_node(child, embed, Some(id), next_id))
                .collect(),
        }
    }

    source_roots
        .iter()
        .map(|root| clone_node(root, embed, embed.host_path_id, next_id))
        .collect()
}

/// Materialize an embed into the host tree: validate the target, snapshot the
/// source forest and attach the readonly copies.
pub fn with_embed(
    host_tree: &PathTree,
    embed: &Embed,
    source_tree: &PathTree,
    next_id: &mut dyn FnMut() -> PathId,
) -> Result<PathTree, SchemaError> {
    check_embed_target(host_tree, embed.host_path_id)?;
    let clones = resolve_embed(&source_tree.roots, embed, next_id);
    tracing::debug!(
        host = %embed.blueprint_id,
        source = %embed.embedded_blueprint_id,
        nodes = clones.iter().map(|c| {
            let mut n = 0;
            c.walk(&mut |_| n += 1);
            n
        }).sum::<usize>(),
        "materializing embed"
    );
    host_tree.with_attached(embed.host_path_id, clones)
}

/// Remove every path the embed materialized, cascading to descendants.
pub fn strip_embed(host_tree: &PathTree, embed: &Embed) -> PathTree {
    host_tree.without_embedded(embed.host_path_id, embed.embedded_blueprint_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blueprint::{Cardinality, DataType};
    use uuid::Uuid;

    fn node(name: &str, data_type: DataType, parent_id: Option<PathId>) -> Path {
        Path {
            id: Uuid::new_v4(),
            blueprint_id: Uuid::nil(),
            parent_id,
            name: name.to_string(),
            full_path: String::new(),
            data_type,
            cardinality: Cardinality::One,
            is_indexed: false,
            is_required: false,
            validation_rules: None,
            is_readonly: false,
            source_blueprint_id: None,
            source_path_id: None,
            children: Vec::new(),
        }
    }

    fn embed(host: BlueprintId, source: BlueprintId, at: Option<PathId>) -> Embed {
        Embed {
            id: Uuid::new_v4(),
            blueprint_id: host,
            embedded_blueprint_id: source,
            host_path_id: at,
        }
    }

    #[test]
    fn test_self_embed_rejected() {
        let a = Uuid::new_v4();
        let graph = EmbedGraph::new();
        assert!(!graph.can_embed(a, a));
    }

    #[test]
    fn test_direct_cycle_rejected() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let mut graph = EmbedGraph::new();
        graph.add_edge(a, b);
        assert!(!graph.can_embed(b, a));
        assert!(graph.can_embed(a, b));
    }

    #[test]
    fn test_transitive_cycle_rejected() {
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let mut graph = EmbedGraph::new();
        graph.add_edge(a, b);
        graph.add_edge(b, c);
        assert!(!graph.can_embed(c, a));
        let err = graph.check_embed(c, a).unwrap_err();
        assert_eq!(err, SchemaError::CyclicEmbed { host: c, candidate: a });
    }

    #[test]
    fn test_resolve_embed_stamps_sources() {
        let host_id = Uuid::new_v4();
        let source_id = Uuid::new_v4();
        let mut source_tree = PathTree::new(source_id);
        let group = node("group", DataType::Json, None);
        let group_src_id = group.id;
        source_tree = source_tree.with_created(group).unwrap();
        source_tree = source_tree
            .with_created(node("x", DataType::String, Some(group_src_id)))
            .unwrap();

        let host_tree = PathTree::new(host_id);
        let embed = embed(host_id, source_id, None);
        let mut tree = with_embed(&host_tree, &embed, &source_tree, &mut Uuid::new_v4).unwrap();

        assert_eq!(tree.roots.len(), 1);
        let copied = &tree.roots[0];
        assert!(copied.is_readonly);
        assert_eq!(copied.source_blueprint_id, Some(source_id));
        assert_eq!(copied.source_path_id, Some(group_src_id));
        assert_eq!(copied.children[0].full_path, "group.x");
        assert!(copied.children[0].is_readonly);

        // Snapshot semantics: source edits do not propagate.
        source_tree = source_tree
            .with_created(node("y", DataType::String, Some(group_src_id)))
            .unwrap();
        assert_eq!(source_tree.find(group_src_id).unwrap().children.len(), 2);
        tree = strip_embed(&tree, &embed);
        assert!(tree.roots.is_empty());
    }

    #[test]
    fn test_embed_at_json_host_path() {
        let host_id = Uuid::new_v4();
        let source_id = Uuid::new_v4();
        let mut source_tree = PathTree::new(source_id);
        source_tree = source_tree
            .with_created(node("x", DataType::String, None))
            .unwrap();
        source_tree = source_tree
            .with_created(node("y", DataType::String, None))
            .unwrap();

        let mut host_tree = PathTree::new(host_id);
        let group = node("group", DataType::Json, None);
        let group_id = group.id;
        host_tree = host_tree.with_created(group).unwrap();

        let embed = embed(host_id, source_id, Some(group_id));
        let tree = with_embed(&host_tree, &embed, &source_tree, &mut Uuid::new_v4).unwrap();
        let group_node = tree.find(group_id).unwrap();
        assert_eq!(group_node.children.len(), 2);
        assert_eq!(group_node.children[0].full_path, "group.x");

        // The host group cannot be deleted while embedded copies live in it.
        assert!(matches!(
            tree.with_deleted(group_id).unwrap_err(),
            SchemaError::ReadonlyViolation { .. }
        ));

        // Deleting the embed first unblocks the host path.
        let stripped = strip_embed(&tree, &embed);
        assert!(stripped.find(group_id).unwrap().children.is_empty());
        assert!(stripped.with_deleted(group_id).is_ok());
    }

    #[test]
    fn test_embed_at_non_json_target_rejected() {
        let host_id = Uuid::new_v4();
        let source_id = Uuid::new_v4();
        let mut host_tree = PathTree::new(host_id);
        let title = node("title", DataType::String, None);
        let title_id = title.id;
        host_tree = host_tree.with_created(title).unwrap();

        let embed = embed(host_id, source_id, Some(title_id));
        let err = check_embed_target(&host_tree, embed.host_path_id).unwrap_err();
        assert_eq!(
            err,
            SchemaError::InvalidEmbedTarget {
                host_path: Some(title_id)
            }
        );
    }

    #[test]
    fn test_nested_source_stamps_override() {
        // A source tree that itself contains embedded nodes: clones are
        // re-stamped with the direct source blueprint.
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let mut b_tree = PathTree::new(b);
        let mut from_c = node("from_c", DataType::String, None);
        from_c.is_readonly = true;
        from_c.source_blueprint_id = Some(c);
        from_c.source_path_id = Some(Uuid::new_v4());
        b_tree.roots.push(from_c);

        let embed = embed(a, b, None);
        let clones = resolve_embed(&b_tree.roots, &embed, &mut Uuid::new_v4);
        assert_eq!(clones[0].source_blueprint_id, Some(b));
    }
}
