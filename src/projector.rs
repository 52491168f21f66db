//! Flow-graph projection of a path tree.
//!
//! Derives a transient node/edge representation for visualization and
//! assigns layered 2-D coordinates: rank = depth in the forest, within-rank
//! order = preorder visit order (children stay grouped under their parent,
//! which is crossing-free for a forest), and each root subtree gets its own
//! horizontal band so roots never overlap. The layout is a pure function of
//! the tree: same input, same coordinates. Nothing here is persisted.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::blueprint::{Path, PathId};
use crate::tree::PathTree;

/// Visual classification of a path node.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FlowNodeKind {
    EmbeddedBlueprint,
    JsonGroup,
    SimpleField,
}

/// Classify a path for rendering.
pub fn classify(path: &Path) -> FlowNodeKind {
    if path.is_embedded() {
        FlowNodeKind::EmbeddedBlueprint
    } else if path.can_have_children() {
        FlowNodeKind::JsonGroup
    } else {
        FlowNodeKind::SimpleField
    }
}

/// One renderable node with layered coordinates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FlowNode {
    pub id: PathId,
    pub label: String,
    pub full_path: String,
    pub kind: FlowNodeKind,
    /// Depth in the forest.
    pub rank: usize,
    /// Left-to-right position within the rank.
    pub order: usize,
    pub x: f64,
    pub y: f64,
}

/// Parent-to-child edge. `animated` mirrors the child's readonly flag so
/// embedded subtrees render distinctly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FlowEdge {
    pub source: PathId,
    pub target: PathId,
    pub animated: bool,
}

/// The complete projected graph.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FlowGraph {
    pub nodes: Vec<FlowNode>,
    pub edges: Vec<FlowEdge>,
    pub width: f64,
    pub height: f64,
}

/// Fixed node size and spacing used by the layout.
#[derive(Debug, Clone)]
pub struct ProjectorConfig {
    pub node_width: f64,
    pub node_height: f64,
    pub gap_x: f64,
    pub gap_y: f64,
    /// Extra horizontal gap between root subtrees.
    pub root_gap: f64,
    pub margin: f64,
}

impl Default for ProjectorConfig {
    fn default() -> Self {
        Self {
            node_width: 180.0,
            node_height: 48.0,
            gap_x: 40.0,
            gap_y: 60.0,
            root_gap: 80.0,
            margin: 40.0,
        }
    }
}

/// Project a tree into a flow graph with layered coordinates.
pub fn project(tree: &PathTree, config: &ProjectorConfig) -> FlowGraph {
    let mut nodes = Vec::new();
    let mut edges = Vec::new();
    // Within-rank order across the whole forest; bands are laid out left to
    // right so the counter order matches the x order.
    let mut rank_order: HashMap<usize, usize> = HashMap::new();
    let step_x = config.node_width + config.gap_x;
    let step_y = config.node_height + config.gap_y;
    let mut band_x = config.margin;

    for root in &tree.roots {
        // Column counters local to this root's band.
        let mut band_cols: HashMap<usize, usize> = HashMap::new();
        place(
            root,
            0,
            band_x,
            step_x,
            step_y,
            config,
            &mut band_cols,
            &mut rank_order,
            &mut nodes,
            &mut edges,
        );
        let band_width = band_cols.values().max().copied().unwrap_or(0) as f64 * step_x;
        band_x += band_width + config.root_gap;
    }

    let width = nodes
        .iter()
        .map(|n| n.x + config.node_width)
        .fold(0.0_f64, f64::max)
        + config.margin;
    let height = nodes
        .iter()
        .map(|n| n.y + config.node_height)
        .fold(0.0_f64, f64::max)
        + config.margin;

    FlowGraph {
        nodes,
        edges,
        width,
        height,
    }
}

#[allow(clippy::too_many_arguments)]
fn place(
    path: &Path,
    rank: usize,
    band_x: f64,
    step_x: f64,
    step_y: f64,
    config: &ProjectorConfig,
    band_cols: &mut HashMap<usize, usize>,
    rank_order: &mut HashMap<usize, usize>,
    nodes: &mut Vec<FlowNode>,
    edges: &mut Vec<FlowEdge>,
) {
    let col = band_cols.entry(rank).or_insert(0);
    let x = band_x + *col as f64 * step_x;
    *col += 1;

    let order = rank_order.entry(rank).or_insert(0);
    let node_order = *order;
    *order += 1;

    nodes.push(FlowNode {
        id: path.id,
        label: path.name.clone(),
        full_path: path.full_path.clone(),
        kind: classify(path),
        rank,
        order: node_order,
        x,
        y: config.margin + rank as f64 * step_y,
    });

    if let Some(parent_id) = path.parent_id {
        edges.push(FlowEdge {
            source: parent_id,
            target: path.id,
            animated: path.is_readonly,
        });
    }

    for child in &path.children {
        place(
            child,
            rank + 1,
            band_x,
            step_x,
            step_y,
            config,
            band_cols,
            rank_order,
            nodes,
            edges,
        );
    }
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

    fn sample_tree() -> PathTree {
        let mut tree = PathTree::new(Uuid::new_v4());
        let title = node("title", DataType::String, None);
        tree = tree.with_created(title).unwrap();
        let author = node("author", DataType::Json, None);
        let author_id = author.id;
        tree = tree.with_created(author).unwrap();
        tree = tree
            .with_created(node("name", DataType::String, Some(author_id)))
            .unwrap();
        tree = tree
            .with_created(node("email", DataType::String, Some(author_id)))
            .unwrap();
        tree
    }

    #[test]
    fn test_classification() {
        let plain = node("title", DataType::String, None);
        assert_eq!(classify(&plain), FlowNodeKind::SimpleField);

        let group = node("author", DataType::Json, None);
        assert_eq!(classify(&group), FlowNodeKind::JsonGroup);

        let mut embedded = node("seo", DataType::Json, None);
        embedded.is_readonly = true;
        embedded.source_blueprint_id = Some(Uuid::new_v4());
        assert_eq!(classify(&embedded), FlowNodeKind::EmbeddedBlueprint);
    }

    #[test]
    fn test_one_edge_per_non_root() {
        let tree = sample_tree();
        let graph = project(&tree, &ProjectorConfig::default());
        assert_eq!(graph.nodes.len(), 4);
        assert_eq!(graph.edges.len(), 2);
        let author = tree.find_by_full_path("author").unwrap();
        assert!(graph.edges.iter().all(|e| e.source == author.id));
    }

    #[test]
    fn test_ranks_follow_depth() {
        let tree = sample_tree();
        let graph = project(&tree, &ProjectorConfig::default());
        let by_path = |p: &str| {
            graph
                .nodes
                .iter()
                .find(|n| n.full_path == p)
                .unwrap()
                .clone()
        };
        assert_eq!(by_path("title").rank, 0);
        assert_eq!(by_path("author").rank, 0);
        assert_eq!(by_path("author.name").rank, 1);
        assert_eq!(by_path("author.email").rank, 1);
        assert!(by_path("author.name").order < by_path("author.email").order);
        assert!(by_path("author.name").x < by_path("author.email").x);
        assert!(by_path("author.name").y > by_path("author").y);
    }

    #[test]
    fn test_roots_get_disjoint_bands() {
        let mut tree = PathTree::new(Uuid::new_v4());
        let a = node("a", DataType::Json, None);
        let a_id = a.id;
        tree = tree.with_created(a).unwrap();
        tree = tree
            .with_created(node("x", DataType::String, Some(a_id)))
            .unwrap();
        tree = tree
            .with_created(node("y", DataType::String, Some(a_id)))
            .unwrap();
        let b = node("b", DataType::String, None);
        tree = tree.with_created(b).unwrap();

        let graph = project(&tree, &ProjectorConfig::default());
        let band_a_right = graph
            .nodes
            .iter()
            .filter(|n| n.full_path.starts_with("a"))
            .map(|n| n.x)
            .fold(0.0_f64, f64::max);
        let b_node = graph.nodes.iter().find(|n| n.full_path == "b").unwrap();
        assert!(b_node.x > band_a_right);
    }

    #[test]
    fn test_layout_is_deterministic() {
        let tree = sample_tree();
        let first = project(&tree, &ProjectorConfig::default());
        let second = project(&tree, &ProjectorConfig::default());
        assert_eq!(first, second);
    }

    #[test]
    fn test_embedded_edges_animated() {
        let mut tree = PathTree::new(Uuid::new_v4());
        let group = node("group", DataType::Json, None);
        let group_id = group.id;
        tree = tree.with_created(group).unwrap();
        let mut frozen = node("frozen", DataType::String, Some(group_id));
        frozen.is_readonly = true;
        frozen.source_blueprint_id = Some(Uuid::new_v4());
        tree = tree.with_attached(Some(group_id), vec![frozen]).unwrap();

        let graph = project(&tree, &ProjectorConfig::default());
        assert_eq!(graph.edges.len(), 1);
        assert!(graph.edges[0].animated);
    }
}
