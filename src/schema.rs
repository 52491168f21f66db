//! Flattened field-schema read model.
//!
//! Downstream form configuration binds a UI component to each full path;
//! this module derives the `full_path -> FieldSchema` map it consumes. The
//! map preserves preorder tree order.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::blueprint::{BlueprintId, Cardinality, DataType, PathId};
use crate::rules::ValidationRules;
use crate::tree::PathTree;

/// Schema of one field, keyed by its full path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FieldSchema {
    pub path_id: PathId,
    pub data_type: DataType,
    pub cardinality: Cardinality,
    pub required: bool,
    pub indexed: bool,
    pub readonly: bool,
    #[serde(default)]
    pub source_blueprint_id: Option<BlueprintId>,
    #[serde(default)]
    pub rules: Option<ValidationRules>,
}

/// Flattened read model for one blueprint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct BlueprintSchema {
    pub schema: IndexMap<String, FieldSchema>,
}

/// Flatten a tree into its schema map, preorder.
pub fn flatten(tree: &PathTree) -> BlueprintSchema {
    let mut schema = IndexMap::new();
    for path in tree.flatten() {
        schema.insert(
            path.full_path.clone(),
            FieldSchema {
                path_id: path.id,
                data_type: path.data_type,
                cardinality: path.cardinality,
                required: path.is_required,
                indexed: path.is_indexed,
                readonly: path.is_readonly,
                source_blueprint_id: path.source_blueprint_id,
                rules: path.validation_rules.clone(),
            },
        );
    }
    BlueprintSchema { schema }
}
