//! Core blueprint and path field models.
//!
//! A blueprint is a named, coded schema container owning a forest of typed
//! field nodes ("paths"). These types are shared by the tree store, the embed
//! engine and the persistence collaborator DTOs.

use convert_case::{Case, Casing};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::rules::ValidationRules;

pub type BlueprintId = Uuid;
pub type PathId = Uuid;
pub type EmbedId = Uuid;

static IDENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new("^[a-z][a-z0-9_]*$").expect("identifier regex"));

/// Check whether a string is a legal path name or blueprint code.
pub fn is_valid_ident(s: &str) -> bool {
    IDENT_RE.is_match(s)
}

/// Derive a suggested blueprint code from a display name.
///
/// # Example
/// ```
/// assert_eq!(stencil::suggest_code("My Blog Post"), "my_blog_post");
/// ```
pub fn suggest_code(name: &str) -> String {
    let snake = name.to_case(Case::Snake);
    let filtered: String = snake
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '_')
        .collect();
    filtered
        .trim_start_matches(|c: char| !c.is_ascii_lowercase())
        .trim_end_matches('_')
        .to_string()
}

/// A named, coded schema container.
///
/// Deletion is blocked while other blueprints embed it or while post types
/// reference it; both checks live behind the persistence collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Blueprint {
    pub id: BlueprintId,
    pub name: String,
    /// Unique machine code, `[a-z][a-z0-9_]*`.
    pub code: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Value type of a path node.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    #[default]
    String,
    Text,
    Int,
    Float,
    Bool,
    Date,
    Datetime,
    Json,
    Ref,
}

impl DataType {
    /// String-like types that accept length bounds and patterns.
    pub fn is_textual(self) -> bool {
        matches!(self, DataType::String | DataType::Text)
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, DataType::Int | DataType::Float)
    }

    pub fn is_temporal(self) -> bool {
        matches!(self, DataType::Date | DataType::Datetime)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DataType::String => "string",
            DataType::Text => "text",
            DataType::Int => "int",
            DataType::Float => "float",
            DataType::Bool => "bool",
            DataType::Date => "date",
            DataType::Datetime => "datetime",
            DataType::Json => "json",
            DataType::Ref => "ref",
        };
        write!(f, "{}", s)
    }
}

/// Whether a field holds one value or an array of values.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    #[default]
    One,
    Many,
}

/// One node in a blueprint's field forest.
///
/// `full_path` is derived (dot-joined ancestor names) and recomputed by the
/// tree whenever a name or parent changes. `children` is only populated for
/// `json` nodes. Nodes materialized by an embed carry `is_readonly` plus the
/// source blueprint/path ids they were cloned from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Path {
    pub id: PathId,
    pub blueprint_id: BlueprintId,
    #[serde(default)]
    pub parent_id: Option<PathId>,
    pub name: String,
    #[serde(default)]
    pub full_path: String,
    pub data_type: DataType,
    #[serde(default)]
    pub cardinality: Cardinality,
    #[serde(default)]
    pub is_indexed: bool,
    #[serde(default)]
    pub is_required: bool,
    #[serde(default)]
    pub validation_rules: Option<ValidationRules>,
    #[serde(default)]
    pub is_readonly: bool,
    #[serde(default)]
    pub source_blueprint_id: Option<BlueprintId>,
    #[serde(default)]
    pub source_path_id: Option<PathId>,
    #[serde(default)]
    pub children: Vec<Path>,
}

impl Path {
    /// Only `json` nodes may hold children.
    pub fn can_have_children(&self) -> bool {
        self.data_type == DataType::Json
    }

    /// True if this node was materialized by an embed.
    pub fn is_embedded(&self) -> bool {
        self.is_readonly && self.source_blueprint_id.is_some()
    }

    /// Preorder walk over this node and its descendants.
    pub fn walk<'a>(&'a self, f: &mut dyn FnMut(&'a Path)) {
        f(self);
        for child in &self.children {
            child.walk(f);
        }
    }

    /// True if any node in this subtree is readonly.
    pub fn subtree_has_readonly(&self) -> bool {
        self.is_readonly || self.children.iter().any(|c| c.subtree_has_readonly())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_idents() {
        assert!(is_valid_ident("title"));
        assert!(is_valid_ident("seo_meta_2"));
        assert!(!is_valid_ident("Title"));
        assert!(!is_valid_ident("2fast"));
        assert!(!is_valid_ident(""));
        assert!(!is_valid_ident("with space"));
    }

    #[test]
    fn test_suggest_code() {
        assert_eq!(suggest_code("My Blog Post"), "my_blog_post");
        assert_eq!(suggest_code("SEO Settings"), "seo_settings");
        assert_eq!(suggest_code("2024 Archive"), "archive");
    }

    #[test]
    fn test_data_type_encoding() {
        let dt: DataType = serde_json::from_str("\"datetime\"").unwrap();
        assert_eq!(dt, DataType::Datetime);
        assert_eq!(serde_json::to_string(&DataType::Json).unwrap(), "\"json\"");
    }
}
