//! Error taxonomy for blueprint schema operations.
//!
//! Local invariant checks reject synchronously with a structured
//! [`SchemaError`] before any collaborator call; collaborator failures arrive
//! as [`BackendError`] and are translated where the surrounding operation
//! knows the ids involved. Nothing here is fatal: the worst case is a
//! rejected mutation leaving the tree at its last known-good state.

use std::collections::HashMap;
use std::fmt;

use crate::blueprint::{BlueprintId, DataType, PathId};

/// Error reported by the persistence collaborator.
///
/// The four structured kinds mirror the server-side rejections the core must
/// recognize; everything else is a transport failure.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendError {
    /// Duplicate path name / duplicate full path.
    Conflict { detail: String },
    /// The write would create a cycle in the embed graph.
    Cycle,
    /// Mutation of a field owned by an embed.
    Readonly,
    /// 422-style field error map.
    Validation { errors: HashMap<String, Vec<String>> },
    NotFound { detail: String },
    Transport(String),
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendError::Conflict { detail } => write!(f, "conflict: {}", detail),
            BackendError::Cycle => write!(f, "embed would create a cycle"),
            BackendError::Readonly => write!(f, "field is readonly"),
            BackendError::Validation { errors } => {
                write!(f, "validation failed for {} field(s)", errors.len())
            }
            BackendError::NotFound { detail } => write!(f, "not found: {}", detail),
            BackendError::Transport(msg) => write!(f, "transport error: {}", msg),
        }
    }
}

impl std::error::Error for BackendError {}

/// Structured rejection for blueprint schema operations.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaError {
    /// Create or reparent under a node that cannot hold children.
    InvalidParent {
        parent: Option<PathId>,
        data_type: DataType,
    },
    /// Path name or blueprint code outside `[a-z][a-z0-9_]*`.
    InvalidName { name: String },
    /// Duplicate sibling name / duplicate full path.
    PathConflict { full_path: String },
    /// Mutating or deleting a node owned by an embed.
    ReadonlyViolation { path: Option<PathId> },
    /// Embedding at a non-json or readonly host path.
    InvalidEmbedTarget { host_path: Option<PathId> },
    /// Embedding would let the candidate reach the host again.
    CyclicEmbed {
        host: BlueprintId,
        candidate: BlueprintId,
    },
    /// Malformed or inapplicable validation rule.
    RuleShape { rule: String, reason: String },
    /// A mutation is already in flight for this tree.
    MutationInFlight,
    /// Blueprint deletion blocked by embeds or post-type references.
    BlueprintInUse { blueprint: BlueprintId },
    UnknownPath { path: PathId },
    UnknownBlueprint { blueprint: BlueprintId },
    /// Field error map reported by the collaborator.
    Validation { errors: HashMap<String, Vec<String>> },
    /// Collaborator failure with no local translation.
    Backend(BackendError),
}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaError::InvalidParent { parent, data_type } => match parent {
                Some(id) => write!(f, "node {} ({}) cannot hold children", id, data_type),
                None => write!(f, "{} nodes cannot hold children", data_type),
            },
            SchemaError::InvalidName { name } => {
                write!(f, "'{}' is not a valid name (expected [a-z][a-z0-9_]*)", name)
            }
            SchemaError::PathConflict { full_path } => {
                write!(f, "path '{}' already exists", full_path)
            }
            SchemaError::ReadonlyViolation { path } => match path {
                Some(id) => write!(f, "path {} is readonly (owned by an embed)", id),
                None => write!(f, "path is readonly (owned by an embed)"),
            },
            SchemaError::InvalidEmbedTarget { host_path } => match host_path {
                Some(id) => write!(f, "path {} cannot host an embed", id),
                None => write!(f, "embed target is not a writable json path"),
            },
            SchemaError::CyclicEmbed { host, candidate } => {
                write!(f, "embedding {} into {} would create a cycle", candidate, host)
            }
            SchemaError::RuleShape { rule, reason } => {
                write!(f, "rule '{}': {}", rule, reason)
            }
            SchemaError::MutationInFlight => {
                write!(f, "another mutation is still in flight")
            }
            SchemaError::BlueprintInUse { blueprint } => {
                write!(f, "blueprint {} is embedded or referenced and cannot be deleted", blueprint)
            }
            SchemaError::UnknownPath { path } => write!(f, "unknown path {}", path),
            SchemaError::UnknownBlueprint { blueprint } => {
                write!(f, "unknown blueprint {}", blueprint)
            }
            SchemaError::Validation { errors } => {
                write!(f, "validation failed for {} field(s)", errors.len())
            }
            SchemaError::Backend(err) => write!(f, "backend error: {}", err),
        }
    }
}

impl std::error::Error for SchemaError {}

impl From<BackendError> for SchemaError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Validation { errors } => SchemaError::Validation { errors },
            other => SchemaError::Backend(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_is_stable() {
        let err = SchemaError::PathConflict {
            full_path: "author.name".to_string(),
        };
        assert_eq!(err.to_string(), "path 'author.name' already exists");
    }

    #[test]
    fn test_backend_validation_translates() {
        let mut errors = HashMap::new();
        errors.insert("name".to_string(), vec!["taken".to_string()]);
        let err: SchemaError = BackendError::Validation { errors }.into();
        assert!(matches!(err, SchemaError::Validation { .. }));
    }

    #[test]
    fn test_cycle_stays_backend_without_context() {
        let err: SchemaError = BackendError::Cycle.into();
        assert!(matches!(err, SchemaError::Backend(BackendError::Cycle)));
    }
}
