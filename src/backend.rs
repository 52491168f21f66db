//! Persistence collaborator interface and in-memory implementation.
//!
//! The engine never talks to storage directly: every mutation is an async
//! round-trip through the [`Backend`] trait, and the committed tree is
//! rebuilt from `list_paths` after each successful write. [`MemoryBackend`]
//! is a complete implementation used by tests, the fixture loader and the
//! CLI; it enforces the same conflicts a real server would (duplicate paths,
//! readonly rejections, cyclic embeds) so the error translation path is
//! exercisable without a server.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use crate::blueprint::{
    is_valid_ident, Blueprint, BlueprintId, Cardinality, DataType, EmbedId, Path, PathId,
};
use crate::embed::{strip_embed, with_embed, Embed, EmbedGraph};
use crate::error::{BackendError, SchemaError};
use crate::rules::ValidationRules;
use crate::schema::{flatten, BlueprintSchema};
use crate::tree::{PathPatch, PathTree};

/// Candidate blueprint offered for embedding.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BlueprintRef {
    pub id: BlueprintId,
    pub code: String,
    pub name: String,
}

/// Request payload for a new path.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CreatePath {
    #[serde(default)]
    pub parent_id: Option<PathId>,
    pub name: String,
    pub data_type: DataType,
    #[serde(default)]
    pub cardinality: Cardinality,
    #[serde(default)]
    pub is_indexed: bool,
    #[serde(default)]
    pub is_required: bool,
    #[serde(default)]
    pub validation_rules: Option<ValidationRules>,
}

/// Request payload for a new embed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateEmbed {
    pub embedded_blueprint_id: BlueprintId,
    #[serde(default)]
    pub host_path_id: Option<PathId>,
}

/// The persistence collaborator. Implementations own identity (ids) and are
/// the source of truth the tree is rebuilt from after every write.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn list_blueprints(&self) -> Result<Vec<Blueprint>, BackendError>;
    async fn create_blueprint(
        &self,
        name: &str,
        code: &str,
        description: Option<String>,
    ) -> Result<Blueprint, BackendError>;
    async fn update_blueprint(
        &self,
        id: BlueprintId,
        name: &str,
        description: Option<String>,
    ) -> Result<(), BackendError>;
    async fn delete_blueprint(&self, id: BlueprintId) -> Result<(), BackendError>;
    /// Whether deletion is currently allowed (nothing embeds or references
    /// the blueprint).
    async fn can_delete_blueprint(&self, id: BlueprintId) -> Result<bool, BackendError>;

    async fn list_paths(&self, blueprint_id: BlueprintId) -> Result<Vec<Path>, BackendError>;
    async fn create_path(
        &self,
        blueprint_id: BlueprintId,
        req: CreatePath,
    ) -> Result<Path, BackendError>;
    async fn update_path(&self, id: PathId, patch: PathPatch) -> Result<(), BackendError>;
    async fn delete_path(&self, id: PathId) -> Result<(), BackendError>;

    async fn list_embeds(&self, blueprint_id: BlueprintId) -> Result<Vec<Embed>, BackendError>;
    /// Candidates pre-filtered for acyclicity. Callers must still re-validate
    /// before submitting.
    async fn list_embeddable(
        &self,
        blueprint_id: BlueprintId,
    ) -> Result<Vec<BlueprintRef>, BackendError>;
    async fn create_embed(
        &self,
        blueprint_id: BlueprintId,
        req: CreateEmbed,
    ) -> Result<Embed, BackendError>;
    async fn delete_embed(&self, id: EmbedId) -> Result<(), BackendError>;

    async fn get_schema(&self, blueprint_id: BlueprintId) -> Result<BlueprintSchema, BackendError>;
}

#[derive(Default)]
struct State {
    blueprints: Vec<Blueprint>,
    trees: HashMap<BlueprintId, PathTree>,
    embeds: Vec<Embed>,
    /// Blueprints referenced by post types; deletion is blocked for these.
    referenced: HashSet<BlueprintId>,
}

/// In-memory [`Backend`].
#[derive(Default)]
pub struct MemoryBackend {
    inner: Mutex<State>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a post-type reference, blocking deletion of `id`.
    pub fn mark_referenced(&self, id: BlueprintId) {
        if let Ok(mut state) = self.inner.lock() {
            state.referenced.insert(id);
        }
    }

    fn state(&self) -> Result<MutexGuard<'_, State>, BackendError> {
        self.inner
            .lock()
            .map_err(|_| BackendError::Transport("backend state poisoned".to_string()))
    }
}

/// Map a local rejection onto the wire-level error a server would report.
fn to_backend(err: SchemaError) -> BackendError {
    match err {
        SchemaError::PathConflict { full_path } => BackendError::Conflict { detail: full_path },
        SchemaError::ReadonlyViolation { .. } => BackendError::Readonly,
        SchemaError::CyclicEmbed { .. } => BackendError::Cycle,
        SchemaError::UnknownPath { path } => BackendError::NotFound {
            detail: format!("path {}", path),
        },
        SchemaError::UnknownBlueprint { blueprint } => BackendError::NotFound {
            detail: format!("blueprint {}", blueprint),
        },
        SchemaError::InvalidName { name } => BackendError::Validation {
            errors: HashMap::from([("name".to_string(), vec![format!("'{}' is not a valid name", name)])]),
        },
        SchemaError::InvalidParent { .. } => BackendError::Validation {
            errors: HashMap::from([(
                "parent_id".to_string(),
                vec!["parent cannot hold children".to_string()],
            )]),
        },
        SchemaError::InvalidEmbedTarget { .. } => BackendError::Validation {
            errors: HashMap::from([(
                "host_path_id".to_string(),
                vec!["embed target must be a writable json path".to_string()],
            )]),
        },
        SchemaError::RuleShape { rule, reason } => BackendError::Validation {
            errors: HashMap::from([(rule, vec![reason])]),
        },
        other => BackendError::Transport(other.to_string()),
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn list_blueprints(&self) -> Result<Vec<Blueprint>, BackendError> {
        Ok(self.state()?.blueprints.clone())
    }

    async fn create_blueprint(
        &self,
        name: &str,
        code: &str,
        description: Option<String>,
    ) -> Result<Blueprint, BackendError> {
        if !is_valid_ident(code) {
            return Err(to_backend(SchemaError::InvalidName {
                name: code.to_string(),
            }));
        }
        let mut state = self.state()?;
        if state.blueprints.iter().any(|b| b.code == code) {
            return Err(BackendError::Conflict {
                detail: format!("blueprint code '{}'", code),
            });
        }
        let blueprint = Blueprint {
            id: Uuid::new_v4(),
            name: name.to_string(),
            code: code.to_string(),
            description,
        };
        state.trees.insert(blueprint.id, PathTree::new(blueprint.id));
        state.blueprints.push(blueprint.clone());
        Ok(blueprint)
    }

    async fn update_blueprint(
        &self,
        id: BlueprintId,
        name: &str,
        description: Option<String>,
    ) -> Result<(), BackendError> {
        let mut state = self.state()?;
        let blueprint = state
            .blueprints
            .iter_mut()
            .find(|b| b.id == id)
            .ok_or(BackendError::NotFound {
                detail: format!("blueprint {}", id),
            })?;
        blueprint.name = name.to_string();
        blueprint.description = description;
        Ok(())
    }

    async fn delete_blueprint(&self, id: BlueprintId) -> Result<(), BackendError> {
        let mut state = self.state()?;
        let embedded_elsewhere = state.embeds.iter().any(|e| e.embedded_blueprint_id == id);
        if embedded_elsewhere || state.referenced.contains(&id) {
            return Err(BackendError::Conflict {
                detail: "blueprint is embedded or referenced".to_string(),
            });
        }
        let before = state.blueprints.len();
        state.blueprints.retain(|b| b.id != id);
        if state.blueprints.len() == before {
            return Err(BackendError::NotFound {
                detail: format!("blueprint {}", id),
            });
        }
        state.trees.remove(&id);
        state.embeds.retain(|e| e.blueprint_id != id);
        Ok(())
    }

    async fn can_delete_blueprint(&self, id: BlueprintId) -> Result<bool, BackendError> {
        let state = self.state()?;
        let embedded = state.embeds.iter().any(|e| e.embedded_blueprint_id == id);
        Ok(!embedded && !state.referenced.contains(&id))
    }

    async fn list_paths(&self, blueprint_id: BlueprintId) -> Result<Vec<Path>, BackendError> {
        let state = self.state()?;
        let tree = state.trees.get(&blueprint_id).ok_or(BackendError::NotFound {
            detail: format!("blueprint {}", blueprint_id),
        })?;
        Ok(tree.to_rows())
    }

    async fn create_path(
        &self,
        blueprint_id: BlueprintId,
        req: CreatePath,
    ) -> Result<Path, BackendError> {
        let mut state = self.state()?;
        let tree = state.trees.get(&blueprint_id).ok_or(BackendError::NotFound {
            detail: format!("blueprint {}", blueprint_id),
        })?;
        let node = Path {
            id: Uuid::new_v4(),
            blueprint_id,
            parent_id: req.parent_id,
            name: req.name,
            full_path: String::new(),
            data_type: req.data_type,
            cardinality: req.cardinality,
            is_indexed: req.is_indexed,
            is_required: req.is_required,
            validation_rules: req.validation_rules,
            is_readonly: false,
            source_blueprint_id: None,
            source_path_id: None,
            children: Vec::new(),
        };
        let id = node.id;
        let updated = tree.with_created(node).map_err(to_backend)?;
        let mut row = updated
            .find(id)
            .cloned()
            .ok_or_else(|| BackendError::Transport("created path vanished".to_string()))?;
        row.children.clear();
        state.trees.insert(blueprint_id, updated);
        Ok(row)
    }

    async fn update_path(&self, id: PathId, patch: PathPatch) -> Result<(), BackendError> {
        let mut state = self.state()?;
        let blueprint_id = state
            .trees
            .iter()
            .find(|(_, tree)| tree.find(id).is_some())
            .map(|(bp, _)| *bp)
            .ok_or(BackendError::NotFound {
                detail: format!("path {}", id),
            })?;
        let tree = &state.trees[&blueprint_id];
        let updated = tree.with_updated(id, &patch).map_err(to_backend)?;
        state.trees.insert(blueprint_id, updated);
        Ok(())
    }

    async fn delete_path(&self, id: PathId) -> Result<(), BackendError> {
        let mut state = self.state()?;
        let blueprint_id = state
            .trees
            .iter()
            .find(|(_, tree)| tree.find(id).is_some())
            .map(|(bp, _)| *bp)
            .ok_or(BackendError::NotFound {
                detail: format!("path {}", id),
            })?;
        let tree = &state.trees[&blueprint_id];
        let updated = tree.with_deleted(id).map_err(to_backend)?;
        state.trees.insert(blueprint_id, updated);
        Ok(())
    }

    async fn list_embeds(&self, blueprint_id: BlueprintId) -> Result<Vec<Embed>, BackendError> {
        let state = self.state()?;
        Ok(state
            .embeds
            .iter()
            .filter(|e| e.blueprint_id == blueprint_id)
            .cloned()
            .collect())
    }

    async fn list_embeddable(
        &self,
        blueprint_id: BlueprintId,
    ) -> Result<Vec<BlueprintRef>, BackendError> {
        let state = self.state()?;
        let graph = EmbedGraph::from_embeds(&state.embeds);
        Ok(state
            .blueprints
            .iter()
            .filter(|b| graph.can_embed(blueprint_id, b.id))
            .map(|b| BlueprintRef {
                id: b.id,
                code: b.code.clone(),
                name: b.name.clone(),
            })
            .collect())
    }

    async fn create_embed(
        &self,
        blueprint_id: BlueprintId,
        req: CreateEmbed,
    ) -> Result<Embed, BackendError> {
        let mut state = self.state()?;
        if !state.trees.contains_key(&req.embedded_blueprint_id) {
            return Err(BackendError::NotFound {
                detail: format!("blueprint {}", req.embedded_blueprint_id),
            });
        }
        let graph = EmbedGraph::from_embeds(&state.embeds);
        graph
            .check_embed(blueprint_id, req.embedded_blueprint_id)
            .map_err(to_backend)?;

        let host_tree = state.trees.get(&blueprint_id).ok_or(BackendError::NotFound {
            detail: format!("blueprint {}", blueprint_id),
        })?;
        let source_tree = &state.trees[&req.embedded_blueprint_id];
        let embed = Embed {
            id: Uuid::new_v4(),
            blueprint_id,
            embedded_blueprint_id: req.embedded_blueprint_id,
            host_path_id: req.host_path_id,
        };
        let updated = with_embed(host_tree, &embed, source_tree, &mut Uuid::new_v4)
            .map_err(to_backend)?;
        state.trees.insert(blueprint_id, updated);
        state.embeds.push(embed.clone());
        Ok(embed)
    }

    async fn delete_embed(&self, id: EmbedId) -> Result<(), BackendError> {
        let mut state = self.state()?;
        let embed = state
            .embeds
            .iter()
            .find(|e| e.id == id)
            .cloned()
            .ok_or(BackendError::NotFound {
                detail: format!("embed {}", id),
            })?;
        let tree = state
            .trees
            .get(&embed.blueprint_id)
            .ok_or(BackendError::NotFound {
                detail: format!("blueprint {}", embed.blueprint_id),
            })?;
        let updated = strip_embed(tree, &embed);
        state.trees.insert(embed.blueprint_id, updated);
        state.embeds.retain(|e| e.id != id);
        Ok(())
    }

    async fn get_schema(&self, blueprint_id: BlueprintId) -> Result<BlueprintSchema, BackendError> {
        let state = self.state()?;
        let tree = state.trees.get(&blueprint_id).ok_or(BackendError::NotFound {
            detail: format!("blueprint {}", blueprint_id),
        })?;
        Ok(flatten(tree))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_path(name: &str, data_type: DataType) -> CreatePath {
        CreatePath {
            name: name.to_string(),
            data_type,
            ..CreatePath::default()
        }
    }

    #[tokio::test]
    async fn test_create_and_list_paths() {
        let backend = MemoryBackend::new();
        let bp = backend
            .create_blueprint("Article", "article", None)
            .await
            .unwrap();
        let title = backend
            .create_path(bp.id, new_path("title", DataType::String))
            .await
            .unwrap();
        assert_eq!(title.full_path, "title");

        let rows = backend.list_paths(bp.id).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].children.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_sibling_is_conflict() {
        let backend = MemoryBackend::new();
        let bp = backend
            .create_blueprint("Article", "article", None)
            .await
            .unwrap();
        backend
            .create_path(bp.id, new_path("title", DataType::String))
            .await
            .unwrap();
        let err = backend
            .create_path(bp.id, new_path("title", DataType::Text))
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_cyclic_embed_rejected_server_side() {
        let backend = MemoryBackend::new();
        let a = backend.create_blueprint("A", "a", None).await.unwrap();
        let b = backend.create_blueprint("B", "b", None).await.unwrap();
        backend
            .create_embed(
                a.id,
                CreateEmbed {
                    embedded_blueprint_id: b.id,
                    host_path_id: None,
                },
            )
            .await
            .unwrap();
        let err = backend
            .create_embed(
                b.id,
                CreateEmbed {
                    embedded_blueprint_id: a.id,
                    host_path_id: None,
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err, BackendError::Cycle);
    }

    #[tokio::test]
    async fn test_embeddable_excludes_cycles_and_self() {
        let backend = MemoryBackend::new();
        let a = backend.create_blueprint("A", "a", None).await.unwrap();
        let b = backend.create_blueprint("B", "b", None).await.unwrap();
        backend
            .create_embed(
                a.id,
                CreateEmbed {
                    embedded_blueprint_id: b.id,
                    host_path_id: None,
                },
            )
            .await
            .unwrap();

        let for_b = backend.list_embeddable(b.id).await.unwrap();
        assert!(for_b.is_empty());
        let for_a = backend.list_embeddable(a.id).await.unwrap();
        assert_eq!(for_a.len(), 1);
        assert_eq!(for_a[0].code, "b");
    }

    #[tokio::test]
    async fn test_delete_blueprint_blocked_while_embedded() {
        let backend = MemoryBackend::new();
        let a = backend.create_blueprint("A", "a", None).await.unwrap();
        let b = backend.create_blueprint("B", "b", None).await.unwrap();
        let embed = backend
            .create_embed(
                a.id,
                CreateEmbed {
                    embedded_blueprint_id: b.id,
                    host_path_id: None,
                },
            )
            .await
            .unwrap();

        assert!(!backend.can_delete_blueprint(b.id).await.unwrap());
        assert!(backend.delete_blueprint(b.id).await.is_err());

        backend.delete_embed(embed.id).await.unwrap();
        assert!(backend.can_delete_blueprint(b.id).await.unwrap());
        backend.delete_blueprint(b.id).await.unwrap();
    }

    #[tokio::test]
    async fn test_readonly_path_update_rejected() {
        let backend = MemoryBackend::new();
        let a = backend.create_blueprint("A", "a", None).await.unwrap();
        let b = backend.create_blueprint("B", "b", None).await.unwrap();
        backend
            .create_path(b.id, new_path("x", DataType::String))
            .await
            .unwrap();
        backend
            .create_embed(
                a.id,
                CreateEmbed {
                    embedded_blueprint_id: b.id,
                    host_path_id: None,
                },
            )
            .await
            .unwrap();

        let copied = backend.list_paths(a.id).await.unwrap();
        let err = backend
            .update_path(
                copied[0].id,
                PathPatch {
                    name: Some("renamed".to_string()),
                    ..PathPatch::default()
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err, BackendError::Readonly);
    }
}
