//! Blueprint editing session over a persistence collaborator.
//!
//! The store owns the committed tree for one blueprint. Mutations validate
//! local invariants synchronously, make one async round-trip, then re-fetch
//! the full path forest and rebuild the tree wholesale, trading latency for
//! consistency and sidestepping client-side merge logic. A `pending` flag
//! rejects a second mutating call while a round-trip is in flight so two
//! rebuilds can never interleave. A failed request surfaces an error and
//! leaves the previous consistent tree untouched.

use std::collections::HashSet;
use std::sync::Arc;

use crate::backend::{Backend, CreateEmbed, CreatePath};
use crate::blueprint::{is_valid_ident, Blueprint, BlueprintId, EmbedId, PathId};
use crate::embed::{check_embed_target, Embed, EmbedGraph};
use crate::error::{BackendError, SchemaError};
use crate::projector::{project, FlowGraph, ProjectorConfig};
use crate::schema::{flatten, BlueprintSchema};
use crate::tree::{PathPatch, PathTree};

pub struct BlueprintStore {
    backend: Arc<dyn Backend>,
    blueprint: Blueprint,
    tree: PathTree,
    embeds: Vec<Embed>,
    pending: bool,
}

impl BlueprintStore {
    /// Load the committed state for `blueprint` from the collaborator.
    pub async fn open(backend: Arc<dyn Backend>, blueprint: Blueprint) -> Result<Self, SchemaError> {
        let tree = PathTree::new(blueprint.id);
        let mut store = Self {
            backend,
            blueprint,
            tree,
            embeds: Vec::new(),
            pending: false,
        };
        store.refresh().await?;
        Ok(store)
    }

    pub fn blueprint(&self) -> &Blueprint {
        &self.blueprint
    }

    pub fn tree(&self) -> &PathTree {
        &self.tree
    }

    pub fn embeds(&self) -> &[Embed] {
        &self.embeds
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    /// Flattened read model of the committed tree.
    pub fn schema(&self) -> BlueprintSchema {
        flatten(&self.tree)
    }

    /// Flow-graph projection of the committed tree.
    pub fn project(&self, config: &ProjectorConfig) -> FlowGraph {
        project(&self.tree, config)
    }

    async fn refresh(&mut self) -> Result<(), SchemaError> {
        let rows = self.backend.list_paths(self.blueprint.id).await?;
        let embeds = self.backend.list_embeds(self.blueprint.id).await?;
        self.tree = PathTree::from_rows(self.blueprint.id, rows);
        self.embeds = embeds;
        tracing::debug!(
            blueprint = %self.blueprint.code,
            paths = self.tree.len(),
            embeds = self.embeds.len(),
            "rebuilt tree from collaborator"
        );
        Ok(())
    }

    fn begin(&mut self) -> Result<(), SchemaError> {
        if self.pending {
            return Err(SchemaError::MutationInFlight);
        }
        self.pending = true;
        Ok(())
    }

    /// Run one write round-trip: the collaborator call, then the wholesale
    /// rebuild. The pending flag is cleared on every exit path.
    async fn commit<F, T>(&mut self, call: F) -> Result<(), SchemaError>
    where
        F: std::future::Future<Output = Result<T, BackendError>>,
    {
        self.begin()?;
        let result = call.await;
        match result {
            Ok(_) => {
                let refreshed = self.refresh().await;
                self.pending = false;
                refreshed
            }
            Err(err) => {
                self.pending = false;
                Err(err.into())
            }
        }
    }

    /// Create a field. Shape, naming and rule invariants are checked against
    /// the committed tree before the collaborator is called.
    pub async fn create_path(&mut self, req: CreatePath) -> Result<(), SchemaError> {
        if !is_valid_ident(&req.name) {
            return Err(SchemaError::InvalidName {
                name: req.name.clone(),
            });
        }
        self.tree.check_parent(req.parent_id)?;
        self.tree.check_sibling_name(req.parent_id, &req.name, None)?;
        if let Some(rules) = &req.validation_rules {
            rules.validate_for(req.data_type, req.cardinality)?;
        }

        tracing::info!(blueprint = %self.blueprint.code, name = %req.name, "creating path");
        let backend = self.backend.clone();
        let blueprint_id = self.blueprint.id;
        self.commit(backend.create_path(blueprint_id, req)).await
    }

    /// Update a field. Rejected locally for readonly targets, conflicts and
    /// inapplicable rules; the cascade of `full_path` recomputation happens
    /// in the rebuilt tree.
    pub async fn update_path(&mut self, id: PathId, patch: PathPatch) -> Result<(), SchemaError> {
        // Dry-run against the committed tree; catches every local invariant
        // without touching it.
        self.tree.with_updated(id, &patch)?;

        tracing::info!(blueprint = %self.blueprint.code, path = %id, "updating path");
        let backend = self.backend.clone();
        let result = self.commit(backend.update_path(id, patch)).await;
        result.map_err(|err| match err {
            SchemaError::Backend(BackendError::Readonly) => {
                SchemaError::ReadonlyViolation { path: Some(id) }
            }
            SchemaError::Backend(BackendError::Conflict { detail }) => {
                SchemaError::PathConflict { full_path: detail }
            }
            other => other,
        })
    }

    /// Delete a field and its subtree.
    pub async fn delete_path(&mut self, id: PathId) -> Result<(), SchemaError> {
        self.tree.with_deleted(id)?;

        tracing::info!(blueprint = %self.blueprint.code, path = %id, "deleting path");
        let backend = self.backend.clone();
        let result = self.commit(backend.delete_path(id)).await;
        result.map_err(|err| match err {
            SchemaError::Backend(BackendError::Readonly) => {
                SchemaError::ReadonlyViolation { path: Some(id) }
            }
            other => other,
        })
    }

    /// Embed another blueprint at the root or at a json host path.
    ///
    /// Acyclicity is re-validated here by crawling the global embed graph
    /// from the candidate, even though `list_embeddable` pre-filters
    /// candidates server-side.
    pub async fn create_embed(&mut self, req: CreateEmbed) -> Result<(), SchemaError> {
        check_embed_target(&self.tree, req.host_path_id)?;
        if req.embedded_blueprint_id == self.blueprint.id {
            return Err(SchemaError::CyclicEmbed {
                host: self.blueprint.id,
                candidate: req.embedded_blueprint_id,
            });
        }
        let graph = self.load_embed_graph(req.embedded_blueprint_id).await?;
        graph.check_embed(self.blueprint.id, req.embedded_blueprint_id)?;

        tracing::info!(
            blueprint = %self.blueprint.code,
            source = %req.embedded_blueprint_id,
            "creating embed"
        );
        let backend = self.backend.clone();
        let blueprint_id = self.blueprint.id;
        let candidate = req.embedded_blueprint_id;
        let result = self.commit(backend.create_embed(blueprint_id, req)).await;
        result.map_err(|err| match err {
            SchemaError::Backend(BackendError::Cycle) => SchemaError::CyclicEmbed {
                host: blueprint_id,
                candidate,
            },
            SchemaError::Backend(BackendError::Conflict { detail }) => {
                SchemaError::PathConflict { full_path: detail }
            }
            other => other,
        })
    }

    /// Delete an embed, removing every path it materialized.
    pub async fn delete_embed(&mut self, id: EmbedId) -> Result<(), SchemaError> {
        tracing::info!(blueprint = %self.blueprint.code, embed = %id, "deleting embed");
        let backend = self.backend.clone();
        self.commit(backend.delete_embed(id)).await
    }

    /// Rename the blueprint or change its description. The code is fixed at
    /// creation time.
    pub async fn rename_blueprint(
        &mut self,
        name: &str,
        description: Option<String>,
    ) -> Result<(), SchemaError> {
        self.backend
            .update_blueprint(self.blueprint.id, name, description.clone())
            .await?;
        self.blueprint.name = name.to_string();
        self.blueprint.description = description;
        Ok(())
    }

    /// Delete the blueprint itself, gated on the collaborator's can-delete
    /// query (blocked while embedded elsewhere or referenced by post types).
    pub async fn delete_blueprint(self) -> Result<(), SchemaError> {
        if !self.backend.can_delete_blueprint(self.blueprint.id).await? {
            return Err(SchemaError::BlueprintInUse {
                blueprint: self.blueprint.id,
            });
        }
        let result = self.backend.delete_blueprint(self.blueprint.id).await;
        result.map_err(|err| match err {
            BackendError::Conflict { .. } => SchemaError::BlueprintInUse {
                blueprint: self.blueprint.id,
            },
            other => other.into(),
        })
    }

    /// Walk the global embed graph from `start` (and from this blueprint) by
    /// asking the collaborator for each blueprint's embeds.
    async fn load_embed_graph(&self, start: BlueprintId) -> Result<EmbedGraph, SchemaError> {
        let mut graph = EmbedGraph::new();
        let mut queue = vec![start, self.blueprint.id];
        let mut visited: HashSet<BlueprintId> = HashSet::new();
        while let Some(current) = queue.pop() {
            if !visited.insert(current) {
                continue;
            }
            for embed in self.backend.list_embeds(current).await? {
                graph.add_edge(embed.blueprint_id, embed.embedded_blueprint_id);
                queue.push(embed.embedded_blueprint_id);
            }
        }
        Ok(graph)
    }
}
