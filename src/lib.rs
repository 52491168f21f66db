//! # Stencil: Composable Content-Schema Engine
//!
//! Stencil models reusable, composable content schemas ("blueprints") for a
//! headless CMS: a blueprint is a named tree of typed fields ("paths") that
//! can be grouped into json objects, repeated as arrays, annotated with
//! validation rules and embedded (read-only, possibly nested) inside other
//! blueprints.
//!
//! ## Features
//!
//! - **Path trees**: immutable field forests with derived dot-joined full
//!   paths and cascading recomputation on rename/reparent
//! - **Embedding**: snapshot composition across blueprints with explicit
//!   cycle prevention over the global embed graph
//! - **Validation rules**: per-field rule bags with losslessly
//!   interconvertible simple and extended encodings
//! - **Graph projection**: deterministic layered coordinates for rendering a
//!   blueprint as a node/edge graph
//! - **Pluggable persistence**: an async collaborator trait plus a complete
//!   in-memory implementation for tests and fixtures
//!
//! ## Example: blueprint fixture
//!
//! ```yaml
//! blueprint:
//!   name: Article
//!   code: article
//!   paths:
//!     - name: title
//!       type: string
//!       required: true
//!     - name: author
//!       type: json
//!       children:
//!         - name: name
//!           type: string
//!   embeds:
//!     - blueprint: seo
//!       at: author
//! ```

// Core modules
pub mod blueprint;
pub mod error;
pub mod rules;
pub mod tree;

// Composition and projection
pub mod embed;
pub mod projector;
pub mod schema;

// Persistence collaborator and orchestration
pub mod backend;
pub mod loader;
pub mod store;

// Re-export key types
pub use blueprint::{
    is_valid_ident, suggest_code, Blueprint, BlueprintId, Cardinality, DataType, EmbedId, Path,
    PathId,
};
pub use error::{BackendError, SchemaError};
pub use rules::{
    ComparisonOp, ConditionRule, ConditionSpec, FieldComparison, RuleViolation, TableRule,
    TableSpec, ValidationRules,
};
pub use tree::{PathPatch, PathTree};

pub use embed::{check_embed_target, resolve_embed, strip_embed, with_embed, Embed, EmbedGraph};
pub use projector::{
    classify, project, FlowEdge, FlowGraph, FlowNode, FlowNodeKind, ProjectorConfig,
};
pub use schema::{flatten, BlueprintSchema, FieldSchema};

pub use backend::{Backend, BlueprintRef, CreateEmbed, CreatePath, MemoryBackend};
pub use loader::{load_path, read_specs, replay, BlueprintDef, BlueprintSpec, LoaderError};
pub use store::BlueprintStore;
