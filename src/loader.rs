//! Blueprint fixture loader.
//!
//! Loads blueprint definitions from YAML (one blueprint per file, or a
//! directory of files), orders them so embed sources are created before
//! their hosts (Kahn's algorithm; a cycle among fixtures is an error) and
//! replays them through a [`BlueprintStore`] so every local and server-side
//! invariant is exercised on the way in.
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

use serde::Deserialize;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::fs;
use std::path::Path as FsPath;
use std::sync::Arc;

use crate::backend::{Backend, CreateEmbed, CreatePath};
use crate::blueprint::{suggest_code, Blueprint, Cardinality, DataType};
use crate::error::SchemaError;
use crate::rules::ValidationRules;
use crate::store::BlueprintStore;

#[derive(Debug)]
pub enum LoaderError {
    Io(std::io::Error),
    Yaml(serde_yaml::Error),
    DuplicateCode(String),
    UnknownEmbedSource { blueprint: String, embed: String },
    UnknownHostPath { blueprint: String, path: String },
    /// Fixture embeds form a cycle among these codes.
    EmbedCycle { remaining: Vec<String> },
    Schema(SchemaError),
}

impl fmt::Display for LoaderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoaderError::Io(e) => write!(f, "io error: {}", e),
            LoaderError::Yaml(e) => write!(f, "yaml error: {}", e),
            LoaderError::DuplicateCode(code) => {
                write!(f, "duplicate blueprint code '{}'", code)
            }
            LoaderError::UnknownEmbedSource { blueprint, embed } => {
                write!(f, "blueprint '{}' embeds unknown blueprint '{}'", blueprint, embed)
            }
            LoaderError::UnknownHostPath { blueprint, path } => {
                write!(f, "blueprint '{}' embeds at unknown path '{}'", blueprint, path)
            }
            LoaderError::EmbedCycle { remaining } => {
                write!(f, "embed cycle involving blueprints: {:?}", remaining)
            }
            LoaderError::Schema(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for LoaderError {}

impl From<std::io::Error> for LoaderError {
    fn from(err: std::io::Error) -> Self {
        LoaderError::Io(err)
    }
}

impl From<serde_yaml::Error> for LoaderError {
    fn from(err: serde_yaml::Error) -> Self {
        LoaderError::Yaml(err)
    }
}

impl From<SchemaError> for LoaderError {
    fn from(err: SchemaError) -> Self {
        LoaderError::Schema(err)
    }
}

/// Wrapper for the blueprint YAML structure.
#[derive(Debug, Clone, Deserialize)]
pub struct BlueprintSpec {
    pub blueprint: BlueprintDef,
}

/// One blueprint fixture.
#[derive(Debug, Clone, Deserialize)]
pub struct BlueprintDef {
    pub name: String,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub paths: Vec<PathDef>,
    #[serde(default)]
    pub embeds: Vec<EmbedDef>,
}

impl BlueprintDef {
    /// Declared code, or one suggested from the display name.
    pub fn effective_code(&self) -> String {
        self.code.clone().unwrap_or_else(|| suggest_code(&self.name))
    }
}

/// One path declaration, possibly nested.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PathDef {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: DataType,
    /// Shorthand for many-cardinality.
    #[serde(default)]
    pub many: bool,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub indexed: bool,
    #[serde(default)]
    pub rules: Option<ValidationRules>,
    #[serde(default)]
    pub children: Vec<PathDef>,
}

/// Embed declaration referencing another fixture (or existing blueprint) by
/// code; `at` names the host json path by full path.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EmbedDef {
    pub blueprint: String,
    #[serde(default)]
    pub at: Option<String>,
}

/// Read one fixture file or every `*.yaml`/`*.yml` in a directory (sorted by
/// file name so replays are deterministic).
pub fn read_specs(path: &FsPath) -> Result<Vec<BlueprintDef>, LoaderError> {
    let mut files = Vec::new();
    if path.is_dir() {
        for entry in fs::read_dir(path)? {
            let entry = entry?.path();
            let ext = entry.extension().and_then(|e| e.to_str());
            if matches!(ext, Some("yaml") | Some("yml")) {
                files.push(entry);
            }
        }
        files.sort();
    } else {
        files.push(path.to_path_buf());
    }

    let mut defs = Vec::new();
    for file in files {
        let contents = fs::read_to_string(&file)?;
        let spec: BlueprintSpec = serde_yaml::from_str(&contents)?;
        defs.push(spec.blueprint);
    }
    Ok(defs)
}

/// Order fixtures so every embed source is replayed before its host.
/// Kahn's algorithm over the fixture-level embed graph.
fn embed_order(defs: &[BlueprintDef]) -> Result<Vec<usize>, LoaderError> {
    let code_to_index: HashMap<String, usize> = defs
        .iter()
        .enumerate()
        .map(|(i, d)| (d.effective_code(), i))
        .collect();
    if code_to_index.len() != defs.len() {
        let mut seen = HashMap::new();
        for def in defs {
            let code = def.effective_code();
            if seen.insert(code.clone(), ()).is_some() {
                return Err(LoaderError::DuplicateCode(code));
            }
        }
    }

    let mut in_degree = vec![0usize; defs.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); defs.len()];
    for (host, def) in defs.iter().enumerate() {
        for embed in &def.embeds {
            // Embeds of pre-existing backend blueprints are resolved at
            // replay time and carry no ordering constraint here.
            if let Some(&source) = code_to_index.get(&embed.blueprint) {
                in_degree[host] += 1;
                dependents[source].push(host);
            }
        }
    }

    let mut queue: VecDeque<usize> = (0..defs.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(defs.len());
    while let Some(current) = queue.pop_front() {
        order.push(current);
        for &dependent in &dependents[current] {
            in_degree[dependent] -= 1;
            if in_degree[dependent] == 0 {
                queue.push_back(dependent);
            }
        }
    }

    if order.len() != defs.len() {
        let remaining = (0..defs.len())
            .filter(|i| !order.contains(i))
            .map(|i| defs[i].effective_code())
            .collect();
        return Err(LoaderError::EmbedCycle { remaining });
    }
    Ok(order)
}

/// Preorder flattening of nested path declarations, paired with the full
/// path of each declaration's parent.
fn flatten_defs<'a>(defs: &'a [PathDef]) -> Vec<(Option<String>, &'a PathDef)> {
    fn walk<'a>(
        def: &'a PathDef,
        parent: Option<&str>,
        out: &mut Vec<(Option<String>, &'a PathDef)>,
    ) {
        out.push((parent.map(str::to_string), def));
        let own = match parent {
            Some(p) => format!("{}.{}", p, def.name),
            None => def.name.clone(),
        };
        for child in &def.children {
            walk(child, Some(&own), out);
        }
    }
    let mut out = Vec::new();
    for def in defs {
        walk(def, None, &mut out);
    }
    out
}

/// Replay fixtures into a backend through the store pipeline.
pub async fn replay(
    backend: Arc<dyn Backend>,
    defs: Vec<BlueprintDef>,
) -> Result<Vec<Blueprint>, LoaderError> {
    let order = embed_order(&defs)?;
    let mut created = Vec::new();
    let mut by_code: HashMap<String, Blueprint> = HashMap::new();
    for blueprint in backend.list_blueprints().await.map_err(SchemaError::from)? {
        by_code.insert(blueprint.code.clone(), blueprint);
    }

    for index in order {
        let def = &defs[index];
        let code = def.effective_code();
        tracing::info!(code = %code, "replaying blueprint fixture");
        let blueprint = backend
            .create_blueprint(&def.name, &code, def.description.clone())
            .await
            .map_err(SchemaError::from)?;
        let mut store = BlueprintStore::open(backend.clone(), blueprint.clone()).await?;

        for (parent_path, path_def) in flatten_defs(&def.paths) {
            let parent_id = match &parent_path {
                None => None,
                Some(p) => Some(
                    store
                        .tree()
                        .find_by_full_path(p)
                        .ok_or_else(|| LoaderError::UnknownHostPath {
                            blueprint: code.clone(),
                            path: p.clone(),
                        })?
                        .id,
                ),
            };
            store
                .create_path(CreatePath {
                    parent_id,
                    name: path_def.name.clone(),
                    data_type: path_def.data_type,
                    cardinality: if path_def.many {
                        Cardinality::Many
                    } else {
                        Cardinality::One
                    },
                    is_indexed: path_def.indexed,
                    is_required: path_def.required,
                    validation_rules: path_def.rules.clone(),
                })
                .await?;
        }

        for embed_def in &def.embeds {
            let source = by_code.get(&embed_def.blueprint).ok_or_else(|| {
                LoaderError::UnknownEmbedSource {
                    blueprint: code.clone(),
                    embed: embed_def.blueprint.clone(),
                }
            })?;
            let host_path_id = match &embed_def.at {
                None => None,
                Some(at) => Some(
                    store
                        .tree()
                        .find_by_full_path(at)
                        .ok_or_else(|| LoaderError::UnknownHostPath {
                            blueprint: code.clone(),
                            path: at.clone(),
                        })?
                        .id,
                ),
            };
            store
                .create_embed(CreateEmbed {
                    embedded_blueprint_id: source.id,
                    host_path_id,
                })
                .await?;
        }

        by_code.insert(code, blueprint.clone());
        created.push(blueprint);
    }
    Ok(created)
}

/// Read and replay in one step.
pub async fn load_path(
    backend: Arc<dyn Backend>,
    path: &FsPath,
) -> Result<Vec<Blueprint>, LoaderError> {
    let defs = read_specs(path)?;
    replay(backend, defs).await
}
