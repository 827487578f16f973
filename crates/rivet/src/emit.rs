use anyhow::{Context, Result};
use log::{debug, info, warn};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::chunk::{Chunk, ChunkKind};
use crate::config::{Config, EmitPolicy};
use crate::error::{BuildError, EmitError, TransformError};
use crate::module_graph::ModuleGraph;
use crate::transform::{Transform, TransformRegistry, run_pipeline};

pub const MANIFEST_FILE: &str = "manifest.json";

/// Output file name pattern with `[name]` and `[hash]` placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilenameTemplate {
    template: String,
}

impl FilenameTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn has_name(&self) -> bool {
        self.template.contains("[name]")
    }

    /// A template without `[name]` names the entry chunk verbatim; other
    /// chunks get `<name>.` in front so files cannot collide.
    pub fn render(&self, name: &str, hash: &str, kind: ChunkKind) -> String {
        let rendered = self
            .template
            .replace("[name]", name)
            .replace("[hash]", hash);
        if self.has_name() || kind == ChunkKind::Entry {
            rendered
        } else {
            format!("{name}.{rendered}")
        }
    }
}

/// First 8 hex digits of the SHA-256 of `content`.
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let mut hash = format!("{:x}", hasher.finalize());
    hash.truncate(8);
    hash
}

/// One rendered chunk, ready to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub chunk: String,
    pub kind: ChunkKind,
    pub file_name: String,
    /// Absolute destination
    pub path: PathBuf,
    pub url: String,
    /// Stable module ids in chunk order
    pub modules: Vec<String>,
    pub content: String,
}

impl Artifact {
    pub fn size(&self) -> usize {
        self.content.len()
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest<'a> {
    pub public_path: &'a str,
    pub entry: Option<&'a str>,
    pub chunks: Vec<ManifestChunk<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestChunk<'a> {
    pub name: &'a str,
    pub kind: ChunkKind,
    pub file: &'a str,
    pub url: &'a str,
    pub size: usize,
    pub modules: &'a [String],
}

/// Renders chunks into artifacts and writes them to the output directory.
#[derive(Clone)]
pub struct Emitter {
    context: PathBuf,
    output_dir: PathBuf,
    filename: FilenameTemplate,
    public_path: String,
    policy: EmitPolicy,
    write_manifest: bool,
    chunk_stages: Vec<Arc<dyn Transform>>,
}

impl std::fmt::Debug for Emitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Emitter")
            .field("output_dir", &self.output_dir)
            .field("filename", &self.filename)
            .field("public_path", &self.public_path)
            .field("policy", &self.policy)
            .field(
                "chunk_stages",
                &self
                    .chunk_stages
                    .iter()
                    .map(|stage| stage.name())
                    .collect::<Vec<_>>(),
            )
            .finish_non_exhaustive()
    }
}

impl Emitter {
    /// Production stages are looked up here and only kept in production mode.
    pub fn from_config(config: &Config, registry: &TransformRegistry) -> Result<Self> {
        let stages = registry
            .pipeline(&config.optimization.production_stages)
            .context("optimization.production-stages")?;
        let chunk_stages = if config.mode.is_production() {
            stages
        } else {
            Vec::new()
        };

        // Module ids are canonical, so stable ids must be taken against the
        // canonical context
        let context = config.context_dir();
        let context = dunce::canonicalize(&context).unwrap_or(context);

        Ok(Self {
            context,
            output_dir: config.output_dir(),
            filename: FilenameTemplate::new(config.output.filename.clone()),
            public_path: config.output.public_path.clone(),
            policy: config.output.emit_policy,
            write_manifest: config.output.manifest,
            chunk_stages,
        })
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Render one chunk: banner, then every module preceded by its id.
    pub fn render(&self, graph: &ModuleGraph, chunk: &Chunk) -> Result<Artifact, TransformError> {
        let mut content = format!("/* rivet chunk: {} */\n", chunk.name);
        let mut modules = Vec::with_capacity(chunk.len());
        for id in &chunk.modules {
            let stable_id = id.stabilize(&self.context);
            content.push_str("/* module: ");
            content.push_str(&stable_id);
            content.push_str(" */\n");
            if let Some(node) = graph.get(id) {
                content.push_str(&node.content);
                if !node.content.ends_with('\n') {
                    content.push('\n');
                }
            }
            modules.push(stable_id);
        }

        let content = if self.chunk_stages.is_empty() {
            content
        } else {
            let chunk_path = self.output_dir.join(&chunk.name);
            run_pipeline(&self.chunk_stages, &chunk_path, content)?
        };

        let file_name = self
            .filename
            .render(&chunk.name, &content_hash(&content), chunk.kind);
        debug!("Rendered chunk '{}' as {file_name}", chunk.name);

        Ok(Artifact {
            chunk: chunk.name.clone(),
            kind: chunk.kind,
            path: self.output_dir.join(&file_name),
            url: format!("{}{file_name}", self.public_path),
            file_name,
            modules,
            content,
        })
    }

    pub fn render_all(
        &self,
        graph: &ModuleGraph,
        chunks: &[Chunk],
    ) -> Result<Vec<Artifact>, TransformError> {
        chunks
            .iter()
            .map(|chunk| self.render(graph, chunk))
            .collect()
    }

    pub fn manifest<'a>(&'a self, artifacts: &'a [Artifact]) -> Manifest<'a> {
        Manifest {
            public_path: &self.public_path,
            entry: artifacts
                .iter()
                .find(|artifact| artifact.kind == ChunkKind::Entry)
                .map(|artifact| artifact.file_name.as_str()),
            chunks: artifacts
                .iter()
                .map(|artifact| ManifestChunk {
                    name: &artifact.chunk,
                    kind: artifact.kind,
                    file: &artifact.file_name,
                    url: &artifact.url,
                    size: artifact.size(),
                    modules: &artifact.modules,
                })
                .collect(),
        }
    }

    /// Write every artifact, then the manifest. Fail-fast stops at the first
    /// failed write; best-effort attempts all artifacts and skips the
    /// manifest when any of them failed.
    pub fn emit(&self, artifacts: &[Artifact]) -> Result<(), BuildError> {
        fs::create_dir_all(&self.output_dir).map_err(|source| EmitError {
            path: self.output_dir.clone(),
            source,
        })?;

        let mut failures = Vec::new();
        for artifact in artifacts {
            match fs::write(&artifact.path, &artifact.content) {
                Ok(()) => info!(
                    "Emitted {} ({} bytes)",
                    artifact.path.display(),
                    artifact.size()
                ),
                Err(source) => {
                    let error = EmitError {
                        path: artifact.path.clone(),
                        source,
                    };
                    if self.policy == EmitPolicy::FailFast {
                        return Err(error.into());
                    }
                    warn!("{error}: {}", error.source);
                    failures.push(error);
                }
            }
        }

        if !failures.is_empty() {
            return Err(BuildError::Emit(failures));
        }

        if self.write_manifest {
            let path = self.output_dir.join(MANIFEST_FILE);
            let json = serde_json::to_string_pretty(&self.manifest(artifacts))
                .map_err(|err| EmitError {
                    path: path.clone(),
                    source: err.into(),
                })?;
            fs::write(&path, json).map_err(|source| EmitError {
                path: path.clone(),
                source,
            })?;
            debug!("Wrote manifest to {}", path.display());
        }
        Ok(())
    }
}
