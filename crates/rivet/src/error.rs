use std::fmt::Write as _;
use std::io;
use std::path::{Path, PathBuf};

/// Failure to map an import specifier to a file.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("cannot resolve '{specifier}' from {}", display_importer(.importer))]
    NotFound {
        specifier: String,
        importer: Option<PathBuf>,
    },

    #[error("failed to canonicalize {}", .path.display())]
    Canonicalize {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

fn display_importer(importer: &Option<PathBuf>) -> String {
    importer.as_ref().map_or_else(
        || "the build context".to_owned(),
        |path| path.display().to_string(),
    )
}

/// A transform stage failed for one module (or rendered chunk). The whole
/// transform is abandoned.
#[derive(Debug, thiserror::Error)]
#[error("transform stage '{stage}' failed for {}: {cause:#}", .module.display())]
pub struct TransformError {
    pub module: PathBuf,
    pub stage: String,
    pub cause: anyhow::Error,
}

#[derive(Debug, thiserror::Error)]
pub enum GraphErrorKind {
    #[error(transparent)]
    Resolution(#[from] ResolveError),

    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error("failed to read {}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("module {} depends on {} which is missing from the graph", .module.display(), .dependency.display())]
    MissingDependency { module: PathBuf, dependency: PathBuf },

    #[error("entry module {} is missing from the graph", .0.display())]
    MissingEntry(PathBuf),

    #[error("module {} was added to the graph twice", .0.display())]
    DuplicateModule(PathBuf),

    #[error("build cancelled")]
    Cancelled,
}

/// Fatal graph construction failure with the import chain that led to it.
#[derive(Debug, thiserror::Error)]
#[error("{kind}\n  import chain: {}", display_chain(.chain))]
pub struct GraphError {
    /// Modules from the entry to the failing module, inclusive.
    pub chain: Vec<PathBuf>,
    pub kind: GraphErrorKind,
}

impl GraphError {
    pub fn new(kind: impl Into<GraphErrorKind>, chain: Vec<PathBuf>) -> Self {
        Self {
            chain,
            kind: kind.into(),
        }
    }

    /// The module the failure was reported for, if any was being processed.
    pub fn failing_module(&self) -> Option<&Path> {
        self.chain.last().map(PathBuf::as_path)
    }
}

fn display_chain(chain: &[PathBuf]) -> String {
    if chain.is_empty() {
        return "<none>".to_owned();
    }
    chain
        .iter()
        .map(|path| path.display().to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}

#[derive(Debug, thiserror::Error)]
#[error("failed to write {}", .path.display())]
pub struct EmitError {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("invalid configuration: {0:#}")]
    Config(anyhow::Error),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error("{}", display_emit_errors(.0))]
    Emit(Vec<EmitError>),
}

fn display_emit_errors(errors: &[EmitError]) -> String {
    let mut message = format!("{} artifact(s) failed to emit", errors.len());
    for error in errors {
        let _ = write!(message, "\n  {}: {}", error.path.display(), error.source);
    }
    message
}

impl From<EmitError> for BuildError {
    fn from(error: EmitError) -> Self {
        Self::Emit(vec![error])
    }
}

pub type BuildResult<T> = Result<T, BuildError>;
