use log::{debug, info, trace, warn};
use rayon::prelude::*;
use rustc_hash::{FxHashMap, FxHashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::{GraphError, GraphErrorKind};
use crate::imports::{extract_imports, is_stylesheet};
use crate::module_graph::{ModuleGraph, ModuleId, ModuleNode};
use crate::resolver::{ModuleResolver, Resolution};
use crate::transform::TransformDispatcher;

/// Cooperative cancellation shared between a build and its controller.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Discovery bookkeeping. One lock guards both sets so claiming a module
/// and recording a finished node never interleave.
#[derive(Debug, Default)]
struct BuildState {
    visited: FxHashSet<ModuleId>,
    nodes: Vec<ModuleNode>,
}

/// Result of processing one module.
#[derive(Debug)]
struct Processed {
    dependencies: Vec<ModuleId>,
    /// Dependencies this module was first to reach
    claimed: Vec<ModuleId>,
}

/// Discovers the module graph breadth first from an entry module.
#[derive(Debug)]
pub struct GraphBuilder<'a> {
    resolver: &'a ModuleResolver,
    dispatcher: &'a TransformDispatcher,
    parallel: bool,
    cancellation: CancellationToken,
}

impl<'a> GraphBuilder<'a> {
    pub fn new(resolver: &'a ModuleResolver, dispatcher: &'a TransformDispatcher) -> Self {
        Self {
            resolver,
            dispatcher,
            parallel: true,
            cancellation: CancellationToken::new(),
        }
    }

    /// Process the modules of one level on the rayon pool.
    #[must_use]
    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    #[must_use]
    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }

    /// Resolve `entry` against the build context and build its graph.
    pub fn build(&self, entry: &str) -> Result<ModuleGraph, GraphError> {
        let entry = self
            .resolver
            .resolve_entry(entry)
            .map_err(|err| GraphError::new(err, Vec::new()))?;
        self.build_from(entry)
    }

    pub fn build_from(&self, entry: ModuleId) -> Result<ModuleGraph, GraphError> {
        info!("Building module graph from {entry}");

        let state = Mutex::new(BuildState::default());
        lock(&state).visited.insert(entry.clone());

        // First importer of each module, for error chains
        let mut parents: FxHashMap<ModuleId, ModuleId> = FxHashMap::default();
        let mut frontier = vec![entry.clone()];
        let mut level = 0usize;

        while !frontier.is_empty() {
            if self.cancellation.is_cancelled() {
                return Err(GraphError::new(GraphErrorKind::Cancelled, Vec::new()));
            }
            debug!("Level {level}: processing {} module(s)", frontier.len());

            let results: Vec<Result<Processed, GraphErrorKind>> = if self.parallel {
                frontier
                    .par_iter()
                    .map(|id| self.process_module(id, &state))
                    .collect()
            } else {
                frontier
                    .iter()
                    .map(|id| self.process_module(id, &state))
                    .collect()
            };

            let mut processed: Vec<Processed> = Vec::with_capacity(results.len());
            for (id, result) in frontier.iter().zip(results) {
                match result {
                    Ok(module) => processed.push(module),
                    Err(kind) => {
                        let chain = import_chain(&parents, &entry, id);
                        return Err(GraphError::new(kind, chain));
                    }
                }
            }

            // Which importer claimed a module depends on scheduling; rebuild
            // the next level from the frontier order instead.
            let mut newly_claimed: FxHashSet<ModuleId> = processed
                .iter()
                .flat_map(|module| module.claimed.iter().cloned())
                .collect();
            let mut next = Vec::with_capacity(newly_claimed.len());
            for (id, module) in frontier.iter().zip(&processed) {
                for dependency in &module.dependencies {
                    if newly_claimed.remove(dependency) {
                        parents.insert(dependency.clone(), id.clone());
                        next.push(dependency.clone());
                    }
                }
            }

            frontier = next;
            level += 1;
        }

        let nodes = std::mem::take(&mut lock(&state).nodes);
        let graph = ModuleGraph::new(entry, nodes)?;
        info!(
            "Module graph complete: {} module(s) in {level} level(s)",
            graph.len()
        );

        for cycle in graph.cycles() {
            warn!(
                "Import cycle: {}",
                cycle
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(" -> ")
            );
        }

        Ok(graph)
    }

    /// Read, transform and resolve one module, record it, and claim its
    /// unvisited dependencies.
    fn process_module(
        &self,
        id: &ModuleId,
        state: &Mutex<BuildState>,
    ) -> Result<Processed, GraphErrorKind> {
        self.check_cancelled()?;
        let raw = std::fs::read(id.as_path()).map_err(|source| GraphErrorKind::Read {
            path: id.as_path().to_path_buf(),
            source,
        })?;

        self.check_cancelled()?;
        let content = self.dispatcher.transform(id.as_path(), raw)?;

        self.check_cancelled()?;
        // Stylesheet `@import`s survive being wrapped in a string; nothing else does
        let path = id.as_path();
        let specifiers = if self.dispatcher.wraps_source(path) && !is_stylesheet(path) {
            trace!("{id} is a literal value, skipping the import scan");
            Vec::new()
        } else {
            extract_imports(path, &content)
        };
        let mut dependencies: Vec<ModuleId> = Vec::with_capacity(specifiers.len());
        let mut externals = Vec::new();
        for specifier in specifiers {
            match self.resolver.resolve(&specifier, Some(id))? {
                Resolution::Module(dependency) => {
                    if !dependencies.contains(&dependency) {
                        dependencies.push(dependency);
                    }
                }
                Resolution::External(name) => externals.push(name),
            }
        }
        debug!(
            "{id}: {} dependencies, {} external(s)",
            dependencies.len(),
            externals.len()
        );

        self.check_cancelled()?;
        let mut state = lock(state);
        let claimed = dependencies
            .iter()
            .filter(|dependency| state.visited.insert((*dependency).clone()))
            .cloned()
            .collect();
        state.nodes.push(ModuleNode {
            id: id.clone(),
            content,
            dependencies: dependencies.clone(),
            externals,
        });
        Ok(Processed {
            dependencies,
            claimed,
        })
    }

    fn check_cancelled(&self) -> Result<(), GraphErrorKind> {
        if self.cancellation.is_cancelled() {
            Err(GraphErrorKind::Cancelled)
        } else {
            Ok(())
        }
    }
}

fn lock(state: &Mutex<BuildState>) -> MutexGuard<'_, BuildState> {
    // A panicking worker already fails the build; the state itself stays usable
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Entry-to-module path following first importers.
fn import_chain(
    parents: &FxHashMap<ModuleId, ModuleId>,
    entry: &ModuleId,
    failing: &ModuleId,
) -> Vec<PathBuf> {
    let mut chain = vec![failing.as_path().to_path_buf()];
    let mut current = failing;
    while current != entry {
        let Some(parent) = parents.get(current) else {
            break;
        };
        chain.push(parent.as_path().to_path_buf());
        current = parent;
    }
    chain.reverse();
    chain
}
