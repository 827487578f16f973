use log::{debug, info};
use std::time::Instant;

use crate::chunk::{Chunk, ChunkOptimizer};
use crate::config::Config;
use crate::emit::{Artifact, Emitter};
use crate::error::{BuildError, BuildResult};
use crate::graph_builder::{CancellationToken, GraphBuilder};
use crate::module_graph::ModuleGraph;
use crate::resolver::ModuleResolver;
use crate::transform::{TransformDispatcher, TransformRegistry};

/// Everything one build produced.
#[derive(Debug)]
pub struct BuildOutput {
    pub graph: ModuleGraph,
    pub chunks: Vec<Chunk>,
    pub artifacts: Vec<Artifact>,
}

/// Runs one build: resolve the entry, build the graph, split it into chunks
/// and render (and optionally write) the artifacts.
#[derive(Debug)]
pub struct Bundler {
    config: Config,
    registry: TransformRegistry,
    cancellation: CancellationToken,
}

impl Bundler {
    /// A bundler using the stages shipped with rivet.
    pub fn new(config: Config) -> Self {
        Self::with_transforms(config, TransformRegistry::with_builtins())
    }

    pub fn with_transforms(config: Config, registry: TransformRegistry) -> Self {
        Self {
            config,
            registry,
            cancellation: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Token that aborts a running build when cancelled.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Build without touching the output directory.
    pub fn build(&self) -> BuildResult<BuildOutput> {
        let (output, _) = self.run()?;
        Ok(output)
    }

    /// Build and write the artifacts (and manifest) to the output directory.
    pub fn bundle(&self) -> BuildResult<BuildOutput> {
        let (output, emitter) = self.run()?;
        emitter.emit(&output.artifacts)?;
        info!(
            "Wrote {} artifact(s) to {}",
            output.artifacts.len(),
            emitter.output_dir().display()
        );
        Ok(output)
    }

    fn run(&self) -> BuildResult<(BuildOutput, Emitter)> {
        let started = Instant::now();
        info!("Starting {} build", self.config.mode);

        self.config.validate().map_err(BuildError::Config)?;
        let dispatcher = TransformDispatcher::from_config(&self.config, &self.registry)
            .map_err(BuildError::Config)?;
        let emitter =
            Emitter::from_config(&self.config, &self.registry).map_err(BuildError::Config)?;
        let resolver = ModuleResolver::from_config(&self.config);
        debug!("Build context: {}", resolver.context().display());

        let graph = GraphBuilder::new(&resolver, &dispatcher)
            .parallel(self.config.parallel)
            .with_cancellation(self.cancellation.clone())
            .build(&self.config.entry)?;

        let chunks = ChunkOptimizer::from_config(&self.config).optimize(&graph);
        let artifacts = emitter.render_all(&graph, &chunks)?;

        info!(
            "Built {} module(s) into {} chunk(s) in {:.2?}",
            graph.len(),
            chunks.len(),
            started.elapsed()
        );
        Ok((
            BuildOutput {
                graph,
                chunks,
                artifacts,
            },
            emitter,
        ))
    }
}
