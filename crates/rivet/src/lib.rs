pub mod bundler;
pub mod chunk;
pub mod combine;
pub mod config;
pub mod dirs;
pub mod emit;
pub mod error;
pub mod graph_builder;
pub mod imports;
pub mod module_graph;
pub mod resolver;
pub mod transform;
pub mod util;

pub use bundler::{BuildOutput, Bundler};
pub use config::Config;
pub use error::{BuildError, BuildResult};
