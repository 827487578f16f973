use anyhow::{Context, Result, anyhow, bail};
use cow_utils::CowUtils;
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use sugar_path::SugarPath;

use crate::combine::{Combine, impl_combine_or};
use crate::dirs::discover_config_files;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Development,
    Production,
}

impl Mode {
    pub fn is_production(self) -> bool {
        self == Self::Production
    }
}

impl FromStr for Mode {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().cow_to_ascii_lowercase().as_ref() {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            other => Err(anyhow!(
                "Invalid mode '{other}'. Supported modes: development, production"
            )),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Development => "development",
            Self::Production => "production",
        })
    }
}

/// What the emitter does after an artifact fails to write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EmitPolicy {
    /// Stop at the first failure.
    #[default]
    FailFast,
    /// Attempt every artifact and report all failures together.
    BestEffort,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Config {
    /// Entry specifier, resolved against `context`
    pub entry: String,

    /// Base directory for the entry, rule includes and the output path
    pub context: PathBuf,

    pub mode: Mode,

    /// Process each level of the module graph on the rayon pool
    pub parallel: bool,

    /// Bare specifiers (and their sub paths) left out of the graph
    pub externals: IndexSet<String>,

    pub output: OutputConfig,
    pub resolve: ResolveConfig,
    pub rules: Vec<RuleConfig>,
    pub optimization: OptimizationConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            entry: "./src".to_owned(),
            context: PathBuf::from("."),
            mode: Mode::default(),
            parallel: true,
            externals: IndexSet::new(),
            output: OutputConfig::default(),
            resolve: ResolveConfig::default(),
            rules: Vec::new(),
            optimization: OptimizationConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct OutputConfig {
    pub path: PathBuf,
    /// Supports `[name]` and `[hash]` placeholders
    pub filename: String,
    pub public_path: String,
    /// Entry chunk name; the entry file stem when unset
    pub entry_name: Option<String>,
    pub emit_policy: EmitPolicy,
    pub manifest: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("builds"),
            filename: "[name].js".to_owned(),
            public_path: "builds/".to_owned(),
            entry_name: None,
            emit_policy: EmitPolicy::default(),
            manifest: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ResolveConfig {
    /// Tried in order when the exact file does not exist
    pub extensions: Vec<String>,
    pub index_files: Vec<String>,
    /// Directory names searched for bare specifiers
    pub modules: Vec<String>,
}

impl Default for ResolveConfig {
    fn default() -> Self {
        Self {
            extensions: vec![".js".to_owned(), ".json".to_owned()],
            index_files: vec!["index".to_owned()],
            modules: vec!["node_modules".to_owned()],
        }
    }
}

/// One `[[rules]]` table: which modules to match and the stages to run on them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct RuleConfig {
    /// Regular expression matched against the module's forward-slash path
    pub test: Option<String>,
    /// File extensions, with or without the leading dot
    pub extensions: Vec<String>,
    /// Directories, relative to the context, the rule is restricted to
    pub include: Vec<PathBuf>,
    #[serde(rename = "use")]
    pub pipeline: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct OptimizationConfig {
    /// Roots that must share a module before it moves to the vendor chunk
    pub min_chunks: usize,
    /// Chunks below this many bytes are merged in production mode
    pub min_chunk_size: usize,
    pub vendor_name: String,
    /// Stages run over every rendered chunk in production mode
    pub production_stages: Vec<String>,
}

impl Default for OptimizationConfig {
    fn default() -> Self {
        Self {
            min_chunks: 2,
            min_chunk_size: 51200,
            vendor_name: "vendor".to_owned(),
            production_stages: vec!["trim-whitespace".to_owned()],
        }
    }
}

/// One configuration source (a `rivet.toml`, the environment, the command
/// line). Unset keys are `None` so a higher layer can set any value,
/// defaults included.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ConfigLayer {
    pub entry: Option<String>,
    pub context: Option<PathBuf>,
    pub mode: Option<Mode>,
    pub parallel: Option<bool>,
    pub externals: Option<IndexSet<String>>,
    pub output: OutputLayer,
    pub resolve: ResolveLayer,
    pub rules: Option<Vec<RuleConfig>>,
    pub optimization: OptimizationLayer,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct OutputLayer {
    pub path: Option<PathBuf>,
    pub filename: Option<String>,
    pub public_path: Option<String>,
    pub entry_name: Option<String>,
    pub emit_policy: Option<EmitPolicy>,
    pub manifest: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ResolveLayer {
    pub extensions: Option<Vec<String>>,
    pub index_files: Option<Vec<String>>,
    pub modules: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct OptimizationLayer {
    pub min_chunks: Option<usize>,
    pub min_chunk_size: Option<usize>,
    pub vendor_name: Option<String>,
    pub production_stages: Option<Vec<String>>,
}

impl_combine_or!(Mode);
impl_combine_or!(EmitPolicy);
// Rule tables are ordered; a layer that declares any replaces them all
impl_combine_or!(Vec<RuleConfig>);

impl Combine for ConfigLayer {
    fn combine(self, other: Self) -> Self {
        Self {
            entry: self.entry.combine(other.entry),
            context: self.context.combine(other.context),
            mode: self.mode.combine(other.mode),
            parallel: self.parallel.combine(other.parallel),
            externals: self.externals.combine(other.externals),
            output: self.output.combine(other.output),
            resolve: self.resolve.combine(other.resolve),
            rules: self.rules.combine(other.rules),
            optimization: self.optimization.combine(other.optimization),
        }
    }
}

impl Combine for OutputLayer {
    fn combine(self, other: Self) -> Self {
        Self {
            path: self.path.combine(other.path),
            filename: self.filename.combine(other.filename),
            public_path: self.public_path.combine(other.public_path),
            entry_name: self.entry_name.combine(other.entry_name),
            emit_policy: self.emit_policy.combine(other.emit_policy),
            manifest: self.manifest.combine(other.manifest),
        }
    }
}

impl Combine for ResolveLayer {
    fn combine(self, other: Self) -> Self {
        Self {
            extensions: self.extensions.combine(other.extensions),
            index_files: self.index_files.combine(other.index_files),
            modules: self.modules.combine(other.modules),
        }
    }
}

impl Combine for OptimizationLayer {
    fn combine(self, other: Self) -> Self {
        Self {
            min_chunks: self.min_chunks.combine(other.min_chunks),
            min_chunk_size: self.min_chunk_size.combine(other.min_chunk_size),
            vendor_name: self.vendor_name.combine(other.vendor_name),
            production_stages: self.production_stages.combine(other.production_stages),
        }
    }
}

impl ConfigLayer {
    /// Parse one `rivet.toml`.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Take a relative (or missing) `context` from `dir` instead of the
    /// working directory.
    #[must_use]
    pub fn anchored_to(mut self, dir: &Path) -> Self {
        let context = self.context.unwrap_or_else(|| PathBuf::from("."));
        self.context = Some(context.absolutize_with(dir));
        self
    }

    /// Fill every unset key with its default.
    pub fn resolve(self) -> Config {
        let defaults = Config::default();
        Config {
            entry: self.entry.unwrap_or(defaults.entry),
            context: self.context.unwrap_or(defaults.context),
            mode: self.mode.unwrap_or(defaults.mode),
            parallel: self.parallel.unwrap_or(defaults.parallel),
            externals: self.externals.unwrap_or(defaults.externals),
            output: OutputConfig {
                path: self.output.path.unwrap_or(defaults.output.path),
                filename: self.output.filename.unwrap_or(defaults.output.filename),
                public_path: self.output.public_path.unwrap_or(defaults.output.public_path),
                entry_name: self.output.entry_name.or(defaults.output.entry_name),
                emit_policy: self.output.emit_policy.unwrap_or(defaults.output.emit_policy),
                manifest: self.output.manifest.unwrap_or(defaults.output.manifest),
            },
            resolve: ResolveConfig {
                extensions: self.resolve.extensions.unwrap_or(defaults.resolve.extensions),
                index_files: self.resolve.index_files.unwrap_or(defaults.resolve.index_files),
                modules: self.resolve.modules.unwrap_or(defaults.resolve.modules),
            },
            rules: self.rules.unwrap_or(defaults.rules),
            optimization: OptimizationConfig {
                min_chunks: self
                    .optimization
                    .min_chunks
                    .unwrap_or(defaults.optimization.min_chunks),
                min_chunk_size: self
                    .optimization
                    .min_chunk_size
                    .unwrap_or(defaults.optimization.min_chunk_size),
                vendor_name: self
                    .optimization
                    .vendor_name
                    .unwrap_or(defaults.optimization.vendor_name),
                production_stages: self
                    .optimization
                    .production_stages
                    .unwrap_or(defaults.optimization.production_stages),
            },
        }
    }
}

/// Individual settings that override whatever the config files say. Filled
/// from `RIVET_*` environment variables or from command line flags.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigOverrides {
    pub entry: Option<String>,
    pub mode: Option<Mode>,
    pub output_path: Option<PathBuf>,
    pub filename: Option<String>,
    pub public_path: Option<String>,
    pub min_chunks: Option<usize>,
    pub min_chunk_size: Option<usize>,
    pub externals: Option<IndexSet<String>>,
    pub emit_policy: Option<EmitPolicy>,
}

impl ConfigOverrides {
    /// Load overrides from environment variables with RIVET_ prefix
    pub fn from_env() -> Result<Self> {
        let mut overrides = Self::default();

        if let Some(entry) = non_empty_var("RIVET_ENTRY") {
            overrides.entry = Some(entry);
        }

        if let Some(mode) = non_empty_var("RIVET_MODE") {
            overrides.mode = Some(mode.parse().context("Invalid RIVET_MODE")?);
        }

        if let Some(path) = non_empty_var("RIVET_OUTPUT_PATH") {
            overrides.output_path = Some(PathBuf::from(path));
        }

        if let Some(filename) = non_empty_var("RIVET_OUTPUT_FILENAME") {
            overrides.filename = Some(filename);
        }

        // An empty public path is meaningful, so only absence is skipped
        if let Ok(public_path) = env::var("RIVET_PUBLIC_PATH") {
            overrides.public_path = Some(public_path);
        }

        if let Some(min_chunks) = non_empty_var("RIVET_MIN_CHUNKS") {
            overrides.min_chunks = Some(
                min_chunks
                    .trim()
                    .parse()
                    .with_context(|| format!("Invalid RIVET_MIN_CHUNKS: {min_chunks}"))?,
            );
        }

        if let Some(min_chunk_size) = non_empty_var("RIVET_MIN_CHUNK_SIZE") {
            overrides.min_chunk_size = Some(
                min_chunk_size
                    .trim()
                    .parse()
                    .with_context(|| format!("Invalid RIVET_MIN_CHUNK_SIZE: {min_chunk_size}"))?,
            );
        }

        // RIVET_EXTERNALS - comma-separated list of bare specifiers
        if let Some(externals) = non_empty_var("RIVET_EXTERNALS") {
            let externals: IndexSet<String> = externals
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(ToOwned::to_owned)
                .collect();
            if !externals.is_empty() {
                overrides.externals = Some(externals);
            }
        }

        Ok(overrides)
    }

    /// The overrides as a configuration layer.
    pub fn into_layer(self) -> ConfigLayer {
        ConfigLayer {
            entry: self.entry,
            mode: self.mode,
            externals: self.externals,
            output: OutputLayer {
                path: self.output_path,
                filename: self.filename,
                public_path: self.public_path,
                emit_policy: self.emit_policy,
                ..OutputLayer::default()
            },
            optimization: OptimizationLayer {
                min_chunks: self.min_chunks,
                min_chunk_size: self.min_chunk_size,
                ..OptimizationLayer::default()
            },
            ..ConfigLayer::default()
        }
    }

    /// Apply the overrides on top of `config`. Externals are merged with the
    /// overriding names placed first; everything else is replaced.
    pub fn apply_to(self, mut config: Config) -> Config {
        if let Some(entry) = self.entry {
            config.entry = entry;
        }
        if let Some(mode) = self.mode {
            config.mode = mode;
        }
        if let Some(path) = self.output_path {
            config.output.path = path;
        }
        if let Some(filename) = self.filename {
            config.output.filename = filename;
        }
        if let Some(public_path) = self.public_path {
            config.output.public_path = public_path;
        }
        if let Some(min_chunks) = self.min_chunks {
            config.optimization.min_chunks = min_chunks;
        }
        if let Some(min_chunk_size) = self.min_chunk_size {
            config.optimization.min_chunk_size = min_chunk_size;
        }
        if let Some(emit_policy) = self.emit_policy {
            config.output.emit_policy = emit_policy;
        }
        config.externals = self
            .externals
            .combine(Some(std::mem::take(&mut config.externals)))
            .unwrap_or_default();
        config
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

impl Config {
    /// Load a single config file from a path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Config> {
        Ok(ConfigLayer::load_from_file(path)?.resolve())
    }

    /// Load configuration with hierarchical precedence:
    /// 1. CLI-provided config path (highest precedence)
    /// 2. Environment variables (RIVET_*)
    /// 3. Project config (nearest rivet.toml from the current directory up)
    /// 4. User config (~/.config/rivet/rivet.toml)
    /// 5. System configs (XDG_CONFIG_DIRS, /etc/rivet/rivet.toml or equivalent)
    /// 6. Default values (lowest precedence)
    ///
    /// A relative `context` in the project file is taken from that file's
    /// directory. Command line flags are applied by the caller on top of the
    /// result.
    pub fn load(cli_config_path: Option<&Path>) -> Result<Self> {
        let cwd = env::current_dir().context("Failed to read the current directory")?;
        let mut layer = ConfigLayer::default();

        for file in discover_config_files(&cwd) {
            log::debug!(
                "Loading {:?} config from: {}",
                file.scope,
                file.path.display()
            );
            let mut file_layer = ConfigLayer::load_from_file(&file.path).with_context(|| {
                format!(
                    "Failed to load {:?} config from {}",
                    file.scope,
                    file.path.display()
                )
            })?;
            if let Some(anchor) = file.anchor() {
                file_layer = file_layer.anchored_to(anchor);
            }
            layer = file_layer.combine(layer);
        }

        layer = ConfigOverrides::from_env()?.into_layer().combine(layer);

        if let Some(cli_config_path) = cli_config_path {
            log::debug!("Loading CLI config from: {}", cli_config_path.display());
            let cli_layer = ConfigLayer::load_from_file(cli_config_path).with_context(|| {
                format!(
                    "Failed to load CLI config from {}",
                    cli_config_path.display()
                )
            })?;
            layer = cli_layer.combine(layer);
        }

        Ok(layer.resolve())
    }

    /// Structural checks that need no filesystem access. Rule regexes and
    /// stage names are checked when the transform dispatcher is built.
    pub fn validate(&self) -> Result<()> {
        if self.entry.trim().is_empty() {
            bail!("entry must not be empty");
        }
        if self.optimization.min_chunks == 0 {
            bail!("optimization.min-chunks must be at least 1");
        }
        if self.optimization.vendor_name.trim().is_empty() {
            bail!("optimization.vendor-name must not be empty");
        }
        if self.output.filename.trim().is_empty() {
            bail!("output.filename must not be empty");
        }
        for (index, rule) in self.rules.iter().enumerate() {
            match (&rule.test, rule.extensions.is_empty()) {
                (Some(_), false) => {
                    bail!("rules[{index}] sets both `test` and `extensions`; pick one")
                }
                (None, true) => bail!("rules[{index}] needs either `test` or `extensions`"),
                _ => {}
            }
            if rule.pipeline.is_empty() {
                bail!("rules[{index}] has an empty `use` list");
            }
        }
        Ok(())
    }

    /// Absolute build context directory.
    pub fn context_dir(&self) -> PathBuf {
        self.context.absolutize()
    }

    /// Absolute output directory.
    pub fn output_dir(&self) -> PathBuf {
        self.output.path.absolutize_with(self.context_dir())
    }
}
