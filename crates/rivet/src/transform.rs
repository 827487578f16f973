use anyhow::{Context, Result, anyhow};
use indexmap::IndexMap;
use log::{debug, trace};
use regex::Regex;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use sugar_path::SugarPath;

use crate::config::{Config, RuleConfig};
use crate::error::TransformError;
use crate::util::{js_string_literal, normalize_line_endings};

/// One stage of a transform pipeline.
///
/// Stages receive the output of the previous stage (or the raw module text)
/// and return the replacement text. They must not keep state between calls:
/// modules of one graph level are transformed concurrently.
pub trait Transform: Send + Sync {
    /// Name rules refer to the stage by.
    fn name(&self) -> &str;

    fn transform(&self, path: &Path, source: String) -> Result<String>;

    /// Whether the output holds the input only as a literal value (a string
    /// or a JSON document), so nothing in it is code.
    fn wraps_source(&self) -> bool {
        false
    }
}

/// The stages a build may use, by name.
#[derive(Clone, Default)]
pub struct TransformRegistry {
    stages: IndexMap<String, Arc<dyn Transform>>,
}

impl fmt::Debug for TransformRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.stages.keys()).finish()
    }
}

impl TransformRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every stage shipped with rivet.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry
            .register(Raw)
            .register(LineEndings)
            .register(JsonModule)
            .register(MarkupModule)
            .register(StylesheetModule)
            .register(StyleInjection)
            .register(TrimWhitespace);
        registry
    }

    /// Add a stage, replacing any stage registered under the same name.
    pub fn register(&mut self, stage: impl Transform + 'static) -> &mut Self {
        let name = stage.name().to_owned();
        if self.stages.insert(name.clone(), Arc::new(stage)).is_some() {
            debug!("Replaced transform stage '{name}'");
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Transform>> {
        self.stages.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.stages.keys().map(String::as_str)
    }

    /// Look up every named stage, failing on the first unknown name.
    pub fn pipeline(&self, names: &[String]) -> Result<Vec<Arc<dyn Transform>>> {
        names
            .iter()
            .map(|name| {
                self.get(name).ok_or_else(|| {
                    anyhow!(
                        "unknown transform stage '{name}' (available: {})",
                        self.names().collect::<Vec<_>>().join(", ")
                    )
                })
            })
            .collect()
    }
}

/// How a rule selects modules.
#[derive(Debug, Clone)]
pub enum RuleTest {
    /// Matched against the module's absolute forward-slash path.
    Pattern(Regex),
    /// File extensions without the leading dot.
    Extensions(Vec<String>),
}

impl RuleTest {
    pub fn matches(&self, path: &Path) -> bool {
        match self {
            Self::Pattern(regex) => regex.is_match(&path.to_slash_lossy()),
            Self::Extensions(extensions) => path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| extensions.iter().any(|candidate| candidate == ext)),
        }
    }
}

#[derive(Clone)]
pub struct TransformRule {
    pub test: RuleTest,
    /// Absolute directories; empty means everywhere
    pub include: Vec<PathBuf>,
    pub pipeline: Vec<Arc<dyn Transform>>,
}

impl fmt::Debug for TransformRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformRule")
            .field("test", &self.test)
            .field("include", &self.include)
            .field("pipeline", &self.stage_names())
            .finish()
    }
}

impl TransformRule {
    pub fn matches(&self, path: &Path) -> bool {
        self.test.matches(path)
            && (self.include.is_empty() || self.include.iter().any(|dir| path.starts_with(dir)))
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.pipeline.iter().map(|stage| stage.name()).collect()
    }

    fn from_config(
        rule: &RuleConfig,
        index: usize,
        context: &Path,
        registry: &TransformRegistry,
    ) -> Result<Self> {
        let test = match (&rule.test, rule.extensions.as_slice()) {
            (Some(pattern), []) => RuleTest::Pattern(
                Regex::new(pattern)
                    .with_context(|| format!("rules[{index}]: invalid test pattern '{pattern}'"))?,
            ),
            (None, extensions) if !extensions.is_empty() => RuleTest::Extensions(
                extensions
                    .iter()
                    .map(|ext| ext.trim_start_matches('.').to_owned())
                    .collect(),
            ),
            _ => {
                return Err(anyhow!(
                    "rules[{index}] needs exactly one of `test` or `extensions`"
                ));
            }
        };

        let include = rule
            .include
            .iter()
            .map(|dir| {
                let dir = dir.absolutize_with(context);
                // Module ids are canonical, so compare against canonical roots
                dunce::canonicalize(&dir).unwrap_or(dir)
            })
            .collect();

        let pipeline = registry
            .pipeline(&rule.pipeline)
            .with_context(|| format!("rules[{index}]"))?;

        Ok(Self {
            test,
            include,
            pipeline,
        })
    }
}

/// Which pipeline a module gets.
#[derive(Debug)]
pub enum Dispatch<'a> {
    Pipeline(&'a TransformRule),
    /// No rule matched; the content is used unchanged.
    PassThrough,
}

/// Picks the first matching rule for a module and runs its pipeline.
#[derive(Debug, Clone, Default)]
pub struct TransformDispatcher {
    rules: Vec<TransformRule>,
}

impl TransformDispatcher {
    pub fn new(rules: Vec<TransformRule>) -> Self {
        Self { rules }
    }

    /// Compile the configured rules. Unknown stage names and invalid
    /// patterns are reported here, before any module is read.
    pub fn from_config(config: &Config, registry: &TransformRegistry) -> Result<Self> {
        let context = config.context_dir();
        let rules = config
            .rules
            .iter()
            .enumerate()
            .map(|(index, rule)| TransformRule::from_config(rule, index, &context, registry))
            .collect::<Result<Vec<_>>>()?;
        debug!("Loaded {} transform rule(s)", rules.len());
        Ok(Self::new(rules))
    }

    pub fn rules(&self) -> &[TransformRule] {
        &self.rules
    }

    pub fn dispatch(&self, path: &Path) -> Dispatch<'_> {
        self.rules
            .iter()
            .find(|rule| rule.matches(path))
            .map_or(Dispatch::PassThrough, Dispatch::Pipeline)
    }

    /// Whether the pipeline selected for `path` turns the module into a
    /// literal value, leaving no code to scan for imports.
    pub fn wraps_source(&self, path: &Path) -> bool {
        match self.dispatch(path) {
            Dispatch::PassThrough => false,
            Dispatch::Pipeline(rule) => rule.pipeline.iter().any(|stage| stage.wraps_source()),
        }
    }

    /// Decode and transform one module's raw bytes.
    pub fn transform(&self, path: &Path, raw: Vec<u8>) -> Result<String, TransformError> {
        let source = String::from_utf8(raw).map_err(|err| TransformError {
            module: path.to_path_buf(),
            stage: "decode".to_owned(),
            cause: anyhow::Error::new(err).context("module content is not valid UTF-8"),
        })?;

        match self.dispatch(path) {
            Dispatch::PassThrough => {
                trace!("No rule matches {}, passing through", path.display());
                Ok(source)
            }
            Dispatch::Pipeline(rule) => {
                trace!(
                    "Transforming {} with [{}]",
                    path.display(),
                    rule.stage_names().join(", ")
                );
                run_pipeline(&rule.pipeline, path, source)
            }
        }
    }
}

/// Run `stages` in order, feeding each stage the previous output.
pub fn run_pipeline(
    stages: &[Arc<dyn Transform>],
    path: &Path,
    source: String,
) -> Result<String, TransformError> {
    stages.iter().try_fold(source, |text, stage| {
        stage
            .transform(path, text)
            .map_err(|cause| TransformError {
                module: path.to_path_buf(),
                stage: stage.name().to_owned(),
                cause,
            })
    })
}

/// Identity.
#[derive(Debug, Clone, Copy)]
pub struct Raw;

impl Transform for Raw {
    fn name(&self) -> &str {
        "raw"
    }

    fn transform(&self, _path: &Path, source: String) -> Result<String> {
        Ok(source)
    }
}

/// CRLF and lone CR become LF.
#[derive(Debug, Clone, Copy)]
pub struct LineEndings;

impl Transform for LineEndings {
    fn name(&self) -> &str {
        "line-endings"
    }

    fn transform(&self, _path: &Path, source: String) -> Result<String> {
        Ok(normalize_line_endings(&source).into_owned())
    }
}

/// Validated JSON exposed as the module's default export.
#[derive(Debug, Clone, Copy)]
pub struct JsonModule;

impl Transform for JsonModule {
    fn name(&self) -> &str {
        "json"
    }

    fn transform(&self, _path: &Path, source: String) -> Result<String> {
        let value: serde_json::Value =
            serde_json::from_str(&source).context("invalid JSON document")?;
        Ok(format!("export default {value};\n"))
    }

    fn wraps_source(&self) -> bool {
        true
    }
}

/// Markup inlined as a string default export.
#[derive(Debug, Clone, Copy)]
pub struct MarkupModule;

impl Transform for MarkupModule {
    fn name(&self) -> &str {
        "html"
    }

    fn transform(&self, _path: &Path, source: String) -> Result<String> {
        Ok(format!("export default {};\n", js_string_literal(&source)))
    }

    fn wraps_source(&self) -> bool {
        true
    }
}

/// Stylesheet text as a string default export.
#[derive(Debug, Clone, Copy)]
pub struct StylesheetModule;

impl Transform for StylesheetModule {
    fn name(&self) -> &str {
        "css"
    }

    fn transform(&self, _path: &Path, source: String) -> Result<String> {
        Ok(format!("export default {};\n", js_string_literal(&source)))
    }

    fn wraps_source(&self) -> bool {
        true
    }
}

/// Stylesheet text injected into the page through a `<style>` element.
/// Takes plain CSS, not the output of the `css` stage.
#[derive(Debug, Clone, Copy)]
pub struct StyleInjection;

impl Transform for StyleInjection {
    fn name(&self) -> &str {
        "style"
    }

    fn transform(&self, _path: &Path, source: String) -> Result<String> {
        Ok(format!(
            "const css = {};\n\
             if (typeof document !== \"undefined\") {{\n\
             \x20 const style = document.createElement(\"style\");\n\
             \x20 style.textContent = css;\n\
             \x20 document.head.appendChild(style);\n\
             }}\n\
             export default css;\n",
            js_string_literal(&source)
        ))
    }
}

/// Drops trailing whitespace and blank lines.
///
/// Lines inside a template literal are kept verbatim. Literals are tracked by
/// counting unescaped backticks, so a backtick inside a quoted string or a
/// comment throws the tracking off for the rest of the chunk.
#[derive(Debug, Clone, Copy)]
pub struct TrimWhitespace;

impl Transform for TrimWhitespace {
    fn name(&self) -> &str {
        "trim-whitespace"
    }

    fn transform(&self, _path: &Path, source: String) -> Result<String> {
        let mut output = String::with_capacity(source.len());
        let mut in_template = false;
        for line in source.lines() {
            let starts_in_template = in_template;
            in_template ^= unescaped_backticks(line) % 2 == 1;

            // Trailing whitespace of a line that ends inside a literal is text
            let line = if in_template { line } else { line.trim_end() };
            if line.is_empty() && !starts_in_template {
                continue;
            }
            output.push_str(line);
            output.push('\n');
        }
        Ok(output)
    }
}

fn unescaped_backticks(line: &str) -> usize {
    let mut count = 0;
    let mut escaped = false;
    for c in line.chars() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '`' => count += 1,
            _ => {}
        }
    }
    count
}
