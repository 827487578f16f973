//! Partitioning of a module graph into output chunks.

use indexmap::IndexSet;
use log::{debug, info};
use rustc_hash::FxHashSet;
use serde::Serialize;
use std::path::Path;

use crate::config::Config;
use crate::module_graph::{ModuleGraph, ModuleId};
use crate::util::{representative_file_name, sanitize_file_name};

/// Type of chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkKind {
    /// Holds the entry module - loaded first
    Entry,
    /// Modules reached from one direct dependency of the entry
    Root,
    /// Modules shared by enough roots to be split out
    Vendor,
}

/// A named, ordered group of modules emitted as one artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub name: String,
    pub kind: ChunkKind,
    /// Canonical graph order, or occurrence order once that pass has run
    pub modules: IndexSet<ModuleId>,
    /// Sum of the module contents in bytes
    pub size: usize,
}

impl Chunk {
    fn new(
        name: String,
        kind: ChunkKind,
        modules: IndexSet<ModuleId>,
        graph: &ModuleGraph,
    ) -> Self {
        let size = chunk_size(&modules, graph);
        Self {
            name,
            kind,
            modules,
            size,
        }
    }

    pub fn contains(&self, id: &ModuleId) -> bool {
        self.modules.contains(id)
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Number of modules in chunk
    pub fn len(&self) -> usize {
        self.modules.len()
    }
}

fn chunk_size(modules: &IndexSet<ModuleId>, graph: &ModuleGraph) -> usize {
    modules
        .iter()
        .filter_map(|id| graph.get(id))
        .map(|node| node.size())
        .sum()
}

#[derive(Debug, Clone)]
pub struct ChunkOptimizer {
    /// Roots that must reach a module before it moves to the vendor chunk
    pub min_chunks: usize,
    pub min_chunk_size: usize,
    pub vendor_name: String,
    pub entry_name: Option<String>,
    /// Run the minimum-size merge pass
    pub merge_small_chunks: bool,
    /// Put the most imported modules first within each chunk
    pub occurrence_order: bool,
}

impl Default for ChunkOptimizer {
    fn default() -> Self {
        Self {
            min_chunks: 2,
            min_chunk_size: 51200,
            vendor_name: "vendor".to_owned(),
            entry_name: None,
            merge_small_chunks: false,
            occurrence_order: false,
        }
    }
}

impl ChunkOptimizer {
    pub fn from_config(config: &Config) -> Self {
        Self {
            min_chunks: config.optimization.min_chunks,
            min_chunk_size: config.optimization.min_chunk_size,
            vendor_name: config.optimization.vendor_name.clone(),
            entry_name: config.output.entry_name.clone(),
            merge_small_chunks: config.mode.is_production(),
            occurrence_order: config.mode.is_production(),
        }
    }

    /// Split `graph` into chunks. Every module ends up in exactly one chunk.
    pub fn optimize(&self, graph: &ModuleGraph) -> Vec<Chunk> {
        let chunks = self.partition(graph);
        info!("Initial partition: {} chunk(s)", chunks.len());

        let mut chunks = if self.merge_small_chunks {
            self.merge_small(graph, chunks)
        } else {
            chunks
        };
        if self.occurrence_order {
            for chunk in &mut chunks {
                order_by_occurrence(graph, chunk);
            }
        }

        for chunk in &chunks {
            debug!(
                "Chunk '{}' ({:?}): {} module(s), {} bytes",
                chunk.name,
                chunk.kind,
                chunk.len(),
                chunk.size
            );
        }
        chunks
    }

    /// Entry chunk, one chunk per root and the vendor chunk.
    fn partition(&self, graph: &ModuleGraph) -> Vec<Chunk> {
        let entry = graph.entry();
        let roots: Vec<&ModuleId> = graph
            .dependencies(entry)
            .iter()
            .filter(|root| *root != entry)
            .collect();
        let reaches: Vec<IndexSet<ModuleId>> = roots
            .iter()
            .map(|root| graph.reachable_from(root, entry))
            .collect();

        let mut entry_modules = IndexSet::from([entry.clone()]);
        let mut root_modules: Vec<IndexSet<ModuleId>> = vec![IndexSet::new(); roots.len()];
        let mut vendor_modules = IndexSet::new();

        for id in graph.ids().filter(|id| *id != entry) {
            let reaching: Vec<usize> = reaches
                .iter()
                .enumerate()
                .filter(|(_, reach)| reach.contains(id))
                .map(|(index, _)| index)
                .collect();

            match reaching.first() {
                _ if reaching.len() >= self.min_chunks => {
                    debug!("{id} is shared by {} roots, moving to vendor", reaching.len());
                    vendor_modules.insert(id.clone());
                }
                Some(&owner) => {
                    root_modules[owner].insert(id.clone());
                }
                // Only possible for modules the entry cannot reach
                None => {
                    entry_modules.insert(id.clone());
                }
            }
        }

        // The vendor name is taken before anything else can claim it
        let vendor_name = sanitize_file_name(&self.vendor_name);
        let mut names = ChunkNames::default();
        names.reserve(&vendor_name);

        let entry_name = self
            .entry_name
            .clone()
            .unwrap_or_else(|| entry_stem(entry.as_path()));
        let mut chunks = vec![Chunk::new(
            names.claim(&entry_name),
            ChunkKind::Entry,
            entry_modules,
            graph,
        )];

        for (root, modules) in roots.iter().zip(root_modules) {
            if modules.is_empty() {
                debug!("Root {root} has no modules left, dropping its chunk");
                continue;
            }
            let name = names.claim(&representative_file_name(root.as_path()));
            chunks.push(Chunk::new(name, ChunkKind::Root, modules, graph));
        }

        if !vendor_modules.is_empty() {
            chunks.push(Chunk::new(
                vendor_name,
                ChunkKind::Vendor,
                vendor_modules,
                graph,
            ));
        }
        chunks
    }

    /// Fold chunks below `min_chunk_size` into their best connected neighbour
    /// until none is left or only one chunk remains.
    fn merge_small(&self, graph: &ModuleGraph, mut chunks: Vec<Chunk>) -> Vec<Chunk> {
        while chunks.len() > 1 {
            let Some(small) = chunks
                .iter()
                .enumerate()
                .filter(|(_, chunk)| chunk.size < self.min_chunk_size)
                .min_by_key(|(index, chunk)| (chunk.size, *index))
                .map(|(index, _)| index)
            else {
                break;
            };

            let Some(target) = chunks
                .iter()
                .enumerate()
                .filter(|(index, _)| *index != small)
                .max_by_key(|(index, chunk)| {
                    (
                        shared_edges(graph, &chunks[small], chunk),
                        chunk.kind == ChunkKind::Entry,
                        std::cmp::Reverse(*index),
                    )
                })
                .map(|(index, _)| index)
            else {
                break;
            };

            let absorbed = chunks.remove(small);
            let target = if target > small { target - 1 } else { target };
            info!(
                "Merging chunk '{}' ({} bytes) into '{}'",
                absorbed.name, absorbed.size, chunks[target].name
            );

            let into = &mut chunks[target];
            if absorbed.kind == ChunkKind::Entry {
                into.name = absorbed.name;
                into.kind = ChunkKind::Entry;
            }
            into.modules.extend(absorbed.modules);
            into.modules
                .sort_by(|a, b| graph.position(a).cmp(&graph.position(b)));
            into.size = chunk_size(&into.modules, graph);
        }

        // The entry chunk always leads
        if let Some(entry) = chunks.iter().position(|chunk| chunk.kind == ChunkKind::Entry) {
            let entry_chunk = chunks.remove(entry);
            chunks.insert(0, entry_chunk);
        }
        chunks
    }
}

/// Sort a chunk's modules by how many modules import them, most first. Ties
/// keep canonical order and the entry module stays at the front.
fn order_by_occurrence(graph: &ModuleGraph, chunk: &mut Chunk) {
    let entry = graph.entry();
    chunk.modules.sort_by_cached_key(|id| {
        (
            id != entry,
            std::cmp::Reverse(graph.importers(id).len()),
            graph.position(id),
        )
    });
}

/// Graph edges running between two chunks, either direction.
fn shared_edges(graph: &ModuleGraph, a: &Chunk, b: &Chunk) -> usize {
    let one_way = |from: &Chunk, to: &Chunk| {
        from.modules
            .iter()
            .map(|id| {
                graph
                    .dependencies(id)
                    .iter()
                    .filter(|dependency| to.contains(dependency))
                    .count()
            })
            .sum::<usize>()
    };
    one_way(a, b) + one_way(b, a)
}

fn entry_stem(path: &Path) -> String {
    path.file_stem()
        .map_or_else(|| "main".to_owned(), |stem| stem.to_string_lossy().into_owned())
}

/// Hands out unique, file-name safe chunk names.
#[derive(Debug, Default)]
struct ChunkNames {
    used: FxHashSet<String>,
}

impl ChunkNames {
    fn reserve(&mut self, name: &str) {
        self.used.insert(name.to_owned());
    }

    fn claim(&mut self, wanted: &str) -> String {
        let base = sanitize_file_name(wanted);
        let mut name = base.clone();
        let mut suffix = 2;
        while !self.used.insert(name.clone()) {
            name = format!("{base}-{suffix}");
            suffix += 1;
        }
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module_graph::ModuleNode;
    use pretty_assertions::assert_eq;

    fn id(name: &str) -> ModuleId {
        ModuleId::new(format!("/app/src/{name}.js"))
    }

    fn node(name: &str, size: usize, dependencies: &[&str]) -> ModuleNode {
        ModuleNode {
            id: id(name),
            content: "x".repeat(size),
            dependencies: dependencies.iter().map(|dep| id(dep)).collect(),
            externals: Vec::new(),
        }
    }

    fn summary(chunks: &[Chunk]) -> Vec<(String, ChunkKind, Vec<String>)> {
        chunks
            .iter()
            .map(|chunk| {
                (
                    chunk.name.clone(),
                    chunk.kind,
                    chunk
                        .modules
                        .iter()
                        .map(|id| id.stabilize(Path::new("/app/src")))
                        .collect(),
                )
            })
            .collect()
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_owned()).collect()
    }

    #[test]
    fn shared_modules_move_to_vendor() {
        let graph = ModuleGraph::new(
            id("index"),
            vec![
                node("index", 10, &["x", "y", "z"]),
                node("x", 10, &["shared"]),
                node("y", 10, &["shared"]),
                node("z", 10, &["shared", "only-z"]),
                node("shared", 10, &[]),
                node("only-z", 10, &[]),
            ],
        )
        .unwrap();

        let chunks = ChunkOptimizer::default().optimize(&graph);
        assert_eq!(
            summary(&chunks),
            vec![
                ("index".to_owned(), ChunkKind::Entry, strings(&["index.js"])),
                ("x".to_owned(), ChunkKind::Root, strings(&["x.js"])),
                ("y".to_owned(), ChunkKind::Root, strings(&["y.js"])),
                ("z".to_owned(), ChunkKind::Root, strings(&["z.js", "only-z.js"])),
                ("vendor".to_owned(), ChunkKind::Vendor, strings(&["shared.js"])),
            ]
        );
    }

    #[test]
    fn modules_below_threshold_stay_with_first_root() {
        let graph = ModuleGraph::new(
            id("index"),
            vec![
                node("index", 10, &["a", "b"]),
                node("a", 10, &["util"]),
                node("b", 10, &["util"]),
                node("util", 10, &[]),
            ],
        )
        .unwrap();

        let optimizer = ChunkOptimizer {
            min_chunks: 3,
            ..Default::default()
        };
        let chunks = optimizer.optimize(&graph);
        assert_eq!(
            summary(&chunks),
            vec![
                ("index".to_owned(), ChunkKind::Entry, strings(&["index.js"])),
                ("a".to_owned(), ChunkKind::Root, strings(&["a.js", "util.js"])),
                ("b".to_owned(), ChunkKind::Root, strings(&["b.js"])),
            ]
        );
    }

    #[test]
    fn roots_emptied_by_vendor_extraction_are_dropped() {
        // `b` is also reached through `a`, so both roots share it
        let graph = ModuleGraph::new(
            id("index"),
            vec![
                node("index", 10, &["a", "b"]),
                node("a", 10, &["b"]),
                node("b", 10, &[]),
            ],
        )
        .unwrap();

        let chunks = ChunkOptimizer::default().optimize(&graph);
        let names: Vec<_> = chunks.iter().map(|chunk| chunk.name.as_str()).collect();
        assert_eq!(names, vec!["index", "a", "vendor"]);
    }

    #[test]
    fn small_chunks_merge_into_best_connected_chunk() {
        let graph = ModuleGraph::new(
            id("index"),
            vec![
                node("index", 100, &["a", "b"]),
                node("a", 100, &["a-helper"]),
                node("a-helper", 5, &[]),
                node("b", 3, &[]),
            ],
        )
        .unwrap();

        let optimizer = ChunkOptimizer {
            min_chunk_size: 50,
            merge_small_chunks: true,
            ..Default::default()
        };
        let chunks = optimizer.optimize(&graph);

        // `b` (3 bytes) only shares an edge with the entry chunk
        assert_eq!(
            summary(&chunks),
            vec![
                (
                    "index".to_owned(),
                    ChunkKind::Entry,
                    strings(&["index.js", "b.js"])
                ),
                (
                    "a".to_owned(),
                    ChunkKind::Root,
                    strings(&["a.js", "a-helper.js"])
                ),
            ]
        );
        let total: usize = chunks.iter().map(|chunk| chunk.len()).sum();
        assert_eq!(total, graph.len());
        assert_eq!(chunks[0].size, 103);
    }

    #[test]
    fn merging_keeps_entry_identity() {
        let graph = ModuleGraph::new(
            id("main"),
            vec![node("main", 1, &["big"]), node("big", 500, &[])],
        )
        .unwrap();

        let optimizer = ChunkOptimizer {
            min_chunk_size: 100,
            merge_small_chunks: true,
            entry_name: Some("app".to_owned()),
            ..Default::default()
        };
        let chunks = optimizer.optimize(&graph);
        assert_eq!(
            summary(&chunks),
            vec![(
                "app".to_owned(),
                ChunkKind::Entry,
                strings(&["main.js", "big.js"])
            )]
        );
    }

    #[test]
    fn occurrence_order_puts_popular_modules_first() {
        let graph = ModuleGraph::new(
            id("index"),
            vec![
                node("index", 10, &["a", "b", "c"]),
                node("a", 10, &["logger", "strings"]),
                node("b", 10, &["strings"]),
                node("c", 10, &["strings", "logger"]),
                node("logger", 10, &[]),
                node("strings", 10, &["logger"]),
            ],
        )
        .unwrap();

        // A high threshold keeps everything with the first root
        let optimizer = ChunkOptimizer {
            min_chunks: 10,
            ..Default::default()
        };
        let canonical = summary(&optimizer.optimize(&graph));
        assert_eq!(
            canonical[1],
            (
                "a".to_owned(),
                ChunkKind::Root,
                strings(&["a.js", "logger.js", "strings.js"])
            )
        );

        let optimizer = ChunkOptimizer {
            occurrence_order: true,
            ..optimizer
        };
        let chunks = optimizer.optimize(&graph);
        // logger and strings both have three importers, so canonical order
        // breaks the tie; `a` has one
        assert_eq!(
            summary(&chunks),
            vec![
                ("index".to_owned(), ChunkKind::Entry, strings(&["index.js"])),
                (
                    "a".to_owned(),
                    ChunkKind::Root,
                    strings(&["logger.js", "strings.js", "a.js"])
                ),
                ("b".to_owned(), ChunkKind::Root, strings(&["b.js"])),
                ("c".to_owned(), ChunkKind::Root, strings(&["c.js"])),
            ]
        );
    }

    #[test]
    fn occurrence_order_keeps_the_entry_module_first() {
        let graph = ModuleGraph::new(
            id("main"),
            vec![
                node("main", 1, &["a", "b"]),
                node("a", 1, &["shared"]),
                node("b", 1, &["shared"]),
                node("shared", 1, &[]),
            ],
        )
        .unwrap();

        let optimizer = ChunkOptimizer {
            min_chunk_size: 100,
            merge_small_chunks: true,
            occurrence_order: true,
            ..Default::default()
        };
        let chunks = optimizer.optimize(&graph);
        assert_eq!(chunks.len(), 1);
        assert_eq!(
            summary(&chunks)[0].2,
            strings(&["main.js", "shared.js", "a.js", "b.js"])
        );
    }

    #[test]
    fn entry_never_takes_the_vendor_name() {
        let graph = ModuleGraph::new(
            id("vendor"),
            vec![
                node("vendor", 10, &["a", "b"]),
                node("a", 10, &["util"]),
                node("b", 10, &["util"]),
                node("util", 10, &[]),
            ],
        )
        .unwrap();

        let chunks = ChunkOptimizer::default().optimize(&graph);
        assert_eq!(
            summary(&chunks),
            vec![
                ("vendor-2".to_owned(), ChunkKind::Entry, strings(&["vendor.js"])),
                ("a".to_owned(), ChunkKind::Root, strings(&["a.js"])),
                ("b".to_owned(), ChunkKind::Root, strings(&["b.js"])),
                ("vendor".to_owned(), ChunkKind::Vendor, strings(&["util.js"])),
            ]
        );

        let optimizer = ChunkOptimizer {
            entry_name: Some("vendor".to_owned()),
            ..Default::default()
        };
        let chunks = optimizer.optimize(&graph);
        assert_eq!(chunks[0].name, "vendor-2");
    }

    #[test]
    fn vendor_name_is_sanitized() {
        let graph = ModuleGraph::new(
            id("index"),
            vec![
                node("index", 10, &["a", "b"]),
                node("a", 10, &["util"]),
                node("b", 10, &["util"]),
                node("util", 10, &[]),
            ],
        )
        .unwrap();

        let optimizer = ChunkOptimizer {
            vendor_name: "../libs".to_owned(),
            ..Default::default()
        };
        let chunks = optimizer.optimize(&graph);
        let vendor = chunks.last().unwrap();
        assert_eq!(vendor.kind, ChunkKind::Vendor);
        assert_eq!(vendor.name, "___libs");
    }

    #[test]
    fn chunk_names_are_unique_and_safe() {
        let mut names = ChunkNames::default();
        names.reserve("vendor");
        assert_eq!(names.claim("ui"), "ui");
        assert_eq!(names.claim("ui"), "ui-2");
        assert_eq!(names.claim("vendor"), "vendor-2");
        assert_eq!(names.claim("lodash.merge"), "lodash_merge");
    }
}
