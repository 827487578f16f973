use indexmap::{IndexMap, IndexSet};
use log::debug;
use petgraph::Direction;
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use rustc_hash::{FxBuildHasher, FxHashMap, FxHashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{GraphError, GraphErrorKind};
use crate::util::relative_slash_path;

/// Identity of one resolved module: its canonical absolute path. Two
/// specifiers reaching the same physical file produce equal ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(Arc<Path>);

impl ModuleId {
    /// Wrap an already canonicalized path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(Arc::from(path.into()))
    }

    pub fn as_path(&self) -> &Path {
        &self.0
    }

    /// Forward-slash path relative to `context`, stable across machines.
    pub fn stabilize(&self, context: &Path) -> String {
        relative_slash_path(&self.0, context)
    }
}

impl AsRef<Path> for ModuleId {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0.display(), f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleNode {
    pub id: ModuleId,
    /// Transformed source text
    pub content: String,
    /// Resolved imports, de-duplicated, in source order
    pub dependencies: Vec<ModuleId>,
    /// Specifiers left to the runtime
    pub externals: Vec<String>,
}

impl ModuleNode {
    pub fn size(&self) -> usize {
        self.content.len()
    }
}

/// The resolved dependency graph of one build.
///
/// Modules iterate in depth-first pre-order from the entry, following each
/// module's dependency order, so the same source tree always produces the
/// same sequence no matter how the modules were discovered.
#[derive(Debug)]
pub struct ModuleGraph {
    entry: ModuleId,
    modules: IndexMap<ModuleId, ModuleNode, FxBuildHasher>,
    graph: DiGraph<ModuleId, ()>,
    node_indices: FxHashMap<ModuleId, NodeIndex>,
}

impl ModuleGraph {
    /// Assemble a graph, checking that every module appears once and every
    /// dependency is present.
    pub fn new(
        entry: ModuleId,
        nodes: impl IntoIterator<Item = ModuleNode>,
    ) -> Result<Self, GraphError> {
        let mut pending: FxHashMap<ModuleId, ModuleNode> = FxHashMap::default();
        for node in nodes {
            if let Some(previous) = pending.insert(node.id.clone(), node) {
                return Err(GraphError::new(
                    GraphErrorKind::DuplicateModule(previous.id.as_path().to_path_buf()),
                    vec![previous.id.as_path().to_path_buf()],
                ));
            }
        }

        if !pending.contains_key(&entry) {
            return Err(GraphError::new(
                GraphErrorKind::MissingEntry(entry.as_path().to_path_buf()),
                Vec::new(),
            ));
        }
        for node in pending.values() {
            if let Some(missing) = node
                .dependencies
                .iter()
                .find(|dependency| !pending.contains_key(*dependency))
            {
                return Err(GraphError::new(
                    GraphErrorKind::MissingDependency {
                        module: node.id.as_path().to_path_buf(),
                        dependency: missing.as_path().to_path_buf(),
                    },
                    vec![node.id.as_path().to_path_buf()],
                ));
            }
        }

        let order = canonical_order(&entry, &pending);
        let mut modules = IndexMap::with_capacity_and_hasher(pending.len(), FxBuildHasher);
        for id in order {
            if let Some(node) = pending.remove(&id) {
                modules.insert(id, node);
            }
        }
        if !pending.is_empty() {
            // Not reachable from the entry; keep them after the reachable part
            let mut rest: Vec<_> = pending.into_values().collect();
            rest.sort_by(|a, b| a.id.cmp(&b.id));
            debug!("{} module(s) unreachable from the entry", rest.len());
            for node in rest {
                modules.insert(node.id.clone(), node);
            }
        }

        let mut graph = DiGraph::with_capacity(modules.len(), modules.len());
        let mut node_indices = FxHashMap::default();
        for id in modules.keys() {
            node_indices.insert(id.clone(), graph.add_node(id.clone()));
        }
        for node in modules.values() {
            let from = node_indices[&node.id];
            for dependency in &node.dependencies {
                graph.add_edge(from, node_indices[dependency], ());
            }
        }

        Ok(Self {
            entry,
            modules,
            graph,
            node_indices,
        })
    }

    pub fn entry(&self) -> &ModuleId {
        &self.entry
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn contains(&self, id: &ModuleId) -> bool {
        self.modules.contains_key(id)
    }

    pub fn get(&self, id: &ModuleId) -> Option<&ModuleNode> {
        self.modules.get(id)
    }

    /// Modules in canonical order.
    pub fn modules(&self) -> impl Iterator<Item = &ModuleNode> {
        self.modules.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = &ModuleId> {
        self.modules.keys()
    }

    /// Position of `id` in canonical order.
    pub fn position(&self, id: &ModuleId) -> Option<usize> {
        self.modules.get_index_of(id)
    }

    pub fn dependencies(&self, id: &ModuleId) -> &[ModuleId] {
        self.modules
            .get(id)
            .map_or(&[], |node| node.dependencies.as_slice())
    }

    /// Modules importing `id`, in canonical order.
    pub fn importers(&self, id: &ModuleId) -> Vec<&ModuleId> {
        let Some(&index) = self.node_indices.get(id) else {
            return Vec::new();
        };
        let mut importers: Vec<&ModuleId> = self
            .graph
            .neighbors_directed(index, Direction::Incoming)
            .map(|importer| &self.graph[importer])
            .collect::<IndexSet<_>>()
            .into_iter()
            .collect();
        importers.sort_by_key(|importer| self.position(importer));
        importers
    }

    /// Everything reachable from `root`, including `root`, without walking
    /// through `stop_at`. Depth-first pre-order.
    pub fn reachable_from(&self, root: &ModuleId, stop_at: &ModuleId) -> IndexSet<ModuleId> {
        let mut reached = IndexSet::new();
        if root == stop_at || !self.contains(root) {
            return reached;
        }
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            if !reached.insert(id.clone()) {
                continue;
            }
            for dependency in self.dependencies(id).iter().rev() {
                if dependency != stop_at && !reached.contains(dependency) {
                    stack.push(dependency);
                }
            }
        }
        reached
    }

    /// Import cycles: strongly connected components with more than one
    /// module, plus modules importing themselves. Members are listed in
    /// canonical order, cycles by their first member.
    pub fn cycles(&self) -> Vec<Vec<ModuleId>> {
        let mut cycles: Vec<Vec<ModuleId>> = tarjan_scc(&self.graph)
            .into_iter()
            .filter(|component| {
                component.len() > 1
                    || component
                        .first()
                        .is_some_and(|&index| self.graph.contains_edge(index, index))
            })
            .map(|component| {
                let mut members: Vec<ModuleId> = component
                    .into_iter()
                    .map(|index| self.graph[index].clone())
                    .collect();
                members.sort_by_key(|id| self.position(id));
                members
            })
            .collect();
        cycles.sort_by_key(|members| members.first().and_then(|id| self.position(id)));
        cycles
    }

    /// Sum of all module sizes.
    pub fn total_size(&self) -> usize {
        self.modules.values().map(ModuleNode::size).sum()
    }
}

/// Depth-first pre-order from `entry` following declared dependency order.
fn canonical_order(entry: &ModuleId, nodes: &FxHashMap<ModuleId, ModuleNode>) -> Vec<ModuleId> {
    let mut order = Vec::with_capacity(nodes.len());
    let mut seen = FxHashSet::default();
    let mut stack = vec![entry];

    while let Some(id) = stack.pop() {
        if !seen.insert(id) {
            continue;
        }
        order.push(id.clone());
        if let Some(node) = nodes.get(id) {
            for dependency in node.dependencies.iter().rev() {
                if !seen.contains(dependency) {
                    stack.push(dependency);
                }
            }
        }
    }
    order
}
