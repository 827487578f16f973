mod common;

use common::{Project, chunk_modules};
use pretty_assertions::assert_eq;
use rivet::Bundler;
use rivet::chunk::ChunkKind;
use rivet::config::Mode;

fn shared_dependency_project() -> Project {
    Project::with_files(&[
        ("src/index.js", "import './x';\nimport './y';\nimport './z';\n"),
        ("src/x.js", "import { helper } from './helper';\nhelper('x');\n"),
        ("src/y.js", "import { helper } from './helper';\nhelper('y');\n"),
        ("src/z.js", "import { helper } from './helper';\nimport './only-z';\n"),
        ("src/only-z.js", "export const z = 26;\n"),
        ("src/helper.js", "export function helper(name) { return name; }\n"),
    ])
}

#[test]
fn shared_module_moves_to_vendor_once() {
    let project = shared_dependency_project();
    let output = Bundler::new(project.config())
        .build()
        .expect("build failed");

    let names: Vec<(&str, ChunkKind)> = output
        .chunks
        .iter()
        .map(|chunk| (chunk.name.as_str(), chunk.kind))
        .collect();
    assert_eq!(
        names,
        vec![
            ("index", ChunkKind::Entry),
            ("x", ChunkKind::Root),
            ("y", ChunkKind::Root),
            ("z", ChunkKind::Root),
            ("vendor", ChunkKind::Vendor),
        ]
    );

    assert_eq!(chunk_modules(&output, "vendor"), vec!["src/helper.js"]);
    assert_eq!(chunk_modules(&output, "z"), vec!["src/z.js", "src/only-z.js"]);

    let holders = output
        .chunks
        .iter()
        .filter(|chunk| chunk.modules.iter().any(|id| id.as_path().ends_with("helper.js")))
        .count();
    assert_eq!(holders, 1);
}

#[test]
fn high_threshold_keeps_shared_module_with_first_root() {
    let project = shared_dependency_project();
    let mut config = project.config();
    config.optimization.min_chunks = 4;

    let output = Bundler::new(config).build().expect("build failed");
    assert!(output.chunks.iter().all(|chunk| chunk.kind != ChunkKind::Vendor));
    assert_eq!(chunk_modules(&output, "x"), vec!["src/x.js", "src/helper.js"]);
}

#[test]
fn every_module_lands_in_exactly_one_chunk() {
    let project = shared_dependency_project();
    let mut config = project.config();
    config.mode = Mode::Production;
    config.optimization.min_chunk_size = 80;

    let output = Bundler::new(config).build().expect("build failed");

    let assigned: usize = output.chunks.iter().map(|chunk| chunk.len()).sum();
    assert_eq!(assigned, output.graph.len());
    for id in output.graph.ids() {
        let holders = output
            .chunks
            .iter()
            .filter(|chunk| chunk.contains(id))
            .count();
        assert_eq!(holders, 1, "{id} should be in exactly one chunk");
    }
    assert_eq!(output.chunks[0].kind, ChunkKind::Entry);
    assert!(output.chunks.len() < 5);
}

#[test]
fn development_builds_never_merge() {
    let project = shared_dependency_project();
    let mut config = project.config();
    config.optimization.min_chunk_size = usize::MAX;

    let output = Bundler::new(config).build().expect("build failed");
    assert_eq!(output.chunks.len(), 5);
}
