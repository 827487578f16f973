mod common;

use common::{Project, chunk_modules};
use pretty_assertions::assert_eq;
use rivet::Bundler;
use rivet::config::EmitPolicy;
use rivet::emit::MANIFEST_FILE;
use rivet::error::BuildError;
use std::fs;

fn diamond_project() -> Project {
    Project::with_files(&[
        ("src/index.js", "import './a';\nimport './b';\nconsole.log('ready');\n"),
        ("src/a.js", "import { log } from './util';\nlog('a');\n"),
        ("src/b.js", "const { log } = require('./util');\nlog('b');\n"),
        ("src/util.js", "export function log(msg) { console.log(msg); }\n"),
    ])
}

#[test]
fn shared_utility_is_emitted_once_in_vendor() {
    let project = diamond_project();
    let output = Bundler::new(project.config())
        .bundle()
        .expect("bundle failed");

    assert_eq!(chunk_modules(&output, "index"), vec!["src/index.js"]);
    assert_eq!(chunk_modules(&output, "a"), vec!["src/a.js"]);
    assert_eq!(chunk_modules(&output, "b"), vec!["src/b.js"]);
    assert_eq!(chunk_modules(&output, "vendor"), vec!["src/util.js"]);

    let emitted_util = output
        .artifacts
        .iter()
        .filter(|artifact| artifact.content.contains("/* module: src/util.js */"))
        .count();
    assert_eq!(emitted_util, 1);

    let vendor = project.read("builds/vendor.js");
    assert!(vendor.starts_with("/* rivet chunk: vendor */\n"));
    assert!(vendor.contains("export function log(msg)"));
}

#[test]
fn entry_named_vendor_gets_its_own_file() {
    let project = Project::with_files(&[
        ("src/vendor.js", "import './a';\nimport './b';\nconsole.log('entry');\n"),
        ("src/a.js", "import './util';\n"),
        ("src/b.js", "import './util';\n"),
        ("src/util.js", "export const util = 1;\n"),
    ]);
    let mut config = project.config();
    config.entry = "./src/vendor.js".to_owned();

    let output = Bundler::new(config).bundle().expect("bundle failed");

    let files: Vec<(&str, &str)> = output
        .artifacts
        .iter()
        .map(|artifact| (artifact.chunk.as_str(), artifact.file_name.as_str()))
        .collect();
    assert_eq!(
        files,
        vec![
            ("vendor-2", "vendor-2.js"),
            ("a", "a.js"),
            ("b", "b.js"),
            ("vendor", "vendor.js"),
        ]
    );
    assert!(project.read("builds/vendor-2.js").contains("console.log('entry');"));
    assert!(project.read("builds/vendor.js").contains("export const util = 1;"));
}

#[test]
fn manifest_lists_every_artifact() {
    let project = diamond_project();
    let output = Bundler::new(project.config())
        .bundle()
        .expect("bundle failed");

    let manifest: serde_json::Value =
        serde_json::from_str(&project.read(&format!("builds/{MANIFEST_FILE}")))
            .expect("manifest is valid JSON");

    assert_eq!(manifest["entry"], "index.js");
    assert_eq!(manifest["publicPath"], "builds/");
    let files: Vec<&str> = manifest["chunks"]
        .as_array()
        .expect("chunks is an array")
        .iter()
        .filter_map(|chunk| chunk["file"].as_str())
        .collect();
    let expected: Vec<&str> = output
        .artifacts
        .iter()
        .map(|artifact| artifact.file_name.as_str())
        .collect();
    assert_eq!(files, expected);
    assert_eq!(manifest["chunks"][3]["url"], "builds/vendor.js");
}

#[test]
fn hashed_file_names_follow_content() {
    let project = diamond_project();
    let mut config = project.config();
    config.output.filename = "[name].[hash].js".to_owned();

    let first = Bundler::new(config.clone()).build().expect("build failed");
    let second = Bundler::new(config.clone()).build().expect("build failed");
    assert_eq!(first.artifacts, second.artifacts);

    project.write("src/util.js", "export function log(msg) { console.warn(msg); }\n");
    let changed = Bundler::new(config).build().expect("build failed");

    let file = |output: &rivet::BuildOutput, chunk: &str| {
        output
            .artifacts
            .iter()
            .find(|artifact| artifact.chunk == chunk)
            .map(|artifact| artifact.file_name.clone())
            .expect("chunk was rendered")
    };
    assert_eq!(file(&first, "a"), file(&changed, "a"));
    assert_ne!(file(&first, "vendor"), file(&changed, "vendor"));
}

#[test]
fn build_without_emit_writes_nothing() {
    let project = diamond_project();
    let output = Bundler::new(project.config()).build().expect("build failed");

    assert_eq!(output.artifacts.len(), 4);
    assert!(!project.root().join("builds").exists());
}

#[test]
fn externals_stay_out_of_the_graph() {
    let project = Project::with_files(&[(
        "src/index.js",
        "import React from 'react';\nimport './app';\n",
    )]);
    project.write("src/app.js", "export default 1;\n");
    let mut config = project.config();
    config.externals.insert("react".to_owned());

    let output = Bundler::new(config).build().expect("build failed");
    assert_eq!(output.graph.len(), 2);
    let entry = output
        .graph
        .get(output.graph.entry())
        .expect("entry is in the graph");
    assert_eq!(entry.externals, vec!["react"]);
}

#[test]
fn best_effort_reports_every_failed_write() {
    let project = diamond_project();
    // Directories where artifact files should go make those writes fail
    fs::create_dir_all(project.root().join("builds/a.js/blocked")).expect("mkdir");
    fs::create_dir_all(project.root().join("builds/b.js/blocked")).expect("mkdir");

    let mut config = project.config();
    config.output.emit_policy = EmitPolicy::BestEffort;

    let error = Bundler::new(config).bundle().expect_err("bundle should fail");
    match error {
        BuildError::Emit(failures) => {
            let failed: Vec<_> = failures
                .iter()
                .filter_map(|failure| failure.path.file_name())
                .collect();
            assert_eq!(failed, vec!["a.js", "b.js"]);
        }
        other => panic!("unexpected error: {other}"),
    }

    assert!(project.root().join("builds/index.js").is_file());
    assert!(project.root().join("builds/vendor.js").is_file());
    assert!(!project.root().join("builds").join(MANIFEST_FILE).exists());
}

#[test]
fn fail_fast_stops_at_first_failed_write() {
    let project = diamond_project();
    fs::create_dir_all(project.root().join("builds/a.js/blocked")).expect("mkdir");

    let error = Bundler::new(project.config())
        .bundle()
        .expect_err("bundle should fail");
    match error {
        BuildError::Emit(failures) => assert_eq!(failures.len(), 1),
        other => panic!("unexpected error: {other}"),
    }
    assert!(project.root().join("builds/index.js").is_file());
    assert!(!project.root().join("builds/b.js").exists());
}

#[test]
fn cancelled_bundler_fails() {
    let project = diamond_project();
    let bundler = Bundler::new(project.config());
    bundler.cancellation().cancel();

    let error = bundler.build().expect_err("build should fail");
    assert!(matches!(error, BuildError::Graph(_)));
}
