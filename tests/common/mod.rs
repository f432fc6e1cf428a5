// Shared helpers for integration tests.
//
// Provides a temporary-directory-backed manifest workspace and a fluent
// builder so each integration test can set up an isolated environment
// without repeating filesystem boilerplate.
//
// Used by all integration test binaries that declare `mod common;`.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use provision_cli::config::{self, Manifest};
use provision_cli::error::ValidationError;

/// An isolated workspace backed by a [`tempfile::TempDir`].
///
/// Holds the manifest, any `source` files it references, and a scratch
/// area (`host/`) that file and directory entries may target.
pub struct ManifestContext {
    /// Temporary directory holding everything.
    pub root: tempfile::TempDir,
}

impl ManifestContext {
    /// Path to the workspace root.
    pub fn root_path(&self) -> &Path {
        self.root.path()
    }

    /// Path to the manifest file.
    pub fn manifest_path(&self) -> PathBuf {
        self.root.path().join("manifest.toml")
    }

    /// Absolute path under the scratch host directory.
    pub fn host_path(&self, rel: &str) -> PathBuf {
        self.root.path().join("host").join(rel)
    }

    /// Load the manifest with the given builtins and no overrides.
    pub fn load(&self, builtins: &[(&str, &str)]) -> Result<Manifest, ValidationError> {
        self.load_with(builtins, &[])
    }

    /// Load the manifest with builtins and `--var` style overrides.
    pub fn load_with(
        &self,
        builtins: &[(&str, &str)],
        overrides: &[(&str, &str)],
    ) -> Result<Manifest, ValidationError> {
        config::load(&self.manifest_path(), &to_map(builtins), &to_map(overrides))
    }

    /// Run the `provision` binary with `args`, isolating `HOME` and the log
    /// directory inside the workspace.
    pub fn run(&self, args: &[&str]) -> Output {
        Command::new(env!("CARGO_BIN_EXE_provision"))
            .args(args)
            .env("HOME", self.root.path())
            .env("XDG_CACHE_HOME", self.root.path().join("cache"))
            .output()
            .expect("run provision binary")
    }
}

fn to_map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

/// Builder for [`ManifestContext`].
///
/// `{{ host }}` inside the manifest text is replaced with the absolute path
/// of the scratch host directory before it is written.
#[derive(Default)]
pub struct ManifestBuilder {
    manifest: String,
    sources: Vec<(String, Vec<u8>)>,
    host_files: Vec<(String, Vec<u8>)>,
    host_dirs: Vec<String>,
}

impl ManifestBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the manifest text.
    pub fn manifest(mut self, text: &str) -> Self {
        self.manifest = text.to_string();
        self
    }

    /// Add a file next to the manifest, for `source = "..."` entries.
    pub fn with_source(mut self, rel: &str, content: &str) -> Self {
        self.sources
            .push((rel.to_string(), content.as_bytes().to_vec()));
        self
    }

    /// Pre-create a file in the scratch host directory.
    pub fn with_host_file(mut self, rel: &str, content: &str) -> Self {
        self.host_files
            .push((rel.to_string(), content.as_bytes().to_vec()));
        self
    }

    /// Pre-create a directory in the scratch host directory.
    pub fn with_host_dir(mut self, rel: &str) -> Self {
        self.host_dirs.push(rel.to_string());
        self
    }

    /// Materialise the workspace.
    pub fn build(self) -> ManifestContext {
        let root = tempfile::tempdir().expect("create temp dir");
        let host = root.path().join("host");
        std::fs::create_dir_all(&host).expect("create host dir");

        for dir in &self.host_dirs {
            std::fs::create_dir_all(host.join(dir)).expect("create host subdir");
        }
        for (rel, bytes) in &self.host_files {
            write_file(&host.join(rel), bytes);
        }
        for (rel, bytes) in &self.sources {
            write_file(&root.path().join(rel), bytes);
        }

        let text = self
            .manifest
            .replace("{{ host }}", &host.display().to_string());
        std::fs::write(root.path().join("manifest.toml"), text).expect("write manifest");

        ManifestContext { root }
    }
}

fn write_file(path: &Path, bytes: &[u8]) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("create parent dir");
    }
    std::fs::write(path, bytes).expect("write file");
}
