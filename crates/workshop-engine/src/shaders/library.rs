use std::collections::HashMap;
use std::fs;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};

/// Name of the builtin flat-color program.
pub const BUILTIN_BASIC: &str = "basic";

/// Vertex + fragment WGSL pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderSource {
    pub vertex: String,
    pub fragment: String,
}

impl ShaderSource {
    pub fn new(vertex: impl Into<String>, fragment: impl Into<String>) -> Self {
        Self {
            vertex: vertex.into(),
            fragment: fragment.into(),
        }
    }
}

/// Resolves shader names to sources.
///
/// Lookup order:
/// 1. sources registered in memory (including the builtins)
/// 2. `<root>/<name>.vert.wgsl` + `<root>/<name>.frag.wgsl`
///
/// Names are relative: absolute paths and `..` are rejected.
#[derive(Debug, Clone)]
pub struct ShaderLibrary {
    root: Option<PathBuf>,
    sources: HashMap<String, ShaderSource>,
}

impl ShaderLibrary {
    /// Library containing the builtin programs and no asset root.
    pub fn new() -> Self {
        let mut library = Self::empty();
        library.insert(
            BUILTIN_BASIC,
            ShaderSource::new(
                include_str!("builtin/basic.vert.wgsl"),
                include_str!("builtin/basic.frag.wgsl"),
            ),
        );
        library
    }

    pub fn empty() -> Self {
        Self {
            root: None,
            sources: HashMap::new(),
        }
    }

    /// Directory searched for `<name>.vert.wgsl` / `<name>.frag.wgsl`.
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    pub fn insert(&mut self, name: impl Into<String>, source: ShaderSource) {
        self.sources.insert(name.into(), source);
    }

    pub fn resolve(&self, name: &str) -> Result<ShaderSource> {
        check_name(name)?;

        if let Some(source) = self.sources.get(name) {
            return Ok(source.clone());
        }

        let root = self
            .root
            .as_deref()
            .with_context(|| format!("no shader named `{name}` and no shader root configured"))?;

        let read = |ext: &str| {
            let path = root.join(format!("{name}.{ext}.wgsl"));
            fs::read_to_string(&path).with_context(|| format!("failed to read {}", path.display()))
        };

        Ok(ShaderSource {
            vertex: read("vert")?,
            fragment: read("frag")?,
        })
    }
}

impl Default for ShaderLibrary {
    fn default() -> Self {
        Self::new()
    }
}

fn check_name(name: &str) -> Result<()> {
    anyhow::ensure!(!name.trim().is_empty(), "shader name is empty");
    let relative = Path::new(name)
        .components()
        .all(|c| matches!(c, Component::Normal(_)));
    anyhow::ensure!(relative, "shader name `{name}` must be a relative path without `..`");
    Ok(())
}
