//! Asset sources for shader text and images.
//!
//! Paths are relative and `/`-separated. Fetching is the only suspension
//! point in resource creation; a failed fetch is reported, never replaced by
//! a default.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Component, Path, PathBuf};
use std::pin::Pin;

use crate::gpu::ImageData;

/// Errors that can occur while fetching or decoding an asset.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("asset `{0}` not found")]
    NotFound(String),
    #[error("asset path `{0}` escapes the asset root")]
    InvalidPath(String),
    #[error("failed to read `{path}`: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("asset `{0}` is not valid UTF-8")]
    Encoding(String),
    #[error("failed to decode image `{path}`: {source}")]
    Decode {
        path: String,
        #[source]
        source: image::ImageError,
    },
}

pub type AssetFuture<'a> = Pin<Box<dyn Future<Output = Result<Vec<u8>, LoadError>> + 'a>>;

/// Resolves relative asset paths to bytes.
pub trait AssetSource {
    fn read<'a>(&'a self, path: &'a str) -> AssetFuture<'a>;
}

fn normalize(path: &str) -> &str {
    path.trim_start_matches("./").trim_start_matches('/')
}

/// Fetches a UTF-8 text asset.
pub async fn load_text(source: &dyn AssetSource, path: &str) -> Result<String, LoadError> {
    let bytes = source.read(path).await?;
    String::from_utf8(bytes).map_err(|_| LoadError::Encoding(path.to_string()))
}

/// Fetches and decodes an image into RGBA8.
pub async fn load_image(source: &dyn AssetSource, path: &str) -> Result<ImageData, LoadError> {
    let bytes = source.read(path).await?;
    decode_image(path, &bytes)
}

pub fn decode_image(path: &str, bytes: &[u8]) -> Result<ImageData, LoadError> {
    let image = image::load_from_memory(bytes)
        .map_err(|source| LoadError::Decode {
            path: path.to_string(),
            source,
        })?
        .to_rgba8();
    let (width, height) = image.dimensions();
    Ok(ImageData {
        width,
        height,
        pixels: image.into_raw(),
    })
}

/// Files below a root directory.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, LoadError> {
        let relative = Path::new(normalize(path));
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(LoadError::InvalidPath(path.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

impl AssetSource for DirectorySource {
    fn read<'a>(&'a self, path: &'a str) -> AssetFuture<'a> {
        Box::pin(async move {
            let full = self.resolve(path)?;
            std::fs::read(&full).map_err(|source| {
                if source.kind() == std::io::ErrorKind::NotFound {
                    LoadError::NotFound(path.to_string())
                } else {
                    LoadError::Io {
                        path: path.to_string(),
                        source,
                    }
                }
            })
        })
    }
}

/// In-memory assets, mostly for tests and generated content.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    files: HashMap<String, Vec<u8>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: &str, bytes: impl Into<Vec<u8>>) {
        self.files.insert(normalize(path).to_string(), bytes.into());
    }

    pub fn with(mut self, path: &str, bytes: impl Into<Vec<u8>>) -> Self {
        self.insert(path, bytes);
        self
    }
}

impl AssetSource for MemorySource {
    fn read<'a>(&'a self, path: &'a str) -> AssetFuture<'a> {
        Box::pin(async move {
            self.files
                .get(normalize(path))
                .cloned()
                .ok_or_else(|| LoadError::NotFound(path.to_string()))
        })
    }
}

/// Text assets compiled into the binary.
#[derive(Debug, Clone, Copy)]
pub struct EmbeddedSource {
    entries: &'static [(&'static str, &'static str)],
}

impl EmbeddedSource {
    pub const fn new(entries: &'static [(&'static str, &'static str)]) -> Self {
        Self { entries }
    }

    pub fn paths(&self) -> impl Iterator<Item = &'static str> {
        self.entries.iter().map(|(path, _)| *path)
    }
}

impl AssetSource for EmbeddedSource {
    fn read<'a>(&'a self, path: &'a str) -> AssetFuture<'a> {
        Box::pin(async move {
            let wanted = normalize(path);
            self.entries
                .iter()
                .find(|(p, _)| *p == wanted)
                .map(|(_, text)| text.as_bytes().to_vec())
                .ok_or_else(|| LoadError::NotFound(path.to_string()))
        })
    }
}

/// Tries each layer in order; the first layer holding the path wins.
#[derive(Default)]
pub struct LayeredSource {
    layers: Vec<Box<dyn AssetSource>>,
}

impl LayeredSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(mut self, layer: impl AssetSource + 'static) -> Self {
        self.layers.push(Box::new(layer));
        self
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

impl AssetSource for LayeredSource {
    fn read<'a>(&'a self, path: &'a str) -> AssetFuture<'a> {
        Box::pin(async move {
            for layer in &self.layers {
                match layer.read(path).await {
                    Err(LoadError::NotFound(_)) => continue,
                    other => return other,
                }
            }
            Err(LoadError::NotFound(path.to_string()))
        })
    }
}
