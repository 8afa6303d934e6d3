//! Loads `.sw` score files from disk and compiles them.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::dsl::{CompileError, Compiler, Song};

/// Extension of score files.
pub const SCORE_EXTENSION: &str = "sw";

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("{path}: {source}")]
    Compile {
        path: PathBuf,
        source: CompileError,
    },
}

/// A compiled score together with where it came from.
#[derive(Debug, Clone)]
pub struct LoadedSong {
    pub path: PathBuf,
    pub source: String,
    pub song: Song,
}

impl LoadedSong {
    /// File name without the extension.
    pub fn name(&self) -> &str {
        self.path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
    }
}

pub fn read_source(path: &Path) -> Result<String, LoadError> {
    std::fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })
}

pub fn compile_file(path: &Path) -> Result<LoadedSong, LoadError> {
    let source = read_source(path)?;
    let song = Compiler::compile(&source).map_err(|source| LoadError::Compile {
        path: path.to_path_buf(),
        source,
    })?;
    log::debug!("loaded {}", path.display());
    Ok(LoadedSong {
        path: path.to_path_buf(),
        source,
        song,
    })
}

/// Compile every `.sw` file directly inside `dir`, sorted by path. Stops at
/// the first file that fails.
pub fn compile_dir(dir: &Path) -> Result<Vec<LoadedSong>, LoadError> {
    let io_error = |source| LoadError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_error)? {
        let path = entry.map_err(io_error)?.path();
        if path.is_file() && path.extension().is_some_and(|e| e == SCORE_EXTENSION) {
            paths.push(path);
        }
    }
    paths.sort();
    paths.iter().map(|p| compile_file(p)).collect()
}
