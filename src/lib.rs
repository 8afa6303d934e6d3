//! SongWalker: a score language compiler and a track-walking runtime that
//! analyzes, renders or plays the compiled song.

pub mod audio;
pub mod config;
pub mod dsl;
pub mod instrument;
pub mod loader;
pub mod preset;
pub mod walker;
