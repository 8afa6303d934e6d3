//! Presets: named instrument and effect loaders, grouped into banks.
//!
//! A [`PresetCatalog`] is built once from one or more [`PresetBank`]s and is
//! read-only afterwards. `loadPreset('name')` resolves a preset by a
//! case-insensitive pattern over titles and asks its [`InstrumentLoader`] for a
//! [`Handler`].

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use regex::{Regex, RegexBuilder};

use crate::walker::error::WalkerError;
use crate::walker::state::{TrackState, Value};

/// What a handler tells `execute` after seeing a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerFlow {
    Continue,
    /// Stop processing: later effects and the instrument never see it.
    Veto,
}

/// An instrument or effect. Effects may rewrite the effective state (routing,
/// velocity, ...) before the instrument handles the command.
pub trait Handler {
    fn name(&self) -> &str;

    fn handle(&self, track: &mut TrackState, command: &str) -> Result<HandlerFlow, WalkerError>;
}

pub type HandlerRef = Rc<dyn Handler>;

/// Song-level context handed to loaders.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SongContext {
    pub sample_rate: u32,
}

pub type PresetConfig = BTreeMap<String, Value>;

pub trait InstrumentLoader {
    fn load(&self, song: &SongContext, config: &PresetConfig) -> Result<HandlerRef, WalkerError>;
}

/// Whether a preset plays notes or processes another instrument's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresetKind {
    Instrument,
    Effect,
}

#[derive(Clone)]
pub struct Preset {
    pub title: String,
    pub kind: PresetKind,
    pub loader: Rc<dyn InstrumentLoader>,
    pub config: PresetConfig,
}

impl fmt::Debug for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Preset")
            .field("title", &self.title)
            .field("kind", &self.kind)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Preset {
    pub fn new(title: impl Into<String>, loader: Rc<dyn InstrumentLoader>) -> Self {
        Self {
            title: title.into(),
            kind: PresetKind::Instrument,
            loader,
            config: PresetConfig::new(),
        }
    }

    pub fn effect(title: impl Into<String>, loader: Rc<dyn InstrumentLoader>) -> Self {
        Self {
            kind: PresetKind::Effect,
            ..Self::new(title, loader)
        }
    }

    pub fn with_config(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.config.insert(key.to_string(), value.into());
        self
    }

    /// Instantiate with the call's config layered over the preset's own.
    pub fn instantiate(
        &self,
        song: &SongContext,
        overrides: &PresetConfig,
    ) -> Result<HandlerRef, WalkerError> {
        let mut config = self.config.clone();
        config.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.loader.load(song, &config)
    }
}

/// A source of presets.
pub trait PresetBank {
    fn name(&self) -> &str;

    fn presets(&self) -> Box<dyn Iterator<Item = Preset> + '_>;
}

/// A bank backed by a plain list.
pub struct ListBank {
    name: String,
    presets: Vec<Preset>,
}

impl ListBank {
    pub fn new(name: impl Into<String>, presets: Vec<Preset>) -> Self {
        Self {
            name: name.into(),
            presets,
        }
    }
}

impl PresetBank for ListBank {
    fn name(&self) -> &str {
        &self.name
    }

    fn presets(&self) -> Box<dyn Iterator<Item = Preset> + '_> {
        Box::new(self.presets.iter().cloned())
    }
}

/// Immutable set of banks searched in registration order.
#[derive(Default)]
pub struct PresetCatalog {
    banks: Vec<Box<dyn PresetBank>>,
}

#[derive(Default)]
pub struct PresetCatalogBuilder {
    banks: Vec<Box<dyn PresetBank>>,
}

impl PresetCatalogBuilder {
    pub fn bank(mut self, bank: impl PresetBank + 'static) -> Self {
        self.banks.push(Box::new(bank));
        self
    }

    pub fn build(self) -> PresetCatalog {
        PresetCatalog { banks: self.banks }
    }
}

impl PresetCatalog {
    pub fn builder() -> PresetCatalogBuilder {
        PresetCatalogBuilder::default()
    }

    /// The catalog with only the built-in instrument bank.
    pub fn with_builtin() -> Self {
        Self::builder()
            .bank(crate::instrument::builtin_bank())
            .build()
    }

    pub fn bank_names(&self) -> impl Iterator<Item = &str> {
        self.banks.iter().map(|b| b.name())
    }

    /// First preset whose title matches `query`, case-insensitively.
    ///
    /// The query is a regex; if it does not parse it is matched literally.
    pub fn find(&self, query: &str) -> Result<Preset, WalkerError> {
        let not_found = || WalkerError::PresetNotFound(query.to_string());
        let pattern = title_pattern(query).ok_or_else(not_found)?;
        self.banks
            .iter()
            .flat_map(|bank| bank.presets())
            .find(|preset| pattern.is_match(&preset.title))
            .ok_or_else(not_found)
    }
}

fn title_pattern(query: &str) -> Option<Regex> {
    let build = |p: &str| RegexBuilder::new(p).case_insensitive(true).build().ok();
    build(query).or_else(|| build(&regex::escape(query)))
}
