//! HNSW tuning parameters.

use crate::error::{FacetError, Result};
use crate::settings::{Settings, SettingsError};
use serde::{Deserialize, Serialize};

/// Default number of bidirectional links per node on upper layers.
pub const DEFAULT_M: usize = 16;
/// Default candidate list size while building.
pub const DEFAULT_EF_CONSTRUCTION: usize = 200;
/// Default candidate list size while searching.
pub const DEFAULT_EF_SEARCH: usize = 64;
pub const DEFAULT_MAX_LAYERS: usize = 16;
pub const DEFAULT_SEED: u64 = 0x5eed_f00d;

const SETTINGS_SECTION: &str = "index";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Links per node on layers above 0.
    pub m: usize,
    /// Links per node on layer 0 (typically `2 * m`).
    pub m_max0: usize,
    pub ef_construction: usize,
    /// Beam width at query time. Populations no larger than this are scanned exactly.
    pub ef_search: usize,
    pub max_layers: usize,
    /// Seeds per-position layer assignment, so equal inputs build equal graphs.
    pub seed: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            m: DEFAULT_M,
            m_max0: DEFAULT_M * 2,
            ef_construction: DEFAULT_EF_CONSTRUCTION,
            ef_search: DEFAULT_EF_SEARCH,
            max_layers: DEFAULT_MAX_LAYERS,
            seed: DEFAULT_SEED,
        }
    }
}

impl IndexConfig {
    /// Defaults overridden by the `[index]` section.
    pub fn from_settings(settings: &Settings) -> std::result::Result<Self, SettingsError> {
        let mut config = Self::default();
        if let Some(m) = settings.get_usize(SETTINGS_SECTION, "m")? {
            config.m = m;
            config.m_max0 = m * 2;
        }
        if let Some(v) = settings.get_usize(SETTINGS_SECTION, "m_max0")? {
            config.m_max0 = v;
        }
        if let Some(v) = settings.get_usize(SETTINGS_SECTION, "ef_construction")? {
            config.ef_construction = v;
        }
        if let Some(v) = settings.get_usize(SETTINGS_SECTION, "ef_search")? {
            config.ef_search = v;
        }
        if let Some(v) = settings.get_usize(SETTINGS_SECTION, "max_layers")? {
            config.max_layers = v;
        }
        if let Some(v) = settings.get_int(SETTINGS_SECTION, "seed")? {
            config.seed = v as u64;
        }
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.m < 2 || self.m_max0 < self.m {
            return Err(FacetError::invalid_input(format!(
                "index needs m >= 2 and m_max0 >= m (m={}, m_max0={})",
                self.m, self.m_max0
            )));
        }
        if self.ef_construction == 0 || self.ef_search == 0 {
            return Err(FacetError::invalid_input("ef values must be positive"));
        }
        if self.max_layers == 0 || self.max_layers > u8::MAX as usize {
            return Err(FacetError::invalid_input(format!(
                "max_layers must be in 1..=255, got {}",
                self.max_layers
            )));
        }
        Ok(())
    }
}
