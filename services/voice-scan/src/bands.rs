//! Band table - static scan targets grouped by band
//!
//! The built-in table covers the HF/VHF/UHF amateur and ISM channels. A TOML
//! file can replace it:
//!
//! ```toml
//! [bands.hf]
//! frequencies = [3.7e6, 7.1e6]
//! sample_rate = 48000
//! modulation = "am"
//! output_dir = "recordings_hf"
//!
//! [bands.vhf]
//! range = { start_mhz = 144.0, end_mhz = 148.0, step_khz = 25.0 }
//! sample_rate = 240000
//! modulation = "fm"
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::sdr::Modulation;

#[derive(Debug, Error)]
pub enum BandError {
    #[error("failed to read band file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid band file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("band '{band}': {reason}")]
    Invalid { band: String, reason: String },

    #[error("unknown band '{name}' (available: {available})")]
    UnknownBand { name: String, available: String },
}

/// One band: what to scan and how to demodulate it
#[derive(Debug, Clone, PartialEq)]
pub struct BandConfig {
    pub name: String,
    /// Scan order, Hz
    pub frequencies: Vec<f64>,
    pub sample_rate: u32,
    pub modulation: Modulation,
    /// Output location tag, relative to the output root
    pub output_dir: String,
}

/// Inclusive channel list `start, start + step, ...` up to `end`, in Hz
pub fn band_range(start_mhz: f64, end_mhz: f64, step_khz: f64) -> Vec<f64> {
    if step_khz <= 0.0 || end_mhz < start_mhz {
        return Vec::new();
    }
    let span_khz = (end_mhz - start_mhz) * 1e3;
    let steps = (span_khz / step_khz + 1e-9).floor() as usize;
    (0..=steps)
        .map(|i| (start_mhz * 1e6 + i as f64 * step_khz * 1e3).round())
        .collect()
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RangeEntry {
    start_mhz: f64,
    end_mhz: f64,
    step_khz: f64,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct BandEntry {
    frequencies: Option<Vec<f64>>,
    range: Option<RangeEntry>,
    sample_rate: u32,
    modulation: Modulation,
    output_dir: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BandFile {
    bands: BTreeMap<String, BandEntry>,
}

impl BandEntry {
    fn into_config(self, name: String) -> Result<BandConfig, BandError> {
        let invalid = |reason: &str| BandError::Invalid {
            band: name.clone(),
            reason: reason.to_string(),
        };

        let frequencies = match (self.frequencies, self.range) {
            (Some(list), None) => list,
            (None, Some(r)) => {
                if r.step_khz <= 0.0 || r.end_mhz < r.start_mhz {
                    return Err(invalid("range needs step_khz > 0 and end_mhz >= start_mhz"));
                }
                band_range(r.start_mhz, r.end_mhz, r.step_khz)
            }
            (Some(_), Some(_)) => return Err(invalid("set either frequencies or range, not both")),
            (None, None) => return Err(invalid("no frequencies or range")),
        };

        let output_dir = self
            .output_dir
            .unwrap_or_else(|| format!("recordings_{}", name));

        let band = BandConfig {
            name,
            frequencies,
            sample_rate: self.sample_rate,
            modulation: self.modulation,
            output_dir,
        };
        band.validate()?;
        Ok(band)
    }
}

impl BandConfig {
    fn validate(&self) -> Result<(), BandError> {
        let invalid = |reason: String| BandError::Invalid {
            band: self.name.clone(),
            reason,
        };
        if self.frequencies.is_empty() {
            return Err(invalid("empty frequency list".into()));
        }
        if let Some(f) = self.frequencies.iter().find(|f| !f.is_finite() || **f <= 0.0) {
            return Err(invalid(format!("frequency {} is not a positive number", f)));
        }
        if self.sample_rate == 0 {
            return Err(invalid("sample_rate must be positive".into()));
        }
        if self.output_dir.trim().is_empty() {
            return Err(invalid("empty output_dir".into()));
        }
        Ok(())
    }
}

/// All configured bands, immutable after startup
#[derive(Debug, Clone)]
pub struct BandTable {
    bands: BTreeMap<String, BandConfig>,
}

impl BandTable {
    pub fn builtin() -> Self {
        let bands = [
            BandConfig {
                name: "hf".into(),
                frequencies: vec![3.7e6, 7.1e6, 14.2e6, 21.3e6],
                sample_rate: 48_000,
                modulation: Modulation::Am,
                output_dir: "recordings_hf".into(),
            },
            BandConfig {
                name: "vhf".into(),
                frequencies: band_range(144.0, 148.0, 25.0),
                sample_rate: 240_000,
                modulation: Modulation::Fm,
                output_dir: "recordings_vhf".into(),
            },
            BandConfig {
                name: "uhf".into(),
                frequencies: vec![433.92e6, 446.0e6],
                sample_rate: 240_000,
                modulation: Modulation::Fm,
                output_dir: "recordings_uhf".into(),
            },
        ];
        Self {
            bands: bands.into_iter().map(|b| (b.name.clone(), b)).collect(),
        }
    }

    pub fn from_toml_str(text: &str) -> Result<Self, BandError> {
        let file: BandFile = toml::from_str(text)?;
        let mut bands = BTreeMap::new();
        for (name, entry) in file.bands {
            let band = entry.into_config(name.to_ascii_lowercase())?;
            bands.insert(band.name.clone(), band);
        }
        if bands.is_empty() {
            return Err(BandError::Invalid {
                band: "*".into(),
                reason: "band file defines no bands".into(),
            });
        }
        Ok(Self { bands })
    }

    pub fn load(path: &Path) -> Result<Self, BandError> {
        let text = std::fs::read_to_string(path).map_err(|source| BandError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Look up a band by case-insensitive name
    pub fn get(&self, name: &str) -> Result<&BandConfig, BandError> {
        self.bands
            .get(&name.to_ascii_lowercase())
            .ok_or_else(|| BandError::UnknownBand {
                name: name.to_string(),
                available: self.bands.keys().cloned().collect::<Vec<_>>().join(", "),
            })
    }
}
