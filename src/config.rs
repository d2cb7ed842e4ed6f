//! Runtime settings read from the environment (and `.env`, loaded by `main`).
//!
//! | variable                | default      |
//! |-------------------------|--------------|
//! | `HARVEST_OUTPUT_DIR`    | `.`          |
//! | `HARVEST_AREA_POLICY`   | `first-seen` |
//! | `HARVEST_CSV_DELIMITER` | `,`          |
//! | `HARVEST_CHART_SIZE`    | `1200x600`   |

use std::path::PathBuf;

use anyhow::{Result, anyhow, bail};

use crate::import::{AreaPolicy, ImportOptions};

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub output_dir: PathBuf,
    pub area_policy: AreaPolicy,
    pub csv_delimiter: u8,
    pub chart_size: (u32, u32),
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            area_policy: AreaPolicy::FirstSeen,
            csv_delimiter: b',',
            chart_size: (1200, 600),
        }
    }
}

impl Settings {
    /// Reads settings from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads settings through `lookup`, falling back to defaults for unset keys.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut settings = Settings::default();

        if let Some(dir) = lookup("HARVEST_OUTPUT_DIR") {
            settings.output_dir = PathBuf::from(dir);
        }
        if let Some(policy) = lookup("HARVEST_AREA_POLICY") {
            settings.area_policy = policy.parse().map_err(|e: String| anyhow!(e))?;
        }
        if let Some(delimiter) = lookup("HARVEST_CSV_DELIMITER") {
            settings.csv_delimiter = parse_delimiter(&delimiter)?;
        }
        if let Some(size) = lookup("HARVEST_CHART_SIZE") {
            settings.chart_size = parse_size(&size)?;
        }

        Ok(settings)
    }

    pub fn import_options(&self) -> ImportOptions {
        ImportOptions {
            area_policy: self.area_policy,
            delimiter: self.csv_delimiter,
            ..Default::default()
        }
    }
}

/// Parses a single-byte CSV delimiter; `tab` and `\t` mean a tab.
pub fn parse_delimiter(value: &str) -> Result<u8> {
    match value {
        "tab" | "\\t" | "\t" => Ok(b'\t'),
        v if v.len() == 1 => Ok(v.as_bytes()[0]),
        v => bail!("csv delimiter must be a single character, got {v:?}"),
    }
}

/// Parses `WIDTHxHEIGHT` in pixels.
pub fn parse_size(value: &str) -> Result<(u32, u32)> {
    let (w, h) = value
        .trim()
        .split_once(['x', 'X'])
        .ok_or_else(|| anyhow!("chart size must look like 1200x600, got {value:?}"))?;
    let size = (w.trim().parse::<u32>()?, h.trim().parse::<u32>()?);
    if size.0 == 0 || size.1 == 0 {
        bail!("chart size must be non-zero, got {value:?}");
    }
    Ok(size)
}
