//! Semantic band name to channel index lookup per satellite source

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Satellite product family an image comes from
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SatelliteSource {
    Sentinel2,
    Landsat8,
    /// Any source without a dedicated band table
    Other(String),
}

impl SatelliteSource {
    pub fn parse(source: &str) -> Self {
        match source.trim().to_ascii_lowercase().as_str() {
            "sentinel-2" | "sentinel2" | "s2" => SatelliteSource::Sentinel2,
            "landsat-8" | "landsat8" | "l8" => SatelliteSource::Landsat8,
            _ => SatelliteSource::Other(source.to_string()),
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, SatelliteSource::Other(_))
    }
}

impl From<&str> for SatelliteSource {
    fn from(source: &str) -> Self {
        SatelliteSource::parse(source)
    }
}

impl fmt::Display for SatelliteSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SatelliteSource::Sentinel2 => write!(f, "sentinel-2"),
            SatelliteSource::Landsat8 => write!(f, "landsat-8"),
            SatelliteSource::Other(name) => write!(f, "{}", name),
        }
    }
}

/// Semantic spectral band
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Band {
    Blue,
    Green,
    Red,
    Nir,
    Swir1,
    Swir2,
}

impl Band {
    pub const ALL: [Band; 6] = [
        Band::Blue,
        Band::Green,
        Band::Red,
        Band::Nir,
        Band::Swir1,
        Band::Swir2,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Band::Blue => "blue",
            Band::Green => "green",
            Band::Red => "red",
            Band::Nir => "nir",
            Band::Swir1 => "swir1",
            Band::Swir2 => "swir2",
        }
    }
}

impl FromStr for Band {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "blue" => Ok(Band::Blue),
            "green" => Ok(Band::Green),
            "red" => Ok(Band::Red),
            "nir" => Ok(Band::Nir),
            "swir1" => Ok(Band::Swir1),
            "swir2" => Ok(Band::Swir2),
            _ => Err(format!("Unknown band name: {}", s)),
        }
    }
}

impl fmt::Display for Band {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Fixed 1-based channel indices of the semantic bands for one source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BandTable {
    pub blue: usize,
    pub green: usize,
    pub red: usize,
    pub nir: usize,
    pub swir1: usize,
    pub swir2: usize,
}

impl BandTable {
    pub const SENTINEL_2: BandTable = BandTable {
        blue: 1,
        green: 2,
        red: 3,
        nir: 7,
        swir1: 11,
        swir2: 12,
    };

    pub const LANDSAT_8: BandTable = BandTable {
        blue: 1,
        green: 2,
        red: 3,
        nir: 4,
        swir1: 5,
        swir2: 6,
    };

    /// Ordering used for sources without a dedicated table
    pub const FALLBACK: BandTable = BandTable {
        blue: 1,
        green: 2,
        red: 3,
        nir: 4,
        swir1: 5,
        swir2: 6,
    };

    /// 1-based channel index of `band`
    pub fn index(&self, band: Band) -> usize {
        match band {
            Band::Blue => self.blue,
            Band::Green => self.green,
            Band::Red => self.red,
            Band::Nir => self.nir,
            Band::Swir1 => self.swir1,
            Band::Swir2 => self.swir2,
        }
    }
}

/// Process-wide, immutable band registry
#[derive(Debug, Clone, Default)]
pub struct BandRegistry;

impl BandRegistry {
    pub fn standard() -> Self {
        BandRegistry
    }

    /// Band table for a source, falling back to the default ordering
    pub fn table(&self, source: &SatelliteSource) -> &'static BandTable {
        if let SatelliteSource::Other(name) = source {
            log::warn!("Unknown source: {}, using default band indices", name);
        }
        Self::lookup(source)
    }

    fn lookup(source: &SatelliteSource) -> &'static BandTable {
        match source {
            SatelliteSource::Sentinel2 => &BandTable::SENTINEL_2,
            SatelliteSource::Landsat8 => &BandTable::LANDSAT_8,
            SatelliteSource::Other(_) => &BandTable::FALLBACK,
        }
    }

    /// 1-based channel index of a named band, `None` for unknown band names
    pub fn resolve(&self, source: &SatelliteSource, band_name: &str) -> Option<usize> {
        match band_name.parse::<Band>() {
            Ok(band) => Some(self.table(source).index(band)),
            Err(e) => {
                log::warn!("{}", e);
                None
            }
        }
    }

    /// 0-based channel of `band` in an image with `band_count` bands.
    ///
    /// `None` when the product does not carry that band.
    pub fn channel(
        &self,
        source: &SatelliteSource,
        band: Band,
        band_count: usize,
    ) -> Option<usize> {
        let channel = Self::lookup(source).index(band) - 1;
        if channel < band_count {
            Some(channel)
        } else {
            log::debug!(
                "Band {} (index {}) not available in image with {} bands",
                band,
                channel + 1,
                band_count
            );
            None
        }
    }

    /// Resolve several bands at once; `None` if any of them is missing
    pub fn channels<const N: usize>(
        &self,
        source: &SatelliteSource,
        bands: [Band; N],
        band_count: usize,
    ) -> Option<[usize; N]> {
        let mut channels = [0usize; N];
        for (slot, band) in channels.iter_mut().zip(bands) {
            *slot = self.channel(source, band, band_count)?;
        }
        Some(channels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinel2_table() {
        let registry = BandRegistry::standard();
        let s2 = SatelliteSource::parse("Sentinel-2");
        assert_eq!(s2, SatelliteSource::Sentinel2);
        assert_eq!(registry.resolve(&s2, "nir"), Some(7));
        assert_eq!(registry.resolve(&s2, "swir1"), Some(11));
        assert_eq!(registry.resolve(&s2, "pan"), None);
    }

    #[test]
    fn test_unknown_source_falls_back() {
        let registry = BandRegistry::standard();
        let source = SatelliteSource::parse("planetscope");
        assert!(!source.is_known());
        for (i, band) in Band::ALL.iter().enumerate() {
            assert_eq!(registry.table(&source).index(*band), i + 1);
        }
    }

    #[test]
    fn test_channel_out_of_range() {
        let registry = BandRegistry::standard();
        let source = SatelliteSource::Landsat8;
        assert_eq!(registry.channel(&source, Band::Nir, 4), Some(3));
        assert_eq!(registry.channel(&source, Band::Swir1, 4), None);
        assert_eq!(
            registry.channels(&source, [Band::Red, Band::Nir], 4),
            Some([2, 3])
        );
        assert_eq!(registry.channels(&source, [Band::Swir1, Band::Nir], 4), None);
    }

    #[test]
    fn test_indices_unique_per_table() {
        for table in [BandTable::SENTINEL_2, BandTable::LANDSAT_8, BandTable::FALLBACK] {
            let mut indices: Vec<usize> = Band::ALL.iter().map(|b| table.index(*b)).collect();
            indices.sort_unstable();
            indices.dedup();
            assert_eq!(indices.len(), Band::ALL.len());
        }
    }
}
