use snafu::ensure;

use crate::error::{ConfigError, GrowthUnitSnafu};

/// Default granularity of arena growth: 64 KiB.
pub const DEFAULT_GROWTH_UNIT: usize = 65536;

/// Tunables of a [`crate::Heap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapConfig {
    /// Every request to the [`crate::ProgramBreak`] is a whole multiple of
    /// this many bytes, whatever the real page size of the machine is.
    pub growth_unit: usize,
}

impl HeapConfig {
    pub const DEFAULT: Self = Self {
        growth_unit: DEFAULT_GROWTH_UNIT,
    };

    /// Builds a configuration, rejecting growth units that are not a power of
    /// two or are smaller than a machine word.
    pub fn new(growth_unit: usize) -> Result<Self, ConfigError> {
        ensure!(
            growth_unit.is_power_of_two() && growth_unit >= 8,
            GrowthUnitSnafu { unit: growth_unit }
        );

        Ok(Self { growth_unit })
    }
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_growth_unit() {
        assert_eq!(HeapConfig::default().growth_unit, 65536);
    }

    #[test]
    fn rejects_invalid_growth_units() {
        for unit in [0, 4, 12, 65535] {
            assert_eq!(HeapConfig::new(unit), Err(ConfigError::GrowthUnit { unit }));
        }

        assert_eq!(HeapConfig::new(4096).unwrap().growth_unit, 4096);
    }
}
