//! Controller firmware versions
//!
//! Controllers report versions like `8.10.0.7_89354`. Only the dotted numeric
//! prefix takes part in ordering; the build suffix is kept for display.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Firmware parse errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FirmwareParseError {
    /// No numeric components found
    #[error("empty firmware version")]
    Empty,

    /// A component was not a number
    #[error("invalid firmware component '{0}'")]
    InvalidComponent(String),
}

/// Dotted firmware version
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FirmwareVersion {
    /// Numeric components, most significant first
    pub components: Vec<u32>,
    /// Build suffix after `_`, if any
    pub build: Option<String>,
}

impl FirmwareVersion {
    /// Create from numeric components
    #[inline]
    #[must_use]
    pub fn new(components: impl Into<Vec<u32>>) -> Self {
        Self {
            components: components.into(),
            build: None,
        }
    }

    /// True when this version is at least `minimum`
    #[must_use]
    pub fn at_least(&self, minimum: &FirmwareVersion) -> bool {
        self.cmp_numeric(minimum) != std::cmp::Ordering::Less
    }

    fn cmp_numeric(&self, other: &FirmwareVersion) -> std::cmp::Ordering {
        let len = self.components.len().max(other.components.len());
        for i in 0..len {
            let a = self.components.get(i).copied().unwrap_or(0);
            let b = other.components.get(i).copied().unwrap_or(0);
            match a.cmp(&b) {
                std::cmp::Ordering::Equal => continue,
                ord => return ord,
            }
        }
        std::cmp::Ordering::Equal
    }
}

impl PartialOrd for FirmwareVersion {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp_numeric(other))
    }
}

impl FromStr for FirmwareVersion {
    type Err = FirmwareParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let (numeric, build) = match trimmed.split_once('_') {
            Some((n, b)) => (n, Some(b.to_string())),
            None => (trimmed, None),
        };
        if numeric.is_empty() {
            return Err(FirmwareParseError::Empty);
        }
        let components = numeric
            .split('.')
            .map(|c| {
                c.parse::<u32>()
                    .map_err(|_| FirmwareParseError::InvalidComponent(c.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { components, build })
    }
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dotted: Vec<String> = self.components.iter().map(u32::to_string).collect();
        write!(f, "{}", dotted.join("."))?;
        if let Some(build) = &self.build {
            write!(f, "_{build}")?;
        }
        Ok(())
    }
}
