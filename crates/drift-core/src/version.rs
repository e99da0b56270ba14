//! The version value type used for gating migrations.
//!
//! A [`Version`] is an ordered sequence of non-negative integers, commonly
//! one to three components (major, minor, build). Comparison is
//! lexicographic with the shorter sequence padded with zeros, so `1.0` and
//! `1.0.0` compare equal and `0.9` sorts before `1.0.0`.
//!
//! # Example
//!
//! ```rust
//! use drift_core::version::Version;
//!
//! let app = Version::parse("1.0.0", ".").unwrap();
//! let group = Version::parse("0.9", ".").unwrap();
//! assert!(group <= app);
//! ```

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Error parsing a version string.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum VersionParseError {
    /// The version string contained no components.
    #[error("version '{0}' has no components")]
    Empty(String),

    /// A component was empty or not a non-negative integer.
    #[error("version '{version}' has invalid component '{component}'")]
    InvalidComponent {
        /// The full version string being parsed.
        version: String,
        /// The offending component.
        component: String,
    },

    /// The version had more components than the configured limit allows.
    #[error("version '{version}' has {found} components, limit is {limit}")]
    TooManyComponents {
        /// The full version string being parsed.
        version: String,
        /// Number of components found.
        found: usize,
        /// The configured component limit.
        limit: usize,
    },
}

/// An ordered application or migration-group version.
///
/// Immutable value type; ordering pads the shorter sequence with zeros and
/// compares element-wise left to right.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(Vec<u32>);

impl Version {
    /// Creates a version from explicit components.
    ///
    /// An empty component list normalizes to version `0`.
    #[must_use]
    pub fn new(components: impl Into<Vec<u32>>) -> Self {
        let components = components.into();
        if components.is_empty() {
            Self(vec![0])
        } else {
            Self(components)
        }
    }

    /// Parses a version from a delimited string, e.g. `"1.0.3"` with `"."`
    /// or `"1_2"` with `"_"`. There is no limit on the component count.
    ///
    /// # Errors
    ///
    /// Returns [`VersionParseError`] if the string has no components or any
    /// component is empty or non-numeric.
    pub fn parse(text: &str, delimiter: &str) -> Result<Self, VersionParseError> {
        Self::parse_with_limit(text, delimiter, None)
    }

    /// Parses a version with an optional cap on the component count.
    ///
    /// Some deployments cap versions at three components (major, minor,
    /// build); pass `Some(3)` to enforce that convention.
    ///
    /// # Errors
    ///
    /// Returns [`VersionParseError`] on empty input, non-numeric components,
    /// or more components than `limit` allows.
    pub fn parse_with_limit(
        text: &str,
        delimiter: &str,
        limit: Option<usize>,
    ) -> Result<Self, VersionParseError> {
        if text.is_empty() || delimiter.is_empty() {
            return Err(VersionParseError::Empty(text.to_string()));
        }

        let tokens: Vec<&str> = text.split(delimiter).collect();
        if let Some(limit) = limit {
            if tokens.len() > limit {
                return Err(VersionParseError::TooManyComponents {
                    version: text.to_string(),
                    found: tokens.len(),
                    limit,
                });
            }
        }

        let mut components = Vec::with_capacity(tokens.len());
        for token in tokens {
            let number = token
                .parse::<u32>()
                .map_err(|_| VersionParseError::InvalidComponent {
                    version: text.to_string(),
                    component: token.to_string(),
                })?;
            components.push(number);
        }

        Ok(Self(components))
    }

    /// Parses a version embedded in a prefixed migration-group name.
    ///
    /// The convention is `{prefix}{version}__{description}` with `_` as the
    /// version delimiter, e.g. `V1_2__add_users` with prefix `"V"` parses
    /// as version `1.2`. The trailing `__description` part is optional.
    ///
    /// # Errors
    ///
    /// Returns [`VersionParseError`] if the name does not start with the
    /// prefix or the embedded version is invalid.
    pub fn from_prefixed_name(name: &str, prefix: &str) -> Result<Self, VersionParseError> {
        let stripped = name
            .strip_prefix(prefix)
            .ok_or_else(|| VersionParseError::Empty(name.to_string()))?;
        let version_part = stripped.split("__").next().unwrap_or(stripped);
        let version_part = version_part.strip_prefix('_').unwrap_or(version_part);
        Self::parse(version_part, "_")
    }

    /// Returns the version components.
    #[must_use]
    pub fn components(&self) -> &[u32] {
        &self.0
    }
}

impl Default for Version {
    fn default() -> Self {
        Self(vec![0])
    }
}

// Equality and hashing must agree with the zero-padding comparison, so
// both operate on the components with trailing zeros stripped.
impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl std::hash::Hash for Version {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        let trimmed = self.0.iter().rposition(|&c| c != 0).map_or(0, |i| i + 1);
        self.0[..trimmed].hash(state);
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.0.len().max(other.0.len());
        for i in 0..len {
            let left = self.0.get(i).copied().unwrap_or(0);
            let right = other.0.get(i).copied().unwrap_or(0);
            match left.cmp(&right) {
                Ordering::Equal => {}
                unequal => return unequal,
            }
        }
        Ordering::Equal
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for component in &self.0 {
            if !first {
                write!(f, ".")?;
            }
            write!(f, "{component}")?;
            first = false;
        }
        Ok(())
    }
}
