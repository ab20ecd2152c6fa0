//! Semantic version parsing and ordering.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Version parse failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VersionError {
    #[error("invalid version string: {input:?}")]
    Invalid { input: String },

    #[error("invalid comparator: {input:?}")]
    InvalidComparator { input: String },
}

/// A parsed product version.
///
/// Ordering follows semantic-versioning rules: numeric components compare
/// numerically, and a prerelease tag sorts before the corresponding
/// release (`6.0.0-beta1 < 6.0.0`). Within prerelease tags, dot-separated
/// identifiers compare numerically when both are numeric, otherwise
/// lexically, with numeric identifiers sorting before alphanumeric ones.
///
/// Tolerated input forms: `7.10.2`, `6.0` (patch defaults to 0),
/// `8.0.0-beta1`, and legacy `1.4.0Beta1` (the tag is stripped of leading
/// `.`, `-` or spaces and lowercased).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub prerelease: Option<String>,
}

impl Version {
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
            prerelease: None,
        }
    }

    pub fn with_prerelease(major: u64, minor: u64, patch: u64, tag: impl Into<String>) -> Self {
        Self {
            major,
            minor,
            patch,
            prerelease: Some(tag.into()),
        }
    }

    pub fn parse(input: &str) -> Result<Self, VersionError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(VersionError::Invalid {
                input: input.to_string(),
            });
        }

        // Split off the first character that cannot belong to the numeric
        // x.y.z part; everything after it is the prerelease tag.
        let split_at = trimmed
            .char_indices()
            .find(|(_, c)| !c.is_ascii_digit() && *c != '.')
            .map(|(i, _)| i)
            .unwrap_or(trimmed.len());
        let (numeric, tag) = trimmed.split_at(split_at);
        // Dot-joined tags ("1.4.0.Beta1") leave the separator on the
        // numeric side; it belongs to the tag.
        let numeric = numeric.trim_end_matches('.');

        let mut parts = numeric.split('.');
        let major = parse_component(parts.next(), input)?;
        let minor = match parts.next() {
            Some(s) => parse_component(Some(s), input)?,
            None => 0,
        };
        let patch = match parts.next() {
            Some(s) => parse_component(Some(s), input)?,
            None => 0,
        };
        if parts.next().is_some() {
            return Err(VersionError::Invalid {
                input: input.to_string(),
            });
        }

        let tag = tag
            .trim_start_matches(['.', '-', ' '])
            .to_ascii_lowercase();
        let prerelease = if tag.is_empty() { None } else { Some(tag) };

        Ok(Self {
            major,
            minor,
            patch,
            prerelease,
        })
    }
}

fn parse_component(part: Option<&str>, input: &str) -> Result<u64, VersionError> {
    part.filter(|s| !s.is_empty())
        .and_then(|s| s.parse::<u64>().ok())
        .ok_or_else(|| VersionError::Invalid {
            input: input.to_string(),
        })
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(ref tag) = self.prerelease {
            write!(f, "-{}", tag)?;
        }
        Ok(())
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.major
            .cmp(&other.major)
            .then_with(|| self.minor.cmp(&other.minor))
            .then_with(|| self.patch.cmp(&other.patch))
            .then_with(|| match (&self.prerelease, &other.prerelease) {
                (None, None) => Ordering::Equal,
                // A release is newer than any of its prereleases.
                (None, Some(_)) => Ordering::Greater,
                (Some(_), None) => Ordering::Less,
                (Some(a), Some(b)) => compare_prerelease(a, b),
            })
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn compare_prerelease(a: &str, b: &str) -> Ordering {
    let mut left = a.split('.');
    let mut right = b.split('.');
    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            // Fewer identifiers sort first when all prior ones are equal.
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) => {
                let ord = match (x.parse::<u64>(), y.parse::<u64>()) {
                    (Ok(nx), Ok(ny)) => nx.cmp(&ny),
                    // Numeric identifiers sort before alphanumeric ones.
                    (Ok(_), Err(_)) => Ordering::Less,
                    (Err(_), Ok(_)) => Ordering::Greater,
                    (Err(_), Err(_)) => x.cmp(y),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}
