//! Comparator ranges and the resolution algorithm.

use crate::version::{Version, VersionError};

/// A comparison operator within a range expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
}

/// A single comparator, e.g. `>=5.0.0`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comparator {
    pub op: Op,
    pub version: Version,
}

impl Comparator {
    pub fn parse(token: &str) -> Result<Self, VersionError> {
        let token = token.trim();
        let (op, rest) = if let Some(rest) = token.strip_prefix(">=") {
            (Op::Ge, rest)
        } else if let Some(rest) = token.strip_prefix("<=") {
            (Op::Le, rest)
        } else if let Some(rest) = token.strip_prefix('>') {
            (Op::Gt, rest)
        } else if let Some(rest) = token.strip_prefix('<') {
            (Op::Lt, rest)
        } else if let Some(rest) = token.strip_prefix('=') {
            (Op::Eq, rest)
        } else if token.starts_with(|c: char| c.is_ascii_digit()) {
            (Op::Eq, token)
        } else {
            return Err(VersionError::InvalidComparator {
                input: token.to_string(),
            });
        };

        let version =
            Version::parse(rest).map_err(|_| VersionError::InvalidComparator {
                input: token.to_string(),
            })?;
        Ok(Self { op, version })
    }

    pub fn matches(&self, version: &Version) -> bool {
        match self.op {
            Op::Lt => version < &self.version,
            Op::Le => version <= &self.version,
            Op::Gt => version > &self.version,
            Op::Ge => version >= &self.version,
            Op::Eq => version == &self.version,
        }
    }
}

/// A comparator set paired with its payload (a command or URL template).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRange {
    pub comparators: Vec<Comparator>,
    pub payload: String,
    /// The original expression, kept for diagnostics.
    pub expression: String,
}

impl VersionRange {
    /// Parse a whitespace-separated comparator expression such as
    /// `>=5.0.0 <6.0.0`.
    pub fn parse(expression: &str, payload: impl Into<String>) -> Result<Self, VersionError> {
        let comparators = expression
            .split_whitespace()
            .map(Comparator::parse)
            .collect::<Result<Vec<_>, _>>()?;
        if comparators.is_empty() {
            return Err(VersionError::InvalidComparator {
                input: expression.to_string(),
            });
        }
        Ok(Self {
            comparators,
            payload: payload.into(),
            expression: expression.to_string(),
        })
    }

    /// A range matches when every comparator in its set is satisfied.
    pub fn matches(&self, version: &Version) -> bool {
        self.comparators.iter().all(|c| c.matches(version))
    }
}

/// Outcome of resolving a version against one entry's range set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution<'a> {
    /// Exactly one range matched; its payload applies.
    Match(&'a VersionRange),
    /// No range matched: the capability does not exist for this version.
    NoMatch,
    /// More than one range matched: a catalog-integrity defect.
    Ambiguous {
        first: &'a VersionRange,
        second: &'a VersionRange,
    },
}

/// Resolve `version` against a range set.
///
/// Every range is evaluated; a second match is never silently discarded.
pub fn resolve<'a>(version: &Version, ranges: &'a [VersionRange]) -> Resolution<'a> {
    let mut matched: Option<&VersionRange> = None;
    for range in ranges {
        if range.matches(version) {
            match matched {
                None => matched = Some(range),
                Some(first) => {
                    return Resolution::Ambiguous {
                        first,
                        second: range,
                    }
                }
            }
        }
    }
    match matched {
        Some(range) => Resolution::Match(range),
        None => Resolution::NoMatch,
    }
}

/// Offline mutual-exclusivity check over a range set.
///
/// Probes every comparator bound (plus the versions just above and below
/// each bound, the prerelease just under each bound, the origin, and a far
/// sentinel). Two ranges overlapping on any interval must both match one of
/// these probes, because an interval intersection's endpoints always come
/// from some comparator's bound. Returns the first probe version at which
/// two ranges overlap.
pub fn validate_ranges(ranges: &[VersionRange]) -> Result<(), (Version, String, String)> {
    let mut probes: Vec<Version> = vec![Version::new(0, 0, 0), Version::new(u64::MAX, 0, 0)];
    for range in ranges {
        for comparator in &range.comparators {
            let v = &comparator.version;
            probes.push(v.clone());
            probes.push(Version::new(v.major, v.minor, v.patch.saturating_add(1)));
            probes.push(Version::new(v.major, v.minor, v.patch.saturating_sub(1)));
            // Catches `<X` vs `>=X` style boundaries meeting at a prerelease.
            probes.push(Version::with_prerelease(v.major, v.minor, v.patch, "0"));
        }
    }

    for probe in &probes {
        if let Resolution::Ambiguous { first, second } = resolve(probe, ranges) {
            return Err((
                probe.clone(),
                first.expression.clone(),
                second.expression.clone(),
            ));
        }
    }
    Ok(())
}
