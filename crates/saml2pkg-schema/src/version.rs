use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VersionError {
    #[error("version identifier must not be empty")]
    Empty,
    #[error("invalid version identifier '{input}': {reason}")]
    Invalid { input: String, reason: &'static str },
    #[error("invalid platform constraint '{input}': {reason}")]
    InvalidConstraint { input: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum PreIdentifier {
    Numeric(u64),
    Alpha(String),
}

/// A release version identifier.
///
/// Accepted form: an optional leading `v`, one or more dot-separated numeric
/// components, an optional `-prerelease` suffix and an optional `+build` suffix.
/// Numeric components compare as integers and missing trailing components count
/// as zero, so `1.10.0 > 1.9.3` and `1.2 == 1.2.0`. A version without a
/// prerelease suffix ranks above any of its prereleases. The build suffix is
/// ignored for ordering. The original spelling is kept for display.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PkgVersion {
    raw: String,
    release: Vec<u64>,
    pre: Vec<PreIdentifier>,
}

impl PkgVersion {
    pub fn parse(input: &str) -> Result<Self, VersionError> {
        let raw = input.trim();
        if raw.is_empty() {
            return Err(VersionError::Empty);
        }
        let invalid = |reason| VersionError::Invalid {
            input: raw.to_owned(),
            reason,
        };

        let body = raw
            .strip_prefix('v')
            .or_else(|| raw.strip_prefix('V'))
            .unwrap_or(raw);
        let body = body.split_once('+').map_or(body, |(head, _)| head);
        let (release_part, pre_part) = match body.split_once('-') {
            Some((release, pre)) => (release, Some(pre)),
            None => (body, None),
        };

        if release_part.is_empty() {
            return Err(invalid("missing numeric components"));
        }
        let mut release = Vec::new();
        for component in release_part.split('.') {
            if component.is_empty() || !component.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid("numeric components must be non-empty digit runs"));
            }
            let value = component
                .parse::<u64>()
                .map_err(|_| invalid("numeric component out of range"))?;
            release.push(value);
        }

        let mut pre = Vec::new();
        if let Some(pre_part) = pre_part {
            if pre_part.is_empty() {
                return Err(invalid("empty prerelease suffix"));
            }
            for ident in pre_part.split('.') {
                if ident.is_empty()
                    || !ident
                        .bytes()
                        .all(|b| b.is_ascii_alphanumeric() || b == b'-')
                {
                    return Err(invalid("prerelease identifiers must match [0-9A-Za-z-]+"));
                }
                if ident.bytes().all(|b| b.is_ascii_digit()) {
                    let value = ident
                        .parse::<u64>()
                        .map_err(|_| invalid("prerelease component out of range"))?;
                    pre.push(PreIdentifier::Numeric(value));
                } else {
                    pre.push(PreIdentifier::Alpha(ident.to_owned()));
                }
            }
        }

        Ok(Self {
            raw: raw.to_owned(),
            release,
            pre,
        })
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    #[inline]
    pub fn is_prerelease(&self) -> bool {
        !self.pre.is_empty()
    }

    /// Compare only the numeric components, ignoring any suffix.
    ///
    /// Host platform versions carry vendor suffixes such as `2.7.2-RELEASE`
    /// that must not affect compatibility checks.
    pub fn cmp_release(&self, other: &Self) -> Ordering {
        let len = self.release.len().max(other.release.len());
        for i in 0..len {
            let a = self.release.get(i).copied().unwrap_or(0);
            let b = other.release.get(i).copied().unwrap_or(0);
            match a.cmp(&b) {
                Ordering::Equal => {}
                ord => return ord,
            }
        }
        Ordering::Equal
    }

    /// True when every numeric component of `prefix` equals the matching
    /// component of `self` (`2.7` is a prefix of `2.7.2`).
    pub fn starts_with(&self, prefix: &Self) -> bool {
        prefix.release.len() <= self.release.len()
            && prefix
                .release
                .iter()
                .zip(&self.release)
                .all(|(a, b)| a == b)
    }
}

impl Ord for PkgVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.cmp_release(other) {
            Ordering::Equal => {}
            ord => return ord,
        }
        match (self.pre.is_empty(), other.pre.is_empty()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => self.pre.cmp(&other.pre),
        }
    }
}

impl PartialOrd for PkgVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for PkgVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for PkgVersion {}

impl fmt::Display for PkgVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for PkgVersion {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for PkgVersion {
    type Error = VersionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<PkgVersion> for String {
    fn from(value: PkgVersion) -> Self {
        value.raw
    }
}

pub fn compare_versions(a: &str, b: &str) -> Result<Ordering, VersionError> {
    Ok(PkgVersion::parse(a)?.cmp(&PkgVersion::parse(b)?))
}

/// Pick the greatest version from a list of identifiers.
///
/// Fails on the first unparseable identifier instead of skipping it.
pub fn latest<'a, I>(versions: I) -> Result<Option<&'a str>, VersionError>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut best: Option<(PkgVersion, &'a str)> = None;
    for raw in versions {
        let parsed = PkgVersion::parse(raw)?;
        let replace = match &best {
            Some((current, _)) => parsed > *current,
            None => true,
        };
        if replace {
            best = Some((parsed, raw));
        }
    }
    Ok(best.map(|(_, raw)| raw))
}
