use crate::version::{PkgVersion, VersionError};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// One published release of the package.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Release {
    pub version: PkgVersion,
    /// Publication date, `YYYY-MM-DD`.
    pub release_date: String,
    /// Host platform versions this build installs on. See [`PlatformConstraint`].
    pub platform_constraint: String,
    pub artifact_url: String,
}

impl Release {
    pub fn constraint(&self) -> Result<PlatformConstraint, VersionError> {
        PlatformConstraint::parse(&self.platform_constraint)
    }

    /// Whether this release installs on the given host version.
    /// A malformed constraint never matches.
    pub fn supports(&self, host: &PkgVersion) -> bool {
        self.constraint().is_ok_and(|c| c.matches(host))
    }
}

/// Sort a catalog newest first.
pub fn sort_catalog(releases: &mut [Release]) {
    releases.sort_by(|a, b| b.version.cmp(&a.version));
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Eq,
    Gt,
    Ge,
    Lt,
    Le,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comparator {
    op: Op,
    version: PkgVersion,
}

/// Host compatibility rule of a release.
///
/// * `*` or empty: any host.
/// * bare version: prefix match on numeric components, so `2.7` matches
///   hosts `2.7`, `2.7.0` and `2.7.2-RELEASE`.
/// * comma-separated comparators (`=`, `>=`, `<=`, `>`, `<`), all of which
///   must hold: `>=2.7.0, <2.8`.
///
/// Comparisons look at numeric components only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformConstraint {
    Any,
    Prefix(PkgVersion),
    All(Vec<Comparator>),
}

impl PlatformConstraint {
    pub fn parse(input: &str) -> Result<Self, VersionError> {
        let trimmed = input.trim();
        if trimmed.is_empty() || trimmed == "*" {
            return Ok(Self::Any);
        }
        let invalid = |reason: String| VersionError::InvalidConstraint {
            input: trimmed.to_owned(),
            reason,
        };

        if !trimmed.contains(['<', '>', '=']) {
            let version = PkgVersion::parse(trimmed).map_err(|e| invalid(e.to_string()))?;
            return Ok(Self::Prefix(version));
        }

        let mut comparators = Vec::new();
        for part in trimmed.split(',') {
            let part = part.trim();
            let (op, rest) = if let Some(rest) = part.strip_prefix(">=") {
                (Op::Ge, rest)
            } else if let Some(rest) = part.strip_prefix("<=") {
                (Op::Le, rest)
            } else if let Some(rest) = part.strip_prefix('>') {
                (Op::Gt, rest)
            } else if let Some(rest) = part.strip_prefix('<') {
                (Op::Lt, rest)
            } else if let Some(rest) = part.strip_prefix('=') {
                (Op::Eq, rest)
            } else {
                return Err(invalid(format!("'{part}' has no comparison operator")));
            };
            let version = PkgVersion::parse(rest).map_err(|e| invalid(e.to_string()))?;
            comparators.push(Comparator { op, version });
        }
        Ok(Self::All(comparators))
    }

    pub fn matches(&self, host: &PkgVersion) -> bool {
        match self {
            Self::Any => true,
            Self::Prefix(prefix) => host.starts_with(prefix),
            Self::All(comparators) => comparators.iter().all(|c| {
                let ord = host.cmp_release(&c.version);
                match c.op {
                    Op::Eq => ord == Ordering::Equal,
                    Op::Gt => ord == Ordering::Greater,
                    Op::Ge => ord != Ordering::Less,
                    Op::Lt => ord == Ordering::Less,
                    Op::Le => ord != Ordering::Greater,
                }
            }),
        }
    }
}

impl fmt::Display for PlatformConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("*"),
            Self::Prefix(v) => write!(f, "{v}"),
            Self::All(comparators) => {
                let parts: Vec<String> = comparators
                    .iter()
                    .map(|c| {
                        let op = match c.op {
                            Op::Eq => "=",
                            Op::Gt => ">",
                            Op::Ge => ">=",
                            Op::Lt => "<",
                            Op::Le => "<=",
                        };
                        format!("{op}{}", c.version)
                    })
                    .collect();
                f.write_str(&parts.join(", "))
            }
        }
    }
}
