//! # Schema versions
//!
//! Binders went through six historical schema revisions. Each revision
//! introduced (or reshaped) one or more sections of the document; the
//! migrator compares the version a document was stored with against these
//! milestones to decide which sections need to be synthesized.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::MigrationError;

/// A `major.minor.patch` triple as found in stored documents.
///
/// Pre-release and build suffixes are accepted on input and ignored for
/// ordering, which is all the milestone comparison needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SemVer {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl SemVer {
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self { major, minor, patch }
    }

    /// Version assumed for documents that carry no version at all.
    pub const UNVERSIONED: SemVer = SemVer::new(0, 0, 0);

    /// `true` when this version is at or past the given milestone.
    pub fn satisfies(&self, milestone: SchemaVersion) -> bool {
        *self >= milestone.semver()
    }
}

impl fmt::Display for SemVer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for SemVer {
    type Err = MigrationError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let invalid = || MigrationError::InvalidVersion(raw.to_string());
        let core = raw
            .trim()
            .trim_start_matches('v')
            .split(['-', '+'])
            .next()
            .ok_or_else(invalid)?;

        let mut parts = core.split('.');
        let mut next = || -> Result<u64, MigrationError> {
            parts
                .next()
                .ok_or_else(invalid)?
                .parse::<u64>()
                .map_err(|_| invalid())
        };
        let version = SemVer::new(next()?, next()?, next()?);
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(version)
    }
}

/// The closed set of schema milestones. Canonical documents always carry
/// one of these, and the migrator always emits [`SchemaVersion::CURRENT`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SchemaVersion {
    /// Authors, languages, links and module meta become lists.
    #[serde(rename = "0.1.0")]
    V0_1_0,
    /// Global style section.
    #[serde(rename = "0.2.0")]
    V0_2_0,
    #[serde(rename = "0.3.0")]
    V0_3_0,
    /// Image chunks become structured records.
    #[serde(rename = "0.4.0")]
    V0_4_0,
    /// Thumbnail becomes a structured record.
    #[serde(rename = "0.4.1")]
    V0_4_1,
    /// Positional identity log.
    #[serde(rename = "0.4.2")]
    V0_4_2,
}

impl SchemaVersion {
    pub const CURRENT: SchemaVersion = SchemaVersion::V0_4_2;

    pub const ALL: [SchemaVersion; 6] = [
        SchemaVersion::V0_1_0,
        SchemaVersion::V0_2_0,
        SchemaVersion::V0_3_0,
        SchemaVersion::V0_4_0,
        SchemaVersion::V0_4_1,
        SchemaVersion::V0_4_2,
    ];

    pub const fn semver(self) -> SemVer {
        match self {
            SchemaVersion::V0_1_0 => SemVer::new(0, 1, 0),
            SchemaVersion::V0_2_0 => SemVer::new(0, 2, 0),
            SchemaVersion::V0_3_0 => SemVer::new(0, 3, 0),
            SchemaVersion::V0_4_0 => SemVer::new(0, 4, 0),
            SchemaVersion::V0_4_1 => SemVer::new(0, 4, 1),
            SchemaVersion::V0_4_2 => SemVer::new(0, 4, 2),
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            SchemaVersion::V0_1_0 => "0.1.0",
            SchemaVersion::V0_2_0 => "0.2.0",
            SchemaVersion::V0_3_0 => "0.3.0",
            SchemaVersion::V0_4_0 => "0.4.0",
            SchemaVersion::V0_4_1 => "0.4.1",
            SchemaVersion::V0_4_2 => "0.4.2",
        }
    }

    /// Looks up a milestone by its exact string form.
    pub fn from_milestone(raw: &str) -> Option<SchemaVersion> {
        SchemaVersion::ALL.into_iter().find(|v| v.as_str() == raw)
    }
}

impl PartialOrd for SchemaVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SchemaVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.semver().cmp(&other.semver())
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_and_suffixed_versions() {
        assert_eq!("0.4.1".parse::<SemVer>().unwrap(), SemVer::new(0, 4, 1));
        assert_eq!("v1.2.3-beta.1".parse::<SemVer>().unwrap(), SemVer::new(1, 2, 3));
        assert!("0.4".parse::<SemVer>().is_err());
        assert!("0.4.x".parse::<SemVer>().is_err());
        assert!("0.4.1.7".parse::<SemVer>().is_err());
    }

    #[test]
    fn milestone_comparison_is_semantic_not_lexical() {
        let stored = SemVer::new(0, 10, 0);
        assert!(stored.satisfies(SchemaVersion::V0_4_2));
        assert!(!SemVer::new(0, 4, 1).satisfies(SchemaVersion::V0_4_2));
        assert!(SemVer::UNVERSIONED < SchemaVersion::V0_1_0.semver());
    }

    #[test]
    fn milestones_round_trip_through_serde() {
        for version in SchemaVersion::ALL {
            let json = serde_json::to_value(version).unwrap();
            assert_eq!(json, serde_json::json!(version.as_str()));
            assert_eq!(SchemaVersion::from_milestone(version.as_str()), Some(version));
        }
        assert!(SchemaVersion::V0_4_0 < SchemaVersion::CURRENT);
    }
}
