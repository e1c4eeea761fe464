use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::value::ParameterValue;

/// A level in the four-level configuration hierarchy.
///
/// Ordering is by specificity: `Program` is the global root, `Merchant` the
/// most specific.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityLevel {
    Program,
    Bank,
    Organization,
    Merchant,
}

impl EntityLevel {
    /// Short stable tag for keys and log fields.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Program => "PROGRAM",
            Self::Bank => "BANK",
            Self::Organization => "ORGANIZATION",
            Self::Merchant => "MERCHANT",
        }
    }
}

impl std::fmt::Display for EntityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One versioned parameter record at a specific hierarchy level.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub entity_level: EntityLevel,
    /// Entity the record applies to (`"PROGRAM"` at the root level).
    pub entity_id: String,
    pub value: ParameterValue,
    /// Instant from which the record is effective (inclusive).
    pub effective_date: DateTime<Utc>,
    /// Instant at which the record expires (exclusive); `None` = open-ended.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_date: Option<DateTime<Utc>>,
    /// When `false`, more specific levels cannot override this record.
    #[serde(default = "default_overridable")]
    pub overridable: bool,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
}

fn default_overridable() -> bool {
    true
}

impl Parameter {
    /// `true` when the record is effective at instant `at`.
    #[must_use]
    pub fn is_effective(&self, at: DateTime<Utc>) -> bool {
        self.effective_date <= at && self.expiration_date.is_none_or(|exp| at < exp)
    }

    /// `true` when two records' effective windows overlap.
    #[must_use]
    pub fn overlaps(&self, other: &Parameter) -> bool {
        let self_end = self.expiration_date;
        let other_end = other.expiration_date;
        let starts_before_other_ends = other_end.is_none_or(|e| self.effective_date < e);
        let other_starts_before_self_ends = self_end.is_none_or(|e| other.effective_date < e);
        starts_before_other_ends && other_starts_before_self_ends
    }
}
