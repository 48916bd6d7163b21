//! Slot kind tags
//!
//! The numeric codes are the server's `STATISTIC_KIND_*` values stored in
//! `stakindN`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Maximum number of slots in one catalog statistics row
pub const SLOT_COUNT: usize = 5;

/// What a populated slot represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StatsKind {
    /// Most common values with their frequencies
    MostCommonValues,
    /// Equi-depth histogram bounds
    Histogram,
    /// Physical-to-logical order correlation
    Correlation,
    /// Most common elements (array / tsvector columns)
    MostCommonElements,
    /// Distinct element count histogram
    DistinctElemHistogram,
}

impl StatsKind {
    /// Catalog tag value
    pub fn code(self) -> i16 {
        match self {
            StatsKind::MostCommonValues => 1,
            StatsKind::Histogram => 2,
            StatsKind::Correlation => 3,
            StatsKind::MostCommonElements => 4,
            StatsKind::DistinctElemHistogram => 5,
        }
    }

    /// Decode a catalog tag; 0 (unused slot) and unknown tags yield None
    pub fn from_code(code: i16) -> Option<Self> {
        match code {
            1 => Some(StatsKind::MostCommonValues),
            2 => Some(StatsKind::Histogram),
            3 => Some(StatsKind::Correlation),
            4 => Some(StatsKind::MostCommonElements),
            5 => Some(StatsKind::DistinctElemHistogram),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StatsKind::MostCommonValues => "MCV",
            StatsKind::Histogram => "HISTOGRAM",
            StatsKind::Correlation => "CORRELATION",
            StatsKind::MostCommonElements => "MCELEM",
            StatsKind::DistinctElemHistogram => "DECHIST",
        }
    }

    /// Whether the slot carries a values array
    pub fn has_values(self) -> bool {
        !matches!(self, StatsKind::Correlation | StatsKind::DistinctElemHistogram)
    }
}

impl fmt::Display for StatsKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
