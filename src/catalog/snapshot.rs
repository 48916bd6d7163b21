//! Catalog snapshots captured after each trial
//!
//! Two views of the same data: the planner-facing `pg_stats` shape and the
//! raw `pg_statistic` slot structure. The orchestrator only serializes and
//! compares them.

use serde::{Deserialize, Serialize};

use super::kind::{StatsKind, SLOT_COUNT};
use super::row::{ColumnIdentity, SlotHeader};

/// One raw slot as stored (`stakindN`, `staopN`, `stacollN`, `stanumbersN`,
/// `stavaluesN`)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawSlot {
    pub kind: i16,
    pub operator: u32,
    pub collation: u32,
    pub numbers: Option<Vec<f32>>,
    pub values: Option<Vec<Option<String>>>,
}

impl RawSlot {
    pub fn is_empty(&self) -> bool {
        self.kind == 0 && self.numbers.is_none() && self.values.is_none()
    }

    pub(crate) fn from_header(header: &SlotHeader) -> Self {
        Self {
            kind: header.kind,
            operator: header.operator,
            collation: header.collation,
            numbers: header.numbers.clone(),
            values: None,
        }
    }
}

/// One raw catalog row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawCatalogRow {
    pub relid: u32,
    pub attnum: i16,
    pub null_frac: f32,
    pub avg_width: i32,
    pub n_distinct: f32,
    pub slots: Vec<RawSlot>,
}

impl RawCatalogRow {
    /// A zeroed baseline row with five empty slots
    pub fn empty(identity: ColumnIdentity) -> Self {
        Self {
            relid: identity.relid,
            attnum: identity.attnum,
            null_frac: 0.0,
            avg_width: 0,
            n_distinct: 0.0,
            slots: vec![RawSlot::default(); SLOT_COUNT],
        }
    }

    pub fn identity(&self) -> ColumnIdentity {
        ColumnIdentity::new(self.relid, self.attnum)
    }

    /// First slot carrying `kind`
    pub fn slot_of(&self, kind: StatsKind) -> Option<&RawSlot> {
        self.slots.iter().find(|s| s.kind == kind.code())
    }
}

/// One `pg_stats` row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannerStatsRow {
    pub schema: String,
    pub table: String,
    pub column: String,
    pub null_frac: Option<f32>,
    pub avg_width: Option<i32>,
    pub n_distinct: Option<f32>,
    pub most_common_vals: Option<Vec<Option<String>>>,
    pub most_common_freqs: Option<Vec<f32>>,
    pub histogram_bounds: Option<Vec<Option<String>>>,
    pub correlation: Option<f32>,
}

impl PlannerStatsRow {
    /// Derive the planner view of a raw row the way `pg_stats` does
    pub fn from_raw(schema: &str, table: &str, column: &str, raw: &RawCatalogRow) -> Self {
        let mcv = raw.slot_of(StatsKind::MostCommonValues);
        let hist = raw.slot_of(StatsKind::Histogram);
        let corr = raw.slot_of(StatsKind::Correlation);
        Self {
            schema: schema.to_string(),
            table: table.to_string(),
            column: column.to_string(),
            null_frac: Some(raw.null_frac),
            avg_width: Some(raw.avg_width),
            n_distinct: Some(raw.n_distinct),
            most_common_vals: mcv.and_then(|s| s.values.clone()),
            most_common_freqs: mcv.and_then(|s| s.numbers.clone()),
            histogram_bounds: hist.and_then(|s| s.values.clone()),
            correlation: corr
                .and_then(|s| s.numbers.as_ref())
                .and_then(|n| n.first().copied()),
        }
    }
}

/// Catalog state at one point in time, ordered by (table, column)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogSnapshot {
    pub planner: Vec<PlannerStatsRow>,
    pub raw: Vec<RawCatalogRow>,
}

impl CatalogSnapshot {
    pub fn is_empty(&self) -> bool {
        self.planner.is_empty() && self.raw.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_planner_view_reads_slots_by_kind() {
        let mut raw = RawCatalogRow::empty(ColumnIdentity::new(10, 1));
        raw.null_frac = 0.1;
        raw.slots[0] = RawSlot {
            kind: 3,
            operator: 97,
            collation: 0,
            numbers: Some(vec![0.8]),
            values: None,
        };
        raw.slots[1] = RawSlot {
            kind: 1,
            operator: 96,
            collation: 0,
            numbers: Some(vec![0.4, 0.2]),
            values: Some(vec![Some("1".into()), Some("2".into())]),
        };

        let view = PlannerStatsRow::from_raw("public", "t", "c", &raw);
        assert_eq!(view.correlation, Some(0.8));
        assert_eq!(view.most_common_freqs, Some(vec![0.4, 0.2]));
        assert_eq!(view.most_common_vals.as_ref().map(|v| v.len()), Some(2));
        assert!(view.histogram_bounds.is_none());
    }

    #[test]
    fn test_snapshot_serializes() {
        let snapshot = CatalogSnapshot {
            planner: vec![],
            raw: vec![RawCatalogRow::empty(ColumnIdentity::new(1, 1))],
        };
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["raw"][0]["slots"].as_array().map(|s| s.len()), Some(5));
        let back: CatalogSnapshot = serde_json::from_value(json).unwrap();
        assert_eq!(back, snapshot);
    }
}
