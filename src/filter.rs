//! Scan-side cell predicates.
//!
//! A filter runs inside the store's scan loop, close to the data, so that
//! candidate cells outside the query rectangle are dropped before they are
//! handed back to the caller.

use crate::types::Range;

/// Verdict for a single cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterDecision {
    /// Keep the cell.
    Include,
    /// Drop the cell and the rest of its row. All cells of a row encode the
    /// same location, so skipping the remaining columns is sound.
    SkipRow,
}

/// A predicate over cell values applied during a scan.
pub trait ScanFilter: Send + Sync {
    fn check(&self, value: &[u8]) -> FilterDecision;
}

/// Accepts a point cell iff its encoded coordinates lie inside a query
/// rectangle. The value layout is 4 bytes of x followed by 4 bytes of y,
/// both big-endian.
#[derive(Debug, Clone)]
pub struct RangeFilter {
    rx: Range,
    ry: Range,
}

impl RangeFilter {
    pub fn new(rx: Range, ry: Range) -> Self {
        Self { rx, ry }
    }
}

impl ScanFilter for RangeFilter {
    fn check(&self, value: &[u8]) -> FilterDecision {
        if value.len() < 8 {
            return FilterDecision::SkipRow;
        }
        let x = u32::from_be_bytes([value[0], value[1], value[2], value[3]]);
        let y = u32::from_be_bytes([value[4], value[5], value[6], value[7]]);
        if self.rx.contains(x as i64) && self.ry.contains(y as i64) {
            FilterDecision::Include
        } else {
            FilterDecision::SkipRow
        }
    }
}
