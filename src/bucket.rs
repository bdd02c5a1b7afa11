//! Bucket: the spatial view over one leaf of the partition.
//!
//! Schema of the data table:
//! - row key: Z-code of (x, y)
//! - column family: `P`
//! - qualifier: 8 bytes of point id, big-endian
//! - value: 4 bytes of x followed by 4 bytes of y, big-endian
//!
//! A bucket is a transient, read-mostly view bound to one Z-code interval;
//! point cells outlive it and stay at their rows when the partition refines.

use crate::codec::{self, ZCode};
use crate::error::{Result, ZedbaseError};
use crate::filter::RangeFilter;
use crate::index::BucketKey;
use crate::storage::{RowCells, Store};
use crate::types::{Point, Range};
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;

/// Column family holding point cells in the data table.
pub const FAMILY_POINTS: &[u8] = b"P";

/// A view over the contiguous Z-code key interval of one bucket.
///
/// Immutable after construction. Holds a non-owning handle to the store; the
/// index applies insertion notifications itself, so a bucket never calls
/// back into it.
pub struct Bucket<S: Store> {
    store: Arc<S>,
    table: String,
    key: BucketKey,
    range_x: Range,
    range_y: Range,
    start_row: ZCode,
    stop_row: Option<ZCode>,
    scan_caching: usize,
}

impl<S: Store> fmt::Debug for Bucket<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bucket")
            .field("table", &self.table)
            .field("key", &self.key)
            .field("range_x", &self.range_x)
            .field("range_y", &self.range_y)
            .field("start_row", &self.start_row)
            .field("stop_row", &self.stop_row)
            .field("scan_caching", &self.scan_caching)
            .finish()
    }
}

impl<S: Store> Bucket<S> {
    pub(crate) fn new(store: Arc<S>, table: String, key: BucketKey, scan_caching: usize) -> Self {
        let (range_x, range_y) = key.rectangle();
        let start_row = codec::interleave(range_x.min as u32, range_y.min as u32);
        let stop_row = codec::increment(codec::interleave(range_x.max as u32, range_y.max as u32));
        Self {
            store,
            table,
            key,
            range_x,
            range_y,
            start_row,
            stop_row,
            scan_caching,
        }
    }

    /// Canonical identity of this bucket's sub-space.
    pub fn key(&self) -> BucketKey {
        self.key
    }

    pub fn range_x(&self) -> Range {
        self.range_x
    }

    pub fn range_y(&self) -> Range {
        self.range_y
    }

    /// Write the cell for `point` at `row`.
    ///
    /// The caller is responsible for notifying the index afterwards; each
    /// successful write must be followed by exactly one notification.
    pub fn insert(&self, row: &ZCode, point: &Point) -> Result<()> {
        self.store.put(
            &self.table,
            row,
            FAMILY_POINTS,
            &point.id.to_be_bytes(),
            &encode_location(point.x, point.y),
        )
    }

    /// All points stored at `row`.
    pub fn get(&self, row: &ZCode) -> Result<Vec<Point>> {
        let cells = self.store.get(&self.table, row, FAMILY_POINTS)?;
        decode_cells(&cells)
    }

    /// All points of this bucket lying inside the rectangle `rx × ry`.
    ///
    /// The rectangle predicate runs inside the store scan; only matching
    /// cells travel back. Result order is unspecified.
    pub fn scan_range(&self, rx: &Range, ry: &Range) -> Result<Vec<Point>> {
        let filter = Arc::new(RangeFilter::new(*rx, *ry));
        let rows = self.store.scan(
            &self.table,
            &self.start_row,
            self.stop_row.as_ref().map(|s| s.as_slice()),
            FAMILY_POINTS,
            Some(filter),
            self.scan_caching,
        )?;
        let mut points = Vec::new();
        for item in rows {
            let (_, cells) = item?;
            points.extend(decode_cells(&cells)?);
        }
        Ok(points)
    }

    /// All points of this bucket.
    pub fn scan(&self) -> Result<Vec<Point>> {
        self.scan_range(&self.range_x, &self.range_y)
    }

    /// Euclidean distance from `point` to this bucket's rectangle; zero if
    /// the point lies inside.
    pub fn distance_from(&self, point: &Point) -> f64 {
        let dx = self.range_x.distance_from(point.x as i64) as f64;
        let dy = self.range_y.distance_from(point.y as i64) as f64;
        (dx * dx + dy * dy).sqrt()
    }

    /// The rectangle corner farthest from `point`, taking the farther
    /// endpoint on each axis independently. The returned point carries a
    /// dummy id.
    pub fn farthest_corner_from(&self, point: &Point) -> Point {
        Point::new(
            -1,
            self.range_x.farthest_from(point.x as i64) as u32,
            self.range_y.farthest_from(point.y as i64) as u32,
        )
    }
}

impl<S: Store> fmt::Display for Bucket<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Bucket[({},{}), ({},{})]",
            self.range_x.min, self.range_y.min, self.range_x.max, self.range_y.max
        )
    }
}

fn encode_location(x: u32, y: u32) -> [u8; 8] {
    let xs = x.to_be_bytes();
    let ys = y.to_be_bytes();
    [xs[0], xs[1], xs[2], xs[3], ys[0], ys[1], ys[2], ys[3]]
}

fn decode_cells(cells: &RowCells) -> Result<Vec<Point>> {
    cells
        .iter()
        .map(|(qualifier, value)| decode_point(qualifier, value))
        .collect()
}

fn decode_point(qualifier: &Bytes, value: &Bytes) -> Result<Point> {
    let id_bytes: [u8; 8] = qualifier.as_ref().try_into().map_err(|_| {
        ZedbaseError::Corruption(format!(
            "point cell qualifier is {} bytes, expected 8: {:02x?}",
            qualifier.len(),
            qualifier.as_ref()
        ))
    })?;
    let location: [u8; 8] = value.as_ref().try_into().map_err(|_| {
        ZedbaseError::Corruption(format!(
            "point cell value is {} bytes, expected 8: {:02x?}",
            value.len(),
            value.as_ref()
        ))
    })?;
    let x = u32::from_be_bytes([location[0], location[1], location[2], location[3]]);
    let y = u32::from_be_bytes([location[4], location[5], location[6], location[7]]);
    Ok(Point::new(i64::from_be_bytes(id_bytes), x, y))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::interleave;
    use crate::storage::MemoryStore;

    fn test_bucket() -> Bucket<MemoryStore> {
        let store = MemoryStore::new();
        store.create_table("t", &[FAMILY_POINTS]).unwrap();
        // Top-left root quadrant: x and y both below 2^31.
        let key = BucketKey {
            min: [0; 8],
            prefix_len: 2,
        };
        Bucket::new(Arc::new(store), "t".to_string(), key, 1000)
    }

    #[test]
    fn test_insert_get_round_trip() {
        let bucket = test_bucket();
        let p = Point::new(7, 12, 34);
        let row = interleave(p.x, p.y);
        bucket.insert(&row, &p).unwrap();

        let found = bucket.get(&row).unwrap();
        assert_eq!(found, vec![p]);
        assert!(bucket.get(&interleave(1, 1)).unwrap().is_empty());
    }

    #[test]
    fn test_many_ids_share_a_row() {
        let bucket = test_bucket();
        let row = interleave(5, 5);
        for id in 0..4 {
            bucket.insert(&row, &Point::new(id, 5, 5)).unwrap();
        }
        let found = bucket.get(&row).unwrap();
        assert_eq!(found.len(), 4);
        assert!(found.iter().all(|p| p.x == 5 && p.y == 5));
    }

    #[test]
    fn test_scan_filters_to_rectangle() {
        let bucket = test_bucket();
        for (id, x, y) in [(1, 1, 1), (2, 3, 3), (3, 9, 9)] {
            bucket
                .insert(&interleave(x, y), &Point::new(id, x, y))
                .unwrap();
        }
        let hits = bucket
            .scan_range(&Range::new(0, 4).unwrap(), &Range::new(0, 4).unwrap())
            .unwrap();
        let mut ids: Vec<_> = hits.iter().map(|p| p.id).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![1, 2]);

        assert_eq!(bucket.scan().unwrap().len(), 3);
    }

    #[test]
    fn test_distance_from_rectangle() {
        let bucket = test_bucket();
        // Inside the rectangle.
        assert_eq!(bucket.distance_from(&Point::new(0, 10, 10)), 0.0);
        // Outside on both axes: rectangle max corner is (2^31 - 1, 2^31 - 1).
        let outside = Point::new(0, u32::MAX, u32::MAX);
        let per_axis = (u32::MAX - 0x7FFF_FFFF) as f64;
        let expected = (2.0 * per_axis * per_axis).sqrt();
        assert!((bucket.distance_from(&outside) - expected).abs() < 1.0);
    }

    #[test]
    fn test_farthest_corner() {
        let bucket = test_bucket();
        let corner = bucket.farthest_corner_from(&Point::new(0, 0, 0));
        assert_eq!((corner.x, corner.y), (0x7FFF_FFFF, 0x7FFF_FFFF));
        let corner = bucket.farthest_corner_from(&Point::new(0, u32::MAX, 0));
        assert_eq!((corner.x, corner.y), (0, 0x7FFF_FFFF));
    }
}
