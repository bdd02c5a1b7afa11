//! Bucket partition maintenance.
//!
//! The index keeps a partition of the 64-bit Z-code space into buckets named
//! by the common-prefix scheme: a bucket is a pair of its minimum Z-code and
//! a prefix length, so `[011*****]` is stored as `([01100000], 3)`. When the
//! number of points in a bucket exceeds the split threshold, the bucket is
//! halved by extending its prefix by one bit.
//!
//! Schema of the index table (`<data table>_index`):
//! - row key: minimum Z-code of the bucket
//! - column family: `info`
//! - column `pl`: prefix length, 4 bytes big-endian
//! - column `bs`: bucket size counter, 8 bytes big-endian

use crate::bucket::{Bucket, FAMILY_POINTS};
use crate::codec::{self, ZCode};
use crate::config::IndexConfig;
use crate::error::{Result, ZedbaseError};
use crate::storage::{PutOp, RowCells, Store};
use crate::types::Range;
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;

/// Column family of the index table.
pub const FAMILY_INFO: &[u8] = b"info";

const COLUMN_PREFIX_LENGTH: &[u8] = b"pl";
const COLUMN_BUCKET_SIZE: &[u8] = b"bs";

/// Canonical identity of a bucket: its minimum Z-code and the number of
/// leading bits shared by every code in it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BucketKey {
    pub min: ZCode,
    pub prefix_len: u32,
}

impl BucketKey {
    /// The 2D rectangle covered by this bucket, reconstructed by decoding
    /// the minimum code (don't-care bits as zeros) and the maximum code
    /// (don't-care bits as ones). The reconstruction is unique.
    pub fn rectangle(&self) -> (Range, Range) {
        let (xmin, ymin) = codec::deinterleave(&self.min);
        let mask = u64::from_be_bytes(codec::make_mask(self.prefix_len));
        let max_code = (u64::from_be_bytes(self.min) | !mask).to_be_bytes();
        let (xmax, ymax) = codec::deinterleave(&max_code);
        (
            Range {
                min: xmin as i64,
                max: xmax as i64,
            },
            Range {
                min: ymin as i64,
                max: ymax as i64,
            },
        )
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&codec::prefix_string(&self.min, self.prefix_len))
    }
}

/// One persisted index row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketEntry {
    pub key: BucketKey,
    pub size: u64,
}

/// Maintains the partition and resolves Z-codes to their covering buckets.
///
/// The index assumes a single logical writer; concurrent writers would race
/// on splits. Readers may run alongside the writer and can observe a point
/// either before or after its insertion, but never a torn partition: the two
/// child entries of a split are written as one batch.
pub struct Index<S: Store> {
    store: Arc<S>,
    table: String,
    index_table: String,
    split_threshold: u64,
    scan_caching: usize,
}

impl<S: Store> Index<S> {
    /// Open the index, creating and seeding its tables on first use.
    ///
    /// The fresh partition consists of the four top-level quadrants, one
    /// entry per two-bit prefix, so that a floor lookup from anywhere in the
    /// coordinate space lands on an entry whose rectangle contains it.
    pub fn open(store: Arc<S>, config: IndexConfig) -> Result<Self> {
        config.validate()?;
        let index_table = config.index_table();

        if !store.table_exists(&config.table)? {
            store.create_table(&config.table, &[FAMILY_POINTS])?;
        }
        if !store.table_exists(&index_table)? {
            store.create_table(&index_table, &[FAMILY_INFO])?;
            let mut ops = Vec::with_capacity(8);
            for quadrant in 0..4u64 {
                let row = (quadrant << 62).to_be_bytes();
                ops.extend(entry_puts(&row, 2, 0));
            }
            store.put_batch(&index_table, &ops)?;
            log::debug!("seeded index table {} with 4 root buckets", index_table);
        }

        Ok(Self {
            store,
            table: config.table,
            index_table,
            split_threshold: config.split_threshold,
            scan_caching: config.scan_caching,
        })
    }

    /// The bucket whose sub-space contains `row`.
    pub fn fetch_bucket(&self, row: &ZCode) -> Result<Bucket<S>> {
        let (key, _) = self.floor_entry(row)?;
        Ok(self.bucket(key))
    }

    /// Buckets whose rectangles intersect the query region, lazily, in
    /// Z-code order.
    ///
    /// Candidate rows are taken from the Z-code interval of the rectangle;
    /// the scan begins at the floor entry of the interval start, because the
    /// bucket covering the query's minimum corner may be keyed below it.
    /// Candidates are re-tested for 2D intersection to discard the false
    /// positives induced by the curve's zig-zag coverage.
    pub fn find_buckets_in_range(
        &self,
        rx: &Range,
        ry: &Range,
    ) -> Result<impl Iterator<Item = Result<Bucket<S>>>> {
        let start = codec::interleave(clamp_coord(rx.min), clamp_coord(ry.min));
        let stop = codec::increment(codec::interleave(clamp_coord(rx.max), clamp_coord(ry.max)));
        let scan_start = self.floor_entry(&start)?.0.min;

        let rows = self.store.scan(
            &self.index_table,
            &scan_start,
            stop.as_ref().map(|s| s.as_slice()),
            FAMILY_INFO,
            None,
            self.scan_caching,
        )?;

        let store = Arc::clone(&self.store);
        let table = self.table.clone();
        let caching = self.scan_caching;
        let (rx, ry) = (*rx, *ry);
        Ok(rows.filter_map(move |item| {
            let (key, _) = match item.and_then(|(row, cells)| decode_entry(&row, &cells)) {
                Ok(entry) => entry,
                Err(e) => return Some(Err(e)),
            };
            let (bucket_x, bucket_y) = key.rectangle();
            if rx.intersects(&bucket_x) && ry.intersects(&bucket_y) {
                Some(Ok(Bucket::new(
                    Arc::clone(&store),
                    table.clone(),
                    key,
                    caching,
                )))
            } else {
                None
            }
        }))
    }

    /// Record one inserted point at `row`: bump the covering bucket's size
    /// counter and split it once the counter exceeds the threshold.
    ///
    /// The increment is atomic in the store, so concurrent notifications on
    /// the same bucket cannot lose counts.
    pub fn notify_insertion(&self, row: &ZCode) -> Result<()> {
        let (key, _) = self.floor_entry(row)?;
        let size = self.store.atomic_increment(
            &self.index_table,
            &key.min,
            FAMILY_INFO,
            COLUMN_BUCKET_SIZE,
            1,
        )?;
        if size > 0 && size as u64 > self.split_threshold {
            self.split_bucket(&key.min)?;
        }
        Ok(())
    }

    /// Halve the bucket at `key` by one prefix bit: `[abc*]` becomes
    /// `[abc0*]` and `[abc1*]`.
    ///
    /// The left child keeps the parent's row; the right child's row sets the
    /// bit at the parent's prefix length. Cell placement never changes, so
    /// the left child's size is re-counted from the data table and the right
    /// child takes the remainder. A mass insertion can cascade, so each
    /// child is re-checked against the threshold.
    fn split_bucket(&self, key: &ZCode) -> Result<()> {
        let (parent, size) = self.floor_entry(key)?;
        let prefix_len = parent.prefix_len + 1;
        if prefix_len > 64 {
            log::warn!(
                "bucket {} holds {} points but is at maximum resolution, not splitting",
                parent,
                size
            );
            return Ok(());
        }

        let left = parent.min;
        let right = codec::set_bit(parent.min, parent.prefix_len);
        let left_size = self.count_points(&left, &right)?;
        let right_size = size.saturating_sub(left_size);
        log::debug!(
            "splitting bucket {} (size {}) at bit {} into {} + {}",
            parent,
            size,
            parent.prefix_len,
            left_size,
            right_size
        );

        let mut ops = Vec::with_capacity(4);
        ops.extend(entry_puts(&left, prefix_len, left_size));
        ops.extend(entry_puts(&right, prefix_len, right_size));
        self.store.put_batch(&self.index_table, &ops)?;

        if left_size > self.split_threshold {
            self.split_bucket(&left)?;
        }
        if right_size > self.split_threshold {
            self.split_bucket(&right)?;
        }
        Ok(())
    }

    /// All index entries in Z-code order.
    pub fn entries(&self) -> Result<Vec<BucketEntry>> {
        let rows = self.store.scan(
            &self.index_table,
            &[0; 8],
            None,
            FAMILY_INFO,
            None,
            self.scan_caching,
        )?;
        rows.map(|item| {
            let (row, cells) = item?;
            let (key, size) = decode_entry(&row, &cells)?;
            Ok(BucketEntry { key, size })
        })
        .collect()
    }

    /// Drop the data and index tables.
    pub fn drop_tables(&self) -> Result<()> {
        self.store.drop_table(&self.index_table)?;
        self.store.drop_table(&self.table)
    }

    fn bucket(&self, key: BucketKey) -> Bucket<S> {
        Bucket::new(
            Arc::clone(&self.store),
            self.table.clone(),
            key,
            self.scan_caching,
        )
    }

    fn floor_entry(&self, row: &[u8]) -> Result<(BucketKey, u64)> {
        let (found_row, cells) = self
            .store
            .floor_get(&self.index_table, row, FAMILY_INFO)?
            .ok_or_else(|| {
                ZedbaseError::Corruption(format!(
                    "no index entry at or before row {:02x?} in {}",
                    row, self.index_table
                ))
            })?;
        decode_entry(&found_row, &cells)
    }

    fn count_points(&self, start: &ZCode, stop: &ZCode) -> Result<u64> {
        let rows = self.store.scan(
            &self.table,
            start,
            Some(stop.as_slice()),
            FAMILY_POINTS,
            None,
            self.scan_caching,
        )?;
        let mut count = 0u64;
        for item in rows {
            let (_, cells) = item?;
            count += cells.len() as u64;
        }
        Ok(count)
    }
}

fn clamp_coord(v: i64) -> u32 {
    v.clamp(0, u32::MAX as i64) as u32
}

fn entry_puts(row: &ZCode, prefix_len: u32, size: u64) -> [PutOp; 2] {
    let row = Bytes::copy_from_slice(row);
    [
        PutOp {
            row: row.clone(),
            family: Bytes::from_static(FAMILY_INFO),
            qualifier: Bytes::from_static(COLUMN_PREFIX_LENGTH),
            value: Bytes::copy_from_slice(&prefix_len.to_be_bytes()),
        },
        PutOp {
            row,
            family: Bytes::from_static(FAMILY_INFO),
            qualifier: Bytes::from_static(COLUMN_BUCKET_SIZE),
            value: Bytes::copy_from_slice(&size.to_be_bytes()),
        },
    ]
}

fn decode_entry(row: &Bytes, cells: &RowCells) -> Result<(BucketKey, u64)> {
    let min: ZCode = row.as_ref().try_into().map_err(|_| {
        ZedbaseError::Corruption(format!(
            "index row key is {} bytes, expected 8: {:02x?}",
            row.len(),
            row.as_ref()
        ))
    })?;

    let pl = cells
        .get(COLUMN_PREFIX_LENGTH)
        .ok_or_else(|| {
            ZedbaseError::Corruption(format!("index entry {:02x?} is missing column pl", min))
        })
        .and_then(|value| {
            let bytes: [u8; 4] = value.as_ref().try_into().map_err(|_| {
                ZedbaseError::Corruption(format!("index entry {:02x?} has malformed pl", min))
            })?;
            Ok(u32::from_be_bytes(bytes))
        })?;
    if !(1..=64).contains(&pl) {
        return Err(ZedbaseError::Corruption(format!(
            "index entry {:02x?} has prefix length {} outside 1..=64",
            min, pl
        )));
    }
    let mask = u64::from_be_bytes(codec::make_mask(pl));
    if u64::from_be_bytes(min) & !mask != 0 {
        return Err(ZedbaseError::Corruption(format!(
            "index entry {:02x?} has non-zero bits beyond its prefix length {}",
            min, pl
        )));
    }

    let size = cells
        .get(COLUMN_BUCKET_SIZE)
        .ok_or_else(|| {
            ZedbaseError::Corruption(format!("index entry {:02x?} is missing column bs", min))
        })
        .and_then(|value| {
            let bytes: [u8; 8] = value.as_ref().try_into().map_err(|_| {
                ZedbaseError::Corruption(format!("index entry {:02x?} has malformed bs", min))
            })?;
            Ok(u64::from_be_bytes(bytes))
        })?;

    Ok((BucketKey { min, prefix_len: pl }, size))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::interleave;
    use crate::storage::MemoryStore;
    use crate::types::Point;

    fn open_index(threshold: u64) -> Index<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        let config = IndexConfig::new("t").with_split_threshold(threshold);
        Index::open(store, config).unwrap()
    }

    fn insert(index: &Index<MemoryStore>, p: Point) {
        let row = interleave(p.x, p.y);
        index.fetch_bucket(&row).unwrap().insert(&row, &p).unwrap();
        index.notify_insertion(&row).unwrap();
    }

    #[test]
    fn test_open_seeds_four_quadrants() {
        let index = open_index(10);
        let entries = index.entries().unwrap();
        assert_eq!(entries.len(), 4);
        for (i, entry) in entries.iter().enumerate() {
            assert_eq!(entry.key.prefix_len, 2);
            assert_eq!(entry.size, 0);
            assert_eq!(u64::from_be_bytes(entry.key.min), (i as u64) << 62);
        }
    }

    #[test]
    fn test_open_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let config = IndexConfig::new("t").with_split_threshold(10);
        let index = Index::open(Arc::clone(&store), config.clone()).unwrap();
        insert(&index, Point::new(1, 3, 4));

        // Re-opening over existing tables must not re-seed.
        let reopened = Index::open(store, config).unwrap();
        assert_eq!(reopened.entries().unwrap().len(), 4);
        let row = interleave(3, 4);
        assert_eq!(reopened.fetch_bucket(&row).unwrap().get(&row).unwrap().len(), 1);
    }

    #[test]
    fn test_fetch_bucket_resolves_quadrants() {
        let index = open_index(10);
        let half = 1u32 << 31;

        let bucket = index.fetch_bucket(&interleave(0, 0)).unwrap();
        assert_eq!(bucket.range_x().min, 0);
        assert_eq!(bucket.range_x().max, (half - 1) as i64);

        let bucket = index.fetch_bucket(&interleave(half, 0)).unwrap();
        assert_eq!(bucket.range_x().min, half as i64);
        assert_eq!(bucket.range_x().max, u32::MAX as i64);
        assert_eq!(bucket.range_y().max, (half - 1) as i64);
    }

    #[test]
    fn test_split_preserves_sizes() {
        let index = open_index(4);
        for i in 0..5u32 {
            insert(&index, Point::new(i as i64, i, i));
        }

        let entries = index.entries().unwrap();
        assert!(entries.len() > 4, "the fifth insert must have split");
        let total: u64 = entries.iter().map(|e| e.size).sum();
        assert_eq!(total, 5);
    }

    #[test]
    fn test_find_buckets_includes_floor_bucket() {
        let index = open_index(2);
        // Force a few splits in the first quadrant.
        for i in 0..8u32 {
            insert(&index, Point::new(i as i64, i * 3, i * 3));
        }

        // A query box that starts inside some refined bucket: the covering
        // bucket's row precedes the box's min Z-code and must still show up.
        let rx = Range::new(5, 9).unwrap();
        let ry = Range::new(5, 9).unwrap();
        let buckets: Vec<_> = index
            .find_buckets_in_range(&rx, &ry)
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap();
        assert!(!buckets.is_empty());
        let hits: usize = buckets
            .iter()
            .map(|b| b.scan_range(&rx, &ry).unwrap().len())
            .sum();
        // Points (6,6) and (9,9) fall inside the box.
        assert_eq!(hits, 2);
    }

    #[test]
    fn test_corrupt_entry_is_detected() {
        let store = Arc::new(MemoryStore::new());
        let config = IndexConfig::new("t");
        let index = Index::open(Arc::clone(&store), config).unwrap();

        store
            .put("t_index", &[0; 8], FAMILY_INFO, COLUMN_PREFIX_LENGTH, b"xx")
            .unwrap();
        let err = index.fetch_bucket(&interleave(0, 0)).unwrap_err();
        assert!(matches!(err, ZedbaseError::Corruption(_)));
    }

    #[test]
    fn test_max_resolution_bucket_stops_splitting() {
        let index = open_index(1);
        // Same location over and over: the covering bucket can only narrow
        // down to the single cell, after which splits must stop quietly.
        for id in 0..40 {
            insert(&index, Point::new(id, 9, 9));
        }
        let row = interleave(9, 9);
        let bucket = index.fetch_bucket(&row).unwrap();
        assert_eq!(bucket.get(&row).unwrap().len(), 40);
        let entries = index.entries().unwrap();
        assert!(entries.iter().all(|e| e.key.prefix_len <= 64));
    }
}
