//! Client: the query engine composing [`Index`] and [`Bucket`].
//!
//! One client owns one index over one data table. Only a single logical
//! writer may operate on a given pair of tables at a time; readers can run
//! alongside it and may or may not observe an in-flight insertion.

use crate::bucket::Bucket;
use crate::codec;
use crate::config::IndexConfig;
use crate::error::{Result, ZedbaseError};
use crate::index::{BucketKey, Index};
use crate::storage::Store;
use crate::types::{Point, Range};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::sync::Arc;

/// Handle over a zedbase index.
///
/// # Example
///
/// ```rust
/// use zedbase::{Client, IndexConfig, MemoryStore, Point, Range};
/// use std::sync::Arc;
///
/// let store = Arc::new(MemoryStore::new());
/// let mut client = Client::open(store, IndexConfig::default())?;
///
/// client.insert(&Point::new(1, 10, 20))?;
/// let hits = client.range_query(&Range::new(0, 15)?, &Range::new(0, 31)?)?;
/// assert_eq!(hits.len(), 1);
/// # Ok::<(), zedbase::ZedbaseError>(())
/// ```
pub struct Client<S: Store> {
    index: Index<S>,
    closed: bool,
}

impl<S: Store> Client<S> {
    /// Open a client, creating the data and index tables on first use.
    pub fn open(store: Arc<S>, config: IndexConfig) -> Result<Self> {
        Ok(Self {
            index: Index::open(store, config)?,
            closed: false,
        })
    }

    /// Insert a point at its Z-code row and notify the index, which may
    /// split the covering bucket.
    pub fn insert(&mut self, point: &Point) -> Result<()> {
        self.ensure_open()?;
        let row = codec::interleave(point.x, point.y);
        let bucket = self.index.fetch_bucket(&row)?;
        bucket.insert(&row, point)?;
        self.index.notify_insertion(&row)
    }

    /// All points stored exactly at `(x, y)`.
    pub fn get(&self, x: u32, y: u32) -> Result<Vec<Point>> {
        self.ensure_open()?;
        let row = codec::interleave(x, y);
        let bucket = self.index.fetch_bucket(&row)?;
        bucket.get(&row)
    }

    /// All points inside the rectangle `rx × ry`.
    ///
    /// Result order is unspecified; duplicates are impossible because every
    /// cell lives in exactly one bucket.
    pub fn range_query(&self, rx: &Range, ry: &Range) -> Result<Vec<Point>> {
        self.ensure_open()?;
        let mut results = Vec::new();
        for bucket in self.index.find_buckets_in_range(rx, ry)? {
            results.extend(bucket?.scan_range(rx, ry)?);
        }
        Ok(results)
    }

    /// The `k` points nearest to `query`, ascending by distance, ties broken
    /// arbitrarily.
    ///
    /// Incremental best-first search: a square around the query grows until
    /// it touches candidate buckets, which are visited nearest-rectangle
    /// first. Once `k` points are held, a candidate bucket farther than the
    /// current k-th distance proves that no closer point remains. After each
    /// visited bucket the square is widened to just past the Chebyshev
    /// distance of the bucket's farthest corner so the next round cannot
    /// miss anything nearer.
    pub fn nearest_neighbors(&self, query: &Point, k: usize) -> Result<Vec<Point>> {
        self.ensure_open()?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut neighbors: Vec<(f64, Point)> = Vec::new();
        let mut farthest = f64::INFINITY;
        let mut offset: i64 = 0;
        let mut scanned: HashSet<BucketKey> = HashSet::new();

        loop {
            let rx = Range {
                min: query.x as i64 - offset,
                max: query.x as i64 + offset,
            };
            let ry = Range {
                min: query.y as i64 - offset,
                max: query.y as i64 + offset,
            };

            let mut queue = BinaryHeap::new();
            for bucket in self.index.find_buckets_in_range(&rx, &ry)? {
                let bucket = bucket?;
                if scanned.contains(&bucket.key()) {
                    continue;
                }
                queue.push(Candidate {
                    distance: bucket.distance_from(query),
                    bucket,
                });
            }
            if queue.is_empty() {
                break;
            }

            while let Some(candidate) = queue.pop() {
                if candidate.distance > farthest {
                    return Ok(neighbors.into_iter().map(|(_, p)| p).collect());
                }
                let bucket = candidate.bucket;

                for point in bucket.scan()? {
                    let distance = query.distance_from(&point);
                    let pos = neighbors.partition_point(|(d, _)| *d <= distance);
                    neighbors.insert(pos, (distance, point));
                    if neighbors.len() > k {
                        neighbors.truncate(k);
                        if let Some(&(d, _)) = neighbors.last() {
                            farthest = d;
                        }
                    }
                }

                scanned.insert(bucket.key());
                // Widen to strictly past the bucket's farthest corner. With
                // corners aligned on bucket boundaries, stopping exactly on
                // the corner would leave the adjacent bucket outside the
                // next square and end the search one cell short.
                let corner = bucket.farthest_corner_from(query);
                offset = offset.max(chebyshev(query, &corner) + 1);
            }
        }

        Ok(neighbors.into_iter().map(|(_, p)| p).collect())
    }

    /// Access to the underlying index, e.g. for listing bucket entries.
    pub fn index(&self) -> &Index<S> {
        &self.index
    }

    /// Mark the client closed. Subsequent operations fail with `Closed`.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Err(ZedbaseError::Closed);
        }
        self.closed = true;
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(ZedbaseError::Closed);
        }
        Ok(())
    }
}

/// Chebyshev distance between two points.
fn chebyshev(a: &Point, b: &Point) -> i64 {
    let dx = (a.x as i64 - b.x as i64).abs();
    let dy = (a.y as i64 - b.y as i64).abs();
    dx.max(dy)
}

/// A candidate bucket ordered by distance from the query, nearest first.
struct Candidate<S: Store> {
    distance: f64,
    bucket: Bucket<S>,
}

impl<S: Store> PartialEq for Candidate<S> {
    fn eq(&self, other: &Self) -> bool {
        self.distance.total_cmp(&other.distance) == Ordering::Equal
    }
}

impl<S: Store> Eq for Candidate<S> {}

impl<S: Store> PartialOrd for Candidate<S> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<S: Store> Ord for Candidate<S> {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap pops the greatest element; invert to visit the nearest
        // bucket first.
        other.distance.total_cmp(&self.distance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    fn open_client(threshold: u64) -> Client<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        Client::open(store, IndexConfig::new("t").with_split_threshold(threshold)).unwrap()
    }

    #[test]
    fn test_insert_and_get() {
        let mut client = open_client(10);
        client.insert(&Point::new(1, 5, 7)).unwrap();
        client.insert(&Point::new(2, 5, 7)).unwrap();

        let found = client.get(5, 7).unwrap();
        assert_eq!(found.len(), 2);
        assert!(client.get(7, 5).unwrap().is_empty());
    }

    #[test]
    fn test_close_rejects_operations() {
        let mut client = open_client(10);
        client.insert(&Point::new(1, 1, 1)).unwrap();
        client.close().unwrap();

        assert!(matches!(
            client.insert(&Point::new(2, 2, 2)),
            Err(ZedbaseError::Closed)
        ));
        assert!(matches!(client.get(1, 1), Err(ZedbaseError::Closed)));
        assert!(matches!(client.close(), Err(ZedbaseError::Closed)));
    }

    #[test]
    fn test_knn_zero_k() {
        let mut client = open_client(10);
        client.insert(&Point::new(1, 1, 1)).unwrap();
        assert!(client
            .nearest_neighbors(&Point::new(0, 0, 0), 0)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_knn_fewer_points_than_k() {
        let mut client = open_client(10);
        client.insert(&Point::new(1, 1, 1)).unwrap();
        client.insert(&Point::new(2, 100, 100)).unwrap();

        let found = client.nearest_neighbors(&Point::new(0, 0, 0), 5).unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].id, 1);
        assert_eq!(found[1].id, 2);
    }
}
