//! Storage abstraction for zedbase.
//!
//! The index runs against any ordered, byte-keyed wide-column store that can
//! answer floor lookups and paginated interval scans. The trait mirrors the
//! handful of primitives the index actually needs; `MemoryStore` is the
//! in-process reference implementation used by tests and the CLI.

use crate::error::{Result, ZedbaseError};
use crate::filter::{FilterDecision, ScanFilter};
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::ops::Bound;
use std::sync::Arc;

/// Cells of one row within one column family, keyed by qualifier.
pub type RowCells = BTreeMap<Bytes, Bytes>;

/// A lazy, finite, non-restartable row sequence produced by a scan.
pub type ScanIter = Box<dyn Iterator<Item = Result<(Bytes, RowCells)>> + Send>;

/// One write of a batched put.
#[derive(Debug, Clone)]
pub struct PutOp {
    pub row: Bytes,
    pub family: Bytes,
    pub qualifier: Bytes,
    pub value: Bytes,
}

/// Contract the index consumes from the underlying store.
///
/// Rows within a table are ordered lexicographically by key. Scan stop keys
/// are exclusive; a stop of `None` scans to the end of the table. All
/// operations may fail with `Io`; none of them roll back partial work.
pub trait Store: Send + Sync {
    /// Create a table with the given column families. Fails if the table
    /// already exists.
    fn create_table(&self, name: &str, families: &[&[u8]]) -> Result<()>;

    fn table_exists(&self, name: &str) -> Result<bool>;

    fn drop_table(&self, name: &str) -> Result<()>;

    /// Write a single cell.
    fn put(
        &self,
        table: &str,
        row: &[u8],
        family: &[u8],
        qualifier: &[u8],
        value: &[u8],
    ) -> Result<()>;

    /// Write several cells so that they become visible together.
    fn put_batch(&self, table: &str, ops: &[PutOp]) -> Result<()>;

    /// Read all cells of `row` in `family`. An absent row yields an empty
    /// map.
    fn get(&self, table: &str, row: &[u8], family: &[u8]) -> Result<RowCells>;

    /// Greatest row whose key is `<= row` and which has cells in `family`.
    fn floor_get(&self, table: &str, row: &[u8], family: &[u8])
        -> Result<Option<(Bytes, RowCells)>>;

    /// Atomically add `delta` to the 8-byte big-endian counter at the given
    /// cell (treating an absent cell as zero) and return the new value.
    fn atomic_increment(
        &self,
        table: &str,
        row: &[u8],
        family: &[u8],
        qualifier: &[u8],
        delta: i64,
    ) -> Result<i64>;

    /// Scan rows in `[start, stop)`, restricted to `family`, applying
    /// `filter` to each cell close to the data. `caching` is the number of
    /// rows examined per page.
    fn scan(
        &self,
        table: &str,
        start: &[u8],
        stop: Option<&[u8]>,
        family: &[u8],
        filter: Option<Arc<dyn ScanFilter>>,
        caching: usize,
    ) -> Result<ScanIter>;
}

struct Table {
    families: HashSet<Bytes>,
    /// row -> family -> qualifier -> value
    rows: BTreeMap<Bytes, HashMap<Bytes, RowCells>>,
}

type Tables = HashMap<String, Table>;

/// In-memory store backed by ordered maps, guarded by a read-write lock so
/// that one handle can be shared between the index and its buckets.
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn check_family(table: &Table, name: &str, family: &[u8]) -> Result<()> {
        if !table.families.contains(family) {
            return Err(ZedbaseError::Io(format!(
                "unknown column family {:?} in table {}",
                String::from_utf8_lossy(family),
                name
            )));
        }
        Ok(())
    }

    fn apply_put(table: &mut Table, name: &str, op: &PutOp) -> Result<()> {
        Self::check_family(table, name, &op.family)?;
        table
            .rows
            .entry(op.row.clone())
            .or_default()
            .entry(op.family.clone())
            .or_default()
            .insert(op.qualifier.clone(), op.value.clone());
        Ok(())
    }
}

fn missing_table(op: &str, name: &str) -> ZedbaseError {
    ZedbaseError::Io(format!("{}: table {} does not exist", op, name))
}

impl Store for MemoryStore {
    fn create_table(&self, name: &str, families: &[&[u8]]) -> Result<()> {
        let mut tables = self.tables.write();
        if tables.contains_key(name) {
            return Err(ZedbaseError::Io(format!(
                "create_table: table {} already exists",
                name
            )));
        }
        tables.insert(
            name.to_string(),
            Table {
                families: families.iter().map(|f| Bytes::copy_from_slice(f)).collect(),
                rows: BTreeMap::new(),
            },
        );
        Ok(())
    }

    fn table_exists(&self, name: &str) -> Result<bool> {
        Ok(self.tables.read().contains_key(name))
    }

    fn drop_table(&self, name: &str) -> Result<()> {
        self.tables
            .write()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| missing_table("drop_table", name))
    }

    fn put(
        &self,
        table: &str,
        row: &[u8],
        family: &[u8],
        qualifier: &[u8],
        value: &[u8],
    ) -> Result<()> {
        let op = PutOp {
            row: Bytes::copy_from_slice(row),
            family: Bytes::copy_from_slice(family),
            qualifier: Bytes::copy_from_slice(qualifier),
            value: Bytes::copy_from_slice(value),
        };
        let mut tables = self.tables.write();
        let t = tables
            .get_mut(table)
            .ok_or_else(|| missing_table("put", table))?;
        Self::apply_put(t, table, &op)
    }

    fn put_batch(&self, table: &str, ops: &[PutOp]) -> Result<()> {
        // The write lock is held across the whole batch, so readers see
        // either none or all of it.
        let mut tables = self.tables.write();
        let t = tables
            .get_mut(table)
            .ok_or_else(|| missing_table("put_batch", table))?;
        for op in ops {
            Self::apply_put(t, table, op)?;
        }
        Ok(())
    }

    fn get(&self, table: &str, row: &[u8], family: &[u8]) -> Result<RowCells> {
        let tables = self.tables.read();
        let t = tables
            .get(table)
            .ok_or_else(|| missing_table("get", table))?;
        Self::check_family(t, table, family)?;
        Ok(t.rows
            .get(row)
            .and_then(|families| families.get(family))
            .cloned()
            .unwrap_or_default())
    }

    fn floor_get(
        &self,
        table: &str,
        row: &[u8],
        family: &[u8],
    ) -> Result<Option<(Bytes, RowCells)>> {
        let tables = self.tables.read();
        let t = tables
            .get(table)
            .ok_or_else(|| missing_table("floor_get", table))?;
        Self::check_family(t, table, family)?;
        let found = t
            .rows
            .range::<[u8], _>((Bound::Unbounded, Bound::Included(row)))
            .rev()
            .find_map(|(key, families)| {
                families
                    .get(family)
                    .filter(|cells| !cells.is_empty())
                    .map(|cells| (key.clone(), cells.clone()))
            });
        Ok(found)
    }

    fn atomic_increment(
        &self,
        table: &str,
        row: &[u8],
        family: &[u8],
        qualifier: &[u8],
        delta: i64,
    ) -> Result<i64> {
        let mut tables = self.tables.write();
        let t = tables
            .get_mut(table)
            .ok_or_else(|| missing_table("atomic_increment", table))?;
        Self::check_family(t, table, family)?;
        let cells = t
            .rows
            .entry(Bytes::copy_from_slice(row))
            .or_default()
            .entry(Bytes::copy_from_slice(family))
            .or_default();
        let qualifier = Bytes::copy_from_slice(qualifier);
        let current = match cells.get(&qualifier) {
            None => 0,
            Some(value) => {
                let bytes: [u8; 8] = value.as_ref().try_into().map_err(|_| {
                    ZedbaseError::Io(format!(
                        "atomic_increment: cell at row {:02x?} in table {} is not an 8-byte counter",
                        row, table
                    ))
                })?;
                i64::from_be_bytes(bytes)
            }
        };
        let updated = current.wrapping_add(delta);
        cells.insert(qualifier, Bytes::copy_from_slice(&updated.to_be_bytes()));
        Ok(updated)
    }

    fn scan(
        &self,
        table: &str,
        start: &[u8],
        stop: Option<&[u8]>,
        family: &[u8],
        filter: Option<Arc<dyn ScanFilter>>,
        caching: usize,
    ) -> Result<ScanIter> {
        {
            let tables = self.tables.read();
            let t = tables
                .get(table)
                .ok_or_else(|| missing_table("scan", table))?;
            Self::check_family(t, table, family)?;
        }
        Ok(Box::new(MemoryScanner {
            tables: Arc::clone(&self.tables),
            table: table.to_string(),
            family: Bytes::copy_from_slice(family),
            filter,
            next_start: Some(Bytes::copy_from_slice(start)),
            stop: stop.map(Bytes::copy_from_slice),
            caching: caching.max(1),
            page: VecDeque::new(),
        }))
    }
}

/// Paginated scanner over a `MemoryStore` table. Each page re-acquires the
/// read lock, examines up to `caching` rows, and remembers where to resume.
struct MemoryScanner {
    tables: Arc<RwLock<Tables>>,
    table: String,
    family: Bytes,
    filter: Option<Arc<dyn ScanFilter>>,
    next_start: Option<Bytes>,
    stop: Option<Bytes>,
    caching: usize,
    page: VecDeque<(Bytes, RowCells)>,
}

impl MemoryScanner {
    fn fetch_page(&mut self) -> Result<()> {
        let Some(start) = self.next_start.take() else {
            return Ok(());
        };

        let tables = self.tables.read();
        let t = tables
            .get(&self.table)
            .ok_or_else(|| missing_table("scan", &self.table))?;

        let upper = match &self.stop {
            Some(stop) => Bound::Excluded(stop.as_ref()),
            None => Bound::Unbounded,
        };
        let mut examined = 0;
        let mut last_row: Option<Bytes> = None;
        for (row, families) in t
            .rows
            .range::<[u8], _>((Bound::Included(start.as_ref()), upper))
        {
            if examined == self.caching {
                break;
            }
            examined += 1;
            last_row = Some(row.clone());

            let Some(cells) = families.get(&self.family) else {
                continue;
            };
            let mut kept = RowCells::new();
            for (qualifier, value) in cells {
                match &self.filter {
                    Some(filter) => match filter.check(value) {
                        FilterDecision::Include => {
                            kept.insert(qualifier.clone(), value.clone());
                        }
                        FilterDecision::SkipRow => {
                            kept.clear();
                            break;
                        }
                    },
                    None => {
                        kept.insert(qualifier.clone(), value.clone());
                    }
                }
            }
            if !kept.is_empty() {
                self.page.push_back((row.clone(), kept));
            }
        }

        if examined == self.caching {
            // The page may have ended mid-table; resume just after the last
            // examined row.
            if let Some(last) = last_row {
                let mut successor = Vec::with_capacity(last.len() + 1);
                successor.extend_from_slice(&last);
                successor.push(0x00);
                self.next_start = Some(Bytes::from(successor));
            }
        }
        Ok(())
    }
}

impl Iterator for MemoryScanner {
    type Item = Result<(Bytes, RowCells)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.page.pop_front() {
                return Some(Ok(item));
            }
            self.next_start.as_ref()?;
            if let Err(e) = self.fetch_page() {
                self.next_start = None;
                return Some(Err(e));
            }
            if self.page.is_empty() && self.next_start.is_none() {
                return None;
            }
        }
    }
}
