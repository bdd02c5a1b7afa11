//! Index configuration.

use crate::error::{Result, ZedbaseError};
use serde::{Deserialize, Serialize};

/// Suffix appended to the data table name to derive the index table name.
pub const INDEX_TABLE_SUFFIX: &str = "_index";

/// Configuration for one index instance.
///
/// Serializable so deployments can load it from JSON or TOML alongside the
/// store connection settings.
///
/// # Example
///
/// ```rust
/// use zedbase::IndexConfig;
///
/// let config = IndexConfig::new("sample").with_split_threshold(10);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Name of the data table. The index table is named `<table>_index`.
    pub table: String,

    /// A bucket splits once its point count exceeds this value.
    #[serde(default = "IndexConfig::default_split_threshold")]
    pub split_threshold: u64,

    /// Batching hint passed to store scans (rows fetched per round trip).
    #[serde(default = "IndexConfig::default_scan_caching")]
    pub scan_caching: usize,
}

impl IndexConfig {
    const fn default_split_threshold() -> u64 {
        1000
    }

    const fn default_scan_caching() -> usize {
        1000
    }

    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            split_threshold: Self::default_split_threshold(),
            scan_caching: Self::default_scan_caching(),
        }
    }

    pub fn with_split_threshold(mut self, threshold: u64) -> Self {
        self.split_threshold = threshold;
        self
    }

    pub fn with_scan_caching(mut self, caching: usize) -> Self {
        self.scan_caching = caching;
        self
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an empty table name, a table name that
    /// collides with the derived index table name, or zero thresholds.
    pub fn validate(&self) -> Result<()> {
        if self.table.is_empty() {
            return Err(ZedbaseError::InvalidArgument(
                "table name must not be empty".to_string(),
            ));
        }
        if self.table.ends_with(INDEX_TABLE_SUFFIX) {
            return Err(ZedbaseError::InvalidArgument(format!(
                "table name must not end in \"{}\": {}",
                INDEX_TABLE_SUFFIX, self.table
            )));
        }
        if self.split_threshold == 0 {
            return Err(ZedbaseError::InvalidArgument(
                "split threshold must be greater than zero".to_string(),
            ));
        }
        if self.scan_caching == 0 {
            return Err(ZedbaseError::InvalidArgument(
                "scan caching must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Name of the derived index table.
    pub fn index_table(&self) -> String {
        format!("{}{}", self.table, INDEX_TABLE_SUFFIX)
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self::new("points")
    }
}
