pub mod auth;
pub mod embed;
pub mod error;
pub mod model;
pub mod server;
pub mod storage;
pub mod topk;
pub mod vector;

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::{Mutex, RwLock};

use thiserror::Error;
use uuid::Uuid;

use crate::model::CatalogRecord;
use crate::storage::Segment;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("embedding dimension mismatch: catalog expects {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("catalog io: {0}")]
    Io(#[from] std::io::Error),

    #[error("poisoned catalog lock")]
    PoisonedLock,
}

/// The catalog store. One append-only segment on disk plus an in-memory
/// id -> offset index rebuilt from the segment at startup. Internally
/// synchronized: inserts serialize on the segment writer, scans read from
/// their own descriptor and never block it for long.
pub struct Catalog {
    active_segment: Mutex<Segment>,
    index: RwLock<HashMap<u128, u64>>,
    dim: usize,
}

impl fmt::Debug for Catalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Catalog")
            .field("records", &self.index.read().map(|i| i.len()).unwrap_or(0))
            .field("dim", &self.dim)
            .finish()
    }
}

impl Catalog {
    /// Open (or create) the catalog at `path`, replaying any existing
    /// entries to rebuild the index. `dim` is the embedding dimension the
    /// current embedder produces; stored records must match it.
    pub fn open(path: &Path, dim: usize) -> Result<Self, CatalogError> {
        let segment = Segment::open(path)?;

        let mut index = HashMap::new();
        for (offset, record) in segment.reader()?.scan()? {
            if record.embedding.len() != dim {
                return Err(CatalogError::DimensionMismatch {
                    expected: dim,
                    got: record.embedding.len(),
                });
            }
            index.insert(record.id, offset);
        }

        tracing::info!(records = index.len(), dim, "catalog opened");

        Ok(Self {
            active_segment: Mutex::new(segment),
            index: RwLock::new(index),
            dim,
        })
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn len(&self) -> usize {
        self.index.read().map(|i| i.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append one record. The write is atomic at the record level: either
    /// the entry is fully on disk and indexed, or nothing changed.
    pub fn insert(&self, record: CatalogRecord) -> Result<Uuid, CatalogError> {
        if record.embedding.len() != self.dim {
            return Err(CatalogError::DimensionMismatch {
                expected: self.dim,
                got: record.embedding.len(),
            });
        }

        let id = record.id;
        let offset = {
            let mut segment = self
                .active_segment
                .lock()
                .map_err(|_| CatalogError::PoisonedLock)?;
            segment.append(&record)?
        };

        {
            let mut idx = self.index.write().map_err(|_| CatalogError::PoisonedLock)?;
            idx.insert(id, offset);
        }

        Ok(Uuid::from_u128(id))
    }

    pub fn get(&self, id: Uuid) -> Option<CatalogRecord> {
        let offset = {
            let idx = self.index.read().ok()?;
            *idx.get(&id.as_u128())?
        };
        let segment = self.active_segment.lock().ok()?;
        segment.read(offset).ok()
    }

    /// Full scan of every record, in append order. The segment lock is
    /// held only long enough to open a read descriptor, so concurrent
    /// inserts proceed while the scan reads. Inserts acknowledged before
    /// the scan starts are always included.
    pub fn scan(&self) -> Result<Vec<CatalogRecord>, CatalogError> {
        let reader = {
            let segment = self
                .active_segment
                .lock()
                .map_err(|_| CatalogError::PoisonedLock)?;
            segment.reader()?
        };

        let records = reader.scan()?.into_iter().map(|(_, r)| r).collect();
        Ok(records)
    }
}
