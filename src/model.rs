use rkyv::{Archive, Deserialize as RkyvDeserialize, Serialize as RkyvSerialize};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// Default embedding dimensionality. The grid embedder produces 16x16 cells
// with 5 statistics each; any custom Embedder fixes its own D at startup.
pub const EMBED_DIM: usize = 1280;

/// One catalog entry. Appended on ingest, never mutated.
#[derive(Archive, RkyvDeserialize, RkyvSerialize, Serialize, Deserialize, Debug, Clone, PartialEq)]
#[archive(check_bytes)]
pub struct CatalogRecord {
    /// Store-assigned UUID (v4), kept as u128 for cheap ordering
    pub id: u128,

    pub name: String,
    pub description: String,

    /// Caller-supplied date string, not validated as a calendar date
    pub date: String,

    /// Where the ingested image landed on disk
    pub image_path: String,

    /// L2-normalized embedding of the image
    pub embedding: Vec<f32>,
}

impl CatalogRecord {
    pub fn new(
        id: Uuid,
        name: String,
        description: String,
        date: String,
        image_path: String,
        embedding: Vec<f32>,
    ) -> Self {
        Self {
            id: id.as_u128(),
            name,
            description,
            date,
            image_path,
            embedding,
        }
    }

    pub fn uuid(&self) -> Uuid {
        Uuid::from_u128(self.id)
    }
}

/// A scored catalog entry, produced transiently per query.
#[derive(Debug, Clone, PartialEq)]
pub struct Ranked {
    pub record: CatalogRecord,
    /// True Euclidean distance to the query (not squared)
    pub distance: f32,
}
