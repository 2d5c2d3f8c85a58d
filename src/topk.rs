use std::cmp::Ordering;
use std::collections::BinaryHeap;

use ordered_float::OrderedFloat;
use thiserror::Error;

use crate::model::{CatalogRecord, Ranked};
use crate::vector::squared_euclidean;

#[derive(Debug, Error, PartialEq)]
pub enum SelectError {
    #[error("k must be at least 1")]
    ZeroK,

    #[error("embedding dimension mismatch: query has {expected}, record {id} has {got}")]
    DimensionMismatch { expected: usize, got: usize, id: u128 },
}

/// Heap entry. Natural ordering is (distance, id) ascending, so in a
/// BinaryHeap the peek is the current WORST candidate. The id component
/// is the documented tie-break: equal distances resolve to the lower
/// record id, both at the k-boundary and in the final ordering, which
/// makes selection deterministic regardless of stream order.
#[derive(Debug)]
struct Candidate {
    dist_sq: OrderedFloat<f32>,
    record: CatalogRecord,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.dist_sq == other.dist_sq && self.record.id == other.record.id
    }
}
impl Eq for Candidate {}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.dist_sq
            .cmp(&other.dist_sq)
            .then(self.record.id.cmp(&other.record.id))
    }
}
impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Select the k catalog records closest to `query`, ascending by distance.
///
/// Maintains a bounded heap of at most k entries over a single pass of the
/// candidate stream: O(M log k) time, O(k) memory. An empty stream yields
/// an empty result; k greater than the stream length yields everything.
pub fn select_top_k<I>(query: &[f32], candidates: I, k: usize) -> Result<Vec<Ranked>, SelectError>
where
    I: IntoIterator<Item = CatalogRecord>,
{
    if k == 0 {
        return Err(SelectError::ZeroK);
    }

    let mut heap: BinaryHeap<Candidate> = BinaryHeap::with_capacity(k + 1);

    for record in candidates {
        if record.embedding.len() != query.len() {
            return Err(SelectError::DimensionMismatch {
                expected: query.len(),
                got: record.embedding.len(),
                id: record.id,
            });
        }

        let cand = Candidate {
            dist_sq: OrderedFloat(squared_euclidean(query, &record.embedding)),
            record,
        };

        if heap.len() < k {
            heap.push(cand);
        } else if let Some(mut worst) = heap.peek_mut() {
            if cand < *worst {
                *worst = cand;
            }
        }
    }

    let ranked = heap
        .into_sorted_vec()
        .into_iter()
        .map(|c| Ranked {
            distance: c.dist_sq.into_inner().sqrt(),
            record: c.record,
        })
        .collect();

    Ok(ranked)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: u128, embedding: Vec<f32>) -> CatalogRecord {
        CatalogRecord {
            id,
            name: format!("item-{id}"),
            description: String::new(),
            date: "2024-01-01".into(),
            image_path: format!("static/uploaded/{id}.jpg"),
            embedding,
        }
    }

    // Records placed on one axis so the distance to the origin query is the
    // coordinate itself.
    fn axis_records(coords: &[(u128, f32)]) -> Vec<CatalogRecord> {
        coords
            .iter()
            .map(|&(id, x)| record(id, vec![x, 0.0, 0.0, 0.0]))
            .collect()
    }

    #[test]
    fn returns_min_of_k_and_candidate_count() {
        let query = vec![0.0; 4];
        let recs = axis_records(&[(1, 0.4), (2, 0.2), (3, 0.9)]);

        let out = select_top_k(&query, recs.clone(), 2).unwrap();
        assert_eq!(out.len(), 2);

        let out = select_top_k(&query, recs, 10).unwrap();
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn orders_ascending_by_distance() {
        // Distances {0.1, 0.5, 0.3}; k=2 must return 0.1 then 0.3
        let query = vec![0.0; 4];
        let recs = axis_records(&[(1, 0.1), (2, 0.5), (3, 0.3)]);

        let out = select_top_k(&query, recs, 2).unwrap();
        assert_eq!(out[0].record.id, 1);
        assert!((out[0].distance - 0.1).abs() < 1e-6);
        assert_eq!(out[1].record.id, 3);
        assert!((out[1].distance - 0.3).abs() < 1e-6);
    }

    #[test]
    fn distances_are_true_euclidean() {
        let query = vec![0.0, 0.0, 0.0, 0.0];
        let recs = vec![record(1, vec![3.0, 4.0, 0.0, 0.0])];

        let out = select_top_k(&query, recs, 1).unwrap();
        assert!((out[0].distance - 5.0).abs() < 1e-6);
    }

    #[test]
    fn ties_break_on_lower_id() {
        let query = vec![0.0; 4];
        // Three records at the same distance, ids deliberately out of order
        let recs = axis_records(&[(7, 0.5), (2, 0.5), (5, 0.5)]);

        let out = select_top_k(&query, recs.clone(), 2).unwrap();
        assert_eq!(out.iter().map(|r| r.record.id).collect::<Vec<_>>(), vec![2, 5]);

        // Same outcome with the stream reversed
        let reversed: Vec<_> = recs.into_iter().rev().collect();
        let out = select_top_k(&query, reversed, 2).unwrap();
        assert_eq!(out.iter().map(|r| r.record.id).collect::<Vec<_>>(), vec![2, 5]);
    }

    #[test]
    fn deterministic_across_runs() {
        let query = vec![0.0; 4];
        let recs = axis_records(&[(1, 0.8), (2, 0.1), (3, 0.8), (4, 0.1), (5, 0.4)]);

        let first = select_top_k(&query, recs.clone(), 3).unwrap();
        for _ in 0..5 {
            assert_eq!(select_top_k(&query, recs.clone(), 3).unwrap(), first);
        }
    }

    #[test]
    fn empty_stream_is_empty_result() {
        let out = select_top_k(&[0.0; 4], Vec::new(), 5).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn zero_k_is_an_error() {
        let recs = axis_records(&[(1, 0.1)]);
        assert_eq!(select_top_k(&[0.0; 4], recs, 0), Err(SelectError::ZeroK));
    }

    #[test]
    fn dimension_mismatch_fails_fast() {
        let query = vec![0.0; 4];
        let recs = vec![record(9, vec![0.1; 3])];

        match select_top_k(&query, recs, 5) {
            Err(SelectError::DimensionMismatch { expected, got, id }) => {
                assert_eq!((expected, got, id), (4, 3, 9));
            }
            other => panic!("expected dimension mismatch, got {other:?}"),
        }
    }
}
