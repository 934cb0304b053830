//! The enrolled-face gallery.
//!
//! A [`GallerySnapshot`] is an immutable N×D matrix of enrolled embeddings with
//! the member ids of its rows, sorted by member id. [`Gallery`] holds the
//! current snapshot and swaps in a freshly built one on reload, so concurrent
//! matchers always see a complete snapshot.

use crate::store::{MemberStore, StoreError};
use crate::types::{EnrolledEmbedding, MemberId};
use chrono::{DateTime, Utc};
use ndarray::{Array1, Array2, Axis};
use serde::Serialize;
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;
use tokio::sync::Mutex;

/// An enrolled embedding that could not be admitted to the gallery.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("corrupt embedding for member {member}: {reason}")]
pub struct CorruptEmbedding {
    pub member: MemberId,
    pub reason: String,
}

#[derive(Debug)]
pub struct GallerySnapshot {
    member_ids: Vec<MemberId>,
    /// One row per member, same order as `member_ids`.
    matrix: Array2<f32>,
    row_norms: Array1<f32>,
    loaded_at: DateTime<Utc>,
}

impl GallerySnapshot {
    pub fn empty(dimension: usize) -> Self {
        Self {
            member_ids: Vec::new(),
            matrix: Array2::zeros((0, dimension)),
            row_norms: Array1::zeros(0),
            loaded_at: Utc::now(),
        }
    }

    /// Build a snapshot, excluding entries that do not fit.
    ///
    /// Empty vectors are skipped silently (the member is not enrolled). Entries
    /// with the wrong dimension, non-finite values or a repeated member id are
    /// excluded and returned as [`CorruptEmbedding`].
    pub fn build(
        mut entries: Vec<EnrolledEmbedding>,
        dimension: usize,
    ) -> (Self, Vec<CorruptEmbedding>) {
        entries.sort_by_key(|e| e.member_id);

        let mut issues = Vec::new();
        let mut member_ids: Vec<MemberId> = Vec::with_capacity(entries.len());
        let mut flat = Vec::with_capacity(entries.len() * dimension);

        for entry in entries {
            if entry.values.is_empty() {
                continue;
            }
            let reason = if entry.values.len() != dimension {
                Some(format!("expected {dimension} dimensions, got {}", entry.values.len()))
            } else if entry.values.iter().any(|v| !v.is_finite()) {
                Some("non-finite component".to_string())
            } else if member_ids.last() == Some(&entry.member_id) {
                Some("duplicate entry".to_string())
            } else {
                None
            };

            match reason {
                Some(reason) => issues.push(CorruptEmbedding {
                    member: entry.member_id,
                    reason,
                }),
                None => {
                    member_ids.push(entry.member_id);
                    flat.extend_from_slice(&entry.values);
                }
            }
        }

        let matrix = Array2::from_shape_vec((member_ids.len(), dimension), flat)
            .unwrap_or_else(|_| Array2::zeros((0, dimension)));
        let row_norms = matrix.map_axis(Axis(1), |row| row.dot(&row).sqrt());

        let snapshot = Self {
            member_ids,
            matrix,
            row_norms,
            loaded_at: Utc::now(),
        };
        (snapshot, issues)
    }

    pub fn len(&self) -> usize {
        self.member_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.member_ids.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.matrix.ncols()
    }

    /// Member ids in row order (ascending).
    pub fn member_ids(&self) -> &[MemberId] {
        &self.member_ids
    }

    pub fn contains(&self, member: MemberId) -> bool {
        self.member_ids.binary_search(&member).is_ok()
    }

    pub fn matrix(&self) -> &Array2<f32> {
        &self.matrix
    }

    pub fn row_norms(&self) -> &Array1<f32> {
        &self.row_norms
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }
}

/// Summary of one gallery (re)load.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ReloadReport {
    pub members: usize,
    pub skipped: usize,
    pub dimension: usize,
}

/// Shared, read-mostly gallery with atomic snapshot replacement.
#[derive(Debug)]
pub struct Gallery {
    dimension: usize,
    current: RwLock<Arc<GallerySnapshot>>,
    /// Held from the store read until the swap so reloads install in order.
    reload_guard: Mutex<()>,
}

impl Gallery {
    /// An empty gallery for embeddings of `dimension` components.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            current: RwLock::new(Arc::new(GallerySnapshot::empty(dimension))),
            reload_guard: Mutex::new(()),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// The current snapshot. Cheap; holds no lock after returning.
    pub fn snapshot(&self) -> Arc<GallerySnapshot> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Re-read every enrolled embedding and swap in the new snapshot.
    ///
    /// On a store error the previous snapshot stays in place. Concurrent reloads
    /// run one at a time, so a later reload never loses to an earlier one.
    pub async fn reload<S: MemberStore>(&self, store: &S) -> Result<ReloadReport, StoreError> {
        let _guard = self.reload_guard.lock().await;
        let entries = store.enrolled_embeddings().await?;
        let (snapshot, issues) = GallerySnapshot::build(entries, self.dimension);

        for issue in &issues {
            tracing::warn!(member = %issue.member, reason = %issue.reason, "excluding corrupt embedding from gallery");
        }

        let report = ReloadReport {
            members: snapshot.len(),
            skipped: issues.len(),
            dimension: self.dimension,
        };
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(snapshot);

        tracing::info!(
            members = report.members,
            skipped = report.skipped,
            dimension = report.dimension,
            "gallery loaded"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use crate::types::Member;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn entry(id: i64, values: Vec<f32>) -> EnrolledEmbedding {
        EnrolledEmbedding { member_id: MemberId(id), values }
    }

    #[test]
    fn test_build_sorts_by_member_id() {
        let (snap, issues) = GallerySnapshot::build(
            vec![entry(7, vec![7.0, 7.0]), entry(2, vec![2.0, 2.0]), entry(5, vec![5.0, 5.0])],
            2,
        );
        assert!(issues.is_empty());
        assert_eq!(snap.member_ids(), &[MemberId(2), MemberId(5), MemberId(7)]);
        assert_eq!(snap.matrix().row(0).to_vec(), vec![2.0, 2.0]);
        assert_eq!(snap.matrix().row(2).to_vec(), vec![7.0, 7.0]);
    }

    #[test]
    fn test_build_skips_empty_silently() {
        let (snap, issues) = GallerySnapshot::build(vec![entry(1, vec![]), entry(2, vec![1.0, 0.0])], 2);
        assert!(issues.is_empty());
        assert_eq!(snap.len(), 1);
        assert!(!snap.contains(MemberId(1)));
    }

    #[test]
    fn test_build_excludes_wrong_dimension_and_continues() {
        let (snap, issues) = GallerySnapshot::build(
            vec![entry(1, vec![1.0, 2.0, 3.0]), entry(2, vec![1.0, 0.0]), entry(3, vec![0.0, 1.0])],
            2,
        );
        assert_eq!(snap.member_ids(), &[MemberId(2), MemberId(3)]);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].member, MemberId(1));
        assert!(issues[0].reason.contains("expected 2"));
    }

    #[test]
    fn test_build_excludes_non_finite_and_duplicates() {
        let (snap, issues) = GallerySnapshot::build(
            vec![entry(1, vec![f32::NAN, 0.0]), entry(2, vec![1.0, 0.0]), entry(2, vec![0.0, 1.0])],
            2,
        );
        assert_eq!(snap.len(), 1);
        assert_eq!(issues.len(), 2);
    }

    #[test]
    fn test_row_norms() {
        let (snap, _) = GallerySnapshot::build(vec![entry(1, vec![3.0, 4.0])], 2);
        assert!((snap.row_norms()[0] - 5.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_reload_swaps_snapshot() {
        let store = MemoryStore::default()
            .with_member(1, "Ann", vec![1.0, 0.0])
            .with_member(2, "Bob", vec![]);
        let gallery = Gallery::new(2);
        assert!(gallery.snapshot().is_empty());

        let before = gallery.snapshot();
        let report = gallery.reload(&store).await.unwrap();
        assert_eq!(report, ReloadReport { members: 1, skipped: 0, dimension: 2 });

        // Old readers keep their complete snapshot; new readers see the new one.
        assert!(before.is_empty());
        assert_eq!(gallery.snapshot().member_ids(), &[MemberId(1)]);
    }

    /// Serves the stale gallery slowly on the first read, the current one after.
    struct LaggingStore {
        reads: AtomicUsize,
    }

    impl MemberStore for LaggingStore {
        async fn enrolled_embeddings(&self) -> Result<Vec<EnrolledEmbedding>, StoreError> {
            if self.reads.fetch_add(1, Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok(vec![entry(1, vec![1.0, 0.0])])
            } else {
                Ok(vec![entry(1, vec![1.0, 0.0]), entry(2, vec![0.0, 1.0])])
            }
        }

        async fn member(&self, _id: MemberId) -> Result<Option<Member>, StoreError> {
            Ok(None)
        }

        async fn set_embedding(&self, _id: MemberId, _values: Vec<f32>) -> Result<(), StoreError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_overlapping_reloads_keep_latest() {
        let store = LaggingStore { reads: AtomicUsize::new(0) };
        let gallery = Gallery::new(2);

        let first = gallery.reload(&store);
        let second = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            gallery.reload(&store).await
        };
        let (first, second) = tokio::join!(first, second);
        assert_eq!(first.unwrap().members, 1);
        assert_eq!(second.unwrap().members, 2);

        assert_eq!(gallery.snapshot().member_ids(), &[MemberId(1), MemberId(2)]);
    }

    #[tokio::test]
    async fn test_reload_reports_corrupt_entries() {
        let store = MemoryStore::default()
            .with_member(1, "Ann", vec![1.0, 0.0, 0.0])
            .with_member(2, "Bob", vec![0.0, 1.0]);
        let gallery = Gallery::new(2);
        let report = gallery.reload(&store).await.unwrap();
        assert_eq!(report.members, 1);
        assert_eq!(report.skipped, 1);
    }
}
