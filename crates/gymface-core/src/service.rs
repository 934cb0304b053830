//! Gallery, matcher and recorder wired together over one store.

use crate::error::CheckinError;
use crate::gallery::{Gallery, GallerySnapshot, ReloadReport};
use crate::matcher::{matcher_for, DistanceMetric, Matcher};
use crate::recorder::{CheckinOutcome, CheckinRecorder, RecorderConfig};
use crate::store::{AttendanceStore, MemberStore, StoreError};
use crate::types::{Embedding, MatchDecision, Member, MemberId};
use std::sync::Arc;

pub struct CheckinService<S> {
    store: Arc<S>,
    gallery: Gallery,
    matcher: Box<dyn Matcher>,
    threshold: f32,
    recorder: CheckinRecorder<S>,
}

impl<S: MemberStore + AttendanceStore> CheckinService<S> {
    /// Build the service and load the initial gallery snapshot.
    pub async fn new(
        store: Arc<S>,
        dimension: usize,
        metric: DistanceMetric,
        threshold: f32,
        recorder: RecorderConfig,
    ) -> Result<Self, StoreError> {
        let service = Self {
            gallery: Gallery::new(dimension),
            matcher: matcher_for(metric),
            threshold,
            recorder: CheckinRecorder::new(store.clone(), recorder),
            store,
        };
        service.reload_gallery().await?;
        Ok(service)
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn gallery(&self) -> Arc<GallerySnapshot> {
        self.gallery.snapshot()
    }

    pub fn dimension(&self) -> usize {
        self.gallery.dimension()
    }

    pub fn metric(&self) -> DistanceMetric {
        self.matcher.metric()
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub async fn reload_gallery(&self) -> Result<ReloadReport, StoreError> {
        self.gallery.reload(self.store.as_ref()).await
    }

    /// Match `probe` against the current snapshot without recording anything.
    pub fn match_probe(&self, probe: &Embedding) -> Result<MatchDecision, CheckinError> {
        let snapshot = self.gallery.snapshot();
        let decision = self.matcher.compare(probe, &snapshot, self.threshold)?;
        tracing::debug!(
            matched = decision.matched,
            distance = decision.distance,
            gallery_size = snapshot.len(),
            "probe matched against gallery"
        );
        Ok(decision)
    }

    /// Match `probe` and record a check-in if it is accepted.
    pub async fn check_in(&self, probe: &Embedding) -> Result<CheckinOutcome, CheckinError> {
        let decision = self.match_probe(probe)?;
        Ok(self.recorder.record(decision).await?)
    }

    /// Store `embedding` as the member's face and reload the gallery.
    pub async fn enroll(
        &self,
        member: MemberId,
        embedding: &Embedding,
    ) -> Result<(Member, ReloadReport), CheckinError> {
        if embedding.dimension() != self.dimension() {
            return Err(CheckinError::EmbeddingFailure(format!(
                "embedding has {} dimensions, gallery expects {}",
                embedding.dimension(),
                self.dimension()
            )));
        }
        let Some(record) = self.store.member(member).await? else {
            return Err(StoreError::MemberNotFound(member).into());
        };
        self.store.set_embedding(member, embedding.values.clone()).await?;
        tracing::info!(member = %member, model = ?embedding.model_version, "face enrolled");

        let report = self.reload_gallery().await?;
        Ok((record, report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use crate::types::EventType;

    async fn service(store: MemoryStore, threshold: f32) -> CheckinService<MemoryStore> {
        CheckinService::new(
            Arc::new(store),
            2,
            DistanceMetric::Euclidean,
            threshold,
            RecorderConfig::default(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_empty_gallery() {
        let svc = service(MemoryStore::default().with_member(1, "Ann", vec![]), 0.6).await;
        for p in [vec![0.0, 0.0], vec![3.0, -1.0]] {
            let err = svc.check_in(&Embedding::new(p)).await.unwrap_err();
            assert!(matches!(err, CheckinError::EmptyGallery));
        }
        assert!(svc.store().events().is_empty());
    }

    #[tokio::test]
    async fn test_scenario_nearest_member_checked_in() {
        let store = MemoryStore::default()
            .with_member(1, "Ann", vec![0.0, 0.0])
            .with_member(2, "Bob", vec![10.0, 10.0]);
        let svc = service(store, 5.0).await;

        let out = svc.check_in(&Embedding::new(vec![1.0, 1.0])).await.unwrap();
        let CheckinOutcome::CheckedIn { member, event, decision } = out else {
            panic!("expected check-in, got {out:?}");
        };
        assert_eq!(member.first_name, "Ann");
        assert_eq!(event.event_type, EventType::CheckIn);
        assert!((decision.distance - 2f32.sqrt()).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_scenario_no_match_writes_nothing() {
        let store = MemoryStore::default()
            .with_member(1, "Ann", vec![0.0, 0.0])
            .with_member(2, "Bob", vec![10.0, 10.0]);
        let svc = service(store, 1.0).await;

        let out = svc.check_in(&Embedding::new(vec![5.0, 5.0])).await.unwrap();
        assert!(matches!(out, CheckinOutcome::NotRecognized { .. }));
        assert!(svc.store().events().is_empty());
    }

    #[tokio::test]
    async fn test_repeat_scan_creates_one_event() {
        let svc = service(MemoryStore::default().with_member(1, "Ann", vec![0.0, 0.0]), 0.6).await;
        let probe = Embedding::new(vec![0.1, 0.0]);

        assert!(matches!(svc.check_in(&probe).await.unwrap(), CheckinOutcome::CheckedIn { .. }));
        assert!(matches!(
            svc.check_in(&probe).await.unwrap(),
            CheckinOutcome::AlreadyRecorded { .. }
        ));
        assert_eq!(svc.store().events().len(), 1);
    }

    #[tokio::test]
    async fn test_enroll_then_recognize_exact() {
        let store = MemoryStore::default()
            .with_member(1, "Ann", vec![])
            .with_member(2, "Bob", vec![5.0, 5.0]);
        let svc = service(store, 0.6).await;
        assert_eq!(svc.gallery().len(), 1);

        let e = Embedding::new(vec![0.6, 0.8]);
        let (member, report) = svc.enroll(MemberId(1), &e).await.unwrap();
        assert_eq!(member.first_name, "Ann");
        assert_eq!(report.members, 2);

        let d = svc.match_probe(&e).unwrap();
        assert!(d.matched);
        assert_eq!(d.member_id, Some(MemberId(1)));
        assert_eq!(d.distance, 0.0);
        assert_eq!(d.confidence, 1.0);
    }

    #[tokio::test]
    async fn test_reenroll_overwrites() {
        let svc = service(MemoryStore::default().with_member(1, "Ann", vec![0.0, 0.0]), 0.6).await;
        svc.enroll(MemberId(1), &Embedding::new(vec![9.0, 9.0])).await.unwrap();
        assert_eq!(svc.gallery().len(), 1);
        assert!(!svc.match_probe(&Embedding::new(vec![0.0, 0.0])).unwrap().matched);
    }

    #[tokio::test]
    async fn test_enroll_unknown_member() {
        let svc = service(MemoryStore::default(), 0.6).await;
        let err = svc.enroll(MemberId(7), &Embedding::new(vec![1.0, 0.0])).await.unwrap_err();
        assert!(matches!(err, CheckinError::StoreFailure(StoreError::MemberNotFound(MemberId(7)))));
    }

    #[tokio::test]
    async fn test_enroll_wrong_dimension() {
        let svc = service(MemoryStore::default().with_member(1, "Ann", vec![]), 0.6).await;
        let err = svc.enroll(MemberId(1), &Embedding::new(vec![1.0])).await.unwrap_err();
        assert!(matches!(err, CheckinError::EmbeddingFailure(_)));
        assert!(svc.gallery().is_empty());
    }
}
