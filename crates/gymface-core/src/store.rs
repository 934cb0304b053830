//! Persistence contracts the check-in core reads from and writes to.
//!
//! The membership subsystem owns members; the attendance subsystem owns events.
//! Implementations must apply [`AttendanceStore::record_checkin`] atomically.

use crate::types::{AttendanceEvent, EnrolledEmbedding, Member, MemberId, NewAttendanceEvent};
use chrono::NaiveDate;
use std::future::Future;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("member {0} not found")]
    MemberNotFound(MemberId),
    #[error("storage backend: {0}")]
    Backend(String),
}

pub trait MemberStore: Send + Sync {
    /// Every member with a non-empty stored embedding.
    fn enrolled_embeddings(
        &self,
    ) -> impl Future<Output = Result<Vec<EnrolledEmbedding>, StoreError>> + Send;

    fn member(&self, id: MemberId) -> impl Future<Output = Result<Option<Member>, StoreError>> + Send;

    /// Overwrite the member's embedding. Fails with `MemberNotFound` for unknown ids.
    fn set_embedding(
        &self,
        id: MemberId,
        values: Vec<f32>,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}

pub trait AttendanceStore: Send + Sync {
    /// The member's most recent event of any type.
    fn latest_event(
        &self,
        member: MemberId,
    ) -> impl Future<Output = Result<Option<AttendanceEvent>, StoreError>> + Send;

    /// Insert the event and set the member's last visit, both or neither.
    fn record_checkin(
        &self,
        event: NewAttendanceEvent,
        visit_date: NaiveDate,
    ) -> impl Future<Output = Result<AttendanceEvent, StoreError>> + Send;
}
