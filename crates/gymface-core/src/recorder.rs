//! Check-in recording with per-member debounce.
//!
//! The debounce check and the event write for one member run under that
//! member's lock, so two concurrent scans of the same face cannot both pass
//! the check. Scans of different members never wait on each other.

use crate::store::{AttendanceStore, MemberStore, StoreError};
use crate::types::{AttendanceEvent, EventType, MatchDecision, Member, MemberId, NewAttendanceEvent};
use chrono::{DateTime, TimeDelta, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

pub const CHECKIN_TITLE: &str = "Face Check-in";
pub const CHECKIN_DURATION: &str = "0m";

#[derive(Debug, Clone)]
pub struct RecorderConfig {
    /// Minimum time between two accepted events for one member.
    pub debounce: TimeDelta,
    /// Location written on every check-in event.
    pub location: String,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            debounce: TimeDelta::seconds(60),
            location: "Main Entrance".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CheckinOutcome {
    NotRecognized {
        decision: MatchDecision,
    },
    /// Matched, but the member already has an event inside the debounce window.
    AlreadyRecorded {
        member: Member,
        last_event_at: DateTime<Utc>,
        decision: MatchDecision,
    },
    CheckedIn {
        member: Member,
        event: AttendanceEvent,
        decision: MatchDecision,
    },
}

/// Keyed async locks, one per member id, dropped when no longer contended.
#[derive(Default)]
struct MemberLocks {
    locks: Mutex<HashMap<MemberId, Arc<AsyncMutex<()>>>>,
}

struct MemberGuard<'a> {
    owner: &'a MemberLocks,
    member: MemberId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl MemberLocks {
    async fn lock(&self, member: MemberId) -> MemberGuard<'_> {
        let lock = self
            .locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(member)
            .or_default()
            .clone();
        let guard = lock.lock_owned().await;
        MemberGuard {
            owner: self,
            member,
            guard: Some(guard),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl Drop for MemberGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = self.owner.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // Only the map holds it: nobody is waiting, so forget the entry.
        if locks
            .get(&self.member)
            .is_some_and(|l| Arc::strong_count(l) == 1)
        {
            locks.remove(&self.member);
        }
    }
}

pub struct CheckinRecorder<S> {
    store: Arc<S>,
    config: RecorderConfig,
    locks: MemberLocks,
}

impl<S: MemberStore + AttendanceStore> CheckinRecorder<S> {
    pub fn new(store: Arc<S>, config: RecorderConfig) -> Self {
        Self {
            store,
            config,
            locks: MemberLocks::default(),
        }
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    pub async fn record(&self, decision: MatchDecision) -> Result<CheckinOutcome, StoreError> {
        self.record_at(decision, Utc::now()).await
    }

    /// Record `decision` as if it were evaluated at `now`.
    pub async fn record_at(
        &self,
        decision: MatchDecision,
        now: DateTime<Utc>,
    ) -> Result<CheckinOutcome, StoreError> {
        let member_id = match decision.member_id {
            Some(id) if decision.matched => id,
            _ => return Ok(CheckinOutcome::NotRecognized { decision }),
        };

        let _guard = self.locks.lock(member_id).await;

        let Some(member) = self.store.member(member_id).await? else {
            // Deleted since the gallery snapshot was taken.
            tracing::warn!(member = %member_id, "matched member no longer exists; gallery is stale");
            return Ok(CheckinOutcome::NotRecognized {
                decision: MatchDecision::no_match(decision.distance),
            });
        };

        if let Some(last) = self.store.latest_event(member_id).await? {
            // A timestamp in the future (clock skew) counts as inside the window.
            if now - last.timestamp < self.config.debounce {
                tracing::info!(
                    member = %member_id,
                    last_event = %last.timestamp,
                    "check-in suppressed by debounce window"
                );
                return Ok(CheckinOutcome::AlreadyRecorded {
                    member,
                    last_event_at: last.timestamp,
                    decision,
                });
            }
        }

        let event = self
            .store
            .record_checkin(
                NewAttendanceEvent {
                    member: member_id,
                    event_type: EventType::CheckIn,
                    title: CHECKIN_TITLE.to_string(),
                    timestamp: now,
                    location: self.config.location.clone(),
                    confidence: decision.confidence,
                    duration: CHECKIN_DURATION.to_string(),
                },
                now.date_naive(),
            )
            .await?;

        tracing::info!(
            member = %member_id,
            event = event.id,
            distance = decision.distance,
            confidence = decision.confidence,
            "check-in recorded"
        );

        Ok(CheckinOutcome::CheckedIn {
            member,
            event,
            decision,
        })
    }
}
