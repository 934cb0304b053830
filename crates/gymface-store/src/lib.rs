//! gymface-store — SQLite-backed member and attendance-event stores.
//!
//! One [`SqliteStore`] implements both [`MemberStore`] and [`AttendanceStore`].
//! All queries run on the `tokio-rusqlite` background thread, so callers never
//! block the async runtime. Check-ins are written in a single transaction.

mod schema;

use chrono::{DateTime, NaiveDate, Utc};
use gymface_core::store::{AttendanceStore, MemberStore, StoreError};
use gymface_core::types::{
    AttendanceEvent, EnrolledEmbedding, EventType, Member, MemberId, NewAttendanceEvent,
};
use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension, Row};
use std::path::Path;
use tokio_rusqlite::Connection;

/// Fields supplied when registering a member.
#[derive(Debug, Clone, Default)]
pub struct NewMember {
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
}

/// A member row with enrollment state, for listings.
#[derive(Debug, Clone, PartialEq)]
pub struct MemberListing {
    pub member: Member,
    /// Length of the stored embedding; 0 when not enrolled or unreadable.
    pub embedding_dimension: usize,
}

#[derive(Clone)]
pub struct SqliteStore {
    conn: Connection,
}

fn backend(err: impl std::fmt::Display) -> StoreError {
    StoreError::Backend(err.to_string())
}

impl SqliteStore {
    /// Open (or create) the database at `path` and initialise the schema.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                backend(format!("creating {}: {e}", parent.display()))
            })?;
        }

        let conn = Connection::open(path).await.map_err(backend)?;
        conn.call(|conn| {
            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn.pragma_update(None, "foreign_keys", "ON")?;
            schema::init_schema(conn)?;
            Ok(())
        })
        .await
        .map_err(backend)?;

        tracing::info!(path = %path.display(), "database initialized");
        Ok(Self { conn })
    }

    /// A private in-memory database, for tests and dry runs.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().await.map_err(backend)?;
        conn.call(|conn| {
            conn.pragma_update(None, "foreign_keys", "ON")?;
            schema::init_schema(conn)?;
            Ok(())
        })
        .await
        .map_err(backend)?;
        Ok(Self { conn })
    }

    pub async fn add_member(&self, new: NewMember) -> Result<Member, StoreError> {
        let today = Utc::now().date_naive();
        let member = self
            .conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO members (first_name, last_name, email, join_date) VALUES (?1, ?2, ?3, ?4)",
                    params![new.first_name, new.last_name, new.email, today],
                )?;
                Ok(Member {
                    id: MemberId(conn.last_insert_rowid()),
                    first_name: new.first_name,
                    last_name: new.last_name,
                    last_visit: None,
                })
            })
            .await
            .map_err(backend)?;

        tracing::info!(member = %member.id, name = %member.display_name(), "member added");
        Ok(member)
    }

    /// Every member ordered by id, with enrollment state.
    pub async fn list_members(&self) -> Result<Vec<MemberListing>, StoreError> {
        self.conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, first_name, last_name, last_visit, face_embedding FROM members ORDER BY id",
                )?;
                let rows = stmt.query_map([], |row| {
                    let raw: String = row.get(4)?;
                    Ok(MemberListing {
                        member: member_from_row(row)?,
                        embedding_dimension: parse_embedding(&raw).map_or(0, |v| v.len()),
                    })
                })?;
                Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
            })
            .await
            .map_err(backend)
    }

    /// A member's events, newest first.
    pub async fn events_for(
        &self,
        member: MemberId,
        limit: usize,
    ) -> Result<Vec<AttendanceEvent>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "{EVENT_SELECT} WHERE a.member_id = ?1 ORDER BY a.timestamp DESC, a.id DESC LIMIT ?2"
                ))?;
                let rows = stmt.query_map(params![member.0, limit], event_from_row)?;
                Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
            })
            .await
            .map_err(backend)
    }
}

const EVENT_SELECT: &str = "SELECT a.id, a.member_id, m.first_name, m.last_name, a.type, a.title, \
     a.timestamp, a.location, a.duration, a.confidence \
     FROM activities a JOIN members m ON m.id = a.member_id";

/// Columns: id, first_name, last_name, last_visit.
fn member_from_row(row: &Row<'_>) -> rusqlite::Result<Member> {
    Ok(Member {
        id: MemberId(row.get(0)?),
        first_name: row.get(1)?,
        last_name: row.get(2)?,
        last_visit: row.get::<_, Option<NaiveDate>>(3)?,
    })
}

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<AttendanceEvent> {
    let first: String = row.get(2)?;
    let last: String = row.get(3)?;
    let kind: String = row.get(4)?;
    let event_type = EventType::parse(&kind).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            4,
            Type::Text,
            format!("unknown activity type {kind:?}").into(),
        )
    })?;
    let member = Member {
        id: MemberId(row.get(1)?),
        first_name: first,
        last_name: last,
        last_visit: None,
    };

    Ok(AttendanceEvent {
        id: row.get(0)?,
        member: member.id,
        member_name: member.display_name(),
        event_type,
        title: row.get(5)?,
        timestamp: row.get::<_, DateTime<Utc>>(6)?,
        location: row.get(7)?,
        duration: row.get(8)?,
        confidence: row.get::<_, Option<f64>>(9)?.unwrap_or(0.0) as f32,
    })
}

/// `None` for text that is not a JSON array of numbers.
fn parse_embedding(raw: &str) -> Option<Vec<f32>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Some(Vec::new());
    }
    serde_json::from_str(raw).ok()
}

impl MemberStore for SqliteStore {
    async fn enrolled_embeddings(&self) -> Result<Vec<EnrolledEmbedding>, StoreError> {
        let rows = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, face_embedding FROM members \
                     WHERE face_embedding IS NOT NULL AND TRIM(face_embedding) NOT IN ('', '[]') \
                     ORDER BY id",
                )?;
                let rows = stmt.query_map([], |row| Ok((MemberId(row.get(0)?), row.get::<_, String>(1)?)))?;
                Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
            })
            .await
            .map_err(backend)?;

        let mut enrolled = Vec::with_capacity(rows.len());
        for (member_id, raw) in rows {
            match parse_embedding(&raw) {
                Some(values) if !values.is_empty() => {
                    enrolled.push(EnrolledEmbedding { member_id, values })
                }
                Some(_) => {}
                None => tracing::warn!(member = %member_id, "skipping unparsable stored embedding"),
            }
        }
        Ok(enrolled)
    }

    async fn member(&self, id: MemberId) -> Result<Option<Member>, StoreError> {
        self.conn
            .call(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT id, first_name, last_name, last_visit FROM members WHERE id = ?1",
                        [id.0],
                        member_from_row,
                    )
                    .optional()?)
            })
            .await
            .map_err(backend)
    }

    async fn set_embedding(&self, id: MemberId, values: Vec<f32>) -> Result<(), StoreError> {
        let json = serde_json::to_string(&values).map_err(backend)?;
        let updated = self
            .conn
            .call(move |conn| {
                Ok(conn.execute(
                    "UPDATE members SET face_embedding = ?1 WHERE id = ?2",
                    params![json, id.0],
                )?)
            })
            .await
            .map_err(backend)?;

        if updated == 0 {
            return Err(StoreError::MemberNotFound(id));
        }
        tracing::debug!(member = %id, dimension = values.len(), "embedding stored");
        Ok(())
    }
}

impl AttendanceStore for SqliteStore {
    async fn latest_event(&self, member: MemberId) -> Result<Option<AttendanceEvent>, StoreError> {
        self.conn
            .call(move |conn| {
                Ok(conn
                    .query_row(
                        &format!(
                            "{EVENT_SELECT} WHERE a.member_id = ?1 ORDER BY a.timestamp DESC, a.id DESC LIMIT 1"
                        ),
                        [member.0],
                        event_from_row,
                    )
                    .optional()?)
            })
            .await
            .map_err(backend)
    }

    async fn record_checkin(
        &self,
        event: NewAttendanceEvent,
        visit_date: NaiveDate,
    ) -> Result<AttendanceEvent, StoreError> {
        let member = event.member;
        let stored = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let updated = tx.execute(
                    "UPDATE members SET last_visit = ?1 WHERE id = ?2",
                    params![visit_date, event.member.0],
                )?;
                if updated == 0 {
                    return Ok(None);
                }
                tx.execute(
                    "INSERT INTO activities (member_id, type, title, timestamp, location, confidence, duration) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        event.member.0,
                        event.event_type.as_str(),
                        event.title,
                        event.timestamp,
                        event.location,
                        f64::from(event.confidence),
                        event.duration,
                    ],
                )?;
                let id = tx.last_insert_rowid();
                let stored = tx.query_row(
                    &format!("{EVENT_SELECT} WHERE a.id = ?1"),
                    [id],
                    event_from_row,
                )?;
                tx.commit()?;
                Ok(Some(stored))
            })
            .await
            .map_err(backend)?;

        stored.ok_or(StoreError::MemberNotFound(member))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use gymface_core::matcher::DistanceMetric;
    use gymface_core::recorder::RecorderConfig;
    use gymface_core::{CheckinOutcome, CheckinService, Embedding};
    use std::sync::Arc;

    async fn store_with(names: &[&str]) -> (SqliteStore, Vec<Member>) {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let mut members = Vec::new();
        for name in names {
            members.push(
                store
                    .add_member(NewMember {
                        first_name: name.to_string(),
                        last_name: "Tester".to_string(),
                        email: None,
                    })
                    .await
                    .unwrap(),
            );
        }
        (store, members)
    }

    fn checkin(member: MemberId, at: DateTime<Utc>) -> NewAttendanceEvent {
        NewAttendanceEvent {
            member,
            event_type: EventType::CheckIn,
            title: "Face Check-in".to_string(),
            timestamp: at,
            location: "Main Entrance".to_string(),
            confidence: 0.8,
            duration: "0m".to_string(),
        }
    }

    #[tokio::test]
    async fn test_add_and_fetch_member() {
        let (store, members) = store_with(&["Ann", "Bob"]).await;
        assert_eq!(members[0].id, MemberId(1));
        assert_eq!(members[1].id, MemberId(2));

        let bob = store.member(MemberId(2)).await.unwrap().unwrap();
        assert_eq!(bob.display_name(), "Bob Tester");
        assert_eq!(bob.last_visit, None);
        assert!(store.member(MemberId(99)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_enrolled_embeddings_skip_unenrolled_and_unparsable() {
        let (store, _) = store_with(&["Ann", "Bob", "Cat"]).await;
        store.set_embedding(MemberId(1), vec![0.25, -1.5]).await.unwrap();
        store
            .conn
            .call(|conn| {
                conn.execute("UPDATE members SET face_embedding = 'not json' WHERE id = 3", [])?;
                Ok(())
            })
            .await
            .unwrap();

        let enrolled = store.enrolled_embeddings().await.unwrap();
        assert_eq!(
            enrolled,
            vec![EnrolledEmbedding { member_id: MemberId(1), values: vec![0.25, -1.5] }]
        );
    }

    #[tokio::test]
    async fn test_set_embedding_overwrites_and_rejects_unknown() {
        let (store, _) = store_with(&["Ann"]).await;
        store.set_embedding(MemberId(1), vec![1.0, 2.0]).await.unwrap();
        store.set_embedding(MemberId(1), vec![3.0, 4.0, 5.0]).await.unwrap();

        let enrolled = store.enrolled_embeddings().await.unwrap();
        assert_eq!(enrolled.len(), 1);
        assert_eq!(enrolled[0].values, vec![3.0, 4.0, 5.0]);

        let listing = store.list_members().await.unwrap();
        assert_eq!(listing[0].embedding_dimension, 3);

        assert!(matches!(
            store.set_embedding(MemberId(5), vec![1.0]).await,
            Err(StoreError::MemberNotFound(MemberId(5)))
        ));
    }

    #[tokio::test]
    async fn test_record_checkin_writes_event_and_last_visit() {
        let (store, _) = store_with(&["Ann"]).await;
        let now = Utc::now();
        let event = store
            .record_checkin(checkin(MemberId(1), now), now.date_naive())
            .await
            .unwrap();

        assert_eq!(event.member, MemberId(1));
        assert_eq!(event.member_name, "Ann Tester");
        assert_eq!(event.event_type, EventType::CheckIn);
        assert_eq!(event.timestamp, now);
        assert!((event.confidence - 0.8).abs() < 1e-6);

        let member = store.member(MemberId(1)).await.unwrap().unwrap();
        assert_eq!(member.last_visit, Some(now.date_naive()));
    }

    #[tokio::test]
    async fn test_record_checkin_unknown_member_writes_nothing() {
        let (store, _) = store_with(&["Ann"]).await;
        let now = Utc::now();
        let err = store
            .record_checkin(checkin(MemberId(9), now), now.date_naive())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::MemberNotFound(MemberId(9))));
        assert!(store.latest_event(MemberId(9)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_latest_event_is_newest_of_any_type() {
        let (store, _) = store_with(&["Ann"]).await;
        let t0 = Utc::now();
        store.record_checkin(checkin(MemberId(1), t0), t0.date_naive()).await.unwrap();

        let mut class = checkin(MemberId(1), t0 + TimeDelta::seconds(30));
        class.event_type = EventType::Class;
        class.title = "Spin".to_string();
        store.record_checkin(class, t0.date_naive()).await.unwrap();

        let latest = store.latest_event(MemberId(1)).await.unwrap().unwrap();
        assert_eq!(latest.event_type, EventType::Class);
        assert_eq!(latest.timestamp, t0 + TimeDelta::seconds(30));
        assert_eq!(store.events_for(MemberId(1), 10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_event_serializes_like_activity_api() {
        let (store, _) = store_with(&["Ann"]).await;
        let now = Utc::now();
        let event = store.record_checkin(checkin(MemberId(1), now), now.date_naive()).await.unwrap();

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "check-in");
        assert_eq!(json["member"], 1);
        assert_eq!(json["member_name"], "Ann Tester");
        assert_eq!(json["title"], "Face Check-in");
        assert_eq!(json["duration"], "0m");
    }

    #[tokio::test]
    async fn test_file_database_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("gymface.db");
        {
            let store = SqliteStore::open(&path).await.unwrap();
            store
                .add_member(NewMember { first_name: "Ann".into(), ..Default::default() })
                .await
                .unwrap();
            store.set_embedding(MemberId(1), vec![0.5, 0.5]).await.unwrap();
        }

        let store = SqliteStore::open(&path).await.unwrap();
        let member = store.member(MemberId(1)).await.unwrap().unwrap();
        assert_eq!(member.display_name(), "Ann");
        assert_eq!(store.enrolled_embeddings().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_service_over_sqlite_debounces() {
        let (store, _) = store_with(&["Ann", "Bob"]).await;
        store.set_embedding(MemberId(1), vec![0.0, 0.0]).await.unwrap();
        store.set_embedding(MemberId(2), vec![10.0, 10.0]).await.unwrap();

        let store = Arc::new(store);
        let svc = CheckinService::new(
            store.clone(),
            2,
            DistanceMetric::Euclidean,
            5.0,
            RecorderConfig::default(),
        )
        .await
        .unwrap();

        let probe = Embedding::new(vec![1.0, 1.0]);
        let first = svc.check_in(&probe).await.unwrap();
        assert!(matches!(&first, CheckinOutcome::CheckedIn { member, .. } if member.id == MemberId(1)));
        let second = svc.check_in(&probe).await.unwrap();
        assert!(matches!(second, CheckinOutcome::AlreadyRecorded { .. }));

        assert_eq!(store.events_for(MemberId(1), 10).await.unwrap().len(), 1);
        assert!(store.events_for(MemberId(2), 10).await.unwrap().is_empty());
    }
}
