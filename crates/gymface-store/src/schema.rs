//! SQL DDL for the member and activity tables.
//!
//! All statements use `IF NOT EXISTS` so opening an existing database is a no-op.

use rusqlite::Connection;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS members (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    first_name TEXT NOT NULL,
    last_name TEXT NOT NULL DEFAULT '',
    email TEXT UNIQUE,
    join_date TEXT NOT NULL,
    last_visit TEXT,
    status TEXT NOT NULL DEFAULT 'active' CHECK(status IN ('active','inactive')),
    -- JSON array of floats; '[]' means not enrolled
    face_embedding TEXT NOT NULL DEFAULT '[]'
);

CREATE TABLE IF NOT EXISTS activities (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    member_id INTEGER NOT NULL REFERENCES members(id) ON DELETE CASCADE,
    type TEXT NOT NULL CHECK(type IN ('check-in','class','personal-training')),
    title TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    location TEXT NOT NULL DEFAULT '',
    confidence REAL,
    duration TEXT NOT NULL DEFAULT ''
);

CREATE INDEX IF NOT EXISTS idx_activities_member_time ON activities(member_id, timestamp);
"#;

pub(crate) fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)
}
