use crate::util::{decode_enum, decode_json, encode_enum, encode_json, from_rfc3339, to_rfc3339};
use pm_core::error::ProgressMarkError;
use pm_core::events::EventRepository;
use pm_events::types::EventRecord;
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, params, params_from_iter};
use ulid::Ulid;

pub struct EventRepo<'a> {
    pub conn: &'a Connection,
}

impl<'a> EventRepo<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl EventRepository for EventRepo<'_> {
    fn append(&self, mut event: EventRecord) -> Result<EventRecord, ProgressMarkError> {
        event.seq = next_seq(self.conn)?;
        event.id = format!("evt_{}", Ulid::new());
        self.conn
            .execute(
                "INSERT INTO events (id, seq, at, correlation_id, source, body_json) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    event.id,
                    event.seq,
                    to_rfc3339(&event.at),
                    event.correlation_id,
                    encode_enum(&event.source).map_err(ProgressMarkError::internal)?,
                    encode_json(&event.body).map_err(ProgressMarkError::internal)?,
                ],
            )
            .map_err(ProgressMarkError::internal)?;
        Ok(event)
    }

    fn list(
        &self,
        after: Option<i64>,
        limit: Option<u32>,
    ) -> Result<Vec<EventRecord>, ProgressMarkError> {
        let mut sql = "SELECT id, seq, at, correlation_id, source, body_json FROM events".to_string();
        let mut values = Vec::new();
        if let Some(after) = after {
            values.push(SqlValue::Integer(after));
            sql.push_str(&format!(" WHERE seq > ?{}", values.len()));
        }
        sql.push_str(" ORDER BY seq ASC");
        if let Some(limit) = limit {
            values.push(SqlValue::Integer(i64::from(limit)));
            sql.push_str(&format!(" LIMIT ?{}", values.len()));
        }

        let mut stmt = self.conn.prepare(&sql).map_err(ProgressMarkError::internal)?;
        let mut rows = stmt
            .query(params_from_iter(values))
            .map_err(ProgressMarkError::internal)?;
        let mut events = Vec::new();
        while let Some(row) = rows.next().map_err(ProgressMarkError::internal)? {
            events.push(map_event_row(row)?);
        }
        Ok(events)
    }
}

fn map_event_row(row: &rusqlite::Row<'_>) -> Result<EventRecord, ProgressMarkError> {
    let at: String = row.get(2).map_err(ProgressMarkError::internal)?;
    let source: String = row.get(4).map_err(ProgressMarkError::internal)?;
    let body_json: String = row.get(5).map_err(ProgressMarkError::internal)?;

    Ok(EventRecord {
        id: row.get(0).map_err(ProgressMarkError::internal)?,
        seq: row.get(1).map_err(ProgressMarkError::internal)?,
        at: from_rfc3339(&at).map_err(ProgressMarkError::internal)?,
        correlation_id: row.get(3).map_err(ProgressMarkError::internal)?,
        source: decode_enum(&source).map_err(ProgressMarkError::internal)?,
        body: decode_json(&body_json).map_err(ProgressMarkError::internal)?,
    })
}

fn next_seq(conn: &Connection) -> Result<i64, ProgressMarkError> {
    let seq: i64 = conn
        .query_row("SELECT COALESCE(MAX(seq), 0) FROM events", [], |row| {
            row.get(0)
        })
        .map_err(ProgressMarkError::internal)?;
    Ok(seq + 1)
}
