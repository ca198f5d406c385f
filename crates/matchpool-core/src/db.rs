// SQLite persistence: the book event journal and settled-match records.

use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};

use crate::market::book::BookEvent;
use crate::market::state::MatchId;
use crate::settlement::Resolution;

/// SQLite-backed journal of admitted book events plus one immutable
/// settlement record per completed match.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) a SQLite database at `path` and ensure all tables
    /// exist. Pass `":memory:"` for an ephemeral in-memory database.
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database at {path}"))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;
             PRAGMA foreign_keys = ON;",
        )
        .context("failed to set database pragmas")?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS book_events (
                seq       INTEGER PRIMARY KEY AUTOINCREMENT,
                kind      TEXT NOT NULL,
                match_id  INTEGER,
                payload   TEXT NOT NULL,
                timestamp TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
            );

            CREATE TABLE IF NOT EXISTS settlements (
                match_id        INTEGER PRIMARY KEY,
                winning_outcome TEXT NOT NULL,
                total_pool      TEXT NOT NULL,
                house_revenue   TEXT NOT NULL,
                payload         TEXT NOT NULL,
                settled_at      TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
            );

            CREATE INDEX IF NOT EXISTS idx_book_events_match_id ON book_events(match_id);
            ",
        )
        .context("failed to create database schema")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("database mutex poisoned")
    }

    /// Append an admitted event to the journal. Returns its sequence number.
    pub fn append_event(&self, event: &BookEvent) -> Result<i64> {
        let conn = self.conn();
        let payload = serde_json::to_string(event).context("failed to serialize book event")?;
        conn.execute(
            "INSERT INTO book_events (kind, match_id, payload) VALUES (?1, ?2, ?3)",
            params![event.kind(), event.match_id(), payload],
        )
        .context("failed to append book event")?;
        Ok(conn.last_insert_rowid())
    }

    /// Load the whole journal in append order.
    pub fn load_events(&self) -> Result<Vec<BookEvent>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT seq, payload FROM book_events ORDER BY seq")
            .context("failed to prepare load_events query")?;

        let rows = stmt
            .query_map([], |row| {
                let seq: i64 = row.get(0)?;
                let payload: String = row.get(1)?;
                Ok((seq, payload))
            })
            .context("failed to query book events")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map book event rows")?;

        rows.into_iter()
            .map(|(seq, payload)| {
                serde_json::from_str(&payload)
                    .with_context(|| format!("failed to deserialize book event #{seq}"))
            })
            .collect()
    }

    pub fn event_count(&self) -> Result<usize> {
        let conn = self.conn();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM book_events", [], |row| row.get(0))
            .context("failed to count book events")?;
        Ok(count as usize)
    }

    /// Store the final settlement of a match. A match settles once; a second
    /// record for the same match is ignored.
    pub fn record_settlement(&self, resolution: &Resolution) -> Result<()> {
        let conn = self.conn();
        let payload =
            serde_json::to_string(resolution).context("failed to serialize settlement")?;
        conn.execute(
            "INSERT OR IGNORE INTO settlements
                (match_id, winning_outcome, total_pool, house_revenue, payload)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                resolution.match_id,
                resolution.winning_outcome.as_str(),
                resolution.settlement.total_pool.to_string(),
                resolution.house_revenue().to_string(),
                payload,
            ],
        )
        .context("failed to record settlement")?;
        Ok(())
    }

    pub fn load_settlement(&self, match_id: MatchId) -> Result<Option<Resolution>> {
        let conn = self.conn();
        let payload: Option<String> = conn
            .query_row(
                "SELECT payload FROM settlements WHERE match_id = ?1",
                params![match_id],
                |row| row.get(0),
            )
            .optional()
            .context("failed to query settlement")?;

        payload
            .map(|json| serde_json::from_str(&json).context("failed to deserialize settlement"))
            .transpose()
    }

    /// Delete all journaled events and settlements.
    pub fn clear(&self) -> Result<()> {
        let conn = self.conn();
        conn.execute_batch(
            "DELETE FROM book_events;
             DELETE FROM settlements;",
        )
        .context("failed to clear database")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::book::{Applied, Book, StakeLimits};
    use crate::market::outcome::{Outcome, Score};
    use crate::market::state::MatchStatus;
    use crate::settlement::PoolRules;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn test_db() -> Database {
        Database::open(":memory:").expect("in-memory database should open")
    }

    fn events() -> Vec<BookEvent> {
        let at = Utc.with_ymd_and_hms(2026, 5, 2, 15, 0, 0).unwrap();
        vec![
            BookEvent::UserRegistered {
                user_id: 1,
                username: "tigist".into(),
                opening_balance: dec!(200),
                is_admin: false,
                at,
            },
            BookEvent::MatchCreated {
                match_id: 1,
                home_team: "Hadiya Hossana".into(),
                away_team: "Arba Minch City".into(),
                stake_amount: dec!(12.50),
                rules: PoolRules::default(),
                status: MatchStatus::Template,
                kickoff: Some(at),
                template_id: None,
                created_by: None,
                at,
            },
            BookEvent::StatusChanged {
                match_id: 1,
                from: MatchStatus::Template,
                to: MatchStatus::Active,
                at,
            },
            BookEvent::BetPlaced {
                match_id: 1,
                bettor_id: 1,
                outcome: Outcome::Away,
                at,
            },
            BookEvent::ResultDeclared {
                match_id: 1,
                final_score: Score::new(0, 1),
                at,
            },
        ]
    }

    #[test]
    fn open_creates_tables() {
        let db = test_db();
        let conn = db.conn();
        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<_, _>>()
            .unwrap();
        assert!(tables.contains(&"book_events".to_string()));
        assert!(tables.contains(&"settlements".to_string()));
    }

    #[test]
    fn append_and_load_events_in_order() {
        let db = test_db();
        let events = events();
        let mut last_seq = 0;
        for event in &events {
            let seq = db.append_event(event).unwrap();
            assert!(seq > last_seq);
            last_seq = seq;
        }
        assert_eq!(db.event_count().unwrap(), events.len());
        assert_eq!(db.load_events().unwrap(), events);
    }

    #[test]
    fn load_events_empty() {
        let db = test_db();
        assert!(db.load_events().unwrap().is_empty());
        assert_eq!(db.event_count().unwrap(), 0);
    }

    #[test]
    fn decimal_amounts_survive_storage() {
        let db = test_db();
        let events = events();
        db.append_event(&events[1]).unwrap();
        match &db.load_events().unwrap()[0] {
            BookEvent::MatchCreated { stake_amount, .. } => {
                assert_eq!(*stake_amount, dec!(12.50))
            }
            other => panic!("expected MatchCreated, got {other:?}"),
        }
    }

    #[test]
    fn settlement_recorded_once() {
        let db = test_db();
        let mut book = Book::new(PoolRules::default(), StakeLimits::default());
        let mut resolution = None;
        for event in &events() {
            if let Applied::Settled(r) = book.apply(event).unwrap() {
                resolution = Some(r);
            }
        }
        let resolution = resolution.expect("result declared");

        db.record_settlement(&resolution).unwrap();
        let mut altered = resolution.clone();
        altered.winning_outcome = Outcome::Home;
        db.record_settlement(&altered).unwrap();

        let loaded = db.load_settlement(1).unwrap().unwrap();
        assert_eq!(loaded, resolution);
        assert!(db.load_settlement(2).unwrap().is_none());
    }

    #[test]
    fn clear_removes_everything() {
        let db = test_db();
        for event in &events() {
            db.append_event(event).unwrap();
        }
        db.clear().unwrap();
        assert_eq!(db.event_count().unwrap(), 0);
    }

    #[test]
    fn journal_persists_across_reopen() {
        let dir = std::env::temp_dir().join("matchpool_db_reopen");
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("journal.db");
        let path_str = path.to_str().unwrap();

        {
            let db = Database::open(path_str).unwrap();
            for event in &events() {
                db.append_event(event).unwrap();
            }
        }

        let db = Database::open(path_str).unwrap();
        assert_eq!(db.load_events().unwrap(), events());

        drop(db);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
