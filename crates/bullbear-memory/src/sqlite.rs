use std::str::FromStr;

use bullbear_models::{DecisionSummary, MemoryRecord, Outcome, RecordId};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::MemoryError;

/// On-disk layout of memory records.
///
/// The outcome columns (`realized_return`, `lessons_json`, `labeled_at`) are
/// NULL until reflection labels the row, and are written exactly once.
pub const MEMORY_TABLE_DDL: &str = "\
CREATE TABLE IF NOT EXISTS memory_records (
    id              INTEGER PRIMARY KEY,
    run_id          TEXT NOT NULL,
    symbol          TEXT NOT NULL,
    as_of_date      TEXT NOT NULL,
    situation       TEXT NOT NULL,
    embedding_json  TEXT NOT NULL,
    decision_json   TEXT NOT NULL,
    created_at      TEXT NOT NULL,
    realized_return TEXT,
    lessons_json    TEXT,
    labeled_at      TEXT
);
CREATE INDEX IF NOT EXISTS idx_memory_symbol ON memory_records(symbol);
";

const SELECT_COLUMNS: &str = "id, run_id, symbol, as_of_date, situation, embedding_json, \
     decision_json, created_at, realized_return, lessons_json, labeled_at";

/// SQLite persistence for memory records.
pub struct SqliteMemory {
    conn: Connection,
}

impl SqliteMemory {
    /// Open (or create) a memory database file. Enables WAL so a reader
    /// process can list records while another labels them.
    pub fn open(path: &str) -> Result<Self, MemoryError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(MEMORY_TABLE_DDL)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self, MemoryError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(MEMORY_TABLE_DDL)?;
        Ok(Self { conn })
    }

    pub fn insert(&self, record: &MemoryRecord) -> Result<(), MemoryError> {
        let (realized_return, lessons_json, labeled_at) = match record.realized_outcome() {
            Some(outcome) => (
                Some(outcome.realized_return.to_string()),
                Some(serde_json::to_string(&outcome.lessons)?),
                Some(outcome.labeled_at),
            ),
            None => (None, None, None),
        };

        self.conn.execute(
            "INSERT INTO memory_records \
             (id, run_id, symbol, as_of_date, situation, embedding_json, decision_json, \
              created_at, realized_return, lessons_json, labeled_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            rusqlite::params![
                record.id as i64,
                record.run_id.to_string(),
                record.symbol,
                record.as_of_date,
                record.situation,
                serde_json::to_string(&record.situation_embedding)?,
                serde_json::to_string(&record.decision_summary)?,
                record.created_at,
                realized_return,
                lessons_json,
                labeled_at,
            ],
        )?;
        Ok(())
    }

    /// Write the outcome of an unlabeled row. Fails if the row is unknown or
    /// already labeled; the `IS NULL` guard makes the transition one-way even
    /// across processes.
    pub fn label(&self, id: RecordId, outcome: &Outcome) -> Result<(), MemoryError> {
        let updated = self.conn.execute(
            "UPDATE memory_records \
             SET realized_return = ?1, lessons_json = ?2, labeled_at = ?3 \
             WHERE id = ?4 AND realized_return IS NULL",
            rusqlite::params![
                outcome.realized_return.to_string(),
                serde_json::to_string(&outcome.lessons)?,
                outcome.labeled_at,
                id as i64,
            ],
        )?;

        if updated == 1 {
            return Ok(());
        }

        let exists: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM memory_records WHERE id = ?1",
                rusqlite::params![id as i64],
                |row| row.get(0),
            )
            .optional()?;
        match exists {
            Some(_) => Err(MemoryError::AlreadyLabeled(id)),
            None => Err(MemoryError::UnknownRecord(id)),
        }
    }

    pub fn get(&self, id: RecordId) -> Result<Option<MemoryRecord>, MemoryError> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM memory_records WHERE id = ?1");
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let raw = stmt
            .query_row(rusqlite::params![id as i64], RawRow::from_row)
            .optional()?;
        raw.map(RawRow::into_record).transpose()
    }

    /// All records in id order.
    pub fn load_all(&self) -> Result<Vec<MemoryRecord>, MemoryError> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM memory_records ORDER BY id");
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let rows = stmt
            .query_map([], RawRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(RawRow::into_record).collect()
    }

    pub fn max_id(&self) -> Result<Option<RecordId>, MemoryError> {
        let max: Option<i64> =
            self.conn
                .query_row("SELECT MAX(id) FROM memory_records", [], |row| row.get(0))?;
        Ok(max.map(|id| id as RecordId))
    }
}

/// Column values as stored, before JSON and decimal decoding.
struct RawRow {
    id: i64,
    run_id: String,
    symbol: String,
    as_of_date: NaiveDate,
    situation: String,
    embedding_json: String,
    decision_json: String,
    created_at: DateTime<Utc>,
    realized_return: Option<String>,
    lessons_json: Option<String>,
    labeled_at: Option<DateTime<Utc>>,
}

impl RawRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            run_id: row.get(1)?,
            symbol: row.get(2)?,
            as_of_date: row.get(3)?,
            situation: row.get(4)?,
            embedding_json: row.get(5)?,
            decision_json: row.get(6)?,
            created_at: row.get(7)?,
            realized_return: row.get(8)?,
            lessons_json: row.get(9)?,
            labeled_at: row.get(10)?,
        })
    }

    fn into_record(self) -> Result<MemoryRecord, MemoryError> {
        let run_id = Uuid::parse_str(&self.run_id)
            .map_err(|e| MemoryError::Corrupt(format!("record {}: run_id: {e}", self.id)))?;
        let embedding: Vec<f32> = serde_json::from_str(&self.embedding_json)?;
        let decision: DecisionSummary = serde_json::from_str(&self.decision_json)?;

        let outcome = match (self.realized_return, self.labeled_at) {
            (Some(ret), Some(labeled_at)) => {
                let realized_return = Decimal::from_str(&ret).map_err(|e| {
                    MemoryError::Corrupt(format!("record {}: realized_return: {e}", self.id))
                })?;
                let lessons = match self.lessons_json {
                    Some(json) => serde_json::from_str(&json)?,
                    None => Default::default(),
                };
                Some(Outcome {
                    realized_return,
                    lessons,
                    labeled_at,
                })
            }
            (None, None) => None,
            _ => {
                return Err(MemoryError::Corrupt(format!(
                    "record {}: partially written outcome",
                    self.id
                )))
            }
        };

        Ok(MemoryRecord::restore(
            self.id as RecordId,
            run_id,
            self.symbol,
            self.as_of_date,
            self.situation,
            embedding,
            decision,
            self.created_at,
            outcome,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bullbear_models::{NewMemoryRecord, TradeAction};
    use rust_decimal_macros::dec;
    use std::collections::BTreeMap;

    fn make_record(id: RecordId) -> MemoryRecord {
        MemoryRecord::new(
            id,
            NewMemoryRecord {
                run_id: Uuid::new_v4(),
                symbol: "AAPL".to_string(),
                as_of_date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
                situation: "Services revenue at record high".to_string(),
                decision_summary: DecisionSummary {
                    action: TradeAction::Hold,
                    rationale: "Valuation stretched".to_string(),
                    positions: BTreeMap::new(),
                },
            },
            vec![0.1, 0.2, 0.3],
        )
    }

    fn outcome() -> Outcome {
        Outcome {
            realized_return: dec!(-0.0125),
            lessons: BTreeMap::new(),
            labeled_at: Utc::now(),
        }
    }

    #[test]
    fn insert_and_get() {
        let db = SqliteMemory::open_in_memory().unwrap();
        let record = make_record(1);
        db.insert(&record).unwrap();

        let loaded = db.get(1).unwrap().unwrap();
        assert_eq!(loaded.symbol, "AAPL");
        assert_eq!(loaded.situation_embedding, vec![0.1, 0.2, 0.3]);
        assert!(!loaded.is_labeled());
        assert!(db.get(2).unwrap().is_none());
    }

    #[test]
    fn label_once() {
        let db = SqliteMemory::open_in_memory().unwrap();
        db.insert(&make_record(1)).unwrap();

        db.label(1, &outcome()).unwrap();
        assert!(matches!(
            db.label(1, &outcome()),
            Err(MemoryError::AlreadyLabeled(1))
        ));
        assert!(matches!(
            db.label(99, &outcome()),
            Err(MemoryError::UnknownRecord(99))
        ));

        let loaded = db.get(1).unwrap().unwrap();
        assert_eq!(
            loaded.realized_outcome().unwrap().realized_return,
            dec!(-0.0125)
        );
    }

    #[test]
    fn load_all_in_id_order() {
        let db = SqliteMemory::open_in_memory().unwrap();
        for id in [3, 1, 2] {
            db.insert(&make_record(id)).unwrap();
        }

        let ids: Vec<RecordId> = db.load_all().unwrap().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(db.max_id().unwrap(), Some(3));
    }

    #[test]
    fn max_id_of_empty_table() {
        let db = SqliteMemory::open_in_memory().unwrap();
        assert_eq!(db.max_id().unwrap(), None);
    }
}
