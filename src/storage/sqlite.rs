//! SQLite storage implementation.
//!
//! This module provides a SQLite-based implementation of the `PaperStorage` trait.
//! It uses rusqlite for database access and stores embeddings as little-endian
//! `f32` BLOBs.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{PaperStorage, StorageError, StorageResult, YearRange};
use crate::models::{EmbeddingConfig, PaperRecord};

const EMBEDDING_CONFIG_KEY: &str = "embedding_config";

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS config (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS papers (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    authors TEXT NOT NULL,
    published_date TEXT NOT NULL,
    url TEXT NOT NULL,
    abstract TEXT NOT NULL,
    publish_year INTEGER,
    embedding BLOB NOT NULL,
    embedding_dim INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_papers_publish_year ON papers(publish_year);
"#;

const SELECT_COLUMNS: &str =
    "SELECT id, title, authors, published_date, url, abstract, embedding, embedding_dim FROM papers";

/// SQLite-based paper storage.
///
/// # Schema
/// - `config`: key/value pairs; holds the embedding configuration as JSON
/// - `papers`: one row per record, keyed by the external id. Rows are read
///   back in rowid order, which is insertion order.
#[derive(Debug, Clone)]
pub struct SqliteStorage {
    conn: Arc<Mutex<Connection>>,
    db_path: Option<PathBuf>,
}

impl SqliteStorage {
    /// Open (or create) a database file, creating missing parent directories.
    ///
    /// # Errors
    /// Returns `StorageError::ConnectionError` if the file cannot be opened
    pub fn open(db_path: impl AsRef<Path>) -> StorageResult<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                StorageError::ConnectionError(format!("{}: {}", parent.display(), e))
            })?;
        }

        let conn = Connection::open(db_path)
            .map_err(|e| StorageError::ConnectionError(format!("{}: {}", db_path.display(), e)))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: Some(db_path.to_path_buf()),
        })
    }

    /// Open a private in-memory database.
    pub fn in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| StorageError::ConnectionError(e.to_string()))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: None,
        })
    }

    /// Database file path, `None` for in-memory stores.
    pub fn path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }
}

/// Serialize an embedding vector to little-endian bytes.
fn serialize_embedding(embedding: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(embedding.len() * 4);
    for value in embedding {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Deserialize an embedding vector, checking it against the stored dimension.
fn deserialize_embedding(bytes: &[u8], dimension: usize) -> StorageResult<Vec<f32>> {
    if bytes.len() % 4 != 0 || bytes.len() / 4 != dimension {
        return Err(StorageError::SerializationError(format!(
            "embedding blob of {} bytes does not hold {} f32 values",
            bytes.len(),
            dimension
        )));
    }

    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

struct RawRow {
    record: PaperRecord,
    blob: Vec<u8>,
    dimension: i64,
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<RawRow> {
    Ok(RawRow {
        record: PaperRecord {
            id: row.get(0)?,
            title: row.get(1)?,
            authors: row.get(2)?,
            published_date: row.get(3)?,
            url: row.get(4)?,
            abstract_text: row.get(5)?,
            embedding: None,
        },
        blob: row.get(6)?,
        dimension: row.get(7)?,
    })
}

impl RawRow {
    fn into_record(self) -> StorageResult<PaperRecord> {
        let dimension = usize::try_from(self.dimension).map_err(|_| {
            StorageError::SerializationError(format!("negative embedding dimension {}", self.dimension))
        })?;
        let mut record = self.record;
        record.embedding = Some(deserialize_embedding(&self.blob, dimension)?);
        Ok(record)
    }
}

fn insert_all(conn: &mut Connection, papers: &[PaperRecord]) -> StorageResult<usize> {
    let tx = conn.transaction()?;
    let mut inserted = 0;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO papers (id, title, authors, published_date, url, abstract, publish_year, embedding, embedding_dim)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(id) DO NOTHING",
        )?;

        for paper in papers {
            let embedding = paper.embedding.as_deref().unwrap_or_default();
            inserted += stmt.execute(params![
                paper.id,
                paper.title,
                paper.authors,
                paper.published_date,
                paper.url,
                paper.abstract_text,
                paper.publish_year(),
                serialize_embedding(embedding),
                embedding.len() as i64,
            ])?;
        }
    }
    // Dropping `tx` without commit rolls back every row above
    tx.commit()?;
    Ok(inserted)
}

fn select_papers(conn: &Connection, year_range: Option<YearRange>) -> StorageResult<Vec<PaperRecord>> {
    let rows: Vec<RawRow> = match year_range {
        Some(range) => {
            let mut stmt = conn.prepare(&format!(
                "{SELECT_COLUMNS} WHERE publish_year BETWEEN ?1 AND ?2 ORDER BY rowid"
            ))?;
            let rows = stmt.query_map(params![range.start, range.end], read_row)?;
            rows.collect::<rusqlite::Result<_>>()?
        }
        None => {
            let mut stmt = conn.prepare(&format!("{SELECT_COLUMNS} ORDER BY rowid"))?;
            let rows = stmt.query_map([], read_row)?;
            rows.collect::<rusqlite::Result<_>>()?
        }
    };

    rows.into_iter().map(RawRow::into_record).collect()
}

#[async_trait]
impl PaperStorage for SqliteStorage {
    async fn initialize(&mut self) -> StorageResult<()> {
        let conn = self.conn.lock().await;
        conn.execute_batch(SCHEMA)
            .map_err(|e| StorageError::SchemaError(e.to_string()))?;
        info!(path = ?self.db_path, "SQLite storage initialized");
        Ok(())
    }

    async fn store_config(&mut self, config: &EmbeddingConfig) -> StorageResult<()> {
        let value = serde_json::to_string(config)
            .map_err(|e| StorageError::SerializationError(e.to_string()))?;

        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO config (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![EMBEDDING_CONFIG_KEY, value],
        )?;
        Ok(())
    }

    async fn get_config(&self) -> StorageResult<Option<EmbeddingConfig>> {
        let conn = self.conn.lock().await;
        let value: Option<String> = conn
            .query_row(
                "SELECT value FROM config WHERE key = ?1",
                params![EMBEDDING_CONFIG_KEY],
                |row| row.get(0),
            )
            .optional()?;

        value
            .map(|json| {
                serde_json::from_str(&json).map_err(|e| StorageError::SerializationError(e.to_string()))
            })
            .transpose()
    }

    async fn exists_by_id(&self, id: &str) -> StorageResult<bool> {
        let conn = self.conn.lock().await;
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM papers WHERE id = ?1)",
            params![id],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    async fn insert_batch(&mut self, papers: &[PaperRecord]) -> StorageResult<usize> {
        if papers.is_empty() {
            return Ok(0);
        }
        if let Some(paper) = papers.iter().find(|p| p.embedding.is_none()) {
            return Err(StorageError::SerializationError(format!(
                "record {} has no embedding",
                paper.id
            )));
        }

        let mut conn = self.conn.lock().await;
        let inserted = insert_all(&mut conn, papers)?;
        debug!(batch = papers.len(), inserted, "Committed paper batch");
        Ok(inserted)
    }

    async fn get_all_papers(&self, year_range: Option<YearRange>) -> StorageResult<Vec<PaperRecord>> {
        let conn = self.conn.lock().await;
        select_papers(&conn, year_range)
    }

    async fn get_paper_by_id(&self, id: &str) -> StorageResult<PaperRecord> {
        let conn = self.conn.lock().await;
        let row = conn
            .query_row(&format!("{SELECT_COLUMNS} WHERE id = ?1"), params![id], read_row)
            .optional()?;

        match row {
            Some(row) => row.into_record(),
            None => Err(StorageError::NotFound(id.to_string())),
        }
    }

    async fn count_papers(&self) -> StorageResult<usize> {
        let conn = self.conn.lock().await;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM papers", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}
