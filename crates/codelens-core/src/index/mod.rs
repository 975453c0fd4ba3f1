//! SQLite-backed store for chunks, embeddings, bundles, projections, and sessions.
//!
//! This module is the engine's single shared mutable resource: all writes
//! serialize through one connection, and chunk deletion cascades to
//! embeddings and projection rows so nothing is ever orphaned.
//!
//! ## Concurrency
//!
//! SQLite is configured in WAL mode for concurrent reads during writes.
//! Only one writer is allowed at a time (SQLite constraint); callers should
//! hold the store behind a mutex or actor when writing from multiple tasks.

use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{OmniError, OmniResult};
use crate::types::{Bundle, Chunk, ChunkKind, ComplexityLevel, ProjectionPoint, SessionTurn};

/// SQLite-backed metadata and vector store.
pub struct MetadataIndex {
    conn: Connection,
}

impl MetadataIndex {
    /// Open or create an index database at the given path.
    pub fn open(db_path: &Path) -> OmniResult<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(db_path)?;

        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "cache_size", "-64000")?; // 64MB cache
        conn.pragma_update(None, "foreign_keys", "ON")?;

        let index = Self { conn };
        index.ensure_schema()?;

        Ok(index)
    }

    /// Create all tables and indexes if they don't exist.
    fn ensure_schema(&self) -> OmniResult<()> {
        self.conn.execute_batch(include_str!("schema.sql"))?;
        Ok(())
    }

    /// Run an integrity check on the database.
    pub fn check_integrity(&self) -> OmniResult<bool> {
        let result: String = self
            .conn
            .query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
        Ok(result == "ok")
    }

    /// Run an ad-hoc `SELECT` against the store, for callers that need a
    /// shape no existing method covers. Anything other than a read-only
    /// select is rejected before it can touch the database: a statement
    /// authorizer denies every action except `SELECT`/`READ`/`FUNCTION`,
    /// so `PRAGMA`, attached-table tricks, and writes are all refused,
    /// not just ones caught by a string prefix check.
    pub fn query_readonly(&self, sql: &str) -> OmniResult<Vec<Vec<String>>> {
        if !sql.trim_start().to_ascii_uppercase().starts_with("SELECT") {
            return Err(OmniError::Config {
                details: "query_readonly only accepts SELECT statements".to_string(),
            });
        }

        use rusqlite::hooks::{AuthAction, Authorization};

        self.conn.authorizer(Some(|ctx: rusqlite::hooks::AuthContext<'_>| match ctx.action {
            AuthAction::Select | AuthAction::Read { .. } | AuthAction::Function { .. } => {
                Authorization::Allow
            }
            _ => Authorization::Deny,
        }));

        let result = (|| -> OmniResult<Vec<Vec<String>>> {
            let mut stmt = self.conn.prepare(sql)?;
            let column_count = stmt.column_count();
            let rows = stmt.query_map([], |row| {
                (0..column_count)
                    .map(|i| {
                        row.get::<_, Option<String>>(i)
                            .map(|v| v.unwrap_or_default())
                    })
                    .collect::<rusqlite::Result<Vec<String>>>()
            })?;
            rows.collect::<Result<Vec<_>, _>>().map_err(OmniError::from)
        })();

        self.conn
            .authorizer(None::<fn(rusqlite::hooks::AuthContext<'_>) -> Authorization>);

        result.map_err(|e| match e {
            OmniError::Database(ref inner) if inner.to_string().contains("not authorized") => {
                OmniError::Config {
                    details: "query_readonly rejected a non-read-only statement".to_string(),
                }
            }
            other => other,
        })
    }

    // -----------------------------------------------------------------
    // Chunks
    // -----------------------------------------------------------------

    /// Replace all chunks belonging to `file` with `chunks`, in one
    /// transaction. Existing embeddings/projections for that file's old
    /// chunks cascade away.
    pub fn upsert_file_chunks(&mut self, file: &str, chunks: &[Chunk]) -> OmniResult<()> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM chunks WHERE file = ?1", params![file])?;

        for chunk in chunks {
            tx.execute(
                "INSERT INTO chunks (
                    id, file, name, start_line, end_line, syntax_kind, code,
                    exported, is_async, imports_referenced, purpose,
                    domain_tags, pattern_tags, complexity_score, complexity_level, bundles
                ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16)",
                params![
                    chunk.id,
                    chunk.file,
                    chunk.name,
                    chunk.start_line,
                    chunk.end_line,
                    chunk.syntax_kind.as_str(),
                    chunk.code,
                    chunk.exported,
                    chunk.is_async,
                    serde_json::to_string(&chunk.imports_referenced)
                        .map_err(|e| OmniError::Serialization(e.to_string()))?,
                    chunk.purpose,
                    serde_json::to_string(&chunk.domain_tags)
                        .map_err(|e| OmniError::Serialization(e.to_string()))?,
                    serde_json::to_string(&chunk.pattern_tags)
                        .map_err(|e| OmniError::Serialization(e.to_string()))?,
                    chunk.complexity_score,
                    chunk.complexity_level.as_str(),
                    serde_json::to_string(&chunk.bundles)
                        .map_err(|e| OmniError::Serialization(e.to_string()))?,
                ],
            )?;
            if let Some(embedding) = &chunk.embedding {
                Self::store_embedding_tx(&tx, &chunk.id, embedding)?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    /// Remove a file and every chunk that belongs to it (cascades to embeddings/projections).
    pub fn delete_file(&mut self, file: &str) -> OmniResult<()> {
        self.conn
            .execute("DELETE FROM chunks WHERE file = ?1", params![file])?;
        Ok(())
    }

    /// Fetch every chunk for a given file.
    pub fn chunks_for_file(&self, file: &str) -> OmniResult<Vec<Chunk>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, file, name, start_line, end_line, syntax_kind, code, exported, is_async,
                    imports_referenced, purpose, domain_tags, pattern_tags, complexity_score,
                    complexity_level, bundles
             FROM chunks WHERE file = ?1 ORDER BY start_line",
        )?;
        let rows = stmt.query_map(params![file], Self::row_to_chunk)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(OmniError::from)
    }

    /// Fetch every chunk in the store.
    pub fn all_chunks(&self) -> OmniResult<Vec<Chunk>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, file, name, start_line, end_line, syntax_kind, code, exported, is_async,
                    imports_referenced, purpose, domain_tags, pattern_tags, complexity_score,
                    complexity_level, bundles
             FROM chunks",
        )?;
        let rows = stmt.query_map([], Self::row_to_chunk)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(OmniError::from)
    }

    /// Substring search over chunk `name` and `purpose`, case-insensitive
    /// for ASCII per SQLite's default `LIKE` behavior. `%`/`_` in `term`
    /// are escaped so a literal search term can't be mistaken for a wildcard.
    pub fn search_chunks(&self, term: &str) -> OmniResult<Vec<Chunk>> {
        let pattern = format!("%{}%", escape_like(term));
        let mut stmt = self.conn.prepare(
            "SELECT id, file, name, start_line, end_line, syntax_kind, code, exported, is_async,
                    imports_referenced, purpose, domain_tags, pattern_tags, complexity_score,
                    complexity_level, bundles
             FROM chunks WHERE name LIKE ?1 ESCAPE '\\' OR purpose LIKE ?1 ESCAPE '\\'
             ORDER BY file, start_line",
        )?;
        let rows = stmt.query_map(params![pattern], Self::row_to_chunk)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(OmniError::from)
    }

    /// Chunks that have no embedding yet, for background backfill.
    pub fn chunks_without_embeddings(&self) -> OmniResult<Vec<Chunk>> {
        let mut stmt = self.conn.prepare(
            "SELECT c.id, c.file, c.name, c.start_line, c.end_line, c.syntax_kind, c.code,
                    c.exported, c.is_async, c.imports_referenced, c.purpose, c.domain_tags,
                    c.pattern_tags, c.complexity_score, c.complexity_level, c.bundles
             FROM chunks c
             LEFT JOIN embeddings e ON e.chunk_id = c.id
             WHERE e.chunk_id IS NULL",
        )?;
        let rows = stmt.query_map([], Self::row_to_chunk)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(OmniError::from)
    }

    /// Distinct non-empty `purpose` tags present in the store.
    pub fn distinct_purposes(&self) -> OmniResult<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT purpose FROM chunks WHERE purpose != '' ORDER BY purpose")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        rows.collect::<Result<Vec<_>, _>>().map_err(OmniError::from)
    }

    /// Distinct syntax kinds present in the store.
    pub fn distinct_syntax_kinds(&self) -> OmniResult<Vec<ChunkKind>> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT syntax_kind FROM chunks ORDER BY syntax_kind")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        rows.map(|r| r.map(|s| ChunkKind::from_str_lossy(&s)))
            .collect::<Result<Vec<_>, _>>()
            .map_err(OmniError::from)
    }

    /// Files whose chunks carry the given purpose.
    pub fn files_by_purpose(&self, purpose: &str) -> OmniResult<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT file FROM chunks WHERE purpose = ?1 ORDER BY file")?;
        let rows = stmt.query_map(params![purpose], |row| row.get::<_, String>(0))?;
        rows.collect::<Result<Vec<_>, _>>().map_err(OmniError::from)
    }

    /// Files whose chunks carry the given syntax kind.
    pub fn files_by_syntax_kind(&self, kind: ChunkKind) -> OmniResult<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT file FROM chunks WHERE syntax_kind = ?1 ORDER BY file")?;
        let rows = stmt.query_map(params![kind.as_str()], |row| row.get::<_, String>(0))?;
        rows.collect::<Result<Vec<_>, _>>().map_err(OmniError::from)
    }

    /// Total chunk count.
    pub fn chunk_count(&self) -> OmniResult<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Distinct file count across all chunks.
    pub fn file_count(&self) -> OmniResult<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(DISTINCT file) FROM chunks", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn row_to_chunk(row: &rusqlite::Row<'_>) -> rusqlite::Result<Chunk> {
        let imports_json: String = row.get(9)?;
        let domain_json: String = row.get(11)?;
        let pattern_json: String = row.get(12)?;
        let bundles_json: String = row.get(15)?;
        Ok(Chunk {
            id: row.get(0)?,
            file: row.get(1)?,
            name: row.get(2)?,
            start_line: row.get(3)?,
            end_line: row.get(4)?,
            syntax_kind: ChunkKind::from_str_lossy(&row.get::<_, String>(5)?),
            code: row.get(6)?,
            exported: row.get(7)?,
            is_async: row.get(8)?,
            imports_referenced: serde_json::from_str(&imports_json).unwrap_or_default(),
            purpose: row.get(10)?,
            domain_tags: serde_json::from_str(&domain_json).unwrap_or_default(),
            pattern_tags: serde_json::from_str(&pattern_json).unwrap_or_default(),
            complexity_score: row.get(13)?,
            complexity_level: ComplexityLevel::from_str_lossy(&row.get::<_, String>(14)?),
            embedding: None,
            bundles: serde_json::from_str(&bundles_json).unwrap_or_default(),
        })
    }

    // -----------------------------------------------------------------
    // Embeddings
    // -----------------------------------------------------------------

    /// Persist an embedding for a chunk that already exists in the store.
    pub fn store_embedding(&mut self, chunk_id: &str, vector: &[f32]) -> OmniResult<()> {
        let tx = self.conn.transaction()?;
        Self::store_embedding_tx(&tx, chunk_id, vector)?;
        tx.commit()?;
        Ok(())
    }

    fn store_embedding_tx(
        tx: &rusqlite::Transaction<'_>,
        chunk_id: &str,
        vector: &[f32],
    ) -> OmniResult<()> {
        let blob = pack_f32_le(vector);
        tx.execute(
            "INSERT INTO embeddings (chunk_id, vector, dimensions)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(chunk_id) DO UPDATE SET vector = excluded.vector, dimensions = excluded.dimensions",
            params![chunk_id, blob, vector.len() as i64],
        )?;
        Ok(())
    }

    /// Read back an embedding for a single chunk.
    pub fn embedding_for(&self, chunk_id: &str) -> OmniResult<Option<Vec<f32>>> {
        let row: Option<Vec<u8>> = self
            .conn
            .query_row(
                "SELECT vector FROM embeddings WHERE chunk_id = ?1",
                params![chunk_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(row.map(|blob| unpack_f32_le(&blob)))
    }

    /// Stream every `(chunk_id, vector)` pair in batches for brute-force search.
    pub fn all_embeddings(&self) -> OmniResult<Vec<(String, Vec<f32>)>> {
        let mut stmt = self.conn.prepare("SELECT chunk_id, vector FROM embeddings")?;
        let rows = stmt.query_map([], |row| {
            let id: String = row.get(0)?;
            let blob: Vec<u8> = row.get(1)?;
            Ok((id, unpack_f32_le(&blob)))
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(OmniError::from)
    }

    /// Number of embeddings currently stored; drives projection-cache invalidation.
    pub fn embedding_count(&self) -> OmniResult<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM embeddings", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    // -----------------------------------------------------------------
    // Projections
    // -----------------------------------------------------------------

    /// Store a projection, tagged with the embedding count it was computed against.
    pub fn store_projection(
        &mut self,
        chunk_id: &str,
        point: ProjectionPoint,
        recorded_count: usize,
    ) -> OmniResult<()> {
        self.conn.execute(
            "INSERT INTO projections (chunk_id, x, y, recorded_count)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(chunk_id) DO UPDATE SET x = excluded.x, y = excluded.y, recorded_count = excluded.recorded_count",
            params![chunk_id, point.x, point.y, recorded_count as i64],
        )?;
        Ok(())
    }

    /// Return all cached projections, plus the embedding count they were computed
    /// against; the caller must discard them if it differs from `embedding_count()`.
    pub fn cached_projections(&self) -> OmniResult<Vec<(String, ProjectionPoint, usize)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT chunk_id, x, y, recorded_count FROM projections")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                ProjectionPoint {
                    x: row.get(1)?,
                    y: row.get(2)?,
                },
                row.get::<_, i64>(3)? as usize,
            ))
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(OmniError::from)
    }

    /// Drop every cached projection row (used when the embedding count changes).
    pub fn clear_projections(&mut self) -> OmniResult<()> {
        self.conn.execute("DELETE FROM projections", [])?;
        Ok(())
    }

    // -----------------------------------------------------------------
    // Bundles
    // -----------------------------------------------------------------

    /// Insert or update a manual bundle's pattern list, leaving materialization
    /// fields alone if it already exists.
    pub fn upsert_manual_bundle(&mut self, name: &str, patterns: &[String]) -> OmniResult<()> {
        let patterns_json =
            serde_json::to_string(patterns).map_err(|e| OmniError::Serialization(e.to_string()))?;
        self.conn.execute(
            "INSERT INTO bundles (name, kind, patterns, selector, dirty)
             VALUES (?1, 'manual', ?2, NULL, 1)
             ON CONFLICT(name) DO UPDATE SET patterns = excluded.patterns, dirty = 1",
            params![name, patterns_json],
        )?;
        Ok(())
    }

    /// Record a successful manual bundle materialization.
    pub fn mark_bundle_clean(&mut self, name: &str, size_bytes: u64, generated_ms: i64) -> OmniResult<()> {
        self.conn.execute(
            "UPDATE bundles SET dirty = 0, size_bytes = ?2, last_generated_ms = ?3 WHERE name = ?1",
            params![name, size_bytes as i64, generated_ms],
        )?;
        Ok(())
    }

    /// Mark every manual bundle whose patterns match `path` as dirty.
    pub fn mark_matching_bundles_dirty(&mut self, matcher: impl Fn(&[String]) -> bool) -> OmniResult<()> {
        let mut stmt = self
            .conn
            .prepare("SELECT name, patterns FROM bundles WHERE kind = 'manual'")?;
        let candidates: Vec<(String, String)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<_, _>>()?;
        drop(stmt);

        for (name, patterns_json) in candidates {
            let patterns: Vec<String> = serde_json::from_str(&patterns_json).unwrap_or_default();
            if matcher(&patterns) {
                self.conn
                    .execute("UPDATE bundles SET dirty = 1 WHERE name = ?1", params![name])?;
            }
        }
        Ok(())
    }

    /// Fetch one manual bundle row by name.
    pub fn manual_bundle(&self, name: &str) -> OmniResult<Option<Bundle>> {
        self.conn
            .query_row(
                "SELECT name, patterns, last_generated_ms, size_bytes, dirty
                 FROM bundles WHERE name = ?1 AND kind = 'manual'",
                params![name],
                |row| {
                    let patterns_json: String = row.get(1)?;
                    Ok(Bundle::Manual {
                        name: row.get(0)?,
                        patterns: serde_json::from_str(&patterns_json).unwrap_or_default(),
                        files: Vec::new(),
                        last_generated_ms: row.get(2)?,
                        size_bytes: row.get::<_, i64>(3)? as u64,
                        dirty: row.get(4)?,
                    })
                },
            )
            .optional()
            .map_err(OmniError::from)
    }

    /// All manual bundles, in name order.
    pub fn manual_bundles(&self) -> OmniResult<Vec<Bundle>> {
        let mut stmt = self.conn.prepare(
            "SELECT name, patterns, last_generated_ms, size_bytes, dirty
             FROM bundles WHERE kind = 'manual' ORDER BY name",
        )?;
        let rows = stmt.query_map([], |row| {
            let patterns_json: String = row.get(1)?;
            Ok(Bundle::Manual {
                name: row.get(0)?,
                patterns: serde_json::from_str(&patterns_json).unwrap_or_default(),
                files: Vec::new(),
                last_generated_ms: row.get(2)?,
                size_bytes: row.get::<_, i64>(3)? as u64,
                dirty: row.get(4)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(OmniError::from)
    }

    // -----------------------------------------------------------------
    // Sessions
    // -----------------------------------------------------------------

    /// Append a turn to a session's log.
    pub fn append_session_turn(&mut self, session_id: &str, turn: &SessionTurn) -> OmniResult<()> {
        let next_seq: i64 = self.conn.query_row(
            "SELECT COALESCE(MAX(seq), -1) + 1 FROM sessions WHERE id = ?1",
            params![session_id],
            |row| row.get(0),
        )?;
        self.conn.execute(
            "INSERT INTO sessions (id, seq, role, content, timestamp_ms, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                session_id,
                next_seq,
                turn.role,
                turn.content,
                turn.timestamp_ms,
                turn.metadata.to_string(),
            ],
        )?;
        Ok(())
    }

    /// Fetch a session's full turn log in order.
    pub fn session_turns(&self, session_id: &str) -> OmniResult<Vec<SessionTurn>> {
        let mut stmt = self.conn.prepare(
            "SELECT role, content, timestamp_ms, metadata FROM sessions WHERE id = ?1 ORDER BY seq",
        )?;
        let rows = stmt.query_map(params![session_id], |row| {
            let metadata_str: String = row.get(3)?;
            Ok(SessionTurn {
                role: row.get(0)?,
                content: row.get(1)?,
                timestamp_ms: row.get(2)?,
                metadata: serde_json::from_str(&metadata_str).unwrap_or(serde_json::Value::Null),
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(OmniError::from)
    }
}

/// Escape `%`, `_`, and `\` in a user-supplied `LIKE` search term so it's
/// matched literally; paired with `ESCAPE '\\'` in the calling query.
fn escape_like(term: &str) -> String {
    term.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

/// Pack an `f32` vector as a little-endian byte blob for storage.
fn pack_f32_le(vector: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(vector.len() * 4);
    for v in vector {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

/// Unpack a little-endian byte blob back into an `f32` vector.
fn unpack_f32_le(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| {
            let arr: [u8; 4] = chunk.try_into().expect("chunks_exact(4) yields 4 bytes");
            f32::from_le_bytes(arr)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn sample_chunk(file: &str, name: &str, line: u32) -> Chunk {
        Chunk {
            id: Chunk::build_id(file, name, line),
            file: file.to_string(),
            name: name.to_string(),
            start_line: line,
            end_line: line + 4,
            syntax_kind: ChunkKind::Function,
            code: "fn foo() {}".to_string(),
            exported: true,
            is_async: false,
            imports_referenced: vec![],
            purpose: "business-logic".to_string(),
            domain_tags: BTreeSet::new(),
            pattern_tags: BTreeSet::new(),
            complexity_score: 1,
            complexity_level: ComplexityLevel::Low,
            embedding: None,
            bundles: BTreeSet::new(),
        }
    }

    #[test]
    fn test_open_creates_database() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let db_path = dir.path().join("test.db");
        let index = MetadataIndex::open(&db_path).expect("open database");
        assert!(index.check_integrity().expect("check integrity"));
    }

    #[test]
    fn test_upsert_and_fetch_chunks() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let mut index = MetadataIndex::open(&dir.path().join("test.db")).expect("open");

        let chunks = vec![sample_chunk("src/a.rs", "foo", 1)];
        index.upsert_file_chunks("src/a.rs", &chunks).expect("upsert");

        let fetched = index.chunks_for_file("src/a.rs").expect("fetch");
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0].name, "foo");
        assert_eq!(index.chunk_count().expect("count"), 1);
    }

    #[test]
    fn test_reupsert_replaces_old_chunks() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let mut index = MetadataIndex::open(&dir.path().join("test.db")).expect("open");

        index
            .upsert_file_chunks("src/a.rs", &[sample_chunk("src/a.rs", "foo", 1)])
            .expect("upsert 1");
        index
            .upsert_file_chunks("src/a.rs", &[sample_chunk("src/a.rs", "bar", 1)])
            .expect("upsert 2");

        let fetched = index.chunks_for_file("src/a.rs").expect("fetch");
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0].name, "bar");
    }

    #[test]
    fn test_embedding_roundtrip() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let mut index = MetadataIndex::open(&dir.path().join("test.db")).expect("open");
        index
            .upsert_file_chunks("src/a.rs", &[sample_chunk("src/a.rs", "foo", 1)])
            .expect("upsert");

        let id = Chunk::build_id("src/a.rs", "foo", 1);
        index.store_embedding(&id, &[0.1, 0.2, 0.3]).expect("store");

        let vector = index.embedding_for(&id).expect("fetch").expect("present");
        assert_eq!(vector.len(), 3);
        assert!((vector[1] - 0.2).abs() < 1e-6);
        assert_eq!(index.embedding_count().expect("count"), 1);
    }

    #[test]
    fn test_delete_file_cascades_embeddings() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let mut index = MetadataIndex::open(&dir.path().join("test.db")).expect("open");
        index
            .upsert_file_chunks("src/a.rs", &[sample_chunk("src/a.rs", "foo", 1)])
            .expect("upsert");
        let id = Chunk::build_id("src/a.rs", "foo", 1);
        index.store_embedding(&id, &[0.1, 0.2]).expect("store");

        index.delete_file("src/a.rs").expect("delete");

        assert_eq!(index.chunk_count().expect("count"), 0);
        assert_eq!(index.embedding_count().expect("count"), 0);
    }

    #[test]
    fn test_chunks_without_embeddings() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let mut index = MetadataIndex::open(&dir.path().join("test.db")).expect("open");
        index
            .upsert_file_chunks(
                "src/a.rs",
                &[sample_chunk("src/a.rs", "foo", 1), sample_chunk("src/a.rs", "bar", 10)],
            )
            .expect("upsert");
        index
            .store_embedding(&Chunk::build_id("src/a.rs", "foo", 1), &[0.1])
            .expect("store");

        let missing = index.chunks_without_embeddings().expect("missing");
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].name, "bar");
    }

    #[test]
    fn test_search_chunks_matches_name_and_purpose_substrings() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let mut index = MetadataIndex::open(&dir.path().join("test.db")).expect("open");

        let mut with_purpose = sample_chunk("src/auth.rs", "validate_token", 1);
        with_purpose.purpose = "token-validation".to_string();
        index
            .upsert_file_chunks("src/auth.rs", &[with_purpose, sample_chunk("src/other.rs", "unrelated", 1)])
            .expect("upsert");

        let by_name = index.search_chunks("validate").expect("search by name");
        assert_eq!(by_name.len(), 1);
        assert_eq!(by_name[0].name, "validate_token");

        let by_purpose = index.search_chunks("token-valid").expect("search by purpose");
        assert_eq!(by_purpose.len(), 1);
        assert_eq!(by_purpose[0].name, "validate_token");

        assert!(index.search_chunks("no-such-term").expect("search miss").is_empty());
    }

    #[test]
    fn test_search_chunks_escapes_wildcards_in_term() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let mut index = MetadataIndex::open(&dir.path().join("test.db")).expect("open");
        index
            .upsert_file_chunks(
                "src/a.rs",
                &[sample_chunk("src/a.rs", "weird_name", 1), sample_chunk("src/a.rs", "weirdXname", 5)],
            )
            .expect("upsert");

        let literal = index.search_chunks("weird_name").expect("search");
        assert_eq!(literal.len(), 1, "underscore in the term should not act as a single-char wildcard");
        assert_eq!(literal[0].name, "weird_name");
    }

    #[test]
    fn test_query_readonly_executes_select() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let mut index = MetadataIndex::open(&dir.path().join("test.db")).expect("open");
        index
            .upsert_file_chunks("src/a.rs", &[sample_chunk("src/a.rs", "foo", 1)])
            .expect("upsert");

        let rows = index
            .query_readonly("SELECT name FROM chunks WHERE file = 'src/a.rs'")
            .expect("select");
        assert_eq!(rows, vec![vec!["foo".to_string()]]);
    }

    #[test]
    fn test_query_readonly_rejects_mutations() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let index = MetadataIndex::open(&dir.path().join("test.db")).expect("open");

        assert!(index.query_readonly("DELETE FROM chunks").is_err());
        assert!(index.query_readonly("DROP TABLE chunks").is_err());
        assert!(index
            .query_readonly("INSERT INTO chunks (id) VALUES ('x')")
            .is_err());

        // a well-formed SELECT still works after a rejected statement.
        assert!(index.query_readonly("SELECT 1").is_ok());
    }

    #[test]
    fn test_query_readonly_rejects_non_select_prefix() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let index = MetadataIndex::open(&dir.path().join("test.db")).expect("open");
        let err = index
            .query_readonly("PRAGMA table_info(chunks)")
            .expect_err("non-select must be rejected");
        assert!(matches!(err, OmniError::Config { .. }));
    }

    #[test]
    fn test_manual_bundle_dirty_tracking() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let mut index = MetadataIndex::open(&dir.path().join("test.db")).expect("open");
        index
            .upsert_manual_bundle("docs", &["docs/**/*.md".to_string()])
            .expect("upsert bundle");

        let bundle = index.manual_bundle("docs").expect("fetch").expect("present");
        match bundle {
            Bundle::Manual { dirty, .. } => assert!(dirty),
            Bundle::Smart { .. } => panic!("expected manual"),
        }

        index.mark_bundle_clean("docs", 1024, 1_700_000_000_000).expect("clean");
        let bundle = index.manual_bundle("docs").expect("fetch").expect("present");
        match bundle {
            Bundle::Manual { dirty, size_bytes, .. } => {
                assert!(!dirty);
                assert_eq!(size_bytes, 1024);
            }
            Bundle::Smart { .. } => panic!("expected manual"),
        }
    }

    #[test]
    fn test_session_turns_ordered() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let mut index = MetadataIndex::open(&dir.path().join("test.db")).expect("open");
        index
            .append_session_turn(
                "s1",
                &SessionTurn {
                    role: "user".into(),
                    content: "hello".into(),
                    timestamp_ms: 1,
                    metadata: serde_json::json!({}),
                },
            )
            .expect("append");
        index
            .append_session_turn(
                "s1",
                &SessionTurn {
                    role: "assistant".into(),
                    content: "hi".into(),
                    timestamp_ms: 2,
                    metadata: serde_json::json!({}),
                },
            )
            .expect("append");

        let turns = index.session_turns("s1").expect("fetch");
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].role, "user");
        assert_eq!(turns[1].role, "assistant");
    }
}
