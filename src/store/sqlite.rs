//! Durable [`MetadataStore`] backed by SQLite via sqlx.
//!
//! `replace_chunks` runs inside one transaction: delete old chunks,
//! insert the new set with vectors, update the document record. A
//! concurrent reader sees the old complete chunk set until commit,
//! then the new complete set.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use crate::chunker::ChunkParams;
use crate::embedding::{blob_to_vec, vec_to_blob};
use crate::error::{Error, Result};
use crate::index::IndexEntry;
use crate::models::{Chunk, DocState, Document, Project};

use super::MetadataStore;

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn ts_to_datetime(ts: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(ts, 0).unwrap_or_default()
}

fn row_to_document(row: &sqlx::sqlite::SqliteRow) -> Result<Document> {
    let state_str: String = row.try_get("state")?;
    let state = DocState::parse(&state_str)
        .ok_or_else(|| Error::Storage(format!("unknown document state: {}", state_str)))?;

    Ok(Document {
        id: row.try_get("id")?,
        project_id: row.try_get("project_id")?,
        filename: row.try_get("filename")?,
        content_hash: row.try_get("content_hash")?,
        state,
        error: row.try_get("error")?,
        chunk_size: row.try_get::<Option<i64>, _>("chunk_size")?.map(|v| v as usize),
        overlap_size: row
            .try_get::<Option<i64>, _>("overlap_size")?
            .map(|v| v as usize),
        chunk_count: row.try_get::<i64, _>("chunk_count")? as usize,
        created_at: ts_to_datetime(row.try_get("created_at")?),
        updated_at: ts_to_datetime(row.try_get("updated_at")?),
    })
}

fn row_to_chunk(row: &sqlx::sqlite::SqliteRow) -> Result<Chunk> {
    Ok(Chunk {
        id: row.try_get("id")?,
        document_id: row.try_get("document_id")?,
        chunk_index: row.try_get("chunk_index")?,
        text: row.try_get("text")?,
        char_len: row.try_get::<i64, _>("char_len")? as usize,
        page: row.try_get::<Option<i64>, _>("page")?.map(|p| p as u32),
        source_name: row.try_get("source_name")?,
        hash: row.try_get("hash")?,
        model: row.try_get("model")?,
    })
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn ensure_project(&self, project_id: &str) -> Result<Project> {
        let now = Utc::now().timestamp();
        sqlx::query("INSERT INTO projects (id, created_at) VALUES (?, ?) ON CONFLICT(id) DO NOTHING")
            .bind(project_id)
            .bind(now)
            .execute(&self.pool)
            .await?;

        let created_at: i64 = sqlx::query_scalar("SELECT created_at FROM projects WHERE id = ?")
            .bind(project_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(Project {
            id: project_id.to_string(),
            created_at: ts_to_datetime(created_at),
        })
    }

    async fn create_document(&self, doc: &Document) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO documents
                (id, project_id, filename, content_hash, state, error,
                 chunk_size, overlap_size, chunk_count, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&doc.id)
        .bind(&doc.project_id)
        .bind(&doc.filename)
        .bind(&doc.content_hash)
        .bind(doc.state.as_str())
        .bind(&doc.error)
        .bind(doc.chunk_size.map(|v| v as i64))
        .bind(doc.overlap_size.map(|v| v as i64))
        .bind(doc.chunk_count as i64)
        .bind(doc.created_at.timestamp())
        .bind(doc.updated_at.timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_document(&self, project_id: &str, document_id: &str) -> Result<Option<Document>> {
        let row = sqlx::query("SELECT * FROM documents WHERE id = ? AND project_id = ?")
            .bind(document_id)
            .bind(project_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_document).transpose()
    }

    async fn list_documents(&self, project_id: &str) -> Result<Vec<Document>> {
        let rows =
            sqlx::query("SELECT * FROM documents WHERE project_id = ? ORDER BY created_at DESC, id")
                .bind(project_id)
                .fetch_all(&self.pool)
                .await?;
        rows.iter().map(row_to_document).collect()
    }

    async fn set_document_state(
        &self,
        document_id: &str,
        state: DocState,
        error: Option<&str>,
    ) -> Result<()> {
        let result =
            sqlx::query("UPDATE documents SET state = ?, error = ?, updated_at = ? WHERE id = ?")
                .bind(state.as_str())
                .bind(error)
                .bind(Utc::now().timestamp())
                .bind(document_id)
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("document {}", document_id)));
        }
        Ok(())
    }

    async fn replace_chunks(
        &self,
        document_id: &str,
        chunks: &[Chunk],
        vectors: &[Vec<f32>],
        params: ChunkParams,
    ) -> Result<()> {
        if chunks.len() != vectors.len() {
            return Err(Error::Storage(format!(
                "{} chunks but {} vectors",
                chunks.len(),
                vectors.len()
            )));
        }

        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await?;

        for (chunk, vector) in chunks.iter().zip(vectors.iter()) {
            sqlx::query(
                r#"
                INSERT INTO chunks
                    (id, document_id, chunk_index, text, char_len, page,
                     source_name, hash, model, vector)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&chunk.id)
            .bind(&chunk.document_id)
            .bind(chunk.chunk_index)
            .bind(&chunk.text)
            .bind(chunk.char_len as i64)
            .bind(chunk.page.map(|p| p as i64))
            .bind(&chunk.source_name)
            .bind(&chunk.hash)
            .bind(&chunk.model)
            .bind(vec_to_blob(vector))
            .execute(&mut *tx)
            .await?;
        }

        let updated = sqlx::query(
            r#"
            UPDATE documents
            SET state = ?, error = NULL, chunk_size = ?, overlap_size = ?,
                chunk_count = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(DocState::Processed.as_str())
        .bind(params.chunk_size as i64)
        .bind(params.overlap_size as i64)
        .bind(chunks.len() as i64)
        .bind(Utc::now().timestamp())
        .bind(document_id)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(Error::NotFound(format!("document {}", document_id)));
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_chunks(&self, document_id: &str) -> Result<Vec<Chunk>> {
        let rows = sqlx::query("SELECT * FROM chunks WHERE document_id = ? ORDER BY chunk_index")
            .bind(document_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_chunk).collect()
    }

    async fn get_chunks_by_ids(&self, chunk_ids: &[String]) -> Result<Vec<Chunk>> {
        let mut result = Vec::with_capacity(chunk_ids.len());
        for id in chunk_ids {
            let row = sqlx::query("SELECT * FROM chunks WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
            if let Some(row) = row {
                result.push(row_to_chunk(&row)?);
            }
        }
        Ok(result)
    }

    async fn load_index_entries(&self) -> Result<Vec<IndexEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT c.id AS chunk_id, c.document_id, c.chunk_index, c.vector,
                   d.project_id
            FROM chunks c
            JOIN documents d ON d.id = c.document_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let blob: Vec<u8> = row.try_get("vector")?;
                Ok(IndexEntry {
                    chunk_id: row.try_get("chunk_id")?,
                    document_id: row.try_get("document_id")?,
                    project_id: row.try_get("project_id")?,
                    chunk_index: row.try_get("chunk_index")?,
                    vector: blob_to_vec(&blob),
                })
            })
            .collect()
    }
}
