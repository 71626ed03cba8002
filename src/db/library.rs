//! Chapter list and reading progress.

use std::collections::BTreeSet;

use crate::error::DatabaseError;
use crate::ordinal::sort_reading_order;
use crate::types::{ChapterId, ChapterRef, Proposal, ReadingProgress};
use crate::{Error, Result};

use super::{Database, NewChapter, StoredChapter};

impl Database {
    /// Merge a chapter into a series' list, keyed by chapter id.
    ///
    /// Known locators are never cleared: a chapter archived earlier keeps its local
    /// reference if it is merged again as remote-only.
    pub async fn upsert_chapter(&self, series_id: &str, chapter: &NewChapter) -> Result<()> {
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO chapters (series_id, chapter_id, title, ordinal, local_ref, remote_url, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(series_id, chapter_id) DO UPDATE SET
                title = excluded.title,
                ordinal = excluded.ordinal,
                local_ref = COALESCE(excluded.local_ref, chapters.local_ref),
                remote_url = COALESCE(excluded.remote_url, chapters.remote_url),
                updated_at = excluded.updated_at
            "#,
        )
        .bind(series_id)
        .bind(&chapter.id)
        .bind(&chapter.title)
        .bind(chapter.ordinal)
        .bind(&chapter.local_ref)
        .bind(&chapter.remote_url)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to upsert chapter: {}",
                e
            )))
        })?;

        Ok(())
    }

    /// Raw chapter rows for a series
    pub async fn get_chapters(&self, series_id: &str) -> Result<Vec<StoredChapter>> {
        let rows = sqlx::query_as::<_, StoredChapter>(
            r#"
            SELECT series_id, chapter_id, title, ordinal, local_ref, remote_url, updated_at
            FROM chapters
            WHERE series_id = ?
            ORDER BY ordinal ASC
            "#,
        )
        .bind(series_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list chapters: {}",
                e
            )))
        })?;

        Ok(rows)
    }

    /// Known chapters of a series in reading order
    pub async fn list_chapters(&self, series_id: &str) -> Result<Vec<ChapterRef>> {
        let mut chapters: Vec<ChapterRef> = self
            .get_chapters(series_id)
            .await?
            .iter()
            .filter_map(StoredChapter::to_chapter_ref)
            .collect();
        sort_reading_order(&mut chapters);
        Ok(chapters)
    }

    /// Record the reader's position (last write wins)
    pub async fn set_progress(&self, series_id: &str, chapter_id: &str, page: u32) -> Result<()> {
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO reading_progress (series_id, last_chapter_id, last_page, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(series_id) DO UPDATE SET
                last_chapter_id = excluded.last_chapter_id,
                last_page = excluded.last_page,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(series_id)
        .bind(chapter_id)
        .bind(i64::from(page))
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to set progress: {}",
                e
            )))
        })?;

        Ok(())
    }

    /// Mark a chapter complete. Returns false if it already was.
    pub async fn mark_completed(&self, series_id: &str, chapter_id: &str) -> Result<bool> {
        let now = chrono::Utc::now().timestamp();

        let result = sqlx::query(
            "INSERT OR IGNORE INTO completed_chapters (series_id, chapter_id, completed_at) VALUES (?, ?, ?)",
        )
        .bind(series_id)
        .bind(chapter_id)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to mark chapter completed: {}",
                e
            )))
        })?;

        Ok(result.rows_affected() > 0)
    }

    /// Durable progress of a series (default when never read)
    pub async fn load_progress(&self, series_id: &str) -> Result<ReadingProgress> {
        let position: Option<(Option<String>, i64)> = sqlx::query_as(
            "SELECT last_chapter_id, last_page FROM reading_progress WHERE series_id = ?",
        )
        .bind(series_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to load progress: {}",
                e
            )))
        })?;

        let completed: Vec<String> = sqlx::query_scalar(
            "SELECT chapter_id FROM completed_chapters WHERE series_id = ?",
        )
        .bind(series_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to load completed chapters: {}",
                e
            )))
        })?;

        let (last_chapter_id, last_page) = position.unwrap_or((None, 0));
        Ok(ReadingProgress {
            last_chapter_id: last_chapter_id.map(ChapterId),
            last_page: u32::try_from(last_page).unwrap_or(0),
            completed_chapter_ids: completed.into_iter().map(ChapterId).collect::<BTreeSet<_>>(),
        })
    }

    /// Merge one reader proposal.
    ///
    /// Duplicate and out-of-order proposals are tolerated: completions are
    /// insert-or-ignore and chapter metadata is an upsert by id.
    pub async fn apply_proposal(&self, series_id: &str, proposal: &Proposal) -> Result<()> {
        match proposal {
            Proposal::Progress { chapter_id, page } => {
                self.set_progress(series_id, chapter_id.as_str(), *page).await
            }
            Proposal::Completion {
                completed_id,
                current_chapter_id,
                page,
            } => {
                let mut tx = self.pool.begin().await.map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to begin transaction: {}",
                        e
                    )))
                })?;
                let now = chrono::Utc::now().timestamp();

                sqlx::query(
                    "INSERT OR IGNORE INTO completed_chapters (series_id, chapter_id, completed_at) VALUES (?, ?, ?)",
                )
                .bind(series_id)
                .bind(completed_id.as_str())
                .bind(now)
                .execute(&mut *tx)
                .await?;

                sqlx::query(
                    r#"
                    INSERT INTO reading_progress (series_id, last_chapter_id, last_page, updated_at)
                    VALUES (?, ?, ?, ?)
                    ON CONFLICT(series_id) DO UPDATE SET
                        last_chapter_id = excluded.last_chapter_id,
                        last_page = excluded.last_page,
                        updated_at = excluded.updated_at
                    "#,
                )
                .bind(series_id)
                .bind(current_chapter_id.as_str())
                .bind(i64::from(*page))
                .bind(now)
                .execute(&mut *tx)
                .await?;

                tx.commit().await.map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to commit completion: {}",
                        e
                    )))
                })?;
                Ok(())
            }
            Proposal::NewChapter {
                id,
                title,
                ordinal,
                local_ref,
            } => {
                let chapter = NewChapter {
                    id: id.0.clone(),
                    title: title.clone(),
                    ordinal: *ordinal,
                    local_ref: Some(local_ref.0.clone()),
                    remote_url: None,
                };
                self.upsert_chapter(series_id, &chapter).await
            }
        }
    }
}
