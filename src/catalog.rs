#![forbid(unsafe_code)]

//! Read-only catalog layer consumed by the stream endpoints, plus the writer
//! used by the admin CLI and tests.
//!
//! A movie owns at most one stream reference. A series owns none directly;
//! each of its episodes owns at most one. Episodes are always returned sorted
//! by (season asc, episode asc) so "first episode" selection is a plain
//! `first()` at the call sites.

use std::path::Path;

use anyhow::{Context, Result, anyhow};
use libsql::{Builder, Connection, Row, params};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Movie,
    Series,
}

impl ContentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Movie => "movie",
            Self::Series => "series",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "movie" => Ok(Self::Movie),
            "series" => Ok(Self::Series),
            other => Err(anyhow!("unknown content kind: {other}")),
        }
    }
}

/// One episode row. `video_ref` is the stored stream reference, if any.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodeRecord {
    pub id: String,
    pub series_id: String,
    pub season: i64,
    pub episode: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_ref: Option<String>,
}

/// A movie or series together with its episodes (empty for movies).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentRecord {
    pub id: String,
    pub title: String,
    pub kind: ContentKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub episodes: Vec<EpisodeRecord>,
}

async fn configure_connection(conn: &Connection) -> Result<()> {
    // PRAGMA journal_mode returns a row, which libsql's execute/execute_batch
    // rejects ("Execute returned rows"), so it has to go through query().
    conn.query("PRAGMA journal_mode=WAL", ()).await?;
    conn.execute_batch(
        r#"
        PRAGMA synchronous=NORMAL;
        PRAGMA foreign_keys=ON;
        "#,
    )
    .await?;
    Ok(())
}

async fn ensure_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS contents (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            kind TEXT NOT NULL,
            video_ref TEXT
        );

        CREATE TABLE IF NOT EXISTS episodes (
            id TEXT PRIMARY KEY,
            series_id TEXT NOT NULL,
            season INTEGER NOT NULL,
            episode INTEGER NOT NULL,
            video_ref TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_episodes_series ON episodes(series_id);
        "#,
    )
    .await?;
    Ok(())
}

/// Writer half, used only by `catalog-admin` and tests. Serving paths never
/// mutate the catalog.
pub struct CatalogStore {
    conn: Connection,
}

impl CatalogStore {
    /// Opens (creating if necessary) the catalog DB and ensures the schema.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating catalog directory {}", parent.display()))?;
        }

        let db = Builder::new_local(path)
            .build()
            .await
            .with_context(|| format!("opening catalog DB {}", path.display()))?;
        let conn = db.connect()?;
        configure_connection(&conn).await?;
        ensure_schema(&conn).await?;
        Ok(Self { conn })
    }

    pub async fn upsert_content(
        &self,
        id: &str,
        title: &str,
        kind: ContentKind,
        video_ref: Option<&str>,
    ) -> Result<()> {
        self.conn
            .execute(
                r#"
                INSERT INTO contents (id, title, kind, video_ref)
                VALUES (:id, :title, :kind, :video_ref)
                ON CONFLICT(id) DO UPDATE SET
                    title = excluded.title,
                    kind = excluded.kind,
                    video_ref = excluded.video_ref
                "#,
                params![id, title, kind.as_str(), video_ref],
            )
            .await?;
        Ok(())
    }

    pub async fn upsert_episode(&self, episode: &EpisodeRecord) -> Result<()> {
        self.conn
            .execute(
                r#"
                INSERT INTO episodes (id, series_id, season, episode, video_ref)
                VALUES (:id, :series_id, :season, :episode, :video_ref)
                ON CONFLICT(id) DO UPDATE SET
                    series_id = excluded.series_id,
                    season = excluded.season,
                    episode = excluded.episode,
                    video_ref = excluded.video_ref
                "#,
                params![
                    episode.id.as_str(),
                    episode.series_id.as_str(),
                    episode.season,
                    episode.episode,
                    episode.video_ref.as_deref(),
                ],
            )
            .await?;
        Ok(())
    }
}

/// Cloneable reader injected into every handler.
#[derive(Clone)]
pub struct CatalogReader {
    conn: Connection,
}

impl CatalogReader {
    pub async fn new(path: impl AsRef<Path>) -> Result<Self> {
        let db = Builder::new_local(path.as_ref())
            .build()
            .await
            .with_context(|| format!("opening catalog DB {}", path.as_ref().display()))?;
        let conn = db.connect()?;
        configure_connection(&conn).await?;
        ensure_schema(&conn).await?;
        Ok(Self { conn })
    }

    /// Loads a content row and, for series, its episodes sorted by
    /// (season asc, episode asc).
    pub async fn get_content(&self, id: &str) -> Result<Option<ContentRecord>> {
        let mut stmt = self
            .conn
            .prepare(
                r#"
                SELECT id, title, kind, video_ref
                FROM contents
                WHERE id = ?1
                "#,
            )
            .await?;

        let mut rows = stmt.query([id]).await?;
        let Some(row) = rows.next().await? else {
            return Ok(None);
        };
        let mut record = row_to_content(&row)?;
        if record.kind == ContentKind::Series {
            record.episodes = self.episodes_for(id).await?;
        }
        Ok(Some(record))
    }

    pub async fn get_episode(&self, id: &str) -> Result<Option<EpisodeRecord>> {
        let mut stmt = self
            .conn
            .prepare(
                r#"
                SELECT id, series_id, season, episode, video_ref
                FROM episodes
                WHERE id = ?1
                "#,
            )
            .await?;

        let mut rows = stmt.query([id]).await?;
        if let Some(row) = rows.next().await? {
            Ok(Some(row_to_episode(&row)?))
        } else {
            Ok(None)
        }
    }

    async fn episodes_for(&self, series_id: &str) -> Result<Vec<EpisodeRecord>> {
        let mut stmt = self
            .conn
            .prepare(
                r#"
                SELECT id, series_id, season, episode, video_ref
                FROM episodes
                WHERE series_id = ?1
                ORDER BY season ASC, episode ASC
                "#,
            )
            .await?;

        let mut rows = stmt.query([series_id]).await?;
        let mut episodes = Vec::new();
        while let Some(row) = rows.next().await? {
            episodes.push(row_to_episode(&row)?);
        }
        Ok(episodes)
    }
}

fn row_to_content(row: &Row) -> Result<ContentRecord> {
    let kind: String = row.get(2)?;
    Ok(ContentRecord {
        id: row.get(0)?,
        title: row.get(1)?,
        kind: ContentKind::parse(&kind)?,
        video_ref: row.get(3)?,
        episodes: Vec::new(),
    })
}

fn row_to_episode(row: &Row) -> Result<EpisodeRecord> {
    Ok(EpisodeRecord {
        id: row.get(0)?,
        series_id: row.get(1)?,
        season: row.get(2)?,
        episode: row.get(3)?,
        video_ref: row.get(4)?,
    })
}
