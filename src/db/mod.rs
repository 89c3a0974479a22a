use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;

use crate::config::Config;
use crate::error::StoreError;
use crate::models::{NewProject, Project, ProjectId, ProjectStatus};

/// Schema upgrades, applied in order on open
static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Column list shared across queries
const COLUMNS: &str = "id, title, description, due_date, banner, question1, question2, files, links, status, created_at";

/// Durable local store of project records
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct ProjectRow {
    id: i64,
    title: String,
    description: String,
    due_date: Option<String>,
    banner: String,
    question1: String,
    question2: String,
    files: String,
    links: String,
    status: String,
    created_at: DateTime<Utc>,
}

impl ProjectRow {
    fn into_project(self) -> Result<Project, StoreError> {
        let id = self.id;
        let corrupt = |reason: String| StoreError::Corrupt { id, reason };

        let files: Vec<String> =
            serde_json::from_str(&self.files).map_err(|e| corrupt(format!("files: {e}")))?;
        let links: Vec<String> =
            serde_json::from_str(&self.links).map_err(|e| corrupt(format!("links: {e}")))?;
        let status = ProjectStatus::from_str(&self.status).map_err(corrupt)?;

        Ok(Project {
            id,
            title: self.title,
            description: self.description,
            due_date: self.due_date,
            banner: self.banner,
            question1: self.question1,
            question2: self.question2,
            files,
            links,
            status,
            created_at: self.created_at,
        })
    }
}

impl Database {
    /// Open (creating if absent) the store and bring its schema up to date
    pub async fn new(config: &Config) -> Result<Self, StoreError> {
        let url = config.database_url();
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| StoreError::Unavailable(format!("invalid database url '{url}': {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        // Every connection to :memory: is a separate database, so keep exactly one alive
        let in_memory = url.contains(":memory:");
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None::<Duration>)
                .max_lifetime(None::<Duration>)
        } else {
            SqlitePoolOptions::new().max_connections(config.database_max_connections.max(1))
        };

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Unavailable(format!("could not open '{url}': {e}")))?;

        MIGRATOR
            .run(&pool)
            .await
            .map_err(|e| StoreError::Unavailable(format!("schema upgrade failed: {e}")))?;

        let db = Self { pool };
        let version = db.schema_version().await?;
        tracing::info!(url, version, "project store ready");

        Ok(db)
    }

    /// Get a reference to the connection pool
    pub fn get_pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Latest schema version applied to the store
    pub async fn schema_version(&self) -> Result<i64, StoreError> {
        let version = sqlx::query_scalar::<_, i64>(
            "SELECT COALESCE(MAX(version), 0) FROM _sqlx_migrations WHERE success = 1",
        )
        .fetch_one(self.get_pool())
        .await?;

        Ok(version)
    }

    /// Store a new record, returning the id assigned to it
    pub async fn add_project(&self, project: &NewProject) -> Result<ProjectId, StoreError> {
        let files = serde_json::to_string(&project.files)?;
        let links = serde_json::to_string(&project.links)?;

        let result = sqlx::query(
            r#"
            INSERT INTO projects (title, description, due_date, banner, question1, question2, files, links, status, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&project.title)
        .bind(&project.description)
        .bind(&project.due_date)
        .bind(&project.banner)
        .bind(&project.question1)
        .bind(&project.question2)
        .bind(files)
        .bind(links)
        .bind(project.status.as_str())
        .bind(project.created_at)
        .execute(self.get_pool())
        .await?;

        let id = result.last_insert_rowid();
        tracing::info!(id, files = project.files.len(), "project added");

        Ok(id)
    }

    /// Look up a record; `None` when no project has this id
    pub async fn get_project(&self, id: ProjectId) -> Result<Option<Project>, StoreError> {
        let query = format!("SELECT {COLUMNS} FROM projects WHERE id = ?");
        let row = sqlx::query_as::<_, ProjectRow>(&query)
            .bind(id)
            .fetch_optional(self.get_pool())
            .await?;

        row.map(ProjectRow::into_project).transpose()
    }

    /// Every stored record. Callers sort and partition for themselves.
    pub async fn get_all_projects(&self) -> Result<Vec<Project>, StoreError> {
        let query = format!("SELECT {COLUMNS} FROM projects ORDER BY id ASC");
        let rows = sqlx::query_as::<_, ProjectRow>(&query)
            .fetch_all(self.get_pool())
            .await?;

        rows.into_iter().map(ProjectRow::into_project).collect()
    }

    /// Replace the stored record with the same id.
    ///
    /// Fails with [`StoreError::NotFound`] when there is nothing to replace.
    /// `created_at` is fixed at insert and never rewritten. Status changes are
    /// taken as given; callers own the lifecycle rules.
    pub async fn update_project(&self, project: &Project) -> Result<(), StoreError> {
        let files = serde_json::to_string(&project.files)?;
        let links = serde_json::to_string(&project.links)?;

        let result = sqlx::query(
            r#"
            UPDATE projects
            SET title = ?, description = ?, due_date = ?, banner = ?, question1 = ?,
                question2 = ?, files = ?, links = ?, status = ?
            WHERE id = ?
            "#,
        )
        .bind(&project.title)
        .bind(&project.description)
        .bind(&project.due_date)
        .bind(&project.banner)
        .bind(&project.question1)
        .bind(&project.question2)
        .bind(files)
        .bind(links)
        .bind(project.status.as_str())
        .bind(project.id)
        .execute(self.get_pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(project.id));
        }
        tracing::info!(id = project.id, status = %project.status, "project updated");

        Ok(())
    }

    /// Remove a record. Deleting an unknown id is not an error.
    pub async fn delete_project(&self, id: ProjectId) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM projects WHERE id = ?")
            .bind(id)
            .execute(self.get_pool())
            .await?;

        tracing::info!(id, removed = result.rows_affected() > 0, "project deleted");

        Ok(())
    }

    /// Close every pooled connection
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Initialize the project store
pub async fn init(config: &Config) -> Result<Database, StoreError> {
    Database::new(config).await
}
