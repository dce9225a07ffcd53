use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::info;

use crate::core::models::session::{
    Session, SessionDisplayInfo, SessionInsights, SessionType,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("session not found")]
    NotFound,
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// SQLite-backed session persistence. A single `sessions` table with JSON
/// columns for the nested structures.
pub struct Storage {
    db: Arc<Mutex<Connection>>,
}

impl Storage {
    pub fn open(db_path: &Path) -> StoreResult<Self> {
        let db = Connection::open(db_path)?;
        Self::from_connection(db)
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(db: Connection) -> StoreResult<Self> {
        db.execute_batch(
            "CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                working_dir TEXT NOT NULL,
                name TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                extension_data TEXT NOT NULL DEFAULT '{}',
                message_count INTEGER NOT NULL DEFAULT 0,
                conversation TEXT NOT NULL DEFAULT '[]',
                input_tokens INTEGER,
                output_tokens INTEGER,
                total_tokens INTEGER,
                accumulated_input_tokens INTEGER,
                accumulated_output_tokens INTEGER,
                accumulated_total_tokens INTEGER,
                provider_name TEXT,
                model_config TEXT,
                recipe TEXT,
                schedule_id TEXT,
                session_type TEXT DEFAULT 'user',
                user_recipe_values TEXT,
                user_set_name INTEGER DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_sessions_created_at
                ON sessions(created_at DESC);
            CREATE INDEX IF NOT EXISTS idx_sessions_schedule_id
                ON sessions(schedule_id);",
        )?;
        info!("Session storage ready");
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }

    pub async fn create(&self, session: &Session) -> StoreResult<()> {
        let extension_data = serde_json::to_string(&session.extension_data)?;
        let conversation = serde_json::to_string(&session.conversation)?;
        let model_config = serde_json::to_string(&session.model_config)?;
        let recipe = serde_json::to_string(&session.recipe)?;
        let user_recipe_values = serde_json::to_string(&session.user_recipe_values)?;

        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO sessions (
                id, working_dir, name, created_at, updated_at, extension_data,
                message_count, conversation, input_tokens, output_tokens, total_tokens,
                accumulated_input_tokens, accumulated_output_tokens, accumulated_total_tokens,
                provider_name, model_config, recipe, schedule_id, session_type,
                user_recipe_values, user_set_name
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
                      ?15, ?16, ?17, ?18, ?19, ?20, ?21)",
            params![
                session.id,
                session.working_dir,
                session.name,
                session.created_at,
                session.updated_at,
                extension_data,
                session.message_count as i64,
                conversation,
                session.input_tokens,
                session.output_tokens,
                session.total_tokens,
                session.accumulated_input_tokens,
                session.accumulated_output_tokens,
                session.accumulated_total_tokens,
                session.provider_name,
                model_config,
                recipe,
                session.schedule_id,
                session.session_type.map(|t| t.as_str()),
                user_recipe_values,
                session.user_set_name,
            ],
        )?;
        Ok(())
    }

    pub async fn get(
        &self,
        id: &str,
        include_conversation: bool,
    ) -> StoreResult<Option<Session>> {
        let db = self.db.lock().await;
        let session = db
            .query_row(
                "SELECT id, working_dir, name, created_at, updated_at, extension_data,
                        message_count, conversation, input_tokens, output_tokens,
                        total_tokens, accumulated_input_tokens, accumulated_output_tokens,
                        accumulated_total_tokens, provider_name, model_config, recipe,
                        schedule_id, session_type, user_recipe_values, user_set_name
                 FROM sessions WHERE id = ?1",
                params![id],
                |row| row_to_session(row, include_conversation),
            )
            .optional()?;
        Ok(session)
    }

    /// Non-hidden sessions ordered by `updated_at desc`; the conversation
    /// column is never decoded here.
    pub async fn list(&self) -> StoreResult<Vec<Session>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT id, working_dir, name, created_at, updated_at, extension_data,
                    message_count, conversation, input_tokens, output_tokens,
                    total_tokens, accumulated_input_tokens, accumulated_output_tokens,
                    accumulated_total_tokens, provider_name, model_config, recipe,
                    schedule_id, session_type, user_recipe_values, user_set_name
             FROM sessions
             WHERE session_type != 'hidden' OR session_type IS NULL
             ORDER BY updated_at DESC",
        )?;
        let rows = stmt.query_map([], |row| row_to_session(row, false))?;

        let mut sessions = Vec::new();
        for row in rows {
            sessions.push(row?);
        }
        Ok(sessions)
    }

    /// Full-row overwrite. Sets `updated_at` to now; fails with `NotFound`
    /// when the row does not exist.
    pub async fn update(&self, session: &mut Session) -> StoreResult<()> {
        let extension_data = serde_json::to_string(&session.extension_data)?;
        let conversation = serde_json::to_string(&session.conversation)?;
        let model_config = serde_json::to_string(&session.model_config)?;
        let recipe = serde_json::to_string(&session.recipe)?;
        let user_recipe_values = serde_json::to_string(&session.user_recipe_values)?;

        session.updated_at = Utc::now();

        let db = self.db.lock().await;
        let affected = db.execute(
            "UPDATE sessions SET
                working_dir = ?1, name = ?2, updated_at = ?3, extension_data = ?4,
                message_count = ?5, conversation = ?6, input_tokens = ?7,
                output_tokens = ?8, total_tokens = ?9, accumulated_input_tokens = ?10,
                accumulated_output_tokens = ?11, accumulated_total_tokens = ?12,
                provider_name = ?13, model_config = ?14, recipe = ?15,
                schedule_id = ?16, session_type = ?17, user_recipe_values = ?18,
                user_set_name = ?19
             WHERE id = ?20",
            params![
                session.working_dir,
                session.name,
                session.updated_at,
                extension_data,
                session.message_count as i64,
                conversation,
                session.input_tokens,
                session.output_tokens,
                session.total_tokens,
                session.accumulated_input_tokens,
                session.accumulated_output_tokens,
                session.accumulated_total_tokens,
                session.provider_name,
                model_config,
                recipe,
                session.schedule_id,
                session.session_type.map(|t| t.as_str()),
                user_recipe_values,
                session.user_set_name,
                session.id,
            ],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    pub async fn delete(&self, id: &str) -> StoreResult<()> {
        let db = self.db.lock().await;
        let affected = db.execute("DELETE FROM sessions WHERE id = ?1", params![id])?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// Atomic single-column rename that also marks the name as user-set and
    /// touches `updated_at`.
    pub async fn update_name(&self, id: &str, name: &str) -> StoreResult<DateTime<Utc>> {
        let now = Utc::now();
        let db = self.db.lock().await;
        let affected = db.execute(
            "UPDATE sessions SET name = ?1, user_set_name = 1, updated_at = ?2 WHERE id = ?3",
            params![name, now, id],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(now)
    }

    pub async fn get_insights(&self) -> StoreResult<SessionInsights> {
        let db = self.db.lock().await;
        let (total_sessions, total_tokens) = db.query_row(
            "SELECT COUNT(*), COALESCE(SUM(accumulated_total_tokens), 0)
             FROM sessions
             WHERE session_type != 'hidden' OR session_type IS NULL",
            [],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
        )?;
        Ok(SessionInsights {
            total_sessions: total_sessions as u64,
            total_tokens,
        })
    }

    pub async fn get_by_schedule_id(
        &self,
        schedule_id: &str,
        limit: usize,
    ) -> StoreResult<Vec<SessionDisplayInfo>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT id, name, created_at, working_dir, message_count,
                    input_tokens, output_tokens, total_tokens,
                    accumulated_input_tokens, accumulated_output_tokens,
                    accumulated_total_tokens, schedule_id
             FROM sessions
             WHERE schedule_id = ?1
             ORDER BY created_at DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![schedule_id, limit as i64], |row| {
            let created_at: DateTime<Utc> = row.get(2)?;
            Ok(SessionDisplayInfo {
                id: row.get(0)?,
                name: row.get(1)?,
                created_at: created_at.to_rfc3339(),
                working_dir: row.get(3)?,
                message_count: row.get::<_, i64>(4)? as u64,
                input_tokens: row.get(5)?,
                output_tokens: row.get(6)?,
                total_tokens: row.get(7)?,
                accumulated_input_tokens: row.get(8)?,
                accumulated_output_tokens: row.get(9)?,
                accumulated_total_tokens: row.get(10)?,
                schedule_id: row.get(11)?,
            })
        })?;

        let mut sessions = Vec::new();
        for row in rows {
            sessions.push(row?);
        }
        Ok(sessions)
    }
}

fn row_to_session(row: &Row<'_>, include_conversation: bool) -> rusqlite::Result<Session> {
    let extension_data: String = row.get(5)?;
    let conversation: Option<String> = if include_conversation {
        Some(row.get(7)?)
    } else {
        None
    };
    let model_config: Option<String> = row.get(15)?;
    let recipe: Option<String> = row.get(16)?;
    let session_type: Option<String> = row.get(18)?;
    let user_recipe_values: Option<String> = row.get(19)?;

    Ok(Session {
        id: row.get(0)?,
        working_dir: row.get(1)?,
        name: row.get(2)?,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
        extension_data: serde_json::from_str(&extension_data).unwrap_or_default(),
        message_count: row.get::<_, i64>(6)? as u64,
        conversation: conversation
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default(),
        input_tokens: row.get(8)?,
        output_tokens: row.get(9)?,
        total_tokens: row.get(10)?,
        accumulated_input_tokens: row.get(11)?,
        accumulated_output_tokens: row.get(12)?,
        accumulated_total_tokens: row.get(13)?,
        provider_name: row.get(14)?,
        model_config: model_config.and_then(|raw| serde_json::from_str(&raw).ok()),
        recipe: recipe.and_then(|raw| serde_json::from_str(&raw).ok()),
        schedule_id: row.get(17)?,
        session_type: session_type.as_deref().and_then(SessionType::parse),
        user_recipe_values: user_recipe_values
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default(),
        user_set_name: row.get::<_, i64>(20).unwrap_or(0) == 1,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::message::Message;

    #[tokio::test]
    async fn create_get_round_trip() {
        let storage = Storage::open_in_memory().unwrap();
        let mut session = Session::new("/tmp/w");
        session.conversation.push(Message::user("hello"));
        session.message_count = 1;
        storage.create(&session).await.unwrap();

        let loaded = storage.get(&session.id, true).await.unwrap().unwrap();
        assert_eq!(loaded.id, session.id);
        assert_eq!(loaded.conversation.len(), 1);
        assert_eq!(loaded.message_count, 1);

        let slim = storage.get(&session.id, false).await.unwrap().unwrap();
        assert!(slim.conversation.is_empty());
        assert_eq!(slim.message_count, 1);
    }

    #[tokio::test]
    async fn missing_session_is_none_not_error() {
        let storage = Storage::open_in_memory().unwrap();
        assert!(storage.get("nope", true).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_touches_updated_at_and_requires_row() {
        let storage = Storage::open_in_memory().unwrap();
        let mut session = Session::new("/tmp/w");
        storage.create(&session).await.unwrap();

        let before = session.updated_at;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        session.name = "renamed".into();
        storage.update(&mut session).await.unwrap();
        assert!(session.updated_at > before);

        let mut ghost = Session::new("/tmp/w");
        assert!(matches!(
            storage.update(&mut ghost).await,
            Err(StoreError::NotFound)
        ));
    }

    #[tokio::test]
    async fn delete_reports_not_found() {
        let storage = Storage::open_in_memory().unwrap();
        assert!(matches!(
            storage.delete("ghost").await,
            Err(StoreError::NotFound)
        ));
    }

    #[tokio::test]
    async fn list_excludes_hidden_and_orders_by_updated_at() {
        let storage = Storage::open_in_memory().unwrap();

        let mut old = Session::new("/tmp/a");
        old.name = "old".into();
        storage.create(&old).await.unwrap();

        let mut hidden = Session::new("/tmp/b");
        hidden.session_type = Some(SessionType::Hidden);
        storage.create(&hidden).await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let mut fresh = Session::new("/tmp/c");
        fresh.name = "fresh".into();
        storage.create(&fresh).await.unwrap();

        let listed = storage.list().await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].name, "fresh");
        assert_eq!(listed[1].name, "old");

        // Hidden sessions stay addressable by id.
        assert!(storage.get(&hidden.id, false).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn insights_sum_over_non_hidden() {
        let storage = Storage::open_in_memory().unwrap();
        let mut a = Session::new("/tmp/a");
        a.accumulated_total_tokens = Some(10);
        storage.create(&a).await.unwrap();
        let mut b = Session::new("/tmp/b");
        b.accumulated_total_tokens = Some(5);
        b.session_type = Some(SessionType::Hidden);
        storage.create(&b).await.unwrap();

        let insights = storage.get_insights().await.unwrap();
        assert_eq!(insights.total_sessions, 1);
        assert_eq!(insights.total_tokens, 10);
    }

    #[tokio::test]
    async fn schedule_sessions_are_limited_and_ordered() {
        let storage = Storage::open_in_memory().unwrap();
        for i in 0..3i64 {
            let mut s = Session::new("/tmp/w");
            s.name = format!("run-{}", i);
            s.schedule_id = Some("job-1".into());
            s.created_at = Utc::now() + chrono::Duration::seconds(i);
            storage.create(&s).await.unwrap();
        }
        let rows = storage.get_by_schedule_id("job-1", 2).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].name, "run-2");
    }
}
