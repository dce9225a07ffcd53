mod storage;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

pub use storage::{StoreError, StoreResult, Storage};

use crate::core::models::session::{
    Session, SessionDisplayInfo, SessionInsights,
};
use crate::core::models::Role;

/// Session lifecycle manager: storage plus a read-through cache of sessions
/// that were fetched with their conversation.
pub struct Manager {
    storage: Storage,
    cache: Arc<RwLock<HashMap<String, Session>>>,
}

impl Manager {
    pub fn new(db_path: &Path) -> StoreResult<Self> {
        Ok(Self {
            storage: Storage::open(db_path)?,
            cache: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    #[cfg(test)]
    pub fn in_memory() -> StoreResult<Self> {
        Ok(Self {
            storage: Storage::open_in_memory()?,
            cache: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    pub async fn create(&self, working_dir: &str) -> StoreResult<Session> {
        let session = Session::new(working_dir);
        self.storage.create(&session).await?;
        self.cache
            .write()
            .await
            .insert(session.id.clone(), session.clone());
        Ok(session)
    }

    /// Insert a pre-built session (import, scheduled runs, forks).
    pub async fn insert(&self, session: &Session) -> StoreResult<()> {
        self.storage.create(session).await?;
        self.cache
            .write()
            .await
            .insert(session.id.clone(), session.clone());
        Ok(())
    }

    /// Fetch by id. `include_conversation = false` bypasses the cache both
    /// ways so the conversation column is never decoded for it.
    pub async fn get(
        &self,
        id: &str,
        include_conversation: bool,
    ) -> StoreResult<Option<Session>> {
        if !include_conversation {
            return self.storage.get(id, false).await;
        }

        if let Some(cached) = self.cache.read().await.get(id) {
            debug!(session_id = %id, "session cache hit");
            return Ok(Some(cached.clone()));
        }

        let session = self.storage.get(id, true).await?;
        if let Some(session) = &session {
            self.cache
                .write()
                .await
                .insert(session.id.clone(), session.clone());
        }
        Ok(session)
    }

    pub async fn list(&self) -> StoreResult<Vec<Session>> {
        self.storage.list().await
    }

    pub async fn update(&self, session: &mut Session) -> StoreResult<()> {
        self.storage.update(session).await?;
        self.cache
            .write()
            .await
            .insert(session.id.clone(), session.clone());
        Ok(())
    }

    pub async fn delete(&self, id: &str) -> StoreResult<()> {
        self.storage.delete(id).await?;
        self.cache.write().await.remove(id);
        Ok(())
    }

    pub async fn update_name(&self, id: &str, name: &str) -> StoreResult<()> {
        let updated_at = self.storage.update_name(id, name).await?;
        if let Some(cached) = self.cache.write().await.get_mut(id) {
            cached.name = name.to_string();
            cached.user_set_name = true;
            cached.updated_at = updated_at;
        }
        Ok(())
    }

    pub async fn get_insights(&self) -> StoreResult<SessionInsights> {
        self.storage.get_insights().await
    }

    pub async fn get_by_schedule_id(
        &self,
        schedule_id: &str,
        limit: usize,
    ) -> StoreResult<Vec<SessionDisplayInfo>> {
        self.storage.get_by_schedule_id(schedule_id, limit).await
    }

    /// Render a session as readable text for `GET /sessions/:id/export`.
    pub async fn export(&self, id: &str) -> StoreResult<String> {
        let session = self.get(id, true).await?.ok_or(StoreError::NotFound)?;

        let mut out = format!("# Session: {}\n\n", session.name);
        out.push_str(&format!(
            "Created: {}\n",
            session.created_at.format("%Y-%m-%d %H:%M:%S")
        ));
        out.push_str(&format!("Working Directory: {}\n\n---\n\n", session.working_dir));

        for msg in &session.conversation {
            let role = match msg.role {
                Role::User => "User",
                Role::Assistant => "Assistant",
            };
            out.push_str(&format!("## {}\n\n", role));
            for part in &msg.content {
                match part {
                    crate::core::models::MessageContent::Text(t) => {
                        out.push_str(&t.text);
                        out.push_str("\n\n");
                    }
                    crate::core::models::MessageContent::ToolRequest(r) => {
                        out.push_str(&format!("*Tool Request: {}*\n\n", r.id));
                    }
                    crate::core::models::MessageContent::ToolResponse(_) => {
                        out.push_str("*Tool Response*\n\n");
                    }
                    _ => {}
                }
            }
        }
        Ok(out)
    }

    /// Import a session from its JSON export. The id is regenerated to avoid
    /// collisions; name, conversation and extension data carry over.
    pub async fn import(&self, json: &str) -> StoreResult<Session> {
        let imported: Session = serde_json::from_str(json)?;

        let mut session = Session::new(&imported.working_dir);
        session.name = imported.name;
        session.conversation = imported.conversation;
        session.message_count = session.conversation.len() as u64;
        session.extension_data = imported.extension_data;

        self.insert(&session).await?;
        Ok(session)
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::message::Message;

    #[tokio::test]
    async fn slim_get_bypasses_cache() {
        let manager = Manager::in_memory().unwrap();
        let created = manager.create("/tmp/w").await.unwrap();

        // Warm the cache, then mutate the row behind the manager's back.
        manager.get(&created.id, true).await.unwrap();
        let mut direct = manager
            .storage
            .get(&created.id, true)
            .await
            .unwrap()
            .unwrap();
        direct.name = "behind the cache".into();
        manager.storage.update(&mut direct).await.unwrap();

        // A conversationless read must reflect storage, not the cache.
        let slim = manager.get(&created.id, false).await.unwrap().unwrap();
        assert_eq!(slim.name, "behind the cache");

        // The cached full read still serves the cached copy.
        let full = manager.get(&created.id, true).await.unwrap().unwrap();
        assert_eq!(full.name, "New Session");
    }

    #[tokio::test]
    async fn update_name_updates_cache() {
        let manager = Manager::in_memory().unwrap();
        let created = manager.create("/tmp/w").await.unwrap();
        manager.get(&created.id, true).await.unwrap();

        manager.update_name(&created.id, "my chat").await.unwrap();
        let cached = manager.get(&created.id, true).await.unwrap().unwrap();
        assert_eq!(cached.name, "my chat");
        assert!(cached.user_set_name);
    }

    #[tokio::test]
    async fn delete_evicts_cache() {
        let manager = Manager::in_memory().unwrap();
        let created = manager.create("/tmp/w").await.unwrap();
        manager.get(&created.id, true).await.unwrap();
        manager.delete(&created.id).await.unwrap();
        assert!(manager.get(&created.id, true).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn import_regenerates_id() {
        let manager = Manager::in_memory().unwrap();
        let mut original = Session::new("/tmp/w");
        original.name = "imported".into();
        original.conversation.push(Message::user("hi"));
        original.message_count = 1;

        let json = serde_json::to_string(&original).unwrap();
        let imported = manager.import(&json).await.unwrap();
        assert_ne!(imported.id, original.id);
        assert_eq!(imported.name, "imported");
        assert_eq!(imported.message_count, 1);
    }
}
