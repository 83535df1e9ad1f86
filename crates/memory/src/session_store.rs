//! Session persistence: one JSON file per session under
//! `.llmcode/sessions/<id>.json`.

use std::path::{Path, PathBuf};

use llmcode_core::{Session, StoreError};
use tracing::debug;

use crate::persist::write_atomic;

pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    pub fn new(state_dir: &Path) -> Self {
        Self {
            dir: state_dir.join("sessions"),
        }
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    pub async fn save(&self, session: &Session) -> Result<(), StoreError> {
        let body = serde_json::to_vec_pretty(session)
            .map_err(|e| StoreError::Storage(format!("serialize session: {e}")))?;
        write_atomic(&self.path_for(&session.id.0), &body).await?;
        debug!(session = %session.id, turns = session.history.len(), "Session saved");
        Ok(())
    }

    pub async fn load(&self, id: &str) -> Result<Session, StoreError> {
        let path = self.path_for(id);
        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| StoreError::Storage(format!("read {}: {e}", path.display())))?;
        serde_json::from_str(&content).map_err(|e| StoreError::Corrupt {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    /// The most recently updated session, if any.
    pub async fn latest(&self) -> Result<Option<Session>, StoreError> {
        let mut latest: Option<Session> = None;
        for id in self.list().await? {
            let session = match self.load(&id).await {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!(id, error = %e, "Skipping unreadable session");
                    continue;
                }
            };
            if latest.as_ref().is_none_or(|l| session.updated_at > l.updated_at) {
                latest = Some(session);
            }
        }
        Ok(latest)
    }

    /// Ids of all stored sessions.
    pub async fn list(&self) -> Result<Vec<String>, StoreError> {
        let mut ids = Vec::new();
        let mut dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ids),
            Err(e) => return Err(StoreError::Storage(e.to_string())),
        };
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| StoreError::Storage(e.to_string()))?
        {
            let path = entry.path();
            if path.extension().is_some_and(|e| e == "json")
                && let Some(stem) = path.file_stem()
            {
                ids.push(stem.to_string_lossy().into_owned());
            }
        }
        ids.sort();
        Ok(ids)
    }

    pub async fn clear(&self) -> Result<(), StoreError> {
        match tokio::fs::remove_dir_all(&self.dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Storage(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use llmcode_core::{ConversationTurn, SessionConfig};

    #[tokio::test]
    async fn save_load_latest() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        assert!(store.latest().await.unwrap().is_none());

        let mut older = Session::new(dir.path(), SessionConfig::new("m"));
        older.push(ConversationTurn::user("first"));
        store.save(&older).await.unwrap();

        let mut newer = Session::new(dir.path(), SessionConfig::new("m"));
        newer.push(ConversationTurn::user("second"));
        store.save(&newer).await.unwrap();

        let loaded = store.load(&older.id.0).await.unwrap();
        assert_eq!(loaded.last_user_message(), Some("first"));

        let latest = store.latest().await.unwrap().unwrap();
        assert_eq!(latest.id, newer.id);
        assert_eq!(store.list().await.unwrap().len(), 2);

        store.clear().await.unwrap();
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn corrupt_session_reported() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        std::fs::create_dir_all(dir.path().join("sessions")).unwrap();
        std::fs::write(dir.path().join("sessions/bad.json"), "{").unwrap();
        assert!(matches!(
            store.load("bad").await.unwrap_err(),
            StoreError::Corrupt { .. }
        ));
        assert!(store.latest().await.unwrap().is_none());
    }
}
