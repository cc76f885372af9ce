use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub token: String,
    pub username: String,
}

#[derive(Clone, Default)]
pub struct SessionManager {
    sessions: Arc<Mutex<HashMap<String, SessionHandle>>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn open_session(&self, username: &str) -> String {
        let token = Uuid::new_v4().to_string();
        let handle = SessionHandle {
            token: token.clone(),
            username: username.to_string(),
        };

        let mut sessions = self.sessions.lock().await;
        sessions.insert(token.clone(), handle);

        token
    }

    pub async fn username(&self, token: &str) -> Option<String> {
        let sessions = self.sessions.lock().await;
        sessions.get(token).map(|entry| entry.username.clone())
    }

    pub async fn close_session(&self, token: &str) -> bool {
        let mut sessions = self.sessions.lock().await;
        sessions.remove(token).is_some()
    }

    pub async fn close_user_sessions(&self, username: &str) -> usize {
        let mut sessions = self.sessions.lock().await;
        let before = sessions.len();
        sessions.retain(|_, handle| handle.username != username);
        before - sessions.len()
    }
}
