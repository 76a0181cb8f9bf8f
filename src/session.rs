//! Signed-in sessions. Created on sign-in, dropped on sign-out together with
//! their change subscription.

use crate::calendar::{DateInfo, parse_day_key};
use crate::errors::DiaryError;
use crate::feed::Subscription;
use crate::roles::UserProfile;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::info;

#[derive(Debug, Clone)]
pub struct Session {
    pub profile: UserProfile,
    pub today: DateInfo,
    pub active_day_key: String,
    subscription: Arc<Mutex<Subscription>>,
}

impl Session {
    pub fn subscription(&self) -> Arc<Mutex<Subscription>> {
        Arc::clone(&self.subscription)
    }
}

#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<String, Session>>>,
}

fn session_key(identity: &str) -> String {
    identity.trim().to_ascii_lowercase()
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts (or restarts) the session for `profile` with today as the active day.
    pub async fn sign_in(
        &self,
        profile: UserProfile,
        today: DateInfo,
        subscription: Subscription,
    ) -> Session {
        let session = Session {
            active_day_key: today.day_key.clone(),
            profile,
            today,
            subscription: Arc::new(Mutex::new(subscription)),
        };
        let mut sessions = self.sessions.write().await;
        sessions.insert(session_key(&session.profile.identity), session.clone());
        info!(identity = %session.profile.identity, role = %session.profile.role, "signed in");
        session
    }

    /// Ends the session. Returns whether one existed.
    pub async fn sign_out(&self, identity: &str) -> bool {
        let removed = self.sessions.write().await.remove(&session_key(identity));
        let Some(session) = removed else {
            return false;
        };
        info!(identity = %session.profile.identity, "signed out");
        // A long-poll still in flight keeps its own handle and drops it when done.
        if let Ok(subscription) = Arc::try_unwrap(session.subscription) {
            subscription.into_inner().unsubscribe();
        }
        true
    }

    pub async fn get(&self, identity: &str) -> Result<Session, DiaryError> {
        self.sessions
            .read()
            .await
            .get(&session_key(identity))
            .cloned()
            .ok_or(DiaryError::Unauthenticated)
    }

    pub async fn set_active_day(
        &self,
        identity: &str,
        day_key: &str,
    ) -> Result<Session, DiaryError> {
        parse_day_key(day_key)?;
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(&session_key(identity))
            .ok_or(DiaryError::Unauthenticated)?;
        session.active_day_key = day_key.to_string();
        Ok(session.clone())
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}
