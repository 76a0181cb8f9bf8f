use crate::aggregation::BreakdownCache;
use crate::calendar::DateKeyResolver;
use crate::config::Settings;
use crate::errors::DiaryError;
use crate::roles::RoleRegistry;
use crate::session::{Session, SessionRegistry};
use crate::storage::DiaryStore;
use axum::http::HeaderMap;
use std::sync::Arc;

pub const IDENTITY_HEADER: &str = "x-diary-user";

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub registry: Arc<RoleRegistry>,
    pub resolver: DateKeyResolver,
    pub store: DiaryStore,
    pub sessions: SessionRegistry,
    pub breakdowns: Arc<BreakdownCache>,
}

impl AppState {
    pub fn new(settings: Settings, store: DiaryStore) -> Result<Self, DiaryError> {
        let registry = settings.registry()?;
        let resolver = DateKeyResolver::new(settings.time_zone, settings.late_night_cutoff_hour);
        Ok(Self {
            settings: Arc::new(settings),
            registry: Arc::new(registry),
            resolver,
            store,
            sessions: SessionRegistry::new(),
            breakdowns: Arc::new(BreakdownCache::new()),
        })
    }

    pub fn time_zone_name(&self) -> &'static str {
        self.resolver.time_zone().name()
    }

    pub fn identity(headers: &HeaderMap) -> Result<String, DiaryError> {
        headers
            .get(IDENTITY_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .ok_or(DiaryError::Unauthenticated)
    }

    /// The signed-in session behind a request.
    pub async fn caller(&self, headers: &HeaderMap) -> Result<Session, DiaryError> {
        let identity = Self::identity(headers)?;
        self.sessions.get(&identity).await
    }
}
