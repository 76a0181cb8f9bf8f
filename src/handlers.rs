use crate::agreements;
use crate::aggregation::score_label;
use crate::calendar::{self, DateInfo};
use crate::errors::{AppError, DiaryError};
use crate::feed::ChangeEvent;
use crate::models::{
    ActiveDayRequest, Agreement, AgreementRequest, ChangesQuery, DayRecord, DayView, Entry,
    EntryRequest, EntryView, HistoryItem, HistoryPage, HistoryQuery, MAX_NOTE_CHARS, MAX_SCORE,
    MIN_SCORE, PinRequest, ReorderRequest, SessionResponse, SignInRequest, StatsResponse,
    WeeklyComment, WeeklyCommentRequest,
};
use crate::session::Session;
use crate::state::AppState;
use crate::stats::{build_stats_at, format_average};
use crate::weekly::{
    WeeklySummaryInput, build_weekly_summary_input, summary_range, truncate_comment,
};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use std::time::Duration;
use tokio::time::{Instant, timeout_at};
use tracing::info;

const DEFAULT_POLL_SECS: u64 = 25;
const MAX_POLL_SECS: u64 = 60;
const MAX_HISTORY_PAGE: usize = 100;
const WEEKLY_COMMENTS_SHOWN: usize = 8;

fn session_response(session: &Session) -> SessionResponse {
    SessionResponse {
        identity: session.profile.identity.clone(),
        display_name: session.profile.display_name.clone(),
        role: session.profile.role,
        today_key: session.today.day_key.clone(),
        active_day_key: session.active_day_key.clone(),
        display_label: session.today.display_label.clone(),
        is_late_night: session.today.is_late_night,
    }
}

fn day_view(state: &AppState, record: DayRecord, entries: Vec<Entry>) -> DayView {
    let today = state.resolver.resolve_now();
    DayView {
        is_today: record.day_key == today.day_key,
        entries: entries
            .into_iter()
            .map(|entry| EntryView {
                author: state.registry.label_for(entry.role).to_string(),
                score_label: entry.score.and_then(score_label).map(str::to_string),
                role: entry.role,
                score: entry.score,
                note: entry.note,
                updated_at: entry.updated_at,
            })
            .collect(),
        record,
    }
}

/// Keys for a requested day; only today and earlier can be opened.
fn requested_day(state: &AppState, day_key: &str) -> Result<DateInfo, DiaryError> {
    state
        .resolver
        .for_day_key_until(day_key, &state.resolver.resolve_now())
}

async fn open_day(state: &AppState, info: &DateInfo) -> Result<DayView, DiaryError> {
    let record = state.store.ensure_day(info, state.time_zone_name()).await?;
    let entries = state.store.entries_for_day(&info.day_key).await?;
    Ok(day_view(state, record, entries))
}

async fn seed_agreements_if_empty(state: &AppState, identity: &str) -> Result<(), DiaryError> {
    let empty = agreements::list_active(&state.store.read().await.agreements).is_empty();
    if !empty {
        return Ok(());
    }
    let now = Utc::now();
    let created = state
        .store
        .write(|data| Ok(agreements::seed_defaults(data, identity, now)))
        .await?;
    if created > 0 {
        info!(created, "seeded default agreements");
        state.store.feed().publish(ChangeEvent::AgreementsChanged);
    }
    Ok(())
}

pub async fn sign_in(
    State(state): State<AppState>,
    Json(payload): Json<SignInRequest>,
) -> Result<Json<SessionResponse>, AppError> {
    let profile = state
        .registry
        .profile_of(&payload.identity)
        .cloned()
        .ok_or_else(|| DiaryError::PermissionDenied("not an allowed account".into()))?;

    let today = state.resolver.resolve_now();
    state.store.ensure_day(&today, state.time_zone_name()).await?;
    let session = state
        .sessions
        .sign_in(profile, today, state.store.feed().subscribe())
        .await;
    seed_agreements_if_empty(&state, &session.profile.identity).await?;

    Ok(Json(session_response(&session)))
}

pub async fn sign_out(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<StatusCode, AppError> {
    let identity = AppState::identity(&headers)?;
    if !state.sessions.sign_out(&identity).await {
        return Err(DiaryError::Unauthenticated.into());
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn set_active_day(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<ActiveDayRequest>,
) -> Result<Json<DayView>, AppError> {
    let caller = state.caller(&headers).await?;
    let info = requested_day(&state, &payload.day_key)?;
    let view = open_day(&state, &info).await?;
    state
        .sessions
        .set_active_day(&caller.profile.identity, &info.day_key)
        .await?;
    Ok(Json(view))
}

pub async fn get_today(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<DayView>, AppError> {
    state.caller(&headers).await?;
    let today = state.resolver.resolve_now();
    Ok(Json(open_day(&state, &today).await?))
}

pub async fn get_day(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(day_key): Path<String>,
) -> Result<Json<DayView>, AppError> {
    state.caller(&headers).await?;
    let info = requested_day(&state, &day_key)?;
    Ok(Json(open_day(&state, &info).await?))
}

pub async fn put_entry(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(day_key): Path<String>,
    Json(payload): Json<EntryRequest>,
) -> Result<Json<DayView>, AppError> {
    let caller = state.caller(&headers).await?;
    if !(MIN_SCORE..=MAX_SCORE).contains(&payload.score) {
        return Err(AppError::bad_request(format!(
            "score must be between {MIN_SCORE} and {MAX_SCORE}"
        )));
    }
    let note = payload.note.trim().to_string();
    if note.chars().count() > MAX_NOTE_CHARS {
        return Err(AppError::bad_request(format!(
            "note must be at most {MAX_NOTE_CHARS} characters"
        )));
    }

    let info = requested_day(&state, &day_key)?;
    state.store.ensure_day(&info, state.time_zone_name()).await?;
    let record = state
        .store
        .upsert_entry(&info.day_key, caller.profile.role, payload.score, note, Utc::now())
        .await?;
    info!(day_key = %info.day_key, role = %caller.profile.role, "entry saved");

    let entries = state.store.entries_for_day(&info.day_key).await?;
    Ok(Json(day_view(&state, record, entries)))
}

pub async fn post_thanks(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(day_key): Path<String>,
) -> Result<Json<DayRecord>, AppError> {
    let caller = state.caller(&headers).await?;
    calendar::parse_day_key(&day_key)?;
    let record = state
        .store
        .increment_thanks(&day_key, caller.profile.role)
        .await?;
    Ok(Json(record))
}

pub async fn post_refold(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(day_key): Path<String>,
) -> Result<Json<DayRecord>, AppError> {
    state.caller(&headers).await?;
    calendar::parse_day_key(&day_key)?;
    Ok(Json(state.store.resync_day(&day_key).await?))
}

pub async fn get_history(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryPage>, AppError> {
    state.caller(&headers).await?;
    if let Some(before) = &query.before {
        calendar::parse_day_key(before)?;
    }
    let limit = query
        .limit
        .unwrap_or(state.settings.history_batch)
        .clamp(1, MAX_HISTORY_PAGE);

    let days = state.store.recent_days(limit, query.before.as_deref()).await;
    let next_cursor = (days.len() == limit)
        .then(|| days.last().map(|day| day.day_key.clone()))
        .flatten();
    let items = days
        .into_iter()
        .map(|day| HistoryItem {
            average: format_average(crate::aggregation::average(day.score_sum, day.score_count)),
            day_key: day.day_key,
            display_label: day.display_label,
            thanks_total: day.thanks_total,
        })
        .collect();

    Ok(Json(HistoryPage { items, next_cursor }))
}

pub async fn get_stats(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<StatsResponse>, AppError> {
    let caller = state.caller(&headers).await?;
    let today = state.resolver.resolve_now();
    let window = state
        .store
        .recent_days_through(state.settings.stats_window, &today.day_key)
        .await;
    let entries = state.store.entries_snapshot(&window).await;
    Ok(Json(build_stats_at(
        &today,
        &window,
        caller.profile.role,
        &state.breakdowns,
        &entries,
    )))
}

/// Long-polls the caller's subscription for the next change that concerns
/// their active day, today, or the shared lists. 204 when nothing arrives.
pub async fn get_changes(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ChangesQuery>,
) -> Result<Response, AppError> {
    let caller = state.caller(&headers).await?;
    let wait = query
        .timeout_secs
        .unwrap_or(DEFAULT_POLL_SECS)
        .min(MAX_POLL_SECS);
    let deadline = Instant::now() + Duration::from_secs(wait);
    let today_key = state.resolver.resolve_now().day_key;

    let subscription = caller.subscription();
    let mut subscription = subscription.lock().await;
    loop {
        let event = match timeout_at(deadline, subscription.recv()).await {
            Ok(Some(event)) => event,
            Ok(None) | Err(_) => return Ok(StatusCode::NO_CONTENT.into_response()),
        };
        let relevant = match event.day_key() {
            Some(day_key) => day_key == caller.active_day_key || day_key == today_key,
            None => true,
        };
        if relevant {
            return Ok(Json(event).into_response());
        }
    }
}

pub async fn list_agreements(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<Agreement>>, AppError> {
    state.caller(&headers).await?;
    let data = state.store.read().await;
    Ok(Json(agreements::list_active(&data.agreements)))
}

async fn write_agreements<T>(
    state: &AppState,
    apply: impl FnOnce(&mut crate::models::AppData) -> Result<T, DiaryError>,
) -> Result<T, DiaryError> {
    let output = state.store.write(apply).await?;
    state.store.feed().publish(ChangeEvent::AgreementsChanged);
    Ok(output)
}

pub async fn create_agreement(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<AgreementRequest>,
) -> Result<(StatusCode, Json<Agreement>), AppError> {
    let caller = state.caller(&headers).await?;
    let actor = caller.profile.identity.clone();
    let now = Utc::now();
    let agreement = write_agreements(&state, |data| {
        agreements::create(data, &payload.title, &payload.body, &actor, now)
    })
    .await?;
    info!(id = %agreement.id, "agreement added");
    Ok((StatusCode::CREATED, Json(agreement)))
}

pub async fn update_agreement(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(payload): Json<AgreementRequest>,
) -> Result<Json<Agreement>, AppError> {
    let caller = state.caller(&headers).await?;
    let actor = caller.profile.identity.clone();
    let now = Utc::now();
    let agreement = write_agreements(&state, |data| {
        agreements::update(data, &id, &payload.title, &payload.body, &actor, now)
    })
    .await?;
    Ok(Json(agreement))
}

pub async fn pin_agreement(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(payload): Json<PinRequest>,
) -> Result<Json<Agreement>, AppError> {
    let caller = state.caller(&headers).await?;
    let actor = caller.profile.identity.clone();
    let now = Utc::now();
    let agreement = write_agreements(&state, |data| {
        agreements::set_pinned(data, &id, payload.pinned, &actor, now)
    })
    .await?;
    Ok(Json(agreement))
}

pub async fn archive_agreement(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Agreement>, AppError> {
    let caller = state.caller(&headers).await?;
    let actor = caller.profile.identity.clone();
    let role = caller.profile.role;
    let now = Utc::now();
    let agreement = write_agreements(&state, |data| {
        agreements::archive(data, &id, role, &actor, now)
    })
    .await?;
    info!(id = %agreement.id, "agreement archived");
    Ok(Json(agreement))
}

pub async fn reorder_agreements(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<ReorderRequest>,
) -> Result<Json<Vec<Agreement>>, AppError> {
    let caller = state.caller(&headers).await?;
    let actor = caller.profile.identity.clone();
    let now = Utc::now();
    let ordered = write_agreements(&state, |data| {
        agreements::reorder(data, &payload.ids, &actor, now)
    })
    .await?;
    Ok(Json(ordered))
}

pub async fn list_weekly_comments(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<WeeklyComment>>, AppError> {
    state.caller(&headers).await?;
    let data = state.store.read().await;
    let latest = data
        .weekly_comments
        .values()
        .rev()
        .take(WEEKLY_COMMENTS_SHOWN)
        .cloned()
        .collect();
    Ok(Json(latest))
}

/// Stores text produced by the external generator, clipped to the configured budget.
pub async fn store_weekly_comment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<WeeklyCommentRequest>,
) -> Result<(StatusCode, Json<WeeklyComment>), AppError> {
    state.caller(&headers).await?;
    calendar::parse_week_key(&payload.week_key)?;
    let text = truncate_comment(&payload.text, state.settings.summary_max_chars);
    if text.is_empty() {
        return Err(AppError::bad_request("text must not be empty"));
    }

    let comment = WeeklyComment {
        week_key: payload.week_key.clone(),
        text,
        created_at: Utc::now(),
    };
    let stored = comment.clone();
    state
        .store
        .write(move |data| {
            data.weekly_comments.insert(stored.week_key.clone(), stored);
            Ok(())
        })
        .await?;
    info!(
        week_key = %comment.week_key,
        chars = comment.text.chars().count(),
        "weekly comment stored"
    );
    state.store.feed().publish(ChangeEvent::WeeklyCommentStored {
        week_key: comment.week_key.clone(),
    });
    Ok((StatusCode::CREATED, Json(comment)))
}

pub async fn get_weekly_summary_input(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(week_key): Path<String>,
) -> Result<Json<WeeklySummaryInput>, AppError> {
    state.caller(&headers).await?;
    let (start, end) = summary_range(&week_key)?;
    let days = state
        .store
        .days_between(&calendar::day_key(start), &calendar::day_key(end))
        .await;
    let entries = state.store.entries_snapshot(&days).await;
    let input = build_weekly_summary_input(
        &week_key,
        &days,
        &entries,
        &state.breakdowns,
        &state.registry,
    )?;
    Ok(Json(input))
}
