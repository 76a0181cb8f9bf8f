use crate::roles::Role;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const MIN_SCORE: u8 = 1;
pub const MAX_SCORE: u8 = 4;
pub const MAX_NOTE_CHARS: usize = 2000;

/// Per-role score totals. Fields are optional so that records written before
/// role tracking existed still load; such records fail validation and get backfilled.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct RoleScore {
    #[serde(default)]
    pub sum: Option<u32>,
    #[serde(default)]
    pub count: Option<u32>,
    #[serde(default)]
    pub average: Option<f64>,
}

pub type ScoreBreakdown = BTreeMap<Role, RoleScore>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayRecord {
    pub day_key: String,
    pub display_label: String,
    pub week_key: String,
    #[serde(default)]
    pub time_zone: String,
    #[serde(default)]
    pub score_sum: u32,
    #[serde(default)]
    pub score_count: u32,
    #[serde(default)]
    pub score_average: Option<f64>,
    #[serde(default)]
    pub score_breakdown: Option<ScoreBreakdown>,
    #[serde(default)]
    pub thanks_total: u32,
    #[serde(default)]
    pub thanks_breakdown: BTreeMap<Role, u32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub last_aggregate_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub role: Role,
    #[serde(default)]
    pub score: Option<u8>,
    #[serde(default)]
    pub note: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgreementStatus {
    Active,
    Archived,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agreement {
    pub id: String,
    pub title: String,
    pub body: String,
    pub pinned: bool,
    pub order: i64,
    pub status: AgreementStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_by: String,
    pub updated_by: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeeklyComment {
    pub week_key: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// Everything the JSON store persists.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppData {
    #[serde(default)]
    pub days: BTreeMap<String, DayRecord>,
    #[serde(default)]
    pub entries: BTreeMap<String, BTreeMap<Role, Entry>>,
    #[serde(default)]
    pub agreements: Vec<Agreement>,
    #[serde(default)]
    pub weekly_comments: BTreeMap<String, WeeklyComment>,
    #[serde(default)]
    pub next_agreement_id: u64,
}

#[derive(Debug, Deserialize)]
pub struct SignInRequest {
    pub identity: String,
}

#[derive(Debug, Deserialize)]
pub struct ActiveDayRequest {
    pub day_key: String,
}

#[derive(Debug, Deserialize)]
pub struct EntryRequest {
    pub score: u8,
    #[serde(default)]
    pub note: String,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub before: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct ChangesQuery {
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct AgreementRequest {
    pub title: String,
    pub body: String,
}

#[derive(Debug, Deserialize)]
pub struct PinRequest {
    pub pinned: bool,
}

#[derive(Debug, Deserialize)]
pub struct ReorderRequest {
    pub ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct WeeklyCommentRequest {
    pub week_key: String,
    pub text: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionResponse {
    pub identity: String,
    pub display_name: String,
    pub role: Role,
    pub today_key: String,
    pub active_day_key: String,
    pub display_label: String,
    pub is_late_night: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EntryView {
    pub role: Role,
    pub author: String,
    pub score: Option<u8>,
    pub score_label: Option<String>,
    pub note: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DayView {
    pub record: DayRecord,
    pub entries: Vec<EntryView>,
    pub is_today: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryItem {
    pub day_key: String,
    pub display_label: String,
    pub average: String,
    pub thanks_total: u32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryPage {
    pub items: Vec<HistoryItem>,
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleStats {
    pub score_sum: u32,
    pub score_count: u32,
    pub average: Option<f64>,
    pub thanks: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScopeStats {
    pub key: String,
    pub days_matched: usize,
    pub score_sum: u32,
    pub score_count: u32,
    pub average: Option<f64>,
    pub average_label: String,
    pub by_role: BTreeMap<Role, RoleStats>,
    pub thanks_total: u32,
    pub thanks_sent: u32,
    pub thanks_received: u32,
    pub incomplete_days: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendPoint {
    pub label: String,
    pub average: Option<f64>,
    pub thanks: u32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatsResponse {
    pub today: ScopeStats,
    pub week: ScopeStats,
    pub month: ScopeStats,
    pub trend: Vec<TrendPoint>,
}
