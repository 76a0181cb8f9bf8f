use crate::errors::DiaryError;
use crate::roles::{Role, RoleRegistry, UserProfile};
use chrono_tz::Tz;
use std::{env, path::PathBuf};

const DEFAULT_USERS: &str =
    "master@example.com=master=Master;partner@example.com=partner=Partner";

#[derive(Debug, Clone)]
pub struct Settings {
    pub port: u16,
    pub data_path: PathBuf,
    pub time_zone: Tz,
    pub late_night_cutoff_hour: u32,
    pub history_batch: usize,
    pub stats_window: usize,
    pub summary_max_chars: usize,
    pub users: Vec<UserProfile>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            port: 8080,
            data_path: PathBuf::from("data/state.json"),
            time_zone: chrono_tz::Asia::Tokyo,
            late_night_cutoff_hour: 1,
            history_batch: 14,
            stats_window: 60,
            summary_max_chars: 520,
            users: parse_users(DEFAULT_USERS).unwrap_or_default(),
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self, DiaryError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds settings from any key lookup. Present but malformed values are errors.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, DiaryError> {
        let mut settings = Settings::default();

        if let Some(value) = lookup("PORT") {
            settings.port = parse_number(&value, "PORT")?;
        }
        if let Some(path) = lookup("APP_DATA_PATH") {
            settings.data_path = PathBuf::from(path);
        }
        if let Some(zone) = lookup("APP_TIMEZONE") {
            settings.time_zone = zone
                .trim()
                .parse::<Tz>()
                .map_err(|err| DiaryError::Config(format!("APP_TIMEZONE: {err}")))?;
        }
        if let Some(value) = lookup("APP_LATE_NIGHT_CUTOFF_HOUR") {
            let hour: u32 = parse_number(&value, "APP_LATE_NIGHT_CUTOFF_HOUR")?;
            if hour > 23 {
                return Err(DiaryError::Config(format!(
                    "APP_LATE_NIGHT_CUTOFF_HOUR must be 0..=23, got {hour}"
                )));
            }
            settings.late_night_cutoff_hour = hour;
        }
        if let Some(value) = lookup("APP_HISTORY_BATCH") {
            settings.history_batch = parse_positive(&value, "APP_HISTORY_BATCH")?;
        }
        if let Some(value) = lookup("APP_STATS_WINDOW") {
            settings.stats_window = parse_positive(&value, "APP_STATS_WINDOW")?;
        }
        if let Some(value) = lookup("APP_SUMMARY_MAX_CHARS") {
            settings.summary_max_chars = parse_positive(&value, "APP_SUMMARY_MAX_CHARS")?;
        }
        if let Some(value) = lookup("APP_USERS") {
            settings.users = parse_users(&value)?;
        }

        settings.registry()?;
        Ok(settings)
    }

    pub fn registry(&self) -> Result<RoleRegistry, DiaryError> {
        RoleRegistry::new(self.users.clone())
    }
}

fn parse_number<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, DiaryError> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| DiaryError::Config(format!("{key}: '{value}' is not a valid number")))
}

fn parse_positive(value: &str, key: &str) -> Result<usize, DiaryError> {
    let parsed: usize = parse_number(value, key)?;
    if parsed == 0 {
        return Err(DiaryError::Config(format!("{key} must be greater than zero")));
    }
    Ok(parsed)
}

/// Parses `email=role=Display Name` pairs separated by `;`.
fn parse_users(value: &str) -> Result<Vec<UserProfile>, DiaryError> {
    value
        .split(';')
        .map(str::trim)
        .filter(|chunk| !chunk.is_empty())
        .map(|chunk| {
            let mut parts = chunk.splitn(3, '=');
            let identity = parts.next().unwrap_or_default().trim();
            let role = parts.next().unwrap_or_default();
            let display_name = parts.next().unwrap_or_default().trim();
            if identity.is_empty() || display_name.is_empty() {
                return Err(DiaryError::Config(format!("APP_USERS: malformed entry '{chunk}'")));
            }
            let role: Role = role
                .parse()
                .map_err(|err: DiaryError| DiaryError::Config(format!("APP_USERS: {err}")))?;
            Ok(UserProfile {
                identity: identity.to_string(),
                display_name: display_name.to_string(),
                role,
            })
        })
        .collect()
}
