use crate::aggregation::{BreakdownCache, EntrySource, average, resolve_breakdown};
use crate::calendar::{self, DateInfo};
use crate::errors::DiaryError;
use crate::models::{DayRecord, RoleStats, ScopeStats, StatsResponse, TrendPoint};
use crate::roles::Role;
use tracing::warn;

pub const NO_DATA: &str = "-";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    Day(String),
    Week(String),
    Month(String),
}

impl Scope {
    pub fn day(key: &str) -> Result<Self, DiaryError> {
        calendar::parse_day_key(key)?;
        Ok(Scope::Day(key.to_string()))
    }

    pub fn week(key: &str) -> Result<Self, DiaryError> {
        calendar::parse_week_key(key)?;
        Ok(Scope::Week(key.to_string()))
    }

    pub fn month(key: &str) -> Result<Self, DiaryError> {
        calendar::validate_month_key(key)?;
        Ok(Scope::Month(key.to_string()))
    }

    pub fn key(&self) -> &str {
        match self {
            Scope::Day(key) | Scope::Week(key) | Scope::Month(key) => key,
        }
    }

    fn matches(&self, record: &DayRecord) -> bool {
        match self {
            Scope::Day(key) => record.day_key == *key,
            Scope::Week(key) => record.week_key == *key,
            Scope::Month(key) => record
                .day_key
                .strip_prefix(key.as_str())
                .is_some_and(|rest| rest.starts_with('-')),
        }
    }
}

pub fn format_average(value: Option<f64>) -> String {
    value.map_or_else(|| NO_DATA.to_string(), |avg| format!("{avg:.2}"))
}

/// Folds the records of `window` that fall inside `scope`.
///
/// Combined totals come from each record's own sums. Per-role totals come from
/// the role breakdown, backfilled from entries when a record predates role
/// tracking; a day whose backfill fails is listed in `incomplete_days` and
/// contributes only to the combined totals.
pub fn roll_up(
    window: &[DayRecord],
    scope: &Scope,
    acting_role: Role,
    cache: &BreakdownCache,
    source: &dyn EntrySource,
) -> ScopeStats {
    let mut days_matched = 0;
    let mut score_sum = 0u32;
    let mut score_count = 0u32;
    let mut thanks_total = 0u32;
    let mut role_totals: Vec<(Role, RoleStats)> = Role::ALL
        .into_iter()
        .map(|role| {
            (
                role,
                RoleStats {
                    score_sum: 0,
                    score_count: 0,
                    average: None,
                    thanks: 0,
                },
            )
        })
        .collect();
    let mut incomplete_days = Vec::new();

    for record in window.iter().filter(|record| scope.matches(record)) {
        days_matched += 1;
        score_sum = score_sum.saturating_add(record.score_sum);
        score_count = score_count.saturating_add(record.score_count);
        thanks_total = thanks_total.saturating_add(record.thanks_total);

        for (role, totals) in role_totals.iter_mut() {
            let thanks = record.thanks_breakdown.get(role).copied().unwrap_or(0);
            totals.thanks = totals.thanks.saturating_add(thanks);
        }

        match resolve_breakdown(record, cache, source) {
            Ok(breakdown) => {
                for (role, totals) in role_totals.iter_mut() {
                    if let Some(score) = breakdown.get(role) {
                        totals.score_sum = totals.score_sum.saturating_add(score.sum.unwrap_or(0));
                        totals.score_count =
                            totals.score_count.saturating_add(score.count.unwrap_or(0));
                    }
                }
            }
            Err(err) => {
                warn!(scope = scope.key(), "roll-up missing role breakdown: {err}");
                incomplete_days.push(record.day_key.clone());
            }
        }
    }

    let by_role: std::collections::BTreeMap<Role, RoleStats> = role_totals
        .into_iter()
        .map(|(role, mut totals)| {
            totals.average = average(totals.score_sum, totals.score_count);
            (role, totals)
        })
        .collect();
    let thanks_for = |role: Role| by_role.get(&role).map_or(0, |totals| totals.thanks);
    let scope_average = average(score_sum, score_count);

    ScopeStats {
        key: scope.key().to_string(),
        days_matched,
        score_sum,
        score_count,
        average: scope_average,
        average_label: format_average(scope_average),
        thanks_sent: thanks_for(acting_role),
        thanks_received: thanks_for(acting_role.other()),
        by_role,
        thanks_total,
        incomplete_days,
    }
}

pub fn build_stats_at(
    today: &DateInfo,
    window: &[DayRecord],
    acting_role: Role,
    cache: &BreakdownCache,
    source: &dyn EntrySource,
) -> StatsResponse {
    let day = Scope::Day(today.day_key.clone());
    let week = Scope::Week(today.week_key.clone());
    let month = Scope::Month(calendar::month_key(today.date));

    let mut chronological: Vec<&DayRecord> = window.iter().collect();
    chronological.sort_by(|a, b| a.day_key.cmp(&b.day_key));
    let trend = chronological
        .into_iter()
        .map(|record| TrendPoint {
            label: if record.display_label.is_empty() {
                record.day_key.clone()
            } else {
                record.display_label.clone()
            },
            average: average(record.score_sum, record.score_count),
            thanks: record.thanks_total,
        })
        .collect();

    StatsResponse {
        today: roll_up(window, &day, acting_role, cache, source),
        week: roll_up(window, &week, acting_role, cache, source),
        month: roll_up(window, &month, acting_role, cache, source),
        trend,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::{apply_thanks, new_day_record, refold_day};
    use crate::calendar::DateKeyResolver;
    use crate::models::Entry;
    use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
    use std::collections::BTreeMap;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 20, 3, 0, 0).unwrap()
    }

    fn resolver() -> DateKeyResolver {
        DateKeyResolver::new(chrono_tz::Asia::Tokyo, 1)
    }

    fn entry(role: Role, score: u8) -> Entry {
        Entry {
            role,
            score: Some(score),
            note: String::new(),
            updated_at: now(),
        }
    }

    fn scored_day(date: NaiveDate, entries: &[Entry]) -> DayRecord {
        let mut record = new_day_record(&resolver().for_date(date), "Asia/Tokyo", now());
        refold_day(&mut record, entries, now());
        record
    }

    #[derive(Default)]
    struct MapSource {
        entries: BTreeMap<String, Vec<Entry>>,
        offline: bool,
    }

    impl EntrySource for MapSource {
        fn entries_for_day(&self, day_key: &str) -> Result<Vec<Entry>, DiaryError> {
            if self.offline {
                return Err(DiaryError::TransientStore("offline".into()));
            }
            Ok(self.entries.get(day_key).cloned().unwrap_or_default())
        }
    }

    /// Ten days ending 2024-03-16, newest first, as the store returns them.
    fn ten_day_window() -> Vec<DayRecord> {
        let last = NaiveDate::from_ymd_opt(2024, 3, 16).unwrap();
        let mut window: Vec<DayRecord> = (0..10)
            .map(|offset| {
                let date = last - Duration::days(offset);
                let entries = match date.format("%d").to_string().as_str() {
                    "10" => vec![entry(Role::Master, 4)],
                    "11" => vec![entry(Role::Partner, 3)],
                    "12" => Vec::new(),
                    "08" => vec![entry(Role::Master, 1), entry(Role::Partner, 1)],
                    _ => Vec::new(),
                };
                scored_day(date, &entries)
            })
            .collect();
        // Only Mar 10-12 were ever opened within W11 in this fixture.
        window.retain(|record| {
            record.week_key != "2024-W11" || record.day_key.as_str() <= "2024-03-12"
        });
        window
    }

    #[test]
    fn week_roll_up_only_counts_scored_days_in_the_week() {
        let window = ten_day_window();
        let stats = roll_up(
            &window,
            &Scope::week("2024-W11").unwrap(),
            Role::Master,
            &BreakdownCache::new(),
            &MapSource::default(),
        );

        assert_eq!(stats.days_matched, 3);
        assert_eq!(stats.score_count, 2);
        assert_eq!(stats.score_sum, 7);
        assert_eq!(stats.average, Some(3.5));
        assert_eq!(stats.average_label, "3.50");
        assert_eq!(stats.by_role[&Role::Master].average, Some(4.0));
        assert_eq!(stats.by_role[&Role::Partner].average, Some(3.0));
    }

    #[test]
    fn empty_scopes_report_no_data_rather_than_zero() {
        let window = ten_day_window();
        let stats = roll_up(
            &window,
            &Scope::month("2024-04").unwrap(),
            Role::Master,
            &BreakdownCache::new(),
            &MapSource::default(),
        );
        assert_eq!(stats.days_matched, 0);
        assert_eq!(stats.average, None);
        assert_eq!(stats.average_label, NO_DATA);

        let unscored = roll_up(
            &window,
            &Scope::day("2024-03-12").unwrap(),
            Role::Master,
            &BreakdownCache::new(),
            &MapSource::default(),
        );
        assert_eq!(unscored.days_matched, 1);
        assert_eq!(unscored.average, None);
    }

    #[test]
    fn month_scope_matches_by_prefix() {
        let mut window = ten_day_window();
        window.push(scored_day(
            NaiveDate::from_ymd_opt(2024, 2, 29).unwrap(),
            &[entry(Role::Master, 2)],
        ));
        let stats = roll_up(
            &window,
            &Scope::month("2024-03").unwrap(),
            Role::Partner,
            &BreakdownCache::new(),
            &MapSource::default(),
        );
        // Mar 7-12 are in the window; Mar 8 has two 1s, Mar 10 a 4, Mar 11 a 3.
        assert_eq!(stats.score_sum, 9);
        assert_eq!(stats.score_count, 4);
    }

    #[test]
    fn thanks_split_into_sent_and_received() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 10).unwrap();
        let mut record = scored_day(date, &[]);
        apply_thanks(&mut record, Role::Master, now());
        apply_thanks(&mut record, Role::Master, now());
        apply_thanks(&mut record, Role::Partner, now());
        let window = vec![record];
        let scope = Scope::week("2024-W11").unwrap();

        let none = MapSource::default();
        let master = roll_up(&window, &scope, Role::Master, &BreakdownCache::new(), &none);
        assert_eq!(master.thanks_total, 3);
        assert_eq!((master.thanks_sent, master.thanks_received), (2, 1));

        let partner = roll_up(&window, &scope, Role::Partner, &BreakdownCache::new(), &none);
        assert_eq!((partner.thanks_sent, partner.thanks_received), (1, 2));
    }

    #[test]
    fn legacy_days_are_backfilled_from_entries() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 10).unwrap();
        let entries = vec![entry(Role::Master, 4), entry(Role::Partner, 2)];
        let mut legacy = scored_day(date, &entries);
        legacy.score_breakdown = None;

        let mut source = MapSource::default();
        source.entries.insert("2024-03-10".into(), entries);
        let cache = BreakdownCache::new();
        let scope = Scope::day("2024-03-10").unwrap();
        let stats = roll_up(&[legacy], &scope, Role::Master, &cache, &source);

        assert_eq!(stats.by_role[&Role::Partner].score_sum, 2);
        assert!(stats.incomplete_days.is_empty());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn failed_backfill_degrades_instead_of_failing() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 10).unwrap();
        let mut legacy = scored_day(date, &[entry(Role::Master, 4)]);
        legacy.score_breakdown = None;
        let source = MapSource {
            offline: true,
            ..MapSource::default()
        };

        let scope = Scope::week("2024-W11").unwrap();
        let stats = roll_up(&[legacy], &scope, Role::Master, &BreakdownCache::new(), &source);
        assert_eq!(stats.average, Some(4.0));
        assert_eq!(stats.by_role[&Role::Master].score_count, 0);
        assert_eq!(stats.incomplete_days, vec!["2024-03-10".to_string()]);
    }

    #[test]
    fn stats_bundle_today_week_month_and_trend() {
        let window = ten_day_window();
        let today = resolver().for_day_key("2024-03-11").unwrap();
        let none = MapSource::default();
        let stats = build_stats_at(&today, &window, Role::Master, &BreakdownCache::new(), &none);

        assert_eq!(stats.today.average, Some(3.0));
        assert_eq!(stats.week.key, "2024-W11");
        assert_eq!(stats.month.key, "2024-03");
        assert_eq!(stats.trend.len(), window.len());
        assert!(stats.trend.first().unwrap().label.contains("March 7"));
    }

    #[test]
    fn scope_keys_are_validated() {
        assert!(Scope::week("2024-11").is_err());
        assert!(Scope::month("2024-3").is_err());
        assert!(Scope::day("03/10/2024").is_err());
    }
}
