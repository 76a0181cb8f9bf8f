use crate::aggregation::{self, EntrySource};
use crate::calendar::DateInfo;
use crate::errors::DiaryError;
use crate::feed::{ChangeEvent, ChangeFeed};
use crate::models::{AppData, DayRecord, Entry};
use crate::roles::Role;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::{ops::Bound, path::Path, path::PathBuf, sync::Arc};
use tokio::fs;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

/// Loads the store file. A missing file is an empty store. A file that does
/// not parse is moved aside first, so the next write cannot replace the
/// history it holds.
pub async fn load_data(path: &Path) -> Result<AppData, DiaryError> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(AppData::default()),
        Err(err) => {
            error!("failed to read data file: {err}");
            return Err(err.into());
        }
    };
    match serde_json::from_slice(&bytes) {
        Ok(data) => Ok(data),
        Err(err) => {
            let aside = corrupt_path(path, Utc::now());
            error!("failed to parse data file: {err}");
            fs::rename(path, &aside).await?;
            warn!(aside = %aside.display(), "corrupt data file moved aside, starting empty");
            Ok(AppData::default())
        }
    }
}

fn corrupt_path(path: &Path, now: DateTime<Utc>) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(format!(".corrupt-{}", now.format("%Y%m%dT%H%M%S%.3fZ")));
    PathBuf::from(name)
}

pub async fn persist_data(path: &Path, data: &AppData) -> Result<(), DiaryError> {
    let payload =
        serde_json::to_vec_pretty(data).map_err(|err| DiaryError::TransientStore(err.to_string()))?;
    let staging = path.with_extension("json.tmp");
    fs::write(&staging, payload).await?;
    fs::rename(&staging, path).await?;
    Ok(())
}

impl EntrySource for AppData {
    fn entries_for_day(&self, day_key: &str) -> Result<Vec<Entry>, DiaryError> {
        Ok(self
            .entries
            .get(day_key)
            .map(|entries| entries.values().cloned().collect())
            .unwrap_or_default())
    }
}

/// Document store backed by one JSON file.
///
/// Every write runs against a draft copy under the store lock; the draft only
/// replaces the live data after it has been persisted. A failed write
/// therefore leaves no trace and can be retried as a whole.
#[derive(Clone)]
pub struct DiaryStore {
    path: PathBuf,
    data: Arc<Mutex<AppData>>,
    feed: ChangeFeed,
}

impl DiaryStore {
    pub fn new(path: PathBuf, data: AppData) -> Self {
        Self {
            path,
            data: Arc::new(Mutex::new(data)),
            feed: ChangeFeed::new(),
        }
    }

    pub async fn open(path: PathBuf) -> Result<Self, DiaryError> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        let data = load_data(&path).await?;
        info!(days = data.days.len(), path = %path.display(), "store opened");
        Ok(Self::new(path, data))
    }

    pub fn feed(&self) -> &ChangeFeed {
        &self.feed
    }

    /// Locks the live data. Writers wait while the guard is held, so copy
    /// what you need and drop it.
    pub async fn read(&self) -> MutexGuard<'_, AppData> {
        self.data.lock().await
    }

    /// Exclusive read-modify-write. `apply` sees a draft; nothing is visible
    /// to readers until the draft is on disk.
    pub async fn write<T>(
        &self,
        apply: impl FnOnce(&mut AppData) -> Result<T, DiaryError>,
    ) -> Result<T, DiaryError> {
        let mut data = self.data.lock().await;
        let mut draft = data.clone();
        let output = apply(&mut draft)?;
        if let Err(err) = persist_data(&self.path, &draft).await {
            error!("failed to persist store: {err}");
            return Err(err);
        }
        *data = draft;
        Ok(output)
    }

    pub async fn get_day(&self, day_key: &str) -> Option<DayRecord> {
        self.read().await.days.get(day_key).cloned()
    }

    /// Creates the day record if absent. Returns the stored record either way.
    pub async fn ensure_day(
        &self,
        info: &DateInfo,
        time_zone: &str,
    ) -> Result<DayRecord, DiaryError> {
        if let Some(existing) = self.get_day(&info.day_key).await {
            return Ok(existing);
        }
        let (record, created) = self
            .write(|data| {
                if let Some(existing) = data.days.get(&info.day_key) {
                    return Ok((existing.clone(), false));
                }
                let record = aggregation::new_day_record(info, time_zone, Utc::now());
                data.days.insert(info.day_key.clone(), record.clone());
                Ok((record, true))
            })
            .await?;
        if created {
            info!(day_key = %info.day_key, "day record created");
            self.feed.publish(ChangeEvent::DayUpdated {
                day_key: info.day_key.clone(),
            });
        }
        Ok(record)
    }

    /// Stores `role`'s entry for the day, replacing any previous one, and
    /// refolds the day's totals from the full entry set.
    pub async fn upsert_entry(
        &self,
        day_key: &str,
        role: Role,
        score: u8,
        note: String,
        now: DateTime<Utc>,
    ) -> Result<DayRecord, DiaryError> {
        let record = self
            .write(|data| {
                if !data.days.contains_key(day_key) {
                    return Err(DiaryError::not_found(format!("day {day_key}")));
                }
                let day_entries = data.entries.entry(day_key.to_string()).or_default();
                day_entries.insert(
                    role,
                    Entry {
                        role,
                        score: Some(score),
                        note,
                        updated_at: now,
                    },
                );
                let current: Vec<Entry> = day_entries.values().cloned().collect();
                let record = data
                    .days
                    .get_mut(day_key)
                    .ok_or_else(|| DiaryError::not_found(format!("day {day_key}")))?;
                aggregation::refold_day(record, &current, now);
                Ok(record.clone())
            })
            .await?;

        debug!(
            day_key,
            %role,
            score_sum = record.score_sum,
            score_count = record.score_count,
            "aggregates synced"
        );
        self.feed.publish(ChangeEvent::EntryWritten {
            day_key: day_key.to_string(),
            role,
        });
        self.feed.publish(ChangeEvent::DayUpdated {
            day_key: day_key.to_string(),
        });
        Ok(record)
    }

    /// Re-runs the refold for a day from its stored entries.
    pub async fn resync_day(&self, day_key: &str) -> Result<DayRecord, DiaryError> {
        let now = Utc::now();
        let record = self
            .write(|data| {
                let current = data.entries_for_day(day_key)?;
                let record = data
                    .days
                    .get_mut(day_key)
                    .ok_or_else(|| DiaryError::not_found(format!("day {day_key}")))?;
                aggregation::refold_day(record, &current, now);
                Ok(record.clone())
            })
            .await?;

        info!(day_key, score_count = record.score_count, "day refolded");
        self.feed.publish(ChangeEvent::DayUpdated {
            day_key: day_key.to_string(),
        });
        Ok(record)
    }

    /// Adds one thanks from `role`. The day must already exist.
    pub async fn increment_thanks(
        &self,
        day_key: &str,
        role: Role,
    ) -> Result<DayRecord, DiaryError> {
        let now = Utc::now();
        let record = self
            .write(|data| {
                let record = data.days.get_mut(day_key).ok_or_else(|| {
                    DiaryError::not_found(format!("no thread exists for {day_key}"))
                })?;
                aggregation::apply_thanks(record, role, now);
                Ok(record.clone())
            })
            .await?;

        info!(day_key, %role, thanks_total = record.thanks_total, "thanks incremented");
        self.feed.publish(ChangeEvent::DayUpdated {
            day_key: day_key.to_string(),
        });
        Ok(record)
    }

    /// Most recent records first, optionally strictly before `before`.
    pub async fn recent_days(&self, limit: usize, before: Option<&str>) -> Vec<DayRecord> {
        self.recent_below(limit, before.map_or(Bound::Unbounded, Bound::Excluded))
            .await
    }

    /// Most recent records up to and including `last`, newest first.
    pub async fn recent_days_through(&self, limit: usize, last: &str) -> Vec<DayRecord> {
        self.recent_below(limit, Bound::Included(last)).await
    }

    async fn recent_below(&self, limit: usize, upper: Bound<&str>) -> Vec<DayRecord> {
        let data = self.read().await;
        data.days
            .range::<str, _>((Bound::Unbounded, upper))
            .rev()
            .take(limit)
            .map(|(_, record)| record.clone())
            .collect()
    }

    /// Records whose day key lies in `start..=end`, oldest first.
    pub async fn days_between(&self, start: &str, end: &str) -> Vec<DayRecord> {
        if start > end {
            return Vec::new();
        }
        let data = self.read().await;
        data.days
            .range::<str, _>((Bound::Included(start), Bound::Included(end)))
            .map(|(_, record)| record.clone())
            .collect()
    }

    pub async fn entries_for_day(&self, day_key: &str) -> Result<Vec<Entry>, DiaryError> {
        self.read().await.entries_for_day(day_key)
    }

    /// Copies the entries of `days` so roll-ups can run without the lock.
    pub async fn entries_snapshot(&self, days: &[DayRecord]) -> EntrySnapshot {
        let data = self.read().await;
        let entries = days
            .iter()
            .filter_map(|day| {
                let day_entries = data.entries.get(&day.day_key)?;
                Some((day.day_key.clone(), day_entries.values().cloned().collect()))
            })
            .collect();
        EntrySnapshot { entries }
    }
}

/// Entries copied out of the store for a fixed set of days.
#[derive(Debug, Default)]
pub struct EntrySnapshot {
    entries: BTreeMap<String, Vec<Entry>>,
}

impl EntrySource for EntrySnapshot {
    fn entries_for_day(&self, day_key: &str) -> Result<Vec<Entry>, DiaryError> {
        Ok(self.entries.get(day_key).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::DateKeyResolver;

    fn resolver() -> DateKeyResolver {
        DateKeyResolver::new(chrono_tz::Asia::Tokyo, 1)
    }

    async fn store_in(dir: &tempfile::TempDir) -> DiaryStore {
        DiaryStore::open(dir.path().join("state.json")).await.unwrap()
    }

    async fn open_day(store: &DiaryStore, key: &str) -> DayRecord {
        let info = resolver().for_day_key(key).unwrap();
        store.ensure_day(&info, "Asia/Tokyo").await.unwrap()
    }

    #[tokio::test]
    async fn ensure_day_is_create_if_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir).await;
        let first = open_day(&store, "2024-03-10").await;
        store.increment_thanks("2024-03-10", Role::Master).await.unwrap();
        let second = open_day(&store, "2024-03-10").await;

        assert_eq!(first.week_key, "2024-W11");
        assert_eq!(second.thanks_total, 1);
        assert_eq!(second.created_at, first.created_at);
    }

    #[tokio::test]
    async fn entries_refold_the_day() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir).await;
        open_day(&store, "2024-03-10").await;
        let now = Utc::now();
        store
            .upsert_entry("2024-03-10", Role::Master, 4, "good day".into(), now)
            .await
            .unwrap();
        let record = store
            .upsert_entry("2024-03-10", Role::Partner, 2, String::new(), now)
            .await
            .unwrap();
        assert_eq!((record.score_sum, record.score_count), (6, 2));
        assert_eq!(record.score_average, Some(3.0));

        // Resubmission replaces the role's entry instead of adding one.
        let record = store
            .upsert_entry("2024-03-10", Role::Partner, 4, String::new(), now)
            .await
            .unwrap();
        assert_eq!((record.score_sum, record.score_count), (8, 2));
        assert_eq!(store.entries_for_day("2024-03-10").await.unwrap().len(), 2);

        let again = store.resync_day("2024-03-10").await.unwrap();
        assert_eq!((again.score_sum, again.score_count), (8, 2));
    }

    #[tokio::test]
    async fn thanks_on_a_missing_day_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir).await;
        let err = store.increment_thanks("2024-03-10", Role::Partner).await.unwrap_err();
        assert!(matches!(err, DiaryError::NotFound(_)));
        assert!(store.get_day("2024-03-10").await.is_none());
    }

    #[tokio::test]
    async fn concurrent_thanks_are_not_lost() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir).await;
        open_day(&store, "2024-03-10").await;

        let (a, b) = tokio::join!(
            store.increment_thanks("2024-03-10", Role::Master),
            store.increment_thanks("2024-03-10", Role::Master),
        );
        a.unwrap();
        b.unwrap();

        let record = store.get_day("2024-03-10").await.unwrap();
        assert_eq!(record.thanks_breakdown[&Role::Master], 2);
        assert_eq!(record.thanks_total, 2);
    }

    #[tokio::test]
    async fn writes_survive_a_reload() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = store_in(&dir).await;
            open_day(&store, "2024-03-10").await;
            store.increment_thanks("2024-03-10", Role::Partner).await.unwrap();
        }
        let reopened = store_in(&dir).await;
        let record = reopened.get_day("2024-03-10").await.unwrap();
        assert_eq!(record.thanks_breakdown[&Role::Partner], 1);
    }

    #[tokio::test]
    async fn failed_persistence_applies_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiaryStore::new(dir.path().join("missing/dir/state.json"), AppData::default());
        let info = resolver().for_day_key("2024-03-10").unwrap();

        let err = store.ensure_day(&info, "Asia/Tokyo").await.unwrap_err();
        assert!(matches!(err, DiaryError::TransientStore(_)));
        assert!(store.get_day("2024-03-10").await.is_none());
    }

    #[tokio::test]
    async fn range_queries_are_ordered_and_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir).await;
        for day in ["2024-03-08", "2024-03-09", "2024-03-10", "2024-03-11"] {
            open_day(&store, day).await;
        }

        let recent: Vec<String> = store
            .recent_days(2, None)
            .await
            .into_iter()
            .map(|d| d.day_key)
            .collect();
        assert_eq!(recent, vec!["2024-03-11", "2024-03-10"]);

        let page: Vec<String> = store
            .recent_days(5, Some("2024-03-10"))
            .await
            .into_iter()
            .map(|d| d.day_key)
            .collect();
        assert_eq!(page, vec!["2024-03-09", "2024-03-08"]);

        let between: Vec<String> = store
            .days_between("2024-03-09", "2024-03-10")
            .await
            .into_iter()
            .map(|d| d.day_key)
            .collect();
        assert_eq!(between, vec!["2024-03-09", "2024-03-10"]);

        let through: Vec<String> = store
            .recent_days_through(5, "2024-03-09")
            .await
            .into_iter()
            .map(|d| d.day_key)
            .collect();
        assert_eq!(through, vec!["2024-03-09", "2024-03-08"]);
    }

    #[tokio::test]
    async fn later_records_do_not_push_today_out_of_the_stats_window() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir).await;
        open_day(&store, "2024-03-10").await;
        store
            .upsert_entry("2024-03-10", Role::Master, 4, String::new(), Utc::now())
            .await
            .unwrap();
        let mut later = resolver().for_day_key("2024-04-01").unwrap().date;
        for _ in 0..60 {
            open_day(&store, &crate::calendar::day_key(later)).await;
            later = later.succ_opt().unwrap();
        }

        let today = resolver().for_day_key("2024-03-10").unwrap();
        let window = store.recent_days_through(60, &today.day_key).await;
        let entries = store.entries_snapshot(&window).await;
        let stats = crate::stats::build_stats_at(
            &today,
            &window,
            Role::Master,
            &aggregation::BreakdownCache::new(),
            &entries,
        );
        assert_eq!(stats.today.score_count, 1);
        assert_eq!(stats.today.average_label, "4.00");
    }

    #[tokio::test]
    async fn snapshots_serve_entries_without_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir).await;
        let day = open_day(&store, "2024-03-10").await;
        store
            .upsert_entry("2024-03-10", Role::Partner, 3, "tea".into(), Utc::now())
            .await
            .unwrap();

        let snapshot = store.entries_snapshot(&[day]).await;
        let entries = snapshot.entries_for_day("2024-03-10").unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].note, "tea");
        assert!(snapshot.entries_for_day("2024-03-11").unwrap().is_empty());
    }

    #[tokio::test]
    async fn a_corrupt_file_is_moved_aside_instead_of_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        {
            let store = store_in(&dir).await;
            for day in ["2024-03-08", "2024-03-09", "2024-03-10"] {
                open_day(&store, day).await;
            }
        }
        let mut bytes = std::fs::read(&path).unwrap();
        bytes.push(b'x');
        std::fs::write(&path, bytes).unwrap();

        let reopened = store_in(&dir).await;
        assert!(reopened.get_day("2024-03-08").await.is_none());
        open_day(&reopened, "2024-03-11").await;

        let aside: Vec<PathBuf> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .filter(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name.starts_with("state.json.corrupt-"))
            })
            .collect();
        assert_eq!(aside.len(), 1);
        let mut saved = std::fs::read(&aside[0]).unwrap();
        saved.pop();
        let saved: AppData = serde_json::from_slice(&saved).unwrap();
        assert_eq!(saved.days.len(), 3);
        assert!(path.exists());
    }

    #[tokio::test]
    async fn an_unreadable_file_stops_the_store_from_opening() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("state.json")).unwrap();
        let err = DiaryStore::open(dir.path().join("state.json")).await.err().unwrap();
        assert!(matches!(err, DiaryError::TransientStore(_)));
    }

    #[tokio::test]
    async fn committed_writes_are_published() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir).await;
        let mut subscription = store.feed().subscribe();
        open_day(&store, "2024-03-10").await;
        assert_eq!(
            subscription.recv().await,
            Some(ChangeEvent::DayUpdated {
                day_key: "2024-03-10".into()
            })
        );
    }
}
