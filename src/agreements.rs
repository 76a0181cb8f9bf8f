//! The shared list of relationship agreements.

use crate::errors::DiaryError;
use crate::models::{Agreement, AgreementStatus, AppData};
use crate::roles::Role;
use chrono::{DateTime, Utc};
use std::collections::HashSet;

pub const DEFAULT_AGREEMENTS: [&str; 9] = [
    "Morning hug",
    "Up by 6:50 (say so when you can't)",
    "Hand over phones during time with the kids",
    "Review and score the week together every Sunday",
    "Announce weekend work in advance, with the hours",
    "No harsh words",
    "Move within ten seconds when asked",
    "Never ignore each other, even when angry",
    "Thirty phone-free minutes together every day",
];

/// Active agreements, pinned first, then by `order`.
pub fn list_active(agreements: &[Agreement]) -> Vec<Agreement> {
    let mut active: Vec<Agreement> = agreements
        .iter()
        .filter(|agreement| agreement.status == AgreementStatus::Active)
        .cloned()
        .collect();
    active.sort_by(|a, b| b.pinned.cmp(&a.pinned).then(a.order.cmp(&b.order)));
    active
}

fn required(value: &str, field: &str) -> Result<String, DiaryError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(DiaryError::invalid(format!("{field} must not be empty")));
    }
    Ok(trimmed.to_string())
}

fn find_active<'a>(data: &'a mut AppData, id: &str) -> Result<&'a mut Agreement, DiaryError> {
    data.agreements
        .iter_mut()
        .find(|agreement| agreement.id == id && agreement.status == AgreementStatus::Active)
        .ok_or_else(|| DiaryError::not_found(format!("agreement {id}")))
}

pub fn create(
    data: &mut AppData,
    title: &str,
    body: &str,
    actor: &str,
    now: DateTime<Utc>,
) -> Result<Agreement, DiaryError> {
    let title = required(title, "title")?;
    let body = required(body, "body")?;
    let active = list_active(&data.agreements);
    let order = active.last().map_or(100, |last| last.order + 10);

    data.next_agreement_id += 1;
    let agreement = Agreement {
        id: format!("agreement-{}", data.next_agreement_id),
        title,
        body,
        pinned: active.is_empty(),
        order,
        status: AgreementStatus::Active,
        created_at: now,
        updated_at: now,
        created_by: actor.to_string(),
        updated_by: actor.to_string(),
    };
    data.agreements.push(agreement.clone());
    Ok(agreement)
}

pub fn update(
    data: &mut AppData,
    id: &str,
    title: &str,
    body: &str,
    actor: &str,
    now: DateTime<Utc>,
) -> Result<Agreement, DiaryError> {
    let title = required(title, "title")?;
    let body = required(body, "body")?;
    let agreement = find_active(data, id)?;
    agreement.title = title;
    agreement.body = body;
    agreement.updated_at = now;
    agreement.updated_by = actor.to_string();
    Ok(agreement.clone())
}

pub fn set_pinned(
    data: &mut AppData,
    id: &str,
    pinned: bool,
    actor: &str,
    now: DateTime<Utc>,
) -> Result<Agreement, DiaryError> {
    let agreement = find_active(data, id)?;
    agreement.pinned = pinned;
    agreement.updated_at = now;
    agreement.updated_by = actor.to_string();
    Ok(agreement.clone())
}

pub fn archive(
    data: &mut AppData,
    id: &str,
    role: Role,
    actor: &str,
    now: DateTime<Utc>,
) -> Result<Agreement, DiaryError> {
    if role != Role::Master {
        return Err(DiaryError::PermissionDenied(
            "only the master role can archive agreements".into(),
        ));
    }
    let agreement = find_active(data, id)?;
    agreement.status = AgreementStatus::Archived;
    agreement.updated_at = now;
    agreement.updated_by = actor.to_string();
    Ok(agreement.clone())
}

/// Assigns `order = (index + 1) * 100` following `ids`.
pub fn reorder(
    data: &mut AppData,
    ids: &[String],
    actor: &str,
    now: DateTime<Utc>,
) -> Result<Vec<Agreement>, DiaryError> {
    let mut seen = HashSet::new();
    for id in ids {
        if !seen.insert(id.as_str()) {
            return Err(DiaryError::invalid(format!("agreement {id} listed twice")));
        }
        find_active(data, id)?;
    }

    for (index, id) in ids.iter().enumerate() {
        let agreement = find_active(data, id)?;
        agreement.order = (index as i64 + 1) * 100;
        agreement.updated_at = now;
        agreement.updated_by = actor.to_string();
    }
    Ok(list_active(&data.agreements))
}

/// Adds the default list when nothing is active. Returns how many were created.
pub fn seed_defaults(data: &mut AppData, actor: &str, now: DateTime<Utc>) -> usize {
    if !list_active(&data.agreements).is_empty() {
        return 0;
    }

    let mut created = 0;
    for (index, title) in DEFAULT_AGREEMENTS.iter().enumerate() {
        let id = format!("seed-{index}");
        if data.agreements.iter().any(|agreement| agreement.id == id) {
            continue;
        }
        data.agreements.push(Agreement {
            id,
            title: title.to_string(),
            body: String::new(),
            pinned: index == 0,
            order: (index as i64 + 1) * 100,
            status: AgreementStatus::Active,
            created_at: now,
            updated_at: now,
            created_by: actor.to_string(),
            updated_by: actor.to_string(),
        });
        created += 1;
    }
    created
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap()
    }

    #[test]
    fn first_agreement_is_pinned_and_orders_step_by_ten() {
        let mut data = AppData::default();
        let first = create(&mut data, " Hug ", "every morning", "a@x.io", now()).unwrap();
        let second = create(&mut data, "Walk", "after dinner", "a@x.io", now()).unwrap();
        assert!(first.pinned);
        assert_eq!(first.title, "Hug");
        assert_eq!(first.order, 100);
        assert!(!second.pinned);
        assert_eq!(second.order, 110);
        assert_ne!(first.id, second.id);
    }

    #[test]
    fn blank_fields_are_rejected() {
        let mut data = AppData::default();
        assert!(create(&mut data, "  ", "body", "a@x.io", now()).is_err());
        assert!(create(&mut data, "title", "", "a@x.io", now()).is_err());
        assert!(data.agreements.is_empty());
    }

    #[test]
    fn listing_puts_pinned_first() {
        let mut data = AppData::default();
        let a = create(&mut data, "A", "a", "a@x.io", now()).unwrap();
        let b = create(&mut data, "B", "b", "a@x.io", now()).unwrap();
        set_pinned(&mut data, &a.id, false, "a@x.io", now()).unwrap();
        set_pinned(&mut data, &b.id, true, "b@x.io", now()).unwrap();
        let ids: Vec<String> = list_active(&data.agreements).into_iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![b.id, a.id]);
    }

    #[test]
    fn only_master_can_archive() {
        let mut data = AppData::default();
        let a = create(&mut data, "A", "a", "a@x.io", now()).unwrap();
        let err = archive(&mut data, &a.id, Role::Partner, "b@x.io", now()).unwrap_err();
        assert!(matches!(err, DiaryError::PermissionDenied(_)));
        archive(&mut data, &a.id, Role::Master, "a@x.io", now()).unwrap();
        assert!(list_active(&data.agreements).is_empty());
        assert!(matches!(
            update(&mut data, &a.id, "A2", "a", "a@x.io", now()),
            Err(DiaryError::NotFound(_))
        ));
    }

    #[test]
    fn reorder_assigns_hundreds_and_rejects_unknown_ids() {
        let mut data = AppData::default();
        let a = create(&mut data, "A", "a", "a@x.io", now()).unwrap();
        let b = create(&mut data, "B", "b", "a@x.io", now()).unwrap();
        set_pinned(&mut data, &a.id, false, "a@x.io", now()).unwrap();

        let ordered = reorder(&mut data, &[b.id.clone(), a.id.clone()], "a@x.io", now()).unwrap();
        assert_eq!(ordered[0].id, b.id);
        assert_eq!(ordered[0].order, 100);
        assert_eq!(ordered[1].order, 200);

        assert!(reorder(&mut data, &["missing".into()], "a@x.io", now()).is_err());
        assert!(reorder(&mut data, &[a.id.clone(), a.id.clone()], "a@x.io", now()).is_err());
    }

    #[test]
    fn seeding_is_idempotent() {
        let mut data = AppData::default();
        assert_eq!(seed_defaults(&mut data, "a@x.io", now()), DEFAULT_AGREEMENTS.len());
        assert_eq!(seed_defaults(&mut data, "a@x.io", now()), 0);
        let active = list_active(&data.agreements);
        assert_eq!(active[0].id, "seed-0");
        assert!(active[0].pinned);
        assert_eq!(active[1].order, 200);
    }
}
