use std::cmp::Ordering;

use uuid::Uuid;

use crate::models::Redemption;

/// 列表项：乐观插入的待确认项，或后端已确认的记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListEntry {
    Pending { key: Uuid, barcode: String },
    Confirmed(Redemption),
}

impl ListEntry {
    pub fn id(&self) -> Option<i64> {
        match self {
            ListEntry::Pending { .. } => None,
            ListEntry::Confirmed(record) => Some(record.id),
        }
    }

    pub fn barcode(&self) -> &str {
        match self {
            ListEntry::Pending { barcode, .. } => barcode,
            ListEntry::Confirmed(record) => &record.barcode,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, ListEntry::Pending { .. })
    }
}

/// 倒序：时间新的在前，同一时间 id 大的在前
fn newest_first(a: &Redemption, b: &Redemption) -> Ordering {
    b.created_at
        .cmp(&a.created_at)
        .then_with(|| b.id.cmp(&a.id))
}

/// 界面上的兑换列表
///
/// 待确认项始终在表头；已确认记录按 created_at 倒序，且 id 不重复。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RedemptionList {
    entries: Vec<ListEntry>,
}

impl RedemptionList {
    pub fn new(mut records: Vec<Redemption>) -> Self {
        records.sort_by(newest_first);
        records.dedup_by_key(|r| r.id);
        Self {
            entries: records.into_iter().map(ListEntry::Confirmed).collect(),
        }
    }

    pub fn entries(&self) -> &[ListEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn head(&self) -> Option<&ListEntry> {
        self.entries.first()
    }

    pub fn records(&self) -> impl Iterator<Item = &Redemption> {
        self.entries.iter().filter_map(|e| match e {
            ListEntry::Confirmed(record) => Some(record),
            ListEntry::Pending { .. } => None,
        })
    }

    pub fn contains_id(&self, id: i64) -> bool {
        self.entries.iter().any(|e| e.id() == Some(id))
    }

    pub fn push_pending(&mut self, barcode: &str) -> Uuid {
        let key = Uuid::new_v4();
        self.entries.insert(
            0,
            ListEntry::Pending {
                key,
                barcode: barcode.to_string(),
            },
        );
        key
    }

    pub fn discard_pending(&mut self, key: Uuid) -> bool {
        let before = self.entries.len();
        self.entries
            .retain(|e| !matches!(e, ListEntry::Pending { key: k, .. } if *k == key));
        before != self.entries.len()
    }

    /// 用后端确认的记录替换待确认项；若该记录已经通过推送到达则只移除待确认项
    pub fn confirm(&mut self, key: Uuid, record: Redemption) {
        self.discard_pending(key);
        self.insert(record);
    }

    /// 按排序位置插入已确认记录，id 已存在时忽略
    pub fn insert(&mut self, record: Redemption) -> bool {
        if self.contains_id(record.id) {
            return false;
        }
        let pos = self
            .entries
            .iter()
            .position(|e| match e {
                ListEntry::Pending { .. } => false,
                ListEntry::Confirmed(existing) => {
                    newest_first(&record, existing) != Ordering::Greater
                }
            })
            .unwrap_or(self.entries.len());
        self.entries.insert(pos, ListEntry::Confirmed(record));
        true
    }

    pub fn remove(&mut self, id: i64) -> Option<Redemption> {
        let pos = self.entries.iter().position(|e| e.id() == Some(id))?;
        match self.entries.remove(pos) {
            ListEntry::Confirmed(record) => Some(record),
            ListEntry::Pending { .. } => None,
        }
    }

    /// 用后端最新列表替换已确认记录，保留仍在提交中的待确认项
    pub fn replace_confirmed(&mut self, records: Vec<Redemption>) {
        let pending: Vec<ListEntry> = self
            .entries
            .drain(..)
            .filter(ListEntry::is_pending)
            .collect();
        let fresh = RedemptionList::new(records);
        self.entries = pending;
        self.entries.extend(fresh.entries);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn record(id: i64, minutes: i64) -> Redemption {
        Redemption {
            id,
            barcode: format!("CODE-{id}"),
            created_at: Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap()
                + Duration::minutes(minutes),
        }
    }

    fn ids(list: &RedemptionList) -> Vec<Option<i64>> {
        list.entries().iter().map(ListEntry::id).collect()
    }

    #[test]
    fn test_new_sorts_newest_first() {
        let list = RedemptionList::new(vec![record(1, 0), record(3, 20), record(2, 10)]);
        assert_eq!(ids(&list), vec![Some(3), Some(2), Some(1)]);
    }

    #[test]
    fn test_pending_then_confirm() {
        let mut list = RedemptionList::new(vec![record(1, 0)]);
        let key = list.push_pending("CODE-2");
        assert!(list.head().unwrap().is_pending());

        list.confirm(key, record(2, 10));
        assert_eq!(ids(&list), vec![Some(2), Some(1)]);
    }

    #[test]
    fn test_confirm_after_push_delivery_does_not_duplicate() {
        let mut list = RedemptionList::new(vec![record(1, 0)]);
        let key = list.push_pending("CODE-2");
        assert!(list.insert(record(2, 10)));
        list.confirm(key, record(2, 10));
        assert_eq!(ids(&list), vec![Some(2), Some(1)]);
    }

    #[test]
    fn test_discard_restores_exact_state() {
        let mut list = RedemptionList::new(vec![record(1, 0), record(2, 5)]);
        let before = list.clone();
        let key = list.push_pending("NEW");
        assert!(list.discard_pending(key));
        assert_eq!(list, before);
        assert!(!list.discard_pending(key));
    }

    #[test]
    fn test_remove_and_reinsert_keeps_position() {
        let mut list = RedemptionList::new(vec![record(1, 0), record(2, 5), record(3, 10)]);
        let before = list.clone();
        let removed = list.remove(2).unwrap();
        assert_eq!(ids(&list), vec![Some(3), Some(1)]);
        list.insert(removed);
        assert_eq!(list, before);
        assert!(list.remove(99).is_none());
    }

    #[test]
    fn test_replace_confirmed_keeps_pending() {
        let mut list = RedemptionList::new(vec![record(1, 0)]);
        list.push_pending("IN-FLIGHT");
        list.replace_confirmed(vec![record(5, 1), record(4, 2)]);
        assert_eq!(ids(&list), vec![None, Some(4), Some(5)]);
    }
}
