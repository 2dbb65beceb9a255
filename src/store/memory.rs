use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{RwLock, broadcast};

use super::{ChangeFeed, RecordFilter, RecordSlice, RecordStore};
use crate::error::{AppError, AppResult};
use crate::models::{RecordChange, Redemption};

#[derive(Default)]
struct MemoryState {
    records: Vec<Redemption>,
    next_id: i64,
}

/// 进程内存储，`database.url = "memory"` 时启用，也是测试用的后端
#[derive(Default)]
pub struct MemoryRecordStore {
    state: RwLock<MemoryState>,
    feed: ChangeFeed,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 预置记录（id 由调用方给定），新记录 id 从最大值之后开始
    pub fn with_records(records: Vec<Redemption>) -> Self {
        let next_id = records.iter().map(|r| r.id).max().unwrap_or(0);
        Self {
            state: RwLock::new(MemoryState { records, next_id }),
            feed: ChangeFeed::default(),
        }
    }

    /// 指定变更广播容量，订阅方落后超过该数量会收到 Lagged
    pub fn with_change_capacity(capacity: usize) -> Self {
        Self {
            state: RwLock::default(),
            feed: ChangeFeed::new(capacity),
        }
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn list(&self, filter: &RecordFilter) -> AppResult<RecordSlice> {
        let state = self.state.read().await;
        let needle = filter.search_term().map(str::to_lowercase);

        let mut matched: Vec<Redemption> = state
            .records
            .iter()
            .filter(|r| match &needle {
                Some(n) => r.barcode.to_lowercase().contains(n),
                None => true,
            })
            .cloned()
            .collect();
        matched.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });

        let total = matched.len() as u64;
        let items = matched
            .into_iter()
            .skip(filter.offset as usize)
            .take(filter.limit.map_or(usize::MAX, |l| l as usize))
            .collect();

        Ok(RecordSlice { items, total })
    }

    async fn insert(&self, barcode: &str) -> AppResult<Redemption> {
        let record = {
            let mut state = self.state.write().await;
            if state.records.iter().any(|r| r.barcode == barcode) {
                return Err(AppError::DuplicateRecord {
                    barcode: barcode.to_string(),
                    first_recorded_at: None,
                });
            }

            state.next_id += 1;
            let record = Redemption {
                id: state.next_id,
                barcode: barcode.to_string(),
                created_at: Utc::now(),
            };
            state.records.push(record.clone());
            record
        };

        self.feed.publish(RecordChange::Inserted {
            record: record.clone(),
        });
        Ok(record)
    }

    async fn delete(&self, id: i64) -> AppResult<()> {
        {
            let mut state = self.state.write().await;
            let Some(pos) = state.records.iter().position(|r| r.id == id) else {
                return Err(AppError::NotFound(format!("Redemption {id} not found")));
            };
            state.records.remove(pos);
        }

        self.feed.publish(RecordChange::Deleted { id });
        Ok(())
    }

    async fn find_by_barcode(&self, barcode: &str) -> AppResult<Option<Redemption>> {
        let state = self.state.read().await;
        Ok(state.records.iter().find(|r| r.barcode == barcode).cloned())
    }

    fn subscribe(&self) -> broadcast::Receiver<RecordChange> {
        self.feed.subscribe()
    }
}
