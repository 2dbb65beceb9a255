//! 兑换记录存储抽象
//!
//! 服务端用 `PgRecordStore`（sea-orm / Postgres），开发与测试用 `MemoryRecordStore`，
//! 客户端经 HTTP 访问时用 `external::RemoteRecordStore`。三者对外语义一致：
//! - 列表按 created_at 倒序（同一时间按 id 倒序）
//! - 条码唯一，重复插入返回 `AppError::DuplicateRecord`
//! - 删除不存在的记录返回 `AppError::NotFound`，不产生任何变更
//! - 每次成功的插入/删除恰好推送一条 `RecordChange`

pub mod memory;
pub mod postgres;

pub use memory::MemoryRecordStore;
pub use postgres::PgRecordStore;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::AppResult;
use crate::models::{RecordChange, Redemption};

/// 变更广播容量；订阅方落后超过该数量会收到 Lagged
pub const CHANGE_FEED_CAPACITY: usize = 256;

#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    /// 条码子串，不区分大小写
    pub search: Option<String>,
    pub offset: u64,
    /// None 表示不限
    pub limit: Option<u64>,
}

impl RecordFilter {
    pub fn search_term(&self) -> Option<&str> {
        self.search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone, Default)]
pub struct RecordSlice {
    pub items: Vec<Redemption>,
    /// 过滤后、分页前的总数
    pub total: u64,
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn list(&self, filter: &RecordFilter) -> AppResult<RecordSlice>;

    async fn insert(&self, barcode: &str) -> AppResult<Redemption>;

    async fn delete(&self, id: i64) -> AppResult<()>;

    async fn find_by_barcode(&self, barcode: &str) -> AppResult<Option<Redemption>>;

    fn subscribe(&self) -> broadcast::Receiver<RecordChange>;
}

#[async_trait]
impl<T: RecordStore + ?Sized> RecordStore for Arc<T> {
    async fn list(&self, filter: &RecordFilter) -> AppResult<RecordSlice> {
        (**self).list(filter).await
    }

    async fn insert(&self, barcode: &str) -> AppResult<Redemption> {
        (**self).insert(barcode).await
    }

    async fn delete(&self, id: i64) -> AppResult<()> {
        (**self).delete(id).await
    }

    async fn find_by_barcode(&self, barcode: &str) -> AppResult<Option<Redemption>> {
        (**self).find_by_barcode(barcode).await
    }

    fn subscribe(&self) -> broadcast::Receiver<RecordChange> {
        (**self).subscribe()
    }
}

/// 进程内变更广播
#[derive(Clone)]
pub struct ChangeFeed {
    tx: broadcast::Sender<RecordChange>,
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new(CHANGE_FEED_CAPACITY)
    }
}

impl ChangeFeed {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, change: RecordChange) {
        // 没有订阅者时 send 返回 Err，属正常情况
        let receivers = self.tx.send(change).unwrap_or(0);
        log::debug!("Published record change to {receivers} subscriber(s)");
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RecordChange> {
        self.tx.subscribe()
    }
}
