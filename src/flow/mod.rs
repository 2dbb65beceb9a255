//! 客户端兑换提交流程
//!
//! 对应界面上的表单 + 列表：校验条码、提交到存储（可选乐观更新）、
//! 按结果回滚或确认，并把结果转换成字段错误与提示消息。所有错误都在这里
//! 收口，每次提交/删除都以可见的状态结束。

pub mod list;

pub use list::{ListEntry, RedemptionList};

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;

use crate::error::{AppError, AppResult, duplicate_message};
use crate::models::{RecordChange, Redemption};
use crate::scanner::ScanError;
use crate::store::{RecordFilter, RecordStore};
use crate::utils::BarcodePolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationLevel {
    Success,
    Error,
}

/// 提示消息（toast）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub level: NotificationLevel,
    pub title: String,
    pub description: String,
}

impl Notification {
    fn success(description: impl Into<String>) -> Self {
        Self {
            level: NotificationLevel::Success,
            title: "Success".to_string(),
            description: description.into(),
        }
    }

    fn error(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            level: NotificationLevel::Error,
            title: title.into(),
            description: description.into(),
        }
    }
}

/// 条码输入框
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormState {
    pub input: String,
    pub field_error: Option<String>,
}

pub struct RedemptionFlow<S: RecordStore> {
    store: S,
    policy: BarcodePolicy,
    optimistic: bool,
    list: RedemptionList,
    form: FormState,
    notifications: VecDeque<Notification>,
}

impl<S: RecordStore> RedemptionFlow<S> {
    pub fn new(store: S, policy: BarcodePolicy) -> Self {
        Self {
            store,
            policy,
            optimistic: true,
            list: RedemptionList::default(),
            form: FormState::default(),
            notifications: VecDeque::new(),
        }
    }

    pub fn with_optimistic(mut self, optimistic: bool) -> Self {
        self.optimistic = optimistic;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn list(&self) -> &RedemptionList {
        &self.list
    }

    pub fn form(&self) -> &FormState {
        &self.form
    }

    pub fn set_input(&mut self, value: impl Into<String>) {
        self.form.input = value.into();
        self.form.field_error = None;
    }

    pub fn take_notifications(&mut self) -> Vec<Notification> {
        self.notifications.drain(..).collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RecordChange> {
        self.store.subscribe()
    }

    /// 从存储重新拉取列表
    pub async fn refresh(&mut self) -> AppResult<()> {
        match self.store.list(&RecordFilter::default()).await {
            Ok(slice) => {
                self.list.replace_confirmed(slice.items);
                Ok(())
            }
            Err(e) => {
                log::error!("Failed to load redemptions: {e}");
                self.notify(Notification::error(
                    "Error",
                    "Failed to load redemption records.",
                ));
                Err(e)
            }
        }
    }

    /// 提交输入框中的条码
    pub async fn submit(&mut self) -> AppResult<Redemption> {
        self.form.field_error = None;

        let barcode = match self.policy.validate(&self.form.input) {
            Ok(barcode) => barcode,
            Err(e) => {
                if let AppError::ValidationError(msg) = &e {
                    self.form.field_error = Some(msg.clone());
                }
                self.notify(Notification::error(
                    "Error",
                    "Missing or invalid fields. Failed to record redemption.",
                ));
                return Err(e);
            }
        };

        let pending = self.optimistic.then(|| self.list.push_pending(&barcode));

        match self.store.insert(&barcode).await {
            Ok(record) => {
                match pending {
                    Some(key) => self.list.confirm(key, record.clone()),
                    None => {
                        self.list.insert(record.clone());
                    }
                }
                self.notify(Notification::success(format!(
                    "Redemption recorded: {}",
                    record.barcode
                )));
                self.form = FormState::default();
                Ok(record)
            }
            Err(AppError::DuplicateRecord {
                barcode,
                first_recorded_at,
            }) => {
                if let Some(key) = pending {
                    self.list.discard_pending(key);
                }
                let first_recorded_at = match first_recorded_at {
                    Some(ts) => Some(ts),
                    None => self.first_recorded_at(&barcode).await,
                };
                let message = duplicate_message(&barcode, &first_recorded_at);
                self.form.field_error = Some(message.clone());
                self.notify(Notification::error("Duplicate barcode", message));
                Err(AppError::DuplicateRecord {
                    barcode,
                    first_recorded_at,
                })
            }
            Err(e) => {
                if let Some(key) = pending {
                    self.list.discard_pending(key);
                }
                log::error!("Failed to record redemption {barcode}: {e}");
                // 输入保留，方便重试
                self.notify(Notification::error(
                    "Error",
                    "Database Error: Failed to record redemption.",
                ));
                Err(e)
            }
        }
    }

    /// 填入条码后直接提交
    pub async fn submit_barcode(&mut self, raw: &str) -> AppResult<Redemption> {
        self.set_input(raw);
        self.submit().await
    }

    /// 删除记录：先从列表移除，后端失败时放回原位
    pub async fn delete(&mut self, id: i64) -> AppResult<()> {
        let removed = self.list.remove(id);

        match self.store.delete(id).await {
            Ok(()) => {
                self.notify(Notification::success("Redemption record deleted."));
                Ok(())
            }
            Err(e) => {
                if let Some(record) = removed {
                    self.list.insert(record);
                }
                log::warn!("Failed to delete redemption {id}: {e}");
                let description = match &e {
                    AppError::NotFound(_) => "Redemption record no longer exists.",
                    _ => "Failed to delete redemption record.",
                };
                self.notify(Notification::error("Error", description));
                Err(e)
            }
        }
    }

    /// 应用一条推送变更，返回列表是否发生变化
    pub fn apply_change(&mut self, change: RecordChange) -> bool {
        match change {
            RecordChange::Inserted { record } => self.list.insert(record),
            RecordChange::Deleted { id } => self.list.remove(id).is_some(),
        }
    }

    /// 处理订阅中已到达的全部变更；落后太多时整体重新拉取
    pub async fn drain_changes(
        &mut self,
        rx: &mut broadcast::Receiver<RecordChange>,
    ) -> AppResult<usize> {
        let mut applied = 0;
        loop {
            match rx.try_recv() {
                Ok(change) => {
                    if self.apply_change(change) {
                        applied += 1;
                    }
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
                Err(TryRecvError::Lagged(skipped)) => {
                    log::warn!("Change subscription lagged by {skipped}, reloading list");
                    self.refresh().await?;
                }
            }
        }
        Ok(applied)
    }

    /// 把扫码结果写入表单
    pub fn accept_scan(&mut self, result: Result<String, ScanError>) {
        match result {
            Ok(barcode) => {
                self.set_input(barcode);
                if let Err(AppError::ValidationError(msg)) = self.policy.validate(&self.form.input)
                {
                    self.form.field_error = Some(msg);
                }
            }
            Err(ScanError::Cancelled) => {}
            Err(ScanError::TimedOut { after }) => {
                self.notify(Notification::error(
                    "Barcode not found",
                    format!("No barcode detected within {}. Try again.", seconds(after)),
                ));
            }
            Err(ScanError::PermissionDenied) => {
                self.notify(Notification::error(
                    "Camera access denied",
                    "Allow camera access and reopen the scanner.",
                ));
            }
            Err(ScanError::CameraUnavailable(msg)) => {
                self.notify(Notification::error("Camera unavailable", msg));
            }
            Err(ScanError::Unsupported) => {
                self.notify(Notification::error(
                    "Scanning not supported",
                    "This device cannot detect barcodes. Enter the code manually.",
                ));
            }
        }
    }

    fn notify(&mut self, notification: Notification) {
        self.notifications.push_back(notification);
    }

    async fn first_recorded_at(&self, barcode: &str) -> Option<DateTime<Utc>> {
        match self.store.find_by_barcode(barcode).await {
            Ok(found) => found.map(|r| r.created_at),
            Err(e) => {
                log::warn!("Failed to look up original redemption for {barcode}: {e}");
                None
            }
        }
    }
}

fn seconds(d: Duration) -> String {
    format!("{} seconds", d.as_secs())
}
