use std::collections::HashSet;
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode, Url};
use serde::de::DeserializeOwned;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::error::{AppError, AppResult};
use crate::models::{
    ApiError, ApiResponse, CreateRedemptionRequest, PaginatedResponse, RecordChange, Redemption,
};
use crate::store::{ChangeFeed, RecordFilter, RecordSlice, RecordStore};

const API_PREFIX: &str = "api/v1/redemptions";
const FETCH_PAGE_SIZE: u32 = 100;

/// 通过 HTTP API 访问兑换记录的客户端存储
///
/// 变更订阅用定时轮询实现：每次拉取全量列表，与上次快照按 id 做差，
/// 新出现的记录推送 `Inserted`，消失的推送 `Deleted`。
pub struct RemoteRecordStore {
    api: RedemptionApi,
    poll_interval: Duration,
    feed: ChangeFeed,
    poller: OnceLock<JoinHandle<()>>,
}

#[derive(Clone)]
struct RedemptionApi {
    client: Client,
    base_url: Url,
}

impl RemoteRecordStore {
    pub fn new(base_url: &str, poll_interval: Duration) -> AppResult<Self> {
        let mut base_url = Url::parse(base_url)
            .map_err(|e| AppError::ConfigError(format!("Invalid API base URL {base_url}: {e}")))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self {
            api: RedemptionApi {
                client: Client::new(),
                base_url,
            },
            poll_interval,
            feed: ChangeFeed::default(),
            poller: OnceLock::new(),
        })
    }
}

impl RemoteRecordStore {
    /// 订阅变更，以调用方已加载的记录 id 作为对比基线
    ///
    /// 基线晚于调用方的列表快照会漏掉两者之间的变更，所以先 `list` 再用
    /// 其结果调用本方法。`baseline` 为 None 时以轮询的第一次结果为基线。
    /// 轮询任务只启动一次，之后的调用沿用已有基线。
    pub fn subscribe_from(
        &self,
        baseline: Option<HashSet<i64>>,
    ) -> broadcast::Receiver<RecordChange> {
        let rx = self.feed.subscribe();
        self.poller.get_or_init(|| {
            let api = self.api.clone();
            let feed = self.feed.clone();
            let period = self.poll_interval;
            tokio::spawn(poll_changes(api, feed, period, baseline))
        });
        rx
    }
}

impl Drop for RemoteRecordStore {
    fn drop(&mut self) {
        if let Some(handle) = self.poller.get() {
            handle.abort();
        }
    }
}

impl RedemptionApi {
    fn url(&self, segments: &[&str]) -> AppResult<Url> {
        let mut url = self
            .base_url
            .join(API_PREFIX)
            .map_err(|e| AppError::ConfigError(format!("Invalid API URL: {e}")))?;
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| AppError::ConfigError("API base URL cannot be a base".to_string()))?;
            for segment in segments {
                path.push(segment);
            }
        }
        Ok(url)
    }

    async fn fetch_page(
        &self,
        search: Option<&str>,
        page: u32,
        per_page: u32,
    ) -> AppResult<PaginatedResponse<Redemption>> {
        let mut request = self
            .client
            .get(self.url(&[])?)
            .query(&[("page", page), ("per_page", per_page)]);
        if let Some(term) = search {
            request = request.query(&[("search", term)]);
        }

        parse_response(request.send().await?)
            .await?
            .ok_or_else(|| AppError::ExternalApiError("Empty list response".to_string()))
    }

    /// 逐页拉取，凑够 `wanted` 条（None 为全部）即停止；返回记录与后端总数
    async fn fetch_prefix(
        &self,
        search: Option<&str>,
        wanted: Option<usize>,
    ) -> AppResult<(Vec<Redemption>, u64)> {
        let mut all = Vec::new();
        let mut page = 1u32;

        loop {
            let data = self.fetch_page(search, page, FETCH_PAGE_SIZE).await?;
            let total = data.total.max(0) as u64;
            all.extend(data.data);

            let enough = wanted.is_some_and(|n| all.len() >= n);
            if enough || i64::from(page) >= data.total_pages {
                return Ok((all, total));
            }
            page += 1;
        }
    }

    async fn fetch_all(&self) -> AppResult<Vec<Redemption>> {
        let (all, _) = self.fetch_prefix(None, None).await?;
        Ok(all)
    }
}

/// offset 恰好落在页边界时可以直接映射为一次分页请求
fn aligned_page(offset: u64, limit: Option<u64>) -> Option<(u32, u32)> {
    let limit = limit?;
    if limit == 0 || limit > u64::from(FETCH_PAGE_SIZE) || offset % limit != 0 {
        return None;
    }
    let page = u32::try_from(offset / limit + 1).ok()?;
    Some((page, limit as u32))
}

async fn parse_response<T: DeserializeOwned>(response: reqwest::Response) -> AppResult<Option<T>> {
    let status = response.status();
    let body: ApiResponse<T> = response.json().await?;
    if !body.success {
        return Err(remote_error(status, body.error));
    }
    Ok(body.data)
}

/// 把后端错误码还原为本地错误类型
fn remote_error(status: StatusCode, error: Option<ApiError>) -> AppError {
    let Some(error) = error else {
        return AppError::ExternalApiError(format!("Request failed with status {status}"));
    };

    match error.code.as_str() {
        "VALIDATION_ERROR" => AppError::ValidationError(error.message),
        "NOT_FOUND" => AppError::NotFound(error.message),
        "DUPLICATE_RECORD" => {
            let details = error.details.unwrap_or_default();
            let barcode = details["barcode"].as_str().unwrap_or_default().to_string();
            let first_recorded_at = details["first_recorded_at"]
                .as_str()
                .and_then(|s| s.parse::<DateTime<Utc>>().ok());
            AppError::DuplicateRecord {
                barcode,
                first_recorded_at,
            }
        }
        _ => AppError::ExternalApiError(format!("{status}: {}", error.message)),
    }
}

#[async_trait]
impl RecordStore for RemoteRecordStore {
    async fn list(&self, filter: &RecordFilter) -> AppResult<RecordSlice> {
        let search = filter.search_term();

        if let Some((page, per_page)) = aligned_page(filter.offset, filter.limit) {
            let data = self.api.fetch_page(search, page, per_page).await?;
            return Ok(RecordSlice {
                items: data.data,
                total: data.total.max(0) as u64,
            });
        }

        let offset = filter.offset as usize;
        let wanted = filter.limit.map(|l| offset.saturating_add(l as usize));
        let (all, total) = self.api.fetch_prefix(search, wanted).await?;
        let items = all
            .into_iter()
            .skip(offset)
            .take(filter.limit.map_or(usize::MAX, |l| l as usize))
            .collect();
        Ok(RecordSlice { items, total })
    }

    async fn insert(&self, barcode: &str) -> AppResult<Redemption> {
        let response = self
            .api
            .client
            .post(self.api.url(&[])?)
            .json(&CreateRedemptionRequest {
                barcode: barcode.to_string(),
            })
            .send()
            .await?;

        let record: Redemption = parse_response(response)
            .await?
            .ok_or_else(|| AppError::ExternalApiError("Empty create response".to_string()))?;
        Ok(record)
    }

    async fn delete(&self, id: i64) -> AppResult<()> {
        let id = id.to_string();
        let response = self
            .api
            .client
            .delete(self.api.url(&[id.as_str()])?)
            .send()
            .await?;
        parse_response::<serde_json::Value>(response).await?;
        Ok(())
    }

    async fn find_by_barcode(&self, barcode: &str) -> AppResult<Option<Redemption>> {
        let response = self
            .api
            .client
            .get(self.api.url(&["lookup", barcode])?)
            .send()
            .await?;

        match parse_response::<Redemption>(response).await {
            Ok(record) => Ok(record),
            Err(AppError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<RecordChange> {
        self.subscribe_from(None)
    }
}

async fn poll_changes(
    api: RedemptionApi,
    feed: ChangeFeed,
    period: Duration,
    mut known: Option<HashSet<i64>>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let records = match api.fetch_all().await {
            Ok(records) => records,
            Err(e) => {
                log::warn!("Failed to poll redemptions: {e}");
                continue;
            }
        };

        let current: HashSet<i64> = records.iter().map(|r| r.id).collect();
        // 第一次只建立快照，不推送
        if let Some(previous) = &known {
            for change in diff_snapshot(previous, &current, &records) {
                feed.publish(change);
            }
        }
        known = Some(current);
    }
}

/// 计算两次快照之间的变更；新增按时间正序推送，便于接收方逐条插到表头
fn diff_snapshot(
    previous: &HashSet<i64>,
    current: &HashSet<i64>,
    records: &[Redemption],
) -> Vec<RecordChange> {
    let mut changes: Vec<RecordChange> = previous
        .difference(current)
        .map(|id| RecordChange::Deleted { id: *id })
        .collect();
    changes.extend(
        records
            .iter()
            .rev()
            .filter(|r| !previous.contains(&r.id))
            .map(|r| RecordChange::Inserted { record: r.clone() }),
    );
    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(id: i64, minute: u32) -> Redemption {
        Redemption {
            id,
            barcode: format!("CODE-{id}"),
            created_at: Utc.with_ymd_and_hms(2024, 6, 1, 9, minute, 0).unwrap(),
        }
    }

    #[test]
    fn test_diff_snapshot() {
        let previous: HashSet<i64> = [1, 2].into_iter().collect();
        // 后端顺序：新的在前
        let records = vec![record(4, 3), record(3, 2), record(1, 0)];
        let current: HashSet<i64> = records.iter().map(|r| r.id).collect();

        let changes = diff_snapshot(&previous, &current, &records);
        assert_eq!(
            changes,
            vec![
                RecordChange::Deleted { id: 2 },
                RecordChange::Inserted { record: record(3, 2) },
                RecordChange::Inserted { record: record(4, 3) },
            ]
        );
    }

    #[test]
    fn test_aligned_page() {
        assert_eq!(aligned_page(0, Some(20)), Some((1, 20)));
        assert_eq!(aligned_page(40, Some(20)), Some((3, 20)));
        assert_eq!(aligned_page(5, Some(10)), None);
        assert_eq!(aligned_page(0, Some(500)), None);
        assert_eq!(aligned_page(0, Some(0)), None);
        assert_eq!(aligned_page(0, None), None);
    }

    #[test]
    fn test_remote_error_mapping() {
        let err = remote_error(
            StatusCode::CONFLICT,
            Some(ApiError {
                code: "DUPLICATE_RECORD".to_string(),
                message: "dup".to_string(),
                details: Some(serde_json::json!({
                    "barcode": "U159001922437",
                    "first_recorded_at": "2024-06-01T09:00:00Z"
                })),
            }),
        );
        match err {
            AppError::DuplicateRecord {
                barcode,
                first_recorded_at,
            } => {
                assert_eq!(barcode, "U159001922437");
                assert_eq!(
                    first_recorded_at,
                    Some(Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap())
                );
            }
            other => panic!("unexpected: {other:?}"),
        }

        let err = remote_error(StatusCode::BAD_GATEWAY, None);
        assert!(matches!(err, AppError::ExternalApiError(_)));
    }

    #[test]
    fn test_url_building_encodes_segments() {
        let store =
            RemoteRecordStore::new("http://localhost:8080", Duration::from_secs(5)).unwrap();
        let url = store.api.url(&["lookup", "A B/1"]).unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:8080/api/v1/redemptions/lookup/A%20B%2F1"
        );
        assert!(RemoteRecordStore::new("not a url", Duration::from_secs(5)).is_err());
    }
}
