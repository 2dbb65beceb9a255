use std::sync::Arc;

use tokio::sync::broadcast;

use crate::error::{AppError, AppResult};
use crate::models::{
    CreateRedemptionRequest, PaginatedResponse, PaginationParams, RecordChange, Redemption,
    RedemptionPageResponse, RedemptionQuery,
};
use crate::store::{RecordFilter, RecordStore};
use crate::utils::BarcodePolicy;

#[derive(Clone)]
pub struct RedemptionService {
    store: Arc<dyn RecordStore>,
    policy: BarcodePolicy,
}

impl RedemptionService {
    pub fn new(store: Arc<dyn RecordStore>, policy: BarcodePolicy) -> Self {
        Self { store, policy }
    }

    /// 分页获取兑换记录（按兑换时间倒序）
    pub async fn list(&self, query: &RedemptionQuery) -> AppResult<RedemptionPageResponse> {
        let params = PaginationParams::new(query.page, query.per_page);
        let filter = RecordFilter {
            search: query.search.clone(),
            offset: params.get_offset() as u64,
            limit: Some(params.get_limit() as u64),
        };

        let slice = self.store.list(&filter).await?;

        Ok(PaginatedResponse::new(
            slice.items,
            params.get_page(),
            params.get_page_size(),
            slice.total as i64,
        ))
    }

    /// 新建兑换记录
    ///
    /// 逻辑:
    /// 1. 按配置的条码策略校验，失败直接返回，不访问存储
    /// 2. 插入记录
    /// 3. 条码重复时查出首次兑换时间，拼进错误信息
    pub async fn create(&self, request: CreateRedemptionRequest) -> AppResult<Redemption> {
        let barcode = self.policy.validate(&request.barcode)?;

        match self.store.insert(&barcode).await {
            Ok(record) => {
                log::info!("Redemption recorded: id={} barcode={}", record.id, record.barcode);
                Ok(record)
            }
            Err(AppError::DuplicateRecord {
                barcode,
                first_recorded_at,
            }) => {
                let first_recorded_at = match first_recorded_at {
                    Some(ts) => Some(ts),
                    None => self.lookup_first_recorded_at(&barcode).await,
                };
                Err(AppError::DuplicateRecord {
                    barcode,
                    first_recorded_at,
                })
            }
            Err(e) => {
                log::error!("Failed to record redemption {barcode}: {e}");
                Err(e)
            }
        }
    }

    pub async fn delete(&self, id: i64) -> AppResult<()> {
        self.store.delete(id).await?;
        log::info!("Redemption deleted: id={id}");
        Ok(())
    }

    pub async fn find_by_barcode(&self, barcode: &str) -> AppResult<Redemption> {
        self.store
            .find_by_barcode(barcode.trim())
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Barcode {barcode} has not been redeemed")))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RecordChange> {
        self.store.subscribe()
    }

    // 查不到时只是少了时间信息，不影响重复判定
    async fn lookup_first_recorded_at(&self, barcode: &str) -> Option<chrono::DateTime<chrono::Utc>> {
        match self.store.find_by_barcode(barcode).await {
            Ok(found) => found.map(|r| r.created_at),
            Err(e) => {
                log::warn!("Failed to look up original redemption for {barcode}: {e}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryRecordStore;

    fn service(policy: BarcodePolicy) -> (RedemptionService, Arc<MemoryRecordStore>) {
        let store = Arc::new(MemoryRecordStore::new());
        (RedemptionService::new(store.clone(), policy), store)
    }

    fn request(barcode: &str) -> CreateRedemptionRequest {
        CreateRedemptionRequest {
            barcode: barcode.to_string(),
        }
    }

    #[tokio::test]
    async fn test_create_and_duplicate_carries_first_timestamp() {
        let (svc, store) = service(BarcodePolicy::strict_u12());

        let first = svc.create(request("U159001922437")).await.unwrap();
        let page = svc.list(&RedemptionQuery::default()).await.unwrap();
        assert_eq!(page.data[0].barcode, "U159001922437");

        match svc.create(request("U159001922437")).await {
            Err(AppError::DuplicateRecord {
                barcode,
                first_recorded_at,
            }) => {
                assert_eq!(barcode, "U159001922437");
                assert_eq!(first_recorded_at, Some(first.created_at));
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_invalid_barcode_never_reaches_store() {
        let (svc, store) = service(BarcodePolicy::strict_u12());
        assert!(matches!(
            svc.create(request("")).await,
            Err(AppError::ValidationError(_))
        ));
        assert!(matches!(
            svc.create(request("ABC")).await,
            Err(AppError::ValidationError(_))
        ));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_list_pagination() {
        let (svc, _store) = service(BarcodePolicy::NonEmpty);
        for i in 0..5 {
            svc.create(request(&format!("CODE-{i}"))).await.unwrap();
        }

        let page = svc
            .list(&RedemptionQuery {
                search: Some("code".to_string()),
                page: Some(2),
                per_page: Some(2),
            })
            .await
            .unwrap();
        assert_eq!(page.total, 5);
        assert_eq!(page.total_pages, 3);
        assert_eq!(page.data.len(), 2);
    }

    #[tokio::test]
    async fn test_find_by_barcode() {
        let (svc, _store) = service(BarcodePolicy::NonEmpty);
        svc.create(request("XYZ")).await.unwrap();
        assert_eq!(svc.find_by_barcode("XYZ").await.unwrap().barcode, "XYZ");
        assert!(matches!(
            svc.find_by_barcode("nope").await,
            Err(AppError::NotFound(_))
        ));
    }
}
