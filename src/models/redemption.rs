use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::entities::redemption_entity;

use super::PaginatedResponse;

/// 兑换记录（已持久化，所有字段由后端确定）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Redemption {
    /// 记录ID
    pub id: i64,
    /// 条码
    pub barcode: String,
    /// 兑换时间
    pub created_at: DateTime<Utc>,
}

impl From<redemption_entity::Model> for Redemption {
    fn from(m: redemption_entity::Model) -> Self {
        Redemption {
            id: m.id,
            barcode: m.barcode,
            created_at: m.created_at,
        }
    }
}

/// 新建兑换请求
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateRedemptionRequest {
    /// 扫码或手动输入的条码
    pub barcode: String,
}

/// 兑换记录查询参数
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct RedemptionQuery {
    /// 条码关键字（不区分大小写）
    pub search: Option<String>,
    /// 页码 (默认 1)
    pub page: Option<u32>,
    /// 每页数量 (默认 20)
    pub per_page: Option<u32>,
}

/// 变更推送事件，SSE 与客户端轮询共用
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecordChange {
    Inserted { record: Redemption },
    Deleted { id: i64 },
}

impl RecordChange {
    pub fn record_id(&self) -> i64 {
        match self {
            RecordChange::Inserted { record } => record.id,
            RecordChange::Deleted { id } => *id,
        }
    }
}

/// 兑换记录分页响应
pub type RedemptionPageResponse = PaginatedResponse<Redemption>;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_record_change_wire_format() {
        let record = Redemption {
            id: 7,
            barcode: "U159001922437".to_string(),
            created_at: Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap(),
        };
        let value = serde_json::to_value(RecordChange::Inserted { record }).unwrap();
        assert_eq!(value["type"], "inserted");
        assert_eq!(value["record"]["barcode"], "U159001922437");

        let deleted: RecordChange =
            serde_json::from_str(r#"{"type":"deleted","id":7}"#).unwrap();
        assert_eq!(deleted, RecordChange::Deleted { id: 7 });
        assert_eq!(deleted.record_id(), 7);
    }
}
