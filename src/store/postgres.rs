use async_trait::async_trait;
use sea_orm::sea_query::{Expr, Func};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Select, Set, SqlErr,
};
use tokio::sync::broadcast;

use super::{ChangeFeed, RecordFilter, RecordSlice, RecordStore};
use crate::entities::redemption_entity as redemptions;
use crate::error::{AppError, AppResult};
use crate::models::{RecordChange, Redemption};

/// Postgres 存储
///
/// 变更广播只覆盖本进程内的写入；多实例部署时各实例的订阅者只能看到本实例的变更。
#[derive(Clone)]
pub struct PgRecordStore {
    pool: DatabaseConnection,
    feed: ChangeFeed,
}

impl PgRecordStore {
    pub fn new(pool: DatabaseConnection) -> Self {
        Self {
            pool,
            feed: ChangeFeed::default(),
        }
    }

    fn filtered(filter: &RecordFilter) -> Select<redemptions::Entity> {
        let query = redemptions::Entity::find();
        match filter.search_term() {
            Some(term) => query.filter(
                Expr::expr(Func::lower(Expr::col(redemptions::Column::Barcode)))
                    .like(format!("%{}%", escape_like(&term.to_lowercase()))),
            ),
            None => query,
        }
    }
}

/// 转义 LIKE 通配符（Postgres 默认转义符为反斜杠）
fn escape_like(term: &str) -> String {
    let mut out = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn list(&self, filter: &RecordFilter) -> AppResult<RecordSlice> {
        let total = Self::filtered(filter).count(&self.pool).await?;

        let mut query = Self::filtered(filter)
            .order_by_desc(redemptions::Column::CreatedAt)
            .order_by_desc(redemptions::Column::Id)
            .offset(filter.offset);
        if let Some(limit) = filter.limit {
            query = query.limit(limit);
        }

        let items = query
            .all(&self.pool)
            .await?
            .into_iter()
            .map(Into::into)
            .collect();

        Ok(RecordSlice { items, total })
    }

    async fn insert(&self, barcode: &str) -> AppResult<Redemption> {
        // created_at 不设置，由数据库默认值 NOW() 填充并通过 RETURNING 取回
        let result = redemptions::ActiveModel {
            barcode: Set(barcode.to_string()),
            ..Default::default()
        }
        .insert(&self.pool)
        .await;

        let model = match result {
            Ok(model) => model,
            Err(e) if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
                return Err(AppError::DuplicateRecord {
                    barcode: barcode.to_string(),
                    first_recorded_at: None,
                });
            }
            Err(e) => return Err(e.into()),
        };

        let record = Redemption::from(model);
        self.feed.publish(RecordChange::Inserted {
            record: record.clone(),
        });
        Ok(record)
    }

    async fn delete(&self, id: i64) -> AppResult<()> {
        let result = redemptions::Entity::delete_by_id(id)
            .exec(&self.pool)
            .await?;
        if result.rows_affected == 0 {
            return Err(AppError::NotFound(format!("Redemption {id} not found")));
        }

        self.feed.publish(RecordChange::Deleted { id });
        Ok(())
    }

    async fn find_by_barcode(&self, barcode: &str) -> AppResult<Option<Redemption>> {
        let model = redemptions::Entity::find()
            .filter(redemptions::Column::Barcode.eq(barcode))
            .one(&self.pool)
            .await?;
        Ok(model.map(Into::into))
    }

    fn subscribe(&self) -> broadcast::Receiver<RecordChange> {
        self.feed.subscribe()
    }
}
