use sea_orm_migration::prelude::*;

/// 兑换记录表
#[derive(DeriveIden)]
enum Redemptions {
    Table,
    Id,
    Barcode,
    CreatedAt,
}

#[derive(DeriveMigrationName)]
pub struct Migration;

/// 条码在整张表内唯一，重复兑换由唯一索引拦截
#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Redemptions::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Redemptions::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Redemptions::Barcode)
                            .string_len(255)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Redemptions::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::cust("NOW()")),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_redemptions_barcode_unique")
                    .table(Redemptions::Table)
                    .col(Redemptions::Barcode)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // 列表按创建时间倒序
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_redemptions_created_at")
                    .table(Redemptions::Table)
                    .col((Redemptions::CreatedAt, IndexOrder::Desc))
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(
                Table::drop()
                    .if_exists()
                    .table(Redemptions::Table)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }
}
