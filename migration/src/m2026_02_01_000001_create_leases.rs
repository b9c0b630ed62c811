use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Check if we're using SQLite and apply SQLite-specific schema
        let db_backend = manager.get_database_backend();

        if db_backend == sea_orm::DatabaseBackend::Sqlite {
            // SQLite-compatible version using TEXT for UUID columns
            manager
                .create_table(
                    Table::create()
                        .table(Lease::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Lease::Id).text().not_null().primary_key())
                        .col(ColumnDef::new(Lease::ReferenceNumber).string().not_null())
                        .col(ColumnDef::new(Lease::SerialNumber).string().not_null())
                        .col(ColumnDef::new(Lease::LeaseType).string().not_null())
                        .col(ColumnDef::new(Lease::Zone).string().not_null())
                        .col(ColumnDef::new(Lease::TenantId).text().not_null())
                        .col(ColumnDef::new(Lease::LandlordId).text().null())
                        .col(ColumnDef::new(Lease::UnitId).text().null())
                        .col(ColumnDef::new(Lease::TenantPhone).string().not_null())
                        .col(ColumnDef::new(Lease::ApproverContact).string().null())
                        .col(ColumnDef::new(Lease::WorkflowState).string().not_null())
                        .col(ColumnDef::new(Lease::Notes).text().null())
                        .col(ColumnDef::new(Lease::RenewalOfferedAt).timestamp().null())
                        .col(
                            ColumnDef::new(Lease::CreatedAt)
                                .timestamp()
                                .not_null()
                                .default(Expr::current_timestamp()),
                        )
                        .col(
                            ColumnDef::new(Lease::UpdatedAt)
                                .timestamp()
                                .not_null()
                                .default(Expr::current_timestamp()),
                        )
                        .col(ColumnDef::new(Lease::DeletedAt).timestamp().null())
                        .to_owned(),
                )
                .await?;
        } else {
            // PostgreSQL version with proper UUID and timestamptz support
            manager
                .create_table(
                    Table::create()
                        .table(Lease::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Lease::Id).uuid().not_null().primary_key())
                        .col(ColumnDef::new(Lease::ReferenceNumber).string().not_null())
                        .col(ColumnDef::new(Lease::SerialNumber).string().not_null())
                        .col(ColumnDef::new(Lease::LeaseType).string().not_null())
                        .col(ColumnDef::new(Lease::Zone).string().not_null())
                        .col(ColumnDef::new(Lease::TenantId).uuid().not_null())
                        .col(ColumnDef::new(Lease::LandlordId).uuid().null())
                        .col(ColumnDef::new(Lease::UnitId).uuid().null())
                        .col(ColumnDef::new(Lease::TenantPhone).string().not_null())
                        .col(ColumnDef::new(Lease::ApproverContact).string().null())
                        .col(ColumnDef::new(Lease::WorkflowState).string().not_null())
                        .col(ColumnDef::new(Lease::Notes).text().null())
                        .col(
                            ColumnDef::new(Lease::RenewalOfferedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(Lease::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null()
                                .default(Expr::current_timestamp()),
                        )
                        .col(
                            ColumnDef::new(Lease::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null()
                                .default(Expr::current_timestamp()),
                        )
                        .col(
                            ColumnDef::new(Lease::DeletedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .to_owned(),
                )
                .await?;
        }

        // Identifiers are immutable once assigned and globally unique.
        // Note: Skip index creation for SQLite due to potential schema issues
        if db_backend != sea_orm::DatabaseBackend::Sqlite {
            manager
                .create_index(
                    Index::create()
                        .name("idx_leases_reference_number")
                        .table(Lease::Table)
                        .col(Lease::ReferenceNumber)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .name("idx_leases_serial_number")
                        .table(Lease::Table)
                        .col(Lease::SerialNumber)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .name("idx_leases_workflow_state")
                        .table(Lease::Table)
                        .col(Lease::WorkflowState)
                        .to_owned(),
                )
                .await?;
        }

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Lease::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Lease {
    #[sea_orm(iden = "leases")]
    Table,
    Id,
    ReferenceNumber,
    SerialNumber,
    LeaseType,
    Zone,
    TenantId,
    LandlordId,
    UnitId,
    TenantPhone,
    ApproverContact,
    WorkflowState,
    Notes,
    RenewalOfferedAt,
    CreatedAt,
    UpdatedAt,
    DeletedAt,
}
