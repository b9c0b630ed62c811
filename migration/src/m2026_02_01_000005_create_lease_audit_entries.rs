use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let db_backend = manager.get_database_backend();

        // Append-only: the repository layer exposes no update or delete for
        // this table.
        if db_backend == sea_orm::DatabaseBackend::Sqlite {
            manager
                .create_table(
                    Table::create()
                        .table(LeaseAuditEntry::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(LeaseAuditEntry::Id)
                                .big_integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(LeaseAuditEntry::LeaseId).text().not_null())
                        .col(ColumnDef::new(LeaseAuditEntry::Action).string().not_null())
                        .col(ColumnDef::new(LeaseAuditEntry::OldState).string().null())
                        .col(ColumnDef::new(LeaseAuditEntry::NewState).string().null())
                        .col(ColumnDef::new(LeaseAuditEntry::Actor).string().not_null())
                        .col(ColumnDef::new(LeaseAuditEntry::IpAddress).string().null())
                        .col(
                            ColumnDef::new(LeaseAuditEntry::Payload)
                                .json_binary()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(LeaseAuditEntry::Description)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(LeaseAuditEntry::CreatedAt)
                                .timestamp()
                                .not_null()
                                .default(Expr::current_timestamp()),
                        )
                        .to_owned(),
                )
                .await?;
        } else {
            manager
                .create_table(
                    Table::create()
                        .table(LeaseAuditEntry::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(LeaseAuditEntry::Id)
                                .big_integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(LeaseAuditEntry::LeaseId).uuid().not_null())
                        .col(ColumnDef::new(LeaseAuditEntry::Action).string().not_null())
                        .col(ColumnDef::new(LeaseAuditEntry::OldState).string().null())
                        .col(ColumnDef::new(LeaseAuditEntry::NewState).string().null())
                        .col(ColumnDef::new(LeaseAuditEntry::Actor).string().not_null())
                        .col(ColumnDef::new(LeaseAuditEntry::IpAddress).string().null())
                        .col(
                            ColumnDef::new(LeaseAuditEntry::Payload)
                                .json_binary()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(LeaseAuditEntry::Description)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(LeaseAuditEntry::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null()
                                .default(Expr::current_timestamp()),
                        )
                        .to_owned(),
                )
                .await?;
        }

        if db_backend != sea_orm::DatabaseBackend::Sqlite {
            manager
                .create_index(
                    Index::create()
                        .name("idx_lease_audit_entries_lease_created")
                        .table(LeaseAuditEntry::Table)
                        .col(LeaseAuditEntry::LeaseId)
                        .col(LeaseAuditEntry::CreatedAt)
                        .to_owned(),
                )
                .await?;
        }

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(LeaseAuditEntry::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum LeaseAuditEntry {
    #[sea_orm(iden = "lease_audit_entries")]
    Table,
    Id,
    LeaseId,
    Action,
    OldState,
    NewState,
    Actor,
    IpAddress,
    Payload,
    Description,
    CreatedAt,
}
