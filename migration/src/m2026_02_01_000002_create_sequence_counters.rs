use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let db_backend = manager.get_database_backend();

        // Reference-number counters: one row per (zone, year, lease_type).
        // Rows are created lazily on first allocation and never deleted.
        manager
            .create_table(
                Table::create()
                    .table(ReferenceSequence::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ReferenceSequence::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(ReferenceSequence::Zone).string().not_null())
                    .col(ColumnDef::new(ReferenceSequence::Year).integer().not_null())
                    .col(
                        ColumnDef::new(ReferenceSequence::LeaseType)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ReferenceSequence::LastSequence)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(ReferenceSequence::CreatedAt)
                            .timestamp()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(ReferenceSequence::UpdatedAt)
                            .timestamp()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // Serial-number counters: one row per (prefix, year), independent
        // sequence space from the reference numbers.
        manager
            .create_table(
                Table::create()
                    .table(SerialSequence::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(SerialSequence::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(SerialSequence::Prefix).string().not_null())
                    .col(ColumnDef::new(SerialSequence::Year).integer().not_null())
                    .col(
                        ColumnDef::new(SerialSequence::LastSequence)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(SerialSequence::CreatedAt)
                            .timestamp()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(SerialSequence::UpdatedAt)
                            .timestamp()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        if db_backend != sea_orm::DatabaseBackend::Sqlite {
            manager
                .create_index(
                    Index::create()
                        .name("idx_reference_sequences_zone_year_type")
                        .table(ReferenceSequence::Table)
                        .col(ReferenceSequence::Zone)
                        .col(ReferenceSequence::Year)
                        .col(ReferenceSequence::LeaseType)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .name("idx_serial_sequences_prefix_year")
                        .table(SerialSequence::Table)
                        .col(SerialSequence::Prefix)
                        .col(SerialSequence::Year)
                        .unique()
                        .to_owned(),
                )
                .await?;
        }

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ReferenceSequence::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(SerialSequence::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum ReferenceSequence {
    #[sea_orm(iden = "reference_sequences")]
    Table,
    Id,
    Zone,
    Year,
    LeaseType,
    LastSequence,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum SerialSequence {
    #[sea_orm(iden = "serial_sequences")]
    Table,
    Id,
    Prefix,
    Year,
    LastSequence,
    CreatedAt,
    UpdatedAt,
}
