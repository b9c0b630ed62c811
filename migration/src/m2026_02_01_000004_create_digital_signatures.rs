use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let db_backend = manager.get_database_backend();

        if db_backend == sea_orm::DatabaseBackend::Sqlite {
            manager
                .create_table(
                    Table::create()
                        .table(DigitalSignature::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(DigitalSignature::Id)
                                .text()
                                .not_null()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(DigitalSignature::LeaseId).text().not_null())
                        .col(
                            ColumnDef::new(DigitalSignature::TenantId)
                                .text()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(DigitalSignature::SignatureData)
                                .text()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(DigitalSignature::SignatureType)
                                .string()
                                .not_null(),
                        )
                        .col(ColumnDef::new(DigitalSignature::IpAddress).string().null())
                        .col(ColumnDef::new(DigitalSignature::UserAgent).string().null())
                        .col(ColumnDef::new(DigitalSignature::Latitude).double().null())
                        .col(ColumnDef::new(DigitalSignature::Longitude).double().null())
                        .col(
                            ColumnDef::new(DigitalSignature::OtpChallengeId)
                                .text()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(DigitalSignature::VerificationHash)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(DigitalSignature::SignedAt)
                                .timestamp()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(DigitalSignature::SupersededAt)
                                .timestamp()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(DigitalSignature::CreatedAt)
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
                        .table(DigitalSignature::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(DigitalSignature::Id)
                                .uuid()
                                .not_null()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(DigitalSignature::LeaseId).uuid().not_null())
                        .col(
                            ColumnDef::new(DigitalSignature::TenantId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(DigitalSignature::SignatureData)
                                .text()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(DigitalSignature::SignatureType)
                                .string()
                                .not_null(),
                        )
                        .col(ColumnDef::new(DigitalSignature::IpAddress).string().null())
                        .col(ColumnDef::new(DigitalSignature::UserAgent).string().null())
                        .col(ColumnDef::new(DigitalSignature::Latitude).double().null())
                        .col(ColumnDef::new(DigitalSignature::Longitude).double().null())
                        .col(
                            ColumnDef::new(DigitalSignature::OtpChallengeId)
                                .uuid()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(DigitalSignature::VerificationHash)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(DigitalSignature::SignedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(DigitalSignature::SupersededAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(DigitalSignature::CreatedAt)
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
                        .name("idx_digital_signatures_lease_id")
                        .table(DigitalSignature::Table)
                        .col(DigitalSignature::LeaseId)
                        .to_owned(),
                )
                .await?;
        }

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(DigitalSignature::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum DigitalSignature {
    #[sea_orm(iden = "digital_signatures")]
    Table,
    Id,
    LeaseId,
    TenantId,
    SignatureData,
    SignatureType,
    IpAddress,
    UserAgent,
    Latitude,
    Longitude,
    OtpChallengeId,
    VerificationHash,
    SignedAt,
    SupersededAt,
    CreatedAt,
}
