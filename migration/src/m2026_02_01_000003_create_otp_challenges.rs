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
                        .table(OtpChallenge::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(OtpChallenge::Id)
                                .text()
                                .not_null()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(OtpChallenge::LeaseId).text().not_null())
                        .col(ColumnDef::new(OtpChallenge::Phone).string().not_null())
                        // Salted hash, wide enough for "salt$digest" hex encoding
                        .col(ColumnDef::new(OtpChallenge::CodeHash).string().not_null())
                        .col(ColumnDef::new(OtpChallenge::Purpose).string().not_null())
                        .col(ColumnDef::new(OtpChallenge::SentAt).timestamp().not_null())
                        .col(
                            ColumnDef::new(OtpChallenge::ExpiresAt)
                                .timestamp()
                                .not_null(),
                        )
                        .col(ColumnDef::new(OtpChallenge::VerifiedAt).timestamp().null())
                        .col(
                            ColumnDef::new(OtpChallenge::Attempts)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(OtpChallenge::IsVerified)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(OtpChallenge::IsExpired)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(ColumnDef::new(OtpChallenge::IpAddress).string().null())
                        .col(
                            ColumnDef::new(OtpChallenge::DeviceFingerprint)
                                .json_binary()
                                .null(),
                        )
                        .col(ColumnDef::new(OtpChallenge::RiskScore).integer().null())
                        .col(
                            ColumnDef::new(OtpChallenge::CreatedAt)
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
                        .table(OtpChallenge::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(OtpChallenge::Id)
                                .uuid()
                                .not_null()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(OtpChallenge::LeaseId).uuid().not_null())
                        .col(ColumnDef::new(OtpChallenge::Phone).string().not_null())
                        .col(ColumnDef::new(OtpChallenge::CodeHash).string().not_null())
                        .col(ColumnDef::new(OtpChallenge::Purpose).string().not_null())
                        .col(
                            ColumnDef::new(OtpChallenge::SentAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(OtpChallenge::ExpiresAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(OtpChallenge::VerifiedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(OtpChallenge::Attempts)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(OtpChallenge::IsVerified)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(OtpChallenge::IsExpired)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(ColumnDef::new(OtpChallenge::IpAddress).string().null())
                        .col(
                            ColumnDef::new(OtpChallenge::DeviceFingerprint)
                                .json_binary()
                                .null(),
                        )
                        .col(ColumnDef::new(OtpChallenge::RiskScore).integer().null())
                        .col(
                            ColumnDef::new(OtpChallenge::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null()
                                .default(Expr::current_timestamp()),
                        )
                        .to_owned(),
                )
                .await?;
        }

        if db_backend != sea_orm::DatabaseBackend::Sqlite {
            // Verification looks up the newest valid challenge per lease
            manager
                .create_index(
                    Index::create()
                        .name("idx_otp_challenges_lease_sent")
                        .table(OtpChallenge::Table)
                        .col(OtpChallenge::LeaseId)
                        .col(OtpChallenge::SentAt)
                        .to_owned(),
                )
                .await?;

            // Retention sweep scans by creation time
            manager
                .create_index(
                    Index::create()
                        .name("idx_otp_challenges_created_at")
                        .table(OtpChallenge::Table)
                        .col(OtpChallenge::CreatedAt)
                        .to_owned(),
                )
                .await?;
        }

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(OtpChallenge::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum OtpChallenge {
    #[sea_orm(iden = "otp_challenges")]
    Table,
    Id,
    LeaseId,
    Phone,
    CodeHash,
    Purpose,
    SentAt,
    ExpiresAt,
    VerifiedAt,
    Attempts,
    IsVerified,
    IsExpired,
    IpAddress,
    DeviceFingerprint,
    RiskScore,
    CreatedAt,
}
