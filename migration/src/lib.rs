//! Database migrations for the lease signing & verification engine.
//!
//! This module contains all database migrations using SeaORM Migration.

pub use sea_orm_migration::prelude::*;

mod m2026_02_01_000001_create_leases;
mod m2026_02_01_000002_create_sequence_counters;
mod m2026_02_01_000003_create_otp_challenges;
mod m2026_02_01_000004_create_digital_signatures;
mod m2026_02_01_000005_create_lease_audit_entries;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2026_02_01_000001_create_leases::Migration),
            Box::new(m2026_02_01_000002_create_sequence_counters::Migration),
            Box::new(m2026_02_01_000003_create_otp_challenges::Migration),
            Box::new(m2026_02_01_000004_create_digital_signatures::Migration),
            Box::new(m2026_02_01_000005_create_lease_audit_entries::Migration),
        ]
    }
}
