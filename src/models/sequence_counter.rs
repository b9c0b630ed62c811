//! # Sequence Counter Models
//!
//! Counter rows backing the identifier allocator. One row per
//! `(zone, year, lease_type)` for reference numbers and one per
//! `(prefix, year)` for serial numbers. Rows are created lazily on first
//! allocation and never deleted; `last_sequence` is monotonically
//! non-decreasing under an exclusive row lock.

/// Reference-number counters, keyed by `(zone, year, lease_type)`.
pub mod reference {
    use sea_orm::ActiveModelBehavior;
    use sea_orm::entity::prelude::*;
    use serde::{Deserialize, Serialize};

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
    #[sea_orm(table_name = "reference_sequences")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i64,
        pub zone: String,
        pub year: i32,
        pub lease_type: String,
        pub last_sequence: i64,
        pub created_at: chrono::DateTime<chrono::Utc>,
        pub updated_at: chrono::DateTime<chrono::Utc>,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

/// Serial-number counters, keyed by `(prefix, year)`.
pub mod serial {
    use sea_orm::ActiveModelBehavior;
    use sea_orm::entity::prelude::*;
    use serde::{Deserialize, Serialize};

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
    #[sea_orm(table_name = "serial_sequences")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i64,
        pub prefix: String,
        pub year: i32,
        pub last_sequence: i64,
        pub created_at: chrono::DateTime<chrono::Utc>,
        pub updated_at: chrono::DateTime<chrono::Utc>,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}
