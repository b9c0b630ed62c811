//! # Sequence Allocator
//!
//! Mints the two human-facing lease identifiers: reference numbers
//! (`LSE-{TYPE}-{ZONE}-{SEQ}-{YEAR}`) and serial numbers
//! (`{PREFIX}-{YEAR}-{SEQ}`). Each key gets its own counter row which is
//! incremented under an exclusive row lock inside a transaction, so
//! concurrent allocations for the same key serialize while unrelated keys
//! proceed in parallel. A bounded retry loop re-checks the formatted
//! identifier against the leases table to survive counter drift (e.g. a
//! counter table restored from an old backup); exhausting the budget is a
//! fatal error, never a silent duplicate.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DatabaseTransaction, EntityTrait,
    QueryFilter, QuerySelect, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::clock::{Clock, SharedClock};
use crate::config::AllocatorConfig;
use crate::error::{EngineError, is_unique_violation};
use crate::models::lease::{self, Entity as Lease};
use crate::models::sequence_counter::{reference, serial};

/// Reference numbers carry a fixed document prefix.
const REFERENCE_PREFIX: &str = "LSE";

/// Zero-padding widths for the two identifier kinds.
const REFERENCE_SEQUENCE_WIDTH: usize = 5;
const SERIAL_SEQUENCE_WIDTH: usize = 4;

/// Closed set of lease types and their reference-number codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum LeaseType {
    Residential,
    Commercial,
    ResidentialMajor,
    ResidentialMicro,
}

impl LeaseType {
    /// Key form stored on the lease row.
    pub fn as_str(&self) -> &'static str {
        match self {
            LeaseType::Residential => "residential",
            LeaseType::Commercial => "commercial",
            LeaseType::ResidentialMajor => "residential_major",
            LeaseType::ResidentialMicro => "residential_micro",
        }
    }

    /// Short code embedded in reference numbers.
    pub fn code(&self) -> &'static str {
        match self {
            LeaseType::Residential => "RES",
            LeaseType::Commercial => "COM",
            LeaseType::ResidentialMajor => "MAJ",
            LeaseType::ResidentialMicro => "MIC",
        }
    }
}

/// Error for unknown lease type keys in requests.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown lease type '{0}'")]
pub struct UnknownLeaseTypeError(pub String);

impl FromStr for LeaseType {
    type Err = UnknownLeaseTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "residential" => Ok(LeaseType::Residential),
            "commercial" => Ok(LeaseType::Commercial),
            "residential_major" => Ok(LeaseType::ResidentialMajor),
            "residential_micro" => Ok(LeaseType::ResidentialMicro),
            other => Err(UnknownLeaseTypeError(other.to_string())),
        }
    }
}

impl std::fmt::Display for LeaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Components of a parsed serial number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialParts {
    pub prefix: String,
    pub year: i32,
    pub sequence: i64,
}

/// Allocator for lease reference and serial numbers.
pub struct SequenceAllocator {
    db: Arc<DatabaseConnection>,
    clock: SharedClock,
    config: AllocatorConfig,
    operation_timeout: Duration,
}

impl SequenceAllocator {
    /// Create a new sequence allocator
    pub fn new(
        db: Arc<DatabaseConnection>,
        clock: SharedClock,
        config: AllocatorConfig,
        operation_timeout: Duration,
    ) -> Self {
        Self {
            db,
            clock,
            config,
            operation_timeout,
        }
    }

    /// Allocate the next reference number for `(zone, year, lease_type)`.
    ///
    /// Blocks on the counter row lock while another allocation for the same
    /// key is in flight; unrelated keys never contend. Respects the
    /// configured operation deadline with a retryable timeout error.
    pub async fn allocate_reference(
        &self,
        zone: &str,
        lease_type: LeaseType,
        year: Option<i32>,
    ) -> Result<String, EngineError> {
        let year = year.unwrap_or_else(|| current_year(&self.clock));
        let timeout_ms = self.operation_timeout.as_millis() as u64;

        tokio::time::timeout(
            self.operation_timeout,
            self.allocate_reference_inner(zone, lease_type, year),
        )
        .await
        .map_err(|_| EngineError::Timeout { timeout_ms })?
    }

    async fn allocate_reference_inner(
        &self,
        zone: &str,
        lease_type: LeaseType,
        year: i32,
    ) -> Result<String, EngineError> {
        let key = format!("{zone}/{year}/{lease_type}");

        for _attempt in 1..=self.config.max_attempts {
            let txn = self.db.begin().await?;

            let next = match self.next_reference_sequence(&txn, zone, lease_type, year).await {
                Ok(next) => next,
                // A concurrent first allocation for this key can race the
                // lazy insert; the unique index turns the loser into a
                // violation we absorb as one spent attempt.
                Err(EngineError::Database(db_err)) if is_unique_violation(&db_err) => {
                    txn.rollback().await.ok();
                    tracing::debug!(key = %key, error = %db_err, "reference counter race, retrying");
                    continue;
                }
                Err(err) => {
                    txn.rollback().await.ok();
                    return Err(err);
                }
            };

            let candidate = format_reference(lease_type, zone, next, year);

            // Drift guard: the counter table may lag the leases table (e.g.
            // after a partial restore). Persist the increment either way so
            // the next attempt moves past the collision.
            let taken = Lease::find()
                .filter(lease::Column::ReferenceNumber.eq(candidate.as_str()))
                .one(&txn)
                .await?
                .is_some();

            txn.commit().await?;

            if taken {
                tracing::warn!(
                    candidate = %candidate,
                    key = %key,
                    "reference counter drift detected; advancing past existing identifier"
                );
                continue;
            }

            metrics::counter!("lease_reference_allocations_total").increment(1);
            return Ok(candidate);
        }

        Err(EngineError::AllocationExhausted {
            key,
            attempts: self.config.max_attempts,
        })
    }

    async fn next_reference_sequence(
        &self,
        txn: &DatabaseTransaction,
        zone: &str,
        lease_type: LeaseType,
        year: i32,
    ) -> Result<i64, EngineError> {
        let now = self.clock.now();

        let row = reference::Entity::find()
            .filter(reference::Column::Zone.eq(zone))
            .filter(reference::Column::Year.eq(year))
            .filter(reference::Column::LeaseType.eq(lease_type.as_str()))
            .lock_exclusive()
            .one(txn)
            .await?;

        match row {
            Some(row) => {
                let next = row.last_sequence + 1;
                let mut active: reference::ActiveModel = row.into();
                active.last_sequence = Set(next);
                active.updated_at = Set(now);
                active.update(txn).await?;
                Ok(next)
            }
            None => {
                // First allocation for this key: create the counter inside
                // the same transaction to avoid a lost-insert race.
                let active = reference::ActiveModel {
                    zone: Set(zone.to_string()),
                    year: Set(year),
                    lease_type: Set(lease_type.as_str().to_string()),
                    last_sequence: Set(1),
                    created_at: Set(now),
                    updated_at: Set(now),
                    ..Default::default()
                };
                active.insert(txn).await?;
                Ok(1)
            }
        }
    }

    /// Allocate the next serial number for `(prefix, year)`.
    pub async fn allocate_serial(
        &self,
        prefix: &str,
        year: Option<i32>,
    ) -> Result<String, EngineError> {
        let year = year.unwrap_or_else(|| current_year(&self.clock));
        let timeout_ms = self.operation_timeout.as_millis() as u64;

        tokio::time::timeout(
            self.operation_timeout,
            self.allocate_serial_inner(prefix, year),
        )
        .await
        .map_err(|_| EngineError::Timeout { timeout_ms })?
    }

    async fn allocate_serial_inner(&self, prefix: &str, year: i32) -> Result<String, EngineError> {
        let key = format!("{prefix}/{year}");

        for _attempt in 1..=self.config.max_attempts {
            let txn = self.db.begin().await?;

            let next = match self.next_serial_sequence(&txn, prefix, year).await {
                Ok(next) => next,
                Err(EngineError::Database(db_err)) if is_unique_violation(&db_err) => {
                    txn.rollback().await.ok();
                    tracing::debug!(key = %key, error = %db_err, "serial counter race, retrying");
                    continue;
                }
                Err(err) => {
                    txn.rollback().await.ok();
                    return Err(err);
                }
            };

            let candidate = format_serial(prefix, year, next);

            let taken = Lease::find()
                .filter(lease::Column::SerialNumber.eq(candidate.as_str()))
                .one(&txn)
                .await?
                .is_some();

            txn.commit().await?;

            if taken {
                tracing::warn!(
                    candidate = %candidate,
                    key = %key,
                    "serial counter drift detected; advancing past existing identifier"
                );
                continue;
            }

            metrics::counter!("lease_serial_allocations_total").increment(1);
            return Ok(candidate);
        }

        Err(EngineError::AllocationExhausted {
            key,
            attempts: self.config.max_attempts,
        })
    }

    async fn next_serial_sequence(
        &self,
        txn: &DatabaseTransaction,
        prefix: &str,
        year: i32,
    ) -> Result<i64, EngineError> {
        let now = self.clock.now();

        let row = serial::Entity::find()
            .filter(serial::Column::Prefix.eq(prefix))
            .filter(serial::Column::Year.eq(year))
            .lock_exclusive()
            .one(txn)
            .await?;

        match row {
            Some(row) => {
                let next = row.last_sequence + 1;
                let mut active: serial::ActiveModel = row.into();
                active.last_sequence = Set(next);
                active.updated_at = Set(now);
                active.update(txn).await?;
                Ok(next)
            }
            None => {
                let active = serial::ActiveModel {
                    prefix: Set(prefix.to_string()),
                    year: Set(year),
                    last_sequence: Set(1),
                    created_at: Set(now),
                    updated_at: Set(now),
                    ..Default::default()
                };
                active.insert(txn).await?;
                Ok(1)
            }
        }
    }

    /// Current reference sequence for a key without incrementing (0 when no
    /// allocation happened yet).
    pub async fn current_reference_sequence(
        &self,
        zone: &str,
        lease_type: LeaseType,
        year: Option<i32>,
    ) -> Result<i64, EngineError> {
        let year = year.unwrap_or_else(|| current_year(&self.clock));

        let row = reference::Entity::find()
            .filter(reference::Column::Zone.eq(zone))
            .filter(reference::Column::Year.eq(year))
            .filter(reference::Column::LeaseType.eq(lease_type.as_str()))
            .one(self.db.as_ref())
            .await?;

        Ok(row.map(|r| r.last_sequence).unwrap_or(0))
    }

    /// Current serial sequence for a key without incrementing.
    pub async fn current_serial_sequence(
        &self,
        prefix: &str,
        year: Option<i32>,
    ) -> Result<i64, EngineError> {
        let year = year.unwrap_or_else(|| current_year(&self.clock));

        let row = serial::Entity::find()
            .filter(serial::Column::Prefix.eq(prefix))
            .filter(serial::Column::Year.eq(year))
            .one(self.db.as_ref())
            .await?;

        Ok(row.map(|r| r.last_sequence).unwrap_or(0))
    }

    /// Reset a reference counter to zero. USE WITH CAUTION: operational and
    /// test tooling only; already-issued identifiers keep the drift guard
    /// from reusing their sequences, but the counter history is lost.
    pub async fn reset_reference_sequence(
        &self,
        zone: &str,
        lease_type: LeaseType,
        year: Option<i32>,
    ) -> Result<bool, EngineError> {
        let year = year.unwrap_or_else(|| current_year(&self.clock));
        let now = self.clock.now();

        let row = reference::Entity::find()
            .filter(reference::Column::Zone.eq(zone))
            .filter(reference::Column::Year.eq(year))
            .filter(reference::Column::LeaseType.eq(lease_type.as_str()))
            .one(self.db.as_ref())
            .await?;

        let Some(row) = row else {
            return Ok(false);
        };

        tracing::warn!(zone, year, lease_type = %lease_type, "reference sequence reset");

        let mut active: reference::ActiveModel = row.into();
        active.last_sequence = Set(0);
        active.updated_at = Set(now);
        active.update(self.db.as_ref()).await?;

        Ok(true)
    }

    /// Reset a serial counter to zero. Same caveats as
    /// [`SequenceAllocator::reset_reference_sequence`].
    pub async fn reset_serial_sequence(
        &self,
        prefix: &str,
        year: Option<i32>,
    ) -> Result<bool, EngineError> {
        let year = year.unwrap_or_else(|| current_year(&self.clock));
        let now = self.clock.now();

        let row = serial::Entity::find()
            .filter(serial::Column::Prefix.eq(prefix))
            .filter(serial::Column::Year.eq(year))
            .one(self.db.as_ref())
            .await?;

        let Some(row) = row else {
            return Ok(false);
        };

        tracing::warn!(prefix, year, "serial sequence reset");

        let mut active: serial::ActiveModel = row.into();
        active.last_sequence = Set(0);
        active.updated_at = Set(now);
        active.update(self.db.as_ref()).await?;

        Ok(true)
    }
}

fn current_year(clock: &SharedClock) -> i32 {
    use chrono::Datelike;

    clock.now().year()
}

/// Format a reference number: `LSE-{TYPE}-{ZONE}-{SEQ:05}-{YEAR}`.
pub fn format_reference(lease_type: LeaseType, zone: &str, sequence: i64, year: i32) -> String {
    format!(
        "{REFERENCE_PREFIX}-{}-{}-{:0width$}-{}",
        lease_type.code(),
        zone,
        sequence,
        year,
        width = REFERENCE_SEQUENCE_WIDTH
    )
}

/// Format a serial number: `{PREFIX}-{YEAR}-{SEQ:04}`.
pub fn format_serial(prefix: &str, year: i32, sequence: i64) -> String {
    format!(
        "{}-{}-{:0width$}",
        prefix,
        year,
        sequence,
        width = SERIAL_SEQUENCE_WIDTH
    )
}

/// Validate the `{PREFIX}-{YEAR}-{SEQ}` serial number shape.
pub fn is_valid_serial(serial: &str) -> bool {
    serial_regex().is_match(serial)
}

/// Parse a serial number into its components.
pub fn parse_serial(serial: &str) -> Option<SerialParts> {
    let captures = serial_regex().captures(serial)?;

    Some(SerialParts {
        prefix: captures.get(1)?.as_str().to_string(),
        year: captures.get(2)?.as_str().parse().ok()?,
        sequence: captures.get(3)?.as_str().parse().ok()?,
    })
}

fn serial_regex() -> &'static Regex {
    use std::sync::OnceLock;

    static SERIAL_RE: OnceLock<Regex> = OnceLock::new();
    SERIAL_RE.get_or_init(|| {
        Regex::new(r"^([A-Z]+)-(\d{4})-(\d{4,})$").expect("serial regex is valid")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_format_matches_expected_shape() {
        assert_eq!(
            format_reference(LeaseType::Commercial, "A", 1, 2026),
            "LSE-COM-A-00001-2026"
        );
        assert_eq!(
            format_reference(LeaseType::Residential, "NB", 123, 2027),
            "LSE-RES-NB-00123-2027"
        );
        assert_eq!(
            format_reference(LeaseType::ResidentialMicro, "A", 99999, 2026),
            "LSE-MIC-A-99999-2026"
        );
    }

    #[test]
    fn test_serial_format_and_round_trip() {
        let serial = format_serial("LSE", 2026, 1);
        assert_eq!(serial, "LSE-2026-0001");
        assert!(is_valid_serial(&serial));

        let parts = parse_serial(&serial).expect("parses");
        assert_eq!(parts.prefix, "LSE");
        assert_eq!(parts.year, 2026);
        assert_eq!(parts.sequence, 1);

        // Sequences wider than the pad width still parse
        let wide = format_serial("DOC", 2026, 123456);
        assert_eq!(wide, "DOC-2026-123456");
        assert_eq!(parse_serial(&wide).expect("parses").sequence, 123456);
    }

    #[test]
    fn test_invalid_serials_rejected() {
        for bad in ["", "LSE-26-0001", "lse-2026-0001", "LSE-2026-1", "LSE_2026_0001"] {
            assert!(!is_valid_serial(bad), "{bad} should be rejected");
            assert!(parse_serial(bad).is_none());
        }
    }

    #[test]
    fn test_lease_type_codes_and_keys() {
        assert_eq!(LeaseType::Commercial.code(), "COM");
        assert_eq!(LeaseType::Residential.code(), "RES");
        assert_eq!(LeaseType::ResidentialMajor.code(), "MAJ");
        assert_eq!(LeaseType::ResidentialMicro.code(), "MIC");

        let parsed: LeaseType = "residential_major".parse().expect("parses");
        assert_eq!(parsed, LeaseType::ResidentialMajor);
        assert!("industrial".parse::<LeaseType>().is_err());
    }
}
