//! `RocksDB` storage layer for quotagate.
//!
//! This crate provides persistent storage for entitlement records and the
//! usage ledger using `RocksDB` with column families for efficient indexing.
//!
//! # Architecture
//!
//! The storage uses the following column families:
//!
//! - `entitlements`: primary entitlement records, keyed by `tenant_id`
//! - `tenants_by_customer`: index from processor customer ref to tenant
//! - `tenants_by_subscription`: index from processor subscription ref to
//!   tenant
//! - `usage_records`: ledger entries, keyed by `record_id` (ULID)
//! - `usage_by_tenant`: index for listing ledger entries by tenant
//!
//! # Concurrency
//!
//! All coordination between concurrent deductions happens here: the
//! conditional update [`Store::update_credits_if`] only applies when the
//! stored balance still equals the value the caller observed, and reports a
//! lost race as `Ok(None)`. Callers never take locks; they read, compute,
//! attempt the conditional write, and retry or fail.
//!
//! # Example
//!
//! ```no_run
//! use quotagate_store::{RocksStore, Store};
//! use quotagate_core::{Entitlement, TenantId};
//! use chrono::Utc;
//!
//! let store = RocksStore::open("/tmp/quotagate-db").unwrap();
//!
//! let tenant_id = TenantId::generate();
//! let entitlement = store.create_default(&tenant_id, Utc::now()).unwrap();
//! assert_eq!(entitlement.credits_remaining, 10);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod keys;
pub mod rocks;
pub mod schema;

pub use error::{Result, StoreError};
pub use rocks::RocksStore;

use chrono::{DateTime, Utc};
use quotagate_core::{Entitlement, TenantId, UsageRecord};

/// The storage trait defining all entitlement-store operations.
///
/// This trait abstracts the storage layer, allowing for different
/// implementations (e.g. `RocksDB`, wrappers for fault injection in tests).
pub trait Store: Send + Sync {
    // =========================================================================
    // Entitlement Operations
    // =========================================================================

    /// Get an entitlement record by tenant ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get(&self, tenant_id: &TenantId) -> Result<Option<Entitlement>>;

    /// Create a default entitlement record (free plan, fresh period) if none
    /// exists yet.
    ///
    /// Idempotent: if a record already exists (including one created by a
    /// concurrent caller) the existing record is returned unchanged.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn create_default(&self, tenant_id: &TenantId, now: DateTime<Utc>) -> Result<Entitlement>;

    /// Write an entitlement record unconditionally, maintaining the external
    /// reference indexes.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put(&self, entitlement: &Entitlement) -> Result<()>;

    /// Conditionally set `credits_remaining` to `new_remaining`, but only if
    /// the stored value still equals `expected_remaining`.
    ///
    /// This is the compare-and-swap that serializes concurrent deductions.
    /// Returns the updated record on success, or `Ok(None)` when a
    /// concurrent writer changed the balance first (the key-value analogue
    /// of a conditional `UPDATE` affecting zero rows).
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the record doesn't exist, or an
    /// error if the database operation fails.
    fn update_credits_if(
        &self,
        tenant_id: &TenantId,
        expected_remaining: i64,
        new_remaining: i64,
    ) -> Result<Option<Entitlement>>;

    /// Reset the balance and advance the period boundary, but only if the
    /// stored `current_period_end` still equals `observed_period_end`. Every
    /// other field is left untouched.
    ///
    /// Used for period rollover. The condition makes a reset apply at most
    /// once per lapse: when several callers observe the same lapsed boundary,
    /// the first write advances it and the rest see a mismatch and get the
    /// current record back unchanged. Without it, a late reset would
    /// overwrite balance decrements made since the first one.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the record doesn't exist, or an
    /// error if the database operation fails.
    fn apply_rollover(
        &self,
        tenant_id: &TenantId,
        observed_period_end: Option<DateTime<Utc>>,
        credits_remaining: i64,
        current_period_end: DateTime<Utc>,
    ) -> Result<Entitlement>;

    /// Look up the entitlement whose processor customer reference matches.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn find_by_customer_ref(&self, customer_ref: &str) -> Result<Option<Entitlement>>;

    /// Look up the entitlement whose processor subscription reference
    /// matches.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn find_by_subscription_ref(&self, subscription_ref: &str) -> Result<Option<Entitlement>>;

    // =========================================================================
    // Usage Ledger Operations
    // =========================================================================

    /// Append a usage record to the ledger.
    ///
    /// This also maintains the tenant index.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn append_usage(&self, record: &UsageRecord) -> Result<()>;

    /// List ledger entries for a tenant, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_usage(
        &self,
        tenant_id: &TenantId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<UsageRecord>>;
}
