//! Database schema definitions and column families.
//!
//! This module defines the column families used in `RocksDB` storage.

/// Column family names for the `RocksDB` database.
pub mod cf {
    /// Primary entitlement records, keyed by `tenant_id`.
    pub const ENTITLEMENTS: &str = "entitlements";

    /// Index: tenant by processor customer reference, keyed by the raw
    /// reference string. Value is the tenant id bytes.
    pub const TENANTS_BY_CUSTOMER: &str = "tenants_by_customer";

    /// Index: tenant by processor subscription reference, keyed by the raw
    /// reference string. Value is the tenant id bytes.
    pub const TENANTS_BY_SUBSCRIPTION: &str = "tenants_by_subscription";

    /// Usage ledger records, keyed by `record_id` (ULID).
    pub const USAGE_RECORDS: &str = "usage_records";

    /// Index: usage records by tenant, keyed by `tenant_id || record_id`.
    /// Value is empty (index only).
    pub const USAGE_BY_TENANT: &str = "usage_by_tenant";
}

/// Returns all column family names for database initialization.
#[must_use]
pub fn all_column_families() -> Vec<&'static str> {
    vec![
        cf::ENTITLEMENTS,
        cf::TENANTS_BY_CUSTOMER,
        cf::TENANTS_BY_SUBSCRIPTION,
        cf::USAGE_RECORDS,
        cf::USAGE_BY_TENANT,
    ]
}
