//! Key encoding utilities for `RocksDB`.
//!
//! This module provides functions for encoding and decoding keys used in
//! column families.

use quotagate_core::{TenantId, UsageRecordId};

/// Create an entitlement key from a tenant ID.
#[must_use]
pub fn entitlement_key(tenant_id: &TenantId) -> Vec<u8> {
    tenant_id.as_bytes().to_vec()
}

/// Create an external-reference index key from a processor reference.
#[must_use]
pub fn external_ref_key(reference: &str) -> Vec<u8> {
    reference.as_bytes().to_vec()
}

/// Create a usage record key from a record ID.
#[must_use]
pub fn usage_record_key(record_id: &UsageRecordId) -> Vec<u8> {
    record_id.to_bytes().to_vec()
}

/// Create a tenant-usage index key.
///
/// Format: `tenant_id (16 bytes) || record_id (16 bytes)`
///
/// Since ULIDs are time-ordered, a tenant's ledger entries sort
/// chronologically under this prefix.
#[must_use]
pub fn tenant_usage_key(tenant_id: &TenantId, record_id: &UsageRecordId) -> Vec<u8> {
    let mut key = Vec::with_capacity(32);
    key.extend_from_slice(tenant_id.as_bytes());
    key.extend_from_slice(&record_id.to_bytes());
    key
}

/// Create a prefix for iterating all usage records for a tenant.
#[must_use]
pub fn tenant_usage_prefix(tenant_id: &TenantId) -> Vec<u8> {
    tenant_id.as_bytes().to_vec()
}

/// Extract the record ID from a tenant-usage index key.
///
/// # Panics
///
/// Panics if the key is not at least 32 bytes.
#[must_use]
pub fn extract_record_id_from_tenant_key(key: &[u8]) -> UsageRecordId {
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&key[16..32]);
    UsageRecordId::from_bytes(bytes).expect("valid ULID bytes")
}
