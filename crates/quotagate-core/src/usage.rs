//! Usage ledger entry types.
//!
//! The usage ledger is an append-only, best-effort audit trail of credit
//! consumption. It exists for audit and analytics; the balance in the
//! entitlement store is always authoritative and is never reconstructed by
//! summing ledger entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{TenantId, UsageRecordId};

/// One consumption event in the usage ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    /// Unique record ID (ULID for time-ordering).
    pub id: UsageRecordId,

    /// The tenant whose credits were consumed.
    pub tenant_id: TenantId,

    /// Label of the billable action, e.g. `"generate_page"`.
    pub action: String,

    /// Credits deducted for the action.
    pub credits_used: i64,

    /// Free-form context (model, request id, etc.).
    pub metadata: serde_json::Value,

    /// When the consumption was recorded.
    pub recorded_at: DateTime<Utc>,
}

impl UsageRecord {
    /// Create a new usage record for a completed deduction.
    #[must_use]
    pub fn new(
        tenant_id: TenantId,
        action: impl Into<String>,
        credits_used: i64,
        metadata: serde_json::Value,
    ) -> Self {
        Self {
            id: UsageRecordId::generate(),
            tenant_id,
            action: action.into(),
            credits_used,
            metadata,
            recorded_at: Utc::now(),
        }
    }
}
