//! Core types for quotagate.
//!
//! This crate provides the foundational types used throughout the quotagate
//! credit-metering engine:
//!
//! - **Identifiers**: `TenantId`, `UsageRecordId`
//! - **Entitlements**: `Entitlement`, `Plan`, `PlanStatus`
//! - **Rollover**: `resolve_rollover`, `RolloverReset`
//! - **Billing events**: `BillingEvent`
//! - **Usage ledger**: `UsageRecord`
//!
//! # Credits
//!
//! A credit is a consumable unit of quota: one billable generation request
//! typically costs one credit. Each plan grants a fixed ceiling of credits
//! per 30-day billing period; the ceiling is a pure function of the plan and
//! is never stored alongside the balance.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod entitlement;
pub mod event;
pub mod ids;
pub mod rollover;
pub mod usage;

pub use entitlement::{
    billing_period, Entitlement, Plan, PlanStatus, UnknownPlan, UnknownStatus,
    BILLING_PERIOD_DAYS, BUSINESS_PLAN_CREDITS, FREE_PLAN_CREDITS, PRO_PLAN_CREDITS,
};
pub use event::{BillingEvent, EventError};
pub use ids::{IdError, TenantId, UsageRecordId};
pub use rollover::{resolve_rollover, RolloverReset};
pub use usage::UsageRecord;
