//! Quotagate credit-metering engine.
//!
//! This crate provides the two entry points the surrounding application
//! calls:
//!
//! - [`CreditGate::deduct`]: the request-time gate. A billable-action
//!   handler calls it before doing costly work; on success the action
//!   proceeds, on failure it aborts with a distinguishable reason.
//! - [`Reconciler::reconcile`]: consumes billing lifecycle events from the
//!   payment processor and adjusts plan, status, and credits.
//!
//! # Concurrency
//!
//! The engine owns no shared in-process state and runs no background
//! scheduler. All coordination between concurrent deductions is pushed into
//! the entitlement store's conditional update: at most one deduction
//! proceeds per observed balance value, the other retries once against the
//! new balance or fails closed.
//!
//! # Fail-closed
//!
//! A failure in the credit check never silently grants free usage: every
//! store error, creation failure, and persistent contention converts to the
//! `CreditCheckFailed` denial.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
// Entry points are async for the callers' benefit even where the store
// round-trip itself does not await.
#![allow(clippy::unused_async)]

pub mod deduct;
pub mod reconcile;

pub use deduct::{CreditGate, DeductOutcome, DenialReason};
pub use reconcile::{ReconcileError, Reconciler};
