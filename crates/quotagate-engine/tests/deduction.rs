//! Integration tests for the credit deduction gate against a real
//! `RocksDB`-backed store.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tempfile::TempDir;

use quotagate_core::{Entitlement, Plan, TenantId, UsageRecord, FREE_PLAN_CREDITS};
use quotagate_engine::{CreditGate, DeductOutcome, DenialReason};
use quotagate_store::{RocksStore, Store, StoreError};

fn open_store() -> (TempDir, Arc<RocksStore>) {
    let dir = TempDir::new().unwrap();
    let store = RocksStore::open(dir.path()).unwrap();
    (dir, Arc::new(store))
}

#[tokio::test]
async fn first_deduction_creates_free_entitlement() {
    let (_dir, store) = open_store();
    let gate = CreditGate::new(Arc::clone(&store));
    let tenant = TenantId::generate();

    let outcome = gate.deduct(tenant, 3, "image.generate").await;
    assert_eq!(outcome, DeductOutcome::Granted { remaining: 7 });

    let ent = store.get(&tenant).unwrap().unwrap();
    assert_eq!(ent.plan, Plan::Free);
    assert_eq!(ent.credits_remaining, FREE_PLAN_CREDITS - 3);
}

#[tokio::test]
async fn insufficient_balance_is_denied_with_remaining() {
    let (_dir, store) = open_store();
    let gate = CreditGate::new(Arc::clone(&store));
    let tenant = TenantId::generate();

    // Drain the free balance, then ask for more than is left.
    assert!(gate.deduct(tenant, 8, "video.generate").await.is_granted());
    let outcome = gate.deduct(tenant, 5, "video.generate").await;

    assert_eq!(
        outcome,
        DeductOutcome::Denied(DenialReason::InsufficientCredits { remaining: 2 })
    );
    // The denied attempt must not have touched the balance.
    let ent = store.get(&tenant).unwrap().unwrap();
    assert_eq!(ent.credits_remaining, 2);
}

#[tokio::test]
async fn non_positive_amounts_fail_closed() {
    let (_dir, store) = open_store();
    let gate = CreditGate::new(Arc::clone(&store));
    let tenant = TenantId::generate();

    for amount in [0, -1] {
        let outcome = gate.deduct(tenant, amount, "image.generate").await;
        assert_eq!(outcome, DeductOutcome::Denied(DenialReason::CreditCheckFailed));
    }
    // No record should have been consumed from.
    assert!(store.get(&tenant).is_ok());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_deductions_never_overspend() {
    let (_dir, store) = open_store();
    let gate = CreditGate::new(Arc::clone(&store));
    let tenant = TenantId::generate();

    // Start on a known balance.
    store.create_default(&tenant, Utc::now()).unwrap();
    let initial = FREE_PLAN_CREDITS;

    let mut handles = Vec::new();
    for _ in 0..30 {
        let gate = gate.clone();
        handles.push(tokio::spawn(async move {
            gate.deduct(tenant, 1, "image.generate").await
        }));
    }

    let mut granted = 0_i64;
    for handle in handles {
        if handle.await.unwrap().is_granted() {
            granted += 1;
        }
    }

    // Under heavy contention some requests legitimately fail closed, but
    // every granted deduction must be accounted for exactly once and the
    // balance can never go negative.
    let ent = store.get(&tenant).unwrap().unwrap();
    assert_eq!(ent.credits_remaining, initial - granted);
    assert!(ent.credits_remaining >= 0);
    assert!(granted <= initial);
}

#[tokio::test]
async fn lapsed_period_rolls_over_before_deduction() {
    let (_dir, store) = open_store();
    let gate = CreditGate::new(Arc::clone(&store));
    let tenant = TenantId::generate();

    // A drained record whose period ended yesterday.
    let mut ent = Entitlement::new_default(tenant, Utc::now() - Duration::days(31));
    ent.credits_remaining = 0;
    store.put(&ent).unwrap();

    let outcome = gate.deduct(tenant, 4, "image.generate").await;
    assert_eq!(
        outcome,
        DeductOutcome::Granted {
            remaining: FREE_PLAN_CREDITS - 4
        }
    );

    let refreshed = store.get(&tenant).unwrap().unwrap();
    assert!(refreshed.current_period_end.unwrap() > Utc::now());
}

#[tokio::test]
async fn rollover_applies_once_per_lapse() {
    let (_dir, store) = open_store();
    let gate = CreditGate::new(Arc::clone(&store));
    let tenant = TenantId::generate();

    let mut ent = Entitlement::new_default(tenant, Utc::now() - Duration::days(31));
    ent.credits_remaining = 2;
    store.put(&ent).unwrap();

    // The first deduction resets to the ceiling; the second must deduct
    // from the new balance, not reset again.
    assert!(gate.deduct(tenant, 1, "image.generate").await.is_granted());
    assert!(gate.deduct(tenant, 1, "image.generate").await.is_granted());

    let refreshed = store.get(&tenant).unwrap().unwrap();
    assert_eq!(refreshed.credits_remaining, FREE_PLAN_CREDITS - 2);
}

#[tokio::test]
async fn legacy_record_without_period_end_is_backfilled() {
    let (_dir, store) = open_store();
    let gate = CreditGate::new(Arc::clone(&store));
    let tenant = TenantId::generate();

    let mut ent = Entitlement::new_default(tenant, Utc::now());
    ent.credits_remaining = 6;
    ent.current_period_end = None;
    store.put(&ent).unwrap();

    let outcome = gate.deduct(tenant, 1, "image.generate").await;
    // Backfill keeps the existing balance rather than resetting it.
    assert_eq!(outcome, DeductOutcome::Granted { remaining: 5 });

    let refreshed = store.get(&tenant).unwrap().unwrap();
    assert!(refreshed.current_period_end.is_some());
}

#[tokio::test]
async fn granted_deduction_lands_in_the_ledger() {
    let (_dir, store) = open_store();
    let gate = CreditGate::new(Arc::clone(&store));
    let tenant = TenantId::generate();

    assert!(gate.deduct(tenant, 2, "video.generate").await.is_granted());

    // The ledger write is fire-and-forget, so poll briefly for it.
    let mut records = Vec::new();
    for _ in 0..50 {
        records = store.list_usage(&tenant, 10, 0).unwrap();
        if !records.is_empty() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }

    assert_eq!(records.len(), 1);
    assert_eq!(records[0].tenant_id, tenant);
    assert_eq!(records[0].action, "video.generate");
    assert_eq!(records[0].credits_used, 2);
}

// ============================================================================
// Fault injection
// ============================================================================

/// A store wrapper that fails or degrades selected operations, for
/// exercising the fail-closed paths.
struct FaultyStore {
    inner: RocksStore,
    fail_conditional_update: bool,
    always_lose_race: bool,
    fail_append_usage: bool,
}

impl FaultyStore {
    fn wrapping(inner: RocksStore) -> Self {
        Self {
            inner,
            fail_conditional_update: false,
            always_lose_race: false,
            fail_append_usage: false,
        }
    }
}

impl Store for FaultyStore {
    fn get(&self, tenant_id: &TenantId) -> Result<Option<Entitlement>, StoreError> {
        self.inner.get(tenant_id)
    }

    fn create_default(
        &self,
        tenant_id: &TenantId,
        now: chrono::DateTime<Utc>,
    ) -> Result<Entitlement, StoreError> {
        self.inner.create_default(tenant_id, now)
    }

    fn put(&self, entitlement: &Entitlement) -> Result<(), StoreError> {
        self.inner.put(entitlement)
    }

    fn update_credits_if(
        &self,
        tenant_id: &TenantId,
        expected_remaining: i64,
        new_remaining: i64,
    ) -> Result<Option<Entitlement>, StoreError> {
        if self.fail_conditional_update {
            return Err(StoreError::Database("injected write failure".into()));
        }
        if self.always_lose_race {
            return Ok(None);
        }
        self.inner
            .update_credits_if(tenant_id, expected_remaining, new_remaining)
    }

    fn apply_rollover(
        &self,
        tenant_id: &TenantId,
        observed_period_end: Option<chrono::DateTime<Utc>>,
        credits_remaining: i64,
        current_period_end: chrono::DateTime<Utc>,
    ) -> Result<Entitlement, StoreError> {
        self.inner.apply_rollover(
            tenant_id,
            observed_period_end,
            credits_remaining,
            current_period_end,
        )
    }

    fn find_by_customer_ref(&self, customer_ref: &str) -> Result<Option<Entitlement>, StoreError> {
        self.inner.find_by_customer_ref(customer_ref)
    }

    fn find_by_subscription_ref(
        &self,
        subscription_ref: &str,
    ) -> Result<Option<Entitlement>, StoreError> {
        self.inner.find_by_subscription_ref(subscription_ref)
    }

    fn append_usage(&self, record: &UsageRecord) -> Result<(), StoreError> {
        if self.fail_append_usage {
            return Err(StoreError::Database("injected ledger failure".into()));
        }
        self.inner.append_usage(record)
    }

    fn list_usage(
        &self,
        tenant_id: &TenantId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<UsageRecord>, StoreError> {
        self.inner.list_usage(tenant_id, limit, offset)
    }
}

/// A store wrapper that serves one recorded stale snapshot from `get`, for
/// replaying a read that predates a concurrent writer.
struct StaleReadStore {
    inner: Arc<RocksStore>,
    stale_get: std::sync::Mutex<Option<Entitlement>>,
}

impl Store for StaleReadStore {
    fn get(&self, tenant_id: &TenantId) -> Result<Option<Entitlement>, StoreError> {
        if let Some(stale) = self.stale_get.lock().unwrap().take() {
            return Ok(Some(stale));
        }
        self.inner.get(tenant_id)
    }

    fn create_default(
        &self,
        tenant_id: &TenantId,
        now: chrono::DateTime<Utc>,
    ) -> Result<Entitlement, StoreError> {
        self.inner.create_default(tenant_id, now)
    }

    fn put(&self, entitlement: &Entitlement) -> Result<(), StoreError> {
        self.inner.put(entitlement)
    }

    fn update_credits_if(
        &self,
        tenant_id: &TenantId,
        expected_remaining: i64,
        new_remaining: i64,
    ) -> Result<Option<Entitlement>, StoreError> {
        self.inner
            .update_credits_if(tenant_id, expected_remaining, new_remaining)
    }

    fn apply_rollover(
        &self,
        tenant_id: &TenantId,
        observed_period_end: Option<chrono::DateTime<Utc>>,
        credits_remaining: i64,
        current_period_end: chrono::DateTime<Utc>,
    ) -> Result<Entitlement, StoreError> {
        self.inner.apply_rollover(
            tenant_id,
            observed_period_end,
            credits_remaining,
            current_period_end,
        )
    }

    fn find_by_customer_ref(&self, customer_ref: &str) -> Result<Option<Entitlement>, StoreError> {
        self.inner.find_by_customer_ref(customer_ref)
    }

    fn find_by_subscription_ref(
        &self,
        subscription_ref: &str,
    ) -> Result<Option<Entitlement>, StoreError> {
        self.inner.find_by_subscription_ref(subscription_ref)
    }

    fn append_usage(&self, record: &UsageRecord) -> Result<(), StoreError> {
        self.inner.append_usage(record)
    }

    fn list_usage(
        &self,
        tenant_id: &TenantId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<UsageRecord>, StoreError> {
        self.inner.list_usage(tenant_id, limit, offset)
    }
}

#[tokio::test]
async fn stale_lapsed_read_cannot_resurrect_spent_credits() {
    let (_dir, store) = open_store();
    let tenant = TenantId::generate();

    // A record whose period lapsed with 2 credits left.
    let mut ent = Entitlement::new_default(tenant, Utc::now() - Duration::days(31));
    ent.credits_remaining = 2;
    store.put(&ent).unwrap();

    // One caller rolls the period over and spends a credit.
    let gate = CreditGate::new(Arc::clone(&store));
    assert_eq!(
        gate.deduct(tenant, 1, "image.generate").await,
        DeductOutcome::Granted {
            remaining: FREE_PLAN_CREDITS - 1
        }
    );

    // A second caller still holds the snapshot from before that reset. Its
    // late rollover attempt must be skipped, not wind the balance back to
    // the ceiling.
    let stale_store = Arc::new(StaleReadStore {
        inner: Arc::clone(&store),
        stale_get: std::sync::Mutex::new(Some(ent)),
    });
    let stale_gate = CreditGate::new(Arc::clone(&stale_store));
    assert_eq!(
        stale_gate.deduct(tenant, 1, "image.generate").await,
        DeductOutcome::Granted {
            remaining: FREE_PLAN_CREDITS - 2
        }
    );

    let refreshed = store.get(&tenant).unwrap().unwrap();
    assert_eq!(refreshed.credits_remaining, FREE_PLAN_CREDITS - 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_deductions_over_a_lapsed_period_reset_at_most_once() {
    let (_dir, store) = open_store();
    let gate = CreditGate::new(Arc::clone(&store));
    let tenant = TenantId::generate();

    // Everyone starts from the same lapsed snapshot.
    let mut ent = Entitlement::new_default(tenant, Utc::now() - Duration::days(31));
    ent.credits_remaining = 3;
    store.put(&ent).unwrap();

    let mut handles = Vec::new();
    for _ in 0..20 {
        let gate = gate.clone();
        handles.push(tokio::spawn(async move {
            gate.deduct(tenant, 1, "image.generate").await
        }));
    }

    let mut granted = 0_i64;
    for handle in handles {
        if handle.await.unwrap().is_granted() {
            granted += 1;
        }
    }

    // Exactly one reset took effect: every grant is accounted for against
    // the single fresh ceiling, with no resurrected credits.
    let refreshed = store.get(&tenant).unwrap().unwrap();
    assert_eq!(refreshed.credits_remaining, FREE_PLAN_CREDITS - granted);
    assert!(granted <= FREE_PLAN_CREDITS);
    assert!(refreshed.current_period_end.unwrap() > Utc::now());
}

#[tokio::test]
async fn store_failure_fails_closed() {
    let dir = TempDir::new().unwrap();
    let mut store = FaultyStore::wrapping(RocksStore::open(dir.path()).unwrap());
    store.fail_conditional_update = true;
    let store = Arc::new(store);

    let gate = CreditGate::new(Arc::clone(&store));
    let tenant = TenantId::generate();
    store.create_default(&tenant, Utc::now()).unwrap();

    let outcome = gate.deduct(tenant, 1, "image.generate").await;
    assert_eq!(outcome, DeductOutcome::Denied(DenialReason::CreditCheckFailed));

    // The balance must be untouched.
    let ent = store.get(&tenant).unwrap().unwrap();
    assert_eq!(ent.credits_remaining, FREE_PLAN_CREDITS);
}

#[tokio::test]
async fn persistent_contention_fails_closed_after_one_retry() {
    let dir = TempDir::new().unwrap();
    let mut store = FaultyStore::wrapping(RocksStore::open(dir.path()).unwrap());
    store.always_lose_race = true;
    let store = Arc::new(store);

    let gate = CreditGate::new(Arc::clone(&store));
    let tenant = TenantId::generate();
    store.create_default(&tenant, Utc::now()).unwrap();

    let outcome = gate.deduct(tenant, 1, "image.generate").await;
    assert_eq!(outcome, DeductOutcome::Denied(DenialReason::CreditCheckFailed));
}

#[tokio::test]
async fn ledger_failure_does_not_revoke_the_grant() {
    let dir = TempDir::new().unwrap();
    let mut store = FaultyStore::wrapping(RocksStore::open(dir.path()).unwrap());
    store.fail_append_usage = true;
    let store = Arc::new(store);

    let gate = CreditGate::new(Arc::clone(&store));
    let tenant = TenantId::generate();

    let outcome = gate.deduct(tenant, 3, "image.generate").await;
    assert_eq!(outcome, DeductOutcome::Granted { remaining: 7 });

    // Give the detached ledger task time to fail.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    // The deduction stuck even though the ledger write was lost.
    let ent = store.get(&tenant).unwrap().unwrap();
    assert_eq!(ent.credits_remaining, 7);
    assert!(store.list_usage(&tenant, 10, 0).unwrap().is_empty());
}
