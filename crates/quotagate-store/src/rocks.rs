//! `RocksDB` storage implementation.
//!
//! This module provides the `RocksStore` implementation of the `Store`
//! trait.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, IteratorMode, MultiThreaded,
    Options, WriteBatch,
};

use quotagate_core::{Entitlement, TenantId, UsageRecord};

use crate::error::{Result, StoreError};
use crate::keys;
use crate::schema::{all_column_families, cf};
use crate::Store;

/// RocksDB-backed storage implementation.
pub struct RocksStore {
    db: Arc<DBWithThreadMode<MultiThreaded>>,
    // RocksDB batches are atomic but not conditional; this lock makes
    // compare+write a single step for the mutating entitlement operations.
    write_lock: Mutex<()>,
}

impl RocksStore {
    /// Open or create a `RocksDB` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<_> = all_column_families()
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = DBWithThreadMode::open_cf_descriptors(&opts, path, cf_descriptors)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(Self {
            db: Arc::new(db),
            write_lock: Mutex::new(()),
        })
    }

    /// Get a column family handle.
    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family not found: {name}")))
    }

    /// Acquire the write lock for a compare+write sequence.
    fn lock_writes(&self) -> Result<MutexGuard<'_, ()>> {
        self.write_lock
            .lock()
            .map_err(|_| StoreError::Database("write lock poisoned".into()))
    }

    /// Serialize a value using CBOR.
    fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize a value from CBOR.
    fn deserialize<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
        ciborium::from_reader(data).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    /// Read an entitlement without taking the write lock.
    fn read_entitlement(&self, tenant_id: &TenantId) -> Result<Option<Entitlement>> {
        let cf = self.cf(cf::ENTITLEMENTS)?;
        let key = keys::entitlement_key(tenant_id);

        self.db
            .get_cf(&cf, key)
            .map_err(|e| StoreError::Database(e.to_string()))?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    /// Write an entitlement and reconcile its external-reference index
    /// entries against `previous`. Caller must hold the write lock.
    fn write_entitlement(
        &self,
        entitlement: &Entitlement,
        previous: Option<&Entitlement>,
    ) -> Result<()> {
        let cf_ent = self.cf(cf::ENTITLEMENTS)?;
        let cf_customer = self.cf(cf::TENANTS_BY_CUSTOMER)?;
        let cf_subscription = self.cf(cf::TENANTS_BY_SUBSCRIPTION)?;

        let key = keys::entitlement_key(&entitlement.tenant_id);
        let value = Self::serialize(entitlement)?;
        let tenant_bytes = entitlement.tenant_id.as_bytes().to_vec();

        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_ent, &key, &value);

        let old_customer = previous.and_then(|p| p.customer_ref.as_deref());
        let old_subscription = previous.and_then(|p| p.subscription_ref.as_deref());

        if let Some(stale) =
            old_customer.filter(|&old| entitlement.customer_ref.as_deref() != Some(old))
        {
            batch.delete_cf(&cf_customer, keys::external_ref_key(stale));
        }
        if let Some(stale) =
            old_subscription.filter(|&old| entitlement.subscription_ref.as_deref() != Some(old))
        {
            batch.delete_cf(&cf_subscription, keys::external_ref_key(stale));
        }

        if let Some(customer_ref) = entitlement.customer_ref.as_deref() {
            batch.put_cf(&cf_customer, keys::external_ref_key(customer_ref), &tenant_bytes);
        }
        if let Some(subscription_ref) = entitlement.subscription_ref.as_deref() {
            batch.put_cf(
                &cf_subscription,
                keys::external_ref_key(subscription_ref),
                &tenant_bytes,
            );
        }

        self.db
            .write(batch)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(())
    }

    /// Resolve an external-reference index entry to its entitlement.
    fn find_by_ref(&self, index_cf: &str, reference: &str) -> Result<Option<Entitlement>> {
        let cf = self.cf(index_cf)?;
        let key = keys::external_ref_key(reference);

        let Some(tenant_bytes) = self
            .db
            .get_cf(&cf, key)
            .map_err(|e| StoreError::Database(e.to_string()))?
        else {
            return Ok(None);
        };

        let bytes: [u8; 16] = tenant_bytes
            .as_slice()
            .try_into()
            .map_err(|_| StoreError::Database("malformed tenant index entry".into()))?;
        let tenant_id = TenantId::from_uuid(uuid::Uuid::from_bytes(bytes));

        self.read_entitlement(&tenant_id)
    }
}

impl Store for RocksStore {
    // =========================================================================
    // Entitlement Operations
    // =========================================================================

    fn get(&self, tenant_id: &TenantId) -> Result<Option<Entitlement>> {
        self.read_entitlement(tenant_id)
    }

    fn create_default(&self, tenant_id: &TenantId, now: DateTime<Utc>) -> Result<Entitlement> {
        let _guard = self.lock_writes()?;

        // A concurrent caller may have created the record already.
        if let Some(existing) = self.read_entitlement(tenant_id)? {
            return Ok(existing);
        }

        let entitlement = Entitlement::new_default(*tenant_id, now);
        self.write_entitlement(&entitlement, None)?;

        Ok(entitlement)
    }

    fn put(&self, entitlement: &Entitlement) -> Result<()> {
        let _guard = self.lock_writes()?;

        let previous = self.read_entitlement(&entitlement.tenant_id)?;
        self.write_entitlement(entitlement, previous.as_ref())
    }

    fn update_credits_if(
        &self,
        tenant_id: &TenantId,
        expected_remaining: i64,
        new_remaining: i64,
    ) -> Result<Option<Entitlement>> {
        let _guard = self.lock_writes()?;

        let mut entitlement =
            self.read_entitlement(tenant_id)?
                .ok_or_else(|| StoreError::NotFound {
                    tenant_id: tenant_id.to_string(),
                })?;

        if entitlement.credits_remaining != expected_remaining {
            // A concurrent writer changed the balance first.
            tracing::debug!(
                tenant_id = %tenant_id,
                expected = expected_remaining,
                stored = entitlement.credits_remaining,
                "conditional update lost the race"
            );
            return Ok(None);
        }

        entitlement.credits_remaining = new_remaining;
        entitlement.updated_at = Utc::now();
        self.write_entitlement(&entitlement, None)?;

        Ok(Some(entitlement))
    }

    fn apply_rollover(
        &self,
        tenant_id: &TenantId,
        observed_period_end: Option<DateTime<Utc>>,
        credits_remaining: i64,
        current_period_end: DateTime<Utc>,
    ) -> Result<Entitlement> {
        let _guard = self.lock_writes()?;

        let mut entitlement =
            self.read_entitlement(tenant_id)?
                .ok_or_else(|| StoreError::NotFound {
                    tenant_id: tenant_id.to_string(),
                })?;

        if entitlement.current_period_end != observed_period_end {
            // A concurrent caller already advanced the period; their reset
            // stands and any deductions made since must not be wiped.
            tracing::debug!(
                tenant_id = %tenant_id,
                stored_period_end = ?entitlement.current_period_end,
                observed_period_end = ?observed_period_end,
                "rollover skipped, period already advanced"
            );
            return Ok(entitlement);
        }

        entitlement.credits_remaining = credits_remaining;
        entitlement.current_period_end = Some(current_period_end);
        entitlement.updated_at = Utc::now();
        self.write_entitlement(&entitlement, None)?;

        Ok(entitlement)
    }

    fn find_by_customer_ref(&self, customer_ref: &str) -> Result<Option<Entitlement>> {
        self.find_by_ref(cf::TENANTS_BY_CUSTOMER, customer_ref)
    }

    fn find_by_subscription_ref(&self, subscription_ref: &str) -> Result<Option<Entitlement>> {
        self.find_by_ref(cf::TENANTS_BY_SUBSCRIPTION, subscription_ref)
    }

    // =========================================================================
    // Usage Ledger Operations
    // =========================================================================

    fn append_usage(&self, record: &UsageRecord) -> Result<()> {
        let cf_usage = self.cf(cf::USAGE_RECORDS)?;
        let cf_by_tenant = self.cf(cf::USAGE_BY_TENANT)?;

        let record_key = keys::usage_record_key(&record.id);
        let tenant_key = keys::tenant_usage_key(&record.tenant_id, &record.id);
        let value = Self::serialize(record)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_usage, &record_key, &value);
        batch.put_cf(&cf_by_tenant, &tenant_key, []); // Index entry (empty value)

        self.db
            .write(batch)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(())
    }

    fn list_usage(
        &self,
        tenant_id: &TenantId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<UsageRecord>> {
        let cf_usage = self.cf(cf::USAGE_RECORDS)?;
        let cf_by_tenant = self.cf(cf::USAGE_BY_TENANT)?;
        let prefix = keys::tenant_usage_prefix(tenant_id);

        let iter = self.db.iterator_cf(
            &cf_by_tenant,
            IteratorMode::From(&prefix, rocksdb::Direction::Forward),
        );

        // Collect matching keys first; ULIDs are time-ordered, so reversing
        // yields newest first.
        let mut all_keys: Vec<Vec<u8>> = Vec::new();
        for item in iter {
            let (key, _) = item.map_err(|e| StoreError::Database(e.to_string()))?;

            if !key.starts_with(&prefix) {
                break;
            }

            all_keys.push(key.to_vec());
        }

        all_keys.reverse();

        let mut records = Vec::new();
        for key in all_keys.into_iter().skip(offset) {
            if records.len() >= limit {
                break;
            }

            let record_id = keys::extract_record_id_from_tenant_key(&key);
            let record = self
                .db
                .get_cf(&cf_usage, keys::usage_record_key(&record_id))
                .map_err(|e| StoreError::Database(e.to_string()))?
                .map(|data| Self::deserialize(&data))
                .transpose()?;

            if let Some(record) = record {
                records.push(record);
            }
        }

        Ok(records)
    }
}
