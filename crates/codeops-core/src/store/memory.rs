//! In-memory store implementation for development and testing
//!
//! Backs every repository trait with `DashMap`s. Per-entry mutations run
//! under the map's shard lock, which gives the same guarantees the SQL
//! contracts ask for: unique-key inserts are check-and-insert atomic,
//! version allocation is serialized per secret, and lease transitions are
//! guarded read-modify-writes. Audit records live in their own collection
//! and an append can never be failed by domain state.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

use crate::error::{Result, VaultError};
use crate::store::{
    AuditFilter, AuditRepository, LeaseRepository, NewAuditRecord, Page, PolicyRepository,
    RotationRepository, SecretListFilter, SecretRepository, TransitKeyRepository,
};
use crate::types::*;

#[derive(Default)]
pub struct MemoryStore {
    secrets: DashMap<Uuid, Secret>,
    secret_paths: DashMap<(Uuid, String), Uuid>,
    versions: DashMap<Uuid, Vec<SecretVersion>>,
    metadata: DashMap<Uuid, Vec<SecretMetadataEntry>>,

    policies: DashMap<Uuid, AccessPolicy>,
    policy_names: DashMap<(Uuid, String), Uuid>,
    bindings: DashMap<Uuid, PolicyBinding>,

    rotation_policies: DashMap<Uuid, RotationPolicy>,
    rotation_history: Mutex<Vec<RotationHistoryRecord>>,

    leases: DashMap<String, DynamicLease>,

    transit_keys: DashMap<Uuid, TransitKey>,
    transit_names: DashMap<(Uuid, String), Uuid>,

    audit_records: Mutex<Vec<AuditRecord>>,
    audit_seq: AtomicI64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn paginate<T>(mut items: Vec<T>, page: Page) -> Vec<T> {
    let start = page.offset.min(items.len());
    let end = start.saturating_add(page.limit).min(items.len());
    items.drain(..start);
    items.truncate(end - start);
    items
}

#[async_trait]
impl SecretRepository for MemoryStore {
    async fn insert_secret(&self, secret: Secret) -> Result<Secret> {
        match self
            .secret_paths
            .entry((secret.team_id, secret.path.clone()))
        {
            Entry::Occupied(_) => Err(VaultError::InvalidInput(format!(
                "a secret already exists at path {}",
                secret.path
            ))),
            Entry::Vacant(slot) => {
                slot.insert(secret.id);
                self.secrets.insert(secret.id, secret.clone());
                Ok(secret)
            }
        }
    }

    async fn get_secret(&self, id: Uuid) -> Result<Option<Secret>> {
        Ok(self.secrets.get(&id).map(|s| s.clone()))
    }

    async fn get_secret_by_path(&self, team_id: Uuid, path: &str) -> Result<Option<Secret>> {
        let id = match self.secret_paths.get(&(team_id, path.to_string())) {
            Some(id) => *id,
            None => return Ok(None),
        };
        self.get_secret(id).await
    }

    async fn save_secret(&self, mut secret: Secret) -> Result<Secret> {
        let mut slot = self
            .secrets
            .get_mut(&secret.id)
            .ok_or_else(|| VaultError::NotFound(format!("secret {}", secret.id)))?;
        secret.row_version = slot.row_version + 1;
        secret.updated_at = Utc::now();
        *slot = secret.clone();
        Ok(secret)
    }

    async fn delete_secret(&self, id: Uuid) -> Result<()> {
        let (_, secret) = self
            .secrets
            .remove(&id)
            .ok_or_else(|| VaultError::NotFound(format!("secret {id}")))?;
        self.secret_paths.remove(&(secret.team_id, secret.path));
        self.versions.remove(&id);
        self.metadata.remove(&id);
        self.rotation_policies.remove(&id);
        Ok(())
    }

    async fn list_secrets(
        &self,
        team_id: Uuid,
        filter: &SecretListFilter,
        page: Page,
    ) -> Result<Vec<Secret>> {
        let mut items: Vec<Secret> = self
            .secrets
            .iter()
            .filter(|s| s.team_id == team_id)
            .filter(|s| match filter {
                SecretListFilter::Type(t) => s.secret_type == *t,
                SecretListFilter::PathPrefix(prefix) => s.path.starts_with(prefix.as_str()),
                SecretListFilter::ActiveOnly => s.active,
                SecretListFilter::All => true,
            })
            .map(|s| s.clone())
            .collect();
        items.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(paginate(items, page))
    }

    async fn search_secrets(&self, team_id: Uuid, query: &str, page: Page) -> Result<Vec<Secret>> {
        let needle = query.to_lowercase();
        let mut items: Vec<Secret> = self
            .secrets
            .iter()
            .filter(|s| s.team_id == team_id && s.name.to_lowercase().contains(&needle))
            .map(|s| s.clone())
            .collect();
        items.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(paginate(items, page))
    }

    async fn secret_paths(&self, team_id: Uuid, prefix: &str) -> Result<Vec<String>> {
        let paths: BTreeSet<String> = self
            .secrets
            .iter()
            .filter(|s| s.team_id == team_id && s.path.starts_with(prefix))
            .map(|s| s.path.clone())
            .collect();
        Ok(paths.into_iter().collect())
    }

    async fn expiring_secrets(&self, team_id: Uuid, before: DateTime<Utc>) -> Result<Vec<Secret>> {
        let mut items: Vec<Secret> = self
            .secrets
            .iter()
            .filter(|s| {
                s.team_id == team_id
                    && s.active
                    && s.expires_at.map(|at| at <= before).unwrap_or(false)
            })
            .map(|s| s.clone())
            .collect();
        items.sort_by_key(|s| s.expires_at);
        Ok(items)
    }

    async fn allocate_version(
        &self,
        secret_id: Uuid,
        ciphertext: String,
        key_id: String,
        change_description: Option<String>,
        created_by: Option<String>,
    ) -> Result<SecretVersion> {
        if !self.secrets.contains_key(&secret_id) {
            return Err(VaultError::NotFound(format!("secret {secret_id}")));
        }

        // The entry guard serializes allocation per secret, so version
        // numbers never collide.
        let mut versions = self.versions.entry(secret_id).or_default();
        let next = versions
            .iter()
            .map(|v| v.version_number)
            .max()
            .unwrap_or(0)
            + 1;
        let now = Utc::now();
        let version = SecretVersion {
            id: Uuid::new_v4(),
            secret_id,
            version_number: next,
            ciphertext,
            key_id,
            change_description,
            created_by,
            destroyed: false,
            created_at: now,
            updated_at: now,
        };
        versions.push(version.clone());

        if let Some(mut secret) = self.secrets.get_mut(&secret_id) {
            secret.current_version = next;
            secret.updated_at = now;
            secret.row_version += 1;
        }

        Ok(version)
    }

    async fn get_version(
        &self,
        secret_id: Uuid,
        version_number: i32,
    ) -> Result<Option<SecretVersion>> {
        Ok(self.versions.get(&secret_id).and_then(|versions| {
            versions
                .iter()
                .find(|v| v.version_number == version_number)
                .cloned()
        }))
    }

    async fn list_versions(&self, secret_id: Uuid) -> Result<Vec<SecretVersion>> {
        let mut items = self
            .versions
            .get(&secret_id)
            .map(|v| v.clone())
            .unwrap_or_default();
        items.sort_by_key(|v| v.version_number);
        Ok(items)
    }

    async fn destroy_version(&self, secret_id: Uuid, version_number: i32) -> Result<SecretVersion> {
        let mut versions = self
            .versions
            .get_mut(&secret_id)
            .ok_or_else(|| VaultError::NotFound(format!("secret {secret_id} has no versions")))?;
        let version = versions
            .iter_mut()
            .find(|v| v.version_number == version_number)
            .ok_or_else(|| {
                VaultError::NotFound(format!("version {version_number} of secret {secret_id}"))
            })?;
        if version.destroyed {
            return Err(VaultError::InvalidInput(format!(
                "version {version_number} is already destroyed"
            )));
        }
        version.ciphertext = DESTROYED_CIPHERTEXT.to_string();
        version.destroyed = true;
        version.updated_at = Utc::now();
        Ok(version.clone())
    }

    async fn set_metadata(
        &self,
        secret_id: Uuid,
        key: &str,
        value: &str,
    ) -> Result<SecretMetadataEntry> {
        let mut entries = self.metadata.entry(secret_id).or_default();
        let now = Utc::now();
        if let Some(entry) = entries.iter_mut().find(|e| e.key == key) {
            entry.value = value.to_string();
            entry.updated_at = now;
            return Ok(entry.clone());
        }
        let entry = SecretMetadataEntry {
            id: Uuid::new_v4(),
            secret_id,
            key: key.to_string(),
            value: value.to_string(),
            created_at: now,
            updated_at: now,
        };
        entries.push(entry.clone());
        Ok(entry)
    }

    async fn remove_metadata(&self, secret_id: Uuid, key: &str) -> Result<()> {
        if let Some(mut entries) = self.metadata.get_mut(&secret_id) {
            entries.retain(|e| e.key != key);
        }
        Ok(())
    }

    async fn get_metadata(&self, secret_id: Uuid) -> Result<Vec<SecretMetadataEntry>> {
        let mut items = self
            .metadata
            .get(&secret_id)
            .map(|e| e.clone())
            .unwrap_or_default();
        items.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(items)
    }

    async fn replace_metadata(
        &self,
        secret_id: Uuid,
        pairs: Vec<(String, String)>,
    ) -> Result<Vec<SecretMetadataEntry>> {
        let mut entries = self.metadata.entry(secret_id).or_default();
        let now = Utc::now();
        entries.clear();
        for (key, value) in pairs {
            entries.push(SecretMetadataEntry {
                id: Uuid::new_v4(),
                secret_id,
                key,
                value,
                created_at: now,
                updated_at: now,
            });
        }
        Ok(entries.clone())
    }
}

#[async_trait]
impl PolicyRepository for MemoryStore {
    async fn insert_policy(&self, policy: AccessPolicy) -> Result<AccessPolicy> {
        match self
            .policy_names
            .entry((policy.team_id, policy.name.clone()))
        {
            Entry::Occupied(_) => Err(VaultError::InvalidInput(format!(
                "a policy named {} already exists",
                policy.name
            ))),
            Entry::Vacant(slot) => {
                slot.insert(policy.id);
                self.policies.insert(policy.id, policy.clone());
                Ok(policy)
            }
        }
    }

    async fn get_policy(&self, id: Uuid) -> Result<Option<AccessPolicy>> {
        Ok(self.policies.get(&id).map(|p| p.clone()))
    }

    async fn save_policy(&self, mut policy: AccessPolicy) -> Result<AccessPolicy> {
        let mut slot = self
            .policies
            .get_mut(&policy.id)
            .ok_or_else(|| VaultError::NotFound(format!("policy {}", policy.id)))?;
        policy.row_version = slot.row_version + 1;
        policy.updated_at = Utc::now();
        *slot = policy.clone();
        Ok(policy)
    }

    async fn delete_policy(&self, id: Uuid) -> Result<()> {
        let (_, policy) = self
            .policies
            .remove(&id)
            .ok_or_else(|| VaultError::NotFound(format!("policy {id}")))?;
        self.policy_names.remove(&(policy.team_id, policy.name));
        self.bindings.retain(|_, b| b.policy_id != id);
        Ok(())
    }

    async fn list_policies(&self, team_id: Uuid) -> Result<Vec<AccessPolicy>> {
        let mut items: Vec<AccessPolicy> = self
            .policies
            .iter()
            .filter(|p| p.team_id == team_id)
            .map(|p| p.clone())
            .collect();
        items.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(items)
    }

    async fn insert_binding(&self, binding: PolicyBinding) -> Result<PolicyBinding> {
        let duplicate = self.bindings.iter().any(|b| {
            b.policy_id == binding.policy_id
                && b.binding_type == binding.binding_type
                && b.target_id == binding.target_id
        });
        if duplicate {
            return Err(VaultError::InvalidInput(
                "an identical binding already exists".into(),
            ));
        }
        self.bindings.insert(binding.id, binding.clone());
        Ok(binding)
    }

    async fn delete_binding(&self, id: Uuid) -> Result<()> {
        self.bindings
            .remove(&id)
            .ok_or_else(|| VaultError::NotFound(format!("binding {id}")))?;
        Ok(())
    }

    async fn list_bindings(&self, policy_id: Uuid) -> Result<Vec<PolicyBinding>> {
        Ok(self
            .bindings
            .iter()
            .filter(|b| b.policy_id == policy_id)
            .map(|b| b.clone())
            .collect())
    }

    async fn bindings_for_targets(
        &self,
        targets: &[(BindingType, String)],
    ) -> Result<Vec<PolicyBinding>> {
        Ok(self
            .bindings
            .iter()
            .filter(|b| {
                b.active
                    && targets
                        .iter()
                        .any(|(t, id)| b.binding_type == *t && b.target_id == *id)
            })
            .map(|b| b.clone())
            .collect())
    }
}

#[async_trait]
impl RotationRepository for MemoryStore {
    async fn upsert_policy(&self, mut policy: RotationPolicy) -> Result<RotationPolicy> {
        match self.rotation_policies.entry(policy.secret_id) {
            Entry::Occupied(mut slot) => {
                let existing = slot.get();
                policy.id = existing.id;
                policy.created_at = existing.created_at;
                policy.row_version = existing.row_version + 1;
                policy.updated_at = Utc::now();
                slot.insert(policy.clone());
                Ok(policy)
            }
            Entry::Vacant(slot) => {
                slot.insert(policy.clone());
                Ok(policy)
            }
        }
    }

    async fn get_policy_by_secret(&self, secret_id: Uuid) -> Result<Option<RotationPolicy>> {
        Ok(self.rotation_policies.get(&secret_id).map(|p| p.clone()))
    }

    async fn save_policy(&self, mut policy: RotationPolicy) -> Result<RotationPolicy> {
        let mut slot = self
            .rotation_policies
            .get_mut(&policy.secret_id)
            .ok_or_else(|| {
                VaultError::NotFound(format!("rotation policy for secret {}", policy.secret_id))
            })?;
        policy.row_version = slot.row_version + 1;
        policy.updated_at = Utc::now();
        *slot = policy.clone();
        Ok(policy)
    }

    async fn delete_policy_by_secret(&self, secret_id: Uuid) -> Result<()> {
        self.rotation_policies.remove(&secret_id);
        Ok(())
    }

    async fn due_policies(&self, now: DateTime<Utc>) -> Result<Vec<RotationPolicy>> {
        let mut items: Vec<RotationPolicy> = self
            .rotation_policies
            .iter()
            .filter(|p| p.active && p.next_rotation_at < now)
            .map(|p| p.clone())
            .collect();
        items.sort_by_key(|p| p.next_rotation_at);
        Ok(items)
    }

    async fn append_history(&self, record: RotationHistoryRecord) -> Result<RotationHistoryRecord> {
        let mut history = self.rotation_history.lock().expect("history lock poisoned");
        history.push(record.clone());
        Ok(record)
    }

    async fn history_for_secret(
        &self,
        secret_id: Uuid,
        page: Page,
    ) -> Result<Vec<RotationHistoryRecord>> {
        let history = self.rotation_history.lock().expect("history lock poisoned");
        let mut items: Vec<RotationHistoryRecord> = history
            .iter()
            .filter(|h| h.secret_id == secret_id)
            .cloned()
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(paginate(items, page))
    }

    async fn last_successful_rotation(
        &self,
        secret_id: Uuid,
    ) -> Result<Option<RotationHistoryRecord>> {
        let history = self.rotation_history.lock().expect("history lock poisoned");
        Ok(history
            .iter()
            .filter(|h| h.secret_id == secret_id && h.success)
            .max_by_key(|h| h.created_at)
            .cloned())
    }

    async fn history_counts(&self, secret_id: Uuid) -> Result<(u64, u64)> {
        let history = self.rotation_history.lock().expect("history lock poisoned");
        let total = history.iter().filter(|h| h.secret_id == secret_id).count() as u64;
        let failures = history
            .iter()
            .filter(|h| h.secret_id == secret_id && !h.success)
            .count() as u64;
        Ok((total, failures))
    }
}

#[async_trait]
impl LeaseRepository for MemoryStore {
    async fn insert_lease(&self, lease: DynamicLease) -> Result<DynamicLease> {
        match self.leases.entry(lease.lease_id.clone()) {
            Entry::Occupied(_) => Err(VaultError::InvalidInput(format!(
                "lease {} already exists",
                lease.lease_id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(lease.clone());
                Ok(lease)
            }
        }
    }

    async fn get_lease(&self, lease_id: &str) -> Result<Option<DynamicLease>> {
        Ok(self.leases.get(lease_id).map(|l| l.clone()))
    }

    async fn leases_for_secret(&self, secret_id: Uuid) -> Result<Vec<DynamicLease>> {
        let mut items: Vec<DynamicLease> = self
            .leases
            .iter()
            .filter(|l| l.secret_id == secret_id)
            .map(|l| l.clone())
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(items)
    }

    async fn active_leases_for_secret(&self, secret_id: Uuid) -> Result<Vec<DynamicLease>> {
        Ok(self
            .leases
            .iter()
            .filter(|l| l.secret_id == secret_id && l.status == LeaseStatus::Active)
            .map(|l| l.clone())
            .collect())
    }

    async fn expired_active_leases(&self, now: DateTime<Utc>) -> Result<Vec<DynamicLease>> {
        Ok(self
            .leases
            .iter()
            .filter(|l| l.status == LeaseStatus::Active && l.expires_at < now)
            .map(|l| l.clone())
            .collect())
    }

    async fn transition_lease(
        &self,
        lease_id: &str,
        to: LeaseStatus,
        revoked_by: Option<String>,
    ) -> Result<DynamicLease> {
        let mut lease = self
            .leases
            .get_mut(lease_id)
            .ok_or_else(|| VaultError::NotFound(format!("lease {lease_id}")))?;
        if lease.status != LeaseStatus::Active {
            return Err(VaultError::InvalidInput(format!(
                "lease {lease_id} is not active"
            )));
        }
        if to == LeaseStatus::Active {
            return Err(VaultError::InvalidInput(
                "a lease cannot transition back to active".into(),
            ));
        }
        let now = Utc::now();
        lease.status = to;
        lease.updated_at = now;
        lease.row_version += 1;
        if to == LeaseStatus::Revoked {
            lease.revoked_at = Some(now);
            lease.revoked_by = revoked_by;
        }
        Ok(lease.clone())
    }
}

#[async_trait]
impl TransitKeyRepository for MemoryStore {
    async fn insert_key(&self, key: TransitKey) -> Result<TransitKey> {
        match self.transit_names.entry((key.team_id, key.name.clone())) {
            Entry::Occupied(_) => Err(VaultError::InvalidInput(format!(
                "a transit key named {} already exists",
                key.name
            ))),
            Entry::Vacant(slot) => {
                slot.insert(key.id);
                self.transit_keys.insert(key.id, key.clone());
                Ok(key)
            }
        }
    }

    async fn get_key(&self, team_id: Uuid, name: &str) -> Result<Option<TransitKey>> {
        let id = match self.transit_names.get(&(team_id, name.to_string())) {
            Some(id) => *id,
            None => return Ok(None),
        };
        Ok(self.transit_keys.get(&id).map(|k| k.clone()))
    }

    async fn save_key(&self, mut key: TransitKey) -> Result<TransitKey> {
        let mut slot = self
            .transit_keys
            .get_mut(&key.id)
            .ok_or_else(|| VaultError::NotFound(format!("transit key {}", key.name)))?;
        key.row_version = slot.row_version + 1;
        key.updated_at = Utc::now();
        *slot = key.clone();
        Ok(key)
    }

    async fn delete_key(&self, id: Uuid) -> Result<()> {
        let (_, key) = self
            .transit_keys
            .remove(&id)
            .ok_or_else(|| VaultError::NotFound(format!("transit key {id}")))?;
        self.transit_names.remove(&(key.team_id, key.name));
        Ok(())
    }

    async fn list_keys(&self, team_id: Uuid) -> Result<Vec<TransitKey>> {
        let mut items: Vec<TransitKey> = self
            .transit_keys
            .iter()
            .filter(|k| k.team_id == team_id)
            .map(|k| k.clone())
            .collect();
        items.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(items)
    }
}

#[async_trait]
impl AuditRepository for MemoryStore {
    async fn append(&self, record: NewAuditRecord) -> Result<AuditRecord> {
        let id = self.audit_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let record = AuditRecord {
            id,
            team_id: record.team_id,
            user_id: record.user_id,
            operation: record.operation,
            path: record.path,
            resource_type: record.resource_type,
            resource_id: record.resource_id,
            success: record.success,
            error: record.error,
            client_ip: record.client_ip,
            correlation_id: record.correlation_id,
            details: record.details,
            created_at: Utc::now(),
        };
        let mut records = self.audit_records.lock().expect("audit lock poisoned");
        records.push(record.clone());
        Ok(record)
    }

    async fn query(
        &self,
        team_id: Uuid,
        filter: &AuditFilter,
        page: Page,
    ) -> Result<Vec<AuditRecord>> {
        let records = self.audit_records.lock().expect("audit lock poisoned");
        let mut items: Vec<AuditRecord> = records
            .iter()
            .filter(|r| r.team_id == Some(team_id))
            .filter(|r| match filter {
                AuditFilter::Resource {
                    resource_type,
                    resource_id,
                } => {
                    r.resource_type.as_deref() == Some(resource_type.as_str())
                        && r.resource_id.as_deref() == Some(resource_id.as_str())
                }
                AuditFilter::User(user) => r.user_id.as_deref() == Some(user.as_str()),
                AuditFilter::Operation(op) => r.operation == *op,
                AuditFilter::Path(path) => r.path.as_deref() == Some(path.as_str()),
                AuditFilter::TimeRange { start, end } => {
                    r.created_at >= *start && r.created_at <= *end
                }
                AuditFilter::FailuresOnly => !r.success,
                AuditFilter::All => true,
            })
            .cloned()
            .collect();
        items.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(paginate(items, page))
    }
}

#[cfg(test)]
impl MemoryStore {
    /// Test hook: move a lease's deadline without a status transition.
    pub(crate) fn backdate_lease(&self, lease_id: &str, expires_at: DateTime<Utc>) {
        if let Some(mut lease) = self.leases.get_mut(lease_id) {
            lease.expires_at = expires_at;
        }
    }
}
