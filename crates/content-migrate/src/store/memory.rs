//! In-process destination store.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{
    ContentRecord, ContentStore, DestinationStore, FieldOverride, MappingSpec, MappingStore,
    MigrationMapping, NewContent,
};
use crate::error::{MigrateError, Result};

#[derive(Debug, Clone)]
struct Claim {
    owner: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct State {
    contents: HashMap<Uuid, ContentRecord>,
    mappings: Vec<MigrationMapping>,
    claims: HashMap<(String, i64), Claim>,
}

/// Destination store held in memory.
///
/// Enforces the same invariants as the Postgres schema: unique slugs and at
/// most one active mapping per source row.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| MigrateError::Store("memory store lock poisoned".into()))
    }

    /// All content records ordered by creation time.
    pub fn contents(&self) -> Vec<ContentRecord> {
        let mut records: Vec<ContentRecord> = self
            .lock()
            .map(|s| s.contents.values().cloned().collect())
            .unwrap_or_default();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.slug.cmp(&b.slug)));
        records
    }

    /// All mappings, active or not, in creation order.
    pub fn mappings(&self) -> Vec<MigrationMapping> {
        self.lock().map(|s| s.mappings.clone()).unwrap_or_default()
    }

    /// Hold a lease on behalf of another owner.
    pub fn hold_claim(&self, source_table: &str, source_id: i64, owner: &str, lease: Duration) {
        if let Ok(mut state) = self.lock() {
            state.claims.insert(
                (source_table.to_string(), source_id),
                Claim {
                    owner: owner.to_string(),
                    expires_at: Utc::now() + lease_duration(lease),
                },
            );
        }
    }

    /// Whether a lease is currently recorded for the row.
    pub fn is_claimed(&self, source_table: &str, source_id: i64) -> bool {
        self.lock()
            .map(|s| {
                s.claims
                    .get(&(source_table.to_string(), source_id))
                    .is_some_and(|c| c.expires_at > Utc::now())
            })
            .unwrap_or(false)
    }
}

fn lease_duration(lease: Duration) -> chrono::Duration {
    chrono::Duration::from_std(lease).unwrap_or_else(|_| chrono::Duration::seconds(300))
}

#[async_trait]
impl ContentStore for MemoryStore {
    async fn slug_exists(&self, slug: &str) -> Result<bool> {
        let state = self.lock()?;
        Ok(state.contents.values().any(|c| c.slug == slug))
    }

    async fn create_content(&self, content: &NewContent) -> Result<ContentRecord> {
        let mut state = self.lock()?;
        if state.contents.values().any(|c| c.slug == content.slug) {
            return Err(MigrateError::Store(format!(
                "slug '{}' already exists",
                content.slug
            )));
        }

        let now = Utc::now();
        let record = ContentRecord {
            id: Uuid::new_v4(),
            content_type: content.content_type.clone(),
            title: content.title.clone(),
            slug: content.slug.clone(),
            body: content.body.clone(),
            excerpt: content.excerpt.clone(),
            status: content.status.clone(),
            published_at: content.published_at,
            meta_title: content.meta_title.clone(),
            meta_description: content.meta_description.clone(),
            fields: content.fields.clone(),
            metadata: content.metadata.clone(),
            created_at: now,
            updated_at: now,
        };
        state.contents.insert(record.id, record.clone());
        Ok(record)
    }

    async fn update_content(&self, id: Uuid, content: &NewContent) -> Result<ContentRecord> {
        let mut state = self.lock()?;
        let record = state
            .contents
            .get_mut(&id)
            .ok_or_else(|| MigrateError::Store(format!("content {} not found", id)))?;

        record.content_type = content.content_type.clone();
        record.title = content.title.clone();
        record.body = content.body.clone();
        record.excerpt = content.excerpt.clone();
        record.status = content.status.clone();
        record.published_at = content.published_at;
        record.meta_title = content.meta_title.clone();
        record.meta_description = content.meta_description.clone();
        record.fields = content.fields.clone();
        record.metadata = content.metadata.clone();
        record.updated_at = Utc::now();
        Ok(record.clone())
    }

    async fn get_content(&self, id: Uuid) -> Result<Option<ContentRecord>> {
        Ok(self.lock()?.contents.get(&id).cloned())
    }

    async fn delete_content(&self, id: Uuid) -> Result<bool> {
        let mut state = self.lock()?;
        let removed = state.contents.remove(&id).is_some();
        if removed {
            state.mappings.retain(|m| m.content_id != id);
        }
        Ok(removed)
    }
}

#[async_trait]
impl MappingStore for MemoryStore {
    async fn active_source_ids(&self, source_table: &str) -> Result<HashSet<i64>> {
        let state = self.lock()?;
        Ok(state
            .mappings
            .iter()
            .filter(|m| m.is_active && m.source_table == source_table)
            .map(|m| m.source_id)
            .collect())
    }

    async fn create_mapping(
        &self,
        content_id: Uuid,
        spec: &MappingSpec,
        overrides: &[FieldOverride],
    ) -> Result<MigrationMapping> {
        let mut state = self.lock()?;
        let duplicate = state.mappings.iter().any(|m| {
            m.is_active && m.source_table == spec.source_table && m.source_id == spec.source_id
        });
        if duplicate {
            return Err(MigrateError::Store(format!(
                "active mapping already exists for {}#{}",
                spec.source_table, spec.source_id
            )));
        }
        if !state.contents.contains_key(&content_id) {
            return Err(MigrateError::Store(format!(
                "content {} not found",
                content_id
            )));
        }

        let mapping = MigrationMapping {
            id: Uuid::new_v4(),
            source_table: spec.source_table.clone(),
            source_id: spec.source_id,
            content_id,
            mapping_type: spec.mapping_type,
            sync_direction: spec.sync_direction,
            sync_frequency: spec.sync_frequency,
            is_active: true,
            created_at: Utc::now(),
            last_sync_at: None,
            sync_error: None,
            overrides: overrides.to_vec(),
        };
        state.mappings.push(mapping.clone());
        Ok(mapping)
    }

    async fn get_mapping(&self, id: Uuid) -> Result<Option<MigrationMapping>> {
        let state = self.lock()?;
        Ok(state.mappings.iter().find(|m| m.id == id).cloned())
    }

    async fn find_active_mapping(
        &self,
        source_table: &str,
        source_id: i64,
    ) -> Result<Option<MigrationMapping>> {
        let state = self.lock()?;
        Ok(state
            .mappings
            .iter()
            .find(|m| m.is_active && m.source_table == source_table && m.source_id == source_id)
            .cloned())
    }

    async fn list_active_mappings(
        &self,
        source_table: &str,
        limit: usize,
    ) -> Result<Vec<MigrationMapping>> {
        let state = self.lock()?;
        let mut active: Vec<MigrationMapping> = state
            .mappings
            .iter()
            .filter(|m| m.is_active && m.source_table == source_table)
            .cloned()
            .collect();
        // Never-synced first, then oldest sync.
        active.sort_by(|a, b| {
            a.last_sync_at
                .cmp(&b.last_sync_at)
                .then(a.source_id.cmp(&b.source_id))
        });
        active.truncate(limit);
        Ok(active)
    }

    async fn record_sync(&self, id: Uuid, at: DateTime<Utc>, error: Option<&str>) -> Result<()> {
        let mut state = self.lock()?;
        let mapping = state
            .mappings
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| MigrateError::Store(format!("mapping {} not found", id)))?;
        mapping.last_sync_at = Some(at);
        mapping.sync_error = error.map(str::to_string);
        Ok(())
    }

    async fn claim(
        &self,
        source_table: &str,
        source_id: i64,
        owner: &str,
        lease: Duration,
    ) -> Result<bool> {
        let mut state = self.lock()?;
        let now = Utc::now();
        let key = (source_table.to_string(), source_id);

        if let Some(existing) = state.claims.get(&key) {
            if existing.owner != owner && existing.expires_at > now {
                return Ok(false);
            }
        }
        state.claims.insert(
            key,
            Claim {
                owner: owner.to_string(),
                expires_at: now + lease_duration(lease),
            },
        );
        Ok(true)
    }

    async fn release(&self, source_table: &str, source_id: i64, owner: &str) -> Result<()> {
        let mut state = self.lock()?;
        let key = (source_table.to_string(), source_id);
        if state.claims.get(&key).is_some_and(|c| c.owner == owner) {
            state.claims.remove(&key);
        }
        Ok(())
    }
}

#[async_trait]
impl DestinationStore for MemoryStore {
    async fn init_schema(&self) -> Result<()> {
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}
