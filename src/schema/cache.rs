//! TTL-boxed cache of REST-shaped class schemas.
//!
//! One of these is injected into the database controller and shared across
//! every request worker. Reads may observe staleness between a schema
//! mutation and its reload; mutating schema operations always repopulate the
//! cache before returning.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use log::debug;

use crate::error::{PlinthError, PlinthResult};
use crate::schema::types::ClassSchema;

/// Default entry lifetime in milliseconds.
pub const DEFAULT_TTL_MS: i64 = 5_000;

struct Entry {
    schema: ClassSchema,
    cached_at: Instant,
}

#[derive(Default)]
struct State {
    entries: HashMap<String, Entry>,
    /// Set when the entries represent the complete class list.
    full_set_at: Option<Instant>,
}

/// Shared, mutex-guarded schema cache.
///
/// TTL semantics: positive values expire entries after that many
/// milliseconds, a negative value never expires them, and zero disables
/// caching entirely (every lookup misses).
pub struct SchemaCache {
    ttl_ms: i64,
    state: Mutex<State>,
}

impl SchemaCache {
    pub fn new(ttl_ms: i64) -> Self {
        SchemaCache {
            ttl_ms,
            state: Mutex::new(State::default()),
        }
    }

    fn fresh(&self, cached_at: Instant) -> bool {
        if self.ttl_ms < 0 {
            return true;
        }
        if self.ttl_ms == 0 {
            return false;
        }
        cached_at.elapsed() < Duration::from_millis(self.ttl_ms as u64)
    }

    /// The complete class list, if a fresh full snapshot is cached.
    pub fn get_all(&self) -> PlinthResult<Option<Vec<ClassSchema>>> {
        if self.ttl_ms == 0 {
            return Ok(None);
        }
        let state = self.state.lock().map_err(|_| PlinthError::lock("schema cache"))?;
        match state.full_set_at {
            Some(at) if self.fresh(at) => Ok(Some(
                state.entries.values().map(|e| e.schema.clone()).collect(),
            )),
            _ => Ok(None),
        }
    }

    /// One cached class schema, if fresh.
    pub fn get_one(&self, class_name: &str) -> PlinthResult<Option<ClassSchema>> {
        if self.ttl_ms == 0 {
            return Ok(None);
        }
        let state = self.state.lock().map_err(|_| PlinthError::lock("schema cache"))?;
        match state.entries.get(class_name) {
            Some(entry) if self.fresh(entry.cached_at) => Ok(Some(entry.schema.clone())),
            _ => Ok(None),
        }
    }

    /// Replaces the cache with a complete class snapshot.
    pub fn put_all(&self, schemas: Vec<ClassSchema>) -> PlinthResult<()> {
        if self.ttl_ms == 0 {
            return Ok(());
        }
        let now = Instant::now();
        let mut state = self.state.lock().map_err(|_| PlinthError::lock("schema cache"))?;
        state.entries = schemas
            .into_iter()
            .map(|schema| {
                (
                    schema.class_name.clone(),
                    Entry {
                        schema,
                        cached_at: now,
                    },
                )
            })
            .collect();
        state.full_set_at = Some(now);
        Ok(())
    }

    /// Caches a single class schema without marking the full set fresh.
    pub fn put_one(&self, schema: ClassSchema) -> PlinthResult<()> {
        if self.ttl_ms == 0 {
            return Ok(());
        }
        let mut state = self.state.lock().map_err(|_| PlinthError::lock("schema cache"))?;
        state.entries.insert(
            schema.class_name.clone(),
            Entry {
                schema,
                cached_at: Instant::now(),
            },
        );
        Ok(())
    }

    /// Drops one class. The full-set marker is cleared because the list is
    /// no longer known to be complete.
    pub fn del_one(&self, class_name: &str) -> PlinthResult<()> {
        let mut state = self.state.lock().map_err(|_| PlinthError::lock("schema cache"))?;
        state.entries.remove(class_name);
        state.full_set_at = None;
        Ok(())
    }

    /// Wipes everything.
    pub fn clear(&self) -> PlinthResult<()> {
        debug!("schema cache cleared");
        let mut state = self.state.lock().map_err(|_| PlinthError::lock("schema cache"))?;
        state.entries.clear();
        state.full_set_at = None;
        Ok(())
    }
}

impl Default for SchemaCache {
    fn default() -> Self {
        SchemaCache::new(DEFAULT_TTL_MS)
    }
}
