use crate::{Error, FromRow, MappingSettings, Materializer, Result, Schema, ShapeId};
use log::debug;
use std::{
    any::Any,
    collections::HashMap,
    sync::{
        Arc, LazyLock, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
        atomic::{AtomicU64, Ordering},
    },
};

/// Identity of a compiled plan.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PlanKey {
    pub shape: ShapeId,
    pub schema: Schema,
    /// [`MappingSettings::fingerprint`].
    pub settings: u64,
}

struct CachedPlan {
    plan: Arc<dyn Any + Send + Sync>,
    hits: AtomicU64,
}

/// Snapshot of the cache counters.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    /// Sum of the hits of every entry.
    pub hits: u64,
}

/// Concurrent cache of compiled materializers.
///
/// Lookups take a read lock, compilation happens outside any lock. When two
/// threads compile the same key concurrently the first insert wins and both
/// receive the stored plan.
#[derive(Default)]
pub struct PlanCache {
    plans: RwLock<HashMap<PlanKey, Arc<CachedPlan>>>,
}

static SHARED: LazyLock<Arc<PlanCache>> = LazyLock::new(Default::default);

impl PlanCache {
    pub fn new() -> Self {
        Self::default()
    }
    /// Process-wide cache used by jobs that were not given one.
    pub fn shared() -> Arc<PlanCache> {
        SHARED.clone()
    }
    fn read(&self) -> RwLockReadGuard<'_, HashMap<PlanKey, Arc<CachedPlan>>> {
        self.plans.read().unwrap_or_else(PoisonError::into_inner)
    }
    fn write(&self) -> RwLockWriteGuard<'_, HashMap<PlanKey, Arc<CachedPlan>>> {
        self.plans.write().unwrap_or_else(PoisonError::into_inner)
    }
    /// The cached materializer of `T` for `schema`, compiled and stored on a miss.
    pub fn get_or_compile<T: FromRow>(
        &self,
        schema: &Schema,
        settings: &MappingSettings,
    ) -> Result<Materializer<T>> {
        let key = PlanKey {
            shape: ShapeId::of::<T>(),
            schema: schema.clone(),
            settings: settings.fingerprint(),
        };
        let found = self.read().get(&key).cloned();
        if let Some(entry) = found {
            entry.hits.fetch_add(1, Ordering::Relaxed);
            return Self::downcast(&entry);
        }
        let compiled = T::compile(schema, settings)?;
        debug!(
            "Caching the plan of `{}` for {} columns",
            key.shape,
            schema.len()
        );
        let entry = self
            .write()
            .entry(key)
            .or_insert_with(|| {
                Arc::new(CachedPlan {
                    plan: Arc::new(compiled),
                    hits: AtomicU64::new(0),
                })
            })
            .clone();
        Self::downcast(&entry)
    }
    fn downcast<T: 'static>(entry: &CachedPlan) -> Result<Materializer<T>> {
        entry
            .plan
            .downcast_ref::<Materializer<T>>()
            .cloned()
            .ok_or_else(|| Error::msg("The cached plan does not match the requested shape"))
    }
    pub fn len(&self) -> usize {
        self.read().len()
    }
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
    pub fn contains(&self, key: &PlanKey) -> bool {
        self.read().contains_key(key)
    }
    /// Hits of the entry of `key`, `None` when it is not cached.
    pub fn hits(&self, key: &PlanKey) -> Option<u64> {
        self.read()
            .get(key)
            .map(|v| v.hits.load(Ordering::Relaxed))
    }
    pub fn stats(&self) -> CacheStats {
        let plans = self.read();
        CacheStats {
            entries: plans.len(),
            hits: plans.values().map(|v| v.hits.load(Ordering::Relaxed)).sum(),
        }
    }
    /// Removes the entries matching `predicate`, returns how many were removed.
    pub fn evict(&self, mut predicate: impl FnMut(&PlanKey) -> bool) -> usize {
        let mut plans = self.write();
        let before = plans.len();
        plans.retain(|k, _| !predicate(k));
        before - plans.len()
    }
    pub fn clear(&self) {
        self.write().clear();
    }
}

/// Resolves materializers for one query, through a cache or compiling every time.
#[derive(Clone)]
pub struct Mapper {
    cache: Option<Arc<PlanCache>>,
    settings: Arc<MappingSettings>,
}

impl Mapper {
    pub fn new(cache: Option<Arc<PlanCache>>, settings: Arc<MappingSettings>) -> Self {
        Self { cache, settings }
    }
    /// Mapper without cache and with default settings.
    pub fn uncached() -> Self {
        Self::new(None, Default::default())
    }
    pub fn settings(&self) -> &MappingSettings {
        &self.settings
    }
    pub fn cache(&self) -> Option<&PlanCache> {
        self.cache.as_deref()
    }
    pub fn materializer<T: FromRow>(&self, schema: &Schema) -> Result<Materializer<T>> {
        match &self.cache {
            Some(cache) => cache.get_or_compile::<T>(schema, &self.settings),
            None => T::compile(schema, &self.settings),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Mapper, PlanCache, PlanKey};
    use crate::{DataType, MappingSettings, MemoryCursor, RowCursor, Schema, ShapeId, Value};
    use std::{sync::Arc, thread};

    fn schema() -> Schema {
        Schema::new([("value", DataType::Int64)])
    }

    #[test]
    fn compiles_once() {
        let cache = PlanCache::new();
        let settings = MappingSettings::default();
        let key = PlanKey {
            shape: ShapeId::of::<i64>(),
            schema: schema(),
            settings: settings.fingerprint(),
        };
        assert!(cache.is_empty());
        cache.get_or_compile::<i64>(&schema(), &settings).unwrap();
        assert_eq!(cache.hits(&key), Some(0));
        cache.get_or_compile::<i64>(&schema(), &settings).unwrap();
        cache.get_or_compile::<i64>(&schema(), &settings).unwrap();
        assert_eq!(cache.hits(&key), Some(2));
        cache.get_or_compile::<i32>(&schema(), &settings).unwrap();
        cache
            .get_or_compile::<i64>(&schema(), &settings.clone().strict(true))
            .unwrap();
        let stats = cache.stats();
        assert_eq!(stats.entries, 3);
        assert_eq!(stats.hits, 2);
        assert_eq!(cache.evict(|k| k.shape == ShapeId::of::<i32>()), 1);
        assert_eq!(cache.len(), 2);
        cache.clear();
        assert!(!cache.contains(&key));
    }

    #[test]
    fn concurrent_compiles_keep_one_entry() {
        let cache = Arc::new(PlanCache::new());
        let settings = Arc::new(MappingSettings::default());
        thread::scope(|s| {
            for _ in 0..16 {
                let cache = cache.clone();
                let settings = settings.clone();
                s.spawn(move || {
                    let mapper = Mapper::new(Some(cache), settings);
                    let mut cursor = MemoryCursor::new()
                        .result_set([("value", DataType::Int64)], [vec![Value::Int64(Some(7))]]);
                    assert!(cursor.read().unwrap());
                    let materializer = mapper.materializer::<i64>(cursor.schema()).unwrap();
                    assert_eq!(materializer.materialize(&cursor).unwrap(), 7);
                });
            }
        });
        let stats = cache.stats();
        assert_eq!(stats.entries, 1);
        assert!(stats.hits <= 15);
    }

    #[test]
    fn failed_compiles_are_not_cached() {
        let cache = PlanCache::new();
        let text = Schema::new([("value", DataType::Varchar)]);
        assert!(
            cache
                .get_or_compile::<i64>(&text, &MappingSettings::default())
                .is_err()
        );
        assert!(cache.is_empty());
        assert!(Mapper::uncached().materializer::<Vec<i64>>(&text).is_err());
    }
}
