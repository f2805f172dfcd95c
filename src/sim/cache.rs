//! Content-addressed impulse-response cache with LRU eviction.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use log::trace;

use crate::Point;
use crate::sim::acoustics::RayTracingImpulseResponse;
use crate::sim::rays::TracingParameters;

/// Identity of a trace: same key, same (seeded) result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub geometry_version: u64,
    pub source: [i64; 3],
    pub listener: [i64; 3],
    pub parameters: u64,
}

fn quantize(p: Point, quantum: f64) -> [i64; 3] {
    let q = |v: f64| (v / quantum).round() as i64;
    [q(p.x), q(p.y), q(p.z)]
}

impl CacheKey {
    /// Positions are snapped to a grid of `quantum` meters.
    pub fn new(
        geometry_version: u64,
        source: Point,
        listener: Point,
        quantum: f64,
        params: &TracingParameters,
    ) -> Self {
        let quantum = if quantum > 0.0 { quantum } else { 1e-3 };
        Self {
            geometry_version,
            source: quantize(source, quantum),
            listener: quantize(listener, quantum),
            parameters: params.fingerprint(),
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Arc<RayTracingImpulseResponse>,
    /// Tick of the last access; the smallest one is evicted first.
    last_used: u64,
}

/// Bounded map from [`CacheKey`] to shared impulse responses.
#[derive(Debug, Clone)]
pub struct ImpulseResponseCache {
    capacity: usize,
    entries: HashMap<CacheKey, CacheEntry>,
    /// Access tick to key, oldest first.
    recency: BTreeMap<u64, CacheKey>,
    tick: u64,
    hits: u64,
    misses: u64,
}

impl ImpulseResponseCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: HashMap::new(),
            recency: BTreeMap::new(),
            tick: 0,
            hits: 0,
            misses: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }

    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    pub fn get(&mut self, key: &CacheKey) -> Option<Arc<RayTracingImpulseResponse>> {
        let tick = self.next_tick();
        match self.entries.get_mut(key) {
            Some(entry) => {
                self.recency.remove(&entry.last_used);
                self.recency.insert(tick, *key);
                entry.last_used = tick;
                self.hits += 1;
                Some(Arc::clone(&entry.value))
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Inserts or refreshes an entry, evicting the least recently used.
    pub fn insert(
        &mut self,
        key: CacheKey,
        ir: RayTracingImpulseResponse,
    ) -> Arc<RayTracingImpulseResponse> {
        let value = Arc::new(ir);
        let tick = self.next_tick();
        let entry = CacheEntry {
            value: Arc::clone(&value),
            last_used: tick,
        };
        if let Some(old) = self.entries.insert(key, entry) {
            self.recency.remove(&old.last_used);
        }
        self.recency.insert(tick, key);
        while self.entries.len() > self.capacity {
            let Some((_, oldest)) = self.recency.pop_first() else {
                break;
            };
            self.entries.remove(&oldest);
            trace!("Evicted impulse response for geometry v{}", oldest.geometry_version);
        }
        value
    }

    /// Returns the cached response or computes, stores and returns a new one.
    pub fn get_or_insert_with<E>(
        &mut self,
        key: CacheKey,
        compute: impl FnOnce() -> Result<RayTracingImpulseResponse, E>,
    ) -> Result<Arc<RayTracingImpulseResponse>, E> {
        if let Some(ir) = self.get(&key) {
            return Ok(ir);
        }
        Ok(self.insert(key, compute()?))
    }

    /// Drops every entry traced against another geometry version.
    pub fn retain_version(&mut self, geometry_version: u64) {
        self.entries.retain(|k, _| k.geometry_version == geometry_version);
        self.recency.retain(|_, k| k.geometry_version == geometry_version);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.recency.clear();
    }
}
