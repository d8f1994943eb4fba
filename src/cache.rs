//! Completed-result cache.
//!
//! Identical requests (same text, voice and synthesis parameters) are served
//! from memory instead of occupying a worker. Entries expire after `ttl_secs`
//! and the least recently used entry is evicted at capacity.
//!
//! Requests that name an explicit output target are never cached: the caller
//! expects that file to be written.

use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::config::CacheConfig;
use crate::observability::metrics;
use crate::request::{SynthesisRequest, SynthesisResult};

/// The request fields that determine the synthesized audio.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    text: String,
    voice: Option<String>,
    speed_bits: Option<u32>,
    pitch_bits: Option<u32>,
    output_format: Option<String>,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    result: SynthesisResult,
    inserted_at: Instant,
    last_used: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

/// In-memory LRU cache of successful results.
#[derive(Debug)]
pub struct ResultCache {
    enabled: bool,
    max_entries: usize,
    ttl: Duration,
    inner: DashMap<CacheKey, CacheEntry>,
    clock: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResultCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            enabled: config.enabled && config.max_entries > 0,
            max_entries: config.max_entries,
            ttl: Duration::from_secs(config.ttl_secs),
            inner: DashMap::new(),
            clock: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Cache key, or `None` when the request must not be cached.
    pub fn key(&self, request: &SynthesisRequest) -> Option<CacheKey> {
        if !self.enabled || request.output_target.is_some() {
            return None;
        }
        Some(CacheKey {
            text: request.text.clone(),
            voice: request.voice.clone(),
            speed_bits: request.speed.map(f32::to_bits),
            pitch_bits: request.pitch.map(f32::to_bits),
            output_format: request.output_format.clone(),
        })
    }

    pub fn get(&self, key: &CacheKey) -> Option<SynthesisResult> {
        let tick = self.clock.fetch_add(1, Ordering::Relaxed);
        let found = match self.inner.get_mut(key) {
            Some(mut entry) if entry.inserted_at.elapsed() < self.ttl => {
                entry.last_used = tick;
                Some(entry.result.clone())
            }
            Some(_) => None,
            None => None,
        };
        if found.is_none() {
            // Drop an expired entry, if that is what we found.
            self.inner
                .remove_if(key, |_, entry| entry.inserted_at.elapsed() >= self.ttl);
            self.misses.fetch_add(1, Ordering::Relaxed);
        } else {
            self.hits.fetch_add(1, Ordering::Relaxed);
        }
        metrics::record_cache(found.is_some());
        found
    }

    pub fn insert(&self, key: CacheKey, result: SynthesisResult) {
        if !self.enabled || !result.success {
            return;
        }
        let tick = self.clock.fetch_add(1, Ordering::Relaxed);
        self.inner.insert(
            key,
            CacheEntry {
                result,
                inserted_at: Instant::now(),
                last_used: tick,
            },
        );
        // Concurrent inserts may overshoot; each one trims back to capacity.
        while self.inner.len() > self.max_entries {
            if !self.evict_lru() {
                break;
            }
        }
    }

    fn evict_lru(&self) -> bool {
        let victim = self
            .inner
            .iter()
            .min_by_key(|e| e.value().last_used)
            .map(|e| e.key().clone());
        match victim {
            Some(key) => self.inner.remove(&key).is_some(),
            None => false,
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.inner.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}
