//! Three-tier pattern cache
//!
//! Tiers, consulted in order:
//! 1. **Memory**: per-process LRU of indexed `PatternSet`s. Entries remember
//!    the metadata version they were built from and are reloaded when the
//!    database reports a newer one.
//! 2. **Database**: the authoritative pattern tables, shared by all processes.
//! 3. **File**: gzip snapshots, read only when the database is unreachable.
//!
//! A full miss (no analysis metadata) runs a full analysis synchronously and
//! populates the memory and file tiers. Storage failures degrade to staler or
//! emptier sets; only configuration errors reach the caller.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::analysis::PatternAnalyzer;
use crate::classifier::validate_administration;
use crate::config::CacheConfig;
use crate::error::Result;
use crate::lock;
use crate::models::{AnalysisMode, AnalysisResult, CacheTier, PruneCriteria};
use crate::store::PatternStore;

mod memory;
mod pattern_set;
mod snapshot;

use memory::{MemoryEntry, MemoryTier};
pub use pattern_set::PatternSet;
pub use snapshot::{FileSnapshotStore, PatternSnapshot, SnapshotStore};

/// Cache counters
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    /// Administrations currently held in memory
    pub entries: usize,
    pub capacity: usize,
    pub memory_hits: u64,
    pub database_hits: u64,
    pub file_hits: u64,
    /// Full misses that triggered an analysis
    pub misses: u64,
    /// Memory entries found outdated by the coherence check
    pub stale_reloads: u64,
    pub evictions: u64,
    pub invalidations: u64,
    /// Gets answered from the file tier or with an empty set
    pub degraded_serves: u64,
}

impl CacheStats {
    /// Share of gets answered without running an analysis
    pub fn hit_rate(&self) -> f64 {
        let hits = self.memory_hits + self.database_hits + self.file_hits;
        let total = hits + self.misses;
        if total == 0 {
            return 0.0;
        }
        hits as f64 / total as f64
    }
}

/// A pattern set and the tier that produced it
#[derive(Debug, Clone)]
pub struct CacheLookup {
    pub set: Arc<PatternSet>,
    pub tier: CacheTier,
}

struct CacheState {
    memory: MemoryTier,
    stats: CacheStats,
}

enum MemoryProbe {
    /// Entry is trusted without asking the database
    Fresh(Arc<PatternSet>),
    /// Entry must be compared against the database version
    Verify(Arc<PatternSet>),
    /// Degraded entry; retry the database but keep it as a fallback
    Retry(CacheLookup),
    Miss,
}

/// Pattern cache with injected storage backends
pub struct PatternCache {
    store: Arc<dyn PatternStore>,
    snapshots: Arc<dyn SnapshotStore>,
    analyzer: Arc<PatternAnalyzer>,
    config: CacheConfig,
    state: Mutex<CacheState>,
}

impl PatternCache {
    pub fn new(
        store: Arc<dyn PatternStore>,
        snapshots: Arc<dyn SnapshotStore>,
        analyzer: Arc<PatternAnalyzer>,
        config: CacheConfig,
    ) -> Self {
        let memory = MemoryTier::new(config.memory_capacity);
        Self {
            store,
            snapshots,
            analyzer,
            config,
            state: Mutex::new(CacheState {
                memory,
                stats: CacheStats::default(),
            }),
        }
    }

    /// Patterns for an administration
    pub fn get(&self, administration: &str) -> Result<Arc<PatternSet>> {
        Ok(self.lookup(administration)?.set)
    }

    /// Patterns for an administration, with the tier that served them
    pub fn lookup(&self, administration: &str) -> Result<CacheLookup> {
        validate_administration(administration)?;

        let fallback = match self.probe_memory(administration) {
            MemoryProbe::Fresh(set) => {
                self.record(|s| s.memory_hits += 1);
                return Ok(CacheLookup {
                    set,
                    tier: CacheTier::Memory,
                });
            }
            MemoryProbe::Verify(set) => {
                match self.store.load_metadata(administration) {
                    Ok(Some(metadata)) if Some(metadata.updated_at) == set.version() => {
                        self.mark_checked(administration);
                        self.record(|s| s.memory_hits += 1);
                        return Ok(CacheLookup {
                            set,
                            tier: CacheTier::Memory,
                        });
                    }
                    Ok(_) => {
                        debug!(administration, "Memory entry is stale, reloading");
                        self.record(|s| s.stale_reloads += 1);
                        None
                    }
                    Err(e) => {
                        // Cannot verify; a possibly stale entry beats nothing
                        warn!(administration, error = %e, "Metadata check failed, serving memory entry");
                        self.record(|s| s.memory_hits += 1);
                        return Ok(CacheLookup {
                            set,
                            tier: CacheTier::Memory,
                        });
                    }
                }
            }
            MemoryProbe::Retry(previous) => Some(previous),
            MemoryProbe::Miss => None,
        };

        match self.load_from_database(administration) {
            Ok(Some(set)) => {
                self.record(|s| s.database_hits += 1);
                self.remember(administration, set.clone(), CacheTier::Database);
                Ok(CacheLookup {
                    set,
                    tier: CacheTier::Database,
                })
            }
            Ok(None) => {
                self.record(|s| s.misses += 1);
                self.populate(administration)
            }
            Err(e) if e.is_configuration() => Err(e),
            Err(e) => {
                warn!(administration, error = %e, "Pattern database unavailable");
                match fallback {
                    Some(previous) => {
                        self.record(|s| s.degraded_serves += 1);
                        Ok(previous)
                    }
                    None => Ok(self.serve_degraded(administration)),
                }
            }
        }
    }

    /// Run an analysis and repopulate the memory and file tiers
    pub fn refresh(&self, administration: &str, mode: AnalysisMode) -> Result<AnalysisResult> {
        validate_administration(administration)?;
        let result = self.analyzer.analyze(administration, mode)?;
        self.reload(administration);
        Ok(result)
    }

    /// Drop an administration from every tier.
    ///
    /// The stored patterns and metadata are deleted, so the next `get`
    /// re-analyzes from the ledger.
    pub fn invalidate(&self, administration: &str) -> Result<()> {
        validate_administration(administration)?;

        {
            let mut state = lock(&self.state);
            state.memory.remove(administration);
            state.stats.invalidations += 1;
        }

        if let Err(e) = self.snapshots.remove(administration) {
            warn!(administration, error = %e, "Failed to remove pattern snapshot");
        }
        self.store.clear(administration)?;

        info!(administration, "Pattern cache invalidated");
        Ok(())
    }

    /// Delete stored patterns matching the criteria and reload the set
    pub fn prune(&self, administration: &str, criteria: &PruneCriteria) -> Result<usize> {
        validate_administration(administration)?;
        let removed = self.store.prune(administration, criteria)?;
        if removed > 0 {
            self.reload(administration);
        }
        info!(administration, removed, "Pruned patterns");
        Ok(removed)
    }

    /// Load an administration's patterns into memory (e.g. at process start)
    pub fn warm_up(&self, administration: &str) -> Result<usize> {
        let lookup = self.lookup(administration)?;
        info!(
            administration,
            patterns = lookup.set.len(),
            tier = %lookup.tier,
            "Pattern cache warmed up"
        );
        Ok(lookup.set.len())
    }

    pub fn stats(&self) -> CacheStats {
        let state = lock(&self.state);
        CacheStats {
            entries: state.memory.len(),
            capacity: state.memory.capacity(),
            ..state.stats.clone()
        }
    }

    fn probe_memory(&self, administration: &str) -> MemoryProbe {
        let interval = self.config.coherence_check;
        let mut state = lock(&self.state);
        let Some(entry) = state.memory.get(administration) else {
            return MemoryProbe::Miss;
        };

        if entry.tier.is_degraded() {
            return MemoryProbe::Retry(CacheLookup {
                set: entry.set.clone(),
                tier: entry.tier,
            });
        }
        if !interval.is_zero() && entry.checked_at.elapsed() < interval {
            return MemoryProbe::Fresh(entry.set.clone());
        }
        MemoryProbe::Verify(entry.set.clone())
    }

    fn mark_checked(&self, administration: &str) {
        let mut state = lock(&self.state);
        if let Some(entry) = state.memory.get(administration) {
            entry.checked_at = Instant::now();
        }
    }

    /// Read metadata, then patterns. In this order a concurrent write can
    /// only make the entry look older than it is, never newer.
    fn load_from_database(&self, administration: &str) -> Result<Option<Arc<PatternSet>>> {
        let Some(metadata) = self.store.load_metadata(administration)? else {
            return Ok(None);
        };
        let patterns = self.store.load_patterns(administration)?;
        Ok(Some(Arc::new(PatternSet::new(
            administration,
            patterns,
            Some(metadata),
        ))))
    }

    /// Full miss: analyze, then fill the memory and file tiers
    fn populate(&self, administration: &str) -> Result<CacheLookup> {
        info!(administration, "No stored patterns, running full analysis");
        if let Err(e) = self.analyzer.analyze_full(administration) {
            if e.is_configuration() {
                return Err(e);
            }
            warn!(administration, error = %e, "Analysis on cache miss failed");
            return Ok(self.serve_degraded(administration));
        }

        match self.load_from_database(administration) {
            Ok(Some(set)) => {
                self.remember(administration, set.clone(), CacheTier::Database);
                self.save_snapshot(&set);
                Ok(CacheLookup {
                    set,
                    tier: CacheTier::Database,
                })
            }
            Ok(None) => Ok(self.serve_degraded(administration)),
            Err(e) => {
                warn!(administration, error = %e, "Reload after analysis failed");
                Ok(self.serve_degraded(administration))
            }
        }
    }

    /// Repopulate memory and file tiers from the database after a write
    fn reload(&self, administration: &str) {
        match self.load_from_database(administration) {
            Ok(Some(set)) => {
                self.remember(administration, set.clone(), CacheTier::Database);
                self.save_snapshot(&set);
            }
            Ok(None) => {
                lock(&self.state).memory.remove(administration);
            }
            Err(e) => {
                warn!(administration, error = %e, "Reload after write failed");
                lock(&self.state).memory.remove(administration);
            }
        }
    }

    /// Database unreachable: snapshot if there is one, else an empty set
    fn serve_degraded(&self, administration: &str) -> CacheLookup {
        self.record(|s| s.degraded_serves += 1);

        match self.snapshots.load(administration) {
            Ok(Some(snapshot)) => {
                info!(
                    administration,
                    patterns = snapshot.patterns.len(),
                    saved_at = %snapshot.saved_at,
                    "Serving patterns from snapshot"
                );
                let set = Arc::new(PatternSet::new(
                    administration,
                    snapshot.patterns,
                    snapshot.metadata,
                ));
                self.record(|s| s.file_hits += 1);
                self.remember(administration, set.clone(), CacheTier::File);
                CacheLookup {
                    set,
                    tier: CacheTier::File,
                }
            }
            Ok(None) => {
                warn!(administration, "No snapshot available, serving no patterns");
                CacheLookup {
                    set: Arc::new(PatternSet::empty(administration)),
                    tier: CacheTier::Empty,
                }
            }
            Err(e) => {
                warn!(administration, error = %e, "Snapshot unavailable, serving no patterns");
                CacheLookup {
                    set: Arc::new(PatternSet::empty(administration)),
                    tier: CacheTier::Empty,
                }
            }
        }
    }

    fn remember(&self, administration: &str, set: Arc<PatternSet>, tier: CacheTier) {
        let mut state = lock(&self.state);
        if let Some(evicted) = state.memory.insert(administration, MemoryEntry::new(set, tier)) {
            debug!(evicted = %evicted, "Evicted pattern set from memory");
            state.stats.evictions += 1;
        }
    }

    fn save_snapshot(&self, set: &PatternSet) {
        let snapshot = PatternSnapshot {
            administration: set.administration().to_string(),
            saved_at: Utc::now(),
            metadata: set.metadata().cloned(),
            patterns: set.patterns().to_vec(),
        };
        if let Err(e) = self.snapshots.save(&snapshot) {
            warn!(administration = %snapshot.administration, error = %e, "Failed to write pattern snapshot");
        }
    }

    fn record(&self, f: impl FnOnce(&mut CacheStats)) {
        f(&mut lock(&self.state).stats);
    }
}
