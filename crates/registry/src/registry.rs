//! Model registry with per-sensor-kind locking.

use parking_lot::{Mutex, RwLock};
use pipeline_core::{Result, SensorKind};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use telemetry::metrics;
use tracing::{debug, info};

use crate::model::{AnomalyModel, ModelConfig, ZScoreModel};

/// Verdict of one scoring call on a handle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Verdict {
    pub is_anomaly: bool,
    pub score: f64,
    /// 1-based position of this call among the handle's successful calls.
    pub sequence: u64,
}

/// Constructs models for sensor kinds.
pub trait ModelFactory: Send + Sync {
    fn create(&self, kind: SensorKind) -> Result<Box<dyn AnomalyModel>>;
}

/// Builds a `ZScoreModel` for every known kind.
#[derive(Debug, Clone, Default)]
pub struct DefaultModelFactory {
    config: ModelConfig,
}

impl DefaultModelFactory {
    pub fn new(config: ModelConfig) -> Self {
        Self { config }
    }
}

impl ModelFactory for DefaultModelFactory {
    fn create(&self, kind: SensorKind) -> Result<Box<dyn AnomalyModel>> {
        Ok(Box::new(ZScoreModel::new(kind, self.config.clone())))
    }
}

struct HandleState {
    model: Box<dyn AnomalyModel>,
    calls: u64,
}

/// Long-lived model for one sensor kind.
///
/// Scoring holds the handle's own mutex, so calls for the same kind run one
/// at a time while other kinds proceed independently.
pub struct ModelHandle {
    kind: SensorKind,
    version: String,
    state: Mutex<HandleState>,
    last_used: Mutex<Instant>,
}

impl ModelHandle {
    fn new(kind: SensorKind, model: Box<dyn AnomalyModel>) -> Self {
        Self {
            kind,
            version: model.version().to_string(),
            state: Mutex::new(HandleState { model, calls: 0 }),
            last_used: Mutex::new(Instant::now()),
        }
    }

    pub fn kind(&self) -> SensorKind {
        self.kind
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Scores a value, updating model state.
    pub fn score(&self, value: f64) -> Result<Verdict> {
        let mut state = self.state.lock();
        *self.last_used.lock() = Instant::now();

        let result = state.model.score(value)?;
        state.calls += 1;

        Ok(Verdict {
            is_anomaly: result.is_anomaly,
            score: result.score,
            sequence: state.calls,
        })
    }

    /// Successful scoring calls so far.
    pub fn calls(&self) -> u64 {
        self.state.lock().calls
    }

    /// Time since the last scoring call (or creation).
    pub fn idle(&self) -> Duration {
        self.last_used.lock().elapsed()
    }
}

impl std::fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelHandle")
            .field("kind", &self.kind)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

/// Per-kind slot. Construction holds only this slot's lock, so a slow cold
/// start for one kind does not stall lookups for another.
#[derive(Default)]
struct ModelSlot {
    handle: Mutex<Option<Arc<ModelHandle>>>,
}

/// Maps sensor kinds to their model handles, creating them lazily.
pub struct ModelRegistry {
    factory: Arc<dyn ModelFactory>,
    slots: RwLock<HashMap<SensorKind, Arc<ModelSlot>>>,
}

impl ModelRegistry {
    pub fn new(config: ModelConfig) -> Self {
        Self::with_factory(Arc::new(DefaultModelFactory::new(config)))
    }

    pub fn with_factory(factory: Arc<dyn ModelFactory>) -> Self {
        Self {
            factory,
            slots: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the handle for `sensor_kind`, constructing it on first use.
    ///
    /// Unknown kinds fail with `Error::UnknownSensorKind`; there is no
    /// fallback model.
    pub fn get_or_create(&self, sensor_kind: &str) -> Result<Arc<ModelHandle>> {
        let kind: SensorKind = sensor_kind.parse()?;
        self.get_or_create_kind(kind)
    }

    pub fn get_or_create_kind(&self, kind: SensorKind) -> Result<Arc<ModelHandle>> {
        let slot = self.slot(kind);
        let mut handle = slot.handle.lock();

        if let Some(ref existing) = *handle {
            return Ok(existing.clone());
        }

        let start = Instant::now();
        let model = self.factory.create(kind)?;
        let created = Arc::new(ModelHandle::new(kind, model));
        *handle = Some(created.clone());

        metrics().models_created.inc();
        info!(
            sensor_kind = %kind,
            model_version = %created.version(),
            cold_start_ms = %start.elapsed().as_millis(),
            "Created anomaly model"
        );

        Ok(created)
    }

    fn slot(&self, kind: SensorKind) -> Arc<ModelSlot> {
        if let Some(slot) = self.slots.read().get(&kind) {
            return slot.clone();
        }
        self.slots.write().entry(kind).or_default().clone()
    }

    /// Kinds with a constructed model.
    pub fn kinds(&self) -> Vec<SensorKind> {
        let mut kinds: Vec<_> = self
            .slots
            .read()
            .iter()
            .filter(|(_, slot)| slot.handle.lock().is_some())
            .map(|(kind, _)| *kind)
            .collect();
        kinds.sort();
        kinds
    }

    pub fn len(&self) -> usize {
        self.kinds().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops models idle for longer than `max_idle` that no worker is holding.
    ///
    /// The next reading of an evicted kind pays the cold start again.
    pub fn evict_idle(&self, max_idle: Duration) -> usize {
        let mut evicted = 0;
        let slots = self.slots.read();

        for (kind, slot) in slots.iter() {
            let Some(mut handle) = slot.handle.try_lock() else {
                continue;
            };
            let idle = match handle.as_ref() {
                Some(h) if Arc::strong_count(h) == 1 && h.idle() > max_idle => h.idle(),
                _ => continue,
            };
            *handle = None;
            evicted += 1;
            debug!(sensor_kind = %kind, idle_secs = idle.as_secs(), "Evicted idle model");
        }

        if evicted > 0 {
            metrics().models_evicted.inc_by(evicted as u64);
            info!(evicted = evicted, "Evicted idle anomaly models");
        }
        evicted
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new(ModelConfig::default())
    }
}
