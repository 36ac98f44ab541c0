//! Scripted sampler shared by sensor and monitor tests.

use crate::sensor::types::{EchoEdge, RangeSampler, Reading, SensorError, SensorKind};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Replays a fixed script of readings; `None` is a timed-out sample.
/// The last entry repeats once the script is exhausted.
pub(crate) struct ScriptedSampler {
    script: Vec<Option<f64>>,
    calls: Arc<AtomicUsize>,
    released: Arc<AtomicBool>,
}

impl ScriptedSampler {
    pub(crate) fn new(script: impl IntoIterator<Item = Option<f64>>) -> Self {
        Self {
            script: script.into_iter().collect(),
            calls: Arc::new(AtomicUsize::new(0)),
            released: Arc::new(AtomicBool::new(false)),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn call_counter(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }

    pub(crate) fn released_marker(&self) -> Arc<AtomicBool> {
        self.released.clone()
    }
}

impl RangeSampler for ScriptedSampler {
    fn sample(&mut self) -> Result<Option<Reading>, SensorError> {
        let index = self.calls.fetch_add(1, Ordering::SeqCst);
        let step = self
            .script
            .get(index)
            .or_else(|| self.script.last())
            .copied()
            .flatten();
        match step {
            Some(value) => Ok(Some(Reading::new(value))),
            None => Err(SensorError::Timeout {
                edge: EchoEdge::Rise,
            }),
        }
    }

    fn release(&mut self) {
        self.released.store(true, Ordering::SeqCst);
    }

    fn kind(&self) -> SensorKind {
        SensorKind::Rangefinder
    }
}
