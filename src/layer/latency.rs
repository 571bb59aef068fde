//! Per-layer, per-operation latency samples.

use crate::error::Result;
use log::info;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Latency series of one layer, keyed by operation name.
pub struct LatencyRecorder {
    layer: &'static str,
    series: Mutex<BTreeMap<&'static str, Vec<u64>>>,
}

impl LatencyRecorder {
    pub fn new(layer: &'static str) -> Self {
        Self {
            layer,
            series: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn layer(&self) -> &'static str {
        self.layer
    }

    pub fn record(&self, op: &'static str, elapsed: Duration) {
        self.series
            .lock()
            .entry(op)
            .or_default()
            .push(elapsed.as_micros() as u64);
    }

    /// Start timing `op`; the sample is recorded when the timer drops.
    pub fn start(&self, op: &'static str) -> LatencyTimer<'_> {
        LatencyTimer {
            recorder: self,
            op,
            started: Instant::now(),
        }
    }

    /// Samples of `op` in microseconds, oldest first.
    pub fn samples(&self, op: &str) -> Vec<u64> {
        self.series.lock().get(op).cloned().unwrap_or_default()
    }

    /// Write `<dir>/<layer>_<op>.txt` for every series, newest sample first.
    pub fn dump(&self, dir: &Path) -> Result<()> {
        let series = self.series.lock();
        for (op, samples) in series.iter() {
            let path = dir.join(format!("{}_{}.txt", self.layer, op));
            let mut file = fs::File::create(&path)?;
            for micros in samples.iter().rev() {
                writeln!(file, "{}", micros)?;
            }
        }
        Ok(())
    }
}

/// Records elapsed time into its recorder on drop.
pub struct LatencyTimer<'a> {
    recorder: &'a LatencyRecorder,
    op: &'static str,
    started: Instant,
}

impl Drop for LatencyTimer<'_> {
    fn drop(&mut self) {
        self.recorder.record(self.op, self.started.elapsed());
    }
}

/// Every recorder created for one pipeline.
#[derive(Default)]
pub struct LatencyRegistry {
    recorders: Mutex<Vec<Arc<LatencyRecorder>>>,
}

impl LatencyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn recorder(&self, layer: &'static str) -> Arc<LatencyRecorder> {
        let recorder = Arc::new(LatencyRecorder::new(layer));
        self.recorders.lock().push(Arc::clone(&recorder));
        recorder
    }

    pub fn dump_all(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)?;
        let recorders = self.recorders.lock();
        for recorder in recorders.iter() {
            recorder.dump(dir)?;
        }
        info!("latency samples of {} layers written to {}", recorders.len(), dir.display());
        Ok(())
    }
}
