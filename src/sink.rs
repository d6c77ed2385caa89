//! Resolution events and the sinks that receive them.
//!
//! The pipeline never logs through global state directly: it reports to the
//! [`EventSink`] passed in by the caller. [`TracingSink`] forwards events to
//! `tracing`, [`RecordingSink`] keeps them for inspection.

use serde::Serialize;
use serde_json::Value;

/// Something worth reporting while a configuration is resolved.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ResolutionEvent {
    /// A layer document was loaded.
    LayerLoaded {
        layer: String,
        name: String,
        path: String,
    },
    OverrideApplied {
        key: String,
        value: Value,
        locations: Vec<String>,
    },
    DevicesBound {
        devices: Vec<i64>,
    },
    /// No device list was given; running single-worker on CPU.
    CpuFallback,
    RunNamed {
        save_dir: String,
        name: String,
        version: String,
    },
    LoggingDisabled,
    BatchSizeDistributed {
        per_device: u64,
        devices: u64,
    },
    /// The requested total batch size is not divisible by the device count.
    BatchSizeReduced {
        requested: u64,
        effective: u64,
        per_device: u64,
        devices: u64,
    },
    EpochsScaled {
        scaling: f64,
        max_epochs: i64,
    },
    TrainingSteps {
        steps: u64,
    },
    /// Final tree, emitted once for audit.
    Resolved {
        config: Value,
    },
}

/// Receiver for resolution events.
pub trait EventSink {
    fn emit(&mut self, event: &ResolutionEvent);
}

/// Forwards events to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&mut self, event: &ResolutionEvent) {
        match event {
            ResolutionEvent::LayerLoaded { layer, name, path } => {
                tracing::debug!(%layer, %name, %path, "loaded config layer");
            }
            ResolutionEvent::OverrideApplied {
                key,
                value,
                locations,
            } => {
                tracing::debug!(%key, %value, ?locations, "applied override");
            }
            ResolutionEvent::DevicesBound { devices } => {
                tracing::info!(?devices, "bound devices");
            }
            ResolutionEvent::CpuFallback => {
                tracing::warn!("no devices given, falling back to single-worker cpu");
            }
            ResolutionEvent::RunNamed {
                save_dir,
                name,
                version,
            } => {
                tracing::info!(%save_dir, %name, %version, "run logger configured");
            }
            ResolutionEvent::LoggingDisabled => {
                tracing::info!("training log disabled");
            }
            ResolutionEvent::BatchSizeDistributed {
                per_device,
                devices,
            } => {
                tracing::debug!(per_device, devices, "distributed batch size");
            }
            ResolutionEvent::BatchSizeReduced {
                requested,
                effective,
                ..
            } => {
                tracing::warn!("real batch size is {} (requested {})", effective, requested);
            }
            ResolutionEvent::EpochsScaled {
                scaling,
                max_epochs,
            } => {
                tracing::info!(
                    "Training epoch length is scaled by {}, thus the num of epochs is decreased to {}",
                    scaling,
                    max_epochs
                );
            }
            ResolutionEvent::TrainingSteps { steps } => {
                tracing::info!(steps, "set number of training steps");
            }
            ResolutionEvent::Resolved { config } => {
                tracing::info!("running with config: {}", config);
            }
        }
    }
}

/// Keeps every event in order.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    pub events: Vec<ResolutionEvent>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// True if any recorded event satisfies `pred`.
    pub fn any(&self, pred: impl Fn(&ResolutionEvent) -> bool) -> bool {
        self.events.iter().any(pred)
    }
}

impl EventSink for RecordingSink {
    fn emit(&mut self, event: &ResolutionEvent) {
        self.events.push(event.clone());
    }
}
