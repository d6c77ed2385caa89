//! Derived-field recomputation
//!
//! Runs once, after every override is applied, in this order:
//! 1. device binding (`trainer.devices` / `trainer.accelerator`)
//! 2. run naming (`trainer.logger`)
//! 3. batch-size distribution (`dataloader.batch_size` becomes per-device)
//! 4. epoch scaling (`trainer.max_epochs` divided by `dataset.epoch_scaling`)
//!
//! Batch distribution needs the device count from step 1.

use chrono::NaiveDateTime;
use serde_json::{Map, Value};

use crate::config::type_name;
use crate::error::{ConfigError, Result};
use crate::sink::{EventSink, ResolutionEvent};

/// Timestamp format for run versions.
pub const RUN_VERSION_FORMAT: &str = "%Y-%m-%d-%H-%M-%S";

/// Inputs to derived-field recomputation that come from outside the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedOptions {
    /// Comma-separated device ids, e.g. `"0,1"`. `None` means CPU.
    pub devices: Option<String>,
    pub no_log: bool,
    pub log_suffix: String,
    /// Parent directory of per-model log directories
    pub log_root: String,
    /// Logical model name, used for the log directory
    pub model_name: String,
    /// Logical dataset name, used for the log stream name
    pub dataset_name: String,
}

impl Default for DerivedOptions {
    fn default() -> Self {
        Self {
            devices: None,
            no_log: false,
            log_suffix: String::new(),
            log_root: "logs".to_string(),
            model_name: "motion_clip".to_string(),
            dataset_name: "motion_clip".to_string(),
        }
    }
}

/// What the four steps produced.
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedFields {
    pub device_count: u64,
    pub run_version: Option<String>,
    pub per_device_batch_size: u64,
    /// New `trainer.max_epochs` when epoch scaling applied
    pub scaled_max_epochs: Option<i64>,
}

/// Run all four steps in order.
pub fn recompute_derived(
    tree: &mut Value,
    options: &DerivedOptions,
    now: NaiveDateTime,
    sink: &mut dyn EventSink,
) -> Result<DerivedFields> {
    let device_count = bind_devices(tree, options.devices.as_deref(), sink)?;
    let run_version = name_run(tree, options, now, sink)?;
    let per_device_batch_size = distribute_batch_size(tree, device_count, sink)?;
    let scaled_max_epochs = scale_epochs(tree, sink)?;

    Ok(DerivedFields {
        device_count,
        run_version,
        per_device_batch_size,
        scaled_max_epochs,
    })
}

/// Parse a comma-separated device list.
pub fn parse_devices(raw: &str) -> Result<Vec<i64>> {
    let invalid = |reason: String| ConfigError::InvalidDevices {
        raw: raw.to_string(),
        reason,
    };

    raw.split(',')
        .map(|rank| {
            let rank = rank.trim();
            let id: i64 = rank
                .parse()
                .map_err(|_| invalid(format!("'{}' is not an integer", rank)))?;
            if id < 0 {
                return Err(invalid(format!("device id {} is negative", id)));
            }
            Ok(id)
        })
        .collect()
}

/// Step 1. Returns the device count.
pub fn bind_devices(tree: &mut Value, devices: Option<&str>, sink: &mut dyn EventSink) -> Result<u64> {
    let trainer = mapping_mut(tree, "trainer")?;

    match devices {
        Some(raw) => {
            let ids = parse_devices(raw)?;
            trainer.insert(
                "devices".to_string(),
                Value::Array(ids.iter().map(|&id| Value::from(id)).collect()),
            );
            sink.emit(&ResolutionEvent::DevicesBound { devices: ids });
        }
        None => {
            trainer.insert("accelerator".to_string(), Value::from("cpu"));
            trainer.insert("devices".to_string(), Value::from(1));
            sink.emit(&ResolutionEvent::CpuFallback);
        }
    }

    device_count(tree)
}

/// Number of devices in `trainer.devices`: list length or a positive count.
pub fn device_count(tree: &Value) -> Result<u64> {
    let path = "trainer.devices";
    match field(tree, path) {
        Some(Value::Array(items)) if !items.is_empty() => Ok(items.len() as u64),
        Some(other) => other
            .as_u64()
            .filter(|&n| n > 0)
            .ok_or_else(|| ConfigError::InvalidField {
                path: path.to_string(),
                reason: format!("expected a non-empty list or a positive count, found {}", other),
            }),
        None => Err(ConfigError::MissingField {
            path: path.to_string(),
        }),
    }
}

/// `<timestamp>` or `<timestamp>_<suffix>`.
pub fn run_version(now: NaiveDateTime, suffix: &str) -> String {
    let timestamp = now.format(RUN_VERSION_FORMAT).to_string();
    if suffix.is_empty() {
        timestamp
    } else {
        format!("{}_{}", timestamp, suffix)
    }
}

/// Step 2. Returns the run version unless logging is disabled.
pub fn name_run(
    tree: &mut Value,
    options: &DerivedOptions,
    now: NaiveDateTime,
    sink: &mut dyn EventSink,
) -> Result<Option<String>> {
    let trainer = mapping_mut(tree, "trainer")?;

    if options.no_log {
        trainer.insert("logger".to_string(), Value::Bool(false));
        sink.emit(&ResolutionEvent::LoggingDisabled);
        return Ok(None);
    }

    let logger = child_mapping(trainer, "logger", "trainer.logger")?;
    let save_dir = format!("{}/{}", options.log_root, options.model_name);
    let version = run_version(now, &options.log_suffix);

    logger.insert("save_dir".to_string(), Value::from(save_dir.clone()));
    logger.insert("name".to_string(), Value::from(options.dataset_name.clone()));
    logger.insert("version".to_string(), Value::from(version.clone()));

    sink.emit(&ResolutionEvent::RunNamed {
        save_dir,
        name: options.dataset_name.clone(),
        version: version.clone(),
    });
    Ok(Some(version))
}

/// Step 3. Floor-divides `dataloader.batch_size` across devices and writes
/// the per-device size back. A remainder is dropped with a warning, even when
/// nothing is left; [`crate::plan::RunPlan`] rejects a zero batch.
pub fn distribute_batch_size(tree: &mut Value, devices: u64, sink: &mut dyn EventSink) -> Result<u64> {
    let path = "dataloader.batch_size";
    let dataloader = mapping_mut(tree, "dataloader")?;

    let total = match dataloader.get("batch_size") {
        Some(v) => v.as_u64().filter(|&n| n > 0).ok_or_else(|| ConfigError::InvalidField {
            path: path.to_string(),
            reason: format!("expected a positive integer, found {}", v),
        })?,
        None => {
            return Err(ConfigError::MissingField {
                path: path.to_string(),
            })
        }
    };

    let per_device = total / devices;
    let effective = per_device * devices;
    if effective != total {
        sink.emit(&ResolutionEvent::BatchSizeReduced {
            requested: total,
            effective,
            per_device,
            devices,
        });
    }

    dataloader.insert("batch_size".to_string(), Value::from(per_device));
    sink.emit(&ResolutionEvent::BatchSizeDistributed { per_device, devices });
    Ok(per_device)
}

/// Step 4. Divides `trainer.max_epochs` by `dataset.epoch_scaling` (floor),
/// so that longer epochs keep the total step count. Returns the new
/// `max_epochs` if scaling applied.
pub fn scale_epochs(tree: &mut Value, sink: &mut dyn EventSink) -> Result<Option<i64>> {
    let scaling_path = "dataset.epoch_scaling";
    let scaling = match field(tree, scaling_path) {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Number(n)) => n.as_f64().unwrap_or(f64::NAN),
        Some(other) => {
            return Err(ConfigError::InvalidField {
                path: scaling_path.to_string(),
                reason: format!("expected a number, found {}", type_name(other)),
            })
        }
    };

    if scaling == 1.0 {
        return Ok(None);
    }
    if scaling.is_nan() || scaling <= 0.0 {
        return Err(ConfigError::InvalidField {
            path: scaling_path.to_string(),
            reason: format!("must be positive, found {}", scaling),
        });
    }

    let epochs_path = "trainer.max_epochs";
    let max_epochs = required_i64(tree, epochs_path)?;
    let scaled = (max_epochs as f64 / scaling).floor() as i64;

    mapping_mut(tree, "trainer")?.insert("max_epochs".to_string(), Value::from(scaled));
    sink.emit(&ResolutionEvent::EpochsScaled {
        scaling,
        max_epochs: scaled,
    });
    Ok(Some(scaled))
}

/// `model.training_kwargs.num_training_steps = (train_batches / devices) * max_epochs`.
///
/// `train_batches` is the length of the un-sharded training loader.
pub fn set_training_steps(tree: &mut Value, train_batches: u64, sink: &mut dyn EventSink) -> Result<u64> {
    let devices = device_count(tree)?;
    let epochs_path = "trainer.max_epochs";
    let max_epochs = u64::try_from(required_i64(tree, epochs_path)?).map_err(|_| {
        ConfigError::InvalidField {
            path: epochs_path.to_string(),
            reason: "must be non-negative to derive a step count".to_string(),
        }
    })?;

    let epoch_length = train_batches / devices;
    let steps = epoch_length
        .checked_mul(max_epochs)
        .ok_or_else(|| ConfigError::InvalidField {
            path: epochs_path.to_string(),
            reason: "training step count overflows".to_string(),
        })?;

    let model = mapping_mut(tree, "model")?;
    let kwargs = child_mapping(model, "training_kwargs", "model.training_kwargs")?;
    kwargs.insert("num_training_steps".to_string(), Value::from(steps));

    sink.emit(&ResolutionEvent::TrainingSteps { steps });
    Ok(steps)
}

fn field<'v>(tree: &'v Value, path: &str) -> Option<&'v Value> {
    path.split('.').try_fold(tree, |node, key| node.get(key))
}

fn required_i64(tree: &Value, path: &str) -> Result<i64> {
    match field(tree, path) {
        Some(v) => v.as_i64().ok_or_else(|| ConfigError::InvalidField {
            path: path.to_string(),
            reason: format!("expected an integer, found {}", v),
        }),
        None => Err(ConfigError::MissingField {
            path: path.to_string(),
        }),
    }
}

/// Existing top-level mapping `key`.
fn mapping_mut<'v>(tree: &'v mut Value, key: &str) -> Result<&'v mut Map<String, Value>> {
    match tree.get_mut(key) {
        Some(Value::Object(map)) => Ok(map),
        Some(other) => Err(ConfigError::InvalidField {
            path: key.to_string(),
            reason: format!("expected a mapping, found {}", type_name(other)),
        }),
        None => Err(ConfigError::MissingField {
            path: key.to_string(),
        }),
    }
}

/// Child mapping `key` of `parent`, created when absent or null.
fn child_mapping<'m>(
    parent: &'m mut Map<String, Value>,
    key: &str,
    path: &str,
) -> Result<&'m mut Map<String, Value>> {
    let slot = parent
        .entry(key.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    if slot.is_null() {
        *slot = Value::Object(Map::new());
    }
    match slot {
        Value::Object(map) => Ok(map),
        other => Err(ConfigError::InvalidField {
            path: path.to_string(),
            reason: format!("expected a mapping, found {}", type_name(other)),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::RecordingSink;
    use chrono::NaiveDate;
    use serde_json::json;

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 14)
            .unwrap()
            .and_hms_opt(15, 9, 26)
            .unwrap()
    }

    fn tree() -> Value {
        json!({
            "trainer": {
                "accelerator": "gpu",
                "devices": [0],
                "max_epochs": 100,
                "logger": {"target": "TensorBoardLogger"}
            },
            "dataloader": {"batch_size": 100, "num_workers": 4},
            "dataset": {"target": "data.Motion", "epoch_scaling": 4},
            "model": {"target": "models.Clip"}
        })
    }

    fn reduced(sink: &RecordingSink) -> bool {
        sink.any(|e| matches!(e, ResolutionEvent::BatchSizeReduced { .. }))
    }

    #[test]
    fn test_parse_devices() {
        assert_eq!(parse_devices("0,1,3").unwrap(), vec![0, 1, 3]);
        assert_eq!(parse_devices(" 2 , 5").unwrap(), vec![2, 5]);
        assert!(matches!(
            parse_devices("0,,1").unwrap_err(),
            ConfigError::InvalidDevices { .. }
        ));
        assert!(parse_devices("gpu0").is_err());
        assert!(parse_devices("-1").is_err());
    }

    #[test]
    fn test_bind_devices_list() {
        let mut t = tree();
        let mut sink = RecordingSink::new();
        let count = bind_devices(&mut t, Some("0,1,2"), &mut sink).unwrap();

        assert_eq!(count, 3);
        assert_eq!(t["trainer"]["devices"], json!([0, 1, 2]));
        assert_eq!(t["trainer"]["accelerator"], "gpu");
    }

    #[test]
    fn test_bind_devices_cpu_fallback() {
        let mut t = tree();
        let mut sink = RecordingSink::new();
        let count = bind_devices(&mut t, None, &mut sink).unwrap();

        assert_eq!(count, 1);
        assert_eq!(t["trainer"]["accelerator"], "cpu");
        assert_eq!(t["trainer"]["devices"], 1);
        assert_eq!(sink.events, vec![ResolutionEvent::CpuFallback]);
    }

    #[test]
    fn test_device_count_forms() {
        assert_eq!(device_count(&json!({"trainer": {"devices": [4, 5]}})).unwrap(), 2);
        assert_eq!(device_count(&json!({"trainer": {"devices": 8}})).unwrap(), 8);
        assert!(device_count(&json!({"trainer": {"devices": []}})).is_err());
        assert!(device_count(&json!({"trainer": {"devices": "auto"}})).is_err());
        assert!(matches!(
            device_count(&json!({"trainer": {}})).unwrap_err(),
            ConfigError::MissingField { .. }
        ));
    }

    #[test]
    fn test_run_naming() {
        let mut t = tree();
        let options = DerivedOptions {
            log_suffix: "ablation".into(),
            model_name: "clip".into(),
            dataset_name: "interhuman".into(),
            ..DerivedOptions::default()
        };
        let version = name_run(&mut t, &options, now(), &mut RecordingSink::new()).unwrap();

        assert_eq!(version.as_deref(), Some("2026-03-14-15-09-26_ablation"));
        let logger = &t["trainer"]["logger"];
        assert_eq!(logger["target"], "TensorBoardLogger");
        assert_eq!(logger["save_dir"], "logs/clip");
        assert_eq!(logger["name"], "interhuman");
        assert_eq!(logger["version"], "2026-03-14-15-09-26_ablation");
    }

    #[test]
    fn test_run_version_without_suffix() {
        assert_eq!(run_version(now(), ""), "2026-03-14-15-09-26");
    }

    #[test]
    fn test_run_naming_creates_logger() {
        let mut t = json!({"trainer": {}});
        name_run(&mut t, &DerivedOptions::default(), now(), &mut RecordingSink::new()).unwrap();
        assert_eq!(t["trainer"]["logger"]["save_dir"], "logs/motion_clip");
    }

    #[test]
    fn test_no_log() {
        let mut t = tree();
        let options = DerivedOptions {
            no_log: true,
            ..DerivedOptions::default()
        };
        let version = name_run(&mut t, &options, now(), &mut RecordingSink::new()).unwrap();

        assert_eq!(version, None);
        assert_eq!(t["trainer"]["logger"], false);
    }

    #[test]
    fn test_batch_size_uneven_warns() {
        let mut t = tree();
        let mut sink = RecordingSink::new();
        let per_device = distribute_batch_size(&mut t, 3, &mut sink).unwrap();

        assert_eq!(per_device, 33);
        assert_eq!(t["dataloader"]["batch_size"], 33);
        assert!(sink.events.contains(&ResolutionEvent::BatchSizeReduced {
            requested: 100,
            effective: 99,
            per_device: 33,
            devices: 3,
        }));
    }

    #[test]
    fn test_batch_size_even_no_warning() {
        let mut t = tree();
        let mut sink = RecordingSink::new();
        let per_device = distribute_batch_size(&mut t, 4, &mut sink).unwrap();

        assert_eq!(per_device, 25);
        assert_eq!(t["dataloader"]["batch_size"], 25);
        assert!(!reduced(&sink));
    }

    #[test]
    fn test_batch_size_smaller_than_devices_warns() {
        let mut t = json!({"dataloader": {"batch_size": 2}});
        let mut sink = RecordingSink::new();
        let per_device = distribute_batch_size(&mut t, 4, &mut sink).unwrap();

        assert_eq!(per_device, 0);
        assert_eq!(t["dataloader"]["batch_size"], 0);
        assert!(sink.events.contains(&ResolutionEvent::BatchSizeReduced {
            requested: 2,
            effective: 0,
            per_device: 0,
            devices: 4,
        }));
    }

    #[test]
    fn test_batch_size_invalid() {
        let mut t = json!({"dataloader": {"batch_size": "big"}});
        assert!(distribute_batch_size(&mut t, 1, &mut RecordingSink::new()).is_err());

        let mut t = json!({"dataloader": {}});
        assert!(matches!(
            distribute_batch_size(&mut t, 1, &mut RecordingSink::new()).unwrap_err(),
            ConfigError::MissingField { .. }
        ));
    }

    #[test]
    fn test_epoch_scaling() {
        let mut t = tree();
        let mut sink = RecordingSink::new();
        let scaled = scale_epochs(&mut t, &mut sink).unwrap();

        assert_eq!(scaled, Some(25));
        assert_eq!(t["trainer"]["max_epochs"], 25);
        assert!(sink.any(|e| matches!(e, ResolutionEvent::EpochsScaled { max_epochs: 25, .. })));
    }

    #[test]
    fn test_epoch_scaling_floors_and_accepts_fractions() {
        let mut t = json!({"trainer": {"max_epochs": 10}, "dataset": {"epoch_scaling": 3}});
        assert_eq!(scale_epochs(&mut t, &mut RecordingSink::new()).unwrap(), Some(3));

        let mut t = json!({"trainer": {"max_epochs": 10}, "dataset": {"epoch_scaling": 0.5}});
        assert_eq!(scale_epochs(&mut t, &mut RecordingSink::new()).unwrap(), Some(20));
    }

    #[test]
    fn test_epoch_scaling_skipped() {
        for dataset in [json!({}), json!({"epoch_scaling": null}), json!({"epoch_scaling": 1})] {
            let mut t = json!({"trainer": {"max_epochs": 10}, "dataset": dataset});
            let mut sink = RecordingSink::new();
            assert_eq!(scale_epochs(&mut t, &mut sink).unwrap(), None);
            assert_eq!(t["trainer"]["max_epochs"], 10);
            assert!(sink.events.is_empty());
        }
    }

    #[test]
    fn test_epoch_scaling_invalid() {
        let mut t = json!({"trainer": {"max_epochs": 10}, "dataset": {"epoch_scaling": 0}});
        assert!(scale_epochs(&mut t, &mut RecordingSink::new()).is_err());

        let mut t = json!({"trainer": {"max_epochs": 10}, "dataset": {"epoch_scaling": "4"}});
        assert!(scale_epochs(&mut t, &mut RecordingSink::new()).is_err());
    }

    #[test]
    fn test_recompute_runs_in_order() {
        let mut t = tree();
        let mut sink = RecordingSink::new();
        let options = DerivedOptions {
            devices: Some("0,1,2".into()),
            ..DerivedOptions::default()
        };
        let derived = recompute_derived(&mut t, &options, now(), &mut sink).unwrap();

        assert_eq!(derived.device_count, 3);
        assert_eq!(derived.per_device_batch_size, 33);
        assert_eq!(derived.scaled_max_epochs, Some(25));
        assert_eq!(derived.run_version.as_deref(), Some("2026-03-14-15-09-26"));
        assert!(reduced(&sink));

        let first = sink
            .events
            .iter()
            .position(|e| matches!(e, ResolutionEvent::DevicesBound { .. }))
            .unwrap();
        let last = sink
            .events
            .iter()
            .position(|e| matches!(e, ResolutionEvent::EpochsScaled { .. }))
            .unwrap();
        assert!(first < last);
    }

    #[test]
    fn test_training_steps() {
        let mut t = json!({
            "trainer": {"devices": [0, 1], "max_epochs": 25},
            "model": {"training_kwargs": {"lr": 0.001}}
        });
        let steps = set_training_steps(&mut t, 101, &mut RecordingSink::new()).unwrap();

        assert_eq!(steps, 50 * 25);
        assert_eq!(t["model"]["training_kwargs"]["num_training_steps"], 1250);
        assert_eq!(t["model"]["training_kwargs"]["lr"], 0.001);
    }

    #[test]
    fn test_training_steps_creates_kwargs() {
        let mut t = json!({"trainer": {"devices": 1, "max_epochs": 2}, "model": {}});
        set_training_steps(&mut t, 10, &mut RecordingSink::new()).unwrap();
        assert_eq!(t["model"]["training_kwargs"]["num_training_steps"], 20);
    }
}
