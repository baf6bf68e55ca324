/*
 * StoneGate - control-and-monitoring server for a laboratory apparatus
 * Copyright (c) 2026  StoneGate contributors
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

//! The recorder subsystem (§4.7): one worker task per recording stream,
//! sampling the device registry at its own `rate_hz` and appending rows to
//! a shared CSV file.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::errors::{
    SgError, E_MISSING_RECORDING_ID, E_RECORD_NO_VALID_STREAMS, E_RECORD_OPEN_FILE_FAILED,
    E_RECORD_PARAMS_MUST_BE_OBJECT, E_RECORD_STREAMS_REQUIRED,
    E_RECORD_STREAM_MISSING_DEVICE_ID, E_RECORD_STREAM_RATE_INVALID, E_UNKNOWN_RECORDING_ID,
};
use crate::registry::DeviceRegistry;

#[derive(Debug, Clone)]
struct RecordingStream {
    device_id: String,
    metrics: Vec<String>,
    rate_hz: f64,
}

pub struct RecordingSummary {
    pub recording_id: String,
    pub path: PathBuf,
    pub samples_written: u64,
    pub started_ts_ms: i64,
    pub stopped_ts_ms: i64,
}

struct ActiveRecording {
    path: PathBuf,
    started_ts_ms: i64,
    samples_written: Arc<AtomicU64>,
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
    writer: Arc<Mutex<csv::Writer<std::fs::File>>>,
}

pub struct Recorder {
    recordings_dir: PathBuf,
    registry: Arc<DeviceRegistry>,
    sessions: AsyncMutex<HashMap<String, ActiveRecording>>,
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl Recorder {
    pub fn new(recordings_dir: PathBuf, registry: Arc<DeviceRegistry>) -> Self {
        Self {
            recordings_dir,
            registry,
            sessions: AsyncMutex::new(HashMap::new()),
        }
    }

    pub async fn start(&self, params: &Value) -> Result<(String, PathBuf), SgError> {
        let obj = params
            .as_object()
            .ok_or_else(|| SgError::control(E_RECORD_PARAMS_MUST_BE_OBJECT))?;

        let streams_val = obj
            .get("streams")
            .and_then(Value::as_array)
            .filter(|a| !a.is_empty())
            .ok_or_else(|| SgError::control(E_RECORD_STREAMS_REQUIRED))?;

        let mut parsed = Vec::with_capacity(streams_val.len());
        for stream in streams_val {
            let device_id = stream
                .get("device_id")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .ok_or_else(|| SgError::control(E_RECORD_STREAM_MISSING_DEVICE_ID))?;
            let rate_hz = stream.get("rate_hz").and_then(Value::as_f64).unwrap_or(0.0);
            if rate_hz <= 0.0 {
                return Err(SgError::control(E_RECORD_STREAM_RATE_INVALID));
            }
            let metrics = stream
                .get("metrics")
                .and_then(Value::as_array)
                .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
                .unwrap_or_default();
            parsed.push(RecordingStream {
                device_id: device_id.to_string(),
                metrics,
                rate_hz,
            });
        }

        let mut valid_streams = Vec::with_capacity(parsed.len());
        for stream in parsed {
            if self.registry.with_device(&stream.device_id, |_| ()).await.is_some() {
                valid_streams.push(stream);
            } else {
                log::warn!("record.start: skipping unknown device {}", stream.device_id);
            }
        }
        if valid_streams.is_empty() {
            return Err(SgError::control(E_RECORD_NO_VALID_STREAMS));
        }

        let recording_id = format!("{:016x}", rand::random::<u64>());
        let path = self.recordings_dir.join(format!("{recording_id}.csv"));
        crate::cc_fs::create_dir_all(&self.recordings_dir)
            .map_err(|e| SgError::control_msg(format!("{}: {e}", E_RECORD_OPEN_FILE_FAILED.detail)))?;

        let file = std::fs::File::create(&path)
            .map_err(|e| SgError::control_msg(format!("{}: {e}", E_RECORD_OPEN_FILE_FAILED.detail)))?;
        let mut writer = csv::Writer::from_writer(file);
        writer
            .write_record(["ts_ms", "device_id", "metric", "value"])
            .map_err(|e| SgError::control_msg(format!("{}: {e}", E_RECORD_OPEN_FILE_FAILED.detail)))?;
        writer
            .flush()
            .map_err(|e| SgError::control_msg(format!("{}: {e}", E_RECORD_OPEN_FILE_FAILED.detail)))?;
        let writer = Arc::new(Mutex::new(writer));

        let cancel = CancellationToken::new();
        let samples_written = Arc::new(AtomicU64::new(0));
        let started_ts_ms = now_ms();
        let last_error_count = Arc::new(AtomicI64::new(0));

        let mut handles = Vec::with_capacity(valid_streams.len());
        for stream in valid_streams {
            let registry = Arc::clone(&self.registry);
            let writer = Arc::clone(&writer);
            let samples_written = Arc::clone(&samples_written);
            let cancel = cancel.clone();
            let error_count = Arc::clone(&last_error_count);
            handles.push(tokio::spawn(async move {
                run_stream_worker(registry, stream, writer, samples_written, cancel, error_count).await;
            }));
        }

        self.sessions.lock().await.insert(
            recording_id.clone(),
            ActiveRecording {
                path: path.clone(),
                started_ts_ms,
                samples_written,
                cancel,
                handles,
                writer,
            },
        );

        Ok((recording_id, path))
    }

    pub async fn stop(&self, recording_id: &str) -> Result<RecordingSummary, SgError> {
        if recording_id.is_empty() {
            return Err(SgError::control(E_MISSING_RECORDING_ID));
        }
        let session = self
            .sessions
            .lock()
            .await
            .remove(recording_id)
            .ok_or_else(|| SgError::control(E_UNKNOWN_RECORDING_ID))?;

        session.cancel.cancel();
        for handle in session.handles {
            let _ = handle.await;
        }
        if let Ok(mut writer) = session.writer.lock() {
            let _ = writer.flush();
        }

        Ok(RecordingSummary {
            recording_id: recording_id.to_string(),
            path: session.path,
            samples_written: session.samples_written.load(Ordering::Relaxed),
            started_ts_ms: session.started_ts_ms,
            stopped_ts_ms: now_ms(),
        })
    }

    /// Stops every in-flight recording; called during graceful shutdown.
    pub async fn stop_all(&self) {
        let ids: Vec<String> = self.sessions.lock().await.keys().cloned().collect();
        for id in ids {
            let _ = self.stop(&id).await;
        }
    }
}

async fn run_stream_worker(
    registry: Arc<DeviceRegistry>,
    stream: RecordingStream,
    writer: Arc<Mutex<csv::Writer<std::fs::File>>>,
    samples_written: Arc<AtomicU64>,
    cancel: CancellationToken,
    error_count: Arc<AtomicI64>,
) {
    let period = Duration::from_secs_f64(1.0 / stream.rate_hz);
    let mut ticker = tokio::time::interval(period);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let measurement = registry
                    .with_device(&stream.device_id, |d| d.read_measurement())
                    .await;
                let Some(measurement) = measurement else {
                    error_count.fetch_add(1, Ordering::Relaxed);
                    continue;
                };
                let Some(obj) = measurement.as_object() else { continue };
                let ts = now_ms();
                let keys: Vec<String> = if stream.metrics.is_empty() {
                    obj.keys().cloned().collect()
                } else {
                    stream.metrics.clone()
                };
                let mut wrote_any = false;
                if let Ok(mut writer) = writer.lock() {
                    for metric in &keys {
                        let Some(value) = obj.get(metric) else { continue };
                        let rendered = render_csv_value(value);
                        if writer
                            .write_record([ts.to_string(), stream.device_id.clone(), metric.clone(), rendered])
                            .is_ok()
                        {
                            wrote_any = true;
                        }
                    }
                    let _ = writer.flush();
                }
                if wrote_any {
                    samples_written.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }
}

fn render_csv_value(value: &Value) -> String {
    match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::drivers::Thermocouple;
    use crate::device::DeviceKind;

    async fn sample_registry() -> Arc<DeviceRegistry> {
        let registry = DeviceRegistry::new();
        registry
            .register_device(DeviceKind::Thermocouple(Thermocouple::new("s1")))
            .await;
        Arc::new(registry)
    }

    #[tokio::test]
    async fn start_rejects_non_object_params() {
        let recorder = Recorder::new(PathBuf::from("/tmp/stonegate-test"), sample_registry().await);
        let err = recorder.start(&serde_json::json!([1, 2, 3])).await.unwrap_err();
        assert_eq!(err.details["slug"], "D2400_RECORD_PARAMS_MUST_BE_OBJECT");
    }

    #[tokio::test]
    async fn start_rejects_empty_streams() {
        let recorder = Recorder::new(PathBuf::from("/tmp/stonegate-test"), sample_registry().await);
        let err = recorder
            .start(&serde_json::json!({ "streams": [] }))
            .await
            .unwrap_err();
        assert_eq!(err.details["slug"], "D2400_RECORD_STREAMS_REQUIRED");
    }

    #[tokio::test]
    async fn start_rejects_non_positive_rate() {
        let recorder = Recorder::new(PathBuf::from("/tmp/stonegate-test"), sample_registry().await);
        let err = recorder
            .start(&serde_json::json!({ "streams": [{"device_id": "s1", "rate_hz": 0}] }))
            .await
            .unwrap_err();
        assert_eq!(err.details["slug"], "D2400_RECORD_STREAM_RATE_INVALID");
    }

    #[tokio::test]
    async fn start_rejects_all_unknown_devices() {
        let recorder = Recorder::new(PathBuf::from("/tmp/stonegate-test"), sample_registry().await);
        let err = recorder
            .start(&serde_json::json!({ "streams": [{"device_id": "ghost", "rate_hz": 10}] }))
            .await
            .unwrap_err();
        assert_eq!(err.details["slug"], "D2400_RECORD_NO_VALID_STREAMS");
    }

    #[tokio::test]
    async fn stop_unknown_recording_id_errors() {
        let recorder = Recorder::new(PathBuf::from("/tmp/stonegate-test"), sample_registry().await);
        let err = recorder.stop("does-not-exist").await.unwrap_err();
        assert_eq!(err.details["slug"], "D2400_UNKNOWN_RECORDING_ID");
    }

    #[tokio::test]
    async fn record_lifecycle_writes_csv_header_and_rows() {
        let tmp = tempfile::tempdir().unwrap();
        let recorder = Recorder::new(tmp.path().to_path_buf(), sample_registry().await);
        let (recording_id, path) = recorder
            .start(&serde_json::json!({ "streams": [{"device_id": "s1", "rate_hz": 20}] }))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(250)).await;
        let summary = recorder.stop(&recording_id).await.unwrap();
        assert_eq!(summary.path, path);
        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines[0], "ts_ms,device_id,metric,value");
        assert_eq!(lines.len() as u64, summary.samples_written + 1);
    }
}
