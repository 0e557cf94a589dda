//! `ArtifactPublisher`: decodes the extractor's `.b64` volumes and drives
//! them through a retrying upload worker pool.

#![forbid(unsafe_code)]

use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chaoscope_broker::BrokerClient;
use chaoscope_core::prelude::ArchiveVolume;
use chaoscope_sink::SafeSink;
use thiserror::Error;
use tracing::warn;

const RETRY_BACKOFF: Duration = Duration::from_secs(5);
const QUEUE_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("failed to decode base64 volume {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: base64::DecodeError,
    },
    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("volume {sequence} exhausted all {max_retry} retries: {last_error}")]
    RetriesExhausted {
        sequence: u32,
        max_retry: u32,
        last_error: String,
    },
}

pub struct PublishOptions {
    pub broker: BrokerClient,
    pub worker_count: usize,
    /// 0 means unbounded retries.
    pub max_retry: u32,
    pub remote_prefix: String,
    pub remote_suffix: String,
    pub telemetry_group: String,
    pub request_id: String,
}

/// Decodes every `.b64` volume to a sibling file (deleting the `.b64`),
/// then uploads each through a fixed worker pool with a 5-second fixed
/// backoff between retries. Returns the list of uploaded local paths
/// that were pending immediately before their successful upload.
pub fn publish_volumes(
    volumes: &[ArchiveVolume],
    opts: &PublishOptions,
    sink: Arc<SafeSink>,
    runtime: tokio::runtime::Handle,
) -> Result<Vec<String>, PublishError> {
    let mut decoded = Vec::with_capacity(volumes.len());
    for volume in volumes {
        let decoded_path = decode_b64_volume(&volume.local_path)?;
        decoded.push((volume.sequence, decoded_path));
    }

    let (tx, rx) = crossbeam_channel::unbounded::<(u32, String, u32)>();
    let pending = Arc::new(AtomicUsize::new(decoded.len()));
    for (seq, path) in &decoded {
        tx.send((*seq, path.clone(), 0)).expect("queue receiver alive");
    }

    let uploaded: Arc<std::sync::Mutex<Vec<String>>> = Arc::new(std::sync::Mutex::new(Vec::new()));
    let worker_count = opts.worker_count.max(1).min(decoded.len().max(1));
    let first_error: Arc<std::sync::Mutex<Option<PublishError>>> = Arc::new(std::sync::Mutex::new(None));

    let mut handles = Vec::with_capacity(worker_count);
    for thread_number in 0..worker_count {
        let rx = rx.clone();
        let tx = tx.clone();
        let pending = pending.clone();
        let uploaded = uploaded.clone();
        let first_error = first_error.clone();
        let sink = sink.clone();
        let runtime = runtime.clone();
        let broker = opts.broker.clone();
        let remote_prefix = opts.remote_prefix.clone();
        let remote_suffix = opts.remote_suffix.clone();
        let telemetry_group = opts.telemetry_group.clone();
        let request_id = opts.request_id.clone();
        let max_retry = opts.max_retry;

        handles.push(std::thread::spawn(move || loop {
            if pending.load(Ordering::SeqCst) == 0 {
                break;
            }
            let item = match rx.recv_timeout(QUEUE_POLL) {
                Ok(item) => item,
                Err(_) => continue,
            };
            let (sequence, local_path, attempt) = item;
            let remote_filename = format!("{remote_prefix}{sequence:02}{remote_suffix}");
            let bucket_folder = format!("{telemetry_group}/{request_id}");

            let outcome = runtime.block_on(upload_one(&broker, &bucket_folder, &remote_filename, &local_path));
            match outcome {
                Ok(()) => {
                    let _ = fs::remove_file(&local_path);
                    uploaded.lock().unwrap().push(local_path.clone());
                    sink.info(&format!("[Thread #{thread_number}] {local_path} uploaded"));
                    pending.fetch_sub(1, Ordering::SeqCst);
                }
                Err(e) => {
                    if max_retry == 0 || attempt < max_retry {
                        sink.warning(&format!(
                            "[Thread #{thread_number}] {local_path} retry number {attempt}"
                        ));
                        std::thread::sleep(RETRY_BACKOFF);
                        let _ = tx.send((sequence, local_path, attempt + 1));
                    } else {
                        sink.error(&format!(
                            "[Thread #{thread_number}] max retry number exceeded, failed to upload {local_path}: {e}"
                        ));
                        let mut slot = first_error.lock().unwrap();
                        if slot.is_none() {
                            *slot = Some(PublishError::RetriesExhausted {
                                sequence,
                                max_retry,
                                last_error: e,
                            });
                        }
                        pending.fetch_sub(1, Ordering::SeqCst);
                    }
                }
            }
        }));
    }
    drop(tx);
    drop(rx);

    for handle in handles {
        let _ = handle.join();
    }

    if let Some(err) = first_error.lock().unwrap().take() {
        return Err(err);
    }

    Ok(Arc::try_unwrap(uploaded).unwrap().into_inner().unwrap())
}

async fn upload_one(
    broker: &BrokerClient,
    bucket_folder: &str,
    remote_filename: &str,
    local_path: &str,
) -> Result<(), String> {
    let url = broker
        .presigned_upload_url(bucket_folder, remote_filename)
        .await
        .map_err(|e| e.to_string())?;
    let body = fs::read(local_path).map_err(|e| e.to_string())?;
    broker.put_file(&url, body).await.map_err(|e| e.to_string())
}

fn decode_b64_volume(b64_path: &str) -> Result<String, PublishError> {
    let decoded_path = b64_path
        .strip_suffix(".b64")
        .map(|s| s.to_string())
        .unwrap_or_else(|| format!("{b64_path}.decoded"));

    let encoded = fs::read(b64_path).map_err(|source| PublishError::Io {
        path: b64_path.to_string(),
        source,
    })?;
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|source| PublishError::Decode {
            path: b64_path.to_string(),
            source,
        })?;
    fs::write(&decoded_path, bytes).map_err(|source| PublishError::Io {
        path: decoded_path.clone(),
        source,
    })?;
    fs::remove_file(b64_path).map_err(|source| PublishError::Io {
        path: b64_path.to_string(),
        source,
    })?;
    Ok(decoded_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use wiremock::matchers::{method, path as wpath};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn write_b64(dir: &Path, name: &str, payload: &[u8]) -> String {
        let p = dir.join(name);
        fs::write(&p, STANDARD.encode(payload)).unwrap();
        p.to_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn publishes_all_volumes_and_deletes_local_files() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(wpath("/presigned-url"))
            .respond_with(ResponseTemplate::new(200).set_body_string(format!("{}/put", server.uri())))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(wpath("/put"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let volumes = vec![
            ArchiveVolume::new(0, write_b64(dir.path(), "prometheus-00.tar.b64", b"hello"), String::new()),
            ArchiveVolume::new(1, write_b64(dir.path(), "prometheus-01.tar.b64", b"world"), String::new()),
        ];

        let opts = PublishOptions {
            broker: BrokerClient::new(server.uri(), "user", "pass"),
            worker_count: 2,
            max_retry: 1,
            remote_prefix: "prometheus-".to_string(),
            remote_suffix: ".tar".to_string(),
            telemetry_group: "default".to_string(),
            request_id: "req-1".to_string(),
        };

        let handle = tokio::runtime::Handle::current();
        let sink = Arc::new(SafeSink::passthrough());
        let uploaded =
            tokio::task::spawn_blocking(move || publish_volumes(&volumes, &opts, sink, handle))
                .await
                .unwrap()
                .unwrap();

        assert_eq!(uploaded.len(), 2);
        assert!(!dir.path().join("prometheus-00.tar.b64").exists());
        assert!(!dir.path().join("prometheus-00.tar").exists());
    }

    #[tokio::test]
    async fn exhausted_retries_surface_as_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(wpath("/presigned-url"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let volumes = vec![ArchiveVolume::new(
            0,
            write_b64(dir.path(), "logs-00.tar.gz.b64", b"payload"),
            String::new(),
        )];

        let opts = PublishOptions {
            broker: BrokerClient::new(server.uri(), "user", "pass"),
            worker_count: 1,
            max_retry: 1,
            remote_prefix: "logs-".to_string(),
            remote_suffix: ".tar.gz".to_string(),
            telemetry_group: "default".to_string(),
            request_id: "req-2".to_string(),
        };

        let handle = tokio::runtime::Handle::current();
        let sink = Arc::new(SafeSink::passthrough());
        let result =
            tokio::task::spawn_blocking(move || publish_volumes(&volumes, &opts, sink, handle))
                .await
                .unwrap();
        assert!(matches!(result, Err(PublishError::RetriesExhausted { .. })));
    }

    #[test]
    fn decode_strips_b64_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let b64_path = write_b64(dir.path(), "vol-00.tar.b64", b"abcdef");
        let decoded_path = decode_b64_volume(&b64_path).unwrap();
        assert!(decoded_path.ends_with("vol-00.tar"));
        assert!(!Path::new(&b64_path).exists());
        assert_eq!(fs::read(decoded_path).unwrap(), b"abcdef");
    }
}
