//! `VolumeExtractor`: tars a remote directory into size-bounded volumes and
//! tunnels each one through the exec channel as base64.

#![forbid(unsafe_code)]

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use chaoscope_core::prelude::ArchiveVolume;
use chaoscope_gateway::{ClusterGateway, ExecFrame, GatewayError};
use chaoscope_sink::SafeSink;
use futures::StreamExt;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("remote work dir {0} does not exist in the container")]
    RemoteWorkDirMissing(String),
    #[error("remote target dir {0} does not exist in the container")]
    RemoteTargetDirMissing(String),
    #[error("local dir {0} does not exist")]
    LocalDirMissing(String),
    #[error("failed to create remote archive: {0}")]
    ArchiveCreationFailed(String),
    #[error("failed to count archive volumes: {0}")]
    VolumeCountFailed(String),
}

pub struct ExtractRequest<'a> {
    pub pod: &'a str,
    pub container: &'a str,
    pub namespace: &'a str,
    pub remote_work_dir: &'a str,
    pub target_dir: &'a str,
    pub prefix: &'a str,
    pub part_size: u64,
    pub worker_count: usize,
    pub local_dir: &'a str,
    pub delete_after_download: bool,
}

pub struct VolumeExtractor<G> {
    gateway: Arc<G>,
    sink: Arc<SafeSink>,
}

impl<G> VolumeExtractor<G>
where
    G: ClusterGateway + 'static,
{
    pub fn new(gateway: Arc<G>, sink: Arc<SafeSink>) -> Self {
        Self { gateway, sink }
    }

    pub async fn extract(&self, req: ExtractRequest<'_>) -> Result<Vec<ArchiveVolume>, ExtractError> {
        if !Path::new(req.local_dir).is_dir() {
            return Err(ExtractError::LocalDirMissing(req.local_dir.to_string()));
        }
        if !self.path_exists(req.pod, req.container, req.namespace, req.remote_work_dir).await {
            return Err(ExtractError::RemoteWorkDirMissing(req.remote_work_dir.to_string()));
        }
        if !self.path_exists(req.pod, req.container, req.namespace, req.target_dir).await {
            return Err(ExtractError::RemoteTargetDirMissing(req.target_dir.to_string()));
        }

        let tar_command = format!(
            "printf 'n {work}/{prefix}%02d.tar\n' {{1..100000}} | \
             tar --exclude={prefix}* --tape-length={size} -cf {work}/{prefix}00.tar -C {target} .",
            work = req.remote_work_dir,
            prefix = req.prefix,
            size = req.part_size,
            target = req.target_dir,
        );
        self.sink.info("creating data archive, please wait....");
        self.exec_capture(req.pod, req.container, req.namespace, &tar_command)
            .await
            .map_err(|e| ExtractError::ArchiveCreationFailed(e.to_string()))?;

        let count_command = format!("ls {}/{}* | wc -l", req.remote_work_dir, req.prefix);
        let count_output = self
            .exec_capture(req.pod, req.container, req.namespace, &count_command)
            .await
            .map_err(|e| ExtractError::VolumeCountFailed(e.to_string()))?;
        let volume_count: usize = count_output
            .trim()
            .parse()
            .map_err(|_| ExtractError::VolumeCountFailed(format!("non-numeric count: {count_output:?}")))?;

        if volume_count == 0 {
            return Ok(Vec::new());
        }

        let worker_count = req.worker_count.max(1).min(volume_count);
        let runtime = tokio::runtime::Handle::current();
        let job = DownloadJob {
            gateway: self.gateway.clone(),
            sink: self.sink.clone(),
            pod: req.pod.to_string(),
            container: req.container.to_string(),
            namespace: req.namespace.to_string(),
            remote_work_dir: req.remote_work_dir.to_string(),
            prefix: req.prefix.to_string(),
            local_dir: req.local_dir.to_string(),
            delete_after_download: req.delete_after_download,
        };

        // The worker pool below blocks on `JoinHandle::join`; running it
        // through `spawn_blocking` keeps that off the async executor thread
        // instead of stalling whichever task happens to poll this future.
        let mut volumes = tokio::task::spawn_blocking(move || {
            run_download_workers(job, volume_count as u32, worker_count, runtime)
        })
        .await
        .expect("download worker pool panicked");
        volumes.sort_by_key(|v| v.sequence);
        Ok(volumes)
    }

    async fn path_exists(&self, pod: &str, container: &str, namespace: &str, path: &str) -> bool {
        let command = format!("test -d '{path}' && echo yes || echo no");
        match self.exec_capture(pod, container, namespace, &command).await {
            Ok(output) => output.trim() == "yes",
            Err(e) => {
                warn!(path, error = %e, "precondition check failed");
                false
            }
        }
    }

    async fn exec_capture(
        &self,
        pod: &str,
        container: &str,
        namespace: &str,
        command: &str,
    ) -> Result<String, GatewayError> {
        exec_capture_static(self.gateway.as_ref(), pod, container, namespace, command).await
    }
}

struct DownloadJob<G> {
    gateway: Arc<G>,
    sink: Arc<SafeSink>,
    pod: String,
    container: String,
    namespace: String,
    remote_work_dir: String,
    prefix: String,
    local_dir: String,
    delete_after_download: bool,
}

/// Drains `volume_count` sequence numbers off a shared queue across
/// `worker_count` plain OS threads, each bridging back into the async
/// gateway via `runtime.block_on`, mirroring `chaoscope-publish`'s upload
/// worker pool.
fn run_download_workers<G: ClusterGateway + 'static>(
    job: DownloadJob<G>,
    volume_count: u32,
    worker_count: usize,
    runtime: tokio::runtime::Handle,
) -> Vec<ArchiveVolume> {
    let (tx, rx) = crossbeam_channel::unbounded::<u32>();
    for i in 0..volume_count {
        tx.send(i).expect("receiver alive");
    }
    drop(tx);

    let results: Arc<std::sync::Mutex<Vec<(u32, String)>>> = Arc::new(std::sync::Mutex::new(Vec::new()));
    let job = Arc::new(job);

    let mut handles = Vec::with_capacity(worker_count);
    for thread_number in 0..worker_count {
        let rx = rx.clone();
        let results = results.clone();
        let job = job.clone();
        let runtime = runtime.clone();

        handles.push(std::thread::spawn(move || {
            while let Ok(sequence) = rx.try_recv() {
                let remote_path = format!("{}/{}{sequence:02}.tar", job.remote_work_dir, job.prefix);
                let local_path = format!("{}/{}{sequence:02}.tar.b64", job.local_dir, job.prefix);

                let outcome = runtime.block_on(download_volume(
                    job.gateway.as_ref(),
                    &job.pod,
                    &job.container,
                    &job.namespace,
                    &remote_path,
                    &local_path,
                ));

                match outcome {
                    Ok(()) => {
                        results.lock().unwrap().push((sequence, local_path));
                        if job.delete_after_download {
                            let rm_command = format!("rm -f {remote_path}");
                            let delete_result = runtime.block_on(exec_capture_static(
                                job.gateway.as_ref(),
                                &job.pod,
                                &job.container,
                                &job.namespace,
                                &rm_command,
                            ));
                            if let Err(e) = delete_result {
                                job.sink.error(&format!(
                                    "[Thread #{thread_number}]: failed to remove remote archive {remote_path}: {e}"
                                ));
                            }
                        }
                    }
                    Err(e) => {
                        job.sink.error(&format!(
                            "[Thread #{thread_number}]: failed to download {remote_path} from pod: {}, container: {}, namespace: {} with exception: {e}. Aborting download.",
                            job.pod, job.container, job.namespace
                        ));
                    }
                }
            }
        }));
    }

    for handle in handles {
        let _ = handle.join();
    }

    results
        .lock()
        .unwrap()
        .drain(..)
        .map(|(seq, local_path)| {
            let remote_path = format!("{}/{}{seq:02}.tar", job.remote_work_dir, job.prefix);
            ArchiveVolume::new(seq, local_path, remote_path)
        })
        .collect()
}

async fn exec_capture_static<G: ClusterGateway>(
    gateway: &G,
    pod: &str,
    container: &str,
    namespace: &str,
    command: &str,
) -> Result<String, GatewayError> {
    let argv = vec!["/bin/sh".to_string(), "-c".to_string(), command.to_string()];
    let mut stream = gateway
        .exec_stream(pod, container, namespace, &argv, true, false)
        .await?;
    let mut out = Vec::new();
    while let Some(frame) = stream.next().await {
        if let ExecFrame::Stdout(bytes) = frame? {
            out.extend_from_slice(&bytes);
        }
    }
    Ok(String::from_utf8_lossy(&out).to_string())
}

/// Downloads one remote tar volume as base64, writing every byte to a
/// newly created local file. Uses `create_new` so a pre-existing file
/// (e.g. from a previous crashed run) is a hard failure, not silently
/// overwritten.
async fn download_volume<G: ClusterGateway>(
    gateway: &G,
    pod: &str,
    container: &str,
    namespace: &str,
    remote_path: &str,
    local_path: &str,
) -> Result<(), String> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(local_path)
        .map_err(|e| e.to_string())?;

    let argv = vec!["base64".to_string(), remote_path.to_string()];
    let mut stream = gateway
        .exec_stream(pod, container, namespace, &argv, true, false)
        .await
        .map_err(|e| e.to_string())?;

    while let Some(frame) = stream.next().await {
        match frame.map_err(|e| e.to_string())? {
            ExecFrame::Stdout(bytes) => file.write_all(&bytes).map_err(|e| e.to_string())?,
            _ => {}
        }
    }
    file.flush().map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chaoscope_gateway::{ListedPod, NodeSummary, PodState, WatchStream};
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex as StdMutex;
    use tokio_stream::wrappers::ReceiverStream;

    /// Replays one scripted exec response per call, in call order. Built to
    /// exercise a multi-step protocol (precondition checks, tar creation,
    /// count, per-volume download) that the gateway's one-shot `FakeGateway`
    /// test double isn't shaped for.
    struct ScriptedGateway {
        responses: StdMutex<VecDeque<Vec<u8>>>,
    }

    impl ScriptedGateway {
        fn new(responses: Vec<&str>) -> Self {
            Self {
                responses: StdMutex::new(responses.into_iter().map(|s| s.as_bytes().to_vec()).collect()),
            }
        }
    }

    #[async_trait]
    impl ClusterGateway for ScriptedGateway {
        async fn list_pods(&self, _: Option<&str>, _: Option<&str>) -> Result<Vec<ListedPod>, GatewayError> {
            Ok(vec![])
        }

        async fn watch_pods(&self, _: &str, _: Option<&str>, _: Option<&str>, _: u64) -> Result<WatchStream, GatewayError> {
            let (_tx, rx) = tokio::sync::mpsc::channel(1);
            Ok(Box::pin(ReceiverStream::new(rx)))
        }

        async fn exec_stream(
            &self,
            _pod: &str,
            _container: &str,
            _namespace: &str,
            _argv: &[String],
            _want_stdout: bool,
            _want_stderr: bool,
        ) -> Result<chaoscope_gateway::ExecStream, GatewayError> {
            let next = self
                .responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_default();
            let (tx, rx) = tokio::sync::mpsc::channel(1);
            let _ = tx.send(Ok(ExecFrame::Stdout(next))).await;
            drop(tx);
            Ok(Box::pin(ReceiverStream::new(rx)))
        }

        async fn read_pod(&self, _: &str, _: &str) -> Result<PodState, GatewayError> {
            Err(GatewayError::NotFound("n/a".into()))
        }

        async fn list_all_kinds(&self, _: &[String]) -> Result<HashMap<String, i64>, GatewayError> {
            Ok(HashMap::new())
        }

        async fn list_nodes(&self) -> Result<Vec<NodeSummary>, GatewayError> {
            Ok(vec![])
        }

        async fn cluster_metadata(&self) -> Result<chaoscope_gateway::ClusterMetadata, GatewayError> {
            Ok(chaoscope_gateway::ClusterMetadata::default())
        }
    }

    #[tokio::test]
    async fn extracts_two_volumes_and_writes_local_files() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = Arc::new(ScriptedGateway::new(vec![
            "yes", // remote_work_dir exists
            "yes", // target_dir exists
            "",    // tar command output (ignored)
            "2",   // volume count
            "aGVsbG8=", // volume 0 base64 payload ("hello")
            "d29ybGQ=", // volume 1 base64 payload ("world")
        ]));
        let sink = Arc::new(SafeSink::passthrough());
        let extractor = VolumeExtractor::new(gateway, sink);

        let volumes = extractor
            .extract(ExtractRequest {
                pod: "p1",
                container: "c1",
                namespace: "ns",
                remote_work_dir: "/var/tmp",
                target_dir: "/prometheus",
                prefix: "prometheus-",
                part_size: 30000,
                worker_count: 1,
                local_dir: dir.path().to_str().unwrap(),
                delete_after_download: false,
            })
            .await
            .unwrap();

        assert_eq!(volumes.len(), 2);
        assert_eq!(volumes[0].sequence, 0);
        assert_eq!(volumes[1].sequence, 1);
        assert!(Path::new(&volumes[0].local_path).exists());
    }

    #[tokio::test]
    async fn missing_local_dir_is_rejected_before_any_exec() {
        let gateway = Arc::new(ScriptedGateway::new(vec![]));
        let sink = Arc::new(SafeSink::passthrough());
        let extractor = VolumeExtractor::new(gateway, sink);

        let result = extractor
            .extract(ExtractRequest {
                pod: "p1",
                container: "c1",
                namespace: "ns",
                remote_work_dir: "/var/tmp",
                target_dir: "/prometheus",
                prefix: "prometheus-",
                part_size: 30000,
                worker_count: 1,
                local_dir: "/nonexistent-dir-xyz",
                delete_after_download: false,
            })
            .await;

        assert!(matches!(result, Err(ExtractError::LocalDirMissing(_))));
    }

    #[tokio::test]
    async fn missing_remote_work_dir_is_rejected() {
        let gateway = Arc::new(ScriptedGateway::new(vec!["no"]));
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(SafeSink::passthrough());
        let extractor = VolumeExtractor::new(gateway, sink);

        let result = extractor
            .extract(ExtractRequest {
                pod: "p1",
                container: "c1",
                namespace: "ns",
                remote_work_dir: "/missing",
                target_dir: "/prometheus",
                prefix: "prometheus-",
                part_size: 30000,
                worker_count: 1,
                local_dir: dir.path().to_str().unwrap(),
                delete_after_download: false,
            })
            .await;

        assert!(matches!(result, Err(ExtractError::RemoteWorkDirMissing(_))));
    }

    #[tokio::test]
    async fn zero_volumes_returns_empty_list() {
        let gateway = Arc::new(ScriptedGateway::new(vec!["yes", "yes", "", "0"]));
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(SafeSink::passthrough());
        let extractor = VolumeExtractor::new(gateway, sink);

        let volumes = extractor
            .extract(ExtractRequest {
                pod: "p1",
                container: "c1",
                namespace: "ns",
                remote_work_dir: "/var/tmp",
                target_dir: "/prometheus",
                prefix: "prometheus-",
                part_size: 30000,
                worker_count: 4,
                local_dir: dir.path().to_str().unwrap(),
                delete_after_download: false,
            })
            .await
            .unwrap();

        assert!(volumes.is_empty());
    }
}
