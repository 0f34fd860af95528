//! Shared test helpers: in-memory transport and media fakes plus an engine
//! wired to them.

use crate::config::Config;
use crate::error::{MediaError, TransportError};
use crate::media::{MediaInfo, MediaJob, MediaProcessor};
use crate::pipeline::Engine;
use crate::progress::ProgressSink;
use crate::store::InMemoryStore;
use crate::transport::ChatTransport;
use crate::types::{Artifact, ChatId, Event, MediaRef, MessageRef, TaskId, UploadKind};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::{Notify, broadcast};
use tokio_util::sync::CancellationToken;

/// How long tests wait for a pipeline to reach a terminal state
pub(crate) const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// One recorded upload
#[derive(Clone, Debug)]
pub(crate) struct UploadRecord {
    pub(crate) chat: ChatId,
    pub(crate) kind: UploadKind,
    pub(crate) caption: String,
    pub(crate) file_name: String,
    pub(crate) bytes: Vec<u8>,
    pub(crate) thumbnail: Option<MediaRef>,
    pub(crate) spoiler: bool,
}

/// Chat transport that records everything and serves fake media
#[derive(Default)]
pub(crate) struct FakeTransport {
    next_message_id: AtomicI64,
    pub(crate) sent: Mutex<Vec<(ChatId, String)>>,
    pub(crate) edits: Mutex<Vec<(MessageRef, String)>>,
    pub(crate) deleted: Mutex<Vec<MessageRef>>,
    pub(crate) uploads: Mutex<Vec<UploadRecord>>,
    pub(crate) downloads: AtomicU32,
    /// Transient failures to return before downloads succeed
    pub(crate) download_failures: AtomicU32,
    /// When set, downloads never finish
    pub(crate) hold_downloads: AtomicBool,
    /// When set, uploads never finish
    pub(crate) hold_uploads: AtomicBool,
    /// When set, status edits fail as if the message was deleted
    pub(crate) fail_edits: AtomicBool,
    pub(crate) download_started: Notify,
    pub(crate) upload_started: Notify,
}

impl FakeTransport {
    pub(crate) fn sent_texts(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|(_, t)| t.clone()).collect()
    }

    pub(crate) fn edit_texts(&self) -> Vec<String> {
        self.edits.lock().unwrap().iter().map(|(_, t)| t.clone()).collect()
    }

    pub(crate) fn uploads(&self) -> Vec<UploadRecord> {
        self.uploads.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatTransport for FakeTransport {
    async fn send_text(&self, chat: ChatId, text: &str) -> Result<MessageRef, TransportError> {
        self.sent.lock().unwrap().push((chat, text.to_string()));
        Ok(MessageRef {
            chat,
            message_id: self.next_message_id.fetch_add(1, Ordering::SeqCst) + 1,
        })
    }

    async fn edit_text(&self, message: &MessageRef, text: &str) -> Result<(), TransportError> {
        if self.fail_edits.load(Ordering::SeqCst) {
            return Err(TransportError::MessageNotFound);
        }
        self.edits
            .lock()
            .unwrap()
            .push((message.clone(), text.to_string()));
        Ok(())
    }

    async fn delete_message(&self, message: &MessageRef) -> Result<(), TransportError> {
        self.deleted.lock().unwrap().push(message.clone());
        Ok(())
    }

    async fn download_media(
        &self,
        media: &MediaRef,
        dest: &Path,
        progress: &dyn ProgressSink,
    ) -> Result<u64, TransportError> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        self.download_started.notify_one();

        let failures = self.download_failures.load(Ordering::SeqCst);
        if failures > 0 {
            self.download_failures.store(failures - 1, Ordering::SeqCst);
            return Err(TransportError::Network("connection reset".into()));
        }
        if self.hold_downloads.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }

        let content = format!("media:{}", media.file_id).into_bytes();
        let total = content.len() as u64;
        progress.report(0, total).await;
        tokio::fs::write(dest, &content)
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;
        progress.report(total, total).await;
        Ok(total)
    }

    async fn upload(
        &self,
        chat: ChatId,
        artifact: &Artifact,
        progress: &dyn ProgressSink,
    ) -> Result<MessageRef, TransportError> {
        let bytes = tokio::fs::read(&artifact.path)
            .await
            .map_err(|e| TransportError::Rejected(e.to_string()))?;
        let total = bytes.len() as u64;
        progress.report(0, total).await;
        self.upload_started.notify_one();
        if self.hold_uploads.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        progress.report(total, total).await;
        self.uploads.lock().unwrap().push(UploadRecord {
            chat,
            kind: artifact.kind,
            caption: artifact.caption.clone(),
            file_name: artifact
                .path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            bytes,
            thumbnail: artifact.thumbnail.clone(),
            spoiler: artifact.spoiler,
        });
        Ok(MessageRef {
            chat,
            message_id: self.next_message_id.fetch_add(1, Ordering::SeqCst) + 1,
        })
    }
}

/// Media tool that writes a small output file instead of running ffmpeg
#[derive(Default)]
pub(crate) struct FakeMedia {
    pub(crate) jobs: Mutex<Vec<MediaJob>>,
    /// When set, jobs write a partial output and wait for cancellation
    pub(crate) hold: AtomicBool,
    /// When set, jobs fail like a non-zero exit
    pub(crate) fail: AtomicBool,
    /// Jobs whose output file name contains one of these fail
    pub(crate) fail_outputs: Mutex<Vec<String>>,
    pub(crate) started: Notify,
    pub(crate) info: MediaInfo,
}

impl FakeMedia {
    pub(crate) fn jobs(&self) -> Vec<MediaJob> {
        self.jobs.lock().unwrap().clone()
    }
}

#[async_trait]
impl MediaProcessor for FakeMedia {
    async fn probe(&self, input: &Path) -> Result<MediaInfo, MediaError> {
        if !input.exists() {
            return Err(MediaError::InputNotFound(input.to_path_buf()));
        }
        Ok(self.info.clone())
    }

    async fn frame_estimate(&self, _input: &Path) -> Result<u64, MediaError> {
        Ok(30)
    }

    async fn execute(
        &self,
        job: &MediaJob,
        total_frames: u64,
        cancel: &CancellationToken,
        progress: &dyn ProgressSink,
    ) -> Result<(), MediaError> {
        self.jobs.lock().unwrap().push(job.clone());

        let output_name = job.output.to_string_lossy().into_owned();
        let fails_here = self
            .fail_outputs
            .lock()
            .unwrap()
            .iter()
            .any(|part| output_name.contains(part.as_str()));
        if self.fail.load(Ordering::SeqCst) || fails_here {
            self.started.notify_one();
            return Err(MediaError::Failed {
                operation: job.operation.name().to_string(),
                code: Some(1),
                stderr: "Invalid data found when processing input".into(),
            });
        }
        if self.hold.load(Ordering::SeqCst) {
            tokio::fs::write(&job.output, b"partial").await?;
            self.started.notify_one();
            cancel.cancelled().await;
            return Err(MediaError::Cancelled);
        }

        self.started.notify_one();
        for frame in [10, 20, 30] {
            progress.report(frame, total_frames).await;
        }
        tokio::fs::write(&job.output, b"rendered output").await?;
        Ok(())
    }

    fn name(&self) -> &str {
        "fake"
    }
}

/// Engine wired to fakes, plus handles to inspect them
pub(crate) struct Harness {
    pub(crate) engine: Engine,
    pub(crate) transport: Arc<FakeTransport>,
    pub(crate) media: Arc<FakeMedia>,
    pub(crate) store: InMemoryStore,
    pub(crate) work_dir: PathBuf,
    _temp_dir: TempDir,
}

/// Create a test engine with default settings
pub(crate) async fn harness() -> Harness {
    harness_with(|_| {}).await
}

/// Create a test engine after adjusting its configuration
pub(crate) async fn harness_with(tweak: impl FnOnce(&mut Config)) -> Harness {
    let temp_dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.storage.work_dir = temp_dir.path().join("work");
    config.retry.initial_delay = Duration::from_millis(1);
    config.retry.max_delay = Duration::from_millis(10);
    config.retry.jitter = false;
    tweak(&mut config);

    let work_dir = config.storage.work_dir.clone();
    let transport = Arc::new(FakeTransport::default());
    let media = Arc::new(FakeMedia {
        info: MediaInfo {
            duration: 90.0,
            width: 1280,
            height: 720,
            codec: "h264".into(),
            fps: 24.0,
            size: 1024,
            ..MediaInfo::default()
        },
        ..FakeMedia::default()
    });
    let store = InMemoryStore::new();

    let engine = Engine::new(
        config,
        transport.clone(),
        Arc::new(store.clone()),
        media.clone(),
    )
    .await
    .unwrap();

    Harness {
        engine,
        transport,
        media,
        store,
        work_dir,
        _temp_dir: temp_dir,
    }
}

/// Media reference with a fixed size
pub(crate) fn media(name: &str, size: u64) -> MediaRef {
    MediaRef {
        file_id: format!("file-{}", name),
        file_name: Some(name.to_string()),
        file_size: size,
    }
}

/// Collect the events of `task_id` up to and including its terminal event
pub(crate) async fn collect_events(
    events: &mut broadcast::Receiver<Event>,
    task_id: &TaskId,
) -> Vec<Event> {
    tokio::time::timeout(TEST_TIMEOUT, async {
        let mut seen = Vec::new();
        loop {
            match events.recv().await {
                Ok(event) => {
                    if event_task_id(&event) != task_id {
                        continue;
                    }
                    let terminal = matches!(
                        event,
                        Event::TaskDone { .. }
                            | Event::TaskCancelled { .. }
                            | Event::TaskFailed { .. }
                    );
                    seen.push(event);
                    if terminal {
                        return seen;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for a terminal event")
}

/// Wait for the terminal event of `task_id`
pub(crate) async fn wait_for_terminal(
    events: &mut broadcast::Receiver<Event>,
    task_id: &TaskId,
) -> Event {
    collect_events(events, task_id)
        .await
        .pop()
        .expect("collected events end with the terminal one")
}

/// Phases announced in a list of events, in order
pub(crate) fn phases(events: &[Event]) -> Vec<crate::types::Phase> {
    events
        .iter()
        .filter_map(|e| match e {
            Event::PhaseChanged { phase, .. } => Some(*phase),
            _ => None,
        })
        .collect()
}

/// Task id carried by an event
pub(crate) fn event_task_id(event: &Event) -> &TaskId {
    match event {
        Event::TaskQueued { task_id, .. }
        | Event::PhaseChanged { task_id, .. }
        | Event::Progress { task_id, .. }
        | Event::TaskDone { task_id, .. }
        | Event::TaskCancelled { task_id, .. }
        | Event::TaskFailed { task_id, .. } => task_id,
    }
}
