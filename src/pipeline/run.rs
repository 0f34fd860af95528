//! Task execution: submission and the phased state machine.

use crate::error::{Error, Result};
use crate::media::MediaJob;
use crate::progress::{ProgressPresenter, ProgressSink, StatusReporter};
use crate::registry::Task;
use crate::retry::with_retry;
use crate::types::{Artifact, ChatId, Event, MediaRef, MessageRef, Phase, Status, TaskId};
use std::future::Future;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

use super::Engine;
use super::job::JobRequest;
use super::messages;

/// What the transcoding phase produced
enum Rendered {
    /// Files to upload, in order
    Files(Vec<PathBuf>),
    /// A text reply (media info)
    Text(String),
}

/// Where a pipeline is in its state machine
struct Progression {
    status: Status,
    phase: Phase,
}

impl Progression {
    fn new() -> Self {
        Self {
            status: Status::Queued,
            phase: Phase::Downloading,
        }
    }

    fn advance(&mut self, phase: Phase) {
        let next = Status::from(phase);
        if !self.status.can_transition_to(next) {
            tracing::warn!(from = ?self.status, to = ?next, "Unexpected pipeline transition");
        }
        self.status = next;
        self.phase = phase;
    }
}

impl Engine {
    /// Accept a request and spawn its pipeline
    ///
    /// The request is validated against the owner's size ceiling and
    /// privilege before a task is registered. Rejections are replied to in the request's chat
    /// and returned as errors; nothing is spawned or written to disk for them.
    pub async fn submit(&self, request: JobRequest) -> Result<TaskId> {
        if !self.is_accepting() {
            self.reply(request.chat, &messages::shutting_down()).await;
            return Err(Error::ShuttingDown);
        }

        let privileged = self.store.is_privileged(request.owner_id).await?;
        let ceiling = self.config.limits.ceiling_for(privileged);
        if let Err(e) = request.validate(ceiling, privileged) {
            let err = Error::from(e);
            tracing::info!(
                owner_id = request.owner_id.0,
                kind = request.kind.name(),
                error = %err,
                "Request rejected"
            );
            self.reply(request.chat, &messages::rejected(&err.user_message()))
                .await;
            return Err(err);
        }

        let task = self.registry.register(request.owner_id).await;
        let queued = messages::queued(
            &request.kind,
            request.media.display_name(),
            &task.task_id,
            &self.config.progress.stop_command,
        );
        let status = match self.transport.send_text(request.chat, &queued).await {
            Ok(status) => status,
            Err(e) => {
                self.registry
                    .deregister(task.owner_id, &task.task_id)
                    .await;
                return Err(e.into());
            }
        };

        tracing::info!(
            owner_id = task.owner_id.0,
            task_id = %task.task_id,
            kind = request.kind.name(),
            file = request.media.display_name(),
            size = request.media.file_size,
            "Task queued"
        );
        self.emit_event(Event::TaskQueued {
            owner_id: task.owner_id,
            task_id: task.task_id.clone(),
        });

        let task_id = task.task_id.clone();
        let engine = self.clone();
        tokio::spawn(async move {
            engine.run_task(task, request, status).await;
        });
        Ok(task_id)
    }

    /// Send a reply, logging failures
    pub(crate) async fn reply(&self, chat: ChatId, text: &str) {
        if let Err(e) = self.transport.send_text(chat, text).await {
            tracing::warn!(chat = chat.0, error = %e, "Failed to send reply");
        }
    }

    /// Drive one task to a terminal state
    ///
    /// Every outcome ends with the work directory removed and the task
    /// deregistered before the final status edit and event.
    async fn run_task(&self, task: Task, request: JobRequest, status: MessageRef) {
        let token = task.cancellation_token();
        let dir = self.task_dir(task.owner_id, &task.task_id);
        let mut progression = Progression::new();

        let result = self
            .drive(&task, &request, &status, &dir, &token, &mut progression)
            .await;

        self.cleanup(&task, &dir).await;
        self.registry
            .deregister(task.owner_id, &task.task_id)
            .await;

        let phase = progression.phase;
        match result {
            Ok(output_bytes) => {
                tracing::info!(
                    owner_id = task.owner_id.0,
                    task_id = %task.task_id,
                    kind = request.kind.name(),
                    output_bytes,
                    elapsed_secs = task.running_seconds(),
                    "Task done"
                );
                if let Err(e) = self.transport.delete_message(&status).await {
                    tracing::debug!(task_id = %task.task_id, error = %e, "Failed to delete status message");
                }
                self.emit_event(Event::TaskDone {
                    owner_id: task.owner_id,
                    task_id: task.task_id.clone(),
                    output_bytes,
                });
            }
            Err(e) if e.is_cancellation() || token.is_cancelled() => {
                tracing::info!(
                    owner_id = task.owner_id.0,
                    task_id = %task.task_id,
                    phase = %phase,
                    "Task cancelled"
                );
                self.edit_status(&status, &messages::cancelled(&task.task_id, phase))
                    .await;
                self.emit_event(Event::TaskCancelled {
                    owner_id: task.owner_id,
                    task_id: task.task_id.clone(),
                    phase,
                });
            }
            Err(e) => {
                tracing::error!(
                    owner_id = task.owner_id.0,
                    task_id = %task.task_id,
                    phase = %phase,
                    error = %e,
                    error_code = e.error_code(),
                    "Task failed"
                );
                let message = e.user_message();
                self.edit_status(&status, &messages::failed(&task.task_id, phase, &message))
                    .await;
                self.emit_event(Event::TaskFailed {
                    owner_id: task.owner_id,
                    task_id: task.task_id.clone(),
                    phase,
                    error: message,
                });
            }
        }
    }

    async fn drive(
        &self,
        task: &Task,
        request: &JobRequest,
        status: &MessageRef,
        dir: &Path,
        token: &CancellationToken,
        progression: &mut Progression,
    ) -> Result<u64> {
        // Queued until a slot frees up
        let _permit = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(Error::Cancelled),
            permit = self.concurrent_limit.clone().acquire_owned() => {
                permit.map_err(|_| Error::ShuttingDown)?
            }
        };

        tokio::fs::create_dir_all(dir).await?;
        let layout = request.layout(dir);

        // Downloading
        self.enter_phase(task, Phase::Downloading, progression).await;
        let targets = std::iter::once(&layout.primary).chain(layout.extras.iter());
        for (media, dest) in request.downloads().into_iter().zip(targets) {
            let reporter = self.reporter(task, status, Phase::Downloading, media.display_name());
            let written = self
                .watchdog(
                    Phase::Downloading,
                    until_cancelled(token, self.download(media, dest, &reporter)),
                )
                .await?;
            tracing::debug!(task_id = %task.task_id, file = %dest.display(), bytes = written, "Download finished");
        }

        // Transcoding
        self.enter_phase(task, Phase::Transcoding, progression).await;
        let encoding = self.store.encoding(&self.config.encoding).await?;
        let watermark = self.store.watermark(task.owner_id).await?;
        let jobs = request.media_jobs(&layout, &encoding, watermark);
        let rendered = if jobs.is_empty() {
            let info = self
                .watchdog(
                    Phase::Transcoding,
                    until_cancelled(token, async {
                        self.media
                            .probe(&layout.primary)
                            .await
                            .map_err(Error::from)
                    }),
                )
                .await?;
            Rendered::Text(info.summary(request.media.display_name()))
        } else {
            tokio::fs::create_dir_all(&layout.output_dir).await?;
            let files = self
                .watchdog(
                    Phase::Transcoding,
                    self.transcode(task, request, status, &layout.primary, jobs, token),
                )
                .await?;
            Rendered::Files(files)
        };

        // Nothing is uploaded once cancellation was requested
        if token.is_cancelled() {
            return Err(Error::Cancelled);
        }

        // Uploading
        self.enter_phase(task, Phase::Uploading, progression).await;
        match rendered {
            Rendered::Files(paths) => {
                let preferred = self.store.upload_kind(task.owner_id).await?;
                let thumbnail = self.store.thumbnail(task.owner_id).await?;
                let spoiler = self.store.spoiler(task.owner_id).await?;
                self.watchdog(Phase::Uploading, async {
                    let mut total_bytes = 0;
                    for path in paths {
                        let output_bytes = match tokio::fs::metadata(&path).await {
                            Ok(meta) if meta.len() > 0 => meta.len(),
                            _ => {
                                return Err(Error::Other(format!(
                                    "{} produced no output",
                                    request.kind.name()
                                )));
                            }
                        };
                        let file_name = path
                            .file_name()
                            .map(|n| n.to_string_lossy().into_owned())
                            .unwrap_or_default();
                        let caption = messages::done_caption(
                            &request.kind,
                            &file_name,
                            output_bytes,
                            &encoding,
                        );
                        let artifact =
                            Artifact::new(path, request.kind.upload_kind(preferred), caption)
                                .with_presentation(thumbnail.clone(), spoiler);
                        let reporter = self.reporter(task, status, Phase::Uploading, &file_name);
                        until_cancelled(token, self.upload(request.chat, &artifact, &reporter))
                            .await?;
                        total_bytes += output_bytes;
                    }
                    Ok::<_, Error>(total_bytes)
                })
                .await
            }
            Rendered::Text(text) => {
                self.watchdog(
                    Phase::Uploading,
                    until_cancelled(token, self.send_with_retry(request.chat, &text)),
                )
                .await?;
                Ok(0)
            }
        }
    }

    /// Run the media jobs in order and return the files they rendered
    ///
    /// With several renditions a failed one is logged and skipped; the phase
    /// only fails when none succeeds. Cancellation always ends the phase.
    async fn transcode(
        &self,
        task: &Task,
        request: &JobRequest,
        status: &MessageRef,
        input: &Path,
        jobs: Vec<MediaJob>,
        token: &CancellationToken,
    ) -> Result<Vec<PathBuf>> {
        let total_frames = if jobs.iter().any(|job| job.operation.reports_frames()) {
            until_cancelled(token, async { Ok(self.frame_estimate(task, input).await) }).await?
        } else {
            0
        };

        let count = jobs.len();
        let mut files = Vec::with_capacity(count);
        let mut last_error = None;
        for (index, job) in jobs.into_iter().enumerate() {
            let label = if count > 1 {
                format!("{} [{}/{}]", request.media.display_name(), index + 1, count)
            } else {
                request.media.display_name().to_string()
            };
            let frames = if job.operation.reports_frames() {
                total_frames
            } else {
                0
            };
            let reporter = self.reporter(task, status, Phase::Transcoding, &label);
            match self.media.execute(&job, frames, token, &reporter).await {
                Ok(()) => files.push(job.output),
                Err(e) => {
                    let e = Error::from(e);
                    if count == 1 || e.is_cancellation() || token.is_cancelled() {
                        return Err(e);
                    }
                    tracing::warn!(
                        task_id = %task.task_id,
                        output = %job.output.display(),
                        error = %e,
                        "Rendition failed, skipping"
                    );
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if files.is_empty() => Err(e),
            _ => Ok(files),
        }
    }

    async fn enter_phase(&self, task: &Task, phase: Phase, progression: &mut Progression) {
        progression.advance(phase);
        self.registry
            .set_phase(task.owner_id, &task.task_id, phase)
            .await;
        tracing::info!(
            owner_id = task.owner_id.0,
            task_id = %task.task_id,
            phase = %phase,
            "Task entered phase"
        );
        self.emit_event(Event::PhaseChanged {
            owner_id: task.owner_id,
            task_id: task.task_id.clone(),
            phase,
        });
    }

    fn reporter(
        &self,
        task: &Task,
        status: &MessageRef,
        phase: Phase,
        file_name: &str,
    ) -> StatusReporter {
        let progress = &self.config.progress;
        let presenter = ProgressPresenter::new(phase, progress.interval_for(phase))
            .with_bar_width(progress.bar_width)
            .with_file_name(file_name)
            .with_stop_hint(&progress.stop_command, &task.task_id);
        StatusReporter::new(
            self.transport.clone(),
            status.clone(),
            self.registry.clone(),
            task.owner_id,
            task.task_id.clone(),
            presenter,
            self.event_tx.clone(),
        )
    }

    /// Fail with [`Error::PhaseTimeout`] once the phase's maximum runtime passes
    async fn watchdog<T, F>(&self, phase: Phase, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let limit = self.config.watchdog.limit_for(phase);
        match tokio::time::timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => Err(Error::PhaseTimeout { phase, limit }),
        }
    }

    async fn download(
        &self,
        media: &MediaRef,
        dest: &Path,
        progress: &dyn ProgressSink,
    ) -> Result<u64> {
        let transport = &self.transport;
        with_retry(&self.config.retry, move || async move {
            transport
                .download_media(media, dest, progress)
                .await
                .map_err(Error::from)
        })
        .await
    }

    async fn upload(
        &self,
        chat: ChatId,
        artifact: &Artifact,
        progress: &dyn ProgressSink,
    ) -> Result<MessageRef> {
        let transport = &self.transport;
        with_retry(&self.config.retry, move || async move {
            transport
                .upload(chat, artifact, progress)
                .await
                .map_err(Error::from)
        })
        .await
    }

    async fn send_with_retry(&self, chat: ChatId, text: &str) -> Result<MessageRef> {
        let transport = &self.transport;
        with_retry(&self.config.retry, move || async move {
            transport.send_text(chat, text).await.map_err(Error::from)
        })
        .await
    }

    async fn frame_estimate(&self, task: &Task, input: &Path) -> u64 {
        match self.media.frame_estimate(input).await {
            Ok(frames) => frames,
            Err(e) => {
                tracing::debug!(task_id = %task.task_id, error = %e, "Frame estimate unavailable");
                0
            }
        }
    }

    async fn edit_status(&self, status: &MessageRef, text: &str) {
        if let Err(e) = self.transport.edit_text(status, text).await {
            tracing::debug!(error = %e, "Failed to edit status message");
        }
    }

    /// Remove the task's work directory; failures are logged, not propagated
    async fn cleanup(&self, task: &Task, dir: &Path) {
        match tokio::fs::remove_dir_all(dir).await {
            Ok(()) => {
                tracing::debug!(task_id = %task.task_id, dir = %dir.display(), "Work directory removed");
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(
                    owner_id = task.owner_id.0,
                    task_id = %task.task_id,
                    dir = %dir.display(),
                    error = %e,
                    "Failed to remove work directory"
                );
            }
        }
    }
}

/// Resolve to [`Error::Cancelled`] as soon as `token` fires
async fn until_cancelled<T, F>(token: &CancellationToken, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(Error::Cancelled),
        result = fut => result,
    }
}
