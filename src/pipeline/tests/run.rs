use super::*;
use crate::error::{Error, ValidationError};
use crate::media::Operation;
use crate::store::{
    CODEC_SETTING, CRF_SETTING, PRESET_SETTING, SPOILER_KEY, THUMBNAIL_KEY, UPLOAD_MODE_KEY,
    WATERMARK_KEY,
};
use crate::types::UploadKind;
use std::time::Duration;

fn encode_request(name: &str, size: u64) -> JobRequest {
    JobRequest::new(OWNER, CHAT, media(name, size), JobKind::encode("720p").unwrap())
}

fn task_dir(h: &Harness, task_id: &crate::types::TaskId) -> std::path::PathBuf {
    h.work_dir.join(OWNER.to_string()).join(task_id.as_str())
}

#[tokio::test]
async fn test_encode_walks_every_phase_and_cleans_up() {
    let h = harness().await;
    let mut events = h.engine.subscribe();

    let task_id = h
        .engine
        .submit(encode_request("clip.mp4", 1_000))
        .await
        .unwrap();
    let seen = collect_events(&mut events, &task_id).await;

    assert!(matches!(seen.first(), Some(Event::TaskQueued { .. })));
    assert_eq!(
        phases(&seen),
        vec![Phase::Downloading, Phase::Transcoding, Phase::Uploading]
    );
    assert!(seen.iter().any(|e| matches!(e, Event::Progress { .. })));
    assert!(matches!(
        seen.last(),
        Some(Event::TaskDone {
            output_bytes: 15,
            ..
        })
    ));

    let uploads = h.transport.uploads();
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].chat, CHAT);
    assert_eq!(uploads[0].file_name, "clip_720p.mp4");
    assert_eq!(uploads[0].kind, UploadKind::Video);
    assert_eq!(uploads[0].bytes, b"rendered output");
    assert!(uploads[0].caption.contains("Encode to 720p"));

    let jobs = h.media.jobs();
    assert_eq!(jobs.len(), 1);
    match &jobs[0].operation {
        Operation::Encode(params) => {
            assert_eq!(params.height, Some(720));
            assert_eq!(params.watermark, None);
        }
        other => panic!("expected encode, got {other:?}"),
    }

    // Status message: queued text, one render per phase, then deleted
    let sent = h.transport.sent_texts();
    assert!(sent[0].contains("Queued"));
    assert!(sent[0].contains(&format!("/stop{}", task_id)));
    let edits = h.transport.edit_texts();
    for heading in ["**1. Downloading**", "**2. Encoding**", "**3. Uploading**"] {
        assert!(
            edits.iter().any(|e| e.contains(heading)),
            "no render for {heading}"
        );
    }
    assert_eq!(h.transport.deleted.lock().unwrap().len(), 1);

    assert!(h.engine.registry().is_empty().await);
    assert!(!task_dir(&h, &task_id).exists());
}

#[tokio::test]
async fn test_oversize_file_is_rejected_before_registering() {
    let h = harness_with(|c| {
        c.limits.max_file_size = 1_000;
        c.limits.max_file_size_privileged = 5_000;
    })
    .await;

    let err = h
        .engine
        .submit(encode_request("big.mp4", 2_000))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Validation(ValidationError::FileTooLarge {
            size: 2_000,
            limit: 1_000
        })
    ));
    assert!(h.engine.registry().is_empty().await);
    assert_eq!(h.transport.downloads.load(Ordering::SeqCst), 0);
    assert!(h.media.jobs().is_empty());
    assert!(h.transport.sent_texts()[0].starts_with("⚠️"));
    assert!(!h.work_dir.join(OWNER.to_string()).exists());

    // The privileged ceiling admits the same file
    h.store.set_privileged(OWNER, true).await;
    let mut events = h.engine.subscribe();
    let task_id = h
        .engine
        .submit(encode_request("big.mp4", 2_000))
        .await
        .unwrap();
    assert!(matches!(
        wait_for_terminal(&mut events, &task_id).await,
        Event::TaskDone { .. }
    ));
}

#[tokio::test]
async fn test_hand_built_invalid_trim_is_rejected() {
    let h = harness().await;
    let request = JobRequest::new(
        OWNER,
        CHAT,
        media("clip.mp4", 10),
        JobKind::Trim { start: 30, end: 10 },
    );

    let err = h.engine.submit(request).await.unwrap_err();
    assert_eq!(err.error_code(), "invalid_time_range");
    assert!(h.engine.registry().is_empty().await);
}

#[tokio::test]
async fn test_cancel_during_transcoding_uploads_nothing() {
    let h = harness().await;
    h.media.hold.store(true, Ordering::SeqCst);
    let mut events = h.engine.subscribe();

    let task_id = h
        .engine
        .submit(encode_request("clip.mp4", 1_000))
        .await
        .unwrap();
    tokio::time::timeout(TEST_TIMEOUT, h.media.started.notified())
        .await
        .unwrap();

    let dir = task_dir(&h, &task_id);
    assert!(
        dir.join("out").join("clip_720p.mp4").exists(),
        "partial output written"
    );
    assert!(h.engine.cancel_task(OWNER, &task_id).await);

    let seen = collect_events(&mut events, &task_id).await;
    assert!(matches!(
        seen.last(),
        Some(Event::TaskCancelled {
            phase: Phase::Transcoding,
            ..
        })
    ));
    assert!(!phases(&seen).contains(&Phase::Uploading));
    assert!(h.transport.uploads().is_empty());
    assert!(!dir.exists(), "work directory must be removed");
    assert!(h.engine.registry().is_empty().await);
    assert!(
        h.transport
            .edit_texts()
            .last()
            .unwrap()
            .contains("cancelled during transcoding")
    );
}

#[tokio::test]
async fn test_cancel_during_upload_leaves_nothing_behind() {
    let h = harness().await;
    h.transport.hold_uploads.store(true, Ordering::SeqCst);
    let mut events = h.engine.subscribe();

    let task_id = h
        .engine
        .submit(encode_request("clip.mp4", 1_000))
        .await
        .unwrap();
    tokio::time::timeout(TEST_TIMEOUT, h.transport.upload_started.notified())
        .await
        .unwrap();
    let dir = task_dir(&h, &task_id);
    assert!(dir.exists());
    assert!(h.engine.cancel_task(OWNER, &task_id).await);

    let seen = collect_events(&mut events, &task_id).await;
    assert!(matches!(
        seen.last(),
        Some(Event::TaskCancelled {
            phase: Phase::Uploading,
            ..
        })
    ));
    assert!(h.transport.uploads().is_empty());
    assert!(!dir.exists(), "work directory must be removed");
    assert!(h.engine.registry().is_empty().await);
    assert!(
        h.transport
            .edit_texts()
            .last()
            .unwrap()
            .contains("cancelled during uploading")
    );
}

#[tokio::test]
async fn test_cancel_during_download_never_runs_media_tool() {
    let h = harness().await;
    h.transport.hold_downloads.store(true, Ordering::SeqCst);
    let mut events = h.engine.subscribe();

    let task_id = h
        .engine
        .submit(encode_request("clip.mp4", 1_000))
        .await
        .unwrap();
    tokio::time::timeout(TEST_TIMEOUT, h.transport.download_started.notified())
        .await
        .unwrap();
    assert!(h.engine.cancel_task(OWNER, &task_id).await);

    assert!(matches!(
        wait_for_terminal(&mut events, &task_id).await,
        Event::TaskCancelled {
            phase: Phase::Downloading,
            ..
        }
    ));
    assert!(h.media.jobs().is_empty());
    assert!(h.transport.uploads().is_empty());
    assert!(!task_dir(&h, &task_id).exists());
}

#[tokio::test]
async fn test_queued_task_waits_for_a_slot_and_can_be_cancelled() {
    let h = harness_with(|c| c.limits.max_concurrent_tasks = 1).await;
    h.media.hold.store(true, Ordering::SeqCst);
    let mut events_first = h.engine.subscribe();
    let mut events_second = h.engine.subscribe();

    let first = h
        .engine
        .submit(encode_request("a.mp4", 10))
        .await
        .unwrap();
    tokio::time::timeout(TEST_TIMEOUT, h.media.started.notified())
        .await
        .unwrap();
    let second = h
        .engine
        .submit(encode_request("b.mp4", 10))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.transport.downloads.load(Ordering::SeqCst), 1);
    assert_eq!(h.engine.registry().len().await, 2);

    assert!(h.engine.cancel_task(OWNER, &second).await);
    let seen = collect_events(&mut events_second, &second).await;
    assert!(phases(&seen).is_empty(), "queued task never started a phase");
    assert!(matches!(seen.last(), Some(Event::TaskCancelled { .. })));

    h.engine.cancel_task(OWNER, &first).await;
    wait_for_terminal(&mut events_first, &first).await;
    assert!(h.engine.registry().is_empty().await);
}

#[tokio::test]
async fn test_slot_is_released_when_a_task_ends() {
    let h = harness_with(|c| c.limits.max_concurrent_tasks = 1).await;
    h.media.hold.store(true, Ordering::SeqCst);
    let mut events_first = h.engine.subscribe();
    let mut events_second = h.engine.subscribe();

    let first = h
        .engine
        .submit(encode_request("a.mp4", 10))
        .await
        .unwrap();
    tokio::time::timeout(TEST_TIMEOUT, h.media.started.notified())
        .await
        .unwrap();
    let second = h
        .engine
        .submit(encode_request("b.mp4", 10))
        .await
        .unwrap();

    h.media.hold.store(false, Ordering::SeqCst);
    h.engine.cancel_task(OWNER, &first).await;

    assert!(matches!(
        wait_for_terminal(&mut events_first, &first).await,
        Event::TaskCancelled { .. }
    ));
    assert!(matches!(
        wait_for_terminal(&mut events_second, &second).await,
        Event::TaskDone { .. }
    ));
    assert_eq!(h.media.jobs().len(), 2);
    assert_eq!(h.transport.uploads()[0].file_name, "b_720p.mp4");
}

#[tokio::test]
async fn test_media_failure_reports_diagnostics_and_cleans_up() {
    let h = harness().await;
    h.media.fail.store(true, Ordering::SeqCst);
    let mut events = h.engine.subscribe();

    let task_id = h
        .engine
        .submit(encode_request("clip.mp4", 1_000))
        .await
        .unwrap();

    match wait_for_terminal(&mut events, &task_id).await {
        Event::TaskFailed { phase, error, .. } => {
            assert_eq!(phase, Phase::Transcoding);
            assert!(error.contains("Invalid data found"), "{error}");
        }
        other => panic!("expected failure, got {other:?}"),
    }
    let last_edit = h.transport.edit_texts().last().cloned().unwrap();
    assert!(last_edit.contains("failed during transcoding"));
    assert!(h.transport.uploads().is_empty());
    assert!(!task_dir(&h, &task_id).exists());
    assert!(h.engine.registry().is_empty().await);
}

#[tokio::test]
async fn test_transient_download_errors_are_retried() {
    let h = harness().await;
    h.transport.download_failures.store(2, Ordering::SeqCst);
    let mut events = h.engine.subscribe();

    let task_id = h
        .engine
        .submit(encode_request("clip.mp4", 1_000))
        .await
        .unwrap();

    assert!(matches!(
        wait_for_terminal(&mut events, &task_id).await,
        Event::TaskDone { .. }
    ));
    assert_eq!(h.transport.downloads.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_download_gives_up_after_retry_budget() {
    let h = harness().await;
    h.transport.download_failures.store(100, Ordering::SeqCst);
    let mut events = h.engine.subscribe();

    let task_id = h
        .engine
        .submit(encode_request("clip.mp4", 1_000))
        .await
        .unwrap();

    match wait_for_terminal(&mut events, &task_id).await {
        Event::TaskFailed { phase, error, .. } => {
            assert_eq!(phase, Phase::Downloading);
            assert!(error.contains("network error"), "{error}");
        }
        other => panic!("expected failure, got {other:?}"),
    }
    // Initial attempt plus three retries
    assert_eq!(h.transport.downloads.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_phase_watchdog_fails_a_stuck_download() {
    let h = harness_with(|c| c.watchdog.download_timeout = Duration::from_millis(50)).await;
    h.transport.hold_downloads.store(true, Ordering::SeqCst);
    let mut events = h.engine.subscribe();

    let task_id = h
        .engine
        .submit(encode_request("clip.mp4", 1_000))
        .await
        .unwrap();

    match wait_for_terminal(&mut events, &task_id).await {
        Event::TaskFailed { phase, error, .. } => {
            assert_eq!(phase, Phase::Downloading);
            assert!(error.contains("exceeded the maximum runtime"), "{error}");
        }
        other => panic!("expected failure, got {other:?}"),
    }
}

#[tokio::test]
async fn test_media_info_replies_with_text() {
    let h = harness().await;
    let mut events = h.engine.subscribe();

    let task_id = h
        .engine
        .submit(JobRequest::new(
            OWNER,
            CHAT,
            media("clip.mp4", 1_000),
            JobKind::MediaInfo,
        ))
        .await
        .unwrap();

    assert!(matches!(
        wait_for_terminal(&mut events, &task_id).await,
        Event::TaskDone {
            output_bytes: 0,
            ..
        }
    ));
    let sent = h.transport.sent_texts();
    let info = sent.iter().find(|t| t.contains("Media Info")).unwrap();
    assert!(info.contains("clip.mp4"));
    assert!(info.contains("1280x720"));
    assert!(h.transport.uploads().is_empty());
    assert!(h.media.jobs().is_empty());
}

#[tokio::test]
async fn test_owner_preferences_shape_the_result() {
    let h = harness().await;
    h.store
        .set_user_setting(OWNER, UPLOAD_MODE_KEY, "document")
        .await;
    h.store
        .set_user_setting(OWNER, WATERMARK_KEY, "@mychannel")
        .await;
    let mut events = h.engine.subscribe();

    let encode = h
        .engine
        .submit(encode_request("clip.mp4", 10))
        .await
        .unwrap();
    wait_for_terminal(&mut events, &encode).await;

    let audio = h
        .engine
        .submit(JobRequest::new(
            OWNER,
            CHAT,
            media("clip.mp4", 10),
            JobKind::ExtractAudio,
        ))
        .await
        .unwrap();
    wait_for_terminal(&mut events, &audio).await;

    let uploads = h.transport.uploads();
    assert_eq!(uploads[0].kind, UploadKind::Document);
    assert_eq!(uploads[1].kind, UploadKind::Audio);
    assert_eq!(uploads[1].file_name, "clip_audio.mp3");

    match &h.media.jobs()[0].operation {
        Operation::Encode(params) => {
            assert_eq!(params.watermark.as_deref(), Some("@mychannel"));
        }
        other => panic!("expected encode, got {other:?}"),
    }
}

#[tokio::test]
async fn test_stored_encoder_settings_reach_the_job_and_caption() {
    let h = harness().await;
    h.store.set_setting(CODEC_SETTING, "libx265").await;
    h.store.set_setting(PRESET_SETTING, "veryslow").await;
    h.store.set_setting(CRF_SETTING, "30").await;
    let mut events = h.engine.subscribe();

    let task_id = h
        .engine
        .submit(encode_request("clip.mp4", 10))
        .await
        .unwrap();
    assert!(matches!(
        wait_for_terminal(&mut events, &task_id).await,
        Event::TaskDone { .. }
    ));

    match &h.media.jobs()[0].operation {
        Operation::Encode(params) => {
            assert_eq!(params.codec, "libx265");
            assert_eq!(params.preset, "veryslow");
            assert_eq!(params.crf, 30);
            assert_eq!(params.audio_bitrate, "128k");
        }
        other => panic!("expected encode, got {other:?}"),
    }
    assert!(h.transport.uploads()[0].caption.contains("H.265/HEVC"));
}

#[tokio::test]
async fn test_unusable_stored_crf_fails_the_task() {
    let h = harness().await;
    h.store.set_setting(CRF_SETTING, "abc").await;
    let mut events = h.engine.subscribe();

    let task_id = h
        .engine
        .submit(encode_request("clip.mp4", 10))
        .await
        .unwrap();
    match wait_for_terminal(&mut events, &task_id).await {
        Event::TaskFailed { phase, error, .. } => {
            assert_eq!(phase, Phase::Transcoding);
            assert!(error.contains("crf"), "{error}");
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert!(h.media.jobs().is_empty());
    assert!(!task_dir(&h, &task_id).exists());
}

#[tokio::test]
async fn test_encode_all_is_refused_for_standard_owners() {
    let h = harness().await;

    let err = h
        .engine
        .submit(JobRequest::new(
            OWNER,
            CHAT,
            media("clip.mp4", 10),
            JobKind::EncodeAll,
        ))
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "privileged_only");
    assert!(h.engine.registry().is_empty().await);
    assert!(h.transport.sent_texts()[0].contains("premium users only"));
    assert_eq!(h.transport.downloads.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_encode_all_uploads_each_quality_and_skips_failures() {
    let h = harness().await;
    h.store.set_privileged(OWNER, true).await;
    h.media
        .fail_outputs
        .lock()
        .unwrap()
        .push("_360p".to_string());
    let mut events = h.engine.subscribe();

    let task_id = h
        .engine
        .submit(JobRequest::new(
            OWNER,
            CHAT,
            media("clip.mp4", 10),
            JobKind::EncodeAll,
        ))
        .await
        .unwrap();
    match wait_for_terminal(&mut events, &task_id).await {
        // Five renditions of "rendered output"
        Event::TaskDone { output_bytes, .. } => assert_eq!(output_bytes, 5 * 15),
        other => panic!("expected done, got {other:?}"),
    }

    assert_eq!(h.media.jobs().len(), 6);
    let names: Vec<String> = h
        .transport
        .uploads()
        .into_iter()
        .map(|u| u.file_name)
        .collect();
    assert_eq!(
        names,
        vec![
            "clip_144p.mp4",
            "clip_240p.mp4",
            "clip_480p.mp4",
            "clip_720p.mp4",
            "clip_1080p.mp4"
        ]
    );
    assert!(!task_dir(&h, &task_id).exists());
}

#[tokio::test]
async fn test_encode_all_fails_when_every_quality_fails() {
    let h = harness().await;
    h.store.set_privileged(OWNER, true).await;
    h.media.fail.store(true, Ordering::SeqCst);
    let mut events = h.engine.subscribe();

    let task_id = h
        .engine
        .submit(JobRequest::new(
            OWNER,
            CHAT,
            media("clip.mp4", 10),
            JobKind::EncodeAll,
        ))
        .await
        .unwrap();
    assert!(matches!(
        wait_for_terminal(&mut events, &task_id).await,
        Event::TaskFailed {
            phase: Phase::Transcoding,
            ..
        }
    ));
    assert_eq!(h.media.jobs().len(), 6);
    assert!(h.transport.uploads().is_empty());
}

#[tokio::test]
async fn test_cover_image_and_spoiler_reach_the_upload() {
    let h = harness().await;
    h.store
        .set_user_setting(OWNER, THUMBNAIL_KEY, "cover-file")
        .await;
    h.store.set_user_setting(OWNER, SPOILER_KEY, "true").await;
    let mut events = h.engine.subscribe();

    let video = h
        .engine
        .submit(encode_request("clip.mp4", 10))
        .await
        .unwrap();
    wait_for_terminal(&mut events, &video).await;

    let audio = h
        .engine
        .submit(JobRequest::new(
            OWNER,
            CHAT,
            media("clip.mp4", 10),
            JobKind::ExtractAudio,
        ))
        .await
        .unwrap();
    wait_for_terminal(&mut events, &audio).await;

    let uploads = h.transport.uploads();
    let cover = uploads[0].thumbnail.as_ref().unwrap();
    assert_eq!(cover.file_id, "cover-file");
    assert!(uploads[0].spoiler);
    assert_eq!(uploads[1].kind, UploadKind::Audio);
    assert_eq!(uploads[1].thumbnail, None);
    assert!(!uploads[1].spoiler);

    // Documents keep the cover but never the spoiler
    h.store
        .set_user_setting(OWNER, UPLOAD_MODE_KEY, "document")
        .await;
    let document = h
        .engine
        .submit(encode_request("clip.mp4", 10))
        .await
        .unwrap();
    wait_for_terminal(&mut events, &document).await;
    let uploads = h.transport.uploads();
    assert_eq!(uploads[2].kind, UploadKind::Document);
    assert!(uploads[2].thumbnail.is_some());
    assert!(!uploads[2].spoiler);
}

#[tokio::test]
async fn test_failed_status_edits_do_not_abort_the_pipeline() {
    let h = harness().await;
    h.transport.fail_edits.store(true, Ordering::SeqCst);
    let mut events = h.engine.subscribe();

    let task_id = h
        .engine
        .submit(encode_request("clip.mp4", 10))
        .await
        .unwrap();

    assert!(matches!(
        wait_for_terminal(&mut events, &task_id).await,
        Event::TaskDone { .. }
    ));
    assert_eq!(h.transport.uploads().len(), 1);
}

#[tokio::test]
async fn test_shutdown_cancels_running_tasks_and_rejects_new_ones() {
    let h = harness().await;
    h.media.hold.store(true, Ordering::SeqCst);
    let mut events = h.engine.subscribe();

    let task_id = h
        .engine
        .submit(encode_request("clip.mp4", 10))
        .await
        .unwrap();
    tokio::time::timeout(TEST_TIMEOUT, h.media.started.notified())
        .await
        .unwrap();

    h.engine.shutdown().await.unwrap();

    assert!(h.engine.registry().is_empty().await);
    assert!(!h.engine.is_accepting());
    assert!(matches!(
        wait_for_terminal(&mut events, &task_id).await,
        Event::TaskCancelled { .. }
    ));
    assert!(!task_dir(&h, &task_id).exists());

    let err = h
        .engine
        .submit(encode_request("late.mp4", 10))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ShuttingDown));
    assert!(h.transport.sent_texts().last().unwrap().contains("restarting"));
}
