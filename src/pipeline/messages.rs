//! Status and reply texts shown to chat users

use crate::config::EncodingConfig;
use crate::registry::{MergeEntry, Task};
use crate::types::{Phase, TaskId};
use crate::utils::{
    codec_display_name, format_time, human_readable_size, progress_bar, quality_description,
};

use super::job::JobKind;

/// Width of the small bar in task list entries
const LIST_BAR_WIDTH: usize = 10;

/// First status message of a freshly accepted task
pub fn queued(kind: &JobKind, file_name: &str, task_id: &TaskId, stop_command: &str) -> String {
    format!(
        "⏳ **Queued**: {}\n📁 {}\n\n❌ Cancel: {}{}",
        kind.describe(),
        file_name,
        stop_command,
        task_id
    )
}

/// Final status edit after the owner stopped a task
pub fn cancelled(task_id: &TaskId, phase: Phase) -> String {
    format!("❌ Task `{}` cancelled during {}.", task_id, phase)
}

/// Final status edit after a failure
pub fn failed(task_id: &TaskId, phase: Phase, error: &str) -> String {
    format!("⚠️ Task `{}` failed during {}.\n\n{}", task_id, phase, error)
}

/// Reply for a request rejected before it was registered
pub fn rejected(error: &str) -> String {
    format!("⚠️ {}", error)
}

/// Reply while the bot is shutting down
pub fn shutting_down() -> String {
    "🛑 The bot is restarting, please try again in a minute.".to_string()
}

/// Caption attached to an uploaded result
pub fn done_caption(
    kind: &JobKind,
    file_name: &str,
    output_bytes: u64,
    encoding: &EncodingConfig,
) -> String {
    let mut caption = format!(
        "✅ {}\n📁 {}\n💾 {}",
        kind.describe(),
        file_name,
        human_readable_size(output_bytes)
    );
    if matches!(
        kind,
        JobKind::Encode { .. }
            | JobKind::EncodeAll
            | JobKind::Compress { .. }
            | JobKind::Crop { .. }
    ) {
        caption.push_str(&format!("\n🎬 {}", codec_display_name(&encoding.codec)));
    }
    if let JobKind::Compress { percent } = kind
        && let Ok(crf) = crate::media::compression_crf(*percent)
    {
        caption.push_str(&format!(" ({})", quality_description(crf)));
    }
    caption
}

/// Reply to a successful stop command
pub fn cancel_ok(task_id: &TaskId) -> String {
    format!("✅ Task `{}` has been cancelled.", task_id)
}

/// Reply to a stop command naming no active task of the owner
pub fn cancel_not_found(task_id: &TaskId) -> String {
    format!(
        "❌ Task `{}` not found.\n\nPossible reasons:\n\
         • The task already finished\n\
         • The task ID is wrong\n\
         • The task belongs to another user",
        task_id
    )
}

/// Reply to a stop command without an id
pub fn stop_usage(stop_command: &str) -> String {
    format!(
        "Usage: {}<task_id>\nSend /tasks to see your running tasks.",
        stop_command
    )
}

/// Render the owner's running tasks
pub fn task_list(tasks: &[Task], stop_command: &str) -> String {
    if tasks.is_empty() {
        return "📭 You have no running tasks.".to_string();
    }

    let mut text = format!("📋 **Your running tasks** ({})\n", tasks.len());
    for (i, task) in tasks.iter().enumerate() {
        let pct = if task.total_units > 0 {
            task.current_units as f64 / task.total_units as f64 * 100.0
        } else {
            0.0
        };
        text.push_str(&format!(
            "\n{}. `{}` {}\n{}\n⏱ Running: {}\n❌ {}{}\n",
            i + 1,
            task.task_id,
            task.phase.label(),
            progress_bar(pct, LIST_BAR_WIDTH),
            format_time(task.running_seconds()),
            stop_command,
            task.task_id
        ));
    }
    text
}

/// Reply after a video was added to the merge queue
pub fn merge_added(len: usize, max: usize) -> String {
    let hint = if len >= crate::registry::MIN_MERGE_ENTRIES {
        "Send /merge to join them."
    } else {
        "Send at least one more video."
    };
    format!("➕ Added to merge queue ({}/{}).\n{}", len, max, hint)
}

/// Render the owner's merge queue
pub fn merge_queue(entries: &[MergeEntry]) -> String {
    if entries.is_empty() {
        return "📭 Your merge queue is empty.".to_string();
    }
    let total: u64 = entries.iter().map(|e| e.media.file_size).sum();
    let mut text = format!(
        "🎞 **Merge queue** ({} videos, {})\n",
        entries.len(),
        human_readable_size(total)
    );
    for (i, entry) in entries.iter().enumerate() {
        text.push_str(&format!(
            "\n{}. {} ({})",
            i + 1,
            entry.media.display_name(),
            human_readable_size(entry.media.file_size)
        ));
    }
    text
}

/// Reply after the merge queue was cleared
pub fn merge_cleared(removed: usize) -> String {
    if removed == 0 {
        "📭 Your merge queue was already empty.".to_string()
    } else {
        format!("🗑 Removed {} videos from your merge queue.", removed)
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::TaskRegistry;
    use crate::types::{MediaRef, OwnerId};

    #[test]
    fn not_found_lists_the_reasons() {
        let text = cancel_not_found(&TaskId::from("zz"));
        assert!(text.contains("`zz`"));
        assert!(text.contains("already finished"));
        assert!(text.contains("ID is wrong"));
        assert!(text.contains("another user"));
    }

    #[tokio::test]
    async fn task_list_has_stop_hint_per_task() {
        let registry = TaskRegistry::new();
        let owner = OwnerId(5);
        let a = registry.register(owner).await;
        let b = registry.register(owner).await;
        registry.update_progress(owner, &b.task_id, 50, 100).await;

        let text = task_list(&registry.list_for_owner(owner).await, "/stop");
        assert!(text.contains(&format!("/stop{}", a.task_id)));
        assert!(text.contains(&format!("/stop{}", b.task_id)));
        assert!(text.contains("1. Downloading"));
        assert!(text.contains("50.0%"));
        assert!(text.contains("Running: 0s"));
        assert!(text.find(a.task_id.as_str()) < text.find(b.task_id.as_str()));
    }

    #[test]
    fn empty_task_list() {
        assert!(task_list(&[], "/stop").contains("no running tasks"));
    }

    #[test]
    fn compress_caption_mentions_quality() {
        let caption = done_caption(
            &JobKind::Compress { percent: 10 },
            "a_compressed.mp4",
            2048,
            &EncodingConfig::default(),
        );
        assert!(caption.contains("Compress by 10%"));
        assert!(caption.contains(&human_readable_size(2048)));
        assert!(caption.contains("H.264/AVC (High Quality)"));
    }

    #[test]
    fn merge_queue_rendering() {
        let entries = vec![MergeEntry {
            media: MediaRef {
                file_id: "f".into(),
                file_name: Some("part1.mp4".into()),
                file_size: 1024,
            },
            added_at: tokio::time::Instant::now(),
        }];
        let text = merge_queue(&entries);
        assert!(text.contains("1 videos"));
        assert!(text.contains("1. part1.mp4"));
        assert!(merge_queue(&[]).contains("empty"));
        assert!(merge_added(1, 10).contains("at least one more"));
        assert!(merge_added(2, 10).contains("/merge"));
    }
}
