//! Core types for encoder-bot

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Opaque identifier of a chat user who owns tasks
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(pub i64);

impl OwnerId {
    /// Get the inner i64 value
    pub fn get(&self) -> i64 {
        self.0
    }
}

impl From<i64> for OwnerId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for OwnerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Short alphanumeric task identifier, unique among active tasks
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Wrap an existing identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the identifier text
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TaskId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a chat (private chat or group)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatId(pub i64);

/// Reference to a message the bot can later edit or delete
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageRef {
    /// Chat the message lives in
    pub chat: ChatId,
    /// Platform message id
    pub message_id: i64,
}

/// Media attached to an incoming message
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    /// Platform file identifier used to fetch the content
    pub file_id: String,
    /// Original file name, if the platform reported one
    pub file_name: Option<String>,
    /// Size in bytes as reported by the platform
    pub file_size: u64,
}

impl MediaRef {
    /// File name to show to the user, falling back to a generic label
    pub fn display_name(&self) -> &str {
        self.file_name.as_deref().unwrap_or("video.mp4")
    }
}

/// Phase of a running task
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Fetching the source media from the chat platform
    Downloading,
    /// Running the external media tool
    Transcoding,
    /// Sending the result back through the chat platform
    Uploading,
}

impl Phase {
    /// Heading used in status messages
    pub fn label(&self) -> &'static str {
        match self {
            Phase::Downloading => "1. Downloading",
            Phase::Transcoding => "2. Encoding",
            Phase::Uploading => "3. Uploading",
        }
    }

    /// Whether progress for this phase is counted in bytes (otherwise frames)
    pub fn counts_bytes(&self) -> bool {
        !matches!(self, Phase::Transcoding)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Phase::Downloading => "downloading",
            Phase::Transcoding => "transcoding",
            Phase::Uploading => "uploading",
        };
        f.write_str(name)
    }
}

/// Pipeline status of a job
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Accepted, waiting for a concurrency slot
    Queued,
    /// Fetching the source media
    Downloading,
    /// Running the external media tool
    Transcoding,
    /// Sending the result back
    Uploading,
    /// Successfully completed
    Done,
    /// Stopped by its owner
    Cancelled,
    /// Failed with error
    Failed,
}

impl Status {
    /// Terminal states cannot transition any further
    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Done | Status::Cancelled | Status::Failed)
    }

    /// Whether `next` is a legal transition from this state
    pub fn can_transition_to(&self, next: Status) -> bool {
        use Status::*;
        match (self, next) {
            (s, _) if s.is_terminal() => false,
            (_, Cancelled | Failed) => true,
            (Queued, Downloading)
            | (Downloading, Transcoding)
            | (Transcoding, Uploading)
            | (Uploading, Done) => true,
            _ => false,
        }
    }
}

impl From<Phase> for Status {
    fn from(phase: Phase) -> Self {
        match phase {
            Phase::Downloading => Status::Downloading,
            Phase::Transcoding => Status::Transcoding,
            Phase::Uploading => Status::Uploading,
        }
    }
}

/// How a result file is handed back to the owner
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadKind {
    /// Streamable video
    #[default]
    Video,
    /// Generic document attachment
    Document,
    /// Audio track
    Audio,
    /// Still image
    Photo,
}

impl UploadKind {
    /// Whether a custom cover image can be attached
    pub fn takes_thumbnail(&self) -> bool {
        matches!(self, UploadKind::Video | UploadKind::Document)
    }

    /// Whether the upload can be hidden behind a spoiler
    pub fn takes_spoiler(&self) -> bool {
        matches!(self, UploadKind::Video)
    }
}

/// Event emitted during a task's lifecycle
///
/// Events are broadcast to all subscribers; dropping them when nobody listens
/// is fine.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Task registered and waiting for a concurrency slot
    TaskQueued {
        /// Owner of the task
        owner_id: OwnerId,
        /// Task id
        task_id: TaskId,
    },

    /// Task entered a new phase
    PhaseChanged {
        /// Owner of the task
        owner_id: OwnerId,
        /// Task id
        task_id: TaskId,
        /// New phase
        phase: Phase,
    },

    /// Progress tick that passed the render throttle
    Progress {
        /// Owner of the task
        owner_id: OwnerId,
        /// Task id
        task_id: TaskId,
        /// Current phase
        phase: Phase,
        /// Progress percentage (0.0 to 100.0)
        percent: f64,
    },

    /// Task completed and its result was uploaded
    TaskDone {
        /// Owner of the task
        owner_id: OwnerId,
        /// Task id
        task_id: TaskId,
        /// Size of the uploaded output in bytes
        output_bytes: u64,
    },

    /// Task stopped by its owner
    TaskCancelled {
        /// Owner of the task
        owner_id: OwnerId,
        /// Task id
        task_id: TaskId,
        /// Phase the task was in when it stopped
        phase: Phase,
    },

    /// Task failed
    TaskFailed {
        /// Owner of the task
        owner_id: OwnerId,
        /// Task id
        task_id: TaskId,
        /// Phase the task was in when it failed
        phase: Phase,
        /// Error message
        error: String,
    },
}

/// Output file produced by a pipeline, ready to upload
#[derive(Clone, Debug)]
pub struct Artifact {
    /// Path of the produced file
    pub path: PathBuf,
    /// How to send it back
    pub kind: UploadKind,
    /// Caption attached to the upload
    pub caption: String,
    /// Owner's custom cover image, only for video and document uploads
    pub thumbnail: Option<MediaRef>,
    /// Hide the video behind a spoiler
    pub spoiler: bool,
}

impl Artifact {
    /// Plain artifact without cover image or spoiler
    pub fn new(path: impl Into<PathBuf>, kind: UploadKind, caption: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind,
            caption: caption.into(),
            thumbnail: None,
            spoiler: false,
        }
    }

    /// Attach the owner's presentation preferences where the kind allows them
    pub fn with_presentation(mut self, thumbnail: Option<MediaRef>, spoiler: bool) -> Self {
        self.thumbnail = thumbnail.filter(|_| self.kind.takes_thumbnail());
        self.spoiler = spoiler && self.kind.takes_spoiler();
        self
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presentation_only_applies_where_the_kind_allows() {
        let cover = MediaRef {
            file_id: "cover".into(),
            file_name: None,
            file_size: 0,
        };

        let video = Artifact::new("/w/a.mp4", UploadKind::Video, "c")
            .with_presentation(Some(cover.clone()), true);
        assert_eq!(video.thumbnail.as_ref(), Some(&cover));
        assert!(video.spoiler);

        let document = Artifact::new("/w/a.mp4", UploadKind::Document, "c")
            .with_presentation(Some(cover.clone()), true);
        assert_eq!(document.thumbnail.as_ref(), Some(&cover));
        assert!(!document.spoiler);

        let audio = Artifact::new("/w/a.mp3", UploadKind::Audio, "c")
            .with_presentation(Some(cover), true);
        assert_eq!(audio.thumbnail, None);
        assert!(!audio.spoiler);
    }

    #[test]
    fn happy_path_transitions_are_legal() {
        let path = [
            Status::Queued,
            Status::Downloading,
            Status::Transcoding,
            Status::Uploading,
            Status::Done,
        ];
        for pair in path.windows(2) {
            assert!(
                pair[0].can_transition_to(pair[1]),
                "{:?} -> {:?} should be legal",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn terminal_states_are_reachable_from_every_active_state() {
        for s in [
            Status::Queued,
            Status::Downloading,
            Status::Transcoding,
            Status::Uploading,
        ] {
            assert!(s.can_transition_to(Status::Cancelled));
            assert!(s.can_transition_to(Status::Failed));
        }
    }

    #[test]
    fn terminal_states_are_final() {
        for s in [Status::Done, Status::Cancelled, Status::Failed] {
            assert!(s.is_terminal());
            assert!(!s.can_transition_to(Status::Failed));
            assert!(!s.can_transition_to(Status::Downloading));
        }
    }

    #[test]
    fn skipping_a_phase_is_illegal() {
        assert!(!Status::Downloading.can_transition_to(Status::Uploading));
        assert!(!Status::Queued.can_transition_to(Status::Done));
        assert!(!Status::Uploading.can_transition_to(Status::Downloading));
    }

    #[test]
    fn event_serializes_with_type_tag() {
        let event = Event::PhaseChanged {
            owner_id: OwnerId(42),
            task_id: TaskId::from("abc123"),
            phase: Phase::Transcoding,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "phase_changed");
        assert_eq!(json["owner_id"], 42);
        assert_eq!(json["task_id"], "abc123");
        assert_eq!(json["phase"], "transcoding");
    }

    #[test]
    fn media_display_name_falls_back() {
        let media = MediaRef {
            file_id: "f".into(),
            file_name: None,
            file_size: 1,
        };
        assert_eq!(media.display_name(), "video.mp4");
    }
}
