//! Settings and user store seam

use crate::config::EncodingConfig;
use crate::error::{Error, Result};
use crate::types::{MediaRef, OwnerId, UploadKind};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Per-owner key holding the watermark text
pub const WATERMARK_KEY: &str = "watermark";

/// Per-owner key holding the preferred upload kind ("video" or "document")
pub const UPLOAD_MODE_KEY: &str = "upload_mode";

/// Per-owner key holding the platform file id of a custom cover image
pub const THUMBNAIL_KEY: &str = "thumbnail";

/// Per-owner key turning the video spoiler on ("true") or off
pub const SPOILER_KEY: &str = "spoiler";

/// Bot-wide key overriding the video codec
pub const CODEC_SETTING: &str = "codec";

/// Bot-wide key overriding the encoder preset
pub const PRESET_SETTING: &str = "preset";

/// Bot-wide key overriding the constant rate factor (0-51)
pub const CRF_SETTING: &str = "crf";

/// Bot-wide key overriding the audio bitrate
pub const AUDIO_BITRATE_SETTING: &str = "audio_bitrate";

/// Persistent settings the engine reads
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Bot-wide setting, or `default` when unset
    async fn get_setting(&self, key: &str, default: &str) -> Result<String>;

    /// Whether the owner gets the larger file size ceiling
    async fn is_privileged(&self, owner_id: OwnerId) -> Result<bool>;

    /// Per-owner setting, if set
    async fn user_setting(&self, owner_id: OwnerId, key: &str) -> Result<Option<String>>;

    /// Watermark text for the owner's encodes
    async fn watermark(&self, owner_id: OwnerId) -> Result<Option<String>> {
        Ok(self
            .user_setting(owner_id, WATERMARK_KEY)
            .await?
            .filter(|text| !text.trim().is_empty()))
    }

    /// Encoder settings in effect now: stored overrides on top of `base`
    ///
    /// Blank values fall back to `base`. A stored CRF that is not a number
    /// in 0..=51 is a configuration error.
    async fn encoding(&self, base: &EncodingConfig) -> Result<EncodingConfig> {
        let read = |value: String, fallback: &str| {
            let value = value.trim();
            if value.is_empty() {
                fallback.to_string()
            } else {
                value.to_string()
            }
        };

        let codec = read(self.get_setting(CODEC_SETTING, &base.codec).await?, &base.codec);
        let preset = read(self.get_setting(PRESET_SETTING, &base.preset).await?, &base.preset);
        let audio_bitrate = read(
            self.get_setting(AUDIO_BITRATE_SETTING, &base.audio_bitrate).await?,
            &base.audio_bitrate,
        );

        let raw_crf = self.get_setting(CRF_SETTING, &base.crf.to_string()).await?;
        let crf = match raw_crf.trim() {
            "" => base.crf,
            text => text
                .parse::<u8>()
                .ok()
                .filter(|crf| *crf <= 51)
                .ok_or_else(|| Error::Config {
                    message: format!("stored crf {raw_crf:?} is not a number between 0 and 51"),
                    key: Some(CRF_SETTING.to_string()),
                })?,
        };

        Ok(EncodingConfig {
            codec,
            preset,
            crf,
            audio_bitrate,
        })
    }

    /// Cover image the owner saved for video and document uploads
    async fn thumbnail(&self, owner_id: OwnerId) -> Result<Option<MediaRef>> {
        let file_id = self.user_setting(owner_id, THUMBNAIL_KEY).await?;
        Ok(file_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .map(|file_id| MediaRef {
                file_id,
                file_name: None,
                file_size: 0,
            }))
    }

    /// Whether the owner's video uploads are sent as spoilers
    async fn spoiler(&self, owner_id: OwnerId) -> Result<bool> {
        let flag = self.user_setting(owner_id, SPOILER_KEY).await?;
        Ok(matches!(
            flag.as_deref().map(|f| f.trim().to_ascii_lowercase()).as_deref(),
            Some("true" | "on" | "yes" | "1")
        ))
    }

    /// How the owner wants video results delivered
    async fn upload_kind(&self, owner_id: OwnerId) -> Result<UploadKind> {
        let mode = self.user_setting(owner_id, UPLOAD_MODE_KEY).await?;
        Ok(match mode.as_deref().map(str::trim) {
            Some(m) if m.eq_ignore_ascii_case("document") => UploadKind::Document,
            _ => UploadKind::Video,
        })
    }
}

#[derive(Default)]
struct StoreState {
    settings: HashMap<String, String>,
    privileged: HashSet<OwnerId>,
    user_settings: HashMap<(OwnerId, String), String>,
}

/// Process-local [`SettingsStore`]
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<StoreState>>,
}

impl InMemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a bot-wide setting
    pub async fn set_setting(&self, key: impl Into<String>, value: impl Into<String>) {
        self.state
            .write()
            .await
            .settings
            .insert(key.into(), value.into());
    }

    /// Grant or revoke the larger size ceiling
    pub async fn set_privileged(&self, owner_id: OwnerId, privileged: bool) {
        let mut state = self.state.write().await;
        if privileged {
            state.privileged.insert(owner_id);
        } else {
            state.privileged.remove(&owner_id);
        }
    }

    /// Set a per-owner setting
    pub async fn set_user_setting(
        &self,
        owner_id: OwnerId,
        key: impl Into<String>,
        value: impl Into<String>,
    ) {
        self.state
            .write()
            .await
            .user_settings
            .insert((owner_id, key.into()), value.into());
    }
}

#[async_trait]
impl SettingsStore for InMemoryStore {
    async fn get_setting(&self, key: &str, default: &str) -> Result<String> {
        Ok(self
            .state
            .read()
            .await
            .settings
            .get(key)
            .cloned()
            .unwrap_or_else(|| default.to_string()))
    }

    async fn is_privileged(&self, owner_id: OwnerId) -> Result<bool> {
        Ok(self.state.read().await.privileged.contains(&owner_id))
    }

    async fn user_setting(&self, owner_id: OwnerId, key: &str) -> Result<Option<String>> {
        Ok(self
            .state
            .read()
            .await
            .user_settings
            .get(&(owner_id, key.to_string()))
            .cloned())
    }
}
