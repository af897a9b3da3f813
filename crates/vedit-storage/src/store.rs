//! The output-store contract and key helpers.

use async_trait::async_trait;
use std::path::Path;

use vedit_models::{RenderId, VideoCodec};

use crate::error::{StorageError, StorageResult};

/// Stores a finished output file and returns its address.
#[async_trait]
pub trait OutputStore: Send + Sync {
    /// Persist the file at `local_path` under `key`; returns the location
    /// clients use to fetch it.
    async fn store(&self, local_path: &Path, key: &str) -> StorageResult<String>;

    /// Short name for logs.
    fn name(&self) -> &'static str;
}

/// Container extension for a codec.
pub fn extension_for(codec: VideoCodec) -> &'static str {
    match codec {
        VideoCodec::Vp9 => "webm",
        VideoCodec::H264 | VideoCodec::H265 => "mp4",
    }
}

pub fn content_type_for(key: &str) -> &'static str {
    if key.ends_with(".webm") {
        "video/webm"
    } else {
        "video/mp4"
    }
}

/// Object key for a render output: `renders/{render_id}.{ext}`.
pub fn render_output_key(render_id: &RenderId, codec: VideoCodec) -> String {
    format!("renders/{}.{}", render_id, extension_for(codec))
}

/// Rejects empty keys, absolute keys and parent-directory segments.
pub(crate) fn validate_key(key: &str) -> StorageResult<()> {
    let bad = key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..");
    if bad {
        return Err(StorageError::invalid_key(key));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_output_key() {
        let id = RenderId::from_string("r-1");
        assert_eq!(render_output_key(&id, VideoCodec::H264), "renders/r-1.mp4");
        assert_eq!(render_output_key(&id, VideoCodec::Vp9), "renders/r-1.webm");
        assert_eq!(content_type_for("renders/r-1.webm"), "video/webm");
    }

    #[test]
    fn test_validate_key() {
        assert!(validate_key("renders/r-1.mp4").is_ok());
        assert!(validate_key("../secret").is_err());
        assert!(validate_key("/abs/path").is_err());
        assert!(validate_key("a//b").is_err());
        assert!(validate_key("").is_err());
    }
}
