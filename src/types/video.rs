use std::fmt::Display;

/// Reference to one video listed by a catalog.
///
/// The `video_id` is unique within a channel. The `url` is whatever the
/// catalog needs to later resolve the stream variants of the video.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoHandle {
    pub video_id: String,
    pub url: String,
}

impl VideoHandle {
    pub fn new(video_id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            video_id: video_id.into(),
            url: url.into(),
        }
    }
}

impl Display for VideoHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.video_id)
    }
}
