use std::fmt::Display;

/// A specific downloadable media variant of a video
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamReference {
    /// Catalog identifier of the variant, used to request its download
    pub format_id: String,

    /// Container subtype of the media (e.g. "webm", "m4a").
    /// Used as the extension of the downloaded file.
    pub subtype: String,

    /// Whether the variant only contains an audio track
    pub audio_only: bool,

    /// Page of the video the variant belongs to
    pub source_url: String,
}

impl StreamReference {
    /// Select the stream to transcribe: the first audio-only variant if there is one,
    /// otherwise the first variant.
    pub fn select(variants: Vec<StreamReference>) -> Option<StreamReference> {
        let audio_idx = variants.iter().position(|v| v.audio_only).unwrap_or(0);
        variants.into_iter().nth(audio_idx)
    }
}

impl Display for StreamReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ({}{})",
            self.format_id,
            self.subtype,
            if self.audio_only { ", audio only" } else { "" }
        )
    }
}
