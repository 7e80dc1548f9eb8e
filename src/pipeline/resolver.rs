use std::sync::Arc;

use tracing::{debug, trace, warn};

use super::retry::RetryPolicy;
use crate::{
    outside::Catalog,
    types::{StreamReference, VideoHandle},
};

/// Find the stream to transcribe for a video.
///
/// Holds no mutable state: one instance can resolve many videos concurrently.
#[derive(Debug, Clone)]
pub struct StreamResolver {
    catalog: Arc<dyn Catalog>,
    retry: RetryPolicy,
}

impl StreamResolver {
    pub fn new(catalog: Arc<dyn Catalog>, retry: RetryPolicy) -> Self {
        Self { catalog, retry }
    }

    /// Resolve the stream of the video, preferring an audio-only variant.
    ///
    /// Unavailable videos are not retried. A `None` stream means the video
    /// must be skipped, every failure having already been logged.
    pub fn resolve(&self, video: &VideoHandle) -> (String, Option<StreamReference>) {
        let what = format!("Resolving video {}", video.video_id);
        let selected = self.retry.run(what, |attempt| {
            trace!(attempt, "Querying the stream variants of {}", video.video_id);
            let variants = self.catalog.resolve_stream_variants(video)?;
            Ok(StreamReference::select(variants))
        });

        let stream = match selected {
            Some(Some(stream)) => {
                debug!("Video {} resolved to {stream}", video.video_id);
                Some(stream)
            }
            Some(None) => {
                warn!("Video {} has no usable stream. Skipping it", video.video_id);
                None
            }
            None => None,
        };

        (video.video_id.clone(), stream)
    }
}
