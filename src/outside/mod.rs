mod command;
mod ffmpeg;
mod whisper;
mod ytdl;

pub use ffmpeg::{AudioDecoder, Ffmpeg};
pub use whisper::{Transcriber, Whisper, DEFAULT_MODEL};
pub use ytdl::{Catalog, StreamDownloader, VideoListing, Ytdl};
