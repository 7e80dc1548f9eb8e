mod stream;
mod video;

pub use stream::StreamReference;
pub use video::VideoHandle;
