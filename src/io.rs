use std::{
    io::Write,
    path::{Path, PathBuf},
};

use miette::{Context, IntoDiagnostic};
use tempfile::NamedTempFile;

use crate::result::Result;

/// Create (if needed) and return the output directory of a channel: `<root>/<channel_id>/`
pub fn channel_output_dir(root: &Path, channel_id: &str) -> Result<PathBuf> {
    let dir = root.join(channel_id);
    std::fs::create_dir_all(&dir)
        .into_diagnostic()
        .wrap_err_with(|| format!("Could not create output directory {}", dir.display()))?;
    Ok(dir)
}

/// Path of the transcript file of a video inside the channel output directory
pub fn transcript_path(out_dir: &Path, video_id: &str) -> PathBuf {
    out_dir.join(format!("{video_id}.txt"))
}

/// Create a named temporary file with the given extension inside `dir` and return its handle.
///
/// The file destructor will be called at the handle drop.
/// **As such, one must not simply get the file path and drop the handle.**
pub fn named_tempfile(dir: &Path, extension: &str) -> Result<NamedTempFile> {
    Ok(tempfile::Builder::new()
        .suffix(&format!(".{extension}"))
        .tempfile_in(dir)
        .into_diagnostic()
        .wrap_err_with(|| format!("Could not create tempfile in {}", dir.display()))?)
}

/// Write the content to the path, replacing any previous file.
///
/// The content is first fully written to a sibling temporary file which is then
/// renamed over the destination. Readers never observe a partially written file.
pub fn write_atomically(path: &Path, content: &str) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));

    let mut tmp = NamedTempFile::new_in(dir)
        .into_diagnostic()
        .wrap_err_with(|| format!("Could not create tempfile in {}", dir.display()))?;
    tmp.write_all(content.as_bytes())
        .and_then(|()| tmp.flush())
        .into_diagnostic()
        .wrap_err("Could not write tempfile")?;

    tmp.persist(path)
        .map_err(|err| err.error)
        .into_diagnostic()
        .wrap_err_with(|| format!("Could not move transcript to {}", path.display()))?;

    Ok(())
}
