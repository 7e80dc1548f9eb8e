use std::process::{Child, Command, Output, Stdio};

use bitflags::bitflags;
use miette::{miette, Context, IntoDiagnostic};
use tracing::{debug, trace, Level};

use crate::result::Result;

pub const YT_DL: &str = "youtube-dl";
pub const YT_DLP: &str = "yt-dlp";
pub const FFMPEG: &str = "ffmpeg";
pub const FFXXX_DEFAULT_ARGS: [&str; 3] = ["-hide_banner", "-loglevel", "error"];
pub const WHISPER: &str = "whisper";

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Capture: u8 {
        const STDIN = 0b0000001;
        const STDOUT = 0b0000010;
        const STDERR = 0b0000100;
    }
}

fn configure<'c, F: FnOnce(&mut Command) -> &mut Command>(
    cmd: &'c mut Command,
    f: F,
    capture: Capture,
) -> &'c mut Command {
    let is_debug = tracing::enabled!(Level::DEBUG);
    let get_io = |capture| {
        if capture {
            Stdio::piped()
        } else {
            Stdio::null()
        }
    };

    f(cmd)
        .stdin(get_io(capture.contains(Capture::STDIN)))
        .stdout(get_io(is_debug || capture.contains(Capture::STDOUT)))
        .stderr(get_io(is_debug || capture.contains(Capture::STDERR)))
}

/// Run a command, returning its raw output handle.
///
/// IO handles will be captured only if the caller required it or if the log level is Debug.
/// In that last case, `stdout` and `stderr` will be logged.
///
/// The function returns an error only if the command failed to execute.
/// If the program runs but returns a non-0 status code, it will not trigger an error.
pub fn run_command<F: FnOnce(&mut Command) -> &mut Command>(
    program: &str,
    f: F,
    capture: Capture,
) -> Result<Output> {
    let mut cmd = Command::new(program);
    let cmd = configure(&mut cmd, f, capture);

    debug!("Executing command: {cmd:?}");
    let res = cmd
        .output()
        .into_diagnostic()
        .wrap_err_with(|| format!("Could not run {program} command"))?;

    if tracing::enabled!(Level::DEBUG) {
        debug!("status: {}", res.status);
        debug!("stdout: {} bytes long", res.stdout.len());
        trace!("stdout: {:?}", String::from_utf8_lossy(&res.stdout));
        debug!("stderr: {} bytes long", res.stderr.len());
        trace!("stderr: {:?}", String::from_utf8_lossy(&res.stderr));
    }

    Ok(res)
}

/// Start a command without waiting for it, with its stdout piped to the caller.
///
/// Stderr is discarded unless the log level is Debug.
pub fn spawn_command<F: FnOnce(&mut Command) -> &mut Command>(
    program: &str,
    f: F,
) -> Result<Child> {
    let mut cmd = Command::new(program);
    let cmd = configure(&mut cmd, f, Capture::STDOUT);
    if tracing::enabled!(Level::DEBUG) {
        // Nobody reads it, let it go to the terminal instead of filling the pipe
        cmd.stderr(Stdio::inherit());
    }

    debug!("Spawning command: {cmd:?}");
    Ok(cmd
        .spawn()
        .into_diagnostic()
        .wrap_err_with(|| format!("Could not spawn {program} command"))?)
}

/// Run the command and verify that it has returned a success status code.
pub fn assert_success_command<F: FnOnce(&mut Command) -> &mut Command>(
    program: &str,
    f: F,
) -> Result<()> {
    let res = run_command(program, f, Capture::empty())?;
    if res.status.success() {
        Ok(())
    } else {
        Err(miette!("{program} did run but was not successful ({})", res.status).into())
    }
}
