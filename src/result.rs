use std::{fmt::Display, time::Duration};

use miette::miette;

#[derive(Debug)]
pub enum Error {
    /// The catalog confirmed that the resource cannot be accessed
    Unavailable,

    /// The transcription engine did run but could not produce a transcript
    TranscriptionFailed(String),

    /// A bounded queue stayed full for longer than the allowed wait
    QueueTimeout(Duration),

    Miette(miette::Report),
}

impl From<miette::Report> for Error {
    fn from(err: miette::Report) -> Self {
        Error::Miette(err)
    }
}

impl From<Error> for miette::Report {
    fn from(err: Error) -> Self {
        match err {
            Error::Unavailable => miette!("Unavailable stream"),
            Error::TranscriptionFailed(reason) => miette!("Transcription failed: {reason}"),
            Error::QueueTimeout(timeout) => {
                miette!("Queue still full after waiting {}s", timeout.as_secs_f32())
            }
            Error::Miette(err) => err,
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Unavailable => write!(f, "unavailable"),
            Error::TranscriptionFailed(reason) => write!(f, "transcription failed: {reason}"),
            Error::QueueTimeout(timeout) => {
                write!(f, "queue full for {}s", timeout.as_secs_f32())
            }
            Error::Miette(report) => write!(f, "{report:#}"),
        }
    }
}

impl Error {
    pub fn wrap_err_with<D, F>(self, f: F) -> Error
    where
        D: Display + Send + Sync + 'static,
        F: FnOnce() -> D,
    {
        match self {
            Error::Miette(report) => Error::Miette(report.wrap_err(f())),
            err => err,
        }
    }

    /// Whether retrying the operation that produced this error is pointless
    pub fn is_permanent(&self) -> bool {
        matches!(self, Error::Unavailable | Error::TranscriptionFailed(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
