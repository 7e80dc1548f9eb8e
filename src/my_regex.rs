use std::sync::OnceLock;

use regex::Regex;

/// Messages of the catalog tool telling that a video will never be accessible.
///
/// Each line of its stderr is tested, the error prefix is mandatory so that
/// warnings or video titles do not trigger a false positive.
const UNAVAILABLE_PATTERN: &str = concat!(
    r"(?i)^ERROR:.*(",
    r"video (is )?unavailable|",
    r"content isn't available|",
    r"private video|",
    r"has been removed|",
    r"members-only|",
    r"this live event will begin|",
    r"sign in to confirm your age",
    r")"
);

static UNAVAILABLE_RE: OnceLock<Regex> = OnceLock::new();

fn get_unavailable_re() -> &'static Regex {
    UNAVAILABLE_RE.get_or_init(|| Regex::new(UNAVAILABLE_PATTERN).expect("Invalid built-in regex"))
}

/// Whether the stderr output reports the resource as definitely unavailable
pub fn reports_unavailable(stderr: &str) -> bool {
    let re = get_unavailable_re();
    stderr.lines().any(|line| re.is_match(line.trim()))
}
