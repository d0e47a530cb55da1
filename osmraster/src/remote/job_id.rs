//! Job id extraction from remote service output.
//!
//! Earth Engine reports a submitted job in one of three shapes:
//!
//! - an operation name: `projects/earthengine-legacy/operations/7DDCYQ2XHV3IR7TGJCCQBDEU`
//! - CLI text: `Started upload task with ID: 7DDCYQ2XHV3IR7TGJCCQBDEU`
//! - the bare id
//!
//! [`parse_job_id`] is the only place that knows about these formats.

use regex::Regex;
use std::sync::OnceLock;

use crate::job::JobId;

/// Error parsing a job id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobIdParseError {
    /// Output was empty.
    Empty,
    /// Output doesn't contain an id in any known format.
    NoMatch(String),
}

impl std::fmt::Display for JobIdParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobIdParseError::Empty => write!(f, "Empty job submission output"),
            JobIdParseError::NoMatch(s) => write!(f, "No job id in output: {}", s),
        }
    }
}

impl std::error::Error for JobIdParseError {}

/// Get the job id regex pattern.
///
/// We capture:
/// - Group 1: id following `operations/` or `ID:`
/// - Group 2: a bare id making up the whole output
fn job_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?:operations/|\bID:\s*)([A-Za-z0-9_-]+)|^\s*([A-Z0-9]{16,})\s*$")
            .expect("job id pattern is valid")
    })
}

/// Parse the job id out of raw submission output.
///
/// # Examples
///
/// ```
/// use osmraster::remote::parse_job_id;
///
/// let id = parse_job_id("projects/earthengine-legacy/operations/ABCDEFGHIJKLMNOP").unwrap();
/// assert_eq!(id.as_str(), "ABCDEFGHIJKLMNOP");
///
/// let id = parse_job_id("Started upload task with ID: ABCDEFGHIJKLMNOP").unwrap();
/// assert_eq!(id.as_str(), "ABCDEFGHIJKLMNOP");
/// ```
pub fn parse_job_id(raw_output: &str) -> Result<JobId, JobIdParseError> {
    if raw_output.trim().is_empty() {
        return Err(JobIdParseError::Empty);
    }

    let captures = job_id_pattern()
        .captures(raw_output)
        .ok_or_else(|| JobIdParseError::NoMatch(raw_output.trim().to_string()))?;

    captures
        .get(1)
        .or_else(|| captures.get(2))
        .map(|m| JobId::new(m.as_str()))
        .ok_or_else(|| JobIdParseError::NoMatch(raw_output.trim().to_string()))
}
