//! Deterministic names derived from submissions.
//!
//! Container names are the only key used to find a submission's container
//! again (for stopping it or clearing an orphan), and log file names must not
//! collide between two submissions of the same team and version.

use crate::game::{SubmissionId, TeamId};

/// Extension of every submission log file (gzip-compressed text).
pub const LOG_FILE_EXTENSION: &str = "log.gz";

/// Default public prefix under which submission logs are served.
pub const DEFAULT_LOG_URL_PREFIX: &str = "/runner";

/// Build the container name for a submission.
///
/// `team_<team_id>_<submission_id>`
#[must_use]
pub fn container_name(team_id: TeamId, submission_id: SubmissionId) -> String {
    format!("team_{team_id}_{submission_id}")
}

/// Build the log file name for a submission.
///
/// `team_<team_id>_v<version>_<submission_id>.log.gz`
#[must_use]
pub fn log_file_name(team_id: TeamId, version: i64, submission_id: SubmissionId) -> String {
    format!("team_{team_id}_v{version}_{submission_id}.{LOG_FILE_EXTENSION}")
}

/// Build the public URL of a log file from a served prefix.
///
/// `<prefix>/<file_name>`
#[must_use]
pub fn output_url(prefix: &str, file_name: &str) -> String {
    format!("{}/{file_name}", prefix.trim_end_matches('/'))
}
