//! Locations and defaults.

use std::path::PathBuf;
use std::time::Duration;

use directories::ProjectDirs;

/// Default port for the HTTP control surface.
pub const DEFAULT_HTTP_PORT: u16 = 6503;

/// Default period of the `play` driving loop.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(15);

/// How often `record` reports progress.
pub const STATUS_LOG_INTERVAL: Duration = Duration::from_secs(5);

pub fn get_project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("org", "oscsync", "oscsync")
}

/// Where sessions go when no output directory is given.
///
/// `<data_dir>/sessions`, or `./sessions` when there is no home directory.
pub fn default_sessions_dir() -> PathBuf {
    match get_project_dirs() {
        Some(dirs) => dirs.data_dir().join("sessions"),
        None => PathBuf::from("sessions"),
    }
}
