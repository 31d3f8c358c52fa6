//! BIRD configuration fragment writing and reloading.
//!
//! [`update_config`] renders the prefix collection next to the target file,
//! byte-compares it with what is already on disk and only then renames it
//! into place. The rename is atomic on local filesystems, so BIRD always
//! reads either the old or the new fragment, never a torn one.
//!
//! [`reload`] runs the configured reload command under a fixed deadline.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio::time;
use tracing::{debug, warn};

use crate::error::ReloadError;
use crate::prefix::PrefixCollection;

const RELOAD_TIMEOUT: Duration = Duration::from_secs(10);

/// Result of a fragment write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The fragment changed and was renamed into place.
    Written,
    /// The on-disk fragment already matches; nothing was replaced.
    Identical,
}

/// Removes the temporary file when dropped, whichever way the write ends.
struct TmpGuard(PathBuf);

impl Drop for TmpGuard {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.0);
    }
}

/// Renders `collection` and atomically replaces the fragment at `path`.
///
/// Returns [`WriteOutcome::Identical`] without touching `path` when the
/// rendered fragment byte-equals the current file.
pub fn update_config(path: &Path, collection: &PrefixCollection) -> io::Result<WriteOutcome> {
    let tmp = tmp_path(path);
    let _guard = TmpGuard(tmp.clone());

    fs::write(&tmp, collection.render())?;

    if files_equal(&tmp, path) {
        debug!(file = %path.display(), "config did not change");
        return Ok(WriteOutcome::Identical);
    }

    fs::rename(&tmp, path)?;
    Ok(WriteOutcome::Written)
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut file = path.as_os_str().to_owned();
    file.push(".tmp");
    PathBuf::from(file)
}

/// Byte-compares two files. Any read error counts as "not equal", which
/// covers the first write when the target does not exist yet.
fn files_equal(a: &Path, b: &Path) -> bool {
    match (fs::read(a), fs::read(b)) {
        (Ok(da), Ok(db)) => da == db,
        _ => false,
    }
}

/// Runs the reload command under the fixed deadline.
///
/// The command string is split on ASCII space, first element is the
/// executable. Output is captured and logged on failure only.
pub async fn reload(command: &str) -> Result<(), ReloadError> {
    run_reload(command, RELOAD_TIMEOUT).await
}

async fn run_reload(command: &str, timeout: Duration) -> Result<(), ReloadError> {
    let mut argv = command.split(' ');
    let program = argv.next().unwrap_or_default();

    let mut cmd = Command::new(program);
    cmd.args(argv)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = cmd.spawn()?;

    let output = match time::timeout(timeout, child.wait_with_output()).await {
        Err(_) => {
            warn!(%command, ?timeout, "reloading timed out");
            return Err(ReloadError::Timeout { timeout });
        }
        Ok(result) => result?,
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        warn!(
            %command,
            status = %output.status,
            output = %String::from_utf8_lossy(&output.stdout),
            %stderr,
            "reloading failed"
        );
        return Err(ReloadError::Failed {
            status: output.status,
            stderr,
        });
    }

    debug!(%command, "reloading succeeded");
    Ok(())
}
