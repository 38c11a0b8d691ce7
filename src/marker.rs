/// Health marker: a file holding the Unix timestamp (whole seconds) of the
/// monitored process's last heartbeat.
///
/// The monitored process overwrites it on every heartbeat; the probe only reads it.
use nix::fcntl::OFlag;
use std::io::{Read, Write};
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};

/// Upper bound on marker content; a timestamp plus whitespace fits easily.
const MAX_MARKER_BYTES: u64 = 64;

/// Read the marker and parse its timestamp.
///
/// Surrounding whitespace is ignored. Anything else that is not a decimal
/// integer is `Malformed`, as is content that is not UTF-8 or longer than
/// `MAX_MARKER_BYTES`. Only regular files are read; the open is
/// non-blocking so a FIFO at the marker path cannot stall the caller.
pub fn read_marker(path: &Path) -> Result<i64, MarkerError> {
    let read_err = |source: std::io::Error| MarkerError::Read {
        path: path.to_path_buf(),
        source,
    };

    let file = match std::fs::OpenOptions::new()
        .read(true)
        .custom_flags(OFlag::O_NONBLOCK.bits())
        .open(path)
    {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(MarkerError::Missing {
                path: path.to_path_buf(),
            })
        }
        Err(e) => return Err(read_err(e)),
    };

    let metadata = file.metadata().map_err(read_err)?;
    if !metadata.is_file() {
        return Err(read_err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "not a regular file",
        )));
    }

    let mut bytes = Vec::new();
    file.take(MAX_MARKER_BYTES + 1)
        .read_to_end(&mut bytes)
        .map_err(read_err)?;

    let malformed = |bytes: &[u8]| MarkerError::Malformed {
        path: path.to_path_buf(),
        content: String::from_utf8_lossy(bytes)
            .trim()
            .chars()
            .take(MAX_MARKER_BYTES as usize)
            .collect(),
    };

    if bytes.len() as u64 > MAX_MARKER_BYTES {
        return Err(malformed(&bytes));
    }
    let contents = std::str::from_utf8(&bytes).map_err(|_| malformed(&bytes))?;
    contents.trim().parse::<i64>().map_err(|_| malformed(&bytes))
}

/// Atomically replace the marker with `timestamp`.
///
/// Writes a temp file in the same directory, then renames it over the
/// marker so readers never see a partial write. The marker is world-readable
/// so a probe running as another user can still check it.
pub fn write_marker(path: &Path, timestamp: i64) -> Result<(), MarkerError> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };

    let write_err = |source: std::io::Error| MarkerError::Write {
        path: path.to_path_buf(),
        source,
    };

    let mut tmp = tempfile::Builder::new()
        .prefix(".health_status.tmp.")
        .permissions(std::fs::Permissions::from_mode(0o644))
        .tempfile_in(dir)
        .map_err(write_err)?;
    tmp.write_all(timestamp.to_string().as_bytes())
        .map_err(write_err)?;
    tmp.persist(path).map_err(|e| write_err(e.error))?;

    Ok(())
}

/// Write the current wall-clock second to the marker. Returns the timestamp written.
pub fn write_now(path: &Path) -> Result<i64, MarkerError> {
    let now = chrono::Utc::now().timestamp();
    write_marker(path, now)?;
    Ok(now)
}

/// Errors from reading or writing the health marker.
#[derive(Debug)]
pub enum MarkerError {
    /// The marker does not exist (yet).
    Missing { path: PathBuf },
    /// The marker exists but could not be read.
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    /// The marker content is not an integer timestamp.
    Malformed { path: PathBuf, content: String },
    /// Writing or renaming the marker failed.
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl std::fmt::Display for MarkerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MarkerError::Missing { path } => {
                write!(f, "health marker {} does not exist", path.display())
            }
            MarkerError::Read { path, source } => {
                write!(f, "failed to read health marker {}: {source}", path.display())
            }
            MarkerError::Malformed { path, content } => {
                write!(
                    f,
                    "health marker {} is not a timestamp: {content:?}",
                    path.display()
                )
            }
            MarkerError::Write { path, source } => {
                write!(
                    f,
                    "failed to write health marker {}: {source}",
                    path.display()
                )
            }
        }
    }
}

impl std::error::Error for MarkerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MarkerError::Read { source, .. } => Some(source),
            MarkerError::Write { source, .. } => Some(source),
            MarkerError::Missing { .. } | MarkerError::Malformed { .. } => None,
        }
    }
}
