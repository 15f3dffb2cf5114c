// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Unix datagram socket transport.

use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::FileTypeExt;
use std::path::Path;

use tokio::net::UnixDatagram;
use tracing::{debug, warn};

use crate::errors::SourceError;

// sun_path is 108 bytes on Linux, 104 on macOS.
const MAX_PATH_BYTES: usize = 100;

/// Validates a socket path before binding.
///
/// # Errors
///
/// Returns [`SourceError::InvalidPath`] if the path is empty, contains NUL bytes, is longer
/// than 100 bytes or is not absolute.
pub fn validate_socket_path(path: &Path) -> Result<(), SourceError> {
    let raw = path.as_os_str().as_bytes();
    if raw.is_empty() {
        return Err(SourceError::InvalidPath("path cannot be empty".to_string()));
    }
    if raw.contains(&0) {
        return Err(SourceError::InvalidPath(
            "path cannot contain null bytes".to_string(),
        ));
    }
    if raw.len() > MAX_PATH_BYTES {
        return Err(SourceError::InvalidPath(format!(
            "{} is {} bytes (maximum {MAX_PATH_BYTES})",
            path.display(),
            raw.len()
        )));
    }
    if !path.is_absolute() {
        return Err(SourceError::InvalidPath(format!(
            "{} is not absolute",
            path.display()
        )));
    }
    Ok(())
}

/// Binds a datagram socket at `path`, replacing a stale socket left by a previous run.
///
/// Anything else found at `path` (a regular file, a directory, a symlink) is left untouched and
/// reported as [`SourceError::InvalidPath`].
pub(crate) fn bind(path: &Path) -> Result<UnixDatagram, SourceError> {
    validate_socket_path(path)?;
    remove_stale_socket(path)?;
    let socket = UnixDatagram::bind(path).map_err(|source| SourceError::Bind {
        address: path.display().to_string(),
        source,
    })?;
    debug!("Bound unix datagram socket {}", path.display());
    Ok(socket)
}

fn remove_stale_socket(path: &Path) -> Result<(), SourceError> {
    // symlink_metadata does not follow links
    let metadata = match std::fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(source) => {
            return Err(SourceError::Bind {
                address: path.display().to_string(),
                source,
            })
        }
    };
    if !metadata.file_type().is_socket() {
        return Err(SourceError::InvalidPath(format!(
            "{} exists and is not a socket, refusing to remove it",
            path.display()
        )));
    }
    std::fs::remove_file(path).map_err(|source| SourceError::Bind {
        address: path.display().to_string(),
        source,
    })?;
    debug!("Removed stale socket {}", path.display());
    Ok(())
}

pub(crate) fn cleanup(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != io::ErrorKind::NotFound {
            warn!("Could not remove socket {}: {}", path.display(), e);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_validate_socket_path() {
        assert!(validate_socket_path(Path::new("/tmp/lokean")).is_ok());
        assert!(validate_socket_path(Path::new("")).is_err());
        assert!(validate_socket_path(Path::new("relative/lokean")).is_err());

        let long = PathBuf::from(format!("/tmp/{}", "x".repeat(100)));
        let err = validate_socket_path(&long).unwrap_err();
        assert!(err.to_string().contains("maximum 100"));
    }

    #[tokio::test]
    async fn test_bind_replaces_stale_socket_and_receives() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lokean.sock");
        // a socket left behind by a previous run that did not clean up
        drop(std::os::unix::net::UnixDatagram::bind(&path).unwrap());
        assert!(path.exists());

        let socket = bind(&path).unwrap();
        let client = UnixDatagram::unbound().unwrap();
        client.send_to(b"hello", &path).await.unwrap();

        let mut buf = [0u8; 16];
        let amt = socket.recv(&mut buf).await.unwrap();
        assert_eq!(&buf[..amt], b"hello");

        cleanup(&path);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_bind_refuses_to_remove_regular_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("important.yaml");
        std::fs::write(&path, b"precious user data").unwrap();

        let err = bind(&path).unwrap_err();
        assert!(matches!(err, SourceError::InvalidPath(ref reason) if reason.contains("not a socket")));
        assert_eq!(std::fs::read(&path).unwrap(), b"precious user data");
    }

    #[tokio::test]
    async fn test_bind_refuses_to_remove_symlink() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("target.sock");
        drop(std::os::unix::net::UnixDatagram::bind(&target).unwrap());
        let link = dir.path().join("link.sock");
        std::os::unix::fs::symlink(&target, &link).unwrap();

        let err = bind(&link).unwrap_err();
        assert!(matches!(err, SourceError::InvalidPath(_)));
        assert!(std::fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
        assert!(target.exists());
    }
}
