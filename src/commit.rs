// SPDX-License-Identifier: AGPL-3.0-or-later

//! Atomic replacement of the destination file.
//!
//! The new database is written to a temporary file next to the destination
//! and renamed over it only after the whole write succeeded. Until then the
//! destination path is never opened, so readers see the old file or the new
//! one and nothing in between. A temporary file that does not make it to the
//! rename is removed.

use crate::daemon::{forget_best_effort, CacheDaemon};
use crate::error::{ModifyError, Result};
use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};

/// Destination argument meaning "standard output".
pub const STDOUT_DESTINATION: &str = "-";

/// Mode requested for new files; the process umask is applied on creation.
#[cfg(unix)]
const NEW_FILE_MODE: u32 = 0o666;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    Stdout,
    File(PathBuf),
}

impl Destination {
    pub fn from_arg(arg: &str) -> Self {
        if arg == STDOUT_DESTINATION {
            Self::Stdout
        } else {
            Self::File(PathBuf::from(arg))
        }
    }
}

/// Runs `write` against the destination. For a file destination the output
/// only becomes visible under `path` once `write` returned `Ok` and the
/// permission copy succeeded.
pub fn commit<F>(destination: &Destination, daemon: &mut dyn CacheDaemon, write: F) -> Result<()>
where
    F: FnOnce(&mut dyn Write) -> Result<()>,
{
    match destination {
        Destination::Stdout => {
            let stdout = io::stdout();
            let mut out = stdout.lock();
            write(&mut out)?;
            out.flush().map_err(ModifyError::ShortWrite)?;
            Ok(())
        }
        Destination::File(path) => commit_file(path, daemon, write),
    }
}

fn commit_file<F>(path: &Path, daemon: &mut dyn CacheDaemon, write: F) -> Result<()>
where
    F: FnOnce(&mut dyn Write) -> Result<()>,
{
    let mut tmp = create_temp(path)?;
    debug!(tmp = %tmp.path().display(), "writing temporary file");

    // Dropping `tmp` on any early return deletes it.
    {
        let mut out = BufWriter::new(tmp.as_file_mut());
        write(&mut out)?;
        out.flush().map_err(ModifyError::ShortWrite)?;
    }
    tmp.as_file().sync_all().map_err(ModifyError::ShortWrite)?;

    let permissions = match fs::metadata(path) {
        Ok(meta) => meta.permissions(),
        // No destination yet: keep the umask-reduced creation mode.
        Err(_) => tmp
            .as_file()
            .metadata()
            .map_err(|source| ModifyError::PermissionApplyFailure {
                path: tmp.path().to_path_buf(),
                source,
            })?
            .permissions(),
    };
    fs::set_permissions(tmp.path(), permissions).map_err(|source| {
        ModifyError::PermissionApplyFailure {
            path: tmp.path().to_path_buf(),
            source,
        }
    })?;

    forget_best_effort(daemon, path);
    tmp.persist(path).map_err(|e| ModifyError::RenameFailure {
        path: path.to_path_buf(),
        source: e.error,
    })?;
    // The daemon may have picked the old file up again between the two calls.
    forget_best_effort(daemon, path);

    info!(path = %path.display(), "destination replaced");
    Ok(())
}

fn create_temp(path: &Path) -> Result<NamedTempFile> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let prefix = match path.file_name() {
        Some(name) => format!("{}.", name.to_string_lossy()),
        None => ".rrdkit.".to_string(),
    };

    let mut builder = tempfile::Builder::new();
    builder.prefix(&prefix).suffix(".tmp");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        builder.permissions(fs::Permissions::from_mode(NEW_FILE_MODE));
    }
    builder
        .tempfile_in(&dir)
        .map_err(|source| ModifyError::TempFileCreateFailure { dir, source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::NoDaemon;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    /// Records daemon calls and whether the destination existed at the time.
    struct Recorder {
        calls: Rc<RefCell<Vec<(String, bool)>>>,
    }

    impl CacheDaemon for Recorder {
        fn flush(&mut self, path: &Path) -> Result<()> {
            self.calls.borrow_mut().push(("flush".to_string(), path.exists()));
            Ok(())
        }

        fn forget(&mut self, path: &Path) -> Result<()> {
            self.calls.borrow_mut().push(("forget".to_string(), path.exists()));
            Err(ModifyError::Daemon("not cached".to_string()))
        }
    }

    #[test]
    fn test_commit_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.rrd");
        commit(&Destination::File(dest.clone()), &mut NoDaemon, |w| {
            w.write_all(b"new contents").map_err(ModifyError::ShortWrite)
        })
        .unwrap();
        assert_eq!(fs::read(&dest).unwrap(), b"new contents");
        assert_eq!(entries(dir.path()), vec!["out.rrd"]);
    }

    #[test]
    fn test_failed_write_leaves_destination_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.rrd");
        fs::write(&dest, b"old").unwrap();

        let err = commit(&Destination::File(dest.clone()), &mut NoDaemon, |w| {
            w.write_all(b"partial").map_err(ModifyError::ShortWrite)?;
            Err(ModifyError::ShortWrite(io::Error::new(
                io::ErrorKind::WriteZero,
                "disk full",
            )))
        })
        .unwrap_err();
        assert!(matches!(err, ModifyError::ShortWrite(_)));
        assert_eq!(fs::read(&dest).unwrap(), b"old");
        assert_eq!(entries(dir.path()), vec!["out.rrd"]);
    }

    #[test]
    fn test_failed_write_without_destination_creates_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("never.rrd");
        let result = commit(&Destination::File(dest.clone()), &mut NoDaemon, |_| {
            Err(ModifyError::ShortWrite(io::Error::new(io::ErrorKind::Other, "boom")))
        });
        assert!(result.is_err());
        assert!(!dest.exists());
        assert!(entries(dir.path()).is_empty());
    }

    #[test]
    fn test_missing_directory_is_temp_create_failure() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("no/such/dir/out.rrd");
        let err = commit(&Destination::File(dest), &mut NoDaemon, |_| Ok(())).unwrap_err();
        assert!(matches!(err, ModifyError::TempFileCreateFailure { .. }));
    }

    #[test]
    fn test_forget_around_rename_and_errors_swallowed() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.rrd");
        let calls = Rc::new(RefCell::new(Vec::new()));
        let mut daemon = Recorder {
            calls: Rc::clone(&calls),
        };
        commit(&Destination::File(dest.clone()), &mut daemon, |w| {
            w.write_all(b"x").map_err(ModifyError::ShortWrite)
        })
        .unwrap();
        assert_eq!(
            *calls.borrow(),
            vec![("forget".to_string(), false), ("forget".to_string(), true)]
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_existing_mode_is_copied() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.rrd");
        fs::write(&dest, b"old").unwrap();
        fs::set_permissions(&dest, fs::Permissions::from_mode(0o640)).unwrap();

        commit(&Destination::File(dest.clone()), &mut NoDaemon, |w| {
            w.write_all(b"new").map_err(ModifyError::ShortWrite)
        })
        .unwrap();
        let mode = fs::metadata(&dest).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o640);
    }

    #[cfg(unix)]
    #[test]
    fn test_new_destination_gets_umask_reduced_mode() {
        use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

        let dir = tempfile::tempdir().unwrap();
        // A plain 0666 create shows what the current umask leaves.
        let reference = dir.path().join("reference");
        fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o666)
            .open(&reference)
            .unwrap();
        let expected = fs::metadata(&reference).unwrap().permissions().mode() & 0o777;

        let dest = dir.path().join("new.rrd");
        commit(&Destination::File(dest.clone()), &mut NoDaemon, |w| {
            w.write_all(b"new").map_err(ModifyError::ShortWrite)
        })
        .unwrap();
        let mode = fs::metadata(&dest).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, expected);
    }

    #[cfg(unix)]
    #[test]
    fn test_rename_onto_directory_fails_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("isdir");
        fs::create_dir(&dest).unwrap();
        fs::write(dest.join("inner"), b"keep").unwrap();

        let err = commit(&Destination::File(dest.clone()), &mut NoDaemon, |w| {
            w.write_all(b"new").map_err(ModifyError::ShortWrite)
        })
        .unwrap_err();
        assert!(matches!(err, ModifyError::RenameFailure { ref path, .. } if path == &dest));
        assert_eq!(entries(dir.path()), vec!["isdir"]);
        assert_eq!(entries(&dest), vec!["inner"]);
        assert_eq!(fs::read(dest.join("inner")).unwrap(), b"keep");
    }

    #[test]
    fn test_stdout_destination() {
        assert_eq!(Destination::from_arg("-"), Destination::Stdout);
        assert_eq!(
            Destination::from_arg("a.rrd"),
            Destination::File(PathBuf::from("a.rrd"))
        );
    }
}
