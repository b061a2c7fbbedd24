//! Replacement of the running executable.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::{UpdateError, UpdateResult};
use crate::extract::StagedTree;

const BACKUP_SUFFIX: &str = ".old";

/// The executable being replaced and where its backup goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallationTarget {
    current: PathBuf,
    backup: PathBuf,
    install_dir: PathBuf,
}

impl InstallationTarget {
    /// Target `current`, extracting new releases into `install_dir`.
    pub fn new(current: PathBuf, install_dir: PathBuf) -> Self {
        let mut backup = OsString::from(current.as_os_str());
        backup.push(BACKUP_SUFFIX);

        Self {
            current,
            backup: PathBuf::from(backup),
            install_dir,
        }
    }

    /// Target the running executable. The install directory defaults to the
    /// directory containing it.
    pub fn detect(install_dir: Option<&Path>) -> UpdateResult<Self> {
        let exe = std::env::current_exe()
            .and_then(fs::canonicalize)
            .map_err(|e| UpdateError::ExecutableNotFound {
                message: e.to_string(),
            })?;

        let install_dir = match install_dir {
            Some(dir) => dir.to_path_buf(),
            None => exe
                .parent()
                .map(Path::to_path_buf)
                .ok_or_else(|| UpdateError::ExecutableNotFound {
                    message: format!("{} has no parent directory", exe.display()),
                })?,
        };

        Ok(Self::new(exe, install_dir))
    }

    /// Path of the running executable.
    pub fn current(&self) -> &Path {
        &self.current
    }

    /// Path the running executable is moved to (`<current>.old`).
    pub fn backup(&self) -> &Path {
        &self.backup
    }

    pub fn install_dir(&self) -> &Path {
        &self.install_dir
    }

    /// Executable path relative to the install directory.
    ///
    /// Both paths are canonicalized first. An executable outside the install
    /// directory is an error: extracting there would never replace it.
    fn relative_executable(&self) -> UpdateResult<PathBuf> {
        let resolve = |path: &Path| {
            fs::canonicalize(path).map_err(|e| UpdateError::ReplaceFailed {
                message: format!("cannot resolve {}: {}", path.display(), e),
            })
        };
        let current = resolve(&self.current)?;
        let install_dir = resolve(&self.install_dir)?;

        current
            .strip_prefix(&install_dir)
            .map(Path::to_path_buf)
            .map_err(|_| UpdateError::ReplaceFailed {
                message: format!(
                    "{} is not inside the install directory {}",
                    current.display(),
                    install_dir.display()
                ),
            })
    }

    /// Check that the install directory is writable.
    pub fn check_write_permission(&self) -> UpdateResult<()> {
        let marker = self.install_dir.join(".relaynode_update_test");
        match fs::write(&marker, b"test") {
            Ok(_) => {
                let _ = fs::remove_file(&marker);
                Ok(())
            }
            Err(_) => Err(UpdateError::PermissionDenied {
                path: self.install_dir.clone(),
            }),
        }
    }

    /// Delete a backup left behind by a previous update.
    pub fn remove_stale_backup(&self) -> UpdateResult<()> {
        if fs::symlink_metadata(&self.backup).is_err() {
            return Ok(());
        }

        fs::remove_file(&self.backup).map_err(|e| UpdateError::ReplaceFailed {
            message: format!("cannot remove stale backup {}: {}", self.backup.display(), e),
        })?;
        tracing::debug!(path = %self.backup.display(), "Removed stale backup");
        Ok(())
    }

    /// Move the running executable to its backup path.
    pub fn retire_current(&self) -> UpdateResult<()> {
        fs::rename(&self.current, &self.backup).map_err(|e| UpdateError::ReplaceFailed {
            message: format!(
                "rename {} -> {}: {}",
                self.current.display(),
                self.backup.display(),
                e
            ),
        })?;

        tracing::info!(
            from = %self.current.display(),
            to = %self.backup.display(),
            "Moved current executable aside"
        );
        Ok(())
    }

    /// Move the backup back to the executable path.
    pub fn restore_backup(&self) -> io::Result<()> {
        if self.current.exists() {
            fs::remove_file(&self.current)?;
        }
        fs::rename(&self.backup, &self.current)
    }

    /// Retire the running executable and commit `staged` into the install directory.
    ///
    /// Nothing is renamed unless the executable lives inside the install
    /// directory, the staged tree contains it, and any stale backup is gone.
    /// When the commit fails the backup is moved back; other files committed
    /// so far stay in place. If the restore also fails the error is
    /// [`UpdateError::InstallInterrupted`].
    pub fn replace_with(&self, staged: StagedTree) -> UpdateResult<Vec<PathBuf>> {
        let relative = self.relative_executable()?;
        if !staged.contains_file(&relative) {
            return Err(UpdateError::ReplaceFailed {
                message: format!("archive does not contain {}", relative.display()),
            });
        }

        self.remove_stale_backup()?;
        self.retire_current()?;

        let failure = match staged.commit() {
            Ok(files) if self.current.is_file() => return Ok(files),
            Ok(_) => format!("{} missing after extraction", self.current.display()),
            Err(e) => e.to_string(),
        };

        match self.restore_backup() {
            Ok(()) => {
                tracing::warn!(path = %self.current.display(), "Restored previous executable");
                Err(UpdateError::ReplaceFailed { message: failure })
            }
            Err(e) => Err(UpdateError::InstallInterrupted {
                current: self.current.clone(),
                backup: self.backup.clone(),
                message: format!("{}; restore failed: {}", failure, e),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::stage_archive;
    use crate::extract::testing::build_zip;
    use std::io::Cursor;

    fn install_fixture() -> (tempfile::TempDir, InstallationTarget) {
        let dir = tempfile::tempdir().unwrap();
        let exe = dir.path().join("relaynode");
        fs::write(&exe, "old").unwrap();
        let target = InstallationTarget::new(exe, dir.path().to_path_buf());
        (dir, target)
    }

    fn stage(target: &InstallationTarget, entries: &[(&str, &[u8])]) -> StagedTree {
        stage_archive(Cursor::new(build_zip(entries)), target.install_dir()).unwrap()
    }

    #[test]
    fn test_backup_path_appends_suffix() {
        let target = InstallationTarget::new(
            PathBuf::from("/opt/relaynode/relaynode.exe"),
            PathBuf::from("/opt/relaynode"),
        );
        assert_eq!(target.backup(), Path::new("/opt/relaynode/relaynode.exe.old"));
    }

    #[test]
    fn test_detect_defaults_install_dir_to_exe_parent() {
        let target = InstallationTarget::detect(None).unwrap();
        assert_eq!(Some(target.install_dir()), target.current().parent());

        let explicit = InstallationTarget::detect(Some(Path::new("/srv/relaynode"))).unwrap();
        assert_eq!(explicit.install_dir(), Path::new("/srv/relaynode"));
    }

    #[test]
    fn test_write_permission_check() {
        let (_dir, target) = install_fixture();
        target.check_write_permission().unwrap();
        assert!(!target.install_dir().join(".relaynode_update_test").exists());

        let missing = InstallationTarget::new(
            PathBuf::from("/nonexistent/relaynode/relaynode"),
            PathBuf::from("/nonexistent/relaynode"),
        );
        assert!(matches!(
            missing.check_write_permission(),
            Err(UpdateError::PermissionDenied { .. })
        ));
    }

    #[test]
    fn test_replace_with_moves_current_aside() {
        let (_dir, target) = install_fixture();
        let staged = stage(&target, &[("relaynode", b"new"), ("lib/plugin.so", b"so")]);

        let files = target.replace_with(staged).unwrap();

        assert_eq!(files.len(), 2);
        assert_eq!(fs::read_to_string(target.current()).unwrap(), "new");
        assert_eq!(fs::read_to_string(target.backup()).unwrap(), "old");
        assert!(target.install_dir().join("lib/plugin.so").is_file());
    }

    #[test]
    fn test_stale_backup_is_replaced() {
        let (_dir, target) = install_fixture();
        fs::write(target.backup(), "ancient").unwrap();
        let staged = stage(&target, &[("relaynode", b"new")]);

        target.replace_with(staged).unwrap();

        assert_eq!(fs::read_to_string(target.backup()).unwrap(), "old");
    }

    #[test]
    fn test_archive_without_executable_changes_nothing() {
        let (_dir, target) = install_fixture();
        let staged = stage(&target, &[("README", b"docs")]);

        let result = target.replace_with(staged);

        assert!(matches!(result, Err(UpdateError::ReplaceFailed { .. })));
        assert_eq!(fs::read_to_string(target.current()).unwrap(), "old");
        assert!(!target.backup().exists());
        assert!(!target.install_dir().join("README").exists());
    }

    #[test]
    fn test_executable_outside_install_dir_is_refused() {
        let exe_dir = tempfile::tempdir().unwrap();
        let exe = exe_dir.path().join("relaynode");
        fs::write(&exe, "old").unwrap();
        let install_dir = tempfile::tempdir().unwrap();
        fs::write(install_dir.path().join("keep.txt"), "keep").unwrap();
        let target = InstallationTarget::new(exe.clone(), install_dir.path().to_path_buf());
        let staged = stage(&target, &[("relaynode", b"new"), ("lib/plugin.so", b"so")]);

        let result = target.replace_with(staged);

        match result {
            Err(UpdateError::ReplaceFailed { message }) => {
                assert!(message.contains("not inside the install directory"), "{}", message);
            }
            other => panic!("expected ReplaceFailed, got {:?}", other),
        }
        assert_eq!(fs::read_to_string(&exe).unwrap(), "old");
        assert!(!target.backup().exists());
        let mut names: Vec<String> = fs::read_dir(install_dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec!["keep.txt".to_string()]);
    }

    #[test]
    fn test_relative_install_dir_is_resolved() {
        let (dir, _) = install_fixture();
        let nested = dir.path().join("bin");
        fs::create_dir(&nested).unwrap();
        let target = InstallationTarget::new(dir.path().join("relaynode"), nested.join(".."));

        assert_eq!(target.relative_executable().unwrap(), Path::new("relaynode"));
    }

    #[test]
    fn test_undeletable_stale_backup_aborts_before_rename() {
        let (_dir, target) = install_fixture();
        fs::create_dir(target.backup()).unwrap();
        fs::write(target.backup().join("leftover"), "x").unwrap();
        let staged = stage(&target, &[("relaynode", b"new"), ("lib/plugin.so", b"so")]);

        let result = target.replace_with(staged);

        assert!(matches!(result, Err(UpdateError::ReplaceFailed { .. })));
        assert_eq!(fs::read_to_string(target.current()).unwrap(), "old");
        assert!(target.backup().join("leftover").is_file());
        assert!(!target.install_dir().join("lib").exists());
    }

    #[test]
    fn test_failed_commit_restores_backup() {
        let (_dir, target) = install_fixture();
        // A file cannot be renamed over a non-empty directory.
        fs::create_dir_all(target.install_dir().join("conf")).unwrap();
        fs::write(target.install_dir().join("conf/local.toml"), "x").unwrap();
        let staged = stage(&target, &[("relaynode", b"new"), ("conf", b"file")]);

        let result = target.replace_with(staged);

        assert!(matches!(result, Err(UpdateError::ReplaceFailed { .. })));
        assert_eq!(fs::read_to_string(target.current()).unwrap(), "old");
        assert!(!target.backup().exists());
    }

    #[test]
    fn test_retire_missing_executable_fails() {
        let dir = tempfile::tempdir().unwrap();
        let target = InstallationTarget::new(dir.path().join("gone"), dir.path().to_path_buf());
        assert!(matches!(
            target.retire_current(),
            Err(UpdateError::ReplaceFailed { .. })
        ));
    }
}
