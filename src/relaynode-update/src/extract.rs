//! Zip extraction into the installation directory.
//!
//! Extraction is two-phase. [`stage_archive`] unpacks every entry into a
//! private staging directory inside the destination; if any entry fails the
//! staging directory is discarded and the destination is untouched.
//! [`StagedTree::commit`] then moves the staged entries into place with
//! `rename`.

use std::fs::{self, File};
use std::io::{self, Read, Seek};
use std::path::{Component, Path, PathBuf};

use tempfile::TempDir;

use crate::error::{UpdateError, UpdateResult};

const STAGING_PREFIX: &str = ".relaynode-staging-";

/// Validate a zip entry name and turn it into a relative path.
///
/// Rejects absolute names, drive prefixes and any `..` component.
pub fn sanitize_entry_name(name: &str) -> Option<PathBuf> {
    if name.starts_with('/') || name.starts_with('\\') {
        return None;
    }

    let mut relative = PathBuf::new();
    for component in Path::new(&name.replace('\\', "/")).components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }

    if relative.as_os_str().is_empty() {
        None
    } else {
        Some(relative)
    }
}

/// A fully unpacked archive waiting to be moved into its destination.
#[derive(Debug)]
pub struct StagedTree {
    staging: TempDir,
    dest: PathBuf,
    files: Vec<PathBuf>,
    dirs: Vec<PathBuf>,
}

impl StagedTree {
    /// Relative paths of the staged files.
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// Relative paths of the staged directory entries.
    pub fn dirs(&self) -> &[PathBuf] {
        &self.dirs
    }

    /// Where the tree will be committed.
    pub fn dest(&self) -> &Path {
        &self.dest
    }

    /// Whether the archive contains `relative` as a file.
    pub fn contains_file(&self, relative: &Path) -> bool {
        self.files.iter().any(|f| f == relative)
    }

    /// Move every staged entry into the destination.
    ///
    /// Files replace existing files of the same name; directories are merged.
    /// Returns the destination paths of the committed files.
    pub fn commit(self) -> UpdateResult<Vec<PathBuf>> {
        for entry in fs::read_dir(self.staging.path())? {
            let entry = entry?;
            move_into(&entry.path(), &self.dest.join(entry.file_name()))?;
        }

        let committed = self.files.iter().map(|f| self.dest.join(f)).collect();
        tracing::debug!(dest = %self.dest.display(), files = self.files.len(), "Committed staged tree");
        Ok(committed)
    }
}

/// Unpack a zip archive into a staging directory under `dest_dir`.
pub fn stage_archive<R: Read + Seek>(reader: R, dest_dir: &Path) -> UpdateResult<StagedTree> {
    fs::create_dir_all(dest_dir)?;
    let staging = tempfile::Builder::new()
        .prefix(STAGING_PREFIX)
        .tempdir_in(dest_dir)?;

    let mut archive = zip::ZipArchive::new(reader)?;
    let mut files = Vec::new();
    let mut dirs = Vec::new();

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        let name = entry.name().to_string();

        let relative = match (sanitize_entry_name(&name), entry.enclosed_name()) {
            (Some(relative), Some(_)) => relative,
            _ => return Err(UpdateError::UnsafeArchivePath { name }),
        };
        let target = staging.path().join(&relative);

        if entry.is_dir() {
            fs::create_dir_all(&target)?;
            dirs.push(relative);
            continue;
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut out = File::create(&target)?;
        set_executable(&out)?;
        io::copy(&mut entry, &mut out).map_err(|e| UpdateError::ExtractionFailed {
            message: format!("{}: {}", name, e),
        })?;
        files.push(relative);
    }

    tracing::debug!(files = files.len(), dirs = dirs.len(), "Staged archive");

    Ok(StagedTree {
        staging,
        dest: dest_dir.to_path_buf(),
        files,
        dirs,
    })
}

/// Unpack the zip archive at `archive_path` into a staging directory under `dest_dir`.
pub fn stage_archive_file(archive_path: &Path, dest_dir: &Path) -> UpdateResult<StagedTree> {
    let file = File::open(archive_path)?;
    stage_archive(io::BufReader::new(file), dest_dir)
}

/// Extract the zip archive at `archive_path` into `dest_dir`.
pub fn extract_zip(archive_path: &Path, dest_dir: &Path) -> UpdateResult<Vec<PathBuf>> {
    stage_archive_file(archive_path, dest_dir)?.commit()
}

fn move_into(src: &Path, dst: &Path) -> io::Result<()> {
    let is_dir = fs::symlink_metadata(src)?.is_dir();

    if is_dir && dst.is_dir() {
        for entry in fs::read_dir(src)? {
            let entry = entry?;
            move_into(&entry.path(), &dst.join(entry.file_name()))?;
        }
        return Ok(());
    }

    if is_dir && dst.exists() {
        fs::remove_file(dst)?;
    }

    fs::rename(src, dst)
}

#[cfg(unix)]
fn set_executable(file: &File) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(fs::Permissions::from_mode(0o755))
}

#[cfg(not(unix))]
fn set_executable(_file: &File) -> io::Result<()> {
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::testing::build_zip;
    use super::*;
    use std::io::Cursor;

    fn dir_entries(path: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(path)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_sanitize_entry_name() {
        assert_eq!(sanitize_entry_name("dir/a.txt"), Some(PathBuf::from("dir/a.txt")));
        assert_eq!(sanitize_entry_name("./dir/"), Some(PathBuf::from("dir")));
        assert_eq!(sanitize_entry_name("../evil"), None);
        assert_eq!(sanitize_entry_name("dir/../../evil"), None);
        assert_eq!(sanitize_entry_name("/etc/passwd"), None);
        assert_eq!(sanitize_entry_name("..\\evil"), None);
        assert_eq!(sanitize_entry_name(""), None);
        assert_eq!(sanitize_entry_name("./"), None);
    }

    #[test]
    fn test_extract_files_and_empty_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let archive_path = dir.path().join("update.zip");
        fs::write(
            &archive_path,
            build_zip(&[("dir/", b""), ("dir/a.txt", b"alpha"), ("dir/empty/", b"")]),
        )
        .unwrap();

        let dest = dir.path().join("install");
        let committed = extract_zip(&archive_path, &dest).unwrap();

        assert_eq!(committed, vec![dest.join("dir/a.txt")]);
        assert_eq!(fs::read_to_string(dest.join("dir/a.txt")).unwrap(), "alpha");
        assert!(dest.join("dir/empty").is_dir());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(dest.join("dir/a.txt")).unwrap().permissions().mode();
            assert_eq!(mode & 0o111, 0o111, "file should be executable, mode {:o}", mode);
        }

        // Staging directory is gone after commit.
        assert_eq!(dir_entries(&dest), vec!["dir".to_string()]);
    }

    #[test]
    fn test_files_without_directory_entries() {
        let dir = tempfile::tempdir().unwrap();
        let staged = stage_archive(
            Cursor::new(build_zip(&[("bin/relaynode", b"exe"), ("README", b"docs")])),
            dir.path(),
        )
        .unwrap();

        assert!(staged.contains_file(Path::new("bin/relaynode")));
        assert!(staged.dirs().is_empty());
        staged.commit().unwrap();

        assert_eq!(fs::read_to_string(dir.path().join("bin/relaynode")).unwrap(), "exe");
        assert_eq!(fs::read_to_string(dir.path().join("README")).unwrap(), "docs");
    }

    #[test]
    fn test_commit_replaces_and_merges() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("data")).unwrap();
        fs::write(dir.path().join("data/keep.db"), "user data").unwrap();
        fs::write(dir.path().join("relaynode"), "old").unwrap();

        let staged = stage_archive(
            Cursor::new(build_zip(&[("relaynode", b"new"), ("data/schema.sql", b"create")])),
            dir.path(),
        )
        .unwrap();
        staged.commit().unwrap();

        assert_eq!(fs::read_to_string(dir.path().join("relaynode")).unwrap(), "new");
        assert_eq!(fs::read_to_string(dir.path().join("data/keep.db")).unwrap(), "user data");
        assert_eq!(
            fs::read_to_string(dir.path().join("data/schema.sql")).unwrap(),
            "create"
        );
    }

    #[test]
    fn test_path_traversal_rejected_and_nothing_written() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("install");
        fs::create_dir_all(&dest).unwrap();

        let result = stage_archive(
            Cursor::new(build_zip(&[("ok.txt", b"fine"), ("../evil", b"pwned")])),
            &dest,
        );

        match result {
            Err(UpdateError::UnsafeArchivePath { name }) => assert_eq!(name, "../evil"),
            other => panic!("expected UnsafeArchivePath, got {:?}", other),
        }
        assert!(!dir.path().join("evil").exists());
        assert!(dir_entries(&dest).is_empty());
    }

    #[test]
    fn test_uncommitted_stage_leaves_destination_untouched() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("relaynode"), "old").unwrap();

        let staged = stage_archive(Cursor::new(build_zip(&[("relaynode", b"new")])), dir.path())
            .unwrap();
        drop(staged);

        assert_eq!(fs::read_to_string(dir.path().join("relaynode")).unwrap(), "old");
        assert_eq!(dir_entries(dir.path()), vec!["relaynode".to_string()]);
    }

    #[test]
    fn test_not_a_zip() {
        let dir = tempfile::tempdir().unwrap();
        let result = stage_archive(Cursor::new(b"definitely not a zip".to_vec()), dir.path());
        assert!(matches!(result, Err(UpdateError::ExtractionFailed { .. })));
        assert!(dir_entries(dir.path()).is_empty());
    }
}
