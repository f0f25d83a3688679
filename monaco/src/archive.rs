//! Zip extraction that refuses to write outside the destination directory.

use shared::paths::{PathError, contained_join};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek};
use std::path::{Path, PathBuf};
use zip::ZipArchive;

#[derive(thiserror::Error, Debug)]
pub enum ArchiveError {
    #[error("invalid zip archive: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    PathTraversal(#[from] PathError),
}

pub fn extract_archive_file(archive: &Path, dest: &Path) -> Result<Vec<PathBuf>, ArchiveError> {
    extract_archive(File::open(archive)?, dest)
}

/// Extracts every entry below `dest` and returns the written paths in
/// archive order. Stops at the first failure; entries written before it stay
/// on disk.
pub fn extract_archive<R: Read + Seek>(
    reader: R,
    dest: &Path,
) -> Result<Vec<PathBuf>, ArchiveError> {
    let mut archive = ZipArchive::new(reader)?;
    let mut written = Vec::with_capacity(archive.len());

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        let path = contained_join(dest, entry.name())?;

        if entry.is_dir() {
            fs::create_dir_all(&path)?;
            written.push(path);
            continue;
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut out = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        io::copy(&mut entry, &mut out)?;

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, fs::Permissions::from_mode(mode & 0o7777))?;
        }

        written.push(path);
    }

    tracing::debug!(dest = %dest.display(), entries = written.len(), "Extracted archive");
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};
    use zip::ZipWriter;
    use zip::write::SimpleFileOptions;

    fn build_zip(entries: &[(&str, Option<&str>)]) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, content) in entries {
            match content {
                Some(content) => {
                    writer
                        .start_file(*name, SimpleFileOptions::default().unix_permissions(0o640))
                        .unwrap();
                    writer.write_all(content.as_bytes()).unwrap();
                }
                None => writer
                    .add_directory(*name, SimpleFileOptions::default())
                    .unwrap(),
            }
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn test_extract_tree() {
        let dir = tempfile::tempdir().unwrap();
        let bytes = build_zip(&[
            ("projects/", None),
            ("projects/infra/", None),
            ("projects/infra/alerting-profile/profile.yaml", Some("config: []")),
            ("projects/infra/alerting-profile/profile.json", Some("{}")),
        ]);

        let written = extract_archive(Cursor::new(bytes), dir.path()).unwrap();
        assert_eq!(written.len(), 4);
        assert_eq!(written[0], dir.path().join("projects"));
        assert_eq!(
            fs::read(dir.path().join("projects/infra/alerting-profile/profile.yaml")).unwrap(),
            b"config: []"
        );

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(dir.path().join("projects/infra/alerting-profile/profile.json"))
                .unwrap()
                .permissions()
                .mode();
            assert_eq!(mode & 0o777, 0o640);
        }
    }

    #[test]
    fn test_overwrites_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.yaml"), "old and longer content").unwrap();

        let bytes = build_zip(&[("a.yaml", Some("new"))]);
        extract_archive(Cursor::new(bytes), dir.path()).unwrap();
        assert_eq!(fs::read(dir.path().join("a.yaml")).unwrap(), b"new");
    }

    #[test]
    fn test_rejects_zip_slip() {
        let root = tempfile::tempdir().unwrap();
        let dest = root.path().join("a/b");
        fs::create_dir_all(&dest).unwrap();

        let bytes = build_zip(&[
            ("ok.yaml", Some("fine")),
            ("../../etc/passwd", Some("root::0:0")),
        ]);

        let err = extract_archive(Cursor::new(bytes), &dest).unwrap_err();
        assert!(matches!(err, ArchiveError::PathTraversal(_)));
        assert!(err.to_string().contains("illegal file path"));

        // Earlier entries are kept, nothing lands outside dest
        assert!(dest.join("ok.yaml").exists());
        assert!(!root.path().join("etc").exists());
    }

    #[test]
    fn test_not_a_zip() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            extract_archive(Cursor::new(b"plain text".to_vec()), dir.path()),
            Err(ArchiveError::Zip(_))
        ));
    }

    #[test]
    fn test_extract_archive_file() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("monaco.zip");
        fs::write(&archive, build_zip(&[("projects/app/dashboard.yaml", Some("d"))])).unwrap();

        let written = extract_archive_file(&archive, dir.path()).unwrap();
        assert_eq!(written, vec![dir.path().join("projects/app/dashboard.yaml")]);
    }
}
