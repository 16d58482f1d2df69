use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Shell metadata file that lives in synced folders and is never a report.
pub const SHELL_ARTIFACT: &str = "desktop.ini";

/// Most recently modified regular file in `dir`, skipping the shell artifact.
pub fn latest_download(dir: &Path) -> Result<Option<PathBuf>> {
    let mut latest: Option<(SystemTime, PathBuf)> = None;

    for entry in fs::read_dir(dir).with_context(|| format!("Cannot list {}", dir.display()))? {
        let entry = entry?;
        if entry.file_name().to_string_lossy().eq_ignore_ascii_case(SHELL_ARTIFACT) {
            continue;
        }
        let metadata = entry.metadata()?;
        if !metadata.is_file() {
            continue;
        }
        let modified = metadata.modified()?;
        if latest.as_ref().map_or(true, |(newest, _)| modified > *newest) {
            latest = Some((modified, entry.path()));
        }
    }

    Ok(latest.map(|(_, path)| path))
}

/// Rename the newest file in `dir` to `<base_name><extension>`.
///
/// An existing file with the target name is replaced. Returns the final path,
/// or `None` when the directory holds no candidate.
pub fn rename_latest_download(dir: &Path, base_name: &str) -> Result<Option<PathBuf>> {
    let Some(latest) = latest_download(dir)? else {
        return Ok(None);
    };

    let target = match latest.extension() {
        Some(ext) => dir.join(format!("{}.{}", base_name, ext.to_string_lossy())),
        None => dir.join(base_name),
    };

    if latest == target {
        return Ok(Some(target));
    }

    if target.exists() {
        fs::remove_file(&target)
            .with_context(|| format!("Cannot remove previous {}", target.display()))?;
    }

    fs::rename(&latest, &target)
        .with_context(|| format!("Cannot rename {} to {}", latest.display(), target.display()))?;

    Ok(Some(target))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn write_with_mtime(path: &Path, contents: &str, age_secs: u64) {
        fs::write(path, contents).unwrap();
        let mtime = SystemTime::now() - Duration::from_secs(age_secs);
        fs::File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(mtime)
            .unwrap();
    }

    #[test]
    fn test_empty_directory_has_nothing_to_rename() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(rename_latest_download(dir.path(), "MAR2024").unwrap(), None);
    }

    #[test]
    fn test_picks_newest_and_keeps_extension() {
        let dir = tempfile::tempdir().unwrap();
        write_with_mtime(&dir.path().join("old.csv"), "old", 300);
        write_with_mtime(&dir.path().join("relatorio.xlsx"), "new", 10);

        let renamed = rename_latest_download(dir.path(), "MAR2024").unwrap().unwrap();
        assert_eq!(renamed, dir.path().join("MAR2024.xlsx"));
        assert_eq!(fs::read_to_string(&renamed).unwrap(), "new");
        assert!(!dir.path().join("relatorio.xlsx").exists());
        assert!(dir.path().join("old.csv").exists());
    }

    #[test]
    fn test_shell_artifact_and_directories_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        write_with_mtime(&dir.path().join("report.csv"), "data", 60);
        write_with_mtime(&dir.path().join("Desktop.ini"), "[.ShellClassInfo]", 1);
        fs::create_dir(dir.path().join("subdir")).unwrap();

        let renamed = rename_latest_download(dir.path(), "JAN2024").unwrap().unwrap();
        assert_eq!(renamed, dir.path().join("JAN2024.csv"));
        assert!(dir.path().join("Desktop.ini").exists());
    }

    #[test]
    fn test_second_download_replaces_first() {
        let dir = tempfile::tempdir().unwrap();

        let first = dir.path().join("download-1.xlsx");
        write_with_mtime(&first, "first", 120);
        rename_latest_download(dir.path(), "FEB2024").unwrap();
        assert!(!first.exists());

        let second = dir.path().join("download-2.xlsx");
        write_with_mtime(&second, "second", 5);
        let renamed = rename_latest_download(dir.path(), "FEB2024").unwrap().unwrap();

        assert!(!second.exists());
        assert_eq!(fs::read_to_string(&renamed).unwrap(), "second");
        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["FEB2024.xlsx".to_string()]);
    }

    #[test]
    fn test_already_renamed_file_is_left_alone() {
        let dir = tempfile::tempdir().unwrap();
        write_with_mtime(&dir.path().join("MAR2024.xlsx"), "kept", 5);

        let renamed = rename_latest_download(dir.path(), "MAR2024").unwrap().unwrap();
        assert_eq!(renamed, dir.path().join("MAR2024.xlsx"));
        assert_eq!(fs::read_to_string(&renamed).unwrap(), "kept");
    }

    #[test]
    fn test_missing_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(rename_latest_download(&dir.path().join("gone"), "MAR2024").is_err());
    }
}
