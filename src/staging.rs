use std::fs;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::error::StagingError;
use crate::language::LanguageProfile;

// Files inside the staging directory are run by an unprivileged user
const STAGED_FILE_PERMISSIONS: u32 = 0o755;

/// Per-request host files. All three are deleted when this is dropped,
/// whichever way the request ends.
#[derive(Debug)]
pub struct StagedFiles {
    pub code: NamedTempFile,
    pub unit_test: NamedTempFile,
    pub output: NamedTempFile,
}

/// Where the staged files ended up inside the shared staging directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxPaths {
    pub code: PathBuf,
    pub unit_test: PathBuf,
    pub assets: Vec<PathBuf>,
}

/// Writes the submission and its unit test verbatim to fresh temporary files
/// and creates an empty output file
pub fn stage(code: &str, unit_test: &str) -> Result<StagedFiles, StagingError> {
    Ok(StagedFiles {
        code: write_temp("run-code", code)?,
        unit_test: write_temp("run-test", unit_test)?,
        output: tempfile::Builder::new()
            .prefix("run-output")
            .tempfile()
            .map_err(StagingError::TempFile)?,
    })
}

fn write_temp(prefix: &str, content: &str) -> Result<NamedTempFile, StagingError> {
    let mut file = tempfile::Builder::new()
        .prefix(prefix)
        .tempfile()
        .map_err(StagingError::TempFile)?;
    file.write_all(content.as_bytes())
        .and_then(|_| file.flush())
        .map_err(StagingError::TempFile)?;
    Ok(file)
}

/// Copies the staged files and the profile's assets into `staging_dir`
/// under the names the profile's commands expect.
///
/// The directory is emptied first so nothing from a previous run is visible.
pub fn materialize(
    profile: &LanguageProfile,
    staged: &StagedFiles,
    staging_dir: &Path,
) -> Result<SandboxPaths, StagingError> {
    clear_directory(staging_dir)?;

    let code = copy_executable(staged.code.path(), &staging_dir.join(&profile.code_file))?;
    let unit_test = copy_executable(
        staged.unit_test.path(),
        &staging_dir.join(&profile.unit_test_file),
    )?;
    let assets = profile
        .assets
        .iter()
        .map(|a| copy_executable(&a.host_path, &staging_dir.join(&a.file_name)))
        .collect::<Result<Vec<_>, _>>()?;

    log::debug!(
        "Staged {} files for {} into {}",
        2 + assets.len(),
        profile.language,
        staging_dir.display()
    );

    Ok(SandboxPaths {
        code,
        unit_test,
        assets,
    })
}

/// Removes everything inside `dir`, creating it if missing. The directory
/// itself is kept because it is bind-mounted into the sandbox.
fn clear_directory(dir: &Path) -> Result<(), StagingError> {
    let dir_error = |source| StagingError::Directory {
        path: dir.to_path_buf(),
        source,
    };

    fs::create_dir_all(dir).map_err(dir_error)?;
    for entry in fs::read_dir(dir).map_err(dir_error)? {
        let path = entry.map_err(dir_error)?.path();
        let removed = if path.is_dir() && !path.is_symlink() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        removed.map_err(|source| StagingError::Directory {
            path: path.clone(),
            source,
        })?;
    }
    Ok(())
}

fn copy_executable(from: &Path, to: &Path) -> Result<PathBuf, StagingError> {
    fs::copy(from, to).map_err(|source| StagingError::Copy {
        from: from.to_path_buf(),
        to: to.to_path_buf(),
        source,
    })?;
    fs::set_permissions(to, fs::Permissions::from_mode(STAGED_FILE_PERMISSIONS)).map_err(
        |source| StagingError::Chmod {
            path: to.to_path_buf(),
            source,
        },
    )?;
    Ok(to.to_path_buf())
}
