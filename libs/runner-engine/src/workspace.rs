/// Workspace Manager
///
/// One request owns exactly one workspace: a uniquely named temporary file holding
/// the submitted source. The file is written and closed before the sandbox sees it
/// and is removed when the workspace is released or dropped, whichever comes first.
/// Drop covers the early-return, deadline and panic paths.

use crate::error::WorkspaceError;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::TempPath;
use tracing::{debug, warn};
use uuid::Uuid;

const FILE_PREFIX: &str = "usercode-";

#[derive(Debug)]
pub struct Workspace {
    path: TempPath,
    owner_request_id: Uuid,
}

impl Workspace {
    /// Create `usercode-<random>.<extension>` in `scratch_dir` holding `contents`
    pub fn acquire(
        scratch_dir: &Path,
        extension: &str,
        contents: &[u8],
        owner_request_id: Uuid,
    ) -> Result<Self, WorkspaceError> {
        let suffix = format!(".{}", extension);
        let mut file = tempfile::Builder::new()
            .prefix(FILE_PREFIX)
            .suffix(&suffix)
            .tempfile_in(scratch_dir)
            .map_err(|source| WorkspaceError::Create {
                dir: scratch_dir.to_path_buf(),
                source,
            })?;

        let write_err = |path: &Path, source| WorkspaceError::Write {
            path: path.to_path_buf(),
            source,
        };

        // On error the NamedTempFile drops here and removes itself
        file.write_all(contents)
            .and_then(|_| file.flush())
            .map_err(|e| write_err(file.path(), e))?;

        // Closes our handle; the sandbox is the next reader
        let path = file.into_temp_path();
        make_readable(&path).map_err(|e| write_err(&path, e))?;

        debug!(
            request_id = %owner_request_id,
            path = %path.display(),
            bytes = contents.len(),
            "Workspace acquired"
        );

        Ok(Self {
            path,
            owner_request_id,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn owner_request_id(&self) -> Uuid {
        self.owner_request_id
    }

    /// Remove the file now and report failures. Consumes the workspace, so it can
    /// only happen once; dropping without calling this removes the file silently.
    pub fn release(self) -> std::io::Result<()> {
        let request_id = self.owner_request_id;
        let path: PathBuf = self.path.to_path_buf();
        match self.path.close() {
            Ok(()) => {
                debug!(request_id = %request_id, path = %path.display(), "Workspace released");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                warn!(request_id = %request_id, path = %path.display(), error = %e, "Failed to remove workspace");
                Err(e)
            }
        }
    }
}

/// The container user is not necessarily the host user that created the file
#[cfg(unix)]
fn make_readable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o644))
}

#[cfg(not(unix))]
fn make_readable(_path: &Path) -> std::io::Result<()> {
    Ok(())
}
