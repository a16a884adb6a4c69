//! Filesystem helpers for key and certificate persistence

use std::io;
use std::path::Path;

/// Write `bytes` to `path` through a temporary sibling and an atomic
/// rename, creating parent directories as needed. `mode` is applied on
/// unix before the rename so the final file never exists with open
/// permissions.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8], mode: u32) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = std::path::PathBuf::from(tmp);

    std::fs::write(&tmp, bytes)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(mode))?;
    }
    #[cfg(not(unix))]
    {
        let _ = mode;
    }

    std::fs::rename(&tmp, path)
}
