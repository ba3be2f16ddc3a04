//! Rooted access to host kernel interfaces
//!
//! All sysfs, procfs and `/etc` reads and writes go through [`Host`], which
//! maps absolute host paths under a configurable root. Agents running in a
//! container mount the host at `/host`; tests point the root at a temporary
//! tree. Every write is counted so idempotence is observable.

use crate::error::{IoResultExt, Result, TuneError};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Handle to the host filesystem namespace
#[derive(Debug)]
pub struct Host {
    /// Root under which absolute host paths are resolved
    root: PathBuf,
    /// Number of mutating operations performed
    writes: AtomicUsize,
}

impl Default for Host {
    fn default() -> Self {
        Self::system()
    }
}

impl Host {
    /// Host rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            writes: AtomicUsize::new(0),
        }
    }

    /// Host rooted at `/`
    pub fn system() -> Self {
        Self::new("/")
    }

    /// The configured root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether this handle addresses the live system directly
    ///
    /// Subprocess-backed tools only see the real root, so they are only
    /// used when this holds.
    pub fn is_system_root(&self) -> bool {
        self.root == Path::new("/")
    }

    /// Map an absolute host path to a path under the root
    pub fn path(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        let relative = path.strip_prefix("/").unwrap_or(path);
        self.root.join(relative)
    }

    /// Whether a host path exists
    pub fn exists(&self, path: impl AsRef<Path>) -> bool {
        self.path(path).exists()
    }

    /// Read a host file, trimmed
    pub fn read(&self, path: impl AsRef<Path>) -> Result<String> {
        let full = self.path(path);
        std::fs::read_to_string(&full)
            .map(|s| s.trim().to_string())
            .with_path(full)
    }

    /// Read a host file, `None` on any error
    pub fn read_opt(&self, path: impl AsRef<Path>) -> Option<String> {
        self.read(path).ok()
    }

    /// Read a kernel interface file
    ///
    /// A missing file means the kernel does not expose this interface and
    /// is reported as [`TuneError::Unsupported`].
    pub fn read_interface(&self, path: impl AsRef<Path>) -> Result<String> {
        let path = path.as_ref();
        if !self.exists(path) {
            return Err(TuneError::unsupported(format!(
                "{} is not present",
                path.display()
            )));
        }
        self.read(path)
    }

    /// Write a value to a host file
    pub fn write(&self, path: impl AsRef<Path>, value: &str) -> Result<()> {
        let full = self.path(path);
        self.writes.fetch_add(1, Ordering::SeqCst);
        tracing::debug!("write {} <- {:?}", full.display(), value);
        std::fs::write(&full, value).map_err(|e| match e.kind() {
            std::io::ErrorKind::PermissionDenied => TuneError::PermissionDenied(full.clone()),
            _ => TuneError::io(full.clone(), e),
        })
    }

    /// Replace a regular file atomically, creating parent directories
    pub fn write_file_atomic(&self, path: impl AsRef<Path>, contents: &str) -> Result<()> {
        let full = self.path(path);
        self.writes.fetch_add(1, Ordering::SeqCst);
        write_atomic(&full, contents)
    }

    /// Create a directory and its parents
    pub fn create_dir_all(&self, path: impl AsRef<Path>) -> Result<()> {
        let full = self.path(path);
        if full.is_dir() {
            return Ok(());
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        std::fs::create_dir_all(&full).with_path(full)
    }

    /// Set the permission bits of a host file
    #[cfg(unix)]
    pub fn set_mode(&self, path: impl AsRef<Path>, mode: u32) -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let full = self.path(path);
        self.writes.fetch_add(1, Ordering::SeqCst);
        std::fs::set_permissions(&full, std::fs::Permissions::from_mode(mode)).with_path(full)
    }

    /// Open a host file for writing without truncating, creating parents
    pub fn open_for_write(&self, path: impl AsRef<Path>) -> Result<std::fs::File> {
        let full = self.path(path);
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent).with_path(parent)?;
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&full)
            .with_path(full)
    }

    /// Sorted entry names of a host directory
    pub fn list_dir(&self, path: impl AsRef<Path>) -> Result<Vec<String>> {
        let full = self.path(path);
        let mut names: Vec<String> = std::fs::read_dir(&full)
            .with_path(&full)?
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        Ok(names)
    }

    /// Resolve all symlinks of a host path, returning the final component
    pub fn resolve_name(&self, path: impl AsRef<Path>) -> Result<String> {
        let full = self.path(path);
        let canonical = std::fs::canonicalize(&full).with_path(&full)?;
        canonical
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| TuneError::not_found(format!("{} has no file name", full.display())))
    }

    /// Read a sysctl by dotted name (`vm.swappiness`)
    pub fn sysctl(&self, name: &str) -> Result<String> {
        self.read_interface(sysctl_path(name))
    }

    /// Write a sysctl by dotted name
    pub fn set_sysctl(&self, name: &str, value: &str) -> Result<()> {
        tracing::info!("sysctl {} = {}", name, value);
        self.write(sysctl_path(name), value)
    }

    /// Number of mutating operations performed through this handle
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

/// Procfs path of a dotted sysctl name
pub fn sysctl_path(name: &str) -> PathBuf {
    PathBuf::from(format!("/proc/sys/{}", name.replace('.', "/")))
}

/// Write a file through a temporary sibling and rename it into place
pub fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).with_path(parent)?;
    }
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{}.tmp", file_name));
    std::fs::write(&tmp, contents).with_path(&tmp)?;
    std::fs::rename(&tmp, path).with_path(path)
}

/// Extract the bracketed selection from a sysfs choice list
///
/// `"always madvise [never]"` yields `"never"`; a value without brackets is
/// returned as-is.
pub fn selected_choice(content: &str) -> &str {
    content
        .split_whitespace()
        .find(|part| part.starts_with('[') && part.ends_with(']'))
        .map(|part| &part[1..part.len() - 1])
        .unwrap_or_else(|| content.trim())
}

/// All choices of a sysfs choice list, brackets removed
pub fn available_choices(content: &str) -> Vec<&str> {
    content
        .split_whitespace()
        .map(|part| part.trim_start_matches('[').trim_end_matches(']'))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_rooted_paths() {
        let host = Host::new("/host");
        assert_eq!(
            host.path("/proc/sys/vm/swappiness"),
            PathBuf::from("/host/proc/sys/vm/swappiness")
        );
        assert!(!host.is_system_root());
        assert!(Host::system().is_system_root());
    }

    #[test]
    fn test_sysctl_round_trip_counts_writes() {
        let dir = TempDir::new().unwrap();
        let host = Host::new(dir.path());
        std::fs::create_dir_all(dir.path().join("proc/sys/vm")).unwrap();
        std::fs::write(dir.path().join("proc/sys/vm/swappiness"), "60\n").unwrap();

        assert_eq!(host.sysctl("vm.swappiness").unwrap(), "60");
        host.set_sysctl("vm.swappiness", "1").unwrap();
        assert_eq!(host.sysctl("vm.swappiness").unwrap(), "1");
        assert_eq!(host.writes(), 1);
    }

    #[test]
    fn test_missing_interface_is_unsupported() {
        let dir = TempDir::new().unwrap();
        let host = Host::new(dir.path());
        let err = host.sysctl("fs.aio-max-nr").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Unsupported);
    }

    #[test]
    fn test_choice_parsing() {
        assert_eq!(selected_choice("always madvise [never]"), "never");
        assert_eq!(selected_choice("[none] mq-deadline kyber"), "none");
        assert_eq!(selected_choice("tsc"), "tsc");
        assert_eq!(
            available_choices("[mq-deadline] kyber none"),
            vec!["mq-deadline", "kyber", "none"]
        );
    }
}
