//! Local vs. network filesystem detection
//!
//! WAL journaling relies on shared-memory locking that network filesystems
//! do not implement reliably, so the store needs to know where it lives.
//! Detection is a heuristic. Only well-known network filesystem type strings,
//! UNC paths and drive letters Windows reports as remote count as network.
//! Every inspection failure resolves to `Local`.
//! Layouts it misses can force `journal_mode: delete` in config.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Filesystem types reported by mount tables that are treated as network-backed.
/// Matched case-sensitively. Linux reports sshfs as `fuse.sshfs`.
pub const NETWORK_FS_TYPES: &[&str] = &[
    "nfs",
    "nfs4",
    "cifs",
    "smbfs",
    "smb3",
    "sshfs-fuse",
    "fuse.sshfs",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FsKind {
    Local,
    Network,
}

impl FsKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FsKind::Local => "local",
            FsKind::Network => "network",
        }
    }
}

/// Classifies the mount a directory resides on.
pub trait FilesystemClassifier: Send + Sync {
    /// Never fails: anything that cannot be inspected is `Local`.
    fn classify(&self, dir: &Path) -> FsKind;
}

/// Always returns the same verdict.
#[derive(Debug, Clone, Copy)]
pub struct FixedClassifier(pub FsKind);

impl FilesystemClassifier for FixedClassifier {
    fn classify(&self, _dir: &Path) -> FsKind {
        self.0
    }
}

/// Reads a Linux-style mount table (`/proc/self/mounts` format).
#[derive(Debug, Clone)]
pub struct MountTableClassifier {
    tables: Vec<PathBuf>,
}

impl MountTableClassifier {
    /// Reads the first mount table in `tables` that can be opened.
    pub fn new(tables: Vec<PathBuf>) -> Self {
        Self { tables }
    }

    fn read_table(&self) -> Option<String> {
        for table in &self.tables {
            match fs::read_to_string(table) {
                Ok(content) => return Some(content),
                Err(e) => debug!("Cannot read mount table {:?}: {}", table, e),
            }
        }
        None
    }
}

impl Default for MountTableClassifier {
    fn default() -> Self {
        Self::new(vec![
            PathBuf::from("/proc/self/mounts"),
            PathBuf::from("/proc/mounts"),
        ])
    }
}

impl FilesystemClassifier for MountTableClassifier {
    fn classify(&self, dir: &Path) -> FsKind {
        let canonical = match dir.canonicalize() {
            Ok(p) => p,
            Err(e) => {
                warn!("Cannot resolve {:?} for filesystem detection, assuming local: {}", dir, e);
                return FsKind::Local;
            }
        };

        let Some(table) = self.read_table() else {
            debug!("No mount table available, assuming {:?} is local", canonical);
            return FsKind::Local;
        };

        let mounts = parse_mount_table(&table);
        match containing_mount(&mounts, &canonical) {
            Some(mount) if is_network_fs_type(&mount.fs_type) => {
                debug!(
                    "{:?} is on {} mount {:?}",
                    canonical, mount.fs_type, mount.mount_point
                );
                FsKind::Network
            }
            _ => FsKind::Local,
        }
    }
}

/// Recognises UNC paths, including the verbatim `\\?\UNC\` form produced
/// by canonicalization, and drive letters mapped to a network share.
#[derive(Debug, Clone, Copy, Default)]
pub struct WindowsPathClassifier;

impl FilesystemClassifier for WindowsPathClassifier {
    fn classify(&self, dir: &Path) -> FsKind {
        let resolved = dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf());
        let resolved = resolved.to_string_lossy();
        if is_unc_path(&resolved) {
            return FsKind::Network;
        }
        match drive_root(&resolved) {
            Some(root) if is_remote_drive(&root) => {
                debug!("{:?} is on mapped network drive {}", dir, root);
                FsKind::Network
            }
            _ => FsKind::Local,
        }
    }
}

/// The classifier for the host platform.
pub fn platform_classifier() -> Box<dyn FilesystemClassifier> {
    if cfg!(windows) {
        Box::new(WindowsPathClassifier)
    } else {
        Box::new(MountTableClassifier::default())
    }
}

/// Classify `dir` with the host platform's classifier.
pub fn classify(dir: &Path) -> FsKind {
    platform_classifier().classify(dir)
}

pub fn is_network_fs_type(fs_type: &str) -> bool {
    NETWORK_FS_TYPES.contains(&fs_type)
}

pub fn is_unc_path(path: &str) -> bool {
    if let Some(rest) = path.strip_prefix(r"\\?\") {
        // Verbatim paths: `\\?\C:\...` is local, `\\?\UNC\server\share` is not.
        return rest.starts_with(r"UNC\");
    }
    path.starts_with(r"\\") || path.starts_with("//")
}

/// Root (`X:\`) of the drive `path` is on, verbatim prefix allowed.
pub fn drive_root(path: &str) -> Option<String> {
    let rest = path.strip_prefix(r"\\?\").unwrap_or(path);
    let mut chars = rest.chars();
    match (chars.next(), chars.next()) {
        (Some(letter), Some(':')) if letter.is_ascii_alphabetic() => {
            Some(format!("{}:\\", letter.to_ascii_uppercase()))
        }
        _ => None,
    }
}

#[cfg(windows)]
fn is_remote_drive(root: &str) -> bool {
    use windows_sys::Win32::Storage::FileSystem::GetDriveTypeW;

    const DRIVE_REMOTE: u32 = 4;
    let wide: Vec<u16> = root.encode_utf16().chain(std::iter::once(0)).collect();
    // SAFETY: `wide` is NUL-terminated and outlives the call.
    unsafe { GetDriveTypeW(wide.as_ptr()) == DRIVE_REMOTE }
}

#[cfg(not(windows))]
fn is_remote_drive(_root: &str) -> bool {
    false
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub mount_point: PathBuf,
    pub fs_type: String,
}

/// Parse `device mount_point fs_type options ...` lines. Malformed lines are skipped.
pub fn parse_mount_table(content: &str) -> Vec<MountEntry> {
    content
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let _device = fields.next()?;
            let mount_point = fields.next()?;
            let fs_type = fields.next()?;
            Some(MountEntry {
                mount_point: PathBuf::from(unescape_mount_field(mount_point)),
                fs_type: fs_type.to_string(),
            })
        })
        .collect()
}

/// The mount with the longest component-wise prefix of `path`.
/// On ties the later entry wins, since later mounts shadow earlier ones.
pub fn containing_mount<'a>(mounts: &'a [MountEntry], path: &Path) -> Option<&'a MountEntry> {
    mounts
        .iter()
        .filter(|m| path.starts_with(&m.mount_point))
        .max_by_key(|m| m.mount_point.components().count())
}

/// Decode the octal escapes (`\040` space, `\011` tab, `\012` newline, `\134`
/// backslash) the kernel uses in mount table fields.
fn unescape_mount_field(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() && is_octal_escape(&bytes[i + 1..i + 4]) {
            let value = bytes[i + 1..i + 4]
                .iter()
                .fold(0u32, |acc, b| acc * 8 + (b - b'0') as u32);
            out.push(value as u8);
            i += 4;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn is_octal_escape(digits: &[u8]) -> bool {
    digits.len() == 3
        && digits.iter().all(|b| (b'0'..=b'7').contains(b))
        && digits[0] <= b'3'
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const TABLE: &str = "\
sysfs /sys sysfs rw,nosuid 0 0
/dev/sda1 / ext4 rw,relatime 0 0
server:/export /mnt/data nfs4 rw,vers=4.2 0 0
//nas/share /mnt/smb cifs rw 0 0
user@host:/home /mnt/remote\\040home fuse.sshfs rw 0 0
/dev/sdb1 /mnt/data/scratch xfs rw 0 0
garbage
";

    #[test]
    fn parses_entries_and_skips_malformed_lines() {
        let mounts = parse_mount_table(TABLE);
        assert_eq!(mounts.len(), 6);
        assert_eq!(mounts[2].fs_type, "nfs4");
        assert_eq!(mounts[4].mount_point, PathBuf::from("/mnt/remote home"));
    }

    #[test]
    fn longest_component_prefix_wins() {
        let mounts = parse_mount_table(TABLE);
        let find = |p: &str| containing_mount(&mounts, Path::new(p)).map(|m| m.fs_type.as_str());
        assert_eq!(find("/mnt/data/project"), Some("nfs4"));
        assert_eq!(find("/mnt/data/scratch/project"), Some("xfs"));
        assert_eq!(find("/mnt/database"), Some("ext4"));
        assert_eq!(find("/mnt/remote home/x"), Some("fuse.sshfs"));
        assert_eq!(find("/home/me"), Some("ext4"));
    }

    #[test]
    fn only_known_network_types_match() {
        for t in ["nfs", "nfs4", "cifs", "smbfs", "sshfs-fuse", "fuse.sshfs"] {
            assert!(is_network_fs_type(t), "{t}");
        }
        for t in ["ext4", "NFS", "tmpfs", "fuse", "overlay", "nfsd"] {
            assert!(!is_network_fs_type(t), "{t}");
        }
    }

    #[test]
    fn unc_detection() {
        assert!(is_unc_path(r"\\server\share\project"));
        assert!(is_unc_path(r"\\?\UNC\server\share"));
        assert!(!is_unc_path(r"\\?\C:\Users\me"));
        assert!(!is_unc_path(r"C:\Users\me"));
        assert!(!is_unc_path("/home/me"));
    }

    #[test]
    fn drive_roots() {
        assert_eq!(drive_root(r"Z:\projects\demo").as_deref(), Some(r"Z:\"));
        assert_eq!(drive_root(r"\\?\c:\Users\me").as_deref(), Some(r"C:\"));
        assert_eq!(drive_root("d:").as_deref(), Some(r"D:\"));
        assert_eq!(drive_root(r"\\?\UNC\server\share"), None);
        assert_eq!(drive_root(r"\\server\share"), None);
        assert_eq!(drive_root("/home/me"), None);
        assert_eq!(drive_root("1:"), None);
        assert_eq!(drive_root(""), None);
    }

    #[test]
    fn windows_classifier_flags_unc_paths() {
        let classifier = WindowsPathClassifier;
        assert_eq!(classifier.classify(Path::new(r"\\nas\share\demo")), FsKind::Network);
        let local = tempfile::TempDir::new().unwrap();
        assert_eq!(classifier.classify(local.path()), FsKind::Local);
    }

    #[test]
    fn mount_table_classifier_reads_custom_table() {
        let dir = tempfile::TempDir::new().unwrap();
        let canonical = dir.path().canonicalize().unwrap();
        let mut table = tempfile::NamedTempFile::new().unwrap();
        writeln!(table, "/dev/sda1 / ext4 rw 0 0").unwrap();
        writeln!(table, "srv:/x {} nfs rw 0 0", canonical.display()).unwrap();

        let classifier = MountTableClassifier::new(vec![table.path().to_path_buf()]);
        assert_eq!(classifier.classify(dir.path()), FsKind::Network);
    }

    #[test]
    fn inspection_failures_fail_open_to_local() {
        let dir = tempfile::TempDir::new().unwrap();
        let missing = MountTableClassifier::new(vec![PathBuf::from("/nonexistent/mounts")]);
        assert_eq!(missing.classify(dir.path()), FsKind::Local);
        assert_eq!(
            MountTableClassifier::default().classify(Path::new("/nonexistent/dir/12345")),
            FsKind::Local
        );
    }
}
