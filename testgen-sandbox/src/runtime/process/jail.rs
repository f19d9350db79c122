//! Private mount tree for sandboxed processes
//!
//! [`Jail::prepare`] runs in the parent and resolves every path, flag and
//! mount point up front. [`Jail::enter`] runs in the forked child, inside a
//! fresh user + mount namespace, and only issues syscalls on that data.
//!
//! The child ends up with a read-only tmpfs root holding read-only binds of
//! the configured system directories, a handful of device nodes, empty tmpfs
//! scratch dirs, and the workspace bound read-write at its host path. `/proc`
//! is left out, so host processes stay invisible.

use std::ffi::{CStr, CString};
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::{Component, Path, PathBuf};

use crate::error::SandboxError;

const DEVICES: &[&str] = &[
    "/dev/null",
    "/dev/zero",
    "/dev/full",
    "/dev/random",
    "/dev/urandom",
];
const SCRATCH_DIRS: &[&str] = &["/tmp", "/var/tmp", "/dev/shm"];
const MOUNTINFO: &str = "/proc/self/mountinfo";

const ROOT_OPTIONS: &CStr = c"mode=0755";
const SCRATCH_OPTIONS: &CStr = c"mode=1777,size=64m";

// Not exported for every libc target.
const ST_RELATIME: libc::c_ulong = 4096;

/// Host directory shown read-only inside the jail
#[derive(Debug)]
struct Bind {
    source: CString,
    target: CString,
    /// Directories to create under the jail root, outermost first
    dirs: Vec<CString>,
    is_dir: bool,
    /// Locked flags that a read-only remount has to keep
    flags: libc::c_ulong,
    /// Nested host mounts, already bound by `MS_REC`, that need their own
    /// read-only remount
    submounts: Vec<(CString, libc::c_ulong)>,
}

/// Host symlink recreated inside the jail, e.g. `/bin -> usr/bin`
#[derive(Debug)]
struct Link {
    contents: CString,
    path: CString,
    dirs: Vec<CString>,
}

#[derive(Debug)]
struct Device {
    source: CString,
    target: CString,
}

#[derive(Debug)]
struct Scratch {
    target: CString,
    dirs: Vec<CString>,
}

#[derive(Debug)]
pub(super) struct Jail {
    root: CString,
    binds: Vec<Bind>,
    links: Vec<Link>,
    devices: Vec<Device>,
    device_dirs: Vec<CString>,
    scratch: Vec<Scratch>,
    workspace: Bind,
    workdir: CString,
}

impl Jail {
    /// Resolve the mount plan for a run in `workdir`, built under the empty
    /// directory `root`.
    ///
    /// `program` is looked up on `search_path` the way `execvp` will; when it
    /// lives outside every read-only path, its install prefix is added.
    pub(super) fn prepare(
        root: &Path,
        workdir: &Path,
        readonly_paths: &[PathBuf],
        program: &str,
        search_path: &str,
    ) -> Result<Self, SandboxError> {
        let mut wanted: Vec<PathBuf> = readonly_paths.to_vec();
        for prefix in program_prefixes(program, search_path) {
            if !wanted.iter().any(|path| prefix.starts_with(path)) {
                tracing::debug!(prefix = %prefix.display(), "Exposing interpreter prefix read-only");
                wanted.push(prefix);
            }
        }
        wanted.sort_by_key(|path| path.components().count());

        let mounts = host_mounts();
        let mut covered: Vec<PathBuf> = Vec::new();
        let mut binds = Vec::new();
        let mut links = Vec::new();
        for path in wanted {
            if covered.iter().any(|done| path.starts_with(done)) {
                continue;
            }
            let Ok(meta) = std::fs::symlink_metadata(&path) else {
                continue;
            };
            if meta.file_type().is_symlink() {
                let contents = std::fs::read_link(&path).map_err(SandboxError::Workspace)?;
                links.push(Link {
                    contents: cstring(&contents)?,
                    path: cstring(&jailed(root, &path))?,
                    dirs: parent_dirs(root, &path)?,
                });
            } else {
                let source = std::fs::canonicalize(&path).map_err(SandboxError::Workspace)?;
                binds.push(readonly_bind(root, &path, &source, &mounts)?);
            }
            covered.push(path);
        }

        let mut devices = Vec::new();
        for device in DEVICES {
            let device = Path::new(device);
            if device.exists() {
                devices.push(Device {
                    source: cstring(device)?,
                    target: cstring(&jailed(root, device))?,
                });
            }
        }

        let scratch = SCRATCH_DIRS
            .iter()
            .map(|dir| {
                let dir = Path::new(dir);
                Ok(Scratch {
                    target: cstring(&jailed(root, dir))?,
                    dirs: dirs_to(root, dir)?,
                })
            })
            .collect::<Result<Vec<_>, SandboxError>>()?;

        let workspace = Bind {
            source: cstring(workdir)?,
            target: cstring(&jailed(root, workdir))?,
            dirs: dirs_to(root, workdir)?,
            is_dir: true,
            flags: 0,
            submounts: Vec::new(),
        };

        Ok(Self {
            root: cstring(root)?,
            binds,
            links,
            devices,
            device_dirs: dirs_to(root, Path::new("/dev"))?,
            scratch,
            workspace,
            workdir: cstring(workdir)?,
        })
    }

    /// Build the mount tree and switch into it.
    ///
    /// Must run in a child that owns a fresh mount namespace (and the user
    /// namespace that grants it the capabilities). Only async-signal-safe
    /// syscalls, no allocation.
    pub(super) fn enter(&self) -> io::Result<()> {
        mount(None, c"/", None, libc::MS_REC | libc::MS_PRIVATE, None)?;
        mount(
            Some(c"tmpfs"),
            &self.root,
            Some(c"tmpfs"),
            libc::MS_NOSUID,
            Some(ROOT_OPTIONS),
        )?;

        for bind in &self.binds {
            make_dirs(&bind.dirs)?;
            if !bind.is_dir {
                touch(&bind.target)?;
            }
            mount(
                Some(bind.source.as_c_str()),
                &bind.target,
                None,
                libc::MS_BIND | libc::MS_REC,
                None,
            )?;
            remount_readonly(&bind.target, bind.flags)?;
            for (submount, flags) in &bind.submounts {
                // Unreadable mount points (autofs and similar) stay as bound.
                let _ = remount_readonly(submount, *flags);
            }
        }

        for link in &self.links {
            make_dirs(&link.dirs)?;
            // SAFETY: both paths are NUL-terminated and outlive the call.
            let rc = unsafe { libc::symlink(link.contents.as_ptr(), link.path.as_ptr()) };
            if rc != 0 && errno() != libc::EEXIST {
                return Err(io::Error::last_os_error());
            }
        }

        make_dirs(&self.device_dirs)?;
        for device in &self.devices {
            touch(&device.target)?;
            mount(Some(device.source.as_c_str()), &device.target, None, libc::MS_BIND, None)?;
        }

        for scratch in &self.scratch {
            if make_dirs(&scratch.dirs).is_err() {
                continue;
            }
            mount(
                Some(c"tmpfs"),
                &scratch.target,
                Some(c"tmpfs"),
                libc::MS_NOSUID | libc::MS_NODEV,
                Some(SCRATCH_OPTIONS),
            )?;
        }

        make_dirs(&self.workspace.dirs)?;
        mount(
            Some(self.workspace.source.as_c_str()),
            &self.workspace.target,
            None,
            libc::MS_BIND | libc::MS_REC,
            None,
        )?;

        chdir(&self.root)?;
        // SAFETY: pivot_root with "." for both arguments stacks the old root
        // under the new one; it is detached right after.
        let rc = unsafe { libc::syscall(libc::SYS_pivot_root, c".".as_ptr(), c".".as_ptr()) };
        check(rc as libc::c_int)?;
        // SAFETY: NUL-terminated literal.
        check(unsafe { libc::umount2(c".".as_ptr(), libc::MNT_DETACH) })?;

        remount_readonly(c"/", libc::MS_NOSUID)?;
        chdir(&self.workdir)
    }
}

/// Install prefixes of `program` as resolved on `search_path`, following
/// symlinks: `/opt/py/bin/python3` gives `/opt/py`. A `bin` directory right
/// under the home directory stays `~/bin`.
fn program_prefixes(program: &str, search_path: &str) -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let found = if program.contains('/') {
        Some(PathBuf::from(program))
    } else {
        search_path
            .split(':')
            .filter(|dir| !dir.is_empty())
            .map(|dir| Path::new(dir).join(program))
            .find(|candidate| candidate.is_file())
    };
    let Some(found) = found else {
        return Vec::new();
    };

    let mut prefixes = Vec::new();
    let canonical = std::fs::canonicalize(&found).ok();
    for path in std::iter::once(found).chain(canonical) {
        if !path.is_absolute() {
            continue;
        }
        let Some(dir) = path.parent() else {
            continue;
        };
        let prefix = match (dir.file_name(), dir.parent()) {
            (Some(name), Some(parent))
                if name == "bin"
                    && parent != Path::new("/")
                    && home.as_deref() != Some(parent) =>
            {
                parent
            }
            _ => dir,
        };
        if prefix != Path::new("/") && !prefixes.iter().any(|p: &PathBuf| p == prefix) {
            prefixes.push(prefix.to_path_buf());
        }
    }
    prefixes
}

fn readonly_bind(
    root: &Path,
    path: &Path,
    source: &Path,
    mounts: &[PathBuf],
) -> Result<Bind, SandboxError> {
    let is_dir = source.is_dir();
    let source_c = cstring(source)?;
    let flags = mount_flags(&source_c).map_err(SandboxError::Workspace)?;

    let mut submounts = Vec::new();
    for point in mounts {
        let Ok(rest) = point.strip_prefix(source) else {
            continue;
        };
        if rest.as_os_str().is_empty() {
            continue;
        }
        let Ok(flags) = mount_flags(&cstring(point)?) else {
            continue;
        };
        submounts.push((cstring(&jailed(root, &path.join(rest)))?, flags));
    }

    Ok(Bind {
        source: source_c,
        target: cstring(&jailed(root, path))?,
        dirs: if is_dir {
            dirs_to(root, path)?
        } else {
            parent_dirs(root, path)?
        },
        is_dir,
        flags,
        submounts,
    })
}

/// Mount points of the calling process, in mount order
fn host_mounts() -> Vec<PathBuf> {
    let Ok(info) = std::fs::read_to_string(MOUNTINFO) else {
        return Vec::new();
    };
    info.lines()
        .filter_map(|line| line.split(' ').nth(4))
        .map(|field| PathBuf::from(unescape_mount_path(field)))
        .collect()
}

/// Undo the `\ooo` octal escapes mountinfo uses for space, tab, newline and
/// backslash
fn unescape_mount_path(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\'
            && i + 3 < bytes.len()
            && bytes[i + 1..i + 4].iter().all(|b| (b'0'..=b'7').contains(b))
        {
            let value = bytes[i + 1..i + 4]
                .iter()
                .fold(0u32, |acc, b| acc * 8 + u32::from(b - b'0'));
            if let Ok(byte) = u8::try_from(value) {
                out.push(byte);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn mount_flags(path: &CStr) -> io::Result<libc::c_ulong> {
    // SAFETY: statvfs fills a zeroed, stack-allocated struct.
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    if unsafe { libc::statvfs(path.as_ptr(), &mut stat) } != 0 {
        return Err(io::Error::last_os_error());
    }
    let host = stat.f_flag as libc::c_ulong;
    let mut flags = libc::MS_NOSUID;
    for (st, ms) in [
        (libc::ST_NODEV, libc::MS_NODEV),
        (libc::ST_NOEXEC, libc::MS_NOEXEC),
        (libc::ST_NOATIME, libc::MS_NOATIME),
        (libc::ST_NODIRATIME, libc::MS_NODIRATIME),
        (ST_RELATIME, libc::MS_RELATIME),
    ] {
        if host & st as libc::c_ulong != 0 {
            flags |= ms;
        }
    }
    Ok(flags)
}

/// `path` as seen from the host before the pivot
fn jailed(root: &Path, path: &Path) -> PathBuf {
    let relative: PathBuf = path
        .components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .collect();
    root.join(relative)
}

/// Every directory from just under `root` down to `path` itself
fn dirs_to(root: &Path, path: &Path) -> Result<Vec<CString>, SandboxError> {
    let mut current = root.to_path_buf();
    let mut dirs = Vec::new();
    for component in path.components() {
        if let Component::Normal(name) = component {
            current.push(name);
            dirs.push(cstring(&current)?);
        }
    }
    Ok(dirs)
}

fn parent_dirs(root: &Path, path: &Path) -> Result<Vec<CString>, SandboxError> {
    match path.parent() {
        Some(parent) => dirs_to(root, parent),
        None => Ok(Vec::new()),
    }
}

fn cstring(path: &Path) -> Result<CString, SandboxError> {
    CString::new(path.as_os_str().as_bytes()).map_err(|_| {
        SandboxError::Config(format!("path '{}' contains a NUL byte", path.display()))
    })
}

fn make_dirs(dirs: &[CString]) -> io::Result<()> {
    for dir in dirs {
        // SAFETY: NUL-terminated path.
        if unsafe { libc::mkdir(dir.as_ptr(), 0o755) } != 0 && errno() != libc::EEXIST {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

fn touch(path: &CStr) -> io::Result<()> {
    // SAFETY: NUL-terminated path; the descriptor is closed right away.
    unsafe {
        let fd = libc::open(
            path.as_ptr(),
            libc::O_CREAT | libc::O_WRONLY | libc::O_CLOEXEC,
            0o644 as libc::c_uint,
        );
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        libc::close(fd);
    }
    Ok(())
}

fn mount(
    source: Option<&CStr>,
    target: &CStr,
    fstype: Option<&CStr>,
    flags: libc::c_ulong,
    data: Option<&CStr>,
) -> io::Result<()> {
    let ptr = |value: Option<&CStr>| value.map_or(std::ptr::null(), CStr::as_ptr);
    // SAFETY: every pointer is either null or a NUL-terminated string that
    // outlives the call.
    check(unsafe {
        libc::mount(
            ptr(source),
            target.as_ptr(),
            ptr(fstype),
            flags,
            ptr(data).cast(),
        )
    })
}

fn remount_readonly(target: &CStr, flags: libc::c_ulong) -> io::Result<()> {
    mount(
        None,
        target,
        None,
        libc::MS_REMOUNT | libc::MS_BIND | libc::MS_RDONLY | flags,
        None,
    )
}

fn chdir(path: &CStr) -> io::Result<()> {
    // SAFETY: NUL-terminated path.
    check(unsafe { libc::chdir(path.as_ptr()) })
}

fn check(rc: libc::c_int) -> io::Result<()> {
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

fn errno() -> libc::c_int {
    io::Error::last_os_error().raw_os_error().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unescape_mount_path() {
        assert_eq!(unescape_mount_path("/mnt/my\\040disk"), "/mnt/my disk");
        assert_eq!(unescape_mount_path("/a\\134b"), "/a\\b");
        assert_eq!(unescape_mount_path("/plain"), "/plain");
        assert_eq!(unescape_mount_path("/odd\\04"), "/odd\\04");
    }

    #[test]
    fn test_jailed_paths() {
        let root = Path::new("/tmp/testgen-x/root");
        assert_eq!(
            jailed(root, Path::new("/usr/lib")),
            PathBuf::from("/tmp/testgen-x/root/usr/lib")
        );
        let dirs = dirs_to(root, Path::new("/var/tmp")).unwrap();
        assert_eq!(
            dirs,
            vec![
                CString::new("/tmp/testgen-x/root/var").unwrap(),
                CString::new("/tmp/testgen-x/root/var/tmp").unwrap(),
            ]
        );
    }

    #[test]
    fn test_program_prefix_strips_bin() {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("toolchain").join("bin");
        std::fs::create_dir_all(&bin).unwrap();
        std::fs::write(bin.join("runner"), "").unwrap();

        let search = format!("/nonexistent:{}", bin.display());
        let prefixes = program_prefixes("runner", &search);
        let expected = std::fs::canonicalize(dir.path().join("toolchain")).unwrap();
        assert!(prefixes.contains(&expected), "{:?}", prefixes);
        assert!(program_prefixes("not-installed-anywhere", &search).is_empty());
    }

    #[test]
    fn test_prepare_skips_missing_and_covered_paths() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("root");
        let work = dir.path().join("work");
        let jail = Jail::prepare(
            &root,
            &work,
            &[
                PathBuf::from("/usr"),
                PathBuf::from("/usr/lib"),
                PathBuf::from("/definitely/not/here"),
            ],
            "/usr/bin/env",
            "",
        )
        .unwrap();

        let targets: Vec<_> = jail.binds.iter().map(|b| b.target.clone()).collect();
        assert!(targets.contains(&cstring(&root.join("usr")).unwrap()));
        assert!(!targets.contains(&cstring(&root.join("usr/lib")).unwrap()));
        assert!(!targets.contains(&cstring(&root.join("definitely/not/here")).unwrap()));
        assert_eq!(jail.workspace.target, cstring(&jailed(&root, &work)).unwrap());
        assert_eq!(jail.scratch.len(), SCRATCH_DIRS.len());
    }
}
