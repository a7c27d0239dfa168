// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Path resolution utilities.
//!
//! Determine where oxitree expects its own settings, and where OSTree keeps
//! deployments on disk.

use std::path::{Path, PathBuf};

/// Default absolute path to settings file.
///
/// Oxitree manages the whole operating system, so its settings live with the
/// rest of the system configuration instead of a user's home directory. Does
/// not check if the path returned actually exists.
pub fn default_settings_path() -> PathBuf {
    PathBuf::from("/etc/oxitree/config.toml")
}

/// Absolute path to a deployment's root filesystem.
///
/// OSTree lays deployments out as
/// `$sysroot/ostree/deploy/$stateroot/deploy/$checksum.$serial`.
pub fn deployment_root(
    sysroot: impl AsRef<Path>,
    stateroot: impl AsRef<Path>,
    dir_name: impl AsRef<Path>,
) -> PathBuf {
    sysroot
        .as_ref()
        .join("ostree")
        .join("deploy")
        .join(stateroot)
        .join("deploy")
        .join(dir_name)
}

/// Resolve `path` against `base` unless it is already absolute.
pub fn resolve_under(base: impl AsRef<Path>, path: impl AsRef<Path>) -> PathBuf {
    let path = path.as_ref();
    if path.is_absolute() {
        return path.to_path_buf();
    }

    base.as_ref().join(path)
}

/// Join a path that may be absolute onto a root directory.
///
/// Leading separators of `path` are stripped first, so the result always stays
/// below `root`.
pub fn join_inside(root: impl AsRef<Path>, path: impl AsRef<Path>) -> PathBuf {
    let path = path.as_ref();
    let relative = path.strip_prefix("/").unwrap_or(path);
    root.as_ref().join(relative)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn deployment_layout() {
        let result = deployment_root("/sysroot", "gentoo", "abc.1");
        assert_eq!(result, PathBuf::from("/sysroot/ostree/deploy/gentoo/deploy/abc.1"));
    }

    #[test]
    fn join_stays_inside_root() {
        let root = "/ostree/deploy/os/deploy/abc.0";
        assert_eq!(
            join_inside(root, "/usr/lib/efi/grubx64.efi"),
            PathBuf::from("/ostree/deploy/os/deploy/abc.0/usr/lib/efi/grubx64.efi")
        );
        assert_eq!(
            join_inside(root, "usr/lib/efi"),
            PathBuf::from("/ostree/deploy/os/deploy/abc.0/usr/lib/efi")
        );
    }

    #[test]
    fn resolve_relative_certificate() {
        assert_eq!(
            resolve_under("/boot/efi", "db.crt"),
            PathBuf::from("/boot/efi/db.crt")
        );
        assert_eq!(
            resolve_under("/boot/efi", "/etc/keys/db.crt"),
            PathBuf::from("/etc/keys/db.crt")
        );
    }
}
