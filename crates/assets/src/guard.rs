//! Dangerous-path classification.
//!
//! Every directory this crate creates or writes into passes through
//! [`PathGuard::is_dangerous`] first. Classification is purely lexical: no
//! filesystem access, so it is cheap to call repeatedly.

use std::path::Path;

/// Host OS family whose deny-list applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Linux,
    MacOs,
    Windows,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(windows) {
            Platform::Windows
        } else if cfg!(target_os = "macos") {
            Platform::MacOs
        } else {
            Platform::Linux
        }
    }
}

/// Each entry covers the directory and everything below it.
const LINUX_DENY: &[&str] = &[
    "/bin", "/boot", "/dev", "/etc", "/lib", "/lib64", "/proc", "/root", "/sbin", "/sys", "/tmp",
    "/usr", "/var",
];

const MACOS_DENY: &[&str] = &[
    "/Applications",
    "/Library",
    "/System",
    "/bin",
    "/etc",
    "/private",
    "/sbin",
    "/usr",
    "/var",
];

const WINDOWS_DENY: &[&str] = &[
    "c:/windows",
    "c:/windows/system32",
    "c:/program files",
    "c:/program files (x86)",
];

/// OS-specific classifier for forbidden directories.
#[derive(Debug, Clone, Copy)]
pub struct PathGuard {
    platform: Platform,
    deny: &'static [&'static str],
}

impl Default for PathGuard {
    fn default() -> Self {
        Self::current()
    }
}

impl PathGuard {
    pub fn current() -> Self {
        Self::for_platform(Platform::current())
    }

    pub fn for_platform(platform: Platform) -> Self {
        let deny = match platform {
            Platform::Linux => LINUX_DENY,
            Platform::MacOs => MACOS_DENY,
            Platform::Windows => WINDOWS_DENY,
        };
        Self { platform, deny }
    }

    /// Replace the platform table. Entries are matched in the platform's
    /// normalized form; system roots stay dangerous regardless.
    pub fn with_deny_list(mut self, deny: &'static [&'static str]) -> Self {
        self.deny = deny;
        self
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// True for system roots and for anything matching the deny-list.
    pub fn is_dangerous(&self, path: &Path) -> bool {
        self.is_dangerous_str(&path.to_string_lossy())
    }

    /// True when the path has no meaningful parent (`/`, `C:\`).
    pub fn is_system_root(&self, path: &Path) -> bool {
        self.is_system_root_str(&path.to_string_lossy())
    }

    pub fn is_dangerous_str(&self, path: &str) -> bool {
        let norm = self.normalize(path);
        if self.is_root_normalized(&norm) {
            return true;
        }
        self.deny.iter().any(|entry| {
            let entry = self.fold_case(entry);
            norm == entry
                || norm
                    .strip_prefix(entry.as_str())
                    .is_some_and(|rest| rest.starts_with('/'))
        })
    }

    pub fn is_system_root_str(&self, path: &str) -> bool {
        self.is_root_normalized(&self.normalize(path))
    }

    /// Lexical normalization: unify separators, fold `.` and `..`, drop
    /// trailing separators and case-fold on Windows.
    pub fn normalize(&self, path: &str) -> String {
        let unified = match self.platform {
            Platform::Windows => path.replace('\\', "/"),
            _ => path.to_string(),
        };
        let unified = self.fold_case(&unified);

        let (prefix, rest) = match self.platform {
            Platform::Windows if has_drive_prefix(&unified) => unified.split_at(2),
            _ => ("", unified.as_str()),
        };
        let absolute = rest.starts_with('/');

        let mut parts: Vec<&str> = Vec::new();
        for segment in rest.split('/') {
            match segment {
                "" | "." => {}
                ".." => {
                    if parts.last().is_some_and(|last| *last != "..") {
                        parts.pop();
                    } else if !absolute {
                        parts.push("..");
                    }
                }
                other => parts.push(other),
            }
        }

        let mut out = String::from(prefix);
        if absolute {
            out.push('/');
        }
        out.push_str(&parts.join("/"));
        out
    }

    fn is_root_normalized(&self, norm: &str) -> bool {
        match self.platform {
            Platform::Windows => {
                norm.is_empty()
                    || norm == "/"
                    || (has_drive_prefix(norm) && (norm.len() == 2 || &norm[2..] == "/"))
            }
            _ => norm.is_empty() || norm == "/",
        }
    }

    fn fold_case(&self, s: &str) -> String {
        match self.platform {
            Platform::Windows => s.to_lowercase(),
            _ => s.to_string(),
        }
    }
}

fn has_drive_prefix(s: &str) -> bool {
    let bytes = s.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

/// Linux rules minus `/root`, `/tmp` and `/var`, for fixtures that live in
/// the host temp dir.
#[cfg(test)]
pub(crate) fn fixture_guard() -> PathGuard {
    PathGuard::for_platform(Platform::Linux).with_deny_list(&[
        "/bin", "/boot", "/dev", "/etc", "/lib", "/lib64", "/proc", "/sbin", "/sys", "/usr",
    ])
}
