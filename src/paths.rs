// LocalAgent Gate - Path Resolution
// Copyright 2026 Joseph Stone - All Rights Reserved
//
// Project-root discovery, home expansion and sandbox confinement.
// Cached via OnceLock for zero-overhead repeated access.
//
// SECURITY NOTE: with the sandbox active every resolved path is a
// descendant of the sandbox root. Escapes via `..` or symlinks clamp
// to the root itself; they never leave it and never raise.

use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;

static PROJECT_ROOT_CACHE: OnceLock<PathBuf> = OnceLock::new();

/// Find the project root.
///
/// Resolution order:
///   1. LOCALAGENT_ROOT environment variable
///   2. Walk up from binary location looking for Cargo.toml
///   3. Current working directory
pub fn project_root() -> &'static Path {
    PROJECT_ROOT_CACHE.get_or_init(|| {
        if let Ok(root) = std::env::var("LOCALAGENT_ROOT") {
            let p = PathBuf::from(&root);
            if p.exists() {
                return p;
            }
        }

        if let Ok(exe) = std::env::current_exe() {
            if let Ok(canonical) = exe.canonicalize() {
                let mut dir = canonical.parent();
                while let Some(d) = dir {
                    if d.join("Cargo.toml").exists() {
                        return d.to_path_buf();
                    }
                    dir = d.parent();
                }
            }
        }

        std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
    })
}

/// Default config location: <root>/config/config.json
pub fn default_config_path() -> PathBuf {
    project_root().join("config/config.json")
}

/// Expand a leading `~` to $HOME. Anything else passes through.
pub fn expand_home(raw: &str) -> PathBuf {
    if raw == "~" || raw.starts_with("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(raw.trim_start_matches('~').trim_start_matches('/'));
        }
    }
    PathBuf::from(raw)
}

/// Collapse `.` and `..` without touching the filesystem.
/// Returns None when `..` climbs above the starting point.
fn normalize_relative(raw: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in raw.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    return None;
                }
            }
            // Prefix/RootDir cannot appear once leading separators are stripped
            Component::Prefix(_) | Component::RootDir => {}
        }
    }
    Some(out)
}

/// Lexically absolute form of a path that may not exist yet.
fn absolutize(raw: &Path) -> PathBuf {
    let base = if raw.is_absolute() {
        PathBuf::new()
    } else {
        std::env::current_dir().unwrap_or_default()
    };
    let mut out = PathBuf::new();
    for component in base.join(raw).components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Symlink hops followed before a chain is treated as unresolvable.
const MAX_LINK_HOPS: usize = 40;

/// Canonicalize the deepest existing ancestor and re-append the missing tail.
/// Symlinks in the existing part are resolved. A dangling symlink met on the
/// way up is followed to its target, so the result names where a write
/// would actually land. None when a link chain does not terminate.
fn canonicalize_existing_prefix(path: &Path) -> Option<PathBuf> {
    let mut existing = path.to_path_buf();
    let mut tail: Vec<std::ffi::OsString> = Vec::new();
    let mut hops = 0;
    loop {
        if let Ok(canonical) = existing.canonicalize() {
            let mut out = canonical;
            for part in tail.iter().rev() {
                out.push(part);
            }
            return Some(out);
        }

        // canonicalize() fails on a link whose target is missing
        let is_link = std::fs::symlink_metadata(&existing)
            .map(|m| m.file_type().is_symlink())
            .unwrap_or(false);
        if is_link {
            hops += 1;
            if hops > MAX_LINK_HOPS {
                return None;
            }
            let target = std::fs::read_link(&existing).ok()?;
            let base = existing.parent().map(Path::to_path_buf).unwrap_or_default();
            existing = absolutize(&base.join(target));
            continue;
        }

        match (existing.file_name().map(|n| n.to_os_string()), existing.parent()) {
            (Some(name), Some(parent)) => {
                tail.push(name);
                existing = parent.to_path_buf();
            }
            _ => return Some(path.to_path_buf()),
        }
    }
}

/// Filesystem confinement for every tool path.
#[derive(Debug, Clone)]
pub struct Sandbox {
    enabled: bool,
    root: PathBuf,
}

impl Sandbox {
    pub fn new(enabled: bool, root: impl Into<PathBuf>) -> Self {
        Self { enabled, root: root.into() }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Canonical sandbox root, created on first use.
    fn canonical_root(&self) -> PathBuf {
        if let Err(e) = std::fs::create_dir_all(&self.root) {
            log::warn!("Cannot create sandbox root {:?}: {}", self.root, e);
        }
        self.root.canonicalize().unwrap_or_else(|_| absolutize(&self.root))
    }

    /// Resolve a caller-supplied path.
    ///
    /// Sandbox off: canonical absolute form, no restriction.
    /// Sandbox on: leading separators are stripped so host-absolute input
    /// becomes sandbox-relative, the remainder is joined onto the root, and
    /// anything that would land outside the root resolves to the root.
    /// Missing parent directories under the root are created.
    pub fn resolve(&self, raw: &str) -> PathBuf {
        if !self.enabled {
            let p = Path::new(raw);
            let resolved = p.canonicalize().unwrap_or_else(|_| absolutize(p));
            log::debug!("Resolved live path: {} -> {:?}", raw, resolved);
            return resolved;
        }

        let root = self.canonical_root();
        let clean = raw.trim_start_matches(['/', '\\']);

        let relative = match normalize_relative(Path::new(clean)) {
            Some(r) => r,
            None => {
                log::warn!("Path escapes sandbox, clamped to root: {}", raw);
                return root;
            }
        };

        let resolved = match canonicalize_existing_prefix(&root.join(&relative)) {
            Some(r) if r.starts_with(&root) => r,
            other => {
                log::warn!("Symlink escapes sandbox, clamped to root: {} -> {:?}", raw, other);
                return root;
            }
        };

        if let Some(parent) = resolved.parent() {
            if parent.starts_with(&root) {
                if let Err(e) = std::fs::create_dir_all(parent) {
                    log::warn!("Cannot create parent {:?}: {}", parent, e);
                }
            }
        }

        log::debug!("Resolved sandbox path: {} -> {:?}", raw, resolved);
        resolved
    }
}

// ============================================================================
// TESTS
// ============================================================================
