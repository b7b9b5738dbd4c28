//! Safety checks applied before any tool touches the filesystem or a shell.
//!
//! These are best-effort guards, not a sandbox: paths are judged lexically
//! (symlinks are not followed) and shell commands against a substring
//! denylist. A determined controller can get around both.

use std::path::{Component, Path, PathBuf};

use crate::error::ValidationError;

/// Destructive fragments rejected anywhere in a shell command.
const DENYLIST: &[&str] = &[
    "rm -rf /",
    "mkfs",
    "dd if=/dev/zero",
    ":(){ :|:& };:",
    "sudo",
    "su",
    "chmod 777",
];

/// Keeps every filesystem tool inside the working-directory subtree.
#[derive(Debug, Clone)]
pub struct PathGuard {
    root: PathBuf,
    home: Option<PathBuf>,
}

impl PathGuard {
    /// Guard rooted at `root` (made absolute against the process cwd).
    pub fn new(root: impl AsRef<Path>) -> std::io::Result<Self> {
        let root = normalize(&std::path::absolute(root.as_ref())?);
        Ok(Self {
            root,
            home: dirs::home_dir().map(|h| normalize(&h)),
        })
    }

    /// Guard rooted at the process's current working directory.
    pub fn current_dir() -> std::io::Result<Self> {
        Self::new(std::env::current_dir()?)
    }

    /// Override the home directory used by the deletion guard.
    pub fn with_home(mut self, home: Option<PathBuf>) -> Self {
        self.home = home.map(|h| normalize(&h));
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `raw` against the root and reject it if reaching it would
    /// climb above the root. Returns the normalized absolute path.
    pub fn resolve(&self, raw: &str) -> Result<PathBuf, ValidationError> {
        if raw.contains('\0') {
            return Err(ValidationError::InvalidPath("path contains NUL byte".into()));
        }
        let target = normalize(&self.root.join(raw));
        if target.strip_prefix(&self.root).is_err() {
            return Err(ValidationError::AccessDenied { path: target });
        }
        Ok(target)
    }

    /// Refuse to delete the filesystem root or the user's home, even when
    /// the path passed containment (e.g. the agent runs from `$HOME`).
    pub fn check_deletable(&self, resolved: &Path) -> Result<(), ValidationError> {
        let is_fs_root = resolved.has_root() && resolved.parent().is_none();
        let is_home = self.home.as_deref() == Some(resolved);
        if is_fs_root || is_home {
            return Err(ValidationError::ProtectedPath {
                path: resolved.to_path_buf(),
            });
        }
        Ok(())
    }
}

/// Lexical normalization: drops `.`, folds `..` into its parent. `..` at the
/// filesystem root stays at the root.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            Component::Normal(part) => out.push(part),
        }
    }
    out
}

/// Blunt denylist for `runCommand`.
#[derive(Debug, Clone, Default)]
pub struct CommandValidator;

impl CommandValidator {
    pub fn new() -> Self {
        Self
    }

    /// Matching is case-insensitive and ignores runs of whitespace, so
    /// `SUDO` or `rm  -rf  /` are caught as well.
    pub fn validate(&self, command: &str) -> Result<(), ValidationError> {
        let lowered = command
            .to_lowercase()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");

        if let Some(pattern) = DENYLIST.iter().find(|p| lowered.contains(*p)) {
            return Err(ValidationError::DangerousCommand {
                pattern: (*pattern).to_string(),
            });
        }

        Ok(())
    }
}
