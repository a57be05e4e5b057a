//! Browser definition registry: which browsers exist, where they keep their
//! bookmark stores, and which installs are actually present on this machine.

mod defs;
mod profiles;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use profiles::{Profile, chrome_profiles, mozilla_profiles};

/// Browser engine class. Decides which parser a flavour gets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrowserFamily {
    Mozilla,
    Chrome,
    Qute,
    Other,
}

/// Declarative description of one browser flavour's on-disk layout.
///
/// `snap_dir` and `flatpak_dir` are containerized-install candidates; the
/// effective base directory prefers flatpak, then snap, then the plain base.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowserDef {
    /// Canonical name, e.g. `firefox`, `brave`.
    pub flavour: String,
    pub family: BrowserFamily,
    pub base_dir: String,
    #[serde(default)]
    pub snap_dir: String,
    #[serde(default)]
    pub flatpak_dir: String,
}

impl BrowserDef {
    pub fn mozilla(flavour: &str, base: &str, snap: &str, flatpak: &str) -> Self {
        Self::with_family(BrowserFamily::Mozilla, flavour, base, snap, flatpak)
    }

    pub fn chrome(flavour: &str, base: &str, snap: &str, flatpak: &str) -> Self {
        Self::with_family(BrowserFamily::Chrome, flavour, base, snap, flatpak)
    }

    pub fn qute(flavour: &str, base: &str) -> Self {
        Self::with_family(BrowserFamily::Qute, flavour, base, "", "")
    }

    fn with_family(
        family: BrowserFamily,
        flavour: &str,
        base: &str,
        snap: &str,
        flatpak: &str,
    ) -> Self {
        Self {
            flavour: flavour.to_string(),
            family,
            base_dir: base.to_string(),
            snap_dir: snap.to_string(),
            flatpak_dir: flatpak.to_string(),
        }
    }

    /// The raw (unexpanded) directory that should be used, honoring the
    /// flatpak > snap > base preference for candidates that exist.
    pub fn effective_base_dir(&self) -> &str {
        if candidate_exists(&self.flatpak_dir) {
            &self.flatpak_dir
        } else if candidate_exists(&self.snap_dir) {
            &self.snap_dir
        } else {
            &self.base_dir
        }
    }

    /// Expand the effective base directory, following symlinks.
    pub fn expand_base_dir(&self) -> Result<PathBuf, BrowserError> {
        expand_path(self.effective_base_dir())
    }

    /// A browser is detected iff its effective base directory exists.
    pub fn detect(&self) -> bool {
        match self.expand_base_dir() {
            Ok(dir) => dir.is_dir(),
            Err(err) => {
                tracing::debug!(flavour = %self.flavour, "skipping: {err}");
                false
            }
        }
    }
}

fn candidate_exists(raw: &str) -> bool {
    if raw.is_empty() {
        return false;
    }
    match expand_only(raw) {
        Ok(path) => path.is_dir(),
        Err(err) => {
            tracing::debug!("candidate {raw}: {err}");
            false
        }
    }
}

/// Known browsers, built-in plus runtime additions.
#[derive(Clone, Debug, Default)]
pub struct Registry {
    defs: Vec<BrowserDef>,
}

impl Registry {
    /// The built-in table for the current platform.
    pub fn builtin() -> Self {
        Self {
            defs: defs::defined_browsers(),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Append a definition at runtime (config-supplied browsers).
    pub fn add(&mut self, def: BrowserDef) {
        self.defs.push(def);
    }

    pub fn iter(&self) -> impl Iterator<Item = &BrowserDef> {
        self.defs.iter()
    }

    pub fn family(&self, family: BrowserFamily) -> impl Iterator<Item = &BrowserDef> {
        self.defs.iter().filter(move |d| d.family == family)
    }

    /// Definitions whose effective base directory exists on this machine.
    pub fn detected(&self) -> Vec<&BrowserDef> {
        self.defs.iter().filter(|d| d.detect()).collect()
    }
}

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("empty path")]
    EmptyPath,
    #[error("cannot resolve home directory")]
    NoHome,
    #[error("expand {path}: {source}")]
    Expand {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Expand `~` and `$VAR` in a path and resolve symlinks. The path must
/// exist, since symlink resolution touches the filesystem.
pub fn expand_path(raw: &str) -> Result<PathBuf, BrowserError> {
    let expanded = expand_only(raw)?;
    expanded
        .canonicalize()
        .map_err(|source| BrowserError::Expand {
            path: raw.to_string(),
            source,
        })
}

/// Expand `~` and `$VAR` without touching the filesystem.
pub fn expand_only(raw: &str) -> Result<PathBuf, BrowserError> {
    if raw.is_empty() {
        return Err(BrowserError::EmptyPath);
    }
    let with_env = expand_env(raw);
    if let Some(rest) = with_env.strip_prefix('~') {
        let home = dirs::home_dir().ok_or(BrowserError::NoHome)?;
        return Ok(home.join(rest.trim_start_matches('/')));
    }
    Ok(PathBuf::from(with_env))
}

/// Substitute `$VAR` and `${VAR}` references from the environment. Unknown
/// variables expand to the empty string.
fn expand_env(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.char_indices().peekable();
    while let Some((_, c)) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        let braced = matches!(chars.peek(), Some((_, '{')));
        if braced {
            chars.next();
        }
        let mut name = String::new();
        while let Some(&(_, n)) = chars.peek() {
            if n.is_ascii_alphanumeric() || n == '_' {
                name.push(n);
                chars.next();
            } else {
                break;
            }
        }
        if braced && matches!(chars.peek(), Some((_, '}'))) {
            chars.next();
        }
        if name.is_empty() {
            out.push('$');
        } else if let Ok(value) = std::env::var(&name) {
            out.push_str(&value);
        }
    }
    out
}
