//! Profile discovery under a detected browser's base directory.

use std::fs;
use std::path::{Path, PathBuf};

/// One profile of a browser install.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Profile {
    /// Profile name as the browser knows it, e.g. `default` or `Profile 1`.
    pub name: String,
    /// Absolute profile directory.
    pub dir: PathBuf,
}

/// Mozilla profiles from `profiles.ini`, falling back to scanning for
/// directories that contain a `places.sqlite`.
pub fn mozilla_profiles(base: &Path) -> Vec<Profile> {
    let ini = base.join("profiles.ini");
    let mut profiles = match fs::read_to_string(&ini) {
        Ok(contents) => parse_profiles_ini(base, &contents),
        Err(err) => {
            tracing::debug!("no profiles.ini at {}: {err}", ini.display());
            Vec::new()
        }
    };
    if profiles.is_empty() {
        profiles = scan_for(base, "places.sqlite");
    }
    profiles
}

/// Chrome profiles: child directories holding a `Bookmarks` file.
pub fn chrome_profiles(base: &Path) -> Vec<Profile> {
    scan_for(base, "Bookmarks")
}

fn parse_profiles_ini(base: &Path, contents: &str) -> Vec<Profile> {
    let mut profiles = Vec::new();
    let mut in_profile = false;
    let mut name: Option<String> = None;
    let mut path: Option<String> = None;
    let mut relative = true;

    let mut flush = |name: &mut Option<String>, path: &mut Option<String>, relative: bool| {
        if let (Some(n), Some(p)) = (name.take(), path.take()) {
            let dir = if relative {
                base.join(p)
            } else {
                PathBuf::from(p)
            };
            profiles.push(Profile { name: n, dir });
        }
    };

    for line in contents.lines() {
        let line = line.trim();
        if line.starts_with('[') {
            flush(&mut name, &mut path, relative);
            in_profile = line.trim_start_matches('[').starts_with("Profile");
            relative = true;
            continue;
        }
        if !in_profile {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            match key.trim() {
                "Name" => name = Some(value.trim().to_string()),
                "Path" => path = Some(value.trim().to_string()),
                "IsRelative" => relative = value.trim() != "0",
                _ => {}
            }
        }
    }
    flush(&mut name, &mut path, relative);
    profiles
}

fn scan_for(base: &Path, marker: &str) -> Vec<Profile> {
    let mut profiles = Vec::new();
    let entries = match fs::read_dir(base) {
        Ok(entries) => entries,
        Err(err) => {
            tracing::debug!("scan {}: {err}", base.display());
            return profiles;
        }
    };
    for entry in entries.flatten() {
        let dir = entry.path();
        if dir.is_dir() && dir.join(marker).is_file() {
            let name = entry.file_name().to_string_lossy().into_owned();
            profiles.push(Profile { name, dir });
        }
    }
    profiles.sort_by(|a, b| a.name.cmp(&b.name));
    profiles
}
