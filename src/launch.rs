use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Connection settings stored on a catalog entry and turned into client flags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchProfile {
    /// Display name of the remote device; carried over to auto-created entries.
    #[serde(default)]
    pub nickname: String,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub registration_key: String,
    #[serde(default)]
    pub morning: String,
    #[serde(default)]
    pub profile: String,
    #[serde(default = "default_fullscreen")]
    pub fullscreen: bool,
}

fn default_fullscreen() -> bool {
    true
}

impl LaunchProfile {
    /// Build the ordered flag list for the client.
    ///
    /// Returns an empty list when no connection details are set, which
    /// selects GUI-only mode.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if !self.host.is_empty() {
            args.push(format!("--host={}", self.host));
        }
        if !self.registration_key.is_empty() {
            args.push(format!("--regist-key={}", self.registration_key));
        }
        if !self.morning.is_empty() {
            args.push(format!("--morning={}", self.morning));
        }
        if !self.profile.is_empty() {
            args.push(format!("--profile={}", self.profile));
        }
        if self.fullscreen && !args.is_empty() {
            args.push("--fullscreen".to_string());
        }
        args
    }

    /// The subset of settings an auto-created catalog entry inherits.
    pub fn inherited(&self) -> Self {
        Self {
            nickname: self.nickname.clone(),
            host: self.host.clone(),
            ..Self::default()
        }
    }
}

/// Everything needed to (re)spawn the client for one tracking key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Launch {
    pub executable: PathBuf,
    pub args: Vec<String>,
}

impl Launch {
    pub fn new(executable: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            executable: executable.into(),
            args,
        }
    }

    pub fn from_profile(executable: impl Into<PathBuf>, profile: &LaunchProfile) -> Self {
        Self::new(executable, profile.to_args())
    }

    /// GUI-only launches have no flags and are not supervised.
    pub fn is_gui_only(&self) -> bool {
        self.args.is_empty()
    }

    /// Directory the client runs in; also prepended to its `PATH`.
    pub fn working_dir(&self) -> Option<&Path> {
        self.executable
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
    }
}

const CLIENT_NAMES: &[&str] = if cfg!(windows) {
    &["chiaki.exe", "chiaki-ng.exe"]
} else {
    &["chiaki", "chiaki-ng"]
};

/// Find the client executable.
///
/// Priority: explicitly configured path, then each search directory (and
/// one level of subdirectories below it, since archives often unpack into
/// a folder), then well-known install locations.
pub fn resolve_executable(configured: Option<&Path>, search_dirs: &[PathBuf]) -> Option<PathBuf> {
    if let Some(path) = configured {
        if path.is_file() {
            return Some(path.to_path_buf());
        }
    }
    for dir in search_dirs.iter().cloned().chain(well_known_dirs()) {
        if let Some(found) = find_in_dir(&dir) {
            return Some(found);
        }
    }
    None
}

fn find_in_dir(dir: &Path) -> Option<PathBuf> {
    let direct = CLIENT_NAMES.iter().map(|n| dir.join(n)).find(|p| p.is_file());
    if direct.is_some() {
        return direct;
    }
    let entries = std::fs::read_dir(dir).ok()?;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            if let Some(found) = CLIENT_NAMES.iter().map(|n| path.join(n)).find(|p| p.is_file()) {
                return Some(found);
            }
        }
    }
    None
}

fn well_known_dirs() -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    for var in ["ProgramFiles", "ProgramFiles(x86)", "LOCALAPPDATA"] {
        if let Some(base) = std::env::var_os(var) {
            dirs.push(PathBuf::from(base).join("chiaki-ng"));
        }
    }
    if cfg!(unix) {
        dirs.push(PathBuf::from("/usr/bin"));
        dirs.push(PathBuf::from("/usr/local/bin"));
    }
    dirs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_profile_selects_gui_mode() {
        let profile = LaunchProfile::default();
        assert!(profile.to_args().is_empty());
        assert!(Launch::from_profile("/opt/client", &profile).is_gui_only());
    }

    #[test]
    fn flags_are_ordered_and_fullscreen_last() {
        let profile = LaunchProfile {
            host: "192.168.1.50".into(),
            registration_key: "abcd".into(),
            morning: "m0rn".into(),
            profile: "default".into(),
            fullscreen: true,
            ..Default::default()
        };
        assert_eq!(
            profile.to_args(),
            vec![
                "--host=192.168.1.50",
                "--regist-key=abcd",
                "--morning=m0rn",
                "--profile=default",
                "--fullscreen",
            ]
        );
    }

    #[test]
    fn fullscreen_can_be_disabled() {
        let profile = LaunchProfile {
            host: "10.0.0.2".into(),
            fullscreen: false,
            ..Default::default()
        };
        assert_eq!(profile.to_args(), vec!["--host=10.0.0.2"]);
    }

    #[test]
    fn inherited_keeps_only_nickname_and_host() {
        let profile = LaunchProfile {
            nickname: "Living Room".into(),
            host: "10.0.0.2".into(),
            registration_key: "secret".into(),
            ..Default::default()
        };
        let child = profile.inherited();
        assert_eq!(child.nickname, "Living Room");
        assert_eq!(child.host, "10.0.0.2");
        assert!(child.registration_key.is_empty());
    }

    #[test]
    fn resolve_finds_client_one_level_deep() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("client-1.2");
        std::fs::create_dir_all(&nested).unwrap();
        let exe = nested.join(CLIENT_NAMES[0]);
        std::fs::write(&exe, b"").unwrap();

        let found = resolve_executable(None, &[dir.path().to_path_buf()]);
        assert_eq!(found.as_deref(), Some(exe.as_path()));
    }

    #[test]
    fn configured_path_wins() {
        let dir = tempfile::tempdir().unwrap();
        let exe = dir.path().join("my-client");
        std::fs::write(&exe, b"").unwrap();
        let found = resolve_executable(Some(&exe), &[]);
        assert_eq!(found.as_deref(), Some(exe.as_path()));
    }

    #[test]
    fn working_dir_is_executable_parent() {
        let launch = Launch::new("/opt/client/bin/chiaki", vec!["--host=x".into()]);
        assert_eq!(launch.working_dir(), Some(Path::new("/opt/client/bin")));
        assert_eq!(Launch::new("chiaki", vec![]).working_dir(), None);
    }
}
