//! Host facts gathered once at startup: Fedora release, privilege, home.
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::exec::Executor;

/// How privileged commands are issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Privilege {
    /// Already running as root; commands run as-is.
    Root,
    /// Unprivileged; commands that mutate the system are prefixed with `sudo`.
    Sudo,
}

impl Privilege {
    /// Build the program and argument list for a privileged command.
    ///
    /// # Examples
    ///
    /// ```
    /// use provision_cli::platform::Privilege;
    ///
    /// let (program, args) = Privilege::Sudo.command("dnf", &["upgrade", "-y"]);
    /// assert_eq!(program, "sudo");
    /// assert_eq!(args, vec!["dnf", "upgrade", "-y"]);
    ///
    /// let (program, args) = Privilege::Root.command("dnf", &["upgrade", "-y"]);
    /// assert_eq!(program, "dnf");
    /// assert_eq!(args, vec!["upgrade", "-y"]);
    /// ```
    #[must_use]
    pub fn command<'a>(self, program: &'a str, args: &[&'a str]) -> (&'a str, Vec<&'a str>) {
        match self {
            Self::Root => (program, args.to_vec()),
            Self::Sudo => {
                let mut full = Vec::with_capacity(args.len() + 1);
                full.push(program);
                full.extend_from_slice(args);
                ("sudo", full)
            }
        }
    }
}

impl fmt::Display for Privilege {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Root => write!(f, "root"),
            Self::Sudo => write!(f, "sudo"),
        }
    }
}

/// Platform information for the current system.
#[derive(Debug, Clone)]
pub struct Platform {
    /// Fedora release number (e.g. `"40"`), if it could be determined.
    pub fedora_version: Option<String>,
    /// Whether commands need a `sudo` prefix.
    pub privilege: Privilege,
    /// Invoking user's home directory.
    pub home: PathBuf,
}

impl Platform {
    /// Create a platform with explicit values.
    #[must_use]
    pub const fn new(fedora_version: Option<String>, privilege: Privilege, home: PathBuf) -> Self {
        Self {
            fedora_version,
            privilege,
            home,
        }
    }

    /// Detect the current platform.
    ///
    /// # Errors
    ///
    /// Returns an error if the `HOME` environment variable is not set.
    pub fn detect(executor: &dyn Executor) -> Result<Self> {
        let home = std::env::var("HOME")
            .map_err(|_| anyhow::anyhow!("HOME environment variable is not set"))?;
        let fedora_version = detect_fedora_version(executor)
            .or_else(|| read_os_release_version(Path::new("/etc/os-release")));
        Ok(Self {
            fedora_version,
            privilege: detect_privilege(executor),
            home: PathBuf::from(home),
        })
    }

    /// Variables every manifest may reference without declaring them.
    #[must_use]
    pub fn builtin_vars(&self) -> BTreeMap<String, String> {
        let mut vars = BTreeMap::new();
        vars.insert("home".to_string(), self.home.display().to_string());
        if let Some(version) = &self.fedora_version {
            vars.insert("fedora_version".to_string(), version.clone());
        }
        vars
    }
}

/// `rpm -E %fedora` expands to the release number on Fedora and to the
/// literal macro elsewhere.
fn detect_fedora_version(executor: &dyn Executor) -> Option<String> {
    let result = executor.run_unchecked("rpm", &["-E", "%fedora"]).ok()?;
    let version = result.stdout.trim();
    (result.success && !version.is_empty() && version.chars().all(|c| c.is_ascii_digit()))
        .then(|| version.to_string())
}

fn read_os_release_version(path: &Path) -> Option<String> {
    let content = std::fs::read_to_string(path).ok()?;
    parse_os_release_version(&content)
}

/// Extract `VERSION_ID` from os-release content, stripping optional quotes.
fn parse_os_release_version(content: &str) -> Option<String> {
    content.lines().find_map(|line| {
        let value = line.trim().strip_prefix("VERSION_ID=")?;
        let value = value.trim_matches('"').trim_matches('\'');
        (!value.is_empty()).then(|| value.to_string())
    })
}

fn detect_privilege(executor: &dyn Executor) -> Privilege {
    match executor.run_unchecked("id", &["-u"]) {
        Ok(result) if result.success && result.stdout.trim() == "0" => Privilege::Root,
        _ => Privilege::Sudo,
    }
}
