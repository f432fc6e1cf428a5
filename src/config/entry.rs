//! Validated manifest entries and their desired states.
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Serialize, Serializer};

/// Kind of resource an entry manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    /// An RPM package.
    Package,
    /// A regular file with content and attributes.
    File,
    /// A directory with attributes.
    Directory,
    /// A systemd unit.
    Service,
    /// A kernel parameter.
    Sysctl,
}

impl ResourceKind {
    /// All kinds, in the order they are documented.
    pub const ALL: [Self; 5] = [
        Self::Package,
        Self::File,
        Self::Directory,
        Self::Service,
        Self::Sysctl,
    ];

    /// Manifest spelling of the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Package => "package",
            Self::File => "file",
            Self::Directory => "directory",
            Self::Service => "service",
            Self::Sysctl => "sysctl",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "package" => Ok(Self::Package),
            "file" => Ok(Self::File),
            "directory" => Ok(Self::Directory),
            "service" => Ok(Self::Service),
            "sysctl" | "sysctl-key" => Ok(Self::Sysctl),
            _ => Err(()),
        }
    }
}

/// Unix permission bits.
///
/// Displayed and serialized in octal, the way they are written in manifests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mode(pub u32);

impl Mode {
    /// Parse an octal string such as `"644"` or `"0700"`.
    ///
    /// # Examples
    ///
    /// ```
    /// use provision_cli::config::entry::Mode;
    ///
    /// assert_eq!(Mode::parse("0644"), Some(Mode(0o644)));
    /// assert_eq!(Mode::parse("700"), Some(Mode(0o700)));
    /// assert_eq!(Mode::parse("rw-r--r--"), None);
    /// assert_eq!(Mode::parse("17777"), None);
    /// ```
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        u32::from_str_radix(s, 8)
            .ok()
            .filter(|m| *m <= 0o7777)
            .map(Self)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:o}", self.0)
    }
}

impl Serialize for Mode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Ownership and permission bits requested for a file or directory.
///
/// `None` fields are left as whatever the host has.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Attributes {
    /// Permission bits.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<Mode>,
    /// Owning user name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    /// Owning group name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

impl Attributes {
    /// Returns `true` if no attribute is managed.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.mode.is_none() && self.owner.is_none() && self.group.is_none()
    }

    /// Ownership in `chown` syntax (`user:group`, `user` or `:group`), or
    /// `None` when neither is managed.
    ///
    /// # Examples
    ///
    /// ```
    /// use provision_cli::config::entry::Attributes;
    ///
    /// let attrs = Attributes {
    ///     group: Some("wheel".into()),
    ///     ..Attributes::default()
    /// };
    /// assert_eq!(attrs.chown_spec().as_deref(), Some(":wheel"));
    /// assert_eq!(Attributes::default().chown_spec(), None);
    /// ```
    #[must_use]
    pub fn chown_spec(&self) -> Option<String> {
        match (&self.owner, &self.group) {
            (Some(o), Some(g)) => Some(format!("{o}:{g}")),
            (Some(o), None) => Some(o.clone()),
            (None, Some(g)) => Some(format!(":{g}")),
            (None, None) => None,
        }
    }
}

impl fmt::Display for Attributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(mode) = self.mode {
            parts.push(format!("mode {mode}"));
        }
        match (&self.owner, &self.group) {
            (Some(o), Some(g)) => parts.push(format!("owner {o}:{g}")),
            (Some(o), None) => parts.push(format!("owner {o}")),
            (None, Some(g)) => parts.push(format!("group {g}")),
            (None, None) => {}
        }
        f.write_str(&parts.join(", "))
    }
}

/// Where a file's desired content comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "from", rename_all = "lowercase")]
pub enum ContentOrigin {
    /// Inline `content`, already template-expanded.
    Inline,
    /// A file next to the manifest, copied verbatim.
    Source {
        /// Absolute path of the source file.
        path: PathBuf,
    },
}

/// Desired file content plus its sha256 digest.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct FileContent {
    /// Lowercase hex sha256 of `bytes`.
    pub digest: String,
    /// Where the bytes came from.
    pub origin: ContentOrigin,
    /// The content itself.
    #[serde(skip)]
    pub bytes: Vec<u8>,
}

impl FileContent {
    /// Content given inline in the manifest.
    #[must_use]
    pub fn inline(text: &str) -> Self {
        let bytes = text.as_bytes().to_vec();
        Self {
            digest: sha256_hex(&bytes),
            origin: ContentOrigin::Inline,
            bytes,
        }
    }

    /// Content read from a source file.
    #[must_use]
    pub fn source(path: PathBuf, bytes: Vec<u8>) -> Self {
        Self {
            digest: sha256_hex(&bytes),
            origin: ContentOrigin::Source { path },
            bytes,
        }
    }
}

impl fmt::Debug for FileContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileContent")
            .field("digest", &self.digest)
            .field("origin", &self.origin)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Compute the lowercase hex sha256 of `bytes`.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    use std::fmt::Write as _;

    let hash = Sha256::digest(bytes);
    let mut out = String::with_capacity(64);
    for byte in hash {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// Desired state of an entry, by kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DesiredState {
    /// Package must be installed; `source` overrides what is handed to dnf.
    PackagePresent {
        /// URL or local path of the RPM to install instead of the name.
        source: Option<String>,
    },
    /// Package must not be installed.
    PackageAbsent,
    /// File must exist with this content and attributes.
    FilePresent {
        /// Desired content.
        content: FileContent,
        /// Desired attributes.
        attrs: Attributes,
    },
    /// File must not exist.
    FileAbsent,
    /// Directory must exist with these attributes.
    DirectoryPresent {
        /// Desired attributes.
        attrs: Attributes,
    },
    /// Directory must not exist (only removed when empty).
    DirectoryAbsent,
    /// Unit must be enabled, and running when `now`.
    ServiceEnabled {
        /// Also start the unit.
        now: bool,
    },
    /// Unit must be disabled, and stopped when `now`.
    ServiceDisabled {
        /// Also stop the unit.
        now: bool,
    },
    /// Kernel parameter must have this value.
    SysctlValue {
        /// Desired value, whitespace-normalized.
        value: String,
    },
}

impl DesiredState {
    /// Kind of resource this state applies to.
    #[must_use]
    pub const fn kind(&self) -> ResourceKind {
        match self {
            Self::PackagePresent { .. } | Self::PackageAbsent => ResourceKind::Package,
            Self::FilePresent { .. } | Self::FileAbsent => ResourceKind::File,
            Self::DirectoryPresent { .. } | Self::DirectoryAbsent => ResourceKind::Directory,
            Self::ServiceEnabled { .. } | Self::ServiceDisabled { .. } => ResourceKind::Service,
            Self::SysctlValue { .. } => ResourceKind::Sysctl,
        }
    }
}

/// A single validated manifest entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Unique identifier within the manifest.
    pub id: String,
    /// Resource kind.
    pub kind: ResourceKind,
    /// Package name, absolute path, unit name, or sysctl key.
    pub target: String,
    /// What the resource should look like.
    pub desired: DesiredState,
    /// Identifiers of entries that must be converged first.
    pub depends_on: Vec<String>,
}

impl Entry {
    /// Create an entry whose kind is derived from `desired`.
    #[must_use]
    pub fn new(id: impl Into<String>, target: impl Into<String>, desired: DesiredState) -> Self {
        Self {
            id: id.into(),
            kind: desired.kind(),
            target: target.into(),
            desired,
            depends_on: Vec::new(),
        }
    }

    /// Builder-style dependency list.
    #[must_use]
    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on = deps.into_iter().map(Into::into).collect();
        self
    }
}

/// Collapse runs of whitespace to single spaces.
///
/// `sysctl -n` prints multi-value keys tab-separated; manifests usually use
/// spaces.
#[must_use]
pub fn normalize_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn kind_round_trips_through_str() {
        for kind in ResourceKind::ALL {
            assert_eq!(kind.as_str().parse::<ResourceKind>(), Ok(kind));
        }
    }

    #[test]
    fn sysctl_key_alias_is_accepted() {
        assert_eq!("sysctl-key".parse::<ResourceKind>(), Ok(ResourceKind::Sysctl));
    }

    #[test]
    fn unknown_kind_is_rejected() {
        assert!("flatpak".parse::<ResourceKind>().is_err());
    }

    #[test]
    fn mode_displays_in_octal() {
        assert_eq!(Mode(0o600).to_string(), "600");
        assert_eq!(Mode(0o4755).to_string(), "4755");
    }

    #[test]
    fn attributes_display() {
        let attrs = Attributes {
            mode: Some(Mode(0o644)),
            owner: Some("root".to_string()),
            group: Some("root".to_string()),
        };
        assert_eq!(attrs.to_string(), "mode 644, owner root:root");
        assert!(Attributes::default().is_empty());
    }

    #[test]
    fn sha256_of_known_content() {
        // echo -n "hello world" | sha256sum
        assert_eq!(
            sha256_hex(b"hello world"),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn inline_and_source_content_share_digest() {
        let inline = FileContent::inline("PermitRootLogin no\n");
        let source = FileContent::source(
            PathBuf::from("/repo/etc/ssh/sshd_config"),
            b"PermitRootLogin no\n".to_vec(),
        );
        assert_eq!(inline.digest, source.digest);
        assert_ne!(inline, source);
    }

    #[test]
    fn entry_kind_follows_desired_state() {
        let entry = Entry::new("svc", "sshd.service", DesiredState::ServiceEnabled { now: true });
        assert_eq!(entry.kind, ResourceKind::Service);
        let entry = entry.depends_on(["pkg"]);
        assert_eq!(entry.depends_on, vec!["pkg".to_string()]);
    }

    #[test]
    fn whitespace_is_normalized() {
        assert_eq!(normalize_whitespace("4096\t87380  6291456"), "4096 87380 6291456");
    }
}
