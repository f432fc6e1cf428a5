//! Manifest loading: TOML parsing, templating and validation.
//!
//! A manifest is a `[vars]` table plus any number of `[[resource]]` entries:
//!
//! ```toml
//! [vars]
//! user = "cameron"
//!
//! [[resource]]
//! id = "sshd-config"
//! kind = "file"
//! target = "/etc/ssh/sshd_config"
//! source = "etc/ssh/sshd_config"
//! mode = "644"
//! owner = "root"
//! group = "root"
//! depends_on = ["openssh-server"]
//! ```
pub mod entry;
pub mod graph;
pub mod template;
pub mod toml_loader;
pub mod validation;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::ValidationError;
use entry::{Attributes, DesiredState, Entry, FileContent, Mode, ResourceKind};
use template::Vars;
use validation::ValidationWarning;

/// On-disk manifest layout.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawManifest {
    #[serde(default)]
    vars: BTreeMap<String, String>,
    #[serde(default, rename = "resource")]
    resources: Vec<RawEntry>,
}

/// A `[[resource]]` table before kind-specific validation.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawEntry {
    id: Option<String>,
    kind: String,
    target: String,
    state: Option<String>,
    content: Option<String>,
    source: Option<String>,
    mode: Option<String>,
    owner: Option<String>,
    group: Option<String>,
    now: Option<bool>,
    value: Option<String>,
    #[serde(default, alias = "dependsOn")]
    depends_on: Vec<String>,
}

impl RawEntry {
    /// Names of the optional fields that are set.
    fn present_fields(&self) -> Vec<&'static str> {
        [
            ("state", self.state.is_some()),
            ("content", self.content.is_some()),
            ("source", self.source.is_some()),
            ("mode", self.mode.is_some()),
            ("owner", self.owner.is_some()),
            ("group", self.group.is_some()),
            ("now", self.now.is_some()),
            ("value", self.value.is_some()),
        ]
        .into_iter()
        .filter_map(|(name, set)| set.then_some(name))
        .collect()
    }
}

/// Fields each kind accepts besides `id`, `kind`, `target` and `depends_on`.
const fn allowed_fields(kind: ResourceKind) -> &'static [&'static str] {
    match kind {
        ResourceKind::Package => &["state", "source"],
        ResourceKind::File => &["state", "content", "source", "mode", "owner", "group"],
        ResourceKind::Directory => &["state", "mode", "owner", "group"],
        ResourceKind::Service => &["state", "now"],
        ResourceKind::Sysctl => &["value"],
    }
}

/// A validated manifest: entries in declaration order plus their execution
/// order.
#[derive(Debug, Clone)]
pub struct Manifest {
    entries: Vec<Entry>,
    order: Vec<usize>,
}

impl Manifest {
    /// Validate `entries` and compute their execution order.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] for duplicate ids, unknown dependencies
    /// or dependency cycles.
    pub fn new(entries: Vec<Entry>) -> Result<Self, ValidationError> {
        let order = validation::validate(&entries)?;
        Ok(Self { entries, order })
    }

    /// Entries in declaration order.
    #[must_use]
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// Look up an entry by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Entry> {
        self.entries.iter().find(|e| e.id == id)
    }

    /// Entries in execution order: dependencies first, ties by declaration.
    pub fn ordered(&self) -> impl Iterator<Item = &Entry> {
        self.order.iter().filter_map(|&i| self.entries.get(i))
    }

    /// Number of entries.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the manifest declares no entries.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Non-fatal problems worth surfacing before applying.
    #[must_use]
    pub fn warnings(&self, home: &Path) -> Vec<ValidationWarning> {
        validation::warnings(&self.entries, home)
    }
}

/// Load, template and validate the manifest at `path`.
///
/// Variables are layered lowest to highest: `builtins`, the manifest's
/// `[vars]` table, then `overrides` (from `--var`).  File `source` paths are
/// resolved relative to the manifest's directory and read here, so the
/// returned manifest carries every byte it will write.
///
/// # Errors
///
/// Returns a [`ValidationError`] if the manifest or a source file cannot be
/// read, the TOML does not match the manifest schema, or any entry is invalid.
pub fn load(
    path: &Path,
    builtins: &BTreeMap<String, String>,
    overrides: &BTreeMap<String, String>,
) -> Result<Manifest, ValidationError> {
    let raw: RawManifest = toml_loader::load_config(path)?;
    let base_dir = manifest_dir(path)?;

    let vars = Vars::new()
        .layer(builtins.clone())
        .layer(raw.vars)
        .layer(overrides.clone());

    let entries = raw
        .resources
        .into_iter()
        .map(|r| build_entry(r, &vars, &base_dir))
        .collect::<Result<Vec<_>, _>>()?;

    Manifest::new(entries)
}

/// Canonical directory containing the manifest.
fn manifest_dir(path: &Path) -> Result<PathBuf, ValidationError> {
    let canonical = dunce::canonicalize(path).map_err(|source| ValidationError::Io {
        path: path.display().to_string(),
        source,
    })?;
    Ok(canonical
        .parent()
        .map_or_else(|| PathBuf::from("/"), Path::to_path_buf))
}

fn invalid(id: &str, message: impl Into<String>) -> ValidationError {
    ValidationError::InvalidField {
        id: id.to_string(),
        message: message.into(),
    }
}

/// Turn a raw table into a validated [`Entry`].
fn build_entry(raw: RawEntry, vars: &Vars, base_dir: &Path) -> Result<Entry, ValidationError> {
    let Ok(kind) = raw.kind.parse::<ResourceKind>() else {
        let id = raw
            .id
            .clone()
            .unwrap_or_else(|| format!("{}:{}", raw.kind, raw.target));
        return Err(ValidationError::UnknownKind { id, kind: raw.kind });
    };

    let provisional_id = raw
        .id
        .clone()
        .unwrap_or_else(|| format!("{kind}:{}", raw.target));
    let target = vars.expand_for(&provisional_id, raw.target.trim())?;
    let id = raw.id.clone().unwrap_or_else(|| format!("{kind}:{target}"));

    if target.is_empty() {
        return Err(invalid(&id, "target must not be empty"));
    }
    if id.trim().is_empty() {
        return Err(invalid(&id, "id must not be empty"));
    }

    let allowed = allowed_fields(kind);
    if let Some(field) = raw
        .present_fields()
        .into_iter()
        .find(|f| !allowed.contains(f))
    {
        return Err(invalid(
            &id,
            format!("field '{field}' is not valid for kind '{kind}'"),
        ));
    }

    let desired = match kind {
        ResourceKind::Package => package_state(&id, &raw, vars)?,
        ResourceKind::File => {
            require_absolute(&id, &target)?;
            file_state(&id, &raw, vars, base_dir)?
        }
        ResourceKind::Directory => {
            require_absolute(&id, &target)?;
            directory_state(&id, &raw, vars)?
        }
        ResourceKind::Service => {
            if target.contains(char::is_whitespace) {
                return Err(invalid(&id, format!("invalid unit name '{target}'")));
            }
            service_state(&id, &raw)?
        }
        ResourceKind::Sysctl => {
            if target.contains(char::is_whitespace) || target.contains('=') {
                return Err(invalid(&id, format!("invalid sysctl key '{target}'")));
            }
            sysctl_state(&id, &raw, vars)?
        }
    };

    Ok(Entry::new(id, target, desired).depends_on(raw.depends_on))
}

fn require_absolute(id: &str, target: &str) -> Result<(), ValidationError> {
    if Path::new(target).is_absolute() {
        Ok(())
    } else {
        Err(invalid(id, format!("target '{target}' must be an absolute path")))
    }
}

/// Parse `state`, which must be one of `choices`; the first is the default.
fn parse_state<'a>(
    id: &str,
    raw: &'a RawEntry,
    choices: [&'static str; 2],
) -> Result<&'a str, ValidationError> {
    let [default, other] = choices;
    match raw.state.as_deref() {
        None => Ok(default),
        Some(s) if s == default || s == other => Ok(s),
        Some(s) => Err(invalid(
            id,
            format!("invalid state '{s}': expected '{default}' or '{other}'"),
        )),
    }
}

fn package_state(id: &str, raw: &RawEntry, vars: &Vars) -> Result<DesiredState, ValidationError> {
    if parse_state(id, raw, ["present", "absent"])? == "absent" {
        if raw.source.is_some() {
            return Err(invalid(id, "'source' only applies to state 'present'"));
        }
        return Ok(DesiredState::PackageAbsent);
    }
    let source = raw
        .source
        .as_deref()
        .map(|s| vars.expand_for(id, s))
        .transpose()?;
    Ok(DesiredState::PackagePresent { source })
}

fn file_state(
    id: &str,
    raw: &RawEntry,
    vars: &Vars,
    base_dir: &Path,
) -> Result<DesiredState, ValidationError> {
    if parse_state(id, raw, ["present", "absent"])? == "absent" {
        reject_attributes_when_absent(id, raw)?;
        if raw.content.is_some() || raw.source.is_some() {
            return Err(invalid(
                id,
                "'content' and 'source' only apply to state 'present'",
            ));
        }
        return Ok(DesiredState::FileAbsent);
    }

    let content = match (&raw.content, &raw.source) {
        (Some(_), Some(_)) => {
            return Err(invalid(id, "'content' and 'source' are mutually exclusive"));
        }
        (None, None) => {
            return Err(invalid(id, "one of 'content' or 'source' is required"));
        }
        (Some(text), None) => FileContent::inline(&vars.expand_for(id, text)?),
        (None, Some(source)) => {
            let source = vars.expand_for(id, source)?;
            let path = base_dir.join(source);
            let bytes = std::fs::read(&path).map_err(|e| ValidationError::Io {
                path: path.display().to_string(),
                source: e,
            })?;
            FileContent::source(path, bytes)
        }
    };

    Ok(DesiredState::FilePresent {
        content,
        attrs: attributes(id, raw, vars)?,
    })
}

fn directory_state(id: &str, raw: &RawEntry, vars: &Vars) -> Result<DesiredState, ValidationError> {
    if parse_state(id, raw, ["present", "absent"])? == "absent" {
        reject_attributes_when_absent(id, raw)?;
        return Ok(DesiredState::DirectoryAbsent);
    }
    Ok(DesiredState::DirectoryPresent {
        attrs: attributes(id, raw, vars)?,
    })
}

fn service_state(id: &str, raw: &RawEntry) -> Result<DesiredState, ValidationError> {
    let now = raw.now.unwrap_or(true);
    if parse_state(id, raw, ["enabled", "disabled"])? == "disabled" {
        Ok(DesiredState::ServiceDisabled { now })
    } else {
        Ok(DesiredState::ServiceEnabled { now })
    }
}

fn sysctl_state(id: &str, raw: &RawEntry, vars: &Vars) -> Result<DesiredState, ValidationError> {
    let Some(value) = &raw.value else {
        return Err(invalid(id, "sysctl entries require a 'value'"));
    };
    let value = entry::normalize_whitespace(&vars.expand_for(id, value)?);
    if value.is_empty() {
        return Err(invalid(id, "'value' must not be empty"));
    }
    Ok(DesiredState::SysctlValue { value })
}

fn reject_attributes_when_absent(id: &str, raw: &RawEntry) -> Result<(), ValidationError> {
    if raw.mode.is_some() || raw.owner.is_some() || raw.group.is_some() {
        return Err(invalid(
            id,
            "'mode', 'owner' and 'group' only apply to state 'present'",
        ));
    }
    Ok(())
}

fn attributes(id: &str, raw: &RawEntry, vars: &Vars) -> Result<Attributes, ValidationError> {
    let mode = raw
        .mode
        .as_deref()
        .map(|m| {
            Mode::parse(m.trim()).ok_or_else(|| {
                invalid(
                    id,
                    format!("invalid mode '{m}': expected an octal string such as \"644\""),
                )
            })
        })
        .transpose()?;
    let name = |field: &Option<String>| -> Result<Option<String>, ValidationError> {
        field
            .as_deref()
            .map(|v| vars.expand_for(id, v.trim()))
            .transpose()
    };
    Ok(Attributes {
        mode,
        owner: name(&raw.owner)?,
        group: name(&raw.group)?,
    })
}

#[cfg(test)]
#[allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::indexing_slicing,
    clippy::panic
)]
mod tests {
    use super::*;
    use crate::config::entry::ContentOrigin;

    fn write_manifest(dir: &Path, content: &str) -> PathBuf {
        let path = dir.join("manifest.toml");
        std::fs::write(&path, content).unwrap();
        path
    }

    fn load_str(content: &str) -> Result<Manifest, ValidationError> {
        let dir = tempfile::tempdir().unwrap();
        let path = write_manifest(dir.path(), content);
        load(&path, &BTreeMap::new(), &BTreeMap::new())
    }

    fn builtins() -> BTreeMap<String, String> {
        BTreeMap::from([
            ("fedora_version".to_string(), "40".to_string()),
            ("home".to_string(), "/home/test".to_string()),
        ])
    }

    #[test]
    fn empty_manifest_is_valid() {
        let manifest = load_str("").unwrap();
        assert!(manifest.is_empty());
    }

    #[test]
    fn loads_every_kind() {
        let manifest = load_str(
            r#"
[[resource]]
id = "git"
kind = "package"
target = "git"

[[resource]]
kind = "file"
target = "/etc/motd"
content = "hello\n"
mode = "0644"
owner = "root"
group = "root"

[[resource]]
kind = "directory"
target = "/home/test/.ssh"
mode = "700"

[[resource]]
kind = "service"
target = "sshd.service"
state = "disabled"
now = false

[[resource]]
kind = "sysctl"
target = "vm.swappiness"
value = "10"
"#,
        )
        .unwrap();

        assert_eq!(manifest.len(), 5);
        let ids: Vec<_> = manifest.entries().iter().map(|e| e.id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "git",
                "file:/etc/motd",
                "directory:/home/test/.ssh",
                "service:sshd.service",
                "sysctl:vm.swappiness"
            ]
        );

        let motd = manifest.get("file:/etc/motd").unwrap();
        match &motd.desired {
            DesiredState::FilePresent { content, attrs } => {
                assert_eq!(content.bytes, b"hello\n");
                assert_eq!(attrs.mode, Some(Mode(0o644)));
                assert_eq!(attrs.owner.as_deref(), Some("root"));
            }
            other => panic!("unexpected state: {other:?}"),
        }
        assert_eq!(
            manifest.get("service:sshd.service").unwrap().desired,
            DesiredState::ServiceDisabled { now: false }
        );
    }

    #[test]
    fn sysctl_key_alias_loads_as_sysctl() {
        let manifest = load_str(
            "[[resource]]\nkind = \"sysctl-key\"\ntarget = \"net.ipv4.ip_forward\"\nvalue = \"0\"\n",
        )
        .unwrap();
        assert_eq!(manifest.entries()[0].kind, ResourceKind::Sysctl);
        assert_eq!(manifest.entries()[0].id, "sysctl:net.ipv4.ip_forward");
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let err = load_str("[[resource]]\nid = \"x\"\nkind = \"flatpak\"\ntarget = \"org.gimp\"\n")
            .unwrap_err();
        assert!(matches!(
            err,
            ValidationError::UnknownKind { ref id, ref kind } if id == "x" && kind == "flatpak"
        ));
    }

    #[test]
    fn unknown_field_is_a_parse_error() {
        let err = load_str("[[resource]]\nkind = \"package\"\ntarget = \"git\"\nstaet = \"absent\"\n")
            .unwrap_err();
        assert!(matches!(err, ValidationError::Parse { .. }));
    }

    #[test]
    fn field_not_valid_for_kind() {
        let err = load_str("[[resource]]\nkind = \"package\"\ntarget = \"git\"\nmode = \"644\"\n")
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "resource 'package:git': field 'mode' is not valid for kind 'package'"
        );
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let err = load_str(
            "[[resource]]\nkind = \"package\"\ntarget = \"git\"\n\n[[resource]]\nkind = \"package\"\ntarget = \"git\"\nstate = \"absent\"\n",
        )
        .unwrap_err();
        assert!(matches!(err, ValidationError::DuplicateId(ref id) if id == "package:git"));
    }

    #[test]
    fn cycle_is_rejected() {
        let err = load_str(
            r#"
[[resource]]
id = "a"
kind = "package"
target = "a"
depends_on = ["b"]

[[resource]]
id = "b"
kind = "package"
target = "b"
dependsOn = ["a"]
"#,
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "dependency cycle detected: a → b → a");
    }

    #[test]
    fn ordered_puts_dependencies_first() {
        let manifest = load_str(
            r#"
[[resource]]
id = "sshd"
kind = "service"
target = "sshd.service"
depends_on = ["openssh"]

[[resource]]
id = "openssh"
kind = "package"
target = "openssh-server"
"#,
        )
        .unwrap();
        let ids: Vec<_> = manifest.ordered().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["openssh", "sshd"]);
    }

    #[test]
    fn content_and_source_are_exclusive() {
        let err = load_str(
            "[[resource]]\nkind = \"file\"\ntarget = \"/etc/motd\"\ncontent = \"x\"\nsource = \"motd\"\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("mutually exclusive"));
    }

    #[test]
    fn present_file_needs_content() {
        let err = load_str("[[resource]]\nkind = \"file\"\ntarget = \"/etc/motd\"\n").unwrap_err();
        assert!(err.to_string().contains("one of 'content' or 'source'"));
    }

    #[test]
    fn bad_mode_is_rejected() {
        let err = load_str(
            "[[resource]]\nkind = \"directory\"\ntarget = \"/srv\"\nmode = \"rwxr-xr-x\"\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("invalid mode 'rwxr-xr-x'"));
    }

    #[test]
    fn relative_file_target_is_rejected() {
        let err = load_str("[[resource]]\nkind = \"file\"\ntarget = \"motd\"\ncontent = \"\"\n")
            .unwrap_err();
        assert!(err.to_string().contains("absolute path"));
    }

    #[test]
    fn sysctl_requires_value() {
        let err = load_str("[[resource]]\nkind = \"sysctl\"\ntarget = \"vm.swappiness\"\n").unwrap_err();
        assert!(err.to_string().contains("require a 'value'"));
    }

    #[test]
    fn sysctl_value_is_normalized() {
        let manifest = load_str(
            "[[resource]]\nkind = \"sysctl\"\ntarget = \"net.ipv4.tcp_rmem\"\nvalue = \"4096  87380\t6291456\"\n",
        )
        .unwrap();
        assert_eq!(
            manifest.entries()[0].desired,
            DesiredState::SysctlValue {
                value: "4096 87380 6291456".to_string()
            }
        );
    }

    #[test]
    fn invalid_state_is_rejected() {
        let err = load_str("[[resource]]\nkind = \"service\"\ntarget = \"sshd\"\nstate = \"running\"\n")
            .unwrap_err();
        assert!(err.to_string().contains("expected 'enabled' or 'disabled'"));
    }

    #[test]
    fn absent_file_rejects_attributes() {
        let err = load_str(
            "[[resource]]\nkind = \"file\"\ntarget = \"/etc/motd\"\nstate = \"absent\"\nmode = \"644\"\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("only apply to state 'present'"));
    }

    #[test]
    fn source_is_read_relative_to_manifest() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("etc/ssh")).unwrap();
        std::fs::write(dir.path().join("etc/ssh/sshd_config"), "PermitRootLogin no\n").unwrap();
        let path = write_manifest(
            dir.path(),
            "[[resource]]\nkind = \"file\"\ntarget = \"/etc/ssh/sshd_config\"\nsource = \"etc/ssh/sshd_config\"\n",
        );

        let manifest = load(&path, &BTreeMap::new(), &BTreeMap::new()).unwrap();
        match &manifest.entries()[0].desired {
            DesiredState::FilePresent { content, .. } => {
                assert_eq!(content.bytes, b"PermitRootLogin no\n");
                assert!(matches!(
                    content.origin,
                    ContentOrigin::Source { ref path } if path.ends_with("etc/ssh/sshd_config")
                ));
            }
            other => panic!("unexpected state: {other:?}"),
        }
    }

    #[test]
    fn missing_source_is_io_error() {
        let err = load_str(
            "[[resource]]\nkind = \"file\"\ntarget = \"/etc/motd\"\nsource = \"missing\"\n",
        )
        .unwrap_err();
        assert!(matches!(err, ValidationError::Io { .. }));
    }

    #[test]
    fn missing_manifest_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load(
            &dir.path().join("absent.toml"),
            &BTreeMap::new(),
            &BTreeMap::new(),
        )
        .unwrap_err();
        assert!(matches!(err, ValidationError::Io { .. }));
    }

    #[test]
    fn templates_use_builtins_and_vars() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_manifest(
            dir.path(),
            r#"
[vars]
user = "cameron"

[[resource]]
id = "rpmfusion-free"
kind = "package"
target = "rpmfusion-free-release"
source = "https://download1.rpmfusion.org/free/fedora/rpmfusion-free-release-{{ fedora_version }}.noarch.rpm"

[[resource]]
id = "ssh-dir"
kind = "directory"
target = "{{ home }}/.ssh"
owner = "{{ user }}"
"#,
        );
        let manifest = load(&path, &builtins(), &BTreeMap::new()).unwrap();
        assert_eq!(
            manifest.get("rpmfusion-free").unwrap().desired,
            DesiredState::PackagePresent {
                source: Some(
                    "https://download1.rpmfusion.org/free/fedora/rpmfusion-free-release-40.noarch.rpm"
                        .to_string()
                )
            }
        );
        let ssh = manifest.get("ssh-dir").unwrap();
        assert_eq!(ssh.target, "/home/test/.ssh");
        assert!(matches!(
            &ssh.desired,
            DesiredState::DirectoryPresent { attrs } if attrs.owner.as_deref() == Some("cameron")
        ));
    }

    #[test]
    fn overrides_beat_manifest_vars_which_beat_builtins() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_manifest(
            dir.path(),
            r#"
[vars]
fedora_version = "39"
greeting = "hi"

[[resource]]
id = "motd"
kind = "file"
target = "/etc/motd"
content = "{{ greeting }} from f{{ fedora_version }}"
"#,
        );
        let overrides = BTreeMap::from([("greeting".to_string(), "hello".to_string())]);
        let manifest = load(&path, &builtins(), &overrides).unwrap();
        match &manifest.get("motd").unwrap().desired {
            DesiredState::FilePresent { content, .. } => {
                assert_eq!(content.bytes, b"hello from f39");
            }
            other => panic!("unexpected state: {other:?}"),
        }
    }

    #[test]
    fn undefined_variable_is_rejected() {
        let err = load_str(
            "[[resource]]\nid = \"motd\"\nkind = \"file\"\ntarget = \"/etc/motd\"\ncontent = \"{{ nope }}\"\n",
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ValidationError::UndefinedVariable { ref id, ref name } if id == "motd" && name == "nope"
        ));
    }

    #[test]
    fn manifest_new_validates() {
        let entries = vec![
            Entry::new("a", "a", DesiredState::PackageAbsent).depends_on(["missing"]),
        ];
        assert!(matches!(
            Manifest::new(entries),
            Err(ValidationError::UnknownDependency { .. })
        ));
    }
}
