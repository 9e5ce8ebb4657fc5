//! `provision.toml` loading and validation.
//!
//! The config file lives at the repository root. Every path in it is relative:
//! patch files to the config file's directory, target and template paths to
//! the extraction directory, and the workspace (where the archive and the
//! staging tree land) to the root.

use serde::Deserialize;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ProvisionError, Result};
use crate::paths::{
    archive_file_name, resolve_repo_path, strip_archive_extension, validate_id,
    validate_relative_path,
};
use crate::template::Marker;

pub const CONFIG_FILENAME: &str = "provision.toml";
pub const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_PATCH_STRIP: u32 = 1;

/// On-disk encoding of the vendor archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    Tar,
    TarGz,
    TarZst,
}

impl ArchiveFormat {
    pub fn detect(file_name: &str) -> Option<Self> {
        let lower = file_name.to_ascii_lowercase();
        if lower.ends_with(".zip") {
            Some(ArchiveFormat::Zip)
        } else if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
            Some(ArchiveFormat::TarGz)
        } else if lower.ends_with(".tar.zst") {
            Some(ArchiveFormat::TarZst)
        } else if lower.ends_with(".tar") {
            Some(ArchiveFormat::Tar)
        } else {
            None
        }
    }
}

/// Where the vendor archive comes from and what it unpacks to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveDescriptor {
    pub url: String,
    /// Local archive filename inside the workspace.
    pub file_name: String,
    /// Top-level directory the archive unpacks to.
    pub dir_name: String,
    pub format: ArchiveFormat,
    /// Lowercase hex digest checked after a fresh download.
    pub sha256: Option<String>,
    pub timeout: Duration,
}

impl ArchiveDescriptor {
    /// Derives the local filename and extraction directory from the URL.
    pub fn from_url(url: &str) -> std::result::Result<Self, String> {
        let url = url.trim();
        if url.is_empty() {
            return Err("archive.url must not be empty".to_string());
        }
        let file_name = archive_file_name(url)
            .ok_or_else(|| format!("cannot derive an archive filename from '{url}'"))?;
        let format = ArchiveFormat::detect(&file_name).ok_or_else(|| {
            format!(
                "unsupported archive format '{file_name}' (expected .zip, .tar, .tar.gz, .tgz or .tar.zst)"
            )
        })?;
        let dir_name = strip_archive_extension(&file_name);
        Ok(Self {
            url: url.to_string(),
            file_name,
            dir_name,
            format,
            sha256: None,
            timeout: Duration::from_secs(DEFAULT_DOWNLOAD_TIMEOUT_SECS),
        })
    }

    pub fn archive_path(&self, workspace: &Path) -> PathBuf {
        workspace.join(&self.file_name)
    }

    pub fn staging_dir(&self, workspace: &Path) -> PathBuf {
        workspace.join(&self.dir_name)
    }
}

/// A firmware subsystem inside the extracted tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub id: String,
    /// Relative to the extraction directory.
    pub path: PathBuf,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateField {
    pub name: String,
    pub prompt: String,
}

/// Template introduced by a patch; paths are relative to the target directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialTemplate {
    pub source: PathBuf,
    pub output: PathBuf,
    pub fields: Vec<TemplateField>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchSpec {
    pub target: String,
    /// `None` for a target's only patch; otherwise mutually exclusive with the
    /// target's other variants.
    pub variant: Option<String>,
    /// Resolved path of the unified diff.
    pub file: PathBuf,
    pub template: Option<CredentialTemplate>,
}

impl PatchSpec {
    /// `<target>` or `<target>-<variant>`; used in task names and the state file.
    pub fn id(&self) -> String {
        match &self.variant {
            Some(variant) => format!("{}-{}", self.target, variant),
            None => self.target.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProvisionConfig {
    pub root: PathBuf,
    pub config_path: PathBuf,
    /// Directory holding the archive, the staging tree and the lock file.
    pub workspace: PathBuf,
    pub archive: ArchiveDescriptor,
    pub targets: Vec<Target>,
    pub patches: Vec<PatchSpec>,
    pub marker: Marker,
    pub patch_strip: u32,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProvisionToml {
    archive: ArchiveToml,
    workspace: Option<WorkspaceToml>,
    markers: Option<MarkersToml>,
    #[serde(default)]
    targets: Vec<TargetToml>,
    #[serde(default)]
    patches: Vec<PatchToml>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ArchiveToml {
    url: String,
    sha256: Option<String>,
    file_name: Option<String>,
    dir_name: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct WorkspaceToml {
    dir: Option<String>,
    patch_strip: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct MarkersToml {
    open: String,
    close: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TargetToml {
    id: String,
    path: String,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PatchToml {
    target: String,
    variant: Option<String>,
    file: String,
    template: Option<TemplateToml>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TemplateToml {
    source: String,
    output: String,
    fields: Vec<FieldToml>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FieldToml {
    name: String,
    prompt: Option<String>,
}

impl ProvisionConfig {
    /// Loads `<root>/provision.toml`.
    pub fn load(root: &Path) -> Result<Self> {
        Self::load_from(root, &root.join(CONFIG_FILENAME))
    }

    pub fn load_from(root: &Path, config_path: &Path) -> Result<Self> {
        let text = fs::read_to_string(config_path).map_err(|err| ProvisionError::Config {
            path: config_path.to_path_buf(),
            reason: format!("reading config: {err}"),
        })?;
        Self::from_toml_str(root, config_path, &text)
    }

    pub fn from_toml_str(root: &Path, config_path: &Path, text: &str) -> Result<Self> {
        let invalid = |reason: String| ProvisionError::Config {
            path: config_path.to_path_buf(),
            reason,
        };
        let parsed: ProvisionToml =
            toml::from_str(text).map_err(|err| invalid(format!("parsing config: {err}")))?;
        let config_dir = config_path.parent().unwrap_or(root);

        let archive = parse_archive(parsed.archive).map_err(invalid)?;

        let (workspace, patch_strip) = match parsed.workspace {
            Some(ws) => {
                let dir = match ws.dir.as_deref() {
                    Some(dir) => resolve_repo_path(root, dir.trim()),
                    None => root.to_path_buf(),
                };
                (dir, ws.patch_strip.unwrap_or(DEFAULT_PATCH_STRIP))
            }
            None => (root.to_path_buf(), DEFAULT_PATCH_STRIP),
        };

        let marker = match parsed.markers {
            Some(markers) => {
                if markers.open.is_empty() || markers.close.is_empty() {
                    return Err(invalid(
                        "markers.open and markers.close must not be empty".to_string(),
                    ));
                }
                Marker::new(markers.open, markers.close)
            }
            None => Marker::default(),
        };

        let targets = parse_targets(parsed.targets).map_err(invalid)?;
        let patches = parse_patches(config_dir, &targets, parsed.patches).map_err(invalid)?;

        Ok(Self {
            root: root.to_path_buf(),
            config_path: config_path.to_path_buf(),
            workspace,
            archive,
            targets,
            patches,
            marker,
            patch_strip,
        })
    }

    pub fn archive_path(&self) -> PathBuf {
        self.archive.archive_path(&self.workspace)
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.archive.staging_dir(&self.workspace)
    }

    pub fn target(&self, id: &str) -> Option<&Target> {
        self.targets.iter().find(|t| t.id == id)
    }

    pub fn target_dir(&self, target: &Target) -> PathBuf {
        self.staging_dir().join(&target.path)
    }

    pub fn patch(&self, id: &str) -> Option<&PatchSpec> {
        self.patches.iter().find(|p| p.id() == id)
    }

    /// Distinct variants across all patches, sorted.
    pub fn variants(&self) -> Vec<String> {
        self.patches
            .iter()
            .filter_map(|p| p.variant.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// For each target (in declaration order) the patch that configures
    /// `variant`: the target's variant-less patch, or its patch with that
    /// variant. Targets with neither are skipped.
    pub fn patches_for_variant(&self, variant: &str) -> Vec<&PatchSpec> {
        self.targets
            .iter()
            .filter_map(|target| {
                let mut candidates = self.patches.iter().filter(|p| p.target == target.id);
                candidates.find(|p| match &p.variant {
                    None => true,
                    Some(v) => v == variant,
                })
            })
            .collect()
    }
}

fn parse_archive(archive: ArchiveToml) -> std::result::Result<ArchiveDescriptor, String> {
    let mut descriptor = ArchiveDescriptor::from_url(&archive.url)?;

    if let Some(file_name) = archive.file_name {
        let file_name = file_name.trim().to_string();
        if file_name.is_empty() || file_name.contains('/') {
            return Err(format!(
                "archive.file_name '{file_name}' must be a plain filename"
            ));
        }
        descriptor.format = ArchiveFormat::detect(&file_name)
            .ok_or_else(|| format!("unsupported archive format '{file_name}'"))?;
        descriptor.dir_name = strip_archive_extension(&file_name);
        descriptor.file_name = file_name;
    }
    if let Some(dir_name) = archive.dir_name {
        let dir_name = dir_name.trim().to_string();
        if dir_name.is_empty() || dir_name.contains('/') || dir_name == ".." {
            return Err(format!(
                "archive.dir_name '{dir_name}' must be a plain directory name"
            ));
        }
        descriptor.dir_name = dir_name;
    }
    if let Some(sha256) = archive.sha256 {
        let sha256 = sha256.trim().to_ascii_lowercase();
        if !is_hex_64(&sha256) {
            return Err(format!("archive.sha256 '{sha256}' is not a sha256 hex digest"));
        }
        descriptor.sha256 = Some(sha256);
    }
    if let Some(secs) = archive.timeout_secs {
        if secs == 0 {
            return Err("archive.timeout_secs must be greater than zero".to_string());
        }
        descriptor.timeout = Duration::from_secs(secs);
    }
    Ok(descriptor)
}

fn parse_targets(raw: Vec<TargetToml>) -> std::result::Result<Vec<Target>, String> {
    if raw.is_empty() {
        return Err("at least one [[targets]] entry is required".to_string());
    }
    let mut seen = BTreeSet::new();
    let mut targets = Vec::with_capacity(raw.len());
    for target in raw {
        let id = validate_id(&target.id, "targets.id")?;
        if !seen.insert(id.clone()) {
            return Err(format!("duplicate target id '{id}'"));
        }
        let path = validate_relative_path(target.path.trim(), "targets.path")?;
        targets.push(Target {
            id,
            path,
            description: target.description,
        });
    }
    Ok(targets)
}

fn parse_patches(
    config_dir: &Path,
    targets: &[Target],
    raw: Vec<PatchToml>,
) -> std::result::Result<Vec<PatchSpec>, String> {
    let mut patches: Vec<PatchSpec> = Vec::with_capacity(raw.len());
    for patch in raw {
        let target = patch.target.trim().to_string();
        if !targets.iter().any(|t| t.id == target) {
            return Err(format!("patch references unknown target '{target}'"));
        }
        let variant = match patch.variant.as_deref() {
            Some(v) => Some(validate_id(v, "patches.variant")?),
            None => None,
        };
        if patch.file.trim().is_empty() {
            return Err(format!("patch for target '{target}' has an empty file"));
        }
        let template = patch.template.map(parse_template).transpose()?;

        let spec = PatchSpec {
            target,
            variant,
            file: resolve_repo_path(config_dir, patch.file.trim()),
            template,
        };

        let siblings = patches.iter().filter(|p| p.target == spec.target);
        for sibling in siblings {
            match (&sibling.variant, &spec.variant) {
                (None, _) | (_, None) => {
                    return Err(format!(
                        "target '{}' mixes a variant-less patch with other patches; \
                         give every patch for a shared target a variant",
                        spec.target
                    ))
                }
                (Some(a), Some(b)) if a == b => {
                    return Err(format!(
                        "duplicate patch variant '{}' for target '{}'",
                        b, spec.target
                    ))
                }
                _ => {}
            }
        }
        patches.push(spec);
    }
    Ok(patches)
}

fn parse_template(raw: TemplateToml) -> std::result::Result<CredentialTemplate, String> {
    let source = validate_relative_path(raw.source.trim(), "template.source")?;
    let output = validate_relative_path(raw.output.trim(), "template.output")?;
    if source == output {
        return Err(format!(
            "template.output '{}' must differ from template.source",
            output.display()
        ));
    }
    if raw.fields.is_empty() {
        return Err("template.fields must name at least one field".to_string());
    }

    let mut seen = BTreeSet::new();
    let mut fields = Vec::with_capacity(raw.fields.len());
    for field in raw.fields {
        let name = field.name.trim().to_string();
        if name.is_empty()
            || !name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(format!(
                "template field '{name}' may only contain ASCII letters, digits and '_'"
            ));
        }
        if !seen.insert(name.clone()) {
            return Err(format!("duplicate template field '{name}'"));
        }
        let prompt = field
            .prompt
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| name.clone());
        fields.push(TemplateField { name, prompt });
    }

    Ok(CredentialTemplate {
        source,
        output,
        fields,
    })
}

fn is_hex_64(s: &str) -> bool {
    s.len() == 64 && s.chars().all(|c| c.is_ascii_hexdigit())
}
