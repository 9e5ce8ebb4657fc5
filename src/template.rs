//! Credential template rendering.
//!
//! Markers are replaced in a single left-to-right pass, so a substituted value
//! is never rescanned for further markers. Values are written verbatim.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::error::{io_context, ProvisionError, Result};

/// Delimiters wrapping a placeholder name, `{{SSID}}` by default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Marker {
    pub open: String,
    pub close: String,
}

impl Marker {
    pub fn new(open: impl Into<String>, close: impl Into<String>) -> Self {
        Self {
            open: open.into(),
            close: close.into(),
        }
    }

    pub fn wrap(&self, name: &str) -> String {
        format!("{}{}{}", self.open, name, self.close)
    }
}

impl Default for Marker {
    fn default() -> Self {
        Self::new("{{", "}}")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderReport {
    pub substitutions: usize,
    /// Marker names found in the template with no supplied value.
    pub unresolved: Vec<String>,
}

/// Replaces every known marker in `text`.
pub fn substitute(
    text: &str,
    tokens: &BTreeMap<String, String>,
    marker: &Marker,
) -> (String, RenderReport) {
    let mut report = RenderReport::default();
    if marker.open.is_empty() || marker.close.is_empty() {
        return (text.to_string(), report);
    }
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    // A delimiter that does not open a known marker is copied one character
    // at a time, so a stray `{{` never hides a marker that follows it.
    while let Some(start) = rest.find(&marker.open) {
        out.push_str(&rest[..start]);
        let after_open = &rest[start + marker.open.len()..];

        if let Some((name, value)) = known_marker_at(after_open, tokens, &marker.close) {
            out.push_str(value);
            report.substitutions += 1;
            rest = &after_open[name.len() + marker.close.len()..];
            continue;
        }

        if let Some(end) = after_open.find(&marker.close) {
            let name = &after_open[..end];
            if is_placeholder_name(name) && !report.unresolved.iter().any(|n| n == name) {
                report.unresolved.push(name.to_string());
            }
        }
        let step = rest[start..].chars().next().map_or(1, char::len_utf8);
        out.push_str(&rest[start..start + step]);
        rest = &rest[start + step..];
    }
    out.push_str(rest);

    (out, report)
}

/// Renders `template_path` into `output_path`, leaving the template untouched.
///
/// `prerequisite` names the task that introduces the template and is reported
/// when the template is missing.
pub fn render(
    template_path: &Path,
    tokens: &BTreeMap<String, String>,
    output_path: &Path,
    marker: &Marker,
    prerequisite: &str,
) -> Result<RenderReport> {
    if !template_path.is_file() {
        return Err(ProvisionError::TemplateNotFound {
            path: template_path.to_path_buf(),
            prerequisite: prerequisite.to_string(),
        });
    }
    let text = fs::read_to_string(template_path).map_err(io_context(format!(
        "reading template '{}'",
        template_path.display()
    )))?;

    let (rendered, report) = substitute(&text, tokens, marker);
    for name in &report.unresolved {
        tracing::warn!(
            "template '{}' still contains marker '{}' after rendering",
            template_path.display(),
            marker.wrap(name)
        );
    }

    if let Some(parent) = output_path.parent() {
        fs::create_dir_all(parent).map_err(io_context(format!(
            "creating output directory '{}'",
            parent.display()
        )))?;
    }
    fs::write(output_path, rendered).map_err(io_context(format!(
        "writing rendered credentials '{}'",
        output_path.display()
    )))?;
    tracing::info!(
        "rendered '{}' -> '{}' ({} substitutions)",
        template_path.display(),
        output_path.display(),
        report.substitutions
    );

    Ok(report)
}

/// The supplied token whose `name + close` starts `text`, if any.
fn known_marker_at<'t>(
    text: &str,
    tokens: &'t BTreeMap<String, String>,
    close: &str,
) -> Option<(&'t str, &'t str)> {
    tokens
        .iter()
        .filter(|(name, _)| !name.is_empty())
        .filter(|(name, _)| {
            text.strip_prefix(name.as_str())
                .is_some_and(|tail| tail.starts_with(close))
        })
        .max_by_key(|(name, _)| name.len())
        .map(|(name, value)| (name.as_str(), value.as_str()))
}

fn is_placeholder_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}
