//! Dependency manifest handling.
//!
//! The manifest is a pip-style requirements file pinning the Python runtime
//! that the inference server runs in. Lines are either pinned requirements
//! (optionally guarded by an environment marker), direct wheel URLs with a
//! marker, or pip option lines. Comment lines act as section headings only.

mod lint;
mod marker;
mod requirement;
mod version;

pub use lint::{lint_manifest, LintIssue, LintReport, LintRule, Severity};
pub use marker::{
    detect_python_version, Marker, MarkerEnvironment, MarkerOp, MarkerValue, MarkerVariable,
};
pub use requirement::{
    normalize_package_name, parse_requirement, Directive, PackageName, Requirement,
    RequirementSource, WheelFilename,
};
pub use version::{compare_versions, SpecifierOp, Version, VersionSpecifier};

use crate::{CaptionKitError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// One meaningful manifest line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ManifestEntry {
    Requirement(Requirement),
    Directive(Directive),
}

/// A parsed manifest, entries kept in file order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub entries: Vec<ManifestEntry>,
}

impl Manifest {
    pub fn requirements(&self) -> impl Iterator<Item = &Requirement> {
        self.entries.iter().filter_map(|entry| match entry {
            ManifestEntry::Requirement(req) => Some(req),
            ManifestEntry::Directive(_) => None,
        })
    }

    pub fn directives(&self) -> impl Iterator<Item = &Directive> {
        self.entries.iter().filter_map(|entry| match entry {
            ManifestEntry::Directive(directive) => Some(directive),
            ManifestEntry::Requirement(_) => None,
        })
    }

    /// Requirements that apply in `env`: no marker, or a marker that holds.
    pub fn active_requirements<'a>(
        &'a self,
        env: &'a MarkerEnvironment,
    ) -> impl Iterator<Item = &'a Requirement> + 'a {
        self.requirements().filter(move |req| {
            req.marker
                .as_ref()
                .map_or(true, |marker| marker.evaluate(env))
        })
    }

    /// Constraints text for `env`, sorted by normalised package name.
    ///
    /// Pinned packages render as `name==version`, direct references as their
    /// URL. Requirements without an exact pin are skipped.
    pub fn render_pins(&self, env: &MarkerEnvironment) -> String {
        let mut lines: Vec<(String, String)> = self
            .active_requirements(env)
            .filter_map(|req| {
                let line = match (req.pinned_version(), req.url()) {
                    (Some(version), _) => format!("{}=={}", req.name.original, version),
                    (None, Some(url)) => url.to_string(),
                    (None, None) => return None,
                };
                Some((req.name.normalized.clone(), line))
            })
            .collect();
        lines.sort();

        let mut out = String::new();
        for (_, line) in lines {
            out.push_str(&line);
            out.push('\n');
        }
        out
    }

    /// Number of requirement lines.
    pub fn len(&self) -> usize {
        self.requirements().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Parse manifest text.
pub fn parse_manifest(text: &str) -> Result<Manifest> {
    let mut entries = Vec::new();
    let mut section: Option<String> = None;
    let mut pending: Option<(usize, String)> = None;

    for (idx, raw) in text.lines().enumerate() {
        let line_number = idx + 1;

        let (start, mut logical) = match pending.take() {
            Some((start, mut buf)) => {
                buf.push(' ');
                buf.push_str(raw.trim());
                (start, buf)
            }
            None => {
                let trimmed = raw.trim();
                if trimmed.is_empty() {
                    continue;
                }
                if let Some(comment) = trimmed.strip_prefix('#') {
                    let heading = comment.trim();
                    if !heading.is_empty() {
                        section = Some(heading.to_string());
                    }
                    continue;
                }
                (line_number, trimmed.to_string())
            }
        };

        if let Some(stripped) = logical.strip_suffix('\\') {
            pending = Some((start, stripped.trim_end().to_string()));
            continue;
        }

        strip_inline_comment(&mut logical);
        let logical = logical.trim();
        if logical.is_empty() {
            continue;
        }

        if logical.starts_with('-') {
            entries.push(ManifestEntry::Directive(Directive::parse(logical, start)?));
        } else {
            let mut req = parse_requirement(logical, start)?;
            req.section = section.clone();
            entries.push(ManifestEntry::Requirement(req));
        }
    }

    if let Some((start, _)) = pending {
        return Err(CaptionKitError::ManifestParse {
            line: start,
            message: "line continuation at end of file".to_string(),
        });
    }

    debug!("Parsed manifest with {} entries", entries.len());
    Ok(Manifest { entries })
}

/// Read and parse a manifest file.
pub fn load_manifest(path: &Path) -> Result<Manifest> {
    if !path.is_file() {
        return Err(CaptionKitError::FileNotFound(path.to_path_buf()));
    }
    let text =
        std::fs::read_to_string(path).map_err(|e| CaptionKitError::io_with_path(e, path))?;
    parse_manifest(&text)
}

/// Drop a ` #` comment; a `#` glued to a token (URL fragments) is kept.
fn strip_inline_comment(line: &mut String) {
    let cut = line
        .match_indices('#')
        .map(|(i, _)| i)
        .find(|&i| i > 0 && line[..i].ends_with(char::is_whitespace));
    if let Some(i) = cut {
        line.truncate(i);
    }
}
