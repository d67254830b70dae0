//! Single requirement lines.
//!
//! Handles the three shapes a manifest line can take:
//! - `package==version` with an optional `; marker`
//! - `package[extra] @ https://...` (named direct reference)
//! - `https://.../package-1.0-cp311-cp311-win_amd64.whl; marker` (bare wheel URL)

use super::marker::Marker;
use super::version::VersionSpecifier;
use crate::{CaptionKitError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

static NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z0-9](?:[A-Za-z0-9._-]*[A-Za-z0-9])?)").expect("name regex must compile")
});

static NORMALIZE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[-_.]+").expect("normalize regex must compile"));

/// A package name as written, plus its normalised comparison form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageName {
    /// Name exactly as it appears in the manifest.
    pub original: String,
    /// Lowercased with runs of `-`, `_` and `.` collapsed to `-`.
    pub normalized: String,
}

impl PackageName {
    pub fn new(original: &str) -> Self {
        Self {
            original: original.to_string(),
            normalized: normalize_package_name(original),
        }
    }
}

impl fmt::Display for PackageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.original)
    }
}

/// Normalise a distribution name for comparison.
pub fn normalize_package_name(name: &str) -> String {
    NORMALIZE_RE
        .replace_all(name.trim(), "-")
        .to_lowercase()
}

/// Components of a wheel file name
/// (`{distribution}-{version}(-{build})?-{python}-{abi}-{platform}.whl`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WheelFilename {
    pub distribution: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_tag: Option<String>,
    pub python_tag: String,
    pub abi_tag: String,
    pub platform_tag: String,
}

impl WheelFilename {
    /// Parse a wheel file name; `None` if it is not one.
    pub fn parse(file_name: &str) -> Option<Self> {
        let stem = file_name.strip_suffix(".whl")?;
        let parts: Vec<&str> = stem.split('-').collect();
        let (distribution, version, build_tag, tags) = match parts.as_slice() {
            [d, v, py, abi, plat] => (*d, *v, None, [*py, *abi, *plat]),
            [d, v, b, py, abi, plat] => (*d, *v, Some(b.to_string()), [*py, *abi, *plat]),
            _ => return None,
        };
        if distribution.is_empty() || version.is_empty() || tags.iter().any(|t| t.is_empty()) {
            return None;
        }
        Some(Self {
            distribution: distribution.to_string(),
            version: version.to_string(),
            build_tag,
            python_tag: tags[0].to_string(),
            abi_tag: tags[1].to_string(),
            platform_tag: tags[2].to_string(),
        })
    }

    /// Whether any platform tag targets Windows (`win32`, `win_amd64`, ...).
    pub fn is_windows(&self) -> bool {
        self.platform_tag.split('.').any(|tag| tag.starts_with("win"))
    }

    /// Whether the wheel is platform independent.
    pub fn is_universal(&self) -> bool {
        self.platform_tag == "any"
    }

    /// `major.minor` Python versions named by `cpXY`/`pyXY` tags. Tags like
    /// `py3` that name no minor version are skipped.
    pub fn python_versions(&self) -> Vec<String> {
        self.python_tag
            .split('.')
            .filter_map(|tag| {
                let digits = tag
                    .strip_prefix("cp")
                    .or_else(|| tag.strip_prefix("py"))
                    .or_else(|| tag.strip_prefix("pp"))?;
                if digits.len() < 2 || !digits.chars().all(|c| c.is_ascii_digit()) {
                    return None;
                }
                let (major, minor) = digits.split_at(1);
                Some(format!("{}.{}", major, minor))
            })
            .collect()
    }
}

/// Where a requirement's artifact comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RequirementSource {
    /// Resolved from the index against version specifiers (possibly none).
    Index { specifiers: Vec<VersionSpecifier> },
    /// `name @ url`.
    NamedUrl {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        wheel: Option<WheelFilename>,
    },
    /// A bare URL line; the name comes from the wheel file name.
    Url {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        wheel: Option<WheelFilename>,
    },
}

/// One requirement line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirement {
    pub name: PackageName,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extras: Vec<String>,
    pub source: RequirementSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marker: Option<Marker>,
    /// 1-based line number of the first physical line.
    pub line_number: usize,
    /// Text of the closest preceding comment line, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
}

impl Requirement {
    /// The exact version if this is a single `==` pin.
    pub fn pinned_version(&self) -> Option<&str> {
        match &self.source {
            RequirementSource::Index { specifiers } => match specifiers.as_slice() {
                [only] if only.is_exact_pin() => Some(only.version.as_str()),
                _ => None,
            },
            _ => None,
        }
    }

    /// URL for direct references.
    pub fn url(&self) -> Option<&str> {
        match &self.source {
            RequirementSource::NamedUrl { url, .. } | RequirementSource::Url { url, .. } => {
                Some(url)
            }
            RequirementSource::Index { .. } => None,
        }
    }

    /// Parsed wheel file name for direct references to `.whl` files.
    pub fn wheel(&self) -> Option<&WheelFilename> {
        match &self.source {
            RequirementSource::NamedUrl { wheel, .. } | RequirementSource::Url { wheel, .. } => {
                wheel.as_ref()
            }
            RequirementSource::Index { .. } => None,
        }
    }

    /// Requirement text without the marker, e.g. `torch==2.1.2`.
    pub fn to_spec_string(&self) -> String {
        let extras = if self.extras.is_empty() {
            String::new()
        } else {
            format!("[{}]", self.extras.join(","))
        };
        match &self.source {
            RequirementSource::Index { specifiers } => {
                let specs: Vec<String> = specifiers.iter().map(ToString::to_string).collect();
                format!("{}{}{}", self.name, extras, specs.join(","))
            }
            RequirementSource::NamedUrl { url, .. } => format!("{}{} @ {}", self.name, extras, url),
            RequirementSource::Url { url, .. } => url.clone(),
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.marker {
            Some(marker) => write!(f, "{}; {}", self.to_spec_string(), marker),
            None => f.write_str(&self.to_spec_string()),
        }
    }
}

/// A pip option line such as `--extra-index-url https://...` or `-r base.txt`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Directive {
    pub line_number: usize,
    pub option: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl Directive {
    pub(crate) fn parse(line: &str, line_number: usize) -> Result<Self> {
        let (option, value) = match line.find(|c: char| c == '=' || c.is_whitespace()) {
            Some(idx) => (&line[..idx], Some(line[idx + 1..].trim())),
            None => (line, None),
        };
        if option.len() < 2 || option.trim_start_matches('-').is_empty() {
            return Err(CaptionKitError::ManifestParse {
                line: line_number,
                message: format!("invalid option '{}'", line),
            });
        }
        Ok(Self {
            line_number,
            option: option.to_string(),
            value: value.filter(|v| !v.is_empty()).map(String::from),
        })
    }
}

/// Parse one logical requirement line (comments already stripped).
pub fn parse_requirement(line: &str, line_number: usize) -> Result<Requirement> {
    let err = |message: String| CaptionKitError::ManifestParse {
        line: line_number,
        message,
    };
    let line = line.trim();
    if line.is_empty() {
        return Err(err("empty requirement".to_string()));
    }

    if is_url(line) {
        let (url, marker) = split_url_marker(line);
        let marker = parse_marker(marker, line_number)?;
        let wheel = wheel_from_url(url);
        let name = match &wheel {
            Some(wheel) => PackageName::new(&wheel.distribution),
            None => PackageName::new(url_file_stem(url).as_deref().unwrap_or(url)),
        };
        return Ok(Requirement {
            name,
            extras: Vec::new(),
            source: RequirementSource::Url {
                url: url.to_string(),
                wheel,
            },
            marker,
            line_number,
            section: None,
        });
    }

    let name = NAME_RE
        .find(line)
        .map(|m| m.as_str())
        .ok_or_else(|| err(format!("expected a package name at '{}'", line)))?;
    let mut rest = line[name.len()..].trim_start();

    let mut extras = Vec::new();
    if let Some(after) = rest.strip_prefix('[') {
        let close = after
            .find(']')
            .ok_or_else(|| err("unterminated extras list".to_string()))?;
        extras = after[..close]
            .split(',')
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .map(String::from)
            .collect();
        rest = after[close + 1..].trim_start();
    }

    if let Some(after_at) = rest.strip_prefix('@') {
        let (url, marker) = split_url_marker(after_at.trim());
        if !is_url(url) {
            return Err(err(format!("expected a URL after '@', found '{}'", url)));
        }
        return Ok(Requirement {
            name: PackageName::new(name),
            extras,
            source: RequirementSource::NamedUrl {
                url: url.to_string(),
                wheel: wheel_from_url(url),
            },
            marker: parse_marker(marker, line_number)?,
            line_number,
            section: None,
        });
    }

    let (spec_text, marker) = match rest.find(';') {
        Some(idx) => (rest[..idx].trim(), Some(rest[idx + 1..].trim())),
        None => (rest.trim(), None),
    };
    let spec_text = spec_text
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .unwrap_or(spec_text);

    let mut specifiers = Vec::new();
    if !spec_text.is_empty() {
        for clause in spec_text.split(',') {
            let spec = VersionSpecifier::parse(clause)
                .ok_or_else(|| err(format!("invalid version specifier '{}'", clause.trim())))?;
            specifiers.push(spec);
        }
    }

    Ok(Requirement {
        name: PackageName::new(name),
        extras,
        source: RequirementSource::Index { specifiers },
        marker: parse_marker(marker, line_number)?,
        line_number,
        section: None,
    })
}

fn parse_marker(text: Option<&str>, line_number: usize) -> Result<Option<Marker>> {
    match text.map(str::trim) {
        None => Ok(None),
        Some("") => Err(CaptionKitError::ManifestParse {
            line: line_number,
            message: "empty environment marker after ';'".to_string(),
        }),
        Some(text) => Marker::parse(text).map(Some).map_err(|e| {
            CaptionKitError::ManifestParse {
                line: line_number,
                message: e.to_string(),
            }
        }),
    }
}

fn is_url(text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    ["http://", "https://", "file://", "git+"]
        .iter()
        .any(|scheme| lower.starts_with(scheme))
}

/// Split `url; marker`, preferring a `;` that is followed by whitespace since
/// URLs may legitimately contain semicolons.
fn split_url_marker(text: &str) -> (&str, Option<&str>) {
    let idx = text
        .match_indices(';')
        .map(|(i, _)| i)
        .find(|i| {
            text[i + 1..].starts_with(char::is_whitespace)
                || text[..*i].ends_with(char::is_whitespace)
        })
        .or_else(|| text.find(';'));
    match idx {
        Some(i) => (text[..i].trim(), Some(&text[i + 1..])),
        None => (text.trim(), None),
    }
}

fn url_file_name(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let segment = parsed.path_segments()?.filter(|s| !s.is_empty()).last()?;
    urlencoding::decode(segment).ok().map(|s| s.into_owned())
}

fn url_file_stem(url: &str) -> Option<String> {
    let file_name = url_file_name(url)?;
    let stem = file_name.split('-').next().unwrap_or(&file_name);
    let stem = stem
        .trim_end_matches(".tar.gz")
        .trim_end_matches(".zip")
        .to_string();
    Some(stem)
}

fn wheel_from_url(url: &str) -> Option<WheelFilename> {
    WheelFilename::parse(&url_file_name(url)?)
}
