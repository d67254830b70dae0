//! Structural checks for the manifest.
//!
//! Every requirement is checked on its own (pinning, wheel URLs, marker and
//! artifact agreement) and then against the rest of the manifest over a small
//! matrix of target environments: each `platform_system` crossed with every
//! Python version the manifest mentions.

use super::marker::{MarkerEnvironment, MarkerVariable};
use super::requirement::{Requirement, RequirementSource};
use super::version::{compare_versions, Version};
use super::Manifest;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::debug;

const PLATFORMS: [&str; 3] = ["Windows", "Linux", "Darwin"];
const BASELINE_PYTHON_VERSIONS: [&str; 2] = ["3.10", "3.11"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LintRule {
    UnpinnedRequirement,
    UrlNotWheel,
    UrlWithoutMarker,
    WindowsMarkerWithoutWindowsWheel,
    NonWindowsMarkerWithoutPin,
    MissingPlatformCounterpart,
    WheelNameMismatch,
    WheelPythonTagMismatch,
    DuplicatePackage,
}

impl LintRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnpinnedRequirement => "unpinned-requirement",
            Self::UrlNotWheel => "url-not-wheel",
            Self::UrlWithoutMarker => "url-without-marker",
            Self::WindowsMarkerWithoutWindowsWheel => "windows-marker-without-windows-wheel",
            Self::NonWindowsMarkerWithoutPin => "non-windows-marker-without-pin",
            Self::MissingPlatformCounterpart => "missing-platform-counterpart",
            Self::WheelNameMismatch => "wheel-name-mismatch",
            Self::WheelPythonTagMismatch => "wheel-python-tag-mismatch",
            Self::DuplicatePackage => "duplicate-package",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            Self::MissingPlatformCounterpart
            | Self::WheelNameMismatch
            | Self::WheelPythonTagMismatch => Severity::Warning,
            _ => Severity::Error,
        }
    }
}

impl fmt::Display for LintRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LintIssue {
    pub line: usize,
    pub package: String,
    pub rule: LintRule,
    pub severity: Severity,
    pub message: String,
}

impl fmt::Display for LintIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        write!(
            f,
            "line {}: {} [{}] {}: {}",
            self.line, level, self.rule, self.package, self.message
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LintReport {
    pub issues: Vec<LintIssue>,
    pub requirement_count: usize,
    /// Environments checked, as `platform/python` labels.
    pub environments: Vec<String>,
}

impl LintReport {
    /// True when no error-level issue was found. Warnings don't count.
    pub fn is_clean(&self) -> bool {
        self.errors().next().is_none()
    }

    pub fn errors(&self) -> impl Iterator<Item = &LintIssue> {
        self.issues.iter().filter(|i| i.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &LintIssue> {
        self.issues.iter().filter(|i| i.severity == Severity::Warning)
    }

    pub fn has_rule(&self, rule: LintRule) -> bool {
        self.issues.iter().any(|i| i.rule == rule)
    }

    fn push(&mut self, req: &Requirement, rule: LintRule, message: impl Into<String>) {
        self.issues.push(LintIssue {
            line: req.line_number,
            package: req.name.original.clone(),
            rule,
            severity: rule.severity(),
            message: message.into(),
        });
    }
}

/// Which platforms a requirement's marker admits across the matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PlatformScope {
    Windows,
    NonWindows,
    Any,
    Never,
}

struct Matrix {
    environments: Vec<MarkerEnvironment>,
}

impl Matrix {
    fn for_manifest(manifest: &Manifest) -> Self {
        let mut versions: Vec<String> = BASELINE_PYTHON_VERSIONS
            .iter()
            .map(|v| v.to_string())
            .collect();
        for req in manifest.requirements() {
            let Some(marker) = &req.marker else { continue };
            for value in marker.referenced_values(MarkerVariable::PythonVersion) {
                if Version::parse(&value).is_some() && !versions.contains(&value) {
                    versions.push(value);
                }
            }
        }
        versions.sort_by(|a, b| compare_versions(a, b));

        let environments = PLATFORMS
            .iter()
            .flat_map(|platform| {
                versions
                    .iter()
                    .map(move |py| MarkerEnvironment::for_platform(platform, py))
            })
            .collect();
        Self { environments }
    }

    fn labels(&self) -> Vec<String> {
        self.environments
            .iter()
            .map(|env| format!("{}/{}", env.platform_system, env.python_version))
            .collect()
    }

    fn is_active(req: &Requirement, env: &MarkerEnvironment) -> bool {
        req.marker.as_ref().map_or(true, |m| m.evaluate(env))
    }

    fn scope(&self, req: &Requirement) -> PlatformScope {
        let active: BTreeSet<&str> = self
            .environments
            .iter()
            .filter(|env| Self::is_active(req, env))
            .map(|env| env.platform_system.as_str())
            .collect();
        let windows = active.contains("Windows");
        let others = active.iter().filter(|p| **p != "Windows").count();
        match (windows, others) {
            (false, 0) => PlatformScope::Never,
            (true, 0) => PlatformScope::Windows,
            (false, _) => PlatformScope::NonWindows,
            (true, _) => PlatformScope::Any,
        }
    }

    /// Python versions the marker admits, if it narrows the matrix at all.
    fn admitted_python_versions(&self, req: &Requirement) -> Option<BTreeSet<String>> {
        let all: BTreeSet<String> = self
            .environments
            .iter()
            .map(|env| env.python_version.clone())
            .collect();
        let admitted: BTreeSet<String> = self
            .environments
            .iter()
            .filter(|env| Self::is_active(req, env))
            .map(|env| env.python_version.clone())
            .collect();
        (admitted != all && !admitted.is_empty()).then_some(admitted)
    }
}

/// Check a parsed manifest.
pub fn lint_manifest(manifest: &Manifest) -> LintReport {
    let matrix = Matrix::for_manifest(manifest);
    let mut report = LintReport {
        requirement_count: manifest.len(),
        environments: matrix.labels(),
        ..Default::default()
    };

    let mut scopes: BTreeMap<String, Vec<(PlatformScope, &Requirement)>> = BTreeMap::new();

    for req in manifest.requirements() {
        check_source(req, &mut report);

        let scope = match &req.marker {
            Some(_) => matrix.scope(req),
            None => PlatformScope::Any,
        };
        check_platform_scope(req, scope, &mut report);
        check_python_tags(req, &matrix, &mut report);

        scopes
            .entry(req.name.normalized.clone())
            .or_default()
            .push((scope, req));
    }

    check_counterparts(&scopes, &mut report);
    check_duplicates(manifest, &matrix, &mut report);

    report.issues.sort_by_key(|i| (i.line, i.rule));
    debug!(
        "Linted {} requirements: {} errors, {} warnings",
        report.requirement_count,
        report.errors().count(),
        report.warnings().count()
    );
    report
}

fn check_source(req: &Requirement, report: &mut LintReport) {
    match &req.source {
        RequirementSource::Index { specifiers } => {
            if req.pinned_version().is_none() {
                let found = if specifiers.is_empty() {
                    "no version specifier".to_string()
                } else {
                    let specs: Vec<String> = specifiers.iter().map(ToString::to_string).collect();
                    format!("'{}'", specs.join(","))
                };
                report.push(
                    req,
                    LintRule::UnpinnedRequirement,
                    format!("expected an exact '==' pin, found {}", found),
                );
            }
        }
        RequirementSource::NamedUrl { url, wheel } | RequirementSource::Url { url, wheel } => {
            match wheel {
                None => report.push(
                    req,
                    LintRule::UrlNotWheel,
                    format!("direct reference '{}' is not a .whl file", url),
                ),
                Some(wheel) => {
                    if matches!(req.source, RequirementSource::NamedUrl { .. })
                        && super::normalize_package_name(&wheel.distribution)
                            != req.name.normalized
                    {
                        report.push(
                            req,
                            LintRule::WheelNameMismatch,
                            format!(
                                "wheel is for '{}' but is listed as '{}'",
                                wheel.distribution, req.name.original
                            ),
                        );
                    }
                }
            }
            if req.marker.is_none() {
                report.push(
                    req,
                    LintRule::UrlWithoutMarker,
                    "direct wheel references must carry an environment marker",
                );
            }
        }
    }
}

fn check_platform_scope(req: &Requirement, scope: PlatformScope, report: &mut LintReport) {
    match scope {
        PlatformScope::Windows => {
            if !req.wheel().is_some_and(|w| w.is_windows()) {
                report.push(
                    req,
                    LintRule::WindowsMarkerWithoutWindowsWheel,
                    "Windows-only requirement should point at a win_* wheel",
                );
            }
        }
        PlatformScope::NonWindows => {
            if req.pinned_version().is_none() {
                report.push(
                    req,
                    LintRule::NonWindowsMarkerWithoutPin,
                    "non-Windows requirement should be a pinned index version",
                );
            }
        }
        PlatformScope::Any | PlatformScope::Never => {}
    }
}

fn check_python_tags(req: &Requirement, matrix: &Matrix, report: &mut LintReport) {
    let Some(wheel) = req.wheel() else { return };
    let tagged = wheel.python_versions();
    if tagged.is_empty() {
        return;
    }
    let Some(admitted) = matrix.admitted_python_versions(req) else {
        return;
    };
    let untagged: Vec<&String> = admitted.iter().filter(|v| !tagged.contains(v)).collect();
    if !untagged.is_empty() {
        let untagged: Vec<&str> = untagged.iter().map(|s| s.as_str()).collect();
        report.push(
            req,
            LintRule::WheelPythonTagMismatch,
            format!(
                "marker admits Python {} but wheel tag is '{}'",
                untagged.join(", "),
                wheel.python_tag
            ),
        );
    }
}

fn check_counterparts(
    scopes: &BTreeMap<String, Vec<(PlatformScope, &Requirement)>>,
    report: &mut LintReport,
) {
    for entries in scopes.values() {
        let has = |wanted: PlatformScope| entries.iter().any(|(scope, _)| *scope == wanted);
        let (has_windows, has_other) = (has(PlatformScope::Windows), has(PlatformScope::NonWindows));
        if has_windows == has_other {
            continue;
        }
        for (scope, req) in entries {
            let missing = match scope {
                PlatformScope::Windows => "non-Windows",
                PlatformScope::NonWindows => "Windows",
                _ => continue,
            };
            report.push(
                req,
                LintRule::MissingPlatformCounterpart,
                format!("no {} alternative for this package", missing),
            );
        }
    }
}

fn check_duplicates(manifest: &Manifest, matrix: &Matrix, report: &mut LintReport) {
    let mut seen: BTreeSet<(String, Vec<usize>)> = BTreeSet::new();

    for env in &matrix.environments {
        let mut by_name: BTreeMap<&str, Vec<&Requirement>> = BTreeMap::new();
        for req in manifest.active_requirements(env) {
            by_name.entry(req.name.normalized.as_str()).or_default().push(req);
        }

        for (name, reqs) in by_name {
            if reqs.len() < 2 {
                continue;
            }
            let lines: Vec<usize> = reqs.iter().map(|r| r.line_number).collect();
            if !seen.insert((name.to_string(), lines.clone())) {
                continue;
            }
            let listed: Vec<String> = lines.iter().map(ToString::to_string).collect();
            for req in reqs.iter().skip(1) {
                report.push(
                    req,
                    LintRule::DuplicatePackage,
                    format!(
                        "lines {} are all active on {} / Python {}",
                        listed.join(", "),
                        env.platform_system,
                        env.python_version
                    ),
                );
            }
        }
    }
}
