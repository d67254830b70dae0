use captionkit_core::manifest::{
    lint_manifest, load_manifest, parse_manifest, LintRule, MarkerEnvironment, RequirementSource,
};
use std::fs;
use std::path::PathBuf;

fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

fn fixture_text() -> String {
    fs::read_to_string(fixture_path("requirements.txt")).expect("fixture should be readable")
}

#[test]
fn fixture_manifest_parses_every_line() {
    let manifest = load_manifest(&fixture_path("requirements.txt")).unwrap();
    assert_eq!(manifest.len(), 16);
    assert_eq!(manifest.directives().count(), 0);

    for req in manifest.requirements() {
        match &req.source {
            RequirementSource::Index { .. } => {
                assert!(req.pinned_version().is_some(), "{} is not pinned", req.name.original)
            }
            RequirementSource::Url { .. } | RequirementSource::NamedUrl { .. } => {
                assert!(req.wheel().is_some(), "{} is not a wheel", req.name.original);
                assert!(req.marker.is_some());
            }
        }
    }
}

#[test]
fn fixture_manifest_is_clean() {
    let manifest = parse_manifest(&fixture_text()).unwrap();
    let report = lint_manifest(&manifest);
    assert!(report.is_clean(), "unexpected issues: {:?}", report.issues);
    assert!(report.issues.is_empty());
    assert_eq!(report.requirement_count, 16);
    assert!(report.environments.contains(&"Windows/3.10".to_string()));
    assert!(report.environments.contains(&"Darwin/3.11".to_string()));
}

#[test]
fn windows_and_other_platforms_pair_up() {
    let manifest = parse_manifest(&fixture_text()).unwrap();

    for package in ["bitsandbytes", "torch"] {
        let entries: Vec<_> = manifest
            .requirements()
            .filter(|req| req.name.normalized == package)
            .collect();
        assert!(entries.len() >= 2, "{} should have platform alternatives", package);

        let pinned = entries
            .iter()
            .filter(|req| req.pinned_version().is_some())
            .count();
        let windows_wheels = entries
            .iter()
            .filter(|req| req.wheel().is_some_and(|w| w.is_windows()))
            .count();
        assert_eq!(pinned, 1);
        assert_eq!(windows_wheels, entries.len() - 1);
    }
}

#[test]
fn pins_resolve_per_platform() {
    let manifest = parse_manifest(&fixture_text()).unwrap();

    let linux = manifest.render_pins(&MarkerEnvironment::for_platform("Linux", "3.11"));
    assert!(linux.contains("torch==2.1.2\n"));
    assert!(linux.contains("bitsandbytes==0.41.3.post2\n"));
    assert!(!linux.contains(".whl"));

    let windows = manifest.render_pins(&MarkerEnvironment::for_platform("Windows", "3.10"));
    assert!(windows.contains("cp310-cp310-win_amd64.whl"));
    assert!(!windows.contains("cp311"));
    assert!(!windows.contains("torch==2.1.2"));
    assert_eq!(windows.lines().count(), 13);
}

#[test]
fn dropping_a_counterpart_is_reported() {
    let text: String = fixture_text()
        .lines()
        .filter(|line| !line.starts_with("torch==2.1.2"))
        .map(|line| format!("{}\n", line))
        .collect();
    let report = lint_manifest(&parse_manifest(&text).unwrap());

    assert!(report.has_rule(LintRule::MissingPlatformCounterpart));
    // Only a warning: the Windows wheels are still internally consistent.
    assert!(report.is_clean());
}

#[test]
fn unconditional_duplicate_is_an_error() {
    let text = format!("{}torch==2.0.0\n", fixture_text());
    let report = lint_manifest(&parse_manifest(&text).unwrap());

    assert!(!report.is_clean());
    let duplicates: Vec<_> = report
        .issues
        .iter()
        .filter(|issue| issue.rule == LintRule::DuplicatePackage)
        .collect();
    assert!(!duplicates.is_empty());
    assert!(duplicates.iter().all(|issue| issue.package == "torch"));
}
