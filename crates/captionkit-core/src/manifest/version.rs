//! Package versions and version specifiers.
//!
//! Versions follow the public PEP 440 shape (`[N!]N(.N)*[{a|b|rc}N][.postN][.devN][+local]`).
//! Strings outside that shape are still accepted by specifiers, but then only
//! `===` and plain string equality can match them.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::sync::LazyLock;

static VERSION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?ix)^
        v?
        (?:(?P<epoch>\d+)!)?
        (?P<release>\d+(?:\.\d+)*)
        (?:[-_.]?(?P<pre_l>a|b|c|rc|alpha|beta|pre|preview)[-_.]?(?P<pre_n>\d+)?)?
        (?:-(?P<post_n1>\d+)|[-_.]?(?P<post_l>post|rev|r)[-_.]?(?P<post_n2>\d+)?)?
        (?:[-_.]?(?P<dev_l>dev)[-_.]?(?P<dev_n>\d+)?)?
        (?:\+(?P<local>[a-z0-9]+(?:[-_.][a-z0-9]+)*))?
        $",
    )
    .expect("version regex must compile")
});

/// Pre-release phase, ordered as PEP 440 orders them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum PreRelease {
    Alpha,
    Beta,
    Rc,
}

/// A parsed PEP 440 version.
///
/// Equality follows the ordering, so `1.0` and `1.0.0` are equal.
#[derive(Debug, Clone)]
pub struct Version {
    epoch: u64,
    release: Vec<u64>,
    pre: Option<(PreRelease, u64)>,
    post: Option<u64>,
    dev: Option<u64>,
    local: Option<String>,
}

impl Version {
    /// Parse a version string, returning `None` if it is not a PEP 440 version.
    pub fn parse(input: &str) -> Option<Self> {
        let caps = VERSION_RE.captures(input.trim())?;
        let num = |name: &str| caps.name(name).and_then(|m| m.as_str().parse::<u64>().ok());

        let release = caps
            .name("release")?
            .as_str()
            .split('.')
            .map(|part| part.parse::<u64>().ok())
            .collect::<Option<Vec<_>>>()?;

        let pre = caps.name("pre_l").map(|label| {
            let phase = match label.as_str().to_lowercase().as_str() {
                "a" | "alpha" => PreRelease::Alpha,
                "b" | "beta" => PreRelease::Beta,
                _ => PreRelease::Rc,
            };
            (phase, num("pre_n").unwrap_or(0))
        });

        let post = if caps.name("post_n1").is_some() {
            num("post_n1")
        } else if caps.name("post_l").is_some() {
            Some(num("post_n2").unwrap_or(0))
        } else {
            None
        };
        let dev = caps.name("dev_l").map(|_| num("dev_n").unwrap_or(0));

        Some(Self {
            epoch: num("epoch").unwrap_or(0),
            release,
            pre,
            post,
            dev,
            local: caps.name("local").map(|m| m.as_str().to_lowercase()),
        })
    }

    /// Release segments, e.g. `[2, 1, 0]` for `2.1.0`.
    pub fn release(&self) -> &[u64] {
        &self.release
    }

    /// Local version label, e.g. `cu121` for `2.1.0+cu121`.
    pub fn local(&self) -> Option<&str> {
        self.local.as_deref()
    }

    /// `major.minor` rendering, used for `python_version` style values.
    pub fn major_minor(&self) -> String {
        let major = self.release.first().copied().unwrap_or(0);
        let minor = self.release.get(1).copied().unwrap_or(0);
        format!("{}.{}", major, minor)
    }

    fn without_local(&self) -> Self {
        Self {
            local: None,
            ..self.clone()
        }
    }

    fn pre_key(&self) -> (u8, u8, u64) {
        match (self.pre, self.post, self.dev) {
            // A bare dev release sorts before every pre-release of the same release.
            (None, None, Some(_)) => (0, 0, 0),
            (Some((phase, n)), _, _) => (1, phase as u8, n),
            _ => (2, 0, 0),
        }
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let width = self.release.len().max(other.release.len());
        let padded = |v: &Version| {
            let mut r = v.release.clone();
            r.resize(width, 0);
            r
        };

        self.epoch
            .cmp(&other.epoch)
            .then_with(|| padded(self).cmp(&padded(other)))
            .then_with(|| self.pre_key().cmp(&other.pre_key()))
            .then_with(|| {
                let post = |v: &Version| v.post.map(|n| (1, n)).unwrap_or((0, 0));
                post(self).cmp(&post(other))
            })
            .then_with(|| {
                let dev = |v: &Version| v.dev.map(|n| (0, n)).unwrap_or((1, 0));
                dev(self).cmp(&dev(other))
            })
            .then_with(|| self.local.cmp(&other.local))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Comparison operator of a version specifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SpecifierOp {
    #[serde(rename = "===")]
    ArbitraryEqual,
    #[serde(rename = "==")]
    Equal,
    #[serde(rename = "!=")]
    NotEqual,
    #[serde(rename = "<=")]
    LessEqual,
    #[serde(rename = ">=")]
    GreaterEqual,
    #[serde(rename = "<")]
    Less,
    #[serde(rename = ">")]
    Greater,
    #[serde(rename = "~=")]
    Compatible,
}

impl SpecifierOp {
    /// Longest operators first so prefix matching is unambiguous.
    const ALL: [(&'static str, SpecifierOp); 8] = [
        ("===", SpecifierOp::ArbitraryEqual),
        ("~=", SpecifierOp::Compatible),
        ("==", SpecifierOp::Equal),
        ("!=", SpecifierOp::NotEqual),
        ("<=", SpecifierOp::LessEqual),
        (">=", SpecifierOp::GreaterEqual),
        ("<", SpecifierOp::Less),
        (">", SpecifierOp::Greater),
    ];

    pub fn as_str(&self) -> &'static str {
        Self::ALL
            .iter()
            .find(|(_, op)| op == self)
            .map(|(s, _)| *s)
            .unwrap_or("==")
    }

    /// Split a leading operator off `input`.
    pub fn split_prefix(input: &str) -> Option<(SpecifierOp, &str)> {
        Self::ALL
            .iter()
            .find(|(s, _)| input.starts_with(s))
            .map(|(s, op)| (*op, &input[s.len()..]))
    }
}

impl fmt::Display for SpecifierOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single `op version` clause such as `==2.1.0` or `>=3.10`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionSpecifier {
    pub op: SpecifierOp,
    pub version: String,
}

impl VersionSpecifier {
    /// Parse one clause; whitespace between operator and version is allowed.
    pub fn parse(input: &str) -> Option<Self> {
        let (op, rest) = SpecifierOp::split_prefix(input.trim())?;
        let version = rest.trim();
        if version.is_empty() || version.contains(char::is_whitespace) {
            return None;
        }
        Some(Self {
            op,
            version: version.to_string(),
        })
    }

    /// Whether this is an exact `==` pin without a wildcard.
    pub fn is_exact_pin(&self) -> bool {
        self.op == SpecifierOp::Equal && !self.version.ends_with(".*")
    }

    /// Check whether `candidate` satisfies this clause.
    pub fn matches(&self, candidate: &str) -> bool {
        if self.op == SpecifierOp::ArbitraryEqual {
            return candidate.trim().eq_ignore_ascii_case(self.version.trim());
        }

        if let Some(prefix) = self.version.strip_suffix(".*") {
            let is_prefix = match (Version::parse(prefix), Version::parse(candidate)) {
                (Some(prefix), Some(candidate)) => {
                    candidate.release().starts_with(prefix.release())
                        || release_prefix_padded(prefix.release(), candidate.release())
                }
                _ => candidate.starts_with(prefix),
            };
            return match self.op {
                SpecifierOp::Equal => is_prefix,
                SpecifierOp::NotEqual => !is_prefix,
                _ => false,
            };
        }

        let (Some(spec), Some(candidate)) = (Version::parse(&self.version), Version::parse(candidate))
        else {
            return match self.op {
                SpecifierOp::Equal => candidate == self.version,
                SpecifierOp::NotEqual => candidate != self.version,
                _ => false,
            };
        };

        // A specifier without a local label ignores the candidate's local label.
        let candidate = if spec.local().is_none() {
            candidate.without_local()
        } else {
            candidate
        };

        match self.op {
            SpecifierOp::Equal => candidate == spec,
            SpecifierOp::NotEqual => candidate != spec,
            SpecifierOp::LessEqual => candidate <= spec,
            SpecifierOp::GreaterEqual => candidate >= spec,
            SpecifierOp::Less => candidate < spec,
            SpecifierOp::Greater => candidate > spec,
            SpecifierOp::Compatible => {
                if spec.release().len() < 2 {
                    return false;
                }
                let prefix = &spec.release()[..spec.release().len() - 1];
                candidate >= spec && candidate.release().starts_with(prefix)
            }
            SpecifierOp::ArbitraryEqual => unreachable!("handled above"),
        }
    }
}

/// `3.11` matches `3.11.*` even though `[3, 11]` has no trailing zero segments.
fn release_prefix_padded(prefix: &[u64], candidate: &[u64]) -> bool {
    prefix.len() > candidate.len()
        && prefix.starts_with(candidate)
        && prefix[candidate.len()..].iter().all(|n| *n == 0)
}

impl fmt::Display for VersionSpecifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.op, self.version)
    }
}

/// Compare two version strings, falling back to string order for non-PEP 440 input.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    match (Version::parse(a), Version::parse(b)) {
        (Some(a), Some(b)) => a.cmp(&b),
        _ => a.cmp(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compare_versions() {
        assert_eq!(compare_versions("1.0.0", "1.0"), Ordering::Equal);
        assert_eq!(compare_versions("2.0.0", "1.0.0"), Ordering::Greater);
        assert_eq!(compare_versions("1.10.0", "1.9.0"), Ordering::Greater);
        assert_eq!(compare_versions("4.36.0.dev0", "4.36.0"), Ordering::Less);
        assert_eq!(compare_versions("1.0rc1", "1.0b2"), Ordering::Greater);
        assert_eq!(compare_versions("1.0.post1", "1.0"), Ordering::Greater);
        assert_eq!(compare_versions("1.0.dev1", "1.0a1"), Ordering::Less);
        assert_eq!(compare_versions("1!0.1", "2.0"), Ordering::Greater);
    }

    #[test]
    fn test_equality_pads_release_segments() {
        let short = Version::parse("1.0").unwrap();
        let long = Version::parse("1.0.0").unwrap();
        assert_eq!(short, long);
        assert_ne!(short, Version::parse("1.0.1").unwrap());

        assert!(VersionSpecifier::parse("==1.0").unwrap().matches("1.0.0"));
        assert!(VersionSpecifier::parse("==1.0.0").unwrap().matches("1.0"));
        assert!(!VersionSpecifier::parse("!=1.0").unwrap().matches("1.0.0"));
        assert!(VersionSpecifier::parse("!=1.0").unwrap().matches("1.0.1"));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(Version::parse("latest").is_none());
        assert!(Version::parse("").is_none());
        assert!(Version::parse("2.1.2+cu121").is_some());
    }

    #[test]
    fn test_exact_pin_ignores_candidate_local_label() {
        let spec = VersionSpecifier::parse("==2.1.2").unwrap();
        assert!(spec.is_exact_pin());
        assert!(spec.matches("2.1.2"));
        assert!(spec.matches("2.1.2+cu121"));
        assert!(!spec.matches("2.1.3"));
    }

    #[test]
    fn test_wildcard_and_compatible_release() {
        let wildcard = VersionSpecifier::parse("== 3.11.*").unwrap();
        assert!(!wildcard.is_exact_pin());
        assert!(wildcard.matches("3.11.4"));
        assert!(wildcard.matches("3.11"));
        assert!(!wildcard.matches("3.10.9"));

        let compatible = VersionSpecifier::parse("~=2.2").unwrap();
        assert!(compatible.matches("2.5"));
        assert!(!compatible.matches("3.0"));
        assert!(!compatible.matches("2.1"));
    }

    #[test]
    fn test_range_operators() {
        assert!(VersionSpecifier::parse(">=3.10").unwrap().matches("3.11"));
        assert!(!VersionSpecifier::parse("<3.10").unwrap().matches("3.10"));
        assert!(VersionSpecifier::parse("!=3.9").unwrap().matches("3.10"));
        assert!(VersionSpecifier::parse("===foo").unwrap().matches("FOO"));
    }

    #[test]
    fn test_specifier_display_roundtrip() {
        let spec = VersionSpecifier::parse(">= 0.41.1").unwrap();
        assert_eq!(spec.to_string(), ">=0.41.1");
        assert!(VersionSpecifier::parse("==").is_none());
        assert!(VersionSpecifier::parse("1.0").is_none());
    }
}
