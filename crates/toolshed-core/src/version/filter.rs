use std::fmt;

use regex::Regex;
use semver::VersionReq;

use super::VersionCandidate;

/// Predicates narrowing the candidate list. All set predicates must hold.
#[derive(Debug, Clone, Default)]
pub struct VersionFilter {
    /// Keep prereleases. Off by default.
    pub include_prerelease: bool,
    /// Keep versions starting with this prefix.
    pub prefix: Option<String>,
    /// Keep versions matching this expression.
    pub regex: Option<Regex>,
    /// Keep semver-parseable versions inside this range.
    pub constraint: Option<VersionReq>,
    /// Keep at most this many of the newest candidates.
    pub max_count: Option<usize>,
}

impl VersionFilter {
    /// Add a semantic version constraint.
    pub fn with_constraint(mut self, req: VersionReq) -> Self {
        self.constraint = Some(req);
        self
    }

    /// Returns `true` if `candidate` passes every predicate.
    pub fn matches(&self, candidate: &VersionCandidate) -> bool {
        let version = candidate.version.as_str();
        if !self.include_prerelease && candidate.is_prerelease() {
            return false;
        }
        if let Some(prefix) = &self.prefix {
            if !version.starts_with(prefix.as_str()) {
                return false;
            }
        }
        if let Some(re) = &self.regex {
            if !re.is_match(version) {
                return false;
            }
        }
        if let Some(req) = &self.constraint {
            match candidate.version.semver() {
                Some(v) => req.matches(&v),
                None => false,
            }
        } else {
            true
        }
    }
}

impl fmt::Display for VersionFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(req) = &self.constraint {
            parts.push(format!("range {req}"));
        }
        if let Some(prefix) = &self.prefix {
            parts.push(format!("prefix '{prefix}'"));
        }
        if let Some(re) = &self.regex {
            parts.push(format!("pattern /{re}/"));
        }
        parts.push(if self.include_prerelease {
            "prereleases included".to_string()
        } else {
            "stable only".to_string()
        });
        f.write_str(&parts.join(", "))
    }
}
