//! Allow-list policy over configuration files and registries.
//!
//! A policy document is TOML:
//!
//! ```toml
//! [[rules]]
//! kind = "allow"
//! target = "config"
//! pattern = "/home/me/work/**/toolshed.toml"
//!
//! [[rules]]
//! kind = "allow"
//! target = "registry"
//! pattern = "https://example.com/registry.toml"
//! ```
//!
//! Rules are evaluated in order and the first match wins. With policy
//! active, a candidate no rule matches is denied. Relative path patterns are
//! resolved against the directory of the document that declares them.

use std::fmt;
use std::path::{Component, Path, PathBuf};

use serde::Deserialize;

use crate::config::EngineConfig;
use crate::error::EngineError;

/// What a rule applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyTarget {
    /// Configuration (manifest) file paths.
    Config,
    /// Registry identities: absolute paths of local registries or URLs.
    Registry,
    /// Both.
    #[default]
    Any,
}

impl PolicyTarget {
    fn covers(self, other: PolicyTarget) -> bool {
        self == PolicyTarget::Any || self == other
    }
}

impl fmt::Display for PolicyTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Config => "config",
            Self::Registry => "registry",
            Self::Any => "any",
        })
    }
}

/// Rule kind. Only `allow` exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleKind {
    /// A match admits the candidate.
    Allow,
}

#[derive(Deserialize)]
struct RawRule {
    kind: RuleKind,
    #[serde(default)]
    target: PolicyTarget,
    pattern: String,
}

#[derive(Deserialize)]
struct RawDocument {
    #[serde(default)]
    rules: Vec<RawRule>,
}

/// A compiled rule.
#[derive(Debug, Clone)]
pub struct PolicyRule {
    /// Always [`RuleKind::Allow`].
    pub kind: RuleKind,
    /// What the rule applies to.
    pub target: PolicyTarget,
    /// Pattern after resolving relative paths.
    pub pattern: String,
    glob: Option<glob::Pattern>,
}

impl PolicyRule {
    /// Compile a rule. `base` resolves relative path patterns.
    ///
    /// # Errors
    ///
    /// Returns the glob error message for an invalid pattern.
    pub fn new(
        kind: RuleKind,
        target: PolicyTarget,
        pattern: &str,
        base: Option<&Path>,
    ) -> Result<Self, String> {
        let pattern = resolve_pattern(pattern, base);
        let glob = if pattern.contains(['*', '?', '[']) {
            Some(glob::Pattern::new(&pattern).map_err(|e| e.to_string())?)
        } else {
            None
        };
        Ok(Self {
            kind,
            target,
            pattern,
            glob,
        })
    }

    /// Returns `true` if the rule applies to `target` and its pattern
    /// matches `candidate` exactly or as a glob.
    pub fn matches(&self, target: PolicyTarget, candidate: &str) -> bool {
        if !self.target.covers(target) {
            return false;
        }
        candidate == self.pattern
            || self
                .glob
                .as_ref()
                .is_some_and(|g| g.matches_with(candidate, GLOB_OPTIONS))
    }
}

/// `*` and `?` stay within one path or URL segment; only `**` crosses `/`.
const GLOB_OPTIONS: glob::MatchOptions = glob::MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Resolve `.` and `..` components without touching the filesystem.
///
/// `..` at the root stays at the root; leading `..` of a relative path is
/// kept.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir | Component::Prefix(_)) => {}
                _ => out.push(".."),
            },
            other => out.push(other),
        }
    }
    out
}

fn resolve_pattern(pattern: &str, base: Option<&Path>) -> String {
    let pattern = pattern.trim();
    if pattern.contains("://") {
        return pattern.to_string();
    }
    if Path::new(pattern).is_absolute() {
        return normalize_path(Path::new(pattern)).display().to_string();
    }
    match base {
        Some(dir) => normalize_path(&dir.join(pattern)).display().to_string(),
        None => pattern.to_string(),
    }
}

/// An ordered list of rules loaded from one file.
#[derive(Debug, Clone)]
pub struct PolicyDocument {
    /// File the rules came from.
    pub path: PathBuf,
    /// Rules in declaration order.
    pub rules: Vec<PolicyRule>,
}

impl PolicyDocument {
    /// Load and compile a policy document.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::PolicyLoad`] if the file cannot be read, is not
    /// valid TOML, names an unknown rule kind or holds an invalid glob.
    pub fn load(path: &Path) -> Result<Self, EngineError> {
        let content = std::fs::read_to_string(path).map_err(|e| EngineError::PolicyLoad {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::parse(path, &content)
    }

    /// Parse a policy document held in memory.
    ///
    /// # Errors
    ///
    /// See [`PolicyDocument::load`].
    pub fn parse(path: &Path, content: &str) -> Result<Self, EngineError> {
        let load_err = |message: String| EngineError::PolicyLoad {
            path: path.display().to_string(),
            message,
        };
        let raw: RawDocument = toml::from_str(content).map_err(|e| load_err(e.to_string()))?;
        let base = path.parent();
        let rules = raw
            .rules
            .into_iter()
            .map(|r| PolicyRule::new(r.kind, r.target, &r.pattern, base))
            .collect::<Result<Vec<_>, _>>()
            .map_err(load_err)?;
        Ok(Self {
            path: path.to_path_buf(),
            rules,
        })
    }

    /// Index of the first rule matching `candidate`.
    pub fn first_match(&self, target: PolicyTarget, candidate: &str) -> Option<usize> {
        self.rules.iter().position(|r| r.matches(target, candidate))
    }

    /// Evaluate this document alone with policy active: the first matching
    /// rule decides, and no match denies.
    pub fn allows(&self, target: PolicyTarget, candidate: &str) -> bool {
        self.first_match(target, candidate)
            .is_some_and(|i| self.rules[i].kind == RuleKind::Allow)
    }
}

/// Result of evaluating a candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Policy is disabled or no documents are loaded.
    Inactive,
    /// A rule admitted the candidate.
    Allowed {
        /// Document holding the rule.
        document: PathBuf,
        /// Zero-based index of the rule.
        rule: usize,
    },
    /// No rule matched.
    Denied,
}

/// Evaluates candidates against the concatenation of all loaded documents.
#[derive(Debug, Clone, Default)]
pub struct PolicyEnforcer {
    disabled: bool,
    documents: Vec<PolicyDocument>,
}

impl PolicyEnforcer {
    /// Create an enforcer over documents in precedence order.
    pub fn new(documents: Vec<PolicyDocument>) -> Self {
        Self {
            disabled: false,
            documents,
        }
    }

    /// An enforcer that lets everything through.
    pub fn disabled() -> Self {
        Self {
            disabled: true,
            documents: Vec::new(),
        }
    }

    /// Build from configuration: explicit paths first, then the default
    /// document under the root directory.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::PolicyLoad`] if a configured document cannot
    /// be loaded.
    pub fn from_config(config: &EngineConfig) -> Result<Self, EngineError> {
        if config.disable_policy {
            tracing::warn!(
                "Policy enforcement is disabled: every configuration file and registry is trusted"
            );
            return Ok(Self::disabled());
        }
        let documents = config
            .effective_policy_paths()
            .iter()
            .map(|p| PolicyDocument::load(p))
            .collect::<Result<Vec<_>, _>>()?;
        if documents.is_empty() {
            tracing::info!("No policy documents configured; policy is inactive");
        } else {
            tracing::debug!("Loaded {} policy document(s)", documents.len());
        }
        Ok(Self::new(documents))
    }

    /// Returns `true` if checks can deny anything.
    pub fn is_active(&self) -> bool {
        !self.disabled && !self.documents.is_empty()
    }

    /// Evaluate `candidate` top to bottom across all documents.
    pub fn evaluate(&self, target: PolicyTarget, candidate: &str) -> Decision {
        if !self.is_active() {
            return Decision::Inactive;
        }
        for doc in &self.documents {
            if let Some(rule) = doc.first_match(target, candidate) {
                return Decision::Allowed {
                    document: doc.path.clone(),
                    rule,
                };
            }
        }
        Decision::Denied
    }

    /// Returns `true` unless policy is active and no rule matches.
    pub fn allows(&self, target: PolicyTarget, candidate: &str) -> bool {
        !matches!(self.evaluate(target, candidate), Decision::Denied)
    }

    /// Gate a configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::PolicyViolation`] if no rule allows `path`
    /// once its `.` and `..` components are resolved.
    pub fn check_config(&self, path: &Path) -> Result<(), EngineError> {
        self.check(PolicyTarget::Config, &normalize_path(path).display().to_string())
    }

    /// Gate a registry by its identity.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::PolicyViolation`] if no rule allows `identity`.
    pub fn check_registry(&self, identity: &str) -> Result<(), EngineError> {
        self.check(PolicyTarget::Registry, identity)
    }

    fn check(&self, target: PolicyTarget, candidate: &str) -> Result<(), EngineError> {
        match self.evaluate(target, candidate) {
            Decision::Inactive => Ok(()),
            Decision::Allowed { document, rule } => {
                tracing::debug!(
                    "{target} {candidate} allowed by rule #{} of {}",
                    rule + 1,
                    document.display()
                );
                Ok(())
            }
            Decision::Denied => Err(EngineError::PolicyViolation {
                path: candidate.to_string(),
                reason: format!(
                    "no {target} rule matched in {}",
                    self.documents
                        .iter()
                        .map(|d| d.path.display().to_string())
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(text: &str) -> PolicyDocument {
        PolicyDocument::parse(Path::new("/etc/toolshed/policy.toml"), text).unwrap()
    }

    #[test]
    fn zero_matching_rules_denies_everything() {
        let d = doc(
            r#"
            [[rules]]
            kind = "allow"
            pattern = "/srv/only-this.toml"
            "#,
        );
        assert!(!d.allows(PolicyTarget::Config, "/home/me/toolshed.toml"));
        assert!(!d.allows(PolicyTarget::Registry, "https://evil.example/r.toml"));

        let empty = doc("");
        assert!(!empty.allows(PolicyTarget::Config, "/anything"));

        let enforcer = PolicyEnforcer::new(vec![empty]);
        assert!(enforcer.is_active());
        assert!(!enforcer.allows(PolicyTarget::Config, "/anything"));
    }

    #[test]
    fn globs_targets_and_relative_patterns() {
        let d = doc(
            r#"
            [[rules]]
            kind = "allow"
            target = "config"
            pattern = "/home/*/work/**/toolshed.toml"

            [[rules]]
            kind = "allow"
            target = "registry"
            pattern = "registries/*.toml"

            [[rules]]
            kind = "allow"
            target = "registry"
            pattern = "https://example.com/registry.toml"
            "#,
        );
        assert!(d.allows(PolicyTarget::Config, "/home/ann/work/a/b/toolshed.toml"));
        assert!(!d.allows(PolicyTarget::Registry, "/home/ann/work/a/b/toolshed.toml"));
        assert!(d.allows(PolicyTarget::Registry, "/etc/toolshed/registries/main.toml"));
        assert!(d.allows(PolicyTarget::Registry, "https://example.com/registry.toml"));
        assert!(!d.allows(PolicyTarget::Registry, "https://example.com/other.toml"));
    }

    #[test]
    fn dot_segments_cannot_climb_out_of_an_allowed_tree() {
        let enforcer = PolicyEnforcer::new(vec![doc(
            "[[rules]]\nkind = \"allow\"\npattern = \"/x/a/**\"\n",
        )]);
        assert!(enforcer.check_config(Path::new("/x/a/b/toolshed.toml")).is_ok());
        let err = enforcer
            .check_config(Path::new("/x/a/b/../../toolshed.toml"))
            .unwrap_err();
        match err {
            EngineError::PolicyViolation { path, .. } => assert_eq!(path, "/x/toolshed.toml"),
            other => panic!("unexpected error: {other}"),
        }

        let exact = PolicyEnforcer::new(vec![doc(
            "[[rules]]\nkind = \"allow\"\npattern = \"../repo/./toolshed.toml\"\n",
        )]);
        assert_eq!(exact.documents[0].rules[0].pattern, "/etc/repo/toolshed.toml");
        assert!(exact.check_config(Path::new("/etc/repo/sub/../toolshed.toml")).is_ok());
    }

    #[test]
    fn single_star_stays_within_a_segment() {
        let d = doc(
            r#"
            [[rules]]
            kind = "allow"
            pattern = "https://example.com/*"

            [[rules]]
            kind = "allow"
            pattern = "/srv/**/toolshed.toml"
            "#,
        );
        assert!(d.allows(PolicyTarget::Registry, "https://example.com/registry.toml"));
        assert!(!d.allows(
            PolicyTarget::Registry,
            "https://example.com/evil/deep/registry.toml"
        ));
        assert!(d.allows(PolicyTarget::Config, "/srv/a/b/c/toolshed.toml"));
        assert!(d.allows(PolicyTarget::Config, "/srv/toolshed.toml"));
    }

    #[test]
    fn normalizes_lexically() {
        assert_eq!(normalize_path(Path::new("/a/./b/../c")), PathBuf::from("/a/c"));
        assert_eq!(normalize_path(Path::new("/../a")), PathBuf::from("/a"));
        assert_eq!(normalize_path(Path::new("../a/../../b")), PathBuf::from("../../b"));
        assert_eq!(normalize_path(Path::new("a/b/..")), PathBuf::from("a"));
    }

    #[test]
    fn first_match_wins_across_documents() {
        let a = PolicyDocument::parse(
            Path::new("/a/policy.toml"),
            "[[rules]]\nkind = \"allow\"\npattern = \"/x/*\"\n",
        )
        .unwrap();
        let b = PolicyDocument::parse(
            Path::new("/b/policy.toml"),
            "[[rules]]\nkind = \"allow\"\npattern = \"/x/y\"\n",
        )
        .unwrap();
        let enforcer = PolicyEnforcer::new(vec![a, b]);
        assert_eq!(
            enforcer.evaluate(PolicyTarget::Config, "/x/y"),
            Decision::Allowed {
                document: PathBuf::from("/a/policy.toml"),
                rule: 0
            }
        );
    }

    #[test]
    fn deny_rules_are_rejected() {
        let err = PolicyDocument::parse(
            Path::new("/p.toml"),
            "[[rules]]\nkind = \"deny\"\npattern = \"*\"\n",
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::PolicyLoad { .. }));
    }

    #[test]
    fn disabled_or_empty_policy_is_inactive() {
        let disabled = PolicyEnforcer::disabled();
        assert!(!disabled.is_active());
        assert!(disabled.check_config(Path::new("/anything.toml")).is_ok());

        let none = PolicyEnforcer::new(Vec::new());
        assert!(none.check_registry("https://x").is_ok());
    }

    #[test]
    fn violation_names_path_and_reason() {
        let enforcer = PolicyEnforcer::new(vec![doc("")]);
        let err = enforcer
            .check_config(Path::new("/repo/toolshed.toml"))
            .unwrap_err();
        match err {
            EngineError::PolicyViolation { path, reason } => {
                assert_eq!(path, "/repo/toolshed.toml");
                assert!(reason.contains("/etc/toolshed/policy.toml"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
