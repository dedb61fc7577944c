//! Compiled wire-name templates.

use regex::Regex;

use crate::error::{HostError, HostResult};

/// A wire-name template compiled into an anchored matcher.
///
/// - literal segments match exactly, `/` included
/// - a single `*` matches one or more characters other than `/`
/// - the whole address must match (`^...$`)
///
/// So `avatar/parameters/*` matches `avatar/parameters/FaceFree` but neither
/// `avatar/parameters/Face/Free` nor `avatar/parameters/`.
#[derive(Debug, Clone)]
pub struct WirePattern {
    template: String,
    regex: Regex,
}

impl WirePattern {
    /// Compile `template`. Fails if it contains more than one `*` or is empty.
    pub fn compile(template: &str) -> HostResult<Self> {
        validate_template(template)?;

        let pattern = template
            .split('*')
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join("([^/]+)");
        let regex = Regex::new(&format!("^{pattern}$")).map_err(|e| HostError::InvalidWireName {
            name: template.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            template: template.to_string(),
            regex,
        })
    }

    /// The template this pattern was compiled from.
    pub fn template(&self) -> &str {
        &self.template
    }

    /// Whether the template contains a wildcard.
    pub fn has_wildcard(&self) -> bool {
        self.template.contains('*')
    }

    /// Whether `address` matches the template.
    pub fn is_match(&self, address: &str) -> bool {
        self.regex.is_match(address)
    }

    /// The text the wildcard matched, if the template has one and `address` matches.
    pub fn capture<'a>(&self, address: &'a str) -> Option<&'a str> {
        self.regex
            .captures(address)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str())
    }
}

/// Check a template without compiling it.
pub(crate) fn validate_template(template: &str) -> HostResult<()> {
    if template.is_empty() {
        return Err(HostError::InvalidWireName {
            name: template.to_string(),
            reason: "wire name cannot be empty".to_string(),
        });
    }
    if template.matches('*').count() > 1 {
        return Err(HostError::InvalidWireName {
            name: template.to_string(),
            reason: "at most one `*` wildcard is allowed".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wildcard_matches_single_segment() {
        let p = WirePattern::compile("avatar/parameters/*").unwrap();
        assert!(p.is_match("avatar/parameters/FaceFree"));
        assert!(!p.is_match("avatar/parameters/Face/Free"));
        assert!(!p.is_match("avatar/parameters/"));
        assert!(!p.is_match("prefix/avatar/parameters/FaceFree"));
        assert_eq!(p.capture("avatar/parameters/FaceFree"), Some("FaceFree"));
    }

    #[test]
    fn test_literal_matches_only_itself() {
        let p = WirePattern::compile("switch").unwrap();
        assert!(p.is_match("switch"));
        assert!(!p.is_match("switch2"));
        assert!(!p.is_match("a/switch"));
        assert!(!p.has_wildcard());
        assert_eq!(p.capture("switch"), None);
    }

    #[test]
    fn test_wildcard_inside_segment() {
        let p = WirePattern::compile("hr/zone*/bpm").unwrap();
        assert!(p.is_match("hr/zone1/bpm"));
        assert!(p.is_match("hr/zoneA2/bpm"));
        assert!(!p.is_match("hr/zone/bpm"));
        assert!(!p.is_match("hr/zone1/x/bpm"));
    }

    #[test]
    fn test_regex_metacharacters_are_literal() {
        let p = WirePattern::compile("media/volume(0.5)+").unwrap();
        assert!(p.is_match("media/volume(0.5)+"));
        assert!(!p.is_match("media/volume050"));
    }

    #[test]
    fn test_rejects_multiple_wildcards() {
        let err = WirePattern::compile("a/*/b/*").unwrap_err();
        assert!(matches!(err, HostError::InvalidWireName { .. }));
    }

    #[test]
    fn test_rejects_empty() {
        assert!(WirePattern::compile("").is_err());
    }
}
