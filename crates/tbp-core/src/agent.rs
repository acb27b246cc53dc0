//! The closed agent catalog and `@name` normalization.
//!
//! Assignees are drawn from a fixed catalog and always stored and compared in
//! the normalized `@name` form.  Anything outside the catalog is rejected at
//! write time.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use tbp_error::{ErrorCode, TbpError};

/// Every agent name the control plane accepts, in bare (un-prefixed) form.
pub const AGENT_CATALOG: &[&str] = &[
    "coding-agent",
    "debugger-agent",
    "code-reviewer-agent",
    "test-orchestrator-agent",
    "documentation-agent",
    "security-auditor-agent",
    "devops-agent",
    "task-planning-agent",
    "deep-research-agent",
    "ui-designer-agent",
    "performance-load-tester-agent",
    "prototyping-agent",
];

/// A validated, normalized agent name.
///
/// The inner string always starts with `@` and the bare remainder is a
/// catalog member.  Construction goes through [`AgentName::parse`]; the serde
/// impls reuse it so invalid names cannot be smuggled in through the wire.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, JsonSchema)]
pub struct AgentName(String);

impl AgentName {
    /// Normalize and validate a raw assignee string.
    ///
    /// Accepts both `coding-agent` and `@coding-agent`; rejects empty input
    /// and names outside [`AGENT_CATALOG`].
    pub fn parse(raw: &str) -> Result<Self, TbpError> {
        let bare = raw.trim().trim_start_matches('@');
        if bare.is_empty() {
            return Err(TbpError::new(
                ErrorCode::ValidationError,
                "assignee must not be empty",
            )
            .with_field("assignees"));
        }
        if !AGENT_CATALOG.contains(&bare) {
            return Err(TbpError::new(
                ErrorCode::ValidationError,
                format!("invalid assignee: {bare}"),
            )
            .with_field("assignees")
            .with_expected("a catalog agent name, e.g. @coding-agent")
            .with_context("agent", bare));
        }
        Ok(Self(format!("@{bare}")))
    }

    /// The normalized `@name` form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The bare name without the `@` prefix.
    pub fn bare(&self) -> &str {
        &self.0[1..]
    }
}

impl fmt::Display for AgentName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for AgentName {
    fn serialize<S: serde::Serializer>(&self, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for AgentName {
    fn deserialize<D: serde::Deserializer<'de>>(de: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(de)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Validate a whole assignee list, reporting every invalid entry at once.
pub fn validate_assignees<I, S>(raw: I) -> Result<std::collections::BTreeSet<AgentName>, TbpError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut valid = std::collections::BTreeSet::new();
    let mut invalid = Vec::new();
    for name in raw {
        match AgentName::parse(name.as_ref()) {
            Ok(agent) => {
                valid.insert(agent);
            }
            Err(_) => invalid.push(name.as_ref().to_string()),
        }
    }
    if !invalid.is_empty() {
        return Err(TbpError::new(
            ErrorCode::ValidationError,
            format!("invalid assignees: {}", invalid.join(", ")),
        )
        .with_field("assignees")
        .with_expected("catalog agent names, e.g. @coding-agent")
        .with_context("invalid", invalid));
    }
    Ok(valid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_name_is_normalized() {
        let agent = AgentName::parse("coding-agent").unwrap();
        assert_eq!(agent.as_str(), "@coding-agent");
        assert_eq!(agent.bare(), "coding-agent");
    }

    #[test]
    fn prefixed_name_is_kept() {
        let agent = AgentName::parse("@test-orchestrator-agent").unwrap();
        assert_eq!(agent.as_str(), "@test-orchestrator-agent");
    }

    #[test]
    fn non_catalog_name_rejected() {
        let err = AgentName::parse("invalid-agent").unwrap_err();
        assert_eq!(err.code, ErrorCode::ValidationError);
        assert!(err.message.contains("invalid-agent"));
    }

    #[test]
    fn empty_name_rejected() {
        assert!(AgentName::parse("").is_err());
        assert!(AgentName::parse("@").is_err());
        assert!(AgentName::parse("   ").is_err());
    }

    #[test]
    fn list_validation_reports_all_invalid_entries() {
        let err = validate_assignees(["coding-agent", "invalid-agent", "other-bogus"]).unwrap_err();
        assert!(err.message.contains("invalid-agent"));
        assert!(err.message.contains("other-bogus"));
        assert!(!err.message.contains("coding-agent"));
    }

    #[test]
    fn list_validation_normalizes_and_dedups() {
        let set = validate_assignees(["coding-agent", "@coding-agent", "documentation-agent"])
            .unwrap();
        let names: Vec<_> = set.iter().map(|a| a.as_str().to_string()).collect();
        assert_eq!(names, vec!["@coding-agent", "@documentation-agent"]);
    }

    #[test]
    fn serde_rejects_invalid_names() {
        let ok: Result<AgentName, _> = serde_json::from_str(r#""@coding-agent""#);
        assert!(ok.is_ok());
        let bad: Result<AgentName, _> = serde_json::from_str(r#""not-an-agent""#);
        assert!(bad.is_err());
    }

    #[test]
    fn ordering_is_alphabetical_on_normalized_form() {
        let a = AgentName::parse("coding-agent").unwrap();
        let b = AgentName::parse("test-orchestrator-agent").unwrap();
        assert!(a < b);
    }
}
