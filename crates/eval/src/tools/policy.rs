//! Capability gate for tool calls.
//!
//! Decisions are computed on every call from the current configuration and
//! never cached.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::config::ToolsConfig;

pub const REASON_UNKNOWN_TOOL: &str = "unknown_tool";
pub const REASON_MISSING_BINDING: &str = "missing_binding";
pub const REASON_BINDING_UNVERIFIED: &str = "binding_unverified";
pub const REASON_BINDING_INVALID: &str = "binding_invalid";
pub const REASON_TOOL_DENIED: &str = "tool_denied";
pub const REASON_CAPABILITY_NOT_ALLOWED: &str = "capability_not_allowed";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionStatus {
    Allowed,
    Blocked,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolDecision {
    pub status: DecisionStatus,
    pub capability: Option<String>,
    pub reason: Option<String>,
}

impl ToolDecision {
    pub fn allowed() -> Self {
        ToolDecision {
            status: DecisionStatus::Allowed,
            capability: None,
            reason: None,
        }
    }

    pub fn blocked(reason: &str, capability: Option<&str>) -> Self {
        ToolDecision {
            status: DecisionStatus::Blocked,
            capability: capability.map(str::to_string),
            reason: Some(reason.to_string()),
        }
    }

    pub fn is_allowed(&self) -> bool {
        self.status == DecisionStatus::Allowed
    }
}

/// Lowercased, trimmed, deduplicated and sorted.
pub fn normalize_capabilities(capabilities: &[String]) -> Vec<String> {
    capabilities
        .iter()
        .map(|c| c.trim().to_ascii_lowercase())
        .filter(|c| !c.is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

pub fn decide(tool: &str, capabilities: &[String], policy: &ToolsConfig) -> ToolDecision {
    if policy.denied_tools.iter().any(|t| t == tool) {
        return ToolDecision::blocked(REASON_TOOL_DENIED, None);
    }
    if let Some(allowed) = &policy.allowed_capabilities {
        let allowed = normalize_capabilities(allowed);
        if let Some(missing) = capabilities.iter().find(|c| !allowed.contains(c)) {
            return ToolDecision::blocked(REASON_CAPABILITY_NOT_ALLOWED, Some(missing.as_str()));
        }
    }
    ToolDecision::allowed()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn capabilities_are_normalized() {
        assert_eq!(
            normalize_capabilities(&caps(&[" Network", "filesystem", "network", ""])),
            caps(&["filesystem", "network"])
        );
    }

    #[test]
    fn denied_tools_win_over_capabilities() {
        let policy = ToolsConfig {
            denied_tools: caps(&["shell"]),
            ..ToolsConfig::default()
        };
        let decision = decide("shell", &[], &policy);
        assert_eq!(decision.reason.as_deref(), Some(REASON_TOOL_DENIED));
        assert!(decide("fetch", &caps(&["network"]), &policy).is_allowed());
    }

    #[test]
    fn capability_outside_allow_list_is_blocked() {
        let policy = ToolsConfig {
            allowed_capabilities: Some(caps(&["Network"])),
            ..ToolsConfig::default()
        };
        assert!(decide("fetch", &caps(&["network"]), &policy).is_allowed());
        let decision = decide("write", &caps(&["filesystem", "network"]), &policy);
        assert_eq!(decision.status, DecisionStatus::Blocked);
        assert_eq!(decision.capability.as_deref(), Some("filesystem"));
        assert_eq!(decision.reason.as_deref(), Some(REASON_CAPABILITY_NOT_ALLOWED));
    }
}
