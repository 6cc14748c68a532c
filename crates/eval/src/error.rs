//! Runtime error taxonomy.

use std::fmt;

use serde::Serialize;

use namel3ss_analyze::PurityViolation;
use namel3ss_ir::Span;
use namel3ss_storage::StorageError;

/// Coarse class of an authorization failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthCategory {
    Authentication,
    Permission,
    Policy,
}

impl AuthCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            AuthCategory::Authentication => "authentication",
            AuthCategory::Permission => "permission",
            AuthCategory::Policy => "policy",
        }
    }
}

impl fmt::Display for AuthCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Machine-readable reason code of an authorization failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthReason {
    MissingAuthentication,
    TokenInvalid,
    TokenExpired,
    SessionRevoked,
    SessionExpired,
    InsufficientPermissions,
    AccessDenied,
}

impl AuthReason {
    pub fn as_str(self) -> &'static str {
        match self {
            AuthReason::MissingAuthentication => "missing_authentication",
            AuthReason::TokenInvalid => "token_invalid",
            AuthReason::TokenExpired => "token_expired",
            AuthReason::SessionRevoked => "session_revoked",
            AuthReason::SessionExpired => "session_expired",
            AuthReason::InsufficientPermissions => "insufficient_permissions",
            AuthReason::AccessDenied => "access_denied",
        }
    }
}

impl fmt::Display for AuthReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised while loading or running a flow.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Purity(#[from] PurityViolation),

    #[error("access to {subject} denied: {category} ({reason})")]
    AuthDenied {
        category: AuthCategory,
        reason: AuthReason,
        subject: String,
        span: Span,
    },

    #[error("requires guard for {subject} must be boolean, got {got} at {span}")]
    GuardType {
        subject: String,
        got: &'static str,
        span: Span,
    },

    #[error("tool \"{tool}\" blocked: {reason}")]
    ToolBlocked {
        tool: String,
        capability: Option<String>,
        reason: String,
    },

    #[error("tool \"{tool}\" failed ({error_type}): {message}")]
    ToolFailed {
        tool: String,
        error_type: String,
        message: String,
    },

    #[error("unknown tool \"{tool}\"")]
    UnknownTool { tool: String },

    #[error("unknown record \"{record}\" at {span}")]
    UnknownRecord { record: String, span: Span },

    #[error("record \"{record}\" has no field \"{field}\" at {span}")]
    UnknownField {
        record: String,
        field: String,
        span: Span,
    },

    #[error("invalid {record} payload: {message} at {span}")]
    InvalidPayload {
        record: String,
        message: String,
        span: Span,
    },

    #[error("predicate for {record} cannot be compiled to SQL: {reason}")]
    SqlRequired { record: String, reason: String },

    #[error("{message} at {span}")]
    Type { message: String, span: Span },

    #[error("unknown variable \"{name}\" at {span}")]
    UnknownVariable { name: String, span: Span },

    #[error("\"{base}\" has no attribute \"{attr}\" at {span}")]
    MissingAttribute {
        base: String,
        attr: String,
        span: Span,
    },

    #[error("division by zero at {span}")]
    DivisionByZero { span: Span },

    #[error("numeric overflow at {span}")]
    Overflow { span: Span },

    #[error("number {value} is outside the supported numeric range at {span}")]
    NumberRange { value: String, span: Span },

    #[error("unknown flow \"{name}\"")]
    UnknownFlow { name: String },

    #[error("unknown pipeline \"{name}\"")]
    UnknownPipeline { name: String },

    #[error("unknown function \"{name}\"")]
    UnknownFunction { name: String },

    #[error("unknown AI profile \"{name}\"")]
    UnknownAi { name: String },

    #[error("unknown agent \"{name}\"")]
    UnknownAgent { name: String },

    #[error("{message} at {span}")]
    StateWrite { message: String, span: Span },

    #[error("flow \"{flow}\" contract: {message}")]
    Contract { flow: String, message: String },

    #[error("orchestration ({policy}): {message}")]
    Orchestration {
        policy: &'static str,
        message: String,
    },

    #[error("parallel task \"{task}\" failed: {message}")]
    Parallel { task: String, message: String },

    #[error("{message} at {span}")]
    Invalid { message: String, span: Span },

    #[error("{message} at {span}")]
    Limit { message: String, span: Span },

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("AI provider error: {0}")]
    Ai(String),
}

impl RuntimeError {
    /// Stable snake_case name of the variant, bound as `kind` by `try/catch`.
    pub fn kind(&self) -> &'static str {
        match self {
            RuntimeError::Purity(_) => "purity",
            RuntimeError::AuthDenied { .. } => "auth_denied",
            RuntimeError::GuardType { .. } => "guard_type",
            RuntimeError::ToolBlocked { .. } => "tool_blocked",
            RuntimeError::ToolFailed { .. } => "tool_failed",
            RuntimeError::UnknownTool { .. } => "unknown_tool",
            RuntimeError::UnknownRecord { .. } => "unknown_record",
            RuntimeError::UnknownField { .. } => "unknown_field",
            RuntimeError::InvalidPayload { .. } => "invalid_payload",
            RuntimeError::SqlRequired { .. } => "sql_required",
            RuntimeError::Type { .. } => "type",
            RuntimeError::UnknownVariable { .. } => "unknown_variable",
            RuntimeError::MissingAttribute { .. } => "missing_attribute",
            RuntimeError::DivisionByZero { .. } => "division_by_zero",
            RuntimeError::Overflow { .. } => "overflow",
            RuntimeError::NumberRange { .. } => "number_range",
            RuntimeError::UnknownFlow { .. } => "unknown_flow",
            RuntimeError::UnknownPipeline { .. } => "unknown_pipeline",
            RuntimeError::UnknownFunction { .. } => "unknown_function",
            RuntimeError::UnknownAi { .. } => "unknown_ai",
            RuntimeError::UnknownAgent { .. } => "unknown_agent",
            RuntimeError::StateWrite { .. } => "state_write",
            RuntimeError::Contract { .. } => "contract",
            RuntimeError::Orchestration { .. } => "orchestration",
            RuntimeError::Parallel { .. } => "parallel",
            RuntimeError::Invalid { .. } => "invalid",
            RuntimeError::Limit { .. } => "limit",
            RuntimeError::Storage(_) => "storage",
            RuntimeError::Config(_) => "config",
            RuntimeError::Ai(_) => "ai",
        }
    }

    /// Source position, for errors tied to one IR node.
    pub fn span(&self) -> Option<Span> {
        match self {
            RuntimeError::Purity(v) => Some(v.span()),
            RuntimeError::AuthDenied { span, .. }
            | RuntimeError::GuardType { span, .. }
            | RuntimeError::UnknownRecord { span, .. }
            | RuntimeError::UnknownField { span, .. }
            | RuntimeError::InvalidPayload { span, .. }
            | RuntimeError::Type { span, .. }
            | RuntimeError::UnknownVariable { span, .. }
            | RuntimeError::MissingAttribute { span, .. }
            | RuntimeError::DivisionByZero { span }
            | RuntimeError::Overflow { span }
            | RuntimeError::NumberRange { span, .. }
            | RuntimeError::StateWrite { span, .. }
            | RuntimeError::Invalid { span, .. }
            | RuntimeError::Limit { span, .. } => Some(*span),
            _ => None,
        }
    }

    pub(crate) fn type_error(message: impl Into<String>, span: Span) -> Self {
        RuntimeError::Type {
            message: message.into(),
            span,
        }
    }

    pub(crate) fn invalid(message: impl Into<String>, span: Span) -> Self {
        RuntimeError::Invalid {
            message: message.into(),
            span,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_denied_message_carries_taxonomy() {
        let err = RuntimeError::AuthDenied {
            category: AuthCategory::Permission,
            reason: AuthReason::InsufficientPermissions,
            subject: "flow \"admin_only\"".to_string(),
            span: Span::new(3, 1),
        };
        assert_eq!(err.kind(), "auth_denied");
        assert_eq!(
            err.to_string(),
            "access to flow \"admin_only\" denied: permission (insufficient_permissions)"
        );
        assert_eq!(err.span(), Some(Span::new(3, 1)));
    }
}
