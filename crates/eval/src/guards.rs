//! `requires` guards and the authentication/authorization taxonomy.
//!
//! Every evaluation records one authorization trace event (allowed, denied
//! or invalid) before any error propagates.

use serde::{Deserialize, Serialize};

use namel3ss_ir::{Expression, Span};

use crate::context::ExecutionContext;
use crate::error::{AuthCategory, AuthReason, RuntimeError};
use crate::expr::eval_expr;
use crate::trace::{AuthDecision, TraceEvent};

const IDENTITY_BUILTINS: [&str; 2] = ["has_role", "has_permission"];

/// Failure reported by the authentication layer that produced the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthError {
    MissingAuthentication,
    TokenInvalid,
    TokenExpired,
    SessionInvalid,
    SessionRevoked,
    SessionExpired,
}

/// Ambient authentication state of an invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthContext {
    #[serde(default)]
    pub authenticated: bool,
    #[serde(default)]
    pub error: Option<AuthError>,
}

impl AuthContext {
    pub fn authenticated() -> Self {
        AuthContext {
            authenticated: true,
            error: None,
        }
    }

    /// No credentials were presented.
    pub fn anonymous() -> Self {
        AuthContext {
            authenticated: false,
            error: Some(AuthError::MissingAuthentication),
        }
    }

    pub fn failed(error: AuthError) -> Self {
        AuthContext {
            authenticated: false,
            error: Some(error),
        }
    }
}

/// Result of evaluating a guard without raising.
#[derive(Debug)]
pub enum GuardOutcome {
    Allowed,
    Denied(RuntimeError),
}

/// Evaluate `expr` and raise on anything but `true`.
pub fn enforce_requires(
    ctx: &mut ExecutionContext,
    expr: &Expression,
    subject: &str,
) -> Result<(), RuntimeError> {
    match check_requires(ctx, expr, subject)? {
        GuardOutcome::Allowed => Ok(()),
        GuardOutcome::Denied(err) => Err(err),
    }
}

/// Evaluate `expr`, returning a denial instead of raising it. Type errors
/// and evaluation failures still propagate.
pub fn check_requires(
    ctx: &mut ExecutionContext,
    expr: &Expression,
    subject: &str,
) -> Result<GuardOutcome, RuntimeError> {
    let span = expr.span();
    let value = eval_expr(ctx, expr)?;
    let Some(allowed) = value.as_bool() else {
        record(ctx, subject, AuthDecision::Invalid, None, None);
        return Err(RuntimeError::GuardType {
            subject: subject.to_string(),
            got: value.type_name(),
            span,
        });
    };
    if allowed {
        record(ctx, subject, AuthDecision::Allowed, None, None);
        return Ok(GuardOutcome::Allowed);
    }
    let (category, reason) = classify_denial(expr, &ctx.auth);
    record(
        ctx,
        subject,
        AuthDecision::Denied,
        Some(category),
        Some(reason),
    );
    tracing::info!(subject, %category, %reason, "requires guard denied");
    Ok(GuardOutcome::Denied(denied(subject, category, reason, span)))
}

/// Map a failed guard onto the auth taxonomy.
pub fn classify_denial(expr: &Expression, auth: &AuthContext) -> (AuthCategory, AuthReason) {
    if !requires_mentions_identity(expr) {
        return (AuthCategory::Policy, AuthReason::AccessDenied);
    }
    match auth.error {
        Some(AuthError::MissingAuthentication) => {
            (AuthCategory::Authentication, AuthReason::MissingAuthentication)
        }
        Some(AuthError::TokenInvalid) => (AuthCategory::Authentication, AuthReason::TokenInvalid),
        Some(AuthError::TokenExpired) => (AuthCategory::Authentication, AuthReason::TokenExpired),
        Some(AuthError::SessionInvalid) | Some(AuthError::SessionRevoked) => {
            (AuthCategory::Authentication, AuthReason::SessionRevoked)
        }
        Some(AuthError::SessionExpired) => {
            (AuthCategory::Authentication, AuthReason::SessionExpired)
        }
        None if auth.authenticated => {
            (AuthCategory::Permission, AuthReason::InsufficientPermissions)
        }
        None => (AuthCategory::Policy, AuthReason::AccessDenied),
    }
}

/// Whether any node of `expr` reads the caller identity. Role and
/// permission builtins always do, with or without an explicit argument.
pub fn requires_mentions_identity(expr: &Expression) -> bool {
    match expr {
        Expression::Var { name, .. } => name == "identity",
        Expression::Attr { base, .. } => base == "identity",
        Expression::Builtin { name, .. } if IDENTITY_BUILTINS.contains(&name.as_str()) => true,
        _ => expr.children().into_iter().any(requires_mentions_identity),
    }
}

fn denied(subject: &str, category: AuthCategory, reason: AuthReason, span: Span) -> RuntimeError {
    RuntimeError::AuthDenied {
        category,
        reason,
        subject: subject.to_string(),
        span,
    }
}

fn record(
    ctx: &mut ExecutionContext,
    subject: &str,
    decision: AuthDecision,
    category: Option<AuthCategory>,
    reason: Option<AuthReason>,
) {
    ctx.traces.push(TraceEvent::Authorization {
        subject: subject.to_string(),
        decision,
        category,
        reason: reason.map(|r| r.as_str().to_string()),
    });
}
