use mesh_policy_core::{
    authz::{Action, AuthorizationPolicy},
    http_route::StatusCode,
    Request, ResourceMeta,
};
use std::fmt;
use tracing::{debug, trace};

/// Identifies the rule of a policy that matched a request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PolicyRule {
    pub policy: ResourceMeta,
    pub rule: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthzDecision {
    /// `policy` is unset when no ALLOW policy applies to the workload.
    Allow { policy: Option<PolicyRule> },
    Deny { reason: DenyReason },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DenyReason {
    /// A DENY policy matched.
    Denied(PolicyRule),

    /// ALLOW policies apply to the workload but none matched.
    NotAllowed,
}

/// The outcome of evaluating a request against a workload's policies.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Evaluation {
    pub decision: AuthzDecision,

    /// AUDIT policies that matched. These never affect the decision.
    pub audited: Vec<PolicyRule>,
}

/// Evaluates a request against the policies that apply to its target workload.
///
/// DENY policies are checked first and a match is final. Otherwise, a request is allowed if an
/// ALLOW policy matches it, or if no ALLOW policy applies at all.
pub fn evaluate<'p>(
    policies: impl IntoIterator<Item = &'p AuthorizationPolicy>,
    req: &Request,
) -> Evaluation {
    let mut deny = Vec::new();
    let mut allow = Vec::new();
    let mut audit = Vec::new();
    for policy in policies {
        match policy.action {
            Action::Deny => deny.push(policy),
            Action::Allow => allow.push(policy),
            Action::Audit => audit.push(policy),
        }
    }

    let audited = audit
        .into_iter()
        .filter_map(|p| matched(p, req))
        .collect::<Vec<_>>();

    if let Some(rule) = deny.into_iter().find_map(|p| matched(p, req)) {
        debug!(policy = %rule.policy, rule = rule.rule, "request denied");
        return Evaluation {
            decision: AuthzDecision::Deny {
                reason: DenyReason::Denied(rule),
            },
            audited,
        };
    }

    let decision = if allow.is_empty() {
        trace!("no ALLOW policies apply");
        AuthzDecision::Allow { policy: None }
    } else {
        match allow.into_iter().find_map(|p| matched(p, req)) {
            Some(rule) => {
                trace!(policy = %rule.policy, rule = rule.rule, "request allowed");
                AuthzDecision::Allow { policy: Some(rule) }
            }
            None => {
                debug!("no ALLOW policy matched");
                AuthzDecision::Deny {
                    reason: DenyReason::NotAllowed,
                }
            }
        }
    };
    Evaluation { decision, audited }
}

fn matched(policy: &AuthorizationPolicy, req: &Request) -> Option<PolicyRule> {
    let rule = policy.matching_rule(req)?;
    Some(PolicyRule {
        policy: policy.meta.clone(),
        rule,
    })
}

// === impl AuthzDecision ===

impl AuthzDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow { .. })
    }

    /// The status returned to a client whose request was denied.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Allow { .. } => None,
            Self::Deny { .. } => Some(StatusCode::FORBIDDEN),
        }
    }
}

impl fmt::Display for AuthzDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allow { policy: None } => f.write_str("allowed"),
            Self::Allow { policy: Some(rule) } => write!(f, "allowed by {rule}"),
            Self::Deny { reason } => write!(f, "denied: {reason}"),
        }
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Denied(rule) => write!(f, "matched {rule}"),
            Self::NotAllowed => f.write_str("no ALLOW policy matched"),
        }
    }
}

impl fmt::Display for PolicyRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} rules[{}]", self.policy, self.rule)
    }
}
