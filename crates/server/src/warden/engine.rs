//! Access decisions over a set of compiled policies.
//!
//! A request is allowed when at least one matching policy allows it and no
//! matching policy denies it. Without any match the request is denied.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use utoipa::ToSchema;

use crate::warden::condition::{Condition, ConditionError, RawCondition};
use crate::warden::pattern::{self, Pattern, PatternError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Effect {
    Allow,
    Deny,
}

impl Effect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Effect::Allow => "allow",
            Effect::Deny => "deny",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "allow" => Some(Effect::Allow),
            "deny" => Some(Effect::Deny),
            _ => None,
        }
    }
}

/// Who wants to do what with which resource.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct AccessRequest {
    pub subject: String,
    pub action: String,
    pub resource: String,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub context: Map<String, Value>,
}

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error(transparent)]
    Pattern(#[from] PatternError),
    #[error("condition on '{key}': {source}")]
    Condition {
        key: String,
        #[source]
        source: ConditionError,
    },
}

/// A policy ready for evaluation.
#[derive(Debug, Clone)]
pub struct Policy {
    pub id: String,
    pub subjects: Vec<Pattern>,
    pub actions: Vec<Pattern>,
    pub resources: Vec<Pattern>,
    pub effect: Effect,
    pub conditions: BTreeMap<String, Condition>,
}

impl Policy {
    pub fn compile(
        id: &str,
        subjects: &[String],
        actions: &[String],
        resources: &[String],
        effect: Effect,
        conditions: &BTreeMap<String, RawCondition>,
    ) -> Result<Self, PolicyError> {
        let conditions = conditions
            .iter()
            .map(|(key, raw)| {
                Condition::try_from(raw.clone())
                    .map(|condition| (key.clone(), condition))
                    .map_err(|source| PolicyError::Condition {
                        key: key.clone(),
                        source,
                    })
            })
            .collect::<Result<_, _>>()?;
        Ok(Self {
            id: id.to_string(),
            subjects: pattern::compile_all(subjects)?,
            actions: pattern::compile_all(actions)?,
            resources: pattern::compile_all(resources)?,
            effect,
            conditions,
        })
    }

    /// Whether this policy applies to `request` made by any of `subjects`
    /// (the request subject and the roles it is a member of).
    fn applies(&self, request: &AccessRequest, subjects: &[&str]) -> bool {
        self.actions.iter().any(|p| p.matches(&request.action))
            && self.resources.iter().any(|p| p.matches(&request.resource))
            && self
                .subjects
                .iter()
                .any(|p| subjects.iter().any(|s| p.matches(s)))
            && self
                .conditions
                .iter()
                .all(|(key, condition)| condition.fulfills(request.context.get(key), &request.subject))
    }
}

/// A named group of subjects.
#[derive(Debug, Clone, Default)]
pub struct Role {
    pub id: String,
    pub members: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allowed { policy: String },
    Denied { policy: String },
    /// No policy matched
    NotApplicable,
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed { .. })
    }
}

/// Evaluates `request` against `policies`. An explicit deny wins over any
/// allow; without a matching allow the request is denied.
pub fn evaluate(policies: &[Policy], roles: &[Role], request: &AccessRequest) -> Decision {
    let mut subjects = vec![request.subject.as_str()];
    subjects.extend(
        roles
            .iter()
            .filter(|role| role.members.iter().any(|m| m == &request.subject))
            .map(|role| role.id.as_str()),
    );

    let mut allowed_by = None;
    for policy in policies.iter().filter(|p| p.applies(request, &subjects)) {
        match policy.effect {
            Effect::Deny => {
                return Decision::Denied {
                    policy: policy.id.clone(),
                };
            }
            Effect::Allow if allowed_by.is_none() => allowed_by = Some(policy.id.clone()),
            Effect::Allow => {}
        }
    }
    match allowed_by {
        Some(policy) => Decision::Allowed { policy },
        None => Decision::NotApplicable,
    }
}
