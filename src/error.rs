//! error types
//!
use std::convert::From;
use thiserror::Error;

/// the global error type for an authorization run
#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum Execution {
    #[error("spent too much time verifying")]
    Timeout,
    #[error("too many facts generated")]
    TooManyFacts,
    #[error("too many engine iterations")]
    TooManyIterations,
    #[error("the rule {rule} provided by block {block_id} has head variables not used in its body")]
    InvalidRule { block_id: usize, rule: String },
    #[error("authorization failed")]
    FailedLogic(Logic),
}

impl From<Logic> for Execution {
    fn from(e: Logic) -> Self {
        Execution::FailedLogic(e)
    }
}

impl From<RunLimit> for Execution {
    fn from(e: RunLimit) -> Self {
        match e {
            RunLimit::TooManyFacts => Execution::TooManyFacts,
            RunLimit::TooManyIterations => Execution::TooManyIterations,
            RunLimit::Timeout => Execution::Timeout,
        }
    }
}

/// check and policy evaluation outcomes that reject the request
#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum Logic {
    #[error("checks failed validation")]
    FailedChecks(Vec<FailedCheck>),
    #[error("no matching policy was found")]
    NoPoliciesMatched(Vec<FailedCheck>),
    #[error("a deny policy matched")]
    DenyRuleMatched {
        /// list of checks that failed validation
        checks: Vec<FailedCheck>,
        /// the policy that matched
        policy: MatchedPolicy,
    },
}

#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum MatchedPolicy {
    #[error("an allow policy matched")]
    Allow(usize),
    #[error("a deny policy matched")]
    Deny(usize),
}

/// check errors
#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum FailedCheck {
    #[error("a check failed in a block")]
    Block(FailedBlockCheck),
    #[error("a check provided by the authorizer failed")]
    Authorizer(FailedAuthorizerCheck),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FailedBlockCheck {
    pub block_id: usize,
    pub check_id: usize,
    /// pretty print of the check that failed
    pub rule: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FailedAuthorizerCheck {
    pub check_id: usize,
    /// pretty print of the check that failed
    pub rule: String,
}

/// runtime limits errors
#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum RunLimit {
    #[error("too many facts generated")]
    TooManyFacts,
    #[error("too many engine iterations")]
    TooManyIterations,
    #[error("spent too much time verifying")]
    Timeout,
}

/// expression evaluation failures
///
/// those are local: they only reject the candidate binding under
/// evaluation, they never abort the authorization run
#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum Expression {
    #[error("unknown variable {0}")]
    UnknownVariable(String),
    #[error("unexpected value type on the stack")]
    InvalidType,
    #[error("unbalanced expression stack")]
    InvalidStack,
    #[error("overflow")]
    Overflow,
    #[error("division by zero")]
    DivideByZero,
}
