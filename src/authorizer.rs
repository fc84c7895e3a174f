//! Authorization of a block chain against an authorizer's world
use crate::datalog::{
    display_rule_body, Binding, Check, Fact, FactSet, Origin, PublicKey, Rule, RunLimits, Scope,
    Term, TrustedOrigins, World,
};
use crate::error;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyKind {
    Allow,
    Deny,
}

/// an ordered decision rule of the authorizer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Policy {
    pub queries: Vec<Rule>,
    pub kind: PolicyKind,
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            PolicyKind::Allow => write!(f, "allow if ")?,
            PolicyKind::Deny => write!(f, "deny if ")?,
        }

        if !self.queries.is_empty() {
            display_rule_body(&self.queries[0], f)?;

            for i in 1..self.queries.len() {
                write!(f, " or ")?;
                display_rule_body(&self.queries[i], f)?;
            }
        }

        Ok(())
    }
}

/// the contents of one block of a token
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Block {
    /// list of facts provided by this block
    pub facts: Vec<Fact>,
    /// list of rules provided by this block
    pub rules: Vec<Rule>,
    /// checks that the token and ambient data must validate
    pub checks: Vec<Check>,
    /// default trust applied to the rules and checks of this block
    pub scopes: Vec<Scope>,
    /// free form annotation, kept for diagnostics
    pub context: Option<String>,
}

/// a block whose signature was already verified, along with the
/// authentication data gathered during verification
#[derive(Debug, Clone, PartialEq)]
pub struct AuthenticatedBlock {
    pub block: Block,
    /// unique identifier tied to this block's signature
    pub revocation_id: Vec<u8>,
    /// key of the external signer, `None` for the authority block
    pub external_key: Option<PublicKey>,
}

/// the authorizer's own block, plus its allow/deny policies
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuthorizerBlock {
    pub block: Block,
    /// policies are tried in order, the first matching one decides
    pub policies: Vec<Policy>,
}

/// a policy query that matched, with every solution it produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchedQuery {
    pub query: Rule,
    pub bindings: BTreeSet<Binding>,
}

/// the result of a successful authorization
#[derive(Debug, Clone, PartialEq)]
pub struct AuthorizationSuccess {
    /// index of the allow policy that matched
    pub policy_index: usize,
    pub matched_allow: MatchedQuery,
    /// every fact derived during the run, grouped by origin
    pub all_facts: FactSet,
    /// the limits the run was performed under
    pub limits: RunLimits,
    /// combined block contexts, the last one wins
    pub context: Option<String>,
}

impl AuthorizationSuccess {
    /// queries the facts that were established by the authority block
    /// alone, never those brought by extension blocks
    pub fn query_authority_facts(&self, query: &Rule) -> BTreeSet<Binding> {
        let scope: TrustedOrigins = [0usize].iter().collect();
        query.solutions(&self.all_facts, &scope, &self.limits)
    }
}

/// verifies the token's checks and the authorizer's policies over the
/// facts derivable from all blocks
///
/// * `authority` is block 0, `blocks` are numbered from 1
/// * the authorizer's own block gets the id `1 + blocks.len()`
/// * each block's revocation identifier is published as a
///   `revocation_id(<block index>, <id>)` fact under the authorizer's
///   origin
///
/// every check of every block is evaluated, even after a failure, so the
/// error can report the full list. Policies are then tried in order and
/// the first one with a solution decides.
pub fn authorize(
    authority: &AuthenticatedBlock,
    blocks: &[AuthenticatedBlock],
    authorizer: &AuthorizerBlock,
    limits: &RunLimits,
) -> Result<AuthorizationSuccess, error::Execution> {
    let start = Instant::now();
    let deadline = start + limits.max_time;

    let authorizer_id = 1 + blocks.len();

    let mut public_key_to_block_id: HashMap<PublicKey, Vec<usize>> = HashMap::new();
    for (i, authenticated) in blocks.iter().enumerate() {
        if let Some(key) = authenticated.external_key {
            public_key_to_block_id.entry(key).or_default().push(i + 1);
        }
    }

    let token_blocks: Vec<&AuthenticatedBlock> =
        std::iter::once(authority).chain(blocks.iter()).collect();

    let mut world = World::new();
    let mut block_trusted_origins = Vec::with_capacity(token_blocks.len());

    for (i, authenticated) in token_blocks.iter().enumerate() {
        let block = &authenticated.block;
        let block_origin: Origin = [i].iter().collect();

        let default_origins = TrustedOrigins::from_scopes(
            &block.scopes,
            &TrustedOrigins::for_block(i, authorizer_id),
            i,
            authorizer_id,
            &public_key_to_block_id,
        );

        for fact in block.facts.iter() {
            world.add_fact(&block_origin, fact.clone());
        }

        for rule in block.rules.iter() {
            if rule.validate_variables().is_err() {
                return Err(error::Execution::InvalidRule {
                    block_id: i,
                    rule: rule.to_string(),
                });
            }

            let rule_trusted_origins = TrustedOrigins::from_scopes(
                &rule.scopes,
                &default_origins,
                i,
                authorizer_id,
                &public_key_to_block_id,
            );

            world.add_rule(i, &rule_trusted_origins, rule.clone());
        }

        block_trusted_origins.push(default_origins);
    }

    // the authorizer's own block
    let authorizer_origin: Origin = [authorizer_id].iter().collect();
    let authorizer_trusted_origins = TrustedOrigins::from_scopes(
        &authorizer.block.scopes,
        &TrustedOrigins::all(authorizer_id),
        authorizer_id,
        authorizer_id,
        &public_key_to_block_id,
    );

    for fact in authorizer.block.facts.iter() {
        world.add_fact(&authorizer_origin, fact.clone());
    }

    for rule in authorizer.block.rules.iter() {
        if rule.validate_variables().is_err() {
            return Err(error::Execution::InvalidRule {
                block_id: authorizer_id,
                rule: rule.to_string(),
            });
        }

        let rule_trusted_origins = TrustedOrigins::from_scopes(
            &rule.scopes,
            &authorizer_trusted_origins,
            authorizer_id,
            authorizer_id,
            &public_key_to_block_id,
        );

        world.add_rule(authorizer_id, &rule_trusted_origins, rule.clone());
    }

    // revocation identifiers become queryable facts, held by the
    // authorizer so that no token block can pass them off as its own
    for (i, authenticated) in token_blocks.iter().enumerate() {
        world.add_fact(
            &authorizer_origin,
            Fact::new(
                "revocation_id",
                &[
                    Term::Integer(i as i64),
                    Term::Bytes(authenticated.revocation_id.clone()),
                ],
            ),
        );
    }

    world.run_with_deadline(limits, deadline)?;

    let mut errors = vec![];

    for (i, authenticated) in token_blocks.iter().enumerate() {
        for (j, check) in authenticated.block.checks.iter().enumerate() {
            let mut successful = false;

            for query in check.queries.iter() {
                let query_trusted_origins = TrustedOrigins::from_scopes(
                    &query.scopes,
                    &block_trusted_origins[i],
                    i,
                    authorizer_id,
                    &public_key_to_block_id,
                );

                let res = query.find_match(&world.facts, &query_trusted_origins, limits);

                if Instant::now() >= deadline {
                    return Err(error::Execution::Timeout);
                }

                if res {
                    successful = true;
                    break;
                }
            }

            if !successful {
                errors.push(error::FailedCheck::Block(error::FailedBlockCheck {
                    block_id: i,
                    check_id: j,
                    rule: check.to_string(),
                }));
            }
        }
    }

    for (j, check) in authorizer.block.checks.iter().enumerate() {
        let mut successful = false;

        for query in check.queries.iter() {
            let query_trusted_origins = TrustedOrigins::from_scopes(
                &query.scopes,
                &authorizer_trusted_origins,
                authorizer_id,
                authorizer_id,
                &public_key_to_block_id,
            );

            let res = query.find_match(&world.facts, &query_trusted_origins, limits);

            if Instant::now() >= deadline {
                return Err(error::Execution::Timeout);
            }

            if res {
                successful = true;
                break;
            }
        }

        if !successful {
            errors.push(error::FailedCheck::Authorizer(
                error::FailedAuthorizerCheck {
                    check_id: j,
                    rule: check.to_string(),
                },
            ));
        }
    }

    let mut policy_result: Option<(usize, &Policy, MatchedQuery)> = None;

    'policies_test: for (i, policy) in authorizer.policies.iter().enumerate() {
        for query in policy.queries.iter() {
            let query_trusted_origins = TrustedOrigins::from_scopes(
                &query.scopes,
                &authorizer_trusted_origins,
                authorizer_id,
                authorizer_id,
                &public_key_to_block_id,
            );

            let bindings = query.solutions(&world.facts, &query_trusted_origins, limits);

            if Instant::now() >= deadline {
                return Err(error::Execution::Timeout);
            }

            if !bindings.is_empty() {
                policy_result = Some((
                    i,
                    policy,
                    MatchedQuery {
                        query: query.clone(),
                        bindings,
                    },
                ));
                break 'policies_test;
            }
        }
    }

    let mut context = None;
    for authenticated in token_blocks.iter() {
        if authenticated.block.context.is_some() {
            context = authenticated.block.context.clone();
        }
    }
    if authorizer.block.context.is_some() {
        context = authorizer.block.context.clone();
    }

    match (policy_result, errors.is_empty()) {
        (Some((i, policy, matched_allow)), true) if policy.kind == PolicyKind::Allow => {
            Ok(AuthorizationSuccess {
                policy_index: i,
                matched_allow,
                all_facts: world.facts,
                limits: limits.clone(),
                context,
            })
        }
        (Some((i, policy, _)), _) if policy.kind == PolicyKind::Deny => {
            Err(error::Logic::DenyRuleMatched {
                checks: errors,
                policy: error::MatchedPolicy::Deny(i),
            }
            .into())
        }
        (Some(_), _) => Err(error::Logic::FailedChecks(errors).into()),
        (None, _) => Err(error::Logic::NoPoliciesMatched(errors).into()),
    }
}
