//! Logic language implementation for checks
use crate::error;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::convert::AsRef;
use std::fmt;
use std::time::{Duration, Instant, SystemTime};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

mod expression;
mod origin;
pub use expression::*;
pub use origin::*;

/// an opaque block signer identity, used to resolve `trusting` scopes
///
/// signature verification happens before authorization, so only the
/// identity itself is carried here
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PublicKey([u8; 32]);

impl PublicKey {
    pub fn new(bytes: [u8; 32]) -> Self {
        PublicKey(bytes)
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.0
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ed25519/{}", hex::encode(self.0))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Term {
    Variable(String),
    Integer(i64),
    Str(String),
    Date(OffsetDateTime),
    Bytes(Vec<u8>),
    Bool(bool),
    Set(BTreeSet<Term>),
}

impl From<&Term> for Term {
    fn from(i: &Term) -> Self {
        i.clone()
    }
}

impl AsRef<Term> for Term {
    fn as_ref(&self) -> &Term {
        self
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Variable(i) => write!(f, "${}", i),
            Term::Integer(i) => write!(f, "{}", i),
            Term::Str(s) => write!(f, "\"{}\"", s),
            Term::Date(d) => {
                let date = d
                    .format(&Rfc3339)
                    .unwrap_or_else(|_| "<invalid date>".to_string());
                write!(f, "{}", date)
            }
            Term::Bytes(s) => write!(f, "hex:{}", hex::encode(s)),
            Term::Bool(b) => {
                if *b {
                    write!(f, "true")
                } else {
                    write!(f, "false")
                }
            }
            Term::Set(s) => {
                let terms = s.iter().map(|term| term.to_string()).collect::<Vec<_>>();
                write!(f, "[{}]", terms.join(", "))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Predicate {
    pub name: String,
    pub terms: Vec<Term>,
}

impl Predicate {
    pub fn new(name: &str, terms: &[Term]) -> Predicate {
        Predicate {
            name: name.to_string(),
            terms: terms.to_vec(),
        }
    }
}

impl AsRef<Predicate> for Predicate {
    fn as_ref(&self) -> &Predicate {
        self
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let terms = self.terms.iter().map(|t| t.to_string()).collect::<Vec<_>>();
        write!(f, "{}({})", self.name, terms.join(", "))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fact {
    pub predicate: Predicate,
}

impl Fact {
    pub fn new(name: &str, terms: &[Term]) -> Fact {
        Fact {
            predicate: Predicate::new(name, terms),
        }
    }
}

impl fmt::Display for Fact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.predicate.fmt(f)
    }
}

/// a restriction on the blocks whose facts a rule or query may consume
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Scope {
    /// the authority block, the current block and the authorizer
    Authority,
    /// the current block, all previous ones and the authorizer
    Previous,
    /// the current block, the authorizer and any block signed by this key
    PublicKey(PublicKey),
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Authority => write!(f, "authority"),
            Scope::Previous => write!(f, "previous"),
            Scope::PublicKey(key) => key.fmt(f),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Rule {
    pub head: Predicate,
    pub body: Vec<Predicate>,
    pub expressions: Vec<Expression>,
    pub scopes: Vec<Scope>,
}

/// a set of variable assignments satisfying a query body
pub type Binding = BTreeMap<String, Term>;

impl Rule {
    /// gather all of the variables used in that rule's body
    fn variables_set(&self) -> HashSet<String> {
        self.body
            .iter()
            .flat_map(|pred| {
                pred.terms.iter().filter_map(|term| match term {
                    Term::Variable(name) => Some(name.clone()),
                    _ => None,
                })
            })
            .collect::<HashSet<_>>()
    }

    /// enumerates the substitutions unifying the body against the
    /// provided facts, keeping those accepted by every expression
    fn matches<'a, IT>(
        &'a self,
        facts: IT,
        limits: &'a RunLimits,
    ) -> impl Iterator<Item = (Origin, HashMap<String, Term>)> + 'a
    where
        IT: Iterator<Item = (&'a Origin, &'a Fact)> + Clone + 'a,
    {
        let variables = MatchedVariables::new(self.variables_set());

        CombineIt::new(variables, &self.body, facts).filter(move |(_, variables)| {
            for e in self.expressions.iter() {
                match e.evaluate(variables, limits) {
                    Ok(Term::Bool(true)) => {}
                    // a type mismatch, an arithmetic error or any other
                    // local failure drops this binding and nothing else
                    _ => return false,
                }
            }
            true
        })
    }

    pub fn apply<'a, IT>(
        &'a self,
        facts: IT,
        rule_origin: usize,
        limits: &'a RunLimits,
    ) -> impl Iterator<Item = (Origin, Fact)> + 'a
    where
        IT: Iterator<Item = (&'a Origin, &'a Fact)> + Clone + 'a,
    {
        let head = self.head.clone();

        self.matches(facts, limits)
            .filter_map(move |(mut origin, bindings)| {
                let mut p = head.clone();
                for index in 0..p.terms.len() {
                    if let Term::Variable(name) = &p.terms[index] {
                        match bindings.get(name) {
                            Some(val) => p.terms[index] = val.clone(),
                            None => return None,
                        }
                    }
                }

                origin.insert(rule_origin);
                Some((origin, Fact { predicate: p }))
            })
    }

    pub fn find_match(&self, facts: &FactSet, scope: &TrustedOrigins, limits: &RunLimits) -> bool {
        self.matches(facts.iterator(scope), limits).next().is_some()
    }

    /// the full solution set of this query over the scoped facts
    pub fn solutions(
        &self,
        facts: &FactSet,
        scope: &TrustedOrigins,
        limits: &RunLimits,
    ) -> BTreeSet<Binding> {
        self.matches(facts.iterator(scope), limits)
            .map(|(_, bindings)| bindings.into_iter().collect())
            .collect()
    }

    /// every variable of the head must be bound by the body
    pub fn validate_variables(&self) -> Result<(), String> {
        let mut head_variables: HashSet<String> = self
            .head
            .terms
            .iter()
            .filter_map(|term| match term {
                Term::Variable(s) => Some(s.to_string()),
                _ => None,
            })
            .collect();

        for predicate in self.body.iter() {
            for term in predicate.terms.iter() {
                if let Term::Variable(v) = term {
                    head_variables.remove(v);
                    if head_variables.is_empty() {
                        return Ok(());
                    }
                }
            }
        }

        if head_variables.is_empty() {
            Ok(())
        } else {
            Err(format!(
                "rule head contains variables that are not used in predicates of the rule's body: {}",
                head_variables
                    .iter()
                    .map(|s| format!("${}", s))
                    .collect::<Vec<_>>()
                    .join(", ")
            ))
        }
    }
}

pub(crate) fn display_rule_body(r: &Rule, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if !r.body.is_empty() {
        write!(f, "{}", r.body[0])?;

        for i in 1..r.body.len() {
            write!(f, ", {}", r.body[i])?;
        }
    }

    if !r.expressions.is_empty() {
        if !r.body.is_empty() {
            write!(f, ", ")?;
        }

        write!(f, "{}", r.expressions[0])?;

        for i in 1..r.expressions.len() {
            write!(f, ", {}", r.expressions[i])?;
        }
    }

    if !r.scopes.is_empty() {
        write!(f, " trusting {}", r.scopes[0])?;
        for i in 1..r.scopes.len() {
            write!(f, ", {}", r.scopes[i])?;
        }
    }

    Ok(())
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <- ", self.head)?;
        display_rule_body(self, f)
    }
}

/// a check passes if at least one of its queries has a solution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Check {
    pub queries: Vec<Rule>,
}

impl fmt::Display for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "check if ")?;

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

/// recursive iterator for rule application
pub struct CombineIt<'a, IT> {
    variables: MatchedVariables,
    predicates: &'a [Predicate],
    all_facts: IT,
    current_facts: Box<dyn Iterator<Item = (&'a Origin, &'a Fact)> + 'a>,
    current_it: Option<Box<dyn Iterator<Item = (Origin, HashMap<String, Term>)> + 'a>>,
}

impl<'a, IT> CombineIt<'a, IT>
where
    IT: Iterator<Item = (&'a Origin, &'a Fact)> + Clone + 'a,
{
    pub fn new(variables: MatchedVariables, predicates: &'a [Predicate], facts: IT) -> Self {
        let current_facts: Box<dyn Iterator<Item = (&'a Origin, &'a Fact)> + 'a> =
            if predicates.is_empty() {
                Box::new(facts.clone())
            } else {
                let p = predicates[0].clone();
                Box::new(
                    facts
                        .clone()
                        .filter(move |fact| match_preds(&p, &fact.1.predicate)),
                )
            };

        CombineIt {
            variables,
            predicates,
            all_facts: facts,
            current_facts,
            current_it: None,
        }
    }
}

impl<'a, IT> Iterator for CombineIt<'a, IT>
where
    IT: Iterator<Item = (&'a Origin, &'a Fact)> + Clone + 'a,
    Self: 'a,
{
    type Item = (Origin, HashMap<String, Term>);

    fn next(&mut self) -> Option<(Origin, HashMap<String, Term>)> {
        // if we're the last iterator in the recursive chain, stop here
        if self.predicates.is_empty() {
            match self.variables.complete() {
                None => return None,
                Some(variables) => {
                    // if there were no predicates, we should return a
                    // value, but only once. To prevent further successful
                    // calls, we create a set of variables that cannot
                    // possibly be completed, so the next call will fail
                    self.variables = MatchedVariables::new([String::new()].into());
                    return Some((Origin::default(), variables));
                }
            }
        }

        loop {
            if self.current_it.is_none() {
                // fix the first predicate
                let pred = &self.predicates[0];

                loop {
                    if let Some((current_origin, current_fact)) = self.current_facts.next() {
                        // create a new MatchedVariables in which we fix variables we could unify
                        // from our first predicate and the current fact
                        let mut vars = self.variables.clone();
                        let mut match_terms = true;
                        for (key, id) in pred.terms.iter().zip(&current_fact.predicate.terms) {
                            if let (Term::Variable(k), id) = (key, id) {
                                if !vars.insert(k, id) {
                                    match_terms = false;
                                }

                                if !match_terms {
                                    break;
                                }
                            }
                        }

                        if !match_terms {
                            continue;
                        }

                        if self.predicates.len() == 1 {
                            match vars.complete() {
                                None => {
                                    continue;
                                }
                                Some(variables) => {
                                    return Some((current_origin.clone(), variables));
                                }
                            }
                        } else {
                            // create a new iterator with the matched variables, the rest of the predicates,
                            // and all of the facts
                            self.current_it = Some(Box::new(
                                CombineIt::new(
                                    vars,
                                    &self.predicates[1..],
                                    self.all_facts.clone(),
                                )
                                .map(move |(origin, variables)| {
                                    (origin.union(current_origin), variables)
                                }),
                            ));
                        }
                        break;
                    } else {
                        return None;
                    }
                }
            }

            if self.current_it.is_none() {
                break None;
            }

            if let Some((origin, variables)) = self.current_it.as_mut().and_then(|it| it.next()) {
                break Some((origin, variables));
            } else {
                self.current_it = None;
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchedVariables {
    pub variables: HashMap<String, Option<Term>>,
}

impl MatchedVariables {
    pub fn new(import: HashSet<String>) -> Self {
        MatchedVariables {
            variables: import.into_iter().map(|key| (key, None)).collect(),
        }
    }

    pub fn insert(&mut self, key: &str, value: &Term) -> bool {
        match self.variables.get(key) {
            Some(None) => {
                self.variables.insert(key.to_string(), Some(value.clone()));
                true
            }
            Some(Some(v)) => value == v,
            None => false,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.variables.values().all(|v| v.is_some())
    }

    pub fn complete(&self) -> Option<HashMap<String, Term>> {
        let mut result = HashMap::new();
        for (k, v) in self.variables.iter() {
            match v {
                Some(value) => result.insert(k.clone(), value.clone()),
                None => return None,
            };
        }
        Some(result)
    }
}

pub fn fact<I: AsRef<Term>>(name: &str, terms: &[I]) -> Fact {
    Fact {
        predicate: Predicate {
            name: name.to_string(),
            terms: terms.iter().map(|id| id.as_ref().clone()).collect(),
        },
    }
}

pub fn pred<I: AsRef<Term>>(name: &str, terms: &[I]) -> Predicate {
    Predicate {
        name: name.to_string(),
        terms: terms.iter().map(|id| id.as_ref().clone()).collect(),
    }
}

pub fn rule<I: AsRef<Term>, P: AsRef<Predicate>>(
    head_name: &str,
    head_terms: &[I],
    predicates: &[P],
) -> Rule {
    Rule {
        head: pred(head_name, head_terms),
        body: predicates.iter().map(|p| p.as_ref().clone()).collect(),
        expressions: Vec::new(),
        scopes: vec![],
    }
}

pub fn expressed_rule<I: AsRef<Term>, P: AsRef<Predicate>, C: AsRef<Expression>>(
    head_name: &str,
    head_terms: &[I],
    predicates: &[P],
    expressions: &[C],
) -> Rule {
    Rule {
        head: pred(head_name, head_terms),
        body: predicates.iter().map(|p| p.as_ref().clone()).collect(),
        expressions: expressions.iter().map(|c| c.as_ref().clone()).collect(),
        scopes: vec![],
    }
}

/// a query is a bodiless rule: only its solutions matter
pub fn query<P: AsRef<Predicate>>(predicates: &[P], expressions: &[Expression]) -> Rule {
    Rule {
        head: Predicate {
            name: "query".to_string(),
            terms: vec![],
        },
        body: predicates.iter().map(|p| p.as_ref().clone()).collect(),
        expressions: expressions.to_vec(),
        scopes: vec![],
    }
}

pub fn int(i: i64) -> Term {
    Term::Integer(i)
}

pub fn string(s: &str) -> Term {
    Term::Str(s.to_string())
}

pub fn date(t: &SystemTime) -> Term {
    Term::Date((*t).into())
}

pub fn bytes(b: &[u8]) -> Term {
    Term::Bytes(b.to_vec())
}

pub fn var(name: &str) -> Term {
    Term::Variable(name.to_string())
}

pub fn set(s: BTreeSet<Term>) -> Term {
    Term::Set(s)
}

pub fn match_preds(rule_pred: &Predicate, fact_pred: &Predicate) -> bool {
    rule_pred.name == fact_pred.name
        && rule_pred.terms.len() == fact_pred.terms.len()
        && rule_pred
            .terms
            .iter()
            .zip(&fact_pred.terms)
            .all(|(fid, pid)| match (fid, pid) {
                // the fact should not contain variables
                (_, Term::Variable(_)) => false,
                (Term::Variable(_), _) => true,
                (Term::Integer(i), Term::Integer(j)) => i == j,
                (Term::Str(i), Term::Str(j)) => i == j,
                (Term::Date(i), Term::Date(j)) => i == j,
                (Term::Bytes(i), Term::Bytes(j)) => i == j,
                (Term::Bool(i), Term::Bool(j)) => i == j,
                (Term::Set(i), Term::Set(j)) => i == j,
                _ => false,
            })
}

/// runtime limits for the Datalog engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunLimits {
    /// maximum number of Datalog facts (memory usage)
    pub max_facts: u32,
    /// maximum number of iterations of the rules applications (prevents degenerate rules)
    pub max_iterations: u32,
    /// maximum execution time
    pub max_time: Duration,
    /// maximum compiled size for the regular expressions used in `matches`
    pub max_regex_size: usize,
}

impl std::default::Default for RunLimits {
    fn default() -> Self {
        RunLimits {
            max_facts: 1000,
            max_iterations: 100,
            max_time: Duration::from_millis(1),
            max_regex_size: 1 << 20,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct World {
    pub facts: FactSet,
    pub rules: RuleSet,
}

impl World {
    pub fn new() -> Self {
        World::default()
    }

    pub fn add_fact(&mut self, origin: &Origin, fact: Fact) {
        self.facts.insert(origin, fact);
    }

    pub fn add_rule(&mut self, origin: usize, scope: &TrustedOrigins, rule: Rule) {
        self.rules.insert(origin, scope, rule);
    }

    pub fn run(&mut self, limits: &RunLimits) -> Result<(), error::RunLimit> {
        let deadline = Instant::now() + limits.max_time;
        self.run_with_deadline(limits, deadline)
    }

    /// applies every rule over the current facts until no new
    /// (origin, fact) pair appears, or one of the limits is reached
    pub fn run_with_deadline(
        &mut self,
        limits: &RunLimits,
        deadline: Instant,
    ) -> Result<(), error::RunLimit> {
        let mut iterations = 0;

        loop {
            let mut new_facts = FactSet::default();

            for (scope, rules) in self.rules.inner.iter() {
                let it = self.facts.iterator(scope);
                for (origin, rule) in rules {
                    new_facts.extend(rule.apply(it.clone(), *origin, limits));
                }
            }

            let len = self.facts.len();
            self.facts.merge(new_facts);
            iterations += 1;

            if self.facts.len() >= limits.max_facts as usize {
                return Err(error::RunLimit::TooManyFacts);
            }

            if iterations >= limits.max_iterations {
                return Err(error::RunLimit::TooManyIterations);
            }

            if Instant::now() >= deadline {
                return Err(error::RunLimit::Timeout);
            }

            // growth is measured in distinct (origin, fact) pairs: a rule
            // re-deriving a known pair does not keep the loop alive
            if self.facts.len() == len {
                break;
            }
        }

        Ok(())
    }

    pub fn query_rule(
        &self,
        rule: Rule,
        origin: usize,
        scope: &TrustedOrigins,
        limits: &RunLimits,
    ) -> FactSet {
        let mut new_facts = FactSet::default();
        let it = self.facts.iterator(scope);
        new_facts.extend(rule.apply(it, origin, limits));

        new_facts
    }

    pub fn query_match(&self, rule: &Rule, scope: &TrustedOrigins, limits: &RunLimits) -> bool {
        rule.find_match(&self.facts, scope, limits)
    }

    pub fn print_world(&self) -> String {
        let mut facts = self
            .facts
            .iter_all()
            .map(|(origin, fact)| format!("{:?}\t{}", origin, fact))
            .collect::<Vec<_>>();
        facts.sort();

        let mut rules = self
            .rules
            .iter_all()
            .map(|(_, rule)| rule.to_string())
            .collect::<Vec<_>>();
        rules.sort();

        format!("World {{\n  facts: {:#?}\n  rules: {:#?}\n}}", facts, rules)
    }
}

/// all the facts of an authorization run, grouped by origin
///
/// each fact appears under exactly one origin, the one computed by its
/// derivation
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FactSet {
    pub(crate) inner: HashMap<Origin, HashSet<Fact>>,
}

impl FactSet {
    pub fn insert(&mut self, origin: &Origin, fact: Fact) {
        match self.inner.get_mut(origin) {
            None => {
                let mut set = HashSet::new();
                set.insert(fact);
                self.inner.insert(origin.clone(), set);
            }
            Some(set) => {
                set.insert(fact);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.values().fold(0, |acc, set| acc + set.len())
    }

    pub fn is_empty(&self) -> bool {
        self.inner.values().all(|set| set.is_empty())
    }

    pub fn iterator<'a>(
        &'a self,
        block_ids: &'a TrustedOrigins,
    ) -> impl Iterator<Item = (&'a Origin, &'a Fact)> + Clone {
        self.inner
            .iter()
            .filter_map(move |(ids, facts)| {
                if block_ids.contains(ids) {
                    Some(facts.iter().map(move |fact| (ids, fact)))
                } else {
                    None
                }
            })
            .flatten()
    }

    pub fn iter_all<'a>(&'a self) -> impl Iterator<Item = (&'a Origin, &'a Fact)> + Clone {
        self.inner
            .iter()
            .flat_map(move |(ids, facts)| facts.iter().map(move |fact| (ids, fact)))
    }

    pub fn merge(&mut self, other: FactSet) {
        for (origin, facts) in other.inner {
            let entry = self.inner.entry(origin).or_default();
            entry.extend(facts.into_iter());
        }
    }
}

impl Extend<(Origin, Fact)> for FactSet {
    fn extend<T: IntoIterator<Item = (Origin, Fact)>>(&mut self, iter: T) {
        for (origin, fact) in iter {
            let entry = self.inner.entry(origin).or_default();
            entry.insert(fact);
        }
    }
}

impl IntoIterator for FactSet {
    type Item = (Origin, Fact);

    type IntoIter = Box<dyn Iterator<Item = (Origin, Fact)>>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(
            self.inner.into_iter().flat_map(move |(ids, facts)| {
                facts.into_iter().map(move |fact| (ids.clone(), fact))
            }),
        )
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RuleSet {
    pub inner: HashMap<TrustedOrigins, Vec<(usize, Rule)>>,
}

impl RuleSet {
    pub fn insert(&mut self, origin: usize, scope: &TrustedOrigins, rule: Rule) {
        match self.inner.get_mut(scope) {
            None => {
                self.inner.insert(scope.clone(), vec![(origin, rule)]);
            }
            Some(set) => {
                set.push((origin, rule));
            }
        }
    }

    pub fn iter_all<'a>(&'a self) -> impl Iterator<Item = (&'a TrustedOrigins, &'a Rule)> + Clone {
        self.inner
            .iter()
            .flat_map(move |(ids, rules)| rules.iter().map(move |(_, rule)| (ids, rule)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::UNIX_EPOCH;

    fn limits() -> RunLimits {
        RunLimits {
            max_time: Duration::from_secs(10),
            ..RunLimits::default()
        }
    }

    fn authority() -> TrustedOrigins {
        [0usize].iter().collect()
    }

    #[test]
    fn family() {
        let mut w = World::new();

        let a = string("A");
        let b = string("B");
        let c = string("C");
        let d = string("D");
        let e = string("e");

        w.add_fact(&[0].iter().collect(), fact("parent", &[&a, &b]));
        w.add_fact(&[0].iter().collect(), fact("parent", &[&b, &c]));
        w.add_fact(&[0].iter().collect(), fact("parent", &[&c, &d]));

        let r1 = rule(
            "grandparent",
            &[var("grandparent"), var("grandchild")],
            &[
                pred("parent", &[var("grandparent"), var("parent")]),
                pred("parent", &[var("parent"), var("grandchild")]),
            ],
        );

        let query_rule_result = w.query_rule(r1, 0, &authority(), &limits());
        println!("grandparents query_rules: {:?}", query_rule_result);
        println!("current facts: {:?}", w.facts);

        let r2 = rule(
            "grandparent",
            &[var("grandparent"), var("grandchild")],
            &[
                pred("parent", &[var("grandparent"), var("parent")]),
                pred("parent", &[var("parent"), var("grandchild")]),
            ],
        );

        println!("adding r2: {}", r2);
        w.add_rule(0, &authority(), r2);

        w.run(&limits()).unwrap();

        w.add_fact(&[0].iter().collect(), fact("parent", &[&c, &e]));
        w.run(&limits()).unwrap();

        let res = w.query_rule(
            rule::<Term, Predicate>(
                "grandparent",
                &[var("grandparent"), var("grandchild")],
                &[pred("grandparent", &[var("grandparent"), var("grandchild")])],
            ),
            0,
            &authority(),
            &limits(),
        );
        println!("grandparents after inserting parent(C, E): {:?}", res);

        let res = res
            .iter_all()
            .map(|(_origin, fact)| fact)
            .cloned()
            .collect::<HashSet<_>>();
        let compared = (vec![
            fact("grandparent", &[&a, &c]),
            fact("grandparent", &[&b, &d]),
            fact("grandparent", &[&b, &e]),
        ])
        .drain(..)
        .collect::<HashSet<_>>();
        assert_eq!(res, compared);
    }

    #[test]
    fn numbers() {
        let mut w = World::new();

        let abc = string("abc");
        let def = string("def");
        let ghi = string("ghi");
        let jkl = string("jkl");
        let mno = string("mno");
        let aaa = string("AAA");
        let bbb = string("BBB");
        let ccc = string("CCC");

        w.add_fact(&[0].iter().collect(), fact("t1", &[&int(0), &abc]));
        w.add_fact(&[0].iter().collect(), fact("t1", &[&int(1), &def]));
        w.add_fact(&[0].iter().collect(), fact("t1", &[&int(2), &ghi]));
        w.add_fact(&[0].iter().collect(), fact("t1", &[&int(3), &jkl]));
        w.add_fact(&[0].iter().collect(), fact("t1", &[&int(4), &mno]));

        w.add_fact(
            &[0].iter().collect(),
            fact("t2", &[&int(0), &aaa, &int(0)]),
        );
        w.add_fact(
            &[0].iter().collect(),
            fact("t2", &[&int(1), &bbb, &int(0)]),
        );
        w.add_fact(
            &[0].iter().collect(),
            fact("t2", &[&int(2), &ccc, &int(1)]),
        );

        let res = w.query_rule(
            rule(
                "join",
                &[var("left"), var("right")],
                &[
                    pred("t1", &[var("id"), var("left")]),
                    pred("t2", &[var("t2_id"), var("right"), var("id")]),
                ],
            ),
            0,
            &authority(),
            &limits(),
        );
        for (_, fact) in res.iter_all() {
            println!("\t{}", fact);
        }

        let res2 = res
            .iter_all()
            .map(|(_origin, fact)| fact)
            .cloned()
            .collect::<HashSet<_>>();
        let compared = (vec![
            fact("join", &[&abc, &aaa]),
            fact("join", &[&abc, &bbb]),
            fact("join", &[&def, &ccc]),
        ])
        .drain(..)
        .collect::<HashSet<_>>();
        assert_eq!(res2, compared);

        // test constraints
        let res = w.query_rule(
            expressed_rule(
                "join",
                &[var("left"), var("right")],
                &[
                    pred("t1", &[var("id"), var("left")]),
                    pred("t2", &[var("t2_id"), var("right"), var("id")]),
                ],
                &[Expression {
                    ops: vec![
                        Op::Value(var("id")),
                        Op::Value(Term::Integer(1)),
                        Op::Binary(Binary::LessThan),
                    ],
                }],
            ),
            0,
            &authority(),
            &limits(),
        );

        let res2 = res
            .iter_all()
            .map(|(_, fact)| fact)
            .cloned()
            .collect::<HashSet<_>>();
        let compared = (vec![fact("join", &[&abc, &aaa]), fact("join", &[&abc, &bbb])])
            .drain(..)
            .collect::<HashSet<_>>();
        assert_eq!(res2, compared);
    }

    #[test]
    fn str() {
        let mut w = World::new();

        let app_0 = string("app_0");
        let app_1 = string("app_1");
        let app_2 = string("app_2");
        let example = string("example.com");
        let test_com = string("test.com");
        let test_fr = string("test.fr");
        let www_example = string("www.example.com");
        let mx_example = string("mx.example.com");

        w.add_fact(
            &[0].iter().collect(),
            fact("route", &[&int(0), &app_0, &example]),
        );
        w.add_fact(
            &[0].iter().collect(),
            fact("route", &[&int(1), &app_1, &test_com]),
        );
        w.add_fact(
            &[0].iter().collect(),
            fact("route", &[&int(2), &app_2, &test_fr]),
        );
        w.add_fact(
            &[0].iter().collect(),
            fact("route", &[&int(3), &app_0, &www_example]),
        );
        w.add_fact(
            &[0].iter().collect(),
            fact("route", &[&int(4), &app_1, &mx_example]),
        );

        fn test_suffix(w: &World, suffix: &str) -> Vec<Fact> {
            w.query_rule(
                expressed_rule(
                    "route suffix",
                    &[var("app_id"), var("domain_name")],
                    &[pred(
                        "route",
                        &[var("route_id"), var("app_id"), var("domain_name")],
                    )],
                    &[Expression {
                        ops: vec![
                            Op::Value(var("domain_name")),
                            Op::Value(string(suffix)),
                            Op::Binary(Binary::Suffix),
                        ],
                    }],
                ),
                0,
                &[0usize].iter().collect(),
                &RunLimits {
                    max_time: Duration::from_secs(10),
                    ..RunLimits::default()
                },
            )
            .iter_all()
            .map(|(_, fact)| fact.clone())
            .collect()
        }

        let res = test_suffix(&w, ".fr");
        let res2 = res.iter().cloned().collect::<HashSet<_>>();
        let compared = (vec![fact("route suffix", &[&app_2, &test_fr])])
            .drain(..)
            .collect::<HashSet<_>>();
        assert_eq!(res2, compared);

        let res = test_suffix(&w, "example.com");
        let res2 = res.iter().cloned().collect::<HashSet<_>>();
        let compared = (vec![
            fact("route suffix", &[&app_0, &example]),
            fact("route suffix", &[&app_0, &www_example]),
            fact("route suffix", &[&app_1, &mx_example]),
        ])
        .drain(..)
        .collect::<HashSet<_>>();
        assert_eq!(res2, compared);
    }

    #[test]
    fn date_constraint() {
        let mut w = World::new();

        let t1 = SystemTime::now();
        let t2 = t1 + Duration::from_secs(10);
        let t3 = t2 + Duration::from_secs(30);

        let abc = string("abc");
        let def = string("def");

        w.add_fact(&[0].iter().collect(), fact("x", &[&date(&t1), &abc]));
        w.add_fact(&[0].iter().collect(), fact("x", &[&date(&t3), &def]));

        let r1 = expressed_rule(
            "before",
            &[var("date"), var("val")],
            &[pred("x", &[var("date"), var("val")])],
            &[
                Expression {
                    ops: vec![
                        Op::Value(var("date")),
                        Op::Value(date(&t2)),
                        Op::Binary(Binary::LessOrEqual),
                    ],
                },
                Expression {
                    ops: vec![
                        Op::Value(var("date")),
                        Op::Value(date(&UNIX_EPOCH)),
                        Op::Binary(Binary::GreaterOrEqual),
                    ],
                },
            ],
        );

        println!("testing r1: {}", r1);
        let res = w.query_rule(r1, 0, &authority(), &limits());

        let res2 = res
            .iter_all()
            .map(|(_origin, fact)| fact)
            .cloned()
            .collect::<HashSet<_>>();
        let compared = (vec![fact("before", &[&date(&t1), &abc])])
            .drain(..)
            .collect::<HashSet<_>>();
        assert_eq!(res2, compared);

        let r2 = expressed_rule(
            "after",
            &[var("date"), var("val")],
            &[pred("x", &[var("date"), var("val")])],
            &[
                Expression {
                    ops: vec![
                        Op::Value(var("date")),
                        Op::Value(date(&t2)),
                        Op::Binary(Binary::GreaterOrEqual),
                    ],
                },
                Expression {
                    ops: vec![
                        Op::Value(var("date")),
                        Op::Value(date(&UNIX_EPOCH)),
                        Op::Binary(Binary::GreaterOrEqual),
                    ],
                },
            ],
        );

        println!("testing r2: {}", r2);
        let res = w.query_rule(r2, 0, &authority(), &limits());

        let res2 = res
            .iter_all()
            .map(|(_, fact)| fact)
            .cloned()
            .collect::<HashSet<_>>();
        let compared = (vec![fact("after", &[&date(&t3), &def])])
            .drain(..)
            .collect::<HashSet<_>>();
        assert_eq!(res2, compared);
    }

    #[test]
    fn set_constraint() {
        let mut w = World::new();

        let abc = string("abc");
        let def = string("def");
        let test = string("test");
        let hello = string("hello");
        let zzz = string("zzz");

        w.add_fact(&[0].iter().collect(), fact("x", &[&abc, &int(0), &test]));
        w.add_fact(&[0].iter().collect(), fact("x", &[&def, &int(2), &hello]));

        let res = w.query_rule(
            expressed_rule(
                "int_set",
                &[var("sym"), var("str")],
                &[pred("x", &[var("sym"), var("int"), var("str")])],
                &[Expression {
                    ops: vec![
                        Op::Value(Term::Set(
                            [Term::Integer(0), Term::Integer(1)].iter().cloned().collect(),
                        )),
                        Op::Value(var("int")),
                        Op::Binary(Binary::Contains),
                    ],
                }],
            ),
            0,
            &authority(),
            &limits(),
        );

        let res2 = res
            .iter_all()
            .map(|(_, fact)| fact)
            .cloned()
            .collect::<HashSet<_>>();
        let compared = (vec![fact("int_set", &[&abc, &test])])
            .drain(..)
            .collect::<HashSet<_>>();
        assert_eq!(res2, compared);

        let res = w.query_rule(
            expressed_rule(
                "symbol_set",
                &[var("sym"), var("int"), var("str")],
                &[pred("x", &[var("sym"), var("int"), var("str")])],
                &[Expression {
                    ops: vec![
                        Op::Value(Term::Set(
                            [abc.clone(), string("ghi")].iter().cloned().collect(),
                        )),
                        Op::Value(var("sym")),
                        Op::Binary(Binary::Contains),
                        Op::Unary(Unary::Negate),
                    ],
                }],
            ),
            0,
            &authority(),
            &limits(),
        );

        let res2 = res
            .iter_all()
            .map(|(_, fact)| fact)
            .cloned()
            .collect::<HashSet<_>>();
        let compared = (vec![fact("symbol_set", &[&def, &int(2), &hello])])
            .drain(..)
            .collect::<HashSet<_>>();
        assert_eq!(res2, compared);

        let res = w.query_rule(
            expressed_rule(
                "string_set",
                &[var("sym"), var("int"), var("str")],
                &[pred("x", &[var("sym"), var("int"), var("str")])],
                &[Expression {
                    ops: vec![
                        Op::Value(Term::Set([test.clone(), zzz].iter().cloned().collect())),
                        Op::Value(var("str")),
                        Op::Binary(Binary::Contains),
                    ],
                }],
            ),
            0,
            &authority(),
            &limits(),
        );

        let res2 = res
            .iter_all()
            .map(|(_, fact)| fact)
            .cloned()
            .collect::<HashSet<_>>();
        let compared = (vec![fact("string_set", &[&abc, &int(0), &test])])
            .drain(..)
            .collect::<HashSet<_>>();
        assert_eq!(res2, compared);
    }

    #[test]
    fn int_expr() {
        let mut w = World::new();

        let abc = string("abc");
        let def = string("def");

        w.add_fact(&[0].iter().collect(), fact("x", &[&int(-2), &abc]));
        w.add_fact(&[0].iter().collect(), fact("x", &[&int(0), &def]));

        let r1 = expressed_rule(
            "less_than",
            &[var("nb"), var("val")],
            &[pred("x", &[var("nb"), var("val")])],
            &[Expression {
                ops: vec![
                    Op::Value(Term::Integer(5)),
                    Op::Value(Term::Integer(-4)),
                    Op::Binary(Binary::Add),
                    Op::Value(Term::Integer(-1)),
                    Op::Binary(Binary::Mul),
                    Op::Value(var("nb")),
                    Op::Binary(Binary::LessThan),
                ],
            }],
        );

        println!("world:\n{}\n", w.print_world());
        println!("\ntesting r1: {}\n", r1);
        let res = w.query_rule(r1, 0, &authority(), &limits());

        let res2 = res
            .iter_all()
            .map(|(_, fact)| fact)
            .cloned()
            .collect::<HashSet<_>>();
        let compared = (vec![fact("less_than", &[&int(0), &def])])
            .drain(..)
            .collect::<HashSet<_>>();
        assert_eq!(res2, compared);
    }

    #[test]
    fn unbound_variables() {
        let mut w = World::new();

        let read = string("read");
        let write = string("write");
        let unbound = var("unbound");
        let any1 = var("any1");
        let any2 = var("any2");

        w.add_fact(&[0].iter().collect(), fact("operation", &[&write]));

        let r1 = rule(
            "operation",
            &[&unbound, &read],
            &[pred("operation", &[&any1, &any2])],
        );
        let res = w.query_rule(r1, 0, &authority(), &limits());

        assert!(res.len() == 0);

        // operation($unbound, "read") should not have been generated
        // in case it is generated though, verify that rule application
        // will not match it
        w.add_fact(&[0].iter().collect(), fact("operation", &[&unbound, &read]));
        let r2 = rule("check", &[&read], &[pred("operation", &[&read])]);
        let res = w.query_rule(r2, 0, &authority(), &limits());

        assert!(res.len() == 0);
    }

    #[test]
    fn derived_origins() {
        let mut w = World::new();

        // user(1) comes from the authority block, group(1, "admin") from
        // block 1; a rule of block 1 joining them marks every participant
        w.add_fact(&[0].iter().collect(), fact("user", &[&int(1)]));
        w.add_fact(
            &[1].iter().collect(),
            fact("group", &[&int(1), &string("admin")]),
        );

        let r = rule(
            "member",
            &[var("id"), var("group")],
            &[
                pred("user", &[var("id")]),
                pred("group", &[var("id"), var("group")]),
            ],
        );

        let res = w.query_rule(r, 1, &[0usize, 1].iter().collect(), &limits());

        let expected_origin: Origin = [0usize, 1].iter().collect();
        let facts: Vec<_> = res.iter_all().collect();
        assert_eq!(
            facts,
            vec![(
                &expected_origin,
                &fact("member", &[&int(1), &string("admin")])
            )]
        );
    }

    #[test]
    fn scoped_rule_application() {
        let mut w = World::new();

        w.add_fact(&[0].iter().collect(), fact("owner", &[&string("alice")]));
        w.add_fact(&[1].iter().collect(), fact("owner", &[&string("mallory")]));

        let r = rule("user", &[var("name")], &[pred("owner", &[var("name")])]);

        // a rule restricted to the authority block never sees block 1 facts
        let res = w.query_rule(r.clone(), 2, &[0usize, 2].iter().collect(), &limits());
        let facts: HashSet<_> = res.iter_all().map(|(_, f)| f.clone()).collect();
        assert_eq!(
            facts,
            [fact("user", &[&string("alice")])].iter().cloned().collect()
        );

        // widening the trusted set makes both visible
        let res = w.query_rule(r, 2, &[0usize, 1, 2].iter().collect(), &limits());
        let facts: HashSet<_> = res.iter_all().map(|(_, f)| f.clone()).collect();
        assert_eq!(
            facts,
            [
                fact("user", &[&string("alice")]),
                fact("user", &[&string("mallory")]),
            ]
            .iter()
            .cloned()
            .collect()
        );
    }

    #[test]
    fn fixpoint_limits() {
        // p($x, $y) <- n($x), n($y) squares the fact count
        let mut w = World::new();
        for i in 0..200 {
            w.add_fact(&[0].iter().collect(), fact("n", &[&int(i)]));
        }
        w.add_rule(
            0,
            &[0usize].iter().collect(),
            rule(
                "p",
                &[var("x"), var("y")],
                &[pred("n", &[var("x")]), pred("n", &[var("y")])],
            ),
        );

        let res = w.run(&RunLimits {
            max_facts: 10_000,
            max_time: Duration::from_secs(30),
            ..RunLimits::default()
        });
        assert_eq!(res, Err(error::RunLimit::TooManyFacts));

        // a chain that needs one round per step hits the iteration cap
        let mut w = World::new();
        w.add_fact(&[0].iter().collect(), fact("count", &[&int(0)]));
        for i in 0..100 {
            w.add_fact(&[0].iter().collect(), fact("succ", &[&int(i), &int(i + 1)]));
        }
        w.add_rule(
            0,
            &[0usize].iter().collect(),
            rule(
                "count",
                &[var("next")],
                &[
                    pred("count", &[var("x")]),
                    pred("succ", &[var("x"), var("next")]),
                ],
            ),
        );

        let res = w.run(&RunLimits {
            max_facts: 10_000,
            max_iterations: 10,
            max_time: Duration::from_secs(30),
            ..RunLimits::default()
        });
        assert_eq!(res, Err(error::RunLimit::TooManyIterations));
    }

    #[test]
    fn monotonic_run() {
        let mut w = World::new();
        w.add_fact(&[0].iter().collect(), fact("parent", &[&string("a"), &string("b")]));
        w.add_fact(&[0].iter().collect(), fact("parent", &[&string("b"), &string("c")]));
        w.add_rule(
            0,
            &[0usize].iter().collect(),
            rule(
                "ancestor",
                &[var("x"), var("y")],
                &[pred("parent", &[var("x"), var("y")])],
            ),
        );

        let before: HashSet<_> = w
            .facts
            .iter_all()
            .map(|(o, f)| (o.clone(), f.clone()))
            .collect();
        w.run(&limits()).unwrap();
        let after: HashSet<_> = w
            .facts
            .iter_all()
            .map(|(o, f)| (o.clone(), f.clone()))
            .collect();

        assert!(after.is_superset(&before));
        assert_eq!(after.len(), 4);
    }
}
