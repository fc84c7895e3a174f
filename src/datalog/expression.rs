use crate::error;

use super::RunLimits;
use super::Term;
use regex::RegexBuilder;
use std::collections::HashMap;

/// a boolean constraint over the variables bound by a rule body
///
/// expressions are stored in stack (reverse polish) order, the order used
/// on the wire; [Expr] is the equivalent tree form
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Expression {
    pub ops: Vec<Op>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Op {
    Value(Term),
    Unary(Unary),
    Binary(Binary),
}

/// Unary operation code
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Unary {
    Negate,
    Parens,
    Length,
}

impl Unary {
    fn evaluate(&self, value: Term) -> Result<Term, error::Expression> {
        match (self, value) {
            (Unary::Negate, Term::Bool(b)) => Ok(Term::Bool(!b)),
            (Unary::Parens, i) => Ok(i),
            (Unary::Length, Term::Str(s)) => Ok(Term::Integer(s.len() as i64)),
            (Unary::Length, Term::Bytes(s)) => Ok(Term::Integer(s.len() as i64)),
            (Unary::Length, Term::Set(s)) => Ok(Term::Integer(s.len() as i64)),
            _ => Err(error::Expression::InvalidType),
        }
    }

    pub fn print(&self, value: String) -> String {
        match self {
            Unary::Negate => format!("!{}", value),
            Unary::Parens => format!("({})", value),
            Unary::Length => format!("{}.length()", value),
        }
    }
}

/// Binary operation code
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Binary {
    LessThan,
    GreaterThan,
    LessOrEqual,
    GreaterOrEqual,
    Equal,
    Contains,
    Prefix,
    Suffix,
    Regex,
    Add,
    Sub,
    Mul,
    Div,
    And,
    Or,
    Intersection,
    Union,
}

impl Binary {
    fn evaluate(
        &self,
        left: Term,
        right: Term,
        limits: &RunLimits,
    ) -> Result<Term, error::Expression> {
        match (self, left, right) {
            // integer
            (Binary::LessThan, Term::Integer(i), Term::Integer(j)) => Ok(Term::Bool(i < j)),
            (Binary::GreaterThan, Term::Integer(i), Term::Integer(j)) => Ok(Term::Bool(i > j)),
            (Binary::LessOrEqual, Term::Integer(i), Term::Integer(j)) => Ok(Term::Bool(i <= j)),
            (Binary::GreaterOrEqual, Term::Integer(i), Term::Integer(j)) => Ok(Term::Bool(i >= j)),
            (Binary::Equal, Term::Integer(i), Term::Integer(j)) => Ok(Term::Bool(i == j)),
            (Binary::Add, Term::Integer(i), Term::Integer(j)) => i
                .checked_add(j)
                .map(Term::Integer)
                .ok_or(error::Expression::Overflow),
            (Binary::Sub, Term::Integer(i), Term::Integer(j)) => i
                .checked_sub(j)
                .map(Term::Integer)
                .ok_or(error::Expression::Overflow),
            (Binary::Mul, Term::Integer(i), Term::Integer(j)) => i
                .checked_mul(j)
                .map(Term::Integer)
                .ok_or(error::Expression::Overflow),
            (Binary::Div, Term::Integer(i), Term::Integer(j)) => i
                .checked_div(j)
                .map(Term::Integer)
                .ok_or(error::Expression::DivideByZero),

            // string
            (Binary::Prefix, Term::Str(s), Term::Str(pref)) => {
                Ok(Term::Bool(s.starts_with(&pref)))
            }
            (Binary::Suffix, Term::Str(s), Term::Str(suff)) => Ok(Term::Bool(s.ends_with(&suff))),
            (Binary::Regex, Term::Str(s), Term::Str(r)) => Ok(Term::Bool(
                RegexBuilder::new(&r)
                    .size_limit(limits.max_regex_size)
                    .build()
                    .map(|re| re.is_match(&s))
                    .unwrap_or(false),
            )),
            (Binary::Contains, Term::Str(s), Term::Str(pattern)) => {
                Ok(Term::Bool(s.contains(&pattern)))
            }
            (Binary::Add, Term::Str(s1), Term::Str(s2)) => {
                Ok(Term::Str(format!("{}{}", s1, s2)))
            }
            (Binary::Equal, Term::Str(i), Term::Str(j)) => Ok(Term::Bool(i == j)),

            // date
            (Binary::LessThan, Term::Date(i), Term::Date(j)) => Ok(Term::Bool(i < j)),
            (Binary::GreaterThan, Term::Date(i), Term::Date(j)) => Ok(Term::Bool(i > j)),
            (Binary::LessOrEqual, Term::Date(i), Term::Date(j)) => Ok(Term::Bool(i <= j)),
            (Binary::GreaterOrEqual, Term::Date(i), Term::Date(j)) => Ok(Term::Bool(i >= j)),
            (Binary::Equal, Term::Date(i), Term::Date(j)) => Ok(Term::Bool(i == j)),

            // byte array
            (Binary::Equal, Term::Bytes(i), Term::Bytes(j)) => Ok(Term::Bool(i == j)),

            // set
            (Binary::Equal, Term::Set(set), Term::Set(s)) => Ok(Term::Bool(set == s)),
            (Binary::Intersection, Term::Set(set), Term::Set(s)) => {
                Ok(Term::Set(set.intersection(&s).cloned().collect()))
            }
            (Binary::Union, Term::Set(set), Term::Set(s)) => {
                Ok(Term::Set(set.union(&s).cloned().collect()))
            }
            (Binary::Contains, Term::Set(set), Term::Set(s)) => Ok(Term::Bool(set.is_superset(&s))),
            (Binary::Contains, Term::Set(set), Term::Integer(i)) => {
                Ok(Term::Bool(set.contains(&Term::Integer(i))))
            }
            (Binary::Contains, Term::Set(set), Term::Date(i)) => {
                Ok(Term::Bool(set.contains(&Term::Date(i))))
            }
            (Binary::Contains, Term::Set(set), Term::Bool(i)) => {
                Ok(Term::Bool(set.contains(&Term::Bool(i))))
            }
            (Binary::Contains, Term::Set(set), Term::Str(i)) => {
                Ok(Term::Bool(set.contains(&Term::Str(i))))
            }
            (Binary::Contains, Term::Set(set), Term::Bytes(i)) => {
                Ok(Term::Bool(set.contains(&Term::Bytes(i))))
            }

            // boolean
            // both operands are already evaluated: combining them is
            // strict, there is no short-circuit at this level
            (Binary::And, Term::Bool(i), Term::Bool(j)) => Ok(Term::Bool(i & j)),
            (Binary::Or, Term::Bool(i), Term::Bool(j)) => Ok(Term::Bool(i | j)),
            (Binary::Equal, Term::Bool(i), Term::Bool(j)) => Ok(Term::Bool(i == j)),

            _ => Err(error::Expression::InvalidType),
        }
    }

    pub fn print(&self, left: String, right: String) -> String {
        match self {
            Binary::LessThan => format!("{} < {}", left, right),
            Binary::GreaterThan => format!("{} > {}", left, right),
            Binary::LessOrEqual => format!("{} <= {}", left, right),
            Binary::GreaterOrEqual => format!("{} >= {}", left, right),
            Binary::Equal => format!("{} == {}", left, right),
            Binary::Contains => format!("{}.contains({})", left, right),
            Binary::Prefix => format!("{}.starts_with({})", left, right),
            Binary::Suffix => format!("{}.ends_with({})", left, right),
            Binary::Regex => format!("{}.matches({})", left, right),
            Binary::Add => format!("{} + {}", left, right),
            Binary::Sub => format!("{} - {}", left, right),
            Binary::Mul => format!("{} * {}", left, right),
            Binary::Div => format!("{} / {}", left, right),
            Binary::And => format!("{} && {}", left, right),
            Binary::Or => format!("{} || {}", left, right),
            Binary::Intersection => format!("{}.intersection({})", left, right),
            Binary::Union => format!("{}.union({})", left, right),
        }
    }
}

impl Expression {
    pub fn evaluate(
        &self,
        values: &HashMap<String, Term>,
        limits: &RunLimits,
    ) -> Result<Term, error::Expression> {
        let mut stack: Vec<Term> = Vec::new();

        for op in self.ops.iter() {
            match op {
                Op::Value(Term::Variable(name)) => match values.get(name) {
                    Some(term) => stack.push(term.clone()),
                    None => return Err(error::Expression::UnknownVariable(name.clone())),
                },
                Op::Value(term) => stack.push(term.clone()),
                Op::Unary(unary) => match stack.pop() {
                    Some(term) => stack.push(unary.evaluate(term)?),
                    None => return Err(error::Expression::InvalidStack),
                },
                Op::Binary(binary) => match (stack.pop(), stack.pop()) {
                    (Some(right_term), Some(left_term)) => {
                        stack.push(binary.evaluate(left_term, right_term, limits)?)
                    }
                    _ => return Err(error::Expression::InvalidStack),
                },
            }
        }

        if stack.len() == 1 {
            Ok(stack.remove(0))
        } else {
            Err(error::Expression::InvalidStack)
        }
    }

    pub fn print(&self) -> Option<String> {
        let mut stack: Vec<String> = Vec::new();

        for op in self.ops.iter() {
            match op {
                Op::Value(i) => stack.push(i.to_string()),
                Op::Unary(unary) => match stack.pop() {
                    None => return None,
                    Some(s) => stack.push(unary.print(s)),
                },
                Op::Binary(binary) => match (stack.pop(), stack.pop()) {
                    (Some(right), Some(left)) => stack.push(binary.print(left, right)),
                    _ => return None,
                },
            }
        }

        if stack.len() == 1 {
            Some(stack.remove(0))
        } else {
            None
        }
    }
}

impl std::fmt::Display for Expression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.print() {
            Some(s) => write!(f, "{}", s),
            None => write!(f, "<invalid expression: {:?}>", self.ops),
        }
    }
}

impl AsRef<Expression> for Expression {
    fn as_ref(&self) -> &Expression {
        self
    }
}

/// tree form of an expression, used when building or displaying them
///
/// [Expr::opcodes] and [Expr::from_ops] convert between this and the
/// stack form stored in [Expression], and are inverses of each other on
/// well formed expressions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Value(Term),
    Unary(Unary, Box<Expr>),
    Binary(Binary, Box<Expr>, Box<Expr>),
}

impl Expr {
    pub fn opcodes(self) -> Vec<Op> {
        let mut v = Vec::new();
        self.into_opcodes(&mut v);
        v
    }

    fn into_opcodes(self, v: &mut Vec<Op>) {
        match self {
            Expr::Value(t) => v.push(Op::Value(t)),
            Expr::Unary(op, expr) => {
                expr.into_opcodes(v);
                v.push(Op::Unary(op));
            }
            Expr::Binary(op, left, right) => {
                left.into_opcodes(v);
                right.into_opcodes(v);
                v.push(Op::Binary(op));
            }
        }
    }

    /// rebuilds the tree from a stack of operations
    ///
    /// returns `None` if the stack is unbalanced
    pub fn from_ops(ops: &[Op]) -> Option<Expr> {
        let mut stack: Vec<Expr> = Vec::new();

        for op in ops {
            match op {
                Op::Value(t) => stack.push(Expr::Value(t.clone())),
                Op::Unary(unary) => {
                    let e = stack.pop()?;
                    stack.push(Expr::Unary(unary.clone(), Box::new(e)));
                }
                Op::Binary(binary) => {
                    let right = stack.pop()?;
                    let left = stack.pop()?;
                    stack.push(Expr::Binary(binary.clone(), Box::new(left), Box::new(right)));
                }
            }
        }

        if stack.len() == 1 {
            stack.pop()
        } else {
            None
        }
    }
}

impl From<Expr> for Expression {
    fn from(e: Expr) -> Self {
        Expression { ops: e.opcodes() }
    }
}
