use super::token::{Operand, Operator, OperatorFault, ParseError, Token, tokenize};
use ahash::AHashMap;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use thiserror::Error;

/// Errors raised while evaluating a parsed program against feature values.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("The phenotype definition references feature '{0}', which is not available.")]
    UnknownFeature(String),
    #[error("Division by zero while evaluating the phenotype{}.", .row.map(|r| format!(" for subject row {r}")).unwrap_or_default())]
    DivisionByZero { row: Option<usize> },
    #[error("Internal error: operator {0} was evaluated without its operands.")]
    MissingOperand(Operator),
    #[error("Internal error: evaluation left no result on the stack.")]
    NoResult,
}

impl EvalError {
    fn from_fault(fault: OperatorFault, op: Operator, row: Option<usize>) -> Self {
        match fault {
            OperatorFault::DivisionByZero => Self::DivisionByZero { row },
            OperatorFault::MissingOperand => Self::MissingOperand(op),
        }
    }
}

pub type NodeId = usize;

/// One node of a parsed expression. Children always precede their parent in the
/// program's node arena.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Feature(String),
    Literal(f64),
    Unary { op: Operator, operand: NodeId },
    Binary { op: Operator, lhs: NodeId, rhs: NodeId },
}

/// A parsed phenotype definition.
///
/// Nodes are stored in postfix order with the root last, so a single forward pass
/// with a value stack evaluates the expression without recursion, whatever its depth.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    nodes: Vec<Node>,
    max_depth: usize,
}

/// Source of feature values for a single subject.
pub trait FeatureRow {
    fn feature_value(&self, name: &str) -> Option<f64>;
}

impl<S: std::hash::BuildHasher> FeatureRow for HashMap<String, f64, S> {
    fn feature_value(&self, name: &str) -> Option<f64> {
        self.get(name).copied()
    }
}

impl FeatureRow for AHashMap<String, f64> {
    fn feature_value(&self, name: &str) -> Option<f64> {
        self.get(name).copied()
    }
}

impl FeatureRow for [(&str, f64)] {
    fn feature_value(&self, name: &str) -> Option<f64> {
        self.iter().find(|(key, _)| *key == name).map(|(_, v)| *v)
    }
}

/// Parses a postfix phenotype definition.
pub fn parse(definition: &str) -> Result<Program, ParseError> {
    let tokens = tokenize(definition)?;
    if tokens.is_empty() {
        return Err(ParseError::Empty);
    }

    let mut nodes: Vec<Node> = Vec::with_capacity(tokens.len());
    // Operand stack of node ids; the parser never recurses.
    let mut stack: Vec<NodeId> = Vec::new();
    let mut max_depth = 0;

    for (position, token) in tokens.into_iter().enumerate() {
        let node = match token {
            Token::Operand(Operand::Feature(name)) => Node::Feature(name),
            Token::Operand(Operand::Literal(value)) => Node::Literal(value),
            Token::Operator(op) => {
                let required = op.arity();
                if stack.len() < required {
                    return Err(ParseError::InsufficientOperands {
                        operator: op,
                        position,
                        required,
                        available: stack.len(),
                    });
                }
                let operands = stack.split_off(stack.len() - required);
                match operands[..] {
                    [operand] => Node::Unary { op, operand },
                    [lhs, rhs] => Node::Binary { op, lhs, rhs },
                    _ => unreachable!("operators are unary or binary"),
                }
            }
        };
        stack.push(nodes.len());
        nodes.push(node);
        max_depth = max_depth.max(stack.len());
    }

    if stack.len() != 1 {
        return Err(ParseError::LeftoverOperands {
            remaining: stack.len(),
        });
    }

    Ok(Program { nodes, max_depth })
}

impl Program {
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn root(&self) -> NodeId {
        self.nodes.len() - 1
    }

    /// Deepest operand stack reached while evaluating this program.
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// The distinct features referenced by the definition, sorted by name.
    pub fn features(&self) -> Vec<&str> {
        let names: BTreeSet<&str> = self
            .nodes
            .iter()
            .filter_map(|node| match node {
                Node::Feature(name) => Some(name.as_str()),
                _ => None,
            })
            .collect();
        names.into_iter().collect()
    }

    /// The feature name when the whole definition is a single feature reference,
    /// possibly wrapped in `[ROOT]` identities.
    pub fn as_single_feature(&self) -> Option<&str> {
        let (Node::Feature(name), rest) = self.nodes.split_first()? else {
            return None;
        };
        rest.iter()
            .all(|node| matches!(node, Node::Unary { op: Operator::Root, .. }))
            .then_some(name.as_str())
    }

    /// Evaluates the program for one subject.
    pub fn evaluate<R: FeatureRow + ?Sized>(&self, row: &R) -> Result<f64, EvalError> {
        let mut stack = Vec::with_capacity(self.max_depth);
        for node in &self.nodes {
            match node {
                Node::Feature(name) => {
                    let value = row
                        .feature_value(name)
                        .ok_or_else(|| EvalError::UnknownFeature(name.clone()))?;
                    stack.push(value);
                }
                Node::Literal(value) => stack.push(*value),
                Node::Unary { op, .. } | Node::Binary { op, .. } => op
                    .apply(&mut stack)
                    .map_err(|fault| EvalError::from_fault(fault, *op, None))?,
            }
        }
        stack.pop().ok_or(EvalError::NoResult)
    }

    /// Resolves every feature reference against `columns` once, so the returned
    /// program can evaluate table rows by position.
    pub fn bind<S: AsRef<str>>(&self, columns: &[S]) -> Result<BoundProgram, EvalError> {
        let lookup: AHashMap<&str, usize> = columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.as_ref(), i))
            .collect();
        let steps = self
            .nodes
            .iter()
            .map(|node| match node {
                Node::Feature(name) => lookup
                    .get(name.as_str())
                    .map(|&column| Step::Column(column))
                    .ok_or_else(|| EvalError::UnknownFeature(name.clone())),
                Node::Literal(value) => Ok(Step::Literal(*value)),
                Node::Unary { op, .. } | Node::Binary { op, .. } => Ok(Step::Apply(*op)),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(BoundProgram {
            steps,
            max_depth: self.max_depth,
        })
    }

    fn fmt_node(&self, id: NodeId, out: &mut Vec<String>) {
        // Children precede parents, so the postfix rendering is the arena order
        // restricted to the subtree; walk it iteratively.
        let mut pending = vec![(id, false)];
        while let Some((node_id, expanded)) = pending.pop() {
            match (&self.nodes[node_id], expanded) {
                (Node::Feature(name), _) => out.push(format!("`{name}`")),
                (Node::Literal(value), _) => out.push(format!("<{value}>")),
                (Node::Unary { op, .. } | Node::Binary { op, .. }, true) => {
                    out.push(format!("[{op}]"))
                }
                (Node::Unary { operand, .. }, false) => {
                    pending.push((node_id, true));
                    pending.push((*operand, false));
                }
                (Node::Binary { lhs, rhs, .. }, false) => {
                    pending.push((node_id, true));
                    pending.push((*rhs, false));
                    pending.push((*lhs, false));
                }
            }
        }
    }
}

/// Renders the canonical explicit form, e.g. `` `age` `bmi` [ADD] ``.
impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::with_capacity(self.nodes.len());
        self.fmt_node(self.root(), &mut parts);
        f.write_str(&parts.join(" "))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Step {
    Column(usize),
    Literal(f64),
    Apply(Operator),
}

/// A program whose feature references have been resolved to table column indices.
#[derive(Debug, Clone)]
pub struct BoundProgram {
    steps: Vec<Step>,
    max_depth: usize,
}

impl BoundProgram {
    /// Evaluates one table row. `scratch` is reused between rows to avoid allocating.
    #[inline]
    pub fn evaluate_row(
        &self,
        row: &[f64],
        row_index: usize,
        scratch: &mut Vec<f64>,
    ) -> Result<f64, EvalError> {
        scratch.clear();
        for step in &self.steps {
            match *step {
                Step::Column(column) => scratch.push(row[column]),
                Step::Literal(value) => scratch.push(value),
                Step::Apply(op) => op
                    .apply(scratch)
                    .map_err(|fault| EvalError::from_fault(fault, op, Some(row_index)))?,
            }
        }
        scratch.pop().ok_or(EvalError::NoResult)
    }

    pub fn scratch(&self) -> Vec<f64> {
        Vec::with_capacity(self.max_depth)
    }
}

/// Outcome of checking a definition against the features a cohort offers.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct PhenotypeValidation {
    pub is_valid: bool,
    pub message: String,
    pub phenotype_definition: String,
}

/// Parses `definition` and checks that every referenced feature is in `known_features`.
pub fn validate_definition<S: AsRef<str>>(
    definition: &str,
    known_features: &[S],
) -> PhenotypeValidation {
    let result = parse(definition).map_err(|e| e.to_string()).and_then(|program| {
        let missing: Vec<String> = program
            .features()
            .into_iter()
            .filter(|name| !known_features.iter().any(|k| k.as_ref() == *name))
            .map(str::to_string)
            .collect();
        if missing.is_empty() {
            Ok(program)
        } else {
            Err(format!("Unknown feature(s): {}", missing.join(", ")))
        }
    });

    match result {
        Ok(program) => PhenotypeValidation {
            is_valid: true,
            message: "Valid phenotype definition".to_string(),
            phenotype_definition: program.to_string(),
        },
        Err(message) => PhenotypeValidation {
            is_valid: false,
            message,
            phenotype_definition: definition.to_string(),
        },
    }
}
