// ========================================================================================
//                          Phenotype definition tokens
// ========================================================================================
//
// A phenotype definition is a whitespace-separated postfix token stream. Operands are
// feature references or literals, operators are fixed-arity numeric functions. Besides
// bare tokens the explicit forms written by `Program`'s `Display` are accepted:
// `` `feature name` ``, `[OPERATOR]` and `<literal>`.

use std::fmt;
use thiserror::Error;

/// The failure modes of turning a definition string into a program.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("The phenotype definition is empty.")]
    Empty,
    #[error("Token {position} ('{token}') is malformed.")]
    MalformedToken { token: String, position: usize },
    #[error("Token {position} names an unknown operator '{name}'.")]
    UnknownOperator { name: String, position: usize },
    #[error(
        "Operator {operator} at token {position} needs {required} operand(s), but only {available} are available."
    )]
    InsufficientOperands {
        operator: Operator,
        position: usize,
        required: usize,
        available: usize,
    },
    #[error(
        "The definition leaves {remaining} values on the stack; a complete definition reduces to exactly one."
    )]
    LeftoverOperands { remaining: usize },
}

/// Arithmetic, comparison and logical operators, plus the unary identity `ROOT`
/// that marks the top of a definition. Comparisons and logical operators produce
/// `1.0` for true and `0.0` for false; logical operators read any nonzero operand
/// as true.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Add,
    Sub,
    Mul,
    Div,
    Lt,
    Le,
    Eq,
    Ne,
    Ge,
    Gt,
    And,
    Or,
    Xor,
    Not,
    Root,
}

/// Raised by [`Operator::apply`] when an operation has no numeric result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OperatorFault {
    DivisionByZero,
    MissingOperand,
}

impl Operator {
    pub const ALL: [Operator; 15] = [
        Self::Add,
        Self::Sub,
        Self::Mul,
        Self::Div,
        Self::Lt,
        Self::Le,
        Self::Eq,
        Self::Ne,
        Self::Ge,
        Self::Gt,
        Self::And,
        Self::Or,
        Self::Xor,
        Self::Not,
        Self::Root,
    ];

    #[inline]
    pub fn arity(self) -> usize {
        match self {
            Self::Not | Self::Root => 1,
            _ => 2,
        }
    }

    /// The canonical upper-case name used in the explicit `[NAME]` form.
    pub fn name(self) -> &'static str {
        match self {
            Self::Add => "ADD",
            Self::Sub => "SUB",
            Self::Mul => "MUL",
            Self::Div => "DIV",
            Self::Lt => "LT",
            Self::Le => "LE",
            Self::Eq => "EQ",
            Self::Ne => "NE",
            Self::Ge => "GE",
            Self::Gt => "GT",
            Self::And => "AND",
            Self::Or => "OR",
            Self::Xor => "XOR",
            Self::Not => "NOT",
            Self::Root => "ROOT",
        }
    }

    /// Looks up an operator by its word form, ignoring case.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|op| op.name().eq_ignore_ascii_case(name))
    }

    /// Looks up an operator by one of its symbolic spellings.
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        let op = match symbol {
            "+" => Self::Add,
            "-" | "−" => Self::Sub,
            "*" | "×" => Self::Mul,
            "/" | "÷" => Self::Div,
            "<" => Self::Lt,
            "<=" | "≤" => Self::Le,
            "=" | "==" => Self::Eq,
            "!=" | "≠" => Self::Ne,
            ">=" | "≥" => Self::Ge,
            ">" => Self::Gt,
            "&&" => Self::And,
            "||" => Self::Or,
            "!" => Self::Not,
            _ => return None,
        };
        Some(op)
    }

    /// Pops this operator's operands off `stack` and pushes the result.
    #[inline]
    pub(crate) fn apply(self, stack: &mut Vec<f64>) -> Result<(), OperatorFault> {
        let truth = |b: bool| if b { 1.0 } else { 0.0 };
        let rhs = stack.pop().ok_or(OperatorFault::MissingOperand)?;
        match self {
            Self::Not => {
                stack.push(truth(rhs == 0.0));
                return Ok(());
            }
            Self::Root => {
                stack.push(rhs);
                return Ok(());
            }
            _ => {}
        }
        let lhs = stack.pop().ok_or(OperatorFault::MissingOperand)?;
        let value = match self {
            Self::Add => lhs + rhs,
            Self::Sub => lhs - rhs,
            Self::Mul => lhs * rhs,
            Self::Div => {
                if rhs == 0.0 {
                    return Err(OperatorFault::DivisionByZero);
                }
                lhs / rhs
            }
            Self::Lt => truth(lhs < rhs),
            Self::Le => truth(lhs <= rhs),
            Self::Eq => truth(lhs == rhs),
            Self::Ne => truth(lhs != rhs),
            Self::Ge => truth(lhs >= rhs),
            Self::Gt => truth(lhs > rhs),
            Self::And => truth(lhs != 0.0 && rhs != 0.0),
            Self::Or => truth(lhs != 0.0 || rhs != 0.0),
            Self::Xor => truth((lhs != 0.0) != (rhs != 0.0)),
            Self::Not | Self::Root => unreachable!("unary operators handled above"),
        };
        stack.push(value);
        Ok(())
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Feature(String),
    Literal(f64),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Operand(Operand),
    Operator(Operator),
}

/// Splits a definition into tokens. Structural checks (operand counts) are left to
/// the parser; this only rejects tokens that cannot be read at all.
pub fn tokenize(definition: &str) -> Result<Vec<Token>, ParseError> {
    let mut tokens = Vec::new();
    let mut rest = definition.trim_start();

    while !rest.is_empty() {
        let position = tokens.len();
        let (raw, remainder) = if let Some(quoted) = rest.strip_prefix('`') {
            // Backtick names may contain whitespace, so they end at the closing quote.
            let close = quoted.find('`').ok_or_else(|| ParseError::MalformedToken {
                token: rest.to_string(),
                position,
            })?;
            let after = &quoted[close + 1..];
            if after.chars().next().is_some_and(|c| !c.is_whitespace()) {
                let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
                return Err(ParseError::MalformedToken {
                    token: rest[..end].to_string(),
                    position,
                });
            }
            let name = &quoted[..close];
            if name.is_empty() {
                return Err(ParseError::MalformedToken {
                    token: "``".to_string(),
                    position,
                });
            }
            tokens.push(Token::Operand(Operand::Feature(name.to_string())));
            rest = after.trim_start();
            continue;
        } else {
            let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
            (&rest[..end], &rest[end..])
        };

        tokens.push(classify_word(raw, position)?);
        rest = remainder.trim_start();
    }

    Ok(tokens)
}

fn classify_word(word: &str, position: usize) -> Result<Token, ParseError> {
    let malformed = || ParseError::MalformedToken {
        token: word.to_string(),
        position,
    };

    if let Some(op) = Operator::from_symbol(word) {
        return Ok(Token::Operator(op));
    }
    if let Some(inner) = word.strip_prefix('[') {
        let name = inner.strip_suffix(']').ok_or_else(malformed)?;
        return Operator::from_name(name)
            .map(Token::Operator)
            .ok_or_else(|| ParseError::UnknownOperator {
                name: name.to_string(),
                position,
            });
    }
    if let Some(inner) = word.strip_prefix('<') {
        let literal = inner.strip_suffix('>').ok_or_else(malformed)?;
        return match literal.parse::<f64>() {
            Ok(value) if value.is_finite() => Ok(Token::Operand(Operand::Literal(value))),
            _ => Err(malformed()),
        };
    }
    if word.contains('`') || word.ends_with(']') || word.ends_with('>') {
        return Err(malformed());
    }
    if looks_numeric(word) {
        // Cohort feature codes such as `21001-0.0` start with a digit but are not
        // numbers, so an unparsable numeric-looking word is a feature reference.
        // Overflowing literals like `1e999` are rejected as in the `<lit>` form.
        match word.parse::<f64>() {
            Ok(value) if value.is_finite() => return Ok(Token::Operand(Operand::Literal(value))),
            Ok(_) => return Err(malformed()),
            Err(_) => {}
        }
    }
    if let Some(op) = Operator::from_name(word) {
        return Ok(Token::Operator(op));
    }
    Ok(Token::Operand(Operand::Feature(word.to_string())))
}

/// `f64::from_str` also accepts `inf` and `NaN`; only digit-led words count as literals.
fn looks_numeric(word: &str) -> bool {
    let mut chars = word.chars();
    match chars.next() {
        Some(c) if c.is_ascii_digit() || c == '.' => true,
        Some('+') | Some('-') => chars.next().is_some_and(|c| c.is_ascii_digit() || c == '.'),
        _ => false,
    }
}
