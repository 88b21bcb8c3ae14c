//! # Phenotype Definitions
//!
//! A derived phenotype is written as a postfix expression over cohort features, for
//! example `age bmi +` or `` `sbp` 140 [GT] ``. This module tokenizes and parses such
//! definitions into a [`Program`] and evaluates it per subject, either for a single
//! row of named values or over an entire [`FeatureTable`].

pub mod program;
pub mod table;
pub mod token;

pub use program::{
    BoundProgram, EvalError, FeatureRow, Node, PhenotypeValidation, Program, parse,
    validate_definition,
};
pub use table::{FeatureTable, apply_definition};
pub use token::{Operand, Operator, ParseError, Token, tokenize};
