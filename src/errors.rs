use thiserror::Error;

use crate::value::Value;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProVisoError {
    #[error("syntax error at {line}:{column}: {message}")]
    Syntax {
        message: String,
        line: usize,
        column: usize,
        offset_start: usize,
        offset_end: usize,
    },

    #[error("unknown {kind}: {name}")]
    UnknownSymbol {
        kind: &'static str,
        name: String,
    },

    #[error("undefined identifier: {name}")]
    UndefinedIdentifier {
        name: String,
    },

    #[error("insufficient capacity in basket {basket}: requested {requested}, available {available}")]
    InsufficientCapacity {
        basket: String,
        requested: Value,
        available: Value,
    },

    #[error("basket {basket} condition not met: {condition}")]
    BasketConditionNotMet {
        basket: String,
        condition: String,
    },

    #[error("unsupported modification: {kind} field {field}")]
    UnsupportedModification {
        kind: &'static str,
        field: String,
    },

    #[error("amendment target not found: {kind} {name}")]
    MissingTarget {
        kind: &'static str,
        name: String,
    },

    #[error("invalid evaluation period: {period}")]
    InvalidPeriod {
        period: String,
    },

    #[error("invalid amount: {message}")]
    InvalidAmount {
        message: String,
    },

    #[error("financial data error: {message}")]
    FinancialData {
        message: String,
    },

    #[error("evaluation error: {message}")]
    Evaluation {
        message: String,
    },
}

pub type Result<T> = std::result::Result<T, ProVisoError>;
