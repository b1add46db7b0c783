pub mod ast;
pub mod errors;
pub mod events;
pub mod interpreter;
pub mod lexer;
pub mod parser;
pub mod prose;
pub mod registry;
pub mod token;
pub mod value;

// re-export key types
pub use ast::{Expression, Program, Statement, StatementNode};
pub use errors::{ProVisoError, Result};
pub use events::{DealEvent, EventStore};
pub use interpreter::{
    finance::FinancialSnapshot, Adjustment, DealStatus, Interpreter, SimulationResult,
};
pub use parser::parse;
pub use prose::{
    generate_document, generate_document_from, generate_redline, Document, DocumentMetadata,
    Redline,
};
pub use registry::DealRegistry;
pub use value::Value;

// re-export external dependencies that users will need
pub use chrono;
pub use hourglass_rs::{SafeTimeProvider, TimeSource};
pub use rust_decimal::Decimal;
pub use uuid::Uuid;
