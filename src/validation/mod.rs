pub mod operation_validator;
pub mod statement_classifier;

pub use operation_validator::*;
pub use statement_classifier::*;
