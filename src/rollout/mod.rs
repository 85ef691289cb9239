pub mod env;
pub mod evaluator;
pub mod wrappers;
