//! Word expansion: pathname globbing, parameter expansion and arithmetic

pub mod arith;
pub mod glob;
pub mod param;

pub use glob::{Pattern, expand as expand_pathname, expand_tilde, has_glob_chars, matching_paths};
pub use param::{Fields, ParamContext, Value};
