pub mod rule;

pub use rule::{Extract, FieldRule, NodeMode, RuleParser, RuleSet};
