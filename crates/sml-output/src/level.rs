//! Log-level filtering policy — a predicate consulted by the output manager
//! before dispatch.

use sml_core::InputDescriptor;

/// Decides whether a record (by level) or an unparsed text block from a
/// given input should reach the sinks.
pub trait LevelPolicy: Send + Sync {
    fn accept(&self, input: &InputDescriptor, level: &str) -> bool;
    fn accept_text(&self, input: &InputDescriptor, text: &str) -> bool;
}

/// Default policy: an input with a non-empty `default_log_levels` sequence
/// accepts only those levels; an empty sequence accepts everything. For
/// unparsed text, any allowed token occurring in the block passes it.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConfiguredLevels;

impl LevelPolicy for ConfiguredLevels {
    fn accept(&self, input: &InputDescriptor, level: &str) -> bool {
        if input.default_log_levels.is_empty() {
            return true;
        }
        input
            .default_log_levels
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(level))
    }

    fn accept_text(&self, input: &InputDescriptor, text: &str) -> bool {
        if input.default_log_levels.is_empty() {
            return true;
        }
        let upper = text.to_ascii_uppercase();
        input
            .default_log_levels
            .iter()
            .any(|allowed| upper.contains(&allowed.to_ascii_uppercase()))
    }
}
