//! Cloneable filter chain: raw lines in, at most one record out, delivered
//! to the shared [`OutputManager`].
//!
//! Filters form a singly linked list; each node transforms the record in
//! place and forwards to its successor. The chain is cloned once per child
//! tailer so per-line state is never shared between concurrent tailers —
//! cloning deep-copies every node and rewires the next pointers.

use crate::manager::OutputManager;
use sml_core::types::keys;
use sml_core::{InputDescriptor, InputMarker, Record};
use regex::Regex;
use serde_json::Value;
use std::sync::Arc;

/// Outcome of one filter stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Keep,
    Drop,
}

/// One stage in the chain.
pub trait Filter: Send {
    /// Deep-copy this node and everything after it.
    fn box_clone(&self) -> Box<dyn Filter>;

    fn set_next(&mut self, next: Box<dyn Filter>);
    fn next_filter(&self) -> Option<&dyn Filter>;
    fn next_filter_mut(&mut self) -> Option<&mut dyn Filter>;

    /// Transform `record` from `raw`, then forward to the next stage.
    fn apply(
        &mut self,
        raw: &str,
        record: &mut Record,
        marker: &InputMarker,
    ) -> anyhow::Result<Verdict>;
}

/// Forward helper for implementations: run the rest of the chain, or keep
/// the record when this is the terminal stage.
pub fn forward(
    next: &mut Option<Box<dyn Filter>>,
    raw: &str,
    record: &mut Record,
    marker: &InputMarker,
) -> anyhow::Result<Verdict> {
    match next {
        Some(filter) => filter.apply(raw, record, marker),
        None => Ok(Verdict::Keep),
    }
}

// ---------------------------------------------------------------------------
// FilterChain
// ---------------------------------------------------------------------------

/// An ordered pipeline owned by one tailer, ending at the shared manager.
pub struct FilterChain {
    head: Option<Box<dyn Filter>>,
    input: Option<Arc<InputDescriptor>>,
    output: Arc<OutputManager>,
}

impl FilterChain {
    pub fn new(output: Arc<OutputManager>) -> FilterChain {
        FilterChain {
            head: None,
            input: None,
            output,
        }
    }

    /// Append a stage at the tail.
    pub fn with(mut self, filter: Box<dyn Filter>) -> FilterChain {
        self.push(filter);
        self
    }

    pub fn push(&mut self, filter: Box<dyn Filter>) {
        match &mut self.head {
            None => self.head = Some(filter),
            Some(head) => push_tail(head.as_mut(), filter),
        }
    }

    /// Independent copy with the same behaviour; per-child state is not
    /// shared with the original.
    pub fn clone_chain(&self) -> FilterChain {
        FilterChain {
            head: self.head.as_ref().map(|head| head.box_clone()),
            input: self.input.clone(),
            output: Arc::clone(&self.output),
        }
    }

    /// Associate the chain with the child input it serves.
    pub fn set_input(&mut self, input: Arc<InputDescriptor>) {
        self.input = Some(input);
    }

    pub fn input(&self) -> Option<&Arc<InputDescriptor>> {
        self.input.as_ref()
    }

    pub fn output(&self) -> &Arc<OutputManager> {
        &self.output
    }

    /// Run `raw` through every stage; a surviving record goes to the
    /// output manager.
    pub fn process(&mut self, raw: &str, marker: &InputMarker) -> anyhow::Result<()> {
        let mut record = Record::new();
        let verdict = match &mut self.head {
            Some(head) => head.apply(raw, &mut record, marker)?,
            None => Verdict::Keep,
        };
        if verdict == Verdict::Keep {
            self.output.write_record(record, marker);
        }
        Ok(())
    }
}

fn push_tail(node: &mut dyn Filter, filter: Box<dyn Filter>) {
    if node.next_filter().is_some() {
        push_tail(node.next_filter_mut().expect("next exists"), filter);
    } else {
        node.set_next(filter);
    }
}

// ---------------------------------------------------------------------------
// JsonFilter
// ---------------------------------------------------------------------------

/// Merges the fields of JSON-object lines into the record. Lines that do
/// not parse fall through untouched.
pub struct JsonFilter {
    next: Option<Box<dyn Filter>>,
}

impl JsonFilter {
    pub fn new() -> Box<JsonFilter> {
        Box::new(JsonFilter { next: None })
    }
}

impl Filter for JsonFilter {
    fn box_clone(&self) -> Box<dyn Filter> {
        Box::new(JsonFilter {
            next: self.next.as_ref().map(|f| f.box_clone()),
        })
    }

    fn set_next(&mut self, next: Box<dyn Filter>) {
        self.next = Some(next);
    }

    fn next_filter(&self) -> Option<&dyn Filter> {
        self.next.as_deref()
    }

    fn next_filter_mut(&mut self) -> Option<&mut dyn Filter> {
        match &mut self.next {
            Some(f) => Some(f.as_mut()),
            None => None,
        }
    }

    fn apply(
        &mut self,
        raw: &str,
        record: &mut Record,
        marker: &InputMarker,
    ) -> anyhow::Result<Verdict> {
        if raw.trim_start().starts_with('{') {
            if let Ok(Value::Object(fields)) = serde_json::from_str::<Value>(raw) {
                for (key, value) in fields {
                    record.insert(key, value);
                }
            }
        }
        forward(&mut self.next, raw, record, marker)
    }
}

// ---------------------------------------------------------------------------
// MessageFilter
// ---------------------------------------------------------------------------

/// Terminal stage: guarantees `log_message` and `logtime`, drops blank
/// lines, and extracts a level token from the raw line when the record has
/// none yet.
pub struct MessageFilter {
    next: Option<Box<dyn Filter>>,
    level_token: Regex,
}

impl MessageFilter {
    pub fn new() -> Box<MessageFilter> {
        Box::new(MessageFilter {
            next: None,
            level_token: Regex::new(r"\b(TRACE|DEBUG|INFO|WARN|WARNING|ERROR|FATAL)\b")
                .expect("level token pattern is valid"),
        })
    }
}

impl Filter for MessageFilter {
    fn box_clone(&self) -> Box<dyn Filter> {
        Box::new(MessageFilter {
            next: self.next.as_ref().map(|f| f.box_clone()),
            level_token: self.level_token.clone(),
        })
    }

    fn set_next(&mut self, next: Box<dyn Filter>) {
        self.next = Some(next);
    }

    fn next_filter(&self) -> Option<&dyn Filter> {
        self.next.as_deref()
    }

    fn next_filter_mut(&mut self) -> Option<&mut dyn Filter> {
        match &mut self.next {
            Some(f) => Some(f.as_mut()),
            None => None,
        }
    }

    fn apply(
        &mut self,
        raw: &str,
        record: &mut Record,
        marker: &InputMarker,
    ) -> anyhow::Result<Verdict> {
        if raw.trim().is_empty() && record.is_empty() {
            return Ok(Verdict::Drop);
        }

        record.set_if_absent(keys::LOG_MESSAGE, raw);
        record.set_if_absent(keys::LOGTIME, chrono::Utc::now().timestamp_millis());

        if !record.contains(keys::LEVEL) {
            let upper = raw.to_ascii_uppercase();
            if let Some(found) = self.level_token.find(&upper) {
                let level = match found.as_str() {
                    "WARNING" => "WARN",
                    token => token,
                };
                record.insert(keys::LEVEL, level);
            }
        }

        forward(&mut self.next, raw, record, marker)
    }
}
