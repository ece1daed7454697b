//! Method-context tracking for process-flow entries.
//!
//! Enter/Leave pairs build a per-host call stack; each flow entry is
//! annotated with its depth, the enclosing frame's entry id, and the
//! method path from the stack bottom. An unbalanced Leave is tolerated
//! and simply carries no matching enter id.

use std::collections::HashMap;

use super::types::{Entry, EntryId, EntryKind};

/// One open method invocation
#[derive(Debug, Clone)]
pub struct CallFrame {
    pub enter_entry_id: EntryId,
    pub title: String,
    pub timestamp: i64,
}

#[derive(Debug, Default)]
pub struct MethodContextTracker {
    stacks: HashMap<String, Vec<CallFrame>>,
}

impl MethodContextTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn stack_key(entry: &Entry) -> String {
        if entry.host_name.is_empty() {
            "default".to_string()
        } else {
            entry.host_name.clone()
        }
    }

    /// Attach depth/parent/context annotations to a flow entry.
    ///
    /// Must run with the entry already carrying its final id; non-flow
    /// entries are left untouched.
    pub fn annotate(&mut self, entry: &mut Entry) {
        match entry.kind {
            EntryKind::EnterMethod => self.annotate_enter(entry),
            EntryKind::LeaveMethod => self.annotate_leave(entry),
            _ => {}
        }
    }

    fn annotate_enter(&mut self, entry: &mut Entry) {
        let stack = self.stacks.entry(Self::stack_key(entry)).or_default();
        stack.push(CallFrame {
            enter_entry_id: entry.id,
            title: entry.title.clone().unwrap_or_default(),
            timestamp: entry.timestamp,
        });
        entry.depth = Some(stack.len() as u32);
        entry.parent_id = stack
            .len()
            .checked_sub(2)
            .map(|below| stack[below].enter_entry_id);
        entry.context = Some(stack.iter().map(|frame| frame.title.clone()).collect());
    }

    fn annotate_leave(&mut self, entry: &mut Entry) {
        let stack = self.stacks.entry(Self::stack_key(entry)).or_default();
        let popped = stack.pop();
        entry.depth = Some(stack.len() as u32 + 1);
        entry.parent_id = stack.last().map(|frame| frame.enter_entry_id);
        entry.matching_enter_id = popped.map(|frame| frame.enter_entry_id);
        let mut context: Vec<String> = stack.iter().map(|frame| frame.title.clone()).collect();
        context.push(entry.title.clone().unwrap_or_default());
        entry.context = Some(context);
    }

    /// Current stack depth for one host key
    pub fn depth(&self, host: &str) -> usize {
        self.stacks.get(host).map_or(0, Vec::len)
    }

    /// Reset all stacks
    pub fn clear(&mut self) {
        self.stacks.clear();
    }
}
