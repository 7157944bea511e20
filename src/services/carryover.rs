use std::collections::hash_map::Entry;
use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::models::todo::Todo;

#[derive(Debug, Clone)]
struct Mark {
    completed: bool,
    at: Option<DateTime<Utc>>,
    note: Option<String>,
}

/// Per-occurrence state of goal-derived todos: completion and note.
#[derive(Debug, Default, Clone)]
pub struct CarryOver {
    marks: HashMap<(Uuid, NaiveDate), Mark>,
}

impl CarryOver {
    /// When one occurrence appears more than once, a completed copy wins.
    pub fn capture(todos: &[Todo]) -> Self {
        let mut marks: HashMap<(Uuid, NaiveDate), Mark> = HashMap::new();
        for todo in todos {
            let Some(key) = todo.occurrence_key() else {
                continue;
            };
            let mark = Mark {
                completed: todo.is_completed,
                at: todo.actual_completion_time,
                note: todo.note.clone(),
            };
            match marks.entry(key) {
                Entry::Vacant(slot) => {
                    slot.insert(mark);
                }
                Entry::Occupied(mut slot) => {
                    if mark.completed && !slot.get().completed {
                        slot.insert(mark);
                    }
                }
            }
        }
        Self { marks }
    }

    pub fn len(&self) -> usize {
        self.marks.len()
    }

    /// Backfill state onto freshly expanded todos. Occurrences with no
    /// recorded state are left as they are.
    pub fn apply(&self, mut fresh: Vec<Todo>) -> Vec<Todo> {
        for todo in &mut fresh {
            let Some(key) = todo.occurrence_key() else {
                continue;
            };
            if let Some(mark) = self.marks.get(&key) {
                todo.is_completed = mark.completed;
                todo.actual_completion_time = mark.at;
                todo.note = mark.note.clone();
            }
        }
        fresh
    }
}

/// Manual todos from `current` followed by the regenerated derived ones.
pub fn merge_with_manual(current: &[Todo], derived: impl IntoIterator<Item = Todo>) -> Vec<Todo> {
    current
        .iter()
        .filter(|t| !t.is_from_goal)
        .cloned()
        .chain(derived)
        .collect()
}
