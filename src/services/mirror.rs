//! Translation between planner records and remote documents, plus the
//! write patterns used to mirror local mutations.

use std::collections::HashMap;

use chrono::{NaiveDate, Utc};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::models::completed_task::CompletedTask;
use crate::models::diary::DiaryEntry;
use crate::models::goal::Goal;
use crate::models::todo::Todo;
use crate::store::remote::{
    Collection, Document, Filter, OrderBy, RemoteError, RemoteStore, WriteOp,
};

pub trait Mirrored: Serialize + DeserializeOwned + Send + Sync {
    const COLLECTION: Collection;
    /// Optional fields an update must clear explicitly when they are unset locally.
    const CLEARABLE: &'static [&'static str] = &[];

    fn id(&self) -> Uuid;

    /// Ordering requested when pulling the whole collection.
    fn order_by() -> Vec<OrderBy> {
        Vec::new()
    }
}

impl Mirrored for Goal {
    const COLLECTION: Collection = Collection::Goals;
    const CLEARABLE: &'static [&'static str] = &[
        "description",
        "weeklyDays",
        "monthlyType",
        "specificDate",
        "specificWeek",
        "specificWeekDay",
        "startDate",
        "endDate",
    ];

    fn id(&self) -> Uuid {
        self.id
    }

    fn order_by() -> Vec<OrderBy> {
        vec![OrderBy::desc("createdAt")]
    }
}

impl Mirrored for Todo {
    const COLLECTION: Collection = Collection::Todos;
    const CLEARABLE: &'static [&'static str] = &["goalId", "actualCompletionTime", "note"];

    fn id(&self) -> Uuid {
        self.id
    }

    fn order_by() -> Vec<OrderBy> {
        vec![OrderBy::asc("scheduledDate"), OrderBy::asc("scheduledTime")]
    }
}

impl Mirrored for DiaryEntry {
    const COLLECTION: Collection = Collection::DiaryEntries;

    fn id(&self) -> Uuid {
        self.id
    }
}

impl Mirrored for CompletedTask {
    const COLLECTION: Collection = Collection::CompletedTasks;

    fn id(&self) -> Uuid {
        self.id
    }

    fn order_by() -> Vec<OrderBy> {
        vec![OrderBy::desc("completedDate")]
    }
}

fn body<T: Mirrored>(record: &T, user_id: Uuid) -> Result<Document, RemoteError> {
    let Value::Object(mut doc) = serde_json::to_value(record)? else {
        return Err(RemoteError::Decode("record did not serialize to an object".into()));
    };
    doc.remove("id");
    doc.retain(|_, v| !v.is_null());
    doc.insert("userId".into(), json!(user_id));
    doc.insert("updatedAt".into(), json!(Utc::now()));
    Ok(doc)
}

/// Full document for a create or a batch set. Unset fields are omitted.
pub fn to_document<T: Mirrored>(record: &T, user_id: Uuid) -> Result<Document, RemoteError> {
    let mut doc = body(record, user_id)?;
    if !doc.contains_key("createdAt") {
        doc.insert("createdAt".into(), json!(Utc::now()));
    }
    Ok(doc)
}

/// Partial document for an update. Unset optional fields are sent as explicit
/// nulls so stale remote values get cleared.
pub fn to_update_fields<T: Mirrored>(record: &T, user_id: Uuid) -> Result<Document, RemoteError> {
    let mut doc = body(record, user_id)?;
    for field in T::CLEARABLE {
        doc.entry(field.to_string()).or_insert(Value::Null);
    }
    Ok(doc)
}

/// Decode a remote document, tolerating the bookkeeping fields it carries.
pub fn from_document<T: Mirrored>(id: &str, mut data: Document) -> Result<T, RemoteError> {
    data.insert("id".into(), json!(id));
    Ok(serde_json::from_value(Value::Object(data))?)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Existing,
    Created,
}

/// Make sure `collection/id` exists, creating it from `fallback` when it does not.
pub async fn ensure_exists(
    remote: &dyn RemoteStore,
    collection: Collection,
    id: &str,
    fallback: Document,
) -> Result<Presence, RemoteError> {
    if remote.get(collection, id).await?.is_some() {
        return Ok(Presence::Existing);
    }
    tracing::debug!(collection = collection.as_str(), id, "Remote document missing; creating it");
    remote.create(collection, fallback, Some(id)).await?;
    Ok(Presence::Created)
}

/// Update the remote copy of `record`, creating it if it was never mirrored.
pub async fn upsert<T: Mirrored>(
    remote: &dyn RemoteStore,
    record: &T,
    user_id: Uuid,
) -> Result<Presence, RemoteError> {
    let id = record.id().to_string();
    let presence = ensure_exists(remote, T::COLLECTION, &id, to_document(record, user_id)?).await?;
    if presence == Presence::Existing {
        remote
            .update(T::COLLECTION, &id, to_update_fields(record, user_id)?)
            .await?;
    }
    Ok(presence)
}

/// Delete `collection/id`. A document that is already gone is not an error.
pub async fn delete_if_exists(
    remote: &dyn RemoteStore,
    collection: Collection,
    id: &str,
) -> Result<bool, RemoteError> {
    if remote.get(collection, id).await?.is_none() {
        tracing::debug!(collection = collection.as_str(), id, "Remote document already absent");
        return Ok(false);
    }
    remote.delete(collection, id).await?;
    Ok(true)
}

/// Run `ops` as consecutive batches of at most `limit` operations.
pub async fn write_in_batches(
    remote: &dyn RemoteStore,
    ops: Vec<WriteOp>,
    limit: usize,
) -> Result<usize, RemoteError> {
    let limit = limit.max(1);
    let mut batches = 0;
    let mut ops = ops.into_iter().peekable();
    while ops.peek().is_some() {
        let batch: Vec<WriteOp> = ops.by_ref().take(limit).collect();
        remote.batch_write(batch).await?;
        batches += 1;
    }
    Ok(batches)
}

/// A remote write implied by a local mutation.
#[derive(Debug, Clone)]
pub enum MirrorOp {
    CreateGoal(Goal),
    UpdateGoal(Goal),
    DeleteGoal(Uuid),
    CreateTodo(Todo),
    UpdateTodo(Todo),
    DeleteTodo(Uuid),
    SaveDiary(DiaryEntry),
    UpdateDiary(DiaryEntry),
    DeleteDiary(Uuid),
    CreateCompletedTask(CompletedTask),
    DeleteCompletedTask(Uuid),
}

impl MirrorOp {
    pub fn name(&self) -> &'static str {
        match self {
            MirrorOp::CreateGoal(_) => "create_goal",
            MirrorOp::UpdateGoal(_) => "update_goal",
            MirrorOp::DeleteGoal(_) => "delete_goal",
            MirrorOp::CreateTodo(_) => "create_todo",
            MirrorOp::UpdateTodo(_) => "update_todo",
            MirrorOp::DeleteTodo(_) => "delete_todo",
            MirrorOp::SaveDiary(_) => "save_diary",
            MirrorOp::UpdateDiary(_) => "update_diary",
            MirrorOp::DeleteDiary(_) => "delete_diary",
            MirrorOp::CreateCompletedTask(_) => "create_completed_task",
            MirrorOp::DeleteCompletedTask(_) => "delete_completed_task",
        }
    }
}

/// Applies mirror operations for one account.
pub struct Mirror<'a> {
    pub remote: &'a dyn RemoteStore,
    pub user_id: Uuid,
    pub batch_limit: usize,
}

impl<'a> Mirror<'a> {
    pub async fn apply(&self, op: &MirrorOp) -> Result<(), RemoteError> {
        match op {
            MirrorOp::CreateGoal(goal) => self.create(goal).await,
            MirrorOp::UpdateGoal(goal) => self.upsert(goal).await,
            MirrorOp::DeleteGoal(id) => self.delete_goal(*id).await,
            MirrorOp::CreateTodo(todo) => self.create(todo).await,
            MirrorOp::UpdateTodo(todo) => self.update_todo(todo).await,
            MirrorOp::DeleteTodo(id) => self.delete(Collection::Todos, *id).await,
            MirrorOp::SaveDiary(entry) => self.save_diary(entry).await,
            MirrorOp::UpdateDiary(entry) => self.upsert(entry).await,
            MirrorOp::DeleteDiary(id) => self.delete(Collection::DiaryEntries, *id).await,
            MirrorOp::CreateCompletedTask(task) => self.create(task).await,
            MirrorOp::DeleteCompletedTask(id) => self.delete(Collection::CompletedTasks, *id).await,
        }
    }

    async fn create<T: Mirrored>(&self, record: &T) -> Result<(), RemoteError> {
        let id = record.id().to_string();
        self.remote
            .create(T::COLLECTION, to_document(record, self.user_id)?, Some(&id))
            .await?;
        Ok(())
    }

    async fn upsert<T: Mirrored>(&self, record: &T) -> Result<(), RemoteError> {
        upsert(self.remote, record, self.user_id).await.map(|_| ())
    }

    async fn delete(&self, collection: Collection, id: Uuid) -> Result<(), RemoteError> {
        delete_if_exists(self.remote, collection, &id.to_string())
            .await
            .map(|_| ())
    }

    fn owned_by(&self) -> Filter {
        Filter::eq("userId", json!(self.user_id))
    }

    /// A derived todo owns its occurrence. Copies left under older ids by
    /// earlier regenerations are deleted before the write.
    async fn update_todo(&self, todo: &Todo) -> Result<(), RemoteError> {
        if let Some((goal_id, date)) = todo.occurrence_key() {
            let filters = [
                self.owned_by(),
                Filter::eq("goalId", json!(goal_id)),
                Filter::eq("scheduledDate", json!(date)),
            ];
            let own_id = todo.id.to_string();
            let stale: Vec<WriteOp> = self
                .remote
                .query(Collection::Todos, &filters, &[])
                .await?
                .into_iter()
                .filter(|s| s.id != own_id)
                .map(|s| WriteOp::Delete {
                    collection: Collection::Todos,
                    id: s.id,
                })
                .collect();
            if !stale.is_empty() {
                tracing::debug!(goal_id = %goal_id, %date, stale = stale.len(), "Replacing stale remote copies of occurrence");
                write_in_batches(self.remote, stale, self.batch_limit).await?;
            }
        }
        self.upsert(todo).await
    }

    /// Remove a goal with every todo and completion record derived from it.
    async fn delete_goal(&self, goal_id: Uuid) -> Result<(), RemoteError> {
        self.delete(Collection::Goals, goal_id).await?;

        let filters = [self.owned_by(), Filter::eq("goalId", json!(goal_id))];
        let (todos, tasks) = tokio::try_join!(
            self.remote.query(Collection::Todos, &filters, &[]),
            self.remote.query(Collection::CompletedTasks, &filters, &[]),
        )?;

        let ops: Vec<WriteOp> = todos
            .into_iter()
            .map(|s| WriteOp::Delete {
                collection: Collection::Todos,
                id: s.id,
            })
            .chain(tasks.into_iter().map(|s| WriteOp::Delete {
                collection: Collection::CompletedTasks,
                id: s.id,
            }))
            .collect();
        let removed = ops.len();
        write_in_batches(self.remote, ops, self.batch_limit).await?;
        tracing::debug!(goal_id = %goal_id, removed, "Remote goal cascade deleted");
        Ok(())
    }

    /// One diary document per date: an existing document for the date is
    /// updated in place, whatever its id.
    async fn save_diary(&self, entry: &DiaryEntry) -> Result<(), RemoteError> {
        let filters = [self.owned_by(), Filter::eq("date", json!(entry.date))];
        let existing = self
            .remote
            .query(Collection::DiaryEntries, &filters, &[])
            .await?;

        match existing.first() {
            Some(found) => {
                let mut fields = Document::new();
                fields.insert("content".into(), json!(entry.content));
                fields.insert("updatedAt".into(), json!(Utc::now()));
                self.remote
                    .update(Collection::DiaryEntries, &found.id, fields)
                    .await
            }
            None => self.create(entry).await,
        }
    }

    /// Overwrite the remote copy with every local record.
    pub async fn push_all(
        &self,
        goals: &[Goal],
        todos: &[Todo],
        diary_entries: &[DiaryEntry],
        completed_tasks: &[CompletedTask],
    ) -> Result<usize, RemoteError> {
        let mut ops = Vec::with_capacity(
            goals.len() + todos.len() + diary_entries.len() + completed_tasks.len(),
        );
        self.set_ops(goals, &mut ops)?;
        self.set_ops(todos, &mut ops)?;
        self.set_ops(diary_entries, &mut ops)?;
        self.set_ops(completed_tasks, &mut ops)?;
        let written = ops.len();
        write_in_batches(self.remote, ops, self.batch_limit).await?;
        Ok(written)
    }

    fn set_ops<T: Mirrored>(&self, records: &[T], ops: &mut Vec<WriteOp>) -> Result<(), RemoteError> {
        for record in records {
            ops.push(WriteOp::Set {
                collection: T::COLLECTION,
                id: record.id().to_string(),
                doc: to_document(record, self.user_id)?,
            });
        }
        Ok(())
    }

    /// Fetch all four collections concurrently.
    pub async fn pull_all(&self) -> Result<RemoteSnapshot, RemoteError> {
        let (goals, todos, diary_entries, completed_tasks) = tokio::try_join!(
            self.pull::<Goal>(),
            self.pull::<Todo>(),
            self.pull::<DiaryEntry>(),
            self.pull::<CompletedTask>(),
        )?;
        let (todos, superseded_todos) = dedupe_occurrences(todos);
        if !superseded_todos.is_empty() {
            tracing::info!(count = superseded_todos.len(), "Collapsed duplicate remote occurrences");
        }
        Ok(RemoteSnapshot {
            goals,
            todos,
            diary_entries,
            completed_tasks,
            superseded_todos,
        })
    }

    async fn pull<T: Mirrored>(&self) -> Result<Vec<T>, RemoteError> {
        let snapshots = self
            .remote
            .query(T::COLLECTION, &[self.owned_by()], &T::order_by())
            .await?;
        let records = snapshots
            .into_iter()
            .filter_map(|s| match from_document::<T>(&s.id, s.data) {
                Ok(record) => Some(record),
                Err(e) => {
                    tracing::warn!(
                        collection = T::COLLECTION.as_str(),
                        id = %s.id,
                        error = %e,
                        "Skipping undecodable remote document"
                    );
                    None
                }
            })
            .collect();
        Ok(dedupe_by_id(records))
    }
}

/// Keep the first record seen for each id, preserving order.
pub fn dedupe_by_id<T: Mirrored>(records: Vec<T>) -> Vec<T> {
    let mut seen = std::collections::HashSet::new();
    records.into_iter().filter(|r| seen.insert(r.id())).collect()
}

/// Keep one derived todo per (goal, date), preferring a completed copy.
/// Returns the kept todos in their original order and the ids dropped.
pub fn dedupe_occurrences(todos: Vec<Todo>) -> (Vec<Todo>, Vec<Uuid>) {
    let mut winner: HashMap<(Uuid, NaiveDate), usize> = HashMap::new();
    for (index, todo) in todos.iter().enumerate() {
        let Some(key) = todo.occurrence_key() else {
            continue;
        };
        winner
            .entry(key)
            .and_modify(|kept| {
                if todo.is_completed && !todos[*kept].is_completed {
                    *kept = index;
                }
            })
            .or_insert(index);
    }

    let mut kept = Vec::with_capacity(todos.len());
    let mut dropped = Vec::new();
    for (index, todo) in todos.into_iter().enumerate() {
        match todo.occurrence_key() {
            Some(key) if winner.get(&key) != Some(&index) => dropped.push(todo.id),
            _ => kept.push(todo),
        }
    }
    (kept, dropped)
}

#[derive(Debug, Default)]
pub struct RemoteSnapshot {
    pub goals: Vec<Goal>,
    pub todos: Vec<Todo>,
    pub diary_entries: Vec<DiaryEntry>,
    pub completed_tasks: Vec<CompletedTask>,
    /// Remote todos that duplicated an occurrence and were left out.
    pub superseded_todos: Vec<Uuid>,
}
