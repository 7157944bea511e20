//! In-memory planner state for one account, persisted to the local store on
//! every mutation.
//!
//! Mutations commit locally and return the remote writes they imply. Callers
//! hand those to the sync reconciler; the local result never waits on them.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::completed_task::CompletedTask;
use crate::models::diary::{DiaryEntry, UpdateDiaryRequest, UpsertDiaryRequest};
use crate::models::event::{publish, PlannerEvent};
use crate::models::goal::{Goal, GoalInput, GoalSummary, GoalType};
use crate::models::todo::{CreateTodoRequest, Todo, UpdateTodoRequest};
use crate::store::local::{keys, load_records, save_json, LocalStore};

use super::calendar;
use super::carryover::{merge_with_manual, CarryOver};
use super::holidays::HolidayCalendar;
use super::mirror::MirrorOp;
use super::regeneration::{RegenerationSettings, Regenerator};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlannerData {
    pub goals: Vec<Goal>,
    pub todos: Vec<Todo>,
    pub diary_entries: Vec<DiaryEntry>,
    pub completed_tasks: Vec<CompletedTask>,
}

/// Result of a local mutation plus the remote writes that mirror it.
#[derive(Debug)]
pub struct Mutation<T> {
    pub value: T,
    pub mirror: Vec<MirrorOp>,
}

impl<T> Mutation<T> {
    fn new(value: T, mirror: Vec<MirrorOp>) -> Self {
        Self { value, mirror }
    }
}

pub struct Planner {
    data: RwLock<PlannerData>,
    store: Arc<dyn LocalStore>,
    holidays: Arc<dyn HolidayCalendar>,
    events: broadcast::Sender<String>,
    regenerator: Regenerator,
}

fn in_range(date: NaiveDate, start: Option<NaiveDate>, end: Option<NaiveDate>) -> bool {
    start.map_or(true, |s| date >= s) && end.map_or(true, |e| date <= e)
}

impl Planner {
    /// Load the account's collections from `store`, which is already scoped
    /// to the account.
    pub fn load(
        store: Arc<dyn LocalStore>,
        holidays: Arc<dyn HolidayCalendar>,
        events: broadcast::Sender<String>,
        settings: RegenerationSettings,
    ) -> Arc<Self> {
        let data = PlannerData {
            goals: load_records(store.as_ref(), keys::GOALS),
            todos: load_records(store.as_ref(), keys::TODOS),
            diary_entries: load_records(store.as_ref(), keys::DIARY),
            completed_tasks: load_records(store.as_ref(), keys::COMPLETED_TASKS),
        };
        tracing::info!(
            goals = data.goals.len(),
            todos = data.todos.len(),
            diary_entries = data.diary_entries.len(),
            completed_tasks = data.completed_tasks.len(),
            "Planner loaded from local store"
        );

        Arc::new(Self {
            data: RwLock::new(data),
            store,
            holidays,
            events,
            regenerator: Regenerator::new(settings),
        })
    }

    pub(super) fn data(&self) -> &RwLock<PlannerData> {
        &self.data
    }

    pub(super) fn holidays(&self) -> &dyn HolidayCalendar {
        self.holidays.as_ref()
    }

    pub(super) fn events(&self) -> &broadcast::Sender<String> {
        &self.events
    }

    pub(super) fn regenerator(&self) -> &Regenerator {
        &self.regenerator
    }

    pub fn is_regenerating(&self) -> bool {
        self.regenerator.is_running()
    }

    pub fn store(&self) -> &dyn LocalStore {
        self.store.as_ref()
    }

    fn persist<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> AppResult<()> {
        save_json(self.store.as_ref(), key, value)?;
        Ok(())
    }

    /// Apply `edit` to a copy of `records`, persist the copy, then swap it in.
    /// Memory is untouched when the edit or the write fails.
    fn stage<T, R>(
        &self,
        key: &str,
        records: &mut Vec<T>,
        edit: impl FnOnce(&mut Vec<T>) -> AppResult<R>,
    ) -> AppResult<R>
    where
        T: Clone + Serialize,
    {
        let mut staged = records.clone();
        let out = edit(&mut staged)?;
        self.persist(key, &staged)?;
        *records = staged;
        Ok(out)
    }

    fn changed(&self, collection: &'static str) {
        publish(&self.events, PlannerEvent::DataChanged { collection });
    }

    /// Replace derived todos with `derived`, keeping manual ones. Completion
    /// and notes recorded since the pass began take precedence over the
    /// pass's copy. Returns `false`, committing nothing, when planner state was
    /// replaced after the pass captured it.
    pub(super) async fn commit_derived(&self, epoch: u64, derived: &[Todo]) -> bool {
        let mut data = self.data.write().await;
        if self.regenerator.epoch() != epoch {
            return false;
        }
        let current = CarryOver::capture(&data.todos);
        let todos = merge_with_manual(&data.todos, current.apply(derived.to_vec()));
        if let Err(e) = self.persist(keys::TODOS, &todos) {
            tracing::error!(error = %e, "Failed to persist regenerated todos");
            publish(
                &self.events,
                PlannerEvent::Error {
                    message: "Could not save regenerated todos".into(),
                },
            );
        }
        data.todos = todos;
        drop(data);
        self.changed("todos");
        true
    }

    pub async fn snapshot(&self) -> PlannerData {
        self.data.read().await.clone()
    }

    /// Overwrite every collection, e.g. with state pulled from the remote store.
    pub async fn replace_all(self: &Arc<Self>, incoming: PlannerData) -> AppResult<()> {
        {
            let mut data = self.data.write().await;
            self.persist(keys::GOALS, &incoming.goals)?;
            self.persist(keys::TODOS, &incoming.todos)?;
            self.persist(keys::DIARY, &incoming.diary_entries)?;
            self.persist(keys::COMPLETED_TASKS, &incoming.completed_tasks)?;
            *data = incoming;
            self.regenerator.invalidate();
        }
        for collection in ["goals", "todos", "diary_entries", "completed_tasks"] {
            self.changed(collection);
        }
        self.request_regeneration();
        Ok(())
    }

    // Goals

    pub async fn goals(&self) -> Vec<Goal> {
        let mut goals = self.data.read().await.goals.clone();
        goals.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        goals
    }

    pub async fn goal(&self, id: Uuid) -> AppResult<Goal> {
        self.data
            .read()
            .await
            .goals
            .iter()
            .find(|g| g.id == id)
            .cloned()
            .ok_or_else(|| AppError::NotFound("Goal not found".into()))
    }

    pub async fn add_goal(self: &Arc<Self>, input: GoalInput) -> AppResult<Mutation<Goal>> {
        let goal = Goal::new(input);
        {
            let mut data = self.data.write().await;
            self.stage(keys::GOALS, &mut data.goals, |goals| {
                goals.push(goal.clone());
                Ok(())
            })?;
        }
        tracing::info!(goal_id = %goal.id, kind = ?goal.kind, "Goal created");
        self.changed("goals");
        self.request_regeneration();
        Ok(Mutation::new(goal.clone(), vec![MirrorOp::CreateGoal(goal)]))
    }

    pub async fn update_goal(
        self: &Arc<Self>,
        id: Uuid,
        input: GoalInput,
    ) -> AppResult<Mutation<Goal>> {
        let goal = {
            let mut data = self.data.write().await;
            self.stage(keys::GOALS, &mut data.goals, |goals| {
                let goal = goals
                    .iter_mut()
                    .find(|g| g.id == id)
                    .ok_or_else(|| AppError::NotFound("Goal not found".into()))?;
                goal.apply(input);
                Ok(goal.clone())
            })?
        };
        tracing::info!(goal_id = %id, "Goal updated");
        self.changed("goals");
        self.request_regeneration();
        Ok(Mutation::new(goal.clone(), vec![MirrorOp::UpdateGoal(goal)]))
    }

    /// Delete a goal together with its derived todos and completion records.
    pub async fn delete_goal(self: &Arc<Self>, id: Uuid) -> AppResult<Mutation<()>> {
        {
            let mut data = self.data.write().await;
            if !data.goals.iter().any(|g| g.id == id) {
                return Err(AppError::NotFound("Goal not found".into()));
            }
            let goals: Vec<Goal> = data.goals.iter().filter(|g| g.id != id).cloned().collect();
            let todos: Vec<Todo> = data
                .todos
                .iter()
                .filter(|t| t.goal_id != Some(id))
                .cloned()
                .collect();
            let tasks: Vec<CompletedTask> = data
                .completed_tasks
                .iter()
                .filter(|c| c.goal_id != id)
                .cloned()
                .collect();
            self.persist(keys::GOALS, &goals)?;
            self.persist(keys::TODOS, &todos)?;
            self.persist(keys::COMPLETED_TASKS, &tasks)?;
            data.goals = goals;
            data.todos = todos;
            data.completed_tasks = tasks;
        }
        tracing::info!(goal_id = %id, "Goal deleted");
        self.changed("goals");
        self.request_regeneration();
        Ok(Mutation::new((), vec![MirrorOp::DeleteGoal(id)]))
    }

    pub async fn goal_summary(&self, id: Uuid) -> AppResult<GoalSummary> {
        let goal = self.goal(id).await?;
        let (planned, completed) = {
            let data = self.data.read().await;
            let derived: Vec<&Todo> = data.todos.iter().filter(|t| t.goal_id == Some(id)).collect();
            (derived.len(), derived.iter().filter(|t| t.is_completed).count())
        };
        let completion_rate = if planned == 0 {
            0.0
        } else {
            completed as f64 / planned as f64
        };

        let today = Utc::now().date_naive();
        let (working_days, weeks_remaining, months_remaining) = match (goal.start_date, goal.end_date) {
            (Some(start), Some(end)) => {
                let working_days = match goal.kind {
                    GoalType::Daily => Some(
                        calendar::working_days(
                            start,
                            end,
                            goal.schedule.exclude_weekends,
                            goal.schedule.exclude_holidays,
                            self.holidays(),
                        )
                        .await,
                    ),
                    _ => None,
                };
                let from = today.max(start);
                let months = if from > end {
                    0
                } else {
                    calendar::months_remaining(from, end)
                };
                (working_days, calendar::weeks_remaining(from, end), months)
            }
            _ => (None, 0, 0),
        };

        Ok(GoalSummary {
            goal_id: id,
            planned,
            completed,
            completion_rate,
            working_days,
            weeks_remaining,
            months_remaining,
        })
    }

    // Todos

    /// Todos scheduled within the inclusive range, ordered by date and time.
    pub async fn todos(&self, start: Option<NaiveDate>, end: Option<NaiveDate>) -> Vec<Todo> {
        let mut todos: Vec<Todo> = self
            .data
            .read()
            .await
            .todos
            .iter()
            .filter(|t| in_range(t.scheduled_date, start, end))
            .cloned()
            .collect();
        todos.sort_by(|a, b| {
            (a.scheduled_date, a.scheduled_time).cmp(&(b.scheduled_date, b.scheduled_time))
        });
        todos
    }

    pub async fn add_todo(&self, input: CreateTodoRequest) -> AppResult<Mutation<Todo>> {
        let todo = Todo::manual(input);
        {
            let mut data = self.data.write().await;
            self.stage(keys::TODOS, &mut data.todos, |todos| {
                todos.push(todo.clone());
                Ok(())
            })?;
        }
        self.changed("todos");
        Ok(Mutation::new(todo.clone(), vec![MirrorOp::CreateTodo(todo)]))
    }

    /// Goal-derived todos only accept completion and note changes; their
    /// title and schedule belong to the goal.
    pub async fn update_todo(&self, id: Uuid, input: UpdateTodoRequest) -> AppResult<Mutation<Todo>> {
        let mut mirror = Vec::new();
        let todo = {
            let mut data = self.data.write().await;
            let mut todos = data.todos.clone();
            let index = todos
                .iter()
                .position(|t| t.id == id)
                .ok_or_else(|| AppError::NotFound("Todo not found".into()))?;

            let todo = &mut todos[index];
            if todo.is_from_goal && input.touches_schedule() {
                return Err(AppError::Validation(
                    "Todos created from a goal can only change completion and notes".into(),
                ));
            }
            if let Some(title) = input.title {
                todo.title = title;
            }
            if let Some(date) = input.scheduled_date {
                todo.scheduled_date = date;
            }
            if let Some(time) = input.scheduled_time {
                todo.scheduled_time = time;
            }
            if let Some(note) = input.note {
                todo.note = Some(note).filter(|n| !n.is_empty());
            }
            let completion_changed = input
                .is_completed
                .map_or(false, |done| todo.set_completed(done, Utc::now()));
            let todo = todo.clone();

            mirror.push(MirrorOp::UpdateTodo(todo.clone()));
            if completion_changed {
                let mut tasks = data.completed_tasks.clone();
                mirror.extend(record_completion(&mut tasks, &data.goals, &todo));
                self.persist(keys::COMPLETED_TASKS, &tasks)?;
                data.completed_tasks = tasks;
            }
            self.persist(keys::TODOS, &todos)?;
            data.todos = todos;
            todo
        };
        self.changed("todos");
        Ok(Mutation::new(todo, mirror))
    }

    pub async fn toggle_todo(&self, id: Uuid) -> AppResult<Mutation<Todo>> {
        let completed = self
            .data
            .read()
            .await
            .todos
            .iter()
            .find(|t| t.id == id)
            .map(|t| t.is_completed)
            .ok_or_else(|| AppError::NotFound("Todo not found".into()))?;
        self.update_todo(
            id,
            UpdateTodoRequest {
                is_completed: Some(!completed),
                ..Default::default()
            },
        )
        .await
    }

    pub async fn delete_todo(&self, id: Uuid) -> AppResult<Mutation<()>> {
        let mut mirror = vec![MirrorOp::DeleteTodo(id)];
        {
            let mut data = self.data.write().await;
            let mut todos = data.todos.clone();
            let index = todos
                .iter()
                .position(|t| t.id == id)
                .ok_or_else(|| AppError::NotFound("Todo not found".into()))?;
            let todo = todos.remove(index);
            let mut tasks = data.completed_tasks.clone();
            let removed = remove_completion(&mut tasks, &todo);
            if !removed.is_empty() {
                self.persist(keys::COMPLETED_TASKS, &tasks)?;
                data.completed_tasks = tasks;
            }
            mirror.extend(removed.into_iter().map(MirrorOp::DeleteCompletedTask));
            self.persist(keys::TODOS, &todos)?;
            data.todos = todos;
        }
        self.changed("todos");
        Ok(Mutation::new((), mirror))
    }

    /// Completion records, most recent first.
    pub async fn completed_tasks(&self) -> Vec<CompletedTask> {
        let mut tasks = self.data.read().await.completed_tasks.clone();
        tasks.sort_by(|a, b| b.completed_date.cmp(&a.completed_date));
        tasks
    }

    // Diary

    pub async fn diary_entries(&self, start: Option<NaiveDate>, end: Option<NaiveDate>) -> Vec<DiaryEntry> {
        let mut entries: Vec<DiaryEntry> = self
            .data
            .read()
            .await
            .diary_entries
            .iter()
            .filter(|e| in_range(e.date, start, end))
            .cloned()
            .collect();
        // Unbounded listings show the latest entries first
        if start.is_none() && end.is_none() {
            entries.sort_by(|a, b| b.date.cmp(&a.date));
        } else {
            entries.sort_by_key(|e| e.date);
        }
        entries
    }

    /// Create the entry for a date, or overwrite the one already there.
    pub async fn upsert_diary(&self, input: UpsertDiaryRequest) -> AppResult<Mutation<DiaryEntry>> {
        let date = input.date.unwrap_or_else(|| Utc::now().date_naive());
        let entry = {
            let mut data = self.data.write().await;
            self.stage(keys::DIARY, &mut data.diary_entries, |entries| {
                Ok(match entries.iter_mut().find(|e| e.date == date) {
                    Some(existing) => {
                        existing.content = input.content;
                        existing.clone()
                    }
                    None => {
                        let entry = DiaryEntry {
                            id: Uuid::new_v4(),
                            date,
                            content: input.content,
                        };
                        entries.push(entry.clone());
                        entry
                    }
                })
            })?
        };
        self.changed("diary_entries");
        Ok(Mutation::new(entry.clone(), vec![MirrorOp::SaveDiary(entry)]))
    }

    pub async fn update_diary(&self, id: Uuid, input: UpdateDiaryRequest) -> AppResult<Mutation<DiaryEntry>> {
        let entry = {
            let mut data = self.data.write().await;
            self.stage(keys::DIARY, &mut data.diary_entries, |entries| {
                let entry = entries
                    .iter_mut()
                    .find(|e| e.id == id)
                    .ok_or_else(|| AppError::NotFound("Diary entry not found".into()))?;
                entry.content = input.content;
                Ok(entry.clone())
            })?
        };
        self.changed("diary_entries");
        Ok(Mutation::new(entry.clone(), vec![MirrorOp::UpdateDiary(entry)]))
    }

    pub async fn delete_diary(&self, id: Uuid) -> AppResult<Mutation<()>> {
        {
            let mut data = self.data.write().await;
            self.stage(keys::DIARY, &mut data.diary_entries, |entries| {
                let before = entries.len();
                entries.retain(|e| e.id != id);
                if entries.len() == before {
                    return Err(AppError::NotFound("Diary entry not found".into()));
                }
                Ok(())
            })?;
        }
        self.changed("diary_entries");
        Ok(Mutation::new((), vec![MirrorOp::DeleteDiary(id)]))
    }
}

/// Keep completion records in step with a derived todo's completion flag.
fn record_completion(tasks: &mut Vec<CompletedTask>, goals: &[Goal], todo: &Todo) -> Vec<MirrorOp> {
    let Some(goal_id) = todo.goal_id.filter(|_| todo.is_from_goal) else {
        return Vec::new();
    };

    if !todo.is_completed {
        return remove_completion(tasks, todo)
            .into_iter()
            .map(MirrorOp::DeleteCompletedTask)
            .collect();
    }

    if tasks.iter().any(|c| c.id == todo.id) {
        return Vec::new();
    }
    let kind = goals
        .iter()
        .find(|g| g.id == goal_id)
        .map(|g| g.kind)
        .unwrap_or_default();
    let task = CompletedTask {
        id: todo.id,
        goal_id,
        scheduled_date: todo.scheduled_date,
        completed_date: todo.actual_completion_time.unwrap_or_else(Utc::now),
        kind,
    };
    tasks.push(task.clone());
    vec![MirrorOp::CreateCompletedTask(task)]
}

/// Drop completion records for `todo`. Records written before a regeneration
/// carry the old todo id, so the occurrence key is matched too.
fn remove_completion(tasks: &mut Vec<CompletedTask>, todo: &Todo) -> Vec<Uuid> {
    let occurrence = todo.occurrence_key();
    let mut removed = Vec::new();
    tasks.retain(|c| {
        let matches = c.id == todo.id || occurrence == Some((c.goal_id, c.scheduled_date));
        if matches {
            removed.push(c.id);
        }
        !matches
    });
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::goal::Schedule;
    use crate::services::holidays::tests::StaticCalendar;
    use crate::store::local::MemoryStore;
    use chrono::NaiveTime;
    use std::time::Duration;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 4, d).unwrap()
    }

    fn planner_with(store: Arc<dyn LocalStore>) -> Arc<Planner> {
        let (tx, _) = broadcast::channel(64);
        Planner::load(
            store,
            Arc::new(StaticCalendar::none()),
            tx,
            RegenerationSettings {
                chunk_size: 50,
                chunk_delay: Duration::ZERO,
            },
        )
    }

    fn planner() -> Arc<Planner> {
        planner_with(Arc::new(MemoryStore::new()))
    }

    fn goal_input() -> GoalInput {
        GoalInput {
            title: "Practice piano".into(),
            kind: GoalType::Daily,
            description: Some("scales".into()),
            scheduled_time: NaiveTime::from_hms_opt(19, 0, 0).unwrap(),
            schedule: Schedule::default(),
            start_date: date(1),
            end_date: date(4),
        }
    }

    fn manual(title: &str, day: u32) -> CreateTodoRequest {
        CreateTodoRequest {
            title: title.into(),
            scheduled_date: date(day),
            scheduled_time: NaiveTime::from_hms_opt(12, 0, 0).unwrap(),
            note: None,
        }
    }

    #[tokio::test]
    async fn test_state_reloads_from_store() {
        let store: Arc<dyn LocalStore> = Arc::new(MemoryStore::new());
        let planner = planner_with(store.clone());
        planner.add_goal(goal_input()).await.unwrap();
        planner.regeneration_settled().await;
        planner
            .upsert_diary(UpsertDiaryRequest {
                date: Some(date(2)),
                content: "Good day".into(),
            })
            .await
            .unwrap();

        let reloaded = planner_with(store);
        assert_eq!(reloaded.snapshot().await, planner.snapshot().await);
    }

    #[tokio::test]
    async fn test_completing_derived_todo_records_task() {
        let planner = planner();
        let goal = planner.add_goal(goal_input()).await.unwrap().value;
        planner.regeneration_settled().await;
        let todo = planner.todos(Some(date(2)), Some(date(2))).await.remove(0);

        let done = planner.toggle_todo(todo.id).await.unwrap();
        assert!(done.value.is_completed);
        assert!(matches!(done.mirror[1], MirrorOp::CreateCompletedTask(_)));
        let tasks = planner.completed_tasks().await;
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].id, todo.id);
        assert_eq!(tasks[0].goal_id, goal.id);

        let undone = planner.toggle_todo(todo.id).await.unwrap();
        assert!(!undone.value.is_completed);
        assert!(undone.value.actual_completion_time.is_none());
        assert!(matches!(undone.mirror[1], MirrorOp::DeleteCompletedTask(id) if id == todo.id));
        assert!(planner.completed_tasks().await.is_empty());
    }

    #[tokio::test]
    async fn test_manual_completion_has_no_task() {
        let planner = planner();
        let todo = planner.add_todo(manual("Groceries", 3)).await.unwrap().value;
        let done = planner.toggle_todo(todo.id).await.unwrap();
        assert!(done.value.is_completed);
        assert_eq!(done.mirror.len(), 1);
        assert!(planner.completed_tasks().await.is_empty());
    }

    #[tokio::test]
    async fn test_derived_todo_schedule_is_locked() {
        let planner = planner();
        planner.add_goal(goal_input()).await.unwrap();
        planner.regeneration_settled().await;
        let todo = planner.todos(None, None).await.remove(0);

        let err = planner
            .update_todo(
                todo.id,
                UpdateTodoRequest {
                    title: Some("Renamed".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let noted = planner
            .update_todo(
                todo.id,
                UpdateTodoRequest {
                    note: Some("felt rusty".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(noted.value.note.as_deref(), Some("felt rusty"));
    }

    #[tokio::test]
    async fn test_goal_delete_cascades_locally() {
        let planner = planner();
        let goal = planner.add_goal(goal_input()).await.unwrap().value;
        planner.regeneration_settled().await;
        let keep = planner.add_todo(manual("Call mom", 1)).await.unwrap().value;
        let derived = planner.todos(Some(date(1)), Some(date(1))).await;
        let derived = derived.iter().find(|t| t.is_from_goal).unwrap();
        planner.toggle_todo(derived.id).await.unwrap();

        let deleted = planner.delete_goal(goal.id).await.unwrap();
        assert!(matches!(deleted.mirror[0], MirrorOp::DeleteGoal(id) if id == goal.id));
        planner.regeneration_settled().await;

        assert!(planner.goals().await.is_empty());
        assert_eq!(planner.todos(None, None).await, vec![keep]);
        assert!(planner.completed_tasks().await.is_empty());
        assert!(matches!(
            planner.delete_goal(goal.id).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_diary_is_one_entry_per_date() {
        let planner = planner();
        let first = planner
            .upsert_diary(UpsertDiaryRequest {
                date: Some(date(5)),
                content: "draft".into(),
            })
            .await
            .unwrap()
            .value;
        let second = planner
            .upsert_diary(UpsertDiaryRequest {
                date: Some(date(5)),
                content: "final".into(),
            })
            .await
            .unwrap()
            .value;

        assert_eq!(first.id, second.id);
        let entries = planner.diary_entries(None, None).await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].content, "final");

        planner.delete_diary(first.id).await.unwrap();
        assert!(planner.diary_entries(None, None).await.is_empty());
    }

    #[tokio::test]
    async fn test_listing_filters_and_orders() {
        let planner = planner();
        planner.add_todo(manual("later", 9)).await.unwrap();
        planner.add_todo(manual("first", 2)).await.unwrap();
        planner.add_todo(manual("outside", 20)).await.unwrap();

        let titles: Vec<String> = planner
            .todos(Some(date(1)), Some(date(10)))
            .await
            .into_iter()
            .map(|t| t.title)
            .collect();
        assert_eq!(titles, vec!["first", "later"]);
    }

    #[tokio::test]
    async fn test_goal_summary_counts_progress() {
        let planner = planner();
        let goal = planner.add_goal(goal_input()).await.unwrap().value;
        planner.regeneration_settled().await;
        let first = planner.todos(None, None).await.remove(0);
        planner.toggle_todo(first.id).await.unwrap();

        let summary = planner.goal_summary(goal.id).await.unwrap();
        assert_eq!(summary.planned, 4);
        assert_eq!(summary.completed, 1);
        assert!((summary.completion_rate - 0.25).abs() < f64::EPSILON);
        assert_eq!(summary.working_days, Some(4));
    }

    /// Store whose writes can be switched off.
    #[derive(Default)]
    struct Flaky {
        inner: MemoryStore,
        read_only: std::sync::atomic::AtomicBool,
    }

    impl LocalStore for Flaky {
        fn get(&self, key: &str) -> Result<Option<String>, crate::error::StoreError> {
            self.inner.get(key)
        }

        fn set(&self, key: &str, value: &str) -> Result<(), crate::error::StoreError> {
            if self.read_only.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(std::io::Error::new(std::io::ErrorKind::Other, "disk full").into());
            }
            self.inner.set(key, value)
        }

        fn remove(&self, key: &str) -> Result<(), crate::error::StoreError> {
            self.inner.remove(key)
        }

        fn keys(&self) -> Result<Vec<String>, crate::error::StoreError> {
            self.inner.keys()
        }
    }

    #[tokio::test]
    async fn test_failed_write_leaves_memory_unchanged() {
        let store = Arc::new(Flaky::default());
        let planner = planner_with(store.clone());
        let todo = planner.add_todo(manual("Call bank", 3)).await.unwrap().value;
        let before = planner.snapshot().await;

        store.read_only.store(true, std::sync::atomic::Ordering::SeqCst);
        assert!(matches!(
            planner.add_goal(goal_input()).await,
            Err(AppError::Store(_))
        ));
        assert!(planner.toggle_todo(todo.id).await.is_err());
        assert!(planner.delete_todo(todo.id).await.is_err());
        assert!(planner
            .upsert_diary(UpsertDiaryRequest {
                date: Some(date(3)),
                content: "lost".into(),
            })
            .await
            .is_err());
        assert_eq!(planner.snapshot().await, before);
        assert!(!planner.is_regenerating());

        store.read_only.store(false, std::sync::atomic::Ordering::SeqCst);
        let toggled = planner.toggle_todo(todo.id).await.unwrap().value;
        assert!(toggled.is_completed);
    }
}
