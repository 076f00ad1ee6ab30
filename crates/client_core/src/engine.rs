use std::sync::Arc;

use shared::{
    domain::{LessonId, StepId},
    protocol::{CompleteStepRequest, CompleteStepResult},
};
use tracing::{debug, info, warn};

use crate::{
    error::CompleteStepError,
    notify::{Notification, Notifier},
    ports::StepCompletionService,
    store::ProgressStore,
    types::{ProgressState, StepView},
};

pub const SUCCESS_TITLE: &str = "Success";
pub const FAILURE_TITLE: &str = "Error updating step";

/// A toggle whose optimistic state is applied and whose confirmation is outstanding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingToggle {
    pub lesson_id: LessonId,
    pub step_id: StepId,
    pub from: bool,
    pub to: bool,
    /// Matches `ProgressState::pending_steps` until this toggle resolves.
    pub token: u64,
}

impl PendingToggle {
    pub fn request(&self) -> CompleteStepRequest {
        CompleteStepRequest {
            lesson_id: self.lesson_id.clone(),
            step_id: self.step_id.clone(),
            completed: self.to,
        }
    }

    fn key(&self) -> (LessonId, StepId) {
        (self.lesson_id.clone(), self.step_id.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleRejection {
    NotFound,
    /// The step already has a confirmation in flight.
    AlreadySaving,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToggleOutcome {
    Confirmed { completed: bool },
    RolledBack { error: CompleteStepError },
    Rejected(ToggleRejection),
}

/// Optimistic apply: flips the step, marks it saving, moves the lesson's
/// `completed_steps` by one in the direction of the flip and registers a
/// fresh token for the step.
pub fn apply_optimistic(
    state: &ProgressState,
    lesson_id: &str,
    step_id: &str,
) -> Result<(ProgressState, PendingToggle), ToggleRejection> {
    let (lesson_index, step_index) =
        locate(state, lesson_id, step_id).ok_or(ToggleRejection::NotFound)?;
    let lesson = &state.lessons[lesson_index];
    let step = &lesson.steps[step_index];
    let (Some(lesson_key), Some(step_key)) = (lesson.id.clone(), step.id.clone()) else {
        return Err(ToggleRejection::NotFound);
    };
    let key = (lesson_key, step_key);
    if step.saving || state.pending_steps.contains_key(&key) {
        return Err(ToggleRejection::AlreadySaving);
    }

    let from = step.completed;
    let to = !from;
    let token = state.last_toggle_token.wrapping_add(1);
    let completed_steps = shift_count(lesson.completed_steps, to);
    let next_lesson = lesson.with_step(
        step_index,
        step.with_completion(to, true),
        completed_steps,
        lesson.total_steps,
        None,
    );
    let mut next = state.with_lesson(lesson_index, next_lesson);
    next.pending_steps.insert(key.clone(), token);
    next.last_toggle_token = token;

    let (lesson_id, step_id) = key;
    let pending = PendingToggle {
        lesson_id,
        step_id,
        from,
        to,
        token,
    };
    Ok((next, pending))
}

/// Success path: server-reported values win, absent fields fall back to what
/// is held locally. `None` when the token was superseded; when the lesson or
/// step is gone only the token is released.
pub fn reconcile(
    state: &ProgressState,
    pending: &PendingToggle,
    result: &CompleteStepResult,
) -> Option<ProgressState> {
    let next = release(state, pending)?;
    let Some((lesson_index, step_index)) = locate(
        &next,
        pending.lesson_id.as_str(),
        pending.step_id.as_str(),
    ) else {
        return Some(next);
    };
    let lesson = &next.lessons[lesson_index];
    let step = &lesson.steps[step_index];

    let completed = result.completed.unwrap_or(pending.to);
    let completed_steps = result.completed_steps.unwrap_or_else(|| {
        if completed == step.completed {
            lesson.completed_steps
        } else {
            shift_count(lesson.completed_steps, completed)
        }
    });
    let total_steps = result.total_steps.or(lesson.total_steps);

    let next_step = StepView {
        completed_date: result.completed_date.or(step.completed_date),
        ..step.with_completion(completed, false)
    };
    let next_lesson = lesson.with_step(
        step_index,
        next_step,
        completed_steps,
        total_steps,
        result.lesson_completed,
    );
    Some(next.with_lesson(lesson_index, next_lesson))
}

/// Failure path: restores the pre-toggle completion flag. The count delta is
/// only undone while the step still carries the optimistic value, so a
/// snapshot that replaced it in the meantime is not corrected twice.
pub fn rollback(state: &ProgressState, pending: &PendingToggle) -> Option<ProgressState> {
    let next = release(state, pending)?;
    let Some((lesson_index, step_index)) = locate(
        &next,
        pending.lesson_id.as_str(),
        pending.step_id.as_str(),
    ) else {
        return Some(next);
    };
    let lesson = &next.lessons[lesson_index];
    let step = &lesson.steps[step_index];

    let completed_steps = if step.completed == pending.to {
        shift_count(lesson.completed_steps, pending.from)
    } else {
        lesson.completed_steps
    };
    let next_lesson = lesson.with_step(
        step_index,
        step.with_completion(pending.from, false),
        completed_steps,
        lesson.total_steps,
        None,
    );
    Some(next.with_lesson(lesson_index, next_lesson))
}

/// Drops the step's token if it is still `pending.token`.
fn release(state: &ProgressState, pending: &PendingToggle) -> Option<ProgressState> {
    let key = pending.key();
    if state.pending_steps.get(&key) != Some(&pending.token) {
        return None;
    }
    let mut next = state.clone();
    next.pending_steps.remove(&key);
    Some(next)
}

fn locate(state: &ProgressState, lesson_id: &str, step_id: &str) -> Option<(usize, usize)> {
    let lesson_index = state.lesson_index(lesson_id)?;
    let step_index = state.lessons[lesson_index].step_index(step_id)?;
    Some((lesson_index, step_index))
}

/// One step towards `completed`; never below zero.
fn shift_count(count: u32, completed: bool) -> u32 {
    if completed {
        count.saturating_add(1)
    } else {
        count.saturating_sub(1)
    }
}

fn lesson_name(state: &ProgressState, lesson_id: &LessonId) -> String {
    state
        .lesson(lesson_id.as_str())
        .map(|lesson| lesson.display_name().to_string())
        .unwrap_or_else(|| lesson_id.to_string())
}

#[derive(Clone)]
pub struct StepUpdateEngine {
    store: ProgressStore,
    service: Arc<dyn StepCompletionService>,
    notifier: Arc<dyn Notifier>,
}

impl StepUpdateEngine {
    pub fn new(
        store: ProgressStore,
        service: Arc<dyn StepCompletionService>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            service,
            notifier,
        }
    }

    pub fn store(&self) -> &ProgressStore {
        &self.store
    }

    /// Runs one full toggle: optimistic apply, remote confirmation, then
    /// reconciliation or rollback. Resolves once the remote call has.
    pub async fn toggle_step(&self, lesson_id: &str, step_id: &str) -> ToggleOutcome {
        let mut applied = Err(ToggleRejection::NotFound);
        self.store.update(|state| match apply_optimistic(state, lesson_id, step_id) {
            Ok((next, pending)) => {
                applied = Ok(pending);
                Some(next)
            }
            Err(rejection) => {
                applied = Err(rejection);
                None
            }
        });
        let pending = match applied {
            Ok(pending) => pending,
            Err(rejection) => {
                debug!(lesson_id, step_id, ?rejection, "step toggle ignored");
                return ToggleOutcome::Rejected(rejection);
            }
        };

        match self.service.complete_step(pending.request()).await {
            Ok(result) => {
                let mut name = None;
                let applied = self.store.update(|state| {
                    let next = reconcile(state, &pending, &result)?;
                    name = Some(lesson_name(&next, &pending.lesson_id));
                    Some(next)
                });
                if !applied {
                    debug!(
                        lesson_id = %pending.lesson_id,
                        step_id = %pending.step_id,
                        "superseded confirmation; reconciliation skipped"
                    );
                }
                let completed = result.completed.unwrap_or(pending.to);
                info!(
                    lesson_id = %pending.lesson_id,
                    step_id = %pending.step_id,
                    completed,
                    "step completion confirmed"
                );
                let name = name.unwrap_or_else(|| pending.lesson_id.to_string());
                self.notifier.notify(Notification::success(
                    SUCCESS_TITLE,
                    format!("Step updated for {name}"),
                ));
                ToggleOutcome::Confirmed { completed }
            }
            Err(error) => {
                let applied = self.store.update(|state| rollback(state, &pending));
                warn!(
                    lesson_id = %pending.lesson_id,
                    step_id = %pending.step_id,
                    error = %error,
                    rolled_back = applied,
                    "step completion failed"
                );
                self.notifier
                    .notify(Notification::error(FAILURE_TITLE, error.user_message()));
                ToggleOutcome::RolledBack { error }
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/engine_tests.rs"]
mod tests;
