use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, NaiveDate, Utc};
use shared::domain::{BadgeId, LessonId, StepId};

use crate::error::ProgressError;

pub const SHOW_STEPS_LABEL: &str = "Show Steps";
pub const HIDE_STEPS_LABEL: &str = "Hide Steps";
pub const COLLAPSED_ICON: &str = "chevron-right";
pub const EXPANDED_ICON: &str = "chevron-down";
pub const DEFAULT_BADGE_ICON: &str = "award";

/// Button presentation of a step, a pure function of its completion flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepButton {
    pub label: &'static str,
    pub variant: &'static str,
    pub icon_name: &'static str,
}

impl StepButton {
    pub fn for_completion(completed: bool) -> Self {
        if completed {
            Self {
                label: "Completed",
                variant: "neutral",
                icon_name: "check",
            }
        } else {
            Self {
                label: "Complete step",
                variant: "brand-outline",
                icon_name: "success-glyph",
            }
        }
    }
}

/// `completed ⇔ totalSteps > 0 ∧ completedSteps == totalSteps`
pub fn lesson_is_completed(completed_steps: u32, total_steps: u32) -> bool {
    total_steps > 0 && completed_steps == total_steps
}

#[derive(Debug, Clone, PartialEq)]
pub struct StepView {
    pub id: Option<StepId>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub order: Option<u32>,
    pub completed: bool,
    pub completed_date: Option<DateTime<Utc>>,
    pub saving: bool,
    pub button: StepButton,
}

impl StepView {
    pub fn matches(&self, step_id: &str) -> bool {
        self.id.as_ref().is_some_and(|id| id.matches(step_id))
    }

    /// Copy with a new completion flag and saving marker; button fields follow `completed`.
    pub fn with_completion(&self, completed: bool, saving: bool) -> Self {
        Self {
            completed,
            saving,
            button: StepButton::for_completion(completed),
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LessonView {
    pub id: Option<LessonId>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub completed_steps: u32,
    /// Absent when the snapshot did not report it; see [`LessonView::effective_total_steps`].
    pub total_steps: Option<u32>,
    pub completed: bool,
    pub steps: Vec<Arc<StepView>>,
    pub show_steps: bool,
    pub step_button_label: &'static str,
    pub icon_name: &'static str,
}

impl LessonView {
    pub fn matches(&self, lesson_id: &str) -> bool {
        self.id.as_ref().is_some_and(|id| id.matches(lesson_id))
    }

    pub fn step_index(&self, step_id: &str) -> Option<usize> {
        self.steps.iter().position(|step| step.matches(step_id))
    }

    pub fn effective_total_steps(&self) -> u32 {
        self.total_steps
            .unwrap_or_else(|| u32::try_from(self.steps.len()).unwrap_or(u32::MAX))
    }

    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .or_else(|| self.id.as_ref().map(LessonId::as_str))
            .unwrap_or("lesson")
    }

    pub fn with_steps_visible(&self, show_steps: bool) -> Self {
        Self {
            show_steps,
            step_button_label: if show_steps {
                HIDE_STEPS_LABEL
            } else {
                SHOW_STEPS_LABEL
            },
            icon_name: if show_steps {
                EXPANDED_ICON
            } else {
                COLLAPSED_ICON
            },
            ..self.clone()
        }
    }

    /// Copy with `steps[index]` replaced and counts re-established; `completed`
    /// is recomputed from the invariant unless `completed_override` is given.
    pub(crate) fn with_step(
        &self,
        index: usize,
        step: StepView,
        completed_steps: u32,
        total_steps: Option<u32>,
        completed_override: Option<bool>,
    ) -> Self {
        let mut steps = self.steps.clone();
        steps[index] = Arc::new(step);
        let mut next = Self {
            completed_steps,
            total_steps,
            steps,
            ..self.clone()
        };
        next.completed = completed_override
            .unwrap_or_else(|| lesson_is_completed(completed_steps, next.effective_total_steps()));
        next
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BadgeView {
    pub id: Option<BadgeId>,
    pub name: Option<String>,
    pub icon_name: String,
    pub badge_type: Option<String>,
    pub lesson_name: Option<String>,
    pub date: Option<NaiveDate>,
}

/// Immutable view-state published by [`crate::store::ProgressStore`].
#[derive(Debug, Clone, Default)]
pub struct ProgressState {
    /// Bumped on every (re)bind; consumers of a stale binding must not write.
    pub generation: u64,
    pub lessons: Vec<Arc<LessonView>>,
    pub badges: Vec<BadgeView>,
    pub lessons_error: Option<ProgressError>,
    pub badges_error: Option<ProgressError>,
    pub lessons_loaded: bool,
    pub badges_loaded: bool,
    /// Token of the outstanding confirmation per step. Survives snapshot
    /// replacement so a refreshed step cannot be toggled twice.
    pub pending_steps: HashMap<(LessonId, StepId), u64>,
    pub last_toggle_token: u64,
}

impl ProgressState {
    pub fn is_loading(&self) -> bool {
        !(self.lessons_loaded && self.badges_loaded)
    }

    pub fn has_lessons(&self) -> bool {
        !self.lessons.is_empty()
    }

    pub fn has_badges(&self) -> bool {
        !self.badges.is_empty()
    }

    pub fn lesson(&self, lesson_id: &str) -> Option<&Arc<LessonView>> {
        self.lessons.iter().find(|lesson| lesson.matches(lesson_id))
    }

    pub fn lesson_index(&self, lesson_id: &str) -> Option<usize> {
        self.lessons.iter().position(|lesson| lesson.matches(lesson_id))
    }

    /// `(completed_steps, total_steps)` for the lesson, if present.
    pub fn lesson_progress(&self, lesson_id: &str) -> Option<(u32, u32)> {
        self.lesson(lesson_id)
            .map(|lesson| (lesson.completed_steps, lesson.effective_total_steps()))
    }

    pub(crate) fn with_lesson(&self, index: usize, lesson: LessonView) -> Self {
        let mut lessons = self.lessons.clone();
        lessons[index] = Arc::new(lesson);
        Self {
            lessons,
            ..self.clone()
        }
    }
}
