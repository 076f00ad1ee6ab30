use std::{collections::HashSet, sync::Arc};

use shared::protocol::{BadgeRecord, LessonRecord, StepRecord};
use tracing::warn;

use crate::{
    error::{ProgressError, ProjectionError, SourceError},
    types::{
        lesson_is_completed, BadgeView, LessonView, ProgressState, StepButton, StepView,
        COLLAPSED_ICON, DEFAULT_BADGE_ICON, SHOW_STEPS_LABEL,
    },
};

pub fn project_step(record: &StepRecord) -> StepView {
    StepView {
        id: record.id.clone(),
        name: record.name.clone(),
        description: record.description.clone(),
        order: record.order,
        completed: record.completed,
        completed_date: record.completed_date,
        saving: false,
        button: StepButton::for_completion(record.completed),
    }
}

pub fn project_lesson(record: &LessonRecord) -> Result<LessonView, ProjectionError> {
    let label = lesson_label(record);
    let mut seen = HashSet::new();
    let mut steps = Vec::with_capacity(record.steps.len());
    for (position, step) in record.steps.iter().enumerate() {
        match &step.id {
            Some(id) => {
                if !seen.insert(id.as_str().trim()) {
                    return Err(ProjectionError::DuplicateStep {
                        lesson: label,
                        step: id.clone(),
                    });
                }
            }
            None => warn!(lesson = %label, position, "step record without identifier"),
        }
        steps.push(Arc::new(project_step(step)));
    }

    let completed_steps = record.completed_steps.unwrap_or_else(|| {
        u32::try_from(steps.iter().filter(|step| step.completed).count()).unwrap_or(u32::MAX)
    });

    let mut lesson = LessonView {
        id: record.id.clone(),
        name: record.name.clone(),
        description: record.description.clone(),
        completed_steps,
        total_steps: record.total_steps,
        completed: false,
        steps,
        show_steps: false,
        step_button_label: SHOW_STEPS_LABEL,
        icon_name: COLLAPSED_ICON,
    };

    let total = lesson.effective_total_steps();
    if completed_steps > total {
        warn!(
            lesson = %label,
            completed = completed_steps,
            total,
            "lesson reports more completed steps than it has"
        );
    }

    lesson.completed = lesson_is_completed(completed_steps, total);
    if let Some(reported) = record.completed {
        if reported != lesson.completed {
            warn!(
                lesson = %label,
                reported,
                derived = lesson.completed,
                "lesson completion flag disagrees with its step counts; using counts"
            );
        }
    }
    Ok(lesson)
}

pub fn project_lessons(records: &[LessonRecord]) -> Result<Vec<Arc<LessonView>>, ProjectionError> {
    records
        .iter()
        .enumerate()
        .map(|(position, record)| {
            if record.id.is_none() {
                warn!(position, "lesson record without identifier");
            }
            project_lesson(record).map(Arc::new)
        })
        .collect()
}

pub fn project_badge(record: &BadgeRecord) -> BadgeView {
    BadgeView {
        id: record.id.clone(),
        name: record.name.clone(),
        icon_name: record
            .icon_name
            .as_deref()
            .map(str::trim)
            .filter(|icon| !icon.is_empty())
            .unwrap_or(DEFAULT_BADGE_ICON)
            .to_string(),
        badge_type: record.badge_type.clone(),
        lesson_name: record.lesson.as_ref().and_then(|lesson| lesson.name.clone()),
        date: record.date,
    }
}

pub fn project_badges(records: &[BadgeRecord]) -> Vec<BadgeView> {
    records
        .iter()
        .enumerate()
        .map(|(position, record)| {
            if record.id.is_none() {
                warn!(position, "badge record without identifier");
            }
            project_badge(record)
        })
        .collect()
}

/// Folds one lessons-channel emission into the state. Badges are untouched.
pub fn apply_lessons_emission(
    state: &ProgressState,
    emission: Result<Vec<LessonRecord>, SourceError>,
) -> ProgressState {
    let outcome = emission
        .map_err(ProgressError::from)
        .and_then(|records| project_lessons(&records).map_err(ProgressError::from));
    let (lessons, lessons_error) = match outcome {
        Ok(lessons) => (lessons, None),
        Err(err) => {
            warn!(error = %err, "lessons unavailable; clearing collection");
            (Vec::new(), Some(err))
        }
    };
    ProgressState {
        lessons,
        lessons_error,
        lessons_loaded: true,
        ..state.clone()
    }
}

/// Folds one badges-channel emission into the state. Lessons are untouched.
pub fn apply_badges_emission(
    state: &ProgressState,
    emission: Result<Vec<BadgeRecord>, SourceError>,
) -> ProgressState {
    let (badges, badges_error) = match emission {
        Ok(records) => (project_badges(&records), None),
        Err(err) => {
            warn!(error = %err, "badges unavailable; clearing collection");
            (Vec::new(), Some(ProgressError::from(err)))
        }
    };
    ProgressState {
        badges,
        badges_error,
        badges_loaded: true,
        ..state.clone()
    }
}

fn lesson_label(record: &LessonRecord) -> String {
    record
        .id
        .as_ref()
        .map(|id| id.to_string())
        .or_else(|| record.name.clone())
        .unwrap_or_else(|| "<unidentified>".to_string())
}

#[cfg(test)]
#[path = "tests/projection_tests.rs"]
mod tests;
