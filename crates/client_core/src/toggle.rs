use crate::types::ProgressState;

/// Flips `show_steps` (and its label and icon) on the lesson matching `lesson_id`.
/// Returns `None` when the event carried no identifier or nothing matched.
pub fn toggle_lesson_steps(state: &ProgressState, lesson_id: Option<&str>) -> Option<ProgressState> {
    let lesson_id = lesson_id.map(str::trim).filter(|id| !id.is_empty())?;
    let index = state.lesson_index(lesson_id)?;
    let lesson = &state.lessons[index];
    Some(state.with_lesson(index, lesson.with_steps_visible(!lesson.show_steps)))
}

#[cfg(test)]
#[path = "tests/toggle_tests.rs"]
mod tests;
