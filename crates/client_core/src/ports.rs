use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use shared::{
    domain::StudentId,
    protocol::{BadgeRecord, CompleteStepRequest, CompleteStepResult, LessonRecord},
};

use crate::error::{CompleteStepError, SourceError};

/// Stream of snapshots for one key; each item replaces the previous one wholesale.
pub type SnapshotStream<T> = BoxStream<'static, Result<Vec<T>, SourceError>>;

pub trait ProgressSource: Send + Sync {
    fn lessons(&self, student_id: &StudentId) -> SnapshotStream<LessonRecord>;
    fn badges(&self, student_id: &StudentId) -> SnapshotStream<BadgeRecord>;
}

#[async_trait]
pub trait StepCompletionService: Send + Sync {
    async fn complete_step(
        &self,
        request: CompleteStepRequest,
    ) -> Result<CompleteStepResult, CompleteStepError>;
}

/// Source that never emits; a bound controller stays in its loading state.
pub struct MissingProgressSource;

impl ProgressSource for MissingProgressSource {
    fn lessons(&self, _student_id: &StudentId) -> SnapshotStream<LessonRecord> {
        Box::pin(stream::pending())
    }

    fn badges(&self, _student_id: &StudentId) -> SnapshotStream<BadgeRecord> {
        Box::pin(stream::pending())
    }
}

pub struct MissingStepCompletionService;

#[async_trait]
impl StepCompletionService for MissingStepCompletionService {
    async fn complete_step(
        &self,
        _request: CompleteStepRequest,
    ) -> Result<CompleteStepResult, CompleteStepError> {
        Err(CompleteStepError::Unavailable)
    }
}
