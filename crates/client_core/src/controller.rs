use std::sync::Arc;

use futures::StreamExt;
use shared::domain::StudentId;
use tokio::{sync::Mutex, task::JoinHandle};
use tracing::{debug, info};

use crate::{
    engine::{StepUpdateEngine, ToggleOutcome},
    error::SourceError,
    notify::Notifier,
    ports::{MissingStepCompletionService, ProgressSource, SnapshotStream, StepCompletionService},
    projection::{apply_badges_emission, apply_lessons_emission},
    store::ProgressStore,
    toggle::toggle_lesson_steps,
    types::ProgressState,
};

struct Binding {
    student_id: StudentId,
    lessons_task: JoinHandle<()>,
    badges_task: JoinHandle<()>,
}

impl Binding {
    fn abort(&self) {
        self.lessons_task.abort();
        self.badges_task.abort();
    }
}

pub struct ProgressController {
    store: ProgressStore,
    source: Arc<dyn ProgressSource>,
    engine: StepUpdateEngine,
    binding: Mutex<Option<Binding>>,
}

impl ProgressController {
    pub fn new(
        source: Arc<dyn ProgressSource>,
        service: Arc<dyn StepCompletionService>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let store = ProgressStore::default();
        let engine = StepUpdateEngine::new(store.clone(), service, notifier);
        Self {
            store,
            source,
            engine,
            binding: Mutex::new(None),
        }
    }

    /// Controller whose step toggles always roll back.
    pub fn read_only(source: Arc<dyn ProgressSource>, notifier: Arc<dyn Notifier>) -> Self {
        Self::new(source, Arc::new(MissingStepCompletionService), notifier)
    }

    pub fn store(&self) -> &ProgressStore {
        &self.store
    }

    pub fn state(&self) -> Arc<ProgressState> {
        self.store.snapshot()
    }

    pub async fn bound_student(&self) -> Option<StudentId> {
        self.binding
            .lock()
            .await
            .as_ref()
            .map(|binding| binding.student_id.clone())
    }

    /// Subscribes both channels for `student_id`. Rebinding the current key is a no-op;
    /// any other key tears down the previous subscriptions and resets to loading.
    pub async fn bind(&self, student_id: StudentId) {
        let mut binding = self.binding.lock().await;
        if binding
            .as_ref()
            .is_some_and(|current| current.student_id == student_id)
        {
            debug!(student_id = %student_id, "already bound");
            return;
        }
        if let Some(previous) = binding.take() {
            previous.abort();
        }

        let mut generation = 0;
        self.store.update(|state| {
            generation = state.generation.wrapping_add(1);
            Some(ProgressState {
                generation,
                last_toggle_token: state.last_toggle_token,
                ..ProgressState::default()
            })
        });

        info!(student_id = %student_id, generation, "binding progress view");
        let lessons_task = tokio::spawn(consume(
            self.store.clone(),
            generation,
            self.source.lessons(&student_id),
            apply_lessons_emission,
        ));
        let badges_task = tokio::spawn(consume(
            self.store.clone(),
            generation,
            self.source.badges(&student_id),
            apply_badges_emission,
        ));
        *binding = Some(Binding {
            student_id,
            lessons_task,
            badges_task,
        });
    }

    /// Stops consuming the read channels. The last state stays visible.
    pub async fn unbind(&self) {
        if let Some(previous) = self.binding.lock().await.take() {
            previous.abort();
            debug!(student_id = %previous.student_id, "progress view unbound");
        }
    }

    /// Resolves once both channels have emitted for the current binding.
    pub async fn loaded(&self) -> Arc<ProgressState> {
        let mut rx = self.store.subscribe();
        let ready = rx.wait_for(|state| !state.is_loading()).await;
        match ready {
            Ok(state) => state.clone(),
            Err(_) => self.store.snapshot(),
        }
    }

    pub fn toggle_lesson_steps(&self, lesson_id: Option<&str>) -> bool {
        self.store.update(|state| toggle_lesson_steps(state, lesson_id))
    }

    pub async fn toggle_step(&self, lesson_id: &str, step_id: &str) -> ToggleOutcome {
        self.engine.toggle_step(lesson_id, step_id).await
    }
}

impl Drop for ProgressController {
    fn drop(&mut self) {
        if let Some(binding) = self.binding.get_mut().take() {
            binding.abort();
        }
    }
}

async fn consume<T, F>(
    store: ProgressStore,
    generation: u64,
    mut snapshots: SnapshotStream<T>,
    apply: F,
) where
    T: Send + 'static,
    F: Fn(&ProgressState, Result<Vec<T>, SourceError>) -> ProgressState + Send + 'static,
{
    while let Some(emission) = snapshots.next().await {
        let applied = store.update(|state| {
            (state.generation == generation).then(|| apply(state, emission))
        });
        if !applied {
            debug!(generation, "emission from a superseded binding dropped");
            break;
        }
    }
}

#[cfg(test)]
#[path = "tests/controller_tests.rs"]
mod tests;
