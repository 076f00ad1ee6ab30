use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use shared::error::{ApiError, ErrorCode};
use tokio::sync::{oneshot, Mutex};

use super::*;
use crate::{
    notify::NotificationVariant,
    ports::MissingStepCompletionService,
    projection::apply_lessons_emission,
    test_fixtures::{assert_invariant, loaded_state, records},
};

type Reply = Result<CompleteStepResult, CompleteStepError>;

/// Holds each call open until the test releases it through the paired sender.
struct GatedService {
    gates: Mutex<Vec<oneshot::Receiver<Reply>>>,
    requests: StdMutex<Vec<CompleteStepRequest>>,
}

impl GatedService {
    fn new() -> (Arc<Self>, oneshot::Sender<Reply>) {
        let (tx, rx) = oneshot::channel();
        let service = Arc::new(Self {
            gates: Mutex::new(vec![rx]),
            requests: StdMutex::new(Vec::new()),
        });
        (service, tx)
    }

    fn requests(&self) -> Vec<CompleteStepRequest> {
        self.requests.lock().expect("requests lock").clone()
    }
}

#[async_trait]
impl StepCompletionService for GatedService {
    async fn complete_step(&self, request: CompleteStepRequest) -> Reply {
        self.requests.lock().expect("requests lock").push(request);
        let gate = self.gates.lock().await.pop();
        match gate {
            Some(rx) => rx.await.unwrap_or(Err(CompleteStepError::Unavailable)),
            None => Err(CompleteStepError::Unavailable),
        }
    }
}

struct FixedService(Reply);

#[async_trait]
impl StepCompletionService for FixedService {
    async fn complete_step(&self, _request: CompleteStepRequest) -> Reply {
        self.0.clone()
    }
}

#[derive(Default)]
struct RecordingNotifier {
    sent: StdMutex<Vec<Notification>>,
}

impl RecordingNotifier {
    fn sent(&self) -> Vec<Notification> {
        self.sent.lock().expect("notifier lock").clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: Notification) {
        self.sent.lock().expect("notifier lock").push(notification);
    }
}

fn engine_with(
    service: Arc<dyn StepCompletionService>,
) -> (StepUpdateEngine, Arc<RecordingNotifier>) {
    let notifier = Arc::new(RecordingNotifier::default());
    let engine = StepUpdateEngine::new(
        ProgressStore::new(loaded_state()),
        service,
        notifier.clone(),
    );
    (engine, notifier)
}

fn full_result() -> CompleteStepResult {
    CompleteStepResult {
        completed: Some(true),
        completed_date: None,
        completed_steps: Some(2),
        total_steps: Some(2),
        lesson_completed: Some(true),
    }
}

#[test]
fn optimistic_apply_flips_step_and_counts() {
    let state = loaded_state();
    let (next, pending) = apply_optimistic(&state, "L1", "S1").expect("applies");

    let l1 = &next.lessons[0];
    let s1 = &l1.steps[0];
    assert!(s1.completed);
    assert!(s1.saving);
    assert_eq!(s1.button.label, "Completed");
    assert_eq!(l1.completed_steps, 2);
    assert!(l1.completed);
    assert_eq!(
        pending,
        PendingToggle {
            lesson_id: "L1".into(),
            step_id: "S1".into(),
            from: false,
            to: true,
            token: 1,
        }
    );
    assert_eq!(next.pending_steps.get(&("L1".into(), "S1".into())), Some(&1));
    assert_invariant(&next);
}

#[test]
fn optimistic_uncomplete_decrements() {
    let state = loaded_state();
    let (next, pending) = apply_optimistic(&state, "L1", "S2").expect("applies");
    assert!(!pending.to);
    assert_eq!(next.lessons[0].completed_steps, 0);
    assert!(!next.lessons[0].steps[1].completed);
    assert!(!next.lessons[0].completed);
}

#[test]
fn optimistic_apply_shares_untouched_entries() {
    let state = loaded_state();
    let (next, _) = apply_optimistic(&state, "L1", "S1").expect("applies");
    assert!(Arc::ptr_eq(&state.lessons[1], &next.lessons[1]));
    assert!(Arc::ptr_eq(&state.lessons[0].steps[1], &next.lessons[0].steps[1]));
    assert!(!Arc::ptr_eq(&state.lessons[0], &next.lessons[0]));
}

#[test]
fn optimistic_apply_keeps_reported_total() {
    let mut state = loaded_state();
    let mut l1 = (*state.lessons[0]).clone();
    l1.total_steps = Some(5);
    l1.completed = false;
    state = state.with_lesson(0, l1);

    let (next, _) = apply_optimistic(&state, "L1", "S1").expect("applies");
    assert_eq!(next.lessons[0].completed_steps, 2);
    assert_eq!(next.lessons[0].total_steps, Some(5));
    assert!(!next.lessons[0].completed);
}

#[test]
fn second_toggle_on_saving_step_is_rejected() {
    let state = loaded_state();
    let (next, _) = apply_optimistic(&state, "L1", "S1").expect("applies");
    assert_eq!(
        apply_optimistic(&next, "L1", "S1").expect_err("saving"),
        ToggleRejection::AlreadySaving
    );
    assert!(apply_optimistic(&next, "L2", "S3").is_ok());
}

#[test]
fn unknown_ids_are_rejected() {
    let state = loaded_state();
    assert_eq!(
        apply_optimistic(&state, "L9", "S1").expect_err("lesson"),
        ToggleRejection::NotFound
    );
    assert_eq!(
        apply_optimistic(&state, "L1", "S3").expect_err("step belongs to L2"),
        ToggleRejection::NotFound
    );
}

#[test]
fn rollback_restores_exact_pre_toggle_values() {
    let state = loaded_state();
    let (optimistic, pending) = apply_optimistic(&state, "L1", "S1").expect("applies");

    let restored = rollback(&optimistic, &pending).expect("step present");

    assert_eq!(*restored.lessons[0], *state.lessons[0]);
    assert!(Arc::ptr_eq(&state.lessons[1], &restored.lessons[1]));
    assert_invariant(&restored);
}

#[test]
fn rollback_after_snapshot_replacement_does_not_double_correct() {
    let state = loaded_state();
    let (optimistic, pending) = apply_optimistic(&state, "L1", "S1").expect("applies");

    // a fresh snapshot already shows S1 open and 1/2
    let replaced = ProgressState {
        lessons: state.lessons.clone(),
        ..optimistic
    };
    let restored = rollback(&replaced, &pending).expect("token held");

    assert_eq!(restored.lessons[0].completed_steps, 1);
    assert!(!restored.lessons[0].steps[0].completed);
    assert!(!restored.lessons[0].steps[0].saving);
}

#[test]
fn server_counts_take_precedence() {
    let state = loaded_state();
    let (optimistic, pending) = apply_optimistic(&state, "L1", "S1").expect("applies");
    let result = CompleteStepResult {
        completed: Some(true),
        completed_steps: Some(5),
        total_steps: Some(7),
        ..CompleteStepResult::default()
    };

    let next = reconcile(&optimistic, &pending, &result).expect("step present");

    let l1 = &next.lessons[0];
    assert_eq!(l1.completed_steps, 5);
    assert_eq!(l1.total_steps, Some(7));
    assert!(!l1.completed);
    assert!(!l1.steps[0].saving);
    assert_invariant(&next);
}

#[test]
fn lesson_completed_from_server_is_taken_verbatim() {
    let state = loaded_state();
    let (optimistic, pending) = apply_optimistic(&state, "L1", "S1").expect("applies");
    assert!(optimistic.lessons[0].completed);
    let result = CompleteStepResult {
        lesson_completed: Some(false),
        ..CompleteStepResult::default()
    };
    let next = reconcile(&optimistic, &pending, &result).expect("step present");
    assert!(!next.lessons[0].completed);
}

#[test]
fn empty_result_keeps_local_values() {
    let state = loaded_state();
    let (optimistic, pending) = apply_optimistic(&state, "L1", "S1").expect("applies");

    let next = reconcile(&optimistic, &pending, &CompleteStepResult::default())
        .expect("step present");

    let l1 = &next.lessons[0];
    assert!(l1.steps[0].completed);
    assert!(!l1.steps[0].saving);
    assert_eq!(l1.completed_steps, 2);
    assert_eq!(l1.total_steps, Some(2));
    assert!(l1.completed);
}

#[test]
fn server_refusing_completion_without_counts_corrects_local_count() {
    let state = loaded_state();
    let (optimistic, pending) = apply_optimistic(&state, "L1", "S1").expect("applies");
    let result = CompleteStepResult {
        completed: Some(false),
        ..CompleteStepResult::default()
    };

    let next = reconcile(&optimistic, &pending, &result).expect("step present");

    assert!(!next.lessons[0].steps[0].completed);
    assert_eq!(next.lessons[0].steps[0].button.label, "Complete step");
    assert_eq!(next.lessons[0].completed_steps, 1);
    assert_invariant(&next);
}

#[test]
fn completed_date_is_overwritten_only_when_reported() {
    let state = loaded_state();
    let (optimistic, pending) = apply_optimistic(&state, "L1", "S1").expect("applies");
    let when = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();

    let dated = reconcile(
        &optimistic,
        &pending,
        &CompleteStepResult {
            completed_date: Some(when),
            ..full_result()
        },
    )
    .expect("step present");
    assert_eq!(dated.lessons[0].steps[0].completed_date, Some(when));

    let (again, pending) = apply_optimistic(&dated, "L1", "S1").expect("applies");
    let kept = reconcile(&again, &pending, &CompleteStepResult::default()).expect("present");
    assert_eq!(kept.lessons[0].steps[0].completed_date, Some(when));
}

#[test]
fn reconciliation_against_snapshot_without_the_step_only_releases_the_token() {
    let state = loaded_state();
    let (optimistic, pending) = apply_optimistic(&state, "L1", "S1").expect("applies");
    let replaced = ProgressState {
        lessons: vec![state.lessons[1].clone()],
        ..optimistic
    };

    for next in [
        reconcile(&replaced, &pending, &full_result()).expect("token held"),
        rollback(&replaced, &pending).expect("token held"),
    ] {
        assert!(next.pending_steps.is_empty());
        assert_eq!(next.lessons, replaced.lessons);
    }
}

#[test]
fn superseded_token_makes_resolution_a_no_op() {
    let state = loaded_state();
    let (optimistic, stale) = apply_optimistic(&state, "L1", "S1").expect("applies");
    let mut newer = optimistic.clone();
    newer.pending_steps.insert(("L1".into(), "S1".into()), stale.token + 1);

    assert!(reconcile(&newer, &stale, &full_result()).is_none());
    assert!(rollback(&newer, &stale).is_none());
    assert!(reconcile(&state, &stale, &full_result()).is_none());
}

#[test]
fn refreshed_snapshot_keeps_the_step_gated() {
    let state = loaded_state();
    let (optimistic, pending) = apply_optimistic(&state, "L1", "S1").expect("applies");

    // the refreshed record no longer carries the saving flag
    let refreshed = apply_lessons_emission(&optimistic, Ok(records()));
    assert!(!refreshed.lessons[0].steps[0].saving);

    assert_eq!(
        apply_optimistic(&refreshed, "L1", "S1").map(|(_, p)| p),
        Err(ToggleRejection::AlreadySaving)
    );
    let settled = reconcile(&refreshed, &pending, &full_result()).expect("token held");
    let (_, next) = apply_optimistic(&settled, "L1", "S1").expect("gate released");
    assert_eq!(next.token, pending.token + 1);
}

#[tokio::test]
async fn scenario_a_optimistic_then_confirmed() {
    let (service, release) = GatedService::new();
    let (engine, notifier) = engine_with(service.clone());
    let mut rx = engine.store().subscribe();

    let task = tokio::spawn({
        let engine = engine.clone();
        async move { engine.toggle_step("L1", "S1").await }
    });

    {
        let optimistic = rx
            .wait_for(|state| state.lessons[0].steps[0].saving)
            .await
            .expect("store alive");
        let l1 = &optimistic.lessons[0];
        assert!(l1.steps[0].completed);
        assert_eq!(l1.completed_steps, 2);
        assert!(l1.completed);
    }

    release.send(Ok(full_result())).expect("engine waiting");
    let outcome = task.await.expect("join");

    assert_eq!(outcome, ToggleOutcome::Confirmed { completed: true });
    let state = engine.store().snapshot();
    let l1 = &state.lessons[0];
    assert!(!l1.steps[0].saving);
    assert!(l1.steps[0].completed);
    assert!(l1.completed);
    assert_eq!(
        service.requests(),
        vec![CompleteStepRequest {
            lesson_id: "L1".into(),
            step_id: "S1".into(),
            completed: true,
        }]
    );

    let sent = notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].variant, NotificationVariant::Success);
    assert_eq!(sent[0].title, SUCCESS_TITLE);
    assert!(sent[0].message.contains("L1"));
}

#[tokio::test]
async fn scenario_b_failure_rolls_back() {
    let (engine, notifier) = engine_with(Arc::new(FixedService(Err(
        CompleteStepError::Transport("connection refused".into()),
    ))));

    let outcome = engine.toggle_step("L1", "S1").await;

    assert!(matches!(outcome, ToggleOutcome::RolledBack { .. }));
    let state = engine.store().snapshot();
    let l1 = &state.lessons[0];
    assert!(!l1.steps[0].completed);
    assert!(!l1.steps[0].saving);
    assert_eq!(l1.completed_steps, 1);
    assert!(!l1.completed);
    assert_eq!(**l1, *loaded_state().lessons[0]);

    let sent = notifier.sent();
    assert_eq!(
        sent,
        vec![Notification::error(FAILURE_TITLE, "Could not update step")]
    );
}

#[tokio::test]
async fn failure_notification_carries_server_message() {
    let (engine, notifier) = engine_with(Arc::new(FixedService(Err(CompleteStepError::Api(
        ApiError::new(ErrorCode::Validation, "Step is locked until tomorrow"),
    )))));

    engine.toggle_step("L2", "S3").await;

    assert_eq!(notifier.sent()[0].message, "Step is locked until tomorrow");
    assert_eq!(engine.store().snapshot().lessons[1].completed_steps, 0);
}

#[tokio::test]
async fn toggle_while_saving_issues_no_second_call() {
    let (service, release) = GatedService::new();
    let (engine, notifier) = engine_with(service.clone());
    let mut rx = engine.store().subscribe();

    let task = tokio::spawn({
        let engine = engine.clone();
        async move { engine.toggle_step("L1", "S1").await }
    });
    rx.wait_for(|state| state.lessons[0].steps[0].saving)
        .await
        .expect("store alive");

    let second = engine.toggle_step("L1", "S1").await;
    assert_eq!(
        second,
        ToggleOutcome::Rejected(ToggleRejection::AlreadySaving)
    );
    assert_eq!(engine.store().snapshot().lessons[0].completed_steps, 2);

    release.send(Ok(full_result())).expect("engine waiting");
    task.await.expect("join");
    assert_eq!(service.requests().len(), 1);
    assert_eq!(notifier.sent().len(), 1);
}

#[tokio::test]
async fn unknown_step_issues_no_remote_call() {
    let (service, _release) = GatedService::new();
    let (engine, notifier) = engine_with(service.clone());

    let outcome = engine.toggle_step("L1", "missing").await;

    assert_eq!(outcome, ToggleOutcome::Rejected(ToggleRejection::NotFound));
    assert!(service.requests().is_empty());
    assert!(notifier.sent().is_empty());
}

#[tokio::test]
async fn unavailable_service_rolls_back_with_fallback_message() {
    let (engine, notifier) = engine_with(Arc::new(MissingStepCompletionService));

    let outcome = engine.toggle_step("L1", "S2").await;

    assert_eq!(
        outcome,
        ToggleOutcome::RolledBack {
            error: CompleteStepError::Unavailable
        }
    );
    assert!(engine.store().snapshot().lessons[0].steps[1].completed);
    assert_eq!(notifier.sent()[0].message, "Could not update step");
}

#[tokio::test]
async fn snapshot_replaced_mid_flight_reconciles_against_new_objects() {
    let (service, release) = GatedService::new();
    let (engine, _notifier) = engine_with(service);
    let mut rx = engine.store().subscribe();

    let task = tokio::spawn({
        let engine = engine.clone();
        async move { engine.toggle_step("L1", "S1").await }
    });
    rx.wait_for(|state| state.lessons[0].steps[0].saving)
        .await
        .expect("store alive");

    engine
        .store()
        .update(|state| Some(apply_lessons_emission(state, Ok(records()))));
    release.send(Ok(full_result())).expect("engine waiting");
    task.await.expect("join");

    let state = engine.store().snapshot();
    assert!(state.lessons[0].steps[0].completed);
    assert!(!state.lessons[0].steps[0].saving);
    assert_eq!(state.lessons[0].completed_steps, 2);
    assert!(state.pending_steps.is_empty());
    assert_invariant(&state);
}

#[tokio::test]
async fn toggle_after_mid_flight_snapshot_issues_no_second_call() {
    let (service, release) = GatedService::new();
    let (engine, notifier) = engine_with(service.clone());
    let mut rx = engine.store().subscribe();

    let task = tokio::spawn({
        let engine = engine.clone();
        async move { engine.toggle_step("L1", "S1").await }
    });
    rx.wait_for(|state| state.lessons[0].steps[0].saving)
        .await
        .expect("store alive");

    engine
        .store()
        .update(|state| Some(apply_lessons_emission(state, Ok(records()))));
    assert!(!engine.store().snapshot().lessons[0].steps[0].saving);

    let second = engine.toggle_step("L1", "S1").await;
    assert_eq!(
        second,
        ToggleOutcome::Rejected(ToggleRejection::AlreadySaving)
    );

    release.send(Ok(full_result())).expect("engine waiting");
    assert_eq!(
        task.await.expect("join"),
        ToggleOutcome::Confirmed { completed: true }
    );
    assert_eq!(service.requests().len(), 1);
    assert_eq!(notifier.sent().len(), 1);

    let state = engine.store().snapshot();
    assert!(state.lessons[0].steps[0].completed);
    assert_eq!(state.lessons[0].completed_steps, 2);
    assert_invariant(&state);
}
