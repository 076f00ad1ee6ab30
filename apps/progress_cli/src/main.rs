use std::{path::PathBuf, sync::Arc};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use client_core::{
    BroadcastNotifier, HttpProgressClient, ProgressController, ProgressState, ToggleOutcome,
    ToggleRejection,
};
use shared::domain::StudentId;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;

use config::load_settings;

#[derive(Parser, Debug)]
#[command(about = "Inspect and update a student's lesson progress")]
struct Args {
    #[arg(long)]
    server_url: Option<String>,
    #[arg(long)]
    student: Option<String>,
    #[arg(long)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print lessons, steps and badges.
    Show,
    /// Toggle a step's completion and report the outcome.
    Complete {
        #[arg(long)]
        lesson: String,
        #[arg(long)]
        step: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args = Args::parse();

    let mut settings = load_settings(args.config.as_deref())?;
    if let Some(server_url) = args.server_url {
        settings.server_url = server_url;
    }
    if let Some(student) = args.student {
        settings.student_id = Some(student);
    }
    let student_id = settings
        .student_id
        .clone()
        .context("no student configured; pass --student or set APP__STUDENT_ID")?;

    let client = Arc::new(
        HttpProgressClient::new(&settings.server_url)?
            .with_poll_interval(settings.poll_interval())
            .with_request_timeout(settings.request_timeout())?,
    );
    let notifier = Arc::new(BroadcastNotifier::default());
    let mut notifications = notifier.subscribe();
    let controller = ProgressController::new(client.clone(), client, notifier);

    info!(server_url = %settings.server_url, student_id = %student_id, "loading progress");
    controller.bind(StudentId::new(student_id)).await;
    let state = tokio::time::timeout(settings.request_timeout(), controller.loaded())
        .await
        .context("timed out waiting for progress data")?;

    match args.command {
        Command::Show => print_state(&state),
        Command::Complete { lesson, step } => {
            match controller.toggle_step(&lesson, &step).await {
                ToggleOutcome::Rejected(ToggleRejection::NotFound) => {
                    bail!("no step '{step}' in lesson '{lesson}'")
                }
                ToggleOutcome::Rejected(ToggleRejection::AlreadySaving) => {
                    bail!("step '{step}' is already being saved")
                }
                ToggleOutcome::Confirmed { .. } | ToggleOutcome::RolledBack { .. } => {}
            }
            while let Ok(notification) = notifications.try_recv() {
                println!(
                    "[{}] {}: {}",
                    notification.variant.as_str(),
                    notification.title,
                    notification.message
                );
            }
            if let Some((done, total)) = controller.state().lesson_progress(&lesson) {
                println!("{lesson}: {done}/{total} steps completed");
            }
        }
    }

    Ok(())
}

fn print_state(state: &ProgressState) {
    if let Some(err) = &state.lessons_error {
        println!("Lessons unavailable: {}", err.display_message());
    }
    for lesson in &state.lessons {
        let marker = if lesson.completed { "x" } else { " " };
        println!(
            "[{marker}] {} ({}/{})",
            lesson.display_name(),
            lesson.completed_steps,
            lesson.effective_total_steps()
        );
        for step in &lesson.steps {
            println!(
                "      {:<40} {}",
                step.name.as_deref().unwrap_or("(unnamed step)"),
                step.button.label
            );
        }
    }

    if let Some(err) = &state.badges_error {
        println!("Badges unavailable: {}", err.display_message());
    }
    for badge in &state.badges {
        println!(
            "<{}> {} {}",
            badge.icon_name,
            badge.name.as_deref().unwrap_or("(unnamed badge)"),
            badge.lesson_name.as_deref().unwrap_or_default()
        );
    }
}
