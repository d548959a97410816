//! Word game frame loop -- queues a few turns' worth of commands and lets a
//! 60 Hz driver drain them under a small budget.
//!
//! Run with:
//!   RUST_LOG=debug cargo run --example word_game_demo -p tempo-scheduler

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tempo_scheduler::prelude::*;

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// Checks a guess against the answer and records the attempt.
struct SubmitGuess {
    guess: String,
    answer: &'static str,
    attempts: Arc<AtomicU32>,
}

#[tempo_scheduler::tempo_command::async_trait]
impl Command for SubmitGuess {
    fn name(&self) -> &str {
        "submit_guess"
    }

    fn priority(&self) -> Priority {
        Priority::NORMAL
    }

    fn can_execute(&self) -> bool {
        self.attempts.load(Ordering::SeqCst) < 6
    }

    async fn execute(&self, cancel: &CancellationToken) -> Result<(), CommandError> {
        cancel.check()?;
        if self.guess.len() != self.answer.len() {
            return Err(CommandError::failed(format!(
                "'{}' has the wrong length",
                self.guess
            )));
        }
        // Dictionary lookup stands in for real async I/O.
        tokio::time::sleep(Duration::from_millis(2)).await;
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn on_complete(&self) {
        let hint: String = self
            .guess
            .chars()
            .zip(self.answer.chars())
            .map(|(g, a)| if g == a { g.to_ascii_uppercase() } else { '.' })
            .collect();
        println!("guess {:>6} -> {hint}", self.guess);
    }

    fn on_failed(&self, error: &CommandError) {
        println!("guess rejected: {error}");
    }
}

fn save(turn: u32) -> FnCommand {
    FnCommand::new("save", Priority::CRITICAL)
        .with_execute(move |cancel| async move {
            cancel.check()?;
            tokio::time::sleep(Duration::from_millis(1)).await;
            Ok(())
        })
        .with_on_complete(move || println!("turn {turn} saved"))
}

fn animate(tiles: u32) -> FnCommand {
    FnCommand::new("animate", Priority::NORMAL)
        .with_on_complete(move || println!("flipped {tiles} tiles"))
}

fn analytics(event: &'static str) -> FnCommand {
    FnCommand::new("analytics", Priority::BACKGROUND)
        .with_on_complete(move || println!("analytics event '{event}' sent"))
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let config = ProcessorConfig::from_json_str(r#"{ "max_commands_per_frame": 2 }"#)?;
    let queue = SharedCommandQueue::new();
    let processor = Arc::new(CommandProcessor::new(queue.clone(), config)?);
    let attempts = Arc::new(AtomicU32::new(0));

    for (turn, guess) in ["crane", "sla", "slate", "stale"].into_iter().enumerate() {
        queue.enqueue(SubmitGuess {
            guess: guess.to_owned(),
            answer: "stale",
            attempts: attempts.clone(),
        });
        queue.enqueue(animate(5));
        queue.enqueue(save(turn as u32 + 1));
        queue.enqueue(analytics("guess_submitted"));
    }

    println!("queued: {}", queue.total_commands_count());
    for info in queue.snapshot().iter().take(4) {
        println!("  #{:<3} {:<14} {}", info.sequence, info.name, info.priority);
    }

    processor.start();
    let (shutdown, driver) = TickDriver::with_rate(processor.clone(), 60)?.spawn();

    while queue.has_commands() {
        tokio::time::sleep(Duration::from_millis(16)).await;
    }
    processor.stop();
    shutdown.cancel();
    let ticks = driver.await?;

    let stats = processor.stats();
    println!(
        "{ticks} ticks: {} dispatched ({} completed, {} failed), {} skipped",
        stats.dispatched, stats.completed, stats.failed, stats.skipped
    );
    Ok(())
}
