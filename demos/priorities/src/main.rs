use std::{str::FromStr, time::Duration};

use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use hopper::prelude::*;

#[tokio::main]
pub async fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let config = SchedulerConfig::builder()
        .with_max_concurrent_jobs(1)
        .with_queue_polling_rate(TimeDelta::milliseconds(50))
        .with_retry_backoff(
            Backoff::exponential(TimeDelta::milliseconds(200)).with_max(TimeDelta::seconds(2)),
        )
        .build()
        .unwrap();
    let scheduler = Scheduler::new(config);

    // Keep the only slot busy so the three reports below compete on priority.
    scheduler
        .schedule_job(Report::new("warm up", 500), ScheduleOptions::new())
        .unwrap();
    for (name, priority) in [
        ("low priority report", Priority::Low),
        ("medium priority report", Priority::Medium),
        ("high priority report", Priority::High),
    ] {
        let record = scheduler
            .schedule_job(Report::new(name, 100), ScheduleOptions::from_priority(priority))
            .unwrap();
        println!("Scheduled {name} as {}", record.id());
    }

    let flaky = scheduler
        .schedule::<Flaky>(ScheduleOptions::from_delay(TimeDelta::seconds(1)).with_max_retries(2))
        .unwrap();

    let heartbeat = scheduler
        .schedule_recurrent::<Heartbeat>(RecurrentScheduleOptions::cron(
            cron::Schedule::from_str("*/2 * * * * *").unwrap(),
        ))
        .unwrap();

    let now = Utc::now();
    scheduler
        .schedule_calendar::<Heartbeat>(CalendarScheduleOptions::with_dates([
            now + TimeDelta::seconds(3),
            now + TimeDelta::seconds(5),
        ]))
        .unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    let snapshot = scheduler.snapshot();
    println!(
        "{} jobs scheduled, {} enqueued, {} running",
        snapshot.scheduled.len(),
        snapshot.enqueued.len(),
        snapshot.running.len()
    );

    let state = scheduler.wait_job(&flaky).await;
    println!(
        "{} finished as {state} after {} retries: {:?}",
        flaky.id(),
        flaky.retry_count(),
        flaky.errors()
    );

    tokio::time::sleep(Duration::from_secs(6)).await;
    // The heartbeat cannot be cancelled while it runs.
    while let Err(error) = scheduler.cancel_job(&heartbeat) {
        println!("Retrying cancellation of {}: {error}", heartbeat.id());
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    scheduler.wait_all_jobs().await;
    scheduler.graceful_shutdown().await.unwrap();
}

struct Report {
    name: &'static str,
    duration: Duration,
}

impl Report {
    fn new(name: &'static str, millis: u64) -> Self {
        Self {
            name,
            duration: Duration::from_millis(millis),
        }
    }
}

#[async_trait]
impl Job for Report {
    async fn perform(&self) -> ExecutionResult {
        println!("Generating {}", self.name);
        tokio::time::sleep(self.duration).await;
        ExecutionResult::Done
    }
}

#[derive(Default)]
struct Heartbeat;

#[async_trait]
impl Job for Heartbeat {
    fn priority() -> Priority {
        Priority::High
    }

    async fn perform(&self) -> ExecutionResult {
        println!("Heartbeat at {}", Utc::now());
        ExecutionResult::Done
    }
}

#[derive(Default)]
struct Flaky;

#[derive(Debug)]
struct Unavailable;

impl std::fmt::Display for Unavailable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "upstream unavailable")
    }
}

impl std::error::Error for Unavailable {}

impl ExecutionError for Unavailable {
    fn error_type(&self) -> &'static str {
        "unavailable"
    }
}

#[async_trait]
impl Job for Flaky {
    async fn perform(&self) -> ExecutionResult {
        Unavailable.into()
    }
}
