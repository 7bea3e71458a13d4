use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::debug;

use super::config::LogConfig;
use super::task_queue::Control;

/// Periodic triggers for timestamping, archiving and cleaning.
///
/// A zero interval disables its trigger. The first tick fires one full
/// interval after start.
pub(crate) fn spawn_scheduler(config: &LogConfig, control: mpsc::Sender<Control>) -> JoinHandle<()> {
    let mut timestamping = ticker(config.timestamp_interval);
    let mut archiving = ticker(config.archive_interval);
    let mut cleaning = ticker(config.clean_interval);

    tokio::spawn(async move {
        loop {
            let command = tokio::select! {
                _ = tick(&mut timestamping) => Control::StartTimestamping(None),
                _ = tick(&mut archiving) => Control::StartArchiving(None),
                _ = tick(&mut cleaning) => Control::StartCleaning(None),
            };
            if control.send(command).await.is_err() {
                debug!("Scheduler stopped, task queue is gone");
                return;
            }
        }
    })
}

fn ticker(period: Duration) -> Option<Interval> {
    if period.is_zero() {
        return None;
    }
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    Some(interval)
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
