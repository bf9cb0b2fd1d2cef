use crate::child::ChildOutcome;
use crate::sandbox::{Attempt, Exit};
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

/// Asks whether the task behind an attempt is still wanted
#[async_trait]
pub trait LivenessCheck: Send {
    async fn still_wanted(&mut self) -> bool;
}

/// Final state of a supervised attempt
#[derive(Debug, Clone, PartialEq)]
pub enum Supervision {
    Finished(ChildOutcome),
    Crashed(String),
    TimedOut(Duration),
    /// The coordinator no longer tracks the task; nothing is reported
    Abandoned,
}

#[derive(Debug, Clone)]
pub struct Supervisor {
    pub poll_interval: Duration,
    pub state_check_interval: Duration,
}

impl Supervisor {
    pub fn new(poll_interval: Duration, state_check_interval: Duration) -> Self {
        Supervisor {
            poll_interval,
            state_check_interval,
        }
    }

    /// Drive `attempt` until it ends, exceeds `max_time`, or is no longer wanted
    pub async fn watch<L: LivenessCheck + ?Sized>(
        &self,
        attempt: &mut Attempt,
        max_time: Duration,
        liveness: &mut L,
    ) -> Supervision {
        let started = Instant::now();
        let mut last_check = started;
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                exit = attempt.finished() => {
                    return match exit {
                        Exit::Outcome(outcome) => Supervision::Finished(outcome),
                        Exit::Crashed(detail) => Supervision::Crashed(detail),
                    };
                }
                _ = ticker.tick() => {
                    let elapsed = started.elapsed();
                    if elapsed > max_time {
                        attempt.stop().await;
                        return Supervision::TimedOut(elapsed);
                    }
                    if last_check.elapsed() >= self.state_check_interval {
                        last_check = Instant::now();
                        if !liveness.still_wanted().await {
                            debug!("Task no longer wanted after {:?}", elapsed);
                            attempt.stop().await;
                            return Supervision::Abandoned;
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::CapabilityRegistry;
    use crate::child::ChildRequest;
    use crate::sandbox::Sandbox;
    use fanout_core::CallArgs;
    use serde_json::json;
    use std::sync::Arc;

    struct Wanted {
        answer: bool,
        checks: usize,
    }

    #[async_trait]
    impl LivenessCheck for Wanted {
        async fn still_wanted(&mut self) -> bool {
            self.checks += 1;
            self.answer
        }
    }

    fn sandbox() -> Sandbox {
        let mut registry = CapabilityRegistry::new();
        registry
            .register("util.nap", |args: &CallArgs| {
                let ms: u64 = args.get(0, "ms").map_err(|e| e.message)?;
                std::thread::sleep(Duration::from_millis(ms));
                Ok(json!(ms))
            })
            .unwrap();
        Sandbox::Thread(Arc::new(registry))
    }

    async fn nap(ms: u64) -> Attempt {
        let request = ChildRequest {
            method: "util.nap".to_string(),
            args: CallArgs::positional(vec![json!(ms)]),
        };
        sandbox().start(request).await.unwrap()
    }

    fn supervisor() -> Supervisor {
        Supervisor::new(Duration::from_millis(10), Duration::from_millis(30))
    }

    #[tokio::test]
    async fn test_finished() {
        let mut attempt = nap(20).await;
        let mut liveness = Wanted { answer: true, checks: 0 };
        let outcome = supervisor()
            .watch(&mut attempt, Duration::from_secs(5), &mut liveness)
            .await;
        assert_eq!(outcome, Supervision::Finished(ChildOutcome::Ok(json!(20))));
    }

    #[tokio::test]
    async fn test_timed_out() {
        let mut attempt = nap(400).await;
        let mut liveness = Wanted { answer: true, checks: 0 };
        let outcome = supervisor()
            .watch(&mut attempt, Duration::from_millis(50), &mut liveness)
            .await;
        assert!(matches!(outcome, Supervision::TimedOut(elapsed) if elapsed > Duration::from_millis(50)));
    }

    #[tokio::test]
    async fn test_abandoned_when_no_longer_wanted() {
        let mut attempt = nap(400).await;
        let mut liveness = Wanted { answer: false, checks: 0 };
        let outcome = supervisor()
            .watch(&mut attempt, Duration::from_secs(5), &mut liveness)
            .await;
        assert_eq!(outcome, Supervision::Abandoned);
        assert_eq!(liveness.checks, 1);
    }

    #[tokio::test]
    async fn test_liveness_checked_periodically() {
        let mut attempt = nap(200).await;
        let mut liveness = Wanted { answer: true, checks: 0 };
        let outcome = supervisor()
            .watch(&mut attempt, Duration::from_secs(5), &mut liveness)
            .await;
        assert!(matches!(outcome, Supervision::Finished(_)));
        assert!(liveness.checks >= 2, "checked {} times", liveness.checks);
    }
}
