//! Retry loop driven by an erased schedule

use super::fiber::Fiber;
use super::interpreter::eval;
use crate::effect::node::{ErasedSchedule, Node};
use crate::effect::RawExit;
use crate::schedule::Decision;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

pub(crate) async fn run(inner: &Arc<Node>, schedule: &dyn ErasedSchedule, fiber: &Fiber) -> RawExit {
    let mut attempt: u32 = 1;
    let mut elapsed = Duration::ZERO;

    loop {
        let error = match eval(Arc::clone(inner), fiber.clone()).await {
            RawExit::Failure(error) => error,
            other => return other,
        };

        let decision = schedule.decide(attempt, elapsed, &error);
        let delay = match decision {
            Decision::Continue(delay) => schedule.jittered(delay),
            Decision::Stop => {
                debug!(
                    "{} giving up after {} attempt(s) with {}",
                    fiber.id,
                    attempt,
                    schedule.describe()
                );
                return RawExit::Failure(error);
            }
        };
        drop(error);

        let limit = schedule
            .max_retries()
            .map_or_else(|| "unbounded".to_string(), |n| n.saturating_add(1).to_string());
        info!(
            "Retrying {} (attempt {}/{}) after {:?}",
            fiber.id,
            attempt + 1,
            limit,
            delay
        );

        if !fiber.token.sleep(delay).await {
            debug!("{} interrupted during retry delay", fiber.id);
            return RawExit::Interrupted;
        }
        elapsed = elapsed.saturating_add(delay);
        attempt = attempt.saturating_add(1);
    }
}
