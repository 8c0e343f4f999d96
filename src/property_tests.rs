//! Property-based tests for parallel iteration

#[cfg(test)]
mod tests {
    use crate::effect::{Effect, Exit, Parallelism};
    use crate::runtime::Runtime;
    use crate::testing::ConcurrencyTracker;
    use proptest::prelude::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn block_on<F: std::future::Future>(future: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .start_paused(true)
            .build()
            .unwrap()
            .block_on(future)
    }

    /// Items finishing after their own delay, echoing their index.
    fn delayed_items(
        delays: Vec<u64>,
        tracker: Arc<ConcurrencyTracker>,
        failing: Option<usize>,
        parallelism: Parallelism,
    ) -> Effect<Vec<usize>, usize> {
        let indexed: Vec<(usize, u64)> = delays.into_iter().enumerate().collect();
        Effect::for_each_par(
            indexed,
            move |(index, delay)| {
                let tracker = tracker.clone();
                Effect::from_future(move || {
                    let tracker = tracker.clone();
                    async move {
                        tracker
                            .track(tokio::time::sleep(Duration::from_millis(delay)))
                            .await;
                        if failing == Some(index) {
                            Err(index)
                        } else {
                            Ok(index)
                        }
                    }
                })
            },
            parallelism,
        )
    }

    fn parallelism_for(len: usize, bound: usize, unbounded: bool) -> Parallelism {
        if unbounded {
            Parallelism::Unbounded
        } else {
            Parallelism::bounded(bound.clamp(1, len.max(1))).unwrap()
        }
    }

    // Property test: results follow input order whatever the completion order
    proptest! {
        #[test]
        fn test_for_each_par_preserves_order(
            delays in prop::collection::vec(1u64..50, 0..24),
            bound in 1usize..24,
            unbounded in any::<bool>(),
        ) {
            let len = delays.len();
            let parallelism = parallelism_for(len, bound, unbounded);
            let tracker = Arc::new(ConcurrencyTracker::new());

            let exit = block_on(async {
                let runtime = Runtime::new().unwrap();
                runtime
                    .run_exit(delayed_items(delays, tracker.clone(), None, parallelism))
                    .await
            });

            prop_assert_eq!(exit, Exit::Success((0..len).collect::<Vec<_>>()));
            prop_assert_eq!(tracker.current(), 0);
        }
    }

    // Property test: never more items in flight than the bound
    proptest! {
        #[test]
        fn test_for_each_par_respects_bound(
            delays in prop::collection::vec(1u64..50, 1..24),
            bound in 1usize..8,
        ) {
            let parallelism = Parallelism::bounded(bound).unwrap();
            let expected_peak = bound.min(delays.len());
            let tracker = Arc::new(ConcurrencyTracker::new());

            let exit = block_on(async {
                let runtime = Runtime::new().unwrap();
                runtime
                    .run_exit(delayed_items(delays, tracker.clone(), None, parallelism))
                    .await
            });

            prop_assert!(exit.is_success());
            prop_assert!(tracker.max_observed() <= bound);
            prop_assert_eq!(tracker.max_observed(), expected_peak);
        }
    }

    // Property test: one failing item fails the whole iteration and nothing
    // is left running
    proptest! {
        #[test]
        fn test_for_each_par_single_failure_wins(
            delays in prop::collection::vec(1u64..50, 1..16),
            failing_seed in any::<prop::sample::Index>(),
            bound in 1usize..8,
        ) {
            let failing = failing_seed.index(delays.len());
            let parallelism = Parallelism::bounded(bound).unwrap();
            let tracker = Arc::new(ConcurrencyTracker::new());

            let (exit, live) = block_on(async {
                let runtime = Runtime::new().unwrap();
                let exit = runtime
                    .run_exit(delayed_items(delays, tracker.clone(), Some(failing), parallelism))
                    .await;
                // Let aborted lookups be dropped.
                tokio::time::sleep(Duration::from_millis(1)).await;
                (exit, runtime.live_fibers())
            });

            prop_assert_eq!(exit, Exit::Failure(failing));
            prop_assert_eq!(tracker.current(), 0);
            prop_assert_eq!(live, 0);
        }
    }
}
