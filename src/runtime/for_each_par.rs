//! Bounded parallel iteration
//!
//! Children run as tasks in a [`JoinSet`] owned by the parent fiber. At most
//! `limit` children are live; whenever one finishes successfully the next
//! pending item starts. The first failure or defect interrupts the remaining
//! children, and the parent only returns once every child has been joined.

use super::fiber::Fiber;
use super::interpreter::eval_catching;
use super::interrupt::InterruptToken;
use crate::effect::node::{AnyValue, Elements};
use crate::effect::{Defect, Parallelism, RawExit};
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Results of a parallel run, one slot per input index.
///
/// Each slot accepts exactly one write.
pub(crate) struct ResultSlots {
    slots: Vec<Option<AnyValue>>,
}

impl ResultSlots {
    pub(crate) fn new(len: usize) -> Self {
        Self {
            slots: (0..len).map(|_| None).collect(),
        }
    }

    pub(crate) fn fill(&mut self, index: usize, value: AnyValue) -> Result<(), Defect> {
        match self.slots.get_mut(index) {
            Some(slot @ None) => {
                *slot = Some(value);
                Ok(())
            }
            _ => Err(Defect::SlotConflict { index }),
        }
    }

    pub(crate) fn into_values(self) -> Result<Vec<AnyValue>, Defect> {
        self.slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| slot.ok_or(Defect::MissingResult { index }))
            .collect()
    }
}

type ChildExit = (usize, RawExit);

pub(crate) async fn run(elements: &Elements, parallelism: Parallelism, fiber: &Fiber) -> RawExit {
    let len = elements.len;
    let limit = parallelism.limit_for(len);
    let group = fiber.token.child();
    let mut slots = ResultSlots::new(len);
    let mut running: JoinSet<ChildExit> = JoinSet::new();
    let mut next = 0;
    let mut outcome: Option<RawExit> = None;

    debug!(
        "{} running {} items with parallelism {}",
        fiber.id, len, parallelism
    );

    while next < limit {
        spawn_child(&mut running, elements, next, fiber, &group);
        next += 1;
    }

    loop {
        let joined = tokio::select! {
            biased;
            _ = fiber.token.interrupted(), if outcome.is_none() => {
                debug!("{} interrupted, waiting for children", fiber.id);
                outcome = Some(RawExit::Interrupted);
                continue;
            }
            joined = running.join_next() => joined,
        };
        let Some(joined) = joined else {
            break;
        };

        let (index, exit) = match joined {
            Ok((index, exit)) => (Some(index), exit),
            Err(error) => (None, RawExit::Died(Defect::Panic(error.to_string()))),
        };

        let exit = match (index, exit) {
            (Some(index), RawExit::Success(value)) => match slots.fill(index, value) {
                Ok(()) => {
                    if outcome.is_none() && next < len {
                        spawn_child(&mut running, elements, next, fiber, &group);
                        next += 1;
                    }
                    continue;
                }
                Err(defect) => RawExit::Died(defect),
            },
            (_, exit) => exit,
        };

        match exit {
            // Siblings stopped by the group or by our own interruption.
            RawExit::Interrupted | RawExit::Success(_) => {}
            failure => {
                if outcome.is_none() {
                    warn!(
                        "{} child {} ended with {}, interrupting {} siblings",
                        fiber.id,
                        index.map_or_else(|| "?".to_string(), |i| i.to_string()),
                        failure.label(),
                        running.len()
                    );
                    group.interrupt();
                    outcome = Some(failure);
                }
            }
        }
    }

    if let Some(exit) = outcome {
        return exit;
    }
    if fiber.token.is_interrupted() {
        return RawExit::Interrupted;
    }
    match slots.into_values() {
        Ok(values) => RawExit::Success((elements.collect)(values)),
        Err(defect) => RawExit::Died(defect),
    }
}

fn spawn_child(
    running: &mut JoinSet<ChildExit>,
    elements: &Elements,
    index: usize,
    parent: &Fiber,
    group: &InterruptToken,
) {
    let child = parent.fork(group.child());
    let build = elements.build.clone();
    running.spawn_on(
        async move {
            let node = build(index);
            let exit = eval_catching(node, child.clone()).await;
            let exit = child.settle(exit);
            child.terminate(&exit);
            (index, exit)
        },
        &parent.handle,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boxed(n: i32) -> AnyValue {
        Box::new(n)
    }

    #[test]
    fn test_slots_keep_index_order() {
        let mut slots = ResultSlots::new(3);
        slots.fill(2, boxed(30)).unwrap();
        slots.fill(0, boxed(10)).unwrap();
        slots.fill(1, boxed(20)).unwrap();

        let values: Vec<i32> = slots
            .into_values()
            .unwrap()
            .into_iter()
            .map(|value| *value.downcast::<i32>().unwrap())
            .collect();
        assert_eq!(values, vec![10, 20, 30]);
    }

    #[test]
    fn test_slot_written_twice_is_a_defect() {
        let mut slots = ResultSlots::new(2);
        slots.fill(1, boxed(1)).unwrap();
        assert_eq!(
            slots.fill(1, boxed(2)),
            Err(Defect::SlotConflict { index: 1 })
        );
        assert_eq!(
            slots.fill(5, boxed(2)),
            Err(Defect::SlotConflict { index: 5 })
        );
    }

    #[test]
    fn test_unfilled_slot_is_a_defect() {
        let mut slots = ResultSlots::new(2);
        slots.fill(0, boxed(1)).unwrap();
        assert_eq!(
            slots.into_values().err(),
            Some(Defect::MissingResult { index: 1 })
        );
    }
}
