//! Bounded worker pool for independent work units.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};

/// Shared cancellation flag, checked between work units.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Run `work` over every item on at most `workers` scoped threads.
///
/// Threads pull the next index from a shared counter, so at most `workers`
/// units (and therefore model calls) are in flight. Results come back in
/// item order regardless of scheduling. Returns `None` when the run was
/// cancelled before every unit finished; an in-flight unit is never
/// interrupted.
pub fn run_bounded<T, R, F>(items: &[T], workers: usize, cancel: &CancelFlag, work: F) -> Option<Vec<R>>
where
    T: Sync,
    R: Send,
    F: Fn(usize, &T) -> R + Sync,
{
    let next = AtomicUsize::new(0);
    let (tx, rx) = mpsc::channel();
    let thread_count = workers.max(1).min(items.len());

    std::thread::scope(|scope| {
        for _ in 0..thread_count {
            let tx = tx.clone();
            let next = &next;
            let work = &work;
            scope.spawn(move || loop {
                if cancel.is_cancelled() {
                    break;
                }
                let index = next.fetch_add(1, Ordering::SeqCst);
                let Some(item) = items.get(index) else {
                    break;
                };
                if tx.send((index, work(index, item))).is_err() {
                    break;
                }
            });
        }
    });
    drop(tx);

    let mut slots: Vec<Option<R>> = std::iter::repeat_with(|| None).take(items.len()).collect();
    for (index, result) in rx {
        slots[index] = Some(result);
    }

    let finished = slots.iter().filter(|s| s.is_some()).count();
    if finished < items.len() {
        tracing::warn!(finished, total = items.len(), "Run cancelled between work units");
        return None;
    }
    Some(slots.into_iter().flatten().collect())
}
