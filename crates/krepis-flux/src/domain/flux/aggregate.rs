//! Operators that consume the whole sequence before emitting

use super::emitter::Emitter;
use super::{Flux, Subscriber};
use crate::domain::error::FluxError;
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::mem;
use std::sync::Arc;

impl<T: Send + 'static> Flux<T> {
    /// Fold values pairwise; emits the result on completion
    ///
    /// An empty sequence completes without a value.
    pub fn reduce<F>(&self, f: F) -> Flux<T>
    where
        F: Fn(T, T) -> T + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        self.lift(move |downstream, _| FoldSubscriber {
            downstream,
            acc: Mutex::new(None),
            step: {
                let f = Arc::clone(&f);
                move |acc: Option<T>, value: T| match acc {
                    Some(acc) => f(acc, value),
                    None => value,
                }
            },
        })
    }

    /// Fold values into `seed`; emits the result on completion
    ///
    /// An empty sequence emits the seed.
    pub fn reduce_with<A, F>(&self, seed: A, f: F) -> Flux<A>
    where
        A: Clone + Send + Sync + 'static,
        F: Fn(A, T) -> A + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        self.lift(move |downstream, _| FoldSubscriber {
            downstream,
            acc: Mutex::new(Some(seed.clone())),
            step: {
                let f = Arc::clone(&f);
                let seed = seed.clone();
                move |acc: Option<A>, value: T| f(acc.unwrap_or_else(|| seed.clone()), value)
            },
        })
    }

    /// Collect every value into one vector, emitted on completion
    pub fn collect_list(&self) -> Flux<Vec<T>> {
        self.lift(|downstream, _| CollectSubscriber {
            downstream,
            values: Mutex::new(Vec::new()),
        })
    }

    /// Number of values
    pub fn count(&self) -> Flux<u64> {
        self.reduce_with(0u64, |n, _| n + 1)
    }

    /// Emit every value in ascending order once upstream completes
    pub fn sort(&self) -> Flux<T>
    where
        T: Ord,
    {
        self.sort_by(Ord::cmp)
    }

    /// Emit every value ordered by `compare` once upstream completes
    ///
    /// The sort is stable.
    pub fn sort_by<C>(&self, compare: C) -> Flux<T>
    where
        C: Fn(&T, &T) -> Ordering + Send + Sync + 'static,
    {
        let compare = Arc::new(compare);
        self.lift(move |downstream, _| SortSubscriber {
            downstream,
            values: Mutex::new(Vec::new()),
            compare: Arc::clone(&compare),
        })
    }
}

struct FoldSubscriber<A, S> {
    downstream: Emitter<A>,
    acc: Mutex<Option<A>>,
    step: S,
}

impl<T, A, S> Subscriber<T> for FoldSubscriber<A, S>
where
    T: Send + 'static,
    A: Send + 'static,
    S: Fn(Option<A>, T) -> A + Send + Sync + 'static,
{
    fn on_next(&self, value: T) {
        let mut acc = self.acc.lock();
        let next = (self.step)(acc.take(), value);
        *acc = Some(next);
    }

    fn on_error(&self, error: FluxError) {
        self.acc.lock().take();
        self.downstream.error(error);
    }

    fn on_complete(&self) {
        let result = self.acc.lock().take();
        if let Some(result) = result {
            self.downstream.next(result);
        }
        self.downstream.complete();
    }
}

struct CollectSubscriber<T> {
    downstream: Emitter<Vec<T>>,
    values: Mutex<Vec<T>>,
}

impl<T: Send + 'static> Subscriber<T> for CollectSubscriber<T> {
    fn on_next(&self, value: T) {
        self.values.lock().push(value);
    }

    fn on_error(&self, error: FluxError) {
        self.values.lock().clear();
        self.downstream.error(error);
    }

    fn on_complete(&self) {
        let values = mem::take(&mut *self.values.lock());
        self.downstream.next(values);
        self.downstream.complete();
    }
}

struct SortSubscriber<T, C> {
    downstream: Emitter<T>,
    values: Mutex<Vec<T>>,
    compare: Arc<C>,
}

impl<T, C> Subscriber<T> for SortSubscriber<T, C>
where
    T: Send + 'static,
    C: Fn(&T, &T) -> Ordering + Send + Sync + 'static,
{
    fn on_next(&self, value: T) {
        self.values.lock().push(value);
    }

    fn on_error(&self, error: FluxError) {
        self.values.lock().clear();
        self.downstream.error(error);
    }

    fn on_complete(&self) {
        let mut values = mem::take(&mut *self.values.lock());
        values.sort_by(|a, b| (self.compare)(a, b));
        for value in values {
            if self.downstream.is_closed() {
                return;
            }
            self.downstream.next(value);
        }
        self.downstream.complete();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(1);

    #[test]
    fn test_reduce_sums() {
        let got = Flux::range(1, 10).reduce(|a, b| a + b).block_collect(WAIT).unwrap();
        assert_eq!(got, vec![55]);
    }

    #[test]
    fn test_reduce_with_seed() {
        let got = Flux::range(1, 10).reduce_with(10_i64, |a, b| a + b).block_collect(WAIT).unwrap();
        assert_eq!(got, vec![65]);
        let empty = Flux::<i64>::empty().reduce_with(10_i64, |a, b| a + b).block_collect(WAIT).unwrap();
        assert_eq!(empty, vec![10]);
    }

    #[test]
    fn test_reduce_empty_emits_nothing() {
        let got = Flux::<i64>::empty().reduce(|a, b| a + b).block_collect(WAIT).unwrap();
        assert!(got.is_empty());
    }

    #[test]
    fn test_sort_and_collect() {
        let sorted = Flux::just([3, 1, 2]).sort().block_collect(WAIT).unwrap();
        assert_eq!(sorted, vec![1, 2, 3]);

        let desc = Flux::just([3, 1, 2]).sort_by(|a, b| b.cmp(a)).block_collect(WAIT).unwrap();
        assert_eq!(desc, vec![3, 2, 1]);

        let list = Flux::just(["x", "y"]).collect_list().block_collect(WAIT).unwrap();
        assert_eq!(list, vec![vec!["x", "y"]]);
        assert_eq!(Flux::range(0, 7).count().block_collect(WAIT).unwrap(), vec![7]);
    }
}
