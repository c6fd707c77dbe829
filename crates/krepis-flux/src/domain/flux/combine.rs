//! Combinators - many sources into one
//!
//! # Design
//!
//! Every combinator subscribes its sources on children of one *group*
//! subscription, so cancelling downstream or failing one source tears
//! down all of them at once. Per-source state lives in slots indexed by the
//! source position; sources never hold a reference back to the combinator
//! beyond the subscriber attached to them.
//!
//! Sources may signal from different threads. Combinators with state
//! decide what to emit under their state lock, enqueue into a
//! [`Serializer`] while still holding it, and drain after releasing it.

use super::context::Context;
use super::emitter::{Emitter, Serializer};
use super::{Flux, Subscriber};
use crate::domain::error::FluxError;
use crate::domain::signal::Signal;
use crate::domain::subscription::Subscription;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Tags values of two differently typed sources sharing one combinator
#[derive(Clone)]
enum Either<A, B> {
    Left(A),
    Right(B),
}

impl<T: Send + 'static> Flux<T> {
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Concat
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Subscribe each source only after the previous one completed
    ///
    /// An error from any source terminates the result immediately.
    pub fn concat<I>(sources: I) -> Flux<T>
    where
        I: IntoIterator<Item = Flux<T>>,
    {
        let sources: Arc<[Flux<T>]> = sources.into_iter().collect();
        Flux::from_fn(move |downstream: Emitter<T>| {
            let shared = Arc::new(ConcatShared {
                sources: Arc::clone(&sources),
                next: AtomicUsize::new(0),
                wip: AtomicUsize::new(0),
                downstream,
            });
            shared.subscribe_next();
        })
    }

    /// This sequence, then `other`
    pub fn concat_with(&self, other: &Flux<T>) -> Flux<T> {
        Flux::concat([self.clone(), other.clone()])
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Merge
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Subscribe every source at once and emit values in arrival order
    ///
    /// Completes when all sources completed. The first error cancels the
    /// remaining sources.
    pub fn merge<I>(sources: I) -> Flux<T>
    where
        I: IntoIterator<Item = Flux<T>>,
    {
        let sources: Arc<[Flux<T>]> = sources.into_iter().collect();
        Flux::from_fn(move |downstream: Emitter<T>| {
            if sources.is_empty() {
                downstream.complete();
                return;
            }
            let group = downstream.subscription().child();
            let context = downstream.context().clone();
            let shared = Arc::new(MergeShared {
                serializer: Serializer::new(downstream),
                group: group.clone(),
                remaining: AtomicUsize::new(sources.len()),
            });
            subscribe_sources(&sources, &group, &context, |_| MergeInner {
                shared: Arc::clone(&shared),
            });
        })
    }

    /// Merge this sequence with `other`
    pub fn merge_with(&self, other: &Flux<T>) -> Flux<T> {
        Flux::merge([self.clone(), other.clone()])
    }

    /// Subscribe every source at once but emit in source order
    ///
    /// Values of a later source are buffered until every earlier source
    /// completed. Buffering is unbounded.
    pub fn merge_sequential<I>(sources: I) -> Flux<T>
    where
        I: IntoIterator<Item = Flux<T>>,
    {
        let sources: Arc<[Flux<T>]> = sources.into_iter().collect();
        Flux::from_fn(move |downstream: Emitter<T>| {
            if sources.is_empty() {
                downstream.complete();
                return;
            }
            let group = downstream.subscription().child();
            let context = downstream.context().clone();
            let slots = (0..sources.len()).map(|_| SequentialSlot::default()).collect();
            let shared = Arc::new(SequentialShared {
                serializer: Serializer::new(downstream),
                group: group.clone(),
                state: Mutex::new(SequentialState {
                    slots,
                    current: 0,
                    finished: false,
                }),
            });
            subscribe_sources(&sources, &group, &context, |index| SequentialInner {
                shared: Arc::clone(&shared),
                index,
            });
        })
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Zip
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Pair up the k-th values of every source
    ///
    /// Emits one row per index, in source order. The result is as long as
    /// the shortest source and completes as soon as a completed source has
    /// no buffered value left.
    pub fn zip<I>(sources: I) -> Flux<Vec<T>>
    where
        I: IntoIterator<Item = Flux<T>>,
    {
        let sources: Arc<[Flux<T>]> = sources.into_iter().collect();
        Flux::from_fn(move |downstream: Emitter<Vec<T>>| {
            if sources.is_empty() {
                downstream.complete();
                return;
            }
            let group = downstream.subscription().child();
            let context = downstream.context().clone();
            let shared = Arc::new(ZipShared {
                serializer: Serializer::new(downstream),
                group: group.clone(),
                state: Mutex::new(ZipState {
                    queues: (0..sources.len()).map(|_| VecDeque::new()).collect(),
                    done: vec![false; sources.len()],
                    finished: false,
                }),
            });
            subscribe_sources(&sources, &group, &context, |index| ZipInner {
                shared: Arc::clone(&shared),
                index,
            });
        })
    }

    /// Pair this sequence with `other`
    pub fn zip_with<U: Send + 'static>(&self, other: &Flux<U>) -> Flux<(T, U)> {
        let left = self.map(Either::<T, U>::Left);
        let right = other.map(Either::<T, U>::Right);
        Flux::zip([left, right]).filter_map(|row: Vec<Either<T, U>>| {
            let mut row = row.into_iter();
            match (row.next(), row.next()) {
                (Some(Either::Left(a)), Some(Either::Right(b))) => Some((a, b)),
                _ => None,
            }
        })
    }

    /// Pair this sequence with `other` and combine each pair with `f`
    pub fn zip_with_fn<U, R, F>(&self, other: &Flux<U>, f: F) -> Flux<R>
    where
        U: Send + 'static,
        R: Send + 'static,
        F: Fn(T, U) -> R + Send + Sync + 'static,
    {
        self.zip_with(other).map(move |(a, b)| f(a, b))
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Combine latest
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Combine the most recent value of every source
    ///
    /// Nothing is emitted until every source produced a value; from then on
    /// every new value from any source emits `f(latest)`. Completes when all
    /// sources completed, or immediately when a source completes without
    /// ever producing a value. `f` runs under the combinator lock and must
    /// not block.
    pub fn combine_latest<I, R, F>(sources: I, f: F) -> Flux<R>
    where
        T: Clone,
        I: IntoIterator<Item = Flux<T>>,
        R: Send + 'static,
        F: Fn(&[T]) -> R + Send + Sync + 'static,
    {
        let sources: Arc<[Flux<T>]> = sources.into_iter().collect();
        let f = Arc::new(f);
        Flux::from_fn(move |downstream: Emitter<R>| {
            if sources.is_empty() {
                downstream.complete();
                return;
            }
            let group = downstream.subscription().child();
            let context = downstream.context().clone();
            let shared = Arc::new(LatestShared {
                serializer: Serializer::new(downstream),
                group: group.clone(),
                combine: Arc::clone(&f),
                state: Mutex::new(LatestState {
                    latest: vec![None; sources.len()],
                    completed: 0,
                    finished: false,
                }),
            });
            subscribe_sources(&sources, &group, &context, |index| LatestInner {
                shared: Arc::clone(&shared),
                index,
            });
        })
    }

    /// Combine the latest values of this sequence and `other`
    pub fn combine_latest_with<U, R, F>(&self, other: &Flux<U>, f: F) -> Flux<R>
    where
        T: Clone,
        U: Clone + Send + 'static,
        R: Send + 'static,
        F: Fn(&T, &U) -> R + Send + Sync + 'static,
    {
        let left = self.map(Either::<T, U>::Left);
        let right = other.map(Either::<T, U>::Right);
        Flux::combine_latest([left, right], move |row: &[Either<T, U>]| match row {
            [Either::Left(a), Either::Right(b)] => Some(f(a, b)),
            _ => None,
        })
        .filter_map(|combined| combined)
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // First
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Relay the first source to signal and cancel the others
    ///
    /// Any signal wins the race: a value, completion, or an error.
    pub fn first<I>(sources: I) -> Flux<T>
    where
        I: IntoIterator<Item = Flux<T>>,
    {
        let sources: Arc<[Flux<T>]> = sources.into_iter().collect();
        Flux::from_fn(move |downstream: Emitter<T>| {
            if sources.is_empty() {
                downstream.complete();
                return;
            }
            let context = downstream.context().clone();
            let subscriptions: Vec<Subscription> = sources
                .iter()
                .map(|_| downstream.subscription().child())
                .collect();
            let shared = Arc::new(FirstShared {
                downstream,
                winner: AtomicUsize::new(NO_WINNER),
                subscriptions: subscriptions.clone(),
            });
            for (index, (source, subscription)) in sources.iter().zip(subscriptions).enumerate() {
                source.subscribe_child(
                    FirstInner {
                        shared: Arc::clone(&shared),
                        index,
                    },
                    subscription,
                    context.clone(),
                );
            }
        })
    }

    /// Race this sequence against `other`
    pub fn first_with(&self, other: &Flux<T>) -> Flux<T> {
        Flux::first([self.clone(), other.clone()])
    }
}

/// Subscribe `sources` in order on children of `group`, stopping early once
/// the group is cancelled
fn subscribe_sources<T, S, M>(sources: &[Flux<T>], group: &Subscription, context: &Context, make: M)
where
    T: Send + 'static,
    S: Subscriber<T>,
    M: Fn(usize) -> S,
{
    for (index, source) in sources.iter().enumerate() {
        if group.is_cancelled() {
            return;
        }
        source.subscribe_child(make(index), group.child(), context.clone());
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Concat state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//
// `wip` trampolines resubscription: a source that completes synchronously
// inside `subscribe_next` only bumps the counter, and the outer loop moves
// on, so long chains of synchronous sources do not grow the stack.

struct ConcatShared<T> {
    sources: Arc<[Flux<T>]>,
    next: AtomicUsize,
    wip: AtomicUsize,
    downstream: Emitter<T>,
}

impl<T: Send + 'static> ConcatShared<T> {
    fn subscribe_next(self: &Arc<Self>) {
        if self.wip.fetch_add(1, Ordering::AcqRel) != 0 {
            return;
        }
        loop {
            if self.downstream.is_closed() {
                return;
            }
            let index = self.next.fetch_add(1, Ordering::AcqRel);
            match self.sources.get(index) {
                None => {
                    self.downstream.complete();
                    return;
                }
                Some(source) => source.subscribe_child(
                    ConcatInner {
                        shared: Arc::clone(self),
                    },
                    self.downstream.subscription().child(),
                    self.downstream.context().clone(),
                ),
            }
            if self.wip.fetch_sub(1, Ordering::AcqRel) == 1 {
                return;
            }
        }
    }
}

struct ConcatInner<T> {
    shared: Arc<ConcatShared<T>>,
}

impl<T: Send + 'static> Subscriber<T> for ConcatInner<T> {
    fn on_next(&self, value: T) {
        self.shared.downstream.next(value);
    }

    fn on_error(&self, error: FluxError) {
        self.shared.downstream.error(error);
    }

    fn on_complete(&self) {
        self.shared.subscribe_next();
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Merge state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct MergeShared<T> {
    serializer: Serializer<T>,
    group: Subscription,
    remaining: AtomicUsize,
}

struct MergeInner<T> {
    shared: Arc<MergeShared<T>>,
}

impl<T: Send + 'static> Subscriber<T> for MergeInner<T> {
    fn on_next(&self, value: T) {
        self.shared.serializer.emit(Signal::Next(value));
    }

    fn on_error(&self, error: FluxError) {
        self.shared.group.cancel();
        self.shared.serializer.emit(Signal::Error(error));
    }

    fn on_complete(&self) {
        if self.shared.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.shared.serializer.emit(Signal::Complete);
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Merge-sequential state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct SequentialShared<T> {
    serializer: Serializer<T>,
    group: Subscription,
    state: Mutex<SequentialState<T>>,
}

struct SequentialState<T> {
    slots: Vec<SequentialSlot<T>>,
    /// Source currently allowed to emit
    current: usize,
    finished: bool,
}

struct SequentialSlot<T> {
    queue: VecDeque<T>,
    done: bool,
}

impl<T> Default for SequentialSlot<T> {
    fn default() -> Self {
        Self {
            queue: VecDeque::new(),
            done: false,
        }
    }
}

impl<T: Send + 'static> SequentialShared<T> {
    /// Flush the current slot and move past completed ones; call under the
    /// state lock
    fn advance(&self, state: &mut SequentialState<T>) {
        while let Some(slot) = state.slots.get_mut(state.current) {
            while let Some(value) = slot.queue.pop_front() {
                self.serializer.enqueue(Signal::Next(value));
            }
            if !slot.done {
                return;
            }
            state.current += 1;
        }
        if !state.finished {
            state.finished = true;
            self.serializer.enqueue(Signal::Complete);
        }
    }
}

struct SequentialInner<T> {
    shared: Arc<SequentialShared<T>>,
    index: usize,
}

impl<T: Send + 'static> Subscriber<T> for SequentialInner<T> {
    fn on_next(&self, value: T) {
        {
            let mut state = self.shared.state.lock();
            if state.finished {
                return;
            }
            if let Some(slot) = state.slots.get_mut(self.index) {
                slot.queue.push_back(value);
            }
            self.shared.advance(&mut state);
        }
        self.shared.serializer.drain();
    }

    fn on_error(&self, error: FluxError) {
        self.shared.group.cancel();
        {
            let mut state = self.shared.state.lock();
            if state.finished {
                return;
            }
            state.finished = true;
            self.shared.serializer.enqueue(Signal::Error(error));
        }
        self.shared.serializer.drain();
    }

    fn on_complete(&self) {
        {
            let mut state = self.shared.state.lock();
            if let Some(slot) = state.slots.get_mut(self.index) {
                slot.done = true;
            }
            self.shared.advance(&mut state);
        }
        self.shared.serializer.drain();
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Zip state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct ZipShared<T> {
    serializer: Serializer<Vec<T>>,
    group: Subscription,
    state: Mutex<ZipState<T>>,
}

struct ZipState<T> {
    queues: Vec<VecDeque<T>>,
    done: Vec<bool>,
    finished: bool,
}

impl<T: Send + 'static> ZipShared<T> {
    /// Emit complete rows, then complete if an exhausted source has nothing
    /// buffered; call under the state lock
    fn drain_rows(&self, state: &mut ZipState<T>) {
        while state.queues.iter().all(|queue| !queue.is_empty()) {
            let row = state
                .queues
                .iter_mut()
                .filter_map(VecDeque::pop_front)
                .collect();
            self.serializer.enqueue(Signal::Next(row));
        }
        let exhausted = state
            .queues
            .iter()
            .zip(&state.done)
            .any(|(queue, done)| *done && queue.is_empty());
        if exhausted {
            state.finished = true;
            state.queues.iter_mut().for_each(VecDeque::clear);
            self.group.cancel();
            self.serializer.enqueue(Signal::Complete);
        }
    }
}

struct ZipInner<T> {
    shared: Arc<ZipShared<T>>,
    index: usize,
}

impl<T: Send + 'static> Subscriber<T> for ZipInner<T> {
    fn on_next(&self, value: T) {
        {
            let mut state = self.shared.state.lock();
            if state.finished {
                return;
            }
            if let Some(queue) = state.queues.get_mut(self.index) {
                queue.push_back(value);
            }
            self.shared.drain_rows(&mut state);
        }
        self.shared.serializer.drain();
    }

    fn on_error(&self, error: FluxError) {
        self.shared.group.cancel();
        {
            let mut state = self.shared.state.lock();
            if state.finished {
                return;
            }
            state.finished = true;
            self.shared.serializer.enqueue(Signal::Error(error));
        }
        self.shared.serializer.drain();
    }

    fn on_complete(&self) {
        {
            let mut state = self.shared.state.lock();
            if state.finished {
                return;
            }
            if let Some(done) = state.done.get_mut(self.index) {
                *done = true;
            }
            self.shared.drain_rows(&mut state);
        }
        self.shared.serializer.drain();
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Combine-latest state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct LatestShared<T, R, F> {
    serializer: Serializer<R>,
    group: Subscription,
    combine: Arc<F>,
    state: Mutex<LatestState<T>>,
}

struct LatestState<T> {
    latest: Vec<Option<T>>,
    completed: usize,
    finished: bool,
}

struct LatestInner<T, R, F> {
    shared: Arc<LatestShared<T, R, F>>,
    index: usize,
}

impl<T, R, F> Subscriber<T> for LatestInner<T, R, F>
where
    T: Clone + Send + 'static,
    R: Send + 'static,
    F: Fn(&[T]) -> R + Send + Sync + 'static,
{
    fn on_next(&self, value: T) {
        let shared = &self.shared;
        {
            let mut state = shared.state.lock();
            if state.finished {
                return;
            }
            if let Some(slot) = state.latest.get_mut(self.index) {
                *slot = Some(value);
            }
            if state.latest.iter().all(Option::is_some) {
                let row: Vec<T> = state.latest.iter().flatten().cloned().collect();
                shared.serializer.enqueue(Signal::Next((shared.combine)(&row)));
            }
        }
        shared.serializer.drain();
    }

    fn on_error(&self, error: FluxError) {
        self.shared.group.cancel();
        {
            let mut state = self.shared.state.lock();
            if state.finished {
                return;
            }
            state.finished = true;
            self.shared.serializer.enqueue(Signal::Error(error));
        }
        self.shared.serializer.drain();
    }

    fn on_complete(&self) {
        let shared = &self.shared;
        {
            let mut state = shared.state.lock();
            if state.finished {
                return;
            }
            state.completed += 1;
            let never_produced = state.latest.get(self.index).is_some_and(Option::is_none);
            if never_produced || state.completed == state.latest.len() {
                state.finished = true;
                shared.group.cancel();
                shared.serializer.enqueue(Signal::Complete);
            }
        }
        shared.serializer.drain();
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// First state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const NO_WINNER: usize = usize::MAX;

struct FirstShared<T> {
    downstream: Emitter<T>,
    winner: AtomicUsize,
    subscriptions: Vec<Subscription>,
}

impl<T> FirstShared<T> {
    /// Whether `index` is (or just became) the winner
    fn claim(&self, index: usize) -> bool {
        match self
            .winner
            .compare_exchange(NO_WINNER, index, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {
                for (other, subscription) in self.subscriptions.iter().enumerate() {
                    if other != index {
                        subscription.cancel();
                    }
                }
                true
            }
            Err(current) => current == index,
        }
    }
}

struct FirstInner<T> {
    shared: Arc<FirstShared<T>>,
    index: usize,
}

impl<T: Send + 'static> Subscriber<T> for FirstInner<T> {
    fn on_next(&self, value: T) {
        if self.shared.claim(self.index) {
            self.shared.downstream.next(value);
        }
    }

    fn on_error(&self, error: FluxError) {
        if self.shared.claim(self.index) {
            self.shared.downstream.error(error);
        }
    }

    fn on_complete(&self) {
        if self.shared.claim(self.index) {
            self.shared.downstream.complete();
        }
    }
}
