//! Integration tests for fan-in combinators
//!
//! Synchronous sources pin down ordering rules; virtual-time sources pin
//! down interleaving; pooled schedulers exercise concurrent delivery.

mod common;

use common::{init_tracing, WAIT};
use krepis_flux::{Clock, Context, Flux, FluxError, Scheduler, StepVerifier, Subscriber, VirtualClock};
use parking_lot::Mutex;
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const SECOND: Duration = Duration::from_secs(1);

fn ticks(period: Duration, count: u64) -> Flux<i64> {
    Flux::interval(period).take(count).map(|v| v as i64)
}

mod zip {
    use super::*;

    #[test]
    fn test_zip_pairs_shortest() {
        let got = Flux::just(["A", "B"])
            .zip_with(&Flux::just(["1", "2", "3"]))
            .block_collect(WAIT)
            .unwrap();
        assert_eq!(got, vec![("A", "1"), ("B", "2")]);
    }

    #[test]
    fn test_zip_many_rows() {
        let rows = Flux::zip([Flux::range(0, 3), Flux::range(10, 3), Flux::range(20, 5)])
            .block_collect(WAIT)
            .unwrap();
        assert_eq!(rows, vec![vec![0, 10, 20], vec![1, 11, 21], vec![2, 12, 22]]);
    }

    #[test]
    fn test_zip_waits_for_slow_side() {
        StepVerifier::with_virtual_time(|| Flux::range(0, 2).zip_with(&ticks(SECOND, 5)))
            .expect_no_event(SECOND)
            .then_await(Duration::ZERO)
            .expect_next((0, 0))
            .then_await(SECOND)
            .expect_next((1, 1))
            .verify_complete()
            .unwrap();
    }

    #[test]
    fn test_zip_error_fails_the_result() {
        let err = Flux::range(0, 3)
            .zip_with(&Flux::<i64>::error(FluxError::msg("left")))
            .block_collect(WAIT)
            .unwrap_err();
        assert!(err.to_string().contains("left"));
    }
}

mod combine_latest {
    use super::*;

    #[test]
    fn test_last_pair_is_both_last_values() {
        let got = Flux::just(["A", "B"])
            .combine_latest_with(&Flux::just([0, 1]), |a, b| format!("{a}{b}"))
            .block_collect(WAIT)
            .unwrap();
        assert_eq!(got.last().map(String::as_str), Some("B1"));
    }

    #[test]
    fn test_emits_on_every_value_once_primed() {
        StepVerifier::with_virtual_time(|| {
            Flux::combine_latest([ticks(SECOND, 2), ticks(3 * SECOND, 1).map(|v| v + 100)], |row| {
                row.to_vec()
            })
        })
        .then_await(3 * SECOND)
        .expect_next(vec![1, 100])
        .verify_complete()
        .unwrap();
    }
}

mod merge {
    use super::*;

    #[test]
    fn test_merge_interleaves_by_time() {
        StepVerifier::with_virtual_time(|| {
            Flux::merge([ticks(2 * SECOND, 2), ticks(3 * SECOND, 2).map(|v| v + 10)])
        })
        .then_await(6 * SECOND)
        .expect_next_all([0, 10, 1, 11])
        .verify_complete()
        .unwrap();
    }

    #[test]
    fn test_merge_sequential_keeps_source_order() {
        StepVerifier::with_virtual_time(|| {
            Flux::merge_sequential([ticks(2 * SECOND, 2), Flux::range(10, 2)])
        })
        .then_await(4 * SECOND)
        .expect_next_all([0, 1, 10, 11])
        .verify_complete()
        .unwrap();
    }

    #[test]
    fn test_merge_from_pooled_threads() {
        init_tracing();
        let pool = Scheduler::pooled("TEST-MERGE", 4);
        let sources: Vec<_> = (0..4)
            .map(|i| Flux::range(i * 100, 50).subscribe_on(&pool))
            .collect();
        let mut got = Flux::merge(sources).block_collect(WAIT).unwrap();
        got.sort_unstable();

        let mut expected: Vec<i64> = (0..4).flat_map(|i| i * 100..i * 100 + 50).collect();
        expected.sort_unstable();
        assert_eq!(got, expected);
        pool.dispose();
    }

    #[test]
    fn test_concat_waits_for_previous() {
        StepVerifier::with_virtual_time(|| ticks(SECOND, 2).concat_with(&Flux::range(7, 1)))
            .then_await(2 * SECOND)
            .expect_next_all([0, 1, 7])
            .verify_complete()
            .unwrap();
    }
}

mod first {
    use super::*;

    #[test]
    fn test_first_picks_earliest_source() {
        StepVerifier::with_virtual_time(|| {
            Flux::first([
                Flux::range(0, 3).delay_subscription(5 * SECOND),
                Flux::range(10, 3).delay_subscription(SECOND),
            ])
        })
        .then_await(SECOND)
        .expect_next_all([10, 11, 12])
        .verify_complete()
        .unwrap();
    }

    #[test]
    fn test_first_completion_wins() {
        let got = Flux::<i64>::empty().first_with(&Flux::range(0, 3)).block_collect(WAIT).unwrap();
        assert!(got.is_empty());
    }
}

mod take_until_other {
    use super::*;

    #[test]
    fn test_trigger_truncates_interval() {
        StepVerifier::with_virtual_time(|| {
            ticks(SECOND, 100).take_until_other(&Flux::range(0, 1).delay_subscription(Duration::from_millis(3500)))
        })
        .then_await(Duration::from_millis(3500))
        .expect_next_all([0, 1, 2])
        .verify_complete()
        .unwrap();
    }
}

mod cancellation {
    use super::*;

    const HALF: Duration = Duration::from_millis(500);

    struct Journal(Arc<Mutex<Vec<String>>>);

    impl<T: Debug + Send + 'static> Subscriber<T> for Journal {
        fn on_next(&self, value: T) {
            self.0.lock().push(format!("{value:?}"));
        }

        fn on_error(&self, error: FluxError) {
            self.0.lock().push(format!("error: {error}"));
        }

        fn on_complete(&self) {
            self.0.lock().push("complete".to_string());
        }
    }

    fn run_virtual<T: Debug + Send + 'static>(flux: &Flux<T>) -> (Arc<VirtualClock>, Arc<Mutex<Vec<String>>>) {
        let clock = Arc::new(VirtualClock::new());
        let journal = Arc::new(Mutex::new(Vec::new()));
        flux.subscribe_in(
            Journal(Arc::clone(&journal)),
            Context::new(Arc::clone(&clock) as Arc<dyn Clock>),
        );
        (clock, journal)
    }

    fn counted(source: Flux<i64>, counter: &Arc<AtomicUsize>) -> Flux<i64> {
        let counter = Arc::clone(counter);
        source.map(move |v| {
            counter.fetch_add(1, Ordering::SeqCst);
            v
        })
    }

    fn late_failure(after: Duration) -> Flux<i64> {
        Flux::error(FluxError::msg("late failure")).delay_subscription(after)
    }

    #[test]
    fn test_merge_error_cancels_running_sources() {
        let upstream = Arc::new(AtomicUsize::new(0));
        let merged = Flux::merge([counted(ticks(SECOND, 10), &upstream), late_failure(2 * SECOND + HALF)]);
        let (clock, journal) = run_virtual(&merged);

        clock.advance_by(2 * SECOND);
        assert_eq!(*journal.lock(), vec!["0", "1"]);

        clock.advance_by(SECOND);
        assert_eq!(journal.lock().len(), 3);
        assert!(journal.lock()[2].contains("late failure"));

        clock.advance_by(10 * SECOND);
        assert_eq!(upstream.load(Ordering::SeqCst), 2);
        assert_eq!(journal.lock().len(), 3);
        assert_eq!(clock.pending(), 0);
    }

    #[test]
    fn test_merge_sequential_later_error_drops_buffered_values() {
        let upstream = Arc::new(AtomicUsize::new(0));
        let later = Flux::range(10, 2).concat_with(&late_failure(2 * SECOND + HALF));
        let merged = Flux::merge_sequential([counted(ticks(SECOND, 5), &upstream), later]);
        let (clock, journal) = run_virtual(&merged);

        clock.advance_by(3 * SECOND);
        {
            let journal = journal.lock();
            assert_eq!(journal[..2], ["0".to_string(), "1".to_string()]);
            assert_eq!(journal.len(), 3);
            assert!(journal[2].starts_with("error: "));
        }

        clock.advance_by(10 * SECOND);
        assert_eq!(upstream.load(Ordering::SeqCst), 2);
        assert_eq!(journal.lock().len(), 3);
        assert_eq!(clock.pending(), 0);
    }

    #[test]
    fn test_first_cancels_losers_as_soon_as_it_picks() {
        let loser_cancelled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&loser_cancelled);
        let silent = Flux::<i64>::create(move |sink| {
            let flag = Arc::clone(&flag);
            sink.on_cancel(move || flag.store(true, Ordering::SeqCst));
        });
        let (clock, journal) = run_virtual(&Flux::first([silent, ticks(SECOND, 3)]));

        clock.advance_by(HALF);
        assert!(!loser_cancelled.load(Ordering::SeqCst));

        clock.advance_by(HALF);
        assert_eq!(*journal.lock(), vec!["0"]);
        assert!(loser_cancelled.load(Ordering::SeqCst));

        clock.advance_by(2 * SECOND);
        assert_eq!(*journal.lock(), vec!["0", "1", "2", "complete"]);
    }

    #[test]
    fn test_first_cancels_losing_interval() {
        let losing = Arc::new(AtomicUsize::new(0));
        let race = Flux::first([counted(ticks(3 * SECOND, 5), &losing), ticks(SECOND, 2).map(|v| v + 100)]);
        let (clock, journal) = run_virtual(&race);

        clock.advance_by(10 * SECOND);
        assert_eq!(*journal.lock(), vec!["100", "101", "complete"]);
        assert_eq!(losing.load(Ordering::SeqCst), 0);
        assert_eq!(clock.pending(), 0);
    }
}
