use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use std::time::Duration;

use lockstep_core::RateSpec;
use orchestrator::{Clock, GlobalRateLimiter, Orchestrator};

fn orchestrator_with(tokens: u64, last_phase: u64) -> Arc<Orchestrator> {
    let orchestrator = Orchestrator::new();
    orchestrator
        .add_required_tokens(tokens)
        .expect("Failed to add tokens");
    orchestrator.phases_at_least_to(last_phase);
    Arc::new(orchestrator)
}

/// Run `participants` threads through every phase, calling `work` between the
/// barriers.
fn cycle_phases<F>(orchestrator: &Arc<Orchestrator>, participants: usize, work: F)
where
    F: Fn(usize, u64) + Send + Sync + 'static,
{
    let work = Arc::new(work);
    let handles: Vec<_> = (0..participants)
        .map(|index| {
            let orchestrator = Arc::clone(orchestrator);
            let work = Arc::clone(&work);
            thread::spawn(move || {
                while orchestrator.more_phases() {
                    let phase = orchestrator
                        .await_phase_start()
                        .expect("Phase start failed");
                    work(index, phase);
                    assert!(orchestrator.await_phase_end(true));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("Participant panicked");
    }
}

#[derive(Debug, Clone, Default)]
struct ManualClock(Arc<AtomicI64>);

impl ManualClock {
    fn advance(&self, ticks: i64) {
        self.0.fetch_add(ticks, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    const IS_STEADY: bool = true;
    const TICK_NANOS: u64 = 1;

    fn now(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }
}

mod barrier {
    use super::*;

    #[test]
    fn test_start_releases_only_after_last_arrival() {
        const PARTICIPANTS: u64 = 6;
        let orchestrator = orchestrator_with(PARTICIPANTS, 0);
        let arrived = Arc::new(AtomicU64::new(0));

        let handles: Vec<_> = (0..PARTICIPANTS)
            .map(|_| {
                let orchestrator = Arc::clone(&orchestrator);
                let arrived = Arc::clone(&arrived);
                thread::spawn(move || {
                    arrived.fetch_add(1, Ordering::SeqCst);
                    let phase = orchestrator.await_phase_start().unwrap();
                    let seen = arrived.load(Ordering::SeqCst);
                    assert!(orchestrator.await_phase_end(true));
                    (phase, seen)
                })
            })
            .collect();

        for handle in handles {
            let (phase, seen) = handle.join().unwrap();
            assert_eq!(phase, 0);
            assert_eq!(seen, PARTICIPANTS);
        }
        assert_eq!(orchestrator.current_phase(), 1);
    }

    #[test]
    fn test_phase_work_never_overlaps() {
        let orchestrator = orchestrator_with(4, 9);
        let log = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&log);
        cycle_phases(&orchestrator, 4, move |index, phase| {
            // Stagger participants so a missing barrier would show up.
            thread::sleep(Duration::from_micros(50 * index as u64));
            sink.lock().unwrap().push(phase);
        });

        let log = log.lock().unwrap();
        assert_eq!(log.len(), 4 * 10);
        assert!(log.windows(2).all(|w| w[0] <= w[1]), "phases interleaved: {:?}", log);
    }

    #[test]
    fn test_current_phase_is_monotonic() {
        let orchestrator = orchestrator_with(3, 19);
        let done = Arc::new(AtomicBool::new(false));

        let observer = {
            let orchestrator = Arc::clone(&orchestrator);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                let mut samples = Vec::new();
                while !done.load(Ordering::SeqCst) {
                    samples.push(orchestrator.current_phase());
                    thread::yield_now();
                }
                samples.push(orchestrator.current_phase());
                samples
            })
        };

        cycle_phases(&orchestrator, 3, |_, _| {});
        done.store(true, Ordering::SeqCst);

        let samples = observer.join().unwrap();
        assert!(samples.windows(2).all(|w| w[0] <= w[1] && w[1] - w[0] <= 20));
        assert_eq!(samples.last(), Some(&20));
    }

    #[test]
    fn test_phases_at_least_to() {
        let orchestrator = orchestrator_with(2, 0);
        orchestrator.phases_at_least_to(4);
        orchestrator.phases_at_least_to(2);
        assert_eq!(orchestrator.max_phase(), 4);

        let phases = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&phases);
        cycle_phases(&orchestrator, 2, move |index, phase| {
            if index == 0 {
                sink.lock().unwrap().push(phase);
            }
        });
        assert_eq!(*phases.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }
}

mod abort {
    use super::*;

    #[test]
    fn test_abort_releases_start_waiters() {
        let orchestrator = orchestrator_with(3, 0);
        let ready = Arc::new(Barrier::new(3));

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let orchestrator = Arc::clone(&orchestrator);
                let ready = Arc::clone(&ready);
                thread::spawn(move || {
                    ready.wait();
                    orchestrator.await_phase_start()
                })
            })
            .collect();

        ready.wait();
        thread::sleep(Duration::from_millis(20));
        orchestrator.abort();

        for handle in handles {
            assert!(handle.join().unwrap().unwrap_err().is_aborted());
        }
        assert!(orchestrator.await_phase_start().unwrap_err().is_aborted());
        assert!(!orchestrator.more_phases());
    }

    #[test]
    fn test_abort_releases_end_waiters() {
        let orchestrator = orchestrator_with(2, 0);

        let waiter = {
            let orchestrator = Arc::clone(&orchestrator);
            thread::spawn(move || {
                orchestrator.await_phase_start().unwrap();
                orchestrator.await_phase_end(true)
            })
        };

        orchestrator.await_phase_start().unwrap();
        thread::sleep(Duration::from_millis(20));
        orchestrator.abort();

        assert!(!waiter.join().unwrap());
        assert!(!orchestrator.await_phase_end(true));
    }
}

mod rate_limiter {
    use super::*;

    fn spec(operations: u64, per: Duration) -> RateSpec {
        RateSpec::per_duration(operations, per).unwrap()
    }

    #[test]
    fn test_three_tick_rate() {
        let clock = ManualClock::default();
        clock.advance(500);
        let limiter =
            GlobalRateLimiter::with_clock(spec(1, Duration::from_nanos(3)), clock.clone()).unwrap();
        assert_eq!(limiter.rate(), 3);

        let t = limiter.now();
        assert!(limiter.consume_if_within_rate(t));
        assert!(!limiter.consume_if_within_rate(t));

        clock.advance(3);
        let wins = (0..4).filter(|_| limiter.try_consume()).count();
        assert_eq!(wins, 1);
    }

    #[test]
    fn test_tokens_track_elapsed_time() {
        let clock = ManualClock::default();
        let limiter = Arc::new(
            GlobalRateLimiter::with_clock(spec(1, Duration::from_nanos(10)), clock.clone())
                .unwrap(),
        );

        let mut granted = 0;
        for _ in 0..50 {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    let limiter = Arc::clone(&limiter);
                    thread::spawn(move || limiter.try_consume())
                })
                .collect();
            granted += handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|&won| won)
                .count();
            clock.advance(10);
        }
        // One token per elapsed slot, no matter how many callers compete.
        assert_eq!(granted, 50);
    }
}
