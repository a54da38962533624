use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Barrier, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use timed_cache::{CacheConfig, CacheRegistry, TimedCache, TimedMap};

#[derive(Debug, thiserror::Error)]
#[error("registry unavailable")]
struct RegistryDown;

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

/// Tracks how many supplier calls overlap.
#[derive(Default)]
struct InFlight {
    current: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicU32,
}

impl InFlight {
    fn run(&self, work: Duration) -> u32 {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        thread::sleep(work);
        self.current.fetch_sub(1, Ordering::SeqCst);
        self.calls.fetch_add(1, Ordering::SeqCst) + 1
    }
}

#[test]
fn scheduled_refresh_with_real_clock() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    let cache = TimedCache::new(CacheConfig::default().with_refresh(ms(10)), move || {
        Ok::<_, RegistryDown>(counter.fetch_add(1, Ordering::SeqCst) + 1)
    })
    .unwrap();

    assert_eq!(cache.get().unwrap(), 1);
    assert_eq!(cache.get().unwrap(), 1);
    thread::sleep(ms(10));
    assert_eq!(cache.get().unwrap(), 2);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn readers_without_a_slot_serve_the_current_value() {
    let in_flight = Arc::new(InFlight::default());
    let supplier_in_flight = Arc::clone(&in_flight);
    let cache = Arc::new(
        TimedCache::with_initial(
            CacheConfig::new(ms(20), ms(10)).with_max_simultaneous_compute(2),
            move || Ok::<_, RegistryDown>(supplier_in_flight.run(ms(200))),
            0,
        )
        .unwrap(),
    );

    let barrier = Arc::new(Barrier::new(5));
    let handles: Vec<_> = (0..5)
        .map(|_| {
            let (cache, barrier) = (Arc::clone(&cache), Arc::clone(&barrier));
            thread::spawn(move || {
                barrier.wait();
                let start = Instant::now();
                let value = cache.get().unwrap();
                (value, start.elapsed())
            })
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert!(in_flight.peak.load(Ordering::SeqCst) <= 2);
    assert!(in_flight.calls.load(Ordering::SeqCst) <= 2);

    let served_initial: Vec<_> = results.iter().filter(|(value, _)| *value == 0).collect();
    assert!(served_initial.len() >= 3, "results: {results:?}");
    assert!(served_initial
        .iter()
        .all(|(_, elapsed)| *elapsed < ms(200)));
}

#[test]
fn reader_during_refresh_gets_previous_value() {
    let in_flight = Arc::new(InFlight::default());
    let supplier_in_flight = Arc::clone(&in_flight);
    let cache = Arc::new(
        TimedCache::with_initial(
            CacheConfig::new(ms(20), ms(10)),
            move || Ok::<_, RegistryDown>(supplier_in_flight.run(ms(50))),
            0,
        )
        .unwrap(),
    );

    let reader = {
        let cache = Arc::clone(&cache);
        thread::spawn(move || {
            thread::sleep(ms(20));
            let during = cache.get().unwrap();
            thread::sleep(ms(70));
            let after = cache.get().unwrap();
            (during, after)
        })
    };

    assert_eq!(cache.get().unwrap(), 1);
    let (during, after) = reader.join().unwrap();
    assert_eq!(during, 0, "computation was ongoing");
    assert_eq!(after, 2, "value was due again");
}

#[test]
fn refresh_waits_for_a_slot() {
    let in_flight = Arc::new(InFlight::default());
    let supplier_in_flight = Arc::clone(&in_flight);
    let (started_tx, started_rx) = mpsc::channel::<()>();
    let started_tx = Mutex::new(started_tx);
    let cache = Arc::new(
        TimedCache::with_initial(
            CacheConfig::default(),
            move || {
                started_tx.lock().unwrap().send(()).ok();
                Ok::<_, RegistryDown>(supplier_in_flight.run(ms(50)))
            },
            0,
        )
        .unwrap(),
    );

    let reader = {
        let cache = Arc::clone(&cache);
        thread::spawn(move || cache.get().unwrap())
    };
    started_rx.recv().unwrap();
    let refreshed = cache.refresh().unwrap();
    let read = reader.join().unwrap();

    assert_eq!(read, 1);
    assert_eq!(refreshed, 2);
    assert_eq!(in_flight.peak.load(Ordering::SeqCst), 1);
}

#[test]
fn waiting_retry_reuses_a_result_committed_meanwhile() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    let cache = Arc::new(
        TimedCache::with_initial(
            CacheConfig::new(Duration::from_secs(3600), ms(20))
                .with_exception_lock(Duration::from_secs(2)),
            move || {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                if n == 1 {
                    return Err(RegistryDown);
                }
                thread::sleep(ms(100));
                Ok(n)
            },
            0,
        )
        .unwrap(),
    );

    assert!(cache.get().is_err());
    assert!(cache.error().is_some());
    thread::sleep(ms(20));

    let barrier = Arc::new(Barrier::new(2));
    let handles: Vec<_> = (0..2)
        .map(|_| {
            let (cache, barrier) = (Arc::clone(&cache), Arc::clone(&barrier));
            thread::spawn(move || {
                barrier.wait();
                cache.get().unwrap()
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap(), 2);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(cache.error().is_none());
}

#[test]
fn registry_hands_out_one_map_per_project() {
    let registry: Arc<CacheRegistry<String, TimedMap<String, String, RegistryDown>>> =
        Arc::new(CacheRegistry::new());
    let lookups = Arc::new(AtomicU32::new(0));
    let barrier = Arc::new(Barrier::new(4));

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let (registry, lookups, barrier) =
                (Arc::clone(&registry), Arc::clone(&lookups), Arc::clone(&barrier));
            thread::spawn(move || {
                barrier.wait();
                let project = if i % 2 == 0 { "radar" } else { "mobile" };
                let map = registry
                    .get_or_try_create(project.to_string(), |id| {
                        let id = id.clone();
                        let lookups = Arc::clone(&lookups);
                        TimedMap::new(CacheConfig::new(ms(1000), ms(10)), move || {
                            lookups.fetch_add(1, Ordering::SeqCst);
                            Ok([(format!("{id}-owner"), "admin".to_string())].into())
                        })
                    })
                    .unwrap();
                map.get(&format!("{project}-owner")).unwrap()
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap().as_deref(), Some("admin"));
    }
    assert_eq!(registry.len(), 2);
    assert!(lookups.load(Ordering::SeqCst) >= 2);
}
