use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use futures::FutureExt;
use memocache::{Func, Memo, MemoError, Memoize};
use memocache_test::Counter;

use crate::{DUPLICATE_SUPPRESSING, PARALLEL, build, slow_unique};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_single_invocation_per_key() {
    memocache_test::setup();

    for name in DUPLICATE_SUPPRESSING {
        let counter = Counter::new();
        let memo = build(name, slow_unique(&counter, Duration::from_millis(100)));

        let tasks = (0..50).map(|_| {
            let memo = Arc::clone(&memo);
            tokio::spawn(async move { memo.get(42).await })
        });
        let results: Vec<_> = join_all(tasks)
            .await
            .into_iter()
            .map(|r| r.unwrap().unwrap())
            .collect();

        assert_eq!(counter.get(), 1, "{name}");
        for result in &results {
            assert!(Arc::ptr_eq(result, &results[0]), "{name}");
        }
        assert_eq!(*results[0], (42, 0), "{name}");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_distinct_keys_run_in_parallel() {
    memocache_test::setup();

    let counter = Counter::new();
    for name in PARALLEL {
        let memo = build(name, slow_unique(&counter, Duration::from_millis(200)));
        let start = Instant::now();
        let tasks = (0..10).map(|key| {
            let memo = Arc::clone(&memo);
            tokio::spawn(async move { memo.get(key).await })
        });
        for result in join_all(tasks).await {
            result.unwrap().unwrap();
        }

        // ten sequential computations would take 2s
        let elapsed = start.elapsed();
        assert!(elapsed < Duration::from_millis(1000), "{name}: {elapsed:?}");
    }
    assert_eq!(counter.get(), 30);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_results_are_consistent() {
    memocache_test::setup();

    let counter = Counter::new();
    let memo = Memo::from_func(slow_unique(&counter, Duration::from_millis(20)));

    // Callers interleave across keys, and come back after the entries are sealed.
    let requests = (0..200u64).map(|i| {
        let memo = memo.clone();
        tokio::spawn(async move {
            let key = i % 7;
            (key, memo.get(key).await.unwrap())
        })
    });
    let mut results = join_all(requests).await;
    for key in 0..7 {
        results.push(Ok((key, memo.get(key).await.unwrap())));
    }

    let mut first_seen = std::collections::HashMap::new();
    for result in results {
        let (key, value) = result.unwrap();
        let first = first_seen.entry(key).or_insert_with(|| Arc::clone(&value));
        assert!(Arc::ptr_eq(first, &value));
        assert_eq!(value.0, key);
    }

    assert_eq!(counter.get(), 7);
    assert_eq!(memo.len(), 7);
}

#[tokio::test]
async fn test_errors_are_memoized() {
    memocache_test::setup();

    let counter = Counter::new();
    let func: Func<u32, u32, String> = {
        let counter = counter.clone();
        Arc::new(move |key| {
            counter.hit();
            async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                if key % 2 == 1 {
                    Err(format!("{key} is odd"))
                } else {
                    Ok(key / 2)
                }
            }
            .boxed()
        })
    };

    for name in DUPLICATE_SUPPRESSING {
        let memo = build(name, Arc::clone(&func));
        let before = counter.get();

        let first = join_all((0..5).map(|_| memo.get(3))).await;
        let later = memo.get(3).await;

        let expected = first[0].clone().unwrap_err();
        assert_eq!(expected.to_string(), "computation failed: 3 is odd", "{name}");
        for err in first.into_iter().chain([later]).map(Result::unwrap_err) {
            assert!(
                Arc::ptr_eq(err.failure().unwrap(), expected.failure().unwrap()),
                "{name}"
            );
        }

        // successes and failures live side by side
        assert_eq!(*memo.get(4).await.unwrap(), 2, "{name}");
        assert_eq!(counter.get() - before, 2, "{name}");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_panics_release_waiters() {
    memocache_test::setup();

    let func: Func<u32, u32, ()> = Arc::new(|key| {
        async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            assert_ne!(key, 13, "unlucky key");
            Ok(key)
        }
        .boxed()
    });

    let memo = Memo::from_func(Arc::clone(&func));
    let monitor = memocache::MonitorMemo::from_func(func);
    let memos: [&dyn Memoize<u32, u32, ()>; 2] = [&memo, &monitor];

    for memo in memos {
        let results = tokio::time::timeout(
            Duration::from_secs(5),
            join_all((0..10).map(|_| memo.get(13))),
        )
        .await
        .expect("waiters must not hang on a panicked computation");

        for result in results {
            match result {
                Err(MemoError::Panicked(message)) => assert!(message.contains("unlucky key")),
                other => panic!("unexpected result: {other:?}"),
            }
        }
        assert_eq!(*memo.get(12).await.unwrap(), 12);
    }

    assert_eq!(memo.stats().failures, 1);
    assert_eq!(monitor.stats().failures, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_stress() {
    memocache_test::setup();

    const KEYS: u64 = 500;
    const TASKS: u64 = 64;

    for name in PARALLEL {
        let counter = Counter::new();
        let memo = build(name, slow_unique(&counter, Duration::from_millis(1)));

        let tasks = (0..TASKS).map(|task| {
            let memo = Arc::clone(&memo);
            tokio::spawn(async move {
                for i in 0..KEYS {
                    // 7919 is coprime to KEYS, so every task visits every key in its own order
                    let key = (i * 7919 + task * 104_729) % KEYS;
                    let (k, _) = *memo.get(key).await.unwrap();
                    assert_eq!(k, key);
                }
            })
        });
        for task in join_all(tasks).await {
            task.unwrap();
        }

        if name == "duplicating" {
            assert!(counter.get() as u64 >= KEYS, "{name}");
        } else {
            assert_eq!(counter.get() as u64, KEYS, "{name}");
        }
    }
}
