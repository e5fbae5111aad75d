//! Stress tests for concurrent index operations.
//!
//! Every thread runs a finite number of operations so that writers cannot
//! be starved by a time-based reader loop.

mod common;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use common::{build_filled, exact_config, generate_batch, generate_vector};
use hakes_core::{Collection, Label, RerankCandidates, SearchParams};

const DIM: usize = 16;

fn run_index_stress(readers: usize, writers: usize, ops: usize, batch: usize) {
    // Arrange
    let seed_n = 128;
    let data = generate_batch(seed_n, DIM, 1);
    let index = Arc::new(build_filled(exact_config(8, 4), seed_n, DIM, &data));
    let searches = Arc::new(AtomicU64::new(0));

    // Act
    let mut handles = Vec::new();
    for w in 0..writers {
        let index = Arc::clone(&index);
        handles.push(thread::spawn(move || {
            for op in 0..ops {
                let first = (1_000_000 * (w + 1) + op * batch) as Label;
                let ids: Vec<Label> = (first..first + batch as Label).collect();
                let vectors = generate_batch(batch, DIM, first as u64);
                // Refine first: a reader may rerank an id as soon as it is searchable.
                index
                    .add_refine(batch, DIM, &vectors, &ids)
                    .expect("add_refine");
                index.add_base(batch, DIM, &vectors, &ids).expect("add_base");
                index.delete_with_ids(&ids[..1]).expect("delete");
                if op % 5 == 0 {
                    index
                        .update_params("[search]\nnprobe = 8\nk_factor = 2\n")
                        .expect("update_params");
                }
            }
        }));
    }
    for r in 0..readers {
        let index = Arc::clone(&index);
        let searches = Arc::clone(&searches);
        handles.push(thread::spawn(move || {
            for op in 0..ops {
                let query = generate_vector(DIM, (r * 10_000 + op) as u64);
                let first = index
                    .search(1, DIM, &query, &SearchParams::new(5))
                    .expect("search");
                let candidates = RerankCandidates::from_search(&first);
                let out = index
                    .rerank(1, DIM, &query, 5, &candidates)
                    .expect("rerank");
                assert!(out.distances_of(0).windows(2).all(|w| w[0] <= w[1]));
                searches.fetch_add(1, Ordering::Relaxed);
            }
        }));
    }
    for h in handles {
        h.join().expect("thread panicked");
    }

    // Assert
    let stats = index.stats().expect("stats");
    let inserted = (writers * ops * batch) as u64;
    assert_eq!(stats.ntotal, seed_n as u64 + inserted);
    assert_eq!(stats.mapped as u64, stats.ntotal);
    assert_eq!(stats.refine_len as u64, stats.ntotal);
    assert_eq!(stats.deleted, (writers * ops) as u64);
    assert_eq!(searches.load(Ordering::Relaxed), (readers * ops) as u64);

    let out = index
        .search(seed_n, DIM, &data, &SearchParams::new(1))
        .expect("search");
    for i in 0..seed_n {
        assert_eq!(out.labels_of(i)[0], i as Label, "seed vector {i}");
    }
}

/// Smoke test: 2 readers + 2 writers.
#[test]
fn test_stress_smoke_4_threads() {
    run_index_stress(2, 2, 10, 4);
}

/// 8 readers + 8 writers.
#[test]
fn test_stress_16_threads() {
    run_index_stress(8, 8, 25, 8);
}

#[test]
fn test_concurrent_checkpoint_and_search() {
    let dir = tempfile::tempdir().expect("tempdir");
    let n = 64;
    let data = generate_batch(n, DIM, 2);
    let index = Arc::new(build_filled(exact_config(4, 4), n, DIM, &data));

    let mut handles = Vec::new();
    for t in 0..4 {
        let index = Arc::clone(&index);
        let path = dir.path().join(format!("ckpt-{t}"));
        handles.push(thread::spawn(move || {
            for _ in 0..3 {
                index.checkpoint(&path).expect("checkpoint");
            }
        }));
    }
    for t in 0..4 {
        let index = Arc::clone(&index);
        handles.push(thread::spawn(move || {
            for op in 0..20 {
                let query = generate_vector(DIM, (t * 100 + op) as u64);
                index
                    .search(1, DIM, &query, &SearchParams::new(3))
                    .expect("search");
            }
        }));
    }
    for h in handles {
        h.join().expect("thread panicked");
    }

    for t in 0..4 {
        let loaded = hakes_core::HakesIndex::new();
        loaded
            .initialize(&dir.path().join(format!("ckpt-{t}")), hakes_core::LoadMode::Full, false)
            .expect("initialize");
        assert_eq!(loaded.stats(), index.stats());
    }
}

#[test]
fn test_concurrent_checkpoints_to_same_path() {
    // Arrange
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("ckpt");
    let n = 64;
    let data = generate_batch(n, DIM, 3);
    let index = Arc::new(build_filled(exact_config(4, 4), n, DIM, &data));

    // Act
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let index = Arc::clone(&index);
            let path = path.clone();
            thread::spawn(move || {
                (0..20)
                    .filter(|_| index.checkpoint(&path).is_err())
                    .count()
            })
        })
        .collect();
    let failures: usize = handles
        .into_iter()
        .map(|h| h.join().expect("thread panicked"))
        .sum();

    // Assert
    assert_eq!(failures, 0);
    let entries: Vec<_> = std::fs::read_dir(dir.path())
        .expect("read_dir")
        .filter_map(Result::ok)
        .map(|e| e.file_name())
        .collect();
    assert_eq!(entries, vec![std::ffi::OsString::from("ckpt")]);
    let loaded = hakes_core::HakesIndex::new();
    loaded
        .initialize(&path, hakes_core::LoadMode::Full, false)
        .expect("initialize");
    assert_eq!(loaded.stats(), index.stats());
}

/// 16 readers, no writers: every thread sees exactly the single-threaded answer.
#[test]
fn test_readers_only_match_single_threaded_baseline() {
    // Arrange
    let n = 256;
    let nq = 32;
    let data = generate_batch(n, DIM, 4);
    let index = Arc::new(build_filled(exact_config(8, 4), n, DIM, &data));
    let queries = Arc::new(generate_batch(nq, DIM, 50_000));
    let params = SearchParams::new(10).with_k_factor(2);
    let baseline_first = index
        .search(nq, DIM, &queries, &params)
        .expect("baseline search");
    let baseline = index
        .rerank(
            nq,
            DIM,
            &queries,
            10,
            &RerankCandidates::from_search(&baseline_first),
        )
        .expect("baseline rerank");

    // Act
    let handles: Vec<_> = (0..16)
        .map(|_| {
            let index = Arc::clone(&index);
            let queries = Arc::clone(&queries);
            thread::spawn(move || {
                (0..10)
                    .map(|_| {
                        let first = index
                            .search(nq, DIM, &queries, &params)
                            .expect("search");
                        let out = index
                            .rerank(nq, DIM, &queries, 10, &RerankCandidates::from_search(&first))
                            .expect("rerank");
                        (first, out)
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    // Assert
    for h in handles {
        for (first, out) in h.join().expect("thread panicked") {
            assert_eq!(first.labels, baseline_first.labels);
            assert_eq!(first.distances, baseline_first.distances);
            assert_eq!(out.labels, baseline.labels);
            assert_eq!(out.distances, baseline.distances);
        }
    }
}
