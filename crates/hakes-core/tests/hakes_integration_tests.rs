//! End-to-end behavior of the two-stage index through the public API.

mod common;

use common::{build_filled, exact_config, generate_batch};
use hakes_core::{
    Collection, DistanceMetric, Error, FlatCollection, HakesConfig, IndexBuilder, Label,
    RerankCandidates, SearchParams,
};

const DIM: usize = 16;

#[test]
fn test_every_vector_finds_itself() {
    // Arrange
    let n = 200;
    let data = generate_batch(n, DIM, 1);
    let index = build_filled(exact_config(8, 8), n, DIM, &data);

    // Act
    let out = index
        .search(n, DIM, &data, &SearchParams::new(1))
        .expect("search");

    // Assert
    for i in 0..n {
        assert_eq!(out.labels_of(i)[0], i as Label, "query {i}");
        assert!(out.distances_of(i)[0].abs() < 1e-3);
    }
}

#[test]
fn test_inner_product_self_retrieval_on_unit_vectors() {
    let n = 128;
    let mut config = exact_config(4, 4);
    config.index.normalize = true;
    config.search.metric = DistanceMetric::InnerProduct;
    let data = generate_batch(n, DIM, 2);
    let index = build_filled(config, n, DIM, &data);

    let out = index
        .search(n, DIM, &data, &SearchParams::new(1))
        .expect("search");

    for i in 0..n {
        assert_eq!(out.labels_of(i)[0], i as Label, "query {i}");
        assert!((out.distances_of(i)[0] - 1.0).abs() < 1e-3);
    }
}

#[test]
fn test_rerank_matches_exact_oracle() {
    // Arrange
    let n = 200;
    let data = generate_batch(n, DIM, 3);
    let queries = generate_batch(5, DIM, 10_000);
    let index = build_filled(exact_config(8, 8), n, DIM, &data);
    let oracle = FlatCollection::new(DIM, &HakesConfig::default());
    let ids: Vec<Label> = (0..n as Label).collect();
    oracle.add_base(n, DIM, &data, &ids).expect("oracle add");

    // Act
    let first = index
        .search(5, DIM, &queries, &SearchParams::new(10).with_k_factor(5))
        .expect("search");
    let candidates = RerankCandidates::from_search(&first);
    let reranked = index
        .rerank(5, DIM, &queries, 10, &candidates)
        .expect("rerank");
    let exact = oracle
        .search(5, DIM, &queries, &SearchParams::new(10))
        .expect("oracle search");

    // Assert
    assert_eq!(first.k, 50);
    assert_eq!(reranked.labels, exact.labels);
    for (a, b) in reranked.distances.iter().zip(&exact.distances) {
        assert!((a - b).abs() < 1e-4);
    }
}

#[test]
fn test_sq8_refine_rerank_orders_candidates() {
    // Arrange
    let n = 200;
    let nq = 5;
    let data = generate_batch(n, DIM, 3);
    let mut config = exact_config(8, 8);
    config.index.use_refine_sq = true;
    let index = build_filled(config, n, DIM, &data);
    let oracle = FlatCollection::new(DIM, &HakesConfig::default());
    let ids: Vec<Label> = (0..n as Label).collect();
    oracle.add_base(n, DIM, &data, &ids).expect("oracle add");
    let queries = &data[..nq * DIM];

    // Act
    let first = index
        .search(nq, DIM, queries, &SearchParams::new(10).with_k_factor(5))
        .expect("search");
    let reranked = index
        .rerank(nq, DIM, queries, 10, &RerankCandidates::from_search(&first))
        .expect("rerank");
    let exact = oracle
        .search(nq, DIM, queries, &SearchParams::new(10))
        .expect("oracle search");

    // Assert
    assert!(index.stats().expect("stats").use_refine_sq);
    let mut hits = 0;
    for i in 0..nq {
        assert_eq!(reranked.labels_of(i)[0], i as Label, "query {i}");
        let d = reranked.distances_of(i);
        assert!(d.windows(2).all(|w| w[0] <= w[1]), "query {i}: {d:?}");
        hits += reranked
            .labels_of(i)
            .iter()
            .filter(|l| exact.labels_of(i).contains(l))
            .count();
    }
    assert!(hits >= nq * 8, "recall@10 {hits}/{}", nq * 10);
}

#[test]
fn test_rerank_with_four_bit_codes_keeps_best_candidates() {
    let n = 400;
    let mut config = HakesConfig::default();
    config.index.nlist = 8;
    config.index.pq_m = 8;
    config.search.nprobe = 8;
    let data = generate_batch(n, DIM, 4);
    let index = build_filled(config, n, DIM, &data);
    let query = &data[7 * DIM..8 * DIM];

    let first = index
        .search(1, DIM, query, &SearchParams::new(10).with_k_factor(10))
        .expect("search");
    let reranked = index
        .rerank(1, DIM, query, 10, &RerankCandidates::from_search(&first))
        .expect("rerank");

    assert_eq!(reranked.labels_of(0)[0], 7);
    let d = reranked.distances_of(0);
    assert!(d.windows(2).all(|w| w[0] <= w[1]));
}

#[test]
fn test_deleted_ids_never_surface() {
    // Arrange
    let n = 100;
    let data = generate_batch(n, DIM, 5);
    let index = build_filled(exact_config(4, 4), n, DIM, &data);
    let victims: Vec<Label> = (0..n as Label).step_by(3).collect();

    // Act
    index.delete_with_ids(&victims).expect("delete");
    let out = index
        .search(n, DIM, &data, &SearchParams::new(5))
        .expect("search");
    let all: Vec<Label> = (0..n as Label).collect();
    let zeros = vec![0.0; n];
    let candidates = RerankCandidates::new(&[n], &all, &zeros).expect("candidates");
    let reranked = index
        .rerank(1, DIM, &data[..DIM], n, &candidates)
        .expect("rerank");

    // Assert
    for label in out.labels.iter().chain(&reranked.labels) {
        assert!(*label == -1 || label % 3 != 0, "deleted id {label} returned");
    }
    assert_eq!(
        reranked.labels.iter().filter(|&&l| l != -1).count(),
        n - victims.len()
    );
}

#[test]
fn test_search_refills_slots_after_nearest_are_deleted() {
    // Arrange
    let n = 100;
    let data = generate_batch(n, DIM, 6);
    let index = build_filled(exact_config(4, 4), n, DIM, &data);
    let query = &data[42 * DIM..43 * DIM];
    let nearest = index
        .search(1, DIM, query, &SearchParams::new(5))
        .expect("search");
    let victims = nearest.labels_of(0).to_vec();

    // Act
    index.delete_with_ids(&victims).expect("delete");
    let first = index
        .search(1, DIM, query, &SearchParams::new(5).with_k_factor(2))
        .expect("search");
    let reranked = index
        .rerank(1, DIM, query, 5, &RerankCandidates::from_search(&first))
        .expect("rerank");

    // Assert
    assert!(victims.contains(&42));
    for out in [&first, &reranked] {
        let labels = out.labels_of(0);
        assert!(labels.iter().all(|&l| l != -1), "empty slot in {labels:?}");
        assert!(labels.iter().all(|l| !victims.contains(l)), "deleted id in {labels:?}");
    }
}

#[test]
fn test_deletion_is_idempotent_and_accepts_unknown_ids() {
    let n = 32;
    let data = generate_batch(n, DIM, 6);
    let index = build_filled(exact_config(4, 4), n, DIM, &data);

    index.delete_with_ids(&[1, 2, 2]).expect("delete");
    index.delete_with_ids(&[2, 1]).expect("delete again");
    index.delete_with_ids(&[9_999]).expect("unknown id");
    index.delete_with_ids(&[]).expect("empty");

    let stats = index.stats().expect("stats");
    assert_eq!(stats.deleted, 3);
    assert_eq!(stats.ntotal, n as u64);
}

#[test]
fn test_failed_insert_changes_nothing() {
    // Arrange
    let n = 64;
    let data = generate_batch(n, DIM, 7);
    let index = build_filled(exact_config(4, 4), n, DIM, &data);
    let before = index.stats().expect("stats");
    let params_before = index.get_params().expect("params");
    let fresh = generate_batch(4, DIM, 500);

    // Act
    let duplicate = index.add_base(4, DIM, &fresh, &[1000, 1001, 1002, 5]);
    let short = index.add_base(4, DIM, &fresh[..3 * DIM], &[1000, 1001, 1002, 1003]);
    let wrong_dim = index.add_with_ids(4, DIM / 2, &fresh[..2 * DIM], &[1000, 1001, 1002, 1003]);

    // Assert
    assert!(matches!(duplicate, Err(Error::DuplicateId(5))));
    assert!(matches!(short, Err(Error::InvalidBatch(_))));
    assert!(matches!(wrong_dim, Err(Error::DimensionMismatch { .. })));
    assert_eq!(index.stats().expect("stats"), before);
    assert_eq!(index.get_params().expect("params"), params_before);

    index
        .add_base(4, DIM, &fresh, &[1000, 1001, 1002, 1003])
        .expect("valid batch after failures");
    assert_eq!(index.stats().expect("stats").ntotal, n as u64 + 4);
}

#[test]
fn test_refine_upsert_overwrites() {
    let n = 16;
    let data = generate_batch(n, DIM, 8);
    let index = build_filled(exact_config(2, 4), n, DIM, &data);
    let query = data[..DIM].to_vec();

    index
        .add_refine(1, DIM, &generate_batch(1, DIM, 9_000), &[0])
        .expect("overwrite");
    let candidates = RerankCandidates::new(&[1], &[0], &[0.0]).expect("candidates");
    let out = index
        .rerank(1, DIM, &query, 1, &candidates)
        .expect("rerank");

    assert_eq!(out.labels_of(0), &[0]);
    assert!(out.distances_of(0)[0] > 1e-3);
    assert_eq!(index.stats().expect("stats").refine_len, n);
}

#[test]
fn test_update_index_snapshots_peer() {
    let n = 48;
    let data = generate_batch(n, DIM, 10);
    let source = build_filled(exact_config(4, 4), n, DIM, &data);
    let replica = IndexBuilder::new(exact_config(2, 4))
        .train(n, DIM, &data)
        .expect("train");

    replica.update_index(&source).expect("update");
    source
        .add_base(1, DIM, &generate_batch(1, DIM, 77_777), &[4_242])
        .expect("source keeps changing");

    let stats = replica.stats().expect("stats");
    assert_eq!(stats.ntotal, n as u64);
    assert_eq!(stats.nlist, 4);
    let out = replica
        .search(1, DIM, &data[3 * DIM..4 * DIM], &SearchParams::new(1))
        .expect("search");
    assert_eq!(out.labels_of(0), &[3]);
}

#[test]
fn test_query_transforms_can_be_replaced_at_runtime() {
    // Arrange
    let n = 64;
    let data = generate_batch(n, DIM, 11);
    let index = build_filled(exact_config(4, 4), n, DIM, &data);
    let scaled: Vec<f32> = data[..DIM].iter().map(|x| x * 2.0).collect();
    let mut halve = String::from("[[query_transforms]]\nkind = \"linear\"\n");
    halve.push_str(&format!("d_in = {DIM}\nd_out = {DIM}\nmatrix = ["));
    for r in 0..DIM {
        for c in 0..DIM {
            let v = if r == c { 0.5 } else { 0.0 };
            halve.push_str(&format!("{v:?}, "));
        }
    }
    halve.push_str("]\n");

    // Act
    let before = index
        .search(1, DIM, &scaled, &SearchParams::new(1))
        .expect("search");
    index.update_params(&halve).expect("update");
    let after = index
        .search(1, DIM, &scaled, &SearchParams::new(1))
        .expect("search");

    // Assert
    assert!(before.distances_of(0)[0] > 1e-3);
    assert_eq!(after.labels_of(0), &[0]);
    assert!(after.distances_of(0)[0].abs() < 1e-3);
    assert!(index.get_params().expect("params").contains("query_transforms"));
}

#[test]
fn test_incompatible_query_transforms_rejected() {
    let n = 32;
    let data = generate_batch(n, DIM, 12);
    let index = build_filled(exact_config(4, 4), n, DIM, &data);
    let before = index.get_params().expect("params");

    let result = index.update_params(
        "[search]\nnprobe = 1\n\n[[query_transforms]]\nkind = \"normalize\"\nd_in = 3\nd_out = 3\n",
    );

    assert!(result.is_err());
    assert_eq!(index.get_params().expect("params"), before);
}
