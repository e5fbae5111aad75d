//! Tests for `coarse` module

use super::coarse::{CoarseQuantizer, FlatCentroids, Sq8Centroids};
use crate::distance::DistanceMetric;

fn grid() -> FlatCentroids {
    // Four centroids on the corners of a square.
    FlatCentroids::new(
        2,
        4,
        vec![0.0, 0.0, 10.0, 0.0, 0.0, 10.0, 10.0, 10.0],
    )
    .expect("centroids")
}

#[test]
fn test_assign_picks_nearest() {
    let c = grid();
    assert_eq!(c.assign(&[1.0, 1.0]), 0);
    assert_eq!(c.assign(&[9.0, 1.0]), 1);
    assert_eq!(c.assign(&[9.0, 9.5]), 3);
}

#[test]
fn test_probe_orders_best_first() {
    // Arrange
    let c = grid();

    // Act
    let probes = c.probe(&[2.0, 3.0], 3, DistanceMetric::L2);

    // Assert
    let lists: Vec<usize> = probes.iter().map(|p| p.0).collect();
    assert_eq!(lists, vec![0, 2, 1]);
    assert!(probes.windows(2).all(|w| w[0].1 <= w[1].1));
}

#[test]
fn test_probe_inner_product_prefers_large_dot() {
    let c = grid();
    let probes = c.probe(&[1.0, 1.0], 2, DistanceMetric::InnerProduct);
    assert_eq!(probes[0].0, 3);
    assert!((probes[0].1 - 20.0).abs() < 1e-6);
}

#[test]
fn test_probe_clamps_to_nlist() {
    let c = grid();
    assert_eq!(c.probe(&[0.0, 0.0], 100, DistanceMetric::L2).len(), 4);
}

#[test]
fn test_residual() {
    let c = grid();
    assert_eq!(c.residual(&[11.0, 12.0], 3), vec![1.0, 2.0]);
}

#[test]
fn test_sq8_assignment_matches_flat() {
    let flat = grid();
    let sq = Sq8Centroids::from_flat(&flat).expect("sq8");

    for p in [[1.0, 1.0], [8.0, 2.0], [3.0, 9.0], [7.0, 7.0]] {
        assert_eq!(sq.assign(&p), flat.assign(&p), "point {p:?}");
    }
    assert_eq!(sq.nlist(), 4);
    assert_eq!(sq.dim(), 2);
}

#[test]
fn test_new_rejects_bad_shape() {
    assert!(FlatCentroids::new(2, 3, vec![0.0; 5]).is_err());
    assert!(FlatCentroids::new(0, 3, Vec::new()).is_err());
}
