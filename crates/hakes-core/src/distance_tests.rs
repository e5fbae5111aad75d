//! Tests for `distance` module

use super::distance::*;

#[test]
fn test_l2_squared_basic() {
    let a = [1.0, 2.0, 3.0];
    let b = [1.0, 0.0, 5.0];
    assert!((l2_squared(&a, &b) - 8.0).abs() < f32::EPSILON);
    assert!((DistanceMetric::L2.calculate(&a, &a)).abs() < f32::EPSILON);
}

#[test]
fn test_inner_product_basic() {
    let a = [1.0, 2.0, 3.0];
    let b = [4.0, -1.0, 0.5];
    assert!((inner_product(&a, &b) - 3.5).abs() < 1e-6);
    assert!((DistanceMetric::InnerProduct.calculate(&a, &b) - 3.5).abs() < 1e-6);
}

#[test]
fn test_compare_respects_direction() {
    use std::cmp::Ordering;

    assert_eq!(DistanceMetric::L2.compare(1.0, 2.0), Ordering::Less);
    assert_eq!(DistanceMetric::InnerProduct.compare(1.0, 2.0), Ordering::Greater);
    assert!(DistanceMetric::L2.worst().is_infinite());
    assert!(DistanceMetric::InnerProduct.worst() < 0.0);
}

#[test]
fn test_sort_results_breaks_ties_on_label() {
    // Arrange
    let mut rows: Vec<(i64, f32)> = vec![(9, 1.0), (3, 0.5), (4, 1.0), (1, 2.0)];

    // Act
    DistanceMetric::L2.sort_results(&mut rows);

    // Assert
    let labels: Vec<i64> = rows.iter().map(|r| r.0).collect();
    assert_eq!(labels, vec![3, 4, 9, 1]);
}

#[test]
fn test_topk_keeps_best_l2() {
    // Arrange
    let mut top = TopK::new(3, DistanceMetric::L2);

    // Act
    for (label, score) in [(1_i64, 5.0), (2, 1.0), (3, 4.0), (4, 0.5), (5, 9.0), (6, 2.0)] {
        top.push(label, score);
    }

    // Assert
    let out = top.into_sorted();
    assert_eq!(out, vec![(4, 0.5), (2, 1.0), (6, 2.0)]);
}

#[test]
fn test_topk_keeps_best_inner_product() {
    let mut top = TopK::new(2, DistanceMetric::InnerProduct);
    for (label, score) in [(1_i64, 0.1), (2, 0.9), (3, 0.5)] {
        top.push(label, score);
    }
    assert_eq!(top.into_sorted(), vec![(2, 0.9), (3, 0.5)]);
}

#[test]
fn test_topk_zero_capacity() {
    let mut top = TopK::new(0, DistanceMetric::L2);
    top.push(1_i64, 0.0);
    assert!(top.into_sorted().is_empty());
}

#[test]
fn test_fill_row_pads_missing_slots() {
    // Arrange
    let row = vec![(7_i64, 0.25_f32)];
    let mut labels = vec![0_i64; 3];
    let mut distances = vec![0.0_f32; 3];

    // Act
    fill_row(&row, DistanceMetric::L2, &mut labels, &mut distances);

    // Assert
    assert_eq!(labels, vec![7, -1, -1]);
    assert!((distances[0] - 0.25).abs() < f32::EPSILON);
    assert!(distances[1].is_infinite());
}
