//! Tests for `error` module

use super::error::*;

#[test]
fn test_error_codes_are_unique() {
    // Arrange - create all error variants
    let errors: Vec<Error> = vec![
        Error::DimensionMismatch {
            expected: 128,
            actual: 64,
        },
        Error::InvalidBatch("test".into()),
        Error::DuplicateId(7),
        Error::NotInitialized,
        Error::InvalidState("test".into()),
        Error::MissingRefineLabel(3),
        Error::InvalidParams("test".into()),
        Error::Checkpoint("test".into()),
        Error::CorruptedArtifact("test".into()),
        Error::Io(std::io::Error::other("test")),
        Error::Serialization("test".into()),
        Error::Config("test".into()),
        Error::Internal("test".into()),
    ];

    // Act
    let codes: Vec<&str> = errors.iter().map(Error::code).collect();

    // Assert
    let mut unique_codes = codes.clone();
    unique_codes.sort_unstable();
    unique_codes.dedup();
    assert_eq!(codes.len(), unique_codes.len(), "Error codes must be unique");

    for code in &codes {
        assert!(
            code.starts_with("HAKES-"),
            "Code {code} should start with HAKES-"
        );
    }
}

#[test]
fn test_error_display_includes_code() {
    // Arrange
    let err = Error::MissingRefineLabel(42);

    // Act
    let display = format!("{err}");

    // Assert
    assert!(display.contains("HAKES-006"));
    assert!(display.contains("42"));
}

#[test]
fn test_dimension_mismatch_display() {
    let err = Error::DimensionMismatch {
        expected: 128,
        actual: 96,
    };
    let display = err.to_string();
    assert!(display.contains("expected 128"));
    assert!(display.contains("got 96"));
}

#[test]
fn test_recoverability() {
    assert!(Error::NotInitialized.is_recoverable());
    assert!(Error::Io(std::io::Error::other("disk full")).is_recoverable());
    assert!(Error::InvalidParams("bad".into()).is_recoverable());
    assert!(!Error::CorruptedArtifact("crc".into()).is_recoverable());
    assert!(!Error::Internal("bug".into()).is_recoverable());
}

#[test]
fn test_io_error_conversion() {
    // Arrange
    let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");

    // Act
    let err: Error = io_err.into();

    // Assert
    assert_eq!(err.code(), "HAKES-010");
}
