//! Tests for config module

#[cfg(test)]
mod tests {
    use crate::config::*;
    use crate::distance::DistanceMetric;

    // ========================================================================
    // Defaults
    // ========================================================================

    #[test]
    fn test_config_default_values() {
        // Arrange & Act
        let config = HakesConfig::default();

        // Assert
        assert_eq!(config.search.nprobe, 8);
        assert_eq!(config.search.k_factor, 1);
        assert_eq!(config.search.metric, DistanceMetric::L2);
        assert!(!config.search.use_query_path);
        assert_eq!(config.rerank.missing_label, MissingLabelPolicy::Strict);
        assert_eq!(config.index.pq_nbits, 4);
        assert!(config.index.reduce_dim.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_label_policy_serialization() {
        let json = serde_json::to_string(&MissingLabelPolicy::SkipMissing).expect("serialize");
        assert_eq!(json, "\"skip_missing\"");
    }

    // ========================================================================
    // TOML parsing
    // ========================================================================

    #[test]
    fn test_config_from_toml_minimal() {
        // Arrange
        let toml_str = r#"
            [search]
            nprobe = 32
        "#;

        // Act
        let config = HakesConfig::from_toml(toml_str).expect("parse");

        // Assert
        assert_eq!(config.search.nprobe, 32);
        assert_eq!(config.search.k_factor, 1);
        assert_eq!(config.index.nlist, 64);
    }

    #[test]
    fn test_config_from_toml_full() {
        let toml_str = r#"
            [search]
            nprobe = 4
            k_factor = 5
            metric = "inner_product"
            use_query_path = true

            [rerank]
            missing_label = "skip_missing"

            [index]
            nlist = 16
            pq_m = 4
            pq_nbits = 8
            use_ivf_sq = true
            use_refine_sq = true
            with_query_path = true
            normalize = true
            rotate = true
            reduce_dim = 32
            kmeans_iters = 5
            seed = 7

            [limits]
            max_dimension = 1024
            max_batch = 500
            max_k = 256
        "#;

        let config = HakesConfig::from_toml(toml_str).expect("parse");

        assert_eq!(config.search.metric, DistanceMetric::InnerProduct);
        assert_eq!(config.search.k_factor, 5);
        assert!(config.search.use_query_path);
        assert_eq!(config.rerank.missing_label, MissingLabelPolicy::SkipMissing);
        assert_eq!(config.index.reduce_dim, Some(32));
        assert!(config.index.use_ivf_sq);
        assert!(config.index.use_refine_sq);
        assert_eq!(config.limits.max_batch, 500);
        assert_eq!(config.limits.max_k, 256);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_toml_invalid_metric() {
        let toml_str = r#"
            [search]
            metric = "cosine_but_not_really"
        "#;
        assert!(HakesConfig::from_toml(toml_str).is_err());
    }

    #[test]
    fn test_load_from_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config =
            HakesConfig::load_from_path(dir.path().join("absent.toml")).expect("defaults");
        assert_eq!(config.search.nprobe, SearchConfig::default().nprobe);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("hakes.toml");
        std::fs::write(&path, "[index]\nnlist = 12\n").expect("write");

        let config = HakesConfig::load_from_path(&path).expect("load");

        assert_eq!(config.index.nlist, 12);
    }

    // ========================================================================
    // Validation
    // ========================================================================

    #[test]
    fn test_config_validate_nprobe_zero() {
        let mut config = HakesConfig::default();
        config.search.nprobe = 0;

        let result = config.validate();

        assert!(
            matches!(result, Err(ConfigError::InvalidValue { ref key, .. }) if key == "search.nprobe")
        );
    }

    #[test]
    fn test_config_validate_bad_nbits() {
        let mut config = HakesConfig::default();
        config.index.pq_nbits = 6;
        assert!(
            matches!(config.validate(), Err(ConfigError::InvalidValue { ref key, .. }) if key == "index.pq_nbits")
        );
    }

    #[test]
    fn test_config_validate_reduce_dim_not_divisible() {
        let mut config = HakesConfig::default();
        config.index.pq_m = 8;
        config.index.reduce_dim = Some(30);
        assert!(
            matches!(config.validate(), Err(ConfigError::InvalidValue { ref key, .. }) if key == "index.reduce_dim")
        );
    }

    #[test]
    fn test_config_validate_k_factor_range() {
        let mut config = HakesConfig::default();
        config.search.k_factor = 0;
        assert!(config.validate().is_err());
        config.search.k_factor = 10;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validate_max_k_zero() {
        let mut config = HakesConfig::default();
        assert_eq!(config.limits.max_k, 10_000);
        config.limits.max_k = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref key, .. }) if key == "limits.max_k"
        ));
    }

    // ========================================================================
    // Serialization
    // ========================================================================

    #[test]
    fn test_config_roundtrip() {
        // Arrange
        let mut config = HakesConfig::default();
        config.search.nprobe = 17;
        config.index.reduce_dim = Some(16);
        config.rerank.missing_label = MissingLabelPolicy::SkipMissing;

        // Act
        let toml_str = config.to_toml().expect("to_toml");
        let parsed = HakesConfig::from_toml(&toml_str).expect("from_toml");

        // Assert
        assert_eq!(parsed.search, config.search);
        assert_eq!(parsed.rerank, config.rerank);
        assert_eq!(parsed.index.reduce_dim, Some(16));
    }
}
