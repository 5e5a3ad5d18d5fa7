use std::fs;
use std::path::PathBuf;

use clap::Parser;
use figment::providers::{Format, Serialized, Toml};
use figment::Figment;
use imagedups::cli::Cli;
use imagedups::config::{Config, ConfigError, DatabaseLayout};
use imagedups::phash::Algorithm;
use tempfile::tempdir;

// The only test in this binary touching IMAGEDUPS_* variables.
#[test]
fn test_environment_overrides_file() {
    let dir = tempdir().unwrap();
    let file = dir.path().join("config.toml");
    fs::write(&file, "algorithm = \"mh\"\nthreshold = 80.0\n").unwrap();

    std::env::set_var("IMAGEDUPS_THRESHOLD", "97.5");
    std::env::set_var("IMAGEDUPS_LAYOUT", "sharded");
    let loaded = Config::load_from(Some(&file));
    std::env::remove_var("IMAGEDUPS_THRESHOLD");
    std::env::remove_var("IMAGEDUPS_LAYOUT");

    let config = loaded.unwrap();
    assert_eq!(config.algorithm, Algorithm::Mh);
    assert_eq!(config.threshold, 97.5);
    assert_eq!(config.layout, DatabaseLayout::Sharded);
}

#[test]
fn test_flags_override_config() {
    let dir = tempdir().unwrap();
    let file = dir.path().join("config.toml");
    fs::write(
        &file,
        "algorithm = \"mh\"\nthreshold = 80.0\ndbpath = \"/var/db.json.gz\"\n",
    )
    .unwrap();
    let mut config: Config = Config::figment(Some(&file)).extract().unwrap();

    let cli = Cli::parse_from([
        "imagedups",
        "-a",
        "radial",
        "-t",
        "95%",
        "--dbpath",
        "/tmp/other",
        "--sharded",
        "/photos",
    ]);
    cli.apply_to(&mut config);

    assert_eq!(config.algorithm, Algorithm::Radial);
    assert_eq!(config.threshold, 95.0);
    assert_eq!(config.dbpath, PathBuf::from("/tmp/other"));
    assert_eq!(config.layout, DatabaseLayout::Sharded);
    assert!((config.distance_threshold() - 0.05).abs() < 1e-9);
}

#[test]
fn test_unset_flags_keep_config() {
    let mut config = Config {
        algorithm: Algorithm::Mh,
        threshold: 70.0,
        ..Config::default()
    };
    let expected = config.clone();
    Cli::parse_from(["imagedups"]).apply_to(&mut config);
    assert_eq!(config, expected);
}

#[test]
fn test_bad_threshold_in_file() {
    let dir = tempdir().unwrap();
    let file = dir.path().join("config.toml");
    fs::write(&file, "threshold = 150.0\n").unwrap();

    // Without the environment layer, see test_environment_overrides_file.
    let config: Config = Figment::from(Serialized::defaults(Config::default()))
        .merge(Toml::file(&file))
        .extract()
        .unwrap();
    let err = config.validate().unwrap_err();
    assert!(matches!(err, ConfigError::InvalidThreshold(t) if t == 150.0));
}

#[test]
fn test_default_file_is_commented() {
    let dir = tempdir().unwrap();
    let file = dir.path().join("nested").join("config.toml");
    Config::write_defaults(&file).unwrap();

    let text = fs::read_to_string(&file).unwrap();
    assert!(text.starts_with("# imagedups configuration"));
    assert!(text.contains("threshold = 90.0"));
}
