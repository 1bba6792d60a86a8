use std::{env::temp_dir, fs};

use imap_mirror::config::{Config, Error, DEFAULT_WORKERS};

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn write_config(name: &str, content: &str) -> std::path::PathBuf {
    init();
    let dir = temp_dir().join("imap-mirror-config-tests");
    fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    fs::write(&path, content).unwrap();
    path
}

#[test]
fn test_load_json_config() {
    let path = write_config(
        "config.json",
        r#"{
            "workers": 3,
            "src": {
                "label": "old",
                "server": "imap.old.example:993",
                "user": "user@old.example",
                "pass": "secret"
            },
            "dst": {
                "server": "imap.new.example:143",
                "user": "user@new.example",
                "pass": "secret",
                "use-tls": false
            },
            "map": [
                {"src": "INBOX", "dst": "INBOX"},
                {"src": "Archive", "dst": "Backup/Archive"}
            ]
        }"#,
    );

    let config = Config::from_file(&path).unwrap();

    assert_eq!(3, config.workers);
    assert_eq!("old", config.src.label);
    assert_eq!("dst", config.dst.label);
    assert!(config.src.use_tls);
    assert!(!config.dst.use_tls);
    assert_eq!(2, config.mappings.len());
    assert_eq!("Backup/Archive", config.mappings[1].destination);
    assert_eq!(
        (String::from("imap.old.example"), 993),
        config.src.addr().unwrap()
    );
}

#[test]
fn test_load_yaml_config() {
    let path = write_config(
        "config.yml",
        r#"
src:
  server: imap.old.example:993
  user: user@old.example
  pass: secret
dst:
  server: imap.new.example:993
  user: user@new.example
  pass: secret
map:
  - src: INBOX
    dst: INBOX
"#,
    );

    let config = Config::from_file(&path).unwrap();

    assert_eq!(DEFAULT_WORKERS, config.workers);
    assert_eq!("src", config.src.label);
    assert_eq!("dst", config.dst.label);
    assert_eq!(1, config.mappings.len());
}

#[test]
fn test_load_config_rejects_unknown_extension() {
    let path = write_config("config.toml", "workers = 2");

    assert!(matches!(
        Config::from_file(&path),
        Err(Error::UnsupportedConfigFormatError(_))
    ));
}

#[test]
fn test_load_config_rejects_missing_file() {
    let path = temp_dir().join("imap-mirror-config-tests/does-not-exist.json");

    assert!(matches!(
        Config::from_file(&path),
        Err(Error::ReadConfigFileError(..))
    ));
}

#[test]
fn test_load_config_rejects_incomplete_credentials() {
    let path = write_config(
        "incomplete.json",
        r#"{
            "src": {"server": "imap.old.example:993", "user": "user", "pass": "secret"},
            "dst": {"server": "imap.new.example:993", "user": "user"}
        }"#,
    );

    assert!(matches!(
        Config::from_file(&path),
        Err(Error::MissingValueError("destination password"))
    ));
}
