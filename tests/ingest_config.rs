// tests/ingest_config.rs
use forem_ingest::config::job::{ENV_CONFIG_PATH, ENV_VARS};
use forem_ingest::{JobConfig, Mode};
use std::{env, fs};

fn clear_env() {
    env::remove_var(ENV_CONFIG_PATH);
    for k in ENV_VARS {
        env::remove_var(k);
    }
}

#[test]
fn parse_toml_and_json_paths() {
    let dir = tempfile::tempdir().unwrap();

    let p_toml = dir.path().join("ingest.toml");
    fs::write(
        &p_toml,
        r#"
container = "articles"
backfill_mode = true
max_pages_per_run = 3
"#,
    )
    .unwrap();
    let t = JobConfig::load_from(&p_toml).unwrap();
    assert_eq!(t.container, "articles");
    assert_eq!(t.mode(), Mode::Backfill { max_pages: 3 });
    // unspecified keys keep defaults
    assert_eq!(t.per_page, 300);

    let p_json = dir.path().join("ingest.json");
    fs::write(&p_json, r#"{"per_page": 50, "incremental_max_pages": 4}"#).unwrap();
    let j = JobConfig::load_from(&p_json).unwrap();
    assert_eq!(j.per_page, 50);
    assert_eq!(j.incremental_max_pages, 4);
    assert_eq!(j.mode(), Mode::Incremental);

    let bad = dir.path().join("bad.toml");
    fs::write(&bad, "per_page = \"many\"").unwrap();
    assert!(JobConfig::load_from(&bad).is_err());
}

#[serial_test::serial]
#[test]
fn default_uses_env_path_then_fallbacks_then_env_overrides() {
    // Isolate CWD so the repo's own config/ is not picked up
    let old = env::current_dir().unwrap();
    let tmp = tempfile::tempdir().unwrap();
    env::set_current_dir(tmp.path()).unwrap();
    clear_env();

    // 1) nothing of ours set → defaults, whatever the runtime exports
    env::set_var("CONTAINER_NAME", "host-box");
    let v = JobConfig::load_default().unwrap();
    assert_eq!(v, JobConfig::default());

    // 2) fallback TOML in ./config/
    let cfg_dir = tmp.path().join("config");
    fs::create_dir_all(&cfg_dir).unwrap();
    fs::write(cfg_dir.join("ingest.toml"), "per_page = 120").unwrap();
    assert_eq!(JobConfig::load_default().unwrap().per_page, 120);

    // 3) explicit path wins over the fallback
    let p_env = tmp.path().join("elsewhere.json");
    fs::write(&p_env, r#"{"per_page": 7}"#).unwrap();
    env::set_var(ENV_CONFIG_PATH, p_env.display().to_string());
    assert_eq!(JobConfig::load_default().unwrap().per_page, 7);

    // 4) env vars override the file
    env::set_var("PER_PAGE", "9");
    env::set_var("BACKFILL_MODE", "TRUE");
    env::set_var("MAX_PAGES_PER_RUN", "2");
    env::set_var("BLOB_CONN_STR", "memory:");
    let v = JobConfig::load_default().unwrap();
    assert_eq!(v.per_page, 9);
    assert_eq!(v.mode(), Mode::Backfill { max_pages: 2 });
    assert_eq!(v.blob_conn_str.as_deref(), Some("memory:"));

    // 5) a dangling explicit path is an error
    env::set_var(ENV_CONFIG_PATH, tmp.path().join("missing.toml").display().to_string());
    assert!(JobConfig::load_default().is_err());

    clear_env();
    env::remove_var("CONTAINER_NAME");
    env::set_current_dir(&old).unwrap();
}
