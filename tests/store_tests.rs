//! File-backed token store behavior across instances and realms.

use std::fs;

use chrono::{Duration, Utc};
use ledger_oauth::auth::{FileTokenStore, TokenRecord, TokenStore, TokenStoreConfig};
use ledger_oauth::AuthError;
use tempfile::TempDir;

fn record(realm: &str, access: &str) -> TokenRecord {
    let now = Utc::now();
    TokenRecord {
        access_token: access.to_string(),
        refresh_token: format!("{access}-refresh"),
        access_expires_at: now + Duration::hours(1),
        refresh_expires_at: Some(now + Duration::days(100)),
        realm: realm.to_string(),
        issued_at: now,
    }
}

fn store_in(dir: &TempDir) -> FileTokenStore {
    FileTokenStore::new(TokenStoreConfig::new(dir.path().to_path_buf()))
}

#[test]
fn record_survives_new_store_instance() {
    let dir = TempDir::new().unwrap();
    let saved = record("9341454425005330", "first");
    store_in(&dir).save(&saved).unwrap();

    let loaded = store_in(&dir).load("9341454425005330").unwrap().unwrap();
    assert_eq!(loaded, saved);
}

#[test]
fn realms_are_stored_independently() {
    let dir = TempDir::new().unwrap();
    let store = store_in(&dir);
    store.save(&record("realm-a", "a")).unwrap();
    store.save(&record("realm-b", "b")).unwrap();

    store.clear("realm-a").unwrap();

    assert!(store.load("realm-a").unwrap().is_none());
    assert_eq!(store.load("realm-b").unwrap().unwrap().access_token, "b");
}

#[test]
fn save_replaces_previous_record() {
    let dir = TempDir::new().unwrap();
    let store = store_in(&dir);
    store.save(&record("realm", "old")).unwrap();
    store.save(&record("realm", "new")).unwrap();

    let loaded = store.load("realm").unwrap().unwrap();
    assert_eq!(loaded.access_token, "new");
    assert_eq!(loaded.refresh_token, "new-refresh");
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
}

#[test]
fn unsupported_version_is_rejected() {
    let dir = TempDir::new().unwrap();
    let store = store_in(&dir);
    store.save(&record("realm", "a")).unwrap();
    let path = dir.path().join("realm.toml");
    let raw = fs::read_to_string(&path).unwrap();
    fs::write(&path, raw.replacen("version = 1", "version = 99", 1)).unwrap();

    assert!(matches!(store.load("realm"), Err(AuthError::Persistence(_))));
}

#[test]
fn file_for_another_realm_is_rejected() {
    let dir = TempDir::new().unwrap();
    let store = store_in(&dir);
    store.save(&record("realm-a", "a")).unwrap();
    fs::copy(
        dir.path().join("realm-a.toml"),
        dir.path().join("realm-b.toml"),
    )
    .unwrap();

    assert!(matches!(store.load("realm-b"), Err(AuthError::Persistence(_))));
}

#[cfg(unix)]
#[test]
fn token_file_is_owner_only() {
    use std::os::unix::fs::PermissionsExt;

    let dir = TempDir::new().unwrap();
    store_in(&dir).save(&record("realm", "a")).unwrap();
    let mode = fs::metadata(dir.path().join("realm.toml"))
        .unwrap()
        .permissions()
        .mode();
    assert_eq!(mode & 0o777, 0o600);
}

#[test]
fn realms_differing_in_case_or_punctuation_do_not_collide() {
    let dir = TempDir::new().unwrap();
    let store = store_in(&dir);
    store.save(&record("Acme.1", "a-token")).unwrap();
    store.save(&record("acme-1", "b-token")).unwrap();
    store.save(&record("ACME-1", "c-token")).unwrap();

    assert_eq!(store.load("Acme.1").unwrap().unwrap().access_token, "a-token");
    assert_eq!(store.load("acme-1").unwrap().unwrap().access_token, "b-token");
    assert_eq!(store.load("ACME-1").unwrap().unwrap().access_token, "c-token");
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 3);
}

#[test]
fn save_onto_unwritable_target_fails_without_leftovers() {
    let dir = TempDir::new().unwrap();
    let store = store_in(&dir);
    store.save(&record("realm-a", "a")).unwrap();
    let occupied = dir.path().join("realm-b.toml");
    fs::create_dir(&occupied).unwrap();
    fs::write(occupied.join("keep"), "x").unwrap();

    let result = store.save(&record("realm-b", "b"));

    assert!(matches!(result, Err(AuthError::Persistence(_))));
    assert_eq!(store.load("realm-a").unwrap().unwrap().access_token, "a");
    let names: Vec<_> = fs::read_dir(dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert!(names.iter().all(|name| !name.contains(".tmp-")), "{names:?}");
}
