use std::time::Duration;

use aigate_common::Provider;
use aigate_provider::pool::ProviderPoolManager;
use serde_json::json;

fn write_pools_file(dir: &tempfile::TempDir, value: serde_json::Value) -> std::path::PathBuf {
    let path = dir.path().join("provider_pools.json");
    std::fs::write(&path, serde_json::to_vec_pretty(&value).unwrap()).unwrap();
    path
}

fn three_entry_pool() -> serde_json::Value {
    json!({
        "openai-custom": [
            {"uuid": "a", "OPENAI_API_KEY": "key-a"},
            {"uuid": "b", "OPENAI_API_KEY": "key-b"},
            {"uuid": "c", "OPENAI_API_KEY": "key-c"}
        ]
    })
}

// Scenario S4: three healthy entries round-robin; after one entry fails
// three times the rotation continues over the survivors.
#[tokio::test]
async fn round_robin_skips_an_entry_that_fails_out() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_pools_file(&dir, three_entry_pool());
    let pool = ProviderPoolManager::load(&path).unwrap();

    let mut picks = Vec::new();
    for _ in 0..3 {
        picks.push(pool.select(Provider::OpenAICustom).await.unwrap().uuid);
    }
    assert_eq!(picks, vec!["a", "b", "c"]);

    for _ in 0..3 {
        pool.mark_unhealthy(Provider::OpenAICustom, "b").await;
    }

    let mut picks = Vec::new();
    for _ in 0..5 {
        picks.push(pool.select(Provider::OpenAICustom).await.unwrap().uuid);
    }
    assert_eq!(picks, vec!["a", "c", "a", "c", "a"]);
}

// Invariant 3: an unhealthy entry is never selected until marked healthy,
// and errors below the threshold do not disable the entry.
#[tokio::test]
async fn unhealthy_entries_are_excluded_until_marked_healthy() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_pools_file(
        &dir,
        json!({
            "openai-custom": [
                {"uuid": "only", "OPENAI_API_KEY": "key"}
            ]
        }),
    );
    let pool = ProviderPoolManager::load(&path).unwrap();

    pool.mark_unhealthy(Provider::OpenAICustom, "only").await;
    pool.mark_unhealthy(Provider::OpenAICustom, "only").await;
    assert!(pool.select(Provider::OpenAICustom).await.is_some());

    pool.mark_unhealthy(Provider::OpenAICustom, "only").await;
    for _ in 0..4 {
        assert!(pool.select(Provider::OpenAICustom).await.is_none());
    }

    pool.mark_healthy(Provider::OpenAICustom, "only").await;
    assert_eq!(
        pool.select(Provider::OpenAICustom).await.unwrap().uuid,
        "only"
    );
}

#[tokio::test]
async fn selection_hands_back_the_entry_credentials() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_pools_file(&dir, three_entry_pool());
    let pool = ProviderPoolManager::load(&path).unwrap();

    let selection = pool.select(Provider::OpenAICustom).await.unwrap();
    assert_eq!(selection.uuid, "a");
    assert_eq!(
        selection.credentials.get("OPENAI_API_KEY").unwrap(),
        "key-a"
    );
}

#[tokio::test]
async fn unknown_or_empty_pools_select_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_pools_file(&dir, json!({"openai-custom": []}));
    let pool = ProviderPoolManager::load(&path).unwrap();
    assert!(pool.select(Provider::OpenAICustom).await.is_none());
    assert!(pool.select(Provider::ClaudeCustom).await.is_none());
}

// Mutations are written back to the pools file with the bookkeeping fields
// the manager owns; credential fields survive untouched.
#[tokio::test]
async fn state_is_persisted_after_mutations() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_pools_file(&dir, three_entry_pool());
    let pool = ProviderPoolManager::load(&path).unwrap();

    pool.select(Provider::OpenAICustom).await.unwrap();
    for _ in 0..3 {
        pool.mark_unhealthy(Provider::OpenAICustom, "b").await;
    }

    // The writer task runs asynchronously; give it a moment.
    let mut written = serde_json::Value::Null;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        let data = std::fs::read(&path).unwrap();
        written = serde_json::from_slice(&data).unwrap();
        if written["openai-custom"][1]["isHealthy"] == false {
            break;
        }
    }

    let entries = written["openai-custom"].as_array().unwrap();
    assert_eq!(entries[0]["usageCount"], 1);
    assert!(entries[0]["lastUsed"].is_string());
    assert_eq!(entries[0]["OPENAI_API_KEY"], "key-a");
    assert_eq!(entries[1]["isHealthy"], false);
    assert_eq!(entries[1]["errorCount"], 3);
    assert!(entries[1]["lastErrorTime"].is_string());
}

#[tokio::test]
async fn loading_honours_persisted_health_state() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_pools_file(
        &dir,
        json!({
            "openai-custom": [
                {"uuid": "down", "OPENAI_API_KEY": "k1", "isHealthy": false, "errorCount": 3},
                {"uuid": "up", "OPENAI_API_KEY": "k2", "usageCount": 7}
            ]
        }),
    );
    let pool = ProviderPoolManager::load(&path).unwrap();
    for _ in 0..3 {
        assert_eq!(pool.select(Provider::OpenAICustom).await.unwrap().uuid, "up");
    }
}
