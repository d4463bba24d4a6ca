//! The demo fixture shipped with the CLI loads into the memory store.

use std::path::Path;

use uuid::Uuid;

use avatarcast::config::AppConfig;
use avatarcast::store::{Fixture, MemoryStore, RewardType, Store};

#[tokio::test]
async fn demo_fixture_seeds_store() {
    let fixture = Fixture::load(Path::new("demos/fixture.yaml")).unwrap();
    let store = MemoryStore::from_fixture(&fixture);
    let broadcaster: Uuid = "6f1c2a4e-0b7d-4c55-9a3e-2d8f1b0c9e11".parse().unwrap();

    let settings = store.get_user_settings(broadcaster).await.unwrap();
    assert_eq!(settings.control_token, "overlay-secret");
    assert_eq!(settings.tts_limit_secs(), 60);

    let next = store.get_next_msg(broadcaster).await.unwrap();
    assert_eq!(next.text, "hello there");

    let reward = store.get_reward("reward-universal").await.unwrap();
    assert_eq!(reward.reward_type, RewardType::UniversalTts);
    assert!(reward.card_id.is_none());

    let mut voices = store.voice_short_names().await.unwrap();
    voices.sort();
    assert_eq!(voices, vec!["obiwan", "vader"]);
}

#[test]
fn demo_config_loads() {
    let config = AppConfig::load(Path::new("demos/config.yaml")).unwrap();
    assert_eq!(config.processor.default_voice, "obiwan");
    assert!(!config.processor.allow_empty_control_token);
    assert_eq!(config.manager.write_attempts, 5);
}
