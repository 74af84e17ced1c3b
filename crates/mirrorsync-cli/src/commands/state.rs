//! Sync state commands.
//!
//! These read and write the same state files as the server. Resetting while
//! the server runs has no effect until it restarts, since the server caches
//! each pair's snapshot after the first notification.

use chrono::{DateTime, Utc};
use serde::Serialize;

use mirrorsync_server::{BatchCommit, JsonFileStore, SyncStore};

use crate::config::{AppConfig, PairSettings};
use crate::error::CliResult;

/// Stored state of one pair, as printed by `state show`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateSummary {
    pub pair: String,
    pub source_calendar_id: String,
    pub resume_token: Option<String>,
    pub last_notification_time: Option<DateTime<Utc>>,
    pub mappings: usize,
}

fn store(config: &AppConfig) -> JsonFileStore {
    JsonFileStore::new(config.state.resolved_dir())
}

/// Reads the stored state of a pair.
pub fn summary(store: &dyn SyncStore, pair: &PairSettings) -> CliResult<StateSummary> {
    let snapshot = store.load(&pair.source_calendar_id)?;
    Ok(StateSummary {
        pair: pair.name.clone(),
        source_calendar_id: pair.source_calendar_id.clone(),
        resume_token: snapshot.state.resume_token,
        last_notification_time: snapshot.state.last_notification_time,
        mappings: snapshot.mappings.len(),
    })
}

/// Clears the resume token of a pair, keeping its mappings.
///
/// Returns true if a token was stored.
pub fn clear_token(store: &dyn SyncStore, pair: &PairSettings) -> CliResult<bool> {
    let snapshot = store.load(&pair.source_calendar_id)?;
    let had_token = snapshot.state.resume_token.is_some();
    store.commit(&pair.source_calendar_id, &BatchCommit::reset(&snapshot.state))?;
    Ok(had_token)
}

/// Prints the stored state of a pair.
pub fn show(config: &AppConfig, pair: &str) -> CliResult<()> {
    let pair = config.pair(pair)?;
    let summary = summary(&store(config), pair)?;

    println!("pair:              {}", summary.pair);
    println!("source calendar:   {}", summary.source_calendar_id);
    println!(
        "resume token:      {}",
        summary.resume_token.as_deref().unwrap_or("(none, next notification resyncs)")
    );
    match summary.last_notification_time {
        Some(at) => println!("last notification: {}", at.to_rfc3339()),
        None => println!("last notification: (never)"),
    }
    println!("mirrored events:   {}", summary.mappings);
    Ok(())
}

/// Clears the resume token so the next notification runs a full resync.
pub fn reset(config: &AppConfig, pair: &str) -> CliResult<()> {
    let pair = config.pair(pair)?;
    if clear_token(&store(config), pair)? {
        println!("Cleared resume token of {}; the next notification resyncs.", pair.name);
    } else {
        println!("{} had no resume token.", pair.name);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mirrorsync_core::{EventMapping, EventStatus};
    use mirrorsync_server::MappingDelta;

    fn pair() -> PairSettings {
        AppConfig::parse(
            r#"
[[pairs]]
name = "work"
source_calendar_id = "me@work.example"
target_calendar_id = "me@home.example"
same_account = true
source_token_path = "/t.json"
"#,
        )
        .unwrap()
        .pairs
        .remove(0)
    }

    #[test]
    fn summary_of_missing_state_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());

        let summary = summary(&store, &pair()).unwrap();
        assert_eq!(summary.resume_token, None);
        assert_eq!(summary.last_notification_time, None);
        assert_eq!(summary.mappings, 0);
    }

    #[test]
    fn reset_clears_token_and_keeps_mappings() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        let pair = pair();
        let at = Utc::now();

        let commit = BatchCommit {
            resume_token: Some("tok-7".into()),
            last_notification_time: Some(at),
            deltas: vec![MappingDelta::Upsert(EventMapping::new(
                "src-1",
                "mirror-1",
                EventStatus::Confirmed,
            ))],
        };
        store.commit(&pair.source_calendar_id, &commit).unwrap();

        assert!(clear_token(&store, &pair).unwrap());
        let after = summary(&store, &pair).unwrap();
        assert_eq!(after.resume_token, None);
        assert_eq!(after.last_notification_time, Some(at));
        assert_eq!(after.mappings, 1);

        assert!(!clear_token(&store, &pair).unwrap());
    }
}
