use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use tempfile::TempDir;

use tts_hooks::config::DedupConfig;
use tts_hooks::speaker::dedup::{MessageContext, MessageDeduplicator};

fn config_in(dir: &TempDir) -> DedupConfig {
    DedupConfig {
        cache_file: dir
            .path()
            .join("tts-queue")
            .join("message-cache.json")
            .to_string_lossy()
            .into_owned(),
        ..DedupConfig::default()
    }
}

#[test]
fn concurrent_producers_never_corrupt_the_state_file() {
    let dir = TempDir::new().unwrap();
    let config = config_in(&dir);
    let path = config.cache_path();
    let done = Arc::new(AtomicBool::new(false));

    let reader = thread::spawn({
        let path = path.clone();
        let done = done.clone();
        move || {
            let mut reads = 0;
            while !done.load(Ordering::Relaxed) {
                if let Ok(contents) = std::fs::read_to_string(&path) {
                    if !contents.is_empty() {
                        serde_json::from_str::<serde_json::Value>(&contents)
                            .expect("state file is always complete JSON");
                        reads += 1;
                    }
                }
            }
            reads
        }
    });

    let producers: Vec<_> = (0..8)
        .map(|n| {
            let config = config.clone();
            thread::spawn(move || {
                // Each producer stands in for a separate hook process.
                let dedup = MessageDeduplicator::new(config);
                for i in 0..25 {
                    let message = format!("Producer {n} finished step {}", i % 5);
                    dedup.should_speak(&message, &MessageContext::with_category("completion"));
                }
            })
        })
        .collect();

    for producer in producers {
        producer.join().unwrap();
    }
    done.store(true, Ordering::Relaxed);
    reader.join().unwrap();

    let stats = MessageDeduplicator::new(config).get_stats();
    assert!(stats.total_records >= 1 && stats.total_records <= 40);
    assert!(stats.by_category.contains_key("completion"));
}

#[test]
fn separate_instances_share_cooldowns_through_the_file() {
    let dir = TempDir::new().unwrap();
    let config = config_in(&dir);

    let first_hook = MessageDeduplicator::new(config.clone());
    let first = first_hook.should_speak("Session completed in project-a", &MessageContext::default());
    assert!(first.allowed);
    drop(first_hook);

    let second_hook = MessageDeduplicator::new(config);
    let second =
        second_hook.should_speak("session completed in PROJECT-A ", &MessageContext::default());
    assert!(!second.allowed);
    assert!(second.reason.unwrap().contains("session_completion"));
}
