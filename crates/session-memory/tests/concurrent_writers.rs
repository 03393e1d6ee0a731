//! Independent handles on one database file, standing in for separate processes.

use std::sync::Arc;
use std::thread;

use session_memory::{EntryFilter, EntryType, MemoryDatabase, MemoryEntry, MemoryStore, StorageConfig};

#[test]
fn writers_on_separate_pools_all_land() {
    let dir = tempfile::tempdir().unwrap();
    let config = StorageConfig::in_dir(dir.path());
    // schema is created once up front; the writers only contend on inserts
    drop(MemoryDatabase::open(&config).unwrap());

    let handles: Vec<_> = (0..4)
        .map(|writer| {
            let config = config.clone();
            thread::spawn(move || {
                let store = MemoryStore::blocking(Arc::new(MemoryDatabase::open(&config).unwrap()));
                for i in 0..25 {
                    store
                        .add(MemoryEntry::new(
                            format!("writer-{}", writer),
                            EntryType::ToolCall,
                            format!("call {} from writer {}", i, writer),
                        ))
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let store = MemoryStore::blocking(Arc::new(MemoryDatabase::open(&config).unwrap()));
    let stats = store.stats().unwrap();
    assert_eq!(stats.total_entries, 100);
    assert_eq!(stats.session_count, 4);
    for writer in 0..4 {
        let listed = store
            .list(EntryFilter::for_session(format!("writer-{}", writer)), 100, 0)
            .unwrap();
        assert_eq!(listed.len(), 25);
    }
}
