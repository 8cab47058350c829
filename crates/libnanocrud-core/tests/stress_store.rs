//! Stress tests for store concurrent operations
//!
//! A store is shared behind a mutex the same way the server shares it; these
//! tests check that interleaved mutations all land on disk.

use libnanocrud_core::store::{DocumentStore, UpdateOptions};
use libnanocrud_core::Document;
use serde_json::json;
use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use tempfile::tempdir;

#[test]
fn test_concurrent_inserts_survive_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("events");
    let store = Arc::new(Mutex::new(DocumentStore::open(&path).expect("Failed to open store")));

    let num_threads = 8;
    let docs_per_thread = 50;
    let barrier = Arc::new(Barrier::new(num_threads));

    let handles: Vec<_> = (0..num_threads)
        .map(|thread_id| {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);

            thread::spawn(move || {
                barrier.wait();

                let mut success_count = 0;
                for i in 0..docs_per_thread {
                    let doc = json!({"thread": thread_id, "i": i});
                    match store.lock().unwrap().insert(doc) {
                        Ok(_) => success_count += 1,
                        Err(e) => eprintln!("Thread {} doc {} failed: {:?}", thread_id, i, e),
                    }
                }
                success_count
            })
        })
        .collect();

    let total_success: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    let expected = num_threads * docs_per_thread;
    assert_eq!(total_success, expected);

    drop(store);
    let reopened = DocumentStore::open(&path).unwrap();
    assert_eq!(reopened.len(), expected);
}

#[test]
fn test_interleaved_updates_and_compaction() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("counters");
    let store = Arc::new(Mutex::new(DocumentStore::open(&path).unwrap()));
    store
        .lock()
        .unwrap()
        .insert(json!({"_id": "counter", "n": 0}))
        .unwrap();

    let num_threads = 4;
    let increments = 25;
    let barrier = Arc::new(Barrier::new(num_threads + 1));

    let mut handles: Vec<_> = (0..num_threads)
        .map(|_| {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let query: Document = json!({"_id": "counter"}).as_object().unwrap().clone();
                let patch: Document = json!({"$inc": {"n": 1}}).as_object().unwrap().clone();
                for _ in 0..increments {
                    store
                        .lock()
                        .unwrap()
                        .update(&query, &patch, UpdateOptions::default())
                        .unwrap();
                }
            })
        })
        .collect();

    // A compactor racing with the writers
    let compactor = {
        let store = Arc::clone(&store);
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || {
            barrier.wait();
            for _ in 0..10 {
                store.lock().unwrap().compact().unwrap();
                thread::yield_now();
            }
        })
    };
    handles.push(compactor);

    for h in handles {
        h.join().unwrap();
    }

    drop(store);
    let reopened = DocumentStore::open(&path).unwrap();
    let docs = reopened.find(&Document::new(), 0, None).unwrap();
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0]["n"], (num_threads * increments) as u64);
}
