// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Dependency-graph ordering across the worker pool.

use soul_task::{Task, TaskScheduler};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

fn record(log: &Arc<Mutex<Vec<&'static str>>>, name: &'static str) {
    log.lock()
        .unwrap_or_else(PoisonError::into_inner)
        .push(name);
}

#[test]
fn chain_runs_in_dependency_order() {
    let _trace = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    let scheduler = TaskScheduler::new(2);
    let log = Arc::new(Mutex::new(Vec::new()));

    let a = {
        let log = Arc::clone(&log);
        scheduler.schedule(
            Task::new(move || {
                // Give dependents a window to jump the queue if ordering were
                // broken.
                std::thread::sleep(Duration::from_millis(10));
                record(&log, "A");
            }),
            &[],
        )
    };
    let b = {
        let log = Arc::clone(&log);
        scheduler.schedule(Task::new(move || record(&log, "B")), &[a.token()])
    };
    let c = {
        let log = Arc::clone(&log);
        scheduler.schedule(Task::new(move || record(&log, "C")), &[b.token()])
    };

    scheduler.wait(&c.token());
    scheduler.stop();

    let entries = log.lock().unwrap_or_else(PoisonError::into_inner);
    assert_eq!(entries.as_slice(), ["A", "B", "C"]);
}

#[test]
fn task_waits_for_every_dependency() {
    let scheduler = TaskScheduler::new(4);

    let d1_done = Arc::new(AtomicBool::new(false));
    let d2_done = Arc::new(AtomicBool::new(false));

    let d1 = {
        let done = Arc::clone(&d1_done);
        scheduler.schedule(
            Task::new(move || {
                std::thread::sleep(Duration::from_millis(15));
                done.store(true, Ordering::Release);
            }),
            &[],
        )
    };
    let d2 = {
        let done = Arc::clone(&d2_done);
        scheduler.schedule(
            Task::new(move || {
                std::thread::sleep(Duration::from_millis(5));
                done.store(true, Ordering::Release);
            }),
            &[],
        )
    };

    let dependent = {
        let d1_done = Arc::clone(&d1_done);
        let d2_done = Arc::clone(&d2_done);
        scheduler.schedule(
            Task::new(move || {
                assert!(d1_done.load(Ordering::Acquire));
                assert!(d2_done.load(Ordering::Acquire));
                "both done"
            }),
            &[d1.token(), d2.token()],
        )
    };

    assert_eq!(dependent.get().expect("dependent ran"), "both done");
    scheduler.stop();
}

#[test]
fn completed_dependencies_do_not_block() {
    let scheduler = TaskScheduler::new(2);

    let dep = scheduler.submit_async(|| 1);
    let token = dep.token();
    scheduler.wait(&token);

    let task = scheduler.schedule(Task::new(|| 2), &[token]);
    assert_eq!(task.get().expect("released immediately"), 2);
    scheduler.stop();
}

#[test]
fn invalid_tokens_are_skipped() {
    let scheduler = TaskScheduler::new(1);
    let task = scheduler.schedule(Task::new(|| 3), &[soul_task::TaskToken::default()]);
    assert_eq!(task.get().expect("no real dependency"), 3);
    scheduler.stop();
}

#[test]
fn siblings_share_a_dependency() {
    let scheduler = TaskScheduler::new(4);
    let log = Arc::new(Mutex::new(Vec::new()));

    let root = {
        let log = Arc::clone(&log);
        scheduler.schedule(Task::new(move || record(&log, "root")), &[])
    };

    let siblings: Vec<_> = ["s1", "s2", "s3"]
        .into_iter()
        .map(|name| {
            let log = Arc::clone(&log);
            scheduler.schedule(Task::new(move || record(&log, name)), &[root.token()])
        })
        .collect();

    for sibling in &siblings {
        scheduler.wait(&sibling.token());
    }
    scheduler.stop();

    let entries = log.lock().unwrap_or_else(PoisonError::into_inner);
    assert_eq!(entries.len(), 4);
    assert_eq!(entries[0], "root");
    // Sibling order is unspecified; completeness is what matters.
    for name in ["s1", "s2", "s3"] {
        assert!(entries.contains(&name));
    }
}

#[test]
fn tokens_outlive_the_task_handle() {
    let scheduler = TaskScheduler::new(2);

    let token = {
        let task = scheduler.submit_async(|| 11);
        task.token()
        // task handle dropped here without extracting the result
    };

    scheduler.wait(&token);
    assert!(token.is_completed());
    scheduler.stop();
}
