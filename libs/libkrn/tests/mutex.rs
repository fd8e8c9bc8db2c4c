use std::{
    sync::{Arc, Barrier},
    thread,
};

use libkrn::*;

fn unique(tag: &str) -> String {
    format!("libkrn-mutex-{}-{}", tag, std::process::id())
}

/// Wait on `handle` from another thread
fn wait_elsewhere(handle: Handle, timeout: Timeout) -> KrnResult<WaitStatus> {
    let status = thread::spawn(move || {
        let status = wait_for_single_object(handle, timeout);
        if status == Ok(WaitStatus::Signaled) {
            release_mutex(handle).unwrap();
        }
        status
    });

    status.join().unwrap()
}

#[test]
fn recursive_ownership() {
    init();

    let mutex = create_mutex(None, MutexFlags::empty(), Access::empty()).unwrap();

    for _ in 0..3 {
        assert_eq!(
            wait_for_single_object(mutex, Timeout::Infinite),
            Ok(WaitStatus::Signaled)
        );
    }

    for _ in 0..2 {
        release_mutex(mutex).unwrap();
        assert_eq!(
            wait_elsewhere(mutex, Timeout::Millis(20)),
            Ok(WaitStatus::TimedOut)
        );
    }

    release_mutex(mutex).unwrap();
    assert_eq!(
        wait_elsewhere(mutex, Timeout::Millis(1000)),
        Ok(WaitStatus::Signaled)
    );

    close_handle(mutex).unwrap();
}

#[test]
fn initial_owner_and_not_owner() {
    let mutex = create_mutex(None, MutexFlags::INITIAL_OWNER, Access::empty()).unwrap();

    assert_eq!(
        wait_elsewhere(mutex, Timeout::Millis(20)),
        Ok(WaitStatus::TimedOut)
    );

    let other = thread::spawn(move || release_mutex(mutex)).join().unwrap();
    assert_eq!(other, Err(Error::NotOwner));

    release_mutex(mutex).unwrap();
    assert_eq!(release_mutex(mutex), Err(Error::NotOwner));
    assert_eq!(get_last_error(), Some(Error::NotOwner));

    close_handle(mutex).unwrap();
}

#[test]
fn named_create_twice() {
    let name = unique("twice");

    let first = create_mutex(Some(name.as_str()), MutexFlags::empty(), Access::empty()).unwrap();
    assert_eq!(get_last_error(), None);

    let second = create_mutex(Some(name.as_str()), MutexFlags::empty(), Access::empty()).unwrap();
    assert_eq!(get_last_error(), Some(Error::AlreadyExists));
    assert_ne!(first, second);

    // Both handles designate the same lock
    assert_eq!(
        wait_for_single_object(first, Timeout::Infinite),
        Ok(WaitStatus::Signaled)
    );
    assert_eq!(
        wait_elsewhere(second, Timeout::Millis(20)),
        Ok(WaitStatus::TimedOut)
    );
    release_mutex(second).unwrap();
    assert_eq!(
        wait_elsewhere(second, Timeout::Millis(1000)),
        Ok(WaitStatus::Signaled)
    );

    close_handle(first).unwrap();
    close_handle(second).unwrap();
}

#[test]
fn concurrent_creators() {
    let name = Arc::new(unique("race"));
    let barrier = Arc::new(Barrier::new(4));

    let creators: Vec<_> = (0..4)
        .map(|_| {
            let name = name.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                let handle = create_mutex(Some(name.as_str()), MutexFlags::empty(), Access::empty()).unwrap();
                (handle, get_last_error())
            })
        })
        .collect();

    let results: Vec<_> = creators.into_iter().map(|t| t.join().unwrap()).collect();

    let created = results.iter().filter(|(_, err)| err.is_none()).count();
    let existing = results
        .iter()
        .filter(|(_, err)| *err == Some(Error::AlreadyExists))
        .count();
    assert_eq!(created, 1);
    assert_eq!(existing, 3);

    for (handle, _) in results {
        close_handle(handle).unwrap();
    }
}

#[test]
fn last_close_unlinks() {
    let name = unique("unlink");

    let created = create_mutex(Some(name.as_str()), MutexFlags::empty(), Access::empty()).unwrap();
    let opened = open_mutex(Access::empty(), false, &name).unwrap();

    close_handle(created).unwrap();
    let reopened = open_mutex(Access::empty(), false, &name).unwrap();

    close_handle(opened).unwrap();
    close_handle(reopened).unwrap();

    assert_eq!(open_mutex(Access::empty(), false, &name), Err(Error::NotFound));
    assert_eq!(get_last_error(), Some(Error::NotFound));
}

#[test]
fn bad_names() {
    for name in [String::from("with/slash"), "x".repeat(NAME_MAX)] {
        assert_eq!(
            create_mutex(Some(name.as_str()), MutexFlags::empty(), Access::empty()),
            Err(Error::BadArguments)
        );
    }

    assert_eq!(open_mutex(Access::empty(), false, ""), Err(Error::BadArguments));
}

#[test]
fn kind_mismatch_by_name() {
    let name = unique("kind");

    let semaphore = create_semaphore(0, 1, Some(name.as_str()), SemaphoreFlags::empty(), Access::empty()).unwrap();
    assert_eq!(open_mutex(Access::empty(), false, &name), Err(Error::InvalidHandle));

    close_handle(semaphore).unwrap();
}
