use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use libkrn::*;

#[test]
fn exit_code_from_body() {
    init();

    let (handle, tid) = create_thread(0, || 17, ThreadCreationFlags::empty()).unwrap();
    assert_ne!(tid, 0);
    assert_eq!(get_thread_id(handle), Ok(tid));

    assert_eq!(
        wait_for_single_object(handle, Timeout::Infinite),
        Ok(WaitStatus::Signaled)
    );
    assert_eq!(get_exit_code_thread(handle), Ok(17));

    close_handle(handle).unwrap();
}

#[test]
fn suspended_start() {
    let ran = Arc::new(AtomicBool::new(false));

    let (handle, _) = {
        let ran = ran.clone();
        create_thread(
            64 * 1024,
            move || {
                ran.store(true, Ordering::SeqCst);
                0
            },
            ThreadCreationFlags::CREATE_SUSPENDED,
        )
        .unwrap()
    };

    assert_eq!(
        wait_for_single_object(handle, Timeout::Millis(50)),
        Ok(WaitStatus::TimedOut)
    );
    assert!(!ran.load(Ordering::SeqCst));
    assert_eq!(get_exit_code_thread(handle), Ok(STILL_ACTIVE));

    resume_thread(handle).unwrap();
    assert_eq!(
        wait_for_single_object(handle, Timeout::Millis(5000)),
        Ok(WaitStatus::Signaled)
    );
    assert!(ran.load(Ordering::SeqCst));

    // Resuming again is harmless
    assert_eq!(resume_thread(handle), Ok(()));

    close_handle(handle).unwrap();
}

#[test]
fn terminate_sleeping_thread() {
    let started = Arc::new(AtomicBool::new(false));
    let woke = Arc::new(AtomicBool::new(false));

    let (handle, _) = {
        let started = started.clone();
        let woke = woke.clone();
        create_thread(
            0,
            move || {
                started.store(true, Ordering::SeqCst);
                thread::sleep(Duration::from_secs(60));
                woke.store(true, Ordering::SeqCst);
                1
            },
            ThreadCreationFlags::empty(),
        )
        .unwrap()
    };

    while !started.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(1));
    }

    unsafe { terminate_thread(handle, 99) }.unwrap();

    assert_eq!(
        wait_for_single_object(handle, Timeout::Millis(5000)),
        Ok(WaitStatus::Signaled)
    );
    assert_eq!(get_exit_code_thread(handle), Ok(99));

    let times = get_thread_times(handle).unwrap();
    assert!(times.exit.ticks() >= times.creation.ticks());

    // Ended threads ignore a second termination and cannot be suspended
    assert_eq!(unsafe { terminate_thread(handle, 7) }, Ok(()));
    assert_eq!(get_exit_code_thread(handle), Ok(99));
    assert_eq!(suspend_thread(handle), Err(Error::InvalidHandle));
    assert_eq!(resume_thread(handle), Ok(()));

    thread::sleep(Duration::from_millis(50));
    assert!(!woke.load(Ordering::SeqCst));

    close_handle(handle).unwrap();
}

#[test]
fn terminate_suspended_thread() {
    let ran = Arc::new(AtomicBool::new(false));

    let (handle, _) = {
        let ran = ran.clone();
        create_thread(
            0,
            move || {
                ran.store(true, Ordering::SeqCst);
                0
            },
            ThreadCreationFlags::CREATE_SUSPENDED,
        )
        .unwrap()
    };

    unsafe { terminate_thread(handle, 98) }.unwrap();

    assert_eq!(
        wait_for_single_object(handle, Timeout::Millis(5000)),
        Ok(WaitStatus::Signaled)
    );
    assert_eq!(get_exit_code_thread(handle), Ok(98));

    // The entry point never runs, even once resumed
    assert_eq!(resume_thread(handle), Ok(()));
    thread::sleep(Duration::from_millis(50));
    assert!(!ran.load(Ordering::SeqCst));

    close_handle(handle).unwrap();
}

#[test]
fn exit_thread_and_panic() {
    let (exits, _) = create_thread(
        0,
        || {
            exit_thread(5);
        },
        ThreadCreationFlags::empty(),
    )
    .unwrap();
    let (panics, _) = create_thread(0, || panic!("thread body failure"), ThreadCreationFlags::empty()).unwrap();

    for handle in [exits, panics] {
        assert_eq!(
            wait_for_single_object(handle, Timeout::Infinite),
            Ok(WaitStatus::Signaled)
        );
    }

    assert_eq!(get_exit_code_thread(exits), Ok(5));
    assert_eq!(get_exit_code_thread(panics), Ok(0xFFFF_FFFF));

    close_handle(exits).unwrap();
    close_handle(panics).unwrap();
}

#[test]
fn times_are_frozen_at_exit() {
    let (handle, _) = create_thread(
        0,
        || {
            let mut acc = 0u64;
            for i in 0..1_000_000u64 {
                acc = acc.wrapping_add(i * i);
            }
            (acc & 1) as u32
        },
        ThreadCreationFlags::empty(),
    )
    .unwrap();

    wait_for_single_object(handle, Timeout::Infinite).unwrap();

    let first = get_thread_times(handle).unwrap();
    assert!(!first.creation.is_zero());
    assert!(first.exit.ticks() >= first.creation.ticks());

    thread::sleep(Duration::from_millis(10));
    assert_eq!(get_thread_times(handle), Ok(first));

    close_handle(handle).unwrap();
}

#[test]
fn close_running_thread() {
    let (handle, _) = create_thread(
        0,
        || {
            thread::sleep(Duration::from_millis(100));
            0
        },
        ThreadCreationFlags::empty(),
    )
    .unwrap();

    close_handle(handle).unwrap();
    assert_eq!(get_exit_code_thread(handle), Err(Error::InvalidHandle));
}

#[test]
fn duplicated_thread_handle() {
    let (handle, tid) = create_thread(0, || 3, ThreadCreationFlags::CREATE_SUSPENDED).unwrap();
    let copy = duplicate_handle(handle).unwrap();

    close_handle(handle).unwrap();
    assert_eq!(get_thread_id(copy), Ok(tid));

    resume_thread(copy).unwrap();
    assert_eq!(
        wait_for_single_object(copy, Timeout::Infinite),
        Ok(WaitStatus::Signaled)
    );
    assert_eq!(get_exit_code_thread(copy), Ok(3));

    close_handle(copy).unwrap();
}

#[test]
fn current_thread_pseudo_handle() {
    assert_eq!(
        get_thread_id(Handle::CURRENT_THREAD),
        Ok(get_current_thread_id())
    );
    assert_eq!(get_exit_code_thread(Handle::CURRENT_THREAD), Ok(STILL_ACTIVE));
    assert_eq!(resume_thread(Handle::CURRENT_THREAD), Ok(()));
    assert_eq!(close_handle(Handle::CURRENT_THREAD), Ok(()));

    let times = get_thread_times(Handle::CURRENT_THREAD).unwrap();
    assert!(times.exit.is_zero());

    assert!(switch_to_thread());
}

#[test]
fn priority_under_default_policy() {
    assert_eq!(
        get_thread_priority(Handle::CURRENT_THREAD),
        Ok(ThreadPriority::Normal)
    );
    assert_eq!(
        set_thread_priority(Handle::CURRENT_THREAD, ThreadPriority::Normal),
        Ok(())
    );
    assert_eq!(
        set_thread_priority(Handle::CURRENT_THREAD, ThreadPriority::Highest),
        Err(Error::NotSupported)
    );
}

#[cfg(target_os = "linux")]
#[test]
fn empty_affinity_is_rejected() {
    assert_eq!(
        set_thread_affinity_mask(Handle::CURRENT_THREAD, 0),
        Err(Error::InvalidParameter)
    );
}

#[test]
fn open_thread_is_not_implemented() {
    assert_eq!(
        open_thread(Access::empty(), false, get_current_thread_id()),
        Err(Error::NotImplemented)
    );
    assert_eq!(get_last_error(), Some(Error::NotImplemented));
}

#[test]
fn process_queries() {
    let pid = current_process_id();

    assert_eq!(get_exit_code_process(pid), Ok(STILL_ACTIVE));
    assert!(get_process_times(pid).is_ok());

    assert_eq!(get_exit_code_process(pid + 1), Err(Error::NotImplemented));
    assert_eq!(get_process_times(pid + 1), Err(Error::NotImplemented));
}
