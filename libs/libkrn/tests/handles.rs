use libkrn::*;

#[test]
fn stale_handles_are_rejected() {
    init();

    let mutex = create_mutex(None, MutexFlags::empty(), Access::empty()).unwrap();
    close_handle(mutex).unwrap();

    assert_eq!(close_handle(mutex), Err(Error::InvalidHandle));
    assert_eq!(get_last_error(), Some(Error::InvalidHandle));
    assert_eq!(
        wait_for_single_object(mutex, Timeout::Millis(0)),
        Err(Error::InvalidHandle)
    );
    assert_eq!(close_handle(Handle::invalid()), Err(Error::InvalidHandle));
}

#[test]
fn duplicate_outlives_original() {
    let sem = create_semaphore(1, 1, None, SemaphoreFlags::empty(), Access::empty()).unwrap();
    let copy = duplicate_handle(sem).unwrap();
    assert_ne!(sem, copy);

    close_handle(sem).unwrap();

    assert_eq!(
        wait_for_single_object(copy, Timeout::Millis(0)),
        Ok(WaitStatus::Signaled)
    );
    assert_eq!(release_semaphore(copy, 1), Ok(0));

    close_handle(copy).unwrap();
}

#[test]
fn handle_information() {
    let name = format!("libkrn-handles-info-{}", std::process::id());

    let created = create_mutex(Some(name.as_str()), MutexFlags::empty(), Access::empty()).unwrap();
    let opened = open_mutex(Access::empty(), true, &name).unwrap();

    assert_eq!(get_handle_information(created), Ok(HandleFlags::empty()));
    assert_eq!(get_handle_information(opened), Ok(HandleFlags::INHERIT));

    set_handle_information(
        created,
        HandleFlags::PROTECT_FROM_CLOSE,
        HandleFlags::PROTECT_FROM_CLOSE,
    )
    .unwrap();
    assert_eq!(close_handle(created), Err(Error::InvalidHandle));

    set_handle_information(created, HandleFlags::all(), HandleFlags::empty()).unwrap();
    close_handle(created).unwrap();
    close_handle(opened).unwrap();
}

#[test]
fn wait_needs_synchronize() {
    let mutex = create_mutex(None, MutexFlags::empty(), Access::MUTEX_MODIFY_STATE).unwrap();

    assert_eq!(
        wait_for_single_object(mutex, Timeout::Millis(0)),
        Err(Error::AccessDenied)
    );
    assert_eq!(get_last_error(), Some(Error::AccessDenied));

    close_handle(mutex).unwrap();
}

#[test]
fn timeout_conversion() {
    let sem = create_semaphore(0, 1, None, SemaphoreFlags::empty(), Access::empty()).unwrap();

    assert_eq!(
        wait_for_single_object(sem, Timeout::from(10)),
        Ok(WaitStatus::TimedOut)
    );
    release_semaphore(sem, 1).unwrap();
    assert_eq!(
        wait_for_single_object(sem, Timeout::from(INFINITE)),
        Ok(WaitStatus::Signaled)
    );

    close_handle(sem).unwrap();
}
