//! Named objects shared with a second process.
//!
//! Each test re-runs this test binary as a peer, selected by `PEER_ROLE`.
//! The two sides step through the scenario over the peer's stdin and stdout.

use std::{
    env,
    io::{self, BufRead, BufReader, Lines, Write},
    process::{self, Child, ChildStdout, Command, Stdio},
};

use libkrn::*;

const PEER_ROLE: &str = "LIBKRN_PEER_ROLE";
const PEER_OBJECT: &str = "LIBKRN_PEER_OBJECT";
const STEP_PREFIX: &str = "libkrn-step:";

struct Peer {
    child: Child,
    lines: Lines<BufReader<ChildStdout>>,
}

impl Peer {
    fn spawn(test: &str, role: &str, object: &str) -> Self {
        let mut child = Command::new(env::current_exe().unwrap())
            .args([test, "--exact", "--nocapture", "--test-threads=1", "--quiet"])
            .env(PEER_ROLE, role)
            .env(PEER_OBJECT, object)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .unwrap();

        let stdout = child.stdout.take().unwrap();
        Self {
            child,
            lines: BufReader::new(stdout).lines(),
        }
    }

    fn expect(&mut self, step: &str) {
        let wanted = format!("{}{}", STEP_PREFIX, step);

        loop {
            let line = self
                .lines
                .next()
                .unwrap_or_else(|| panic!("peer ended before {}", step))
                .unwrap();
            if line == wanted {
                return;
            }
        }
    }

    fn send(&mut self, step: &str) {
        let stdin = self.child.stdin.as_mut().unwrap();
        writeln!(stdin, "{}", step).unwrap();
        stdin.flush().unwrap();
    }

    fn finish(mut self) {
        drop(self.child.stdin.take());
        for line in self.lines.by_ref() {
            line.unwrap();
        }

        assert!(self.child.wait().unwrap().success());
    }
}

/// Object name handed to this process when it runs as the `role` peer
fn peer_object(role: &str) -> Option<String> {
    match env::var(PEER_ROLE) {
        Ok(current) if current == role => Some(env::var(PEER_OBJECT).unwrap()),
        _ => None,
    }
}

fn step(name: &str) {
    println!("{}{}", STEP_PREFIX, name);
}

fn await_step(name: &str) {
    let mut line = String::new();
    io::stdin().read_line(&mut line).unwrap();
    assert_eq!(line.trim_end(), name);
}

#[test]
fn semaphore_shared_with_peer_process() {
    if let Some(name) = peer_object("semaphore") {
        return semaphore_peer(&name);
    }

    init();

    let name = format!("libkrn-proc-sem-{}", process::id());
    let sem = create_semaphore(0, 10, Some(name.as_str()), SemaphoreFlags::empty(), Access::empty()).unwrap();
    assert_eq!(get_last_error(), None);

    let mut peer = Peer::spawn("semaphore_shared_with_peer_process", "semaphore", &name);
    peer.expect("released");

    // Three units released by the peer
    assert_eq!(
        wait_for_single_object(sem, Timeout::Millis(0)),
        Ok(WaitStatus::Signaled)
    );
    assert_eq!(release_semaphore(sem, 1), Ok(2));

    close_handle(sem).unwrap();
    peer.send("closed");
    peer.finish();

    // The peer closed last: the name is gone
    assert_eq!(
        open_semaphore(Access::empty(), false, &name),
        Err(Error::NotFound)
    );
}

fn semaphore_peer(name: &str) {
    let sem = create_semaphore(0, 10, Some(name), SemaphoreFlags::empty(), Access::empty()).unwrap();
    assert_eq!(get_last_error(), Some(Error::AlreadyExists));

    assert_eq!(release_semaphore(sem, 3), Ok(0));
    step("released");
    await_step("closed");

    // Still alive with the count left by the creator
    assert_eq!(release_semaphore(sem, 1), Ok(3));

    close_handle(sem).unwrap();
}

#[test]
fn mutex_outlives_peer_exit() {
    if let Some(name) = peer_object("mutex") {
        return mutex_peer(&name);
    }

    let name = format!("libkrn-proc-mtx-{}", process::id());
    let mutex = create_mutex(Some(name.as_str()), MutexFlags::INITIAL_OWNER, Access::empty()).unwrap();
    assert_eq!(get_last_error(), None);

    let mut peer = Peer::spawn("mutex_outlives_peer_exit", "mutex", &name);
    peer.expect("contended");
    peer.finish();

    // The peer exited holding a handle: its open ends with the process
    release_mutex(mutex).unwrap();
    close_handle(mutex).unwrap();

    assert_eq!(
        open_mutex(Access::empty(), false, &name),
        Err(Error::NotFound)
    );
}

fn mutex_peer(name: &str) {
    let mutex = create_mutex(Some(name), MutexFlags::INITIAL_OWNER, Access::empty()).unwrap();
    assert_eq!(get_last_error(), Some(Error::AlreadyExists));

    // Owned by the creator, and not taken over by a create that only opened it
    assert_eq!(
        wait_for_single_object(mutex, Timeout::Millis(0)),
        Ok(WaitStatus::TimedOut)
    );
    assert_eq!(release_mutex(mutex), Err(Error::NotOwner));

    step("contended");
}
