use nvexport::exporter::{register_shutdown_signals, FORCED_EXIT_STATUS};
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::low_level::raise;
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

// Set in the re-executed copy of this test binary.
const CHILD_ENV: &str = "NVEXPORT_SIGNAL_CHILD";

#[test]
fn first_signal_only_requests_shutdown() {
    if std::env::var_os(CHILD_ENV).is_some() {
        return;
    }
    let shutdown = Arc::new(AtomicBool::new(false));
    register_shutdown_signals(&shutdown).unwrap();
    raise(SIGINT).unwrap();
    assert!(shutdown.load(Ordering::SeqCst));
}

#[test]
fn second_signal_exits_while_loop_is_stuck() {
    if std::env::var_os(CHILD_ENV).is_some() {
        // Simulates a hung driver call: nothing ever checks the flag.
        let shutdown = Arc::new(AtomicBool::new(false));
        register_shutdown_signals(&shutdown).unwrap();
        raise(SIGTERM).unwrap();
        raise(SIGTERM).unwrap();
        thread::sleep(Duration::from_secs(5));
        panic!("still running after two SIGTERMs");
    }

    let status = Command::new(std::env::current_exe().unwrap())
        .args(["--exact", "second_signal_exits_while_loop_is_stuck", "--test-threads=1"])
        .env(CHILD_ENV, "1")
        .status()
        .unwrap();
    assert_eq!(status.code(), Some(FORCED_EXIT_STATUS));
}
