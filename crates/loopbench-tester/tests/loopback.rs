//! End-to-end rounds against the software loopback device.

use std::path::PathBuf;
use std::time::Duration;

use loopbench_device::{BuildMode, DeviceSession, SessionConfig, SoftwareQueue};
use loopbench_tester::{kernel_name, LoopbackTester, TesterConfig, TesterError};

fn tester(width: usize, payload_size: usize, stalled: bool) -> LoopbackTester {
    let mut queue = SoftwareQueue::new();
    queue.set_stalled(stalled);
    let session = DeviceSession::new(
        Box::new(queue),
        &SessionConfig {
            kernel_name: kernel_name(width),
            search_dir: PathBuf::from("xclbin"),
            mode: BuildMode::Hardware,
        },
    )
    .expect("session setup");

    let mut config = TesterConfig::new(width, payload_size);
    config.seed = Some(0xB0A7);
    LoopbackTester::new(session, &config).expect("tester setup")
}

#[test]
fn ten_steady_state_rounds_echo_the_full_window() {
    // Capacity 4096 x 4-byte elements, non-randomized: every round
    // writes elements [0, 4095) and the device echoes them back.
    let mut t = tester(1, 4096, false);

    for round in 0..10u64 {
        let report = t.run_round(false).expect("round");
        assert_eq!(report.round, round);
        assert_eq!(report.requested, 4095);
        assert_eq!(report.consumed, 4095, "consumed metadata each round");
        assert_eq!(report.produced, 4095);
    }

    let totals = t.totals();
    assert_eq!(totals.rounds(), 10);
    assert_eq!(totals.bytes_written(), 10 * 4095 * 4);
    assert_eq!(totals.bytes_read(), 10 * 4095 * 4);
    assert!(totals.kernel_time() > Duration::ZERO);

    let samples = t.kernel_samples();
    assert_eq!(samples.len(), 10);
    for (ix, sample) in samples.iter().enumerate() {
        assert_eq!(sample.round, ix as u64, "ordered, no gaps, no duplicates");
    }
}

#[test]
fn echoed_bytes_match_the_written_window() {
    let mut t = tester(1, 4096, false);
    t.run_round(false).expect("round");

    let window_bytes = 4095 * 4;
    let written = &t.inputs()[0].host()[..window_bytes];
    let echoed = &t.outputs()[0].host()[..window_bytes];
    assert_eq!(written, echoed);
}

#[test]
fn thousand_randomized_rounds_consume_the_full_window() {
    let mut t = tester(1, 64, false);
    for _ in 0..1000 {
        let report = t.run_round(true).expect("randomized round");
        assert_eq!(report.requested, 63);
        assert_eq!(report.consumed, 63);
        assert_eq!(report.produced, 63);
    }
    assert_eq!(t.totals().rounds(), 1000);
}

#[test]
fn wider_testers_drive_every_port_pair() {
    let mut t = tester(3, 256, false);
    let report = t.run_round(false).expect("round");
    assert_eq!(report.requested, 3 * 255);
    assert_eq!(report.consumed, 3 * 255);
    assert_eq!(report.produced, 3 * 255);
    for port in t.inputs().iter().chain(t.outputs()) {
        assert!(!port.samples().is_empty(), "{} recorded samples", port.name());
    }
}

#[test]
fn stalled_device_raises_the_deadlock_error() {
    let mut t = tester(1, 4096, true);
    let err = t.run_round(false).expect_err("stalled round must fail");
    match err {
        TesterError::DeviceDeadlock { round, requested } => {
            assert_eq!(round, 0);
            assert_eq!(requested, 4095);
        }
        other => panic!("expected deadlock error, got {other}"),
    }
    // Not silently retried: the failed round was never recorded.
    assert_eq!(t.totals().rounds(), 0);
}

#[test]
fn exported_document_has_one_entry_per_round() {
    let mut t = tester(1, 256, false);
    for _ in 0..5 {
        t.run_round(false).expect("round");
    }

    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("stats_loopback1_kernel_256.json");
    t.dump_stats(&path).expect("dump");

    let doc: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).expect("read")).expect("parse");

    assert_eq!(doc["buffer_size"], 256);
    assert_eq!(doc["width"], 1);
    assert_eq!(doc["totals"]["rounds"], 5);

    let kernel = doc["kernel"].as_array().expect("kernel array");
    assert_eq!(kernel.len(), 5);
    for (ix, entry) in kernel.iter().enumerate() {
        assert_eq!(entry["round"], ix as u64);
    }

    for section in ["input_ports", "output_ports"] {
        let ports = doc[section].as_array().expect("port array");
        assert_eq!(ports.len(), 1);
        let samples = ports[0]["samples"].as_array().expect("samples");
        // One size readback and one data transfer per round.
        assert_eq!(samples.len(), 10);
    }
}

#[test]
fn rounds_alternate_between_randomized_and_steady_state() {
    let mut t = tester(1, 128, false);
    for round in 0..20u64 {
        let report = t.run_round(round % 2 == 0).expect("round");
        assert_eq!(report.consumed, 127);
    }
    assert_eq!(t.totals().rounds(), 20);
}
