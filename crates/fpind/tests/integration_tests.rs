//! End-to-end tests for the FPIN recovery pipeline
//!
//! Drives replayed notification records through the receiver, the frame
//! queue and the consumer against an in-memory device tree and a recording
//! multipath control plane.

use async_trait::async_trait;
use fc_types::{DescriptorTag, PortWwn};
use fpind::decoder::{build_fpin, build_link_integrity};
use fpind::frame::encode_record;
use fpind::queue::EnqueueError;
use fpind::receiver::Disposition;
use fpind::*;
use std::collections::HashMap;
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

const HBA: PortWwn = PortWwn::new(0x1000_0000_c9aa_0001);
const OTHER_HBA: PortWwn = PortWwn::new(0x1000_0000_c9aa_0002);
const TARGET_A: PortWwn = PortWwn::new(0x5001_4380_2426_baf4);
const TARGET_B: PortWwn = PortWwn::new(0x5001_4380_2426_baf5);
const SWITCH_PORT: PortWwn = PortWwn::new(0x2001_000d_ec11_2233);

const TWO_ACTIVE: &str = "2 0 1 0 1 1 A 0 2 2 8:32 A 0 0 1 8:48 A 0 0 1";
const ONE_ACTIVE: &str = "2 0 1 0 1 1 A 0 2 2 8:32 A 0 0 1 8:48 F 0 0 1";

// ============================================================================
// TEST DOUBLES
// ============================================================================

/// Fixed device tree.
#[derive(Default)]
struct SnapshotTopology {
    hosts: Vec<FcHostEntry>,
    targets: Vec<FcTargetEntry>,
    blocks: Vec<BlockEntry>,
    target_scans: AtomicUsize,
}

impl DeviceTopology for SnapshotTopology {
    fn fc_hosts(&self) -> fpind::Result<Vec<FcHostEntry>> {
        Ok(self.hosts.clone())
    }

    fn fc_targets(&self) -> fpind::Result<Vec<FcTargetEntry>> {
        self.target_scans.fetch_add(1, Ordering::SeqCst);
        Ok(self.targets.clone())
    }

    fn block_devices(&self) -> fpind::Result<Vec<BlockEntry>> {
        Ok(self.blocks.clone())
    }
}

/// Fails the first `failures` host scans, then behaves like `inner`.
struct FlakyTopology {
    inner: SnapshotTopology,
    failures: usize,
    scans: AtomicUsize,
}

impl DeviceTopology for FlakyTopology {
    fn fc_hosts(&self) -> fpind::Result<Vec<FcHostEntry>> {
        if self.scans.fetch_add(1, Ordering::SeqCst) < self.failures {
            return Err(FpindError::Topology("udev enumeration failed".to_string()));
        }
        self.inner.fc_hosts()
    }

    fn fc_targets(&self) -> fpind::Result<Vec<FcTargetEntry>> {
        self.inner.fc_targets()
    }

    fn block_devices(&self) -> fpind::Result<Vec<BlockEntry>> {
        self.inner.block_devices()
    }
}

/// Returns scripted map statuses and records failed paths.
#[derive(Default)]
struct RecordingControl {
    statuses: HashMap<String, String>,
    failed: Mutex<Vec<String>>,
}

impl RecordingControl {
    fn with_status(map: &str, status: &str) -> Self {
        let mut statuses = HashMap::new();
        statuses.insert(map.to_string(), status.to_string());
        Self {
            statuses,
            failed: Mutex::new(Vec::new()),
        }
    }

    fn failed(&self) -> Vec<String> {
        self.failed.lock().unwrap().clone()
    }
}

#[async_trait]
impl MultipathControl for RecordingControl {
    async fn map_status(&self, map: &str) -> fpind::Result<String> {
        self.statuses
            .get(map)
            .cloned()
            .ok_or_else(|| FpindError::Topology(format!("no such map {}", map)))
    }

    async fn fail_path(&self, device: &str) -> fpind::Result<()> {
        self.failed.lock().unwrap().push(device.to_string());
        Ok(())
    }
}

/// Records every initiator/target flush request.
#[derive(Default)]
struct RecordingFlush {
    requests: Mutex<Vec<(String, PortWwn, PortWwn)>>,
}

impl RecordingFlush {
    fn requests(&self) -> Vec<(String, PortWwn, PortWwn)> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl FlushNotifier for RecordingFlush {
    async fn flush(&self, host: &FcHostRecord, initiator: PortWwn, target: PortWwn) -> fpind::Result<()> {
        self.requests
            .lock()
            .unwrap()
            .push((host.name.clone(), initiator, target));
        Ok(())
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

/// One HBA (`host6`) with two targets, one multipath map `mpatha` and two
/// disks: `sdc` behind target A and `sdd` behind target B.
fn fabric() -> SnapshotTopology {
    SnapshotTopology {
        hosts: vec![
            FcHostEntry {
                name: "host6".to_string(),
                syspath: PathBuf::from("/sys/class/fc_host/host6"),
                port_name: Some(HBA.to_string()),
            },
            FcHostEntry {
                name: "host7".to_string(),
                syspath: PathBuf::from("/sys/class/fc_host/host7"),
                port_name: Some(OTHER_HBA.to_string()),
            },
        ],
        targets: vec![
            FcTargetEntry {
                name: "target6:0:0".to_string(),
                host: Some("host6".to_string()),
                port_name: Some(TARGET_A.to_string()),
            },
            FcTargetEntry {
                name: "target6:0:1".to_string(),
                host: Some("host6".to_string()),
                port_name: Some(TARGET_B.to_string()),
            },
        ],
        blocks: vec![
            BlockEntry {
                name: "dm-0".to_string(),
                dm_name: Some("mpatha".to_string()),
                dm_uuid: Some("mpath-3600a098038303053453f463045535a31".to_string()),
                major: Some("253".to_string()),
                minor: Some("0".to_string()),
                ..Default::default()
            },
            BlockEntry {
                name: "sdc".to_string(),
                serial: Some("3600a098038303053453f463045535a31".to_string()),
                major: Some("8".to_string()),
                minor: Some("32".to_string()),
                scsi_target: Some("target6:0:0".to_string()),
                ..Default::default()
            },
            BlockEntry {
                name: "sdd".to_string(),
                serial: Some("3600a098038303053453f463045535a31".to_string()),
                major: Some("8".to_string()),
                minor: Some("48".to_string()),
                scsi_target: Some("target6:0:1".to_string()),
                ..Default::default()
            },
        ],
        target_scans: AtomicUsize::new(0),
    }
}

struct TestSetup {
    topology: Arc<SnapshotTopology>,
    control: Arc<RecordingControl>,
    flush: Arc<RecordingFlush>,
}

impl TestSetup {
    fn new(status: &str) -> Self {
        Self {
            topology: Arc::new(fabric()),
            control: Arc::new(RecordingControl::with_status("mpatha", status)),
            flush: Arc::new(RecordingFlush::default()),
        }
    }

    fn pipeline(&self) -> Pipeline {
        let actuator = Actuator::new(self.control.clone(), self.flush.clone());
        Pipeline::new(self.topology.clone(), actuator)
    }

    fn consumer(&self, rx: FrameReceiver) -> Consumer {
        Consumer::new(rx, self.pipeline())
    }
}

fn link_integrity_frame(origin: PortWwn, ports: &[PortWwn]) -> NotificationFrame {
    let payload = build_link_integrity(PayloadFormat::Legacy, SWITCH_PORT, origin, ports);
    let raw = RawFrame::from_record(&encode_record(origin, &payload)).unwrap();
    let Classification::Queue(command) = classify(&raw) else {
        panic!("link integrity FPIN must be queued");
    };
    NotificationFrame::new(raw, command)
}

// ============================================================================
// PIPELINE TESTS
// ============================================================================

#[tokio::test]
async fn test_impacted_target_with_two_active_paths_is_failed() {
    let setup = TestSetup::new(TWO_ACTIVE);
    let (_tx, rx) = frame_queue(8);
    let mut consumer = setup.consumer(rx);

    let report = consumer
        .handle_frame(link_integrity_frame(HBA, &[TARGET_A]))
        .await;

    assert_eq!(report.attempts, 1);
    assert_eq!(report.paths_failed(), 1);
    assert_eq!(setup.control.failed(), vec!["sdc".to_string()]);
    assert_eq!(
        setup.flush.requests(),
        vec![("host6".to_string(), HBA, TARGET_A)]
    );
}

#[tokio::test]
async fn test_last_active_path_is_never_failed() {
    let setup = TestSetup::new(ONE_ACTIVE);
    let (_tx, rx) = frame_queue(8);
    let mut consumer = setup.consumer(rx);

    let report = consumer
        .handle_frame(link_integrity_frame(HBA, &[TARGET_A]))
        .await;

    assert_eq!(report.paths_failed(), 0);
    assert_eq!(report.paths_skipped(), 1);
    assert!(setup.control.failed().is_empty());
    assert!(setup.flush.requests().is_empty());
}

#[tokio::test]
async fn test_unmatched_hba_resolves_nothing() {
    let setup = TestSetup::new(TWO_ACTIVE);
    let (_tx, rx) = frame_queue(8);
    let mut consumer = setup.consumer(rx);

    let stranger = PortWwn::new(0x1000_0000_dead_beef);
    let report = consumer
        .handle_frame(link_integrity_frame(stranger, &[TARGET_A]))
        .await;

    assert_eq!(report.outcome, Some(CycleOutcome::NoHost));
    assert_eq!(setup.topology.target_scans.load(Ordering::SeqCst), 0);
    assert!(setup.control.failed().is_empty());
}

#[tokio::test]
async fn test_notification_on_other_hba_ignores_foreign_targets() {
    // host7 has no targets of its own; target A sits behind host6.
    let setup = TestSetup::new(TWO_ACTIVE);
    let (_tx, rx) = frame_queue(8);
    let mut consumer = setup.consumer(rx);

    let report = consumer
        .handle_frame(link_integrity_frame(OTHER_HBA, &[TARGET_A]))
        .await;

    assert_eq!(report.outcome, Some(CycleOutcome::NoTargets));
    assert!(setup.control.failed().is_empty());
}

#[tokio::test]
async fn test_repeated_notification_resolves_identically() {
    let setup = TestSetup::new(TWO_ACTIVE);
    let pipeline = setup.pipeline();
    let frame = link_integrity_frame(HBA, &[TARGET_A, TARGET_B]);

    let first = pipeline.process(&frame).await.unwrap();
    let second = pipeline.process(&frame).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(
        setup.control.failed(),
        vec![
            "sdc".to_string(),
            "sdd".to_string(),
            "sdc".to_string(),
            "sdd".to_string()
        ]
    );
}

#[tokio::test]
async fn test_non_actionable_descriptor_is_left_alone() {
    let setup = TestSetup::new(TWO_ACTIVE);
    let payload = build_fpin(
        PayloadFormat::Legacy,
        DescriptorTag::Congestion.value(),
        SWITCH_PORT,
        HBA,
        &[TARGET_A],
    );
    let raw = RawFrame::from_record(&encode_record(HBA, &payload)).unwrap();
    let Classification::Queue(command) = classify(&raw) else {
        panic!("FPIN frames are always queued");
    };

    let outcome = setup
        .pipeline()
        .process(&NotificationFrame::new(raw, command))
        .await
        .unwrap();
    assert_eq!(outcome, CycleOutcome::NotActionable);
    assert!(setup.control.failed().is_empty());
}

#[tokio::test]
async fn test_pipeline_gives_up_after_three_attempts() {
    let topology = Arc::new(FlakyTopology {
        inner: fabric(),
        failures: usize::MAX,
        scans: AtomicUsize::new(0),
    });
    let control = Arc::new(RecordingControl::with_status("mpatha", TWO_ACTIVE));
    let actuator = Actuator::new(control.clone(), Arc::new(RecordingFlush::default()));
    let (_tx, rx) = frame_queue(8);
    let mut consumer = Consumer::new(rx, Pipeline::new(topology.clone(), actuator));

    let report = consumer
        .handle_frame(link_integrity_frame(HBA, &[TARGET_A]))
        .await;

    assert_eq!(report.attempts, PIPELINE_ATTEMPTS);
    assert_eq!(topology.scans.load(Ordering::SeqCst), 3);
    assert_eq!(report.outcome, None);
    assert_eq!(consumer.stats().frames_dropped, 1);
    assert!(control.failed().is_empty());
}

#[tokio::test]
async fn test_pipeline_recovers_after_transient_failure() {
    let topology = Arc::new(FlakyTopology {
        inner: fabric(),
        failures: 2,
        scans: AtomicUsize::new(0),
    });
    let control = Arc::new(RecordingControl::with_status("mpatha", TWO_ACTIVE));
    let actuator = Actuator::new(control.clone(), Arc::new(RecordingFlush::default()));
    let (_tx, rx) = frame_queue(8);
    let mut consumer = Consumer::new(rx, Pipeline::new(topology, actuator));

    let report = consumer
        .handle_frame(link_integrity_frame(HBA, &[TARGET_B]))
        .await;

    assert_eq!(report.attempts, 3);
    assert_eq!(control.failed(), vec!["sdd".to_string()]);
}

// ============================================================================
// QUEUE TESTS
// ============================================================================

#[tokio::test]
async fn test_queue_preserves_arrival_order() {
    let (tx, mut rx) = frame_queue(8);
    let origins = [HBA, OTHER_HBA, PortWwn::new(0x1000_0000_c9aa_0003)];
    for origin in origins {
        tx.enqueue(link_integrity_frame(origin, &[TARGET_A])).unwrap();
    }
    drop(tx);

    let mut seen = Vec::new();
    while let Some(frame) = rx.dequeue().await {
        seen.push(frame.origin());
    }
    assert_eq!(seen, origins);
}

#[test]
fn test_full_queue_drops_after_three_attempts() {
    let (tx, _rx) = frame_queue(1);
    tx.enqueue(link_integrity_frame(HBA, &[TARGET_A])).unwrap();

    let err = tx
        .enqueue(link_integrity_frame(HBA, &[TARGET_B]))
        .unwrap_err();
    assert!(matches!(err, EnqueueError::Full { attempts: ENQUEUE_ATTEMPTS }));
    assert_eq!(tx.pending(), 1);
}

// ============================================================================
// RECEIVER TO CONSUMER
// ============================================================================

fn replay(records: &[Vec<u8>]) -> CharDeviceSource<Cursor<Vec<u8>>> {
    CharDeviceSource::from_reader(Cursor::new(records.concat()), "replay")
}

#[tokio::test]
async fn test_replayed_records_flow_end_to_end() {
    let setup = TestSetup::new(TWO_ACTIVE);
    let fpin = build_link_integrity(PayloadFormat::Legacy, SWITCH_PORT, HBA, &[TARGET_A]);
    let congestion = [0x83, 0, 0, 0, 0, 0, 0, 0];
    let unknown = [0x99, 0, 0, 0];

    let records = vec![
        encode_record(HBA, &fpin),
        encode_record(HBA, &congestion),
        encode_record(HBA, &unknown),
    ];

    let (tx, rx) = frame_queue(8);
    let receiver_stats = Receiver::new(replay(&records), tx).run().unwrap();
    assert_eq!(receiver_stats.received, 3);
    assert_eq!(receiver_stats.queued, 1);
    assert_eq!(receiver_stats.ignored, 1);
    assert_eq!(receiver_stats.malformed, 1);

    let consumer_stats = setup.consumer(rx).run().await;
    assert_eq!(consumer_stats.frames_processed, 1);
    assert_eq!(consumer_stats.paths_failed, 1);
    assert_eq!(setup.control.failed(), vec!["sdc".to_string()]);
    assert_eq!(
        setup.flush.requests(),
        vec![("host6".to_string(), HBA, TARGET_A)]
    );
}

#[test]
fn test_receiver_reports_dropped_frame_when_queue_full() {
    let (tx, _rx) = frame_queue(1);
    let fpin = build_link_integrity(PayloadFormat::Legacy, SWITCH_PORT, HBA, &[TARGET_A]);
    let mut receiver = Receiver::new(replay(&[]), tx);

    let first = RawFrame::from_record(&encode_record(HBA, &fpin)).unwrap();
    let second = RawFrame::from_record(&encode_record(HBA, &fpin)).unwrap();

    assert_eq!(receiver.handle(first).unwrap(), Disposition::Queued);
    assert_eq!(receiver.handle(second).unwrap(), Disposition::Dropped);
    assert_eq!(receiver.stats().dropped, 1);
}

#[test]
fn test_receiver_stops_when_consumer_is_gone() {
    let (tx, rx) = frame_queue(4);
    drop(rx);
    let fpin = build_link_integrity(PayloadFormat::Legacy, SWITCH_PORT, HBA, &[TARGET_A]);

    let err = Receiver::new(replay(&[encode_record(HBA, &fpin)]), tx)
        .run()
        .unwrap_err();
    assert!(matches!(err, FpindError::QueueClosed));
}
