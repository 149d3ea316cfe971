//! End-to-end scenarios against the recording mock subsystem.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use beacon_core::mock::{sample_beacon, sample_device, FailPoint, GatewayCall, MockGateway};
use beacon_core::{
    channel, BeaconConfig, BeaconCore, BeaconError, BeaconRegion, ConnectionState, MacAddress,
    RegionDescriptor, RegionKey, RegionState, Setting, SettingId, Signal,
};

const UUID: &str = "B9407F30-F5F8-466E-AFF9-25556B57FE6D";

fn core(gateway: &Arc<MockGateway>) -> BeaconCore {
    BeaconCore::new(gateway.clone(), &BeaconConfig::default())
}

fn mac(raw: &str) -> MacAddress {
    raw.parse().unwrap()
}

fn hardware_region(descriptor: &RegionDescriptor) -> BeaconRegion {
    BeaconRegion::from_descriptor(descriptor, false).unwrap()
}

fn key(descriptor: &RegionDescriptor) -> RegionKey {
    hardware_region(descriptor).key()
}

// ============================================================================
// Ranging
// ============================================================================

#[test]
fn test_double_start_keeps_first_consumer() {
    let gateway = Arc::new(MockGateway::new());
    let core = core(&gateway);
    let descriptor = RegionDescriptor::new(UUID, Some(1), Some(2));

    let (first, mut first_stream) = channel();
    let (second, mut second_stream) = channel();
    core.start_ranging(&descriptor, first).unwrap();
    core.start_ranging(&descriptor, second).unwrap();

    let start = GatewayCall::StartRanging {
        key: key(&descriptor),
        secure: false,
    };
    assert_eq!(gateway.count(&start), 1);
    assert_eq!(gateway.count(&GatewayCall::SetRangingListener), 1);

    let region = hardware_region(&descriptor);
    let beacon = sample_beacon(&mac("C4:9C:21:5F:0A:11"), 1, 2, -58);
    assert!(gateway.emit_beacons(&region, &[beacon]));

    match first_stream.try_recv() {
        Some(Signal::Event(event)) => {
            assert_eq!(event.region.proximity_uuid.as_deref(), Some(UUID));
            assert_eq!(event.beacons.len(), 1);
        }
        other => panic!("unexpected signal: {other:?}"),
    }
    assert_eq!(second_stream.try_recv(), None);
    assert!(second_stream.is_finished());
}

#[test]
fn test_stop_without_start_is_not_subscribed() {
    let gateway = Arc::new(MockGateway::new());
    let core = core(&gateway);
    let descriptor = RegionDescriptor::new(UUID, Some(1), None);

    let err = core.stop_ranging(&descriptor).unwrap_err();
    assert!(matches!(err, BeaconError::NotSubscribed { .. }));
    assert_eq!(gateway.count(&GatewayCall::StopRanging(key(&descriptor))), 0);
}

#[test]
fn test_event_after_stop_is_dropped() {
    let gateway = Arc::new(MockGateway::new());
    let core = core(&gateway);
    let descriptor = RegionDescriptor::new(UUID, Some(7), None);
    let (consumer, mut stream) = channel();

    tokio_test::assert_ok!(core.start_ranging(&descriptor, consumer));
    tokio_test::assert_ok!(core.stop_ranging(&descriptor));
    gateway.emit_beacons(&hardware_region(&descriptor), &[]);

    let signals = stream.drain();
    assert_eq!(signals.len(), 1);
    assert!(signals[0].is_closed());
    assert!(stream.is_finished());
    assert_eq!(gateway.count(&GatewayCall::StopRanging(key(&descriptor))), 1);
}

#[test]
fn test_absent_and_zero_major_share_a_key() {
    let gateway = Arc::new(MockGateway::new());
    let core = core(&gateway);
    let absent = RegionDescriptor::new(UUID, None, Some(2));
    let zero = RegionDescriptor::new(UUID, Some(0), Some(2));
    assert_eq!(key(&absent), key(&zero));

    let (first, _first_stream) = channel();
    let (second, _second_stream) = channel();
    core.start_ranging(&absent, first).unwrap();
    core.start_ranging(&zero, second).unwrap();

    assert_eq!(core.ranging_keys().len(), 1);
    assert_eq!(core.ranging_keys()[0].as_str(), format!("{UUID}:0:2"));
}

#[test]
fn test_secure_and_plain_ranging_share_a_key() {
    let gateway = Arc::new(MockGateway::new());
    let core = core(&gateway);
    let descriptor = RegionDescriptor::new(UUID, Some(3), Some(4));

    let (secure, _secure_stream) = channel();
    let (plain, plain_stream) = channel();
    core.start_secure_ranging(&descriptor, secure).unwrap();
    core.start_ranging(&descriptor, plain).unwrap();

    assert_eq!(
        gateway.count(&GatewayCall::StartRanging {
            key: key(&descriptor),
            secure: true
        }),
        1
    );
    assert!(plain_stream.is_finished());

    core.stop_ranging(&descriptor).unwrap();
    assert!(core.ranging_keys().is_empty());
}

#[test]
fn test_invalid_region_is_rejected_synchronously() {
    let gateway = Arc::new(MockGateway::new());
    let core = core(&gateway);
    let (consumer, stream) = channel();

    let err = core
        .start_ranging(&RegionDescriptor::new("not-a-uuid", None, None), consumer)
        .unwrap_err();
    assert!(matches!(err, BeaconError::InvalidRegion(_)));
    assert!(gateway.calls().is_empty());
    assert!(stream.is_finished());
}

#[test]
fn test_failed_start_leaves_entry_until_stop() {
    let gateway = Arc::new(MockGateway::new());
    let core = core(&gateway);
    let descriptor = RegionDescriptor::new(UUID, Some(1), Some(1));
    gateway.fail(FailPoint::StartRanging);

    let (consumer, mut stream) = channel();
    core.start_ranging(&descriptor, consumer).unwrap();
    assert!(matches!(
        stream.try_recv(),
        Some(Signal::Error(BeaconError::Subsystem(_)))
    ));
    assert_eq!(core.ranging_keys(), vec![key(&descriptor)]);

    // The stuck entry makes a retry a no-op until stopped.
    gateway.recover(FailPoint::StartRanging);
    let (retry, retry_stream) = channel();
    core.start_ranging(&descriptor, retry).unwrap();
    assert!(retry_stream.is_finished());

    core.stop_ranging(&descriptor).unwrap();
    let (fresh, mut fresh_stream) = channel();
    core.start_ranging(&descriptor, fresh).unwrap();
    assert_eq!(fresh_stream.try_recv(), None);
    assert_eq!(
        gateway.count(&GatewayCall::StartRanging {
            key: key(&descriptor),
            secure: false
        }),
        2
    );
}

#[test]
fn test_failed_stop_still_removes_entry() {
    let gateway = Arc::new(MockGateway::new());
    let core = core(&gateway);
    let descriptor = RegionDescriptor::new(UUID, None, None);
    let (consumer, mut stream) = channel();
    core.start_ranging(&descriptor, consumer).unwrap();

    gateway.fail(FailPoint::StopRanging);
    let err = core.stop_ranging(&descriptor).unwrap_err();
    assert!(err.is_subsystem_error());
    assert!(stream.try_recv().is_some_and(|signal| signal.is_closed()));
    assert!(core.ranging_keys().is_empty());
}

// ============================================================================
// Monitoring
// ============================================================================

#[test]
fn test_monitoring_enter_exit_then_close() {
    let gateway = Arc::new(MockGateway::new());
    let core = core(&gateway);
    let descriptor = RegionDescriptor::new(UUID, Some(1), None);
    let region = hardware_region(&descriptor);
    let (consumer, mut stream) = channel();

    core.start_monitoring(&descriptor, consumer).unwrap();
    gateway.emit_entered(&region);
    gateway.emit_exited(&region);
    core.stop_monitoring(&descriptor).unwrap();

    let signals = stream.drain();
    assert_eq!(signals.len(), 3);
    assert!(matches!(&signals[0], Signal::Event(e) if e.state == RegionState::Entered));
    assert!(matches!(&signals[1], Signal::Event(e) if e.state == RegionState::Exited));
    assert!(signals[2].is_closed());
    assert_eq!(gateway.count(&GatewayCall::StopMonitoring(key(&descriptor))), 1);
}

#[test]
fn test_ranging_and_monitoring_registries_are_independent() {
    let gateway = Arc::new(MockGateway::new());
    let core = core(&gateway);
    let descriptor = RegionDescriptor::new(UUID, Some(2), Some(2));
    let (ranging, mut ranging_stream) = channel();
    let (monitoring, mut monitoring_stream) = channel();

    core.start_ranging(&descriptor, ranging).unwrap();
    core.start_monitoring(&descriptor, monitoring).unwrap();
    gateway.emit_entered(&hardware_region(&descriptor));

    assert_eq!(ranging_stream.try_recv(), None);
    assert!(monitoring_stream.try_recv().is_some_and(|s| s.is_event()));
    assert_eq!(core.ranging_keys(), core.monitoring_keys());
}

// ============================================================================
// Discovery
// ============================================================================

#[test]
fn test_discovery_first_subscriber_wins() {
    let gateway = Arc::new(MockGateway::new());
    let core = core(&gateway);
    let (first, mut first_stream) = channel();
    let (second, second_stream) = channel();

    core.start_discovery(first);
    core.start_discovery(second);
    assert_eq!(gateway.count(&GatewayCall::StartDiscovery), 1);
    assert!(second_stream.is_finished());

    gateway.emit_devices(&[sample_device(&mac("C4:9C:21:5F:0A:11"), -50)]);
    assert!(matches!(first_stream.try_recv(), Some(Signal::Event(e)) if e.devices.len() == 1));

    core.stop_discovery().unwrap();
    assert!(first_stream.try_recv().is_some_and(|s| s.is_closed()));
    assert_eq!(core.stop_discovery().unwrap_err(), BeaconError::NotDiscovering);
}

#[test]
fn test_discovery_start_failure_reaches_subscriber() {
    let gateway = Arc::new(MockGateway::new());
    let core = core(&gateway);
    gateway.fail(FailPoint::StartDiscovery);

    let (consumer, mut stream) = channel();
    core.start_discovery(consumer);
    assert!(matches!(stream.try_recv(), Some(Signal::Error(BeaconError::Subsystem(_)))));
    assert!(core.is_discovering());
}

#[test]
fn test_concurrent_starts_register_once() {
    const THREADS: usize = 8;
    let gateway = Arc::new(MockGateway::new());
    let core = &core(&gateway);
    let descriptor = &RegionDescriptor::new(UUID, Some(3), Some(4));
    let barrier = &Barrier::new(THREADS);

    let mut streams = thread::scope(|scope| {
        let starters: Vec<_> = (0..THREADS)
            .map(|_| {
                scope.spawn(move || {
                    let (consumer, stream) = channel();
                    barrier.wait();
                    core.start_ranging(descriptor, consumer).unwrap();
                    stream
                })
            })
            .collect();
        starters
            .into_iter()
            .map(|starter| starter.join().unwrap())
            .collect::<Vec<_>>()
    });

    let start = GatewayCall::StartRanging {
        key: key(descriptor),
        secure: false,
    };
    assert_eq!(core.ranging_keys(), vec![key(&descriptor)]);
    assert_eq!(gateway.count(&start), 1);
    assert_eq!(gateway.count(&GatewayCall::SetRangingListener), 1);

    assert!(gateway.emit_beacons(&hardware_region(descriptor), &[]));
    let delivered = streams
        .iter_mut()
        .map(|stream| matches!(stream.try_recv(), Some(Signal::Event(_))))
        .filter(|delivered| *delivered)
        .count();
    assert_eq!(delivered, 1);
}

#[test]
fn test_racing_start_stop_and_events_stay_consistent() {
    const ROUNDS: usize = 200;
    let gateway = Arc::new(MockGateway::new());
    let core = &core(&gateway);
    let descriptor = &RegionDescriptor::new(UUID, Some(5), None);
    let region = hardware_region(descriptor);
    let beacon = sample_beacon(&mac("C4:9C:21:5F:0A:11"), 5, 1, -60);
    let running = AtomicBool::new(true);

    let (mut streams, stopped) = thread::scope(|scope| {
        let emitter = scope.spawn(|| {
            while running.load(Ordering::SeqCst) {
                gateway.emit_beacons(&region, std::slice::from_ref(&beacon));
            }
        });
        let starters: Vec<_> = (0..2)
            .map(|_| {
                scope.spawn(move || {
                    (0..ROUNDS)
                        .map(|_| {
                            let (consumer, stream) = channel();
                            core.start_ranging(descriptor, consumer).unwrap();
                            stream
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        let stoppers: Vec<_> = (0..2)
            .map(|_| {
                scope.spawn(move || {
                    (0..ROUNDS)
                        .filter(|_| core.stop_ranging(descriptor).is_ok())
                        .count()
                })
            })
            .collect();

        let streams: Vec<_> = starters
            .into_iter()
            .flat_map(|starter| starter.join().unwrap())
            .collect();
        let stopped: usize = stoppers
            .into_iter()
            .map(|stopper| stopper.join().unwrap())
            .sum();
        running.store(false, Ordering::SeqCst);
        emitter.join().unwrap();
        (streams, stopped)
    });

    // Every subsystem start is paired with a stop, except for a live entry.
    let remaining = core.ranging_keys().len();
    let starts = gateway.count(&GatewayCall::StartRanging {
        key: key(descriptor),
        secure: false,
    });
    assert!(remaining <= 1);
    assert_eq!(
        gateway.count(&GatewayCall::StopRanging(key(descriptor))),
        stopped
    );
    assert_eq!(starts, stopped + remaining);

    for stream in &mut streams {
        let signals = stream.drain();
        assert!(signals.iter().all(|signal| signal.is_event() || signal.is_closed()));
        if let Some(position) = signals.iter().position(Signal::is_closed) {
            assert_eq!(
                position,
                signals.len() - 1,
                "signal after close: {signals:?}"
            );
        }
    }
}

// ============================================================================
// Connection
// ============================================================================

#[test]
fn test_connect_to_unknown_device() {
    let gateway = Arc::new(MockGateway::with_auto_connect());
    let core = core(&gateway);
    let (consumer, _stream) = channel();

    let err = core.connect_to_device("C4:9C:21:5F:0A:11", consumer).unwrap_err();
    assert!(matches!(err, BeaconError::UnknownDevice(_)));
    assert!(gateway.links().is_empty());
}

#[test]
fn test_connect_uses_latest_sighting() {
    let gateway = Arc::new(MockGateway::with_auto_connect());
    let core = core(&gateway);
    let address = mac("C4:9C:21:5F:0A:11");
    let (discovery, _discovery_stream) = channel();
    core.start_discovery(discovery);
    gateway.emit_devices(&[sample_device(&address, -80)]);
    gateway.emit_devices(&[sample_device(&address, -45)]);
    assert_eq!(core.discovered_device_count(), 2);

    let (consumer, mut stream) = channel();
    core.connect_to_device("c4:9c:21:5f:0a:11", consumer).unwrap();

    let link = gateway.last_link().unwrap();
    assert_eq!(link.device().rssi, -45);
    match stream.try_recv() {
        Some(Signal::Done(Some(info))) => assert_eq!(info.mac_address, address),
        other => panic!("unexpected signal: {other:?}"),
    }
    assert_eq!(core.connection_state(), ConnectionState::Connected);
}

#[test]
fn test_switching_devices_closes_previous_link_once() {
    let gateway = Arc::new(MockGateway::with_auto_connect());
    let core = core(&gateway);
    let first = mac("C4:9C:21:5F:0A:11");
    let second = mac("D0:0D:12:34:56:78");
    core.start_discovery(channel().0);
    gateway.emit_devices(&[sample_device(&first, -50), sample_device(&second, -60)]);

    let (a, mut a_stream) = channel();
    core.connect_to_device(first.as_str(), a).unwrap();
    let (b, mut b_stream) = channel();
    core.connect_to_device(second.as_str(), b).unwrap();

    let links = gateway.links();
    assert_eq!(links.len(), 2);
    assert_eq!(links[0].close_count(), 1);
    assert_eq!(links[1].close_count(), 0);
    assert!(matches!(a_stream.try_recv(), Some(Signal::Done(Some(_)))));
    assert!(matches!(b_stream.try_recv(), Some(Signal::Done(Some(_)))));
    assert_eq!(core.connection_state(), ConnectionState::Connected);
}

#[test]
fn test_connection_failure_returns_to_idle() {
    let gateway = Arc::new(MockGateway::new());
    let core = core(&gateway);
    let address = mac("C4:9C:21:5F:0A:11");
    core.start_discovery(channel().0);
    gateway.emit_devices(&[sample_device(&address, -50)]);

    let (consumer, mut stream) = channel();
    core.connect_to_device(address.as_str(), consumer).unwrap();
    assert_eq!(core.connection_state(), ConnectionState::Connecting);

    gateway.last_link().unwrap().fail_connect("gatt error 133");
    match stream.try_recv() {
        Some(Signal::Error(err)) => assert!(err.to_string().contains("gatt error 133")),
        other => panic!("unexpected signal: {other:?}"),
    }
    assert_eq!(core.connection_state(), ConnectionState::Idle);
}

#[test]
fn test_incomplete_device_info_is_marshal_error() {
    let gateway = Arc::new(MockGateway::new());
    let core = core(&gateway);
    let address = mac("C4:9C:21:5F:0A:11");
    core.start_discovery(channel().0);
    gateway.emit_devices(&[sample_device(&address, -50)]);

    let (consumer, mut stream) = channel();
    core.connect_to_device(address.as_str(), consumer).unwrap();
    let link = gateway.last_link().unwrap();
    link.report_incomplete_info(true);
    link.complete_connect();

    assert!(matches!(stream.try_recv(), Some(Signal::Error(BeaconError::Marshal(_)))));
}

#[test]
fn test_disconnect_completes_after_confirmation() {
    let gateway = Arc::new(MockGateway::with_auto_connect());
    let core = core(&gateway);
    let address = mac("C4:9C:21:5F:0A:11");
    core.start_discovery(channel().0);
    gateway.emit_devices(&[sample_device(&address, -50)]);
    core.connect_to_device(address.as_str(), channel().0).unwrap();

    let (consumer, mut stream) = channel();
    core.disconnect_device(consumer);

    assert_eq!(stream.try_recv(), Some(Signal::Done(None)));
    assert_eq!(gateway.last_link().unwrap().close_count(), 1);
    assert_eq!(core.connection_state(), ConnectionState::Idle);
}

#[test]
fn test_late_connect_confirmation_after_disconnect_is_ignored() {
    let gateway = Arc::new(MockGateway::new());
    let core = core(&gateway);
    let address = mac("C4:9C:21:5F:0A:11");
    core.start_discovery(channel().0);
    gateway.emit_devices(&[sample_device(&address, -50)]);

    let (connect, mut connect_stream) = channel();
    core.connect_to_device(address.as_str(), connect).unwrap();
    let link = gateway.last_link().unwrap();
    link.defer_close(true);

    let (disconnect, mut disconnect_stream) = channel();
    core.disconnect_device(disconnect);
    assert_eq!(core.connection_state(), ConnectionState::Disconnecting);

    // The subsystem confirms the connect after the close was requested.
    link.complete_connect();
    assert_eq!(core.connection_state(), ConnectionState::Disconnecting);
    assert_eq!(connect_stream.try_recv(), None);
    let (writer, _writer_stream) = channel();
    assert_eq!(core.write_major(2, writer).unwrap_err(), BeaconError::NotConnected);

    link.confirm_close();
    match connect_stream.try_recv() {
        Some(Signal::Error(err)) => assert!(err.is_subsystem_error()),
        other => panic!("unexpected signal: {other:?}"),
    }
    assert_eq!(disconnect_stream.try_recv(), Some(Signal::Done(None)));
    assert_eq!(core.connection_state(), ConnectionState::Idle);
}

#[test]
fn test_superseded_connect_attempt_gets_terminal_error() {
    let gateway = Arc::new(MockGateway::new());
    let core = core(&gateway);
    let first = mac("C4:9C:21:5F:0A:11");
    let second = mac("D0:0D:12:34:56:78");
    core.start_discovery(channel().0);
    gateway.emit_devices(&[sample_device(&first, -50), sample_device(&second, -60)]);

    let (a, mut a_stream) = channel();
    core.connect_to_device(first.as_str(), a).unwrap();
    let (b, mut b_stream) = channel();
    core.connect_to_device(second.as_str(), b).unwrap();

    match a_stream.try_recv() {
        Some(Signal::Error(err)) => assert!(err.to_string().contains("superseded")),
        other => panic!("unexpected signal: {other:?}"),
    }
    assert!(a_stream.is_finished());
    assert_eq!(gateway.links()[0].close_count(), 1);

    // Asking again for the device being connected rebinds the outcome.
    let (c, mut c_stream) = channel();
    core.connect_to_device(second.as_str(), c).unwrap();
    assert!(matches!(b_stream.try_recv(), Some(Signal::Error(BeaconError::Subsystem(_)))));
    assert_eq!(gateway.links().len(), 2);

    gateway.last_link().unwrap().complete_connect();
    match c_stream.try_recv() {
        Some(Signal::Done(Some(info))) => assert_eq!(info.mac_address, second),
        other => panic!("unexpected signal: {other:?}"),
    }
    assert_eq!(core.connection_state(), ConnectionState::Connected);
}

#[test]
fn test_disconnect_without_connection_completes_immediately() {
    let gateway = Arc::new(MockGateway::new());
    let core = core(&gateway);
    let (consumer, mut stream) = channel();

    core.disconnect_device(consumer);
    assert_eq!(stream.try_recv(), Some(Signal::Done(None)));
}

// ============================================================================
// Setting writes
// ============================================================================

fn connected_core(gateway: &Arc<MockGateway>) -> BeaconCore {
    let core = core(gateway);
    let address = mac("C4:9C:21:5F:0A:11");
    core.start_discovery(channel().0);
    gateway.emit_devices(&[sample_device(&address, -50)]);
    core.connect_to_device(address.as_str(), channel().0).unwrap();
    core
}

#[tokio::test]
async fn test_write_major_skips_equal_value() {
    let gateway = Arc::new(MockGateway::with_auto_connect());
    let core = connected_core(&gateway);
    let link = gateway.last_link().unwrap();

    let (consumer, mut stream) = channel();
    core.write_major(1, consumer).unwrap();
    assert_eq!(stream.recv().await, Some(Signal::Done(Some(Setting::Major(1)))));
    assert_eq!(link.read_count(), 1);
    assert_eq!(link.write_count(), 0);

    let (consumer, mut stream) = channel();
    core.write_major(40, consumer).unwrap();
    assert_eq!(stream.recv().await, Some(Signal::Done(Some(Setting::Major(40)))));
    assert_eq!(link.read_count(), 2);
    assert_eq!(link.write_count(), 1);
}

#[tokio::test]
async fn test_write_minor_skips_equal_value() {
    let gateway = Arc::new(MockGateway::with_auto_connect());
    let core = connected_core(&gateway);
    let link = gateway.last_link().unwrap();
    link.set_setting(Setting::Minor(12));

    let (consumer, mut stream) = channel();
    core.write_minor(12, consumer).unwrap();
    assert_eq!(stream.recv().await, Some(Signal::Done(Some(Setting::Minor(12)))));
    assert_eq!(link.write_count(), 0);

    let (consumer, mut stream) = channel();
    core.write_minor(13, consumer).unwrap();
    assert_eq!(stream.recv().await, Some(Signal::Done(Some(Setting::Minor(13)))));
    assert_eq!(link.write_count(), 1);
    assert_eq!(link.setting(SettingId::Minor), Some(Setting::Minor(13)));
}

#[tokio::test]
async fn test_write_uuid_read_failure_skips_write() {
    let gateway = Arc::new(MockGateway::with_auto_connect());
    let core = connected_core(&gateway);
    let link = gateway.last_link().unwrap();
    link.fail_reads(true);

    let (consumer, mut stream) = channel();
    core.write_proximity_uuid("F7826DA6-4FA2-4E98-8024-BC5B71E0893E", consumer)
        .unwrap();
    match stream.recv().await {
        Some(Signal::Error(err)) => {
            assert!(err.is_subsystem_error());
            assert!(err.to_string().contains("Could not recover current"));
        }
        other => panic!("unexpected signal: {other:?}"),
    }
    assert_eq!(link.write_count(), 0);
}

#[tokio::test]
async fn test_write_failure_is_reported() {
    let gateway = Arc::new(MockGateway::with_auto_connect());
    let core = connected_core(&gateway);
    gateway.last_link().unwrap().fail_writes(true);

    let (consumer, mut stream) = channel();
    core.write_major(2, consumer).unwrap();
    assert!(matches!(stream.recv().await, Some(Signal::Error(BeaconError::Subsystem(_)))));
}

#[test]
fn test_write_from_plain_thread_runs_on_core_runtime() {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let gateway = Arc::new(MockGateway::with_auto_connect());
    let core = BeaconCore::with_runtime(
        gateway.clone(),
        &BeaconConfig::default(),
        runtime.handle().clone(),
    );
    let address = mac("C4:9C:21:5F:0A:11");
    core.start_discovery(channel().0);
    gateway.emit_devices(&[sample_device(&address, -50)]);
    core.connect_to_device(address.as_str(), channel().0).unwrap();

    let (consumer, mut stream) = channel();
    thread::scope(|scope| scope.spawn(|| core.write_major(3, consumer)).join())
        .unwrap()
        .unwrap();

    let signal = runtime
        .block_on(async { tokio::time::timeout(Duration::from_secs(5), stream.recv()).await })
        .unwrap();
    assert_eq!(signal, Some(Signal::Done(Some(Setting::Major(3)))));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_write_from_plain_thread_after_async_construction() {
    let gateway = Arc::new(MockGateway::with_auto_connect());
    let core = connected_core(&gateway);

    let (consumer, mut stream) = channel();
    thread::scope(|scope| scope.spawn(|| core.write_minor(9, consumer)).join())
        .unwrap()
        .unwrap();

    let signal = tokio::time::timeout(Duration::from_secs(5), stream.recv())
        .await
        .unwrap();
    assert_eq!(signal, Some(Signal::Done(Some(Setting::Minor(9)))));
}

#[test]
fn test_write_outside_any_runtime_is_rejected() {
    let gateway = Arc::new(MockGateway::with_auto_connect());
    let core = connected_core(&gateway);
    let (consumer, _stream) = channel();

    assert_eq!(core.write_major(3, consumer).unwrap_err(), BeaconError::NoRuntime);
    assert_eq!(gateway.last_link().unwrap().read_count(), 0);
}

#[test]
fn test_write_requires_connection() {
    let gateway = Arc::new(MockGateway::new());
    let core = core(&gateway);
    let (consumer, _stream) = channel();
    assert_eq!(core.write_major(1, consumer).unwrap_err(), BeaconError::NotConnected);
}

#[test]
fn test_write_rejects_malformed_uuid() {
    let gateway = Arc::new(MockGateway::with_auto_connect());
    let core = connected_core(&gateway);
    let (consumer, _stream) = channel();

    let err = core.write_proximity_uuid("b9407f30f5f8", consumer).unwrap_err();
    assert!(matches!(err, BeaconError::InvalidSetting(_)));
    assert_eq!(gateway.last_link().unwrap().read_count(), 0);
}

// ============================================================================
// Lifecycle
// ============================================================================

#[test]
fn test_reset_forgets_consumers_without_stopping() {
    let gateway = Arc::new(MockGateway::new());
    let core = core(&gateway);
    let descriptor = RegionDescriptor::new(UUID, Some(1), None);
    let (ranging, mut ranging_stream) = channel();
    core.start_ranging(&descriptor, ranging).unwrap();
    core.start_discovery(channel().0);

    core.reset();

    assert!(core.ranging_keys().is_empty());
    assert!(!core.is_discovering());
    assert_eq!(gateway.count(&GatewayCall::StopRanging(key(&descriptor))), 0);
    assert_eq!(gateway.count(&GatewayCall::StopDiscovery), 0);

    gateway.emit_beacons(&hardware_region(&descriptor), &[]);
    assert_eq!(ranging_stream.try_recv(), None);
    assert!(ranging_stream.is_finished());
}

#[test]
fn test_shutdown_releases_link_and_service() {
    let gateway = Arc::new(MockGateway::with_auto_connect());
    let core = connected_core(&gateway);

    core.shutdown();

    assert_eq!(gateway.last_link().unwrap().close_count(), 1);
    assert_eq!(gateway.count(&GatewayCall::Shutdown), 1);
    assert_eq!(core.connection_state(), ConnectionState::Idle);
}
