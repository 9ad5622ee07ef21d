use std::time::Duration;

use rig_host::{
    init_logging, serve_controller, spawn_link, HostConfig, HostError, LinkEvent, MemoryStore,
};
use rig_protocol::{
    build_command, build_ping, parse_update, CircuitBank, CircuitMask, CircuitTable,
    CommandFlags, Controller, Framer, LinkError, Packet, PacketType, ParamMask, Profile,
    UpdateFlags, ValueContext,
};
use tokio::io::{duplex, AsyncWriteExt, DuplexStream};

fn bench_controller() -> Controller<MemoryStore> {
    let mut bank = CircuitBank::default();
    bank.set_param(3, 7, 101.25);
    Controller::new(bank, MemoryStore::default(), Profile::Extended)
}

fn frame(packet: &Packet) -> Vec<u8> {
    let mut framer: Framer = Framer::new(Profile::Extended);
    framer.encode(packet).unwrap().to_vec()
}

/// Link on one end of a duplex pipe, simulated controller on the other
fn bench(
    config: HostConfig,
) -> (
    rig_host::LinkHandle,
    tokio::task::JoinHandle<rig_host::Result<rig_host::LinkStats>>,
    tokio::task::JoinHandle<rig_host::Result<Controller<MemoryStore>>>,
) {
    init_logging(config.log_filter());
    let (near, far) = duplex(1024);
    let device = tokio::spawn(serve_controller(far, bench_controller(), Profile::Extended));
    let (handle, task) = spawn_link(near, config);
    (handle, task, device)
}

#[tokio::test]
async fn test_ping_round_trip() {
    let (mut handle, task, device) = bench(HostConfig::default());

    let reply = handle.request(build_ping(4, 0)).await.unwrap();
    assert_eq!(reply, build_ping(4, 0));

    let stats = handle.stats().await.unwrap();
    assert_eq!(stats.framer.frames_tx, 1);
    assert_eq!(stats.framer.frames_ok, 1);
    assert!(!stats.awaiting_ack);

    handle.shutdown().await;
    let final_stats = task.await.unwrap().unwrap();
    assert_eq!(final_stats.timeouts, 0);
    device.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_refresh_spans_two_updates() {
    let (mut handle, _task, _device) = bench(HostConfig::default());

    let first = handle
        .request(Packet::update(UpdateFlags::REFRESH))
        .await
        .unwrap();
    assert_eq!(first.kind, PacketType::Update);

    let second = match handle.next_event().await {
        Some(LinkEvent::Packet(packet)) => packet,
        other => panic!("expected second update, got {:?}", other),
    };

    let mut mirror = CircuitBank::default();
    let head = parse_update(&first, &mut mirror).unwrap();
    assert!(head.system.is_some());
    let tail = parse_update(&second, &mut mirror).unwrap();
    assert!(tail.system.is_none());
    assert_eq!(mirror.param(3, 7), 101.25);
}

#[tokio::test]
async fn test_command_changes_controller() {
    let (mut handle, task, device) = bench(HostConfig::default());

    let command = build_command(
        CommandFlags::RESPOND | CommandFlags::MODESET | CommandFlags::PARAMSET | CommandFlags::SAVE,
        CircuitMask::from_bits(0b1),
        &[ValueContext::param(2, 12.5), ValueContext::mode(3)],
        2,
    )
    .unwrap();
    assert_eq!(handle.request(command).await.unwrap(), Packet::ack());

    handle.shutdown().await;
    task.await.unwrap().unwrap();
    let controller = device.await.unwrap().unwrap();
    assert_eq!(controller.system().mode, 3);
    assert_eq!(controller.table().param(0, 2), 12.5);
    assert!(controller.store().blob().is_some());
}

#[tokio::test]
async fn test_value_request_helpers() {
    let (mut handle, _task, _device) = bench(HostConfig::default());

    handle
        .send_update(UpdateFlags::CIRCUITS, CircuitMask::from_bits(0b1000), ParamMask::from_bits(0x80))
        .await
        .unwrap();
    let reply = match handle.next_event().await {
        Some(LinkEvent::Packet(packet)) => packet,
        other => panic!("expected update, got {:?}", other),
    };
    assert_eq!(reply.payload.as_slice(), &[0b1000, 0x00, 0x80, 101, 25]);

    handle.send_ping().await.unwrap();
    assert_eq!(
        handle.next_event().await,
        Some(LinkEvent::Packet(build_ping(4, 0)))
    );
}

#[tokio::test(start_paused = true)]
async fn test_silent_device_retries_then_gives_up() {
    let (near, _far) = duplex(1024);
    let config = HostConfig {
        request_attempts: 3,
        ..HostConfig::default()
    };
    let (mut handle, _task) = spawn_link(near, config);

    let result = handle.request(build_ping(1, 1)).await;
    assert!(matches!(result, Err(HostError::RequestTimeout { attempts: 3 })));

    let stats = handle.stats().await.unwrap();
    assert_eq!(stats.timeouts, 3);
    assert_eq!(stats.framer.frames_tx, 3);
}

#[tokio::test]
async fn test_unsolicited_packets_kept_for_caller() {
    let (near, mut far): (DuplexStream, DuplexStream) = duplex(1024);
    let (mut handle, _task) = spawn_link(near, HostConfig::default());

    let peer = tokio::spawn(async move {
        // let the request go out first
        tokio::time::sleep(Duration::from_millis(20)).await;
        far.write_all(&frame(&build_ping(9, 0))).await.unwrap();
        far.write_all(&frame(&Packet::ack())).await.unwrap();
        far
    });

    let command = Packet::command(CommandFlags::RESPOND).with_timeout(2);
    assert_eq!(handle.request(command).await.unwrap(), Packet::ack());
    assert_eq!(
        handle.next_event().await,
        Some(LinkEvent::Packet(build_ping(9, 0)))
    );
    drop(peer.await.unwrap());
}

#[tokio::test]
async fn test_peer_hang_up() {
    let (near, far) = duplex(64);
    let (mut handle, task) = spawn_link(near, HostConfig::default());
    drop(far);

    assert_eq!(handle.next_event().await, Some(LinkEvent::Disconnected));
    assert!(task.await.unwrap().is_ok());
    assert!(matches!(
        handle.send(Packet::ack()).await,
        Err(HostError::Closed)
    ));
}

#[tokio::test]
async fn test_ack_never_waits() {
    let (near, _far) = duplex(64);
    let (mut handle, _task) = spawn_link(near, HostConfig::default());
    assert!(matches!(
        handle.request(Packet::ack()).await,
        Err(HostError::NoReplyExpected)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_stalled_peer_fails_send() {
    // far end never reads, so the pipe holds only half a ping frame
    let (near, _far) = duplex(4);
    let (handle, _task) = spawn_link(near, HostConfig::default());

    let ping = build_ping(4, 2);
    assert!(matches!(
        handle.send(ping.clone()).await,
        Err(HostError::Link(LinkError::ShortWrite { written: 4, expected: 8 }))
    ));
    assert!(matches!(
        handle.send(ping).await,
        Err(HostError::Link(LinkError::ShortWrite { written: 0, .. }))
    ));

    let stats = handle.stats().await.unwrap();
    assert_eq!(stats.framer.frames_tx, 0);
    assert!(!stats.awaiting_ack);
}
