//! Session controller integration tests.
//!
//! Drives the controller through its public surface with a scripted
//! mock driver: quota boundaries, open/close round-trips, shared-port
//! multiplexing, and teardown behavior.

use std::sync::Arc;

use unison::driver::mock::{usb_device, MockDriver};
use unison::driver::{
    DeviceInformation, DeviceKind, PortDirection, PortInformation, Protocol,
};
use unison::service::{
    AllowAll, DeviceManager, Error, SessionController, MAX_CLIENTS, MAX_CLIENTS_PER_APP,
    MAX_DEVICES_PER_CLIENT, MAX_PORTS_PER_CLIENT,
};
use unison::UmpEvent;

fn controller_with_mock() -> (Arc<SessionController>, Arc<MockDriver>) {
    let manager = DeviceManager::new();
    let driver = MockDriver::new(DeviceKind::Usb);
    manager.register_driver(driver.clone());
    let controller =
        SessionController::new(manager, Arc::new(AllowAll), 60_000, Arc::new(|| {}), 4096);
    (controller, driver)
}

/// Attach a two-port device (input 0, output 1) and return its service id.
fn attach(
    controller: &SessionController,
    driver: &MockDriver,
    driver_id: i64,
    name: &str,
) -> i64 {
    driver.attach_device(usb_device(driver_id, name));
    controller.device_manager().refresh_devices();
    controller
        .get_devices()
        .into_iter()
        .find(|d| d.driver_device_id == driver_id)
        .expect("device enumerated")
        .device_id
}

/// A device exposing eight input ports (0-7) and eight output ports (8-15).
fn many_port_device(driver_id: i64) -> DeviceInformation {
    let mut ports = Vec::new();
    for index in 0..8 {
        ports.push(PortInformation {
            port_index: index,
            name: format!("In {index}"),
            direction: PortDirection::Input,
            protocol: Protocol::Midi10,
        });
    }
    for index in 8..16 {
        ports.push(PortInformation {
            port_index: index,
            name: format!("Out {index}"),
            direction: PortDirection::Output,
            protocol: Protocol::Midi10,
        });
    }
    DeviceInformation {
        device_id: 0,
        driver_device_id: driver_id,
        kind: DeviceKind::Usb,
        protocol: Protocol::Midi10,
        address: String::new(),
        product_name: format!("Hub {driver_id}"),
        vendor_name: "Test".into(),
        ports,
    }
}

fn voice(ts: u64, word: u32) -> UmpEvent {
    UmpEvent::new(ts, [word].as_ref())
}

#[test]
fn test_create_client_assigns_distinct_ids() {
    let (controller, _driver) = controller_with_mock();
    let (a, _rx_a) = controller.create_client(100).unwrap();
    let (b, _rx_b) = controller.create_client(101).unwrap();
    assert!(a > 0);
    assert_ne!(a, b);
}

#[test]
fn test_destroy_absent_client_is_invalid() {
    let (controller, _driver) = controller_with_mock();
    assert_eq!(controller.destroy_client(99_999), Err(Error::InvalidClient));
}

#[test]
fn test_ninth_client_rejected() {
    let (controller, _driver) = controller_with_mock();
    let mut clients = Vec::new();
    for uid in 0..MAX_CLIENTS as u32 {
        clients.push(controller.create_client(uid).unwrap());
    }
    assert_eq!(
        controller.create_client(999).map(|(id, _)| id),
        Err(Error::TooManyClients)
    );
    // Freeing any one slot lets the next create succeed.
    controller.destroy_client(clients[0].0).unwrap();
    assert!(controller.create_client(999).is_ok());
}

#[test]
fn test_third_client_per_uid_rejected() {
    let (controller, _driver) = controller_with_mock();
    let uid = 4242;
    let (first, _rx_a) = controller.create_client(uid).unwrap();
    let (_second, _rx_b) = controller.create_client(uid).unwrap();
    assert_eq!(
        controller.create_client(uid).map(|(id, _)| id),
        Err(Error::TooManyClients)
    );
    assert_eq!(MAX_CLIENTS_PER_APP, 2);

    controller.destroy_client(first).unwrap();
    assert!(controller.create_client(uid).is_ok());
}

#[test]
fn test_open_device_rejects_unknown_ids() {
    let (controller, driver) = controller_with_mock();
    let (client, _rx) = controller.create_client(1).unwrap();

    assert_eq!(
        controller.open_device(77, 1),
        Err(Error::InvalidClient)
    );
    assert_eq!(
        controller.open_device(client, 98_765),
        Err(Error::InvalidDeviceHandle)
    );
    assert_eq!(driver.open_device_calls(98_765), 0);
}

#[test]
fn test_open_device_twice_is_already_open() {
    let (controller, driver) = controller_with_mock();
    let device = attach(&controller, &driver, 777, "Dup");
    let (client, _rx) = controller.create_client(1).unwrap();

    controller.open_device(client, device).unwrap();
    assert_eq!(
        controller.open_device(client, device),
        Err(Error::DeviceAlreadyOpen)
    );
    assert_eq!(driver.open_device_calls(777), 1);
}

#[test]
fn test_shared_device_opens_driver_once() {
    let (controller, driver) = controller_with_mock();
    let device = attach(&controller, &driver, 888, "Shared");
    let (a, _rx_a) = controller.create_client(1).unwrap();
    let (b, _rx_b) = controller.create_client(2).unwrap();

    controller.open_device(a, device).unwrap();
    controller.open_device(b, device).unwrap();
    assert_eq!(driver.open_device_calls(888), 1);

    // First close leaves the context alive, second closes the driver.
    controller.close_device(a, device).unwrap();
    assert_eq!(driver.close_device_calls(888), 0);
    controller.close_device(b, device).unwrap();
    assert_eq!(driver.close_device_calls(888), 1);
}

#[test]
fn test_driver_failure_leaves_no_context() {
    let (controller, driver) = controller_with_mock();
    let device = attach(&controller, &driver, 666, "Broken");
    let (client, _rx) = controller.create_client(1).unwrap();

    driver.fail_next_open();
    assert!(controller.open_device(client, device).is_err());

    // The failed open left nothing behind; a healthy retry succeeds.
    controller.open_device(client, device).unwrap();
}

#[test]
fn test_seventeenth_device_rejected() {
    let (controller, driver) = controller_with_mock();
    let (client, _rx) = controller.create_client(1).unwrap();

    let mut devices = Vec::new();
    for n in 0..=MAX_DEVICES_PER_CLIENT as i64 {
        devices.push(attach(&controller, &driver, 2000 + n, &format!("Dev {n}")));
    }
    for device in devices.iter().take(MAX_DEVICES_PER_CLIENT) {
        controller.open_device(client, *device).unwrap();
    }
    assert_eq!(
        controller.open_device(client, devices[MAX_DEVICES_PER_CLIENT]),
        Err(Error::TooManyOpenDevices)
    );

    // Closing one restores headroom.
    controller.close_device(client, devices[0]).unwrap();
    controller
        .open_device(client, devices[MAX_DEVICES_PER_CLIENT])
        .unwrap();
}

#[test]
fn test_sixty_fifth_port_rejected() {
    let (controller, driver) = controller_with_mock();
    let (client, _rx) = controller.create_client(1).unwrap();

    // Nine 16-port hubs: 72 inputs + 72 outputs available.
    let mut devices = Vec::new();
    for n in 0..9 {
        driver.attach_device(many_port_device(3000 + n));
    }
    controller.device_manager().refresh_devices();
    for info in controller.get_devices() {
        controller.open_device(client, info.device_id).unwrap();
        devices.push(info.device_id);
    }

    // 32 inputs then 32 outputs: exactly at the cap.
    let mut opened = 0;
    'outer_in: for device in &devices {
        for port in 0..8 {
            controller.open_input_port(client, *device, port).unwrap();
            opened += 1;
            if opened == 32 {
                break 'outer_in;
            }
        }
    }
    let mut opened_out = 0;
    'outer_out: for device in &devices {
        for port in 8..16 {
            controller.open_output_port(client, *device, port).unwrap();
            opened_out += 1;
            if opened_out == 32 {
                break 'outer_out;
            }
        }
    }
    assert_eq!(opened + opened_out, MAX_PORTS_PER_CLIENT);

    // The 65th attachment fails regardless of direction.
    assert_eq!(
        controller.open_output_port(client, devices[8], 15).err(),
        Some(Error::TooManyOpenPorts)
    );
    assert_eq!(
        controller.open_input_port(client, devices[8], 7).err(),
        Some(Error::TooManyOpenPorts)
    );

    // Closing one frees exactly one slot.
    controller.close_input_port(client, devices[0], 0).unwrap();
    controller.open_output_port(client, devices[8], 15).unwrap();
}

#[test]
fn test_input_port_reopen_is_port_already_open() {
    let (controller, driver) = controller_with_mock();
    let device = attach(&controller, &driver, 555, "Port");
    let (client, _rx) = controller.create_client(1).unwrap();
    controller.open_device(client, device).unwrap();

    controller.open_input_port(client, device, 0).unwrap();
    assert_eq!(
        controller.open_input_port(client, device, 0).err(),
        Some(Error::PortAlreadyOpen)
    );

    // Close then reopen succeeds.
    controller.close_input_port(client, device, 0).unwrap();
    controller.open_input_port(client, device, 0).unwrap();
}

#[test]
fn test_port_requires_open_device() {
    let (controller, driver) = controller_with_mock();
    let device = attach(&controller, &driver, 556, "NoOpen");
    let (client, _rx) = controller.create_client(1).unwrap();

    assert!(controller.open_input_port(client, device, 0).is_err());
    assert_eq!(driver.open_input_port_calls(556, 0), 0);
}

#[test]
fn test_port_direction_mismatch_is_invalid_port() {
    let (controller, driver) = controller_with_mock();
    let device = attach(&controller, &driver, 557, "Dir");
    let (client, _rx) = controller.create_client(1).unwrap();
    controller.open_device(client, device).unwrap();

    // Port 1 is the output port on the mock device.
    assert_eq!(
        controller.open_input_port(client, device, 1).err(),
        Some(Error::InvalidPort)
    );
    assert_eq!(
        controller.open_output_port(client, device, 0).err(),
        Some(Error::InvalidPort)
    );
}

#[test]
fn test_two_clients_share_input_port() {
    let (controller, driver) = controller_with_mock();
    let device = attach(&controller, &driver, 555, "SharedIn");
    let (a, _rx_a) = controller.create_client(1).unwrap();
    let (b, _rx_b) = controller.create_client(2).unwrap();
    controller.open_device(a, device).unwrap();
    controller.open_device(b, device).unwrap();

    let ring_a = controller.open_input_port(a, device, 0).unwrap();
    let ring_b = controller.open_input_port(b, device, 0).unwrap();
    assert_eq!(driver.open_input_port_calls(555, 0), 1);

    let batch = vec![voice(100, 0x2090_3C40)];
    driver.push_input(555, 0, &batch);

    assert_eq!(ring_a.drain_to_batch(0), batch);
    assert_eq!(ring_b.drain_to_batch(0), batch);

    // A's close leaves B subscribed.
    controller.close_input_port(a, device, 0).unwrap();
    assert_eq!(driver.close_input_port_calls(555, 0), 0);
    driver.push_input(555, 0, &batch);
    assert_eq!(ring_b.drain_to_batch(0), batch);
    assert!(ring_a.drain_to_batch(0).is_empty());

    // B's close tears the driver port down exactly once.
    controller.close_input_port(b, device, 0).unwrap();
    assert_eq!(driver.close_input_port_calls(555, 0), 1);
}

#[test]
fn test_input_overflow_counted_without_consumer() {
    let (controller, driver) = controller_with_mock();
    let device = attach(&controller, &driver, 558, "Burst");
    let (client, _rx) = controller.create_client(1).unwrap();
    controller.open_device(client, device).unwrap();
    let ring = controller.open_input_port(client, device, 0).unwrap();

    // 4096-byte ring holds 256 one-word records; everything beyond is
    // dropped and counted.
    let total = 10_000u64;
    for chunk_start in (0..total).step_by(100) {
        let chunk: Vec<UmpEvent> = (chunk_start..(chunk_start + 100).min(total))
            .map(|i| voice(i, i as u32))
            .collect();
        driver.push_input(558, 0, &chunk);
    }

    let drained = ring.drain_to_batch(0);
    assert_eq!(drained.len(), 256);
    assert_eq!(ring.overflow_count(), total - 256);
    assert_eq!(drained[0].words[0], 0);
}

#[test]
fn test_output_port_reaches_driver() {
    let (controller, driver) = controller_with_mock();
    let device = attach(&controller, &driver, 559, "Out");
    let (client, _rx) = controller.create_client(1).unwrap();
    controller.open_device(client, device).unwrap();

    let ring = controller.open_output_port(client, device, 1).unwrap();
    assert_eq!(driver.open_output_port_calls(559, 1), 1);

    let batch: Vec<UmpEvent> = (0..4).map(|i| voice(i, 0x2080_0000 + i as u32)).collect();
    ring.try_write_events(&batch).unwrap();

    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
    loop {
        let sent = driver.ump_output(559, 1);
        if sent.len() == batch.len() {
            assert_eq!(sent, batch);
            break;
        }
        assert!(
            std::time::Instant::now() < deadline,
            "output worker never delivered"
        );
        std::thread::sleep(std::time::Duration::from_millis(1));
    }

    controller.close_output_port(client, device, 1).unwrap();
    assert_eq!(driver.close_output_port_calls(559, 1), 1);
}

#[test]
fn test_close_device_closes_client_ports() {
    let (controller, driver) = controller_with_mock();
    let device = attach(&controller, &driver, 560, "Ports");
    let (client, _rx) = controller.create_client(1).unwrap();
    controller.open_device(client, device).unwrap();
    controller.open_input_port(client, device, 0).unwrap();
    controller.open_output_port(client, device, 1).unwrap();

    controller.close_device(client, device).unwrap();
    assert_eq!(driver.close_input_port_calls(560, 0), 1);
    assert_eq!(driver.close_output_port_calls(560, 1), 1);
    assert_eq!(driver.close_device_calls(560), 1);

    // Round-trip law: everything is reopenable afterwards.
    controller.open_device(client, device).unwrap();
    controller.open_input_port(client, device, 0).unwrap();
}

#[test]
fn test_destroy_client_reclaims_everything() {
    let (controller, driver) = controller_with_mock();
    let device = attach(&controller, &driver, 561, "Reclaim");
    let (client, _rx) = controller.create_client(1).unwrap();
    controller.open_device(client, device).unwrap();
    controller.open_input_port(client, device, 0).unwrap();

    controller.destroy_client(client).unwrap();
    assert_eq!(driver.close_device_calls(561), 1);
    assert_eq!(controller.destroy_client(client), Err(Error::InvalidClient));
}

#[test]
fn test_destroy_client_spares_shared_devices() {
    let (controller, driver) = controller_with_mock();
    let device = attach(&controller, &driver, 562, "Spare");
    let (a, _rx_a) = controller.create_client(1).unwrap();
    let (b, _rx_b) = controller.create_client(2).unwrap();
    controller.open_device(a, device).unwrap();
    controller.open_device(b, device).unwrap();

    controller.destroy_client(a).unwrap();
    assert_eq!(driver.close_device_calls(562), 0);

    // B still owns the device and can use it.
    controller.open_input_port(b, device, 0).unwrap();

    controller.destroy_client(b).unwrap();
    assert_eq!(driver.close_device_calls(562), 1);
}

#[test]
fn test_device_removal_evicts_context_and_notifies() {
    let (controller, driver) = controller_with_mock();
    let device = attach(&controller, &driver, 563, "Gone");
    let (client, rx) = controller.create_client(1).unwrap();
    controller.open_device(client, device).unwrap();

    // Drain the Added notification from attach time, if any arrived
    // after this client registered.
    while rx.try_recv().is_ok() {}

    driver.detach_device(563);
    controller.device_manager().refresh_devices();

    match rx.try_recv() {
        Ok(unison::ClientNotification::DeviceChange { change, device: info }) => {
            assert_eq!(change, unison::DeviceChange::Removed);
            assert_eq!(info.device_id, device);
        }
        other => panic!("expected removal notification, got {other:?}"),
    }

    // The context is gone: closing now reports an invalid handle.
    assert_eq!(
        controller.close_device(client, device),
        Err(Error::InvalidDeviceHandle)
    );
}

#[test]
fn test_flush_discards_pending_output() {
    let (controller, driver) = controller_with_mock();
    let device = attach(&controller, &driver, 564, "Flush");
    let (client, _rx) = controller.create_client(1).unwrap();
    controller.open_device(client, device).unwrap();

    // Stall the worker by not letting it start: flush path only needs
    // the connection, so park events and flush before the worker drains.
    let ring = controller.open_output_port(client, device, 1).unwrap();
    ring.try_write_events(&[voice(1, 0xAA)]).ok();
    controller.flush_output_port(client, device, 1).unwrap();

    assert_eq!(
        controller.flush_output_port(client, device, 2),
        Err(Error::InvalidPort)
    );
}
