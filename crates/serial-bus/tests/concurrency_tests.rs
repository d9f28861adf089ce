//! Concurrency tests for the binding registry
//!
//! Covers:
//! - Probe/remove of distinct ports from many threads
//! - Deregistration racing a probe that is still inside attach
//! - The bound flag and the endpoint table never disagreeing afterwards

use rand::seq::SliceRandom;
use serial_bus::{BusError, Driver, Port, SerialBus, TtyTable};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

const PORTS: u32 = 64;
const ROUNDS: usize = 20;

fn setup() -> (SerialBus, Arc<TtyTable>) {
    let table = Arc::new(TtyTable::default());
    (SerialBus::new("mxusbserial", table.clone()), table)
}

#[test]
fn test_parallel_probe_and_remove_of_distinct_ports() {
    let (bus, table) = setup();
    let attaches = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&attaches);
    let driver = Arc::new(Driver::new("MOXA UPort").with_attach(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }));
    bus.register(Arc::clone(&driver)).unwrap();

    let mut ports: Vec<Arc<Port>> = (0..PORTS)
        .map(|n| Arc::new(Port::new(n, driver.id())))
        .collect();
    ports.shuffle(&mut rand::rng());

    thread::scope(|s| {
        for chunk in ports.chunks(8) {
            let bus = &bus;
            s.spawn(move || {
                for _ in 0..ROUNDS {
                    for port in chunk {
                        bus.probe(port).unwrap();
                    }
                    for port in chunk {
                        bus.remove(port).unwrap();
                    }
                }
                for port in chunk {
                    bus.probe(port).unwrap();
                }
            });
        }
    });

    assert_eq!(
        attaches.load(Ordering::SeqCst),
        PORTS as usize * (ROUNDS + 1)
    );
    assert_eq!(table.len(), PORTS as usize);
    assert_eq!(bus.bound_ports(driver.id()).len(), PORTS as usize);
    assert!(ports.iter().all(|p| p.is_bound()));
    assert_eq!(driver.owner().holds(), 0);
}

#[test]
fn test_deregister_while_attach_in_flight() {
    let (bus, table) = setup();
    let entered = Arc::new(Barrier::new(2));
    let release = Arc::new(Barrier::new(2));
    let detaches = Arc::new(AtomicUsize::new(0));

    let (in_attach, hold_attach, counter) = (
        Arc::clone(&entered),
        Arc::clone(&release),
        Arc::clone(&detaches),
    );
    let driver = Arc::new(
        Driver::new("MOXA UPort")
            .with_attach(move |_| {
                in_attach.wait();
                hold_attach.wait();
                Ok(())
            })
            .with_detach(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
    );
    bus.register(Arc::clone(&driver)).unwrap();
    let port = Arc::new(Port::new(3, driver.id()));

    thread::scope(|s| {
        let probing = s.spawn(|| bus.probe(&port));

        entered.wait();
        bus.deregister(driver.id()).unwrap();
        release.wait();

        assert_eq!(probing.join().unwrap(), Err(BusError::NotFound(driver.id())));
    });

    assert!(!port.is_bound());
    assert!(!table.is_published(3));
    assert_eq!(detaches.load(Ordering::SeqCst), 1);
    assert_eq!(driver.owner().holds(), 0);
}

#[test]
fn test_deregister_racing_probes_never_orphans_ports() {
    let (bus, table) = setup();
    let driver = Arc::new(Driver::new("MOXA UPort").with_attach(|_| {
        thread::yield_now();
        Ok(())
    }));
    bus.register(Arc::clone(&driver)).unwrap();

    let ports: Vec<Arc<Port>> = (0..PORTS)
        .map(|n| Arc::new(Port::new(n, driver.id())))
        .collect();

    let deregistered = thread::scope(|s| {
        for chunk in ports.chunks(16) {
            let bus = &bus;
            s.spawn(move || {
                for port in chunk {
                    match bus.probe(port) {
                        Ok(()) => {
                            bus.remove(port).unwrap();
                        }
                        Err(e) => assert_eq!(e, BusError::NotFound(port.owner())),
                    }
                }
            });
        }

        let bus = &bus;
        let id = driver.id();
        s.spawn(move || {
            loop {
                match bus.deregister(id) {
                    Ok(_) => return true,
                    Err(BusError::HasBoundPorts { .. }) => thread::yield_now(),
                    Err(e) => panic!("unexpected deregister error: {e}"),
                }
            }
        })
        .join()
        .unwrap()
    });

    assert!(deregistered);
    assert!(!bus.is_registered(driver.id()));
    assert!(ports.iter().all(|p| !p.is_bound()));
    assert!(table.is_empty());
}
