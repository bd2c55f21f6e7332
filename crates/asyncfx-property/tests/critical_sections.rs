//! Consistency groups under concurrent writers and readers.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;

use asyncfx_property::{
    ConsistencyGroup, CriticalSection, Property, PropertyError, PropertyMetadata, critical,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("asyncfx_property=debug")
        .try_init();
}

fn grouped(name: &str, group: &ConsistencyGroup) -> Property<i64> {
    Property::new(
        PropertyMetadata::builder()
            .name(name)
            .initial_value(0)
            .consistency_group(group)
            .build(),
    )
}

#[test]
fn readers_never_observe_half_written_groups() {
    init_tracing();
    let group = ConsistencyGroup::new("coordinates");
    let lat = grouped("lat", &group);
    let lon = grouped("lon", &group);
    let done = Arc::new(AtomicBool::new(false));

    let writer = {
        let (lat, lon, done) = (lat.clone(), lon.clone(), Arc::clone(&done));
        thread::spawn(move || {
            for i in 1..=2_000 {
                critical::lock(&[&lat, &lon], || {
                    lat.set(i)?;
                    lon.set(-i)?;
                    Ok::<_, PropertyError>(())
                })
                .unwrap();
            }
            done.store(true, Ordering::Release);
        })
    };

    let readers: Vec<_> = (0..3)
        .map(|_| {
            let (lat, lon, done) = (lat.clone(), lon.clone(), Arc::clone(&done));
            thread::spawn(move || {
                while !done.load(Ordering::Acquire) {
                    let (a, b) = critical::lock(&[&lat, &lon], || {
                        Ok::<_, PropertyError>((lat.try_get()?, lon.try_get()?))
                    })
                    .unwrap();
                    assert_eq!(a, -b, "observed a torn update");
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }

    let _section = CriticalSection::enter(&[&group]).unwrap();
    assert_eq!(lat.get(), 2_000);
    assert_eq!(lon.get(), -2_000);
}

#[test]
fn writes_reverted_inside_a_section_do_not_notify() {
    init_tracing();
    let group = ConsistencyGroup::new("idempotent");
    let value = grouped("value", &group);
    let changes = Arc::new(AtomicUsize::new(0));
    let _sub = {
        let changes = Arc::clone(&changes);
        value.add_change_listener(move |_, _| {
            changes.fetch_add(1, Ordering::Relaxed);
        })
    };

    critical::lock(&[&value], || {
        value.set(5)?;
        value.set(7)?;
        value.set(0)?;
        Ok::<_, PropertyError>(())
    })
    .unwrap();
    assert_eq!(changes.load(Ordering::Relaxed), 0);

    critical::lock(&[&value], || {
        value.set(1)?;
        value.set(2)?;
        Ok::<_, PropertyError>(())
    })
    .unwrap();
    assert_eq!(changes.load(Ordering::Relaxed), 1);
}

#[test]
fn listeners_wait_for_the_outermost_section_to_close() {
    init_tracing();
    let group = ConsistencyGroup::new("deferred");
    let value = grouped("value", &group);
    let (changes, invalidations) = (Arc::new(AtomicUsize::new(0)), Arc::new(AtomicUsize::new(0)));
    let _changed = {
        let changes = Arc::clone(&changes);
        value.add_change_listener(move |_, _| {
            changes.fetch_add(1, Ordering::SeqCst);
        })
    };
    let _invalidated = {
        let invalidations = Arc::clone(&invalidations);
        value.add_invalidation_listener(move || {
            invalidations.fetch_add(1, Ordering::SeqCst);
        })
    };
    let counts = || (changes.load(Ordering::SeqCst), invalidations.load(Ordering::SeqCst));

    critical::lock(&[&value], || {
        value.set(1)?;
        assert_eq!(counts(), (0, 0));
        critical::lock(&[&value], || value.set(2))?;
        assert_eq!(counts(), (0, 0));
        assert_eq!(value.try_get()?, 2);
        Ok::<_, PropertyError>(())
    })
    .unwrap();
    assert_eq!(counts(), (1, 1));
}

#[test]
fn listeners_see_every_group_member_updated() {
    init_tracing();
    let group = ConsistencyGroup::new("pair");
    let first = grouped("first", &group);
    let second = grouped("second", &group);
    let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let _sub = {
        let (second, seen) = (second.clone(), Arc::clone(&seen));
        first.add_change_listener(move |_, new| {
            let other = critical::lock(&[&second], || second.try_get()).unwrap();
            seen.lock().push((*new, other));
        })
    };

    critical::lock(&[&first, &second], || {
        first.set(3)?;
        second.set(4)?;
        Ok::<_, PropertyError>(())
    })
    .unwrap();
    assert_eq!(*seen.lock(), vec![(3, 4)]);
}

#[test]
fn nested_sections_cannot_widen_the_lock_set() {
    init_tracing();
    let a = Property::with_value(1_i64);
    let b = Property::with_value(2_i64);

    let _outer = CriticalSection::enter(&[&a]).unwrap();
    let _same = CriticalSection::enter(&[&a]).unwrap();
    let err = CriticalSection::enter(&[&a, &b]).unwrap_err();
    assert!(matches!(err, PropertyError::SectionExtension { .. }));
    assert!(CriticalSection::is_active());
}

#[test]
fn grouped_properties_require_a_section() {
    init_tracing();
    let group = ConsistencyGroup::new("strict");
    let value = grouped("strict-value", &group);

    assert!(matches!(
        value.try_get(),
        Err(PropertyError::OutsideCriticalSection { .. })
    ));
    assert!(matches!(
        value.set(1),
        Err(PropertyError::OutsideCriticalSection { .. })
    ));
    assert_eq!(value.get_uncritical(), 0);
}

#[test]
fn contended_increments_are_not_lost() {
    init_tracing();
    let counter = Property::with_value(0_i64);
    let threads: Vec<_> = (0..8)
        .map(|_| {
            let counter = counter.clone();
            thread::spawn(move || {
                for _ in 0..250 {
                    critical::lock(&[&counter], || {
                        let current = counter.try_get()?;
                        counter.set(current + 1)
                    })
                    .unwrap();
                }
            })
        })
        .collect();
    for handle in threads {
        handle.join().unwrap();
    }
    assert_eq!(counter.get(), 2_000);
}
