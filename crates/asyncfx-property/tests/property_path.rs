//! Property paths across object graphs that are replaced while observed.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::time::Duration;

use asyncfx_dispatch::Dispatcher;
use asyncfx_property::{
    ListEndpoint, ListProperty, ObjectProperty, ObservableList, Property, PropertyMetadata, PropertyPath,
    property_object,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("asyncfx_property=debug")
        .try_init();
}

struct Second {
    value: Property<bool>,
    list: ListProperty<i32>,
}
property_object!(Second { value, list });

impl Second {
    fn with_items(items: Vec<i32>) -> Arc<Self> {
        Arc::new(Self {
            value: Property::default(),
            list: ListProperty::with_items(items),
        })
    }
}

struct First {
    second: ObjectProperty<Second>,
}
property_object!(First { second });

impl First {
    fn with_items(items: Vec<i32>) -> Arc<Self> {
        Arc::new(Self {
            second: ObjectProperty::with_value(Second::with_items(items)),
        })
    }
}

fn root() -> ObjectProperty<First> {
    ObjectProperty::new(PropertyMetadata::builder().name("root").root(true).build())
}

#[test]
fn endpoint_listener_sees_leaf_changes() {
    init_tracing();
    let root = root();
    root.set(Some(First::with_items(Vec::new()))).unwrap();
    let end = PropertyPath::from_root(&root)
        .select(|f: &First| f.second.clone())
        .select_value(|s: &Second| s.value.clone());

    let count = Arc::new(AtomicUsize::new(0));
    let _sub = {
        let count = Arc::clone(&count);
        end.add_change_listener(move |_, _| {
            count.fetch_add(1, Ordering::SeqCst);
        })
    };
    assert_eq!(count.load(Ordering::SeqCst), 0);

    let leaf = root.get().unwrap().second.get().unwrap();
    leaf.value.set(true).unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert!(end.get());
}

#[test]
fn platform_property_bound_to_a_path_updates_on_platform() {
    init_tracing();
    let platform = Dispatcher::platform();
    let root = root();
    root.set(Some(First::with_items(Vec::new()))).unwrap();
    let end = PropertyPath::from_root(&root)
        .select(|f: &First| f.second.clone())
        .select_value(|s: &Second| s.value.clone());

    let target: Property<bool> = Property::new(PropertyMetadata::builder().dispatcher(platform.clone()).build());
    target.bind(&end).unwrap();

    let (tx, rx) = mpsc::channel();
    let _sub = target.add_change_listener(move |_, new| {
        let _ = tx.send((*new, Dispatcher::platform().is_current()));
    });

    root.get().unwrap().second.get().unwrap().value.set(true).unwrap();
    let (value, on_platform) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert!(value);
    assert!(on_platform);
}

#[test]
fn unresolved_endpoint_ignores_writes_and_metadata() {
    init_tracing();
    let root = root();
    let end = PropertyPath::from_root(&root)
        .select(|f: &First| f.second.clone())
        .select_value(|s: &Second| s.value.clone());

    assert!(!end.is_resolved());
    end.set(true).unwrap();
    end.override_metadata(&PropertyMetadata::builder().name("renamed").build());
    assert!(!end.get());
    assert!(end.metadata().name().is_none());

    root.set(Some(First::with_items(Vec::new()))).unwrap();
    assert!(end.is_resolved());
    assert!(!end.get());
}

#[test]
fn bidirectional_peer_follows_each_leaf() {
    init_tracing();
    let root = root();
    let end = PropertyPath::from_root(&root)
        .select(|f: &First| f.second.clone())
        .select_value(|s: &Second| s.value.clone());
    let peer = Property::with_value(false);
    end.bind_bidirectional(&peer).unwrap();

    let first = First::with_items(Vec::new());
    first.second.get().unwrap().value.set(true).unwrap();
    root.set(Some(Arc::clone(&first))).unwrap();
    assert!(peer.get());

    peer.set(false).unwrap();
    assert!(!first.second.get().unwrap().value.get());

    end.unbind_bidirectional(&peer);
    peer.set(true).unwrap();
    assert!(!first.second.get().unwrap().value.get());
}

#[test]
fn derived_counts_follow_path_resolution() {
    init_tracing();
    let root = root();
    let end = PropertyPath::from_root(&root)
        .select(|f: &First| f.second.clone())
        .select_list(|s: &Second| s.list.clone());

    let size = Property::<usize>::default();
    let empty = Property::<bool>::default();
    size.bind(&end.size_property()).unwrap();
    empty.bind(&end.empty_property()).unwrap();
    assert_eq!(size.get(), 0);
    assert!(empty.get());

    root.set(Some(First::with_items(vec![0, 1]))).unwrap();
    assert_eq!(size.get(), 2);
    assert!(!empty.get());

    end.add(2).unwrap();
    assert_eq!(size.get(), 3);

    root.set(None).unwrap();
    assert_eq!(size.get(), 0);
    assert!(empty.get());
}

#[test]
fn list_endpoint_content_binding_waits_for_resolution() {
    init_tracing();
    let source = ListProperty::with_items(vec![1, 2, 3]);
    let root = root();
    let end = PropertyPath::from_root(&root)
        .select(|f: &First| f.second.clone())
        .select_list(|s: &Second| s.list.clone());
    end.bind_content(&source).unwrap();
    assert_eq!(end.len(), 0);

    root.set(Some(First::with_items(Vec::new()))).unwrap();
    assert_eq!(end.to_vec(), vec![1, 2, 3]);

    source.add(4).unwrap();
    assert_eq!(end.len(), 4);
}

#[test]
fn list_property_content_bound_to_a_path() {
    init_tracing();
    let target = ListProperty::new(
        PropertyMetadata::builder()
            .initial_value(Some(ObservableList::<String>::new()))
            .build(),
    );
    let root: ObjectProperty<Holder> = ObjectProperty::default();
    let path = PropertyPath::from_root(&root).select_list(|h: &Holder| h.strings.clone());
    target.bind_content(&path).unwrap();

    let holder = Arc::new(Holder {
        strings: ListProperty::with_items(Vec::new()),
    });
    holder.strings.add("String 1".to_owned()).unwrap();
    holder.strings.add("String 2".to_owned()).unwrap();
    assert_eq!(target.len(), 0);

    root.set(Some(holder)).unwrap();
    assert_eq!(target.len(), 2);
}

struct Holder {
    strings: ListProperty<String>,
}
property_object!(Holder { strings });

fn list_end(root: &ObjectProperty<First>) -> ListEndpoint<i32> {
    PropertyPath::from_root(root)
        .select(|f: &First| f.second.clone())
        .select_list(|s: &Second| s.list.clone())
}

fn leaf_list(root: &ObjectProperty<First>) -> ListProperty<i32> {
    root.get().unwrap().second.get().unwrap().list.clone()
}

#[test]
fn unresolved_list_endpoint_drops_writes() {
    init_tracing();
    let root = root();
    let end = list_end(&root);

    assert!(end.get().is_none());
    end.set(Some(ObservableList::from_vec(vec![9]))).unwrap();
    end.add(1).unwrap();
    end.override_metadata(&PropertyMetadata::builder().name("renamed").build());
    assert!(end.metadata().name().is_none());

    root.set(Some(First::with_items(vec![1]))).unwrap();
    assert_eq!(end.to_vec(), vec![1]);
    assert!(leaf_list(&root).metadata().name().is_none());
}

#[test]
fn resolved_list_endpoint_writes_through_to_the_leaf() {
    init_tracing();
    let root = root();
    let end = list_end(&root);
    root.set(Some(First::with_items(vec![1]))).unwrap();

    let replacement = ObservableList::from_vec(vec![4, 5]);
    end.set(Some(replacement.clone())).unwrap();
    assert!(end.get().unwrap().ptr_eq(&replacement));
    assert_eq!(leaf_list(&root).to_vec(), vec![4, 5]);

    end.override_metadata(&PropertyMetadata::builder().name("renamed").build());
    assert_eq!(end.metadata().name(), Some("renamed"));
    assert_eq!(leaf_list(&root).metadata().name(), Some("renamed"));
}

#[test]
fn list_endpoint_binding_follows_each_leaf() {
    init_tracing();
    let source = ListProperty::with_items(vec![7]);
    let root = root();
    let end = list_end(&root);
    end.bind(source.property()).unwrap();
    assert!(end.is_bound());

    root.set(Some(First::with_items(vec![1]))).unwrap();
    let first = leaf_list(&root);
    assert!(first.is_bound());
    assert_eq!(end.to_vec(), vec![7]);

    root.set(Some(First::with_items(vec![2]))).unwrap();
    let second = leaf_list(&root);
    assert!(!first.is_bound());
    assert!(second.is_bound());
    assert!(second.get().unwrap().ptr_eq(&source.get().unwrap()));

    end.unbind();
    assert!(!end.is_bound());
    assert!(!second.is_bound());
    assert_eq!(second.to_vec(), vec![7]);
}

#[test]
fn list_endpoint_bidirectional_peer_follows_each_leaf() {
    init_tracing();
    let root = root();
    let end = list_end(&root);
    let peer = ListProperty::with_items(vec![3]);
    end.bind_bidirectional(peer.property()).unwrap();
    assert_eq!(peer.to_vec(), vec![3]);

    root.set(Some(First::with_items(vec![1]))).unwrap();
    assert_eq!(peer.to_vec(), vec![1]);

    peer.set(Some(ObservableList::from_vec(vec![8]))).unwrap();
    assert_eq!(end.to_vec(), vec![8]);

    end.unbind_bidirectional(peer.property());
    peer.set(Some(ObservableList::from_vec(vec![0]))).unwrap();
    assert_eq!(end.to_vec(), vec![8]);
}

#[test]
fn resolved_list_leaf_adopts_the_bidirectional_peer() {
    init_tracing();
    let root = root();
    root.set(Some(First::with_items(vec![1]))).unwrap();
    let end = list_end(&root);
    let peer = ListProperty::with_items(vec![5, 6]);
    end.bind_bidirectional(peer.property()).unwrap();
    assert_eq!(end.to_vec(), vec![5, 6]);
    assert!(end.get().unwrap().ptr_eq(&peer.get().unwrap()));
}

#[test]
fn concurrent_resolutions_settle_on_the_last_graph() {
    const WRITERS: usize = 4;
    const ROUNDS: usize = 200;

    init_tracing();
    let root = root();
    let end = PropertyPath::from_root(&root)
        .select(|f: &First| f.second.clone())
        .select_value(|s: &Second| s.value.clone());

    let writers: Vec<_> = (0..WRITERS)
        .map(|_| {
            let root = root.clone();
            std::thread::spawn(move || {
                for _ in 0..ROUNDS {
                    root.set(Some(First::with_items(Vec::new()))).unwrap();
                }
            })
        })
        .collect();
    for writer in writers {
        writer.join().unwrap();
    }

    let last = root.get().unwrap().second.get().unwrap();
    last.value.set(true).unwrap();
    assert!(end.get());
    assert!(matches!(end.resolution().leaf(), Some(leaf) if leaf.ptr_eq(&last.value)));
}
