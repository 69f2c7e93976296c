use crate::{
    ChunkHeader, ChunkReference, ContentError, ContentManager, ContentObject, ContentSerializer,
    ContentStats, ContentTypeId, LoadSettings, MemoryContentProvider, ReadStream,
    SerializerContext, SerializerRegistry, WriteStream,
};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::io::{Cursor, Read, Write};
use std::sync::{Arc, Mutex};
use type_uuid::TypeUuid;

type ReleaseLog = Arc<Mutex<Vec<String>>>;

/// A typical structured asset: a label payload plus references to other
/// packages, discovered through the chunk's reference table.
#[derive(TypeUuid)]
#[uuid = "d9a8ca31-6bb9-450c-b54e-89c03aaf9d77"]
struct Package {
    label: Mutex<String>,
    children: Mutex<Vec<PackageChild>>,
    releases: ReleaseLog,
}

struct PackageChild {
    url: String,
    object: Option<Arc<dyn ContentObject>>,
}

impl Package {
    fn with_children(
        label: &str,
        children: Vec<PackageChild>,
        releases: &ReleaseLog,
    ) -> Arc<Package> {
        Arc::new(Package {
            label: Mutex::new(label.to_string()),
            children: Mutex::new(children),
            releases: releases.clone(),
        })
    }

    fn label(&self) -> String {
        self.label.lock().unwrap().clone()
    }
}

impl ContentObject for Package {
    fn on_release(&self) {
        self.releases.lock().unwrap().push(self.label());
    }
}

impl std::fmt::Debug for Package {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Package")
            .field("label", &self.label())
            .finish()
    }
}

#[derive(Serialize, Deserialize)]
struct PackagePayload {
    label: String,
}

struct PackageSerializer {
    releases: ReleaseLog,
}

impl ContentSerializer for PackageSerializer {
    fn type_id(&self) -> ContentTypeId {
        ContentTypeId::from_bytes(Package::UUID)
    }

    fn serialization_type(&self) -> Option<&'static str> {
        Some("decant.test.Package")
    }

    fn construct(
        &self,
        _context: &SerializerContext,
    ) -> Arc<dyn ContentObject> {
        Arc::new(Package {
            label: Default::default(),
            children: Default::default(),
            releases: self.releases.clone(),
        })
    }

    fn deserialize(
        &self,
        context: &mut SerializerContext,
        reader: &mut dyn ReadStream,
        object: &Arc<dyn ContentObject>,
    ) -> Result<(), Box<dyn Error + Send + Sync + 'static>> {
        let package = object.downcast_ref::<Package>().unwrap();
        let payload: PackagePayload = bincode::deserialize_from(&mut *reader)?;
        *package.label.lock().unwrap() = payload.label;

        let mut children = Vec::new();
        for index in 0..context.reference_count() {
            let reference = context.reference(index).unwrap().clone();
            children.push(PackageChild {
                url: reference.url,
                object: context.reference_object(index),
            });
        }
        *package.children.lock().unwrap() = children;
        Ok(())
    }

    fn serialize(
        &self,
        context: &mut SerializerContext,
        writer: &mut dyn WriteStream,
        object: &Arc<dyn ContentObject>,
    ) -> Result<(), Box<dyn Error + Send + Sync + 'static>> {
        let package = object.downcast_ref::<Package>().unwrap();
        bincode::serialize_into(
            &mut *writer,
            &PackagePayload {
                label: package.label(),
            },
        )?;
        for child in package.children.lock().unwrap().iter() {
            context.add_reference(
                &child.url,
                ContentTypeId::from_bytes(Package::UUID),
                child.object.clone(),
            );
        }
        Ok(())
    }
}

/// Raw-bytes asset with a headerless chunk (no serialization type).
#[derive(TypeUuid)]
#[uuid = "0a2a0a2e-4f4a-44b6-9bb2-62a875c05db5"]
struct Blob {
    bytes: Mutex<Vec<u8>>,
}

impl ContentObject for Blob {}

impl std::fmt::Debug for Blob {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Blob")
            .field("len", &self.bytes.lock().unwrap().len())
            .finish()
    }
}

struct BlobSerializer;

impl ContentSerializer for BlobSerializer {
    fn type_id(&self) -> ContentTypeId {
        ContentTypeId::from_bytes(Blob::UUID)
    }

    fn construct(
        &self,
        _context: &SerializerContext,
    ) -> Arc<dyn ContentObject> {
        Arc::new(Blob {
            bytes: Default::default(),
        })
    }

    fn deserialize(
        &self,
        _context: &mut SerializerContext,
        reader: &mut dyn ReadStream,
        object: &Arc<dyn ContentObject>,
    ) -> Result<(), Box<dyn Error + Send + Sync + 'static>> {
        let blob = object.downcast_ref::<Blob>().unwrap();
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        *blob.bytes.lock().unwrap() = bytes;
        Ok(())
    }

    fn serialize(
        &self,
        _context: &mut SerializerContext,
        writer: &mut dyn WriteStream,
        object: &Arc<dyn ContentObject>,
    ) -> Result<(), Box<dyn Error + Send + Sync + 'static>> {
        let blob = object.downcast_ref::<Blob>().unwrap();
        writer.write_all(&blob.bytes.lock().unwrap())?;
        Ok(())
    }
}

struct Fixture {
    provider: Arc<MemoryContentProvider>,
    manager: ContentManager,
    releases: ReleaseLog,
}

fn fixture() -> Fixture {
    let _ = env_logger::builder().is_test(true).try_init();

    let provider = Arc::new(MemoryContentProvider::new());
    let releases = ReleaseLog::default();
    let mut serializers = SerializerRegistry::new();
    serializers.register::<Package>(Arc::new(PackageSerializer {
        releases: releases.clone(),
    }));
    serializers.register::<Blob>(Arc::new(BlobSerializer));
    let manager = ContentManager::new(provider.clone(), provider.clone(), serializers);
    Fixture {
        provider,
        manager,
        releases,
    }
}

/// Authors a package chunk the way the manager would write it: header with
/// placeholder offsets, payload, reference table, rewritten header.
fn package_chunk(
    label: &str,
    references: &[&str],
) -> Vec<u8> {
    let mut cursor = Cursor::new(Vec::new());
    let mut header = ChunkHeader::new(Some("decant.test.Package"));
    header.write(&mut cursor).unwrap();

    header.offset_to_object = cursor.position();
    bincode::serialize_into(
        &mut cursor,
        &PackagePayload {
            label: label.to_string(),
        },
    )
    .unwrap();

    header.offset_to_references = Some(cursor.position());
    let table: Vec<ChunkReference> = references
        .iter()
        .map(|url| ChunkReference {
            url: url.to_string(),
            type_id: ContentTypeId::from_bytes(Package::UUID),
        })
        .collect();
    ChunkReference::write_table(&table, &mut cursor).unwrap();

    cursor.set_position(0);
    header.write(&mut cursor).unwrap();
    cursor.into_inner()
}

fn seed_package(
    fixture: &Fixture,
    url: &str,
    label: &str,
    references: &[&str],
) {
    fixture.provider.insert(url, package_chunk(label, references));
}

fn stats_for(
    manager: &ContentManager,
    url: &str,
) -> Option<ContentStats> {
    manager.get_stats().into_iter().find(|stats| stats.url == url)
}

fn released(releases: &ReleaseLog) -> Vec<String> {
    releases.lock().unwrap().clone()
}

#[test]
fn scenario_scene_root_with_two_meshes() {
    let f = fixture();
    seed_package(&f, "scene/mesh_a", "mesh_a", &[]);
    seed_package(&f, "scene/mesh_b", "mesh_b", &[]);
    seed_package(&f, "scene/root", "root", &["scene/mesh_a", "scene/mesh_b"]);

    let root = f
        .manager
        .load::<Package>("scene/root", &LoadSettings::default())
        .unwrap();
    assert_eq!(root.label(), "root");

    let root_stats = stats_for(&f.manager, "scene/root").unwrap();
    assert_eq!(root_stats.public_count, 1);
    assert_eq!(root_stats.private_count, 0);
    for mesh in ["scene/mesh_a", "scene/mesh_b"] {
        let stats = stats_for(&f.manager, mesh).unwrap();
        assert_eq!(stats.public_count, 0);
        assert_eq!(stats.private_count, 1);
    }

    f.manager.unload_url("scene/root").unwrap();

    assert!(f.manager.get_stats().is_empty());
    assert!(f.manager.get::<Package>("scene/root").is_none());
    let mut names = released(&f.releases);
    names.sort();
    assert_eq!(names, vec!["mesh_a", "mesh_b", "root"]);
}

#[test]
fn balanced_loads_and_unloads_empty_the_graph() {
    let f = fixture();
    seed_package(&f, "things/one", "one", &[]);

    let first = f
        .manager
        .load::<Package>("things/one", &LoadSettings::default())
        .unwrap();
    let second = f
        .manager
        .load::<Package>("things/one", &LoadSettings::default())
        .unwrap();
    assert!(Arc::ptr_eq(&first, &second));

    let stats = stats_for(&f.manager, "things/one").unwrap();
    assert_eq!(stats.public_count, 2);
    assert_eq!(f.manager.get_stats().len(), 1);

    f.manager.unload(&first).unwrap();
    assert!(f.manager.is_loaded("things/one", false));

    f.manager.unload(&second).unwrap();
    assert!(!f.manager.is_loaded("things/one", false));
    assert!(f.manager.get_stats().is_empty());
    assert!(f.manager.get::<Package>("things/one").is_none());
}

#[test]
fn unloading_a_chain_root_cascades_to_the_leaves() {
    let f = fixture();
    seed_package(&f, "chain/c", "c", &[]);
    seed_package(&f, "chain/b", "b", &["chain/c"]);
    seed_package(&f, "chain/a", "a", &["chain/b"]);

    let a = f
        .manager
        .load::<Package>("chain/a", &LoadSettings::default())
        .unwrap();
    assert_eq!(f.manager.get_stats().len(), 3);

    f.manager.unload(&a).unwrap();

    assert!(f.manager.get_stats().is_empty());
    let mut names = released(&f.releases);
    names.sort();
    assert_eq!(names, vec!["a", "b", "c"]);
}

#[test]
fn unreferenced_cycle_is_collected() {
    let f = fixture();
    seed_package(&f, "cycle/a", "a", &["cycle/b"]);
    seed_package(&f, "cycle/b", "b", &["cycle/a"]);

    let a = f
        .manager
        .load::<Package>("cycle/a", &LoadSettings::default())
        .unwrap();

    // Each cycle member is privately pinned by the other
    let a_stats = stats_for(&f.manager, "cycle/a").unwrap();
    assert_eq!(a_stats.public_count, 1);
    assert_eq!(a_stats.private_count, 1);
    let b_stats = stats_for(&f.manager, "cycle/b").unwrap();
    assert_eq!(b_stats.private_count, 1);

    // Counting alone would keep both alive forever; dropping the only public
    // root runs the collector
    f.manager.unload(&a).unwrap();

    assert!(f.manager.get_stats().is_empty());
    let mut names = released(&f.releases);
    names.sort();
    assert_eq!(names, vec!["a", "b"]);
}

#[test]
fn cycle_survives_while_a_public_root_holds_it() {
    let f = fixture();
    seed_package(&f, "held/a", "held_a", &["held/b"]);
    seed_package(&f, "held/b", "held_b", &["held/a"]);
    seed_package(&f, "loose/c", "loose_c", &["loose/d"]);
    seed_package(&f, "loose/d", "loose_d", &["loose/c"]);

    let a = f
        .manager
        .load::<Package>("held/a", &LoadSettings::default())
        .unwrap();
    let c = f
        .manager
        .load::<Package>("loose/c", &LoadSettings::default())
        .unwrap();

    // Collecting the loose cycle must not touch the held one
    f.manager.unload(&c).unwrap();

    let mut names = released(&f.releases);
    names.sort();
    assert_eq!(names, vec!["loose_c", "loose_d"]);
    assert!(f.manager.is_loaded("held/a", true));
    assert!(f.manager.is_loaded("held/b", false));

    f.manager.unload(&a).unwrap();

    assert!(f.manager.get_stats().is_empty());
    let mut names = released(&f.releases);
    names.sort();
    assert_eq!(names, vec!["held_a", "held_b", "loose_c", "loose_d"]);
}

#[test]
fn self_referencing_content_loads_and_collects() {
    let f = fixture();
    seed_package(&f, "cycle/self", "selfish", &["cycle/self"]);

    let object = f
        .manager
        .load::<Package>("cycle/self", &LoadSettings::default())
        .unwrap();

    // The reference table pointed back at the object mid-construction, so the
    // serializer saw the (then partially built) shell itself
    let children = object.children.lock().unwrap();
    let self_child = children[0].object.as_ref().unwrap().clone();
    drop(children);
    assert!(Arc::ptr_eq(
        &object,
        &self_child.downcast_arc::<Package>().ok().unwrap()
    ));

    let stats = stats_for(&f.manager, "cycle/self").unwrap();
    assert_eq!(stats.public_count, 1);
    assert_eq!(stats.private_count, 1);

    f.manager.unload(&object).unwrap();
    assert!(f.manager.get_stats().is_empty());
    assert_eq!(released(&f.releases), vec!["selfish"]);
}

#[test]
fn second_unload_for_one_load_is_unbalanced() {
    let f = fixture();
    seed_package(&f, "tree/child", "child", &[]);
    seed_package(&f, "tree/root", "tree_root", &["tree/child"]);

    let _root = f
        .manager
        .load::<Package>("tree/root", &LoadSettings::default())
        .unwrap();
    let child = f
        .manager
        .load::<Package>("tree/child", &LoadSettings::default())
        .unwrap();

    // First unload balances the explicit load; the parent still pins the
    // child privately
    f.manager.unload(&child).unwrap();
    assert!(f.manager.is_loaded("tree/child", false));

    // Second unload has no public reference left to release
    let error = f.manager.unload(&child).unwrap_err();
    assert!(matches!(error, ContentError::UnbalancedReference { .. }));
}

#[test]
fn unload_of_untracked_content_is_an_error() {
    let f = fixture();
    let stray = Package::with_children("stray", Vec::new(), &f.releases);

    assert!(matches!(
        f.manager.unload(&stray).unwrap_err(),
        ContentError::NotLoadedByThisManager
    ));
    assert!(matches!(
        f.manager.unload_url("never/loaded").unwrap_err(),
        ContentError::NotLoadedByThisManager
    ));
}

#[test]
fn reload_with_unchanged_content_keeps_child_identity() {
    let f = fixture();
    seed_package(&f, "reload/child", "reload_child", &[]);
    seed_package(&f, "reload/root", "reload_root", &["reload/child"]);

    let root = f
        .manager
        .load::<Package>("reload/root", &LoadSettings::default())
        .unwrap();
    let child_before = f.manager.get::<Package>("reload/child").unwrap();

    assert!(f.manager.reload(&root, &LoadSettings::default()).unwrap());

    let child_after = f.manager.get::<Package>("reload/child").unwrap();
    assert!(Arc::ptr_eq(&child_before, &child_after));
    let stats = stats_for(&f.manager, "reload/child").unwrap();
    assert_eq!(stats.private_count, 1);
    assert!(released(&f.releases).is_empty());
}

#[test]
fn reload_releases_references_dropped_by_new_content() {
    let f = fixture();
    seed_package(&f, "reload/keep", "keep", &[]);
    seed_package(&f, "reload/drop", "drop", &[]);
    seed_package(&f, "reload/top", "top", &["reload/keep", "reload/drop"]);

    let top = f
        .manager
        .load::<Package>("reload/top", &LoadSettings::default())
        .unwrap();
    assert_eq!(f.manager.get_stats().len(), 3);

    // New content keeps one reference and drops the other
    seed_package(&f, "reload/top", "top", &["reload/keep"]);
    assert!(f.manager.reload(&top, &LoadSettings::default()).unwrap());

    assert_eq!(released(&f.releases), vec!["drop"]);
    assert!(stats_for(&f.manager, "reload/drop").is_none());
    let keep_stats = stats_for(&f.manager, "reload/keep").unwrap();
    assert_eq!(keep_stats.private_count, 1);
    let top_stats = stats_for(&f.manager, "reload/top").unwrap();
    assert_eq!(top_stats.public_count, 1);

    // The reloaded object itself kept its identity and sees the new payload
    assert_eq!(top.label(), "top");
    assert_eq!(top.children.lock().unwrap().len(), 1);
}

#[test]
fn reload_of_untracked_object_returns_false() {
    let f = fixture();
    let stray = Package::with_children("stray", Vec::new(), &f.releases);
    assert!(!f.manager.reload(&stray, &LoadSettings::default()).unwrap());
}

#[test]
fn missing_root_is_content_not_found() {
    let f = fixture();
    let error = f
        .manager
        .load::<Package>("missing/root", &LoadSettings::default())
        .unwrap_err();
    assert!(matches!(error, ContentError::ContentNotFound(url) if url == "missing/root"));
}

#[test]
fn missing_child_is_skipped_not_fatal() {
    let f = fixture();
    seed_package(&f, "partial/root", "partial_root", &["partial/missing"]);

    let root = f
        .manager
        .load::<Package>("partial/root", &LoadSettings::default())
        .unwrap();
    assert_eq!(root.label(), "partial_root");
    assert_eq!(f.manager.get_stats().len(), 1);
}

#[test]
fn corrupt_payload_is_wrapped_and_node_is_not_kept() {
    let f = fixture();

    // Valid header, garbage payload
    let mut data = Cursor::new(Vec::new());
    let mut header = ChunkHeader::new(Some("decant.test.Package"));
    header.write(&mut data).unwrap();
    header.offset_to_object = data.position();
    data.set_position(0);
    header.write(&mut data).unwrap();
    f.provider.insert("corrupt/chunk", data.into_inner());

    let error = f
        .manager
        .load::<Package>("corrupt/chunk", &LoadSettings::default())
        .unwrap_err();
    match error {
        ContentError::LoadFailed { url, cause } => {
            assert_eq!(url, "corrupt/chunk");
            assert!(!cause.to_string().is_empty());
        }
        other => panic!("expected LoadFailed, got {:?}", other),
    }

    // The failed shell must not be reusable
    assert!(f.manager.get_stats().is_empty());
    assert!(f.manager.get::<Package>("corrupt/chunk").is_none());
}

#[test]
fn unregistered_type_is_serializer_not_found() {
    let _ = env_logger::builder().is_test(true).try_init();

    let provider = Arc::new(MemoryContentProvider::new());
    let releases = ReleaseLog::default();
    let mut serializers = SerializerRegistry::new();
    serializers.register::<Package>(Arc::new(PackageSerializer {
        releases: releases.clone(),
    }));
    let manager = ContentManager::new(provider.clone(), provider.clone(), serializers);

    provider.insert("raw/blob", b"raw bytes".to_vec());
    let error = manager
        .load::<Blob>("raw/blob", &LoadSettings::default())
        .unwrap_err();
    assert!(matches!(error, ContentError::SerializerNotFound { .. }));
}

#[test]
fn content_filter_prunes_reference_walk() {
    let f = fixture();
    seed_package(&f, "filter/keep", "keep", &[]);
    seed_package(&f, "filter/skip", "skip", &[]);
    seed_package(&f, "filter/root", "filter_root", &["filter/keep", "filter/skip"]);

    let settings = LoadSettings {
        load_content_references: true,
        content_filter: Some(Arc::new(|reference: &ChunkReference| {
            !reference.url.ends_with("skip")
        })),
    };
    f.manager.load::<Package>("filter/root", &settings).unwrap();

    assert!(stats_for(&f.manager, "filter/keep").is_some());
    assert!(stats_for(&f.manager, "filter/skip").is_none());
}

#[test]
fn reference_walk_can_be_disabled() {
    let f = fixture();
    seed_package(&f, "shallow/child", "child", &[]);
    seed_package(&f, "shallow/root", "shallow_root", &["shallow/child"]);

    let settings = LoadSettings {
        load_content_references: false,
        content_filter: None,
    };
    f.manager.load::<Package>("shallow/root", &settings).unwrap();

    assert_eq!(f.manager.get_stats().len(), 1);
    assert!(stats_for(&f.manager, "shallow/child").is_none());
}

#[test]
fn save_writes_the_reference_closure() {
    let f = fixture();
    let leaf_a = Package::with_children("saved_a", Vec::new(), &f.releases);
    let leaf_b = Package::with_children("saved_b", Vec::new(), &f.releases);
    let root = Package::with_children(
        "saved_root",
        vec![
            PackageChild {
                url: "saved/a".to_string(),
                object: Some(leaf_a.clone()),
            },
            PackageChild {
                url: "saved/b".to_string(),
                object: Some(leaf_b.clone()),
            },
        ],
        &f.releases,
    );

    f.manager.save("saved/root", &root).unwrap();

    assert!(f.provider.contains("saved/root"));
    assert!(f.provider.contains("saved/a"));
    assert!(f.provider.contains("saved/b"));
    assert!(f.manager.is_loaded("saved/root", true));
    assert!(f.manager.is_loaded("saved/a", false));
    assert!(!f.manager.is_loaded("saved/a", true));

    // Saving a tracked object again is a no-op
    f.manager.save("saved/elsewhere", &root).unwrap();
    assert!(!f.provider.contains("saved/elsewhere"));

    // A fresh manager round-trips what was written
    let g = fixture();
    for url in ["saved/root", "saved/a", "saved/b"] {
        g.provider.insert(url, f.provider.data(url).unwrap());
    }
    let loaded = g
        .manager
        .load::<Package>("saved/root", &LoadSettings::default())
        .unwrap();
    assert_eq!(loaded.label(), "saved_root");
    let children = loaded.children.lock().unwrap();
    assert_eq!(children.len(), 2);
    assert_eq!(children[0].url, "saved/a");
    drop(children);
    assert_eq!(
        g.manager.get::<Package>("saved/a").unwrap().label(),
        "saved_a"
    );
}

#[test]
fn headerless_blob_round_trips() {
    let f = fixture();
    f.provider.insert("raw/in", b"just some bytes".to_vec());

    let blob = f
        .manager
        .load::<Blob>("raw/in", &LoadSettings::default())
        .unwrap();
    assert_eq!(&*blob.bytes.lock().unwrap(), b"just some bytes");

    // A serializer without a serialization type writes a bare payload
    let out = Arc::new(Blob {
        bytes: Mutex::new(b"written back".to_vec()),
    });
    f.manager.save("raw/out", &out).unwrap();
    assert_eq!(f.provider.data("raw/out").unwrap(), b"written back");
}

#[test]
fn get_does_not_touch_reference_counts() {
    let f = fixture();
    seed_package(&f, "probe/thing", "thing", &[]);

    let loaded = f
        .manager
        .load::<Package>("probe/thing", &LoadSettings::default())
        .unwrap();
    let probed = f.manager.get::<Package>("probe/thing").unwrap();
    assert!(Arc::ptr_eq(&loaded, &probed));

    let stats = stats_for(&f.manager, "probe/thing").unwrap();
    assert_eq!(stats.public_count, 1);

    assert!(f.manager.get::<Package>("probe/other").is_none());
}

#[test]
fn exists_probes_the_index_only() {
    let f = fixture();
    seed_package(&f, "exists/thing", "thing", &[]);

    assert!(f.manager.exists("exists/thing"));
    assert!(!f.manager.exists("exists/other"));
    assert!(f.manager.get_stats().is_empty());
}

#[test]
fn url_of_reports_the_load_url() {
    let f = fixture();
    seed_package(&f, "where/thing", "thing", &[]);

    let loaded = f
        .manager
        .load::<Package>("where/thing", &LoadSettings::default())
        .unwrap();
    assert_eq!(f.manager.url_of(&loaded).unwrap(), "where/thing");

    let stray = Package::with_children("stray", Vec::new(), &f.releases);
    assert!(f.manager.url_of(&stray).is_none());
}

#[test]
fn async_load_returns_the_shared_instance() {
    let f = fixture();
    seed_package(&f, "async/thing", "thing", &[]);

    let pending = f
        .manager
        .load_async::<Package>("async/thing", LoadSettings::default());
    let loaded = pending.wait().unwrap();

    let probed = f.manager.get::<Package>("async/thing").unwrap();
    assert!(Arc::ptr_eq(&loaded, &probed));

    f.manager.unload(&loaded).unwrap();
    assert!(f.manager.get_stats().is_empty());
}

#[test]
fn async_save_writes_the_chunk() {
    let f = fixture();
    let object = Package::with_children("async_saved", Vec::new(), &f.releases);

    f.manager.save_async("async/saved", &object).wait().unwrap();
    assert!(f.provider.contains("async/saved"));
}

#[test]
fn cycle_partner_back_reference_resolves_identity() {
    let f = fixture();
    seed_package(&f, "pair/a", "pair_a", &["pair/b"]);
    seed_package(&f, "pair/b", "pair_b", &["pair/a"]);

    let a = f
        .manager
        .load::<Package>("pair/a", &LoadSettings::default())
        .unwrap();
    let b = f.manager.get::<Package>("pair/b").unwrap();

    // b's table entry for a was pre-resolved to the already-loaded instance
    let b_children = b.children.lock().unwrap();
    let back_reference = b_children[0].object.as_ref().unwrap().clone();
    drop(b_children);
    assert!(Arc::ptr_eq(
        &a,
        &back_reference.downcast_arc::<Package>().ok().unwrap()
    ));

    f.manager.unload(&a).unwrap();
    assert!(f.manager.get_stats().is_empty());
}
