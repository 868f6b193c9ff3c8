use std::fs;

use orch_assets::{Asset, AssetCollection, DirectoryOptions, FilterMode};
use orch_core::errors::ErrorKind;
use proptest::prelude::*;

fn content(name: &str, rel: &str, body: &str) -> Asset {
    Asset::from_content(name, rel, body.as_bytes().to_vec()).expect("asset")
}

#[test]
fn identical_assets_collapse() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let path = dir.path().join("input.txt");
    fs::write(&path, b"hello").expect("write");

    let mut collection = AssetCollection::new();
    assert!(collection.add(Asset::from_path(&path, "").expect("asset")).expect("add"));
    assert!(!collection.add(content("input.txt", "", "hello")).expect("add again"));
    assert_eq!(collection.len(), 1);
}

#[test]
fn conflicting_content_is_rejected() {
    let mut collection = AssetCollection::new();
    collection.add(content("input.txt", "data", "one")).expect("add");
    let err = collection
        .add(content("input.txt", "./data/", "two"))
        .expect_err("conflict");
    assert_eq!(err.kind(), ErrorKind::DuplicateAssetConflict);
    assert_eq!(err.info().context.get("path").map(String::as_str), Some("data/input.txt"));

    collection
        .add_or_replace(content("input.txt", "data", "two"))
        .expect("replace");
    let stored = collection.get_one("input.txt", "data").expect("present");
    assert_eq!(&*stored.bytes().expect("bytes"), b"two");
}

#[test]
fn frozen_collection_refuses_mutation() {
    let mut collection = AssetCollection::from_assets([content("a", "", "1")]).expect("collection");
    collection.set_id("ac-1").expect("id");
    collection.freeze();

    let err = collection.add(content("b", "", "2")).expect_err("frozen");
    assert_eq!(err.kind(), ErrorKind::FrozenCollection);
    assert!(collection.remove("a", "").is_err());
    assert!(collection.set_id("ac-2").is_err());
    assert!(collection.set_id("ac-1").is_ok());

    let mut copy = AssetCollection::copy_of(&collection);
    assert!(copy.id().is_none());
    assert!(copy.add(content("b", "", "2")).expect("add to copy"));
}

#[test]
fn invalid_locations_are_rejected() {
    assert!(Asset::from_content("a/b", "", b"x".to_vec()).is_err());
    assert!(Asset::from_content("a", "../up", b"x".to_vec()).is_err());
    let asset = Asset::from_content("a", "/lead//x/./y/", b"x".to_vec()).expect("asset");
    assert_eq!(asset.relative_path(), "lead/x/y");
    assert_eq!(asset.job_path(), "lead/x/y/a");
}

#[test]
fn directory_walk_honours_filters() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let root = dir.path();
    fs::create_dir_all(root.join("sub/deep")).expect("mkdir");
    fs::write(root.join("a.txt"), b"a").expect("write");
    fs::write(root.join("b.csv"), b"b").expect("write");
    fs::write(root.join("sub/c.txt"), b"c").expect("write");
    fs::write(root.join("sub/deep/d.txt"), b"d").expect("write");

    let shallow = AssetCollection::from_directory(root, &DirectoryOptions::shallow()).expect("walk");
    assert_eq!(shallow.len(), 2);
    let everything = AssetCollection::from_directory(root, &DirectoryOptions::default()).expect("walk");
    assert_eq!(everything.len(), 4);
    assert!(everything.get_one("d.txt", "sub/deep").is_some());

    let txt = AssetCollection::from_directory(
        root,
        &DirectoryOptions::recursive().include("**/*.txt").with_prefix("inputs"),
    )
    .expect("walk");
    let mut paths: Vec<String> = txt.iter().map(Asset::job_path).collect();
    paths.sort();
    assert_eq!(
        paths,
        vec!["inputs/a.txt", "inputs/sub/c.txt", "inputs/sub/deep/d.txt"]
    );

    let and_mode = AssetCollection::from_directory(
        root,
        &DirectoryOptions::recursive()
            .include("**/*.txt")
            .filter(|asset| asset.relative_path().is_empty())
            .mode(FilterMode::And),
    )
    .expect("walk");
    assert_eq!(and_mode.len(), 1);

    let or_mode = AssetCollection::from_directory(
        root,
        &DirectoryOptions::recursive()
            .filter(|asset| asset.filename() == "b.csv")
            .filter(|asset| asset.filename() == "d.txt")
            .exclude("sub/deep/**"),
    )
    .expect("walk");
    assert_eq!(or_mode.len(), 1);
}

#[test]
fn flattened_walk_detects_collisions() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let root = dir.path();
    fs::create_dir_all(root.join("x")).expect("mkdir");
    fs::write(root.join("same.txt"), b"one").expect("write");
    fs::write(root.join("x/same.txt"), b"two").expect("write");

    let mut options = DirectoryOptions::recursive();
    options.flatten = true;
    let err = AssetCollection::from_directory(root, &options).expect_err("collision");
    assert_eq!(err.kind(), ErrorKind::DuplicateAssetConflict);
}

#[test]
fn sidecar_and_sizes() {
    let asset = content("model.bin", "bin", "hello");
    let sidecar = asset.md5_sidecar().expect("sidecar");
    assert_eq!(sidecar.filename(), "model.bin.md5");
    assert_eq!(&*sidecar.bytes().expect("bytes"), b"5d41402abc4b2a76b9719d911017c592");

    let mut collection = AssetCollection::new();
    collection.add(asset.clone()).expect("add");
    collection.add(sidecar).expect("add");
    assert_eq!(collection.total_size().expect("size"), 5 + 32);
    assert!(collection.has_asset(&asset));
    assert_eq!(collection.find_by_filename("model.bin").count(), 1);
}

proptest! {
    #[test]
    fn no_two_assets_share_a_slot(entries in prop::collection::vec((0u8..4, 0u8..3, 0u8..3), 0..40)) {
        let mut collection = AssetCollection::new();
        for (name, dir, body) in entries {
            let asset = content(&format!("f{name}"), &format!("d{dir}"), &format!("{body}"));
            let _ = collection.add(asset);
        }
        let assets = collection.assets();
        for (i, left) in assets.iter().enumerate() {
            for right in &assets[i + 1..] {
                prop_assert!(!left.same_location(right));
            }
        }
    }
}
