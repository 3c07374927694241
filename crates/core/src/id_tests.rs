// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use std::borrow::Borrow;
use std::collections::HashMap;

crate::define_id! {
    /// Test ID type for macro verification.
    pub struct TestId;
}

#[test]
fn define_id_new_and_as_str() {
    let id = TestId::new("abc");
    assert_eq!(id.as_str(), "abc");
}

#[test]
fn define_id_display() {
    let id = TestId::new("hello");
    assert_eq!(id.to_string(), "hello");
}

#[test]
fn define_id_from_string_and_str() {
    let owned: TestId = String::from("owned").into();
    let borrowed: TestId = "borrowed".into();
    assert_eq!(owned.as_str(), "owned");
    assert_eq!(borrowed.as_str(), "borrowed");
}

#[test]
fn define_id_partial_eq_str() {
    let id = TestId::new("test");
    assert_eq!(id, *"test");
    assert_eq!(id, "test");
}

#[test]
fn define_id_hash_map_lookup() {
    let mut map = HashMap::new();
    map.insert(TestId::new("k"), 42);
    assert_eq!(map.get("k"), Some(&42));
}

#[test]
fn define_id_borrow_str() {
    let id = TestId::new("key");
    let borrowed: &str = id.borrow();
    assert_eq!(borrowed, "key");
}

#[test]
fn define_id_serde_roundtrip() {
    let id = LabId::new("lab-42");
    let json = serde_json::to_string(&id).unwrap();
    assert_eq!(json, "\"lab-42\"");
    let back: LabId = serde_json::from_str(&json).unwrap();
    assert_eq!(back, id);
}

#[test]
fn short_truncates() {
    let id = NodeId::new("abcdefghij");
    assert_eq!(id.short(4), "abcd");
    assert_eq!(id.short(100), "abcdefghij");
}

#[test]
fn short_id_trait_on_str() {
    assert_eq!("hello".short(3), "hel");
    assert_eq!("hi".short(3), "hi");
}
