//! Tests for identifier types

use std::collections::HashSet;

use resource_runtime::core::RuntimeError;
use resource_runtime::util::{ResourceKey, ResourcePath, TaskToken, TEMPORARY_ROOT};

#[test]
fn test_resource_key_parse_and_display() {
    let key = ResourceKey::random();
    let parsed: ResourceKey = key.to_string().parse().unwrap();
    assert_eq!(parsed, key);

    assert!(matches!(
        "not-a-key".parse::<ResourceKey>(),
        Err(RuntimeError::InvalidKey(_))
    ));
}

#[test]
fn test_resource_keys_are_unique() {
    let keys: HashSet<_> = (0..1_000).map(|_| ResourceKey::random()).collect();
    assert_eq!(keys.len(), 1_000);
}

#[test]
fn test_path_children_and_prefixes() {
    let root = ResourcePath::parse("game").unwrap();
    let lobby = root.child("lobby").unwrap();

    assert_eq!(lobby.to_string(), "game/lobby");
    assert!(root.is_prefix_of(&lobby));
    assert!(lobby.is_prefix_of(&lobby));
    assert!(!lobby.is_prefix_of(&root));
    assert!(root.child("").is_err());
    assert!(root.child("a/b").is_err());
}

#[test]
fn test_temporary_namespace() {
    let path = ResourcePath::temporary();
    assert!(path.is_temporary());
    assert_eq!(path.components()[0], TEMPORARY_ROOT);
    assert!(!ResourcePath::parse("game/lobby").unwrap().is_temporary());
}

#[test]
fn test_path_serde_validates() {
    let path: ResourcePath = serde_json::from_str(r#""a/b/c""#).unwrap();
    assert_eq!(path.components(), ["a", "b", "c"]);
    assert_eq!(serde_json::to_string(&path).unwrap(), r#""a/b/c""#);

    assert!(serde_json::from_str::<ResourcePath>(r#""a/*""#).is_err());
}

#[test]
fn test_task_token_identity() {
    let owner = ResourceKey::random();
    let token = TaskToken::new(owner, 3);

    assert_eq!(token.owner(), owner);
    assert_eq!(token.serial(), 3);
    assert_ne!(token, TaskToken::new(owner, 4));
    assert_eq!(token.to_string(), format!("{owner}+3"));
}
