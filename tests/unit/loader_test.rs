//! Tests for the factory loader and in-memory registry

use std::time::Duration;

use resource_runtime::core::{
    ErrorCallback, Resource, ResourceLoader, ResourceRegistry, ResultCallback, RtResult,
    RuntimeError,
};
use resource_runtime::infra::{FactoryLoader, InMemoryResourceRegistry};
use resource_runtime::util::{Attributes, ResourceKey, ResourcePath, TaskToken, Value};
use serde_json::json;

struct Named {
    key: ResourceKey,
    name: String,
}

impl Resource for Named {
    fn key(&self) -> ResourceKey {
        self.key
    }

    fn invoke(
        &mut self,
        _method: &str,
        _args: Vec<Value>,
        on_result: ResultCallback,
        _on_error: ErrorCallback,
    ) -> RtResult<TaskToken> {
        on_result(json!(self.name));
        Ok(TaskToken::new(self.key, 0))
    }

    fn resume_from_network(&mut self, token: TaskToken, _value: Value) -> RtResult<()> {
        Err(RuntimeError::UnknownTask(token))
    }

    fn resume_with_error(&mut self, token: TaskToken, _error: RuntimeError) -> RtResult<()> {
        Err(RuntimeError::UnknownTask(token))
    }

    fn resume_from_timer(&mut self, token: TaskToken, _elapsed: Duration) -> RtResult<()> {
        Err(RuntimeError::UnknownTask(token))
    }
}

fn named_loader() -> FactoryLoader {
    FactoryLoader::new().with_module("named", |key, attributes, _args| {
        let name = attributes
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| RuntimeError::operation("name attribute required"))?
            .to_owned();
        let resource: Box<dyn Resource> = Box::new(Named { key, name });
        Ok(resource)
    })
}

fn attributes(name: &str) -> Attributes {
    let mut attributes = Attributes::new();
    attributes.insert("name".into(), json!(name));
    attributes
}

#[test]
fn test_loader_passes_attributes() {
    let loader = named_loader();
    assert!(loader.contains("named"));

    let mut resource = loader.load("named", &attributes("alpha"), vec![]).unwrap();
    let (tx, rx) = std::sync::mpsc::channel();
    resource
        .invoke(
            "name",
            vec![],
            Box::new(move |value| tx.send(value).unwrap()),
            Box::new(|_err| {}),
        )
        .unwrap();
    assert_eq!(rx.try_recv().ok(), Some(json!("alpha")));
}

#[test]
fn test_loader_reports_constructor_and_lookup_errors() {
    let loader = named_loader();
    assert_eq!(
        loader.load("named", &Attributes::new(), vec![]).err(),
        Some(RuntimeError::operation("name attribute required"))
    );
    assert_eq!(
        loader.load("other", &Attributes::new(), vec![]).err(),
        Some(RuntimeError::ModuleNotFound("other".into()))
    );

    assert!(loader.unregister("named"));
    assert!(!loader.unregister("named"));
    assert!(!loader.contains("named"));
}

#[test]
fn test_loader_rejects_resource_with_foreign_key() {
    let loader = FactoryLoader::new().with_module("liar", |_key, _attributes, _args| {
        let resource: Box<dyn Resource> = Box::new(Named {
            key: ResourceKey::random(),
            name: "liar".into(),
        });
        Ok(resource)
    });
    assert!(matches!(
        loader.load("liar", &Attributes::new(), vec![]),
        Err(RuntimeError::Operation(_))
    ));
}

#[test]
fn test_registry_links_and_unlinks_paths() {
    let loader = named_loader();
    let registry = InMemoryResourceRegistry::new();
    let primary = ResourcePath::parse("users/alice").unwrap();
    let alias = ResourcePath::parse("admins/alice").unwrap();

    let resource = loader.load("named", &attributes("alice"), vec![]).unwrap();
    let key = registry.add(&primary, resource).unwrap();
    registry.link_path(key, &alias).unwrap();

    assert_eq!(registry.key_at(&alias), Some(key));
    assert_eq!(registry.paths_of(key), vec![alias.clone(), primary.clone()]);

    let pinned = registry.get_and_lock_by_path(&alias).unwrap();
    assert_eq!(pinned.key(), key);
    assert_eq!(registry.acquired_count(key), 1);
    registry.release(pinned);
    assert_eq!(registry.acquired_count(key), 0);

    // Dropping one of two paths keeps the resource.
    registry.unlink_path(&primary).unwrap();
    assert!(registry.contains(key));

    // Dropping the last one destroys it.
    registry.unlink_path(&alias).unwrap();
    assert!(!registry.contains(key));
    assert!(matches!(
        registry.unlink_path(&alias),
        Err(RuntimeError::ResourceNotFound(_))
    ));
}

#[test]
fn test_registry_add_and_lock_pins_new_resource() {
    let loader = named_loader();
    let registry = InMemoryResourceRegistry::new();
    let path = ResourcePath::parse("pinned").unwrap();

    let resource = loader.load("named", &attributes("p"), vec![]).unwrap();
    let pinned = registry.add_and_lock(&path, resource).unwrap();
    assert_eq!(registry.total_acquired(), 1);

    registry.destroy(pinned.key()).unwrap();
    assert!(pinned.is_closed());
    assert!(matches!(
        pinned.with(|_resource| ()),
        Err(RuntimeError::ResourceNotFound(_))
    ));
    registry.release(pinned);
    assert_eq!(registry.total_acquired(), 0);
    assert!(registry.is_empty());
}
