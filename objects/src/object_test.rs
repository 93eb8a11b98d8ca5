use std::collections::HashMap;
use std::time::Duration;

use serde_json::{Map, Value, json};

use super::*;
use crate::schema::ObjectLookup;

struct MapLookup {
    objects: HashMap<String, DomainObject>,
}

impl MapLookup {
    fn new(objects: Vec<DomainObject>) -> Self {
        Self { objects: objects.into_iter().map(|o| (o.id.clone(), o)).collect() }
    }
}

impl ObjectLookup for MapLookup {
    fn object(&self, id: &str) -> Option<&DomainObject> {
        self.objects.get(id)
    }

    fn object_ids(&self) -> Vec<String> {
        self.objects.keys().cloned().collect()
    }
}

fn obj_with_links(id: &str, links: &[&str]) -> DomainObject {
    let mut obj = DomainObject::new(id, "GeneralObject");
    obj.data.insert("link".to_string(), json!(links));
    obj
}

#[test]
fn new_seeds_identity_into_data() {
    let obj = DomainObject::new("42", "Rectangle");
    assert_eq!(obj.id, "42");
    assert_eq!(obj.type_tag, "Rectangle");
    assert_eq!(obj.raw("id"), json!("42"));
    assert_eq!(obj.raw("type"), json!("Rectangle"));
}

#[test]
fn from_data_normalizes_numeric_id() {
    let mut data = Map::new();
    data.insert("id".to_string(), json!(7));
    data.insert("type".to_string(), json!("Ellipse"));
    data.insert("inRoom".to_string(), json!("public"));
    let obj = DomainObject::from_data(data);

    assert_eq!(obj.id, "7");
    assert_eq!(obj.type_tag, "Ellipse");
    assert_eq!(obj.room_id().as_deref(), Some("public"));
}

#[test]
fn from_data_without_type_is_unknown() {
    let mut data = Map::new();
    data.insert("id".to_string(), json!("9"));
    let obj = DomainObject::from_data(data);
    assert_eq!(obj.type_tag, "UnknownObject");
    assert_eq!(obj.room_id(), None);
}

#[test]
fn move_lease_expires() {
    let mut obj = DomainObject::new("1", "GeneralObject");
    assert!(!obj.is_moving());

    obj.begin_move(Duration::from_secs(60));
    assert!(obj.is_moving());
    obj.end_move();
    assert!(!obj.is_moving());

    obj.begin_move(Duration::ZERO);
    assert!(!obj.is_moving());
}

#[test]
fn locked_gates_move_and_resize() {
    let mut obj = DomainObject::new("1", "GeneralObject");
    assert!(obj.may_move());
    assert!(obj.may_resize());

    obj.data.insert("locked".to_string(), json!(true));
    assert!(!obj.may_move());
    assert!(!obj.may_resize());
}

#[test]
fn link_ids_tolerates_scalar_values() {
    let mut obj = DomainObject::new("1", "GeneralObject");
    assert!(obj.link_ids().is_empty());

    obj.data.insert("link".to_string(), json!(["2", 3]));
    assert_eq!(obj.link_ids(), vec!["2".to_string(), "3".to_string()]);

    obj.data.insert("link".to_string(), json!("4"));
    assert_eq!(obj.link_ids(), vec!["4".to_string()]);
}

#[test]
fn linked_objects_sees_both_directions() {
    let a = obj_with_links("a", &["b"]);
    let c = obj_with_links("c", &["a"]);
    let lookup = MapLookup::new(vec![a.clone(), obj_with_links("b", &[]), c]);

    let linked = a.linked_objects(&lookup);
    assert_eq!(linked.len(), 2);
    assert!(linked.contains(&LinkedObject { id: "b".to_string(), direction: LinkDirection::Out }));
    assert!(linked.contains(&LinkedObject { id: "c".to_string(), direction: LinkDirection::In }));
}

#[test]
fn duplicate_closure_is_transitive() {
    let a = obj_with_links("a", &["b"]);
    let b = obj_with_links("b", &["c"]);
    let lookup =
        MapLookup::new(vec![a.clone(), b, obj_with_links("c", &[]), obj_with_links("d", &[])]);

    let mut closure = a.objects_to_duplicate(&lookup);
    closure.sort();
    assert_eq!(closure, vec!["a".to_string(), "b".to_string(), "c".to_string()]);
}

#[test]
fn update_link_ids_translates_known_targets() {
    let mut obj = obj_with_links("a", &["b", "x"]);
    let translation: HashMap<String, String> = [("b".to_string(), "b2".to_string())].into();
    obj.update_link_ids(&translation);
    assert_eq!(obj.link_ids(), vec!["b2".to_string(), "x".to_string()]);
}

#[test]
fn group_zero_means_ungrouped() {
    let mut a = DomainObject::new("a", "GeneralObject");
    let mut b = DomainObject::new("b", "GeneralObject");
    assert!(!a.in_same_group(&b));

    a.data.insert("group".to_string(), json!(7));
    b.data.insert("group".to_string(), json!("7"));
    assert!(a.in_same_group(&b));

    b.data.insert("group".to_string(), json!(8));
    assert!(!a.in_same_group(&b));
}

#[test]
fn truthy_covers_replicated_representations() {
    assert!(truthy(&json!(true)));
    assert!(truthy(&json!(1)));
    assert!(truthy(&json!("yes")));
    assert!(!truthy(&json!(false)));
    assert!(!truthy(&json!(0)));
    assert!(!truthy(&json!("false")));
    assert!(!truthy(&json!("")));
    assert!(!truthy(&Value::Null));
}
