//! Type registry: behavior tables and attribute schemas per object type.
//!
//! ARCHITECTURE
//! ============
//! Every type is a flat `(AttributeSchema, TypeBehavior)` entry instead of a
//! chain of prototypes. `register_base_attributes` installs the shared
//! attribute set on each schema at registration time, and type-specific
//! registrations merge over it. Resolution never fails: an unknown tag falls
//! back to `UnknownObject`, then `GeneralObject`.

use std::collections::HashMap;

use serde_json::Value;

use crate::object::{DomainObject, truthy};
use crate::schema::{AttrKind, AttributeSchema, AttributeSpec, ObjectLookup};

// =============================================================================
// BEHAVIOR
// =============================================================================

/// Per-type rendering and editing behavior.
#[derive(Debug, Clone, Default)]
pub struct TypeBehavior {
    /// Has an on-canvas representation.
    pub graphical: bool,
    /// Sorts above every normal-layer object.
    pub always_on_top: bool,
    /// First refresh after a remote build is debounced (content-bearing
    /// text types whose content frame arrives separately).
    pub defer_refresh: bool,
    /// Duplicating this type also duplicates its link closure.
    pub duplicate_linked_objects: bool,
    /// Offered in creation menus.
    pub creatable: bool,
}

/// Visibility predicate over the current selection.
pub type ActionVisibility = fn(&dyn ObjectLookup, &[String]) -> bool;

/// One entry in an object's action menu.
#[derive(Clone)]
pub struct ActionSpec {
    pub name: &'static str,
    /// Applies per object rather than once per selection.
    pub single: bool,
    pub visibility: Option<ActionVisibility>,
}

impl std::fmt::Debug for ActionSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionSpec")
            .field("name", &self.name)
            .field("single", &self.single)
            .finish_non_exhaustive()
    }
}

#[derive(Clone)]
pub struct TypeEntry {
    pub tag: String,
    pub schema: AttributeSchema,
    pub behavior: TypeBehavior,
    pub actions: Vec<ActionSpec>,
}

// =============================================================================
// REGISTRY
// =============================================================================

pub struct TypeRegistry {
    types: HashMap<String, TypeEntry>,
}

impl TypeRegistry {
    /// A registry with the built-in types installed.
    #[must_use]
    pub fn new() -> Self {
        let mut registry = Self { types: HashMap::new() };
        registry.install_builtin_types();
        registry
    }

    /// Register a type. The schema arrives with the base attribute set
    /// already installed; callers merge their own registrations over it.
    pub fn register(&mut self, tag: &str, behavior: TypeBehavior) {
        let mut schema = AttributeSchema::new(tag);
        register_base_attributes(&mut schema);
        let actions = standard_actions();
        self.types
            .insert(tag.to_string(), TypeEntry { tag: tag.to_string(), schema, behavior, actions });
    }

    /// Mutable schema access for type-specific attribute registrations.
    pub fn schema_mut(&mut self, tag: &str) -> Option<&mut AttributeSchema> {
        self.types.get_mut(tag).map(|entry| &mut entry.schema)
    }

    /// Resolve a tag to its entry, falling back along
    /// `UnknownObject` then `GeneralObject`. Never fails.
    #[must_use]
    pub fn resolve(&self, tag: &str) -> &TypeEntry {
        self.types
            .get(tag)
            .or_else(|| self.types.get("UnknownObject"))
            .or_else(|| self.types.get("GeneralObject"))
            .expect("GeneralObject is always registered")
    }

    #[must_use]
    pub fn schema(&self, tag: &str) -> &AttributeSchema {
        &self.resolve(tag).schema
    }

    #[must_use]
    pub fn behavior(&self, tag: &str) -> &TypeBehavior {
        &self.resolve(tag).behavior
    }

    #[must_use]
    pub fn actions(&self, tag: &str) -> &[ActionSpec] {
        &self.resolve(tag).actions
    }

    /// Tags offered in creation menus.
    #[must_use]
    pub fn creatable_tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = self
            .types
            .values()
            .filter(|entry| entry.behavior.creatable)
            .map(|entry| entry.tag.clone())
            .collect();
        tags.sort();
        tags
    }

    fn install_builtin_types(&mut self) {
        self.register(
            "GeneralObject",
            TypeBehavior { graphical: true, ..TypeBehavior::default() },
        );
        self.register(
            "UnknownObject",
            TypeBehavior { graphical: true, ..TypeBehavior::default() },
        );
        self.register("Room", TypeBehavior::default());
        if let Some(schema) = self.schema_mut("Room") {
            // Rooms can display the paintings of the users present in them.
            schema.register(
                "showUserPaintings",
                AttributeSpec::new().kind(AttrKind::Boolean).standard(false),
            );
        }

        self.register(
            "Rectangle",
            TypeBehavior { graphical: true, creatable: true, ..TypeBehavior::default() },
        );
        self.register(
            "Ellipse",
            TypeBehavior { graphical: true, creatable: true, ..TypeBehavior::default() },
        );

        // Content-bearing text types: content arrives in its own frame, so
        // the first remote refresh is deferred.
        self.register(
            "SimpleText",
            TypeBehavior {
                graphical: true,
                creatable: true,
                defer_refresh: true,
                ..TypeBehavior::default()
            },
        );
        self.register(
            "Textarea",
            TypeBehavior {
                graphical: true,
                creatable: true,
                defer_refresh: true,
                duplicate_linked_objects: true,
                ..TypeBehavior::default()
            },
        );
        for tag in ["SimpleText", "Textarea"] {
            if let Some(schema) = self.schema_mut(tag) {
                schema.register(
                    "fontsize",
                    AttributeSpec::new().kind(AttrKind::FontSize).min(6).max(200).standard(14),
                );
            }
        }
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// BASE ATTRIBUTES
// =============================================================================

/// Install the attribute set shared by every type.
pub fn register_base_attributes(schema: &mut AttributeSchema) {
    schema.register(
        "id",
        AttributeSpec::new().kind(AttrKind::Number).readonly().hidden(),
    );
    schema.register("type", AttributeSpec::new().readonly().hidden());
    schema.register("name", AttributeSpec::new().standard(""));
    schema.register(
        "hasContent",
        AttributeSpec::new().kind(AttrKind::Boolean).hidden().standard(false),
    );
    schema.register(
        "layer",
        AttributeSpec::new().kind(AttrKind::Layer).hidden().min(-1_000_000).max(1_000_000),
    );
    schema.register(
        "x",
        AttributeSpec::new().kind(AttrKind::Number).unit("px").min(0).category("Position"),
    );
    schema.register(
        "y",
        AttributeSpec::new().kind(AttrKind::Number).unit("px").min(0).category("Position"),
    );
    schema.register(
        "width",
        AttributeSpec::new()
            .kind(AttrKind::Number)
            .unit("px")
            .min(5)
            .standard(100)
            .category("Dimensions"),
    );
    schema.register(
        "height",
        AttributeSpec::new()
            .kind(AttrKind::Number)
            .unit("px")
            .min(5)
            .standard(100)
            .category("Dimensions"),
    );
    schema.register(
        "fillcolor",
        AttributeSpec::new().kind(AttrKind::Color).standard("#FFFFFF").category("Appearance"),
    );
    schema.register(
        "linecolor",
        AttributeSpec::new().kind(AttrKind::Color).standard("#000000").category("Appearance"),
    );
    schema.register(
        "linesize",
        AttributeSpec::new()
            .kind(AttrKind::Number)
            .unit("px")
            .min(1)
            .standard(1)
            .category("Appearance"),
    );
    schema.register(
        "locked",
        AttributeSpec::new().kind(AttrKind::Boolean).standard(false),
    );
    schema.register(
        "visible",
        AttributeSpec::new()
            .kind(AttrKind::Boolean)
            .standard(true)
            .check(check_visible),
    );
    schema.register(
        "link",
        AttributeSpec::new()
            .kind(AttrKind::ObjectId)
            .multiple()
            .hidden()
            .standard(Value::Array(Vec::new())),
    );
    schema.register(
        "group",
        AttributeSpec::new().kind(AttrKind::Group).hidden().standard(0),
    );
    schema.register("inRoom", AttributeSpec::new().hidden().standard(""));
}

/// An object may only be hidden while at least one object it is linked
/// with stays visible, and an object with no links at all cannot be hidden.
/// Otherwise a hidden object or cluster becomes unreachable from the
/// canvas.
fn check_visible(
    object: &DomainObject,
    value: &Value,
    lookup: &dyn ObjectLookup,
) -> Result<(), String> {
    if truthy(value) {
        return Ok(());
    }
    let linked = object.linked_objects(lookup);
    let any_visible = linked.iter().any(|link| {
        lookup
            .object(&link.id)
            .is_none_or(|other| match other.data.get("visible") {
                Some(v) => truthy(v),
                None => true,
            })
    });
    if any_visible {
        Ok(())
    } else {
        Err("at least one linked object must stay visible".to_string())
    }
}

// =============================================================================
// ACTIONS
// =============================================================================

fn standard_actions() -> Vec<ActionSpec> {
    vec![
        ActionSpec { name: "Delete", single: false, visibility: None },
        ActionSpec { name: "Duplicate", single: false, visibility: None },
        ActionSpec { name: "Link", single: false, visibility: Some(link_visible) },
        ActionSpec { name: "Group", single: false, visibility: Some(group_visible) },
        ActionSpec { name: "Ungroup", single: false, visibility: Some(ungroup_visible) },
        ActionSpec { name: "ToFront", single: true, visibility: None },
        ActionSpec { name: "ToBack", single: true, visibility: None },
    ]
}

fn link_visible(_lookup: &dyn ObjectLookup, selected: &[String]) -> bool {
    selected.len() > 1
}

/// Grouping needs at least two objects that are not already all members of
/// one group.
fn group_visible(lookup: &dyn ObjectLookup, selected: &[String]) -> bool {
    if selected.len() < 2 {
        return false;
    }
    let groups: Vec<i64> = selected
        .iter()
        .filter_map(|id| lookup.object(id))
        .map(DomainObject::group)
        .collect();
    let first = groups.first().copied().unwrap_or(0);
    first == 0 || groups.iter().any(|g| *g != first)
}

fn ungroup_visible(lookup: &dyn ObjectLookup, selected: &[String]) -> bool {
    selected
        .iter()
        .filter_map(|id| lookup.object(id))
        .any(|obj| obj.group() != 0)
}

#[cfg(test)]
#[path = "registry_test.rs"]
mod tests;
