//! Attribute schemas — registration, coercion, and the set/get pipeline.
//!
//! DESIGN
//! ======
//! Each object type carries one [`AttributeSchema`]. Attributes must be
//! registered before they can be set; unregistered writes fail closed while
//! unregistered reads pass the raw data value through (legacy data fields).
//! Registering the same name twice merges the new partial spec over the old
//! one, so subtypes can incrementally augment inherited attributes.
//!
//! The identity check in [`AttributeSchema::set`] runs on the *raw* incoming
//! value, before coercion. Two raw values that would coerce to the same final
//! value (`"5"` vs `5`) are treated as different writes. That avoids paying
//! the coercion cost on every no-op and is accepted behavior, not a defect.

use std::collections::HashMap;

use serde_json::Value;
use tracing::warn;

use crate::object::DomainObject;

// =============================================================================
// KINDS AND HOOKS
// =============================================================================

/// Attribute value kind. `Number` and `FontSize` values are parsed as
/// integers and clamped to the registered `[min, max]` range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AttrKind {
    #[default]
    Text,
    Number,
    FontSize,
    Color,
    Boolean,
    ObjectId,
    Layer,
    Group,
}

impl AttrKind {
    #[must_use]
    pub fn is_numeric(self) -> bool {
        matches!(self, AttrKind::Number | AttrKind::FontSize)
    }
}

/// Read access to the other objects of a room, for validation hooks that
/// depend on neighbors (the visibility/link invariant).
pub trait ObjectLookup {
    fn object(&self, id: &str) -> Option<&DomainObject>;

    fn object_ids(&self) -> Vec<String>;
}

/// Lookup over no objects at all. For contexts without room state.
pub struct EmptyLookup;

impl ObjectLookup for EmptyLookup {
    fn object(&self, _id: &str) -> Option<&DomainObject> {
        None
    }

    fn object_ids(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Derived-storage write hook. Receives the coerced value.
pub type SetterHook = fn(&mut DomainObject, &str, Value);

/// Derived-storage read hook. `None` falls through to the standard value.
pub type GetterHook = fn(&DomainObject, &str) -> Option<Value>;

/// Change callback, fired after a successful set and on remote updates.
/// The `bool` is `true` for locally originated changes.
pub type ChangedHook = fn(&DomainObject, &Value, bool);

/// Validation hook. Runs before the write; an `Err` rejects the set with a
/// user-visible message.
pub type CheckHook = fn(&DomainObject, &Value, &dyn ObjectLookup) -> Result<(), String>;

// =============================================================================
// SPECS
// =============================================================================

/// Partial attribute spec. Unset fields fall back to any previously
/// registered value for the same name, then to the defaults.
#[derive(Clone, Default)]
pub struct AttributeSpec {
    pub kind: Option<AttrKind>,
    pub unit: Option<String>,
    pub min: Option<i64>,
    pub max: Option<i64>,
    pub standard: Option<Value>,
    pub readonly: Option<bool>,
    pub hidden: Option<bool>,
    pub multiple: Option<bool>,
    pub category: Option<String>,
    pub setter: Option<SetterHook>,
    pub getter: Option<GetterHook>,
    pub changed: Option<ChangedHook>,
    pub check: Option<CheckHook>,
}

impl AttributeSpec {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn kind(mut self, kind: AttrKind) -> Self {
        self.kind = Some(kind);
        self
    }

    #[must_use]
    pub fn unit(mut self, unit: &str) -> Self {
        self.unit = Some(unit.to_string());
        self
    }

    #[must_use]
    pub fn min(mut self, min: i64) -> Self {
        self.min = Some(min);
        self
    }

    #[must_use]
    pub fn max(mut self, max: i64) -> Self {
        self.max = Some(max);
        self
    }

    #[must_use]
    pub fn standard(mut self, standard: impl Into<Value>) -> Self {
        self.standard = Some(standard.into());
        self
    }

    #[must_use]
    pub fn readonly(mut self) -> Self {
        self.readonly = Some(true);
        self
    }

    #[must_use]
    pub fn hidden(mut self) -> Self {
        self.hidden = Some(true);
        self
    }

    #[must_use]
    pub fn multiple(mut self) -> Self {
        self.multiple = Some(true);
        self
    }

    #[must_use]
    pub fn category(mut self, category: &str) -> Self {
        self.category = Some(category.to_string());
        self
    }

    #[must_use]
    pub fn setter(mut self, hook: SetterHook) -> Self {
        self.setter = Some(hook);
        self
    }

    #[must_use]
    pub fn getter(mut self, hook: GetterHook) -> Self {
        self.getter = Some(hook);
        self
    }

    #[must_use]
    pub fn changed(mut self, hook: ChangedHook) -> Self {
        self.changed = Some(hook);
        self
    }

    #[must_use]
    pub fn check(mut self, hook: CheckHook) -> Self {
        self.check = Some(hook);
        self
    }
}

/// Finalized attribute metadata, defaults applied.
#[derive(Clone)]
pub struct Attribute {
    pub name: String,
    pub kind: AttrKind,
    pub unit: String,
    pub min: i64,
    pub max: i64,
    pub standard: Value,
    pub readonly: bool,
    pub hidden: bool,
    pub multiple: bool,
    pub category: String,
    pub setter: Option<SetterHook>,
    pub getter: Option<GetterHook>,
    pub changed: Option<ChangedHook>,
    pub check: Option<CheckHook>,
}

impl std::fmt::Debug for Attribute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Attribute")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("min", &self.min)
            .field("max", &self.max)
            .field("standard", &self.standard)
            .field("readonly", &self.readonly)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// ERRORS AND RESULTS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AttributeError {
    #[error("attribute {0} is not registered for {1}")]
    Unregistered(String, String),
    #[error("attribute {0} is read only for {1}")]
    ReadOnly(String, String),
    #[error("{0}")]
    CheckFailed(String),
}

/// Outcome of a set: applied with the coerced value, a silent no-op, or a
/// contained rejection.
#[derive(Debug, Clone, PartialEq)]
pub enum SetResult {
    Applied(Value),
    Unchanged,
    Rejected(AttributeError),
}

impl SetResult {
    #[must_use]
    pub fn applied(&self) -> bool {
        matches!(self, SetResult::Applied(_))
    }
}

// =============================================================================
// SCHEMA
// =============================================================================

/// Per-type registry of attribute metadata and the coercion engine used by
/// every get and set. Holds no per-object data; that lives in each object's
/// data map.
#[derive(Clone, Default)]
pub struct AttributeSchema {
    type_tag: String,
    attributes: HashMap<String, Attribute>,
}

impl AttributeSchema {
    #[must_use]
    pub fn new(type_tag: &str) -> Self {
        Self { type_tag: type_tag.to_string(), attributes: HashMap::new() }
    }

    #[must_use]
    pub fn type_tag(&self) -> &str {
        &self.type_tag
    }

    /// Register an attribute, merging over any previous registration for the
    /// same name: fields set in `spec` win, previously set fields survive,
    /// then defaults fill the rest. Returns the finalized metadata.
    pub fn register(&mut self, name: &str, spec: AttributeSpec) -> &Attribute {
        let old = self.attributes.get(name);

        let merged = Attribute {
            name: name.to_string(),
            kind: spec.kind.or_else(|| old.map(|o| o.kind)).unwrap_or_default(),
            unit: spec.unit.or_else(|| old.map(|o| o.unit.clone())).unwrap_or_default(),
            min: spec.min.or_else(|| old.map(|o| o.min)).unwrap_or(-50_000),
            max: spec.max.or_else(|| old.map(|o| o.max)).unwrap_or(50_000),
            standard: spec
                .standard
                .or_else(|| old.map(|o| o.standard.clone()))
                .unwrap_or(Value::from(0)),
            readonly: spec.readonly.or_else(|| old.map(|o| o.readonly)).unwrap_or(false),
            hidden: spec.hidden.or_else(|| old.map(|o| o.hidden)).unwrap_or(false),
            multiple: spec.multiple.or_else(|| old.map(|o| o.multiple)).unwrap_or(false),
            category: spec
                .category
                .or_else(|| old.map(|o| o.category.clone()))
                .unwrap_or_else(|| "Basic".to_string()),
            setter: spec.setter.or_else(|| old.and_then(|o| o.setter)),
            getter: spec.getter.or_else(|| old.and_then(|o| o.getter)),
            changed: spec.changed.or_else(|| old.and_then(|o| o.changed)),
            check: spec.check.or_else(|| old.and_then(|o| o.check)),
        };

        self.attributes.insert(name.to_string(), merged);
        &self.attributes[name]
    }

    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.get(name)
    }

    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }

    /// All registered attributes (for inspector-style consumers).
    #[must_use]
    pub fn attributes(&self) -> &HashMap<String, Attribute> {
        &self.attributes
    }

    /// Set an attribute on an object, running the full pipeline:
    /// registration check, raw identity check, readonly check, validation
    /// hook, coercion, write. Persistence and change notification are the
    /// caller's concern (they differ between client and server).
    pub fn set(
        &self,
        object: &mut DomainObject,
        name: &str,
        value: Value,
        lookup: &dyn ObjectLookup,
    ) -> SetResult {
        let Some(attr) = self.attributes.get(name) else {
            warn!(attribute = name, type_tag = %self.type_tag, "attribute is not registered");
            return SetResult::Rejected(AttributeError::Unregistered(
                name.to_string(),
                self.type_tag.clone(),
            ));
        };

        // Raw identity check before coercion. An absent attribute is never
        // identical to the incoming value, even Null: writing Null to an
        // unset attribute must still substitute the standard value.
        if object.data.get(name) == Some(&value) {
            return SetResult::Unchanged;
        }

        if attr.readonly {
            warn!(attribute = name, type_tag = %self.type_tag, "attribute is read only");
            return SetResult::Rejected(AttributeError::ReadOnly(
                name.to_string(),
                self.type_tag.clone(),
            ));
        }

        if let Some(check) = attr.check {
            if let Err(message) = check(object, &value, lookup) {
                warn!(attribute = name, %message, "attribute check rejected value");
                return SetResult::Rejected(AttributeError::CheckFailed(message));
            }
        }

        let coerced = coerce_for_set(attr, value);
        match attr.setter {
            Some(setter) => setter(object, name, coerced.clone()),
            None => {
                object.data.insert(name.to_string(), coerced.clone());
            }
        }

        SetResult::Applied(coerced)
    }

    /// Get an attribute. Unregistered names return the raw data value;
    /// registered names run the getter hook and coercion pipeline.
    #[must_use]
    pub fn get(&self, object: &DomainObject, name: &str) -> Value {
        let Some(attr) = self.attributes.get(name) else {
            return object.data.get(name).cloned().unwrap_or(Value::Null);
        };

        let raw = match attr.getter {
            Some(getter) => getter(object, name),
            None => object.data.get(name).cloned(),
        };
        let mut result = raw.unwrap_or_else(|| attr.standard.clone());

        // `id` keeps its raw representation even when declared numeric.
        if attr.kind.is_numeric() && name != "id" {
            result = coerce_numeric(attr, result);
        }
        result
    }
}

// =============================================================================
// COERCION
// =============================================================================

/// Setter-side coercion: missing value becomes the standard, numeric kinds
/// are parsed and clamped.
fn coerce_for_set(attr: &Attribute, value: Value) -> Value {
    let value = if value.is_null() { attr.standard.clone() } else { value };
    if attr.kind.is_numeric() {
        coerce_numeric(attr, value)
    } else {
        value
    }
}

/// Parse as integer (standard on failure), clamp to `[min, max]`.
fn coerce_numeric(attr: &Attribute, value: Value) -> Value {
    let parsed = parse_int(&value).or_else(|| parse_int(&attr.standard));
    match parsed {
        Some(n) => Value::from(n.clamp(attr.min, attr.max)),
        // A non-numeric standard passes through unclamped.
        None => attr.standard.clone(),
    }
}

/// Integer parse with the forgiving semantics attribute data has always had:
/// numbers truncate, strings parse an optional sign plus leading digits.
#[must_use]
pub fn parse_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(i)
            } else {
                #[allow(clippy::cast_possible_truncation)]
                n.as_f64().map(|f| f.trunc() as i64)
            }
        }
        Value::String(s) => {
            let s = s.trim();
            let (sign, rest) = match s.strip_prefix('-') {
                Some(rest) => (-1, rest),
                None => (1, s.strip_prefix('+').unwrap_or(s)),
            };
            let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
            if digits.is_empty() {
                None
            } else {
                digits.parse::<i64>().ok().map(|v| sign * v)
            }
        }
        _ => None,
    }
}

/// Loose equality for update diffing: strict `Value` equality, or numeric
/// equivalence between representations (`"5"` equals `5`).
#[must_use]
pub fn loosely_equal(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    match (parse_int(a), parse_int(b)) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

#[cfg(test)]
#[path = "schema_test.rs"]
mod tests;
