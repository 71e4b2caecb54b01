//! Dynamic Value Model
//!
//! Bindings evaluate expressions against arbitrary host-object state, so the
//! observation engine works over a dynamic [`Value`] type rather than static
//! Rust types. Scalars are compared by value; objects and collections are
//! shared handles compared by identity, the same way the host language the
//! binding syntax mimics would compare them.
//!
//! # Host objects
//!
//! [`ObjectData`], [`ArrayData`], [`MapData`], and [`SetData`] are the backing
//! stores. Each carries a unique id from an atomic counter; observers are
//! cached against that id. Reads are freely available; mutations to observed
//! state must go through the corresponding observer so change notifications
//! stay consistent (the observer is the single owner of truth for a
//! property).
//!
//! # Computed members
//!
//! An object may declare a [`ComputedDescriptor`] for a key: a getter (and
//! optional setter) native function. The observer locator turns cacheable
//! descriptors into computed observers and non-cacheable ones into dirty-check
//! fallbacks.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use indexmap::IndexMap as OrderedMap;

use crate::error::Result;

/// Counter for generating unique host-object IDs.
static OBJECT_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a new unique host-object ID.
fn next_object_id() -> u64 {
    OBJECT_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Shared handle to a plain object.
pub type ObjectRef = Arc<ObjectData>;
/// Shared handle to an array collection.
pub type ArrayRef = Arc<ArrayData>;
/// Shared handle to a map collection.
pub type MapRef = Arc<MapData>;
/// Shared handle to a set collection.
pub type SetRef = Arc<SetData>;

/// A dynamically typed value.
///
/// `Null` doubles as the "absent" value: reading a property that does not
/// exist yields `Null`, and pushing `Null` into a target clears it.
#[derive(Clone)]
pub enum Value {
    /// The absent value.
    Null,
    /// A boolean.
    Bool(bool),
    /// A double-precision number.
    Number(f64),
    /// An immutable string.
    Str(Arc<str>),
    /// A shared array collection.
    Array(ArrayRef),
    /// A shared map collection with string keys.
    Map(MapRef),
    /// A shared set collection.
    Set(SetRef),
    /// A shared plain object.
    Object(ObjectRef),
    /// A callable host function.
    Function(NativeFunction),
}

impl Value {
    /// Build a string value.
    pub fn str(s: impl AsRef<str>) -> Value {
        Value::Str(Arc::from(s.as_ref()))
    }

    /// Build a number value.
    pub fn number(n: f64) -> Value {
        Value::Number(n)
    }

    /// True when the value is `Null`.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Truthiness, following the host-language rules the binding syntax
    /// mimics: `Null`, `false`, `0`, `NaN`, and the empty string are falsy;
    /// everything else (including empty collections) is truthy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::Str(s) => !s.is_empty(),
            _ => true,
        }
    }

    /// Numeric coercion used by arithmetic operators.
    pub fn as_number(&self) -> f64 {
        match self {
            Value::Null => 0.0,
            Value::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            Value::Number(n) => *n,
            Value::Str(s) => s.trim().parse::<f64>().unwrap_or(f64::NAN),
            _ => f64::NAN,
        }
    }

    /// String coercion used by interpolation and the `+` operator.
    ///
    /// `Null` renders as the empty string so interpolated text does not show
    /// placeholder noise for absent values.
    pub fn to_display_string(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => {
                if n.fract() == 0.0 && n.is_finite() && n.abs() < 1e15 {
                    format!("{}", *n as i64)
                } else {
                    n.to_string()
                }
            }
            Value::Str(s) => s.to_string(),
            Value::Array(arr) => {
                let items = arr.snapshot();
                items
                    .iter()
                    .map(Value::to_display_string)
                    .collect::<Vec<_>>()
                    .join(",")
            }
            Value::Map(_) => "[object Map]".to_string(),
            Value::Set(_) => "[object Set]".to_string(),
            Value::Object(_) => "[object Object]".to_string(),
            Value::Function(_) => "[function]".to_string(),
        }
    }

    /// The host-object id for identity-carrying values, if any.
    pub fn object_id(&self) -> Option<u64> {
        match self {
            Value::Array(a) => Some(a.id()),
            Value::Map(m) => Some(m.id()),
            Value::Set(s) => Some(s.id()),
            Value::Object(o) => Some(o.id()),
            _ => None,
        }
    }

    /// Read a member without establishing any observation.
    ///
    /// Walks the prototype chain for plain objects and invokes computed
    /// getters. Collections expose `length`/`size` and numeric indices;
    /// strings expose `length`. Unknown members read as `Null`.
    pub fn get_member(&self, key: &str) -> Result<Value> {
        match self {
            Value::Object(obj) => {
                if let Some(descriptor) = obj.descriptor(key) {
                    return descriptor.get.call(&[self.clone()]);
                }
                Ok(obj.field(key).unwrap_or(Value::Null))
            }
            Value::Array(arr) => {
                if key == "length" {
                    return Ok(Value::Number(arr.len() as f64));
                }
                if let Ok(index) = key.parse::<usize>() {
                    return Ok(arr.get(index).unwrap_or(Value::Null));
                }
                Ok(Value::Null)
            }
            Value::Map(map) => {
                if key == "size" {
                    return Ok(Value::Number(map.len() as f64));
                }
                Ok(map.get(key).unwrap_or(Value::Null))
            }
            Value::Set(set) => {
                if key == "size" {
                    return Ok(Value::Number(set.len() as f64));
                }
                Ok(Value::Null)
            }
            Value::Str(s) => {
                if key == "length" {
                    return Ok(Value::Number(s.chars().count() as f64));
                }
                Ok(Value::Null)
            }
            _ => Ok(Value::Null),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => Arc::ptr_eq(a, b),
            (Value::Map(a), Value::Map(b)) => Arc::ptr_eq(a, b),
            (Value::Set(a), Value::Set(b)) => Arc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => Arc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => write!(f, "{n}"),
            Value::Str(s) => write!(f, "{s:?}"),
            Value::Array(a) => write!(f, "Array(#{})", a.id()),
            Value::Map(m) => write!(f, "Map(#{})", m.id()),
            Value::Set(s) => write!(f, "Set(#{})", s.id()),
            Value::Object(o) => write!(f, "Object(#{})", o.id()),
            Value::Function(_) => write!(f, "[function]"),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::str(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::str(s)
    }
}

impl From<ObjectRef> for Value {
    fn from(o: ObjectRef) -> Self {
        Value::Object(o)
    }
}

impl From<ArrayRef> for Value {
    fn from(a: ArrayRef) -> Self {
        Value::Array(a)
    }
}

/// A callable host function.
///
/// Compared by pointer identity, like any other identity-carrying value.
#[derive(Clone)]
pub struct NativeFunction {
    inner: Arc<dyn Fn(&[Value]) -> Result<Value> + Send + Sync>,
}

impl NativeFunction {
    /// Wrap a closure as a callable value.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        Self { inner: Arc::new(f) }
    }

    /// Invoke the function.
    pub fn call(&self, args: &[Value]) -> Result<Value> {
        (self.inner)(args)
    }
}

impl PartialEq for NativeFunction {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativeFunction")
    }
}

/// A computed-member descriptor: getter plus optional setter.
///
/// The getter is called with the owning object as its only argument; the
/// setter with the owning object and the incoming value.
#[derive(Clone)]
pub struct ComputedDescriptor {
    /// Getter invoked on read.
    pub get: NativeFunction,
    /// Optional setter invoked on write.
    pub set: Option<NativeFunction>,
    /// Whether the result may be cached and invalidated by dependency
    /// tracking. Non-cacheable descriptors fall back to the dirty checker.
    pub cacheable: bool,
}

/// Backing store for a plain object.
///
/// Fields keep insertion order so template output is deterministic. Reads
/// walk the prototype chain; writes always land on the object itself,
/// shadowing any prototype field of the same name.
pub struct ObjectData {
    id: u64,
    fields: RwLock<OrderedMap<String, Value>>,
    computed: RwLock<HashMap<String, ComputedDescriptor>>,
    prototype: Option<ObjectRef>,
}

impl ObjectData {
    /// Create a new empty object.
    pub fn new() -> ObjectRef {
        Arc::new(Self {
            id: next_object_id(),
            fields: RwLock::new(OrderedMap::new()),
            computed: RwLock::new(HashMap::new()),
            prototype: None,
        })
    }

    /// Create a new object inheriting from `prototype`.
    pub fn with_prototype(prototype: ObjectRef) -> ObjectRef {
        Arc::new(Self {
            id: next_object_id(),
            fields: RwLock::new(OrderedMap::new()),
            computed: RwLock::new(HashMap::new()),
            prototype: Some(prototype),
        })
    }

    /// This object's unique id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The prototype, if any.
    pub fn prototype(&self) -> Option<&ObjectRef> {
        self.prototype.as_ref()
    }

    /// Read a field, walking the prototype chain.
    pub fn field(&self, key: &str) -> Option<Value> {
        let own = self
            .fields
            .read()
            .expect("fields lock poisoned")
            .get(key)
            .cloned();
        match own {
            Some(v) => Some(v),
            None => self.prototype.as_ref().and_then(|p| p.field(key)),
        }
    }

    /// True when the object (or its prototype chain) owns `key`, either as a
    /// plain field or a computed member.
    pub fn has(&self, key: &str) -> bool {
        if self
            .fields
            .read()
            .expect("fields lock poisoned")
            .contains_key(key)
        {
            return true;
        }
        if self
            .computed
            .read()
            .expect("computed lock poisoned")
            .contains_key(key)
        {
            return true;
        }
        self.prototype.as_ref().is_some_and(|p| p.has(key))
    }

    /// True when the object itself (not a prototype) owns `key`.
    pub fn has_own(&self, key: &str) -> bool {
        self.fields
            .read()
            .expect("fields lock poisoned")
            .contains_key(key)
            || self
                .computed
                .read()
                .expect("computed lock poisoned")
                .contains_key(key)
    }

    /// Write a field on this object without change notification.
    ///
    /// Observed objects must be mutated through their property observers;
    /// this raw write exists for construction and for the observers
    /// themselves.
    pub fn set_field(&self, key: impl Into<String>, value: Value) {
        self.fields
            .write()
            .expect("fields lock poisoned")
            .insert(key.into(), value);
    }

    /// Declare a computed member.
    pub fn define_computed(&self, key: impl Into<String>, descriptor: ComputedDescriptor) {
        self.computed
            .write()
            .expect("computed lock poisoned")
            .insert(key.into(), descriptor);
    }

    /// Look up a computed descriptor, walking the prototype chain.
    pub fn descriptor(&self, key: &str) -> Option<ComputedDescriptor> {
        let own = self
            .computed
            .read()
            .expect("computed lock poisoned")
            .get(key)
            .cloned();
        match own {
            Some(d) => Some(d),
            None => self.prototype.as_ref().and_then(|p| p.descriptor(key)),
        }
    }

    /// Own field names in insertion order.
    pub fn keys(&self) -> Vec<String> {
        self.fields
            .read()
            .expect("fields lock poisoned")
            .keys()
            .cloned()
            .collect()
    }
}

impl fmt::Debug for ObjectData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectData")
            .field("id", &self.id)
            .field("keys", &self.keys())
            .finish()
    }
}

/// Backing store for an array collection.
pub struct ArrayData {
    id: u64,
    items: RwLock<Vec<Value>>,
}

impl ArrayData {
    /// Create a new array with the given items.
    pub fn new(items: Vec<Value>) -> ArrayRef {
        Arc::new(Self {
            id: next_object_id(),
            items: RwLock::new(items),
        })
    }

    /// This array's unique id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Current length.
    pub fn len(&self) -> usize {
        self.items.read().expect("items lock poisoned").len()
    }

    /// True when empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read one element.
    pub fn get(&self, index: usize) -> Option<Value> {
        self.items
            .read()
            .expect("items lock poisoned")
            .get(index)
            .cloned()
    }

    /// Clone the current contents.
    pub fn snapshot(&self) -> Vec<Value> {
        self.items.read().expect("items lock poisoned").clone()
    }

    pub(crate) fn with_items<R>(&self, f: impl FnOnce(&mut Vec<Value>) -> R) -> R {
        let mut guard = self.items.write().expect("items lock poisoned");
        f(&mut guard)
    }
}

impl fmt::Debug for ArrayData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArrayData")
            .field("id", &self.id)
            .field("len", &self.len())
            .finish()
    }
}

/// Backing store for a map collection with string keys.
///
/// Entries keep insertion order so collection diffs can speak in positions.
pub struct MapData {
    id: u64,
    entries: RwLock<OrderedMap<String, Value>>,
}

impl MapData {
    /// Create a new empty map.
    pub fn new() -> MapRef {
        Arc::new(Self {
            id: next_object_id(),
            entries: RwLock::new(OrderedMap::new()),
        })
    }

    /// This map's unique id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Current entry count.
    pub fn len(&self) -> usize {
        self.entries.read().expect("entries lock poisoned").len()
    }

    /// True when empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read one entry.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.entries
            .read()
            .expect("entries lock poisoned")
            .get(key)
            .cloned()
    }

    /// True when `key` is present.
    pub fn has(&self, key: &str) -> bool {
        self.entries
            .read()
            .expect("entries lock poisoned")
            .contains_key(key)
    }

    /// Keys in insertion order.
    pub fn keys(&self) -> Vec<String> {
        self.entries
            .read()
            .expect("entries lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    pub(crate) fn with_entries<R>(&self, f: impl FnOnce(&mut OrderedMap<String, Value>) -> R) -> R {
        let mut guard = self.entries.write().expect("entries lock poisoned");
        f(&mut guard)
    }
}

impl fmt::Debug for MapData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MapData")
            .field("id", &self.id)
            .field("len", &self.len())
            .finish()
    }
}

/// Backing store for a set collection.
///
/// Items keep insertion order and are deduplicated by [`Value`] equality.
pub struct SetData {
    id: u64,
    items: RwLock<Vec<Value>>,
}

impl SetData {
    /// Create a new empty set.
    pub fn new() -> SetRef {
        Arc::new(Self {
            id: next_object_id(),
            items: RwLock::new(Vec::new()),
        })
    }

    /// This set's unique id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Current item count.
    pub fn len(&self) -> usize {
        self.items.read().expect("items lock poisoned").len()
    }

    /// True when empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when `value` is present.
    pub fn has(&self, value: &Value) -> bool {
        self.items
            .read()
            .expect("items lock poisoned")
            .iter()
            .any(|v| v == value)
    }

    /// Clone the current contents in insertion order.
    pub fn snapshot(&self) -> Vec<Value> {
        self.items.read().expect("items lock poisoned").clone()
    }

    pub(crate) fn with_items<R>(&self, f: impl FnOnce(&mut Vec<Value>) -> R) -> R {
        let mut guard = self.items.write().expect("items lock poisoned");
        f(&mut guard)
    }
}

impl fmt::Debug for SetData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SetData")
            .field("id", &self.id)
            .field("len", &self.len())
            .finish()
    }
}

/// Convenience: build an object from key/value pairs.
pub fn object_from(pairs: impl IntoIterator<Item = (&'static str, Value)>) -> ObjectRef {
    let obj = ObjectData::new();
    for (key, value) in pairs {
        obj.set_field(key, value);
    }
    obj
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalars_compare_by_value() {
        assert_eq!(Value::from(1.0), Value::from(1.0));
        assert_eq!(Value::str("a"), Value::str("a"));
        assert_ne!(Value::from(1.0), Value::str("1"));
    }

    #[test]
    fn objects_compare_by_identity() {
        let a = ObjectData::new();
        let b = ObjectData::new();
        a.set_field("x", Value::from(1.0));
        b.set_field("x", Value::from(1.0));

        assert_eq!(Value::Object(a.clone()), Value::Object(a.clone()));
        assert_ne!(Value::Object(a), Value::Object(b));
    }

    #[test]
    fn object_ids_are_unique() {
        let a = ObjectData::new();
        let b = ArrayData::new(vec![]);
        let c = MapData::new();
        assert_ne!(a.id(), b.id());
        assert_ne!(b.id(), c.id());
    }

    #[test]
    fn prototype_reads_are_shadowed_by_own_writes() {
        let proto = ObjectData::new();
        proto.set_field("greeting", Value::str("hello"));

        let obj = ObjectData::with_prototype(proto.clone());
        assert_eq!(obj.field("greeting"), Some(Value::str("hello")));

        obj.set_field("greeting", Value::str("hi"));
        assert_eq!(obj.field("greeting"), Some(Value::str("hi")));
        assert_eq!(proto.field("greeting"), Some(Value::str("hello")));
    }

    #[test]
    fn get_member_reads_fields_and_lengths() {
        let obj = object_from([("name", Value::str("Ann"))]);
        let value = Value::Object(obj);
        assert_eq!(value.get_member("name").unwrap(), Value::str("Ann"));
        assert_eq!(value.get_member("missing").unwrap(), Value::Null);

        let arr = Value::Array(ArrayData::new(vec![Value::from(1.0), Value::from(2.0)]));
        assert_eq!(arr.get_member("length").unwrap(), Value::from(2.0));
        assert_eq!(arr.get_member("1").unwrap(), Value::from(2.0));

        assert_eq!(Value::str("abc").get_member("length").unwrap(), Value::from(3.0));
    }

    #[test]
    fn get_member_invokes_computed_getters() {
        let obj = ObjectData::new();
        obj.set_field("first", Value::str("Ann"));
        obj.set_field("last", Value::str("Lee"));
        obj.define_computed(
            "full",
            ComputedDescriptor {
                get: NativeFunction::new(|args| {
                    let this = &args[0];
                    let first = this.get_member("first")?.to_display_string();
                    let last = this.get_member("last")?.to_display_string();
                    Ok(Value::str(format!("{first} {last}")))
                }),
                set: None,
                cacheable: true,
            },
        );

        let value = Value::Object(obj);
        assert_eq!(value.get_member("full").unwrap(), Value::str("Ann Lee"));
    }

    #[test]
    fn display_string_coercions() {
        assert_eq!(Value::Null.to_display_string(), "");
        assert_eq!(Value::from(3.0).to_display_string(), "3");
        assert_eq!(Value::from(3.5).to_display_string(), "3.5");
        assert_eq!(Value::from(true).to_display_string(), "true");

        let arr = ArrayData::new(vec![Value::from(1.0), Value::str("a")]);
        assert_eq!(Value::Array(arr).to_display_string(), "1,a");
    }

    #[test]
    fn truthiness() {
        assert!(!Value::Null.is_truthy());
        assert!(!Value::from(0.0).is_truthy());
        assert!(!Value::str("").is_truthy());
        assert!(Value::str("x").is_truthy());
        assert!(Value::Array(ArrayData::new(vec![])).is_truthy());
    }
}
