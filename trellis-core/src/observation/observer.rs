//! Observer and Accessor Contracts
//!
//! An accessor mediates reads and writes for one property; an observer is an
//! accessor that can additionally notify subscribers of changes. Every read
//! and write of observed state routes through these contracts from the start
//! — there is no dynamic redefinition of host properties, so the observer is
//! the single authoritative owner of the value it mediates.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::subscribers::{Flags, Subscriber, SubscriberId};
use super::value::Value;
use crate::error::Result;

/// Counter for generating unique observer IDs.
static OBSERVER_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a new unique observer ID.
pub(crate) fn next_observer_id() -> u64 {
    OBSERVER_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Category tag carried by every accessor.
///
/// The renderer uses the tag to decide flush urgency: layout-affecting
/// accessors flush ahead of ordinary ones, collection accessors dispatch
/// index maps rather than scalar diffs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessorKind {
    /// A plain object property.
    Object,
    /// An array collection or an element of one.
    Array,
    /// A map collection.
    Map,
    /// A set collection.
    Set,
    /// A property whose writes affect host layout.
    Layout,
    /// A non-observable primitive; writes are ignored.
    Primitive,
}

/// Read/write mediation for one property, without change notification.
pub trait Accessor: Send + Sync {
    /// The accessor's category tag.
    fn kind(&self) -> AccessorKind {
        AccessorKind::Object
    }

    /// Read the current value.
    fn get_value(&self) -> Value;

    /// Write a new value.
    fn set_value(&self, value: Value, flags: Flags) -> Result<()>;
}

/// An accessor that notifies subscribers when the mediated value changes.
pub trait Observer: Accessor {
    /// This observer's unique id (used by caches and dependency records).
    fn observer_id(&self) -> u64;

    /// Whether the locator may memoize this observer per object/key pair.
    fn cacheable(&self) -> bool {
        true
    }

    /// Register a subscriber. Returns `false` when `id` was already
    /// subscribed.
    fn subscribe(&self, id: SubscriberId, subscriber: Arc<dyn Subscriber>) -> bool;

    /// Remove a subscriber. Returns `false` when `id` was not subscribed.
    fn unsubscribe(&self, id: SubscriberId) -> bool;
}
