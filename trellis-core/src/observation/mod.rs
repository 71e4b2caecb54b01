//! Observation Engine
//!
//! This module implements the core observation system: typed observers for
//! properties and collections, the locator that selects among them, and the
//! supporting machinery (subscriber collections, dependency tracking, dirty
//! checking, batched notification).
//!
//! # Concepts
//!
//! ## Observers and accessors
//!
//! An accessor mediates reads and writes for one property; an observer adds
//! change notification. Every mutation of observed state routes through an
//! observer — the observer is the single owner of truth for its property,
//! and writes that bypass it produce divergent notifications.
//!
//! ## The locator
//!
//! [`ObserverLocator`] decides which observer fits an object/key pair: host
//! hooks first, then collection specials (`length`/`size`, numeric indices),
//! then adapters, then the computed/dirty-check/plain-property decision.
//! Observers are memoized per object id and key in a cache owned by the
//! locator instance.
//!
//! ## Dependency tracking
//!
//! A computed observer re-evaluates inside the [`ObservationContext`]; every
//! tracked read reports its observer to the active watcher, versioned so
//! dependencies not re-read in the latest pass are pruned. When the last
//! subscriber leaves, tracking stops entirely.
//!
//! ## Collections
//!
//! Collection observers describe each mutation with an [`IndexMap`]: new
//! positions mapped to old indices plus a deletion list. A keyed repeater
//! uses [`longest_increasing_subsequence`] over the map to move the minimal
//! number of views.

mod array;
mod batch;
mod collection;
mod computed;
mod context;
mod dirty;
mod index_map;
mod locator;
mod map;
mod observer;
mod property;
mod proxy;
mod set;
mod subscribers;
mod value;

pub use array::{ArrayIndexObserver, ArrayObserver};
pub use batch::{BatchFlush, BatchQueue};
pub use collection::CollectionLengthObserver;
pub use computed::ComputedObserver;
pub use context::{DependencyWatcher, ObservationContext, WatchGuard};
pub use dirty::{DirtyCheckObserver, DirtyCheckSettings, DirtyChecker};
pub use index_map::{longest_increasing_subsequence, IndexMap, INSERTED};
pub use locator::{ObservationAdapter, ObserverLocator, TargetAccessorLocator, TargetObserverLocator};
pub use map::MapObserver;
pub use observer::{Accessor, AccessorKind, Observer};
pub use property::{PrimitiveObserver, PropertyAccessor, PropertyObserver};
pub use proxy::{computed_with_proxy, ObservableProxy};
pub use set::SetObserver;
pub use subscribers::{
    CollectionSubscriber, Flags, Subscriber, SubscriberId, SubscriberRegistry,
};
pub use value::{
    object_from, ArrayData, ArrayRef, ComputedDescriptor, MapData, MapRef, NativeFunction,
    ObjectData, ObjectRef, SetData, SetRef, Value,
};
