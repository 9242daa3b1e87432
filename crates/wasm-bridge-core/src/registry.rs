//! Callback slot registry.
//!
//! Each [`crate::Runtime`] owns one [`CallbackRegistry`]. Attaching a host
//! function allocates a [`SlotId`] and stores the callback under it; the
//! trampoline installed in the link table carries that slot and resolves it
//! here on every dispatch.
//!
//! Slot allocation is a single atomic increment and insertion goes through a
//! sharded concurrent map, so registration from many threads never loses an
//! entry and dispatch-time lookups do not contend on a global lock.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use dashmap::DashMap;
use uuid::Uuid;

use wasm_bridge_common::HostError;

use crate::bridge::CallFrame;
use crate::signature::Signature;

/// A host function body.
///
/// The callback reads its arguments from the frame, may read and write
/// linear memory through [`CallFrame::memory`], and stores its results with
/// [`CallFrame::set_result`]. Returning an error traps the calling
/// WebAssembly code.
pub type HostCallback = dyn Fn(&mut CallFrame<'_, '_>) -> Result<(), HostError> + Send + Sync;

/// Box a closure as a [`HostCallback`].
pub fn into_callback<F>(callback: F) -> Arc<HostCallback>
where
    F: Fn(&mut CallFrame<'_, '_>) -> Result<(), HostError> + Send + Sync + 'static,
{
    Arc::new(callback)
}

/// Handle to one registered callback.
///
/// The handle records which registry issued it, so a slot from one runtime
/// never resolves in another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId {
    registry: Uuid,
    index: u32,
}

impl SlotId {
    /// Position of this slot in its registry.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Identifier of the registry that issued this slot.
    pub fn registry(&self) -> Uuid {
        self.registry
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot#{}", self.index)
    }
}

/// A registered callback and the import it was attached for.
pub struct SlotEntry {
    module: String,
    name: String,
    signature: Signature,
    callback: Arc<HostCallback>,
    calls: AtomicU64,
}

impl SlotEntry {
    /// Import namespace the callback was attached to.
    pub fn module(&self) -> &str {
        &self.module
    }

    /// Import field name the callback was attached to.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared signature.
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Number of dispatches so far.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    pub(crate) fn callback(&self) -> &HostCallback {
        &*self.callback
    }

    pub(crate) fn record_call(&self) {
        self.calls.fetch_add(1, Ordering::Relaxed);
    }
}

impl fmt::Debug for SlotEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotEntry")
            .field("module", &self.module)
            .field("name", &self.name)
            .field("signature", &self.signature.to_string())
            .field("calls", &self.calls())
            .finish_non_exhaustive()
    }
}

/// Slot table mapping [`SlotId`]s to host callbacks.
pub struct CallbackRegistry {
    id: Uuid,
    next_slot: AtomicU32,
    slots: DashMap<u32, Arc<SlotEntry>>,
    bindings: DashMap<(String, String), SlotId>,
}

impl CallbackRegistry {
    /// Create an empty registry with a fresh identifier.
    pub fn new() -> Self {
        Self::with_id(Uuid::new_v4())
    }

    /// Create an empty registry with the given identifier.
    pub fn with_id(id: Uuid) -> Self {
        Self {
            id,
            next_slot: AtomicU32::new(0),
            slots: DashMap::new(),
            bindings: DashMap::new(),
        }
    }

    /// Registry identifier, carried by every slot it issues.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Store `callback` in a freshly allocated slot.
    pub fn register(
        &self,
        module: &str,
        name: &str,
        signature: Signature,
        callback: Arc<HostCallback>,
    ) -> SlotId {
        let index = self.next_slot.fetch_add(1, Ordering::Relaxed);
        let slot = SlotId {
            registry: self.id,
            index,
        };
        self.slots.insert(
            index,
            Arc::new(SlotEntry {
                module: module.to_string(),
                name: name.to_string(),
                signature,
                callback,
                calls: AtomicU64::new(0),
            }),
        );
        slot
    }

    /// Look up a slot.
    ///
    /// Returns `None` for slots issued by a different registry.
    pub fn get(&self, slot: SlotId) -> Option<Arc<SlotEntry>> {
        if slot.registry != self.id {
            return None;
        }
        self.slots.get(&slot.index).map(|entry| Arc::clone(&entry))
    }

    /// Route the import `module.name` to `slot`. The latest binding wins.
    pub fn bind(&self, module: &str, name: &str, slot: SlotId) {
        self.bindings
            .insert((module.to_string(), name.to_string()), slot);
    }

    /// The slot currently bound to `module.name`.
    pub fn binding(&self, module: &str, name: &str) -> Option<SlotId> {
        self.bindings
            .get(&(module.to_string(), name.to_string()))
            .map(|slot| *slot)
    }

    /// Number of dispatches through `slot`.
    pub fn call_count(&self, slot: SlotId) -> Option<u64> {
        self.get(slot).map(|entry| entry.calls())
    }

    /// Number of registered slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns `true` if no callback has been registered.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl Default for CallbackRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackRegistry")
            .field("id", &self.id)
            .field("slots", &self.slots.len())
            .field("bindings", &self.bindings.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::thread;

    use super::*;

    fn noop() -> Arc<HostCallback> {
        into_callback(|_frame| Ok(()))
    }

    #[test]
    fn test_register_and_get() {
        let registry = CallbackRegistry::new();
        let sig = Signature::parse("v(i)").unwrap();

        let a = registry.register("env", "a", sig.clone(), noop());
        let b = registry.register("env", "b", sig, noop());

        assert_ne!(a, b);
        assert_eq!(a.index(), 0);
        assert_eq!(b.index(), 1);
        assert_eq!(registry.len(), 2);

        let entry = registry.get(b).unwrap();
        assert_eq!(entry.module(), "env");
        assert_eq!(entry.name(), "b");
        assert_eq!(entry.signature().to_string(), "v(i)");
        assert_eq!(entry.calls(), 0);
    }

    #[test]
    fn test_foreign_slot_rejected() {
        let first = CallbackRegistry::new();
        let second = CallbackRegistry::new();

        let slot = first.register("env", "f", Signature::default(), noop());
        second.register("env", "f", Signature::default(), noop());

        assert!(first.get(slot).is_some());
        assert!(second.get(slot).is_none());
    }

    #[test]
    fn test_bindings_last_wins() {
        let registry = CallbackRegistry::new();
        assert!(registry.binding("env", "f").is_none());

        let old = registry.register("env", "f", Signature::default(), noop());
        registry.bind("env", "f", old);
        let new = registry.register("env", "f", Signature::default(), noop());
        registry.bind("env", "f", new);

        assert_eq!(registry.binding("env", "f"), Some(new));
        assert!(registry.binding("env", "g").is_none());
    }

    #[test]
    fn test_call_count() {
        let registry = CallbackRegistry::new();
        let slot = registry.register("env", "f", Signature::default(), noop());

        registry.get(slot).unwrap().record_call();
        registry.get(slot).unwrap().record_call();

        assert_eq!(registry.call_count(slot), Some(2));
    }

    #[test]
    fn test_concurrent_registration() {
        const THREADS: usize = 8;
        const PER_THREAD: usize = 64;

        let registry = CallbackRegistry::new();

        let slots: Vec<SlotId> = thread::scope(|scope| {
            let handles: Vec<_> = (0..THREADS)
                .map(|t| {
                    let registry = &registry;
                    scope.spawn(move || {
                        (0..PER_THREAD)
                            .map(|i| {
                                registry.register(
                                    "env",
                                    &format!("f_{t}_{i}"),
                                    Signature::default(),
                                    noop(),
                                )
                            })
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            handles
                .into_iter()
                .flat_map(|h| h.join().unwrap())
                .collect()
        });

        let distinct: HashSet<_> = slots.iter().copied().collect();
        assert_eq!(distinct.len(), THREADS * PER_THREAD);
        assert_eq!(registry.len(), THREADS * PER_THREAD);
        assert!(slots.iter().all(|slot| registry.get(*slot).is_some()));
    }
}
