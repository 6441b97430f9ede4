//! Handle registries for objects crossing the C boundary
//!
//! A handle packs the object kind, the slot generation and the slot index:
//!
//! ```text
//!  63      56 55           32 31            0
//! +----------+---------------+---------------+
//! |   kind   |  generation   |  index + 1    |
//! +----------+---------------+---------------+
//! ```
//!
//! Releasing an object bumps its slot's generation, so a stale handle, a
//! handle of another kind, or a made-up integer never resolves. A slot whose
//! generation is exhausted is retired rather than wrapped.

use crate::backend::{Backend, BackendId, Graph};
use once_cell::sync::Lazy;
use onnx_xla_compiler::Event;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

const INDEX_BITS: u32 = 32;
const GENERATION_BITS: u32 = 24;
const GENERATION_MASK: u64 = (1 << GENERATION_BITS) - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleKind {
    BackendId = 1,
    Backend = 2,
    Graph = 3,
    Event = 4,
}

impl fmt::Display for HandleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HandleKind::BackendId => "backend ID",
            HandleKind::Backend => "backend",
            HandleKind::Graph => "graph",
            HandleKind::Event => "event",
        };
        f.write_str(name)
    }
}

struct Slot<T> {
    generation: u64,
    value: Option<T>,
}

/// Arena of objects addressed by generation-checked handles
pub struct HandleTable<T> {
    kind: HandleKind,
    slots: Vec<Slot<T>>,
    free: Vec<usize>,
    retired: usize,
}

impl<T> HandleTable<T> {
    pub const fn new(kind: HandleKind) -> Self {
        Self {
            kind,
            slots: Vec::new(),
            free: Vec::new(),
            retired: 0,
        }
    }

    pub fn kind(&self) -> HandleKind {
        self.kind
    }

    /// Store `value`, returning its nonzero handle
    pub fn insert(&mut self, value: T) -> u64 {
        let index = match self.free.pop() {
            Some(index) => {
                self.slots[index].value = Some(value);
                index
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    value: Some(value),
                });
                self.slots.len() - 1
            }
        };
        self.encode(index)
    }

    pub fn get(&self, handle: u64) -> Option<&T> {
        let index = self.decode(handle)?;
        self.slots[index].value.as_ref()
    }

    /// Take the object out; the handle is dead afterwards
    pub fn remove(&mut self, handle: u64) -> Option<T> {
        let index = self.decode(handle)?;
        let slot = &mut self.slots[index];
        let value = slot.value.take()?;
        if slot.generation == GENERATION_MASK {
            self.retired += 1;
        } else {
            slot.generation += 1;
            self.free.push(index);
        }
        Some(value)
    }

    /// Live objects
    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len() - self.retired
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn encode(&self, index: usize) -> u64 {
        (self.kind as u64) << (INDEX_BITS + GENERATION_BITS)
            | self.slots[index].generation << INDEX_BITS
            | (index as u64 + 1)
    }

    fn decode(&self, handle: u64) -> Option<usize> {
        if handle >> (INDEX_BITS + GENERATION_BITS) != self.kind as u64 {
            return None;
        }
        let generation = (handle >> INDEX_BITS) & GENERATION_MASK;
        let index = (handle & u64::from(u32::MAX)).checked_sub(1)? as usize;
        let slot = self.slots.get(index)?;
        (slot.generation == generation && slot.value.is_some()).then_some(index)
    }
}

impl<T: Clone> HandleTable<T> {
    /// Clone of the object, so the registry lock can be dropped before use
    pub fn cloned(&self, handle: u64) -> Option<T> {
        self.get(handle).cloned()
    }
}

pub static BACKEND_ID_REGISTRY: Lazy<Mutex<HandleTable<BackendId>>> =
    Lazy::new(|| Mutex::new(HandleTable::new(HandleKind::BackendId)));

pub static BACKEND_REGISTRY: Lazy<Mutex<HandleTable<Arc<Backend>>>> =
    Lazy::new(|| Mutex::new(HandleTable::new(HandleKind::Backend)));

pub static GRAPH_REGISTRY: Lazy<Mutex<HandleTable<Arc<Mutex<Graph>>>>> =
    Lazy::new(|| Mutex::new(HandleTable::new(HandleKind::Graph)));

pub static EVENT_REGISTRY: Lazy<Mutex<HandleTable<Arc<Event>>>> =
    Lazy::new(|| Mutex::new(HandleTable::new(HandleKind::Event)));
