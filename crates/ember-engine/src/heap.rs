//! Slab heap and mark/sweep collector
//!
//! Objects live in generation-checked slots. The collector marks from the
//! protect stack, the preserve table, the permanent singletons, and
//! whatever extra roots the runtime passes in (environments, symbol
//! table), then sweeps everything unmarked. Weak references do not keep
//! their key alive; a live weak reference whose key died is cleared and
//! its finalizer queued.

use crate::value::{ActiveFn, BuiltinFn, CharData, Finalizer, Handle, PromiseFn, Tag};
use rustc_hash::FxHashMap;

/// A binding in an environment frame
pub(crate) enum Binding {
    /// Plain stored value
    Value(Handle),
    /// Computed binding; reading it runs the hook
    Active(ActiveFn),
}

pub(crate) struct EnvData {
    pub frame: FxHashMap<String, Binding>,
    pub enclos: Handle,
}

pub(crate) enum PromiseState {
    Pending(PromiseFn),
    Forced(Handle),
}

/// Payload of a heap object; one variant per `Tag`
pub(crate) enum ObjData {
    Null,
    Logical(Vec<bool>),
    Integer(Vec<i32>),
    Real(Vec<f64>),
    String(Vec<CharData>),
    List(Vec<Handle>),
    Pair {
        car: Handle,
        cdr: Handle,
        tag: Handle,
    },
    Lang {
        car: Handle,
        cdr: Handle,
    },
    Symbol(String),
    Env(EnvData),
    Closure {
        formals: Handle,
        body: Handle,
        env: Handle,
    },
    Builtin {
        name: String,
        func: BuiltinFn,
    },
    Promise(PromiseState),
    ExternalPtr {
        addr: usize,
        finalizer: Option<Finalizer>,
        on_exit: bool,
    },
    WeakRef {
        key: Handle,
        value: Handle,
        finalizer: Option<Finalizer>,
        on_exit: bool,
        cleared: bool,
    },
}

impl ObjData {
    pub(crate) fn tag(&self) -> Tag {
        match self {
            ObjData::Null => Tag::Null,
            ObjData::Logical(_) => Tag::Logical,
            ObjData::Integer(_) => Tag::Integer,
            ObjData::Real(_) => Tag::Real,
            ObjData::String(_) => Tag::String,
            ObjData::List(_) => Tag::List,
            ObjData::Pair { .. } => Tag::Pair,
            ObjData::Lang { .. } => Tag::Lang,
            ObjData::Symbol(_) => Tag::Symbol,
            ObjData::Env(_) => Tag::Env,
            ObjData::Closure { .. } => Tag::Closure,
            ObjData::Builtin { .. } => Tag::Builtin,
            ObjData::Promise(_) => Tag::Promise,
            ObjData::ExternalPtr { .. } => Tag::ExternalPtr,
            ObjData::WeakRef { .. } => Tag::WeakRef,
        }
    }
}

/// A heap object: payload plus its attribute list
pub(crate) struct Obj {
    pub data: ObjData,
    pub attrs: Vec<(String, Handle)>,
    marked: bool,
}

struct Slot {
    obj: Option<Obj>,
    generation: u32,
}

/// Collection statistics
#[derive(Debug, Clone, Copy, Default)]
pub struct GcStats {
    /// Collections run since the heap was created
    pub collections: u64,
    /// Objects reclaimed across all collections
    pub reclaimed: u64,
}

pub(crate) struct Heap {
    slots: Vec<Slot>,
    free: Vec<u32>,
    pub protect_stack: Vec<Handle>,
    pub preserved: Vec<Handle>,
    /// Never collected (null value, unbound sentinel)
    pub permanent: Vec<Handle>,
    null: Handle,
    allocs_since_gc: usize,
    gc_interval: usize,
    stats: GcStats,
}

impl Heap {
    pub fn new(gc_interval: usize) -> Self {
        Heap {
            slots: Vec::new(),
            free: Vec::new(),
            protect_stack: Vec::new(),
            preserved: Vec::new(),
            permanent: Vec::new(),
            null: Handle {
                index: 0,
                generation: 0,
            },
            allocs_since_gc: 0,
            gc_interval,
            stats: GcStats::default(),
        }
    }

    /// Record the null singleton; used when clearing weak references.
    pub fn set_null(&mut self, null: Handle) {
        self.null = null;
    }

    pub fn set_gc_interval(&mut self, interval: usize) {
        self.gc_interval = interval.max(1);
    }

    pub fn gc_due(&self) -> bool {
        self.allocs_since_gc + 1 >= self.gc_interval
    }

    pub fn stats(&self) -> GcStats {
        self.stats
    }

    pub fn live_objects(&self) -> usize {
        self.slots.iter().filter(|s| s.obj.is_some()).count()
    }

    pub fn alloc(&mut self, data: ObjData) -> Handle {
        self.allocs_since_gc += 1;
        let obj = Obj {
            data,
            attrs: Vec::new(),
            marked: false,
        };
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.obj = Some(obj);
            Handle {
                index,
                generation: slot.generation,
            }
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                obj: Some(obj),
                generation: 1,
            });
            Handle {
                index,
                generation: 1,
            }
        }
    }

    /// True if the handle still refers to a live object
    pub fn is_valid(&self, h: Handle) -> bool {
        self.slots
            .get(h.index as usize)
            .map(|s| s.generation == h.generation && s.obj.is_some())
            .unwrap_or(false)
    }

    pub fn get(&self, h: Handle) -> &Obj {
        let slot = self
            .slots
            .get(h.index as usize)
            .unwrap_or_else(|| panic!("invalid handle {:?}", h));
        if slot.generation != h.generation {
            panic!("stale handle {:?}: object was reclaimed", h);
        }
        slot.obj
            .as_ref()
            .unwrap_or_else(|| panic!("stale handle {:?}: object was reclaimed", h))
    }

    pub fn get_mut(&mut self, h: Handle) -> &mut Obj {
        let slot = self
            .slots
            .get_mut(h.index as usize)
            .unwrap_or_else(|| panic!("invalid handle {:?}", h));
        if slot.generation != h.generation {
            panic!("stale handle {:?}: object was reclaimed", h);
        }
        slot.obj
            .as_mut()
            .unwrap_or_else(|| panic!("stale handle {:?}: object was reclaimed", h))
    }

    // ========================================================================
    // Collection
    // ========================================================================

    /// Mark and sweep. Returns finalizers that must run once the heap
    /// borrow has been released.
    pub fn collect(&mut self, extra_roots: &[Handle]) -> Vec<Finalizer> {
        self.allocs_since_gc = 0;
        self.stats.collections += 1;

        for slot in &mut self.slots {
            if let Some(obj) = slot.obj.as_mut() {
                obj.marked = false;
            }
        }

        let mut worklist: Vec<Handle> = Vec::new();
        worklist.extend_from_slice(&self.permanent);
        worklist.extend_from_slice(&self.protect_stack);
        worklist.extend_from_slice(&self.preserved);
        worklist.extend_from_slice(extra_roots);

        while let Some(h) = worklist.pop() {
            if !self.is_valid(h) {
                continue;
            }
            let obj = self.get_mut(h);
            if obj.marked {
                continue;
            }
            obj.marked = true;
            let obj = self.get(h);
            for (_, v) in &obj.attrs {
                worklist.push(*v);
            }
            match &obj.data {
                ObjData::List(items) => worklist.extend_from_slice(items),
                ObjData::Pair { car, cdr, tag } => {
                    worklist.push(*car);
                    worklist.push(*cdr);
                    worklist.push(*tag);
                }
                ObjData::Lang { car, cdr } => {
                    worklist.push(*car);
                    worklist.push(*cdr);
                }
                ObjData::Env(env) => {
                    worklist.push(env.enclos);
                    for binding in env.frame.values() {
                        if let Binding::Value(v) = binding {
                            worklist.push(*v);
                        }
                    }
                }
                ObjData::Closure { formals, body, env } => {
                    worklist.push(*formals);
                    worklist.push(*body);
                    worklist.push(*env);
                }
                ObjData::Promise(PromiseState::Forced(v)) => worklist.push(*v),
                // Weak references do not trace key or value
                _ => {}
            }
        }

        let mut finalizers: Vec<Finalizer> = Vec::new();

        // Clear live weak references whose key died
        let null = self.null;
        for index in 0..self.slots.len() {
            let h = Handle {
                index: index as u32,
                generation: self.slots[index].generation,
            };
            let key = match self.slots[index].obj.as_ref() {
                Some(Obj {
                    data:
                        ObjData::WeakRef {
                            key,
                            cleared: false,
                            ..
                        },
                    marked: true,
                    ..
                }) => *key,
                _ => continue,
            };
            let key_alive = self
                .slots
                .get(key.index as usize)
                .and_then(|s| {
                    if s.generation == key.generation {
                        s.obj.as_ref()
                    } else {
                        None
                    }
                })
                .map(|o| o.marked)
                .unwrap_or(false);
            if !key_alive {
                if let ObjData::WeakRef {
                    key,
                    value,
                    finalizer,
                    cleared,
                    ..
                } = &mut self.get_mut(h).data
                {
                    *key = null;
                    *value = null;
                    *cleared = true;
                    if let Some(f) = finalizer.take() {
                        finalizers.push(f);
                    }
                }
            }
        }

        // Sweep
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if !slot.obj.as_ref().is_some_and(|o| !o.marked) {
                continue;
            }
            let Some(obj) = slot.obj.take() else { continue };
            if let ObjData::ExternalPtr {
                finalizer: Some(f), ..
            } = obj.data
            {
                finalizers.push(f);
            }
            slot.generation = slot.generation.wrapping_add(1);
            self.free.push(index as u32);
            self.stats.reclaimed += 1;
        }

        finalizers
    }

    /// Finalizers of still-live `on_exit` objects, for shutdown.
    pub fn take_exit_finalizers(&mut self) -> Vec<Finalizer> {
        let mut out = Vec::new();
        for slot in &mut self.slots {
            match slot.obj.as_mut().map(|o| &mut o.data) {
                Some(ObjData::WeakRef {
                    finalizer,
                    on_exit: true,
                    cleared: false,
                    ..
                })
                | Some(ObjData::ExternalPtr {
                    finalizer,
                    on_exit: true,
                    ..
                }) => {
                    if let Some(f) = finalizer.take() {
                        out.push(f);
                    }
                }
                _ => {}
            }
        }
        out
    }
}
