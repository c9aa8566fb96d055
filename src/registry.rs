//! In-memory [`InstrumentationPolicy`] backed by trace requests.
//!
//! Requests select methods by pattern. When a class is classified, every
//! matching method gets a tracepoint id; ids are handed out in order of
//! first registration and never reused, so the trampoline can index its own
//! per-method state by id. Later requests override earlier ones for the
//! same method.
//!
//! Changes made through the runtime API affect classes transformed
//! afterwards. Already loaded classes keep the code they were given.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::args::CaptureMask;
use crate::config::{normalize, ConfigError, TraceRequest, TracerConfig};
use crate::policy::{InstrumentationPolicy, MethodSignature, PolicyError, Tracepoint};

/// Fully qualified method, e.g. `com/example/Calc.divide(II)I`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodKey {
    pub class: String,
    pub name: String,
    pub descriptor: String,
}

impl MethodKey {
    pub fn new(class: impl Into<String>, name: impl Into<String>, descriptor: impl Into<String>) -> Self {
        Self { class: class.into(), name: name.into(), descriptor: descriptor.into() }
    }
}

impl fmt::Display for MethodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}{}", self.class, self.name, self.descriptor)
    }
}

#[derive(Debug)]
struct Entry {
    method: MethodKey,
    enabled: bool,
    capture: Option<CaptureMask>,
}

#[derive(Debug, Default)]
struct State {
    requests: Vec<(TraceRequest, Option<CaptureMask>)>,
    ids: HashMap<MethodKey, i32>,
    entries: Vec<Entry>,
    classes: HashSet<String>,
}

impl State {
    fn register(&mut self, method: MethodKey, enabled: bool, capture: Option<CaptureMask>) -> i32 {
        if let Some(&id) = self.ids.get(&method) {
            let entry = &mut self.entries[id as usize];
            entry.enabled = enabled;
            entry.capture = capture;
            return id;
        }
        let id = self.entries.len() as i32;
        self.classes.insert(method.class.clone());
        self.ids.insert(method.clone(), id);
        self.entries.push(Entry { method, enabled, capture });
        id
    }

    fn entry_mut(&mut self, id: i32) -> Option<&mut Entry> {
        usize::try_from(id).ok().and_then(|i| self.entries.get_mut(i))
    }
}

#[derive(Debug, Default)]
pub struct TracepointRegistry {
    exclude: Vec<String>,
    state: RwLock<State>,
}

impl TracepointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &TracerConfig) -> Result<Self, ConfigError> {
        let registry = Self { exclude: config.exclude.iter().map(|p| normalize(p)).collect(), ..Self::default() };
        for request in &config.trace {
            registry.add_request(request.clone())?;
        }
        Ok(registry)
    }

    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a pattern request. It applies to methods already registered and
    /// to every class classified from now on.
    pub fn add_request(&self, request: TraceRequest) -> Result<(), ConfigError> {
        request.validate()?;
        let capture = request.capture_mask()?;
        let mut state = self.write();
        for entry in &mut state.entries {
            if request.matches_class(&entry.method.class)
                && request.matches_method(&entry.method.name, &entry.method.descriptor)
            {
                entry.enabled = request.enabled;
                entry.capture = capture;
            }
        }
        state.requests.push((request, capture));
        Ok(())
    }

    /// Register and enable one method, returning its id.
    pub fn trace(&self, method: MethodKey, capture: Option<CaptureMask>) -> i32 {
        self.write().register(method, true, capture)
    }

    /// Disable a method's tracepoint. Returns its id if it was registered.
    pub fn untrace(&self, method: &MethodKey) -> Option<i32> {
        let mut state = self.write();
        let id = *state.ids.get(method)?;
        if let Some(entry) = state.entry_mut(id) {
            entry.enabled = false;
        }
        Some(id)
    }

    /// Returns `false` for an unknown id.
    pub fn set_enabled(&self, id: i32, enabled: bool) -> bool {
        match self.write().entry_mut(id) {
            Some(entry) => {
                entry.enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// Returns `false` for an unknown id.
    pub fn set_capture(&self, id: i32, capture: Option<CaptureMask>) -> bool {
        match self.write().entry_mut(id) {
            Some(entry) => {
                entry.capture = capture;
                true
            }
            None => false,
        }
    }

    pub fn tracepoint(&self, id: i32) -> Option<Tracepoint> {
        let state = self.read();
        let entry = usize::try_from(id).ok().and_then(|i| state.entries.get(i))?;
        Some(Tracepoint { id, enabled: entry.enabled, capture: entry.capture })
    }

    /// The method a tracepoint id was assigned to.
    pub fn method_for(&self, id: i32) -> Option<MethodKey> {
        let state = self.read();
        usize::try_from(id).ok().and_then(|i| state.entries.get(i)).map(|e| e.method.clone())
    }

    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_excluded(&self, class: &str) -> bool {
        self.exclude.iter().any(|prefix| class.starts_with(prefix.as_str()))
    }
}

impl InstrumentationPolicy for TracepointRegistry {
    fn should_instrument_class(&self, class: &str) -> bool {
        if self.is_excluded(class) {
            return false;
        }
        let state = self.read();
        state.classes.contains(class) || state.requests.iter().any(|(r, _)| r.matches_class(class))
    }

    fn classify(&self, class: &str, methods: &[MethodSignature]) {
        let mut state = self.write();
        let mut matched = Vec::new();
        for (request, capture) in &state.requests {
            if !request.matches_class(class) {
                continue;
            }
            for method in methods {
                if request.matches_method(&method.name, &method.descriptor) {
                    matched.push((MethodKey::new(class, &method.name, &method.descriptor), request.enabled, *capture));
                }
            }
        }
        for (method, enabled, capture) in matched {
            let id = state.register(method, enabled, capture);
            log::trace!("tracepoint {id} -> {}", state.entries[id as usize].method);
        }
    }

    fn lookup_tracepoint(
        &self,
        class: &str,
        method: &str,
        descriptor: &str,
    ) -> Result<Option<Tracepoint>, PolicyError> {
        let state = self.read();
        let key = MethodKey::new(class, method, descriptor);
        let Some(&id) = state.ids.get(&key) else {
            return Ok(None);
        };
        let entry = state
            .entries
            .get(id as usize)
            .ok_or_else(|| PolicyError(format!("tracepoint {id} has no entry")))?;
        Ok(Some(Tracepoint { id, enabled: entry.enabled, capture: entry.capture }))
    }
}
