use std::rc::Rc;

use serde::Serialize;

use super::shape::ShapeId;
use super::value::{Class, Closure, Native, Value};

// ---
// Site identifiers
// ---

/// Dense per-kind site index assigned by the compiler and encoded as the
/// instruction's u16 operand.
pub type SiteId = u16;

/// Number of sites of each kind in one compiled script.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SiteCounts {
    pub property_get: usize,
    pub property_set: usize,
    pub call: usize,
}

// ---
// Property sites
// ---

/// Single-entry cache for one property get or set instruction.
///
/// It never short-circuits the lookup: every access is a miss. The remembered
/// shape only tracks how often the receiver layout changes at this site.
#[derive(Debug, Clone, Default)]
pub struct PropertySite {
    shape: Option<ShapeId>,
    pub misses: u64,
    pub transitions: u64,
}

impl PropertySite {
    /// Record one access against a receiver of `shape`. Returns true when the
    /// remembered shape changed.
    pub fn observe(&mut self, shape: ShapeId) -> bool {
        self.misses += 1;
        if self.shape == Some(shape) {
            return false;
        }
        self.shape = Some(shape);
        self.transitions += 1;
        true
    }
}

// ---
// Call sites
// ---

/// Identity of a callee as seen by a call cache. Holds a strong reference so
/// a freed callee's address can never alias a new one.
#[derive(Clone)]
pub enum CallTarget {
    Closure(Rc<Closure>),
    Class(Rc<Class>),
    Native(Rc<Native>),
}

impl CallTarget {
    /// Callee key for `value`, or `None` if it is not callable. Bound methods
    /// key on their method, so re-extracting the same method keeps hitting.
    pub fn of(value: &Value) -> Option<Self> {
        match value {
            Value::Closure(closure) => Some(CallTarget::Closure(Rc::clone(closure))),
            Value::BoundMethod(bound) => Some(CallTarget::Closure(Rc::clone(&bound.method))),
            Value::Class(class) => Some(CallTarget::Class(Rc::clone(class))),
            Value::Native(native) => Some(CallTarget::Native(Rc::clone(native))),
            _ => None,
        }
    }

    fn same(&self, other: &CallTarget) -> bool {
        match (self, other) {
            (CallTarget::Closure(a), CallTarget::Closure(b)) => Rc::ptr_eq(a, b),
            (CallTarget::Class(a), CallTarget::Class(b)) => Rc::ptr_eq(a, b),
            (CallTarget::Native(a), CallTarget::Native(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallLookup {
    Hit,
    Miss,
}

/// Single-entry cache for one call instruction.
#[derive(Clone, Default)]
pub struct CallSite {
    target: Option<CallTarget>,
    pub hits: u64,
    pub misses: u64,
    pub transitions: u64,
}

impl CallSite {
    pub fn observe(&mut self, target: CallTarget) -> CallLookup {
        if let Some(cached) = &self.target {
            if cached.same(&target) {
                self.hits += 1;
                return CallLookup::Hit;
            }
        }
        self.misses += 1;
        self.transitions += 1;
        self.target = Some(target);
        CallLookup::Miss
    }
}

// ---
// Per-run cache set
// ---

/// All inline caches for one run, indexed by [`SiteId`].
#[derive(Default)]
pub struct InlineCaches {
    property_get: Vec<PropertySite>,
    property_set: Vec<PropertySite>,
    calls: Vec<CallSite>,
}

impl InlineCaches {
    pub fn new(counts: SiteCounts) -> Self {
        InlineCaches {
            property_get: vec![PropertySite::default(); counts.property_get],
            property_set: vec![PropertySite::default(); counts.property_set],
            calls: vec![CallSite::default(); counts.call],
        }
    }

    pub fn enabled() -> bool {
        cfg!(feature = "cache-stats")
    }

    pub fn property_get(&mut self, site: SiteId) -> Option<&mut PropertySite> {
        self.property_get.get_mut(site as usize)
    }

    pub fn property_set(&mut self, site: SiteId) -> Option<&mut PropertySite> {
        self.property_set.get_mut(site as usize)
    }

    pub fn call(&mut self, site: SiteId) -> Option<&mut CallSite> {
        self.calls.get_mut(site as usize)
    }

    /// Totals across every site.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            enabled: Self::enabled(),
            property_get_misses: self.property_get.iter().map(|s| s.misses).sum(),
            property_get_shape_transitions: self.property_get.iter().map(|s| s.transitions).sum(),
            property_set_misses: self.property_set.iter().map(|s| s.misses).sum(),
            property_set_shape_transitions: self.property_set.iter().map(|s| s.transitions).sum(),
            call_hits: self.calls.iter().map(|s| s.hits).sum(),
            call_misses: self.calls.iter().map(|s| s.misses).sum(),
            call_shape_transitions: self.calls.iter().map(|s| s.transitions).sum(),
        }
    }
}

/// Aggregated counters, serialized as the `CACHE_STATS` payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub enabled: bool,
    pub property_get_misses: u64,
    pub property_get_shape_transitions: u64,
    pub property_set_misses: u64,
    pub property_set_shape_transitions: u64,
    pub call_hits: u64,
    pub call_misses: u64,
    pub call_shape_transitions: u64,
}

impl CacheStats {
    /// The single stdout line reporting these counters.
    pub fn report_line(&self) -> String {
        let json = serde_json::to_string(self)
            .unwrap_or_else(|_| r#"{"enabled":false}"#.to_string());
        format!("CACHE_STATS {json}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::chunk::Chunk;
    use crate::vm::value::Function;

    fn closure(name: &str) -> Rc<Closure> {
        let function = Function { name: Some(Rc::from(name)), arity: 1, upvalue_count: 0, chunk: Chunk::new() };
        Rc::new(Closure { function: Rc::new(function), upvalues: Vec::new() })
    }

    #[test]
    fn property_site_stable_shape_is_monomorphic() {
        let mut site = PropertySite::default();
        let shape = ShapeId::EMPTY;
        for _ in 0..16 {
            site.observe(shape);
        }
        assert_eq!(site.misses, 16);
        assert_eq!(site.transitions, 1);
        assert!(!site.observe(shape));
    }

    #[test]
    fn property_site_counts_run_boundaries() {
        let mut table = crate::vm::shape::ShapeTable::new();
        let a = table.transition(ShapeId::EMPTY, &Rc::from("a"));
        let b = table.transition(ShapeId::EMPTY, &Rc::from("b"));
        let mut site = PropertySite::default();
        for _ in 0..10 {
            site.observe(a);
        }
        for _ in 0..10 {
            site.observe(b);
        }
        site.observe(a);
        assert_eq!(site.misses, 21);
        assert_eq!(site.transitions, 3);
    }

    #[test]
    fn call_site_same_callee_hits_after_first() {
        let f = closure("f");
        let mut site = CallSite::default();
        let first = site.observe(CallTarget::Closure(Rc::clone(&f)));
        assert_eq!(first, CallLookup::Miss);
        for _ in 1..12 {
            assert_eq!(site.observe(CallTarget::Closure(Rc::clone(&f))), CallLookup::Hit);
        }
        assert_eq!((site.hits, site.misses, site.transitions), (11, 1, 1));
    }

    #[test]
    fn call_site_runs_of_distinct_callees() {
        let callees = [closure("a"), closure("b"), closure("c")];
        let mut site = CallSite::default();
        for callee in &callees {
            for _ in 0..4 {
                site.observe(CallTarget::Closure(Rc::clone(callee)));
            }
        }
        assert_eq!(site.transitions, 3);
        assert_eq!(site.misses, 3);
        assert_eq!(site.hits, 9);
    }

    #[test]
    fn bound_methods_key_on_their_method() {
        let method = closure("m");
        let class = Rc::new(Class::new(Rc::from("C")));
        let receiver = Value::Instance(Rc::new(crate::vm::value::Instance::new(class)));
        let bind = || {
            Value::BoundMethod(Rc::new(crate::vm::value::BoundMethod {
                receiver: receiver.clone(),
                method: Rc::clone(&method),
            }))
        };
        let mut site = CallSite::default();
        for _ in 0..3 {
            let target = CallTarget::of(&bind()).map(|t| site.observe(t));
            assert!(target.is_some());
        }
        assert_eq!((site.hits, site.misses), (2, 1));
    }

    #[test]
    fn non_callables_have_no_target() {
        assert!(CallTarget::of(&Value::Nil).is_none());
        assert!(CallTarget::of(&Value::Number(1.0)).is_none());
    }

    #[test]
    fn stats_sum_over_sites() {
        let mut caches = InlineCaches::new(SiteCounts { property_get: 2, property_set: 1, call: 1 });
        if let Some(site) = caches.property_get(0) {
            site.observe(ShapeId::EMPTY);
        }
        if let Some(site) = caches.property_get(1) {
            site.observe(ShapeId::EMPTY);
            site.observe(ShapeId::EMPTY);
        }
        assert!(caches.property_get(2).is_none());
        let stats = caches.stats();
        assert_eq!(stats.property_get_misses, 3);
        assert_eq!(stats.property_get_shape_transitions, 2);
        assert_eq!(stats.property_set_misses, 0);
    }

    #[test]
    fn report_line_is_marker_plus_json() {
        let stats = CacheStats { enabled: true, call_hits: 4, ..CacheStats::default() };
        let line = stats.report_line();
        let payload = line.strip_prefix("CACHE_STATS ").expect("marker");
        let v: serde_json::Value = serde_json::from_str(payload).expect("valid JSON");
        assert_eq!(v["enabled"], true);
        assert_eq!(v["call_hits"], 4);
        assert_eq!(v["property_get_shape_transitions"], 0);
        assert_eq!(v.as_object().map(|o| o.len()), Some(8));
    }
}
