use std::collections::HashMap;
use std::rc::Rc;

/// Identity of an interned shape. Two instances that added the same fields in
/// the same order hold equal ids, so shape comparison is an integer compare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShapeId(u32);

impl ShapeId {
    /// The shape with no fields; every instance starts here.
    pub const EMPTY: ShapeId = ShapeId(0);

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

struct Shape {
    fields: Vec<Rc<str>>,
    slots: HashMap<Rc<str>, usize>,
}

/// Transition graph of all shapes created during one run.
///
/// Shapes are append-only and never freed; the table is keyed by
/// `(predecessor, field)` so each ordered field history maps to one node.
pub struct ShapeTable {
    shapes: Vec<Shape>,
    transitions: HashMap<(ShapeId, Rc<str>), ShapeId>,
}

impl Default for ShapeTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ShapeTable {
    pub fn new() -> Self {
        let root = Shape { fields: Vec::new(), slots: HashMap::new() };
        ShapeTable { shapes: vec![root], transitions: HashMap::new() }
    }

    fn get(&self, id: ShapeId) -> &Shape {
        &self.shapes[id.index()]
    }

    pub fn len(&self) -> usize {
        self.shapes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }

    /// Slot index of `field` under `shape`, if the shape has it.
    pub fn slot(&self, shape: ShapeId, field: &str) -> Option<usize> {
        self.get(shape).slots.get(field).copied()
    }

    /// Ordered field names of `shape`.
    pub fn fields(&self, shape: ShapeId) -> &[Rc<str>] {
        &self.get(shape).fields
    }

    /// Successor of `shape` after appending `field`. Returns `shape` itself
    /// when the field is already present.
    pub fn transition(&mut self, shape: ShapeId, field: &Rc<str>) -> ShapeId {
        if self.get(shape).slots.contains_key(field) {
            return shape;
        }
        let key = (shape, Rc::clone(field));
        if let Some(next) = self.transitions.get(&key) {
            return *next;
        }

        let base = self.get(shape);
        let mut fields = base.fields.clone();
        let mut slots = base.slots.clone();
        slots.insert(Rc::clone(field), fields.len());
        fields.push(Rc::clone(field));

        let next = ShapeId(self.shapes.len() as u32);
        log::trace!("shape {} + '{}' -> shape {}", shape.0, field, next.0);
        self.shapes.push(Shape { fields, slots });
        self.transitions.insert(key, next);
        next
    }
}
