use std::cell::RefCell;
use std::fmt::Display;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::func::Function;
use crate::value::Value;
use crate::Shared;

/// Key prefix of positional ("array") slots.
pub const INDEX_PREFIX: char = '#';
/// Field names starting with this are private to their object.
pub const PRIVATE_PREFIX: char = '_';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClassId(pub usize);

/// Cheap reference to a class record living in the interpreter's arena.
#[derive(Debug, Clone)]
pub struct ClassHandle {
    pub id: ClassId,
    pub name: Rc<str>,
}

impl PartialEq for ClassHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

#[derive(Debug, Default)]
pub struct SimiClass {
    pub name: Rc<str>,
    pub superclasses: Vec<ClassId>,
    pub constants: IndexMap<String, Value>,
    methods: IndexMap<(String, usize), Rc<Function>>,
    pub annotations: Vec<Value>,
    pub mutable_instances: bool,
}

impl SimiClass {
    pub fn new(name: impl AsRef<str>, superclasses: Vec<ClassId>) -> Self {
        Self { name: Rc::from(name.as_ref()), superclasses, ..Default::default() }
    }

    pub fn add_method(&mut self, name: &str, method: Rc<Function>) {
        self.methods.insert((name.to_owned(), method.arity()), method);
    }

    /// Exact-arity match, or the first overload with that name when the arity
    /// is unknown.
    pub fn own_method(&self, name: &str, arity: Option<usize>) -> Option<Rc<Function>> {
        match arity {
            Some(arity) => self.methods.get(&(name.to_owned(), arity)).cloned(),
            None => self.methods.iter().find(|((n, _), _)| n == name).map(|(_, m)| m.clone()),
        }
    }

    pub fn methods(&self) -> impl Iterator<Item = (&(String, usize), &Rc<Function>)> {
        self.methods.iter()
    }

    pub fn has_method(&self, name: &str, arity: usize) -> bool {
        self.methods.contains_key(&(name.to_owned(), arity))
    }

    pub fn has_method_named(&self, name: &str) -> bool {
        self.methods.keys().any(|(n, _)| n == name)
    }
}

/// Class records addressed by stable indices.
#[derive(Debug, Default)]
pub struct ClassArena {
    classes: Vec<SimiClass>,
}

impl ClassArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self, class: SimiClass) -> ClassHandle {
        let id = ClassId(self.classes.len());
        let name = class.name.clone();
        self.classes.push(class);
        ClassHandle { id, name }
    }

    pub fn get(&self, id: ClassId) -> &SimiClass {
        &self.classes[id.0]
    }

    pub fn get_mut(&mut self, id: ClassId) -> &mut SimiClass {
        &mut self.classes[id.0]
    }

    pub fn handle(&self, id: ClassId) -> ClassHandle {
        ClassHandle { id, name: self.get(id).name.clone() }
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Depth-first, left-to-right order over `id` and its superclasses.
    /// A class reachable through two paths is visited once, at its first
    /// occurrence.
    pub fn lookup_order(&self, id: ClassId) -> Vec<ClassId> {
        let mut order = vec![];
        let mut stack = vec![id];

        while let Some(current) = stack.pop() {
            if order.contains(&current) {
                continue;
            }
            order.push(current);
            for superclass in self.get(current).superclasses.iter().rev() {
                stack.push(*superclass);
            }
        }

        order
    }

    pub fn find_method(&self, id: ClassId, name: &str, arity: Option<usize>) -> Option<Rc<Function>> {
        self.lookup_order(id).into_iter().find_map(|c| self.get(c).own_method(name, arity))
    }

    /// Like `find_method` but skips `id` itself. Used for `super` dispatch.
    pub fn find_super_method(
        &self,
        id: ClassId,
        name: &str,
        arity: Option<usize>,
    ) -> Option<Rc<Function>> {
        self.lookup_order(id).into_iter().skip(1).find_map(|c| self.get(c).own_method(name, arity))
    }

    pub fn find_constant(&self, id: ClassId, name: &str) -> Option<Value> {
        self.lookup_order(id).into_iter().find_map(|c| self.get(c).constants.get(name).cloned())
    }

    /// Copies methods and constants of `source` that `target` lacks.
    pub fn mix_in(&mut self, target: ClassId, source: ClassId) {
        let methods: Vec<_> =
            self.get(source).methods().map(|((name, _), m)| (name.clone(), m.clone())).collect();
        let constants: Vec<_> =
            self.get(source).constants.iter().map(|(k, v)| (k.clone(), v.clone())).collect();

        let class = self.get_mut(target);
        for (name, method) in methods {
            if !class.has_method(&name, method.arity()) {
                class.add_method(&name, method);
            }
        }
        for (name, value) in constants {
            class.constants.entry(name).or_insert(value);
        }
    }

    pub fn has_init(&self, id: ClassId) -> bool {
        self.lookup_order(id).into_iter().any(|c| self.get(c).has_method_named("init"))
    }
}

#[derive(Debug, Default)]
pub struct SimiObject {
    pub class: Option<ClassHandle>,
    fields: IndexMap<String, Value>,
    pub immutable: bool,
}

impl SimiObject {
    pub fn new(class: Option<ClassHandle>, immutable: bool) -> Self {
        Self { class, fields: IndexMap::new(), immutable }
    }

    pub fn array(values: Vec<Value>, immutable: bool) -> Self {
        let mut object = Self::new(None, immutable);
        for value in values {
            object.push(value);
        }
        object
    }

    pub fn into_shared(self) -> Shared<SimiObject> {
        Rc::new(RefCell::new(self))
    }

    /// Translates a field name into its storage key. Decimal integers map to
    /// positional slots.
    pub fn key_for(name: &str) -> String {
        if !name.is_empty() && name.chars().all(|c| c.is_ascii_digit()) {
            let index = name.trim_start_matches('0');
            format!("{INDEX_PREFIX}{}", if index.is_empty() { "0" } else { index })
        } else {
            name.to_owned()
        }
    }

    pub fn index_key(index: usize) -> String {
        format!("{INDEX_PREFIX}{index}")
    }

    pub fn is_private(key: &str) -> bool {
        key.starts_with(PRIVATE_PREFIX)
    }

    /// Every key is positional. Scans all fields on each call.
    pub fn is_array(&self) -> bool {
        self.fields.keys().all(|k| k.starts_with(INDEX_PREFIX))
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.fields.get(key).cloned()
    }

    /// Raw write without privacy or mutability gating. Writing `nil` removes
    /// the field.
    pub fn set(&mut self, key: &str, value: Value) {
        if value.is_nil() {
            self.fields.shift_remove(key);
        } else {
            self.fields.insert(key.to_owned(), value);
        }
    }

    /// Appends after the highest positional slot. Slots freed by writing
    /// `nil` are never reused.
    pub fn push(&mut self, value: Value) {
        let next = self
            .fields
            .keys()
            .filter_map(|k| k.strip_prefix(INDEX_PREFIX)?.parse::<usize>().ok())
            .max()
            .map_or(0, |last| last + 1);
        self.fields.insert(Self::index_key(next), value);
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn values(&self) -> Vec<Value> {
        self.fields.values().cloned().collect()
    }

    /// Keys as the language sees them: positional slots become integers.
    pub fn keys(&self) -> Vec<Value> {
        self.fields
            .keys()
            .map(|k| match k.strip_prefix(INDEX_PREFIX).and_then(|i| i.parse::<i64>().ok()) {
                Some(index) => Value::Integer(index),
                None => Value::Str(k.clone()),
            })
            .collect()
    }

    /// Arrays test value membership, other objects test string keys.
    pub fn contains(&self, needle: &Value) -> Result<bool, String> {
        if self.is_array() {
            return Ok(self.fields.values().any(|v| v == needle));
        }

        match needle {
            Value::Str(key) => Ok(self.fields.contains_key(key)),
            other => Err(format!("Object keys are strings, got {}.", other.type_name())),
        }
    }

    pub fn fields(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter()
    }
}

impl SimiObject {
    /// `visiting` holds the objects already being written further up, which
    /// print as `[...]`.
    fn write_nested(&self, f: &mut std::fmt::Formatter<'_>, visiting: &mut Vec<*const SimiObject>) -> std::fmt::Result {
        let this = self as *const SimiObject;
        if visiting.contains(&this) {
            return write!(f, "[...]");
        }
        visiting.push(this);

        if let Some(class) = &self.class {
            write!(f, "{}", class.name)?;
        }

        let array = self.is_array();
        write!(f, "[")?;
        for (i, (key, value)) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            if !array {
                write!(f, "{key} = ")?;
            }
            match value {
                Value::Str(s) => write!(f, "{s:?}")?,
                Value::Object(object) => match object.try_borrow() {
                    Ok(object) => object.write_nested(f, visiting)?,
                    Err(_) => write!(f, "[...]")?,
                },
                other => write!(f, "{other}")?,
            }
        }
        write!(f, "]")?;

        visiting.pop();
        Ok(())
    }
}

impl Display for SimiObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.write_nested(f, &mut vec![])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_first_left_to_right_lookup() {
        let mut arena = ClassArena::new();
        let d = arena.alloc(SimiClass::new("D", vec![]));
        let b = arena.alloc(SimiClass::new("B", vec![d.id]));
        let c = arena.alloc(SimiClass::new("C", vec![]));
        let a = arena.alloc(SimiClass::new("A", vec![b.id, c.id]));

        assert_eq!(arena.lookup_order(a.id), vec![a.id, b.id, d.id, c.id]);
    }

    #[test]
    fn diamond_visits_shared_base_once() {
        let mut arena = ClassArena::new();
        let base = arena.alloc(SimiClass::new("Base", vec![]));
        let left = arena.alloc(SimiClass::new("Left", vec![base.id]));
        let right = arena.alloc(SimiClass::new("Right", vec![base.id]));
        let child = arena.alloc(SimiClass::new("Child", vec![left.id, right.id]));

        assert_eq!(arena.lookup_order(child.id), vec![child.id, left.id, base.id, right.id]);
    }

    #[test]
    fn mixins_fill_only_missing_members() {
        let mut arena = ClassArena::new();
        let source = arena.alloc(SimiClass::new("Source", vec![]));
        let target = arena.alloc(SimiClass::new("Target", vec![]));
        arena.get_mut(source.id).constants.insert("A".to_owned(), Value::Integer(1));
        arena.get_mut(source.id).constants.insert("B".to_owned(), Value::Integer(2));
        arena.get_mut(target.id).constants.insert("A".to_owned(), Value::Integer(10));

        arena.mix_in(target.id, source.id);

        assert_eq!(arena.find_constant(target.id, "A"), Some(Value::Integer(10)));
        assert_eq!(arena.find_constant(target.id, "B"), Some(Value::Integer(2)));
    }

    #[test]
    fn numeric_names_map_to_positional_slots() {
        assert_eq!(SimiObject::key_for("0"), "#0");
        assert_eq!(SimiObject::key_for("012"), "#12");
        assert_eq!(SimiObject::key_for("name"), "name");
    }

    #[test]
    fn array_detection_scans_keys() {
        let mut object = SimiObject::array(vec![Value::Integer(1), Value::Integer(2)], false);
        assert!(object.is_array());
        assert_eq!(object.contains(&Value::Integer(2)), Ok(true));

        object.set("name", Value::from("x"));
        assert!(!object.is_array());
        assert_eq!(object.contains(&Value::from("name")), Ok(true));
        assert!(object.contains(&Value::Integer(1)).is_err());
    }

    #[test]
    fn setting_nil_removes_field() {
        let mut object = SimiObject::new(None, false);
        object.set("a", Value::Integer(1));
        object.set("a", Value::Nil);
        assert!(object.is_empty());
    }

    #[test]
    fn push_appends_past_removed_slots() {
        let mut array = SimiObject::array(vec![Value::Integer(1), Value::Integer(2), Value::Integer(3)], false);
        array.set(&SimiObject::key_for("1"), Value::Nil);
        array.push(Value::Integer(4));

        assert_eq!(array.len(), 3);
        assert_eq!(array.values(), vec![Value::Integer(1), Value::Integer(3), Value::Integer(4)]);
        assert_eq!(array.get("#3"), Some(Value::Integer(4)));
    }

    #[test]
    fn self_referencing_objects_print_a_placeholder() {
        let array = SimiObject::array(vec![Value::Integer(1)], false).into_shared();
        array.borrow_mut().push(Value::Object(array.clone()));

        assert_eq!(Value::Object(array.clone()).to_string(), "[1, [...]]");

        let outer = SimiObject::array(vec![Value::Object(array.clone()), Value::Object(array)], true);
        assert_eq!(outer.to_string(), "[[1, [...]], [1, [...]]]");
    }

    #[test]
    fn display_formats() {
        let array = SimiObject::array(vec![Value::Integer(1), Value::from("two")], true);
        assert_eq!(array.to_string(), "[1, \"two\"]");

        let mut object = SimiObject::new(None, true);
        object.set("a", Value::Integer(1));
        assert_eq!(object.to_string(), "[a = 1]");
    }
}
