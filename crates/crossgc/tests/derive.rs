//! Tests for the `#[derive(Traverse)]` macro.

#![cfg(feature = "derive")]

use std::collections::HashMap;

use crossgc::{Collector, GcObject, ObjRef, Traverse};

fn referents(value: &dyn Traverse) -> Vec<ObjRef> {
    let mut out = Vec::new();
    value.traverse(&mut |r: ObjRef| out.push(r));
    out
}

fn handles(gc: &mut Collector, n: usize) -> Vec<ObjRef> {
    (0..n).map(|_| gc.heap_mut().alloc(Plain::default())).collect()
}

/// A struct without references.
#[derive(Traverse, Default)]
struct Plain {
    value: i32,
    name: String,
}

impl GcObject for Plain {
    fn type_name(&self) -> &'static str {
        "plain"
    }
}

/// Named fields of several shapes.
#[derive(Traverse, Default)]
struct Named {
    first: Option<ObjRef>,
    many: Vec<ObjRef>,
    by_key: HashMap<u32, ObjRef>,
    #[crossgc(skip)]
    borrowed: Option<ObjRef>,
}

impl GcObject for Named {
    fn type_name(&self) -> &'static str {
        "named"
    }
}

#[derive(Traverse)]
struct Pair(ObjRef, #[crossgc(skip)] ObjRef, u8);

#[derive(Traverse)]
enum Shape {
    Empty,
    One(ObjRef),
    Tagged {
        tag: String,
        target: ObjRef,
        #[crossgc(skip)]
        weak: ObjRef,
    },
}

#[derive(Traverse)]
struct Wrapper<T> {
    inner: T,
}

#[test]
fn test_derive_plain_struct() {
    let plain = Plain {
        value: 42,
        name: "leaf".to_owned(),
    };
    assert!(referents(&plain).is_empty());
    assert_eq!(plain.value, 42);
    assert_eq!(plain.name, "leaf");
}

#[test]
fn test_derive_named_fields_skip() {
    let mut gc = Collector::default();
    let h = handles(&mut gc, 4);
    let mut by_key = HashMap::new();
    by_key.insert(7, h[2]);
    let mut value = Named {
        first: Some(h[0]),
        many: vec![h[1], h[1]],
        by_key,
        borrowed: Some(h[3]),
    };
    assert_eq!(referents(&value), vec![h[0], h[1], h[1], h[2]]);

    let mut drained = Vec::new();
    value.drain_refs(&mut drained);
    assert_eq!(drained.len(), 4);
    assert!(referents(&value).is_empty());
    assert_eq!(value.borrowed, Some(h[3]));
}

#[test]
fn test_derive_tuple_struct() {
    let mut gc = Collector::default();
    let h = handles(&mut gc, 2);
    let pair = Pair(h[0], h[1], 3);
    assert_eq!(referents(&pair), vec![h[0]]);
    assert_eq!(pair.2, 3);
}

#[test]
fn test_derive_enum() {
    let mut gc = Collector::default();
    let h = handles(&mut gc, 3);
    assert!(referents(&Shape::Empty).is_empty());
    assert_eq!(referents(&Shape::One(h[0])), vec![h[0]]);
    let tagged = Shape::Tagged {
        tag: "t".to_owned(),
        target: h[1],
        weak: h[2],
    };
    assert_eq!(referents(&tagged), vec![h[1]]);
}

#[test]
fn test_derive_generic() {
    let mut gc = Collector::default();
    let h = handles(&mut gc, 2);
    let wrapped = Wrapper {
        inner: (h[0], Some(h[1])),
    };
    assert_eq!(referents(&wrapped), vec![h[0], h[1]]);
}

#[test]
fn test_derived_object_is_collected() {
    let mut gc = Collector::default();
    let heap = gc.heap_mut();
    let a = heap.alloc(Named::default());
    let b = heap.alloc(Named::default());
    heap.incref(b);
    heap.get_mut::<Named>(a).unwrap().first = Some(b);
    heap.incref(a);
    heap.get_mut::<Named>(b).unwrap().many.push(a);
    heap.decref(a);
    heap.decref(b);

    assert_eq!(gc.get_referents(a), vec![b]);
    assert_eq!(gc.collect(2).unwrap().collected, 2);
    assert_eq!(gc.heap().live_objects(), 0);
}
