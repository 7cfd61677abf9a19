use std::env;

use gc_acceptor::{Collector, DefaultLogger, GcBox, GcPointerBase, GcSymbolId, GcValue, RawPtr,
                  Slot, SlotVisitor, SymbolId, Trace, Value, WeakRef};


/// A script object: a prototype link, a property table, and an optional weak cache entry.
struct Object {
    proto: GcPointerBase,
    properties: Vec<(GcSymbolId, GcValue)>,
    cache: Option<WeakRef>,
}


unsafe impl Trace for Object {
    fn traversible(&self) -> bool {
        true
    }

    fn trace(&mut self, visitor: &mut dyn SlotVisitor) {
        visitor.visit(Some("__proto__"), Slot::Pointer(&mut self.proto));

        for &mut (key, ref mut value) in self.properties.iter_mut() {
            visitor.visit(Some("key"), Slot::Symbol(key));
            visitor.visit(Some("value"), Slot::Value(value));
        }

        if let Some(ref mut cache) = self.cache {
            visitor.visit(None, Slot::Weak(cache));
        }
    }

    fn kind(&self) -> &str {
        "Object"
    }

    fn size(&self) -> usize {
        std::mem::size_of::<Object>() +
        self.properties.capacity() * std::mem::size_of::<(GcSymbolId, GcValue)>()
    }
}


fn object(gc: &mut Collector<DefaultLogger>, proto: RawPtr, properties: &[(SymbolId, Value)])
          -> RawPtr {
    let proto = GcPointerBase::new(gc.heap(), proto);
    let properties = properties.iter()
        .map(|&(key, value)| (GcSymbolId::new(key), GcValue::new(value)))
        .collect();

    GcBox::as_raw(gc.alloc(Object {
        proto,
        properties,
        cache: None,
    }))
}


fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let path = env::args().nth(1).unwrap_or_else(|| "demo.heapsnapshot".to_string());

    let mut gc = Collector::new();

    let length = gc.identifiers_mut().intern_pinned("length");
    let name = gc.identifiers_mut().intern("name");
    let greeting = GcBox::as_raw(gc.alloc(String::from("hello, world")));

    let proto = object(&mut gc, std::ptr::null_mut(), &[(length, Value::Number(0.0))]);
    let first = object(&mut gc, proto, &[(name, Value::Pointer(greeting))]);
    let second = object(&mut gc, proto, &[(length, Value::Number(2.5)),
                                          (name, Value::Symbol(name))]);

    // a weak cache entry pointing at a cell that will not survive the collection
    let doomed = object(&mut gc, proto, &[]);
    let cache = gc.heap_mut().alloc_weak_ref(Value::Pointer(doomed));
    unsafe { (&mut *(second as *mut GcBox<Object>)).cache = Some(cache) };

    gc.roots_mut().push_register(Value::Pointer(first));
    gc.roots_mut().push_register(Value::Pointer(first));
    gc.roots_mut().set_global("second", Value::Pointer(second));
    gc.roots_mut().set_global("answer", Value::Bool(true));

    match gc.collect() {
        Ok(stats) => log::info!("{:?}", stats),
        Err(e) => log::error!("collection failed: {}", e),
    }

    let counts = gc.count_references();
    log::info!("{} references reported, {} of them pointer slots", counts.total(), counts.pointers);

    if let Err(e) = gc.write_snapshot_to_file(&path) {
        log::error!("{}", e);
        std::process::exit(1);
    }
}
