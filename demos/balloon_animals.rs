use gc_acceptor::{Collector, DefaultLogger, GcBox, GcPointer, Slot, SlotVisitor, StatsLogger,
                  Trace};


struct Segment {
    next: GcPointer<GcBox<Segment>>,
}


unsafe impl Trace for Segment {
    fn traversible(&self) -> bool {
        true
    }

    fn trace(&mut self, visitor: &mut dyn SlotVisitor) {
        visitor.visit(Some("next"), Slot::Pointer(&mut self.next));
    }

    fn kind(&self) -> &str {
        "Segment"
    }
}


type SegmentPtr = *mut GcBox<Segment>;


struct Balloon {
    head: SegmentPtr,
    tail: SegmentPtr,
}


impl Balloon {
    fn inflate(gc: &mut Collector<DefaultLogger>) -> Balloon {
        let body = gc.alloc(Segment { next: GcPointer::null() });
        Balloon {
            head: body,
            tail: body,
        }
    }

    fn twist(&mut self, gc: &mut Collector<DefaultLogger>) {
        let next = GcPointer::new(gc.heap(), self.head);
        self.head = gc.alloc(Segment { next });
    }

    fn complete(&mut self, gc: &Collector<DefaultLogger>) {
        unsafe { (&mut *self.tail).next.set(gc.heap(), self.head) };
    }

    fn count(&self, gc: &Collector<DefaultLogger>) -> usize {
        let mut count = 0;
        let mut current = self.head;

        loop {
            current = unsafe { (&*current).next.get(gc.heap()) };
            count += 1;

            if current == self.tail {
                break;
            }
        }

        count
    }
}


fn snake(gc: &mut Collector<DefaultLogger>) {
    // this many snake balloons
    for snake in 0..500 {
        let mut balloon = Balloon::inflate(gc);
        gc.roots_mut().push_handle(GcBox::as_raw(balloon.tail));

        // with this many segments each
        for _segment in 0..1000 {
            balloon.twist(gc);
        }

        balloon.complete(gc);

        let count = balloon.count(gc);
        if count != 1000 {
            println!("snake is short - only {} segments", count);
        }

        // the previous snake is unreachable now
        if snake % 50 == 0 {
            match gc.collect() {
                Ok(stats) => log::debug!("{:?}", stats),
                Err(e) => log::error!("collection failed: {}", e),
            }
        }

        gc.roots_mut().pop_handle();
    }
}


fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut gc = Collector::new();

    snake(&mut gc);

    // everything is unrooted now
    if let Err(e) = gc.collect() {
        log::error!("final collection failed: {}", e);
    }

    let logger = gc.shutdown();
    logger.log(&logger.dump());
}
