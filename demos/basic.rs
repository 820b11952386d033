use brkalloc::{Heap, Reservation};

fn log_alloc(label: &str, addr: *mut u8, size: usize) {
    println!("[{label}] requested {size} bytes, received {addr:?}");
}

fn main() {
    let reservation = Reservation::new(1 << 20).expect("failed to reserve address space");
    let mut heap = Heap::with_break(reservation);

    let first = heap.allocate(100).expect("out of memory");
    log_alloc("allocate", first.as_ptr(), 100);

    let second = heap.allocate(200).expect("out of memory");
    log_alloc("allocate", second.as_ptr(), 200);

    unsafe {
        heap.release(first.as_ptr());
        heap.release(second.as_ptr());
    }
    println!("released both blocks: {:?}", heap.stats());

    // Both blocks were merged, so this fits where the first one was.
    let merged = heap.allocate(320).expect("out of memory");
    log_alloc("allocate", merged.as_ptr(), 320);
    println!("reused first block: {}", merged == first);

    let zeroed = heap.zero_allocate(10, 4).expect("out of memory");
    log_alloc("zero_allocate", zeroed.as_ptr(), 40);

    let grown = unsafe { heap.resize(zeroed.as_ptr(), 1000) }.expect("out of memory");
    println!("[resize] 40 -> 1000 bytes, now at {grown:?}");

    for block in heap.blocks() {
        println!(
            "  {:p} {:>6} bytes {}",
            block.payload,
            block.size,
            if block.free { "free" } else { "used" }
        );
    }

    println!("{:?}", heap.check().expect("heap invariants violated"));
}
