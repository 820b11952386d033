//! This example installs the allocator as the global allocator. Every `Box`,
//! `Vec` and `String` below lives on the process break.

use std::thread;

use brkalloc::BrkAlloc;

#[global_allocator]
static ALLOCATOR: BrkAlloc = BrkAlloc::new();

fn main() {
    // Box example
    let val_box = Box::new(22);
    println!("Box Value: {}, At: {:p}", val_box, val_box);

    // Vec example
    let mut v = Vec::new();
    for i in 0..5 {
        v.push(i * 10);
        println!("Added {}; Capacity: {}; At: {:p}", v[i], v.capacity(), v.as_ptr());
    }

    // String example
    let msg = String::from("Heap Testing");
    println!("\nString '{}' - At: {:p}", msg, msg.as_ptr());

    // Merge example
    let a = Box::new([0u8; 64]);
    let b = Box::new([0u8; 64]);
    let ptr_a = a.as_ptr();

    drop(a);
    drop(b);

    let c = Box::new([0u8; 128]);
    let ptr_c = c.as_ptr();

    if ptr_a == ptr_c {
        println!("Correctly reused at {:p}", ptr_c);
    } else {
        println!("Not reused. A was at {:p} and C is at {:p}", ptr_a, ptr_c);
    }

    // Over-aligned example
    #[repr(align(64))]
    struct CacheLine([u8; 64]);

    let line = Box::new(CacheLine([1; 64]));
    println!("64-byte aligned value at {:p} (first byte {})", &*line, line.0[0]);

    // Thread example
    let workers: Vec<_> = (0..2)
        .map(|i| thread::spawn(move || Box::new(i * 111)))
        .collect();

    for worker in workers {
        println!("Thread result: {}", worker.join().unwrap());
    }

    let stats = ALLOCATOR.lock().stats();
    println!("\n{stats:?}");
}
