use std::sync::atomic::{AtomicU64, Ordering::Relaxed};
use std::sync::Arc;
use std::thread;

use ringq::{InvokeOnce, QueueBuilder};

fn main() {
    env_logger::init();

    let tasks: usize = std::env::args()
        .nth(1)
        .and_then(|arg| arg.parse().ok())
        .unwrap_or(100_000);

    println!("Task queue: {tasks} closures through an MCSP function queue, two workers");

    let queue = QueueBuilder::new()
        .with_capacity(1024)
        .with_buffer_bytes(64 * 1024)
        .with_max_readers(2)
        .build_function_mcsp::<(u64,), u64, InvokeOnce>()
        .expect("queue construction");
    let mut producer = queue.producer().expect("first producer");

    let executed = Arc::new(AtomicU64::new(0));
    let mut workers = Vec::new();
    for index in 0..2 {
        let queue = queue.clone();
        let executed = executed.clone();
        workers.push(thread::spawn(move || {
            let mut reader = queue.get_reader(index);
            while (executed.load(Relaxed) as usize) < tasks {
                let ran = reader.consume(|func| {
                    func.call((index as u64,));
                });
                if ran {
                    executed.fetch_add(1, Relaxed);
                } else {
                    thread::yield_now();
                }
            }
        }));
    }

    for i in 0..tasks {
        let weight = (i % 7) as u64;
        let mut task = move |worker: u64| weight.wrapping_mul(31).wrapping_add(worker);
        loop {
            match producer.push(task) {
                Ok(()) => break,
                Err(back) => {
                    task = back;
                    thread::yield_now();
                }
            }
        }
    }

    for worker in workers {
        worker.join().unwrap();
    }
    println!("executed: {}", executed.load(Relaxed));
}
