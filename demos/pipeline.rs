use std::thread;
use std::time::Instant;

use ringq::QueueBuilder;

fn main() {
    env_logger::init();

    let messages: u64 = std::env::args()
        .nth(1)
        .and_then(|arg| arg.parse().ok())
        .unwrap_or(1_000_000);

    println!("Pipeline: sending {messages} integers through an SCSP object queue");

    let queue = QueueBuilder::new()
        .with_capacity(4096)
        .with_wait(true)
        .build_object_scsp::<u64>()
        .expect("queue construction");
    let (mut producer, mut consumer) = queue.split();

    let start = Instant::now();

    let writer = thread::spawn(move || {
        for i in 0..messages {
            let mut value = i;
            while let Err(v) = producer.push(value) {
                value = v;
                std::hint::spin_loop();
            }
        }
    });

    let reader = thread::spawn(move || {
        let mut received = 0u64;
        let mut checksum = 0u64;
        while received < messages {
            let drained = consumer.consume_all(|v| checksum = checksum.wrapping_add(v));
            if drained == 0 {
                consumer.wait();
            }
            received += drained as u64;
        }
        checksum
    });

    writer.join().unwrap();
    let checksum = reader.join().unwrap();
    let elapsed = start.elapsed();

    println!("checksum: {checksum}");
    println!(
        "throughput: {:.2} million msgs/sec",
        messages as f64 / elapsed.as_secs_f64() / 1_000_000.0
    );
}
