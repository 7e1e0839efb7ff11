// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Throughput demo for PipeQueue.
//
// Usage:
//   demo_msg_que [seconds]    (default 5)
//
// Forks one consumer process, then sends random-sized messages
// (128 B - 16 KB) from the parent as fast as possible. Both sides print
// throughput every second. An empty message tells the consumer to stop.
// Ctrl-C ends the run early.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use pipe_ipc::{Error, PipeQueue, Process, QueueConfig, RawBytes};

const MIN_SZ: usize = 128;
const MAX_SZ: usize = 1024 * 16;

static QUIT: AtomicBool = AtomicBool::new(false);

fn str_of_size(sz: usize) -> String {
    if sz > 1024 * 1024 {
        format!("{} MB", sz / (1024 * 1024))
    } else if sz > 1024 {
        format!("{} KB", sz / 1024)
    } else {
        format!("{sz} bytes")
    }
}

fn counting_thread(tag: &'static str, stop: Arc<AtomicBool>, counter: Arc<AtomicUsize>) {
    let mut i = 1usize;
    while !stop.load(Ordering::Acquire) {
        thread::sleep(Duration::from_millis(100));
        i += 1;
        if i % 10 != 0 {
            continue;
        }
        i = 0;
        let bytes = counter.swap(0, Ordering::Relaxed);
        println!("{tag}: {}/s", str_of_size(bytes));
    }
}

fn do_recv(que: &PipeQueue<Vec<u8>, RawBytes>) -> i32 {
    println!("do_recv: start (pid {})...", std::process::id());

    let stop = Arc::new(AtomicBool::new(false));
    let counter = Arc::new(AtomicUsize::new(0));
    let counting = {
        let (s, c) = (Arc::clone(&stop), Arc::clone(&counter));
        thread::spawn(move || counting_thread("do_recv", s, c))
    };

    let mut total = 0usize;
    let code = loop {
        match que.dequeue(false) {
            Ok(msg) if msg.is_empty() => break 0,
            Ok(msg) => {
                total += msg.len();
                counter.fetch_add(msg.len(), Ordering::Relaxed);
            }
            // Ctrl-C reaches the whole process group; the sender still
            // delivers the terminator.
            Err(Error::Interrupted) => continue,
            Err(e) => {
                eprintln!("do_recv: {e}");
                break 1;
            }
        }
    };

    stop.store(true, Ordering::Release);
    let _ = counting.join();
    println!("do_recv: quit after {}", str_of_size(total));
    code
}

fn do_send(que: &PipeQueue<Vec<u8>, RawBytes>, run_for: Duration) -> pipe_ipc::Result<()> {
    println!(
        "do_send: start [{} - {}] for {:?}...",
        str_of_size(MIN_SZ),
        str_of_size(MAX_SZ),
        run_for
    );

    let stop = Arc::new(AtomicBool::new(false));
    let counter = Arc::new(AtomicUsize::new(0));
    let counting = {
        let (s, c) = (Arc::clone(&stop), Arc::clone(&counter));
        thread::spawn(move || counting_thread("do_send", s, c))
    };

    // Simple LCG for pseudo-random sizes.
    let mut rng_state: u64 = 0xdeadbeef_cafebabe;
    let buf = vec![0xA5u8; MAX_SZ];
    let end = Instant::now() + run_for;

    while !QUIT.load(Ordering::Acquire) && Instant::now() < end {
        rng_state = rng_state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        let sz = MIN_SZ + (rng_state >> 32) as usize % (MAX_SZ - MIN_SZ + 1);
        que.enqueue(&buf[..sz].to_vec())?;
        counter.fetch_add(sz, Ordering::Relaxed);
    }

    que.enqueue(&Vec::new())?;
    que.close();
    que.join_worker()?;

    stop.store(true, Ordering::Release);
    let _ = counting.join();
    println!("do_send: quit...");
    Ok(())
}

extern "C" fn on_quit(_: libc::c_int) {
    QUIT.store(true, Ordering::Release);
}

fn main() {
    let secs = match std::env::args().nth(1).map(|a| a.parse::<u64>()) {
        None => 5,
        Some(Ok(n)) => n,
        Some(Err(_)) => {
            eprintln!("usage: demo_msg_que [seconds]");
            std::process::exit(1);
        }
    };

    unsafe {
        libc::signal(libc::SIGINT, on_quit as *const () as libc::sighandler_t);
        libc::signal(libc::SIGTERM, on_quit as *const () as libc::sighandler_t);
    }

    let config = QueueConfig {
        worker_name: "demo-msg-que".to_owned(),
        ..QueueConfig::default()
    };
    let que: PipeQueue<Vec<u8>, RawBytes> =
        PipeQueue::with_codec(RawBytes, config).expect("create queue");

    let receiver = Process::spawn(|| do_recv(&que)).expect("fork receiver");

    if let Err(e) = do_send(&que, Duration::from_secs(secs)) {
        eprintln!("do_send: {e}");
        let _ = receiver.kill(libc::SIGTERM);
    }

    match receiver.value() {
        Ok(r) if r.success() => {}
        Ok(r) => eprintln!("receiver ended abnormally: {r:?}"),
        Err(e) => eprintln!("waitpid: {e}"),
    }
}
