use sovran_experiments::{ExperimentStore, ManualQueue, ReactiveBridge, Storable};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Demonstrates a UI loop that drains its own refresh queue once per frame
/// while an editor thread changes values in the background
fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let store = ExperimentStore::new();
    let frame_queue = ManualQueue::new();
    let bridge = ReactiveBridge::with_context(&store, Arc::new(frame_queue.clone()));

    let dirty = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&dirty);
    bridge.set_on_change(move || flag.store(true, Ordering::SeqCst));

    // The editor bumps the speed a few times, much faster than frames render
    let editor = {
        let store = store.clone();
        thread::spawn(move || {
            for speed in 1..=12u32 {
                store.set_raw(Storable::from("speed"), Some(Storable::new(speed)));
                thread::sleep(Duration::from_millis(5));
            }
        })
    };

    for frame in 0..8 {
        let refreshes = frame_queue.run_pending();
        if dirty.swap(false, Ordering::SeqCst) {
            let snapshot = bridge.snapshot();
            let speed = snapshot.value(1u32, "speed", 1..=20);
            let label = snapshot.string("runner", "label");
            println!(
                "frame {}: {} moves at {} (refreshes this frame: {}, generation {})",
                frame,
                label,
                speed,
                refreshes,
                bridge.generation()
            );
        }
        thread::sleep(Duration::from_millis(16));
    }

    editor.join().ok();
    frame_queue.run_pending();

    println!("\nExperiments seen by the editor:");
    for state in bridge.states().iter() {
        println!("  {:?} = {:?} (overridden: {})", state.key, state.value, state.overridden);
    }
}
