//! Simulation mode: a stand-in for the store-side manager client.
//!
//! Watches the manager target and flips `is_connected` shortly after a
//! non-empty target is written, the way the real client does once its
//! session comes up. Lets the whole bring-up chain run on a dev box with
//! no cloud in sight.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::info;

use crate::store::MemStore;

pub struct SimHandle {
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl SimHandle {
    pub fn stop(mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

impl Drop for SimHandle {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

pub fn spawn(store: Arc<MemStore>) -> SimHandle {
    let stop = Arc::new(AtomicBool::new(false));
    let stop_clone = Arc::clone(&stop);
    let handle = thread::Builder::new()
        .name("cm-sim".into())
        .spawn(move || {
            let mut settle = 0u32;
            while !stop_clone.load(Ordering::Relaxed) {
                thread::sleep(Duration::from_millis(200));
                let row = store.manager_row();
                if !row.target.is_empty() && !row.is_connected {
                    // a session takes a moment to establish
                    settle += 1;
                    if settle >= 3 {
                        info!(target = %row.target, "sim: manager session up");
                        store.set_connected(true);
                        settle = 0;
                    }
                } else {
                    settle = 0;
                }
            }
        })
        .expect("failed to spawn sim thread");
    SimHandle {
        stop,
        handle: Some(handle),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sim_connects_after_target_write() {
        use trellis_cm::caps::Store;

        let store = Arc::new(MemStore::new());
        let sim = spawn(Arc::clone(&store));
        store.set_manager_target("ssl:192.0.2.1:443").unwrap();

        let mut connected = false;
        for _ in 0..50 {
            if store.manager_row().is_connected {
                connected = true;
                break;
            }
            thread::sleep(Duration::from_millis(100));
        }
        sim.stop();
        assert!(connected, "sim should flip is_connected");
    }

    #[test]
    fn sim_ignores_empty_target() {
        let store = Arc::new(MemStore::new());
        let sim = spawn(Arc::clone(&store));
        thread::sleep(Duration::from_millis(900));
        assert!(!store.manager_row().is_connected);
        sim.stop();
    }
}
