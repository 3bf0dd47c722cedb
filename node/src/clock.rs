use policy::clock::Clock;
use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};

/// Wall clock that can be pinned to a unix timestamp while the command log
/// is replayed. Clones share the pin.
#[derive(Debug, Clone, Default)]
pub struct NodeClock {
    // zero when unpinned
    pinned: Arc<AtomicU64>,
}

impl NodeClock {
    pub fn pin(&self, unix_time: u64) {
        self.pinned.store(unix_time, Ordering::SeqCst);
    }

    pub fn unpin(&self) {
        self.pinned.store(0, Ordering::SeqCst);
    }
}

impl Clock for NodeClock {
    fn now(&self) -> SystemTime {
        match self.pinned.load(Ordering::SeqCst) {
            0 => SystemTime::now(),
            pinned => UNIX_EPOCH + Duration::from_secs(pinned),
        }
    }
}
