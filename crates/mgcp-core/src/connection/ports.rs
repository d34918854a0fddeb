//! RTP port allocation

use std::collections::HashSet;

use parking_lot::Mutex;
use tracing::trace;

use super::ConnectionError;

struct PortState {
    next: u16,
    in_use: HashSet<u16>,
}

/// Hands out even RTP ports from a fixed range, round robin
pub struct PortManager {
    low: u16,
    high: u16,
    state: Mutex<PortState>,
}

impl std::fmt::Debug for PortManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortManager")
            .field("low", &self.low)
            .field("high", &self.high)
            .field("in_use", &self.in_use())
            .finish()
    }
}

impl PortManager {
    /// Manage the even ports in `low..=high`
    pub fn new(low: u16, high: u16) -> Self {
        let low = low + (low % 2);
        Self {
            low,
            high,
            state: Mutex::new(PortState { next: low, in_use: HashSet::new() }),
        }
    }

    fn capacity(&self) -> usize {
        if self.high < self.low {
            0
        } else {
            usize::from((self.high - self.low) / 2) + 1
        }
    }

    pub fn allocate(&self) -> Result<u16, ConnectionError> {
        let mut state = self.state.lock();
        for _ in 0..self.capacity() {
            let candidate = state.next;
            state.next = match candidate.checked_add(2) {
                Some(next) if next <= self.high => next,
                _ => self.low,
            };
            if state.in_use.insert(candidate) {
                trace!(port = candidate, "rtp port allocated");
                return Ok(candidate);
            }
        }
        Err(ConnectionError::NoPortAvailable)
    }

    pub fn release(&self, port: u16) {
        if self.state.lock().in_use.remove(&port) {
            trace!(port, "rtp port released");
        }
    }

    pub fn in_use(&self) -> usize {
        self.state.lock().in_use.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_even_ports_round_robin() {
        let ports = PortManager::new(4001, 4006);
        assert_eq!(ports.allocate().unwrap(), 4002);
        assert_eq!(ports.allocate().unwrap(), 4004);
        assert_eq!(ports.allocate().unwrap(), 4006);
        assert_eq!(ports.allocate(), Err(ConnectionError::NoPortAvailable));

        ports.release(4004);
        assert_eq!(ports.allocate().unwrap(), 4004);
        assert_eq!(ports.in_use(), 3);
    }
}
