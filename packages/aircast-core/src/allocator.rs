//! Port pool shared by all sinks.
//!
//! Each provisioned sink gets one port on which the external stream server
//! serves its audio. Allocation is centralized here so that two sinks
//! discovered at the same time can never end up with the same port.

use std::collections::BTreeSet;

use parking_lot::Mutex;

use crate::error::{BridgeError, BridgeResult};

/// Hands out unique ports from an inclusive `[min_port, max_port]` range.
#[derive(Debug)]
pub struct PortAllocator {
    min_port: u16,
    max_port: u16,
    free: Mutex<BTreeSet<u16>>,
}

impl PortAllocator {
    /// Creates an allocator with every port of the range free.
    ///
    /// # Errors
    /// Returns `BridgeError::Configuration` if the range is empty or starts at 0.
    pub fn new(min_port: u16, max_port: u16) -> BridgeResult<Self> {
        if min_port == 0 || min_port > max_port {
            return Err(BridgeError::Configuration(format!(
                "invalid port pool {}-{}",
                min_port, max_port
            )));
        }
        Ok(Self {
            min_port,
            max_port,
            free: Mutex::new((min_port..=max_port).collect()),
        })
    }

    /// Takes the lowest free port.
    ///
    /// # Errors
    /// Returns `BridgeError::PoolExhausted` when every port is assigned.
    pub fn allocate(&self) -> BridgeResult<u16> {
        let port = self.free.lock().pop_first().ok_or(BridgeError::PoolExhausted {
            min_port: self.min_port,
            max_port: self.max_port,
        })?;
        log::debug!("[Allocator] Allocated port {}", port);
        Ok(port)
    }

    /// Returns a port to the pool. Releasing a free or foreign port is a no-op.
    pub fn release(&self, port: u16) {
        if !self.contains(port) {
            log::warn!(
                "[Allocator] Ignoring release of port {} outside pool {}-{}",
                port,
                self.min_port,
                self.max_port
            );
            return;
        }
        if self.free.lock().insert(port) {
            log::debug!("[Allocator] Released port {}", port);
        }
    }

    /// Whether `port` is inside the pool range.
    #[must_use]
    pub fn contains(&self, port: u16) -> bool {
        (self.min_port..=self.max_port).contains(&port)
    }

    /// Whether `port` is currently assigned.
    #[must_use]
    pub fn is_allocated(&self, port: u16) -> bool {
        self.contains(port) && !self.free.lock().contains(&port)
    }

    /// Number of free ports.
    #[must_use]
    pub fn available(&self) -> usize {
        self.free.lock().len()
    }

    /// Number of assigned ports.
    #[must_use]
    pub fn allocated(&self) -> usize {
        self.capacity() - self.available()
    }

    /// Total size of the pool.
    #[must_use]
    pub fn capacity(&self) -> usize {
        usize::from(self.max_port - self.min_port) + 1
    }

    #[must_use]
    pub fn bounds(&self) -> (u16, u16) {
        (self.min_port, self.max_port)
    }
}
