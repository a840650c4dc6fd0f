//! Free local port allocation.
//!
//! Ports are found by binding `127.0.0.1:0` and releasing the listener. A
//! port handed out once is never handed out again by this process, so
//! environments living side by side cannot collide with each other. Another
//! process may still grab a port between allocation and bind.

use crate::{Error, Result};
use std::collections::HashSet;
use std::net::TcpListener;
use std::sync::{LazyLock, Mutex};
use tracing::debug;

const MAX_ATTEMPTS: usize = 64;

static HANDED_OUT: LazyLock<Mutex<HashSet<u16>>> = LazyLock::new(|| Mutex::new(HashSet::new()));

/// Allocate a port that is free on localhost right now
pub fn allocate() -> Result<u16> {
    let mut handed_out = HANDED_OUT
        .lock()
        .map_err(|_| Error::PortAllocation("port registry poisoned".to_string()))?;

    for _ in 0..MAX_ATTEMPTS {
        let port = TcpListener::bind(("127.0.0.1", 0))
            .and_then(|listener| listener.local_addr())
            .map_err(|e| Error::PortAllocation(e.to_string()))?
            .port();

        if handed_out.insert(port) {
            debug!("Allocated port {}", port);
            return Ok(port);
        }
    }

    Err(Error::PortAllocation(format!(
        "no unused port after {} attempts",
        MAX_ATTEMPTS
    )))
}

/// Allocate `count` distinct ports
pub fn allocate_many(count: usize) -> Result<Vec<u16>> {
    (0..count).map(|_| allocate()).collect()
}
