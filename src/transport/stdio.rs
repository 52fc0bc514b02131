//! Stdio transport for child processes.
//!
//! # Important
//!
//! - **stdin**: frames from the hub
//! - **stdout**: frames to the hub; nothing else may be printed there
//! - **stderr**: logs, debug output (not parsed by the hub)

use tokio::io::{Stdin, Stdout};

/// Both halves of a child's pipe to the hub.
pub struct Stdio {
    pub reader: Stdin,
    pub writer: Stdout,
}

/// Take the process's stdin and stdout as the hub connection.
pub fn stdio() -> Stdio {
    Stdio {
        reader: tokio::io::stdin(),
        writer: tokio::io::stdout(),
    }
}
