//! Test harness for tests that need real interfaces: runs `ip` commands, manages a
//! veth pair with addresses on both ends and exchanges raw Ethernet frames over it.

pub mod command;
pub mod raw;
pub mod runner;
pub mod veth;

pub use command::{execute_command, setup};
pub use raw::RawSocket;
pub use runner::{Host, HostPair, run_test_with_pair};
