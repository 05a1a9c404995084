//! # MAC Address Rewriter
//!
//! A decision function that sits between a client and a server on the same segment.
//! Frames addressed to the server's hardware address are redirected to the client and
//! frames addressed to the client are redirected to the server. Everything else is
//! forwarded unchanged.

use etherparse::Ethernet2Header;

use crate::error::HandlerError;
use crate::handler::Handler;
use crate::packet::{Action, Metadata};

/// Rewrites the Ethernet destination between two endpoints.
#[derive(Clone, Debug)]
pub struct Rewriter {
    client_mac: Option<[u8; 6]>,
    server_mac: Option<[u8; 6]>,
}

impl Rewriter {
    /// Creates a rewriter. A missing address disables the direction that would
    /// rewrite *to* it.
    pub fn new(client_mac: Option<[u8; 6]>, server_mac: Option<[u8; 6]>) -> Self {
        Rewriter {
            client_mac,
            server_mac,
        }
    }

    fn target_for(&self, destination: [u8; 6]) -> Option<[u8; 6]> {
        match (self.client_mac, self.server_mac) {
            (client, Some(server)) if destination == server => client,
            (Some(client), server) if destination == client => server,
            _ => None,
        }
    }
}

impl Handler for Rewriter {
    fn handle(&mut self, meta: &mut Metadata) -> Result<Action, HandlerError> {
        let (eth, _) = Ethernet2Header::from_slice(&meta.frame)?;
        match self.target_for(eth.destination) {
            Some(target) => {
                meta.frame[..6].copy_from_slice(&target);
                log::debug!(
                    "frame #{} rewritten {:02x?} -> {:02x?}",
                    meta.sequence,
                    eth.destination,
                    target
                );
                Ok(Action::Rewrite)
            }
            None => Ok(Action::Pass),
        }
    }
}
