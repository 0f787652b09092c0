//! Log of calls sent to `RpcTarget::AllBuffered`
//!
//! Every buffered call is replayed, in order, to a peer that connects after
//! it was made. Calls made by a peer that has since left are dropped so a
//! late joiner never sees a departed avatar.

use log::debug;
use shared::{PeerId, Rpc};

#[derive(Debug, Default)]
pub struct BufferedRpcs {
    log: Vec<(PeerId, Rpc)>,
}

impl BufferedRpcs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, sender: PeerId, rpc: Rpc) {
        debug!("Buffering {} from {}", rpc.name(), sender);
        self.log.push((sender, rpc));
    }

    /// Calls to replay to a late joiner, oldest first
    pub fn replay(&self) -> impl Iterator<Item = &(PeerId, Rpc)> {
        self.log.iter()
    }

    /// Forgets everything `sender` buffered; returns how many calls went
    pub fn purge(&mut self, sender: PeerId) -> usize {
        let before = self.log.len();
        self.log.retain(|(from, _)| *from != sender);
        before - self.log.len()
    }

    pub fn len(&self) -> usize {
        self.log.len()
    }

    pub fn is_empty(&self) -> bool {
        self.log.is_empty()
    }
}
