//! Full replication: every device stores the whole block.

use crate::error::{Error, Result};

#[derive(Debug, Default, Clone, Copy)]
pub struct ReplicateCoder;

impl ReplicateCoder {
    pub fn encode(&self, block: &[u8], ndevs: usize) -> Vec<Vec<u8>> {
        vec![block.to_vec(); ndevs]
    }

    /// The first replica is authoritative.
    pub fn decode(&self, mut fragments: Vec<Vec<u8>>) -> Result<Vec<u8>> {
        if fragments.is_empty() {
            return Err(Error::Unsupported("replicate decode without devices"));
        }
        Ok(fragments.swap_remove(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_device_gets_block() {
        let fragments = ReplicateCoder.encode(b"block", 3);
        assert_eq!(fragments.len(), 3);
        assert!(fragments.iter().all(|f| f == b"block"));
        assert_eq!(ReplicateCoder.decode(fragments).unwrap(), b"block");
    }
}
