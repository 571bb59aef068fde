//! XOR secret splitting: `ndevs - 1` random pads plus one XOR share.
//!
//! No single device holds recoverable data, and every device is needed to
//! decode.

use crate::error::{Error, Result};
use rand::RngCore;

#[derive(Debug, Default, Clone, Copy)]
pub struct XorCoder;

fn xor_into(acc: &mut [u8], other: &[u8]) {
    for (a, b) in acc.iter_mut().zip(other) {
        *a ^= b;
    }
}

impl XorCoder {
    pub fn encode(&self, block: &[u8], ndevs: usize) -> Result<Vec<Vec<u8>>> {
        if ndevs < 2 {
            return Err(Error::Config("xor coding needs at least two devices".to_string()));
        }

        let mut rng = rand::thread_rng();
        let mut share = block.to_vec();
        let mut fragments = Vec::with_capacity(ndevs);
        for _ in 0..ndevs - 1 {
            let mut pad = vec![0u8; block.len()];
            rng.fill_bytes(&mut pad);
            xor_into(&mut share, &pad);
            fragments.push(pad);
        }
        fragments.push(share);
        Ok(fragments)
    }

    pub fn decode(&self, fragments: Vec<Vec<u8>>) -> Result<Vec<u8>> {
        let mut iter = fragments.into_iter();
        let mut block = iter
            .next()
            .ok_or(Error::Unsupported("xor decode without devices"))?;
        for fragment in iter {
            if fragment.len() != block.len() {
                return Err(Error::Divergence {
                    device: 0,
                    expected: block.len(),
                    found: fragment.len(),
                });
            }
            xor_into(&mut block, &fragment);
        }
        Ok(block)
    }
}
