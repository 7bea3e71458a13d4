#![no_main]

//! Fuzz target for archive entry decoding and chain replay.
//!
//! Run with: cargo +nightly fuzz run fuzz_archive_cbor

use libfuzzer_sys::fuzz_target;
use messagelog_core::{ArchiveChain, ArchivedRecord};

fuzz_target!(|data: &[u8]| {
    if let Ok(record) = ArchivedRecord::from_cbor(data) {
        let _ = record.verify_content();
    }
    if let Ok(chain) = ArchiveChain::from_cbor(data) {
        // Replay must fail cleanly on wrong hash lengths
        let _ = chain.replay();
        if let Some(link) = chain.links.first() {
            let _ = chain.proof_for(link.record_id);
        }
    }
});
