#![no_main]

//! Fuzz target for the RFC 3161 DER parsers.
//!
//! Responses come straight off the network, so every parser must reject
//! malformed input with an error instead of panicking.
//!
//! Run with: cargo +nightly fuzz run fuzz_tsa_response

use libfuzzer_sys::fuzz_target;
use messagelog_core::tsp::{decode_token, TimeStampRequest, TimeStampResponse, TstInfo};

fuzz_target!(|data: &[u8]| {
    if let Ok(response) = TimeStampResponse::from_der(data) {
        if let Ok(token) = response.into_token() {
            let _ = decode_token(&token);
        }
    }
    let _ = TstInfo::from_der(data);
    let _ = TimeStampRequest::from_der(data);
});
