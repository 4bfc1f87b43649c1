#![no_main]

use bytes::Bytes;
use host_connect::protocol::handshake::AuthResponse;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Fuzz the auth response block parser
    if let Ok(response) = AuthResponse::parse(Bytes::copy_from_slice(data)) {
        // Anything that parses must re-encode and parse to the same value
        if let Ok(frame) = response.encode() {
            let reparsed = AuthResponse::parse(frame.slice(3..));
            assert_eq!(reparsed.ok(), Some(response));
        }
    }
});
