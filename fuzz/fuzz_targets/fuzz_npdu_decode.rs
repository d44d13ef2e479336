#![no_main]

use bacstack_core::encoding::Reader;
use bacstack_core::npdu::{NetworkMessage, Npci};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut r = Reader::new(data);
    if let Ok(npci) = Npci::decode(&mut r) {
        if let Some(message_type) = npci.message_type {
            let mut body = Reader::new(r.read_remaining());
            let _ = NetworkMessage::decode(message_type, &mut body);
        }
    }
});
