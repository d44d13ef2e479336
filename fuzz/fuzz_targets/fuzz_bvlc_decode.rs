#![no_main]

use bacstack_datalink::bip::bvlc::BvlcMessage;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let _ = BvlcMessage::decode(data);
});
