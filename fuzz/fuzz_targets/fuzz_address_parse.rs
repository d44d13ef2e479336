#![no_main]

use bacstack_core::Address;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = core::str::from_utf8(data) else {
        return;
    };
    let Ok(address) = Address::parse(text) else {
        return;
    };
    // Whatever parses must format back to an equivalent address.
    let rendered = address.to_string();
    let reparsed = Address::parse(&rendered).expect("formatted address failed to reparse");
    assert_eq!(reparsed, address);
});
