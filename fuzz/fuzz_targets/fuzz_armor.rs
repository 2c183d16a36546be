#![no_main]

use libfuzzer_sys::fuzz_target;
use secure_fetch::ext::armor;
use secure_fetch::ExtensionRecord;

fuzz_target!(|data: &[u8]| {
    let mut rest = data;
    while let Ok((record, used)) = ExtensionRecord::decode(rest) {
        assert_eq!(record.encode().as_slice(), &rest[..used]);
        rest = &rest[used..];
    }

    if let Ok(text) = std::str::from_utf8(data) {
        if let Ok(blocks) = armor::decode_all(text) {
            for block in blocks {
                let again = armor::decode(&armor::encode(&block.label, &block.data)).unwrap();
                assert_eq!(again, block);
            }
        }
        let _ = ExtensionRecord::from_armor(text);
    }
});
