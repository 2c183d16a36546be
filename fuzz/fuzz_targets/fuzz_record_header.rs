#![no_main]

use libfuzzer_sys::fuzz_target;
use secure_fetch::tcp_tls::record::{self, MAX_RECORD_PAYLOAD};

fuzz_target!(|data: &[u8]| {
    if let Ok(header) = record::decode_record_header(data) {
        assert!(header.length as usize <= MAX_RECORD_PAYLOAD);
        let again = record::encode_record_header(header.content_type, header.length);
        assert_eq!(again[0], data[0]);
        assert_eq!(&again[3..], &data[3..5]);
    }
});
