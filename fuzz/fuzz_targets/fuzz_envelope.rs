#![no_main]

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use mmo_netcore::core::envelope::Envelope;
use mmo_netcore::protocol::message::{EncodeContext, MessagePackage};

fuzz_target!(|data: &[u8]| {
    // Whatever decodes must survive a re-encode unchanged
    if let Ok(envelopes) = Envelope::decode_all(Bytes::copy_from_slice(data)) {
        let ctx = EncodeContext::default();
        let mut out = Vec::new();
        for envelope in &envelopes {
            let package = MessagePackage::from(envelope.clone());
            let _ = package.split_timestamp();
            package.encode(&mut out, &ctx).expect("decoded envelope re-encodes");
        }
        let again = Envelope::decode_all(Bytes::from(out)).expect("re-encoded body decodes");
        assert_eq!(again, envelopes);
    }
});
