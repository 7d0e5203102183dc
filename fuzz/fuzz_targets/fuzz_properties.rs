#![no_main]

use libfuzzer_sys::fuzz_target;
use mmo_netcore::properties::{PropertyCollection, ReplicatedPropertyCollection, ReplicatedString};

fuzz_target!(|data: &[u8]| {
    let _ = ReplicatedPropertyCollection::deserialize(&mut &data[..]);
    let _ = ReplicatedString::deserialize(&mut &data[..]);

    if let Ok(collection) = PropertyCollection::deserialize(&mut &data[..]) {
        let bytes = collection.to_bytes().expect("decoded collection re-encodes");
        let again = PropertyCollection::deserialize(&mut &bytes[..]).expect("re-encoded collection decodes");
        assert_eq!(again, collection);
    }
});
