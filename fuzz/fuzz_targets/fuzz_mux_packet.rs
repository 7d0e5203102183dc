#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use mmo_netcore::core::packet::MuxPacket;

fuzz_target!(|data: &[u8]| {
    // One whole packet, and the streaming path with a small body limit
    let _ = MuxPacket::from_bytes(data);

    let mut src = BytesMut::from(data);
    while let Ok(Some(_)) = MuxPacket::decode_frame(&mut src, 4096) {}
});
