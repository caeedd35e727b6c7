#![no_main]

use hive_codec::{decode_frame, FrameDecoder, Payload, RemoteError};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(message) = decode_frame(data) {
        let _ = message.payload.kind();
        let _ = message.payload.decode::<RemoteError>();
    }

    let split = data.first().map_or(0, |b| usize::from(*b)).min(data.len());
    let mut decoder = FrameDecoder::new();
    decoder.extend(&data[..split]);
    let _ = decoder.next_message();
    decoder.extend(&data[split..]);
    while let Ok(Some(_)) = decoder.next_message() {}

    let _ = Payload::from_raw(data.to_vec().into()).kind();
});
