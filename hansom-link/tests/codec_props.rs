use hansom_core::MeterTariff;
use hansom_link::{FrameDecoder, McuEvent};
use proptest::collection::vec;
use proptest::prelude::*;

proptest! {
    #[test]
    fn decoder_never_panics_on_arbitrary_bytes(data in vec(any::<u8>(), 0..512)) {
        let mut dec = FrameDecoder::new();
        dec.extend(&data);
        while dec.next_frame().is_some() {}
    }

    // Noise bytes never contain the first sync byte, so the scanner must
    // always reach the embedded frame intact.
    #[test]
    fn frame_recovered_after_noise(
        prefix in vec(0u8..0xAA, 0..64),
        count in any::<u32>(),
    ) {
        let mut stream = prefix;
        stream.extend(McuEvent::PulseCount(count).encode().unwrap());

        let mut dec = FrameDecoder::new();
        dec.extend(&stream);

        let mut found = false;
        while let Some(frame) = dec.next_frame() {
            if McuEvent::decode_frame(&frame) == McuEvent::PulseCount(count) {
                found = true;
            }
        }
        prop_assert!(found);
    }

    #[test]
    fn chunk_boundaries_do_not_change_decoding(
        count in any::<u32>(),
        split in 1usize..8,
    ) {
        let bytes = McuEvent::PulseCount(count).encode().unwrap();

        let mut whole = FrameDecoder::new();
        whole.extend(&bytes);

        let mut chunked = FrameDecoder::new();
        for chunk in bytes.chunks(split) {
            chunked.extend(chunk);
        }

        prop_assert_eq!(whole.next_frame(), chunked.next_frame());
    }

    #[test]
    fn fare_params_roundtrip_any_values(
        k_value in any::<u32>(),
        start_cents in any::<u32>(),
        step_cents in any::<u32>(),
        step2_cents in any::<u32>(),
        threshold_m in any::<u32>(),
        step2_change_m in any::<u32>(),
    ) {
        let tariff = MeterTariff {
            k_value,
            start_cents,
            step_cents,
            step2_cents,
            threshold_m,
            step2_change_m,
        };
        let bytes = McuEvent::FareParams(tariff).encode().unwrap();
        let mut dec = FrameDecoder::new();
        dec.extend(&bytes);
        let frame = dec.next_frame().unwrap();
        prop_assert_eq!(McuEvent::decode_frame(&frame), McuEvent::FareParams(tariff));
    }
}
