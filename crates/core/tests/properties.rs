//! Property-based tests for the RTP codec and the receive-side filter.

use proptest::prelude::*;
use rtsp::client::MonotonicFilter;
use rtsp::media::rtp::{HeaderExtension, RtpPacket};
use rtsp::session::clamp_seek;

fn extension_strategy() -> impl Strategy<Value = Option<HeaderExtension>> {
    prop_oneof![
        Just(None),
        any::<u32>().prop_map(|counter| Some(HeaderExtension::frame_counter(counter))),
        (any::<u16>(), prop::collection::vec(any::<u32>(), 0..8))
            .prop_map(|(id, words)| Some(HeaderExtension { id, words })),
    ]
}

fn packet_strategy() -> impl Strategy<Value = RtpPacket> {
    (
        any::<bool>(), // padding
        any::<bool>(), // marker
        0u8..=0x7f,    // payload type (7 bits)
        any::<u16>(),
        any::<u32>(),
        any::<u32>(),
        prop::collection::vec(any::<u32>(), 0..=15),
        extension_strategy(),
        prop::collection::vec(any::<u8>(), 0..=512),
    )
        .prop_map(
            |(padding, marker, payload_type, sequence, timestamp, ssrc, csrc, extension, payload)| {
                RtpPacket {
                    padding,
                    marker,
                    payload_type,
                    sequence,
                    timestamp,
                    ssrc,
                    csrc,
                    extension,
                    payload,
                }
            },
        )
}

proptest! {
    #[test]
    fn rtp_roundtrip(packet in packet_strategy()) {
        let decoded = RtpPacket::decode(&packet.encode()).unwrap();
        prop_assert_eq!(decoded, packet);
    }

    #[test]
    fn rtp_header_length_matches_layout(packet in packet_strategy()) {
        let encoded = packet.encode();
        let ext = packet.extension.as_ref().map_or(0, |e| 4 + e.words.len() * 4);
        prop_assert_eq!(
            encoded.len(),
            12 + packet.csrc.len() * 4 + ext + packet.payload.len()
        );
        prop_assert_eq!(encoded[0] >> 6, 2);
    }

    #[test]
    fn rtp_decode_never_panics(data in prop::collection::vec(any::<u8>(), 0..64)) {
        let _ = RtpPacket::decode(&data);
    }

    #[test]
    fn truncated_extension_is_rejected(
        counter in any::<u32>(),
        cut in 1usize..=4,
    ) {
        let packet = RtpPacket {
            padding: false,
            marker: true,
            payload_type: 26,
            sequence: 1,
            timestamp: 0,
            ssrc: 1,
            csrc: Vec::new(),
            extension: Some(HeaderExtension::frame_counter(counter)),
            payload: Vec::new(),
        };
        let encoded = packet.encode();
        prop_assert!(RtpPacket::decode(&encoded[..encoded.len() - cut]).is_err());
    }

    #[test]
    fn filter_emits_each_new_maximum_once(frames in prop::collection::vec(0u32..500, 0..200)) {
        let mut filter = MonotonicFilter::new();
        let accepted: Vec<u32> = frames.iter().copied().filter(|f| filter.accept(*f)).collect();

        prop_assert!(accepted.windows(2).all(|w| w[0] < w[1]));

        let mut expected = Vec::new();
        let mut max = None;
        for frame in frames {
            if max.is_none_or(|m| frame > m) {
                expected.push(frame);
                max = Some(frame);
            }
        }
        prop_assert_eq!(accepted, expected);
    }

    #[test]
    fn filter_after_seek_starts_at_floor(
        before in prop::collection::vec(0u32..500, 0..50),
        floor in 0u32..500,
        after in prop::collection::vec(0u32..500, 1..50),
    ) {
        let mut filter = MonotonicFilter::new();
        for frame in before {
            filter.accept(frame);
        }
        filter.reset_to(floor);

        let accepted: Vec<u32> = after.iter().copied().filter(|f| filter.accept(*f)).collect();
        if let Some(first) = accepted.first() {
            prop_assert!(*first >= floor);
            prop_assert_eq!(Some(*first), after.iter().copied().find(|f| *f >= floor));
        }
        prop_assert!(accepted.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn seek_is_clamped_into_media(requested in any::<i64>(), frame_count in 1u32..100_000) {
        let frame = clamp_seek(requested, frame_count);
        prop_assert!(frame < frame_count);
        if requested < 0 {
            prop_assert_eq!(frame, 0);
        } else if requested >= i64::from(frame_count) {
            prop_assert_eq!(frame, frame_count - 1);
        } else {
            prop_assert_eq!(i64::from(frame), requested);
        }
    }
}
