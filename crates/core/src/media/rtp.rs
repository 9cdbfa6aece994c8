use rand::Rng;

use crate::error::{Result, RtpErrorKind, RtspError};

/// Length of the RTP fixed header (RFC 3550 §5.1).
pub const HEADER_LEN: usize = 12;

/// Length of the extension prefix: 16-bit id plus 16-bit word count (RFC 3550 §5.3.1).
pub const EXTENSION_PREFIX_LEN: usize = 4;

pub const RTP_VERSION: u8 = 2;

/// Largest CSRC list the 4-bit CC field can describe.
pub const MAX_CSRC: usize = 15;

/// Largest extension the 16-bit length field can describe, in words.
pub const MAX_EXTENSION_WORDS: usize = u16::MAX as usize;

/// Extension id used for the absolute send counter.
pub const FRAME_COUNTER_EXTENSION: u16 = 0;

/// RTP payload type for JPEG video (RFC 3551).
pub const PAYLOAD_TYPE_JPEG: u8 = 26;

/// RTP media clock for video, in Hz.
pub const VIDEO_CLOCK_RATE: u32 = 90_000;

/// Header extension block (RFC 3550 §5.3.1).
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |      defined by profile       |           length              |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                        header extension                       |
/// |                             ....                              |
/// ```
///
/// `length` counts 32-bit words after the prefix, so the block is always
/// word aligned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderExtension {
    pub id: u16,
    /// At most [`MAX_EXTENSION_WORDS`]; [`RtpPacket::encode`] drops the rest.
    pub words: Vec<u32>,
}

impl HeaderExtension {
    /// Single-word extension carrying the sender's absolute frame counter.
    pub fn frame_counter(counter: u32) -> Self {
        Self {
            id: FRAME_COUNTER_EXTENSION,
            words: vec![counter],
        }
    }
}

/// A decoded RTP packet.
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |V=2|P|X|  CC   |M|     PT      |       Sequence Number         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                           Timestamp                           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                             SSRC                              |
/// +=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+
/// |                     CSRC list (CC words)                      |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |              header extension (when X is set)                 |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                           payload ...                         |
/// ```
///
/// The X bit is derived from [`extension`](Self::extension) and CC from the
/// length of [`csrc`](Self::csrc), so an encoded packet is always
/// self-consistent. The padding bit is carried as a flag; padding octets,
/// if any, stay in the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpPacket {
    pub padding: bool,
    pub marker: bool,
    /// 7-bit payload type.
    pub payload_type: u8,
    pub sequence: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    /// Contributing sources, at most [`MAX_CSRC`]; [`encode`](Self::encode)
    /// drops the rest.
    pub csrc: Vec<u32>,
    pub extension: Option<HeaderExtension>,
    pub payload: Vec<u8>,
}

impl RtpPacket {
    /// Serialize to wire format.
    ///
    /// CSRC entries past [`MAX_CSRC`] and extension words past
    /// [`MAX_EXTENSION_WORDS`] are not encoded; such a packet does not
    /// decode back to itself.
    pub fn encode(&self) -> Vec<u8> {
        let cc = self.csrc.len().min(MAX_CSRC);
        let words = self
            .extension
            .as_ref()
            .map_or(&[][..], |ext| &ext.words[..ext.words.len().min(MAX_EXTENSION_WORDS)]);
        let ext_len = self
            .extension
            .as_ref()
            .map_or(0, |_| EXTENSION_PREFIX_LEN + words.len() * 4);

        let mut buf = Vec::with_capacity(HEADER_LEN + cc * 4 + ext_len + self.payload.len());
        buf.push(
            (RTP_VERSION << 6)
                | ((self.padding as u8) << 5)
                | ((self.extension.is_some() as u8) << 4)
                | cc as u8,
        );
        buf.push(((self.marker as u8) << 7) | (self.payload_type & 0x7f));
        buf.extend_from_slice(&self.sequence.to_be_bytes());
        buf.extend_from_slice(&self.timestamp.to_be_bytes());
        buf.extend_from_slice(&self.ssrc.to_be_bytes());

        for csrc in &self.csrc[..cc] {
            buf.extend_from_slice(&csrc.to_be_bytes());
        }

        if let Some(ext) = &self.extension {
            buf.extend_from_slice(&ext.id.to_be_bytes());
            buf.extend_from_slice(&(words.len() as u16).to_be_bytes());
            for word in words {
                buf.extend_from_slice(&word.to_be_bytes());
            }
        }

        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Parse a datagram.
    ///
    /// When the X bit is set, the extension length field drives how many
    /// words are consumed before the payload. A declared length that runs
    /// past the datagram is rejected instead of being read.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_LEN {
            return Err(RtspError::rtp(RtpErrorKind::TooShort(data.len())));
        }

        let version = data[0] >> 6;
        if version != RTP_VERSION {
            return Err(RtspError::rtp(RtpErrorKind::BadVersion(version)));
        }

        let padding = data[0] & 0x20 != 0;
        let has_extension = data[0] & 0x10 != 0;
        let cc = (data[0] & 0x0f) as usize;
        let marker = data[1] & 0x80 != 0;
        let payload_type = data[1] & 0x7f;
        let sequence = u16::from_be_bytes([data[2], data[3]]);
        let timestamp = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
        let ssrc = u32::from_be_bytes([data[8], data[9], data[10], data[11]]);

        let mut offset = HEADER_LEN;
        if data.len() < offset + cc * 4 {
            return Err(RtspError::rtp(RtpErrorKind::TooShort(data.len())));
        }
        let csrc = data[offset..offset + cc * 4]
            .chunks_exact(4)
            .map(read_u32)
            .collect();
        offset += cc * 4;

        let extension = if has_extension {
            if data.len() < offset + EXTENSION_PREFIX_LEN {
                return Err(RtspError::rtp(RtpErrorKind::TruncatedExtension));
            }
            let id = u16::from_be_bytes([data[offset], data[offset + 1]]);
            let words = u16::from_be_bytes([data[offset + 2], data[offset + 3]]) as usize;
            offset += EXTENSION_PREFIX_LEN;

            let end = offset + words * 4;
            if data.len() < end {
                return Err(RtspError::rtp(RtpErrorKind::TruncatedExtension));
            }
            let words = data[offset..end].chunks_exact(4).map(read_u32).collect();
            offset = end;
            Some(HeaderExtension { id, words })
        } else {
            None
        };

        Ok(Self {
            padding,
            marker,
            payload_type,
            sequence,
            timestamp,
            ssrc,
            csrc,
            extension,
            payload: data[offset..].to_vec(),
        })
    }

    /// The sender's absolute frame counter, when the packet carries one.
    pub fn frame_counter(&self) -> Option<u32> {
        self.extension
            .as_ref()
            .filter(|ext| ext.id == FRAME_COUNTER_EXTENSION)
            .and_then(|ext| ext.words.first().copied())
    }
}

fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Per-session packet builder.
///
/// Fixes the payload type and SSRC for a session and derives each packet's
/// sequence number and timestamp from the frame it carries:
///
/// - **Sequence number**: the frame's position in the media (low 16 bits).
/// - **Timestamp**: `frame * 90000 / fps` on the 90 kHz video clock.
/// - **Extension**: one word holding the sender's running packet counter.
#[derive(Debug, Clone)]
pub struct RtpStream {
    pub payload_type: u8,
    pub ssrc: u32,
    ticks_per_frame: u32,
}

impl RtpStream {
    pub fn new(payload_type: u8, ssrc: u32, fps: u32) -> Self {
        tracing::debug!(
            payload_type,
            ssrc = format_args!("{:#010X}", ssrc),
            fps,
            "RTP stream created"
        );
        Self {
            payload_type,
            ssrc,
            ticks_per_frame: VIDEO_CLOCK_RATE / fps.max(1),
        }
    }

    /// Create with a random SSRC.
    ///
    /// Per RFC 3550 §8.1, the SSRC should be chosen randomly to minimize
    /// the probability of collisions between independent sessions.
    pub fn with_random_ssrc(payload_type: u8, fps: u32) -> Self {
        let ssrc = rand::rng().random::<u32>();
        Self::new(payload_type, ssrc, fps)
    }

    /// Wrap one encoded frame.
    pub fn packet(&self, frame: u32, counter: u32, payload: Vec<u8>) -> RtpPacket {
        RtpPacket {
            padding: false,
            marker: true,
            payload_type: self.payload_type,
            sequence: frame as u16,
            timestamp: frame.wrapping_mul(self.ticks_per_frame),
            ssrc: self.ssrc,
            csrc: Vec::new(),
            extension: Some(HeaderExtension::frame_counter(counter)),
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_packet() -> RtpPacket {
        RtpStream::new(PAYLOAD_TYPE_JPEG, 0xAABBCCDD, 25).packet(7, 3, vec![0xff, 0xd8, 0xff])
    }

    #[test]
    fn version_is_2() {
        let buf = make_packet().encode();
        assert_eq!(buf[0] >> 6, 2);
    }

    #[test]
    fn extension_bit_and_layout() {
        let buf = make_packet().encode();
        assert_eq!(buf[0] & 0x10, 0x10);
        // id, then a length of one word at offsets 14-15
        assert_eq!(u16::from_be_bytes([buf[12], buf[13]]), FRAME_COUNTER_EXTENSION);
        assert_eq!(u16::from_be_bytes([buf[14], buf[15]]), 1);
        assert_eq!(u32::from_be_bytes([buf[16], buf[17], buf[18], buf[19]]), 3);
        assert_eq!(&buf[20..], &[0xff, 0xd8, 0xff]);
    }

    #[test]
    fn header_fields() {
        let buf = make_packet().encode();
        assert_eq!(buf[1] & 0x7f, PAYLOAD_TYPE_JPEG);
        assert_eq!(buf[1] & 0x80, 0x80);
        assert_eq!(u16::from_be_bytes([buf[2], buf[3]]), 7);
        assert_eq!(u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]), 7 * 3600);
        assert_eq!(u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]), 0xAABBCCDD);
    }

    #[test]
    fn encode_keeps_header_counts_consistent_past_limits() {
        let mut packet = make_packet();
        packet.csrc = (0..20).collect();
        packet.extension = Some(HeaderExtension {
            id: 1,
            words: vec![9; MAX_EXTENSION_WORDS + 2],
        });

        let decoded = RtpPacket::decode(&packet.encode()).unwrap();
        assert_eq!(decoded.csrc, (0..15).collect::<Vec<u32>>());
        assert_eq!(decoded.extension.unwrap().words.len(), MAX_EXTENSION_WORDS);
        assert_eq!(decoded.payload, packet.payload);
    }

    #[test]
    fn decode_reads_back_frame_counter() {
        let packet = RtpPacket::decode(&make_packet().encode()).unwrap();
        assert_eq!(packet.sequence, 7);
        assert_eq!(packet.frame_counter(), Some(3));
        assert_eq!(packet.payload, vec![0xff, 0xd8, 0xff]);
    }

    #[test]
    fn decode_without_extension() {
        let mut packet = make_packet();
        packet.extension = None;
        let buf = packet.encode();
        assert_eq!(buf.len(), HEADER_LEN + 3);
        let decoded = RtpPacket::decode(&buf).unwrap();
        assert_eq!(decoded.frame_counter(), None);
        assert_eq!(decoded, packet);
    }

    #[test]
    fn decode_with_csrc_list() {
        let mut packet = make_packet();
        packet.csrc = vec![1, 2];
        assert_eq!(RtpPacket::decode(&packet.encode()).unwrap(), packet);
    }

    #[test]
    fn decode_too_short() {
        assert!(matches!(
            RtpPacket::decode(&[0x80, 26, 0]),
            Err(RtspError::Rtp {
                kind: RtpErrorKind::TooShort(3)
            })
        ));
    }

    #[test]
    fn decode_bad_version() {
        let mut buf = make_packet().encode();
        buf[0] &= 0x3f;
        assert!(matches!(
            RtpPacket::decode(&buf),
            Err(RtspError::Rtp {
                kind: RtpErrorKind::BadVersion(0)
            })
        ));
    }

    #[test]
    fn decode_never_reads_past_declared_extension() {
        let mut buf = make_packet().encode();
        // claim 200 words of extension in a 23-byte datagram
        buf[14] = 0;
        buf[15] = 200;
        assert!(matches!(
            RtpPacket::decode(&buf),
            Err(RtspError::Rtp {
                kind: RtpErrorKind::TruncatedExtension
            })
        ));
    }

    #[test]
    fn sequence_is_low_bits_of_frame() {
        let stream = RtpStream::new(PAYLOAD_TYPE_JPEG, 1, 25);
        assert_eq!(stream.packet(65_537, 0, Vec::new()).sequence, 1);
    }

    #[test]
    fn random_ssrc_differs() {
        let s1 = RtpStream::with_random_ssrc(PAYLOAD_TYPE_JPEG, 25);
        let s2 = RtpStream::with_random_ssrc(PAYLOAD_TYPE_JPEG, 25);
        assert_ne!(s1.ssrc, s2.ssrc);
    }
}
