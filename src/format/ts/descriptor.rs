use crate::error::{Result, TsError};
use crate::utils::{BitReader, BitWriter};
use bytes::BytesMut;

// DVB/MPEG descriptor tags (ETSI EN 300 468 / ISO 13818-1)
pub const TAG_ISO639_LANGUAGE: u8 = 0x0a;
pub const TAG_MAXIMUM_BITRATE: u8 = 0x0e;
pub const TAG_NETWORK_NAME: u8 = 0x40;
pub const TAG_SERVICE: u8 = 0x48;
pub const TAG_SHORT_EVENT: u8 = 0x4d;
pub const TAG_EXTENDED_EVENT: u8 = 0x4e;
pub const TAG_COMPONENT: u8 = 0x50;
pub const TAG_STREAM_IDENTIFIER: u8 = 0x52;
pub const TAG_CONTENT: u8 = 0x54;
pub const TAG_PARENTAL_RATING: u8 = 0x55;
pub const TAG_TELETEXT: u8 = 0x56;
pub const TAG_SUBTITLING: u8 = 0x59;
pub const TAG_PRIVATE_DATA_SPECIFIER: u8 = 0x5f;
pub const TAG_AC3: u8 = 0x6a;

/// One descriptor from a PMT/SDT/EIT/NIT descriptor loop.
///
/// Unrecognized tags are kept as opaque byte blobs so nothing is lost
/// when re-muxing streams that carry private or future descriptors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Descriptor {
    Ac3(Ac3Descriptor),
    Component(ComponentDescriptor),
    Content(Vec<ContentItem>),
    ExtendedEvent(ExtendedEventDescriptor),
    Iso639LanguageAndAudioType(Vec<Iso639Language>),
    /// Bitrate in units of 50 bytes/second (22-bit field)
    MaximumBitrate(u32),
    NetworkName(Vec<u8>),
    ParentalRating(Vec<ParentalRatingItem>),
    PrivateDataSpecifier(u32),
    Service(ServiceDescriptor),
    ShortEvent(ShortEventDescriptor),
    /// Component tag binding an ES to its SDT/EIT component descriptors
    StreamIdentifier(u8),
    Subtitling(Vec<SubtitlingItem>),
    Teletext(Vec<TeletextItem>),
    Unknown { tag: u8, data: Vec<u8> },
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Ac3Descriptor {
    pub component_type: Option<u8>,
    pub bsid: Option<u8>,
    pub mainid: Option<u8>,
    pub asvc: Option<u8>,
    pub additional_info: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentDescriptor {
    pub stream_content_ext: u8,
    pub stream_content: u8,
    pub component_type: u8,
    pub component_tag: u8,
    pub language: [u8; 3],
    pub text: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentItem {
    pub category: u8,
    pub detail: u8,
    pub user_byte: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendedEventDescriptor {
    pub number: u8,
    pub last_number: u8,
    pub language: [u8; 3],
    pub items: Vec<(Vec<u8>, Vec<u8>)>,
    pub text: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Iso639Language {
    pub language: [u8; 3],
    pub audio_type: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentalRatingItem {
    pub country_code: [u8; 3],
    pub rating: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    pub service_type: u8,
    pub provider: Vec<u8>,
    pub name: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShortEventDescriptor {
    pub language: [u8; 3],
    pub event_name: Vec<u8>,
    pub text: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubtitlingItem {
    pub language: [u8; 3],
    pub subtitling_type: u8,
    pub composition_page_id: u16,
    pub ancillary_page_id: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeletextItem {
    pub language: [u8; 3],
    pub teletext_type: u8,
    pub magazine_number: u8,
    pub page_number: u8,
}

fn read_lang(r: &mut BitReader) -> Result<[u8; 3]> {
    let bytes = r.read_bytes(3)?;
    Ok([bytes[0], bytes[1], bytes[2]])
}

impl Descriptor {
    pub fn tag(&self) -> u8 {
        match self {
            Descriptor::Ac3(_) => TAG_AC3,
            Descriptor::Component(_) => TAG_COMPONENT,
            Descriptor::Content(_) => TAG_CONTENT,
            Descriptor::ExtendedEvent(_) => TAG_EXTENDED_EVENT,
            Descriptor::Iso639LanguageAndAudioType(_) => TAG_ISO639_LANGUAGE,
            Descriptor::MaximumBitrate(_) => TAG_MAXIMUM_BITRATE,
            Descriptor::NetworkName(_) => TAG_NETWORK_NAME,
            Descriptor::ParentalRating(_) => TAG_PARENTAL_RATING,
            Descriptor::PrivateDataSpecifier(_) => TAG_PRIVATE_DATA_SPECIFIER,
            Descriptor::Service(_) => TAG_SERVICE,
            Descriptor::ShortEvent(_) => TAG_SHORT_EVENT,
            Descriptor::StreamIdentifier(_) => TAG_STREAM_IDENTIFIER,
            Descriptor::Subtitling(_) => TAG_SUBTITLING,
            Descriptor::Teletext(_) => TAG_TELETEXT,
            Descriptor::Unknown { tag, .. } => *tag,
        }
    }

    /// Parses one descriptor body (`data` excludes tag and length bytes).
    pub fn parse(tag: u8, data: &[u8]) -> Result<Descriptor> {
        let mut r = BitReader::new(data);
        let d = match tag {
            TAG_AC3 => {
                let component_type_flag = r.read_bit()?;
                let bsid_flag = r.read_bit()?;
                let mainid_flag = r.read_bit()?;
                let asvc_flag = r.read_bit()?;
                r.skip_bits(4)?;
                let mut desc = Ac3Descriptor::default();
                if component_type_flag {
                    desc.component_type = Some(r.read_bits(8)? as u8);
                }
                if bsid_flag {
                    desc.bsid = Some(r.read_bits(8)? as u8);
                }
                if mainid_flag {
                    desc.mainid = Some(r.read_bits(8)? as u8);
                }
                if asvc_flag {
                    desc.asvc = Some(r.read_bits(8)? as u8);
                }
                desc.additional_info = r.read_remaining()?.to_vec();
                Descriptor::Ac3(desc)
            }
            TAG_COMPONENT => Descriptor::Component(ComponentDescriptor {
                stream_content_ext: r.read_bits(4)? as u8,
                stream_content: r.read_bits(4)? as u8,
                component_type: r.read_bits(8)? as u8,
                component_tag: r.read_bits(8)? as u8,
                language: read_lang(&mut r)?,
                text: r.read_remaining()?.to_vec(),
            }),
            TAG_CONTENT => {
                let mut items = Vec::new();
                while r.remaining_bytes() >= 2 {
                    items.push(ContentItem {
                        category: r.read_bits(4)? as u8,
                        detail: r.read_bits(4)? as u8,
                        user_byte: r.read_bits(8)? as u8,
                    });
                }
                Descriptor::Content(items)
            }
            TAG_EXTENDED_EVENT => {
                let number = r.read_bits(4)? as u8;
                let last_number = r.read_bits(4)? as u8;
                let language = read_lang(&mut r)?;
                let items_length = r.read_bits(8)? as usize;
                let mut ir = BitReader::new(r.read_bytes(items_length)?);
                let mut items = Vec::new();
                while ir.remaining_bytes() >= 2 {
                    let desc_len = ir.read_bits(8)? as usize;
                    let description = ir.read_bytes(desc_len)?.to_vec();
                    let item_len = ir.read_bits(8)? as usize;
                    let item = ir.read_bytes(item_len)?.to_vec();
                    items.push((description, item));
                }
                let text_length = r.read_bits(8)? as usize;
                let text = r.read_bytes(text_length)?.to_vec();
                Descriptor::ExtendedEvent(ExtendedEventDescriptor {
                    number,
                    last_number,
                    language,
                    items,
                    text,
                })
            }
            TAG_ISO639_LANGUAGE => {
                let mut items = Vec::new();
                while r.remaining_bytes() >= 4 {
                    items.push(Iso639Language {
                        language: read_lang(&mut r)?,
                        audio_type: r.read_bits(8)? as u8,
                    });
                }
                Descriptor::Iso639LanguageAndAudioType(items)
            }
            TAG_MAXIMUM_BITRATE => {
                r.skip_bits(2)?;
                Descriptor::MaximumBitrate(r.read_bits(22)? as u32)
            }
            TAG_NETWORK_NAME => Descriptor::NetworkName(r.read_remaining()?.to_vec()),
            TAG_PARENTAL_RATING => {
                let mut items = Vec::new();
                while r.remaining_bytes() >= 4 {
                    items.push(ParentalRatingItem {
                        country_code: read_lang(&mut r)?,
                        rating: r.read_bits(8)? as u8,
                    });
                }
                Descriptor::ParentalRating(items)
            }
            TAG_PRIVATE_DATA_SPECIFIER => {
                Descriptor::PrivateDataSpecifier(r.read_bits(32)? as u32)
            }
            TAG_SERVICE => {
                let service_type = r.read_bits(8)? as u8;
                let provider_len = r.read_bits(8)? as usize;
                let provider = r.read_bytes(provider_len)?.to_vec();
                let name_len = r.read_bits(8)? as usize;
                let name = r.read_bytes(name_len)?.to_vec();
                Descriptor::Service(ServiceDescriptor {
                    service_type,
                    provider,
                    name,
                })
            }
            TAG_SHORT_EVENT => {
                let language = read_lang(&mut r)?;
                let name_len = r.read_bits(8)? as usize;
                let event_name = r.read_bytes(name_len)?.to_vec();
                let text_len = r.read_bits(8)? as usize;
                let text = r.read_bytes(text_len)?.to_vec();
                Descriptor::ShortEvent(ShortEventDescriptor {
                    language,
                    event_name,
                    text,
                })
            }
            TAG_STREAM_IDENTIFIER => Descriptor::StreamIdentifier(r.read_bits(8)? as u8),
            TAG_SUBTITLING => {
                let mut items = Vec::new();
                while r.remaining_bytes() >= 8 {
                    items.push(SubtitlingItem {
                        language: read_lang(&mut r)?,
                        subtitling_type: r.read_bits(8)? as u8,
                        composition_page_id: r.read_bits(16)? as u16,
                        ancillary_page_id: r.read_bits(16)? as u16,
                    });
                }
                Descriptor::Subtitling(items)
            }
            TAG_TELETEXT => {
                let mut items = Vec::new();
                while r.remaining_bytes() >= 5 {
                    items.push(TeletextItem {
                        language: read_lang(&mut r)?,
                        teletext_type: r.read_bits(5)? as u8,
                        magazine_number: r.read_bits(3)? as u8,
                        page_number: r.read_bits(8)? as u8,
                    });
                }
                Descriptor::Teletext(items)
            }
            _ => Descriptor::Unknown {
                tag,
                data: data.to_vec(),
            },
        };
        Ok(d)
    }

    /// Writes the descriptor as tag + length + body; returns bytes written.
    pub fn write(&self, buf: &mut BytesMut) -> Result<usize> {
        let mut body = BytesMut::new();
        {
            let mut w = BitWriter::new(&mut body);
            match self {
                Descriptor::Ac3(d) => {
                    w.write_bit(d.component_type.is_some());
                    w.write_bit(d.bsid.is_some());
                    w.write_bit(d.mainid.is_some());
                    w.write_bit(d.asvc.is_some());
                    w.write_bits(0, 4);
                    for field in [d.component_type, d.bsid, d.mainid, d.asvc]
                        .into_iter()
                        .flatten()
                    {
                        w.write_u8(field)?;
                    }
                    w.write_bytes(&d.additional_info)?;
                }
                Descriptor::Component(d) => {
                    w.write_bits(d.stream_content_ext as u64, 4);
                    w.write_bits(d.stream_content as u64, 4);
                    w.write_u8(d.component_type)?;
                    w.write_u8(d.component_tag)?;
                    w.write_bytes(&d.language)?;
                    w.write_bytes(&d.text)?;
                }
                Descriptor::Content(items) => {
                    for item in items {
                        w.write_bits(item.category as u64, 4);
                        w.write_bits(item.detail as u64, 4);
                        w.write_u8(item.user_byte)?;
                    }
                }
                Descriptor::ExtendedEvent(d) => {
                    w.write_bits(d.number as u64, 4);
                    w.write_bits(d.last_number as u64, 4);
                    w.write_bytes(&d.language)?;
                    let items_length: usize =
                        d.items.iter().map(|(desc, item)| 2 + desc.len() + item.len()).sum();
                    w.write_u8(items_length as u8)?;
                    for (description, item) in &d.items {
                        w.write_u8(description.len() as u8)?;
                        w.write_bytes(description)?;
                        w.write_u8(item.len() as u8)?;
                        w.write_bytes(item)?;
                    }
                    w.write_u8(d.text.len() as u8)?;
                    w.write_bytes(&d.text)?;
                }
                Descriptor::Iso639LanguageAndAudioType(items) => {
                    for item in items {
                        w.write_bytes(&item.language)?;
                        w.write_u8(item.audio_type)?;
                    }
                }
                Descriptor::MaximumBitrate(rate) => {
                    w.write_bits(0b11, 2);
                    w.write_bits(*rate as u64, 22);
                }
                Descriptor::NetworkName(name) => w.write_bytes(name)?,
                Descriptor::ParentalRating(items) => {
                    for item in items {
                        w.write_bytes(&item.country_code)?;
                        w.write_u8(item.rating)?;
                    }
                }
                Descriptor::PrivateDataSpecifier(specifier) => {
                    w.write_bits(*specifier as u64, 32);
                }
                Descriptor::Service(d) => {
                    w.write_u8(d.service_type)?;
                    w.write_u8(d.provider.len() as u8)?;
                    w.write_bytes(&d.provider)?;
                    w.write_u8(d.name.len() as u8)?;
                    w.write_bytes(&d.name)?;
                }
                Descriptor::ShortEvent(d) => {
                    w.write_bytes(&d.language)?;
                    w.write_u8(d.event_name.len() as u8)?;
                    w.write_bytes(&d.event_name)?;
                    w.write_u8(d.text.len() as u8)?;
                    w.write_bytes(&d.text)?;
                }
                Descriptor::StreamIdentifier(component_tag) => {
                    w.write_u8(*component_tag)?;
                }
                Descriptor::Subtitling(items) => {
                    for item in items {
                        w.write_bytes(&item.language)?;
                        w.write_u8(item.subtitling_type)?;
                        w.write_bits(item.composition_page_id as u64, 16);
                        w.write_bits(item.ancillary_page_id as u64, 16);
                    }
                }
                Descriptor::Teletext(items) => {
                    for item in items {
                        w.write_bytes(&item.language)?;
                        w.write_bits(item.teletext_type as u64, 5);
                        w.write_bits(item.magazine_number as u64, 3);
                        w.write_u8(item.page_number)?;
                    }
                }
                Descriptor::Unknown { data, .. } => w.write_bytes(data)?,
            }
        }
        if body.len() > 0xff {
            return Err(TsError::InvalidData(format!(
                "descriptor 0x{:02x} body too long: {}",
                self.tag(),
                body.len()
            )));
        }
        buf.extend_from_slice(&[self.tag(), body.len() as u8]);
        buf.extend_from_slice(&body);
        Ok(2 + body.len())
    }
}

/// Parses a descriptor loop occupying exactly `length` bytes of `reader`.
pub fn parse_descriptors(reader: &mut BitReader, length: usize) -> Result<Vec<Descriptor>> {
    let mut r = BitReader::new(reader.read_bytes(length)?);
    let mut descriptors = Vec::new();
    while r.remaining_bytes() >= 2 {
        let tag = r.read_bits(8)? as u8;
        let len = r.read_bits(8)? as usize;
        let body = r.read_bytes(len)?;
        descriptors.push(Descriptor::parse(tag, body)?);
    }
    Ok(descriptors)
}

/// Serializes a descriptor loop; returns total bytes written.
pub fn write_descriptors(buf: &mut BytesMut, descriptors: &[Descriptor]) -> Result<usize> {
    let mut total = 0;
    for descriptor in descriptors {
        total += descriptor.write(buf)?;
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn round_trip(d: Descriptor) {
        let mut buf = BytesMut::new();
        d.write(&mut buf).unwrap();
        assert_eq!(buf[0], d.tag());
        assert_eq!(buf[1] as usize, buf.len() - 2);
        let parsed = Descriptor::parse(buf[0], &buf[2..]).unwrap();
        assert_eq!(parsed, d);
    }

    #[test]
    fn test_service_round_trip() {
        round_trip(Descriptor::Service(ServiceDescriptor {
            service_type: 0x01,
            provider: b"tsio".to_vec(),
            name: b"Channel One".to_vec(),
        }));
    }

    #[test]
    fn test_short_event_round_trip() {
        round_trip(Descriptor::ShortEvent(ShortEventDescriptor {
            language: *b"eng",
            event_name: b"News".to_vec(),
            text: b"Evening news".to_vec(),
        }));
    }

    #[test]
    fn test_extended_event_round_trip() {
        round_trip(Descriptor::ExtendedEvent(ExtendedEventDescriptor {
            number: 0,
            last_number: 1,
            language: *b"spa",
            items: vec![(b"Director".to_vec(), b"N.N.".to_vec())],
            text: b"long text".to_vec(),
        }));
    }

    #[test]
    fn test_ac3_round_trip() {
        round_trip(Descriptor::Ac3(Ac3Descriptor {
            component_type: Some(0x42),
            bsid: None,
            mainid: Some(0x01),
            asvc: None,
            additional_info: vec![0xaa, 0xbb],
        }));
    }

    #[test]
    fn test_loop_descriptors_round_trip() {
        for d in [
            Descriptor::Content(vec![ContentItem {
                category: 2,
                detail: 3,
                user_byte: 0,
            }]),
            Descriptor::Iso639LanguageAndAudioType(vec![Iso639Language {
                language: *b"deu",
                audio_type: 0x03,
            }]),
            Descriptor::ParentalRating(vec![ParentalRatingItem {
                country_code: *b"FRA",
                rating: 0x05,
            }]),
            Descriptor::Subtitling(vec![SubtitlingItem {
                language: *b"eng",
                subtitling_type: 0x10,
                composition_page_id: 1,
                ancillary_page_id: 2,
            }]),
            Descriptor::Teletext(vec![TeletextItem {
                language: *b"eng",
                teletext_type: 0x02,
                magazine_number: 1,
                page_number: 0x88,
            }]),
            Descriptor::MaximumBitrate(0x2fffff),
            Descriptor::PrivateDataSpecifier(0x28),
            Descriptor::StreamIdentifier(0x42),
            Descriptor::NetworkName(b"net".to_vec()),
            Descriptor::Component(ComponentDescriptor {
                stream_content_ext: 0xf,
                stream_content: 0x1,
                component_type: 0x03,
                component_tag: 0x10,
                language: *b"eng",
                text: b"video".to_vec(),
            }),
        ] {
            round_trip(d);
        }
    }

    #[test]
    fn test_unknown_tag_passthrough() {
        let raw = [0x13u8, 0x03, 0x01, 0x02, 0x03];
        let parsed = Descriptor::parse(raw[0], &raw[2..]).unwrap();
        assert_eq!(
            parsed,
            Descriptor::Unknown {
                tag: 0x13,
                data: vec![0x01, 0x02, 0x03]
            }
        );
        let mut buf = BytesMut::new();
        parsed.write(&mut buf).unwrap();
        assert_eq!(&buf[..], &raw);
    }

    #[test]
    fn test_descriptor_loop() {
        let mut buf = BytesMut::new();
        let descriptors = vec![
            Descriptor::StreamIdentifier(1),
            Descriptor::Unknown {
                tag: 0x99,
                data: vec![0xff],
            },
        ];
        let len = write_descriptors(&mut buf, &descriptors).unwrap();
        assert_eq!(len, buf.len());

        let mut reader = BitReader::new(&buf);
        let parsed = parse_descriptors(&mut reader, len).unwrap();
        assert_eq!(parsed, descriptors);
    }
}
