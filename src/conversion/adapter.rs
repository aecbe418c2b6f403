//! Packet framing conversion between containers.
//!
//! A decoder config with a `description` marks the boxed convention
//! (length-prefixed NAL units, raw AAC); without one the stream is
//! self-describing (Annex B, ADTS).

use crate::aac::{prepend_adts_header, strip_adts_header, AudioSpecificConfig};
use crate::avc::{
    annex_b_to_length_prefixed, length_prefixed_to_annex_b, AvccConfig, NalUnitFormat, NalUnitIter,
    NaluType,
};
use crate::codec::Codec;
use crate::decoder_config::{aac_from_asc, avc_from_annex_b, hevc_from_annex_b};
use crate::errors::{MediaError, MediaResult};
use crate::hevc::{HevcNaluType, HvccConfig};
use crate::mux::OutputFormat;
use crate::packet::EncodedPacket;
use crate::track::DecoderConfig;

/// Length prefix written when converting to the boxed convention.
const LENGTH_SIZE: u8 = 4;

#[derive(Debug, Clone, PartialEq)]
pub enum BitstreamAdapter {
    Passthrough,
    AnnexBToLengthPrefixed {
        codec: Codec,
    },
    LengthPrefixedToAnnexB {
        codec: Codec,
        length_size: u8,
        /// Start-code delimited parameter sets from the configuration record.
        parameter_sets: Vec<u8>,
    },
    AdtsToRaw,
    RawToAdts(AudioSpecificConfig),
}

impl BitstreamAdapter {
    /// The conversion needed to store `codec` packets described by `config` in `format`.
    pub fn plan(codec: Codec, config: Option<&DecoderConfig>, format: &OutputFormat) -> MediaResult<Self> {
        let description = config.and_then(DecoderConfig::description);
        if codec.uses_nal_units() {
            let target_boxed = format.nal_format() != NalUnitFormat::AnnexB;
            return Ok(match (description, target_boxed) {
                (None, true) => BitstreamAdapter::AnnexBToLengthPrefixed { codec },
                (Some(record), false) => {
                    let (length_size, parameter_sets) = match codec {
                        Codec::Hevc => {
                            let hvcc = HvccConfig::parse(record)?;
                            (hvcc.nal_length_size(), hvcc.parameter_sets_annex_b())
                        }
                        _ => {
                            let avcc = AvccConfig::parse(record)?;
                            (avcc.nal_length_size(), avcc.parameter_sets_annex_b())
                        }
                    };
                    BitstreamAdapter::LengthPrefixedToAnnexB {
                        codec,
                        length_size,
                        parameter_sets,
                    }
                }
                _ => BitstreamAdapter::Passthrough,
            });
        }
        if codec == Codec::Aac {
            return Ok(match (description, format.uses_adts()) {
                (None, false) => BitstreamAdapter::AdtsToRaw,
                (Some(asc), true) => BitstreamAdapter::RawToAdts(AudioSpecificConfig::parse(asc)?),
                _ => BitstreamAdapter::Passthrough,
            });
        }
        Ok(BitstreamAdapter::Passthrough)
    }

    pub fn is_passthrough(&self) -> bool {
        matches!(self, BitstreamAdapter::Passthrough)
    }

    /// Decoder config of the converted stream. Records built from in-band
    /// parameters are taken from `first`, the track's first packet.
    pub fn convert_config(
        &self,
        config: Option<&DecoderConfig>,
        first: &EncodedPacket,
    ) -> MediaResult<Option<DecoderConfig>> {
        match self {
            BitstreamAdapter::Passthrough => Ok(config.cloned()),
            BitstreamAdapter::AnnexBToLengthPrefixed { codec } => {
                let (base, record) = match codec {
                    Codec::Hevc => (
                        config.cloned().map_or_else(|| hevc_from_annex_b(&first.data), Ok)?,
                        HvccConfig::from_annex_b(&first.data)?.to_bytes(),
                    ),
                    _ => (
                        config.cloned().map_or_else(|| avc_from_annex_b(&first.data), Ok)?,
                        AvccConfig::from_annex_b(&first.data)?.to_bytes(),
                    ),
                };
                Ok(Some(base.with_description(Some(record))))
            }
            BitstreamAdapter::LengthPrefixedToAnnexB { .. } | BitstreamAdapter::RawToAdts(_) => {
                Ok(config.map(|c| c.with_description(None)))
            }
            BitstreamAdapter::AdtsToRaw => {
                let (header, _) = strip_adts_header(&first.data)?;
                aac_from_asc(&header.audio_specific_config().to_bytes()).map(Some)
            }
        }
    }

    pub fn convert(&self, packet: &EncodedPacket) -> MediaResult<EncodedPacket> {
        let data = match self {
            BitstreamAdapter::Passthrough => return Ok(packet.clone()),
            BitstreamAdapter::AnnexBToLengthPrefixed { .. } => {
                annex_b_to_length_prefixed(&packet.data, LENGTH_SIZE)?
            }
            BitstreamAdapter::LengthPrefixedToAnnexB {
                codec,
                length_size,
                parameter_sets,
            } => {
                let annex_b = length_prefixed_to_annex_b(&packet.data, *length_size)?;
                if packet.is_key() && !has_parameter_sets(&annex_b, *codec) {
                    [parameter_sets.as_slice(), annex_b.as_slice()].concat()
                } else {
                    annex_b
                }
            }
            BitstreamAdapter::AdtsToRaw => {
                let (_, raw) = strip_adts_header(&packet.data)
                    .map_err(|_| MediaError::conversion("AAC packet is not an ADTS frame"))?;
                raw.to_vec()
            }
            BitstreamAdapter::RawToAdts(asc) => prepend_adts_header(&packet.data, asc)?,
        };
        Ok(packet.with_data(data))
    }
}

/// Whether an Annex B packet carries its own sequence parameter set.
fn has_parameter_sets(data: &[u8], codec: Codec) -> bool {
    NalUnitIter::new(data, NalUnitFormat::AnnexB)
        .filter_map(|nal| nal.slice(data).first().copied())
        .any(|header| match codec {
            Codec::Hevc => HevcNaluType::from_header_byte(header) == HevcNaluType::SPS,
            _ => NaluType::from_header_byte(header) == NaluType::SPS,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder_config::tests::{PPS, SPS};
    use crate::mux::{MatroskaOptions, Mp4Options, MpegTsOptions};
    use crate::packet::PacketType;

    fn annex_b_key() -> Vec<u8> {
        let mut data = Vec::new();
        for nal in [&SPS[..], &PPS[..], &[0x65, 0x88, 0x80, 0x40][..]] {
            data.extend_from_slice(&[0, 0, 0, 1]);
            data.extend_from_slice(nal);
        }
        data
    }

    #[test]
    fn test_plan_by_description() {
        let ts = OutputFormat::MpegTs(MpegTsOptions::default());
        let mp4 = OutputFormat::Mp4(Mp4Options::default());
        let annex_b = avc_from_annex_b(&annex_b_key()).unwrap();
        assert_eq!(
            BitstreamAdapter::plan(Codec::Avc, Some(&annex_b), &ts).unwrap(),
            BitstreamAdapter::Passthrough
        );
        assert_eq!(
            BitstreamAdapter::plan(Codec::Avc, Some(&annex_b), &mp4).unwrap(),
            BitstreamAdapter::AnnexBToLengthPrefixed { codec: Codec::Avc }
        );
        let raw_aac = aac_from_asc(&[0x12, 0x10]).unwrap();
        assert!(matches!(
            BitstreamAdapter::plan(Codec::Aac, Some(&raw_aac), &ts).unwrap(),
            BitstreamAdapter::RawToAdts(_)
        ));
        assert!(BitstreamAdapter::plan(Codec::Aac, Some(&raw_aac), &OutputFormat::Matroska(MatroskaOptions::default()))
            .unwrap()
            .is_passthrough());
        assert!(BitstreamAdapter::plan(Codec::Opus, None, &mp4).unwrap().is_passthrough());
    }

    #[test]
    fn test_annex_b_through_boxed_and_back() {
        let mp4 = OutputFormat::Mp4(Mp4Options::default());
        let ts = OutputFormat::MpegTs(MpegTsOptions::default());
        let key = EncodedPacket::new(annex_b_key(), PacketType::Key, 0.0, 0.04);

        let to_boxed = BitstreamAdapter::plan(Codec::Avc, None, &mp4).unwrap();
        let config = to_boxed.convert_config(None, &key).unwrap().unwrap();
        assert_eq!(config.codec(), "avc1.4d401e");
        let boxed = to_boxed.convert(&key).unwrap();
        assert_eq!(&boxed.data[..4], &(SPS.len() as u32).to_be_bytes());

        let to_annex_b = BitstreamAdapter::plan(Codec::Avc, Some(&config), &ts).unwrap();
        assert_eq!(to_annex_b.convert_config(Some(&config), &boxed).unwrap().unwrap().description(), None);
        // parameter sets already in band are not duplicated
        assert_eq!(to_annex_b.convert(&boxed).unwrap().data, key.data);
    }

    #[test]
    fn test_key_packet_gains_parameter_sets() {
        let ts = OutputFormat::MpegTs(MpegTsOptions::default());
        let avcc = AvccConfig::from_annex_b(&annex_b_key()).unwrap().to_bytes();
        let config = crate::decoder_config::avc_from_avcc(&avcc, 640, 360).unwrap();
        let adapter = BitstreamAdapter::plan(Codec::Avc, Some(&config), &ts).unwrap();

        let slice = [0u8, 0, 0, 4, 0x65, 0x88, 0x80, 0x40];
        let key = EncodedPacket::new(slice.to_vec(), PacketType::Key, 0.0, 0.04);
        assert_eq!(adapter.convert(&key).unwrap().data, annex_b_key());
        let delta = EncodedPacket::new(vec![0, 0, 0, 2, 0x41, 0x9A], PacketType::Delta, 0.04, 0.04);
        assert_eq!(adapter.convert(&delta).unwrap().data, vec![0, 0, 0, 1, 0x41, 0x9A]);
    }

    #[test]
    fn test_adts_to_raw_derives_description() {
        let mp4 = OutputFormat::Mp4(Mp4Options::default());
        let asc = AudioSpecificConfig::new(2, 44100, 2);
        let frame = prepend_adts_header(&[5; 20], &asc).unwrap();
        let packet = EncodedPacket::new(frame.clone(), PacketType::Key, 0.0, 1024.0 / 44100.0);
        let framed = crate::decoder_config::aac_from_adts(&frame).unwrap();

        let adapter = BitstreamAdapter::plan(Codec::Aac, Some(&framed), &mp4).unwrap();
        assert_eq!(adapter, BitstreamAdapter::AdtsToRaw);
        let config = adapter.convert_config(Some(&framed), &packet).unwrap().unwrap();
        assert_eq!(config.description(), Some(&[0x12, 0x10][..]));
        let raw = adapter.convert(&packet).unwrap();
        assert_eq!(raw.data, vec![5; 20]);
        assert_eq!(raw.timestamp, packet.timestamp);

        let back = BitstreamAdapter::RawToAdts(asc).convert(&raw).unwrap();
        assert_eq!(back.data, frame);
    }
}
