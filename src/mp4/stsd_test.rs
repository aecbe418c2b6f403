#[cfg(test)]
mod tests {
    use crate::avc::AvccConfig;
    use crate::codec::Codec;
    use crate::decoder_config;
    use crate::mp4::esds::{build_esds, EsDescriptor, OBJECT_TYPE_MP3};
    use crate::mp4::r#box::make_box;
    use crate::mp4::stsd::*;
    use crate::track::{DecoderConfig, TrackType};

    const SPS: [u8; 28] = [
        0x67, 0x4d, 0x40, 0x1e, 0xec, 0xc0, 0x50, 0x17, 0xfc, 0xb8, 0x0b, 0x50, 0x10, 0x10, 0x14,
        0x00, 0x00, 0x03, 0x01, 0xf4, 0x00, 0x00, 0x5d, 0xa8, 0x3c, 0x58, 0xb6, 0x68,
    ];
    const PPS: [u8; 5] = [0x68, 0xe9, 0x79, 0xcb, 0x20];

    #[test]
    fn test_avc_entry_round_trip() {
        let avcc = AvccConfig::from_parameter_sets(vec![SPS.to_vec()], vec![PPS.to_vec()])
            .expect("avcC")
            .to_bytes();
        let config = decoder_config::avc_from_avcc(&avcc, 640, 360).expect("config");
        let stsd = build_stsd(Codec::Avc, &config).expect("stsd");

        let entry = parse_stsd(&stsd, TrackType::Video).expect("entry");
        assert_eq!(entry.fourcc, "avc1");
        assert_eq!(entry.codec, Some(Codec::Avc));
        assert_eq!((entry.width, entry.height), (640, 360));
        let parsed = entry.decoder_config.expect("decoder config");
        assert_eq!(parsed.codec(), "avc1.4d401e");
        assert_eq!(parsed.description(), Some(avcc.as_slice()));
    }

    #[test]
    fn test_avc_without_description_is_rejected() {
        let config = DecoderConfig::Video(crate::track::VideoDecoderConfig {
            codec: "avc1.4d401e".to_string(),
            coded_width: 640,
            coded_height: 360,
            color_space: None,
            description: None,
        });
        assert!(build_stsd(Codec::Avc, &config).is_err());
    }

    #[test]
    fn test_aac_entry_round_trip() {
        let config = decoder_config::aac_from_asc(&[0x11, 0x90]).expect("config");
        let stsd = build_stsd(Codec::Aac, &config).expect("stsd");
        let entry = parse_stsd(&stsd, TrackType::Audio).expect("entry");
        assert_eq!(entry.codec, Some(Codec::Aac));
        assert_eq!(entry.sample_rate, 48000);
        assert_eq!(entry.channels, 2);
        let parsed = entry.decoder_config.expect("decoder config");
        assert_eq!(parsed.codec(), "mp4a.40.2");
        assert_eq!(parsed.description(), Some(&[0x11, 0x90][..]));
    }

    #[test]
    fn test_mp3_in_quicktime_v1_entry() {
        let esds = build_esds(&EsDescriptor {
            object_type_indication: OBJECT_TYPE_MP3,
            max_bitrate: 0,
            avg_bitrate: 0,
            decoder_specific_info: None,
        });
        let mut payload = vec![0, 0, 0, 0, 0, 0, 0, 1];
        payload.extend_from_slice(&[0, 1, 0, 0, 0, 0, 0, 0]); // version 1
        payload.extend_from_slice(&[0, 2, 0, 16, 0xFF, 0xFE, 0, 0]);
        payload.extend_from_slice(&(44100u32 << 16).to_be_bytes());
        payload.extend_from_slice(&[0u8; 16]);
        payload.extend_from_slice(&make_box("wave", &esds));
        let entry = make_box("mp4a", &payload);
        let mut body = vec![0, 0, 0, 0, 0, 0, 0, 1];
        body.extend_from_slice(&entry);

        let parsed = parse_stsd(&make_box("stsd", &body), TrackType::Audio).expect("entry");
        assert_eq!(parsed.codec, Some(Codec::Mp3));
        assert_eq!(parsed.sample_rate, 44100);
        assert_eq!(parsed.channels, 2);
        assert_eq!(parsed.decoder_config.expect("config").codec(), "mp3");
    }

    #[test]
    fn test_opus_and_vp9_entries() {
        let opus = decoder_config::audio("opus".to_string(), 48000, 2, None);
        let stsd = build_stsd(Codec::Opus, &opus).expect("stsd");
        let entry = parse_stsd(&stsd, TrackType::Audio).expect("entry");
        let head = entry.decoder_config.expect("config");
        assert!(head.description().expect("OpusHead").starts_with(b"OpusHead"));

        let vp9 = decoder_config::vp9_from_vpcc(None, 320, 240);
        let stsd = build_stsd(Codec::Vp9, &vp9).expect("stsd");
        let entry = parse_stsd(&stsd, TrackType::Video).expect("entry");
        let config = entry.decoder_config.expect("config");
        assert_eq!(config.codec(), "vp09.00.10.08");
        assert_eq!(config.description(), None);
    }

    #[test]
    fn test_unknown_fourcc_has_no_codec() {
        let mut payload = vec![0u8; 78];
        payload[24..28].copy_from_slice(&[0, 16, 0, 16]);
        let entry = make_box("mjp2", &payload);
        let mut body = vec![0, 0, 0, 0, 0, 0, 0, 1];
        body.extend_from_slice(&entry);
        let parsed = parse_stsd(&make_box("stsd", &body), TrackType::Video).expect("entry");
        assert_eq!(parsed.codec, None);
        assert_eq!(parsed.width, 16);
        assert!(build_stsd(Codec::Vorbis, &decoder_config::audio("vorbis".into(), 48000, 2, None)).is_err());
    }
}
