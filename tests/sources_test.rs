mod common;

use common::*;
use mediamux::{
    convert, Codec, ContainerFormat, ConversionOptions, FileTarget, Input, InputOptions,
    MemorySource, OutputFormat, PacketRetrievalOptions,
};
use std::sync::Arc;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// Serves `bytes=a-b` ranges of a fixed body.
struct RangeResponder(Vec<u8>);

impl Respond for RangeResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let Some(range) = request
            .headers
            .get("Range")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("bytes="))
        else {
            return ResponseTemplate::new(200).set_body_bytes(self.0.clone());
        };
        let (start, end) = range.split_once('-').unwrap();
        let start: usize = start.parse().unwrap();
        let end = end.parse::<usize>().unwrap().min(self.0.len() - 1);
        if start >= self.0.len() {
            return ResponseTemplate::new(416);
        }
        ResponseTemplate::new(206).set_body_bytes(self.0[start..=end].to_vec())
    }
}

#[tokio::test]
async fn test_http_input() {
    let data = transport_stream(false).await;
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .respond_with(
            ResponseTemplate::new(200).insert_header("Content-Length", data.len().to_string().as_str()),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(RangeResponder(data.clone()))
        .mount(&server)
        .await;

    let input = Input::open(&format!("{}/clip.ts", server.uri())).await.unwrap();
    assert_eq!(input.format().await.unwrap(), ContainerFormat::MpegTs);
    let video = track_of(&input, Codec::Avc).await;
    let packet = video
        .packet_sink()
        .get_packet(START + 0.5, PacketRetrievalOptions::default())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(packet.data, video_frame(15));
    let duration = input.compute_duration().await.unwrap();
    assert!((duration - (START + VIDEO_FRAMES as f64 / FPS)).abs() < 0.05);
    input.print_stats();

    input.close();
    assert!(video
        .packet_sink()
        .get_packet(START + 1.5, PacketRetrievalOptions::default())
        .await
        .is_err());
}

#[tokio::test]
async fn test_file_conversion() {
    let dir = tempfile::tempdir().unwrap();
    let source_path = dir.path().join("clip.ts");
    let output_path = dir.path().join("clip.mkv");
    tokio::fs::write(&source_path, transport_stream(false).await)
        .await
        .unwrap();

    let target = FileTarget::create(&output_path).await.unwrap();
    let discarded = convert(
        source_path.to_str().unwrap(),
        OutputFormat::matroska(),
        Box::new(target),
        ConversionOptions::default(),
    )
    .await
    .unwrap();
    assert!(discarded.is_empty());

    let output = Input::open_file(&output_path).await.unwrap();
    assert_eq!(output.format().await.unwrap(), ContainerFormat::Matroska);
    assert_eq!(output.tracks().await.unwrap().len(), 2);
    let audio = track_of(&output, Codec::Aac).await;
    assert_eq!(audio.language(), "eng");
    let stats = audio.compute_packet_stats(None).await.unwrap();
    assert_eq!(stats.packet_count, AUDIO_FRAMES);
    assert!(stats.average_bitrate > 0.0);
}

#[tokio::test]
async fn test_concurrent_seeks_match_sequential() {
    let data = transport_stream(false).await;
    let targets: Vec<f64> = (0..40).map(|i| START - 0.2 + i as f64 * 0.06).collect();

    let reference = Input::from_bytes(data.clone());
    let sink = track_of(&reference, Codec::Avc).await.packet_sink();
    let mut expected = Vec::new();
    for t in &targets {
        expected.push(sink.get_packet(*t, PacketRetrievalOptions::default()).await.unwrap());
    }

    let options = InputOptions {
        seek_chunk_size: 2048,
        ..Default::default()
    };
    let input = Input::new(Arc::new(MemorySource::new(data)), options);
    let sink = track_of(&input, Codec::Avc).await.packet_sink();
    let handles: Vec<_> = targets
        .iter()
        .rev()
        .map(|t| {
            let sink = sink.clone();
            let t = *t;
            tokio::spawn(async move { sink.get_packet(t, PacketRetrievalOptions::default()).await })
        })
        .collect();
    let mut actual = Vec::new();
    for handle in handles {
        actual.push(handle.await.unwrap().unwrap());
    }
    actual.reverse();
    assert_eq!(actual, expected);
    assert!(expected[0].is_none());
}

#[tokio::test]
async fn test_metadata_only_reads_less_than_payload() {
    let source = Input::from_bytes(transport_stream(false).await);
    let target = mediamux::BufferTarget::new();
    let output = mediamux::Output::new(OutputFormat::mp4(), Box::new(target.clone())).unwrap();
    let mut conversion = mediamux::Conversion::init(&source, output, ConversionOptions::default(), None)
        .await
        .unwrap();
    conversion.execute().await.unwrap();

    let mp4 = Input::from_bytes(target.bytes().await);
    let mut payload = 0;
    for track in mp4.tracks().await.unwrap() {
        let packets = collect(&track, PacketRetrievalOptions::metadata_only()).await;
        assert!(packets.iter().all(|p| p.is_metadata_only()));
        payload += packets.iter().map(|p| p.byte_length as u64).sum::<u64>();
    }
    assert!(mp4.bytes_read() < payload);
}

#[tokio::test]
async fn test_track_listing_reads_only_the_head() {
    let data = long_video_stream(2000).await;
    assert!(data.len() > 3 << 20);
    let input = Input::from_bytes(data);
    let tracks = input.tracks().await.unwrap();
    assert_eq!(tracks.len(), 1);
    assert!(
        input.bytes_read() <= 86 * 1024,
        "read {} bytes to list tracks",
        input.bytes_read()
    );

    // seeking afterwards still reaches the end
    let sink = tracks[0].packet_sink();
    let last = sink
        .get_packet(f64::INFINITY, PacketRetrievalOptions::metadata_only())
        .await
        .unwrap()
        .unwrap();
    assert!((last.timestamp - (START + 1999.0 / FPS)).abs() < 1e-3);
}
