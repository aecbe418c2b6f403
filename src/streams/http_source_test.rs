#[cfg(test)]
mod tests {
    use crate::streams::{ByteSource, HttpSource};
    use wiremock::matchers::{header, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_http_source_range_requests() {
        let mock_server = MockServer::start().await;
        let data = b"Hello wiremock!";
        let len_header = data.len().to_string();

        Mock::given(method("HEAD"))
            .respond_with(
                ResponseTemplate::new(200).insert_header("Content-Length", len_header.as_str()),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        Mock::given(method("GET"))
            .and(header("Range", "bytes=0-4"))
            .respond_with(ResponseTemplate::new(206).set_body_bytes(&data[0..5]))
            .expect(1)
            .mount(&mock_server)
            .await;

        Mock::given(method("GET"))
            .and(header("Range", "bytes=5-14"))
            .respond_with(ResponseTemplate::new(206).set_body_bytes(&data[5..]))
            .expect(1)
            .mount(&mock_server)
            .await;

        let url = format!("{}/file.ts", mock_server.uri());
        let source = HttpSource::new(url).unwrap();

        assert_eq!(source.size().await.unwrap(), Some(data.len() as u64));
        assert_eq!(source.read(0, 5).await.unwrap(), b"Hello");
        // Reads past the end are clamped to the known length
        assert_eq!(source.read(5, 100).await.unwrap(), &data[5..]);
        assert!(source.read(15, 20).await.unwrap().is_empty());

        assert_eq!(source.http_request_count(), 3);
        assert_eq!(source.http_request_bytes_read(), data.len() as u64);
    }

    #[tokio::test]
    async fn test_http_source_error_status() {
        let mock_server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let url = format!("{}/missing.mp4", mock_server.uri());
        let source = HttpSource::new(url).unwrap();
        assert!(source.size().await.is_err());
    }

    #[tokio::test]
    async fn test_http_source_fails_after_close() {
        let mock_server = MockServer::start().await;
        let url = format!("{}/file.mp4", mock_server.uri());
        let source = HttpSource::new(url).unwrap();
        source.close();
        assert!(source.read(0, 4).await.is_err());
    }
}
