//! HTTP elevation source tests against a local stub provider.
//!
//! The live provider test needs network access:
//! cargo test -p spiral-terrain --test http_source_test -- --ignored

use spiral_core::{ElevationError, ElevationSource, GeoPoint};
use spiral_terrain::{ElevationConfig, OpenMeteoElevation};
use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::thread::{self, JoinHandle};

enum Reply {
    /// One elevation per requested latitude: 1500, 1501, ...
    Elevations,
    Status(u16, &'static str),
    Body(&'static str),
}

/// Answer one connection per reply, in order. Yields the request lines.
fn serve(replies: Vec<Reply>) -> (String, JoinHandle<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("http://{}/v1/elevation", listener.local_addr().unwrap());
    let handle = thread::spawn(move || {
        let mut seen = Vec::new();
        for reply in replies {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream);
            let mut request_line = String::new();
            reader.read_line(&mut request_line).unwrap();
            loop {
                let mut header = String::new();
                reader.read_line(&mut header).unwrap();
                if header == "\r\n" || header.is_empty() {
                    break;
                }
            }

            let (status, body) = match reply {
                Reply::Elevations => {
                    let values: Vec<String> = (0..latitude_count(&request_line))
                        .map(|i| format!("{}.0", 1500 + i))
                        .collect();
                    (
                        "200 OK".to_string(),
                        format!("{{\"elevation\":[{}]}}", values.join(",")),
                    )
                }
                Reply::Status(code, reason) => (format!("{code} {reason}"), "{}".to_string()),
                Reply::Body(body) => ("200 OK".to_string(), body.to_string()),
            };
            let mut stream = reader.into_inner();
            write!(
                stream,
                "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            )
            .unwrap();
            stream.flush().unwrap();
            seen.push(request_line.trim().to_string());
        }
        seen
    });
    (url, handle)
}

fn latitude_count(request_line: &str) -> usize {
    request_line
        .split(|c| c == '?' || c == '&' || c == ' ')
        .find_map(|part| part.strip_prefix("latitude="))
        .map_or(0, |list| list.split(',').count())
}

fn config(url: String) -> ElevationConfig {
    ElevationConfig {
        provider_url: url,
        retry_backoff_ms: 1,
        ..ElevationConfig::default()
    }
}

fn points(n: usize) -> Vec<GeoPoint> {
    (0..n)
        .map(|i| GeoPoint::new(39.7392 + i as f64 * 0.0005, -104.9903))
        .collect()
}

#[test]
fn fetches_in_batches_and_caches() {
    let (url, server) = serve(vec![Reply::Elevations, Reply::Elevations]);
    let source = OpenMeteoElevation::new(ElevationConfig {
        api_key: Some("test-key".to_string()),
        max_points_per_request: 3,
        retries: 0,
        ..config(url)
    })
    .unwrap();

    let first = source.sample(&points(5)).unwrap();
    assert_eq!(first, vec![1500.0, 1501.0, 1502.0, 1500.0, 1501.0]);
    let again = source.sample(&points(5)).unwrap();
    assert_eq!(again, first);
    assert_eq!(source.cached_points(), 5);

    let requests = server.join().unwrap();
    assert_eq!(requests.len(), 2);
    assert!(requests.iter().all(|line| line.starts_with("GET /v1/elevation?latitude=")));
    assert!(requests.iter().all(|line| line.contains("&apikey=test-key")));
    assert_eq!(latitude_count(&requests[0]), 3);
    assert_eq!(latitude_count(&requests[1]), 2);
}

#[test]
fn retries_transient_failures() {
    let (url, server) = serve(vec![
        Reply::Status(503, "Service Unavailable"),
        Reply::Elevations,
    ]);
    let source = OpenMeteoElevation::new(config(url)).unwrap();
    assert_eq!(source.sample(&points(2)).unwrap(), vec![1500.0, 1501.0]);
    assert_eq!(server.join().unwrap().len(), 2);
}

#[test]
fn exhausted_retries_report_unavailable() {
    let (url, server) = serve(vec![
        Reply::Status(503, "Service Unavailable"),
        Reply::Status(429, "Too Many Requests"),
    ]);
    let source = OpenMeteoElevation::new(ElevationConfig {
        retries: 1,
        ..config(url)
    })
    .unwrap();
    let err = source.sample(&points(2)).unwrap_err();
    assert!(matches!(err, ElevationError::Unavailable(ref msg) if msg.contains("429")));
    assert_eq!(server.join().unwrap().len(), 2);
}

#[test]
fn client_errors_are_not_retried() {
    let (url, server) = serve(vec![Reply::Status(400, "Bad Request")]);
    let source = OpenMeteoElevation::new(config(url)).unwrap();
    let err = source.sample(&points(1)).unwrap_err();
    assert!(matches!(err, ElevationError::InvalidResponse(ref msg) if msg.contains("400")));
    assert_eq!(server.join().unwrap().len(), 1);
}

#[test]
fn null_elevations_are_errors() {
    let (url, server) = serve(vec![Reply::Body(r#"{"elevation":[1500.0,null]}"#)]);
    let source = OpenMeteoElevation::new(config(url)).unwrap();
    assert!(matches!(
        source.sample(&points(2)),
        Err(ElevationError::InvalidResponse(_))
    ));
    server.join().unwrap();
    assert_eq!(source.cached_points(), 0);
}

#[test]
#[ignore]
fn live_open_meteo_denver() {
    let source = OpenMeteoElevation::new(ElevationConfig::default()).unwrap();
    let elevations = source.sample(&[GeoPoint::new(39.7392, -104.9903)]).unwrap();
    assert!((1500.0..1700.0).contains(&elevations[0]), "{elevations:?}");
}
