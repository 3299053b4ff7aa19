use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use papersmith_backend::hosted::gemini::{GeminiEmbedder, GeminiGenerator};
use papersmith_backend::hosted::openai::{OpenAiEmbedder, OpenAiGenerator};
use papersmith_backend::{create_embedder, create_generator, BackendKind, FakeEmbedder};
use papersmith_core::config::BackendSettings;
use papersmith_core::error::{BackendError, Error};
use papersmith_core::traits::{Embedder, Generator};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// A canned HTTP reply; `None` holds the connection open without answering.
type Reply = Option<(u16, String)>;

async fn read_request(sock: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = sock.read(&mut chunk).await.unwrap();
        if n == 0 {
            return String::from_utf8_lossy(&buf).to_string();
        }
        buf.extend_from_slice(&chunk[..n]);
        let Some(head_end) = buf.windows(4).position(|w| w == b"\r\n\r\n") else { continue };
        let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
        let len = head
            .to_lowercase()
            .lines()
            .find_map(|l| l.strip_prefix("content-length:"))
            .and_then(|v| v.trim().parse::<usize>().ok())
            .unwrap_or(0);
        if buf.len() >= head_end + 4 + len {
            return head;
        }
    }
}

struct MockServer {
    url: String,
    hits: Arc<AtomicUsize>,
    /// Request line and headers of every request served.
    heads: Arc<Mutex<Vec<String>>>,
}

/// Serves `replies` in order, one connection each.
async fn mock_server(replies: Vec<Reply>) -> MockServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let heads = Arc::new(Mutex::new(Vec::new()));
    let (counter, seen) = (hits.clone(), heads.clone());
    tokio::spawn(async move {
        for reply in replies {
            let (mut sock, _) = listener.accept().await.unwrap();
            let head = read_request(&mut sock).await;
            seen.lock().push(head);
            counter.fetch_add(1, Ordering::SeqCst);
            match reply {
                Some((status, body)) => {
                    let response = format!(
                        "HTTP/1.1 {} Mock\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        status,
                        body.len(),
                        body
                    );
                    sock.write_all(response.as_bytes()).await.unwrap();
                    let _ = sock.shutdown().await;
                }
                None => {
                    tokio::spawn(async move {
                        tokio::time::sleep(Duration::from_secs(10)).await;
                        drop(sock);
                    });
                }
            }
        }
    });
    MockServer { url: format!("http://{}", addr), hits, heads }
}

fn settings_for(base_url: &str) -> BackendSettings {
    let mut settings = BackendSettings::default();
    settings.initial_backoff_ms = 1;
    settings.request_timeout_secs = 5;
    settings.gemini.api_key = Some("test-key".to_string());
    settings.gemini.base_url = base_url.to_string();
    settings.openai.api_key = Some("test-key".to_string());
    settings.openai.base_url = base_url.to_string();
    settings
}

#[tokio::test]
async fn gemini_generation_retries_server_errors() {
    let server = mock_server(vec![
        Some((503, r#"{"error": {"message": "overloaded"}}"#.to_string())),
        Some((200, r#"{"candidates": [{"content": {"parts": [{"text": "Gradient descent."}]}}]}"#.to_string())),
    ])
    .await;
    let generator = GeminiGenerator::new(&settings_for(&server.url)).unwrap();
    let text = generator.generate("What is gradient descent?", 64).await.unwrap();
    assert_eq!(text, "Gradient descent.");
    assert_eq!(server.hits.load(Ordering::SeqCst), 2);
    assert_eq!(generator.id(), "gemini:gemini-2.0-flash");
}

#[tokio::test]
async fn gemini_batch_embeddings_keep_input_order() {
    let server = mock_server(vec![Some((
        200,
        r#"{"embeddings": [{"values": [1.0, 0.0]}, {"values": [0.0, 1.0]}]}"#.to_string(),
    ))])
    .await;
    let embedder = GeminiEmbedder::new(&settings_for(&server.url)).unwrap();
    let vectors = embedder.embed_batch(&["a".to_string(), "b".to_string()]).await.unwrap();
    assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
}

#[tokio::test]
async fn openai_auth_failure_is_not_retried() {
    let server =
        mock_server(vec![Some((401, r#"{"error": {"message": "Incorrect API key provided"}}"#.to_string()))]).await;
    let embedder = OpenAiEmbedder::new(&settings_for(&server.url)).unwrap();
    let err = embedder.embed("hello").await.unwrap_err();
    assert!(matches!(err, BackendError::Unavailable { transient: false, .. }), "{err}");
    assert!(err.to_string().contains("Incorrect API key"));
    assert_eq!(server.hits.load(Ordering::SeqCst), 1);
    assert!(server.heads.lock()[0].to_lowercase().contains("authorization: bearer test-key"));
}

#[tokio::test]
async fn openai_chat_without_text_is_invalid() {
    let server =
        mock_server(vec![Some((200, r#"{"choices": [{"message": {"content": null}}]}"#.to_string()))]).await;
    let generator = OpenAiGenerator::new(&settings_for(&server.url)).unwrap();
    let err = generator.generate("hi", 8).await.unwrap_err();
    assert!(matches!(err, BackendError::InvalidResponse { .. }));
}

#[tokio::test]
async fn slow_provider_maps_to_timeout() {
    let server = mock_server(vec![None]).await;
    let mut settings = settings_for(&server.url);
    settings.request_timeout_secs = 1;
    settings.max_retries = 1;
    let generator = GeminiGenerator::new(&settings).unwrap();
    let err = generator.generate("hi", 8).await.unwrap_err();
    assert!(matches!(err, BackendError::Timeout { .. }), "{err}");
}

#[tokio::test]
async fn timed_out_requests_are_retried() {
    let server = mock_server(vec![
        None,
        Some((200, r#"{"candidates": [{"content": {"parts": [{"text": "Recovered."}]}}]}"#.to_string())),
    ])
    .await;
    let mut settings = settings_for(&server.url);
    settings.request_timeout_secs = 1;
    let generator = GeminiGenerator::new(&settings).unwrap();
    assert_eq!(generator.generate("hi", 8).await.unwrap(), "Recovered.");
    assert_eq!(server.hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn gemini_key_travels_in_a_header() {
    let server = mock_server(vec![Some((200, r#"{"embedding": {"values": [0.5, 0.5]}}"#.to_string()))]).await;
    let embedder = GeminiEmbedder::new(&settings_for(&server.url)).unwrap();
    embedder.embed("hello").await.unwrap();
    let head = server.heads.lock()[0].clone();
    let request_line = head.lines().next().unwrap();
    assert!(!request_line.contains("test-key"), "{request_line}");
    assert!(head.to_lowercase().contains("x-goog-api-key: test-key"), "{head}");
}

#[tokio::test]
async fn transport_errors_never_carry_the_api_key() {
    let mut settings = settings_for("http://127.0.0.1:1");
    settings.gemini.api_key = Some("SECRETKEY123".to_string());
    settings.max_retries = 1;
    let embedder = GeminiEmbedder::new(&settings).unwrap();
    let err = embedder.embed("hello").await.unwrap_err();
    assert!(err.is_transient(), "{err}");
    assert!(!err.to_string().contains("SECRETKEY123"), "{err}");
    assert!(!format!("{err:?}").contains("SECRETKEY123"), "{err:?}");
}

#[test]
fn factory_rejects_unknown_and_unsupported_ids() {
    let mut settings = BackendSettings::default();
    settings.embedding = "ollama".to_string();
    assert!(matches!(
        create_embedder(&settings).err(),
        Some(Error::UnknownBackend { role: "embedding", .. })
    ));

    settings.generation = "fake".to_string();
    assert!(matches!(
        create_generator(&settings).err(),
        Some(Error::UnknownBackend { role: "generation", .. })
    ));
}

#[tokio::test]
async fn factory_builds_the_fake_embedder() {
    let mut settings = BackendSettings::default();
    settings.embedding = BackendKind::Fake.as_str().to_string();
    let embedder = create_embedder(&settings).unwrap();
    assert_eq!(embedder.id(), FakeEmbedder::default().id());
    assert_eq!(embedder.embed("x").await.unwrap().len(), papersmith_backend::fake::FAKE_DIM);
}
