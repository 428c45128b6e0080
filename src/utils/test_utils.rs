#[cfg(test)]
use std::collections::VecDeque;
#[cfg(test)]
use std::sync::atomic::{AtomicUsize, Ordering};
#[cfg(test)]
use std::sync::{Arc, Mutex};

#[cfg(test)]
use crate::core::chat_stream::StreamSink;
#[cfg(test)]
use crate::core::client::ChatClient;
#[cfg(test)]
use crate::core::persistence::{MemoryStorage, PersistenceSynchronizer};
#[cfg(test)]
use crate::core::providers::{
    Answer, GenerationProvider, ProviderError, ProviderId, ProviderRegistry, ProviderSettings,
    QueryContext,
};
#[cfg(test)]
use tokio::io::{AsyncReadExt, AsyncWriteExt};
#[cfg(test)]
use tokio::net::{TcpListener, TcpStream};

#[cfg(test)]
pub struct CannedResponse {
    pub status_line: &'static str,
    pub body: String,
}

#[cfg(test)]
impl CannedResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status_line: "200 OK",
            body: body.into(),
        }
    }

    pub fn status(status_line: &'static str, body: impl Into<String>) -> Self {
        Self {
            status_line,
            body: body.into(),
        }
    }
}

#[cfg(test)]
async fn read_request(socket: &mut TcpStream) -> String {
    let mut buffer = vec![0_u8; 16 * 1024];
    let mut request = Vec::new();
    loop {
        let read = socket.read(&mut buffer).await.expect("read request");
        if read == 0 {
            break;
        }
        request.extend_from_slice(&buffer[..read]);
        let text = String::from_utf8_lossy(&request);
        if let Some(header_end) = text.find("\r\n\r\n") {
            let content_length = text[..header_end]
                .lines()
                .find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    if name.eq_ignore_ascii_case("content-length") {
                        value.trim().parse::<usize>().ok()
                    } else {
                        None
                    }
                })
                .unwrap_or(0);
            if request.len() >= header_end + 4 + content_length {
                break;
            }
        }
    }
    String::from_utf8_lossy(&request).to_string()
}

/// Serve `responses` to consecutive connections, one request each, and
/// return the raw request texts in arrival order.
#[cfg(test)]
pub async fn serve_http(
    responses: Vec<CannedResponse>,
) -> (String, tokio::task::JoinHandle<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test listener");
    let addr = listener.local_addr().expect("listener address");
    let handle = tokio::spawn(async move {
        let mut requests = Vec::new();
        for canned in responses {
            let (mut socket, _) = listener.accept().await.expect("accept");
            requests.push(read_request(&mut socket).await);
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                canned.status_line,
                canned.body.len(),
                canned.body
            );
            socket
                .write_all(response.as_bytes())
                .await
                .expect("write response");
            socket.shutdown().await.ok();
        }
        requests
    });
    (format!("http://{addr}"), handle)
}

#[cfg(test)]
pub async fn serve_once(
    response: CannedResponse,
) -> (String, tokio::task::JoinHandle<String>) {
    let (url, handle) = serve_http(vec![response]).await;
    let single = tokio::spawn(async move {
        handle
            .await
            .expect("server task")
            .into_iter()
            .next()
            .unwrap_or_default()
    });
    (url, single)
}

/// Provider that replays canned wire frames instead of calling a backend.
///
/// Each streaming call takes the next script; every frame is one flush.
/// All frames are queued before `stream_response` returns, so tests see
/// them as already in flight.
#[cfg(test)]
pub struct ScriptedProvider {
    scripts: Mutex<VecDeque<Vec<String>>>,
    answer: Option<String>,
    streaming: bool,
    calls: AtomicUsize,
}

#[cfg(test)]
impl ScriptedProvider {
    pub fn streaming(scripts: Vec<Vec<&str>>) -> Self {
        Self {
            scripts: Mutex::new(
                scripts
                    .into_iter()
                    .map(|frames| frames.into_iter().map(str::to_string).collect())
                    .collect(),
            ),
            answer: None,
            streaming: true,
            calls: AtomicUsize::new(0),
        }
    }

    /// Single-shot only; `None` makes every answer fail.
    pub fn single_shot(answer: Option<&str>) -> Self {
        Self {
            scripts: Mutex::new(VecDeque::new()),
            answer: answer.map(str::to_string),
            streaming: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
#[async_trait::async_trait]
impl GenerationProvider for ScriptedProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Local
    }

    fn model_label(&self) -> &str {
        "scripted"
    }

    fn supports_streaming(&self) -> bool {
        self.streaming
    }

    async fn generate_response(
        &self,
        _query: &str,
        _context: &QueryContext,
    ) -> Result<Answer, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.answer {
            Some(text) => Ok(Answer {
                text: text.clone(),
                sources: Vec::new(),
            }),
            None => Err(ProviderError::EmptyAnswer),
        }
    }

    async fn stream_response(
        &self,
        _query: &str,
        _context: &QueryContext,
        sink: StreamSink,
    ) -> Result<(), ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let frames = self
            .scripts
            .lock()
            .expect("scripts lock")
            .pop_front()
            .unwrap_or_default();
        let source = futures_util::stream::iter(
            frames
                .into_iter()
                .map(|frame| Ok::<_, std::convert::Infallible>(format!("{frame}\n").into_bytes())),
        );
        sink.pump(source).await;
        Ok(())
    }
}

#[cfg(test)]
pub fn test_provider_settings() -> ProviderSettings {
    ProviderSettings {
        backend_url: "http://127.0.0.1:9".into(),
        local_model: "local-test".into(),
        openai: None,
        gemini: None,
    }
}

/// Client wired to `provider` (as `local`) and fresh in-memory storage.
#[cfg(test)]
pub fn create_test_client(provider: Arc<ScriptedProvider>) -> (ChatClient, Arc<MemoryStorage>) {
    let registry = Arc::new(ProviderRegistry::new(
        reqwest::Client::new(),
        test_provider_settings(),
    ));
    registry.register(ProviderId::Local, provider);
    let storage = Arc::new(MemoryStorage::new());
    let sync = PersistenceSynchronizer::new(storage.clone(), "test-owner");
    let client =
        ChatClient::new(registry, ProviderId::Local, "nextjs", sync).expect("test client");
    (client, storage)
}
