//! Preview server with live reload.
//!
//! Serves the build root over HTTP and pushes changed output paths to
//! connected browsers as server-sent events on [`LIVE_RELOAD_PATH`]. HTML
//! responses get a small script injected that swaps stylesheets in place for
//! CSS-only changes and reloads the page otherwise.

use async_trait::async_trait;
use std::net::SocketAddr;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::tools::{ChannelError, PreviewChannel};
use crate::tools::sourcemap::relative_path;

/// Event stream endpoint.
pub const LIVE_RELOAD_PATH: &str = "/__livereload";

const RELOAD_SCRIPT: &str = r#"<script>(function(){var es=new EventSource('/__livereload');es.onmessage=function(e){var files=JSON.parse(e.data);var cssOnly=files.length>0&&files.every(function(f){return /\.css(\.map)?$/.test(f);});if(cssOnly){document.querySelectorAll('link[rel="stylesheet"]').forEach(function(l){l.href=l.href.split('?')[0]+'?v='+Date.now();});}else{location.reload();}};})();</script>"#;

/// Error starting the preview server.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ServeError {
    #[error("Failed to bind preview server to {addr}: {source}")]
    Bind { addr: String, source: std::io::Error },
}

struct ServerState {
    root: PathBuf,
    live_reload: bool,
    events: broadcast::Sender<String>,
}

/// A running preview server.
pub struct PreviewServer {
    addr: SocketAddr,
    handle: PreviewHandle,
    task: JoinHandle<()>,
}

impl PreviewServer {
    /// Bind and start serving `root`.
    ///
    /// Port 0 picks a free port; see [`PreviewServer::local_addr`].
    pub async fn start(
        root: &Path,
        host: &str,
        port: u16,
        live_reload: bool,
    ) -> Result<Self, ServeError> {
        let bind_addr = format!("{}:{}", host, port);
        let listener = TcpListener::bind(&bind_addr)
            .await
            .map_err(|source| ServeError::Bind { addr: bind_addr.clone(), source })?;
        let addr = listener
            .local_addr()
            .map_err(|source| ServeError::Bind { addr: bind_addr.clone(), source })?;

        let (events, _) = broadcast::channel(64);
        let state = Arc::new(ServerState { root: root.to_path_buf(), live_reload, events: events.clone() });

        let task = tokio::spawn(accept_loop(listener, state));
        tracing::info!("Preview server at http://{}", addr);

        Ok(Self { addr, handle: PreviewHandle { root: root.to_path_buf(), events }, task })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// A preview channel that pushes to this server's clients.
    pub fn handle(&self) -> PreviewHandle {
        self.handle.clone()
    }

    pub fn shutdown(self) {
        self.task.abort();
    }
}

/// Sends changed paths, relative to the served root, to live-reload clients.
#[derive(Debug, Clone)]
pub struct PreviewHandle {
    root: PathBuf,
    events: broadcast::Sender<String>,
}

#[async_trait]
impl PreviewChannel for PreviewHandle {
    async fn notify(&self, changed: &[PathBuf]) -> Result<(), ChannelError> {
        let relative: Vec<String> = changed.iter().map(|p| relative_path(&self.root, p)).collect();
        let message =
            serde_json::to_string(&relative).map_err(|e| ChannelError::Preview(e.to_string()))?;

        // No connected browser is not an error.
        let clients = self.events.send(message).unwrap_or(0);
        tracing::debug!("notified {} preview client(s) of {} change(s)", clients, changed.len());
        Ok(())
    }
}

async fn accept_loop(listener: TcpListener, state: Arc<ServerState>) {
    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                let state = state.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, state).await {
                        tracing::debug!("preview connection closed: {}", e);
                    }
                });
            }
            Err(e) => tracing::warn!("preview server accept failed: {}", e),
        }
    }
}

async fn handle_connection(stream: TcpStream, state: Arc<ServerState>) -> std::io::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    let mut request_line = String::new();
    if reader.read_line(&mut request_line).await? == 0 {
        return Ok(());
    }
    loop {
        let mut header = String::new();
        let n = reader.read_line(&mut header).await?;
        if n == 0 || header == "\r\n" || header == "\n" {
            break;
        }
    }

    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default();
    let target = parts.next().unwrap_or("/");
    let path = target.split(['?', '#']).next().unwrap_or("/");

    if method != "GET" && method != "HEAD" {
        return write_response(&mut writer, "405 Method Not Allowed", "text/plain", b"", false).await;
    }

    if state.live_reload && path == LIVE_RELOAD_PATH {
        return stream_events(&mut writer, state.events.subscribe()).await;
    }

    let head_only = method == "HEAD";
    let Some(file) = resolve_request_path(&state.root, path) else {
        return write_response(&mut writer, "404 Not Found", "text/plain", b"Not Found", head_only)
            .await;
    };

    match tokio::fs::read(&file).await {
        Ok(mut body) => {
            let content_type = content_type(&file);
            if state.live_reload && content_type.starts_with("text/html") {
                body = inject_reload_script(&String::from_utf8_lossy(&body)).into_bytes();
            }
            write_response(&mut writer, "200 OK", content_type, &body, head_only).await
        }
        Err(_) => {
            write_response(&mut writer, "404 Not Found", "text/plain", b"Not Found", head_only).await
        }
    }
}

async fn write_response<W: AsyncWrite + Unpin>(
    writer: &mut W,
    status: &str,
    content_type: &str,
    body: &[u8],
    head_only: bool,
) -> std::io::Result<()> {
    let header = format!(
        "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nCache-Control: no-cache\r\nConnection: close\r\n\r\n",
        status,
        content_type,
        body.len()
    );
    writer.write_all(header.as_bytes()).await?;
    if !head_only {
        writer.write_all(body).await?;
    }
    writer.flush().await
}

async fn stream_events<W: AsyncWrite + Unpin>(
    writer: &mut W,
    mut events: broadcast::Receiver<String>,
) -> std::io::Result<()> {
    writer
        .write_all(
            b"HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nCache-Control: no-cache\r\nConnection: keep-alive\r\n\r\n",
        )
        .await?;
    writer.flush().await?;

    loop {
        match events.recv().await {
            Ok(message) => {
                writer.write_all(format!("data: {}\n\n", message).as_bytes()).await?;
                writer.flush().await?;
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::debug!("preview client lagged, {} event(s) skipped", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => return Ok(()),
        }
    }
}

/// Map a URL path onto a file under `root`.
///
/// Rejects traversal outside the root. Directories serve `index.html`;
/// extensionless paths fall back to `<path>.html`.
pub fn resolve_request_path(root: &Path, url_path: &str) -> Option<PathBuf> {
    let decoded = percent_decode(url_path)?;
    let mut path = root.to_path_buf();
    for component in Path::new(decoded.trim_start_matches('/')).components() {
        match component {
            Component::Normal(part) => path.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }

    if path.is_dir() {
        path.push("index.html");
    }
    if path.is_file() {
        return Some(path);
    }
    if path.extension().is_none() {
        let html = path.with_extension("html");
        if html.is_file() {
            return Some(html);
        }
    }
    None
}

fn percent_decode(input: &str) -> Option<String> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = input.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

/// Content type by extension.
pub fn content_type(path: &Path) -> &'static str {
    let ext = path.extension().map(|e| e.to_string_lossy().to_lowercase()).unwrap_or_default();
    match ext.as_str() {
        "html" | "htm" => "text/html; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "js" => "application/javascript; charset=utf-8",
        "json" | "map" => "application/json",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "ico" => "image/x-icon",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        "otf" => "font/otf",
        "eot" => "application/vnd.ms-fontobject",
        "txt" => "text/plain; charset=utf-8",
        "xml" => "application/xml",
        _ => "application/octet-stream",
    }
}

/// Insert the live-reload script before `</body>`, or append it.
pub fn inject_reload_script(html: &str) -> String {
    match html.rfind("</body>") {
        Some(idx) => format!("{}{}{}", &html[..idx], RELOAD_SCRIPT, &html[idx..]),
        None => format!("{}{}", html, RELOAD_SCRIPT),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;

    fn site() -> TempDir {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("css")).unwrap();
        fs::write(temp.path().join("index.html"), "<html><body>hi</body></html>").unwrap();
        fs::write(temp.path().join("about.html"), "about").unwrap();
        fs::write(temp.path().join("css/main.css"), "a{}").unwrap();
        temp
    }

    #[test]
    fn test_resolve_request_path() {
        let temp = site();
        let root = temp.path();
        assert_eq!(resolve_request_path(root, "/"), Some(root.join("index.html")));
        assert_eq!(resolve_request_path(root, "/about"), Some(root.join("about.html")));
        assert_eq!(resolve_request_path(root, "/css/main.css"), Some(root.join("css/main.css")));
        assert_eq!(resolve_request_path(root, "/missing.png"), None);
    }

    #[test]
    fn test_traversal_rejected() {
        let temp = site();
        assert_eq!(resolve_request_path(temp.path(), "/../etc/passwd"), None);
        assert_eq!(resolve_request_path(temp.path(), "/css/%2e%2e/%2e%2e/secret"), None);
    }

    #[test]
    fn test_content_type() {
        assert_eq!(content_type(Path::new("a.css")), "text/css; charset=utf-8");
        assert_eq!(content_type(Path::new("a.WOFF2")), "font/woff2");
        assert_eq!(content_type(Path::new("a.bin")), "application/octet-stream");
    }

    #[test]
    fn test_inject_reload_script() {
        let html = inject_reload_script("<html><body>hi</body></html>");
        assert!(html.contains("EventSource"));
        assert!(html.ends_with("</script></body></html>"));
        assert!(inject_reload_script("fragment").starts_with("fragment<script>"));
    }

    async fn get(addr: SocketAddr, path: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(format!("GET {} HTTP/1.1\r\nHost: localhost\r\n\r\n", path).as_bytes())
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[tokio::test]
    async fn test_serves_files_with_injection() {
        let temp = site();
        let server = PreviewServer::start(temp.path(), "127.0.0.1", 0, true).await.unwrap();

        let response = get(server.local_addr(), "/").await;
        assert!(response.starts_with("HTTP/1.1 200 OK"));
        assert!(response.contains("text/html"));
        assert!(response.contains("EventSource"));

        let response = get(server.local_addr(), "/nope.css").await;
        assert!(response.starts_with("HTTP/1.1 404"));
        server.shutdown();
    }

    #[tokio::test]
    async fn test_live_reload_event() {
        let temp = site();
        let server = PreviewServer::start(temp.path(), "127.0.0.1", 0, true).await.unwrap();

        let stream = TcpStream::connect(server.local_addr()).await.unwrap();
        let (reader, mut writer) = stream.into_split();
        writer.write_all(b"GET /__livereload HTTP/1.1\r\n\r\n").await.unwrap();

        let mut reader = BufReader::new(reader);
        loop {
            let mut line = String::new();
            reader.read_line(&mut line).await.unwrap();
            if line == "\r\n" {
                break;
            }
        }

        server.handle().notify(&[temp.path().join("css/main.css")]).await.unwrap();

        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        assert_eq!(line, "data: [\"css/main.css\"]\n");
        server.shutdown();
    }

    #[tokio::test]
    async fn test_notify_without_clients_is_ok() {
        let temp = site();
        let server = PreviewServer::start(temp.path(), "127.0.0.1", 0, true).await.unwrap();
        assert!(server.handle().notify(&[temp.path().join("index.html")]).await.is_ok());
        server.shutdown();
    }
}
