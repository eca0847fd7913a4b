use std::path::PathBuf;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use http::{Request, Response, Uri};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::rt::ReadBufCursor;
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::{Connected, Connection, HttpConnector};
use hyper_util::rt::{TokioExecutor, TokioIo};
use pin_project_lite::pin_project;
use rustls::ClientConfig;
use tokio::io::AsyncWrite;
use tower::Service;

/// The ways to reach a Docker daemon.
#[derive(Clone)]
pub(crate) enum Transport {
    Unix(Client<UnixConnector, Full<Bytes>>),
    Http(Client<HttpConnector, Full<Bytes>>),
    Https(Client<HttpsConnector<HttpConnector>, Full<Bytes>>),
}

impl Transport {
    pub(crate) fn unix(path: PathBuf) -> Self {
        Transport::Unix(Client::builder(TokioExecutor::new()).build(UnixConnector::new(path)))
    }

    pub(crate) fn http() -> Self {
        Transport::Http(Client::builder(TokioExecutor::new()).build(HttpConnector::new()))
    }

    pub(crate) fn https(config: ClientConfig) -> Self {
        let mut http = HttpConnector::new();
        http.enforce_http(false);

        let connector = HttpsConnector::from((http, config));

        Transport::Https(Client::builder(TokioExecutor::new()).build(connector))
    }

    pub(crate) async fn request(
        &self,
        req: Request<Full<Bytes>>,
    ) -> Result<Response<Incoming>, hyper_util::client::legacy::Error> {
        match self {
            Transport::Unix(client) => client.request(req).await,
            Transport::Http(client) => client.request(req).await,
            Transport::Https(client) => client.request(req).await,
        }
    }
}

pin_project! {
    /// A connected Unix domain socket, usable by hyper.
    pub struct UnixStream {
        #[pin]
        inner: tokio::net::UnixStream,
    }
}

impl hyper::rt::Read for UnixStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: ReadBufCursor<'_>,
    ) -> Poll<Result<(), std::io::Error>> {
        let mut io = TokioIo::new(self.project().inner);
        hyper::rt::Read::poll_read(Pin::new(&mut io), cx, buf)
    }
}

impl hyper::rt::Write for UnixStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<Result<usize, std::io::Error>> {
        self.project().inner.poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), std::io::Error>> {
        self.project().inner.poll_flush(cx)
    }

    fn poll_shutdown(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<(), std::io::Error>> {
        self.project().inner.poll_shutdown(cx)
    }
}

impl Connection for UnixStream {
    fn connected(&self) -> Connected {
        Connected::new()
    }
}

/// Connects every request to the same socket path, the authority of the
/// request URI is ignored.
#[derive(Clone)]
pub struct UnixConnector {
    path: PathBuf,
}

impl UnixConnector {
    pub fn new(path: PathBuf) -> Self {
        UnixConnector { path }
    }
}

impl Service<Uri> for UnixConnector {
    type Response = UnixStream;
    type Error = std::io::Error;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _uri: Uri) -> Self::Future {
        let path = self.path.clone();

        Box::pin(async move {
            let inner = tokio::net::UnixStream::connect(path).await?;

            Ok(UnixStream { inner })
        })
    }
}
