#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, Response};
use oidc_gateway::{
    AppConfig, AppState, DocumentCache, Gateway, GatewaySettings, ManualClock, UpstreamClient,
    UpstreamConfig, build_app,
};
use tempfile::TempDir;
use tower::ServiceExt;
use wiremock::MockServer;

pub const TOKEN: &str = "test-service-account-token";

/// Token and CA bundle on disk, as the kubelet projects them.
pub struct Credentials {
    pub dir: TempDir,
}

impl Credentials {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tmp dir");
        std::fs::write(dir.path().join("token"), format!("{TOKEN}\n")).expect("write token");
        let ca = rcgen::generate_simple_self_signed(vec!["kubernetes.default.svc".to_string()])
            .expect("generate CA");
        std::fs::write(dir.path().join("ca.crt"), ca.cert.pem()).expect("write ca");
        Self { dir }
    }

    pub fn token_path(&self) -> std::path::PathBuf {
        self.dir.path().join("token")
    }

    pub fn ca_path(&self) -> std::path::PathBuf {
        self.dir.path().join("ca.crt")
    }

    pub fn upstream_config(&self, base_url: &str) -> UpstreamConfig {
        UpstreamConfig {
            base_url: base_url.to_string(),
            timeout_secs: 2,
            token_path: self.token_path(),
            ca_cert_path: self.ca_path(),
        }
    }
}

pub fn write_file(path: &Path, contents: &str) {
    std::fs::write(path, contents).expect("write file");
}

/// A router wired to a mock upstream, with a clock the test controls.
pub struct TestApp {
    pub router: Router,
    pub gateway: Arc<Gateway>,
    pub clock: Arc<ManualClock>,
    pub upstream: MockServer,
    _credentials: Credentials,
}

impl TestApp {
    pub async fn start(pretty_print: bool) -> Self {
        Self::start_with_config(pretty_print, AppConfig::default()).await
    }

    pub async fn start_with_config(pretty_print: bool, config: AppConfig) -> Self {
        let upstream = MockServer::start().await;
        let credentials = Credentials::new();
        let client = UpstreamClient::new(&credentials.upstream_config(&upstream.uri()))
            .expect("upstream client");

        let clock = Arc::new(ManualClock::new());
        let cache = DocumentCache::with_clock(Duration::from_secs(60), clock.clone());
        let gateway = Arc::new(Gateway::new(
            cache,
            Arc::new(client),
            GatewaySettings {
                pretty_print,
                client_max_age: Duration::from_secs(60),
            },
        ));
        let router = build_app(AppState::new(gateway.clone()), &config);

        Self {
            router,
            gateway,
            clock,
            upstream,
            _credentials: credentials,
        }
    }

    pub async fn request(&self, method: &str, path: &str) -> Response<Body> {
        let req = Request::builder()
            .method(method)
            .uri(path)
            .body(Body::empty())
            .expect("request");
        self.send(req).await
    }

    pub async fn send(&self, req: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(req).await.expect("infallible")
    }

    pub async fn upstream_hits(&self, path: &str) -> usize {
        self.upstream
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|r| r.url.path() == path)
            .count()
    }
}

pub async fn body_string(response: Response<Body>) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    String::from_utf8(bytes.to_vec()).expect("utf8 body")
}

/// HTTPS upstream whose certificate is issued by a throwaway CA.
///
/// Answers every request with a fixed JSON body and closes the connection.
pub struct TlsUpstream {
    pub base_url: String,
    pub ca_pem: String,
    task: tokio::task::JoinHandle<()>,
}

impl TlsUpstream {
    pub async fn start(body: &'static str) -> Self {
        use rcgen::{BasicConstraints, CertificateParams, DnType, IsCa, KeyPair};
        use rustls::pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer};
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let ca_key = KeyPair::generate().expect("ca key");
        let mut ca_params = CertificateParams::new(Vec::<String>::new()).expect("ca params");
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        ca_params
            .distinguished_name
            .push(DnType::CommonName, "oidc-gateway test CA");
        let ca_cert = ca_params.self_signed(&ca_key).expect("ca cert");

        let leaf_key = KeyPair::generate().expect("leaf key");
        let leaf_cert = CertificateParams::new(vec!["localhost".to_string()])
            .expect("leaf params")
            .signed_by(&leaf_key, &ca_cert, &ca_key)
            .expect("leaf cert");

        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let config = rustls::ServerConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .expect("protocol versions")
            .with_no_client_auth()
            .with_single_cert(
                vec![leaf_cert.der().clone()],
                PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(leaf_key.serialize_der())),
            )
            .expect("server config");
        let acceptor = tokio_rustls::TlsAcceptor::from(Arc::new(config));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let port = listener.local_addr().expect("local addr").port();

        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let acceptor = acceptor.clone();
                tokio::spawn(async move {
                    let Ok(mut tls) = acceptor.accept(stream).await else {
                        return;
                    };
                    let mut buf = vec![0u8; 8192];
                    let mut read = 0;
                    while read < buf.len() {
                        match tls.read(&mut buf[read..]).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => read += n,
                        }
                        if buf[..read].windows(4).any(|w| w == b"\r\n\r\n") {
                            break;
                        }
                    }
                    let response = format!(
                        "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                        body.len(),
                        body
                    );
                    let _ = tls.write_all(response.as_bytes()).await;
                    let _ = tls.shutdown().await;
                });
            }
        });

        Self {
            base_url: format!("https://localhost:{port}"),
            ca_pem: ca_cert.pem(),
            task,
        }
    }
}

impl Drop for TlsUpstream {
    fn drop(&mut self) {
        self.task.abort();
    }
}
