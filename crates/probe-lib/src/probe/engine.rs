//! Probe dispatch and retry policy

use super::{
    expand_command, ExecProber, HttpProber, ProbeError, ProbeOutcome, ReqwestHttpProber,
    RuntimeExecProber, TcpProber, TcpSocketProber,
};
use crate::models::{Container, HttpHeader, Pod, PortRef, Probe, ProbeKind};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

/// Attempts per probe cycle. Only errored attempts are retried.
pub const MAX_PROBE_RETRIES: usize = 3;

/// Multi-valued HTTP header map, header name to values in declaration order
pub type HeaderList = BTreeMap<String, Vec<String>>;

/// Executes probe cycles against the configured primitives
#[derive(Clone)]
pub struct ProbeEngine {
    http: Arc<dyn HttpProber>,
    tcp: Arc<dyn TcpProber>,
    exec: Arc<dyn ExecProber>,
}

impl ProbeEngine {
    pub fn new(
        http: Arc<dyn HttpProber>,
        tcp: Arc<dyn TcpProber>,
        exec: Arc<dyn ExecProber>,
    ) -> Self {
        Self { http, tcp, exec }
    }

    /// Engine backed by reqwest, tokio sockets and the given container runtime CLI
    pub fn with_runtime(exec_runtime: impl Into<String>) -> Result<Self, ProbeError> {
        Ok(Self::new(
            Arc::new(ReqwestHttpProber::new()?),
            Arc::new(TcpSocketProber),
            Arc::new(RuntimeExecProber::new(exec_runtime)),
        ))
    }

    /// Run one probe cycle of the given kind for a container.
    ///
    /// A container without a probe of that kind is reported healthy without
    /// running anything. Errors mean the result is unknown.
    pub async fn probe(
        &self,
        kind: ProbeKind,
        pod: &Pod,
        container: &Container,
        container_id: &str,
    ) -> Result<ProbeOutcome, ProbeError> {
        let Some(probe) = container.probe(kind) else {
            warn!(
                probe = %kind,
                pod = %pod,
                container = %container.name,
                "Probe is not declared, assuming success"
            );
            return Ok(ProbeOutcome::success(""));
        };

        self.run_probe_with_retries(kind, probe, pod, container, container_id, MAX_PROBE_RETRIES)
            .await
    }

    /// Run the probe until an attempt completes without error, at most
    /// `retries` times. The last attempt's error is returned if all fail.
    async fn run_probe_with_retries(
        &self,
        kind: ProbeKind,
        probe: &Probe,
        pod: &Pod,
        container: &Container,
        container_id: &str,
        retries: usize,
    ) -> Result<ProbeOutcome, ProbeError> {
        let mut attempt = 1;
        loop {
            match self.run_probe(probe, pod, container, container_id).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) if attempt >= retries => return Err(e),
                Err(e) => {
                    debug!(
                        probe = %kind,
                        pod = %pod,
                        container = %container.name,
                        attempt,
                        error = %e,
                        "Probe attempt errored, retrying"
                    );
                    attempt += 1;
                }
            }
        }
    }

    async fn run_probe(
        &self,
        probe: &Probe,
        pod: &Pod,
        container: &Container,
        container_id: &str,
    ) -> Result<ProbeOutcome, ProbeError> {
        let timeout = probe.timeout();

        if let Some(exec) = &probe.exec {
            let command = expand_command(&exec.command, &container.env);
            debug!(container_id = %container_id, command = ?command, "Exec probe");
            return self.exec.probe(container_id, &command, timeout).await;
        }

        if let Some(http) = &probe.http_get {
            let scheme = http.scheme.to_lowercase();
            let host = resolve_host(&http.host, pod);
            let port = extract_port(&http.port, container)?;
            let url = format_url(&scheme, host, port, &http.path)?;
            let headers = build_header(&http.http_headers);
            debug!(url = %url, headers = ?headers, "HTTP probe");
            return self.http.probe(&url, &headers, timeout).await;
        }

        if let Some(tcp) = &probe.tcp_socket {
            let port = extract_port(&tcp.port, container)?;
            let host = resolve_host(&tcp.host, pod);
            debug!(host = %host, port, timeout_ms = timeout.as_millis(), "TCP probe");
            return self.tcp.probe(host, port, timeout).await;
        }

        warn!(pod = %pod, container = %container.name, "Failed to find probe handler");
        Err(ProbeError::MissingHandler {
            pod: format!("{}/{}", pod.namespace, pod.name),
            container: container.name.clone(),
        })
    }
}

fn resolve_host<'a>(host: &'a str, pod: &'a Pod) -> &'a str {
    if host.is_empty() {
        pod.status.pod_ip.as_deref().unwrap_or_default()
    } else {
        host
    }
}

/// Resolve a port reference against the container's declared ports.
///
/// Names that match no declared port are parsed as numbers as a last
/// resort. The result must lie in `1..=65535`.
pub fn extract_port(port: &PortRef, container: &Container) -> Result<u16, ProbeError> {
    let number = match port {
        PortRef::Number(n) => i64::from(*n),
        PortRef::Name(name) => match find_port_by_name(container, name) {
            Some(n) => i64::from(n),
            None => name
                .parse::<i64>()
                .map_err(|_| ProbeError::PortNotFound(name.clone()))?,
        },
    };

    if number > 0 && number < 65536 {
        Ok(number as u16)
    } else {
        Err(ProbeError::InvalidPort(number))
    }
}

fn find_port_by_name(container: &Container, name: &str) -> Option<i32> {
    container
        .ports
        .iter()
        .find(|p| p.name == name)
        .map(|p| p.container_port)
}

/// Assemble the probe URL.
///
/// The path is taken best-effort: when it parses as an absolute URL only its
/// path, query and fragment are kept; otherwise the raw text is split on
/// `?` and `#` and applied as-is.
pub fn format_url(scheme: &str, host: &str, port: u16, path: &str) -> Result<Url, ProbeError> {
    let mut url = Url::parse(&format!("{scheme}://{}", join_host_port(host, port)))?;

    if let Ok(parsed) = Url::parse(path) {
        if parsed.has_host() {
            url.set_path(parsed.path());
            url.set_query(parsed.query());
            url.set_fragment(parsed.fragment());
            return Ok(url);
        }
    }

    let (rest, fragment) = match path.split_once('#') {
        Some((rest, fragment)) => (rest, Some(fragment)),
        None => (path, None),
    };
    let (path, query) = match rest.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (rest, None),
    };
    url.set_path(path);
    url.set_query(query);
    url.set_fragment(fragment);
    Ok(url)
}

fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

/// Flatten a header list into a multi-valued map. Repeated names append.
pub fn build_header(headers: &[HttpHeader]) -> HeaderList {
    let mut map = HeaderList::new();
    for header in headers {
        map.entry(header.name.clone())
            .or_default()
            .push(header.value.clone());
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        ContainerPort, EnvVar, ExecAction, HttpGetAction, PodPhase, PodStatus, TcpSocketAction,
    };
    use crate::probe::{async_trait, ProbeResult};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Primitive that replays scripted responses and records its calls
    #[derive(Default)]
    struct ScriptedProber {
        calls: AtomicUsize,
        script: Mutex<VecDeque<Result<ProbeOutcome, ProbeError>>>,
        targets: Mutex<Vec<String>>,
    }

    impl ScriptedProber {
        fn with_script(script: Vec<Result<ProbeOutcome, ProbeError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                ..Default::default()
            })
        }

        fn next(&self, target: String) -> Result<ProbeOutcome, ProbeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.targets.lock().unwrap().push(target);
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(ProbeOutcome::success("ok")))
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn targets(&self) -> Vec<String> {
            self.targets.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl HttpProber for ScriptedProber {
        async fn probe(
            &self,
            url: &Url,
            headers: &HeaderList,
            _timeout: Duration,
        ) -> Result<ProbeOutcome, ProbeError> {
            self.next(format!("{url} {headers:?}"))
        }
    }

    #[async_trait]
    impl TcpProber for ScriptedProber {
        async fn probe(
            &self,
            host: &str,
            port: u16,
            _timeout: Duration,
        ) -> Result<ProbeOutcome, ProbeError> {
            self.next(format!("{host}:{port}"))
        }
    }

    #[async_trait]
    impl ExecProber for ScriptedProber {
        async fn probe(
            &self,
            container_id: &str,
            command: &[String],
            _timeout: Duration,
        ) -> Result<ProbeOutcome, ProbeError> {
            self.next(format!("{container_id} {}", command.join(" ")))
        }
    }

    fn engine(prober: &Arc<ScriptedProber>) -> ProbeEngine {
        ProbeEngine::new(prober.clone(), prober.clone(), prober.clone())
    }

    fn container_with(probe: Probe) -> Container {
        Container {
            name: "app".to_string(),
            ports: vec![ContainerPort {
                name: "http".to_string(),
                container_port: 8080,
            }],
            env: vec![EnvVar {
                name: "TARGET".to_string(),
                value: "/ready".to_string(),
            }],
            liveness_probe: Some(probe),
            ..Default::default()
        }
    }

    fn pod_for(container: &Container) -> Pod {
        Pod {
            namespace: "default".to_string(),
            name: "web".to_string(),
            uid: "u1".to_string(),
            deletion_timestamp: None,
            containers: vec![container.clone()],
            status: PodStatus {
                phase: PodPhase::Running,
                pod_ip: Some("10.0.0.5".to_string()),
                ..Default::default()
            },
        }
    }

    fn tcp_probe(port: PortRef) -> Probe {
        Probe {
            tcp_socket: Some(TcpSocketAction {
                host: String::new(),
                port,
            }),
            ..Default::default()
        }
    }

    async fn run(prober: &Arc<ScriptedProber>, probe: Probe) -> Result<ProbeOutcome, ProbeError> {
        let container = container_with(probe);
        let pod = pod_for(&container);
        engine(prober)
            .probe(ProbeKind::Liveness, &pod, &container, "c1")
            .await
    }

    #[tokio::test]
    async fn test_undeclared_probe_succeeds_without_running() {
        let prober = ScriptedProber::with_script(vec![]);
        let container = Container {
            name: "app".to_string(),
            ..Default::default()
        };
        let pod = pod_for(&container);

        let outcome = engine(&prober)
            .probe(ProbeKind::Readiness, &pod, &container, "c1")
            .await
            .unwrap();

        assert_eq!(outcome.result, ProbeResult::Success);
        assert_eq!(prober.calls(), 0);
    }

    #[tokio::test]
    async fn test_declared_probe_without_handler_is_unknown() {
        let prober = ScriptedProber::with_script(vec![]);
        let err = run(&prober, Probe::default()).await.unwrap_err();

        assert!(matches!(err, ProbeError::MissingHandler { .. }));
        assert_eq!(prober.calls(), 0);
    }

    #[tokio::test]
    async fn test_failure_is_not_retried() {
        let prober = ScriptedProber::with_script(vec![Ok(ProbeOutcome::failure("refused"))]);
        let outcome = run(&prober, tcp_probe(PortRef::Number(80))).await.unwrap();

        assert_eq!(outcome, ProbeOutcome::failure("refused"));
        assert_eq!(prober.calls(), 1);
    }

    #[tokio::test]
    async fn test_errors_are_retried_up_to_limit() {
        let prober = ScriptedProber::with_script(vec![
            Err(ProbeError::Exec("attempt 1".to_string())),
            Err(ProbeError::Exec("attempt 2".to_string())),
            Err(ProbeError::Exec("attempt 3".to_string())),
            Ok(ProbeOutcome::success("never reached")),
        ]);
        let err = run(&prober, tcp_probe(PortRef::Number(80))).await.unwrap_err();

        assert_eq!(err.to_string(), "exec probe error: attempt 3");
        assert_eq!(prober.calls(), 3);
    }

    #[tokio::test]
    async fn test_error_then_success_stops_retrying() {
        let prober = ScriptedProber::with_script(vec![
            Err(ProbeError::Timeout(Duration::from_secs(1))),
            Ok(ProbeOutcome::success("up")),
        ]);
        let outcome = run(&prober, tcp_probe(PortRef::Number(80))).await.unwrap();

        assert_eq!(outcome.result, ProbeResult::Success);
        assert_eq!(prober.calls(), 2);
    }

    #[tokio::test]
    async fn test_tcp_host_falls_back_to_pod_ip() {
        let prober = ScriptedProber::with_script(vec![]);
        run(&prober, tcp_probe(PortRef::Name("http".to_string())))
            .await
            .unwrap();

        let mut probe = tcp_probe(PortRef::Number(9000));
        probe.tcp_socket.as_mut().unwrap().host = "db.local".to_string();
        run(&prober, probe).await.unwrap();

        assert_eq!(prober.targets(), vec!["10.0.0.5:8080", "db.local:9000"]);
    }

    #[tokio::test]
    async fn test_invalid_port_is_never_probed() {
        for port in [
            PortRef::Number(0),
            PortRef::Number(-1),
            PortRef::Number(65536),
            PortRef::Name("metrics".to_string()),
            PortRef::Name("70000".to_string()),
        ] {
            let prober = ScriptedProber::with_script(vec![]);
            assert!(run(&prober, tcp_probe(port)).await.is_err());
            assert_eq!(prober.calls(), 0);
        }
    }

    #[tokio::test]
    async fn test_http_probe_builds_url_and_headers() {
        let prober = ScriptedProber::with_script(vec![]);
        let probe = Probe {
            http_get: Some(HttpGetAction {
                scheme: "HTTPS".to_string(),
                host: String::new(),
                port: PortRef::Name("http".to_string()),
                path: "/healthz?full=1".to_string(),
                http_headers: vec![
                    HttpHeader {
                        name: "X-Check".to_string(),
                        value: "a".to_string(),
                    },
                    HttpHeader {
                        name: "X-Check".to_string(),
                        value: "b".to_string(),
                    },
                ],
            }),
            ..Default::default()
        };
        run(&prober, probe).await.unwrap();

        assert_eq!(
            prober.targets(),
            vec![r#"https://10.0.0.5:8080/healthz?full=1 {"X-Check": ["a", "b"]}"#]
        );
    }

    #[tokio::test]
    async fn test_exec_probe_expands_static_env() {
        let prober = ScriptedProber::with_script(vec![]);
        let probe = Probe {
            exec: Some(ExecAction {
                command: vec!["curl".to_string(), "localhost$(TARGET)".to_string()],
            }),
            ..Default::default()
        };
        run(&prober, probe).await.unwrap();

        assert_eq!(prober.targets(), vec!["c1 curl localhost/ready"]);
    }

    #[test]
    fn test_extract_port_numeric_name_fallback() {
        let container = container_with(Probe::default());
        assert_eq!(
            extract_port(&PortRef::Name("9090".to_string()), &container).unwrap(),
            9090
        );
        assert_eq!(
            extract_port(&PortRef::Name("http".to_string()), &container).unwrap(),
            8080
        );
        assert!(matches!(
            extract_port(&PortRef::Name("admin".to_string()), &container),
            Err(ProbeError::PortNotFound(_))
        ));
        assert!(matches!(
            extract_port(&PortRef::Number(65536), &container),
            Err(ProbeError::InvalidPort(65536))
        ));
    }

    #[test]
    fn test_build_header_appends_repeated_names() {
        let headers = build_header(&[
            HttpHeader {
                name: "Accept".to_string(),
                value: "text/plain".to_string(),
            },
            HttpHeader {
                name: "X-Trace".to_string(),
                value: "1".to_string(),
            },
            HttpHeader {
                name: "Accept".to_string(),
                value: "application/json".to_string(),
            },
        ]);

        assert_eq!(headers["Accept"], vec!["text/plain", "application/json"]);
        assert_eq!(headers["X-Trace"], vec!["1"]);
    }

    #[test]
    fn test_format_url() {
        let url = format_url("http", "10.0.0.1", 8081, "/healthz").unwrap();
        assert_eq!(url.as_str(), "http://10.0.0.1:8081/healthz");

        let url = format_url("http", "10.0.0.1", 8080, "").unwrap();
        assert_eq!(url.as_str(), "http://10.0.0.1:8080/");

        let url = format_url("http", "::1", 8080, "/x").unwrap();
        assert_eq!(url.as_str(), "http://[::1]:8080/x");

        // Scheme and authority of an absolute path are replaced
        let url = format_url("https", "example.com", 8443, "http://other:1/status?v=2").unwrap();
        assert_eq!(url.as_str(), "https://example.com:8443/status?v=2");

        // A malformed path is passed along rather than rejected
        let url = format_url("http", "example.com", 80, "/a b%zz").unwrap();
        assert_eq!(url.host_str(), Some("example.com"));
        assert!(url.path().starts_with("/a"));
    }
}
