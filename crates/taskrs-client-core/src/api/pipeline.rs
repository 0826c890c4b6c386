//! Ordered request/response stages around every outgoing HTTP call.
//!
//! `before_send` runs in list order and may modify the request. After the
//! call, `after_response` runs in reverse order and may only observe. No stage
//! can short-circuit the call or replace its result: whatever the transport
//! returned is what the caller gets.

use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::{Client, Method, Request, Response, Url};
use tracing::debug;

/// What a stage gets to see about a finished call.
#[derive(Debug, Clone)]
pub struct Exchange {
    pub method: Method,
    pub url: Url,
    pub elapsed: Duration,
}

pub trait RequestStage: Send + Sync {
    fn before_send(&self, _request: &mut Request) {}

    fn after_response(&self, _exchange: &Exchange, _result: &Result<Response, reqwest::Error>) {}
}

/// HTTP client plus its stages. Clone is cheap, the connection pool and the
/// stage list are shared.
#[derive(Clone)]
pub struct HttpPipeline {
    client: Client,
    stages: Arc<[Arc<dyn RequestStage>]>,
}

impl HttpPipeline {
    pub fn new(client: Client, stages: Vec<Arc<dyn RequestStage>>) -> Self {
        Self {
            client,
            stages: stages.into(),
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    pub async fn execute(&self, mut request: Request) -> Result<Response, reqwest::Error> {
        for stage in self.stages.iter() {
            stage.before_send(&mut request);
        }

        let method = request.method().clone();
        let url = request.url().clone();
        let started = Instant::now();

        let result = self.client.execute(request).await;

        let exchange = Exchange {
            method,
            url,
            elapsed: started.elapsed(),
        };
        for stage in self.stages.iter().rev() {
            stage.after_response(&exchange, &result);
        }

        result
    }
}

/// Debug-level log line per call.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestTracing;

impl RequestStage for RequestTracing {
    fn after_response(&self, exchange: &Exchange, result: &Result<Response, reqwest::Error>) {
        let elapsed_ms = exchange.elapsed.as_millis() as u64;
        match result {
            Ok(response) => debug!(
                method = %exchange.method,
                url = %exchange.url,
                status = response.status().as_u16(),
                elapsed_ms,
                "HTTP request completed"
            ),
            Err(e) => debug!(
                method = %exchange.method,
                url = %exchange.url,
                error = %e,
                elapsed_ms,
                "HTTP request failed"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use reqwest::header::HeaderValue;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Records the order in which hooks run
    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl RequestStage for Recorder {
        fn before_send(&self, request: &mut Request) {
            self.log.lock().unwrap().push(format!("before:{}", self.name));
            request
                .headers_mut()
                .append("x-stage", HeaderValue::from_static(self.name));
        }

        fn after_response(&self, _exchange: &Exchange, result: &Result<Response, reqwest::Error>) {
            let status = result.as_ref().map(|r| r.status().as_u16()).unwrap_or(0);
            self.log
                .lock()
                .unwrap()
                .push(format!("after:{}:{}", self.name, status));
        }
    }

    /// `x-stage` values as received, whether sent as separate lines or
    /// folded into one
    fn stage_headers(request: &wiremock::Request) -> Vec<String> {
        request
            .headers
            .get_all("x-stage")
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(','))
            .map(|name| name.trim().to_string())
            .collect()
    }

    #[tokio::test]
    async fn test_stages_run_in_order_and_reverse() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ping"))
            .and(|request: &wiremock::Request| stage_headers(request) == ["first", "second"])
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = HttpPipeline::new(
            Client::new(),
            vec![
                Arc::new(Recorder {
                    name: "first",
                    log: Arc::clone(&log),
                }),
                Arc::new(Recorder {
                    name: "second",
                    log: Arc::clone(&log),
                }),
            ],
        );

        let request = pipeline
            .client()
            .get(format!("{}/ping", server.uri()))
            .build()
            .unwrap();
        let response = pipeline.execute(request).await.unwrap();
        assert_eq!(response.status().as_u16(), 204);

        assert_eq!(
            *log.lock().unwrap(),
            vec!["before:first", "before:second", "after:second:204", "after:first:204"]
        );
    }

    #[tokio::test]
    async fn test_error_status_is_returned_unchanged() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let pipeline = HttpPipeline::new(Client::new(), vec![Arc::new(RequestTracing)]);
        let request = pipeline.client().get(server.uri()).build().unwrap();

        let response = pipeline.execute(request).await.unwrap();
        assert_eq!(response.status().as_u16(), 500);
        assert_eq!(response.text().await.unwrap(), "boom");
    }

    #[tokio::test]
    async fn test_transport_error_reaches_stages_and_caller() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = HttpPipeline::new(
            Client::new(),
            vec![Arc::new(Recorder {
                name: "only",
                log: Arc::clone(&log),
            })],
        );

        // Nothing listens on port 9 (discard) on test machines
        let request = pipeline.client().get("http://127.0.0.1:9/").build().unwrap();
        assert!(pipeline.execute(request).await.is_err());
        assert_eq!(*log.lock().unwrap(), vec!["before:only", "after:only:0"]);
    }
}
