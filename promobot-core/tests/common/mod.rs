// tests/common/mod.rs

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use promobot_core::http::{HttpRequest, HttpResponse, HttpTransport, TransportError};

/// Transport that replays a scripted sequence of responses and records
/// every request it saw, so tests can assert on attempt counts, headers,
/// and bodies without any network.
pub struct ScriptedTransport {
    responses: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    pub fn new(responses: Vec<Result<HttpResponse, TransportError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn request(&self, index: usize) -> HttpRequest {
        self.requests.lock().unwrap()[index].clone()
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        self.requests.lock().unwrap().push(request.clone());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .expect("scripted transport ran out of responses")
    }
}

pub fn response(status: u16, body: &str) -> Result<HttpResponse, TransportError> {
    Ok(HttpResponse {
        status,
        headers: HashMap::new(),
        body: body.to_string(),
    })
}

pub fn response_with_header(
    status: u16,
    body: &str,
    header: (&str, &str),
) -> Result<HttpResponse, TransportError> {
    let mut headers = HashMap::new();
    headers.insert(header.0.to_lowercase(), header.1.to_string());
    Ok(HttpResponse {
        status,
        headers,
        body: body.to_string(),
    })
}
