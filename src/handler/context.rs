use std::{collections::HashMap, sync::Arc};

use parking_lot::Mutex;

use crate::error::ServiceError;

/// Receives responses pushed before a request completes.
pub trait ResponseSink: Send + Sync {
    fn send_intermediate(
        &self,
        request_id: &str,
        body: String,
        message: &str,
        status: u16,
    ) -> Result<(), ServiceError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct Metric {
    pub name: String,
    pub value: f64,
    pub unit: String,
}

#[derive(Debug, Default)]
pub struct Metrics {
    entries: Mutex<Vec<Metric>>,
}

impl Metrics {
    pub fn add_time(&self, name: &str, value: f64, unit: &str) {
        self.entries.lock().push(Metric {
            name: name.to_string(),
            value,
            unit: unit.to_string(),
        });
    }

    pub fn snapshot(&self) -> Vec<Metric> {
        self.entries.lock().clone()
    }
}

/// Per-invocation state handed to the handler by the host.
pub struct Context {
    pub request_ids: Vec<String>,
    headers: Vec<HashMap<String, String>>,
    pub metrics: Metrics,
    sink: Arc<dyn ResponseSink>,
}

impl Context {
    pub fn new(request_ids: Vec<String>, sink: Arc<dyn ResponseSink>) -> Self {
        Self {
            request_ids,
            headers: Vec::new(),
            metrics: Metrics::default(),
            sink,
        }
    }

    pub fn with_headers(mut self, headers: Vec<HashMap<String, String>>) -> Self {
        self.headers = headers;
        self
    }

    pub fn request_header(&self, idx: usize, key: &str) -> Option<&str> {
        self.headers
            .get(idx)
            .and_then(|headers| headers.get(key))
            .map(String::as_str)
    }

    /// Pushes `bodies[i]` for `request_ids[i]` ahead of the final response.
    pub fn send_intermediate(
        &self,
        bodies: &[String],
        message: &str,
        status: u16,
    ) -> Result<(), ServiceError> {
        for (request_id, body) in self.request_ids.iter().zip(bodies) {
            self.sink
                .send_intermediate(request_id, body.clone(), message, status)?;
        }
        Ok(())
    }
}
