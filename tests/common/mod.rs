#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use page_acquirer::interceptor::{ObservedResponse, ResponseObserver};
use page_acquirer::render::{LaunchPlan, PageSession, SessionLauncher};
use page_acquirer::{FetchError, PageFetcher};
use serde_json::Value;

/// Body of `n` visible chars worth of words.
pub fn page_with_text(chars: usize) -> String {
    let mut text = String::new();
    while text.len() < chars {
        text.push_str("lorem ");
    }
    text.truncate(chars);
    format!("<html><body><main><p>{}</p></main></body></html>", text.trim_end())
}

pub struct FakeFetcher {
    response: Result<String, FetchError>,
    calls: Arc<AtomicUsize>,
}

impl FakeFetcher {
    pub fn returning(markup: impl Into<String>) -> Self {
        Self {
            response: Ok(markup.into()),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn failing(error: FetchError) -> Self {
        Self {
            response: Err(error),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Shared call counter, readable after the fetcher is boxed.
    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

#[async_trait]
impl PageFetcher for FakeFetcher {
    async fn fetch(&self, _url: &str) -> Result<String, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.response.clone()
    }
}

/// A response the fake page "loads" once launched.
#[derive(Clone)]
pub struct FakeResponse {
    pub url: String,
    pub mime_type: String,
    pub body: String,
}

impl FakeResponse {
    pub fn json(url: &str, body: Value) -> Self {
        Self {
            url: url.to_string(),
            mime_type: "application/json".to_string(),
            body: body.to_string(),
        }
    }
}

#[derive(Default)]
pub struct LaunchLog {
    pub attempts: usize,
    pub plans: Vec<LaunchPlan>,
    pub calls: Vec<String>,
    pub closed: usize,
}

/// Launches [`FakeSession`]s serving `pages` in order (the last one sticks).
#[derive(Clone)]
pub struct FakeLauncher {
    pages: Vec<String>,
    responses: Vec<FakeResponse>,
    failures_before_success: usize,
    pub log: Arc<Mutex<LaunchLog>>,
}

impl FakeLauncher {
    pub fn serving(pages: &[&str]) -> Self {
        Self {
            pages: pages.iter().map(|p| p.to_string()).collect(),
            responses: Vec::new(),
            failures_before_success: 0,
            log: Arc::new(Mutex::new(LaunchLog::default())),
        }
    }

    pub fn unlaunchable() -> Self {
        let mut launcher = Self::serving(&[]);
        launcher.failures_before_success = usize::MAX;
        launcher
    }

    pub fn with_responses(mut self, responses: Vec<FakeResponse>) -> Self {
        self.responses = responses;
        self
    }

    pub fn failing_first(mut self, failures: usize) -> Self {
        self.failures_before_success = failures;
        self
    }

    pub fn attempts(&self) -> usize {
        self.log.lock().unwrap().attempts
    }

    pub fn profile_dirs(&self) -> Vec<PathBuf> {
        self.log
            .lock()
            .unwrap()
            .plans
            .iter()
            .map(|p| p.profile_dir.clone())
            .collect()
    }

    pub fn calls(&self) -> Vec<String> {
        self.log.lock().unwrap().calls.clone()
    }
}

impl SessionLauncher for FakeLauncher {
    fn launch(&self, plan: &LaunchPlan, observer: ResponseObserver) -> Result<Box<dyn PageSession>> {
        let mut log = self.log.lock().unwrap();
        log.attempts += 1;
        log.plans.push(plan.clone());
        if log.attempts <= self.failures_before_success {
            return Err(anyhow!("chromium exited early"));
        }
        drop(log);

        // what a real browser leaves in its profile
        std::fs::create_dir_all(plan.profile_dir.join("Default"))?;
        std::fs::write(plan.profile_dir.join("Default").join("Cookies"), b"fake")?;

        let mut bodies = HashMap::new();
        for (i, response) in self.responses.iter().enumerate() {
            let request_id = format!("req-{i}");
            bodies.insert(request_id.clone(), response.body.clone());
            let _ = observer.send(ObservedResponse {
                request_id,
                url: response.url.clone(),
                mime_type: response.mime_type.clone(),
                status: 200,
            });
        }

        Ok(Box::new(FakeSession {
            pages: Mutex::new(self.pages.iter().cloned().collect()),
            bodies,
            log: self.log.clone(),
        }))
    }
}

pub struct FakeSession {
    pages: Mutex<VecDeque<String>>,
    bodies: HashMap<String, String>,
    log: Arc<Mutex<LaunchLog>>,
}

impl FakeSession {
    fn record(&self, call: impl Into<String>) {
        self.log.lock().unwrap().calls.push(call.into());
    }
}

impl PageSession for FakeSession {
    fn navigate(&self, url: &str) -> Result<()> {
        self.record(format!("navigate {url}"));
        Ok(())
    }

    fn reload(&self) -> Result<()> {
        self.record("reload");
        Ok(())
    }

    fn content(&self) -> Result<String> {
        let mut pages = self.pages.lock().unwrap();
        if pages.len() > 1 {
            Ok(pages.pop_front().unwrap())
        } else {
            pages.front().cloned().ok_or_else(|| anyhow!("page crashed"))
        }
    }

    fn evaluate(&self, _script: &str) -> Result<Option<Value>> {
        self.record("evaluate");
        Ok(None)
    }

    fn call_with_args(&self, _function_declaration: &str, args: Vec<Value>) -> Result<()> {
        self.record(format!("call {}", Value::Array(args)));
        Ok(())
    }

    fn scroll_by(&self, delta_y: f64) -> Result<()> {
        self.record(format!("scroll {delta_y}"));
        Ok(())
    }

    fn response_body(&self, request_id: &str) -> Option<String> {
        self.bodies.get(request_id).cloned()
    }

    fn close(self: Box<Self>) -> Result<()> {
        self.log.lock().unwrap().closed += 1;
        Ok(())
    }
}
