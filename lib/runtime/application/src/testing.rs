use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use rigger_domain::ManagedResource;

use crate::component::{Component, ComponentContext};

pub type CallLog = Arc<Mutex<Vec<String>>>;

/// Component whose hooks only record that they ran, and fail on demand.
pub struct StubComponent {
    name: String,
    dependencies: Vec<String>,
    installed: bool,
    enabled: bool,
    invalid: Option<String>,
    ready: AtomicBool,
    failing: Mutex<HashSet<String>>,
    calls: CallLog,
}

impl StubComponent {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            dependencies: Vec::new(),
            installed: true,
            enabled: true,
            invalid: None,
            ready: AtomicBool::new(true),
            failing: Mutex::new(HashSet::new()),
            calls: CallLog::default(),
        }
    }

    pub fn depends_on(mut self, dependencies: &[&str]) -> Self {
        self.dependencies = dependencies.iter().map(|d| d.to_string()).collect();
        self
    }

    pub fn not_installed(mut self) -> Self {
        self.installed = false;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn invalid(mut self, reason: &str) -> Self {
        self.invalid = Some(reason.to_string());
        self
    }

    pub fn with_log(mut self, calls: &CallLog) -> Self {
        self.calls = Arc::clone(calls);
        self
    }

    pub fn fail(&self, hook: &str) {
        self.failing.lock().unwrap().insert(hook.to_string());
    }

    pub fn recover(&self, hook: &str) {
        self.failing.lock().unwrap().remove(hook);
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    fn record(&self, hook: &str) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("{}:{hook}", self.name));
        if self.failing.lock().unwrap().contains(hook) {
            anyhow::bail!("{hook} exploded");
        }
        Ok(())
    }
}

pub fn calls(log: &CallLog) -> Vec<String> {
    log.lock().unwrap().clone()
}

#[async_trait]
impl Component for StubComponent {
    fn name(&self) -> &str {
        &self.name
    }

    fn namespace(&self) -> &str {
        "default"
    }

    fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    fn is_enabled(&self, _resource: &ManagedResource) -> bool {
        self.enabled
    }

    fn validate(&self, _resource: &ManagedResource) -> Result<()> {
        match &self.invalid {
            Some(reason) => anyhow::bail!("{reason}"),
            None => Ok(()),
        }
    }

    async fn is_installed(&self, _ctx: &ComponentContext<'_>) -> Result<bool> {
        Ok(self.installed)
    }

    async fn pre_install(&self, _ctx: &ComponentContext<'_>) -> Result<()> {
        self.record("pre-install")
    }

    async fn install(&self, _ctx: &ComponentContext<'_>) -> Result<()> {
        self.record("install")
    }

    async fn post_install(&self, _ctx: &ComponentContext<'_>) -> Result<()> {
        self.record("post-install")
    }

    async fn pre_upgrade(&self, _ctx: &ComponentContext<'_>) -> Result<()> {
        self.record("pre-upgrade")
    }

    async fn upgrade(&self, _ctx: &ComponentContext<'_>) -> Result<()> {
        self.record("upgrade")
    }

    async fn post_upgrade(&self, _ctx: &ComponentContext<'_>) -> Result<()> {
        self.record("post-upgrade")
    }

    async fn is_ready(&self, _ctx: &mut ComponentContext<'_>) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}
