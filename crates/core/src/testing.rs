//! Fakes shared by the unit tests.

use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::artifact::Artifact;
use crate::error::PublicationError;
use crate::services::{Enricher, Enrichment, PublicationRef, Publisher};
use crate::stages::{StageExecutor, StageInput, StageSet};

/// Enricher that always answers with the same text
pub struct CannedEnricher(pub String);

#[async_trait]
impl Enricher for CannedEnricher {
    async fn enrich(&self, _prompt: &str) -> Enrichment {
        Enrichment::Available(self.0.clone())
    }
}

/// Publisher whose backend is always down
pub struct FailingPublisher;

#[async_trait]
impl Publisher for FailingPublisher {
    async fn publish(&self, _payload: &[u8]) -> Result<PublicationRef, PublicationError> {
        Err(PublicationError::Rejected("backend offline".to_string()))
    }
}

/// What a [`FakeStage`] does when executed
#[derive(Debug, Clone)]
pub enum Behavior {
    Return(Option<String>),
    Fail(String),
    Panic,
    /// Sleep, then return `Ok(None)`
    Sleep(Duration),
}

pub struct FakeStage {
    behavior: Behavior,
    host_capable: bool,
    calls: AtomicUsize,
    inputs: Mutex<Vec<StageInput>>,
}

impl FakeStage {
    pub fn new(behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            host_capable: true,
            calls: AtomicUsize::new(0),
            inputs: Mutex::new(Vec::new()),
        })
    }

    pub fn ok() -> Arc<Self> {
        Self::new(Behavior::Return(None))
    }

    pub fn returning(payload: &str) -> Arc<Self> {
        Self::new(Behavior::Return(Some(payload.to_string())))
    }

    /// A stage this host cannot run
    pub fn incapable(behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            host_capable: false,
            calls: AtomicUsize::new(0),
            inputs: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn inputs(&self) -> Vec<StageInput> {
        self.inputs.lock().unwrap().clone()
    }
}

#[async_trait]
impl StageExecutor for FakeStage {
    async fn execute(&self, input: StageInput) -> anyhow::Result<Option<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(path) = &input.artifact_path {
            assert!(path.exists(), "artifact released before the stage ran");
        }
        self.inputs.lock().unwrap().push(input);

        match &self.behavior {
            Behavior::Return(payload) => Ok(payload.clone()),
            Behavior::Fail(reason) => anyhow::bail!("{}", reason),
            Behavior::Panic => panic!("fake stage panicked"),
            Behavior::Sleep(duration) => {
                tokio::time::sleep(*duration).await;
                Ok(None)
            }
        }
    }

    fn host_capable(&self) -> bool {
        self.host_capable
    }
}

/// Four fakes plus the [`StageSet`] view of them
pub struct FakeStages {
    pub identify: Arc<FakeStage>,
    pub inspect: Arc<FakeStage>,
    pub probe: Arc<FakeStage>,
    pub synthesize: Arc<FakeStage>,
}

impl Default for FakeStages {
    fn default() -> Self {
        Self {
            identify: FakeStage::returning("identified 'demo' (heuristic)"),
            inspect: FakeStage::ok(),
            probe: FakeStage::ok(),
            synthesize: FakeStage::returning("ref-xyz"),
        }
    }
}

impl FakeStages {
    pub fn set(&self) -> StageSet {
        StageSet {
            identify: self.identify.clone(),
            inspect: self.inspect.clone(),
            probe: self.probe.clone(),
            synthesize: self.synthesize.clone(),
        }
    }
}

pub const ELF: &[u8] = b"\x7fELF\x02\x01\x01\0\0\0\0\0\0\0\0\0";
pub const PE: &[u8] = b"MZ\x90\0\x03\0\0\0";
pub const SHELL: &[u8] = b"#!/bin/sh\necho hi\n";
pub const WASM: &[u8] = b"\0asm\x01\0\0\0";
pub const NOISE: &[u8] = b"\x13\x37\x00\xfe\xed";

/// Materialize `bytes` as an artifact in a fresh directory under `root`
pub fn artifact(root: &Path, name: &str, bytes: &[u8]) -> Artifact {
    let dir = tempfile::Builder::new()
        .prefix("artifact-")
        .tempdir_in(root)
        .unwrap();
    let path = dir.path().join(name);
    std::fs::write(&path, bytes).unwrap();
    Artifact::new(dir, path, format!("test://{}", name))
}

/// Gone or a zombie awaiting its reaper
#[cfg(target_os = "linux")]
pub async fn process_gone(pid: &str) -> bool {
    let stat = Path::new("/proc").join(pid).join("stat");
    for _ in 0..100 {
        match std::fs::read_to_string(&stat) {
            Err(_) => return true,
            Ok(s) if s.rsplit(')').next().is_some_and(|rest| rest.trim_start().starts_with('Z')) => {
                return true
            }
            Ok(_) => tokio::time::sleep(Duration::from_millis(20)).await,
        }
    }
    false
}
