//! Recording backend and payload shared by the integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use axerrno::AxResult;
use modhook::{HookConfig, ModuleHooks, Payload, ProbeBackend, ProbeDescriptor};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendOp {
    Arm(&'static str),
    Disarm(&'static str),
}

/// Backend that records every call and fails on request.
#[derive(Default)]
pub struct RecordingBackend {
    pub ops: Mutex<Vec<BackendOp>>,
    pub fail_arm: Mutex<Option<&'static str>>,
    pub fail_disarm: Mutex<Option<&'static str>>,
}

impl RecordingBackend {
    pub fn ops(&self) -> Vec<BackendOp> {
        self.ops.lock().unwrap().clone()
    }

    pub fn fail_arm_on(&self, symbol: &'static str) {
        *self.fail_arm.lock().unwrap() = Some(symbol);
    }

    pub fn fail_disarm_on(&self, symbol: &'static str) {
        *self.fail_disarm.lock().unwrap() = Some(symbol);
    }
}

impl ProbeBackend for RecordingBackend {
    fn arm(&self, probe: &ProbeDescriptor) -> AxResult<()> {
        if *self.fail_arm.lock().unwrap() == Some(probe.symbol()) {
            return axerrno::ax_err!(Unsupported, "mock arm failure");
        }
        self.ops.lock().unwrap().push(BackendOp::Arm(probe.symbol()));
        Ok(())
    }

    fn disarm(&self, probe: &ProbeDescriptor) -> AxResult<()> {
        if *self.fail_disarm.lock().unwrap() == Some(probe.symbol()) {
            return axerrno::ax_err!(NotFound, "mock probe vanished");
        }
        self.ops.lock().unwrap().push(BackendOp::Disarm(probe.symbol()));
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Confirmed {
    Load(String),
    Unload(String),
}

/// Payload that records every confirmed event.
#[derive(Default)]
pub struct RecordingPayload {
    pub events: Mutex<Vec<Confirmed>>,
}

impl RecordingPayload {
    pub fn events(&self) -> Vec<Confirmed> {
        self.events.lock().unwrap().clone()
    }

    pub fn loads(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, Confirmed::Load(_)))
            .count()
    }
}

impl Payload for RecordingPayload {
    fn on_confirmed_load(&self, component: &str) {
        self.events
            .lock()
            .unwrap()
            .push(Confirmed::Load(component.to_string()));
    }

    fn on_confirmed_unload(&self, component: &str) {
        self.events
            .lock()
            .unwrap()
            .push(Confirmed::Unload(component.to_string()));
    }
}

pub struct Harness {
    pub hooks: ModuleHooks,
    pub backend: Arc<RecordingBackend>,
    pub payload: Arc<RecordingPayload>,
}

pub fn harness_with(config: HookConfig) -> Harness {
    let backend = Arc::new(RecordingBackend::default());
    let payload = Arc::new(RecordingPayload::default());
    let hooks = ModuleHooks::new(&config, backend.clone(), payload.clone()).unwrap();
    Harness {
        hooks,
        backend,
        payload,
    }
}

/// Hooks for target `foo`, not started.
pub fn harness() -> Harness {
    harness_with(HookConfig::new("foo"))
}

/// Hooks for target `foo`, started.
pub fn started() -> Harness {
    let h = harness();
    h.hooks.start().unwrap();
    h
}
