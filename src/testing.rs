//! In-memory stand-ins for the capability traits, shared by unit tests.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use crate::control::{ControlPlane, DomainState};
use crate::diagnostics::DiagnosticCapture;
use crate::error::{Error, Result};
use crate::inspect::{GuestFs, IntrospectionBackend};
use crate::network::firewall::{Firewall, FirewallRule};

pub(crate) const VIRBR0_NETWORK: &str = r#"<network>
  <name>default</name>
  <forward mode='nat'/>
  <bridge name='virbr0' stp='on' delay='0'/>
  <ip address='192.168.122.1' netmask='255.255.255.0'/>
</network>"#;

fn tool_failure(command: &str) -> Error {
    Error::ExternalTool {
        command: command.to_string(),
        code: Some(1),
        output: "scripted failure".to_string(),
    }
}

/// Scripted reply to a run-state query.
#[derive(Debug, Clone, Copy)]
pub(crate) enum StateReply {
    State(DomainState),
    Fail,
}

#[derive(Default)]
pub(crate) struct FakeControlPlane {
    pub networks: Vec<(String, String)>,
    pub exists: Cell<bool>,
    pub state_script: RefCell<VecDeque<StateReply>>,
    pub state_queries: Cell<u32>,
    pub live_descriptor: Option<String>,
    pub running: Vec<(String, String)>,
    pub fail_destroy: bool,
    pub fail_undefine: bool,
    pub defined: RefCell<Vec<String>>,
    pub started: RefCell<Vec<String>>,
    pub destroyed: RefCell<Vec<String>>,
    pub undefined: RefCell<Vec<String>>,
}

impl FakeControlPlane {
    pub fn with_default_network() -> Self {
        Self {
            networks: vec![("default".to_string(), VIRBR0_NETWORK.to_string())],
            ..Default::default()
        }
    }

    pub fn script_states(&self, replies: impl IntoIterator<Item = StateReply>) {
        self.state_script.borrow_mut().extend(replies);
    }
}

impl ControlPlane for FakeControlPlane {
    fn networks(&self) -> Result<Vec<String>> {
        Ok(self.networks.iter().map(|(name, _)| name.clone()).collect())
    }

    fn network_descriptor(&self, network: &str) -> Result<String> {
        self.networks
            .iter()
            .find(|(name, _)| name == network)
            .map(|(_, xml)| xml.clone())
            .ok_or_else(|| tool_failure("net-dumpxml"))
    }

    fn define_domain(&self, descriptor_xml: &str) -> Result<()> {
        self.defined.borrow_mut().push(descriptor_xml.to_string());
        self.exists.set(true);
        Ok(())
    }

    fn domain_exists(&self, _name: &str) -> Result<bool> {
        Ok(self.exists.get())
    }

    fn start_domain(&self, name: &str) -> Result<()> {
        self.started.borrow_mut().push(name.to_string());
        Ok(())
    }

    fn destroy_domain(&self, name: &str) -> Result<()> {
        self.destroyed.borrow_mut().push(name.to_string());
        if self.fail_destroy {
            return Err(tool_failure("destroy"));
        }
        Ok(())
    }

    fn undefine_domain(&self, name: &str) -> Result<()> {
        self.undefined.borrow_mut().push(name.to_string());
        if self.fail_undefine {
            return Err(tool_failure("undefine"));
        }
        self.exists.set(false);
        Ok(())
    }

    fn domain_state(&self, _name: &str) -> Result<DomainState> {
        self.state_queries.set(self.state_queries.get() + 1);
        match self.state_script.borrow_mut().pop_front() {
            Some(StateReply::State(state)) => Ok(state),
            Some(StateReply::Fail) => Err(tool_failure("domstate")),
            None => Ok(DomainState::ShutOff),
        }
    }

    fn domain_descriptor(&self, name: &str) -> Result<String> {
        self.running
            .iter()
            .find(|(running, _)| running == name)
            .map(|(_, xml)| xml.clone())
            .or_else(|| self.live_descriptor.clone())
            .ok_or_else(|| tool_failure("dumpxml"))
    }

    fn running_domains(&self) -> Result<Vec<String>> {
        Ok(self.running.iter().map(|(name, _)| name.clone()).collect())
    }
}

/// Running domain descriptor with one file-backed disk.
pub(crate) fn running_domain_xml(name: &str, disk: &Path) -> String {
    format!(
        "<domain type='kvm' id='1'><name>{name}</name><devices>\
         <disk type='file' device='disk'><source file='{}'/><target dev='vda' bus='virtio'/></disk>\
         <graphics type='vnc' port='5901'/></devices></domain>",
        disk.display()
    )
}

#[derive(Default)]
pub(crate) struct RecordingDiagnostics {
    pub captures: RefCell<Vec<(String, PathBuf)>>,
}

impl DiagnosticCapture for RecordingDiagnostics {
    fn capture(&self, descriptor_xml: &str, output: &Path) {
        self.captures
            .borrow_mut()
            .push((descriptor_xml.to_string(), output.to_path_buf()));
    }
}

/// Firewall that records calls. `Sync` because the boot listener may be
/// exercised from a second thread.
#[derive(Default)]
pub(crate) struct RecordingFirewall {
    pub inserted: std::sync::Mutex<Vec<FirewallRule>>,
    pub deleted: std::sync::Mutex<Vec<FirewallRule>>,
    pub fail_insert: bool,
    pub fail_delete: bool,
}

impl RecordingFirewall {
    pub fn inserted(&self) -> Vec<FirewallRule> {
        self.inserted.lock().unwrap().clone()
    }

    pub fn deleted(&self) -> Vec<FirewallRule> {
        self.deleted.lock().unwrap().clone()
    }
}

impl Firewall for RecordingFirewall {
    fn insert(&self, rule: &FirewallRule) -> Result<()> {
        if self.fail_insert {
            return Err(tool_failure("iptables -I"));
        }
        self.inserted.lock().unwrap().push(rule.clone());
        Ok(())
    }

    fn delete(&self, rule: &FirewallRule) -> Result<()> {
        self.deleted.lock().unwrap().push(rule.clone());
        if self.fail_delete {
            return Err(tool_failure("iptables -D"));
        }
        Ok(())
    }
}

/// Introspection session that logs every call into a shared journal.
pub(crate) struct FakeGuestFs {
    pub journal: std::rc::Rc<RefCell<Vec<String>>>,
    pub roots: Vec<String>,
    pub mountpoints: Vec<(String, String)>,
    pub command_output: Vec<String>,
    pub fail_launch: bool,
    pub fail_sync: bool,
}

impl FakeGuestFs {
    fn log(&self, entry: String) {
        self.journal.borrow_mut().push(entry);
    }
}

impl GuestFs for FakeGuestFs {
    fn add_drive(&mut self, disk: &Path) -> Result<()> {
        self.log(format!("add-drive {}", disk.display()));
        Ok(())
    }

    fn launch(&mut self) -> Result<()> {
        self.log("launch".to_string());
        if self.fail_launch {
            return Err(tool_failure("launch"));
        }
        Ok(())
    }

    fn inspect_os(&mut self) -> Result<Vec<String>> {
        self.log("inspect-os".to_string());
        Ok(self.roots.clone())
    }

    fn mountpoints(&mut self, root: &str) -> Result<Vec<(String, String)>> {
        self.log(format!("mountpoints {root}"));
        Ok(self.mountpoints.clone())
    }

    fn mount(&mut self, device: &str, mountpoint: &str) -> Result<()> {
        self.log(format!("mount {device} {mountpoint}"));
        Ok(())
    }

    fn command_lines(&mut self, command: &str) -> Result<Vec<String>> {
        self.log(format!("command-lines {command}"));
        Ok(self.command_output.clone())
    }

    fn sync(&mut self) -> Result<()> {
        self.log("sync".to_string());
        if self.fail_sync {
            return Err(tool_failure("sync"));
        }
        Ok(())
    }

    fn umount_all(&mut self) -> Result<()> {
        self.log("umount-all".to_string());
        Ok(())
    }

    fn shutdown(&mut self) -> Result<()> {
        self.log("shutdown".to_string());
        Ok(())
    }
}

/// Backend handing out [`FakeGuestFs`] sessions built from a template.
pub(crate) struct FakeBackend {
    pub journal: std::rc::Rc<RefCell<Vec<String>>>,
    pub sessions: Cell<u32>,
    pub roots: Vec<String>,
    pub mountpoints: Vec<(String, String)>,
    pub command_output: Vec<String>,
    pub fail_launch: bool,
    pub fail_sync: bool,
}

impl FakeBackend {
    pub fn new(roots: &[&str], mountpoints: &[(&str, &str)]) -> Self {
        Self {
            journal: Default::default(),
            sessions: Cell::new(0),
            roots: roots.iter().map(|r| r.to_string()).collect(),
            mountpoints: mountpoints
                .iter()
                .map(|(m, d)| (m.to_string(), d.to_string()))
                .collect(),
            command_output: Vec::new(),
            fail_launch: false,
            fail_sync: false,
        }
    }

    pub fn journal(&self) -> Vec<String> {
        self.journal.borrow().clone()
    }
}

impl IntrospectionBackend for FakeBackend {
    fn open_session(&self) -> Result<Box<dyn GuestFs>> {
        self.sessions.set(self.sessions.get() + 1);
        Ok(Box::new(FakeGuestFs {
            journal: self.journal.clone(),
            roots: self.roots.clone(),
            mountpoints: self.mountpoints.clone(),
            command_output: self.command_output.clone(),
            fail_launch: self.fail_launch,
            fail_sync: self.fail_sync,
        }))
    }
}
