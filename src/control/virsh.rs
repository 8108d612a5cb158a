//! [`ControlPlane`] backed by the `virsh` command-line client.

use std::io::Write;

use tempfile::NamedTempFile;

use super::{ControlPlane, DomainState};
use crate::error::Result;
use crate::process::Cmd;

/// Drives libvirt through `virsh -c <uri>`.
#[derive(Debug, Clone)]
pub struct VirshControlPlane {
    uri: String,
}

impl VirshControlPlane {
    pub fn new(uri: impl Into<String>) -> Self {
        Self { uri: uri.into() }
    }

    /// `qemu:///system`
    pub fn system() -> Self {
        Self::new("qemu:///system")
    }

    fn virsh(&self) -> Cmd {
        Cmd::new("virsh").args(["-q", "-c", self.uri.as_str()])
    }

    // Without a state filter `list` shows every active domain, paused ones included.
    fn list_active_cmd(&self) -> Cmd {
        self.virsh().args(["list", "--name"])
    }
}

impl ControlPlane for VirshControlPlane {
    fn networks(&self) -> Result<Vec<String>> {
        Ok(self.virsh().args(["net-list", "--name"]).run()?.lines())
    }

    fn network_descriptor(&self, network: &str) -> Result<String> {
        Ok(self.virsh().args(["net-dumpxml", network]).run()?.stdout)
    }

    fn define_domain(&self, descriptor_xml: &str) -> Result<()> {
        let mut file = NamedTempFile::new()?;
        file.write_all(descriptor_xml.as_bytes())?;
        file.flush()?;

        self.virsh()
            .arg("define")
            .arg_path(file.path())
            .error_msg("defining domain")
            .run()?;
        Ok(())
    }

    fn domain_exists(&self, name: &str) -> Result<bool> {
        Ok(self
            .virsh()
            .args(["domuuid", name])
            .allow_fail()
            .run()?
            .success())
    }

    fn start_domain(&self, name: &str) -> Result<()> {
        self.virsh().args(["start", name]).run()?;
        Ok(())
    }

    fn destroy_domain(&self, name: &str) -> Result<()> {
        self.virsh().args(["destroy", name]).run()?;
        Ok(())
    }

    fn undefine_domain(&self, name: &str) -> Result<()> {
        self.virsh().args(["undefine", name]).run()?;
        Ok(())
    }

    fn domain_state(&self, name: &str) -> Result<DomainState> {
        let result = self.virsh().args(["domstate", name]).run()?;
        Ok(DomainState::from_virsh(&result.stdout))
    }

    fn domain_descriptor(&self, name: &str) -> Result<String> {
        Ok(self.virsh().args(["dumpxml", name]).run()?.stdout)
    }

    fn running_domains(&self) -> Result<Vec<String>> {
        Ok(self.list_active_cmd().run()?.lines())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_virsh_command_line_carries_uri() {
        let plane = VirshControlPlane::new("qemu:///session");
        let line = plane.virsh().args(["domstate", "f14"]).command_line();
        assert_eq!(line, "virsh -q -c qemu:///session domstate f14");
    }

    #[test]
    fn test_active_domain_listing_includes_paused() {
        let plane = VirshControlPlane::system();
        assert_eq!(
            plane.list_active_cmd().command_line(),
            "virsh -q -c qemu:///system list --name"
        );
    }
}
