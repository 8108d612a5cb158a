//! [`GuestFs`] over a `guestfish --listen` server process.

use std::path::Path;

use tracing::debug;

use super::{GuestFs, IntrospectionBackend};
use crate::error::{BestEffort, Error, Result};
use crate::process::Cmd;

#[derive(Debug, Clone)]
pub struct GuestfishBackend {
    program: String,
}

impl Default for GuestfishBackend {
    fn default() -> Self {
        Self::new("guestfish")
    }
}

impl GuestfishBackend {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl IntrospectionBackend for GuestfishBackend {
    fn open_session(&self) -> Result<Box<dyn GuestFs>> {
        let output = Cmd::new(&self.program)
            .arg("--listen")
            .error_msg("failed to start guestfish server")
            .run()?;
        let pid = parse_listen_pid(&output.stdout).ok_or_else(|| {
            Error::Inspection(format!(
                "guestfish --listen did not report a server pid: {}",
                output.stdout.trim()
            ))
        })?;
        debug!(pid, "guestfish server started");

        Ok(Box::new(GuestfishSession {
            program: self.program.clone(),
            pid,
            alive: true,
        }))
    }
}

/// `GUESTFISH_PID=1234; export GUESTFISH_PID` → 1234
fn parse_listen_pid(stdout: &str) -> Option<u32> {
    let (_, rest) = stdout.split_once("GUESTFISH_PID=")?;
    let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
    digits.parse().ok()
}

/// `/boot: /dev/sda1` lines → `("/boot", "/dev/sda1")`
fn parse_mountpoints(lines: &[String]) -> Vec<(String, String)> {
    lines
        .iter()
        .filter_map(|line| line.split_once(": "))
        .map(|(mp, dev)| (mp.trim().to_string(), dev.trim().to_string()))
        .collect()
}

struct GuestfishSession {
    program: String,
    pid: u32,
    alive: bool,
}

impl GuestfishSession {
    fn remote(&self, command: &str) -> Cmd {
        Cmd::new(&self.program)
            .arg(format!("--remote={}", self.pid))
            .arg("--")
            .arg(command)
    }

    fn run(&self, cmd: Cmd) -> Result<Vec<String>> {
        if !self.alive {
            return Err(Error::Inspection("guestfish session already shut down".into()));
        }
        Ok(cmd.run()?.lines())
    }
}

impl GuestFs for GuestfishSession {
    fn add_drive(&mut self, disk: &Path) -> Result<()> {
        self.run(self.remote("add-drive").arg_path(disk))?;
        Ok(())
    }

    fn launch(&mut self) -> Result<()> {
        self.run(self.remote("launch"))?;
        Ok(())
    }

    fn inspect_os(&mut self) -> Result<Vec<String>> {
        self.run(self.remote("inspect-os"))
    }

    fn mountpoints(&mut self, root: &str) -> Result<Vec<(String, String)>> {
        let lines = self.run(self.remote("inspect-get-mountpoints").arg(root))?;
        Ok(parse_mountpoints(&lines))
    }

    fn mount(&mut self, device: &str, mountpoint: &str) -> Result<()> {
        self.run(self.remote("mount").args([device, mountpoint]))?;
        Ok(())
    }

    fn command_lines(&mut self, command: &str) -> Result<Vec<String>> {
        self.run(self.remote("command-lines").arg(command))
    }

    fn sync(&mut self) -> Result<()> {
        self.run(self.remote("sync"))?;
        Ok(())
    }

    fn umount_all(&mut self) -> Result<()> {
        self.run(self.remote("umount-all"))?;
        Ok(())
    }

    fn shutdown(&mut self) -> Result<()> {
        if !self.alive {
            return Ok(());
        }
        let result = self.run(self.remote("shutdown")).map(|_| ());
        // The server keeps running after the appliance stops until told to exit.
        self.remote("exit").run().best_effort("stopping guestfish server");
        self.alive = false;
        result
    }
}
