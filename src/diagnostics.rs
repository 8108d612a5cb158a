//! Screenshot capture for installs that never finish.

use std::path::Path;

use tracing::{error, info};

use crate::domain::descriptor::{DomainView, VNC_BASE_PORT};
use crate::process::Cmd;

/// Best-effort diagnostic hook run when an install times out. Never fails.
pub trait DiagnosticCapture {
    fn capture(&self, descriptor_xml: &str, output: &Path);
}

/// VNC display index (`port - 5900`) of the descriptor's single VNC device.
///
/// Logs why and returns `None` if there is not exactly one graphics device,
/// it is not VNC, or no port has been assigned yet.
pub fn vnc_display(descriptor_xml: &str) -> Option<u32> {
    let view = match DomainView::parse(descriptor_xml) {
        Ok(view) => view,
        Err(e) => {
            error!(error = %e, "could not parse domain descriptor");
            return None;
        }
    };

    let [graphics] = view.devices.graphics.as_slice() else {
        error!(
            count = view.devices.graphics.len(),
            "could not find the VNC port"
        );
        return None;
    };

    if graphics.kind != "vnc" {
        error!(kind = %graphics.kind, "graphics type is not VNC, not taking screenshot");
        return None;
    }

    match graphics.port {
        Some(port) if port >= VNC_BASE_PORT => u32::try_from(port - VNC_BASE_PORT).ok(),
        _ => {
            error!("VNC port is not assigned, not taking screenshot");
            None
        }
    }
}

/// Captures the guest console through an external VNC screenshot tool.
#[derive(Debug, Clone)]
pub struct VncScreenshot {
    program: String,
}

impl VncScreenshot {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for VncScreenshot {
    fn default() -> Self {
        Self::new("gvnccapture")
    }
}

impl DiagnosticCapture for VncScreenshot {
    fn capture(&self, descriptor_xml: &str, output: &Path) {
        let Some(display) = vnc_display(descriptor_xml) else {
            return;
        };

        if let Some(parent) = output.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                error!(error = %e, dir = %parent.display(), "cannot create screenshot directory");
                return;
            }
        }

        let target = format!("localhost:{display}");
        match Cmd::new(&self.program).arg(&target).arg_path(output).run() {
            Ok(_) => info!(screenshot = %output.display(), "captured guest screen"),
            Err(e) => error!(error = %e, "failed to take screenshot"),
        }
    }
}
