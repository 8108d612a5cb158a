//! Preflight checks for install runs.
//!
//! Validates that the host has the tools an install drives before any guest
//! state is touched. A missing `fuseiso` discovered halfway through leaves a
//! defined domain and a half-copied ISO behind.
//!
//! # Example
//!
//! ```rust
//! use guest_installer::preflight::{command_exists, check_required_tools};
//!
//! if !command_exists("virsh") {
//!     println!("libvirt client not installed");
//! }
//!
//! let tools = &[("virsh", "libvirt-client"), ("xorriso", "xorriso")];
//! if let Err(e) = check_required_tools(tools) {
//!     eprintln!("{}", e);
//! }
//! ```

use crate::error::{Error, Result};

/// Check if a command exists in PATH.
pub fn command_exists(cmd: &str) -> bool {
    which::which(cmd).is_ok()
}

/// Host tools an install needs.
///
/// Each tuple is (command_name, package_name).
pub const REQUIRED_TOOLS: &[(&str, &str)] = &[
    ("virsh", "libvirt-client"),
    ("fuseiso", "fuseiso"),
    ("fusermount", "fuse"),
    ("xorriso", "xorriso"),
    ("iptables", "iptables"),
    ("guestfish", "guestfish"),
    ("gvnccapture", "gtk-vnc"),
];

/// Tools needed only to inspect an installed disk.
pub const INSPECT_TOOLS: &[(&str, &str)] = &[
    ("virsh", "libvirt-client"),
    ("guestfish", "guestfish"),
];

/// Check that specific tools are available.
///
/// # Returns
///
/// * `Ok(())` if all tools are found
/// * `Err(Error::Environment)` listing missing tools and their packages
pub fn check_required_tools(tools: &[(&str, &str)]) -> Result<()> {
    let missing: Vec<_> = tools
        .iter()
        .filter(|(tool, _)| !command_exists(tool))
        .collect();

    if !missing.is_empty() {
        let msg = missing
            .iter()
            .map(|(t, p)| format!("  {} (install: {})", t, p))
            .collect::<Vec<_>>()
            .join("\n");
        return Err(Error::Environment(format!(
            "Missing required host tools:\n{}",
            msg
        )));
    }

    Ok(())
}

/// Check every tool in [`REQUIRED_TOOLS`].
pub fn check_host_tools() -> Result<()> {
    check_required_tools(REQUIRED_TOOLS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_exists() {
        assert!(command_exists("sh"));
        assert!(!command_exists("definitely_not_a_real_command_12345"));
    }

    #[test]
    fn test_check_required_tools_success() {
        let tools = &[("sh", "coreutils"), ("cat", "coreutils")];
        assert!(check_required_tools(tools).is_ok());
    }

    #[test]
    fn test_check_required_tools_lists_every_missing_tool() {
        let tools = &[
            ("nonexistent_command_xyz", "fake-package"),
            ("sh", "coreutils"),
            ("nonexistent_command_abc", "other-package"),
        ];
        let err = check_required_tools(tools).unwrap_err();
        let msg = err.to_string();
        assert!(matches!(err, Error::Environment(_)));
        assert!(msg.contains("nonexistent_command_xyz (install: fake-package)"));
        assert!(msg.contains("nonexistent_command_abc (install: other-package)"));
        assert!(!msg.contains("coreutils"));
    }
}
