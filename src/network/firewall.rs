//! Temporary host firewall rules for the boot handshake.

use tracing::{debug, info, warn};

use crate::error::Result;
use crate::process::Cmd;

/// One filter rule: `-p <protocol> -m <protocol> --dport <port> -j <action>`
/// at `position` of `chain`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirewallRule {
    pub chain: String,
    pub position: u32,
    pub protocol: String,
    pub port: u16,
    pub action: String,
}

impl FirewallRule {
    /// ACCEPT inbound TCP on `port`, ahead of every other INPUT rule.
    pub fn accept_tcp(port: u16) -> Self {
        Self {
            chain: "INPUT".to_string(),
            position: 1,
            protocol: "tcp".to_string(),
            port,
            action: "ACCEPT".to_string(),
        }
    }

    /// Match part of the rule, shared by insert, check and delete.
    fn match_args(&self) -> Vec<String> {
        vec![
            "-p".to_string(),
            self.protocol.clone(),
            "-m".to_string(),
            self.protocol.clone(),
            "--dport".to_string(),
            self.port.to_string(),
            "-j".to_string(),
            self.action.clone(),
        ]
    }
}

pub trait Firewall {
    fn insert(&self, rule: &FirewallRule) -> Result<()>;

    /// Remove `rule`. Removing a rule that is not present succeeds.
    fn delete(&self, rule: &FirewallRule) -> Result<()>;
}

/// `iptables` on the host.
#[derive(Debug, Clone)]
pub struct Iptables {
    program: String,
}

impl Default for Iptables {
    fn default() -> Self {
        Self {
            program: "iptables".to_string(),
        }
    }
}

impl Iptables {
    fn insert_cmd(&self, rule: &FirewallRule) -> Cmd {
        Cmd::new(&self.program)
            .args(["-I", rule.chain.as_str()])
            .arg(rule.position.to_string())
            .args(rule.match_args())
    }

    fn check_cmd(&self, rule: &FirewallRule) -> Cmd {
        Cmd::new(&self.program)
            .args(["-C", rule.chain.as_str()])
            .args(rule.match_args())
    }

    // Deleted by match, not position; other rules may have been inserted
    // above it since.
    fn delete_cmd(&self, rule: &FirewallRule) -> Cmd {
        Cmd::new(&self.program)
            .args(["-D", rule.chain.as_str()])
            .args(rule.match_args())
    }
}

impl Firewall for Iptables {
    fn insert(&self, rule: &FirewallRule) -> Result<()> {
        self.insert_cmd(rule)
            .error_msg("failed to open the boot listener port")
            .run()?;
        info!(chain = %rule.chain, port = rule.port, "inserted firewall rule");
        Ok(())
    }

    fn delete(&self, rule: &FirewallRule) -> Result<()> {
        if !self.check_cmd(rule).allow_fail().run()?.success() {
            debug!(chain = %rule.chain, port = rule.port, "firewall rule already gone");
            return Ok(());
        }
        self.delete_cmd(rule).run()?;
        info!(chain = %rule.chain, port = rule.port, "removed firewall rule");
        Ok(())
    }
}

/// Keeps a rule installed for its own lifetime.
pub struct RuleGuard<'a> {
    firewall: &'a dyn Firewall,
    rule: FirewallRule,
}

impl<'a> RuleGuard<'a> {
    /// Insert `rule`; nothing is left behind if the insert fails.
    pub fn insert(firewall: &'a dyn Firewall, rule: FirewallRule) -> Result<Self> {
        firewall.insert(&rule)?;
        Ok(Self { firewall, rule })
    }

    pub fn rule(&self) -> &FirewallRule {
        &self.rule
    }
}

impl Drop for RuleGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.firewall.delete(&self.rule) {
            warn!(
                error = %e,
                chain = %self.rule.chain,
                port = self.rule.port,
                "failed to remove firewall rule"
            );
        }
    }
}
