//! Console commands understood by the simulator.

use anyhow::{anyhow, bail, Result};
use minegate_verification::{OperatorRole, VerificationItemType};

#[derive(Debug, Clone, PartialEq)]
pub enum SimCommand {
    Start,
    StartRfidOnly,
    StartMlOnly,
    /// Keyboard-simulated tag read
    Key(char),
    Scan { item: String, tag: String },
    Fault { item: VerificationItemType, reason: String },
    Snap,
    Role(OperatorRole),
    Override { role: OperatorRole, reason: String },
    /// Retry a failed attendance write
    Attend,
    Reset,
    Status,
    Audit,
    Help,
    Quit,
}

impl SimCommand {
    /// Parse one input line. Blank lines yield `None`.
    pub fn parse(line: &str) -> Result<Option<Self>> {
        let mut words = line.split_whitespace();
        let Some(head) = words.next() else {
            return Ok(None);
        };
        let rest: Vec<&str> = words.collect();

        let command = match head.to_ascii_lowercase().as_str() {
            "start" => match rest.first().map(|m| m.to_ascii_lowercase()).as_deref() {
                None | Some("full") => SimCommand::Start,
                Some("rfid") => SimCommand::StartRfidOnly,
                Some("ml") => SimCommand::StartMlOnly,
                Some(other) => bail!("unknown session mode '{}'", other),
            },
            "rfid" => SimCommand::StartRfidOnly,
            "ml" => SimCommand::StartMlOnly,
            "h" | "v" | "s" => SimCommand::Key(head.chars().next().unwrap_or('h')),
            "scan" => match rest.as_slice() {
                [item, tag] => SimCommand::Scan {
                    item: item.to_string(),
                    tag: tag.to_string(),
                },
                _ => bail!("usage: scan <helmet|vest|shoes> <tag-id>"),
            },
            "fault" => {
                let (item, reason) = rest
                    .split_first()
                    .ok_or_else(|| anyhow!("usage: fault <item> <reason>"))?;
                SimCommand::Fault {
                    item: item.parse()?,
                    reason: reason.join(" "),
                }
            }
            "snap" | "capture" => SimCommand::Snap,
            "role" => {
                let role = rest
                    .first()
                    .ok_or_else(|| anyhow!("usage: role <role>"))?;
                SimCommand::Role(role.parse()?)
            }
            "override" => {
                let (role, reason) = rest
                    .split_first()
                    .ok_or_else(|| anyhow!("usage: override <role> <reason>"))?;
                SimCommand::Override {
                    role: role.parse()?,
                    reason: reason.join(" "),
                }
            }
            "attend" => SimCommand::Attend,
            "reset" => SimCommand::Reset,
            "status" => SimCommand::Status,
            "audit" => SimCommand::Audit,
            "help" | "?" => SimCommand::Help,
            "quit" | "exit" | "q" => SimCommand::Quit,
            other => bail!("unknown command '{}' (try 'help')", other),
        };
        Ok(Some(command))
    }
}

pub const HELP: &str = "\
commands:
  start [full|rfid|ml]      start a session (rfid / ml are shortcuts)
  h | v | s                 simulated helmet / vest / shoes tag read
  scan <item> <tag>         tag read with an explicit tag id
  fault <item> <reason>     report a scanner read error
  snap                      capture and run detection
  role <role>               set the console operator role
  override <role> <reason>  override a failed or warning verdict
  attend                    retry a failed attendance write
  reset | status | audit | help | quit";
