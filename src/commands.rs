//! Command Parsing
//!
//! Incoming text is either a command or conversational input for an open
//! dialogue. The leading slash is optional: "/balance" and "balance" mean
//! the same thing. A recognized command word always wins over dialogue
//! input; anything else flows to the intent machine untouched.

use std::str::FromStr;

use rust_decimal::Decimal;

use crate::ledger::LedgerError;
use crate::store::models::UserId;

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Account creation; the payload is a referral code
    Start { code: Option<String> },
    Help,
    Balance,
    Profile,
    Leaderboard,
    SetPayout,
    Withdraw,
    Status,
    Support,

    // Administrator commands
    Pending,
    Settle { id: String },
    Reject { id: String },
    Sweep { force: bool },
    Credit {
        target: UserId,
        amount: Decimal,
        note: Option<String>,
    },
    AddGroup { group_id: String, title: String },
    RemoveGroup { group_id: String },
    Groups,
}

impl Command {
    /// Commands gated on the configured admin list.
    pub fn requires_admin(&self) -> bool {
        matches!(
            self,
            Command::Pending
                | Command::Settle { .. }
                | Command::Reject { .. }
                | Command::Sweep { .. }
                | Command::Credit { .. }
                | Command::AddGroup { .. }
                | Command::RemoveGroup { .. }
                | Command::Groups
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Parsed {
    Command(Command),
    /// Started with '/' but matches no command we know
    Unknown(String),
    /// Conversational input for whatever dialogue is open
    Text(String),
    Empty,
}

/// Classify one incoming message.
pub fn parse(input: &str) -> Result<Parsed, LedgerError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Ok(Parsed::Empty);
    }

    let slashed = trimmed.starts_with('/');
    let body = trimmed.strip_prefix('/').unwrap_or(trimmed);
    let mut words = body.split_whitespace();
    let Some(head) = words.next() else {
        // A bare "/" carries nothing actionable
        return Ok(Parsed::Empty);
    };
    let args: Vec<&str> = words.collect();

    let command = match head.to_ascii_lowercase().as_str() {
        "start" => Command::Start {
            code: args.first().map(|s| s.to_string()),
        },
        "help" => Command::Help,
        "balance" => Command::Balance,
        "profile" => Command::Profile,
        "leaderboard" => Command::Leaderboard,
        "setpayout" => Command::SetPayout,
        "withdraw" => Command::Withdraw,
        "status" => Command::Status,
        "support" => Command::Support,
        "pending" => Command::Pending,
        "settle" => Command::Settle {
            id: required(&args, 0, "settle <withdrawal id>")?,
        },
        "reject" => Command::Reject {
            id: required(&args, 0, "reject <withdrawal id>")?,
        },
        "sweep" => match args.first() {
            None => Command::Sweep { force: false },
            Some(w) if w.eq_ignore_ascii_case("force") => Command::Sweep { force: true },
            Some(w) => {
                return Err(LedgerError::InvalidArguments(format!(
                    "sweep takes only 'force', not '{w}'"
                )))
            }
        },
        "credit" => parse_credit(&args)?,
        "addgroup" => {
            let group_id = required(&args, 0, "addgroup <group id> [title]")?;
            let title = if args.len() > 1 {
                args[1..].join(" ")
            } else {
                group_id.clone()
            };
            Command::AddGroup { group_id, title }
        }
        "removegroup" => Command::RemoveGroup {
            group_id: required(&args, 0, "removegroup <group id>")?,
        },
        "groups" => Command::Groups,
        _ => {
            return if slashed {
                Ok(Parsed::Unknown(head.to_string()))
            } else {
                Ok(Parsed::Text(trimmed.to_string()))
            };
        }
    };

    Ok(Parsed::Command(command))
}

fn required(args: &[&str], index: usize, usage: &str) -> Result<String, LedgerError> {
    args.get(index)
        .map(|s| s.to_string())
        .ok_or_else(|| LedgerError::InvalidArguments(format!("usage: {usage}")))
}

fn parse_credit(args: &[&str]) -> Result<Command, LedgerError> {
    const USAGE: &str = "credit <user id> <amount> [note]";
    let (target, amount) = match args {
        [] | [_] => return Err(LedgerError::InvalidArguments(format!("usage: {USAGE}"))),
        [target, amount, ..] => (target, amount),
    };
    let target: UserId = target
        .parse()
        .map_err(|_| LedgerError::InvalidArguments(format!("'{target}' is not a user id")))?;
    let amount = Decimal::from_str(amount)
        .map_err(|_| LedgerError::InvalidArguments(format!("'{amount}' is not an amount")))?;
    let note = if args.len() > 2 {
        Some(args[2..].join(" "))
    } else {
        None
    };
    Ok(Command::Credit {
        target,
        amount,
        note,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(input: &str) -> Command {
        match parse(input).unwrap() {
            Parsed::Command(c) => c,
            other => panic!("expected a command for {input:?}, got {other:?}"),
        }
    }

    #[test]
    fn test_slash_is_optional() {
        assert_eq!(command("/balance"), Command::Balance);
        assert_eq!(command("balance"), Command::Balance);
        assert_eq!(command("  BALANCE  "), Command::Balance);
    }

    #[test]
    fn test_start_payload() {
        assert_eq!(command("/start"), Command::Start { code: None });
        assert_eq!(
            command("/start Ab12Cd34"),
            Command::Start {
                code: Some("Ab12Cd34".to_string())
            }
        );
    }

    #[test]
    fn test_free_text_flows_through() {
        assert_eq!(
            parse("alice@bank").unwrap(),
            Parsed::Text("alice@bank".to_string())
        );
        assert_eq!(parse("confirm").unwrap(), Parsed::Text("confirm".to_string()));
        assert_eq!(parse("   ").unwrap(), Parsed::Empty);
        assert_eq!(parse("/").unwrap(), Parsed::Empty);
    }

    #[test]
    fn test_unknown_slash_command() {
        assert_eq!(
            parse("/frobnicate now").unwrap(),
            Parsed::Unknown("frobnicate".to_string())
        );
        // Without the slash the same word is dialogue input
        assert_eq!(
            parse("frobnicate now").unwrap(),
            Parsed::Text("frobnicate now".to_string())
        );
    }

    #[test]
    fn test_sweep_flag() {
        assert_eq!(command("/sweep"), Command::Sweep { force: false });
        assert_eq!(command("/sweep force"), Command::Sweep { force: true });
        assert!(matches!(
            parse("/sweep tomorrow"),
            Err(LedgerError::InvalidArguments(_))
        ));
    }

    #[test]
    fn test_settle_requires_id() {
        assert_eq!(
            command("/settle 01JEXAMPLE"),
            Command::Settle {
                id: "01JEXAMPLE".to_string()
            }
        );
        assert!(matches!(
            parse("/settle"),
            Err(LedgerError::InvalidArguments(_))
        ));
    }

    #[test]
    fn test_credit_arguments() {
        assert_eq!(
            command("/credit 42 0.5"),
            Command::Credit {
                target: 42,
                amount: Decimal::new(5, 1),
                note: None,
            }
        );
        assert_eq!(
            command("/credit 42 -1.5 contest refund"),
            Command::Credit {
                target: 42,
                amount: Decimal::new(-15, 1),
                note: Some("contest refund".to_string()),
            }
        );
        assert!(matches!(
            parse("/credit 42"),
            Err(LedgerError::InvalidArguments(_))
        ));
        assert!(matches!(
            parse("/credit bob 1"),
            Err(LedgerError::InvalidArguments(_))
        ));
        assert!(matches!(
            parse("/credit 42 lots"),
            Err(LedgerError::InvalidArguments(_))
        ));
    }

    #[test]
    fn test_group_commands() {
        assert_eq!(
            command("/addgroup -100987 Main Lounge"),
            Command::AddGroup {
                group_id: "-100987".to_string(),
                title: "Main Lounge".to_string(),
            }
        );
        // Title falls back to the id
        assert_eq!(
            command("/addgroup -100987"),
            Command::AddGroup {
                group_id: "-100987".to_string(),
                title: "-100987".to_string(),
            }
        );
        assert_eq!(
            command("/removegroup -100987"),
            Command::RemoveGroup {
                group_id: "-100987".to_string()
            }
        );
    }

    #[test]
    fn test_admin_flag() {
        assert!(Command::Pending.requires_admin());
        assert!(Command::Sweep { force: false }.requires_admin());
        assert!(!Command::Balance.requires_admin());
        assert!(!Command::Start { code: None }.requires_admin());
    }
}
