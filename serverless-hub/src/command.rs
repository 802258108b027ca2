//! Console command parsing for the server loop.
//!
//! Each stdin line is one of:
//! - `send user <user id>`
//! - `send group <group name>`
//! - `send addusertogroup <user id>`
//! - `send removeuserfromgroup <user id>`
//!
//! Keywords are case-sensitive and the line must have exactly three
//! whitespace-separated tokens. Nothing else is validated.

use thiserror::Error;

/// Group used by the membership commands.
pub const TEST_GROUP: &str = "TestGroup";

pub const USAGE: &str = "*********Usage*********\n\
send user <User Id>\n\
send group <Group Name>\n\
send addusertogroup <User Id>\n\
send removeuserfromgroup <User Id>\n\
***********************";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubCommand {
    SendToUser { user_id: String },
    SendToGroup { group: String },
    AddUserToGroup { user_id: String },
    RemoveUserFromGroup { user_id: String },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("Can't recognize command {0}")]
    Unrecognized(String),
}

impl HubCommand {
    pub fn parse(line: &str) -> Result<Self, CommandError> {
        let unrecognized = || CommandError::Unrecognized(line.trim_end().to_string());

        let parts: Vec<&str> = line.split_whitespace().collect();
        let [verb, sub_command, arg] = parts.as_slice() else {
            return Err(unrecognized());
        };
        if *verb != "send" {
            return Err(unrecognized());
        }

        let arg = arg.to_string();
        match *sub_command {
            "user" => Ok(HubCommand::SendToUser { user_id: arg }),
            "group" => Ok(HubCommand::SendToGroup { group: arg }),
            "addusertogroup" => Ok(HubCommand::AddUserToGroup { user_id: arg }),
            "removeuserfromgroup" => Ok(HubCommand::RemoveUserFromGroup { user_id: arg }),
            _ => Err(unrecognized()),
        }
    }
}
