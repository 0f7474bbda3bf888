pub mod auth;
pub mod config;
pub mod rate_limit;
pub mod totp;
pub mod translate;

use crate::error::ProcessError;
use crate::layers::execution::command::Command;

use self::auth::PinAndShortcuts;
use self::translate::TranslateSequences;

/// Pre-dispatch stage; each one may rewrite the command or stop it.
#[derive(Debug, Clone)]
pub enum CommandFilter {
    PinAndShortcuts(PinAndShortcuts),
    Translate(TranslateSequences),
}

impl CommandFilter {
    pub fn transform(&self, command: Command) -> Result<Command, ProcessError> {
        match self {
            CommandFilter::PinAndShortcuts(filter) => filter.transform(command),
            CommandFilter::Translate(filter) => filter.transform(command),
        }
    }
}
