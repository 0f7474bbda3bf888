use crate::error::ProcessError;
use crate::layers::execution::command::Command;

/// Literal substring substitutions, for transports that cannot carry some characters.
#[derive(Debug, Clone, Default)]
pub struct TranslateSequences {
    sequences: Vec<(String, String)>,
}

impl TranslateSequences {
    pub fn new(sequences: &[(String, String)]) -> Self {
        Self {
            sequences: sequences
                .iter()
                .filter(|(from, _)| !from.is_empty())
                .cloned()
                .collect(),
        }
    }

    pub fn transform(&self, mut command: Command) -> Result<Command, ProcessError> {
        for (from, to) in &self.sequences {
            if command.content.contains(from.as_str()) {
                command.content = command.content.replace(from.as_str(), to);
            }
        }
        Ok(command)
    }
}
