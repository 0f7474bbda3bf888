pub mod empty;
pub mod lint;
pub mod notify;

use crate::layers::execution::command::CommandResult;

use self::lint::LintText;
use self::notify::NotifyViaEmail;

/// Post-execution stage shaping `CommandResult::combined_output`.
#[derive(Debug, Clone)]
pub enum ResultFilter {
    Lint(LintText),
    SayEmptyOutput,
    Notify(NotifyViaEmail),
}

impl ResultFilter {
    /// `lint_override` replaces every configured lint filter for this call.
    pub fn transform(&self, result: &mut CommandResult, lint_override: Option<&LintText>) {
        match self {
            ResultFilter::Lint(lint) => lint_override.unwrap_or(lint).transform(result),
            ResultFilter::SayEmptyOutput => empty::say_empty_output(result),
            ResultFilter::Notify(notify) => notify.transform(result),
        }
    }
}
