use crate::layers::execution::command::CommandResult;

pub const EMPTY_OUTPUT_TEXT: &str = "EMPTY OUTPUT";

pub fn say_empty_output(result: &mut CommandResult) {
    let visible = result
        .combined_output
        .chars()
        .any(|ch| !ch.is_whitespace() && !ch.is_control());
    if !visible {
        result.combined_output = EMPTY_OUTPUT_TEXT.to_string();
    }
}
