/// Upper bound for one length-delimited frame on the command and control sockets.
///
/// Report listings returned over the control socket can carry full command
/// output for every subject, so the limit sits well above the codec default.
/// Client and server must agree on it.
pub const MAX_FRAME_LENGTH: usize = 64 * 1024 * 1024;
