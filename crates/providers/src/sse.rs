//! SSE frame draining for streaming provider responses.
//!
//! Frames are `\n\n`-delimited blocks; within a block only `data:` lines
//! matter, and multiple `data:` lines of one block join with `\n` per the SSE
//! spec. The buffer is drained in place so a trailing partial frame survives
//! until the next network chunk.

/// Pull every complete frame's data payload out of `buffer`.
pub(crate) fn drain_frames(buffer: &mut String) -> Vec<String> {
    let mut payloads = Vec::new();

    while let Some(pos) = buffer.find("\n\n") {
        let frame: String = buffer.drain(..pos + 2).collect();

        let mut data = String::new();
        for line in frame.lines() {
            if let Some(rest) = line.strip_prefix("data:") {
                if !data.is_empty() {
                    data.push('\n');
                }
                data.push_str(rest.trim_start());
            }
        }
        if !data.trim().is_empty() {
            payloads.push(data);
        }
    }

    payloads
}
