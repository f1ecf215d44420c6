//! Incremental Server-Sent Events decoding.
//!
//! Network chunks can split an event (or a UTF-8 sequence) anywhere, so bytes
//! are buffered until a blank line terminates the event. Only `data:` fields
//! matter for chat completions; comments and other fields are skipped.

/// Buffers raw bytes and yields complete `data` payloads.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk, returning the data payload of every event it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer
            .extend(chunk.iter().copied().filter(|b| *b != b'\r'));

        let mut payloads = Vec::new();
        while let Some(pos) = find_event_end(&self.buffer) {
            let event: Vec<u8> = self.buffer.drain(..pos + 2).collect();
            if let Some(data) = parse_event(&event[..pos]) {
                payloads.push(data);
            }
        }
        payloads
    }

    /// Flush a trailing event that was not terminated by a blank line.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        parse_event(&rest)
    }
}

fn find_event_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|w| w == b"\n\n")
}

/// Join the `data:` lines of one event. `None` when the event carries no data.
fn parse_event(event: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(event);
    let mut data: Option<String> = None;

    for line in text.lines() {
        let Some(value) = line.strip_prefix("data:") else {
            continue;
        };
        let value = value.strip_prefix(' ').unwrap_or(value);
        match data.as_mut() {
            Some(existing) => {
                existing.push('\n');
                existing.push_str(value);
            }
            None => data = Some(value.to_string()),
        }
    }

    data
}
