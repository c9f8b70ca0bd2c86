use serde::{Deserialize, Serialize};

/// One frame pushed to the dashboard over the chat SSE stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SseFrame {
    Chunk {
        content: String,
    },
    Done {
        #[serde(rename = "messageId")]
        message_id: String,
    },
    Error {
        message: String,
    },
}

impl SseFrame {
    /// Render the frame as raw SSE wire text (`data: <json>\n\n`).
    #[must_use]
    pub fn to_wire(&self) -> String {
        format!("data: {}\n\n", self.to_json())
    }

    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// One record emitted by the chat CLI on stdout, one JSON object per line.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamRecord {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub message: Option<StreamMessage>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub errors: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamMessage {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContentBlock {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub text: Option<String>,
}

impl StreamRecord {
    /// Text blocks carried by an `assistant` record, in emission order.
    /// Empty for every other record kind.
    #[must_use]
    pub fn assistant_text(&self) -> Vec<&str> {
        if self.kind != "assistant" {
            return Vec::new();
        }
        let Some(message) = &self.message else {
            return Vec::new();
        };
        message
            .content
            .iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text.as_deref())
            .collect()
    }

    /// Errors attached to a terminal `result` record, if any.
    #[must_use]
    pub fn result_errors(&self) -> Option<&[String]> {
        if self.kind != "result" {
            return None;
        }
        self.errors.as_deref().filter(|errors| !errors.is_empty())
    }
}

/// Incremental decoder for the CLI's newline-delimited JSON stdout.
///
/// Bytes arrive in arbitrary chunks; a record is parsed only once its
/// terminating newline has been seen. Lines that are not valid JSON are
/// skipped. A partial trailing line is held until `flush` at stream end.
#[derive(Debug, Default)]
pub struct StreamDecoder {
    buf: Vec<u8>,
}

impl StreamDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of stdout, returning every record completed by it.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<StreamRecord> {
        self.buf.extend_from_slice(chunk);
        let mut records = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            if let Some(record) = parse_line(&line) {
                records.push(record);
            }
        }
        records
    }

    /// Parse whatever is left in the buffer once the stream has closed.
    pub fn flush(&mut self) -> Option<StreamRecord> {
        let line = std::mem::take(&mut self.buf);
        parse_line(&line)
    }
}

fn parse_line(line: &[u8]) -> Option<StreamRecord> {
    let text = std::str::from_utf8(line).ok()?.trim();
    if text.is_empty() {
        return None;
    }
    serde_json::from_str(text).ok()
}
