//! Output of schemas, records and state

use std::io::Write;

use serde::Serialize;

use crate::Record;
use crate::error::TapResult;
use crate::schema::SchemaFragment;

use super::state::State;

/// A message handed to the downstream consumer
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
pub enum Message {
    Schema {
        stream: String,
        schema: SchemaFragment,
        key_properties: Vec<String>,
    },
    Record {
        stream: String,
        record: Record,
    },
    State {
        value: State,
    },
}

/// Receiver of sync output
pub trait RecordWriter {
    fn write_message(&mut self, message: Message) -> TapResult<()>;

    fn write_schema(&mut self, stream: &str, schema: &SchemaFragment, key_properties: &[String]) -> TapResult<()> {
        self.write_message(Message::Schema {
            stream: stream.to_string(),
            schema: schema.clone(),
            key_properties: key_properties.to_vec(),
        })
    }

    fn write_record(&mut self, stream: &str, record: Record) -> TapResult<()> {
        self.write_message(Message::Record {
            stream: stream.to_string(),
            record,
        })
    }

    fn write_state(&mut self, state: &State) -> TapResult<()> {
        self.write_message(Message::State {
            value: state.clone(),
        })
    }
}

impl<W: RecordWriter + ?Sized> RecordWriter for &mut W {
    fn write_message(&mut self, message: Message) -> TapResult<()> {
        (**self).write_message(message)
    }
}

/// Writes one JSON message per line
pub struct JsonLinesWriter<W: Write> {
    out: W,
}

impl<W: Write> JsonLinesWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> RecordWriter for JsonLinesWriter<W> {
    fn write_message(&mut self, message: Message) -> TapResult<()> {
        serde_json::to_writer(&mut self.out, &message)?;
        self.out.write_all(b"\n")?;
        if matches!(message, Message::State { .. }) {
            // state must be durable before the next file starts
            self.out.flush()?;
        }
        Ok(())
    }
}

/// Collects messages in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryWriter {
    pub messages: Vec<Message>,
}

impl MemoryWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records written for a stream, in order
    pub fn records(&self, stream: &str) -> Vec<&Record> {
        self.messages
            .iter()
            .filter_map(|message| match message {
                Message::Record { stream: s, record } if s == stream => Some(record),
                _ => None,
            })
            .collect()
    }

    /// Every state snapshot, in order
    pub fn states(&self) -> Vec<&State> {
        self.messages
            .iter()
            .filter_map(|message| match message {
                Message::State { value } => Some(value),
                _ => None,
            })
            .collect()
    }
}

impl RecordWriter for MemoryWriter {
    fn write_message(&mut self, message: Message) -> TapResult<()> {
        self.messages.push(message);
        Ok(())
    }
}
