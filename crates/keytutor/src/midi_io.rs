//! MIDI device I/O via ALSA (through midir)
//!
//! Inbound packets are handed to a callback as `RawMessage`s; outbound
//! note commands go through the `NoteOutput` trait so the learning engine
//! and the playback scheduler don't care whether a device is attached.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use midir::{MidiIO, MidiInput, MidiInputConnection, MidiOutput, MidiOutputConnection};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::ingest::RawMessage;

/// Error type for MIDI operations
#[derive(Debug, thiserror::Error)]
pub enum MidiError {
    #[error("Failed to initialize MIDI: {0}")]
    InitFailed(String),

    #[error("Port not found: {0}")]
    PortNotFound(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),
}

/// Outbound note command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboundNote {
    On { pitch: u8, velocity: u8 },
    Off { pitch: u8, velocity: u8 },
}

impl OutboundNote {
    /// Channel 0 wire bytes
    pub fn to_bytes(self) -> [u8; 3] {
        match self {
            OutboundNote::On { pitch, velocity } => [0x90, pitch & 0x7F, velocity & 0x7F],
            OutboundNote::Off { pitch, velocity } => [0x80, pitch & 0x7F, velocity & 0x7F],
        }
    }
}

/// Fire-and-forget note output.
///
/// Failures are logged by the implementation, never surfaced: a dropped cue
/// must not stop playback or learning.
pub trait NoteOutput: Send + Sync {
    fn send(&self, note: OutboundNote);

    fn note_on(&self, pitch: u8, velocity: u8) {
        self.send(OutboundNote::On { pitch, velocity });
    }

    fn note_off(&self, pitch: u8, velocity: u8) {
        self.send(OutboundNote::Off { pitch, velocity });
    }
}

/// Output that keeps everything it was sent, in order.
#[derive(Debug, Default)]
pub struct MemoryOutput {
    sent: Mutex<Vec<OutboundNote>>,
}

impl MemoryOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<OutboundNote> {
        self.sent.lock().expect("memory output mutex poisoned").clone()
    }

    pub fn clear(&self) {
        self.sent.lock().expect("memory output mutex poisoned").clear();
    }
}

impl NoteOutput for MemoryOutput {
    fn send(&self, note: OutboundNote) {
        self.sent.lock().expect("memory output mutex poisoned").push(note);
    }
}

/// Information about a discovered MIDI port
#[derive(Debug, Clone, Serialize)]
pub struct MidiPortInfo {
    /// Position in the system's port list
    pub index: usize,
    pub name: String,
}

fn list_ports<IO: MidiIO>(io: &IO) -> Vec<MidiPortInfo> {
    io.ports()
        .iter()
        .enumerate()
        .filter_map(|(index, port)| {
            let name = io.port_name(port).ok()?;
            Some(MidiPortInfo { index, name })
        })
        .collect()
}

/// Index of the first port name containing `pattern`.
fn match_port<'a>(names: impl IntoIterator<Item = &'a str>, pattern: &str) -> Option<usize> {
    names.into_iter().position(|name| name.contains(pattern))
}

fn find_port<IO: MidiIO>(io: &IO, pattern: &str) -> Result<(IO::Port, String), MidiError> {
    let mut named: Vec<(IO::Port, String)> = io
        .ports()
        .into_iter()
        .filter_map(|port| {
            let name = io.port_name(&port).ok()?;
            Some((port, name))
        })
        .collect();
    let found = match_port(named.iter().map(|(_, name)| name.as_str()), pattern)
        .ok_or_else(|| MidiError::PortNotFound(pattern.to_string()))?;
    Ok(named.swap_remove(found))
}

pub fn list_input_ports() -> Result<Vec<MidiPortInfo>, MidiError> {
    let midi_in =
        MidiInput::new("keytutor-scan").map_err(|e| MidiError::InitFailed(e.to_string()))?;
    Ok(list_ports(&midi_in))
}

pub fn list_output_ports() -> Result<Vec<MidiPortInfo>, MidiError> {
    let midi_out =
        MidiOutput::new("keytutor-scan").map_err(|e| MidiError::InitFailed(e.to_string()))?;
    Ok(list_ports(&midi_out))
}

/// Callback for inbound messages. Runs on the MIDI thread.
pub type MidiInputCallback = Box<dyn Fn(u64, RawMessage) + Send + 'static>;

/// Keyboard input. Closes on drop.
pub struct ActiveMidiInput {
    connection: Option<MidiInputConnection<()>>,
    pub port_name: String,
}

impl ActiveMidiInput {
    /// Open the first input port whose name contains `port_pattern`
    pub fn open(port_pattern: &str, callback: MidiInputCallback) -> Result<Self, MidiError> {
        let mut midi_in =
            MidiInput::new("keytutor-in").map_err(|e| MidiError::InitFailed(e.to_string()))?;
        // Sysex, clock and active sensing never reach the tutor
        midi_in.ignore(midir::Ignore::All);

        let (port, port_name) = find_port(&midi_in, port_pattern)?;
        let connection = midi_in
            .connect(
                &port,
                "keytutor-input",
                move |timestamp_us, data, _| {
                    if let Some(msg) = RawMessage::from_bytes(data) {
                        callback(timestamp_us, msg);
                    }
                },
                (),
            )
            .map_err(|e| MidiError::ConnectionFailed(e.to_string()))?;

        info!(port = %port_name, "opened MIDI input");
        Ok(Self {
            connection: Some(connection),
            port_name,
        })
    }

    pub fn close(&mut self) {
        if let Some(conn) = self.connection.take() {
            conn.close();
            info!(port = %self.port_name, "closed MIDI input");
        }
    }
}

impl Drop for ActiveMidiInput {
    fn drop(&mut self) {
        self.close();
    }
}

/// Key-light or sound-module output. Closes on drop and logs how many
/// messages went out.
pub struct ActiveMidiOutput {
    connection: Mutex<Option<MidiOutputConnection>>,
    pub port_name: String,
    sent: AtomicU64,
}

impl ActiveMidiOutput {
    /// Open the first output port whose name contains `port_pattern`
    pub fn open(port_pattern: &str) -> Result<Self, MidiError> {
        let midi_out =
            MidiOutput::new("keytutor-out").map_err(|e| MidiError::InitFailed(e.to_string()))?;

        let (port, port_name) = find_port(&midi_out, port_pattern)?;
        let connection = midi_out
            .connect(&port, "keytutor-output")
            .map_err(|e| MidiError::ConnectionFailed(e.to_string()))?;

        info!(port = %port_name, "opened MIDI output");
        Ok(Self {
            connection: Mutex::new(Some(connection)),
            port_name,
            sent: AtomicU64::new(0),
        })
    }

    /// Messages delivered to the port so far
    pub fn messages_sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn send_raw(&self, data: &[u8]) -> Result<(), MidiError> {
        let mut guard = self.connection.lock().expect("midi output mutex poisoned");
        let conn = guard
            .as_mut()
            .ok_or_else(|| MidiError::SendFailed("connection closed".to_string()))?;
        conn.send(data)
            .map_err(|e| MidiError::SendFailed(e.to_string()))?;
        self.sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub fn close(&self) {
        let mut guard = self.connection.lock().expect("midi output mutex poisoned");
        if let Some(conn) = guard.take() {
            conn.close();
            info!(port = %self.port_name, sent = self.messages_sent(), "closed MIDI output");
        }
    }
}

impl NoteOutput for ActiveMidiOutput {
    fn send(&self, note: OutboundNote) {
        if let Err(e) = self.send_raw(&note.to_bytes()) {
            warn!(port = %self.port_name, ?note, "MIDI send failed: {}", e);
        }
    }
}

impl Drop for ActiveMidiOutput {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_note_on() {
        let bytes = OutboundNote::On { pitch: 60, velocity: 100 }.to_bytes();
        assert_eq!(bytes, [0x90, 60, 100]);
    }

    #[test]
    fn test_encode_note_off() {
        let bytes = OutboundNote::Off { pitch: 72, velocity: 0 }.to_bytes();
        assert_eq!(bytes, [0x80, 72, 0]);
    }

    #[test]
    fn test_encode_masks_data_bytes() {
        let bytes = OutboundNote::On { pitch: 0xFF, velocity: 0x80 }.to_bytes();
        assert_eq!(bytes, [0x90, 0x7F, 0x00]);
    }

    #[test]
    fn test_encoded_note_reads_back_through_ingest() {
        use crate::ingest::{classify, NoteKind};

        let on = OutboundNote::On { pitch: 64, velocity: 80 }.to_bytes();
        let parsed = classify(RawMessage::from_bytes(&on).unwrap());
        assert_eq!(parsed, Some(NoteKind::On { pitch: 64, velocity: 80 }));

        let off = OutboundNote::Off { pitch: 64, velocity: 0 }.to_bytes();
        let parsed = classify(RawMessage::from_bytes(&off).unwrap());
        assert_eq!(parsed, Some(NoteKind::Off { pitch: 64 }));
    }

    #[test]
    fn test_memory_output_records_in_order() {
        let output = MemoryOutput::new();
        output.note_on(60, 1);
        output.note_off(60, 0);
        assert_eq!(
            output.sent(),
            vec![
                OutboundNote::On { pitch: 60, velocity: 1 },
                OutboundNote::Off { pitch: 60, velocity: 0 },
            ]
        );
        output.clear();
        assert!(output.sent().is_empty());
    }

    #[test]
    fn test_match_port_takes_first_substring_hit() {
        let names = ["Midi Through:0", "Digital Piano:0", "Digital Piano:1"];
        assert_eq!(match_port(names, "Piano"), Some(1));
        assert_eq!(match_port(names, "Through"), Some(0));
        assert_eq!(match_port(names, "Launchpad"), None);
        assert_eq!(match_port([], "Piano"), None);
    }

    #[test]
    fn test_list_ports() {
        // Port availability depends on the system; just make sure nothing panics
        let _ = list_input_ports();
        let _ = list_output_ports();
    }
}
