use std::sync::Arc;

use midir::{MidiOutput, MidiOutputConnection};
use parking_lot::Mutex;

use super::{MidiMessage, message::all_sound_off};
use crate::error::{Error, Result};

/// Sink for outbound messages, typically a synthesizer.
pub trait MidiPort: Send {
    fn send(&mut self, message: &MidiMessage) -> Result<()>;

    /// All sound off on every channel.
    fn panic(&mut self) -> Result<()>;
}

pub struct MidirPort {
    name: String,
    connection: MidiOutputConnection,
}

impl MidirPort {
    /// Connects to the first output whose name contains `filter`, or to the
    /// first output when no filter is given.
    pub fn connect(client_name: &str, filter: Option<&str>) -> Result<Self> {
        let output =
            MidiOutput::new(client_name).map_err(|e| Error::Output(e.to_string()))?;
        let ports = output.ports();
        let port = ports
            .iter()
            .find(|p| match filter {
                Some(filter) => output.port_name(p).unwrap_or_default().contains(filter),
                None => true,
            })
            .ok_or_else(|| Error::Output("no MIDI output found".into()))?;

        let name = output.port_name(port).unwrap_or_default();
        tracing::info!("MIDI output: {}", name);

        let connection = output
            .connect(port, &format!("{client_name}-output"))
            .map_err(|e| Error::Output(e.to_string()))?;

        Ok(Self { name, connection })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn send_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.connection
            .send(bytes)
            .map_err(|e| Error::Output(e.to_string()))
    }
}

impl MidiPort for MidirPort {
    fn send(&mut self, message: &MidiMessage) -> Result<()> {
        match message.to_bytes() {
            Some(bytes) => self.send_bytes(&bytes),
            None => Ok(()),
        }
    }

    fn panic(&mut self) -> Result<()> {
        for channel in 1..=16 {
            self.send_bytes(&all_sound_off(channel))?;
        }
        Ok(())
    }
}

/// Process-wide handle to the output port, shared by every loaded song.
#[derive(Clone)]
pub struct OutputPort(Arc<Mutex<Box<dyn MidiPort>>>);

impl OutputPort {
    pub fn new<P: MidiPort + 'static>(port: P) -> Self {
        Self(Arc::new(Mutex::new(Box::new(port))))
    }

    pub fn send(&self, message: &MidiMessage) -> Result<()> {
        self.0.lock().send(message)
    }

    pub fn panic(&self) -> Result<()> {
        self.0.lock().panic()
    }
}
