use crate::{QualityComputationError, QualityScore, ScanError, ScanEvent, ScanFormat};
use crossbeam_channel::Sender;
use std::fmt;
use std::time::Duration;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ScanMode {
    Snapshot,
    Continuous,
}

impl fmt::Display for ScanMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let string = match self {
            ScanMode::Snapshot => "snapshot",
            ScanMode::Continuous => "continuous",
        };

        write!(f, "{}", string)
    }
}

/// A capture to run on a session-bound device.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ScanRequest {
    Snapshot(ScanFormat),
    /// Streams previews until the sensor settles; the sensor gives up after `timeout`.
    Continuous {
        format: ScanFormat,
        timeout: Duration,
    },
}

impl ScanRequest {
    pub fn mode(&self) -> ScanMode {
        match self {
            ScanRequest::Snapshot(_) => ScanMode::Snapshot,
            ScanRequest::Continuous { .. } => ScanMode::Continuous,
        }
    }

    pub fn format(&self) -> &ScanFormat {
        match self {
            ScanRequest::Snapshot(format) => format,
            ScanRequest::Continuous { format, .. } => format,
        }
    }
}

/// Final frame of a scan with its quality. A failed quality computation keeps the frame.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanResult {
    pub mode: ScanMode,
    pub event: ScanEvent,
    pub quality: Result<QualityScore, QualityComputationError>,
}

impl fmt::Display for ScanResult {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} scan: {}, {}, finger detect value {}, ",
            self.mode, self.event.status, self.event.format, self.event.finger_detect_value
        )?;
        match &self.quality {
            Ok(score) => write!(f, "quality {}", score),
            Err(err) => write!(f, "quality unavailable ({})", err),
        }
    }
}

/// What a scan sink receives: previews in emission order, then exactly one terminal message.
#[derive(Debug, Clone)]
pub enum ScanMessage {
    Preview(ScanEvent),
    Completed(ScanResult),
    Failed(ScanError),
}

impl ScanMessage {
    pub fn is_terminal(&self) -> bool {
        match self {
            ScanMessage::Preview(_) => false,
            ScanMessage::Completed(_) | ScanMessage::Failed(_) => true,
        }
    }
}

/// Consumer of scan messages. Delivery happens on the thread that started the scan.
pub trait ScanSink {
    fn deliver(&mut self, message: ScanMessage);
}

impl<F> ScanSink for F
where
    F: FnMut(ScanMessage),
{
    fn deliver(&mut self, message: ScanMessage) {
        self(message)
    }
}

impl ScanSink for Sender<ScanMessage> {
    fn deliver(&mut self, message: ScanMessage) {
        // A receiver that went away just stops watching.
        let _ = self.send(message);
    }
}
