//! Progress and result events emitted by a running request.

use crate::metadata::VolumeSummary;

use serde::Serialize;
use std::path::PathBuf;

/// Coarse status of an event, as shown by a UI host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventState {
    Progress,
    Success,
    Error,
    EmptyResult,
}

/// One step of a metadata query or a conversion.
///
/// Within one request, events arrive in emission order: for each series a
/// sequence of [`ConversionEvent::Progress`] milestones followed by exactly
/// one terminal event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConversionEvent {
    Progress {
        series: String,
        percent: u8,
    },
    Metadata {
        series: String,
        #[serde(flatten)]
        summary: VolumeSummary,
    },
    Success {
        series: String,
        output: PathBuf,
    },
    Error {
        series: Option<String>,
        message: String,
    },
    /// The source directory held no decodable series.
    Empty,
}

impl ConversionEvent {
    pub fn state(&self) -> EventState {
        match self {
            Self::Progress { .. } => EventState::Progress,
            Self::Metadata { .. } | Self::Success { .. } => EventState::Success,
            Self::Error { .. } => EventState::Error,
            Self::Empty => EventState::EmptyResult,
        }
    }

    /// Percentage label of a progress event, e.g. `"25%"`.
    pub fn label(&self) -> Option<String> {
        match self {
            Self::Progress { percent, .. } => Some(format!("{percent}%")),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Progress { .. })
    }

    pub fn series(&self) -> Option<&str> {
        match self {
            Self::Progress { series, .. }
            | Self::Metadata { series, .. }
            | Self::Success { series, .. } => Some(series),
            Self::Error { series, .. } => series.as_deref(),
            Self::Empty => None,
        }
    }
}

/// Receives events on the worker thread that produced them.
pub trait EventSink: Send + Sync + 'static {
    fn emit(&self, event: ConversionEvent);
}

impl<F> EventSink for F
where
    F: Fn(ConversionEvent) + Send + Sync + 'static,
{
    fn emit(&self, event: ConversionEvent) {
        self(event);
    }
}
