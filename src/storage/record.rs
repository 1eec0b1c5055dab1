//! On-disk format of one queued event
//!
//! ```text
//! ┌──────────┬──────────────┬───────────┬────────────┬──────────┐
//! │ version  │ event frame  │ source    │ message    │ action   │
//! │ u32 LE   │ JSON         │ UTF-8     │ UTF-8      │ u16 LE   │
//! └──────────┴──────────────┴───────────┴────────────┴──────────┘
//! ```
//!
//! Every field is written as a 4-byte little-endian length followed by that
//! many bytes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::{StorageError, StorageResult};
use crate::action::ActionKind;
use crate::event::{EventKind, EventSnapshot, EventState, StateMap};
use crate::service::{MonitorMode, ServiceKind};
use crate::transport::DeliveryFlags;

pub const RECORD_VERSION: u32 = 1;

/// The event fields stored in the event frame
#[derive(Debug, Serialize, Deserialize)]
struct EventFrame {
    kind: EventKind,
    service_kind: ServiceKind,
    mode: MonitorMode,
    collected: DateTime<Utc>,
    state: EventState,
    state_map: StateMap,
    state_changed: bool,
    count: u64,
    delivery: DeliveryFlags,
}

fn put_frame(buffer: &mut Vec<u8>, bytes: &[u8]) {
    buffer.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    buffer.extend_from_slice(bytes);
}

struct Frames<'a> {
    data: &'a [u8],
}

impl<'a> Frames<'a> {
    fn next(&mut self, field: &str) -> StorageResult<&'a [u8]> {
        let Some((length, rest)) = self.data.split_first_chunk::<4>() else {
            return Err(StorageError::Format(format!("missing {field}")));
        };
        let length = u32::from_le_bytes(*length) as usize;
        if rest.len() < length {
            return Err(StorageError::Format(format!(
                "{field} truncated ({} of {length} bytes)",
                rest.len()
            )));
        }
        let (frame, rest) = rest.split_at(length);
        self.data = rest;
        Ok(frame)
    }

    fn next_string(&mut self, field: &str) -> StorageResult<String> {
        let bytes = self.next(field)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| StorageError::Format(format!("{field} is not valid UTF-8")))
    }
}

pub fn encode(event: &EventSnapshot) -> StorageResult<Vec<u8>> {
    let frame = EventFrame {
        kind: event.kind,
        service_kind: event.service_kind,
        mode: event.mode,
        collected: event.collected,
        state: event.state,
        state_map: event.state_map,
        state_changed: event.state_changed,
        count: event.count,
        delivery: event.delivery,
    };

    let mut buffer = Vec::new();
    put_frame(&mut buffer, &RECORD_VERSION.to_le_bytes());
    put_frame(&mut buffer, &serde_json::to_vec(&frame)?);
    put_frame(&mut buffer, event.source.as_bytes());
    put_frame(
        &mut buffer,
        event.message.as_deref().unwrap_or_default().as_bytes(),
    );
    put_frame(&mut buffer, &(event.action as u16).to_le_bytes());
    Ok(buffer)
}

pub fn decode(data: &[u8]) -> StorageResult<EventSnapshot> {
    let mut frames = Frames { data };

    let version: [u8; 4] = frames
        .next("version")?
        .try_into()
        .map_err(|_| StorageError::Format("invalid version size".to_string()))?;
    let version = u32::from_le_bytes(version);
    if version != RECORD_VERSION {
        return Err(StorageError::Version {
            found: version,
            expected: RECORD_VERSION,
        });
    }

    let frame: EventFrame = serde_json::from_slice(frames.next("event")?)?;
    let source = frames.next_string("source")?;
    let message = frames.next_string("message")?;

    let action: [u8; 2] = frames
        .next("action")?
        .try_into()
        .map_err(|_| StorageError::Format("invalid action size".to_string()))?;
    let action = u16::from_le_bytes(action);
    let action = ActionKind::from_code(action)
        .ok_or_else(|| StorageError::Format(format!("unknown action {action}")))?;

    Ok(EventSnapshot {
        kind: frame.kind,
        source,
        service_kind: frame.service_kind,
        mode: frame.mode,
        collected: frame.collected,
        state: frame.state,
        state_map: frame.state_map,
        state_changed: frame.state_changed,
        count: frame.count,
        message: (!message.is_empty()).then_some(message),
        delivery: frame.delivery,
        action,
    })
}
