use chrono::{DateTime, Utc};

use super::Role;
use crate::metrics::MetricType;

/// Lifecycle transitions of one connection attempt, in expected order.
/// The order is not enforced; `SessionClosed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transition {
    AttemptStart,
    LocalDescriptionCreated,
    GatheringStart,
    GatheringComplete,
    LocalDescriptionSent,
    RemoteDescriptionReceived,
    TransportConnected,
    SecureChannelEstablished,
    MediaReady,
    SessionClosed,
}

/// Wall-clock stamps for one attempt. Each is set at most once.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectionMilestones {
    pub attempt_start: Option<DateTime<Utc>>,
    pub local_description_created: Option<DateTime<Utc>>,
    pub gathering_start: Option<DateTime<Utc>>,
    pub gathering_complete: Option<DateTime<Utc>>,
    pub local_description_sent: Option<DateTime<Utc>>,
    pub remote_description_received: Option<DateTime<Utc>>,
    pub transport_connected: Option<DateTime<Utc>>,
    pub secure_channel_established: Option<DateTime<Utc>>,
    pub media_ready: Option<DateTime<Utc>>,
}

impl ConnectionMilestones {
    fn slot(&mut self, transition: Transition) -> Option<&mut Option<DateTime<Utc>>> {
        Some(match transition {
            Transition::AttemptStart => &mut self.attempt_start,
            Transition::LocalDescriptionCreated => &mut self.local_description_created,
            Transition::GatheringStart => &mut self.gathering_start,
            Transition::GatheringComplete => &mut self.gathering_complete,
            Transition::LocalDescriptionSent => &mut self.local_description_sent,
            Transition::RemoteDescriptionReceived => &mut self.remote_description_received,
            Transition::TransportConnected => &mut self.transport_connected,
            Transition::SecureChannelEstablished => &mut self.secure_channel_established,
            Transition::MediaReady => &mut self.media_ready,
            Transition::SessionClosed => return None,
        })
    }

    pub fn get(&self, transition: Transition) -> Option<DateTime<Utc>> {
        match transition {
            Transition::AttemptStart => self.attempt_start,
            Transition::LocalDescriptionCreated => self.local_description_created,
            Transition::GatheringStart => self.gathering_start,
            Transition::GatheringComplete => self.gathering_complete,
            Transition::LocalDescriptionSent => self.local_description_sent,
            Transition::RemoteDescriptionReceived => self.remote_description_received,
            Transition::TransportConnected => self.transport_connected,
            Transition::SecureChannelEstablished => self.secure_channel_established,
            Transition::MediaReady => self.media_ready,
            Transition::SessionClosed => None,
        }
    }

    /// Stamp `transition` at `at`. Returns `false` if it was already set
    /// (or is not a milestone), leaving the first stamp untouched.
    pub fn stamp(&mut self, transition: Transition, at: DateTime<Utc>) -> bool {
        match self.slot(transition) {
            Some(slot) if slot.is_none() => {
                *slot = Some(at);
                true
            }
            _ => false,
        }
    }
}

// ─── Measured intervals ──────────────────────────────────────────

/// One measurable span between two milestones.
#[derive(Debug, Clone, Copy)]
pub struct Interval {
    pub metric: MetricType,
    pub from: Transition,
    pub to: Transition,
    initiator: bool,
    responder: bool,
}

impl Interval {
    pub fn applies_to(&self, role: Role) -> bool {
        match role {
            Role::Initiator => self.initiator,
            Role::Responder => self.responder,
        }
    }

    pub fn involves(&self, transition: Transition) -> bool {
        self.from == transition || self.to == transition
    }
}

/// Every lifecycle interval either side measures.
pub const INTERVALS: [Interval; 5] = [
    Interval {
        metric: MetricType::IceGathering,
        from: Transition::GatheringStart,
        to: Transition::GatheringComplete,
        initiator: true,
        responder: true,
    },
    Interval {
        metric: MetricType::SignalingRtt,
        from: Transition::LocalDescriptionSent,
        to: Transition::RemoteDescriptionReceived,
        initiator: true,
        responder: false,
    },
    // On the responder this starts at connection creation, so it includes
    // the answer's trip back and the initiator's processing.
    Interval {
        metric: MetricType::IceConnection,
        from: Transition::AttemptStart,
        to: Transition::TransportConnected,
        initiator: true,
        responder: true,
    },
    Interval {
        metric: MetricType::DtlsHandshake,
        from: Transition::TransportConnected,
        to: Transition::SecureChannelEstablished,
        initiator: true,
        responder: true,
    },
    Interval {
        metric: MetricType::MediaReady,
        from: Transition::AttemptStart,
        to: Transition::MediaReady,
        initiator: true,
        responder: false,
    },
];
