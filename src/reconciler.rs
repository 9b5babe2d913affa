use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter};

use crate::manager::{AcceptStream, RtcManager, CAMERA_STREAM_ID};

/// Where a remote stream is in the accept/unaccept cycle.
#[derive(Debug, Display, EnumIter, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StreamState {
    NewAccept,
    ToAccept,
    OldAccept,
    DoneAccept,
    ToUnaccept,
    DoneUnaccept,
}

impl StreamState {
    pub fn done(self) -> Self {
        match self {
            StreamState::NewAccept
            | StreamState::ToAccept
            | StreamState::OldAccept
            | StreamState::DoneAccept => StreamState::DoneAccept,
            StreamState::ToUnaccept | StreamState::DoneUnaccept => StreamState::DoneUnaccept,
        }
    }

    pub fn is_accept(self) -> bool {
        self.done() == StreamState::DoneAccept
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stream {
    pub id: String,
    pub state: StreamState,
}

impl Stream {
    pub fn new(id: &str, state: StreamState) -> Self {
        Self {
            id: id.to_owned(),
            state,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub client_id: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub is_audio_enabled: bool,
    #[serde(default)]
    pub is_video_enabled: bool,
    #[serde(default)]
    pub breakout_group: Option<String>,
    #[serde(default)]
    pub streams: Vec<Stream>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Spotlight {
    pub client_id: String,
    #[serde(default)]
    pub stream_id: Option<String>,
}

/// The local side of the room as far as stream acceptance is concerned.
#[derive(Debug, Clone, Default)]
pub struct ReconcileContext {
    pub self_id: String,
    pub breakout_group: Option<String>,
    pub spotlights: Vec<Spotlight>,
    pub ignore_breakout_groups: bool,
}

impl ReconcileContext {
    fn is_spotlighted(&self, client_id: &str) -> bool {
        self.spotlights
            .iter()
            .any(|spotlight| spotlight.client_id == client_id)
    }

    fn should_accept(&self, participant: &Participant) -> bool {
        if self.ignore_breakout_groups || participant.breakout_group == self.breakout_group {
            return true;
        }
        if participant.breakout_group.is_none() && self.is_spotlighted(&participant.client_id) {
            return true;
        }
        self.breakout_group.is_none() && self.is_spotlighted(&self.self_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamCommand {
    pub participant_id: String,
    pub stream_id: String,
    pub target: StreamState,
}

/// Streams in processing order. The camera stream goes first when it arrives second of two.
fn ordered_streams(participant: &Participant) -> Vec<&Stream> {
    match participant.streams.as_slice() {
        [first, camera] if camera.id == CAMERA_STREAM_ID && first.id != CAMERA_STREAM_ID => {
            vec![camera, first]
        }
        streams => streams.iter().collect(),
    }
}

/// Commands that bring every remote stream to its wanted state. Empty when nothing changed.
pub fn compute_commands(
    participants: &[Participant],
    context: &ReconcileContext,
) -> Vec<StreamCommand> {
    let mut commands = Vec::new();
    for participant in participants {
        if participant.client_id == context.self_id {
            continue;
        }
        let accept = context.should_accept(participant);
        for stream in ordered_streams(participant) {
            let target = match (accept, stream.state) {
                (true, StreamState::DoneAccept) => continue,
                (true, state @ (StreamState::NewAccept | StreamState::OldAccept)) => state,
                (true, _) => StreamState::ToAccept,
                (false, StreamState::DoneUnaccept) => continue,
                (false, _) => StreamState::ToUnaccept,
            };
            commands.push(StreamCommand {
                participant_id: participant.client_id.clone(),
                stream_id: stream.id.clone(),
                target,
            });
        }
    }
    commands
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Applied(usize),
    /// Another run was in progress; nothing was done.
    Busy,
}

/// Applies stream commands to the active manager, one run at a time.
#[derive(Debug, Default)]
pub struct Reconciler {
    in_progress: AtomicBool,
}

struct InProgress<'a>(&'a AtomicBool);

impl Drop for InProgress<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_in_progress(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }

    pub async fn reconcile(
        &self,
        participants: &mut [Participant],
        context: &ReconcileContext,
        manager: &dyn RtcManager,
    ) -> ReconcileOutcome {
        if self
            .in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("reconcile is already in progress");
            return ReconcileOutcome::Busy;
        }
        let _guard = InProgress(&self.in_progress);

        let commands = compute_commands(participants, context);
        for command in commands.iter() {
            if command.target.is_accept() {
                manager
                    .accept_new_stream(AcceptStream {
                        stream_id: command.stream_id.clone(),
                        participant_id: command.participant_id.clone(),
                        should_add_local_video: command.target != StreamState::OldAccept,
                    })
                    .await;
            } else {
                manager
                    .disconnect(&command.participant_id, &command.stream_id)
                    .await;
            }

            let stream = participants
                .iter_mut()
                .filter(|participant| participant.client_id == command.participant_id)
                .flat_map(|participant| participant.streams.iter_mut())
                .find(|stream| stream.id == command.stream_id);
            if let Some(stream) = stream {
                stream.state = command.target.done();
            }
        }

        if !commands.is_empty() {
            tracing::debug!("reconciled {} streams", commands.len());
        }
        ReconcileOutcome::Applied(commands.len())
    }
}
