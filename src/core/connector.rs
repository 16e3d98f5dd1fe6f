//! Device command contract.
//!
//! A connector controls one physical or virtual device. Commands are
//! idempotent so the executor may safely repeat them after failures.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::reservation::Alias;
use crate::core::CommandError;
use crate::util::Technology;

/// Request half of the command protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum DeviceCommand {
    /// Create a virtual room.
    CreateRoom {
        /// Room name.
        name: String,
        /// Licensed participants.
        participant_count: u32,
        /// Technology.
        technology: Technology,
        /// Dial-in aliases.
        aliases: Vec<Alias>,
    },
    /// Change the license count of a room.
    ModifyRoom {
        /// Device room id.
        room_id: String,
        /// New licensed participants.
        participant_count: u32,
    },
    /// Delete a room.
    DeleteRoom {
        /// Device room id.
        room_id: String,
    },
    /// Query whether a room session is still alive.
    GetRoom {
        /// Device room id.
        room_id: String,
    },
    /// Dial an alias from an endpoint.
    Dial {
        /// Target alias.
        alias: Alias,
    },
    /// Hang up a call.
    HangUp {
        /// Device call id.
        call_id: String,
    },
    /// Query whether a call is still connected.
    GetCall {
        /// Device call id.
        call_id: String,
    },
    /// Mute a room participant.
    MuteParticipant {
        /// Device room id.
        room_id: String,
        /// Participant id.
        participant_id: String,
    },
    /// Unmute a room participant.
    UnmuteParticipant {
        /// Device room id.
        room_id: String,
        /// Participant id.
        participant_id: String,
    },
    /// Create a recording folder.
    CreateRecordingFolder {
        /// Folder name.
        name: String,
    },
    /// Delete a recording folder.
    DeleteRecordingFolder {
        /// Device folder id.
        folder_id: String,
    },
    /// Query whether a folder has no upload/recording in progress.
    IsRecordingFolderIdle {
        /// Device folder id.
        folder_id: String,
    },
    /// Start recording an alias into a folder.
    StartRecording {
        /// Device folder id.
        folder_id: String,
        /// Recorded alias.
        alias: Alias,
    },
    /// Stop a recording.
    StopRecording {
        /// Device recording id.
        recording_id: String,
    },
    /// List recordings of a folder.
    ListRecordings {
        /// Device folder id.
        folder_id: String,
    },
}

impl DeviceCommand {
    /// Protocol name of the command.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::CreateRoom { .. } => "create_room",
            Self::ModifyRoom { .. } => "modify_room",
            Self::DeleteRoom { .. } => "delete_room",
            Self::GetRoom { .. } => "get_room",
            Self::Dial { .. } => "dial",
            Self::HangUp { .. } => "hang_up",
            Self::GetCall { .. } => "get_call",
            Self::MuteParticipant { .. } => "mute_participant",
            Self::UnmuteParticipant { .. } => "unmute_participant",
            Self::CreateRecordingFolder { .. } => "create_recording_folder",
            Self::DeleteRecordingFolder { .. } => "delete_recording_folder",
            Self::IsRecordingFolderIdle { .. } => "is_recording_folder_idle",
            Self::StartRecording { .. } => "start_recording",
            Self::StopRecording { .. } => "stop_recording",
            Self::ListRecordings { .. } => "list_recordings",
        }
    }
}

/// Response half of the command protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "response", rename_all = "snake_case")]
pub enum CommandResponse {
    /// Command applied, nothing to report.
    Done,
    /// Room created.
    RoomCreated {
        /// Device room id.
        room_id: String,
    },
    /// Call established.
    CallEstablished {
        /// Device call id.
        call_id: String,
    },
    /// Folder created.
    FolderCreated {
        /// Device folder id.
        folder_id: String,
    },
    /// Answer to a session probe.
    SessionActive {
        /// Whether the session is still alive.
        active: bool,
    },
    /// Answer to an idle query.
    Idle {
        /// Whether the resource is idle.
        idle: bool,
    },
    /// Recording started.
    RecordingStarted {
        /// Device recording id.
        recording_id: String,
    },
    /// Recordings of a folder.
    Recordings {
        /// Device recording ids.
        recording_ids: Vec<String>,
    },
}

/// Abstraction for a device connector.
///
/// # Example
///
/// ```rust,ignore
/// use async_trait::async_trait;
/// use prometheus_reservations::core::{CommandError, CommandResponse, Connector, DeviceCommand};
///
/// struct Mcu;
///
/// #[async_trait]
/// impl Connector for Mcu {
///     fn name(&self) -> &str {
///         "mcu"
///     }
///
///     async fn execute(&self, command: DeviceCommand) -> Result<CommandResponse, CommandError> {
///         match command {
///             DeviceCommand::CreateRoom { name, .. } => Ok(CommandResponse::RoomCreated { room_id: name }),
///             DeviceCommand::DeleteRoom { .. } => Ok(CommandResponse::Done),
///             other => Err(CommandError::Unsupported {
///                 command: other.name().into(),
///                 connector: self.name().into(),
///             }),
///         }
///     }
/// }
/// ```
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Connector name as referenced by resources.
    fn name(&self) -> &str;

    /// Execute one command.
    ///
    /// # Threading
    ///
    /// Called from a dedicated command worker thread with its own
    /// single-threaded tokio runtime, so blocking device I/O does not stall
    /// the scheduling runtime.
    async fn execute(&self, command: DeviceCommand) -> Result<CommandResponse, CommandError>;
}
