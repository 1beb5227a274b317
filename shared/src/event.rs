use std::fmt;
use std::sync::Arc;

use chrono::NaiveDate;
use crux_kv::error::KeyValueError;
use serde::{Deserialize, Serialize};

use crate::model::{
    AssemblerKind, ChecklistItemId, Client, ClientId, DefectRecord, Environment, EnvironmentId,
    ItemStatus, LocalBlobHandle, MaterialOrderId, MediaId, OrderItemId, PunchIssueId,
    PunchListId, PunchListIssue, PunchLocationId, ReportId, VisitLogId,
};
use crate::patch::MediaAnchor;
use crate::transport::ScriptResult;
use crate::ToastKind;

/// File picked (or captured) in the shell, handed over together with the
/// transient object-URL the shell minted for instant preview.
#[derive(Clone, Serialize, Deserialize)]
pub struct MediaFile {
    pub name: String,
    pub mime_type: String,
    #[serde(with = "serde_bytes")]
    pub bytes: Vec<u8>,
    pub handle: LocalBlobHandle,
}

// File contents don't belong in logs.
impl fmt::Debug for MediaFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaFile")
            .field("name", &self.name)
            .field("mime_type", &self.mime_type)
            .field("bytes", &format_args!("[{} bytes]", self.bytes.len()))
            .field("handle", &self.handle)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub enum Event {
    Noop,

    AppStarted,
    SnapshotLoaded {
        result: Box<Result<Option<Vec<u8>>, KeyValueError>>,
    },
    SnapshotWritten {
        result: Box<Result<Option<Vec<u8>>, KeyValueError>>,
    },

    // --- client roster ---
    ClientRosterReplaced {
        clients: Vec<Arc<Client>>,
    },
    ClientAdded {
        name: String,
        address: String,
        unit_type: String,
    },
    ClientSelected {
        client: ClientId,
    },
    ClientRemoved {
        client: ClientId,
    },

    // --- assembler roster ---
    AssemblerAdded {
        name: String,
        kind: AssemblerKind,
    },

    // --- environments ---
    EnvironmentAdded {
        client: ClientId,
        name: String,
    },
    EnvironmentSaved {
        client: ClientId,
        environment: Environment,
    },
    EnvironmentRemoved {
        client: ClientId,
        environment: EnvironmentId,
    },

    // --- checklist ---
    ChecklistItemAdded {
        client: ClientId,
        environment: EnvironmentId,
        description: String,
    },
    ChecklistItemEdited {
        client: ClientId,
        environment: EnvironmentId,
        item: ChecklistItemId,
        description: Option<String>,
        progress_pct: Option<u8>,
    },
    ChecklistItemStatusChanged {
        client: ClientId,
        environment: EnvironmentId,
        item: ChecklistItemId,
        status: ItemStatus,
        on: NaiveDate,
    },
    DefectUpdated {
        client: ClientId,
        environment: EnvironmentId,
        item: ChecklistItemId,
        defect: DefectRecord,
    },
    ChecklistItemRemoved {
        client: ClientId,
        environment: EnvironmentId,
        item: ChecklistItemId,
    },

    // --- punch lists ---
    PunchListAdded {
        client: ClientId,
        title: String,
    },
    PunchLocationAdded {
        client: ClientId,
        list: PunchListId,
        location: String,
    },
    PunchIssueAdded {
        client: ClientId,
        list: PunchListId,
        location: PunchLocationId,
        description: String,
        category: String,
    },
    PunchIssueSaved {
        client: ClientId,
        list: PunchListId,
        location: PunchLocationId,
        issue: PunchListIssue,
    },
    PunchIssueRemoved {
        client: ClientId,
        list: PunchListId,
        location: PunchLocationId,
        issue: PunchIssueId,
    },
    PunchLocationRemoved {
        client: ClientId,
        list: PunchListId,
        location: PunchLocationId,
    },
    PunchListRemoved {
        client: ClientId,
        list: PunchListId,
    },

    // --- material orders ---
    MaterialOrderAdded {
        client: ClientId,
        order_number: String,
        ordered_on: Option<NaiveDate>,
    },
    OrderItemAdded {
        client: ClientId,
        order: MaterialOrderId,
        description: String,
        quantity: u32,
    },
    OrderItemRemoved {
        client: ClientId,
        order: MaterialOrderId,
        item: OrderItemId,
    },
    MaterialOrderRemoved {
        client: ClientId,
        order: MaterialOrderId,
    },

    // --- visit logs / supervision reports ---
    VisitLogAdded {
        client: ClientId,
        visited_on: NaiveDate,
        notes: String,
    },
    VisitLogRemoved {
        client: ClientId,
        log: VisitLogId,
    },
    SupervisionReportAdded {
        client: ClientId,
        reported_on: NaiveDate,
        supervisor: String,
        notes: String,
    },
    SupervisionReportRemoved {
        client: ClientId,
        report: ReportId,
    },

    // --- media pipeline ---
    MediaAttachRequested {
        client: ClientId,
        anchor: MediaAnchor,
        file: MediaFile,
    },
    MediaObservationEdited {
        client: ClientId,
        anchor: MediaAnchor,
        media: MediaId,
        observation: Option<String>,
    },
    MediaRemoved {
        client: ClientId,
        anchor: MediaAnchor,
        media: MediaId,
    },
    UploadCompleted {
        media: MediaId,
        result: Box<ScriptResult>,
    },

    // --- backend fetches ---
    MediaDataRequested {
        url: String,
    },
    MediaDataLoaded {
        url: String,
        result: Box<ScriptResult>,
    },
    LogoRequested,
    LogoLoaded {
        result: Box<ScriptResult>,
    },

    // --- fire-and-forget acknowledgements ---
    PersistAcknowledged {
        result: Box<ScriptResult>,
    },
    FileDeleteAcknowledged {
        result: Box<ScriptResult>,
    },

    // --- housekeeping ---
    TimerTick,
    ShowToast {
        message: String,
        kind: ToastKind,
    },
    DismissToast,
    DismissError,
}
