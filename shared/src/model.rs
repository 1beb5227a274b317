use std::fmt;
use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// --- Typed IDs ---

macro_rules! typed_id {
    ($name:ident) => {
        #[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
        pub struct $name(pub String);

        impl $name {
            #[must_use]
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            #[must_use]
            pub fn generate() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

typed_id!(ClientId);
typed_id!(EnvironmentId);
typed_id!(ChecklistItemId);
typed_id!(MediaId);
typed_id!(PunchListId);
typed_id!(PunchLocationId);
typed_id!(PunchIssueId);
typed_id!(MaterialOrderId);
typed_id!(OrderItemId);
typed_id!(VisitLogId);
typed_id!(ReportId);
typed_id!(AssemblerId);

/// Shell-owned object-URL for a file that has not been uploaded yet.
/// Exactly one owner at a time; revoked exactly once.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
pub struct LocalBlobHandle(pub String);

impl LocalBlobHandle {
    #[must_use]
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for LocalBlobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    #[default]
    Image,
    Video,
}

impl MediaKind {
    #[must_use]
    pub fn from_mime(mime_type: &str) -> Self {
        if mime_type.starts_with("video/") {
            Self::Video
        } else {
            Self::Image
        }
    }

    #[must_use]
    pub const fn is_image(self) -> bool {
        matches!(self, Self::Image)
    }
}

/// A media reference is either still local to this device or durably stored.
/// The two never mix: persistence payloads must not contain local handles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum MediaSource {
    Local { handle: LocalBlobHandle },
    Remote { url: String },
}

impl MediaSource {
    #[must_use]
    pub const fn is_local(&self) -> bool {
        matches!(self, Self::Local { .. })
    }

    #[must_use]
    pub const fn is_remote(&self) -> bool {
        matches!(self, Self::Remote { .. })
    }

    #[must_use]
    pub fn local_handle(&self) -> Option<&LocalBlobHandle> {
        match self {
            Self::Local { handle } => Some(handle),
            Self::Remote { .. } => None,
        }
    }

    #[must_use]
    pub fn remote_url(&self) -> Option<&str> {
        match self {
            Self::Remote { url } => Some(url),
            Self::Local { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Media {
    pub id: MediaId,
    pub kind: MediaKind,
    pub source: MediaSource,
    pub name: String,
    pub observation: Option<String>,
}

impl Media {
    /// Optimistic placeholder attached before any network activity.
    #[must_use]
    pub fn placeholder(name: impl Into<String>, mime_type: &str, handle: LocalBlobHandle) -> Self {
        Self {
            id: MediaId::generate(),
            kind: MediaKind::from_mime(mime_type),
            source: MediaSource::Local { handle },
            name: name.into(),
            observation: None,
        }
    }

    #[must_use]
    pub fn with_remote_url(mut self, url: impl Into<String>) -> Self {
        self.source = MediaSource::Remote { url: url.into() };
        self
    }

    #[must_use]
    pub const fn is_pending_upload(&self) -> bool {
        self.source.is_local()
    }

    /// Locator suitable for an `<img>`/`<video>` source.
    #[must_use]
    pub fn display_url(&self) -> String {
        match &self.source {
            MediaSource::Local { handle } => handle.as_str().to_string(),
            MediaSource::Remote { url } => crate::resolver::resolve(url),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    #[default]
    Pending,
    Completed,
    Defective,
}

impl ItemStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Defective => "defective",
        }
    }

    #[must_use]
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Completed => "Completed",
            Self::Defective => "Defective",
        }
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DefectRecord {
    pub order_number: Option<String>,
    pub assistance_number: Option<String>,
    pub reported_on: Option<NaiveDate>,
    pub reason: String,
    pub media: Vec<Media>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecklistItem {
    pub id: ChecklistItemId,
    pub description: String,
    pub status: ItemStatus,
    pub completed_on: Option<NaiveDate>,
    pub defect: Option<DefectRecord>,
    pub progress_pct: u8,
    pub media: Vec<Media>,
}

impl ChecklistItem {
    #[must_use]
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            id: ChecklistItemId::generate(),
            description: description.into(),
            status: ItemStatus::Pending,
            completed_on: None,
            defect: None,
            progress_pct: 0,
            media: Vec::new(),
        }
    }

    /// Status and date fields are co-constrained: `Completed` carries a
    /// completion date and no defect date, `Defective` carries a defect
    /// date, `Pending` carries neither.
    #[must_use]
    pub fn apply_status(&self, status: ItemStatus, on: NaiveDate) -> Self {
        let mut next = self.clone();
        next.status = status;
        match status {
            ItemStatus::Pending => {
                next.completed_on = None;
                if let Some(defect) = &mut next.defect {
                    defect.reported_on = None;
                }
            }
            ItemStatus::Completed => {
                next.completed_on = Some(on);
                next.progress_pct = 100;
                if let Some(defect) = &mut next.defect {
                    defect.reported_on = None;
                }
            }
            ItemStatus::Defective => {
                next.completed_on = None;
                let defect = next.defect.get_or_insert_with(DefectRecord::default);
                defect.reported_on = Some(on);
            }
        }
        next
    }

    #[must_use]
    pub fn local_handles(&self) -> Vec<LocalBlobHandle> {
        let mut handles: Vec<LocalBlobHandle> = self
            .media
            .iter()
            .filter_map(|m| m.source.local_handle().cloned())
            .collect();
        if let Some(defect) = &self.defect {
            handles.extend(
                defect
                    .media
                    .iter()
                    .filter_map(|m| m.source.local_handle().cloned()),
            );
        }
        handles
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AssemblerKind {
    #[default]
    Assembler,
    Helper,
}

impl AssemblerKind {
    #[must_use]
    pub const fn is_helper(self) -> bool {
        matches!(self, Self::Helper)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assembler {
    pub id: AssemblerId,
    pub name: String,
    pub kind: AssemblerKind,
}

impl Assembler {
    #[must_use]
    pub fn new(name: impl Into<String>, kind: AssemblerKind) -> Self {
        Self {
            id: AssemblerId::generate(),
            name: name.into(),
            kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignedShare {
    pub assembler: AssemblerId,
    pub share_pct: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Assignment {
    pub primary: Option<AssignedShare>,
    pub secondary: Option<AssignedShare>,
    pub helper: Option<AssemblerId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Schedule {
    pub starts_on: Option<NaiveDate>,
    pub ends_on: Option<NaiveDate>,
    pub completed_on: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PaymentPlan {
    pub first_pct: Option<u8>,
    pub second_pct: Option<u8>,
    pub first_month: Option<String>,
    pub second_month: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Environment {
    pub id: EnvironmentId,
    pub name: String,
    pub schedule: Schedule,
    pub assignment: Assignment,
    pub checklist: Vec<Arc<ChecklistItem>>,
    pub project_files: Vec<Media>,
    pub payment: PaymentPlan,
}

impl Environment {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: EnvironmentId::generate(),
            name: name.into(),
            schedule: Schedule::default(),
            assignment: Assignment::default(),
            checklist: Vec::new(),
            project_files: Vec::new(),
            payment: PaymentPlan::default(),
        }
    }

    #[must_use]
    pub fn checklist_item(&self, id: &ChecklistItemId) -> Option<&Arc<ChecklistItem>> {
        self.checklist.iter().find(|i| &i.id == id)
    }

    /// Mean checklist progress, rounded down. Empty checklists read as 0.
    #[must_use]
    pub fn progress_pct(&self) -> u8 {
        if self.checklist.is_empty() {
            return 0;
        }
        let total: u32 = self
            .checklist
            .iter()
            .map(|i| u32::from(i.progress_pct))
            .sum();
        (total / self.checklist.len() as u32).min(100) as u8
    }

    /// Save-boundary validation. Continuous editing may hold invalid
    /// intermediate splits; saving may not.
    pub fn validate(&self, roster: &[Arc<Assembler>]) -> Result<(), ValidationError> {
        let find = |id: &AssemblerId| roster.iter().find(|a| &a.id == id);

        for share in [&self.assignment.primary, &self.assignment.secondary]
            .into_iter()
            .flatten()
        {
            if !(1..=100).contains(&share.share_pct) {
                return Err(ValidationError::ShareOutOfRange {
                    pct: share.share_pct,
                });
            }
            match find(&share.assembler) {
                None => {
                    return Err(ValidationError::UnknownAssembler {
                        id: share.assembler.clone(),
                    })
                }
                Some(a) if a.kind.is_helper() => {
                    return Err(ValidationError::HelperInAssemblerSlot { id: a.id.clone() })
                }
                Some(_) => {}
            }
        }

        if let (Some(primary), Some(secondary)) =
            (&self.assignment.primary, &self.assignment.secondary)
        {
            if primary.assembler == secondary.assembler {
                return Err(ValidationError::DuplicateAssembler {
                    id: primary.assembler.clone(),
                });
            }
            let sum = u16::from(primary.share_pct) + u16::from(secondary.share_pct);
            if sum != 100 {
                return Err(ValidationError::SplitMustSumTo100 { sum });
            }
        }

        if let Some(helper) = &self.assignment.helper {
            match find(helper) {
                None => {
                    return Err(ValidationError::UnknownAssembler {
                        id: helper.clone(),
                    })
                }
                Some(a) if !a.kind.is_helper() => {
                    return Err(ValidationError::AssemblerInHelperSlot { id: a.id.clone() })
                }
                Some(_) => {}
            }
        }

        Ok(())
    }

    #[must_use]
    pub fn local_handles(&self) -> Vec<LocalBlobHandle> {
        let mut handles: Vec<LocalBlobHandle> = self
            .project_files
            .iter()
            .filter_map(|m| m.source.local_handle().cloned())
            .collect();
        for item in &self.checklist {
            handles.extend(item.local_handles());
        }
        handles
    }
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("assembler shares must sum to 100, got {sum}")]
    SplitMustSumTo100 { sum: u16 },
    #[error("assembler share {pct} is out of range [1, 100]")]
    ShareOutOfRange { pct: u8 },
    #[error("assembler {id} is assigned twice")]
    DuplicateAssembler { id: AssemblerId },
    #[error("assembler {id} is not in the roster")]
    UnknownAssembler { id: AssemblerId },
    #[error("helper {id} cannot take an assembler slot")]
    HelperInAssemblerSlot { id: AssemblerId },
    #[error("assembler {id} cannot take the helper slot")]
    AssemblerInHelperSlot { id: AssemblerId },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IssueStatus {
    #[default]
    Open,
    InProgress,
    Resolved,
}

impl IssueStatus {
    #[must_use]
    pub const fn is_open(self) -> bool {
        !matches!(self, Self::Resolved)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PunchListIssue {
    pub id: PunchIssueId,
    pub description: String,
    pub status: IssueStatus,
    pub category: String,
    pub assigned_to: Option<AssemblerId>,
    pub media: Vec<Media>,
}

impl PunchListIssue {
    #[must_use]
    pub fn new(description: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            id: PunchIssueId::generate(),
            description: description.into(),
            status: IssueStatus::Open,
            category: category.into(),
            assigned_to: None,
            media: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PunchListItem {
    pub id: PunchLocationId,
    pub location: String,
    pub issues: Vec<Arc<PunchListIssue>>,
}

impl PunchListItem {
    #[must_use]
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            id: PunchLocationId::generate(),
            location: location.into(),
            issues: Vec::new(),
        }
    }

    #[must_use]
    pub fn local_handles(&self) -> Vec<LocalBlobHandle> {
        self.issues
            .iter()
            .flat_map(|i| i.media.iter())
            .filter_map(|m| m.source.local_handle().cloned())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PunchList {
    pub id: PunchListId,
    pub title: String,
    pub created_on: Option<NaiveDate>,
    pub items: Vec<Arc<PunchListItem>>,
}

impl PunchList {
    #[must_use]
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: PunchListId::generate(),
            title: title.into(),
            created_on: None,
            items: Vec::new(),
        }
    }

    #[must_use]
    pub fn open_issue_count(&self) -> usize {
        self.items
            .iter()
            .flat_map(|i| i.issues.iter())
            .filter(|i| i.status.is_open())
            .count()
    }

    #[must_use]
    pub fn local_handles(&self) -> Vec<LocalBlobHandle> {
        self.items.iter().flat_map(|i| i.local_handles()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterialOrderItem {
    pub id: OrderItemId,
    pub description: String,
    pub quantity: u32,
    pub media: Vec<Media>,
}

impl MaterialOrderItem {
    #[must_use]
    pub fn new(description: impl Into<String>, quantity: u32) -> Self {
        Self {
            id: OrderItemId::generate(),
            description: description.into(),
            quantity,
            media: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialOrder {
    pub id: MaterialOrderId,
    pub order_number: String,
    pub ordered_on: Option<NaiveDate>,
    pub items: Vec<Arc<MaterialOrderItem>>,
}

impl MaterialOrder {
    #[must_use]
    pub fn new(order_number: impl Into<String>, ordered_on: Option<NaiveDate>) -> Self {
        Self {
            id: MaterialOrderId::generate(),
            order_number: order_number.into(),
            ordered_on,
            items: Vec::new(),
        }
    }

    #[must_use]
    pub fn local_handles(&self) -> Vec<LocalBlobHandle> {
        self.items
            .iter()
            .flat_map(|i| i.media.iter())
            .filter_map(|m| m.source.local_handle().cloned())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisitLog {
    pub id: VisitLogId,
    pub visited_on: NaiveDate,
    pub notes: String,
    pub media: Vec<Media>,
}

impl VisitLog {
    #[must_use]
    pub fn new(visited_on: NaiveDate, notes: impl Into<String>) -> Self {
        Self {
            id: VisitLogId::generate(),
            visited_on,
            notes: notes.into(),
            media: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupervisionReport {
    pub id: ReportId,
    pub reported_on: NaiveDate,
    pub supervisor: String,
    pub notes: String,
    pub media: Vec<Media>,
}

impl SupervisionReport {
    #[must_use]
    pub fn new(
        reported_on: NaiveDate,
        supervisor: impl Into<String>,
        notes: impl Into<String>,
    ) -> Self {
        Self {
            id: ReportId::generate(),
            reported_on,
            supervisor: supervisor.into(),
            notes: notes.into(),
            media: Vec::new(),
        }
    }
}

/// Root aggregate. All mutation produces a new `Client` value; child
/// collections hold `Arc`s so untouched siblings keep their identity
/// across a patch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Client {
    pub id: ClientId,
    pub name: String,
    pub address: String,
    pub unit_type: String,
    pub environments: Vec<Arc<Environment>>,
    pub visit_logs: Vec<Arc<VisitLog>>,
    pub punch_lists: Vec<Arc<PunchList>>,
    pub material_orders: Vec<Arc<MaterialOrder>>,
    pub supervision_reports: Vec<Arc<SupervisionReport>>,
}

impl Client {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        address: impl Into<String>,
        unit_type: impl Into<String>,
    ) -> Self {
        Self {
            id: ClientId::generate(),
            name: name.into(),
            address: address.into(),
            unit_type: unit_type.into(),
            environments: Vec::new(),
            visit_logs: Vec::new(),
            punch_lists: Vec::new(),
            material_orders: Vec::new(),
            supervision_reports: Vec::new(),
        }
    }

    #[must_use]
    pub fn environment(&self, id: &EnvironmentId) -> Option<&Arc<Environment>> {
        self.environments.iter().find(|e| &e.id == id)
    }

    #[must_use]
    pub fn punch_list(&self, id: &PunchListId) -> Option<&Arc<PunchList>> {
        self.punch_lists.iter().find(|p| &p.id == id)
    }

    #[must_use]
    pub fn material_order(&self, id: &MaterialOrderId) -> Option<&Arc<MaterialOrder>> {
        self.material_orders.iter().find(|o| &o.id == id)
    }

    #[must_use]
    pub fn overall_progress_pct(&self) -> u8 {
        if self.environments.is_empty() {
            return 0;
        }
        let total: u32 = self
            .environments
            .iter()
            .map(|e| u32::from(e.progress_pct()))
            .sum();
        (total / self.environments.len() as u32).min(100) as u8
    }

    /// Copy of this client with every still-uploading media filtered out.
    /// Persistence payloads must never carry transient local handles.
    #[must_use]
    pub fn without_transient_media(&self) -> Self {
        fn keep(media: &[Media]) -> Vec<Media> {
            media.iter().filter(|m| !m.is_pending_upload()).cloned().collect()
        }

        let mut client = self.clone();
        client.environments = self
            .environments
            .iter()
            .map(|env| {
                let mut env = Environment::clone(env);
                env.project_files = keep(&env.project_files);
                env.checklist = env
                    .checklist
                    .iter()
                    .map(|item| {
                        let mut item = ChecklistItem::clone(item);
                        item.media = keep(&item.media);
                        if let Some(defect) = &mut item.defect {
                            defect.media = keep(&defect.media);
                        }
                        Arc::new(item)
                    })
                    .collect();
                Arc::new(env)
            })
            .collect();
        client.punch_lists = self
            .punch_lists
            .iter()
            .map(|list| {
                let mut list = PunchList::clone(list);
                list.items = list
                    .items
                    .iter()
                    .map(|loc| {
                        let mut loc = PunchListItem::clone(loc);
                        loc.issues = loc
                            .issues
                            .iter()
                            .map(|issue| {
                                let mut issue = PunchListIssue::clone(issue);
                                issue.media = keep(&issue.media);
                                Arc::new(issue)
                            })
                            .collect();
                        Arc::new(loc)
                    })
                    .collect();
                Arc::new(list)
            })
            .collect();
        client.material_orders = self
            .material_orders
            .iter()
            .map(|order| {
                let mut order = MaterialOrder::clone(order);
                order.items = order
                    .items
                    .iter()
                    .map(|item| {
                        let mut item = MaterialOrderItem::clone(item);
                        item.media = keep(&item.media);
                        Arc::new(item)
                    })
                    .collect();
                Arc::new(order)
            })
            .collect();
        client.visit_logs = self
            .visit_logs
            .iter()
            .map(|log| {
                let mut log = VisitLog::clone(log);
                log.media = keep(&log.media);
                Arc::new(log)
            })
            .collect();
        client.supervision_reports = self
            .supervision_reports
            .iter()
            .map(|report| {
                let mut report = SupervisionReport::clone(report);
                report.media = keep(&report.media);
                Arc::new(report)
            })
            .collect();
        client
    }
}
