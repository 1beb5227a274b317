//! The application core: model, event handling, view.
//!
//! The document set is the one shared resource. Every mutation reads the
//! latest `Arc<Client>`, computes a replacement through `patch`, and
//! commits it; async completions (uploads, fetches) re-resolve their
//! target by id against the latest tree, never against the snapshot they
//! started from.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::capabilities::{Capabilities, ScriptRequest};
use crate::event::{Event, MediaFile};
use crate::image_processing;
use crate::model::{
    Assembler, ChecklistItem, Client, ClientId, Environment, MaterialOrder, MaterialOrderItem,
    Media, MediaId, PunchList, PunchListIssue, PunchListItem, SupervisionReport, VisitLog,
};
use crate::patch::{self, MediaAnchor, NodeEdit, PatchError, Subtree};
use crate::transport::{
    RetryDecision, RetryPolicy, RetrySchedule, ScriptAction, ScriptError, ScriptResult,
    UploadPayload,
};
use crate::upload::{UploadLedger, UploadTask};
use crate::{
    AppError, ToastKind, ToastMessage, UnixTimeMs, FETCH_TIMEOUT_MS, MEDIA_CACHE_CAPACITY,
    PERSIST_TIMEOUT_MS, SNAPSHOT_KEY, SNAPSHOT_SCHEMA_VERSION,
};

pub struct Model {
    pub clients: Vec<Arc<Client>>,
    pub selected_client: Option<ClientId>,
    pub assemblers: Vec<Arc<Assembler>>,
    pub uploads: UploadLedger,
    pub upload_policy: RetryPolicy,
    pub media_cache: LruCache<String, Vec<u8>>,
    pub logo_png: Option<Vec<u8>>,
    pub active_toast: Option<ToastMessage>,
    pub active_error: Option<AppError>,
    pub hydrated: bool,
}

impl Default for Model {
    fn default() -> Self {
        let capacity = NonZeroUsize::new(MEDIA_CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN);
        Self {
            clients: Vec::new(),
            selected_client: None,
            assemblers: Vec::new(),
            uploads: UploadLedger::new(),
            upload_policy: RetryPolicy::default(),
            media_cache: LruCache::new(capacity),
            logo_png: None,
            active_toast: None,
            active_error: None,
            hydrated: false,
        }
    }
}

impl Model {
    #[must_use]
    pub fn client(&self, id: &ClientId) -> Option<&Arc<Client>> {
        self.clients.iter().find(|c| &c.id == id)
    }

    pub fn upsert_client(&mut self, client: Arc<Client>) {
        match self.clients.iter_mut().find(|c| c.id == client.id) {
            Some(slot) => *slot = client,
            None => self.clients.push(client),
        }
    }

    pub fn show_toast(&mut self, message: impl Into<String>, kind: ToastKind) {
        self.active_toast = Some(ToastMessage::new(message, kind));
    }

    pub fn set_error(&mut self, error: AppError) {
        self.active_error = Some(error);
    }

    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            clients: self.clients.clone(),
            assemblers: self.assemblers.clone(),
            selected_client: self.selected_client.clone(),
        }
    }

    pub fn restore(&mut self, snapshot: Snapshot) {
        self.clients = snapshot.clients;
        self.assemblers = snapshot.assemblers;
        self.selected_client = snapshot
            .selected_client
            .filter(|id| self.clients.iter().any(|c| &c.id == id));
    }
}

/// What survives a restart. Uploads do not: their object-URLs die with
/// the page, so pending media never reaches the snapshot (it is stripped
/// the same way persistence payloads are).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub schema_version: u32,
    pub clients: Vec<Arc<Client>>,
    pub assemblers: Vec<Arc<Assembler>>,
    pub selected_client: Option<ClientId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSummary {
    pub id: ClientId,
    pub name: String,
    pub address: String,
    pub unit_type: String,
    pub environment_count: usize,
    pub open_punch_issues: usize,
    pub overall_progress_pct: u8,
}

impl ClientSummary {
    fn from_client(client: &Client) -> Self {
        Self {
            id: client.id.clone(),
            name: client.name.clone(),
            address: client.address.clone(),
            unit_type: client.unit_type.clone(),
            environment_count: client.environments.len(),
            open_punch_issues: client
                .punch_lists
                .iter()
                .map(|p| p.open_issue_count())
                .sum(),
            overall_progress_pct: client.overall_progress_pct(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadStatusView {
    pub media_id: MediaId,
    pub file_name: String,
    pub attempts: u32,
    pub in_flight: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewModel {
    pub clients: Vec<ClientSummary>,
    pub selected: Option<Arc<Client>>,
    pub assemblers: Vec<Arc<Assembler>>,
    pub uploads: Vec<UploadStatusView>,
    pub pending_upload_count: usize,
    pub toast: Option<ToastMessage>,
    pub error: Option<String>,
    pub logo_available: bool,
    pub hydrated: bool,
}

#[derive(Default)]
pub struct App;

impl App {
    fn persist_local(model: &Model, caps: &Capabilities) {
        let mut buf = Vec::new();
        if let Err(e) = ciborium::ser::into_writer(&model.snapshot(), &mut buf) {
            error!(error = %e, "snapshot serialization failed");
            return;
        }
        caps.kv.set(SNAPSHOT_KEY.to_string(), buf, |result| {
            Event::SnapshotWritten {
                result: Box::new(result),
            }
        });
    }

    /// Fire-and-forget remote persistence behind every commit. Transient
    /// media never reaches the wire.
    fn push_remote(caps: &Capabilities, client: &Client) {
        let payload = client.without_transient_media();
        match serde_json::to_value(&payload) {
            Ok(data) => {
                let request =
                    ScriptRequest::new(ScriptAction::UpdateClient, data, PERSIST_TIMEOUT_MS);
                caps.script.execute(request, |result| Event::PersistAcknowledged {
                    result: Box::new(result),
                });
            }
            Err(e) => error!(error = %e, "client serialization failed"),
        }
    }

    fn commit_client(model: &mut Model, caps: &Capabilities, next: Arc<Client>) {
        Self::push_remote(caps, &next);
        model.upsert_client(next);
        Self::persist_local(model, caps);
        caps.render.render();
    }

    /// Looks up the client's latest tree and applies a patch closure,
    /// reporting unknown-path errors loudly (they are logic bugs, not
    /// runtime conditions).
    fn patched(
        model: &mut Model,
        client: &ClientId,
        f: impl FnOnce(&Arc<Client>) -> Result<Arc<Client>, PatchError>,
    ) -> Option<Arc<Client>> {
        let Some(current) = model.client(client).cloned() else {
            warn!(client = %client, "patch addressed an unknown client");
            return None;
        };
        match f(&current) {
            Ok(next) => Some(next),
            Err(e) => {
                error!(error = %e, "invalid patch path");
                model.set_error(e.into());
                None
            }
        }
    }

    fn apply_patch(
        model: &mut Model,
        caps: &Capabilities,
        client: &ClientId,
        f: impl FnOnce(&Arc<Client>) -> Result<Arc<Client>, PatchError>,
    ) {
        match Self::patched(model, client, f) {
            Some(next) => Self::commit_client(model, caps, next),
            None => caps.render.render(),
        }
    }

    fn cancel_subtree(model: &mut Model, caps: &Capabilities, client: &ClientId, scope: &Subtree) {
        for handle in model.uploads.cancel_within(client, scope) {
            caps.blobs.revoke(handle);
        }
    }

    fn dispatch_upload(model: &mut Model, caps: &Capabilities, media_id: &MediaId) {
        let Some(task) = model.uploads.get_mut(media_id) else {
            return;
        };
        let attempt = task.schedule.begin_attempt();
        task.mark_in_flight();

        let payload = UploadPayload {
            base64_data: task.payload.base64_data.clone(),
            file_name: task.payload.file_name.clone(),
            mime_type: task.payload.mime_type.clone(),
        };
        let timeout_ms = task.schedule.policy().attempt_timeout_ms;
        let data = match serde_json::to_value(&payload) {
            Ok(data) => data,
            Err(e) => {
                error!(error = %e, "upload payload serialization failed");
                return;
            }
        };

        debug!(media = %media_id, attempt, "dispatching upload");
        let media = media_id.clone();
        caps.script.execute(
            ScriptRequest::new(ScriptAction::UploadFile, data, timeout_ms),
            move |result| Event::UploadCompleted {
                media,
                result: Box::new(result),
            },
        );
    }

    fn handle_media_attach(
        model: &mut Model,
        caps: &Capabilities,
        client: ClientId,
        anchor: MediaAnchor,
        file: MediaFile,
    ) {
        let media = Media::placeholder(&file.name, &file.mime_type, file.handle.clone());
        let media_id = media.id.clone();

        match Self::patched(model, &client, |cur| patch::attach_media(cur, &anchor, media)) {
            Some(next) => Self::commit_client(model, caps, next),
            None => {
                // Nothing was attached; the shell's handle is ours to drop.
                caps.blobs.revoke(file.handle);
                caps.render.render();
                return;
            }
        }

        match image_processing::prepare_upload(&file.name, &file.mime_type, &file.bytes) {
            Ok(payload) => {
                model.uploads.register(UploadTask::new(
                    media_id.clone(),
                    client,
                    anchor,
                    file.handle,
                    payload,
                    RetrySchedule::new(model.upload_policy),
                ));
                Self::dispatch_upload(model, caps, &media_id);
            }
            Err(e) => {
                // Attach-then-rollback keeps a single removal path; the
                // placeholder never outlives this event.
                let app_error = AppError::from(e);
                warn!(media = %media_id, error = %app_error, "encode failed before upload");
                Self::rollback_placeholder(model, caps, &client, &anchor, &media_id);
                caps.blobs.revoke(file.handle);
                model.show_toast(app_error.user_facing_message(), ToastKind::Error);
                caps.render.render();
            }
        }
    }

    fn rollback_placeholder(
        model: &mut Model,
        caps: &Capabilities,
        client: &ClientId,
        anchor: &MediaAnchor,
        media_id: &MediaId,
    ) {
        match Self::patched(model, client, |cur| {
            patch::remove_media(cur, anchor, media_id).map(|(next, _)| next)
        }) {
            Some(next) => Self::commit_client(model, caps, next),
            None => warn!(media = %media_id, "rollback target already gone"),
        }
    }

    fn handle_upload_completed(
        model: &mut Model,
        caps: &Capabilities,
        media_id: MediaId,
        result: ScriptResult,
    ) {
        if model.uploads.get(&media_id).is_none() {
            debug!(media = %media_id, "completion for a cancelled upload ignored");
            return;
        }

        let outcome: Result<String, ScriptError> = match result {
            Ok(response) if response.success => {
                response.url.ok_or_else(|| ScriptError::InvalidResponse {
                    reason: "success without a file url".into(),
                })
            }
            Ok(response) => Err(ScriptError::Rejected {
                message: response
                    .message
                    .unwrap_or_else(|| "upload rejected".into()),
            }),
            Err(e) => Err(e),
        };

        match outcome {
            Ok(url) => {
                let Some(task) = model.uploads.remove(&media_id) else {
                    return;
                };
                // Reconcile against the tree as it is NOW; edits made to
                // sibling fields during the upload must survive.
                match Self::patched(model, &task.client, |cur| {
                    patch::complete_media(cur, &task.anchor, &media_id, url)
                }) {
                    Some(next) => {
                        Self::commit_client(model, caps, next);
                        model.show_toast("File uploaded", ToastKind::Success);
                    }
                    None => warn!(media = %media_id, "upload target vanished before reconcile"),
                }
                caps.blobs.revoke(task.handle);
                caps.render.render();
            }
            Err(cause) => {
                let give_up = {
                    let Some(task) = model.uploads.get_mut(&media_id) else {
                        return;
                    };
                    match task.schedule.on_failure(cause) {
                        RetryDecision::RetryAfter { delay_ms } => {
                            debug!(media = %media_id, delay_ms, "upload retry scheduled");
                            task.await_retry(UnixTimeMs::now().add_millis(delay_ms));
                            None
                        }
                        RetryDecision::GiveUp { error } => Some(error),
                    }
                };

                if let Some(error) = give_up {
                    let Some(task) = model.uploads.remove(&media_id) else {
                        return;
                    };
                    let app_error = AppError::from(error);
                    warn!(media = %media_id, error = %app_error, "upload failed, rolling back");
                    Self::rollback_placeholder(model, caps, &task.client, &task.anchor, &media_id);
                    caps.blobs.revoke(task.handle);
                    model.show_toast(app_error.user_facing_message(), ToastKind::Error);
                    caps.render.render();
                }
            }
        }
    }

    fn handle_media_removed(
        model: &mut Model,
        caps: &Capabilities,
        client: ClientId,
        anchor: MediaAnchor,
        media_id: MediaId,
    ) {
        // An in-flight upload for this media is cancelled here; its late
        // completion will find no ledger entry and be ignored.
        let cancelled = model.uploads.remove(&media_id);
        let handle_released = cancelled.is_some();
        if let Some(task) = cancelled {
            caps.blobs.revoke(task.handle);
        }

        match Self::patched_with(model, &client, |cur| {
            patch::remove_media(cur, &anchor, &media_id)
        }) {
            Some((next, removed)) => {
                Self::commit_client(model, caps, next);
                match removed.source {
                    crate::model::MediaSource::Remote { url } => {
                        let data = serde_json::json!({ "url": url });
                        let request =
                            ScriptRequest::new(ScriptAction::DeleteFile, data, FETCH_TIMEOUT_MS);
                        caps.script.execute(request, |result| {
                            Event::FileDeleteAcknowledged {
                                result: Box::new(result),
                            }
                        });
                    }
                    crate::model::MediaSource::Local { handle } => {
                        if !handle_released {
                            caps.blobs.revoke(handle);
                        }
                    }
                }
            }
            None => caps.render.render(),
        }
    }
}

impl App {
    /// Same as `patched`, for edits that hand something back (e.g. the
    /// removed media entry).
    fn patched_with<T>(
        model: &mut Model,
        client: &ClientId,
        f: impl FnOnce(&Arc<Client>) -> Result<(Arc<Client>, T), PatchError>,
    ) -> Option<(Arc<Client>, T)> {
        let Some(current) = model.client(client).cloned() else {
            warn!(client = %client, "patch addressed an unknown client");
            return None;
        };
        match f(&current) {
            Ok(pair) => Some(pair),
            Err(e) => {
                error!(error = %e, "invalid patch path");
                model.set_error(e.into());
                None
            }
        }
    }
}

impl crux_core::App for App {
    type Event = Event;
    type Model = Model;
    type ViewModel = ViewModel;
    type Capabilities = Capabilities;

    fn update(&self, event: Event, model: &mut Model, caps: &Capabilities) {
        match event {
            Event::Noop => {}

            Event::AppStarted => {
                caps.kv.get(SNAPSHOT_KEY.to_string(), |result| {
                    Event::SnapshotLoaded {
                        result: Box::new(result),
                    }
                });
                caps.render.render();
            }

            Event::SnapshotLoaded { result } => {
                match *result {
                    Ok(Some(bytes)) => {
                        match ciborium::de::from_reader::<Snapshot, _>(bytes.as_slice()) {
                            Ok(snapshot) if snapshot.schema_version == SNAPSHOT_SCHEMA_VERSION => {
                                model.restore(snapshot);
                            }
                            Ok(snapshot) => warn!(
                                version = snapshot.schema_version,
                                "discarding snapshot with unknown schema"
                            ),
                            Err(e) => warn!(error = %e, "snapshot deserialization failed"),
                        }
                    }
                    Ok(None) => {}
                    Err(e) => warn!(error = ?e, "snapshot read failed"),
                }
                model.hydrated = true;
                caps.render.render();
            }

            Event::SnapshotWritten { result } => {
                if let Err(e) = *result {
                    warn!(error = ?e, "snapshot write failed");
                    model.show_toast("Unable to save data locally.", ToastKind::Warning);
                    caps.render.render();
                }
            }

            Event::ClientRosterReplaced { clients } => {
                // Every anchor may have changed identity; drop all in-flight
                // uploads and release their handles.
                let old_ids: Vec<ClientId> =
                    model.clients.iter().map(|c| c.id.clone()).collect();
                for id in old_ids {
                    for handle in model.uploads.cancel_for_client(&id) {
                        caps.blobs.revoke(handle);
                    }
                }
                model.clients = clients;
                let selected = model.selected_client.take();
                model.selected_client =
                    selected.filter(|id| model.clients.iter().any(|c| &c.id == id));
                Self::persist_local(model, caps);
                caps.render.render();
            }

            Event::ClientAdded {
                name,
                address,
                unit_type,
            } => {
                let client = Arc::new(Client::new(name, address, unit_type));
                model.selected_client = Some(client.id.clone());
                Self::commit_client(model, caps, client);
            }

            Event::ClientSelected { client } => {
                if model.client(&client).is_some() {
                    model.selected_client = Some(client);
                } else {
                    warn!(client = %client, "selected an unknown client");
                }
                caps.render.render();
            }

            Event::ClientRemoved { client } => {
                for handle in model.uploads.cancel_for_client(&client) {
                    caps.blobs.revoke(handle);
                }
                model.clients.retain(|c| c.id != client);
                if model.selected_client.as_ref() == Some(&client) {
                    model.selected_client = None;
                }
                Self::persist_local(model, caps);
                caps.render.render();
            }

            Event::AssemblerAdded { name, kind } => {
                model.assemblers.push(Arc::new(Assembler::new(name, kind)));
                Self::persist_local(model, caps);
                caps.render.render();
            }

            Event::EnvironmentAdded { client, name } => {
                Self::apply_patch(model, caps, &client, |cur| {
                    Ok(patch::add_environment(cur, Environment::new(name)))
                });
            }

            Event::EnvironmentSaved {
                client,
                environment,
            } => {
                if let Err(e) = environment.validate(&model.assemblers) {
                    model.set_error(e.into());
                    caps.render.render();
                    return;
                }
                let env_id = environment.id.clone();
                Self::apply_patch(model, caps, &client, |cur| {
                    patch::with_environment(cur, &env_id, |existing| {
                        // Form saves never carry media; keep whatever the
                        // live tree holds.
                        let mut environment = environment;
                        environment.checklist = existing.checklist.clone();
                        environment.project_files = existing.project_files.clone();
                        NodeEdit::Replace(environment)
                    })
                });
            }

            Event::EnvironmentRemoved {
                client,
                environment,
            } => {
                Self::cancel_subtree(
                    model,
                    caps,
                    &client,
                    &Subtree::Environment(environment.clone()),
                );
                Self::apply_patch(model, caps, &client, |cur| {
                    patch::with_environment(cur, &environment, |_| NodeEdit::Remove)
                });
            }

            Event::ChecklistItemAdded {
                client,
                environment,
                description,
            } => {
                Self::apply_patch(model, caps, &client, |cur| {
                    patch::with_environment(cur, &environment, |env| {
                        let mut env = env.clone();
                        env.checklist.push(Arc::new(ChecklistItem::new(description)));
                        NodeEdit::Replace(env)
                    })
                });
            }

            Event::ChecklistItemEdited {
                client,
                environment,
                item,
                description,
                progress_pct,
            } => {
                Self::apply_patch(model, caps, &client, |cur| {
                    patch::with_checklist_item(cur, &environment, &item, |it| {
                        let mut it = it.clone();
                        if let Some(description) = description {
                            it.description = description;
                        }
                        if let Some(progress) = progress_pct {
                            it.progress_pct = progress.min(100);
                        }
                        NodeEdit::Replace(it)
                    })
                });
            }

            Event::ChecklistItemStatusChanged {
                client,
                environment,
                item,
                status,
                on,
            } => {
                Self::apply_patch(model, caps, &client, |cur| {
                    patch::with_checklist_item(cur, &environment, &item, |it| {
                        NodeEdit::Replace(it.apply_status(status, on))
                    })
                });
            }

            Event::DefectUpdated {
                client,
                environment,
                item,
                defect,
            } => {
                Self::apply_patch(model, caps, &client, |cur| {
                    patch::with_checklist_item(cur, &environment, &item, |it| {
                        let mut it = it.clone();
                        let mut defect = defect;
                        // Defect media is managed through the pipeline, not
                        // through form saves.
                        defect.media = it
                            .defect
                            .as_ref()
                            .map(|d| d.media.clone())
                            .unwrap_or_default();
                        it.defect = Some(defect);
                        NodeEdit::Replace(it)
                    })
                });
            }

            Event::ChecklistItemRemoved {
                client,
                environment,
                item,
            } => {
                Self::cancel_subtree(
                    model,
                    caps,
                    &client,
                    &Subtree::ChecklistItem(environment.clone(), item.clone()),
                );
                Self::apply_patch(model, caps, &client, |cur| {
                    patch::with_checklist_item(cur, &environment, &item, |_| NodeEdit::Remove)
                });
            }

            Event::PunchListAdded { client, title } => {
                Self::apply_patch(model, caps, &client, |cur| {
                    Ok(patch::add_punch_list(cur, PunchList::new(title)))
                });
            }

            Event::PunchLocationAdded {
                client,
                list,
                location,
            } => {
                Self::apply_patch(model, caps, &client, |cur| {
                    patch::with_punch_list(cur, &list, |l| {
                        let mut l = l.clone();
                        l.items.push(Arc::new(PunchListItem::new(location)));
                        NodeEdit::Replace(l)
                    })
                });
            }

            Event::PunchIssueAdded {
                client,
                list,
                location,
                description,
                category,
            } => {
                Self::apply_patch(model, caps, &client, |cur| {
                    patch::with_punch_location(cur, &list, &location, |loc| {
                        let mut loc = loc.clone();
                        loc.issues
                            .push(Arc::new(PunchListIssue::new(description, category)));
                        NodeEdit::Replace(loc)
                    })
                });
            }

            Event::PunchIssueSaved {
                client,
                list,
                location,
                issue,
            } => {
                let issue_id = issue.id.clone();
                Self::apply_patch(model, caps, &client, |cur| {
                    patch::with_punch_issue(cur, &list, &location, &issue_id, |existing| {
                        let mut issue = issue;
                        issue.media = existing.media.clone();
                        NodeEdit::Replace(issue)
                    })
                });
            }

            Event::PunchIssueRemoved {
                client,
                list,
                location,
                issue,
            } => {
                Self::cancel_subtree(
                    model,
                    caps,
                    &client,
                    &Subtree::PunchIssue(list.clone(), location.clone(), issue.clone()),
                );
                Self::apply_patch(model, caps, &client, |cur| {
                    patch::with_punch_issue(cur, &list, &location, &issue, |_| NodeEdit::Remove)
                });
            }

            Event::PunchLocationRemoved {
                client,
                list,
                location,
            } => {
                Self::cancel_subtree(
                    model,
                    caps,
                    &client,
                    &Subtree::PunchLocation(list.clone(), location.clone()),
                );
                Self::apply_patch(model, caps, &client, |cur| {
                    patch::with_punch_location(cur, &list, &location, |_| NodeEdit::Remove)
                });
            }

            Event::PunchListRemoved { client, list } => {
                Self::cancel_subtree(model, caps, &client, &Subtree::PunchList(list.clone()));
                Self::apply_patch(model, caps, &client, |cur| {
                    patch::with_punch_list(cur, &list, |_| NodeEdit::Remove)
                });
            }

            Event::MaterialOrderAdded {
                client,
                order_number,
                ordered_on,
            } => {
                Self::apply_patch(model, caps, &client, |cur| {
                    Ok(patch::add_material_order(
                        cur,
                        MaterialOrder::new(order_number, ordered_on),
                    ))
                });
            }

            Event::OrderItemAdded {
                client,
                order,
                description,
                quantity,
            } => {
                Self::apply_patch(model, caps, &client, |cur| {
                    patch::with_material_order(cur, &order, |o| {
                        let mut o = o.clone();
                        o.items
                            .push(Arc::new(MaterialOrderItem::new(description, quantity)));
                        NodeEdit::Replace(o)
                    })
                });
            }

            Event::OrderItemRemoved {
                client,
                order,
                item,
            } => {
                Self::cancel_subtree(
                    model,
                    caps,
                    &client,
                    &Subtree::OrderItem(order.clone(), item.clone()),
                );
                Self::apply_patch(model, caps, &client, |cur| {
                    patch::with_order_item(cur, &order, &item, |_| NodeEdit::Remove)
                });
            }

            Event::MaterialOrderRemoved { client, order } => {
                Self::cancel_subtree(model, caps, &client, &Subtree::MaterialOrder(order.clone()));
                Self::apply_patch(model, caps, &client, |cur| {
                    patch::with_material_order(cur, &order, |_| NodeEdit::Remove)
                });
            }

            Event::VisitLogAdded {
                client,
                visited_on,
                notes,
            } => {
                Self::apply_patch(model, caps, &client, |cur| {
                    Ok(patch::add_visit_log(cur, VisitLog::new(visited_on, notes)))
                });
            }

            Event::VisitLogRemoved { client, log } => {
                Self::cancel_subtree(model, caps, &client, &Subtree::VisitLog(log.clone()));
                Self::apply_patch(model, caps, &client, |cur| {
                    patch::with_visit_log(cur, &log, |_| NodeEdit::Remove)
                });
            }

            Event::SupervisionReportAdded {
                client,
                reported_on,
                supervisor,
                notes,
            } => {
                Self::apply_patch(model, caps, &client, |cur| {
                    Ok(patch::add_supervision_report(
                        cur,
                        SupervisionReport::new(reported_on, supervisor, notes),
                    ))
                });
            }

            Event::SupervisionReportRemoved { client, report } => {
                Self::cancel_subtree(
                    model,
                    caps,
                    &client,
                    &Subtree::SupervisionReport(report.clone()),
                );
                Self::apply_patch(model, caps, &client, |cur| {
                    patch::with_supervision_report(cur, &report, |_| NodeEdit::Remove)
                });
            }

            Event::MediaAttachRequested {
                client,
                anchor,
                file,
            } => {
                Self::handle_media_attach(model, caps, client, anchor, file);
            }

            Event::MediaObservationEdited {
                client,
                anchor,
                media,
                observation,
            } => {
                Self::apply_patch(model, caps, &client, |cur| {
                    patch::edit_media(cur, &anchor, &media, |m| {
                        let mut m = m.clone();
                        m.observation = observation;
                        m
                    })
                });
            }

            Event::MediaRemoved {
                client,
                anchor,
                media,
            } => {
                Self::handle_media_removed(model, caps, client, anchor, media);
            }

            Event::UploadCompleted { media, result } => {
                Self::handle_upload_completed(model, caps, media, *result);
            }

            Event::MediaDataRequested { url } => {
                if model.media_cache.contains(&url) {
                    caps.render.render();
                    return;
                }
                let data = serde_json::json!({ "url": url.clone() });
                let request =
                    ScriptRequest::new(ScriptAction::GetFileBase64, data, FETCH_TIMEOUT_MS);
                caps.script.execute(request, move |result| Event::MediaDataLoaded {
                    url,
                    result: Box::new(result),
                });
            }

            Event::MediaDataLoaded { url, result } => match *result {
                Ok(response) if response.success => {
                    let Some(encoded) = response.base64_data else {
                        warn!(url = %url, "file fetch succeeded without data");
                        return;
                    };
                    use base64::Engine;
                    match base64::engine::general_purpose::STANDARD.decode(encoded.as_bytes()) {
                        Ok(bytes) => {
                            model.media_cache.put(url, bytes);
                            caps.render.render();
                        }
                        Err(e) => warn!(url = %url, error = %e, "file fetch returned bad base64"),
                    }
                }
                Ok(response) => {
                    warn!(url = %url, message = ?response.message, "file fetch rejected");
                    model.show_toast("Could not load file", ToastKind::Warning);
                    caps.render.render();
                }
                Err(e) => {
                    warn!(url = %url, error = %e, "file fetch failed");
                    model.show_toast("Could not load file", ToastKind::Warning);
                    caps.render.render();
                }
            },

            Event::LogoRequested => {
                if model.logo_png.is_some() {
                    caps.render.render();
                    return;
                }
                let request = ScriptRequest::new(
                    ScriptAction::GetLogo,
                    serde_json::json!({}),
                    FETCH_TIMEOUT_MS,
                );
                caps.script.execute(request, |result| Event::LogoLoaded {
                    result: Box::new(result),
                });
            }

            Event::LogoLoaded { result } => match *result {
                Ok(response) if response.success => {
                    if let Some(encoded) = response.base64_data {
                        use base64::Engine;
                        if let Ok(bytes) =
                            base64::engine::general_purpose::STANDARD.decode(encoded.as_bytes())
                        {
                            model.logo_png = Some(bytes);
                            caps.render.render();
                        }
                    }
                }
                Ok(response) => warn!(message = ?response.message, "logo fetch rejected"),
                Err(e) => warn!(error = %e, "logo fetch failed"),
            },

            Event::PersistAcknowledged { result } => match *result {
                Ok(response) if response.success => {
                    debug!("remote persistence acknowledged");
                }
                Ok(response) => {
                    warn!(message = ?response.message, "remote persistence rejected");
                    model.show_toast("Saving to the server failed", ToastKind::Warning);
                    caps.render.render();
                }
                Err(e) => {
                    warn!(error = %e, "remote persistence failed");
                    model.show_toast("Saving to the server failed", ToastKind::Warning);
                    caps.render.render();
                }
            },

            Event::FileDeleteAcknowledged { result } => {
                if let Err(e) = *result {
                    warn!(error = %e, "remote file delete failed");
                }
            }

            Event::TimerTick => {
                let due = model.uploads.due(UnixTimeMs::now());
                for media_id in due {
                    Self::dispatch_upload(model, caps, &media_id);
                }
            }

            Event::ShowToast { message, kind } => {
                model.show_toast(message, kind);
                caps.render.render();
            }

            Event::DismissToast => {
                model.active_toast = None;
                caps.render.render();
            }

            Event::DismissError => {
                model.active_error = None;
                caps.render.render();
            }
        }
    }

    fn view(&self, model: &Model) -> ViewModel {
        ViewModel {
            clients: model
                .clients
                .iter()
                .map(|c| ClientSummary::from_client(c))
                .collect(),
            selected: model
                .selected_client
                .as_ref()
                .and_then(|id| model.client(id).cloned()),
            assemblers: model.assemblers.clone(),
            uploads: model
                .uploads
                .iter()
                .map(|t| UploadStatusView {
                    media_id: t.media_id.clone(),
                    file_name: t.payload.file_name.clone(),
                    attempts: t.schedule.attempts(),
                    in_flight: matches!(t.phase, crate::upload::UploadPhase::InFlight),
                })
                .collect(),
            pending_upload_count: model.uploads.len(),
            toast: model.active_toast.clone(),
            error: model.active_error.as_ref().map(AppError::user_facing_message),
            logo_available: model.logo_png.is_some(),
            hydrated: model.hydrated,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_round_trips_through_cbor() {
        let mut model = Model::default();
        model
            .clients
            .push(Arc::new(Client::new("Ana", "Rua A 10", "apartment")));
        model.selected_client = Some(model.clients[0].id.clone());

        let mut buf = Vec::new();
        ciborium::ser::into_writer(&model.snapshot(), &mut buf).unwrap();
        let restored: Snapshot = ciborium::de::from_reader(buf.as_slice()).unwrap();

        assert_eq!(restored.schema_version, SNAPSHOT_SCHEMA_VERSION);
        assert_eq!(restored.clients.len(), 1);
        assert_eq!(restored.clients[0].name, "Ana");
    }

    #[test]
    fn restore_drops_a_selection_that_no_longer_resolves() {
        let mut model = Model::default();
        let snapshot = Snapshot {
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            clients: Vec::new(),
            assemblers: Vec::new(),
            selected_client: Some(ClientId::generate()),
        };
        model.restore(snapshot);
        assert_eq!(model.selected_client, None);
    }
}
