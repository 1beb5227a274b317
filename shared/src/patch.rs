//! Path-addressed edits of the client document tree.
//!
//! Every function returns a new `Arc<Client>` in which only the nodes on
//! the edited path are rebuilt; siblings keep their `Arc` identity, so
//! change detection can compare pointers instead of values. Unknown path
//! components are programmer errors and come back as `PatchError`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{
    ChecklistItem, ChecklistItemId, Client, Environment, EnvironmentId, MaterialOrder,
    MaterialOrderId, MaterialOrderItem, Media, MediaId, OrderItemId, PunchIssueId, PunchList,
    PunchListId, PunchListIssue, PunchListItem, PunchLocationId, ReportId, SupervisionReport,
    VisitLog, VisitLogId,
};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PatchError {
    #[error("environment {0} not found")]
    UnknownEnvironment(EnvironmentId),
    #[error("checklist item {0} not found")]
    UnknownChecklistItem(ChecklistItemId),
    #[error("checklist item {0} has no defect record")]
    NoDefectRecord(ChecklistItemId),
    #[error("punch list {0} not found")]
    UnknownPunchList(PunchListId),
    #[error("punch list location {0} not found")]
    UnknownPunchLocation(PunchLocationId),
    #[error("punch list issue {0} not found")]
    UnknownPunchIssue(PunchIssueId),
    #[error("material order {0} not found")]
    UnknownMaterialOrder(MaterialOrderId),
    #[error("order item {0} not found")]
    UnknownOrderItem(OrderItemId),
    #[error("visit log {0} not found")]
    UnknownVisitLog(VisitLogId),
    #[error("supervision report {0} not found")]
    UnknownReport(ReportId),
    #[error("media {0} not found")]
    UnknownMedia(MediaId),
}

/// Outcome of an updater: replace the target node, or remove it from its
/// parent collection.
pub enum NodeEdit<T> {
    Replace(T),
    Remove,
}

pub fn with_environment(
    root: &Arc<Client>,
    id: &EnvironmentId,
    edit: impl FnOnce(&Environment) -> NodeEdit<Environment>,
) -> Result<Arc<Client>, PatchError> {
    let mut client = Client::clone(root);
    let pos = client
        .environments
        .iter()
        .position(|e| &e.id == id)
        .ok_or_else(|| PatchError::UnknownEnvironment(id.clone()))?;
    match edit(&client.environments[pos]) {
        NodeEdit::Replace(env) => client.environments[pos] = Arc::new(env),
        NodeEdit::Remove => {
            client.environments.remove(pos);
        }
    }
    Ok(Arc::new(client))
}

pub fn with_checklist_item(
    root: &Arc<Client>,
    env_id: &EnvironmentId,
    item_id: &ChecklistItemId,
    edit: impl FnOnce(&ChecklistItem) -> NodeEdit<ChecklistItem>,
) -> Result<Arc<Client>, PatchError> {
    let mut client = Client::clone(root);
    let epos = client
        .environments
        .iter()
        .position(|e| &e.id == env_id)
        .ok_or_else(|| PatchError::UnknownEnvironment(env_id.clone()))?;
    let mut env = Environment::clone(&client.environments[epos]);
    let ipos = env
        .checklist
        .iter()
        .position(|i| &i.id == item_id)
        .ok_or_else(|| PatchError::UnknownChecklistItem(item_id.clone()))?;
    match edit(&env.checklist[ipos]) {
        NodeEdit::Replace(item) => env.checklist[ipos] = Arc::new(item),
        NodeEdit::Remove => {
            env.checklist.remove(ipos);
        }
    }
    client.environments[epos] = Arc::new(env);
    Ok(Arc::new(client))
}

pub fn with_punch_list(
    root: &Arc<Client>,
    id: &PunchListId,
    edit: impl FnOnce(&PunchList) -> NodeEdit<PunchList>,
) -> Result<Arc<Client>, PatchError> {
    let mut client = Client::clone(root);
    let pos = client
        .punch_lists
        .iter()
        .position(|p| &p.id == id)
        .ok_or_else(|| PatchError::UnknownPunchList(id.clone()))?;
    match edit(&client.punch_lists[pos]) {
        NodeEdit::Replace(list) => client.punch_lists[pos] = Arc::new(list),
        NodeEdit::Remove => {
            client.punch_lists.remove(pos);
        }
    }
    Ok(Arc::new(client))
}

pub fn with_punch_location(
    root: &Arc<Client>,
    list_id: &PunchListId,
    location_id: &PunchLocationId,
    edit: impl FnOnce(&PunchListItem) -> NodeEdit<PunchListItem>,
) -> Result<Arc<Client>, PatchError> {
    let location_id = location_id.clone();
    let mut missing = false;
    let next = with_punch_list(root, list_id, |list| {
        let mut list = list.clone();
        match list.items.iter().position(|l| l.id == location_id) {
            Some(pos) => match edit(&list.items[pos]) {
                NodeEdit::Replace(location) => list.items[pos] = Arc::new(location),
                NodeEdit::Remove => {
                    list.items.remove(pos);
                }
            },
            None => missing = true,
        }
        NodeEdit::Replace(list)
    })?;
    if missing {
        return Err(PatchError::UnknownPunchLocation(location_id));
    }
    Ok(next)
}

pub fn with_punch_issue(
    root: &Arc<Client>,
    list_id: &PunchListId,
    location_id: &PunchLocationId,
    issue_id: &PunchIssueId,
    edit: impl FnOnce(&PunchListIssue) -> NodeEdit<PunchListIssue>,
) -> Result<Arc<Client>, PatchError> {
    let issue_id_outer = issue_id.clone();
    let issue_id = issue_id.clone();
    let mut missing = false;
    let next = with_punch_location(root, list_id, location_id, |location| {
        let mut location = location.clone();
        match location.issues.iter().position(|i| i.id == issue_id) {
            Some(pos) => match edit(&location.issues[pos]) {
                NodeEdit::Replace(issue) => location.issues[pos] = Arc::new(issue),
                NodeEdit::Remove => {
                    location.issues.remove(pos);
                }
            },
            None => missing = true,
        }
        NodeEdit::Replace(location)
    })?;
    if missing {
        return Err(PatchError::UnknownPunchIssue(issue_id_outer));
    }
    Ok(next)
}

pub fn with_material_order(
    root: &Arc<Client>,
    id: &MaterialOrderId,
    edit: impl FnOnce(&MaterialOrder) -> NodeEdit<MaterialOrder>,
) -> Result<Arc<Client>, PatchError> {
    let mut client = Client::clone(root);
    let pos = client
        .material_orders
        .iter()
        .position(|o| &o.id == id)
        .ok_or_else(|| PatchError::UnknownMaterialOrder(id.clone()))?;
    match edit(&client.material_orders[pos]) {
        NodeEdit::Replace(order) => client.material_orders[pos] = Arc::new(order),
        NodeEdit::Remove => {
            client.material_orders.remove(pos);
        }
    }
    Ok(Arc::new(client))
}

pub fn with_order_item(
    root: &Arc<Client>,
    order_id: &MaterialOrderId,
    item_id: &OrderItemId,
    edit: impl FnOnce(&MaterialOrderItem) -> NodeEdit<MaterialOrderItem>,
) -> Result<Arc<Client>, PatchError> {
    let item_id_outer = item_id.clone();
    let item_id = item_id.clone();
    let mut missing = false;
    let next = with_material_order(root, order_id, |order| {
        let mut order = order.clone();
        match order.items.iter().position(|i| i.id == item_id) {
            Some(pos) => match edit(&order.items[pos]) {
                NodeEdit::Replace(item) => order.items[pos] = Arc::new(item),
                NodeEdit::Remove => {
                    order.items.remove(pos);
                }
            },
            None => missing = true,
        }
        NodeEdit::Replace(order)
    })?;
    if missing {
        return Err(PatchError::UnknownOrderItem(item_id_outer));
    }
    Ok(next)
}

pub fn with_visit_log(
    root: &Arc<Client>,
    id: &VisitLogId,
    edit: impl FnOnce(&VisitLog) -> NodeEdit<VisitLog>,
) -> Result<Arc<Client>, PatchError> {
    let mut client = Client::clone(root);
    let pos = client
        .visit_logs
        .iter()
        .position(|l| &l.id == id)
        .ok_or_else(|| PatchError::UnknownVisitLog(id.clone()))?;
    match edit(&client.visit_logs[pos]) {
        NodeEdit::Replace(log) => client.visit_logs[pos] = Arc::new(log),
        NodeEdit::Remove => {
            client.visit_logs.remove(pos);
        }
    }
    Ok(Arc::new(client))
}

pub fn with_supervision_report(
    root: &Arc<Client>,
    id: &ReportId,
    edit: impl FnOnce(&SupervisionReport) -> NodeEdit<SupervisionReport>,
) -> Result<Arc<Client>, PatchError> {
    let mut client = Client::clone(root);
    let pos = client
        .supervision_reports
        .iter()
        .position(|r| &r.id == id)
        .ok_or_else(|| PatchError::UnknownReport(id.clone()))?;
    match edit(&client.supervision_reports[pos]) {
        NodeEdit::Replace(report) => client.supervision_reports[pos] = Arc::new(report),
        NodeEdit::Remove => {
            client.supervision_reports.remove(pos);
        }
    }
    Ok(Arc::new(client))
}

#[must_use]
pub fn add_environment(root: &Arc<Client>, env: Environment) -> Arc<Client> {
    let mut client = Client::clone(root);
    client.environments.push(Arc::new(env));
    Arc::new(client)
}

#[must_use]
pub fn add_punch_list(root: &Arc<Client>, list: PunchList) -> Arc<Client> {
    let mut client = Client::clone(root);
    client.punch_lists.push(Arc::new(list));
    Arc::new(client)
}

#[must_use]
pub fn add_material_order(root: &Arc<Client>, order: MaterialOrder) -> Arc<Client> {
    let mut client = Client::clone(root);
    client.material_orders.push(Arc::new(order));
    Arc::new(client)
}

#[must_use]
pub fn add_visit_log(root: &Arc<Client>, log: VisitLog) -> Arc<Client> {
    let mut client = Client::clone(root);
    client.visit_logs.push(Arc::new(log));
    Arc::new(client)
}

#[must_use]
pub fn add_supervision_report(root: &Arc<Client>, report: SupervisionReport) -> Arc<Client> {
    let mut client = Client::clone(root);
    client.supervision_reports.push(Arc::new(report));
    Arc::new(client)
}

/// Uniform address for every media-bearing container in the tree. The
/// upload pipeline reconciles and rolls back through this, so it stays
/// container-agnostic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "container", rename_all = "snake_case")]
pub enum MediaAnchor {
    ChecklistItem {
        environment: EnvironmentId,
        item: ChecklistItemId,
    },
    DefectRecord {
        environment: EnvironmentId,
        item: ChecklistItemId,
    },
    ProjectFiles {
        environment: EnvironmentId,
    },
    PunchIssue {
        list: PunchListId,
        location: PunchLocationId,
        issue: PunchIssueId,
    },
    OrderItem {
        order: MaterialOrderId,
        item: OrderItemId,
    },
    VisitLog {
        log: VisitLogId,
    },
    SupervisionReport {
        report: ReportId,
    },
}

/// A subtree about to be removed. Used to find uploads whose anchor will
/// stop existing so their handles can be released.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Subtree {
    Environment(EnvironmentId),
    ChecklistItem(EnvironmentId, ChecklistItemId),
    PunchList(PunchListId),
    PunchLocation(PunchListId, PunchLocationId),
    PunchIssue(PunchListId, PunchLocationId, PunchIssueId),
    MaterialOrder(MaterialOrderId),
    OrderItem(MaterialOrderId, OrderItemId),
    VisitLog(VisitLogId),
    SupervisionReport(ReportId),
}

impl MediaAnchor {
    #[must_use]
    pub fn is_within(&self, scope: &Subtree) -> bool {
        match (scope, self) {
            (Subtree::Environment(env), Self::ChecklistItem { environment, .. })
            | (Subtree::Environment(env), Self::DefectRecord { environment, .. })
            | (Subtree::Environment(env), Self::ProjectFiles { environment }) => {
                env == environment
            }
            (Subtree::ChecklistItem(env, item), Self::ChecklistItem { environment, item: i })
            | (Subtree::ChecklistItem(env, item), Self::DefectRecord { environment, item: i }) => {
                env == environment && item == i
            }
            (Subtree::PunchList(list), Self::PunchIssue { list: l, .. }) => list == l,
            (
                Subtree::PunchLocation(list, location),
                Self::PunchIssue {
                    list: l,
                    location: loc,
                    ..
                },
            ) => list == l && location == loc,
            (
                Subtree::PunchIssue(list, location, issue),
                Self::PunchIssue {
                    list: l,
                    location: loc,
                    issue: i,
                },
            ) => list == l && location == loc && issue == i,
            (Subtree::MaterialOrder(order), Self::OrderItem { order: o, .. }) => order == o,
            (Subtree::OrderItem(order, item), Self::OrderItem { order: o, item: i }) => {
                order == o && item == i
            }
            (Subtree::VisitLog(log), Self::VisitLog { log: l }) => log == l,
            (Subtree::SupervisionReport(report), Self::SupervisionReport { report: r }) => {
                report == r
            }
            _ => false,
        }
    }
}

fn media_list(root: &Client, anchor: &MediaAnchor) -> Result<Vec<Media>, PatchError> {
    match anchor {
        MediaAnchor::ChecklistItem { environment, item } => {
            let env = root
                .environment(environment)
                .ok_or_else(|| PatchError::UnknownEnvironment(environment.clone()))?;
            let item = env
                .checklist_item(item)
                .ok_or_else(|| PatchError::UnknownChecklistItem(item.clone()))?;
            Ok(item.media.clone())
        }
        MediaAnchor::DefectRecord { environment, item } => {
            let env = root
                .environment(environment)
                .ok_or_else(|| PatchError::UnknownEnvironment(environment.clone()))?;
            let item_node = env
                .checklist_item(item)
                .ok_or_else(|| PatchError::UnknownChecklistItem(item.clone()))?;
            let defect = item_node
                .defect
                .as_ref()
                .ok_or_else(|| PatchError::NoDefectRecord(item.clone()))?;
            Ok(defect.media.clone())
        }
        MediaAnchor::ProjectFiles { environment } => {
            let env = root
                .environment(environment)
                .ok_or_else(|| PatchError::UnknownEnvironment(environment.clone()))?;
            Ok(env.project_files.clone())
        }
        MediaAnchor::PunchIssue {
            list,
            location,
            issue,
        } => {
            let list_node = root
                .punch_list(list)
                .ok_or_else(|| PatchError::UnknownPunchList(list.clone()))?;
            let location_node = list_node
                .items
                .iter()
                .find(|l| &l.id == location)
                .ok_or_else(|| PatchError::UnknownPunchLocation(location.clone()))?;
            let issue_node = location_node
                .issues
                .iter()
                .find(|i| &i.id == issue)
                .ok_or_else(|| PatchError::UnknownPunchIssue(issue.clone()))?;
            Ok(issue_node.media.clone())
        }
        MediaAnchor::OrderItem { order, item } => {
            let order_node = root
                .material_order(order)
                .ok_or_else(|| PatchError::UnknownMaterialOrder(order.clone()))?;
            let item_node = order_node
                .items
                .iter()
                .find(|i| &i.id == item)
                .ok_or_else(|| PatchError::UnknownOrderItem(item.clone()))?;
            Ok(item_node.media.clone())
        }
        MediaAnchor::VisitLog { log } => {
            let log_node = root
                .visit_logs
                .iter()
                .find(|l| &l.id == log)
                .ok_or_else(|| PatchError::UnknownVisitLog(log.clone()))?;
            Ok(log_node.media.clone())
        }
        MediaAnchor::SupervisionReport { report } => {
            let report_node = root
                .supervision_reports
                .iter()
                .find(|r| &r.id == report)
                .ok_or_else(|| PatchError::UnknownReport(report.clone()))?;
            Ok(report_node.media.clone())
        }
    }
}

fn put_media_list(
    root: &Arc<Client>,
    anchor: &MediaAnchor,
    media: Vec<Media>,
) -> Result<Arc<Client>, PatchError> {
    match anchor {
        MediaAnchor::ChecklistItem { environment, item } => {
            with_checklist_item(root, environment, item, |it| {
                let mut it = it.clone();
                it.media = media;
                NodeEdit::Replace(it)
            })
        }
        MediaAnchor::DefectRecord { environment, item } => {
            with_checklist_item(root, environment, item, |it| {
                let mut it = it.clone();
                if let Some(defect) = &mut it.defect {
                    defect.media = media;
                }
                NodeEdit::Replace(it)
            })
        }
        MediaAnchor::ProjectFiles { environment } => with_environment(root, environment, |env| {
            let mut env = env.clone();
            env.project_files = media;
            NodeEdit::Replace(env)
        }),
        MediaAnchor::PunchIssue {
            list,
            location,
            issue,
        } => with_punch_issue(root, list, location, issue, |i| {
            let mut i = i.clone();
            i.media = media;
            NodeEdit::Replace(i)
        }),
        MediaAnchor::OrderItem { order, item } => with_order_item(root, order, item, |i| {
            let mut i = i.clone();
            i.media = media;
            NodeEdit::Replace(i)
        }),
        MediaAnchor::VisitLog { log } => with_visit_log(root, log, |l| {
            let mut l = l.clone();
            l.media = media;
            NodeEdit::Replace(l)
        }),
        MediaAnchor::SupervisionReport { report } => with_supervision_report(root, report, |r| {
            let mut r = r.clone();
            r.media = media;
            NodeEdit::Replace(r)
        }),
    }
}

/// Optimistic attach: appends the media to the addressed container.
pub fn attach_media(
    root: &Arc<Client>,
    anchor: &MediaAnchor,
    media: Media,
) -> Result<Arc<Client>, PatchError> {
    let mut list = media_list(root, anchor)?;
    list.push(media);
    put_media_list(root, anchor, list)
}

/// Reconcile: overlay the durable remote URL onto the media with the
/// matching id, leaving the rest of the list untouched.
pub fn complete_media(
    root: &Arc<Client>,
    anchor: &MediaAnchor,
    media_id: &MediaId,
    url: impl Into<String>,
) -> Result<Arc<Client>, PatchError> {
    let mut list = media_list(root, anchor)?;
    let slot = list
        .iter_mut()
        .find(|m| &m.id == media_id)
        .ok_or_else(|| PatchError::UnknownMedia(media_id.clone()))?;
    *slot = slot.clone().with_remote_url(url);
    put_media_list(root, anchor, list)
}

/// Field edit of one media entry, located by id against the given root.
pub fn edit_media(
    root: &Arc<Client>,
    anchor: &MediaAnchor,
    media_id: &MediaId,
    edit: impl FnOnce(&Media) -> Media,
) -> Result<Arc<Client>, PatchError> {
    let mut list = media_list(root, anchor)?;
    let slot = list
        .iter_mut()
        .find(|m| &m.id == media_id)
        .ok_or_else(|| PatchError::UnknownMedia(media_id.clone()))?;
    *slot = edit(slot);
    put_media_list(root, anchor, list)
}

/// Rollback / deletion: removes the media with the matching id and
/// returns it so the caller can release whatever it referenced.
pub fn remove_media(
    root: &Arc<Client>,
    anchor: &MediaAnchor,
    media_id: &MediaId,
) -> Result<(Arc<Client>, Media), PatchError> {
    let mut list = media_list(root, anchor)?;
    let pos = list
        .iter()
        .position(|m| &m.id == media_id)
        .ok_or_else(|| PatchError::UnknownMedia(media_id.clone()))?;
    let removed = list.remove(pos);
    let next = put_media_list(root, anchor, list)?;
    Ok((next, removed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LocalBlobHandle;

    fn client_with_two_environments() -> Arc<Client> {
        let mut client = Client::new("Ana", "Rua A 10", "apartment");
        let mut kitchen = Environment::new("Kitchen");
        kitchen.checklist.push(Arc::new(ChecklistItem::new("counters")));
        kitchen.checklist.push(Arc::new(ChecklistItem::new("cabinets")));
        client.environments.push(Arc::new(kitchen));
        client.environments.push(Arc::new(Environment::new("Bedroom")));
        Arc::new(client)
    }

    #[test]
    fn untouched_siblings_keep_their_identity() {
        let root = client_with_two_environments();
        let kitchen_id = root.environments[0].id.clone();
        let item_id = root.environments[0].checklist[0].id.clone();

        let next = with_checklist_item(&root, &kitchen_id, &item_id, |item| {
            let mut item = item.clone();
            item.progress_pct = 40;
            NodeEdit::Replace(item)
        })
        .unwrap();

        // Sibling environment and sibling checklist item are shared, the
        // path down to the edited item is new.
        assert!(Arc::ptr_eq(&root.environments[1], &next.environments[1]));
        assert!(Arc::ptr_eq(
            &root.environments[0].checklist[1],
            &next.environments[0].checklist[1]
        ));
        assert!(!Arc::ptr_eq(&root.environments[0], &next.environments[0]));
        assert_eq!(next.environments[0].checklist[0].progress_pct, 40);
        assert_eq!(root.environments[0].checklist[0].progress_pct, 0);
    }

    #[test]
    fn remove_edits_drop_the_node() {
        let root = client_with_two_environments();
        let kitchen_id = root.environments[0].id.clone();
        let next = with_environment(&root, &kitchen_id, |_| NodeEdit::Remove).unwrap();
        assert_eq!(next.environments.len(), 1);
        assert_eq!(next.environments[0].name, "Bedroom");
    }

    #[test]
    fn unknown_path_components_are_errors() {
        let root = client_with_two_environments();
        let missing = EnvironmentId::generate();
        let result = with_environment(&root, &missing, |e| NodeEdit::Replace(e.clone()));
        assert_eq!(result.unwrap_err(), PatchError::UnknownEnvironment(missing));
    }

    #[test]
    fn media_attach_complete_remove_round() {
        let root = client_with_two_environments();
        let anchor = MediaAnchor::ChecklistItem {
            environment: root.environments[0].id.clone(),
            item: root.environments[0].checklist[0].id.clone(),
        };

        let media = Media::placeholder(
            "photo.jpg",
            "image/jpeg",
            LocalBlobHandle::new("blob:mem/1"),
        );
        let media_id = media.id.clone();

        let attached = attach_media(&root, &anchor, media).unwrap();
        assert_eq!(attached.environments[0].checklist[0].media.len(), 1);

        let completed =
            complete_media(&attached, &anchor, &media_id, "https://files.example/f1").unwrap();
        let slot = &completed.environments[0].checklist[0].media[0];
        assert_eq!(slot.source.remote_url(), Some("https://files.example/f1"));

        let (removed_tree, removed) = remove_media(&completed, &anchor, &media_id).unwrap();
        assert!(removed_tree.environments[0].checklist[0].media.is_empty());
        assert_eq!(removed.id, media_id);
    }

    #[test]
    fn completing_a_missing_media_is_an_error() {
        let root = client_with_two_environments();
        let anchor = MediaAnchor::ChecklistItem {
            environment: root.environments[0].id.clone(),
            item: root.environments[0].checklist[0].id.clone(),
        };
        let missing = MediaId::generate();
        let result = complete_media(&root, &anchor, &missing, "https://files.example/x");
        assert_eq!(result.unwrap_err(), PatchError::UnknownMedia(missing));
    }

    #[test]
    fn anchor_scoping_matches_enclosing_subtrees() {
        let env = EnvironmentId::generate();
        let item = ChecklistItemId::generate();
        let anchor = MediaAnchor::ChecklistItem {
            environment: env.clone(),
            item: item.clone(),
        };

        assert!(anchor.is_within(&Subtree::Environment(env.clone())));
        assert!(anchor.is_within(&Subtree::ChecklistItem(env.clone(), item)));
        assert!(!anchor.is_within(&Subtree::Environment(EnvironmentId::generate())));
        assert!(!anchor.is_within(&Subtree::VisitLog(VisitLogId::generate())));

        let defect = MediaAnchor::DefectRecord {
            environment: env.clone(),
            item: ChecklistItemId::generate(),
        };
        assert!(defect.is_within(&Subtree::Environment(env)));
    }
}
