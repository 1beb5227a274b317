use crux_core::testing::AppTester;

use shared::model::{LocalBlobHandle, MediaSource};
use shared::patch::MediaAnchor;
use shared::transport::{RetryPolicy, ScriptError, ScriptResponse};
use shared::{App, Effect, Event, Model};

fn zero_backoff() -> RetryPolicy {
    RetryPolicy {
        initial_backoff_ms: 0,
        jitter_max_ms: 0,
        ..RetryPolicy::default()
    }
}

fn png_bytes() -> Vec<u8> {
    let img = image::RgbImage::from_pixel(4, 4, image::Rgb([200, 60, 20]));
    let mut out = Vec::new();
    image::DynamicImage::ImageRgb8(img)
        .write_to(
            &mut std::io::Cursor::new(&mut out),
            image::ImageFormat::Png,
        )
        .unwrap();
    out
}

fn media_file(name: &str, handle: &str) -> shared::event::MediaFile {
    shared::event::MediaFile {
        name: name.into(),
        mime_type: "image/png".into(),
        bytes: png_bytes(),
        handle: LocalBlobHandle::new(handle),
    }
}

fn success(url: &str) -> Box<shared::transport::ScriptResult> {
    Box::new(Ok(ScriptResponse {
        success: true,
        url: Some(url.into()),
        base64_data: None,
        message: None,
    }))
}

fn server_error() -> Box<shared::transport::ScriptResult> {
    Box::new(Err(ScriptError::Status {
        status: 500,
        message: "internal".into(),
    }))
}

/// Builds a client with one environment and one checklist item, returning
/// the ids needed to anchor media on that item.
fn seeded(
    app: &AppTester<App, Effect>,
    model: &mut Model,
) -> (
    shared::model::ClientId,
    shared::model::EnvironmentId,
    shared::model::ChecklistItemId,
) {
    app.update(
        Event::ClientAdded {
            name: "c1".into(),
            address: "Av. Central 100".into(),
            unit_type: "apartment".into(),
        },
        model,
    );
    let client = model.clients[0].id.clone();

    app.update(
        Event::EnvironmentAdded {
            client: client.clone(),
            name: "e1".into(),
        },
        model,
    );
    let environment = model.clients[0].environments[0].id.clone();

    app.update(
        Event::ChecklistItemAdded {
            client: client.clone(),
            environment: environment.clone(),
            description: "i1".into(),
        },
        model,
    );
    let item = model.clients[0].environments[0].checklist[0].id.clone();

    (client, environment, item)
}

#[test]
fn end_to_end_attach_and_reconcile() {
    let app = AppTester::<App, Effect>::default();
    let mut model = Model::default();
    model.upload_policy = zero_backoff();

    let (client, environment, item) = seeded(&app, &mut model);
    let anchor = MediaAnchor::ChecklistItem {
        environment: environment.clone(),
        item: item.clone(),
    };

    let update = app.update(
        Event::MediaAttachRequested {
            client: client.clone(),
            anchor,
            file: media_file("photo.png", "blob:temp/1"),
        },
        &mut model,
    );

    // Placeholder is visible before any network response.
    let media = &model.clients[0].environments[0].checklist[0].media;
    assert_eq!(media.len(), 1);
    assert!(media[0].is_pending_upload());
    let media_id = media[0].id.clone();
    assert!(update
        .effects
        .iter()
        .any(|e| matches!(e, Effect::Script(_))));
    assert_eq!(model.uploads.len(), 1);

    let update = app.update(
        Event::UploadCompleted {
            media: media_id.clone(),
            result: success("https://files/remote123"),
        },
        &mut model,
    );

    let media = &model.clients[0].environments[0].checklist[0].media;
    assert_eq!(media.len(), 1);
    assert_eq!(media[0].id, media_id);
    assert_eq!(
        media[0].source,
        MediaSource::Remote {
            url: "https://files/remote123".into()
        }
    );
    assert_eq!(media[0].name, "photo.jpg");
    assert!(model.uploads.is_empty());
    // The transient handle is released exactly here.
    assert!(update.effects.iter().any(|e| matches!(e, Effect::Blobs(_))));
}

#[test]
fn reconcile_preserves_concurrent_sibling_edits() {
    let app = AppTester::<App, Effect>::default();
    let mut model = Model::default();
    model.upload_policy = zero_backoff();

    let (client, environment, item) = seeded(&app, &mut model);
    let anchor = MediaAnchor::ChecklistItem {
        environment: environment.clone(),
        item: item.clone(),
    };

    app.update(
        Event::MediaAttachRequested {
            client: client.clone(),
            anchor,
            file: media_file("photo.png", "blob:temp/1"),
        },
        &mut model,
    );
    let media_id = model.clients[0].environments[0].checklist[0].media[0]
        .id
        .clone();

    // The user keeps editing while the photo is in flight.
    app.update(
        Event::ChecklistItemEdited {
            client: client.clone(),
            environment: environment.clone(),
            item: item.clone(),
            description: Some("mount wardrobe doors".into()),
            progress_pct: Some(55),
        },
        &mut model,
    );

    app.update(
        Event::UploadCompleted {
            media: media_id,
            result: success("https://files/remote123"),
        },
        &mut model,
    );

    let item_node = &model.clients[0].environments[0].checklist[0];
    assert_eq!(item_node.description, "mount wardrobe doors");
    assert_eq!(item_node.progress_pct, 55);
    assert_eq!(item_node.media.len(), 1);
    assert!(item_node.media[0].source.is_remote());
}

#[test]
fn exhausted_retries_roll_back_without_losing_sibling_edits() {
    let app = AppTester::<App, Effect>::default();
    let mut model = Model::default();
    model.upload_policy = zero_backoff();

    let (client, environment, item) = seeded(&app, &mut model);
    let anchor = MediaAnchor::ChecklistItem {
        environment: environment.clone(),
        item: item.clone(),
    };

    app.update(
        Event::MediaAttachRequested {
            client: client.clone(),
            anchor,
            file: media_file("photo.png", "blob:temp/1"),
        },
        &mut model,
    );
    let media_id = model.clients[0].environments[0].checklist[0].media[0]
        .id
        .clone();

    app.update(
        Event::ChecklistItemEdited {
            client: client.clone(),
            environment: environment.clone(),
            item: item.clone(),
            description: Some("mount wardrobe doors".into()),
            progress_pct: None,
        },
        &mut model,
    );

    // 1 initial attempt + 3 retries, every one failing with a 500.
    for round in 0..4 {
        app.update(
            Event::UploadCompleted {
                media: media_id.clone(),
                result: server_error(),
            },
            &mut model,
        );
        if round < 3 {
            // Zero backoff makes the retry due immediately.
            let update = app.update(Event::TimerTick, &mut model);
            assert!(
                update.effects.iter().any(|e| matches!(e, Effect::Script(_))),
                "retry {} should redispatch",
                round + 1
            );
        }
    }

    let item_node = &model.clients[0].environments[0].checklist[0];
    assert!(item_node.media.is_empty(), "placeholder must be rolled back");
    assert_eq!(item_node.description, "mount wardrobe doors");
    assert!(model.uploads.is_empty());
    assert!(model.active_toast.is_some(), "failure must surface to the user");
}

#[test]
fn two_concurrent_uploads_both_land() {
    let app = AppTester::<App, Effect>::default();
    let mut model = Model::default();
    model.upload_policy = zero_backoff();

    let (client, environment, item) = seeded(&app, &mut model);
    let anchor = MediaAnchor::ChecklistItem {
        environment: environment.clone(),
        item: item.clone(),
    };

    app.update(
        Event::MediaAttachRequested {
            client: client.clone(),
            anchor: anchor.clone(),
            file: media_file("first.png", "blob:temp/1"),
        },
        &mut model,
    );
    app.update(
        Event::MediaAttachRequested {
            client: client.clone(),
            anchor,
            file: media_file("second.png", "blob:temp/2"),
        },
        &mut model,
    );

    let media = &model.clients[0].environments[0].checklist[0].media;
    assert_eq!(media.len(), 2);
    let first = media[0].id.clone();
    let second = media[1].id.clone();

    // Completions arrive out of order; each reconciles by id.
    app.update(
        Event::UploadCompleted {
            media: second.clone(),
            result: success("https://files/second"),
        },
        &mut model,
    );
    app.update(
        Event::UploadCompleted {
            media: first.clone(),
            result: success("https://files/first"),
        },
        &mut model,
    );

    let media = &model.clients[0].environments[0].checklist[0].media;
    assert_eq!(media.len(), 2);
    assert_eq!(media[0].id, first);
    assert_eq!(media[0].source.remote_url(), Some("https://files/first"));
    assert_eq!(media[1].id, second);
    assert_eq!(media[1].source.remote_url(), Some("https://files/second"));
    assert!(model.uploads.is_empty());
}

#[test]
fn rejected_responses_roll_back_like_terminal_failures() {
    let app = AppTester::<App, Effect>::default();
    let mut model = Model::default();
    model.upload_policy = zero_backoff();

    let (client, environment, item) = seeded(&app, &mut model);
    let anchor = MediaAnchor::ChecklistItem {
        environment,
        item,
    };

    app.update(
        Event::MediaAttachRequested {
            client,
            anchor,
            file: media_file("photo.png", "blob:temp/1"),
        },
        &mut model,
    );
    let media_id = model.clients[0].environments[0].checklist[0].media[0]
        .id
        .clone();

    // Well-formed response, success: false. No retries for this one.
    app.update(
        Event::UploadCompleted {
            media: media_id,
            result: Box::new(Ok(ScriptResponse {
                success: false,
                url: None,
                base64_data: None,
                message: Some("storage quota exceeded".into()),
            })),
        },
        &mut model,
    );

    assert!(model.clients[0].environments[0].checklist[0]
        .media
        .is_empty());
    assert!(model.uploads.is_empty());
    let toast = model.active_toast.as_ref().expect("user-visible failure");
    assert!(toast.message.contains("storage quota exceeded"));
}

#[test]
fn completions_for_deleted_containers_are_ignored() {
    let app = AppTester::<App, Effect>::default();
    let mut model = Model::default();
    model.upload_policy = zero_backoff();

    let (client, environment, item) = seeded(&app, &mut model);
    let anchor = MediaAnchor::ChecklistItem {
        environment: environment.clone(),
        item: item.clone(),
    };

    app.update(
        Event::MediaAttachRequested {
            client: client.clone(),
            anchor,
            file: media_file("photo.png", "blob:temp/1"),
        },
        &mut model,
    );
    let media_id = model.clients[0].environments[0].checklist[0].media[0]
        .id
        .clone();

    // The whole environment goes away while the upload is in flight; the
    // ledger entry is cancelled and the handle released here.
    let update = app.update(
        Event::EnvironmentRemoved {
            client: client.clone(),
            environment,
        },
        &mut model,
    );
    assert!(model.uploads.is_empty());
    assert!(update.effects.iter().any(|e| matches!(e, Effect::Blobs(_))));

    // The late completion must not resurrect anything or double-release.
    let update = app.update(
        Event::UploadCompleted {
            media: media_id,
            result: success("https://files/late"),
        },
        &mut model,
    );
    assert!(model.clients[0].environments.is_empty());
    assert!(!update.effects.iter().any(|e| matches!(e, Effect::Blobs(_))));
}
