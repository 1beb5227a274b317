//! Revocation of shell-minted transient object-URLs.
//!
//! Handle creation happens in the shell (before the core ever sees the
//! file); the core is responsible for revoking each handle exactly once,
//! on reconcile or rollback.

use crux_core::capability::{Capability, CapabilityContext, Operation};
use serde::{Deserialize, Serialize};

use crate::model::LocalBlobHandle;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum BlobOperation {
    Revoke { handle: String },
}

impl Operation for BlobOperation {
    type Output = ();
}

pub struct Blobs<E> {
    context: CapabilityContext<BlobOperation, E>,
}

impl<Ev> Capability<Ev> for Blobs<Ev> {
    type Operation = BlobOperation;
    type MappedSelf<MappedEv> = Blobs<MappedEv>;

    fn map_event<F, NewEv>(&self, f: F) -> Self::MappedSelf<NewEv>
    where
        F: Fn(NewEv) -> Ev + Send + Sync + 'static,
        Ev: 'static,
        NewEv: 'static,
    {
        Blobs::new(self.context.map_event(f))
    }
}

impl<E> Blobs<E> {
    pub fn new(context: CapabilityContext<BlobOperation, E>) -> Self {
        Self { context }
    }
}

impl<E> Blobs<E>
where
    E: Send + 'static,
{
    /// Fire-and-forget; the handle is dead to the core from here on.
    pub fn revoke(&self, handle: LocalBlobHandle) {
        let ctx = self.context.clone();
        self.context.spawn(async move {
            ctx.notify_shell(BlobOperation::Revoke {
                handle: handle.into_string(),
            })
            .await;
        });
    }
}
