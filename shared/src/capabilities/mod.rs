mod blobs;
mod script;

pub use self::blobs::{BlobOperation, Blobs};
pub use self::script::{Script, ScriptOperation, ScriptRequest};

pub use crux_core::render::Render;
pub use crux_kv::KeyValue;

use crate::app::App;
use crate::event::Event;

/// Alias so the `Effect` derive names the variant `Kv` (after the field)
/// rather than `KeyValue` (after the concrete capability type).
pub type Kv<E> = KeyValue<E>;

pub type AppScript = Script<Event>;
pub type AppBlobs = Blobs<Event>;
pub type AppKv = KeyValue<Event>;
pub type AppRender = Render<Event>;

#[derive(crux_core::macros::Effect)]
#[effect(app = "App")]
pub struct Capabilities {
    pub script: Script<Event>,
    pub blobs: Blobs<Event>,
    pub kv: Kv<Event>,
    pub render: Render<Event>,
}
