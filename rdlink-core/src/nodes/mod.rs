//! Bindable Nodes
//!
//! A node is bindable when it can be attached to a [`Protocol`] under an
//! [`RdId`] for the lifetime of a [`Scope`]. The kinds of nodes form a
//! closed set, [`Member`]:
//!
//! - [`RdProperty`]: a synchronized value
//! - [`RdSignal`]: a synchronized event stream
//! - [`RdExtension`]: a separately handshaked subtree
//! - [`InternRoot`]: a value cache shared with the counterpart
//!
//! Child ids are derived from the parent id and the child's name as
//! `parent.mix("." + name)`.

pub mod rd_property;
pub mod rd_signal;

use std::sync::Arc;

pub use rd_property::RdProperty;
pub use rd_signal::RdSignal;

use crate::error::Result;
use crate::ext::RdExtension;
use crate::graph::RdId;
use crate::intern::InternRoot;
use crate::lifetime::Scope;
use crate::protocol::Protocol;

/// Binding capability of the typed leaves.
pub trait Bindable: Send + Sync {
    fn bind(&self, scope: &Scope, proto: &Arc<Protocol>, id: RdId) -> Result<()>;

    /// Id assigned by the last bind; null while unbound.
    fn rd_id(&self) -> RdId;
}

/// Where a bound leaf sends to.
#[derive(Clone)]
pub(crate) struct NodeBinding {
    pub(crate) proto: Arc<Protocol>,
    pub(crate) id: RdId,
}

/// A child of a protocol or extension.
#[derive(Clone)]
pub enum Member {
    Property(Arc<dyn Bindable>),
    Signal(Arc<dyn Bindable>),
    Extension(RdExtension),
    InternRoot(Arc<InternRoot>),
}

impl Member {
    /// Bind under `id`. `name` is the member's name within its parent.
    pub fn bind(&self, scope: &Scope, proto: &Arc<Protocol>, id: RdId, name: &str) -> Result<()> {
        let id = id.not_null()?;
        match self {
            Member::Property(node) | Member::Signal(node) => node.bind(scope, proto, id),
            Member::Extension(ext) => ext.bind(scope, proto, id, name),
            Member::InternRoot(root) => {
                root.identify(id);
                root.bind(scope, proto.wire().clone());
                Ok(())
            }
        }
    }

    pub fn rd_id(&self) -> RdId {
        match self {
            Member::Property(node) | Member::Signal(node) => node.rd_id(),
            Member::Extension(ext) => ext.rd_id(),
            Member::InternRoot(root) => root.rd_id(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Member::Property(_) => "property",
            Member::Signal(_) => "signal",
            Member::Extension(_) => "extension",
            Member::InternRoot(_) => "intern root",
        }
    }
}

impl std::fmt::Debug for Member {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Member({}, {})", self.kind(), self.rd_id())
    }
}

impl From<RdExtension> for Member {
    fn from(ext: RdExtension) -> Self {
        Member::Extension(ext)
    }
}

impl From<Arc<InternRoot>> for Member {
    fn from(root: Arc<InternRoot>) -> Self {
        Member::InternRoot(root)
    }
}

/// Id of the child `name` of `parent`.
pub fn child_id(parent: RdId, name: &str) -> RdId {
    parent.mix(&format!(".{name}"))
}
