//! Plugin contract — lifecycle hooks on peers, connections and messages.
//!
//! A plugin is any [`Plugin`] that exposes one or more capabilities through
//! its `as_*` accessors:
//!
//! - [`PostNewPeerPlugin`]: once, when the peer is constructed.
//! - [`PostDialPlugin`]: client side, after connect, before the session is usable.
//! - [`PostAcceptPlugin`]: server side, after accept.
//! - [`PostReadCallHeaderPlugin`] / [`PostReadPushHeaderPlugin`]: after an
//!   inbound header is decoded, before routing.
//!
//! The [`PluginContainer`] detects capabilities once at construction and fires
//! each hook in registration order. The first error aborts the lifecycle
//! action; later plugins are not invoked.

use crate::context::{CallHandler, PushHandler, ReadCtx};
use crate::session::PreSession;
use async_trait::async_trait;
use ferry_types::{PeerConfig, Rerror, SeqGenerator};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// A named extension attached to a peer.
pub trait Plugin: Send + Sync + 'static {
    /// Name used in logs.
    fn name(&self) -> &str;

    fn as_post_new_peer(&self) -> Option<&dyn PostNewPeerPlugin> {
        None
    }

    fn as_post_dial(&self) -> Option<&dyn PostDialPlugin> {
        None
    }

    fn as_post_accept(&self) -> Option<&dyn PostAcceptPlugin> {
        None
    }

    fn as_post_read_call_header(&self) -> Option<&dyn PostReadCallHeaderPlugin> {
        None
    }

    fn as_post_read_push_header(&self) -> Option<&dyn PostReadPushHeaderPlugin> {
        None
    }
}

/// The peer as seen by [`PostNewPeerPlugin`]: configuration and route
/// registration, before it listens or dials.
pub trait EarlyPeer: Send + Sync {
    fn config(&self) -> &PeerConfig;

    /// The peer's correlation sequence generator.
    fn seq_generator(&self) -> Arc<SeqGenerator>;

    fn route_call(&self, uri: &str, handler: Arc<dyn CallHandler>);

    fn route_push(&self, uri: &str, handler: Arc<dyn PushHandler>);

    /// Handler for calls whose route has no local handler.
    fn set_unknown_call(&self, handler: Arc<dyn CallHandler>);

    /// Handler for pushes whose route has no local handler.
    fn set_unknown_push(&self, handler: Arc<dyn PushHandler>);
}

pub trait PostNewPeerPlugin: Send + Sync {
    fn post_new_peer(&self, peer: &dyn EarlyPeer) -> Result<(), Rerror>;
}

#[async_trait]
pub trait PostDialPlugin: Send + Sync {
    /// May exchange early messages or replace the transport.
    async fn post_dial(&self, sess: &mut PreSession) -> Result<(), Rerror>;
}

#[async_trait]
pub trait PostAcceptPlugin: Send + Sync {
    async fn post_accept(&self, sess: &mut PreSession) -> Result<(), Rerror>;
}

pub trait PostReadCallHeaderPlugin: Send + Sync {
    fn post_read_call_header(&self, ctx: &mut ReadCtx<'_>) -> Result<(), Rerror>;
}

pub trait PostReadPushHeaderPlugin: Send + Sync {
    fn post_read_push_header(&self, ctx: &mut ReadCtx<'_>) -> Result<(), Rerror>;
}

/// Ordered plugins plus the per-hook lists derived from them.
#[derive(Default)]
pub struct PluginContainer {
    all: Vec<Arc<dyn Plugin>>,
    post_new_peer: Vec<Arc<dyn Plugin>>,
    post_dial: Vec<Arc<dyn Plugin>>,
    post_accept: Vec<Arc<dyn Plugin>>,
    post_read_call_header: Vec<Arc<dyn Plugin>>,
    post_read_push_header: Vec<Arc<dyn Plugin>>,
}

impl PluginContainer {
    pub fn new(plugins: Vec<Arc<dyn Plugin>>) -> Self {
        let mut container = Self::default();
        let mut seen = HashSet::new();
        for plugin in plugins {
            if !seen.insert(plugin.name().to_string()) {
                warn!(plugin = plugin.name(), "Duplicate plugin name");
            }
            if plugin.as_post_new_peer().is_some() {
                container.post_new_peer.push(Arc::clone(&plugin));
            }
            if plugin.as_post_dial().is_some() {
                container.post_dial.push(Arc::clone(&plugin));
            }
            if plugin.as_post_accept().is_some() {
                container.post_accept.push(Arc::clone(&plugin));
            }
            if plugin.as_post_read_call_header().is_some() {
                container.post_read_call_header.push(Arc::clone(&plugin));
            }
            if plugin.as_post_read_push_header().is_some() {
                container.post_read_push_header.push(Arc::clone(&plugin));
            }
            container.all.push(plugin);
        }
        container
    }

    /// Plugin names in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.all.iter().map(|p| p.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.all.len()
    }

    pub fn is_empty(&self) -> bool {
        self.all.is_empty()
    }

    pub fn post_new_peer(&self, peer: &dyn EarlyPeer) -> Result<(), Rerror> {
        for plugin in &self.post_new_peer {
            if let Some(hook) = plugin.as_post_new_peer() {
                hook.post_new_peer(peer)
                    .map_err(|e| hook_failed(plugin.name(), "post_new_peer", e))?;
            }
        }
        Ok(())
    }

    pub async fn post_dial(&self, sess: &mut PreSession) -> Result<(), Rerror> {
        for plugin in &self.post_dial {
            if let Some(hook) = plugin.as_post_dial() {
                hook.post_dial(sess)
                    .await
                    .map_err(|e| hook_failed(plugin.name(), "post_dial", e))?;
            }
        }
        Ok(())
    }

    pub async fn post_accept(&self, sess: &mut PreSession) -> Result<(), Rerror> {
        for plugin in &self.post_accept {
            if let Some(hook) = plugin.as_post_accept() {
                hook.post_accept(sess)
                    .await
                    .map_err(|e| hook_failed(plugin.name(), "post_accept", e))?;
            }
        }
        Ok(())
    }

    pub fn post_read_call_header(&self, ctx: &mut ReadCtx<'_>) -> Result<(), Rerror> {
        for plugin in &self.post_read_call_header {
            if let Some(hook) = plugin.as_post_read_call_header() {
                hook.post_read_call_header(ctx)
                    .map_err(|e| hook_failed(plugin.name(), "post_read_call_header", e))?;
            }
        }
        Ok(())
    }

    pub fn post_read_push_header(&self, ctx: &mut ReadCtx<'_>) -> Result<(), Rerror> {
        for plugin in &self.post_read_push_header {
            if let Some(hook) = plugin.as_post_read_push_header() {
                hook.post_read_push_header(ctx)
                    .map_err(|e| hook_failed(plugin.name(), "post_read_push_header", e))?;
            }
        }
        Ok(())
    }
}

fn hook_failed(plugin: &str, hook: &str, err: Rerror) -> Rerror {
    debug!(plugin, hook, error = %err, "Plugin hook failed");
    err
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records every post_new_peer call into a shared log; optionally fails.
    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
        fail: bool,
    }

    impl Plugin for Recorder {
        fn name(&self) -> &str {
            self.name
        }
        fn as_post_new_peer(&self) -> Option<&dyn PostNewPeerPlugin> {
            Some(self)
        }
    }

    impl PostNewPeerPlugin for Recorder {
        fn post_new_peer(&self, _peer: &dyn EarlyPeer) -> Result<(), Rerror> {
            self.log.lock().unwrap().push(self.name);
            if self.fail {
                Err(Rerror::new(150, "boom", self.name))
            } else {
                Ok(())
            }
        }
    }

    /// Implements no capability at all.
    struct Inert;

    impl Plugin for Inert {
        fn name(&self) -> &str {
            "inert"
        }
    }

    struct NullPeer {
        config: PeerConfig,
    }

    impl EarlyPeer for NullPeer {
        fn config(&self) -> &PeerConfig {
            &self.config
        }
        fn seq_generator(&self) -> Arc<SeqGenerator> {
            Arc::new(SeqGenerator::new("null"))
        }
        fn route_call(&self, _uri: &str, _handler: Arc<dyn CallHandler>) {}
        fn route_push(&self, _uri: &str, _handler: Arc<dyn PushHandler>) {}
        fn set_unknown_call(&self, _handler: Arc<dyn CallHandler>) {}
        fn set_unknown_push(&self, _handler: Arc<dyn PushHandler>) {}
    }

    fn recorder(
        name: &'static str,
        log: &Arc<Mutex<Vec<&'static str>>>,
        fail: bool,
    ) -> Arc<dyn Plugin> {
        Arc::new(Recorder {
            name,
            log: Arc::clone(log),
            fail,
        })
    }

    #[test]
    fn test_capabilities_detected_once() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let container = PluginContainer::new(vec![
            recorder("a", &log, false),
            Arc::new(Inert),
            recorder("b", &log, false),
        ]);
        assert_eq!(container.len(), 3);
        assert_eq!(container.names(), vec!["a", "inert", "b"]);
        assert_eq!(container.post_new_peer.len(), 2);
        assert!(container.post_dial.is_empty());
        assert!(container.post_read_call_header.is_empty());
    }

    #[test]
    fn test_hooks_fire_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let container = PluginContainer::new(vec![
            recorder("first", &log, false),
            recorder("second", &log, false),
            recorder("third", &log, false),
        ]);
        let peer = NullPeer {
            config: PeerConfig::default(),
        };
        container.post_new_peer(&peer).unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_first_error_stops_the_chain() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let container = PluginContainer::new(vec![
            recorder("ok", &log, false),
            recorder("bad", &log, true),
            recorder("never", &log, false),
        ]);
        let peer = NullPeer {
            config: PeerConfig::default(),
        };
        let err = container.post_new_peer(&peer).unwrap_err();
        assert_eq!(err.code, 150);
        assert_eq!(err.detail, "bad");
        assert_eq!(*log.lock().unwrap(), vec!["ok", "bad"]);
    }

    #[test]
    fn test_empty_container_is_noop() {
        let container = PluginContainer::new(Vec::new());
        assert!(container.is_empty());
        let peer = NullPeer {
            config: PeerConfig::default(),
        };
        assert!(container.post_new_peer(&peer).is_ok());
    }
}
