//! Case-insensitive routing.

use ferry_types::Rerror;
use ferry_wire::{Plugin, PostReadCallHeaderPlugin, PostReadPushHeaderPlugin, ReadCtx};

/// Lower-cases the route path of every inbound call and push, so
/// `/Math/ADD` reaches a handler registered as `/math/add`. The query string
/// is left alone.
#[derive(Debug, Clone, Copy, Default)]
pub struct IgnoreCase;

impl IgnoreCase {
    pub fn new() -> Self {
        Self
    }
}

fn lower_path(ctx: &mut ReadCtx<'_>) {
    let lowered = ctx.path().to_lowercase();
    if lowered != ctx.path() {
        ctx.set_path(&lowered);
    }
}

impl Plugin for IgnoreCase {
    fn name(&self) -> &str {
        "ignoreCase"
    }

    fn as_post_read_call_header(&self) -> Option<&dyn PostReadCallHeaderPlugin> {
        Some(self)
    }

    fn as_post_read_push_header(&self) -> Option<&dyn PostReadPushHeaderPlugin> {
        Some(self)
    }
}

impl PostReadCallHeaderPlugin for IgnoreCase {
    fn post_read_call_header(&self, ctx: &mut ReadCtx<'_>) -> Result<(), Rerror> {
        lower_path(ctx);
        Ok(())
    }
}

impl PostReadPushHeaderPlugin for IgnoreCase {
    fn post_read_push_header(&self, ctx: &mut ReadCtx<'_>) -> Result<(), Rerror> {
        lower_path(ctx);
        Ok(())
    }
}
