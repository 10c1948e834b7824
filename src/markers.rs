//! Attribute vocabulary shared by the rewriter and the browser runtime.

/// Scripts carrying this attribute are never classified or rewritten.
pub const IGNORE: &str = "data-ecstatic-ignore";
pub const OFFLOAD: &str = "data-ecstatic-offload";
pub const DEFER: &str = "data-ecstatic-defer";
pub const ORIGINAL_TYPE: &str = "data-original-type";
pub const SCRIPT_ORDER: &str = "data-script-order";
/// Holds the original `src`. A page's own `data-src` is left alone.
pub const SRC: &str = "data-ecstatic-src";
pub const BOOTSTRAP: &str = "data-ecstatic-bootstrap";
pub const RELAY: &str = "data-ecstatic-relay";

/// Type given to neutralized scripts. Browsers never execute it.
pub const NEUTRAL_TYPE: &str = "text/plain";
